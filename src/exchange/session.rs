//! Per-client session state and the capability the gateway supplies.

use crate::book::{Order, OrderId, SessionOrder, Trade};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Capability handle back to a connected client, supplied by whichever
/// gateway (FIX, gRPC, in-process test harness) owns the transport.
///
/// Both send methods must be non-blocking: they are invoked while the book
/// and session locks are held, so an implementation that waits on the
/// network would stall the instrument. Gateways queue and return.
///
/// The engine is decoupled from the gateway through this trait alone;
/// dynamic dispatch happens only at this boundary, never inside the match
/// loop.
pub trait ExchangeClient: Send + Sync {
    /// Report the order's current state to the owning client.
    fn send_order_status(&self, so: &SessionOrder);

    /// Report executions to the owning client.
    fn send_trades(&self, trades: &[Trade]);

    /// Stable identifier for the client session (e.g. the FIX session id).
    fn session_id(&self) -> String;
}

/// A client's two-sided quote in one instrument. Either side may be absent.
#[derive(Default)]
pub(crate) struct QuotePair {
    pub(crate) bid: Option<SessionOrder>,
    pub(crate) ask: Option<SessionOrder>,
}

#[derive(Default)]
pub(crate) struct SessionState {
    /// The client's live orders, keyed by its own order ids.
    pub(crate) orders: HashMap<OrderId, Arc<Mutex<Order>>>,
    /// Current quote per instrument id.
    pub(crate) quotes: HashMap<i64, QuotePair>,
}

/// One client session. Locked after the instrument's book lock, never
/// before it.
pub(crate) struct Session {
    pub(crate) id: String,
    pub(crate) state: Mutex<SessionState>,
}

impl Session {
    pub(crate) fn new(id: String) -> Session {
        Session {
            id,
            state: Mutex::new(SessionState::default()),
        }
    }
}
