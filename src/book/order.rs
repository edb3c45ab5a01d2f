//! Orders and the session-order pairing used inside the books.

use crate::exchange::ExchangeClient;
use crate::fixed::Fixed;
use crate::instrument::Instrument;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Side {
    /// Bid side.
    Buy,
    /// Ask side.
    Sell,
}

impl Side {
    /// The opposing side.
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        })
    }
}

/// Supported order types. Anything else is rejected at the connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OrderType {
    /// Rests at its limit price.
    Limit,
    /// Executes against the book and never rests.
    Market,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OrderType::Limit => "limit",
            OrderType::Market => "market",
        })
    }
}

/// Order lifecycle states. `Filled`, `Cancelled`, and `Rejected` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OrderState {
    /// Accepted but not yet booked.
    New,
    /// Resting on the book.
    Booked,
    /// Partially executed, remainder still working.
    PartialFill,
    /// Fully executed.
    Filled,
    /// Cancelled by the client, a disconnect, or a market-order remainder.
    Cancelled,
    /// Refused; see the order's reject reason.
    Rejected,
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OrderState::New => "new",
            OrderState::Booked => "booked",
            OrderState::PartialFill => "partial",
            OrderState::Filled => "filled",
            OrderState::Cancelled => "cancelled",
            OrderState::Rejected => "rejected",
        })
    }
}

/// Client-assigned order identifier, a per-session counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct OrderId(pub i32);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A client order.
///
/// Shared between the owning session and the book as `Arc<Mutex<Order>>`;
/// the inner mutex makes the sharing safe, while mutation is only ever
/// performed by request handlers that hold the instrument's book lock, which
/// is what keeps the lifecycle ordered.
#[derive(Debug, Clone, Serialize)]
pub struct Order {
    /// The instrument this order trades.
    pub instrument: Instrument,
    /// Client-assigned id, scoped to the owning session.
    pub id: OrderId,
    /// Engine-assigned id, set on acceptance.
    pub exchange_id: String,
    /// Limit price; `Fixed::ZERO` for market orders.
    pub price: Fixed,
    /// Buy or sell.
    pub side: Side,
    /// Original quantity, always positive.
    pub quantity: Fixed,
    /// Unexecuted quantity, `0 ≤ remaining ≤ quantity`.
    pub remaining: Fixed,
    /// Limit or market.
    pub order_type: OrderType,
    /// Lifecycle state.
    pub state: OrderState,
    /// Populated when `state == Rejected`.
    pub reject_reason: Option<String>,
}

impl Order {
    fn new(
        instrument: Instrument,
        id: OrderId,
        side: Side,
        price: Fixed,
        quantity: Fixed,
        order_type: OrderType,
    ) -> Order {
        Order {
            instrument,
            id,
            exchange_id: String::new(),
            price,
            side,
            quantity,
            remaining: quantity,
            order_type,
            state: OrderState::New,
            reject_reason: None,
        }
    }

    /// Build a limit order in the `New` state.
    pub fn limit(
        instrument: Instrument,
        id: OrderId,
        side: Side,
        price: Fixed,
        quantity: Fixed,
    ) -> Order {
        Order::new(instrument, id, side, price, quantity, OrderType::Limit)
    }

    /// Build a market order in the `New` state. The price is `ZERO`.
    pub fn market(instrument: Instrument, id: OrderId, side: Side, quantity: Fixed) -> Order {
        Order::new(
            instrument,
            id,
            side,
            Fixed::ZERO,
            quantity,
            OrderType::Market,
        )
    }

    /// `true` until the order reaches a terminal state.
    pub fn is_active(&self) -> bool {
        !matches!(
            self.state,
            OrderState::Filled | OrderState::Cancelled | OrderState::Rejected
        )
    }

    /// Execute `quantity` against this order, moving it to `Filled` or
    /// `PartialFill`.
    pub(crate) fn fill(&mut self, quantity: Fixed) {
        self.remaining = self.remaining.sub(quantity);
        self.state = if self.remaining.is_zero() {
            OrderState::Filled
        } else {
            OrderState::PartialFill
        };
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "oid {} eoid {} {} {} {} @ {} remaining {} {}",
            self.id,
            self.exchange_id,
            self.instrument.symbol,
            self.side,
            self.quantity,
            self.price,
            self.remaining,
            self.state
        )
    }
}

/// An order paired with its owning client and the engine-local admission
/// timestamp — the price-time-priority tie-breaker within a price level.
#[derive(Clone)]
pub struct SessionOrder {
    /// Capability handle back to the owning client session.
    pub client: Arc<dyn ExchangeClient>,
    /// The shared order.
    pub order: Arc<Mutex<Order>>,
    /// Admission time at the engine.
    pub time: Instant,
}

impl SessionOrder {
    /// Pair `order` with `client`, stamping the admission time.
    pub fn new(client: Arc<dyn ExchangeClient>, order: Arc<Mutex<Order>>) -> SessionOrder {
        SessionOrder {
            client,
            order,
            time: Instant::now(),
        }
    }

    /// The price this order sorts at: market buys float to the top of the
    /// bid ladder (`Fixed::MAX`), market sells to the top of the ask ladder
    /// (`Fixed::ZERO`), limit orders sit at their limit price.
    pub fn effective_price(&self) -> Fixed {
        let order = crate::utils::lock(&self.order);
        match order.order_type {
            OrderType::Market => match order.side {
                Side::Buy => Fixed::MAX,
                Side::Sell => Fixed::ZERO,
            },
            OrderType::Limit => order.price,
        }
    }

    /// Identity comparison: two session orders are the same order exactly
    /// when they share the underlying allocation.
    pub fn same_order(&self, other: &SessionOrder) -> bool {
        Arc::ptr_eq(&self.order, &other.order)
    }
}

impl fmt::Display for SessionOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let order = crate::utils::lock(&self.order);
        write!(f, "{} {}", self.client.session_id(), order)
    }
}

impl fmt::Debug for SessionOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionOrder({self})")
    }
}
