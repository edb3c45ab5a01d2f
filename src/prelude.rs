//! Re-exports of the types most embeddings need.
//!
//! ```rust
//! use exchange_rs::prelude::*;
//! ```

// Engine types
pub use crate::book::{
    Book, BookLevel, Order, OrderBook, OrderId, OrderState, OrderType, SessionOrder, Side, Trade,
};
pub use crate::exchange::{Exchange, ExchangeClient};

// Value types
pub use crate::fixed::Fixed;
pub use crate::instrument::{Instrument, InstrumentRegistry};

// Market data surface
pub use crate::marketdata::{MarketData, MarketDataListener, MarketDataReceiver, MarketEvent};

// Transport configuration and errors
pub use crate::config::Config;
pub use crate::error::ExchangeError;

// Rendezvous primitive used around login and instrument download
pub use crate::sync::StatusLatch;
