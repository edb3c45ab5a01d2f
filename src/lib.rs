//! # Electronic Trading Exchange Core
//!
//! The core of an electronic trading exchange: it accepts orders and
//! two-sided quotes from many client sessions, maintains a
//! price-time-priority limit order book per instrument, continuously
//! matches crossing bids and asks into trades, and publishes the resulting
//! book updates and trade prints to all market participants over UDP
//! multicast — with sequence-numbered packets, a bounded history, and TCP
//! replay for lost-packet recovery.
//!
//! ## Architecture
//!
//! - **Matching engine** ([`book`]): per-instrument books holding a
//!   price-sorted ladder of FIFO levels. Ladder insertion binary searches
//!   the price levels; appends within a level are O(1). Market orders are
//!   given an effective price that floats them to the top of their ladder
//!   and are cancelled rather than rested when liquidity runs out.
//!
//! - **Session model** ([`exchange`]): per-client state holding the
//!   client's live orders and its current two-sided quote per instrument.
//!   The engine sees clients only through the [`ExchangeClient`]
//!   capability, so FIX, gRPC, and in-process gateways are
//!   interchangeable. Client disconnect cancels everything the session
//!   owns.
//!
//! - **Market data publisher** ([`marketdata`]): a dedicated thread drains
//!   an unbounded event channel, deduplicates stale snapshots, coalesces
//!   same-price trades, and batches events into numbered UDP datagrams up
//!   to [`wire::MAX_MSG_SIZE`]. Every datagram lands in a bounded history
//!   served by a persistent-connection TCP replay responder.
//!
//! - **Market data receiver** ([`marketdata::MarketDataReceiver`]):
//!   reassembles the stream, detects gaps by packet number, requests
//!   replay over TCP, and delivers books in-order per instrument to any
//!   number of registered listeners.
//!
//! ## Concurrency model
//!
//! One dedicated OS thread per long-lived role (publisher, UDP reader,
//! replay worker, replay responder connections); client requests run on
//! whatever thread carried them in. Every request serializes across two
//! locks in a fixed order — the instrument's book mutex, then the client's
//! session mutex — and neither is ever held across I/O. Global counters
//! (exchange id, trade id, snapshot sequence, packet number) are atomics
//! behind explicit handles.
//!
//! ## Determinism
//!
//! Prices and quantities are exact decimals ([`Fixed`], an `i64` mantissa
//! at scale 10⁻⁹) with a compact varint wire form. IEEE-754 arithmetic
//! never touches trade economics.
//!
//! ## Example
//!
//! ```no_run
//! use exchange_rs::prelude::*;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), ExchangeError> {
//! let registry = Arc::new(InstrumentRegistry::new());
//! registry.load_file("configs/instruments.txt")?;
//!
//! let config = Config::default();
//! let market_data = MarketData::start(&config)?;
//! let exchange = Exchange::new(Arc::clone(&registry), market_data);
//!
//! // a gateway hands the engine its client capability and orders
//! # struct MyGateway;
//! # impl ExchangeClient for MyGateway {
//! #     fn send_order_status(&self, _so: &SessionOrder) {}
//! #     fn send_trades(&self, _trades: &[Trade]) {}
//! #     fn session_id(&self) -> String { "demo".into() }
//! # }
//! let client: Arc<dyn ExchangeClient> = Arc::new(MyGateway);
//! let instrument = registry.by_symbol("IBM").unwrap();
//! let order = Order::limit(
//!     instrument,
//!     OrderId(1),
//!     Side::Buy,
//!     "100.25".parse()?,
//!     "10".parse()?,
//! );
//! exchange.create_order(client, order)?;
//! # Ok(())
//! # }
//! ```

pub mod book;
pub mod config;
pub mod error;
pub mod exchange;
pub mod fixed;
pub mod instrument;
pub mod marketdata;
pub mod prelude;
pub mod sync;
mod utils;
pub mod wire;

pub use book::{
    Book, BookLevel, Order, OrderBook, OrderId, OrderState, OrderType, PriceLevel, SessionOrder,
    Side, Trade, TradeIds,
};
pub use config::{Config, parse_buffer_size};
pub use error::ExchangeError;
pub use exchange::{Exchange, ExchangeClient};
pub use fixed::Fixed;
pub use instrument::{Instrument, InstrumentRegistry};
pub use marketdata::{
    MarketData, MarketDataListener, MarketDataReceiver, MarketEvent, PacketProcessor, Statistics,
    coalesce_trades,
};
pub use sync::{BufferPool, StatusLatch};
