//! The exchange facade and the per-client session model.

#[allow(clippy::module_inception)]
mod exchange;
mod session;

pub use exchange::Exchange;
pub use session::ExchangeClient;
