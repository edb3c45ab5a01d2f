//! The atom the publisher consumes, and the wire form of a trade.

use crate::book;
use crate::book::Book;
use crate::fixed::Fixed;
use crate::instrument::Instrument;
use serde::Serialize;
use std::time::SystemTime;

/// One engine mutation's worth of market data: zero-or-one book snapshot
/// and the trades the mutation generated. Trades and the snapshot that
/// reflects them always travel in the same event, so a consumer that sees
/// a trade eventually sees its effect on the book.
#[derive(Debug, Clone)]
pub struct MarketEvent {
    /// Fresh snapshot of the mutated book, if any.
    pub book: Option<Book>,
    /// Engine-internal trades from the mutation's match run.
    pub trades: Vec<book::Trade>,
}

/// An exchange trade as multicast to all participants — not necessarily
/// initiated by the receiving client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Trade {
    /// Instrument traded.
    pub instrument: Instrument,
    /// Coalesced quantity.
    pub quantity: Fixed,
    /// Execution price.
    pub price: Fixed,
    /// The shared trade id of the match run, as a string.
    pub exchange_id: String,
    /// Wall-clock time of the match run.
    pub trade_time: SystemTime,
}

/// Coalesce engine trades into wire trades: consecutive fills at the same
/// price merge into one trade with the quantities summed. The relative
/// order of distinct-price groups is preserved, as is total quantity per
/// instrument.
pub fn coalesce_trades(trades: &[book::Trade]) -> Vec<Trade> {
    let mut coalesced: Vec<Trade> = Vec::new();
    for trade in trades {
        if let Some(last) = coalesced.last_mut()
            && trade.price == last.price
        {
            last.quantity = last.quantity.add(trade.quantity);
            continue;
        }
        let instrument = crate::utils::lock(&trade.seller.order).instrument.clone();
        coalesced.push(Trade {
            instrument,
            quantity: trade.quantity,
            price: trade.price,
            exchange_id: trade.trade_id.to_string(),
            trade_time: trade.when,
        });
    }
    coalesced
}
