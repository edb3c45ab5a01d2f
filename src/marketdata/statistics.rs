//! Per-instrument session statistics for the embedding dashboard.
//!
//! Maintained by the publisher thread alone and replaced whole on each
//! update — readers never observe a half-written struct. Statistics are not
//! transmitted on the multicast stream.

use crate::book::Book;
use crate::fixed::Fixed;
use crate::marketdata::Trade;
use serde::Serialize;

/// Top of book and session trade statistics for one instrument.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    /// Instrument symbol.
    pub symbol: String,
    /// Best bid price, if the book has bids.
    pub bid: Option<Fixed>,
    /// Best ask price, if the book has asks.
    pub ask: Option<Fixed>,
    /// Sum of traded quantities this session.
    pub volume: Fixed,
    /// Highest trade price this session.
    pub high: Option<Fixed>,
    /// Lowest trade price this session.
    pub low: Option<Fixed>,
}

impl Statistics {
    /// Empty statistics for `symbol`.
    pub fn new(symbol: impl Into<String>) -> Statistics {
        Statistics {
            symbol: symbol.into(),
            ..Statistics::default()
        }
    }

    /// A copy of these statistics advanced by one published event.
    pub(crate) fn refreshed(&self, book: Option<&Book>, trades: &[Trade]) -> Statistics {
        let mut next = self.clone();
        if let Some(book) = book {
            next.bid = book.best_bid().map(|level| level.price);
            next.ask = book.best_ask().map(|level| level.price);
        }
        for trade in trades {
            next.volume = next.volume.add(trade.quantity);
            next.high = Some(next.high.map_or(trade.price, |high| high.max(trade.price)));
            next.low = Some(next.low.map_or(trade.price, |low| low.min(trade.price)));
        }
        next
    }
}
