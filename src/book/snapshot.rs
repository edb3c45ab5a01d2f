//! Published book snapshots.

use crate::fixed::Fixed;
use crate::instrument::Instrument;
use serde::Serialize;
use std::fmt;

/// One aggregate price level of a published book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookLevel {
    /// Level price.
    pub price: Fixed,
    /// Total remaining quantity resting at this price.
    pub quantity: Fixed,
}

/// A complete book snapshot, produced fresh after every mutation and tagged
/// with a globally monotonic sequence at publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Book {
    /// The instrument this book describes.
    pub instrument: Instrument,
    /// Bid levels, best first.
    pub bids: Vec<BookLevel>,
    /// Ask levels, best first.
    pub asks: Vec<BookLevel>,
    /// Global publication sequence; consumers order per-instrument books
    /// by it.
    pub sequence: u64,
}

impl Book {
    /// The best (highest) bid, if any.
    pub fn best_bid(&self) -> Option<&BookLevel> {
        self.bids.first()
    }

    /// The best (lowest) ask, if any.
    pub fn best_ask(&self) -> Option<&BookLevel> {
        self.asks.first()
    }

    /// `true` when there is at least one bid level.
    pub fn has_bids(&self) -> bool {
        !self.bids.is_empty()
    }

    /// `true` when there is at least one ask level.
    pub fn has_asks(&self) -> bool {
        !self.asks.is_empty()
    }

    /// `true` when both sides are empty.
    pub fn is_empty(&self) -> bool {
        !self.has_bids() && !self.has_asks()
    }
}

fn levels_to_string(levels: &[BookLevel]) -> String {
    let mut s = String::new();
    for (i, level) in levels.iter().enumerate() {
        if i > 0 {
            s.push(',');
        }
        s.push_str(&format!("{} @ {}", level.quantity, level.price));
    }
    s
}

impl fmt::Display for Book {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "book:{} bids: {} asks: {}",
            self.instrument.symbol,
            levels_to_string(&self.bids),
            levels_to_string(&self.asks)
        )
    }
}
