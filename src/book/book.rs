//! The per-instrument order book: a price-sorted ladder of FIFO levels,
//! plus the matching loop that turns crossing orders into trades.
//!
//! A book is owned by its instrument's mutex in the exchange facade; every
//! method here assumes the caller holds that lock. Ladder insertion binary
//! searches the price levels (O(log L)) and appends to the level FIFO in
//! O(1) — books typically carry many orders per level, so sorting
//! individual orders would be quadratic in practice.

use crate::book::level::PriceLevel;
use crate::book::order::{OrderState, OrderType, SessionOrder, Side};
use crate::book::snapshot::{Book, BookLevel};
use crate::error::ExchangeError;
use crate::fixed::Fixed;
use crate::instrument::Instrument;
use crate::utils::lock;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::SystemTime;
use tracing::trace;

/// Allocator for trade ids. Process-wide, owned by the exchange facade and
/// passed into each match run; every trade produced by one run shares one
/// id.
#[derive(Debug, Default)]
pub struct TradeIds {
    next: AtomicI64,
}

impl TradeIds {
    /// Create an allocator starting at 1.
    pub fn new() -> TradeIds {
        TradeIds {
            next: AtomicI64::new(0),
        }
    }

    fn next(&self) -> i64 {
        self.next.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// A single fill between a resting and an incoming order.
///
/// This is the engine-internal record; the publisher coalesces these into
/// the wire trade form before multicasting.
#[derive(Debug, Clone)]
pub struct Trade {
    /// The buy-side order.
    pub buyer: SessionOrder,
    /// The sell-side order.
    pub seller: SessionOrder,
    /// Execution price — always the resting order's limit price.
    pub price: Fixed,
    /// Executed quantity.
    pub quantity: Fixed,
    /// Shared by every trade from the same match run.
    pub trade_id: i64,
    /// Wall-clock time of the match run.
    pub when: SystemTime,
    /// Buy order's remaining quantity after this fill.
    pub buy_remaining: Fixed,
    /// Sell order's remaining quantity after this fill.
    pub sell_remaining: Fixed,
}

/// Price-time-priority limit order book for one instrument.
pub struct OrderBook {
    instrument: Instrument,
    bids: Vec<PriceLevel>,
    asks: Vec<PriceLevel>,
}

impl OrderBook {
    /// Create an empty book.
    pub fn new(instrument: Instrument) -> OrderBook {
        OrderBook {
            instrument,
            bids: Vec::new(),
            asks: Vec::new(),
        }
    }

    /// The instrument this book trades.
    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    /// Bid levels, best (highest effective price) first.
    pub fn bids(&self) -> &[PriceLevel] {
        &self.bids
    }

    /// Ask levels, best (lowest effective price) first.
    pub fn asks(&self) -> &[PriceLevel] {
        &self.asks
    }

    /// Book the order and run the match loop, returning the trades it
    /// generated. A market order that is still active after matching is
    /// cancelled and removed — market orders never rest.
    pub fn add(&mut self, so: SessionOrder, ids: &TradeIds) -> Vec<Trade> {
        lock(&so.order).state = OrderState::Booked;

        let price = so.effective_price();
        let side = lock(&so.order).side;
        match side {
            Side::Buy => Self::insert(&mut self.bids, so.clone(), price, true),
            Side::Sell => Self::insert(&mut self.asks, so.clone(), price, false),
        }

        let trades = self.match_orders(ids);

        let unfilled_market = {
            let order = lock(&so.order);
            order.order_type == OrderType::Market && order.is_active()
        };
        if unfilled_market {
            lock(&so.order).state = OrderState::Cancelled;
            let _ = self.remove(&so);
            trace!(instrument = %self.instrument, "cancelled unfilled market order remainder");
        }

        trades
    }

    /// Remove an order from the book. Active orders transition to
    /// `Cancelled`. Fails with [`ExchangeError::OrderNotFound`] when the
    /// order is not resting here.
    pub fn remove(&mut self, so: &SessionOrder) -> Result<(), ExchangeError> {
        let price = so.effective_price();
        let side = lock(&so.order).side;
        let (levels, descending) = match side {
            Side::Buy => (&mut self.bids, true),
            Side::Sell => (&mut self.asks, false),
        };

        let index = Self::level_index(levels, price, descending);
        if index >= levels.len() || levels[index].price() != price {
            return Err(ExchangeError::OrderNotFound);
        }
        levels[index].remove(so)?;
        if levels[index].is_empty() {
            levels.remove(index);
        }

        let mut order = lock(&so.order);
        if order.is_active() {
            order.state = OrderState::Cancelled;
        }
        Ok(())
    }

    /// Render the book: one aggregate level per price, summing `remaining`
    /// across each level's FIFO. The sequence is stamped at publication.
    pub fn build_book(&self) -> Book {
        Book {
            instrument: self.instrument.clone(),
            bids: Self::build_levels(&self.bids),
            asks: Self::build_levels(&self.asks),
            sequence: 0,
        }
    }

    fn build_levels(levels: &[PriceLevel]) -> Vec<BookLevel> {
        levels
            .iter()
            .map(|level| BookLevel {
                price: level.price(),
                quantity: level.total_quantity(),
            })
            .collect()
    }

    /// Position of the level holding `price`, or the insertion point for a
    /// new level at `price`.
    fn level_index(levels: &[PriceLevel], price: Fixed, descending: bool) -> usize {
        levels.partition_point(|level| {
            if descending {
                level.price() > price
            } else {
                level.price() < price
            }
        })
    }

    fn insert(levels: &mut Vec<PriceLevel>, so: SessionOrder, price: Fixed, descending: bool) {
        let index = Self::level_index(levels, price, descending);
        if index < levels.len() && levels[index].price() == price {
            levels[index].push_back(so);
        } else {
            let mut level = PriceLevel::new(price);
            level.push_back(so);
            levels.insert(index, level);
        }
    }

    /// Match crossing orders at the top of the two ladders until the book
    /// uncrosses. The trade price is the resting order's limit price
    /// (earlier admission time); the quantity is the smaller remaining.
    fn match_orders(&mut self, ids: &TradeIds) -> Vec<Trade> {
        let mut trades = Vec::new();
        let mut trade_id: i64 = 0;
        let when = SystemTime::now();

        loop {
            let (bid, ask) = {
                let bid = self.bids.first().and_then(PriceLevel::front).cloned();
                let ask = self.asks.first().and_then(PriceLevel::front).cloned();
                match (bid, ask) {
                    (Some(bid), Some(ask)) => (bid, ask),
                    _ => break,
                }
            };

            if bid.effective_price() < ask.effective_price() {
                break;
            }

            // The resting order sets the price.
            let price = if bid.time < ask.time {
                lock(&bid.order).price
            } else {
                lock(&ask.order).price
            };
            let quantity = {
                let bid_remaining = lock(&bid.order).remaining;
                let ask_remaining = lock(&ask.order).remaining;
                bid_remaining.min(ask_remaining)
            };

            if trade_id == 0 {
                // every trade in this run shares one id
                trade_id = ids.next();
            }

            let buy_remaining = {
                let mut order = lock(&bid.order);
                order.fill(quantity);
                order.remaining
            };
            let sell_remaining = {
                let mut order = lock(&ask.order);
                order.fill(quantity);
                order.remaining
            };

            trace!(
                instrument = %self.instrument,
                %price,
                %quantity,
                trade_id,
                "matched"
            );

            trades.push(Trade {
                buyer: bid.clone(),
                seller: ask.clone(),
                price,
                quantity,
                trade_id,
                when,
                buy_remaining,
                sell_remaining,
            });

            if buy_remaining.is_zero() {
                let _ = self.remove(&bid);
            }
            if sell_remaining.is_zero() {
                let _ = self.remove(&ask);
            }
        }
        trades
    }
}

impl fmt::Display for OrderBook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bids: {:?}, asks: {:?}", self.bids, self.asks)
    }
}
