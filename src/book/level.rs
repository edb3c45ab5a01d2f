//! A single price level: a FIFO queue of session orders sharing one price.

use crate::book::order::SessionOrder;
use crate::error::ExchangeError;
use crate::fixed::Fixed;
use std::collections::VecDeque;
use std::fmt;

/// Orders resting at one price, in admission order. Every member's
/// effective price equals the level's price; the ladder deletes a level the
/// moment it empties.
pub struct PriceLevel {
    price: Fixed,
    orders: VecDeque<SessionOrder>,
}

impl PriceLevel {
    /// Create an empty level at `price`.
    pub fn new(price: Fixed) -> PriceLevel {
        PriceLevel {
            price,
            orders: VecDeque::new(),
        }
    }

    /// The level's price.
    pub fn price(&self) -> Fixed {
        self.price
    }

    /// Append an order at the back of the FIFO.
    pub fn push_back(&mut self, so: SessionOrder) {
        self.orders.push_back(so);
    }

    /// The order at the head of the FIFO, if any.
    pub fn front(&self) -> Option<&SessionOrder> {
        self.orders.front()
    }

    /// Remove an order by identity. Fails with
    /// [`ExchangeError::OrderNotFound`] when the order is not queued here.
    pub fn remove(&mut self, so: &SessionOrder) -> Result<(), ExchangeError> {
        match self.orders.iter().position(|other| other.same_order(so)) {
            Some(index) => {
                let _ = self.orders.remove(index);
                Ok(())
            }
            None => Err(ExchangeError::OrderNotFound),
        }
    }

    /// Sum of `remaining` across the queued orders.
    pub fn total_quantity(&self) -> Fixed {
        self.orders
            .iter()
            .map(|so| crate::utils::lock(&so.order).remaining)
            .sum()
    }

    /// Number of queued orders.
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    /// `true` when no orders are queued.
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Iterate the queued orders in FIFO order.
    pub fn iter(&self) -> impl Iterator<Item = &SessionOrder> {
        self.orders.iter()
    }
}

impl fmt::Debug for PriceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} x{} orders", self.price, self.orders.len())
    }
}
