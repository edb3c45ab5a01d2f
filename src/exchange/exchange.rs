//! The exchange facade: serializes every client request across the
//! instrument's book lock and the client's session lock, mutates the book,
//! publishes market data, and emits execution reports.
//!
//! Lock hierarchy: book before session, everywhere. Operations that have to
//! find an order before they know its instrument (modify, cancel) take the
//! session lock briefly to copy the instrument out, release it, then
//! reacquire in book → session order.

use crate::book::{
    Order, OrderBook, OrderId, OrderState, OrderType, SessionOrder, Side, TradeIds,
};
use crate::error::ExchangeError;
use crate::exchange::session::{ExchangeClient, QuotePair, Session};
use crate::fixed::Fixed;
use crate::instrument::{Instrument, InstrumentRegistry};
use crate::marketdata::{MarketData, MarketEvent};
use crate::utils::lock;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// The exchange core: per-instrument books, per-client sessions, and the
/// market data publication path.
pub struct Exchange {
    registry: Arc<InstrumentRegistry>,
    market_data: MarketData,
    books: DashMap<i64, Arc<Mutex<OrderBook>>>,
    sessions: DashMap<String, Arc<Session>>,
    next_exchange_id: AtomicI32,
    trade_ids: TradeIds,
}

impl Exchange {
    /// Create an exchange publishing through `market_data`.
    pub fn new(registry: Arc<InstrumentRegistry>, market_data: MarketData) -> Exchange {
        Exchange {
            registry,
            market_data,
            books: DashMap::new(),
            sessions: DashMap::new(),
            next_exchange_id: AtomicI32::new(0),
            trade_ids: TradeIds::new(),
        }
    }

    /// The market data handle this exchange publishes through.
    pub fn market_data(&self) -> &MarketData {
        &self.market_data
    }

    /// The instrument registry shared with the codec and receivers.
    pub fn registry(&self) -> &Arc<InstrumentRegistry> {
        &self.registry
    }

    fn book(&self, instrument: &Instrument) -> Arc<Mutex<OrderBook>> {
        self.books
            .entry(instrument.id)
            .or_insert_with(|| Arc::new(Mutex::new(OrderBook::new(instrument.clone()))))
            .clone()
    }

    fn session(&self, client: &Arc<dyn ExchangeClient>) -> Arc<Session> {
        let id = client.session_id();
        if let Some(existing) = self.sessions.get(&id) {
            return existing.clone();
        }
        info!(session = %id, "new session");
        self.sessions
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Session::new(id)))
            .clone()
    }

    /// Session ids of every client that has touched the exchange.
    pub fn list_sessions(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.value().id.clone()).collect()
    }

    fn validate(order: &Order) -> Option<String> {
        if order.quantity.is_zero() || order.quantity.is_negative() {
            return Some(format!("invalid quantity {}", order.quantity));
        }
        if order.order_type == OrderType::Limit
            && (order.price.is_zero() || order.price.is_negative())
        {
            return Some(format!("invalid limit price {}", order.price));
        }
        None
    }

    /// Accept a new order: book it, match it, publish the resulting
    /// snapshot and trades, and report back to the client.
    ///
    /// Invalid orders (non-positive quantity, non-positive limit price) are
    /// rejected with a status report and never touch the book.
    pub fn create_order(
        &self,
        client: Arc<dyn ExchangeClient>,
        order: Order,
    ) -> Result<OrderId, ExchangeError> {
        let order_id = order.id;

        if let Some(reason) = Self::validate(&order) {
            let mut rejected = order;
            rejected.state = OrderState::Rejected;
            rejected.reject_reason = Some(reason);
            let so = SessionOrder::new(client.clone(), Arc::new(Mutex::new(rejected)));
            client.send_order_status(&so);
            return Ok(order_id);
        }

        let handle = self.book(&order.instrument);
        let mut book = lock(&handle);

        let exchange_id = self.next_exchange_id.fetch_add(1, Ordering::SeqCst) + 1;

        let session = self.session(&client);
        let mut state = lock(&session.state);

        let shared = Arc::new(Mutex::new(order));
        lock(&shared).exchange_id = exchange_id.to_string();
        state.orders.insert(order_id, shared.clone());

        let so = SessionOrder::new(client.clone(), shared);
        let trades = book.add(so.clone(), &self.trade_ids);

        self.market_data.publish(MarketEvent {
            book: Some(book.build_book()),
            trades: trades.clone(),
        });

        client.send_trades(&trades);
        let cancelled = lock(&so.order).state == OrderState::Cancelled;
        if trades.is_empty() || cancelled {
            // no fills (resting), or a market order that died unfilled —
            // either way the client needs a status to see the state
            client.send_order_status(&so);
        }

        Ok(order_id)
    }

    /// Re-price an order. The order loses its queue position: it is removed
    /// and re-booked with the new price and quantity.
    ///
    /// When the order is no longer on the book (it filled between the
    /// lookup and the removal), a status report carrying the current state
    /// is sent and the call still succeeds.
    pub fn modify_order(
        &self,
        client: Arc<dyn ExchangeClient>,
        order_id: OrderId,
        price: Fixed,
        quantity: Fixed,
    ) -> Result<(), ExchangeError> {
        let session = self.session(&client);
        let (shared, instrument) = {
            let state = lock(&session.state);
            let shared = state
                .orders
                .get(&order_id)
                .ok_or(ExchangeError::OrderNotFound)?
                .clone();
            let instrument = lock(&shared).instrument.clone();
            (shared, instrument)
        };

        let handle = self.book(&instrument);
        let mut book = lock(&handle);
        let _state = lock(&session.state);

        let so = SessionOrder::new(client.clone(), shared);
        if book.remove(&so).is_err() {
            debug!(%order_id, "modify raced a fill; reporting current state");
            client.send_order_status(&so);
            return Ok(());
        }

        {
            let mut order = lock(&so.order);
            order.price = price;
            order.quantity = quantity;
            order.remaining = quantity;
        }

        let trades = book.add(so.clone(), &self.trade_ids);
        self.market_data.publish(MarketEvent {
            book: Some(book.build_book()),
            trades: trades.clone(),
        });

        client.send_trades(&trades);
        if trades.is_empty() {
            client.send_order_status(&so);
        }
        Ok(())
    }

    /// Cancel a working order.
    pub fn cancel_order(
        &self,
        client: Arc<dyn ExchangeClient>,
        order_id: OrderId,
    ) -> Result<(), ExchangeError> {
        let session = self.session(&client);
        let (shared, instrument) = {
            let state = lock(&session.state);
            let shared = state
                .orders
                .get(&order_id)
                .ok_or(ExchangeError::OrderNotFound)?
                .clone();
            let instrument = lock(&shared).instrument.clone();
            (shared, instrument)
        };

        let handle = self.book(&instrument);
        let mut book = lock(&handle);
        let _state = lock(&session.state);

        let so = SessionOrder::new(client.clone(), shared);
        book.remove(&so)?;

        self.market_data.publish(MarketEvent {
            book: Some(book.build_book()),
            trades: Vec::new(),
        });
        client.send_order_status(&so);
        Ok(())
    }

    /// Replace the client's two-sided quote in `instrument`. The previous
    /// bid and ask are cancelled before the new sides are booked; a `ZERO`
    /// price leaves that side absent.
    pub fn quote(
        &self,
        client: Arc<dyn ExchangeClient>,
        instrument: Instrument,
        bid_price: Fixed,
        bid_quantity: Fixed,
        ask_price: Fixed,
        ask_quantity: Fixed,
    ) -> Result<(), ExchangeError> {
        let handle = self.book(&instrument);
        let mut book = lock(&handle);

        let session = self.session(&client);
        let mut state = lock(&session.state);

        let mut pair = state.quotes.remove(&instrument.id).unwrap_or_default();
        if let Some(bid) = pair.bid.take() {
            let _ = book.remove(&bid);
        }
        if let Some(ask) = pair.ask.take() {
            let _ = book.remove(&ask);
        }

        let mut trades = Vec::new();
        if bid_price != Fixed::ZERO {
            let mut order = Order::limit(
                instrument.clone(),
                OrderId(0),
                Side::Buy,
                bid_price,
                bid_quantity,
            );
            order.exchange_id = format!("quote.bid.{}", instrument.id);
            let so = SessionOrder::new(client.clone(), Arc::new(Mutex::new(order)));
            pair.bid = Some(so.clone());
            trades.extend(book.add(so, &self.trade_ids));
        }
        if ask_price != Fixed::ZERO {
            let mut order = Order::limit(
                instrument.clone(),
                OrderId(0),
                Side::Sell,
                ask_price,
                ask_quantity,
            );
            order.exchange_id = format!("quote.ask.{}", instrument.id);
            let so = SessionOrder::new(client.clone(), Arc::new(Mutex::new(order)));
            pair.ask = Some(so.clone());
            trades.extend(book.add(so, &self.trade_ids));
        }
        state.quotes.insert(instrument.id, pair);

        self.market_data.publish(MarketEvent {
            book: Some(book.build_book()),
            trades: trades.clone(),
        });
        client.send_trades(&trades);
        Ok(())
    }

    /// Cancel-on-disconnect: pull every live order and quote this client
    /// owns, publishing a snapshot per affected instrument and a cancel
    /// status per outright order.
    pub fn session_disconnect(&self, client: Arc<dyn ExchangeClient>) {
        let session = self.session(&client);
        let (orders, quotes) = {
            let mut state = lock(&session.state);
            (
                std::mem::take(&mut state.orders),
                std::mem::take(&mut state.quotes),
            )
        };

        let mut order_count = 0;
        let mut quote_count = 0;

        for (_, shared) in orders {
            let instrument = lock(&shared).instrument.clone();
            let handle = self.book(&instrument);
            let mut book = lock(&handle);
            let so = SessionOrder::new(client.clone(), shared);
            let _ = book.remove(&so);
            self.market_data.publish(MarketEvent {
                book: Some(book.build_book()),
                trades: Vec::new(),
            });
            drop(book);
            client.send_order_status(&so);
            order_count += 1;
        }

        for (instrument_id, pair) in quotes {
            let Some(instrument) = self.registry.by_id(instrument_id) else {
                continue;
            };
            let handle = self.book(&instrument);
            let mut book = lock(&handle);
            if let Some(bid) = pair.bid {
                let _ = book.remove(&bid);
            }
            if let Some(ask) = pair.ask {
                let _ = book.remove(&ask);
            }
            self.market_data.publish(MarketEvent {
                book: Some(book.build_book()),
                trades: Vec::new(),
            });
            quote_count += 1;
        }

        info!(
            session = %client.session_id(),
            orders = order_count,
            quotes = quote_count,
            "session disconnected; working orders cancelled"
        );
    }
}
