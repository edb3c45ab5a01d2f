//! The market data publisher: a single dedicated thread that drains the
//! engine's event channel, deduplicates stale snapshots, coalesces trades,
//! packs events into numbered UDP datagrams, and retains every datagram in
//! the bounded replay history.
//!
//! The channel is unbounded because UDP transmit is far slower than
//! matching; the engine never blocks on publication and never drops an
//! event.

use crate::book::Book;
use crate::config::Config;
use crate::error::ExchangeError;
use crate::instrument::{Instrument, InstrumentRegistry};
use crate::marketdata::event::{MarketEvent, Trade, coalesce_trades};
use crate::marketdata::history::PacketHistory;
use crate::marketdata::replay;
use crate::marketdata::statistics::Statistics;
use crate::sync::BufferPool;
use crate::utils::set_send_buffer;
use crate::wire::{MAX_MSG_SIZE, encode_market_event};
use crossbeam::channel::{Receiver, Sender, unbounded};
use dashmap::DashMap;
use std::collections::HashMap;
use std::net::{Ipv4Addr, TcpListener, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use tracing::{error, info, trace, warn};

/// Handle shared by the engine (publication side) and the embedding
/// application (book cache, statistics, replay endpoint). Cheap to clone.
#[derive(Clone)]
pub struct MarketData {
    tx: Sender<MarketEvent>,
    sequence: Arc<AtomicU64>,
    packets_sent: Arc<AtomicU64>,
    books: Arc<DashMap<i64, Book>>,
    stats: Arc<DashMap<i64, Statistics>>,
    replay_addr: Option<std::net::SocketAddr>,
}

impl MarketData {
    /// Bind the sockets and spawn the publisher and replay responder
    /// threads.
    pub fn start(config: &Config) -> Result<MarketData, ExchangeError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect(config.multicast_addr)?;
        set_send_buffer(&socket, config.marketdata_buffer);
        info!(addr = %config.multicast_addr, "publishing market data");

        let replay_listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, config.replay_port))?;
        let replay_addr = replay_listener.local_addr()?;

        let pool = Arc::new(BufferPool::new());
        let history = Arc::new(PacketHistory::new(Arc::clone(&pool)));
        replay::spawn(replay_listener, Arc::clone(&history))?;

        let (md, rx) = MarketData::detached();
        let md = MarketData {
            replay_addr: Some(replay_addr),
            ..md
        };

        let stats = Arc::clone(&md.stats);
        let packets_sent = Arc::clone(&md.packets_sent);
        thread::Builder::new()
            .name("md-publisher".to_string())
            .spawn(move || publisher_loop(rx, socket, history, pool, stats, packets_sent))?;

        Ok(md)
    }

    /// A handle with no publisher thread behind it. Events stay queued on
    /// the returned receiver; used by embeddings (and tests) that consume
    /// the event stream themselves.
    pub fn detached() -> (MarketData, Receiver<MarketEvent>) {
        let (tx, rx) = unbounded();
        let md = MarketData {
            tx,
            sequence: Arc::new(AtomicU64::new(0)),
            packets_sent: Arc::new(AtomicU64::new(0)),
            books: Arc::new(DashMap::new()),
            stats: Arc::new(DashMap::new()),
            replay_addr: None,
        };
        (md, rx)
    }

    /// Publish one event. Stamps the snapshot with the next global
    /// sequence and caches it; the caller holds the instrument's book
    /// lock, which is what makes per-instrument sequences monotonic.
    pub fn publish(&self, mut event: MarketEvent) {
        if let Some(book) = event.book.as_mut() {
            book.sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
            self.books.insert(book.instrument.id, book.clone());
        }
        if self.tx.send(event).is_err() {
            warn!("market data channel closed; event dropped");
        }
    }

    /// The most recently published book for `instrument`.
    pub fn latest_book(&self, instrument: &Instrument) -> Option<Book> {
        self.books.get(&instrument.id).map(|book| book.clone())
    }

    /// The most recently published book for `symbol`.
    pub fn book_by_symbol(&self, registry: &InstrumentRegistry, symbol: &str) -> Option<Book> {
        self.latest_book(&registry.by_symbol(symbol)?)
    }

    /// Current session statistics for `instrument`.
    pub fn statistics(&self, instrument: &Instrument) -> Option<Statistics> {
        self.stats.get(&instrument.id).map(|stats| stats.clone())
    }

    /// All session statistics as JSON, for the embedding dashboard.
    pub fn statistics_json(&self) -> String {
        let mut all: Vec<Statistics> = self.stats.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        serde_json::to_string(&all).unwrap_or_else(|_| "[]".to_string())
    }

    /// Where the TCP replay responder is listening, when started.
    pub fn replay_local_addr(&self) -> Option<std::net::SocketAddr> {
        self.replay_addr
    }

    /// Number of datagrams sent so far; also the current packet number.
    pub fn packets_sent(&self) -> u64 {
        self.packets_sent.load(Ordering::SeqCst)
    }
}

fn publisher_loop(
    rx: Receiver<MarketEvent>,
    socket: UdpSocket,
    history: Arc<PacketHistory>,
    pool: Arc<BufferPool>,
    stats: Arc<DashMap<i64, Statistics>>,
    packets_sent: Arc<AtomicU64>,
) {
    let mut last_sent: HashMap<i64, u64> = HashMap::new();
    let mut pending = pool.get();
    let mut scratch = Vec::with_capacity(MAX_MSG_SIZE);

    while let Ok(event) = rx.recv() {
        let book = dedup_book(&mut last_sent, event.book);
        let trades = coalesce_trades(&event.trades);
        if book.is_none() && trades.is_empty() {
            // snapshot was stale and the mutation produced no trades
            if rx.is_empty() && !pending.is_empty() {
                send_datagram(&socket, &history, &pool, &packets_sent, &mut pending);
            }
            continue;
        }

        update_statistics(&stats, book.as_ref(), &trades);

        scratch.clear();
        encode_market_event(&mut scratch, book.as_ref(), &trades);

        if !pending.is_empty() && 8 + pending.len() + scratch.len() > MAX_MSG_SIZE {
            send_datagram(&socket, &history, &pool, &packets_sent, &mut pending);
        }
        pending.extend_from_slice(&scratch);

        if rx.is_empty() {
            // nothing queued behind this event; stop amortizing and flush
            send_datagram(&socket, &history, &pool, &packets_sent, &mut pending);
        }
    }
    info!("market data publisher stopped");
}

/// Drop a snapshot the stream has already moved past. The engine coalesces
/// rapid mutations through the latest-book cache, so by the time the
/// publisher drains an event a newer snapshot of the same instrument may
/// already have gone out.
fn dedup_book(last_sent: &mut HashMap<i64, u64>, book: Option<Book>) -> Option<Book> {
    let book = book?;
    match last_sent.get(&book.instrument.id) {
        Some(&last) if last >= book.sequence => {
            trace!(
                instrument = %book.instrument,
                sequence = book.sequence,
                last,
                "suppressing stale book snapshot"
            );
            None
        }
        _ => {
            last_sent.insert(book.instrument.id, book.sequence);
            Some(book)
        }
    }
}

fn update_statistics(stats: &DashMap<i64, Statistics>, book: Option<&Book>, trades: &[Trade]) {
    if let Some(book) = book {
        let current = stats
            .get(&book.instrument.id)
            .map(|s| s.clone())
            .unwrap_or_else(|| Statistics::new(&book.instrument.symbol));
        stats.insert(book.instrument.id, current.refreshed(Some(book), &[]));
    }
    for trade in trades {
        let current = stats
            .get(&trade.instrument.id)
            .map(|s| s.clone())
            .unwrap_or_else(|| Statistics::new(&trade.instrument.symbol));
        stats.insert(
            trade.instrument.id,
            current.refreshed(None, std::slice::from_ref(trade)),
        );
    }
}

fn send_datagram(
    socket: &UdpSocket,
    history: &PacketHistory,
    pool: &BufferPool,
    packets_sent: &AtomicU64,
    payload: &mut Vec<u8>,
) {
    let number = packets_sent.fetch_add(1, Ordering::SeqCst) + 1;
    let mut datagram = pool.get();
    datagram.extend_from_slice(&number.to_le_bytes());
    datagram.extend_from_slice(payload);
    payload.clear();

    if let Err(e) = socket.send(&datagram) {
        // the multicast fabric may drop packets anyway; replay covers it
        error!(error = %e, number, "market data send failed");
    }
    trace!(number, bytes = datagram.len(), "datagram published");
    history.remember(number, datagram);
}
