//! The client-side market data receiver: multicast reassembly, gap
//! detection, TCP replay orchestration, and in-order delivery to the
//! embedding application.
//!
//! One receiver is shared across all clients in a process and fans events
//! out to every registered listener.

use crate::book::Book;
use crate::config::Config;
use crate::error::ExchangeError;
use crate::instrument::InstrumentRegistry;
use crate::marketdata::event::Trade;
use crate::sync::StatusLatch;
use crate::utils::{lock, read, set_recv_buffer, write};
use crate::wire::{Reader, ReplayRequest, decode_market_event};
use crossbeam::channel::{Receiver, Sender, bounded};
use std::collections::HashMap;
use std::io::{Read as _, Write as _};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream, UdpSocket};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use tracing::{debug, error, info, warn};

/// Capacity of the in-process replay request queue.
const REPLAY_QUEUE: usize = 1_000;

/// Receive buffer for one datagram. Oversized events are sent in isolation
/// and may exceed the batching budget, so size for the UDP maximum rather
/// than `MAX_MSG_SIZE`.
const RECV_BUFFER: usize = 65_536;

/// Callbacks delivered by the receiver.
///
/// Books arrive in-order per instrument (stale sequences are filtered).
/// Trades arrive unconditionally and replay may redeliver one; consumers
/// that care deduplicate by `(instrument, exchange_id)`.
pub trait MarketDataListener: Send + Sync {
    /// A book snapshot newer than any previously delivered for its
    /// instrument.
    fn on_book(&self, book: &Book);

    /// An exchange trade print.
    fn on_trade(&self, trade: &Trade);
}

/// Transport-independent packet demultiplexer.
///
/// Both the live UDP path and the TCP replay path feed packets through one
/// processor; the shared per-instrument sequence map is what keeps
/// interleaved replay from reordering book delivery.
pub struct PacketProcessor {
    registry: Arc<InstrumentRegistry>,
    listeners: RwLock<Vec<Arc<dyn MarketDataListener>>>,
    last_sequence: Mutex<HashMap<i64, u64>>,
    replay: Sender<ReplayRequest>,
}

impl PacketProcessor {
    /// Create a processor resolving instruments through `registry` and
    /// queueing gap-fill requests on `replay`.
    pub fn new(registry: Arc<InstrumentRegistry>, replay: Sender<ReplayRequest>) -> PacketProcessor {
        PacketProcessor {
            registry,
            listeners: RwLock::new(Vec::new()),
            last_sequence: Mutex::new(HashMap::new()),
            replay,
        }
    }

    /// Register a listener. Every listener sees every delivered event.
    pub fn add_listener(&self, listener: Arc<dyn MarketDataListener>) {
        write(&self.listeners).push(listener);
    }

    /// Handle a live datagram given the next packet number we expected;
    /// returns the new expectation.
    ///
    /// A packet number below the expectation means the publisher restarted:
    /// the expectation and the per-instrument sequences reset. Any other
    /// mismatch is packet loss and queues a replay request for the missing
    /// range; the current packet is processed regardless.
    pub fn packet_received(&self, mut expected: u64, packet: &[u8]) -> u64 {
        if packet.len() < 8 {
            warn!(len = packet.len(), "runt market data packet dropped");
            return expected;
        }
        let number = u64::from_le_bytes(packet[..8].try_into().expect("8-byte header"));

        if number < expected {
            info!(number, expected, "packet numbers rewound; publisher restart");
            expected = 0;
            lock(&self.last_sequence).clear();
        }
        if expected != 0 && number != expected {
            warn!(from = expected, to = number, "dropped packets; requesting replay");
            if self
                .replay
                .send(ReplayRequest {
                    start: expected,
                    end: number,
                })
                .is_err()
            {
                warn!("replay worker is gone; gap is permanent");
            }
        }

        self.process_packet(packet);
        number + 1
    }

    /// Decode a datagram (live or replayed) and deliver its events.
    pub fn process_packet(&self, packet: &[u8]) {
        if packet.len() < 8 {
            warn!(len = packet.len(), "runt market data packet dropped");
            return;
        }
        // one lock shared by the live reader and the replay reader; the
        // per-instrument filter below is what keeps delivery in order
        let mut last_sequence = lock(&self.last_sequence);
        let listeners: Vec<Arc<dyn MarketDataListener>> = read(&self.listeners).clone();

        let mut r = Reader::new(&packet[8..]);
        while !r.is_empty() {
            match decode_market_event(&mut r, &self.registry) {
                Ok((book, trades)) => {
                    if let Some(book) = book {
                        let id = book.instrument.id;
                        let fresh = last_sequence
                            .get(&id)
                            .is_none_or(|&last| book.sequence > last);
                        if fresh {
                            for listener in &listeners {
                                listener.on_book(&book);
                            }
                            last_sequence.insert(id, book.sequence);
                        }
                    }
                    for trade in &trades {
                        for listener in &listeners {
                            listener.on_trade(trade);
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "market data decode failed; dropping rest of datagram");
                    return;
                }
            }
        }
    }
}

/// The multicast market data receiver: a UDP reader thread and a replay
/// worker thread sharing one [`PacketProcessor`].
pub struct MarketDataReceiver {
    processor: Arc<PacketProcessor>,
    ready: Arc<StatusLatch>,
    local_addr: SocketAddr,
}

impl MarketDataReceiver {
    /// Bind the multicast socket and spawn the reader and replay worker
    /// threads.
    pub fn start(
        config: &Config,
        registry: Arc<InstrumentRegistry>,
    ) -> Result<MarketDataReceiver, ExchangeError> {
        let (replay_tx, replay_rx) = bounded(REPLAY_QUEUE);
        let processor = Arc::new(PacketProcessor::new(registry, replay_tx));

        let socket = match config.multicast_addr.ip() {
            IpAddr::V4(group) if group.is_multicast() => {
                let socket =
                    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.multicast_addr.port()))?;
                socket.join_multicast_v4(&group, &config.multicast_intf)?;
                socket
            }
            _ => UdpSocket::bind(config.multicast_addr)?,
        };
        set_recv_buffer(&socket, config.marketdata_buffer);
        let local_addr = socket.local_addr()?;

        let ready = Arc::new(StatusLatch::new());

        let reader_processor = Arc::clone(&processor);
        let reader_ready = Arc::clone(&ready);
        thread::Builder::new()
            .name("md-reader".to_string())
            .spawn(move || {
                info!(addr = %local_addr, "listening for market data");
                reader_ready.set_true();
                read_loop(&socket, &reader_processor);
            })?;

        let worker_processor = Arc::clone(&processor);
        let replay_addr = config.replay_addr();
        thread::Builder::new()
            .name("md-replay-client".to_string())
            .spawn(move || replay_worker(&replay_rx, &replay_addr, &worker_processor))?;

        Ok(MarketDataReceiver {
            processor,
            ready,
            local_addr,
        })
    }

    /// Register a listener for book and trade callbacks.
    pub fn add_listener(&self, listener: Arc<dyn MarketDataListener>) {
        self.processor.add_listener(listener);
    }

    /// The bound UDP address (useful when the configured port was 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Block until the UDP socket is listening. Rendezvous for embedding
    /// applications that must not publish before the receiver is up.
    pub fn wait_until_ready(&self, timeout_ms: u64) -> bool {
        self.ready.wait_for_true(timeout_ms)
    }
}

fn read_loop(socket: &UdpSocket, processor: &PacketProcessor) {
    let mut buf = vec![0u8; RECV_BUFFER];
    let mut expected: u64 = 0;
    loop {
        match socket.recv(&mut buf) {
            Ok(n) => expected = processor.packet_received(expected, &buf[..n]),
            Err(e) => {
                error!(error = %e, "market data read failed");
                return;
            }
        }
    }
}

fn replay_worker(
    requests: &Receiver<ReplayRequest>,
    replay_addr: &str,
    processor: &Arc<PacketProcessor>,
) {
    let connection: Arc<Mutex<Option<TcpStream>>> = Arc::new(Mutex::new(None));

    while let Ok(request) = requests.recv() {
        let mut guard = lock(&connection);

        if guard.is_none() {
            match TcpStream::connect(replay_addr) {
                Ok(stream) => {
                    info!(addr = replay_addr, "opened connection to replay host");
                    match stream.try_clone() {
                        Ok(reader) => {
                            *guard = Some(stream);
                            let conn = Arc::clone(&connection);
                            let processor = Arc::clone(processor);
                            let spawned = thread::Builder::new()
                                .name("md-replay-read".to_string())
                                .spawn(move || {
                                    replay_read_loop(reader, &processor);
                                    *lock(&conn) = None;
                                });
                            if spawned.is_err() {
                                warn!("unable to spawn replay reader");
                                *guard = None;
                                continue;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "unable to clone replay connection");
                            continue;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, addr = replay_addr, "unable to connect to replay host");
                    continue;
                }
            }
        }

        let written = guard
            .as_mut()
            .is_some_and(|stream| stream.write_all(&request.encode()).is_ok());
        if !written {
            warn!(
                start = request.start,
                end = request.end,
                "unable to write replay request; dropping connection"
            );
            *guard = None;
        }
    }
    debug!("replay worker terminated");
}

/// Read length-prefixed replayed datagrams and feed them through the same
/// processing path as live packets.
fn replay_read_loop(mut stream: TcpStream, processor: &PacketProcessor) {
    loop {
        let mut length_buf = [0u8; 2];
        if stream.read_exact(&mut length_buf).is_err() {
            debug!("replay connection closed");
            return;
        }
        let length = u16::from_le_bytes(length_buf) as usize;
        let mut packet = vec![0u8; length];
        if stream.read_exact(&mut packet).is_err() {
            warn!(length, "unable to read replay packet");
            return;
        }
        processor.process_packet(&packet);
    }
}
