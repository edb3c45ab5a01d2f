//! Publisher integration: datagrams on the wire, packet numbering,
//! statistics, and TCP replay. Runs over loopback sockets.

use crate::support::{RecordingClient, fx, init_logging, registry_with_ibm, session_order};
use exchange_rs::marketdata::MarketEvent;
use exchange_rs::prelude::*;
use exchange_rs::wire::{MAX_MSG_SIZE, Reader, ReplayRequest, decode_market_event};
use std::io::{Read, Write};
use std::net::{TcpStream, UdpSocket};
use std::time::{Duration, Instant};

fn sink_socket() -> UdpSocket {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    socket
}

fn start_publisher(sink: &UdpSocket) -> MarketData {
    init_logging();
    let config = Config {
        multicast_addr: sink.local_addr().unwrap(),
        replay_port: 0,
        ..Config::default()
    };
    MarketData::start(&config).unwrap()
}

fn recv_datagram(sink: &UdpSocket) -> Vec<u8> {
    let mut buf = vec![0u8; 65536];
    let n = sink.recv(&mut buf).unwrap();
    buf.truncate(n);
    buf
}

fn packet_number(datagram: &[u8]) -> u64 {
    u64::from_le_bytes(datagram[..8].try_into().unwrap())
}

fn book_event(instrument: &Instrument, bid: &str, quantity: &str) -> MarketEvent {
    MarketEvent {
        book: Some(Book {
            instrument: instrument.clone(),
            bids: vec![BookLevel {
                price: fx(bid),
                quantity: fx(quantity),
            }],
            asks: vec![],
            sequence: 0,
        }),
        trades: Vec::new(),
    }
}

fn wait_for_packets(md: &MarketData, count: u64) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while md.packets_sent() < count {
        assert!(Instant::now() < deadline, "publisher never sent {count} packets");
        std::thread::sleep(Duration::from_millis(10));
    }
}

// ---------------------------------------------------------------------------
// Datagram format
// ---------------------------------------------------------------------------

#[test]
fn published_event_arrives_numbered_and_decodable() {
    let (registry, instrument) = registry_with_ibm();
    let sink = sink_socket();
    let md = start_publisher(&sink);

    md.publish(book_event(&instrument, "110", "10"));

    let datagram = recv_datagram(&sink);
    assert_eq!(packet_number(&datagram), 1);

    let mut reader = Reader::new(&datagram[8..]);
    let (book, trades) = decode_market_event(&mut reader, &registry).unwrap();
    let book = book.unwrap();
    assert_eq!(book.sequence, 1);
    assert_eq!(book.best_bid().unwrap().price, fx("110"));
    assert!(trades.is_empty());
    assert!(reader.is_empty());
}

#[test]
fn packet_numbers_increase_from_one() {
    let (_registry, instrument) = registry_with_ibm();
    let sink = sink_socket();
    let md = start_publisher(&sink);

    for i in 0..3 {
        md.publish(book_event(&instrument, "100", &format!("{}", i + 1)));
        // give the publisher time to flush each event separately
        std::thread::sleep(Duration::from_millis(50));
    }
    wait_for_packets(&md, 3);

    let mut numbers = Vec::new();
    for _ in 0..3 {
        numbers.push(packet_number(&recv_datagram(&sink)));
    }
    assert_eq!(numbers, vec![1, 2, 3]);
}

#[test]
fn oversized_event_is_sent_in_isolation() {
    let (registry, instrument) = registry_with_ibm();
    let sink = sink_socket();
    let md = start_publisher(&sink);

    // enough levels to blow well past the datagram budget
    let bids: Vec<BookLevel> = (0..255)
        .map(|i| BookLevel {
            price: fx(&format!("{}", 100_000 - i)),
            quantity: fx("1.234567891"),
        })
        .collect();
    md.publish(MarketEvent {
        book: Some(Book {
            instrument: instrument.clone(),
            bids,
            asks: vec![],
            sequence: 0,
        }),
        trades: Vec::new(),
    });

    let datagram = recv_datagram(&sink);
    assert!(datagram.len() > MAX_MSG_SIZE);
    let (book, _) = decode_market_event(&mut Reader::new(&datagram[8..]), &registry).unwrap();
    assert_eq!(book.unwrap().bids.len(), 255);
}

// ---------------------------------------------------------------------------
// Trades and statistics
// ---------------------------------------------------------------------------

#[test]
fn trades_are_coalesced_and_statistics_updated() {
    let (registry, instrument) = registry_with_ibm();
    let sink = sink_socket();
    let md = start_publisher(&sink);
    let client = RecordingClient::new("S1");

    // two fills at the same price within one match run
    let fills: Vec<exchange_rs::Trade> = [("110", "3"), ("110", "2")]
        .iter()
        .map(|(price, quantity)| {
            let buy = session_order(
                &client,
                Order::limit(instrument.clone(), OrderId(1), Side::Buy, fx(price), fx(quantity)),
            );
            let sell = session_order(
                &client,
                Order::limit(instrument.clone(), OrderId(2), Side::Sell, fx(price), fx(quantity)),
            );
            exchange_rs::Trade {
                buyer: buy,
                seller: sell,
                price: fx(price),
                quantity: fx(quantity),
                trade_id: 9,
                when: std::time::SystemTime::now(),
                buy_remaining: Fixed::ZERO,
                sell_remaining: Fixed::ZERO,
            }
        })
        .collect();

    md.publish(MarketEvent {
        book: Some(Book {
            instrument: instrument.clone(),
            bids: vec![],
            asks: vec![],
            sequence: 0,
        }),
        trades: fills,
    });

    let datagram = recv_datagram(&sink);
    let (_, trades) = decode_market_event(&mut Reader::new(&datagram[8..]), &registry).unwrap();
    assert_eq!(trades.len(), 1, "same-price fills coalesce into one print");
    assert_eq!(trades[0].quantity, fx("5"));
    assert_eq!(trades[0].exchange_id, "9");

    let stats = md.statistics(&instrument).expect("statistics present");
    assert_eq!(stats.volume, fx("5"));
    assert_eq!(stats.high, Some(fx("110")));
    assert_eq!(stats.low, Some(fx("110")));
    assert!(md.statistics_json().contains("\"IBM\""));
}

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------

#[test]
fn replay_returns_retained_packets_over_one_connection() {
    let (_registry, instrument) = registry_with_ibm();
    let sink = sink_socket();
    let md = start_publisher(&sink);

    for i in 0..3 {
        md.publish(book_event(&instrument, "100", &format!("{}", i + 1)));
        std::thread::sleep(Duration::from_millis(50));
    }
    wait_for_packets(&md, 3);

    let mut sent = Vec::new();
    for _ in 0..3 {
        sent.push(recv_datagram(&sink));
    }

    let replay_addr = md.replay_local_addr().unwrap();
    let mut connection = TcpStream::connect(replay_addr).unwrap();
    connection
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    // first request: everything
    connection
        .write_all(&ReplayRequest { start: 1, end: 4 }.encode())
        .unwrap();
    for datagram in &sent {
        assert_eq!(&read_frame(&mut connection), datagram);
    }

    // second request over the same (persistent) connection
    connection
        .write_all(&ReplayRequest { start: 2, end: 3 }.encode())
        .unwrap();
    assert_eq!(&read_frame(&mut connection), &sent[1]);

    // a range outside the window yields nothing and keeps the
    // connection usable
    connection
        .write_all(&ReplayRequest { start: 100, end: 110 }.encode())
        .unwrap();
    connection
        .write_all(&ReplayRequest { start: 3, end: 4 }.encode())
        .unwrap();
    assert_eq!(&read_frame(&mut connection), &sent[2]);
}

fn read_frame(connection: &mut TcpStream) -> Vec<u8> {
    let mut length_buf = [0u8; 2];
    connection.read_exact(&mut length_buf).unwrap();
    let mut frame = vec![0u8; u16::from_le_bytes(length_buf) as usize];
    connection.read_exact(&mut frame).unwrap();
    frame
}
