//! Encoding and decoding of market data packets.
//!
//! One UDP datagram carries an 8-byte little-endian packet number followed
//! by one or more events, each an optional complete book snapshot plus a
//! list of coalesced trades. All multi-byte integers are varints except the
//! packet number and the replay request/response framing, which are fixed
//! little-endian.
//!
//! Counts travel as a single byte, so a book side or a trade list saturates
//! at 255 entries on the wire. A single match run never comes close; deep
//! books simply truncate their tail liquidity.

use crate::book::{Book, BookLevel};
use crate::error::ExchangeError;
use crate::fixed::{FRACTIONAL_DIGITS, Fixed};
use crate::instrument::InstrumentRegistry;
use crate::marketdata::Trade;
use crate::utils::{nanos_since_epoch, time_from_nanos};
use crate::wire::varint::{Reader, read_uvarint, read_varint, write_uvarint, write_varint};

/// Datagram payload budget in bytes. Producers batch events up to this
/// size; consumers must size receive buffers accordingly. Both ends of the
/// multicast stream have to agree on it.
pub const MAX_MSG_SIZE: usize = 1500;

const MAX_WIRE_COUNT: usize = u8::MAX as usize;

/// Append a decimal in canonical wire form: signed-varint exponent, then
/// signed-varint coefficient with trailing decimal zeros stripped.
pub fn write_fixed(buf: &mut Vec<u8>, value: Fixed) {
    let mut coefficient = value.mantissa();
    let mut exponent: i64 = -i64::from(FRACTIONAL_DIGITS);
    if coefficient == 0 {
        exponent = 0;
    } else {
        while coefficient % 10 == 0 {
            coefficient /= 10;
            exponent += 1;
        }
    }
    write_varint(buf, exponent);
    write_varint(buf, coefficient);
}

/// Read a decimal written by [`write_fixed`]. Values outside the
/// representable range (more than nine fractional digits, or mantissa
/// overflow) are decode errors.
pub fn read_fixed(r: &mut Reader<'_>) -> Result<Fixed, ExchangeError> {
    let exponent = read_varint(r)?;
    let coefficient = read_varint(r)?;
    if coefficient == 0 {
        return Ok(Fixed::ZERO);
    }
    let shift = exponent + i64::from(FRACTIONAL_DIGITS);
    if !(0..=18).contains(&shift) {
        return Err(ExchangeError::decode("decimal exponent out of range"));
    }
    let factor = 10_i64
        .checked_pow(shift as u32)
        .ok_or_else(|| ExchangeError::decode("decimal exponent out of range"))?;
    let mantissa = coefficient
        .checked_mul(factor)
        .ok_or_else(|| ExchangeError::decode("decimal coefficient out of range"))?;
    Ok(Fixed::from_mantissa(mantissa))
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(MAX_WIRE_COUNT);
    buf.push(n as u8);
    buf.extend_from_slice(&bytes[..n]);
}

fn read_string(r: &mut Reader<'_>) -> Result<String, ExchangeError> {
    let n = r.read_u8()? as usize;
    let bytes = r.read_bytes(n)?;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| ExchangeError::decode("string is not valid UTF-8"))
}

/// Encode one event: `u8 has_book`, the book when present, then the trade
/// list. Appends to `buf` so the publisher can pack several events into one
/// datagram.
pub fn encode_market_event(buf: &mut Vec<u8>, book: Option<&Book>, trades: &[Trade]) {
    match book {
        Some(book) => {
            buf.push(1);
            encode_book(buf, book);
        }
        None => buf.push(0),
    }
    encode_trades(buf, trades);
}

/// Decode one event. The registry resolves instrument ids; an id the
/// receiver has never heard of is a decode error (the instrument download
/// must complete before market data is consumed).
pub fn decode_market_event(
    r: &mut Reader<'_>,
    registry: &InstrumentRegistry,
) -> Result<(Option<Book>, Vec<Trade>), ExchangeError> {
    let has_book = r.read_u8()?;
    let book = if has_book == 1 {
        Some(decode_book(r, registry)?)
    } else {
        None
    };
    let trades = decode_trades(r, registry)?;
    Ok((book, trades))
}

fn encode_book(buf: &mut Vec<u8>, book: &Book) {
    write_varint(buf, book.instrument.id);
    write_uvarint(buf, book.sequence);
    encode_levels(buf, &book.bids);
    encode_levels(buf, &book.asks);
}

fn decode_book(r: &mut Reader<'_>, registry: &InstrumentRegistry) -> Result<Book, ExchangeError> {
    let instrument_id = read_varint(r)?;
    let sequence = read_uvarint(r)?;
    let instrument = registry
        .by_id(instrument_id)
        .ok_or_else(|| ExchangeError::decode(format!("unknown instrument id {instrument_id}")))?;
    let bids = decode_levels(r)?;
    let asks = decode_levels(r)?;
    Ok(Book {
        instrument,
        bids,
        asks,
        sequence,
    })
}

fn encode_levels(buf: &mut Vec<u8>, levels: &[BookLevel]) {
    let n = levels.len().min(MAX_WIRE_COUNT);
    buf.push(n as u8);
    for level in &levels[..n] {
        write_fixed(buf, level.price);
        write_fixed(buf, level.quantity);
    }
}

fn decode_levels(r: &mut Reader<'_>) -> Result<Vec<BookLevel>, ExchangeError> {
    let n = r.read_u8()? as usize;
    let mut levels = Vec::with_capacity(n);
    for _ in 0..n {
        let price = read_fixed(r)?;
        let quantity = read_fixed(r)?;
        levels.push(BookLevel { price, quantity });
    }
    Ok(levels)
}

fn encode_trades(buf: &mut Vec<u8>, trades: &[Trade]) {
    let n = trades.len().min(MAX_WIRE_COUNT);
    buf.push(n as u8);
    for trade in &trades[..n] {
        write_varint(buf, trade.instrument.id);
        write_fixed(buf, trade.quantity);
        write_fixed(buf, trade.price);
        write_string(buf, &trade.exchange_id);
        write_varint(buf, nanos_since_epoch(trade.trade_time));
    }
}

fn decode_trades(
    r: &mut Reader<'_>,
    registry: &InstrumentRegistry,
) -> Result<Vec<Trade>, ExchangeError> {
    let n = r.read_u8()? as usize;
    let mut trades = Vec::with_capacity(n);
    for _ in 0..n {
        let instrument_id = read_varint(r)?;
        let instrument = registry.by_id(instrument_id).ok_or_else(|| {
            ExchangeError::decode(format!("unknown instrument id {instrument_id}"))
        })?;
        let quantity = read_fixed(r)?;
        let price = read_fixed(r)?;
        let exchange_id = read_string(r)?;
        let trade_time = time_from_nanos(read_varint(r)?);
        trades.push(Trade {
            instrument,
            quantity,
            price,
            exchange_id,
            trade_time,
        });
    }
    Ok(trades)
}

/// A request to retransmit packets `start..end` (start inclusive, end
/// exclusive) over the TCP replay channel. Wire layout: two little-endian
/// `u64`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayRequest {
    /// First packet number wanted, inclusive.
    pub start: u64,
    /// One past the last packet number wanted.
    pub end: u64,
}

impl ReplayRequest {
    /// Size of the encoded request in bytes.
    pub const ENCODED_LEN: usize = 16;

    /// Encode to the fixed little-endian wire layout.
    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut buf = [0u8; Self::ENCODED_LEN];
        buf[..8].copy_from_slice(&self.start.to_le_bytes());
        buf[8..].copy_from_slice(&self.end.to_le_bytes());
        buf
    }

    /// Decode from the fixed little-endian wire layout.
    pub fn decode(buf: &[u8; Self::ENCODED_LEN]) -> ReplayRequest {
        ReplayRequest {
            start: u64::from_le_bytes(buf[..8].try_into().expect("8-byte slice")),
            end: u64::from_le_bytes(buf[8..].try_into().expect("8-byte slice")),
        }
    }
}
