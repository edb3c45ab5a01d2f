//! Bit-level wire encoding for the multicast market data stream.

mod codec;
mod varint;

pub use codec::{
    MAX_MSG_SIZE, ReplayRequest, decode_market_event, encode_market_event, read_fixed,
    write_fixed,
};
pub use varint::{Reader, read_uvarint, read_varint, write_uvarint, write_varint};
