//! Error types shared by the exchange core and the connectors that embed it.

use std::fmt;
use std::io;

/// Errors that can occur within the exchange core or a connector built on it.
#[derive(Debug)]
#[non_exhaustive]
pub enum ExchangeError {
    /// The connector is already connected.
    AlreadyConnected,

    /// The connector is not connected.
    NotConnected,

    /// The connector could not establish a connection.
    ConnectionFailed {
        /// Description of the underlying failure.
        message: String,
    },

    /// Modify or cancel referenced an order that is absent or already
    /// terminal.
    OrderNotFound,

    /// Only limit and market orders are supported.
    UnsupportedOrderType,

    /// Symbol lookup miss.
    UnknownInstrument {
        /// The symbol that was requested.
        symbol: String,
    },

    /// The instrument download did not complete within the timeout.
    DownloadFailed,

    /// A string could not be parsed as a decimal.
    InvalidDecimal {
        /// The rejected input.
        input: String,
    },

    /// Wire decoding failed (truncated or malformed input).
    Decode {
        /// Description of the decode failure.
        message: String,
    },

    /// An I/O error on a socket or file.
    Io {
        /// The underlying I/O error message.
        message: String,
    },
}

impl fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeError::AlreadyConnected => write!(f, "already connected"),
            ExchangeError::NotConnected => write!(f, "not connected"),
            ExchangeError::ConnectionFailed { message } => {
                write!(f, "connection failed: {message}")
            }
            ExchangeError::OrderNotFound => write!(f, "order not found"),
            ExchangeError::UnsupportedOrderType => write!(f, "unsupported order type"),
            ExchangeError::UnknownInstrument { symbol } => {
                write!(f, "unknown instrument: {symbol}")
            }
            ExchangeError::DownloadFailed => write!(f, "download failed"),
            ExchangeError::InvalidDecimal { input } => {
                write!(f, "invalid decimal: {input:?}")
            }
            ExchangeError::Decode { message } => write!(f, "decode error: {message}"),
            ExchangeError::Io { message } => write!(f, "I/O error: {message}"),
        }
    }
}

impl std::error::Error for ExchangeError {}

impl From<io::Error> for ExchangeError {
    #[cold]
    fn from(err: io::Error) -> Self {
        ExchangeError::Io {
            message: err.to_string(),
        }
    }
}

impl ExchangeError {
    /// Shorthand for a [`ExchangeError::Decode`] with the given message.
    pub(crate) fn decode(message: impl Into<String>) -> Self {
        ExchangeError::Decode {
            message: message.into(),
        }
    }
}
