//! Instruments and the process-wide instrument registry.
//!
//! Instruments are created either by loading an instrument definition file
//! at startup ([`InstrumentRegistry::load_file`]) or dynamically when a
//! gateway sees a security definition request for an unknown symbol
//! ([`InstrumentRegistry::create`]). They are registered once, never
//! destroyed, and their ids are monotonically assigned and never reused.
//!
//! The registry is an explicit handle rather than a global static: the
//! engine, the packet codec, and the receiver all share one
//! `Arc<InstrumentRegistry>` created by the embedding process.

use crate::error::ExchangeError;
use crate::utils::{read, write};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::RwLock;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::debug;

/// A tradable instrument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    /// Numeric identifier, unique for the lifetime of the process.
    pub id: i64,
    /// Ticker symbol.
    pub symbol: String,
    /// Instrument group; defaults to the symbol itself.
    pub group: String,
}

impl Instrument {
    /// Create an instrument whose group is its own symbol.
    pub fn new(id: i64, symbol: impl Into<String>) -> Instrument {
        let symbol = symbol.into();
        let group = symbol.clone();
        Instrument { id, symbol, group }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.symbol)
    }
}

#[derive(Default)]
struct Maps {
    by_symbol: HashMap<String, Instrument>,
    by_id: HashMap<i64, Instrument>,
}

/// Symbol ↔ id mapping shared by the engine, the codec, and the receiver.
///
/// Safe for many concurrent readers and occasional writers.
pub struct InstrumentRegistry {
    maps: RwLock<Maps>,
    next_id: AtomicI64,
}

impl InstrumentRegistry {
    /// Create an empty registry.
    pub fn new() -> InstrumentRegistry {
        InstrumentRegistry {
            maps: RwLock::new(Maps::default()),
            next_id: AtomicI64::new(0),
        }
    }

    /// Look up an instrument by symbol.
    pub fn by_symbol(&self, symbol: &str) -> Option<Instrument> {
        read(&self.maps).by_symbol.get(symbol).cloned()
    }

    /// Look up an instrument by id.
    pub fn by_id(&self, id: i64) -> Option<Instrument> {
        read(&self.maps).by_id.get(&id).cloned()
    }

    /// Like [`by_symbol`](Self::by_symbol), but a miss is an error.
    /// Gateways use this to turn unknown-symbol submissions into message
    /// rejects.
    pub fn require(&self, symbol: &str) -> Result<Instrument, ExchangeError> {
        self.by_symbol(symbol)
            .ok_or_else(|| ExchangeError::UnknownInstrument {
                symbol: symbol.to_string(),
            })
    }

    /// All registered symbols, in arbitrary order.
    pub fn all_symbols(&self) -> Vec<String> {
        read(&self.maps).by_symbol.keys().cloned().collect()
    }

    /// Number of registered instruments.
    pub fn len(&self) -> usize {
        read(&self.maps).by_id.len()
    }

    /// `true` when no instruments are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register an instrument with a pre-assigned id (file load, or an
    /// instrument definition received from the exchange). Keeps dynamic id
    /// assignment above every explicitly registered id.
    pub fn insert(&self, instrument: Instrument) {
        self.next_id.fetch_max(instrument.id, Ordering::SeqCst);
        let mut maps = write(&self.maps);
        maps.by_symbol
            .insert(instrument.symbol.clone(), instrument.clone());
        maps.by_id.insert(instrument.id, instrument);
    }

    /// Get or create the instrument for `symbol`, assigning the next id when
    /// the symbol is unknown. Used for dynamic instrument creation on the
    /// first security definition request for a new symbol.
    pub fn create(&self, symbol: &str) -> Instrument {
        if let Some(existing) = self.by_symbol(symbol) {
            return existing;
        }
        let mut maps = write(&self.maps);
        // Re-check under the write lock; another writer may have won.
        if let Some(existing) = maps.by_symbol.get(symbol) {
            return existing.clone();
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let instrument = Instrument::new(id, symbol);
        maps.by_symbol
            .insert(symbol.to_string(), instrument.clone());
        maps.by_id.insert(id, instrument.clone());
        debug!(symbol, id, "created instrument");
        instrument
    }

    /// Load instrument definitions from a file.
    ///
    /// Format: one instrument per line, whitespace-separated `id symbol`.
    /// Blank lines and lines starting with `//` or `#` are skipped, as are
    /// lines that do not parse. Returns the number of instruments loaded.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<usize, ExchangeError> {
        let file = File::open(path.as_ref())?;
        let mut loaded = 0;
        for line in BufReader::new(file).lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with("//") || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (Some(id), Some(symbol)) = (parts.next(), parts.next()) else {
                continue;
            };
            let Ok(id) = id.parse::<i64>() else {
                continue;
            };
            self.insert(Instrument::new(id, symbol));
            loaded += 1;
        }
        debug!(
            loaded,
            path = %path.as_ref().display(),
            "instrument file loaded"
        );
        Ok(loaded)
    }
}

impl Default for InstrumentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
