//! Byte-bounded secondary cache tier
//!
//! Values are stored serialized; payloads above the compression threshold
//! are gzip-compressed. When the byte budget is exceeded the least recently
//! stored entries are evicted first.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::time::Instant;

#[derive(Debug)]
enum Payload {
    Plain(Vec<u8>),
    Gzip(Vec<u8>),
}

impl Payload {
    fn len(&self) -> usize {
        match self {
            Payload::Plain(bytes) | Payload::Gzip(bytes) => bytes.len(),
        }
    }
}

#[derive(Debug)]
struct SecondaryEntry {
    payload: Payload,
    stored_at: Instant,
    expires_at: Instant,
    generation: u64,
}

/// Value taken out of the secondary tier
#[derive(Debug)]
pub struct Taken {
    pub value: Value,
    pub stored_at: Instant,
    pub expires_at: Instant,
}

/// Result of a secondary lookup
#[derive(Debug)]
pub enum Lookup {
    Found(Taken),
    Expired,
    Missing,
}

#[derive(Debug)]
pub struct SecondaryTier {
    entries: HashMap<String, SecondaryEntry>,
    stored_order: VecDeque<(String, u64)>,
    bytes: usize,
    max_bytes: usize,
    compression_threshold: usize,
    next_generation: u64,
}

impl SecondaryTier {
    pub fn new(max_bytes: usize, compression_threshold: usize) -> Self {
        Self {
            entries: HashMap::new(),
            stored_order: VecDeque::new(),
            bytes: 0,
            max_bytes,
            compression_threshold,
            next_generation: 0,
        }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn is_compressed(&self, key: &str) -> bool {
        matches!(
            self.entries.get(key),
            Some(SecondaryEntry {
                payload: Payload::Gzip(_),
                ..
            })
        )
    }

    /// Store a serialized value; returns how many entries were evicted
    ///
    /// Values that do not fit in the byte budget even after compression are
    /// not stored.
    pub fn insert(
        &mut self,
        key: String,
        serialized: Vec<u8>,
        stored_at: Instant,
        expires_at: Instant,
    ) -> usize {
        let payload = if serialized.len() > self.compression_threshold {
            match gzip(&serialized) {
                Ok(compressed) => Payload::Gzip(compressed),
                Err(e) => {
                    tracing::warn!(error = %e, "Cache compression failed, storing uncompressed");
                    Payload::Plain(serialized)
                }
            }
        } else {
            Payload::Plain(serialized)
        };

        if payload.len() > self.max_bytes {
            tracing::debug!(
                size_bytes = payload.len(),
                max_bytes = self.max_bytes,
                "Value exceeds secondary tier capacity, not stored"
            );
            return 0;
        }

        self.remove(&key);

        let generation = self.next_generation;
        self.next_generation += 1;
        self.bytes += payload.len();
        self.stored_order.push_back((key.clone(), generation));
        self.entries.insert(
            key,
            SecondaryEntry {
                payload,
                stored_at,
                expires_at,
                generation,
            },
        );

        let mut evicted = 0;
        while self.bytes > self.max_bytes {
            let Some((oldest, generation)) = self.stored_order.pop_front() else {
                break;
            };
            let current = self
                .entries
                .get(&oldest)
                .is_some_and(|entry| entry.generation == generation);
            if current {
                self.remove(&oldest);
                evicted += 1;
            }
        }
        evicted
    }

    /// Remove and return an entry
    pub fn take(&mut self, key: &str, now: Instant) -> Lookup {
        let Some(entry) = self.entries.remove(key) else {
            return Lookup::Missing;
        };
        self.bytes -= entry.payload.len();

        if entry.expires_at <= now {
            return Lookup::Expired;
        }

        match decode(entry.payload) {
            Ok(value) => Lookup::Found(Taken {
                value,
                stored_at: entry.stored_at,
                expires_at: entry.expires_at,
            }),
            Err(e) => {
                tracing::warn!(error = %e, "Discarding undecodable secondary cache entry");
                Lookup::Missing
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.bytes -= entry.payload.len();
                true
            }
            None => false,
        }
    }

    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let mut freed = 0;
        self.entries.retain(|_, entry| {
            let keep = entry.expires_at > now;
            if !keep {
                freed += entry.payload.len();
            }
            keep
        });
        self.bytes -= freed;
        let entries = &self.entries;
        self.stored_order.retain(|(key, generation)| {
            entries
                .get(key)
                .is_some_and(|entry| entry.generation == *generation)
        });
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.stored_order.clear();
        self.bytes = 0;
    }
}

fn gzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

fn decode(payload: Payload) -> Result<Value, String> {
    let bytes = match payload {
        Payload::Plain(bytes) => bytes,
        Payload::Gzip(compressed) => {
            let mut decoder = GzDecoder::new(compressed.as_slice());
            let mut bytes = Vec::new();
            decoder
                .read_to_end(&mut bytes)
                .map_err(|e| format!("gzip decode failed: {}", e))?;
            bytes
        }
    };
    serde_json::from_slice(&bytes).map_err(|e| format!("JSON decode failed: {}", e))
}
