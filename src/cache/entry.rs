//! Stored cache entries.
//!
//! An entry carries the serialized payload, its validator (content hash of
//! the uncompressed payload), and caller-supplied tags used for selective
//! invalidation. Entries are stored as JSON in the remote store.

use std::collections::HashMap;
use std::io::{Read, Write};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::warn;

use super::hasher;

/// A single stored response.
///
/// Invariant: `validator` is always the hash of the *uncompressed* content,
/// so hash comparison works whether or not the entry was compressed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Serialized payload; base64-wrapped gzip when `is_compressed` is set.
    pub content: String,
    /// Content hash of the uncompressed payload.
    pub validator: String,
    /// When the entry was produced.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Whether `content` holds compressed bytes.
    #[serde(default)]
    pub is_compressed: bool,
    /// Caller-supplied classification used for selective invalidation.
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl CacheEntry {
    /// Build an entry from a fresh uncompressed payload.
    pub fn new(body: &[u8]) -> Self {
        Self {
            content: String::from_utf8_lossy(body).into_owned(),
            validator: hasher::hash(body),
            timestamp: OffsetDateTime::now_utc(),
            is_compressed: false,
            tags: HashMap::new(),
        }
    }

    pub fn with_tags(mut self, tags: HashMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    /// Gzip the payload in place when it exceeds `threshold` bytes.
    ///
    /// The validator is untouched: it keeps fingerprinting the uncompressed
    /// payload.
    pub fn compress_if_above(&mut self, threshold: usize) {
        if self.is_compressed || self.content.len() <= threshold {
            return;
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        if encoder.write_all(self.content.as_bytes()).is_err() {
            return;
        }
        match encoder.finish() {
            Ok(compressed) => {
                self.content = STANDARD.encode(compressed);
                self.is_compressed = true;
            }
            Err(err) => {
                warn!(error = %err, "gzip of cache entry failed; storing uncompressed");
            }
        }
    }

    /// The uncompressed payload.
    ///
    /// If a compressed entry cannot be decoded the raw stored bytes are
    /// returned instead; a damaged entry must never fail the call.
    pub fn content(&self) -> Bytes {
        if !self.is_compressed {
            return Bytes::copy_from_slice(self.content.as_bytes());
        }

        match self.decompress() {
            Some(bytes) => Bytes::from(bytes),
            None => {
                warn!(
                    validator = %self.validator,
                    "failed to decompress cache entry; serving raw stored bytes"
                );
                Bytes::copy_from_slice(self.content.as_bytes())
            }
        }
    }

    fn decompress(&self) -> Option<Vec<u8>> {
        let compressed = STANDARD.decode(&self.content).ok()?;
        let mut decoder = GzDecoder::new(&compressed[..]);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).ok()?;
        Some(out)
    }
}
