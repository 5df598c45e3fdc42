// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A key/value store of linked program binaries.
//!
//! Entries are keyed by the same 64-bit value the program cache uses and hold
//! `[4-byte little-endian format token][driver blob]`. A missing entry is
//! never an error; it only forces a normal link.

use crate::renderer::error::MicrocodeError;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const FORMAT_TOKEN_SIZE: usize = 4;
const MICROCODE_CACHE_VERSION: u32 = 1;

/// A driver program binary together with its format token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Microcode {
    /// Driver-specific binary format token.
    pub format: u32,
    /// The binary itself.
    pub blob: Vec<u8>,
}

impl Microcode {
    /// Serializes to `[format token][blob]`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(FORMAT_TOKEN_SIZE + self.blob.len());
        bytes.extend_from_slice(&self.format.to_le_bytes());
        bytes.extend_from_slice(&self.blob);
        bytes
    }

    /// Parses `[format token][blob]`. Returns `None` if the token is truncated.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let (token, blob) = bytes.split_first_chunk::<FORMAT_TOKEN_SIZE>()?;
        Some(Self {
            format: u32::from_le_bytes(*token),
            blob: blob.to_vec(),
        })
    }
}

#[derive(Serialize, Deserialize)]
struct MicrocodeFile {
    version: u32,
    entries: Vec<(u64, Vec<u8>)>,
}

/// In-memory microcode store with optional persistence.
#[derive(Debug, Default)]
pub struct MicrocodeCache {
    entries: AHashMap<u64, Vec<u8>>,
    dirty: bool,
}

impl MicrocodeCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for `key`, if any.
    pub fn get(&self, key: u64) -> Option<Microcode> {
        self.entries.get(&key).and_then(|bytes| Microcode::from_bytes(bytes))
    }

    /// Stores the binary for `key`, replacing any previous entry.
    pub fn insert(&mut self, key: u64, microcode: &Microcode) {
        self.entries.insert(key, microcode.to_bytes());
        self.dirty = true;
    }

    /// Returns `true` if an entry exists for `key`.
    pub fn contains(&self, key: u64) -> bool {
        self.entries.contains_key(&key)
    }

    /// Drops the entry for `key`. Used when a cached binary is rejected by the driver.
    pub fn remove(&mut self, key: u64) -> bool {
        let removed = self.entries.remove(&key).is_some();
        self.dirty |= removed;
        removed
    }

    /// Number of stored binaries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the cache holds nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if entries changed since the last save or load.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Writes every entry to `writer`.
    pub fn save_to<W: Write>(&mut self, writer: &mut W) -> Result<(), MicrocodeError> {
        let mut entries: Vec<(u64, Vec<u8>)> = self
            .entries
            .iter()
            .map(|(key, bytes)| (*key, bytes.clone()))
            .collect();
        entries.sort_unstable_by_key(|(key, _)| *key);

        let file = MicrocodeFile {
            version: MICROCODE_CACHE_VERSION,
            entries,
        };
        bincode::serde::encode_into_std_write(&file, writer, bincode::config::standard())
            .map_err(|e| MicrocodeError::Encode(e.to_string()))?;
        self.dirty = false;
        log::debug!("Saved {} microcode entries", self.entries.len());
        Ok(())
    }

    /// Merges entries read from `reader` into the cache.
    pub fn load_from<R: Read>(&mut self, reader: &mut R) -> Result<usize, MicrocodeError> {
        let file: MicrocodeFile =
            bincode::serde::decode_from_std_read(reader, bincode::config::standard())
                .map_err(|e| MicrocodeError::Corrupt(e.to_string()))?;
        if file.version != MICROCODE_CACHE_VERSION {
            return Err(MicrocodeError::VersionMismatch {
                expected: MICROCODE_CACHE_VERSION,
                found: file.version,
            });
        }

        let loaded = file.entries.len();
        self.entries.extend(file.entries);
        self.dirty = false;
        log::debug!("Loaded {loaded} microcode entries");
        Ok(loaded)
    }

    /// Saves the cache to a file, creating or truncating it.
    pub fn save_to_file(&mut self, path: impl AsRef<Path>) -> Result<(), MicrocodeError> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.save_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Loads entries from a file.
    pub fn load_from_file(&mut self, path: impl AsRef<Path>) -> Result<usize, MicrocodeError> {
        let mut reader = BufReader::new(File::open(path)?);
        self.load_from(&mut reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_layout_is_token_then_blob() {
        let microcode = Microcode {
            format: 0x8741,
            blob: vec![1, 2, 3],
        };
        assert_eq!(microcode.to_bytes(), vec![0x41, 0x87, 0, 0, 1, 2, 3]);
        assert_eq!(Microcode::from_bytes(&microcode.to_bytes()), Some(microcode));
        assert_eq!(Microcode::from_bytes(&[1, 2]), None);
    }

    #[test]
    fn absent_key_is_not_an_error() {
        let cache = MicrocodeCache::new();
        assert!(cache.get(42).is_none());
        assert!(!cache.contains(42));
    }

    #[test]
    fn persisted_cache_reloads_into_fresh_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("programs.cache");

        let mut cache = MicrocodeCache::new();
        cache.insert(7, &Microcode { format: 1, blob: vec![9; 32] });
        cache.insert(8, &Microcode { format: 2, blob: Vec::new() });
        assert!(cache.is_dirty());
        cache.save_to_file(&path).unwrap();
        assert!(!cache.is_dirty());

        let mut restored = MicrocodeCache::new();
        assert_eq!(restored.load_from_file(&path).unwrap(), 2);
        assert_eq!(restored.get(7).map(|m| m.blob.len()), Some(32));
        assert_eq!(restored.get(8).map(|m| m.format), Some(2));
    }

    #[test]
    fn garbage_stream_is_rejected() {
        let mut cache = MicrocodeCache::new();
        let mut garbage: &[u8] = &[0xFF; 3];
        assert!(cache.load_from(&mut garbage).is_err());
        assert!(cache.is_empty());
    }
}
