//! Election Entries
//!
//! A member registers as an ephemeral sequential entry named
//! `<member_data>_<sequence>` under the election path. The sequence suffix is
//! assigned by the coordination service and is the only leadership ordering key.

use std::cmp::Ordering;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Separator between the advertised payload and the service-assigned sequence
pub const SEQUENCE_SEPARATOR: char = '_';

/// Sequence key assigned by the coordination service at registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceKey(pub u64);

impl SequenceKey {
    /// Parse the numeric suffix of an entry name
    pub fn parse(suffix: &str) -> Result<Self> {
        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidEntry(suffix.to_string()));
        }
        suffix
            .parse::<u64>()
            .map(SequenceKey)
            .map_err(|_| Error::InvalidEntry(suffix.to_string()))
    }

    /// Get the raw value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SequenceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:010}", self.0)
    }
}

/// One registered participant
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    /// Entry name relative to the election path
    pub name: String,
    /// Ordering key
    pub key: SequenceKey,
    /// Opaque payload advertised by the owner
    pub data: String,
}

impl Node {
    /// Parse an entry name (or a full path ending in one)
    pub fn parse(entry: &str) -> Result<Self> {
        let name = entry.rsplit('/').next().unwrap_or(entry);
        let (data, suffix) = name
            .rsplit_once(SEQUENCE_SEPARATOR)
            .ok_or_else(|| Error::InvalidEntry(name.to_string()))?;

        Ok(Self {
            name: name.to_string(),
            key: SequenceKey::parse(suffix)?,
            data: data.to_string(),
        })
    }

    /// Path prefix handed to the service when registering `data` under `election_path`
    pub fn registration_prefix(election_path: &str, data: &str) -> String {
        format!("{}/{}{}", election_path, data, SEQUENCE_SEPARATOR)
    }
}

impl Ord for Node {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key).then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for Node {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.key, self.data)
    }
}
