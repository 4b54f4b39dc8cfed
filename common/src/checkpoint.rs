//! Configured checkpoints: `(hash, height)` pins the chain must pass
//! through. Considered chain validation, not header validation.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};

use crate::{Hash, Height};

/// A `hash:height` chain pin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    pub hash: Hash,
    pub height: Height,
}

impl Checkpoint {
    pub fn new(hash: Hash, height: Height) -> Self {
        Self { hash, height }
    }

    /// True when this checkpoint names exactly this `(hash, height)`.
    pub fn equals(&self, hash: &Hash, height: Height) -> bool {
        self.height == height && self.hash == *hash
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.hash, self.height)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("expected hash:height, got {0:?}")]
pub struct CheckpointParseError(String);

impl FromStr for Checkpoint {
    type Err = CheckpointParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hash, height) = s.split_once(':').ok_or_else(|| CheckpointParseError(s.into()))?;
        Ok(Self {
            hash: hash.parse().map_err(|_| CheckpointParseError(s.into()))?,
            height: height.parse().map_err(|_| CheckpointParseError(s.into()))?,
        })
    }
}

impl Serialize for Checkpoint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Checkpoint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// True when any checkpoint sits at this height.
pub fn is_at(checkpoints: &[Checkpoint], height: Height) -> bool {
    checkpoints.iter().any(|cp| cp.height == height)
}

/// True when `(hash, height)` contradicts a configured checkpoint:
/// a checkpoint exists at the height but names a different hash.
pub fn is_conflict(checkpoints: &[Checkpoint], hash: &Hash, height: Height) -> bool {
    checkpoints.iter().any(|cp| cp.height == height && cp.hash != *hash)
}
