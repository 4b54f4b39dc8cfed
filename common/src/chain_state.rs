//! Derived chain state, rolled forward one header at a time.
//!
//! A `ChainState` is an immutable snapshot of the rules active at a
//! given header. Construction is pure and cheap: everything needed to
//! derive the child state travels with the parent, so no store access
//! is required ("rolling forward chain state eliminates database
//! cost").

use std::sync::Arc;

use crate::{
    chain::Header,
    work::Work,
    Context, Hash, Height,
};

/// Soft-fork flag bits.
pub mod forks {
    /// Coinbase must commit the height.
    pub const HEIGHT_IN_COINBASE: u32 = 1 << 0;
    /// Strict DER signatures.
    pub const STRICT_DER: u32 = 1 << 1;
    /// Checklocktimeverify.
    pub const CHECK_LOCKTIME: u32 = 1 << 2;
    /// Segregated witness commitment required.
    pub const SEGREGATED_WITNESS: u32 = 1 << 3;
}

// Mainnet-style activation heights for the height-gated forks.
const HEIGHT_IN_COINBASE_HEIGHT: Height = 227_931;
const STRICT_DER_HEIGHT: Height = 363_725;
const CHECK_LOCKTIME_HEIGHT: Height = 388_381;
const SEGREGATED_WITNESS_HEIGHT: Height = 481_824;

// Median time past window.
const TIMESTAMP_WINDOW: usize = 11;

fn forks_at(height: Height) -> u32 {
    let mut flags = 0;
    if height >= HEIGHT_IN_COINBASE_HEIGHT {
        flags |= forks::HEIGHT_IN_COINBASE;
    }
    if height >= STRICT_DER_HEIGHT {
        flags |= forks::STRICT_DER;
    }
    if height >= CHECK_LOCKTIME_HEIGHT {
        flags |= forks::CHECK_LOCKTIME;
    }
    if height >= SEGREGATED_WITNESS_HEIGHT {
        flags |= forks::SEGREGATED_WITNESS;
    }
    flags
}

fn minimum_version_at(height: Height) -> u32 {
    if height >= CHECK_LOCKTIME_HEIGHT {
        4
    } else if height >= STRICT_DER_HEIGHT {
        3
    } else if height >= HEIGHT_IN_COINBASE_HEIGHT {
        2
    } else {
        1
    }
}

fn median(timestamps: &[u64]) -> u64 {
    if timestamps.is_empty() {
        return 0;
    }
    let mut sorted = timestamps.to_vec();
    sorted.sort_unstable();
    sorted[sorted.len() / 2]
}

/// Snapshot of the rules active at one header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainState {
    height: Height,
    hash: Hash,
    forks: u32,
    minimum_block_version: u32,
    /// Median of the timestamps of the headers before this one; what
    /// this header's own timestamp was validated against.
    median_time_past: u64,
    cumulative_work: Work,
    /// Up to the last eleven timestamps ending at this header, for
    /// deriving the child's median time past.
    recent_timestamps: Vec<u64>,
}

impl ChainState {
    /// State at the genesis header.
    pub fn genesis(header: &Header) -> Arc<Self> {
        Arc::new(Self {
            height: 0,
            hash: header.hash(),
            forks: forks_at(0),
            minimum_block_version: minimum_version_at(0),
            median_time_past: 0,
            cumulative_work: header.proof(),
            recent_timestamps: vec![header.timestamp],
        })
    }

    /// Roll the parent state forward through one header.
    pub fn from_parent(parent: &ChainState, header: &Header) -> Arc<Self> {
        let height = parent.height + 1;

        let mut recent = parent.recent_timestamps.clone();
        recent.push(header.timestamp);
        if recent.len() > TIMESTAMP_WINDOW {
            recent.remove(0);
        }

        Arc::new(Self {
            height,
            hash: header.hash(),
            forks: forks_at(height),
            minimum_block_version: minimum_version_at(height),
            median_time_past: median(&parent.recent_timestamps),
            cumulative_work: parent.cumulative_work + header.proof(),
            recent_timestamps: recent,
        })
    }

    pub fn height(&self) -> Height {
        self.height
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn forks(&self) -> u32 {
        self.forks
    }

    pub fn minimum_block_version(&self) -> u32 {
        self.minimum_block_version
    }

    pub fn median_time_past(&self) -> u64 {
        self.median_time_past
    }

    pub fn cumulative_work(&self) -> Work {
        self.cumulative_work
    }

    /// Project the validation context for this header's height.
    pub fn context(&self) -> Context {
        Context {
            forks: self.forks,
            height: self.height,
            median_time_past: self.median_time_past,
            minimum_block_version: self.minimum_block_version,
        }
    }
}
