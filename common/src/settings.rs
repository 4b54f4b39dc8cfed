//! Consensus and node settings, deserialised from module
//! configuration with kebab-case keys.

use serde::{Deserialize, Deserializer};
use std::time::Duration;

use crate::{
    chain::Header,
    checkpoint::Checkpoint,
    work::{parse_work, Work},
    Height,
};

// Loose enough that any digest satisfies it; suits an abstract digest.
const DEFAULT_PROOF_OF_WORK_LIMIT: u32 = 0x207f_ffff;
const DEFAULT_TIMESTAMP_LIMIT_SECONDS: u64 = 7200;
const DEFAULT_INITIAL_SUBSIDY: u64 = 5_000_000_000;
const DEFAULT_SUBSIDY_INTERVAL_BLOCKS: u64 = 210_000;

fn de_work<'de, D>(deserializer: D) -> Result<Work, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    parse_work(&s).map_err(serde::de::Error::custom)
}

/// Consensus-critical settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BitcoinSettings {
    /// Cumulative work below which a current branch is not yet stored.
    #[serde(deserialize_with = "de_work")]
    pub minimum_work: Work,
    /// A single trusted pin below which validation is bypassed.
    pub milestone: Option<Checkpoint>,
    /// Chain pins; conflicting headers are rejected outright.
    pub checkpoints: Vec<Checkpoint>,
    pub timestamp_limit_seconds: u64,
    /// Compact encoding of the easiest allowed target.
    pub proof_of_work_limit: u32,
    /// Memory-hard proof digest instead of the identity hash.
    pub scrypt_proof_of_work: bool,
    pub initial_subsidy: u64,
    pub subsidy_interval_blocks: u64,
}

impl Default for BitcoinSettings {
    fn default() -> Self {
        Self {
            minimum_work: Work::ZERO,
            milestone: None,
            checkpoints: Vec::new(),
            timestamp_limit_seconds: DEFAULT_TIMESTAMP_LIMIT_SECONDS,
            proof_of_work_limit: DEFAULT_PROOF_OF_WORK_LIMIT,
            scrypt_proof_of_work: false,
            initial_subsidy: DEFAULT_INITIAL_SUBSIDY,
            subsidy_interval_blocks: DEFAULT_SUBSIDY_INTERVAL_BLOCKS,
        }
    }
}

impl BitcoinSettings {
    /// The genesis header for this network.
    pub fn genesis_header(&self) -> Header {
        Header::genesis(self.proof_of_work_limit)
    }

    /// The height below which block validation may be bypassed.
    pub fn bypass_height(&self) -> Height {
        self.milestone.map(|cp| cp.height).unwrap_or_default()
    }
}

/// Node-local tuning.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct NodeSettings {
    /// Ceiling on association chunk size handed to one peer.
    pub maximum_inventory: usize,
    /// Recency window for the "current" test; zero disables it.
    pub currency_window_minutes: u64,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            maximum_inventory: 500,
            currency_window_minutes: 60,
        }
    }
}

impl NodeSettings {
    pub fn currency_window(&self) -> Duration {
        Duration::from_secs(self.currency_window_minutes * 60)
    }

    pub fn use_currency_window(&self) -> bool {
        self.currency_window_minutes != 0
    }
}
