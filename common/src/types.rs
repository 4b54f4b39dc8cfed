//! Core identifier and state types shared across the node.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Block height on a chain.
pub type Height = u64;

/// Stable identifier of a header record in the archive.
///
/// A sentinel value denotes "terminal" (absent); archive lookups that
/// miss return it rather than an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HeaderLink(pub u64);

impl HeaderLink {
    pub const TERMINAL: HeaderLink = HeaderLink(u64::MAX);

    #[inline]
    pub fn is_terminal(&self) -> bool {
        *self == Self::TERMINAL
    }
}

impl fmt::Display for HeaderLink {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_terminal() {
            f.write_str("terminal")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Identifier of a peer channel, used to address work-splitting events.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "channel#{}", self.0)
    }
}

/// Validation progress of a block (or bare header) record in the archive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockState {
    /// Header stored; transactions not yet associated.
    Unassociated,
    /// Transactions associated; not yet validated.
    Associated,
    /// Passed accept + connect on the candidate chain.
    Preconfirmable,
    /// Confirmed into the strong chain.
    Confirmable,
    /// Failed validation; cannot become confirmable under this link.
    Unconfirmable,
}

impl BlockState {
    /// A positive cached validation result that lets advance skip revalidation.
    pub fn is_positive(&self) -> bool {
        matches!(self, Self::Preconfirmable | Self::Confirmable)
    }
}

/// The validation context active at a given header, projected from
/// chain state. Cheap to copy and serialise.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    /// Bitfield of activated soft forks.
    pub forks: u32,
    /// Height of the header this context belongs to.
    pub height: Height,
    /// Median of the last eleven timestamps.
    pub median_time_past: u64,
    /// Lowest block version the chain accepts here.
    pub minimum_block_version: u32,
}
