//! Definition of Obelisk bus messages

use serde::{Deserialize, Serialize};

use crate::{
    associations::AssociationMap,
    chain::{Block, Header, ValidateError},
    ChannelId, HeaderLink, Height,
};

/// A chase event: the coordination currency of the chasers.
///
/// Delivery is per-publisher FIFO and at-least-once; consumers of the
/// `Bump` class must be idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChaseEvent {
    /// Candidate chain grew or reorganized from a header branch point.
    Header { branch_point: Height },
    /// Same, from the block organizer (pre-header-first path).
    Block { branch_point: Height },
    /// More block hashes became available for download.
    Download { count: usize },
    /// A checked block was archived at this height.
    Checked { height: Height },
    /// The candidate chain was rewound to the branch point.
    Regressed { branch_point: Height },
    /// Candidate chain reset to the confirmed top after invalidation.
    Disorganized { top_confirmed: Height },
    /// Block at this height passed accept + connect.
    Preconfirmable { height: Height },
    /// Block under this link failed its download-time checks.
    Unchecked { link: HeaderLink },
    /// Block under this link failed preconfirmation and was marked.
    Unpreconfirmable { link: HeaderLink },
    /// Block under this link failed confirmation.
    Unconfirmable { link: HeaderLink },
    /// A malleated block arrived under this link; a distinct block
    /// with the same header may still succeed.
    Malleated { link: HeaderLink },
    /// All outstanding download work is void.
    Purge { top: Height },
    /// Addressed channel should return half its work to the pool.
    Split { channel: ChannelId },
    /// Addressed channel is too slow and should stop.
    Stall { channel: ChannelId },
    /// Addressed channel reported having no work.
    Starved { channel: ChannelId },
    /// Re-drive in-order advance; redundant bumps are harmless.
    Bump,
    Pause,
    Resume,
    Stop,
}

/// Result code of an organize call, surfaced to the caller unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrganizeCode {
    Success,
    /// Parent unknown to tree and archive.
    Orphan,
    /// Already in tree or archive.
    Duplicate,
    /// Contradicts a configured checkpoint.
    CheckpointConflict,
    /// Archived under this link as unconfirmable.
    Unconfirmable,
    /// Failed check or accept.
    Invalid(ValidateError),
    /// Archive invariant violation; fatal to the organizer.
    StoreIntegrity,
    /// Impossible internal state; fatal to the organizer.
    InternalError,
    /// Organizer closed during shutdown.
    Stopped,
}

impl OrganizeCode {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StoreIntegrity | Self::InternalError)
    }
}

/// `(code, height)` handed back to every organize caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizeOutcome {
    pub code: OrganizeCode,
    pub height: Height,
}

impl OrganizeOutcome {
    pub fn new(code: OrganizeCode, height: Height) -> Self {
        Self { code, height }
    }
}

/// Request admission of one header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizeHeaderMessage {
    pub header: Header,
}

/// Request admission of one full block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizeBlockMessage {
    pub block: Block,
}

/// One chunk of download work, moving in either direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashesMessage {
    pub map: AssociationMap,
}

// === Global message enum ===
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    None(()),                               // Just so we have a simple default
    Chase(ChaseEvent),                      // Chaser coordination event
    OrganizeHeader(OrganizeHeaderMessage),  // Header admission request
    OrganizeBlock(OrganizeBlockMessage),    // Block admission request
    OrganizeOutcome(OrganizeOutcome),       // Admission response
    GetHashes(()),                          // Download work request
    Hashes(HashesMessage),                  // Download work response
    PutHashes(HashesMessage),               // Download work restore
    Ack(()),                                // Plain acknowledgement
}

impl Default for Message {
    fn default() -> Self {
        Message::None(())
    }
}

// Casts from specific messages
impl From<ChaseEvent> for Message {
    fn from(event: ChaseEvent) -> Self {
        Message::Chase(event)
    }
}

impl From<OrganizeHeaderMessage> for Message {
    fn from(msg: OrganizeHeaderMessage) -> Self {
        Message::OrganizeHeader(msg)
    }
}

impl From<OrganizeBlockMessage> for Message {
    fn from(msg: OrganizeBlockMessage) -> Self {
        Message::OrganizeBlock(msg)
    }
}

impl From<OrganizeOutcome> for Message {
    fn from(outcome: OrganizeOutcome) -> Self {
        Message::OrganizeOutcome(outcome)
    }
}

impl From<HashesMessage> for Message {
    fn from(msg: HashesMessage) -> Self {
        Message::Hashes(msg)
    }
}
