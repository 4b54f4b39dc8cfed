//! Typed peer wire messages.
//!
//! The transport carries these as opaque typed values; byte encoding
//! lives with the transport implementation, not here.

use serde::{Deserialize, Serialize};

use obelisk_common::{
    chain::{Block, Header},
    Hash, Height,
};

/// Ceiling on headers per `headers` response.
pub const MAX_GET_HEADERS: usize = 2000;
/// Ceiling on hashes per `get_blocks` locator response.
pub const MAX_GET_BLOCKS: usize = 500;
/// Ceiling on inventory items per message.
pub const MAX_INVENTORY: usize = 50_000;
/// First protocol version accepting `send_headers`.
pub const SEND_HEADERS_VERSION: u32 = 70_012;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryType {
    Block,
    WitnessBlock,
    Transaction,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub kind: InventoryType,
    pub hash: Hash,
}

/// Geometric block locator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    /// Recent-first candidate hashes, geometrically thinning.
    pub hashes: Vec<Hash>,
    /// Zero means "as many as allowed".
    pub stop: Hash,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireMessage {
    Version { version: u32, services: u64 },
    Verack,
    SendHeaders,
    GetHeaders(Locator),
    GetBlocks(Locator),
    Headers(Vec<Header>),
    Inv(Vec<InventoryItem>),
    GetData(Vec<InventoryItem>),
    Block(Box<Block>),
    NotFound(Vec<InventoryItem>),
}

/// Standard locator height selection: the last ten heights stepping by
/// one, then doubling gaps, always ending at genesis.
pub fn locator_heights(top: Height) -> Vec<Height> {
    let mut heights = Vec::new();
    let mut height = top as i64;
    let mut step = 1i64;
    while height > 0 {
        heights.push(height as Height);
        if heights.len() >= 10 {
            step *= 2;
        }
        height -= step;
    }
    heights.push(0);
    heights
}
