//! Legacy inventory-driven block ingest, used when header-first sync
//! is not active: announce-by-inv (or headers), filter what the store
//! already has, pull the rest with get_data, organize full blocks.

use obelisk_archive::Archive;
use obelisk_common::chain::Header;
use tracing::debug;

use crate::wire::{
    locator_heights, InventoryItem, InventoryType, Locator, WireMessage, SEND_HEADERS_VERSION,
};

pub struct BlockInLegacy {
    peer_version: u32,
}

impl BlockInLegacy {
    pub fn new(peer_version: u32) -> Self {
        Self { peer_version }
    }

    /// Peers at or above 70012 may announce with headers instead of
    /// inventory.
    pub fn headers_from_peer(&self) -> bool {
        self.peer_version >= SEND_HEADERS_VERSION
    }

    /// Messages to send when the channel starts.
    pub fn startup_messages(&self) -> Vec<WireMessage> {
        if self.headers_from_peer() {
            vec![WireMessage::SendHeaders]
        } else {
            Vec::new()
        }
    }

    /// The perpetual-timer locator request; doubles as the heartbeat.
    pub fn heartbeat_request(&self, archive: &dyn Archive) -> WireMessage {
        let heights = locator_heights(archive.get_top_candidate());
        let locator = Locator {
            hashes: archive.get_candidate_hashes(&heights),
            stop: Default::default(),
        };
        if self.headers_from_peer() {
            WireMessage::GetHeaders(locator)
        } else {
            WireMessage::GetBlocks(locator)
        }
    }

    /// Announced inventory, minus blocks the store already holds.
    pub fn handle_inventory(
        &self,
        items: &[InventoryItem],
        archive: &dyn Archive,
    ) -> Option<WireMessage> {
        let wanted: Vec<InventoryItem> = items
            .iter()
            .filter(|item| {
                matches!(item.kind, InventoryType::Block | InventoryType::WitnessBlock)
                    && !archive.is_associated(archive.to_header(&item.hash))
            })
            .map(|item| InventoryItem {
                kind: InventoryType::Block,
                hash: item.hash,
            })
            .collect();

        if wanted.is_empty() {
            None
        } else {
            Some(WireMessage::GetData(wanted))
        }
    }

    /// Header announcements reduce to block inventory on this path.
    pub fn handle_headers(
        &self,
        headers: &[Header],
        archive: &dyn Archive,
    ) -> Option<WireMessage> {
        let items: Vec<InventoryItem> = headers
            .iter()
            .map(|header| InventoryItem {
                kind: InventoryType::Block,
                hash: header.hash(),
            })
            .collect();
        self.handle_inventory(&items, archive)
    }

    /// The peer cannot locate a block it told us it had; this only
    /// results from reorganization assuming the peer is proper.
    pub fn handle_not_found(&self, items: &[InventoryItem]) {
        for item in items {
            debug!(hash = %item.hash, "block not found at peer");
        }
    }
}
