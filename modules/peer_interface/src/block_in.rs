//! Per-peer block download against the shared work pool: pull a chunk
//! of unassociated hashes, request the blocks, check and archive each
//! one, and refill when the chunk drains.

use std::time::Instant;

use obelisk_archive::Archive;
use obelisk_common::{associations::AssociationMap, chain::Block, Height};
use tracing::debug;

use crate::{
    connection::StopReason,
    wire::{InventoryItem, InventoryType, WireMessage},
};

/// What to do after an archived block.
pub struct BlockDisposition {
    /// Height to announce as checked.
    pub checked: Height,
    /// The local chunk drained; pull another.
    pub refill: bool,
}

pub struct BlockIn {
    /// Inventory type for requested blocks.
    block_type: InventoryType,
    /// The chunk currently on loan from the checker.
    map: AssociationMap,
    /// Performance accounting for the current interval.
    bytes: u64,
    since: Instant,
}

impl BlockIn {
    pub fn new(witness: bool) -> Self {
        Self {
            block_type: if witness {
                InventoryType::WitnessBlock
            } else {
                InventoryType::Block
            },
            map: AssociationMap::new(),
            bytes: 0,
            since: Instant::now(),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.map.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.map.len()
    }

    /// Adopt a chunk from the checker; returns the request for it.
    pub fn adopt(&mut self, map: AssociationMap) -> Option<WireMessage> {
        if map.is_empty() {
            return None;
        }
        debug!(count = map.len(), "block hashes adopted");
        self.map.absorb(map);
        Some(self.create_get_data())
    }

    fn create_get_data(&self) -> WireMessage {
        let items = self
            .map
            .by_height()
            .into_iter()
            .map(|(hash, _)| InventoryItem {
                kind: self.block_type,
                hash,
            })
            .collect();
        WireMessage::GetData(items)
    }

    /// Check and archive one incoming block.
    pub fn handle_block(
        &mut self,
        block: &Block,
        archive: &dyn Archive,
    ) -> Result<BlockDisposition, StopReason> {
        let hash = block.hash();
        let Some(association) = self.map.get(&hash).copied() else {
            // Unrequested block; we never asked this peer for it.
            return Err(StopReason::Unknown);
        };

        if let Err(error) = block.check() {
            return Err(StopReason::Invalid(error));
        }
        if let Err(error) = block.check_in_context(&association.context) {
            return Err(StopReason::Invalid(error));
        }

        if archive.set_link_block(block, None).is_terminal() {
            return Err(StopReason::StoreIntegrity);
        }

        // Block check accounted for.
        self.map.remove(&hash);
        self.bytes += block.serialized_size() as u64;

        Ok(BlockDisposition {
            checked: association.height,
            refill: self.map.is_empty(),
        })
    }

    /// Give up the whole chunk (stop, purge-with-restore, starvation).
    pub fn take_map(&mut self) -> AssociationMap {
        std::mem::take(&mut self.map)
    }

    /// Keep the lower-height half, return the rest to the pool.
    pub fn split(&mut self) -> AssociationMap {
        self.map.split_half()
    }

    /// Bytes per second over the interval since the last report, then
    /// reset the counters.
    pub fn rate(&mut self) -> u64 {
        let elapsed = self.since.elapsed().as_secs().max(1);
        let rate = self.bytes / elapsed;
        self.bytes = 0;
        self.since = Instant::now();
        rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obelisk_archive::MemoryArchive;
    use obelisk_common::{
        associations::Association,
        chain::{Header, Transaction},
        crypto::merkle_root,
        BlockState, Context, Hash, HeaderLink,
    };

    const EASY_BITS: u32 = 0x207fffff;

    struct Fixture {
        archive: MemoryArchive,
        blocks: Vec<Block>,
        map: AssociationMap,
    }

    /// Candidate headers 1..=top with their matching blocks and the
    /// association chunk covering them.
    fn fixture(top: Height) -> Fixture {
        let genesis = Header::genesis(EASY_BITS);
        let archive = MemoryArchive::new(genesis.clone());
        let mut previous = genesis;
        let mut blocks = Vec::new();
        let mut map = AssociationMap::new();
        for height in 1..=top {
            let txs = vec![Transaction::new(format!("coinbase {height}").into_bytes())];
            let header = Header {
                version: 1,
                previous_hash: previous.hash(),
                merkle_root: merkle_root(&txs.iter().map(Transaction::id).collect::<Vec<_>>()),
                timestamp: previous.timestamp + 600,
                bits: EASY_BITS,
                nonce: height as u32,
            };
            let ctx = Context {
                height,
                ..Default::default()
            };
            let link = archive.set_link_header(&header, &ctx);
            assert!(archive.push_candidate(link));
            map.insert(
                header.hash(),
                Association {
                    link,
                    height,
                    context: ctx,
                },
            );
            blocks.push(Block::new(header.clone(), txs));
            previous = header;
        }
        Fixture {
            archive,
            blocks,
            map,
        }
    }

    #[test]
    fn adopt_requests_in_height_order() {
        let fx = fixture(3);
        let mut protocol = BlockIn::new(true);

        let Some(WireMessage::GetData(items)) = protocol.adopt(fx.map.clone()) else {
            panic!("expected a get_data request");
        };
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|i| i.kind == InventoryType::WitnessBlock));
        assert_eq!(items[0].hash, fx.blocks[0].hash());

        // Empty chunks produce no request.
        let mut idle = BlockIn::new(false);
        assert!(idle.adopt(AssociationMap::new()).is_none());
        assert!(idle.is_idle());
    }

    #[test]
    fn archives_requested_blocks_and_refills_when_dry() {
        let fx = fixture(2);
        let mut protocol = BlockIn::new(false);
        protocol.adopt(fx.map.clone());

        let first = protocol.handle_block(&fx.blocks[0], &fx.archive).unwrap();
        assert_eq!(first.checked, 1);
        assert!(!first.refill);

        let second = protocol.handle_block(&fx.blocks[1], &fx.archive).unwrap();
        assert_eq!(second.checked, 2);
        assert!(second.refill);

        let link = fx.archive.to_candidate(1);
        assert_eq!(fx.archive.get_block_state(link), Some(BlockState::Associated));
    }

    #[test]
    fn unrequested_block_stops_the_channel() {
        let fx = fixture(2);
        let mut protocol = BlockIn::new(false);
        // No chunk adopted at all.
        assert!(matches!(
            protocol.handle_block(&fx.blocks[0], &fx.archive),
            Err(StopReason::Unknown)
        ));
    }

    #[test]
    fn invalid_block_stops_with_the_specific_error() {
        let fx = fixture(1);
        let mut protocol = BlockIn::new(false);
        protocol.adopt(fx.map.clone());

        let mut tampered = fx.blocks[0].clone();
        tampered.txs.push(Transaction::new(b"injected".to_vec()));
        assert!(matches!(
            protocol.handle_block(&tampered, &fx.archive),
            Err(StopReason::Invalid(_))
        ));
        // The hash stays in the map; restore will return it.
        assert_eq!(protocol.remaining(), 1);
    }

    #[test]
    fn split_returns_upper_half() {
        let fx = fixture(4);
        let mut protocol = BlockIn::new(false);
        protocol.adopt(fx.map.clone());

        let returned = protocol.split();
        assert_eq!(returned.len(), 2);
        assert_eq!(protocol.remaining(), 2);
        assert_eq!(returned.top_height(), Some(4));

        let surrendered = protocol.take_map();
        assert_eq!(surrendered.len(), 2);
        assert!(protocol.is_idle());
    }

    #[test]
    fn rate_resets_between_reports() {
        let fx = fixture(1);
        let mut protocol = BlockIn::new(false);
        protocol.adopt(fx.map.clone());
        protocol.handle_block(&fx.blocks[0], &fx.archive).unwrap();

        assert!(protocol.rate() > 0);
        assert_eq!(protocol.rate(), 0);
    }

    #[test]
    fn terminal_archive_link_is_fatal() {
        let fx = fixture(1);
        // A block the archive has no header for: association came from
        // somewhere, but set_link without a context goes terminal.
        let txs = vec![Transaction::new(b"stray coinbase".to_vec())];
        let stray_header = Header {
            version: 1,
            previous_hash: Hash::new([3u8; 32]),
            merkle_root: merkle_root(&txs.iter().map(Transaction::id).collect::<Vec<_>>()),
            timestamp: 5_000,
            bits: EASY_BITS,
            nonce: 7,
        };
        let stray = Block::new(stray_header, txs);

        let mut protocol = BlockIn::new(false);
        let mut map = AssociationMap::new();
        map.insert(
            stray.hash(),
            Association {
                link: HeaderLink(42),
                height: 1,
                context: Context::default(),
            },
        );
        protocol.adopt(map);

        assert!(matches!(
            protocol.handle_block(&stray, &fx.archive),
            Err(StopReason::StoreIntegrity)
        ));
    }
}
