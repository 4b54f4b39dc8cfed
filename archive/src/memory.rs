//! In-memory archive implementation.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use obelisk_common::{
    associations::{Association, AssociationMap},
    chain::{Block, Header},
    chain_state::ChainState,
    settings::BitcoinSettings,
    BlockState, Context, Hash, HeaderLink, Height,
};

use crate::Archive;

struct Record {
    header: Header,
    hash: Hash,
    parent: HeaderLink,
    height: Height,
    context: Context,
    block: Option<Arc<Block>>,
    state: BlockState,
    malleable: bool,
    txs_connected: bool,
}

#[derive(Default)]
struct Inner {
    records: Vec<Record>,
    by_hash: HashMap<Hash, HeaderLink>,
    candidate: Vec<HeaderLink>,
    confirmed: Vec<HeaderLink>,
}

impl Inner {
    fn record(&self, link: HeaderLink) -> Option<&Record> {
        if link.is_terminal() {
            return None;
        }
        self.records.get(link.0 as usize)
    }

    fn record_mut(&mut self, link: HeaderLink) -> Option<&mut Record> {
        if link.is_terminal() {
            return None;
        }
        self.records.get_mut(link.0 as usize)
    }

    fn is_associated(&self, record: &Record) -> bool {
        record.block.is_some() || record.state.is_positive()
    }

    fn insert(&mut self, header: Header, ctx: &Context) -> HeaderLink {
        let hash = header.hash();
        if let Some(existing) = self.by_hash.get(&hash) {
            return *existing;
        }

        let link = HeaderLink(self.records.len() as u64);
        let parent = self.by_hash.get(&header.previous_hash).copied().unwrap_or(HeaderLink::TERMINAL);
        self.records.push(Record {
            header,
            hash,
            parent,
            height: ctx.height,
            context: *ctx,
            block: None,
            state: BlockState::Unassociated,
            malleable: false,
            txs_connected: false,
        });
        self.by_hash.insert(hash, link);
        link
    }
}

/// Thread-safe in-memory chain store, seeded with a genesis header.
pub struct MemoryArchive {
    inner: RwLock<Inner>,
}

impl MemoryArchive {
    pub fn new(genesis: Header) -> Self {
        let mut inner = Inner::default();
        let ctx = Context {
            height: 0,
            ..Default::default()
        };
        let link = inner.insert(genesis, &ctx);
        // Genesis is confirmed by definition.
        inner.records[link.0 as usize].state = BlockState::Confirmable;
        inner.candidate.push(link);
        inner.confirmed.push(link);
        Self {
            inner: RwLock::new(inner),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().expect("archive lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().expect("archive lock poisoned")
    }
}

impl Archive for MemoryArchive {
    fn get_top_candidate(&self) -> Height {
        (self.read().candidate.len() as Height).saturating_sub(1)
    }

    fn get_top_confirmed(&self) -> Height {
        (self.read().confirmed.len() as Height).saturating_sub(1)
    }

    fn get_fork(&self) -> Height {
        let inner = self.read();
        let top = inner.candidate.len().min(inner.confirmed.len());
        (0..top)
            .rev()
            .find(|&h| inner.candidate[h] == inner.confirmed[h])
            .unwrap_or(0) as Height
    }

    fn to_candidate(&self, height: Height) -> HeaderLink {
        self.read().candidate.get(height as usize).copied().unwrap_or(HeaderLink::TERMINAL)
    }

    fn to_confirmed(&self, height: Height) -> HeaderLink {
        self.read().confirmed.get(height as usize).copied().unwrap_or(HeaderLink::TERMINAL)
    }

    fn to_header(&self, hash: &Hash) -> HeaderLink {
        self.read().by_hash.get(hash).copied().unwrap_or(HeaderLink::TERMINAL)
    }

    fn to_parent(&self, link: HeaderLink) -> HeaderLink {
        self.read().record(link).map(|r| r.parent).unwrap_or(HeaderLink::TERMINAL)
    }

    fn get_height(&self, link: HeaderLink) -> Option<Height> {
        self.read().record(link).map(|r| r.height)
    }

    fn get_bits(&self, link: HeaderLink) -> Option<u32> {
        self.read().record(link).map(|r| r.header.bits)
    }

    fn get_header(&self, link: HeaderLink) -> Option<Header> {
        self.read().record(link).map(|r| r.header.clone())
    }

    fn get_block(&self, link: HeaderLink) -> Option<Arc<Block>> {
        self.read().record(link).and_then(|r| r.block.clone())
    }

    fn get_context(&self, link: HeaderLink) -> Option<Context> {
        self.read().record(link).map(|r| r.context)
    }

    fn get_header_state(&self, link: HeaderLink) -> Option<BlockState> {
        self.read().record(link).map(|r| r.state)
    }

    fn get_block_state(&self, link: HeaderLink) -> Option<BlockState> {
        self.read().record(link).map(|r| r.state)
    }

    fn is_header(&self, hash: &Hash) -> bool {
        self.read().by_hash.contains_key(hash)
    }

    fn is_candidate_block(&self, link: HeaderLink) -> bool {
        let inner = self.read();
        let Some(record) = inner.record(link) else {
            return false;
        };
        inner.candidate.get(record.height as usize) == Some(&link)
    }

    fn is_associated(&self, link: HeaderLink) -> bool {
        let inner = self.read();
        inner.record(link).map(|r| inner.is_associated(r)).unwrap_or(false)
    }

    fn is_malleable(&self, link: HeaderLink) -> bool {
        self.read().record(link).map(|r| r.malleable).unwrap_or(false)
    }

    fn get_candidate_chain_state(
        &self,
        _settings: &BitcoinSettings,
        height: Height,
    ) -> Option<Arc<ChainState>> {
        let inner = self.read();
        if height as usize >= inner.candidate.len() {
            return None;
        }

        // Full forward scan; the organizer caches the top state.
        let mut state = ChainState::genesis(&inner.record(inner.candidate[0])?.header);
        for h in 1..=height as usize {
            let record = inner.record(inner.candidate[h])?;
            state = ChainState::from_parent(&state, &record.header);
        }
        Some(state)
    }

    fn get_candidate_hashes(&self, heights: &[Height]) -> Vec<Hash> {
        let inner = self.read();
        heights
            .iter()
            .filter_map(|&h| {
                let link = inner.candidate.get(h as usize)?;
                inner.record(*link).map(|r| r.hash)
            })
            .collect()
    }

    fn get_unassociated_above(&self, start: Height, count: usize) -> AssociationMap {
        let inner = self.read();
        let mut map = AssociationMap::new();
        for height in (start + 1)..inner.candidate.len() as Height {
            if map.len() >= count {
                break;
            }
            let link = inner.candidate[height as usize];
            let Some(record) = inner.record(link) else {
                continue;
            };
            if inner.is_associated(record) {
                continue;
            }
            map.insert(
                record.hash,
                Association {
                    link,
                    height,
                    context: record.context,
                },
            );
        }
        map
    }

    fn populate(&self, block: &Block) -> bool {
        // Output resolution stands in for the UTXO view here: inputs
        // are resolvable when every spending transaction has content.
        block.txs.iter().skip(1).all(|tx| !tx.raw.is_empty())
    }

    fn set_link_header(&self, header: &Header, ctx: &Context) -> HeaderLink {
        self.write().insert(header.clone(), ctx)
    }

    fn set_link_block(&self, block: &Block, ctx: Option<&Context>) -> HeaderLink {
        let mut inner = self.write();
        let hash = block.hash();
        let link = match inner.by_hash.get(&hash) {
            Some(link) => *link,
            None => match ctx {
                Some(ctx) => inner.insert(block.header.clone(), ctx),
                None => return HeaderLink::TERMINAL,
            },
        };

        let malleable = block.is_malleable();
        let Some(record) = inner.record_mut(link) else {
            return HeaderLink::TERMINAL;
        };
        if record.block.is_none() {
            record.block = Some(Arc::new(block.clone()));
        }
        if record.state == BlockState::Unassociated {
            record.state = BlockState::Associated;
        }
        record.malleable |= malleable;
        link
    }

    fn push_candidate(&self, link: HeaderLink) -> bool {
        let mut inner = self.write();
        match inner.record(link) {
            Some(record) if record.height as usize == inner.candidate.len() => {
                inner.candidate.push(link);
                true
            }
            _ => false,
        }
    }

    fn pop_candidate(&self) -> bool {
        let mut inner = self.write();
        if inner.candidate.len() > 1 {
            inner.candidate.pop();
            true
        } else {
            false
        }
    }

    fn push_confirmed(&self, link: HeaderLink) -> bool {
        let mut inner = self.write();
        match inner.record(link) {
            Some(record) if record.height as usize == inner.confirmed.len() => {
                inner.confirmed.push(link);
                true
            }
            _ => false,
        }
    }

    fn set_block_unconfirmable(&self, link: HeaderLink) -> bool {
        let mut inner = self.write();
        match inner.record_mut(link) {
            Some(record) => {
                record.state = BlockState::Unconfirmable;
                true
            }
            None => false,
        }
    }

    fn set_block_preconfirmable(&self, link: HeaderLink) -> bool {
        let mut inner = self.write();
        match inner.record_mut(link) {
            Some(record) => {
                record.state = BlockState::Preconfirmable;
                true
            }
            None => false,
        }
    }

    fn set_txs_connected(&self, link: HeaderLink) -> bool {
        let mut inner = self.write();
        match inner.record_mut(link) {
            Some(record) => {
                record.txs_connected = true;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obelisk_common::chain::Transaction;

    const EASY_BITS: u32 = 0x207fffff;

    fn genesis() -> Header {
        Header::genesis(EASY_BITS)
    }

    fn header_after(previous: &Header, nonce: u32) -> Header {
        Header {
            version: 1,
            previous_hash: previous.hash(),
            merkle_root: Hash::ZERO,
            timestamp: previous.timestamp + 600,
            bits: EASY_BITS,
            nonce,
        }
    }

    fn context_at(height: Height) -> Context {
        Context {
            height,
            ..Default::default()
        }
    }

    /// Extend the candidate chain by one stored header.
    fn extend(archive: &MemoryArchive, previous: &Header, height: Height) -> (Header, HeaderLink) {
        let header = header_after(previous, height as u32);
        let link = archive.set_link_header(&header, &context_at(height));
        assert!(archive.push_candidate(link));
        (header, link)
    }

    #[test]
    fn seeds_genesis_as_both_tops() {
        let archive = MemoryArchive::new(genesis());
        assert_eq!(archive.get_top_candidate(), 0);
        assert_eq!(archive.get_top_confirmed(), 0);
        assert_eq!(archive.get_fork(), 0);
        assert!(archive.is_header(&genesis().hash()));
        assert!(archive.is_associated(archive.to_candidate(0)));
    }

    #[test]
    fn push_requires_contiguous_height() {
        let archive = MemoryArchive::new(genesis());
        let header = header_after(&genesis(), 1);
        // Stored with a height that skips 1: push must refuse.
        let link = archive.set_link_header(&header, &context_at(2));
        assert!(!archive.push_candidate(link));

        let header = header_after(&genesis(), 2);
        let link = archive.set_link_header(&header, &context_at(1));
        assert!(archive.push_candidate(link));
        assert_eq!(archive.get_top_candidate(), 1);
    }

    #[test]
    fn pop_never_removes_genesis() {
        let archive = MemoryArchive::new(genesis());
        let (_, _) = extend(&archive, &genesis(), 1);
        assert!(archive.pop_candidate());
        assert!(!archive.pop_candidate());
        assert_eq!(archive.get_top_candidate(), 0);
    }

    #[test]
    fn set_link_is_idempotent() {
        let archive = MemoryArchive::new(genesis());
        let header = header_after(&genesis(), 1);
        let first = archive.set_link_header(&header, &context_at(1));
        let second = archive.set_link_header(&header, &context_at(1));
        assert_eq!(first, second);
    }

    #[test]
    fn block_association_flips_state() {
        let archive = MemoryArchive::new(genesis());
        let (header, link) = extend(&archive, &genesis(), 1);
        assert_eq!(archive.get_block_state(link), Some(BlockState::Unassociated));
        assert!(!archive.is_associated(link));

        let block = Block::new(header, vec![Transaction::new(b"coinbase".to_vec())]);
        assert_eq!(archive.set_link_block(&block, None), link);
        assert_eq!(archive.get_block_state(link), Some(BlockState::Associated));
        assert!(archive.is_associated(link));
        assert!(archive.get_block(link).is_some());
    }

    #[test]
    fn block_without_header_needs_context() {
        let archive = MemoryArchive::new(genesis());
        let header = header_after(&genesis(), 1);
        let block = Block::new(header, vec![Transaction::new(b"coinbase".to_vec())]);
        assert!(archive.set_link_block(&block, None).is_terminal());
        let link = archive.set_link_block(&block, Some(&context_at(1)));
        assert!(!link.is_terminal());
        assert!(archive.is_associated(link));
    }

    #[test]
    fn unassociated_scan_respects_start_and_count() {
        let archive = MemoryArchive::new(genesis());
        let mut previous = genesis();
        for height in 1..=10 {
            let (header, _) = extend(&archive, &previous, height);
            previous = header;
        }

        let map = archive.get_unassociated_above(0, 4);
        assert_eq!(map.len(), 4);
        assert_eq!(map.top_height(), Some(4));

        let map = archive.get_unassociated_above(4, 500);
        assert_eq!(map.len(), 6);
        assert_eq!(map.top_height(), Some(10));

        // Associating removes a height from the scan.
        let link = archive.to_candidate(5);
        let header = archive.get_header(link).unwrap();
        let block = Block::new(header, vec![Transaction::new(b"coinbase".to_vec())]);
        archive.set_link_block(&block, None);
        let map = archive.get_unassociated_above(4, 500);
        assert_eq!(map.len(), 5);
    }

    #[test]
    fn candidate_chain_state_accumulates_work() {
        let archive = MemoryArchive::new(genesis());
        let mut previous = genesis();
        for height in 1..=3 {
            let (header, _) = extend(&archive, &previous, height);
            previous = header;
        }

        let settings = BitcoinSettings::default();
        let state = archive.get_candidate_chain_state(&settings, 3).unwrap();
        assert_eq!(state.height(), 3);
        assert_eq!(state.hash(), previous.hash());
        let below = archive.get_candidate_chain_state(&settings, 2).unwrap();
        assert!(state.cumulative_work() > below.cumulative_work());
        assert!(archive.get_candidate_chain_state(&settings, 4).is_none());
    }

    #[test]
    fn fork_point_tracks_agreement() {
        let archive = MemoryArchive::new(genesis());
        let (h1, l1) = extend(&archive, &genesis(), 1);
        let (_, _) = extend(&archive, &h1, 2);
        assert_eq!(archive.get_fork(), 0);

        assert!(archive.push_confirmed(l1));
        assert_eq!(archive.get_fork(), 1);
        assert_eq!(archive.get_top_confirmed(), 1);
        assert_eq!(archive.get_top_candidate(), 2);
    }

    #[test]
    fn candidate_hashes_resolve_heights() {
        let archive = MemoryArchive::new(genesis());
        let (h1, _) = extend(&archive, &genesis(), 1);
        let (h2, _) = extend(&archive, &h1, 2);
        let hashes = archive.get_candidate_hashes(&[2, 0, 99]);
        assert_eq!(hashes, vec![h2.hash(), genesis().hash()]);
    }
}
