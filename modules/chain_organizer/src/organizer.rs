//! The organize state machine: admission, branch-work computation,
//! strong-branch reorganization, weak-branch caching, and
//! disorganization on invalidation.
//!
//! One generic machine realizes both the header and the block
//! organizer; the [`OrganizeDelegate`] supplies what differs. All
//! state is owned by the module task driving it; there is no internal
//! locking.

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use obelisk_archive::Archive;
use obelisk_common::{
    chain::{ChainEntry, Header},
    chain_state::ChainState,
    checkpoint,
    messages::{ChaseEvent, OrganizeCode, OrganizeOutcome},
    settings::{BitcoinSettings, NodeSettings},
    work::Work,
    BlockState, Hash, HeaderLink, Height,
};
use tracing::{debug, info, warn};

use crate::{delegate::OrganizeDelegate, tree::Tree};

pub struct Organizer<D: OrganizeDelegate> {
    archive: Arc<dyn Archive>,
    bitcoin: BitcoinSettings,
    node: NodeSettings,
    tree: Tree<D::Entry>,
    /// Cached state of the top candidate; by far the most commonly
    /// retrieved parent state.
    top_state: Option<Arc<ChainState>>,
    closed: bool,
}

impl<D: OrganizeDelegate> Organizer<D> {
    pub fn new(archive: Arc<dyn Archive>, bitcoin: BitcoinSettings, node: NodeSettings) -> Self {
        Self {
            archive,
            bitcoin,
            node,
            tree: Tree::new(),
            top_state: None,
            closed: false,
        }
    }

    /// Initialize the top-state cache from the archive's top candidate.
    ///
    /// Spans the full chain to obtain cumulative work; the scan is
    /// fast and happens once.
    pub fn start(&mut self) -> anyhow::Result<()> {
        let top = self.archive.get_top_candidate();
        self.top_state = self.archive.get_candidate_chain_state(&self.bitcoin, top);
        if self.top_state.is_none() {
            anyhow::bail!("archive has no candidate chain state at {top}");
        }
        Ok(())
    }

    pub fn closed(&self) -> bool {
        self.closed
    }

    pub fn top_state(&self) -> Option<&Arc<ChainState>> {
        self.top_state.as_ref()
    }

    pub fn tree_len(&self) -> usize {
        self.tree.len()
    }

    pub fn tree_contains(&self, hash: &Hash) -> bool {
        self.tree.contains(hash)
    }

    /// Global stop: drop cached branches and refuse further admission.
    pub fn handle_stop(&mut self) {
        self.tree.clear();
        self.closed = true;
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn fatal(&mut self, height: Height) -> (OrganizeOutcome, Vec<ChaseEvent>) {
        self.close();
        (
            OrganizeOutcome::new(OrganizeCode::StoreIntegrity, height),
            Vec::new(),
        )
    }

    /// Admit one entry; the caller surfaces the outcome code upstream
    /// unchanged and publishes the returned events in order.
    pub fn organize(&mut self, entry: Arc<D::Entry>) -> (OrganizeOutcome, Vec<ChaseEvent>) {
        let hash = entry.entry_hash();

        // Skip existing/orphan, get state.
        // --------------------------------------------------------------

        if self.closed {
            return (OrganizeOutcome::new(OrganizeCode::Stopped, 0), Vec::new());
        }

        if let Some(node) = self.tree.get(&hash) {
            let height = node.state.height();
            return (
                OrganizeOutcome::new(OrganizeCode::Duplicate, height),
                Vec::new(),
            );
        }

        let archived = self.archive.to_header(&hash);
        if !archived.is_terminal() {
            let height = self.archive.get_height(archived).unwrap_or_default();
            let state = self.archive.get_header_state(archived);
            match state {
                Some(BlockState::Unconfirmable) => {
                    return (
                        OrganizeOutcome::new(OrganizeCode::Unconfirmable, height),
                        Vec::new(),
                    );
                }
                // The block organizer may complete a header archived
                // without its transactions; everything else is a
                // duplicate.
                Some(BlockState::Unassociated) if D::IS_BLOCK => {}
                _ => {
                    return (
                        OrganizeOutcome::new(OrganizeCode::Duplicate, height),
                        Vec::new(),
                    );
                }
            }
        }

        let header = entry.entry_header();
        let Some(parent) = self.get_state(&header.previous_hash) else {
            return (OrganizeOutcome::new(OrganizeCode::Orphan, 0), Vec::new());
        };

        // Roll chain state forward from previous to current header.
        let state = ChainState::from_parent(&parent, header);
        let height = state.height();

        if state.forks() != parent.forks() {
            info!(
                height,
                "fork flags changed {:#x} -> {:#x}",
                parent.forks(),
                state.forks()
            );
        }
        if state.minimum_block_version() != parent.minimum_block_version() {
            info!(
                height,
                "minimum block version {} -> {}",
                parent.minimum_block_version(),
                state.minimum_block_version()
            );
        }

        // Validate.
        // --------------------------------------------------------------
        // Checkpoints are chain validation, not header validation.

        if checkpoint::is_conflict(&self.bitcoin.checkpoints, &hash, height) {
            return (
                OrganizeOutcome::new(OrganizeCode::CheckpointConflict, height),
                Vec::new(),
            );
        }

        if let Err(error) = D::validate(&entry, &state, &self.bitcoin) {
            warn!(height, %hash, %error, "invalid entry");
            return (
                OrganizeOutcome::new(OrganizeCode::Invalid(error), height),
                Vec::new(),
            );
        }

        // A checkpointed or milestoned branch always gets stored.
        // Otherwise the branch must be both current and of sufficient
        // chain work.
        let pinned = checkpoint::is_at(&self.bitcoin.checkpoints, height)
            || self.bitcoin.milestone.map(|m| m.equals(&hash, height)).unwrap_or(false);
        if !pinned
            && !(self.is_current(header) && state.cumulative_work() >= self.bitcoin.minimum_work)
        {
            self.tree.insert(entry, state);
            return (
                OrganizeOutcome::new(OrganizeCode::Success, height),
                Vec::new(),
            );
        }

        // Compute relative work.
        // --------------------------------------------------------------

        let Some((work, point, tree_branch, store_branch)) = self.get_branch_work(header) else {
            return self.fatal(height);
        };

        let Some(strong) = self.get_is_strong(&work, point) else {
            return self.fatal(height);
        };

        if !strong {
            // Entry is the new top of a current weak branch.
            self.tree.insert(entry, state);
            return (
                OrganizeOutcome::new(OrganizeCode::Success, height),
                Vec::new(),
            );
        }

        // Reorganize the candidate chain.
        // --------------------------------------------------------------

        let top = match self.top_state.as_ref() {
            Some(state) => state.height(),
            None => return self.fatal(height),
        };
        if top < point {
            return self.fatal(height);
        }

        let popped: Vec<HeaderLink> =
            ((point + 1)..=top).map(|h| self.archive.to_candidate(h)).collect();

        let mut events = Vec::new();

        // Pop down to the branch point.
        for _ in &popped {
            if !self.archive.pop_candidate() {
                return self.fatal(height);
            }
        }
        if !popped.is_empty() {
            debug!(branch_point = point, count = popped.len(), "candidates reorganized");
            events.push(ChaseEvent::Regressed { branch_point: point });
        }

        // Push stored strong headers to the candidate chain.
        for link in store_branch.iter().rev() {
            if !self.archive.push_candidate(*link) {
                return self.fatal(height);
            }
            debug!(%link, "stored branch organized");
        }

        // Store strong tree entries and push to the candidate chain.
        for key in tree_branch.iter().rev() {
            if !self.push_tree_entry(key) {
                return self.fatal(height);
            }
            debug!(%key, "tree branch archived");
        }

        // Push the new entry as top of the candidate chain.
        let link = D::set_link(self.archive.as_ref(), &entry, &state.context());
        if link.is_terminal() || !self.archive.push_candidate(link) {
            return self.fatal(height);
        }

        // Displaced candidates return to the tree so a future stronger
        // strand can reuse them.
        self.repopulate_tree(point, &popped);

        self.top_state = Some(state);

        if D::IS_BLOCK || self.is_current(header) {
            events.push(D::organized_event(point));
        }

        (OrganizeOutcome::new(OrganizeCode::Success, height), events)
    }

    /// Handle a candidate block declared bad below the top: pop and
    /// mark everything above it, reset to the fork point, and restore
    /// the confirmed chain.
    pub fn disorganize(&mut self, link: HeaderLink) -> (OrganizeCode, Vec<ChaseEvent>) {
        if self.closed {
            return (OrganizeCode::Stopped, Vec::new());
        }

        // Stale notification: the link already reorganized away.
        if !self.archive.is_candidate_block(link) {
            return (OrganizeCode::Success, Vec::new());
        }

        let Some(height) = self.archive.get_height(link) else {
            self.close();
            return (OrganizeCode::StoreIntegrity, Vec::new());
        };

        let fork_point = self.archive.get_fork();
        if height <= fork_point {
            // Confirmed blocks cannot become unconfirmable.
            self.close();
            return (OrganizeCode::InternalError, Vec::new());
        }

        let top_candidate = self.archive.get_top_candidate();
        let branch: Vec<HeaderLink> = ((fork_point + 1)..=top_candidate)
            .map(|h| self.archive.to_candidate(h))
            .collect();

        // Mark and pop everything above the offender.
        for h in ((height + 1)..=top_candidate).rev() {
            let candidate = self.archive.to_candidate(h);
            if !self.archive.set_block_unconfirmable(candidate) || !self.archive.pop_candidate() {
                self.close();
                return (OrganizeCode::StoreIntegrity, Vec::new());
            }
        }

        // The notifier already marked the offender; pop it too, then
        // unwind the remaining unconfirmed candidates.
        for _ in fork_point..height {
            if !self.archive.pop_candidate() {
                self.close();
                return (OrganizeCode::StoreIntegrity, Vec::new());
            }
        }
        info!(height, fork_point, "blocks disorganized");

        let Some(fork_state) = self.archive.get_candidate_chain_state(&self.bitcoin, fork_point)
        else {
            self.close();
            return (OrganizeCode::StoreIntegrity, Vec::new());
        };
        self.top_state = Some(fork_state);

        // Previously-candidate entries go back to the tree for reuse.
        self.repopulate_tree(fork_point, &branch);

        // Restore confirmed headers to the candidate chain.
        let top_confirmed = self.archive.get_top_confirmed();
        for h in (fork_point + 1)..=top_confirmed {
            let confirmed = self.archive.to_confirmed(h);
            if !self.archive.push_candidate(confirmed) {
                self.close();
                return (OrganizeCode::StoreIntegrity, Vec::new());
            }
        }
        if top_confirmed > fork_point {
            self.top_state = self.archive.get_candidate_chain_state(&self.bitcoin, top_confirmed);
        }

        (
            OrganizeCode::Success,
            vec![ChaseEvent::Disorganized { top_confirmed }],
        )
    }

    /// Resolve the chain state of a parent hash: cached top, else
    /// tree, else a full candidate-chain scan.
    fn get_state(&self, hash: &Hash) -> Option<Arc<ChainState>> {
        let top = self.top_state.as_ref()?;
        if top.hash() == *hash {
            return Some(top.clone());
        }

        if let Some(node) = self.tree.get(hash) {
            return Some(node.state.clone());
        }

        let link = self.archive.to_header(hash);
        let height = self.archive.get_height(link)?;
        self.archive.get_candidate_chain_state(&self.bitcoin, height)
    }

    fn is_current(&self, header: &Header) -> bool {
        if !self.node.use_currency_window() {
            return true;
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let window = self.node.currency_window().as_secs();
        header.timestamp >= now.saturating_sub(window)
    }

    /// Walk parents through the tree and then the store down to the
    /// candidate chain, summing branch proof. The branch point is the
    /// height of the first candidate ancestor.
    fn get_branch_work(
        &self,
        header: &Header,
    ) -> Option<(Work, Height, Vec<Hash>, Vec<HeaderLink>)> {
        let mut work = header.proof();
        let mut previous = header.previous_hash;

        let mut tree_branch = Vec::new();
        while let Some(node) = self.tree.get(&previous) {
            let ancestor = node.entry.entry_header();
            tree_branch.push(node.entry.entry_hash());
            work += ancestor.proof();
            previous = ancestor.previous_hash;
        }

        let mut store_branch = Vec::new();
        let mut link = self.archive.to_header(&previous);
        while !self.archive.is_candidate_block(link) {
            if link.is_terminal() {
                return None;
            }
            let bits = self.archive.get_bits(link)?;
            store_branch.push(link);
            work += obelisk_common::work::proof(bits);
            link = self.archive.to_parent(link);
        }

        let point = self.archive.get_height(link)?;
        Some((work, point, tree_branch, store_branch))
    }

    // ************************************************************************
    // CONSENSUS: a branch with strictly greater work reorganizes the
    // candidate chain; equal work leaves the current candidate in place.
    // ************************************************************************
    fn get_is_strong(&self, work: &Work, point: Height) -> Option<bool> {
        let mut candidate_work = Work::ZERO;
        for height in ((point + 1)..=self.archive.get_top_candidate()).rev() {
            let bits = self.archive.get_bits(self.archive.to_candidate(height))?;
            candidate_work += obelisk_common::work::proof(bits);
            if candidate_work >= *work {
                return Some(false);
            }
        }
        Some(true)
    }

    /// Promote a tree entry into the archive and onto the candidate chain.
    fn push_tree_entry(&mut self, key: &Hash) -> bool {
        let Some(node) = self.tree.extract(key) else {
            return false;
        };
        let link = D::set_link(self.archive.as_ref(), &node.entry, &node.state.context());
        !link.is_terminal() && self.archive.push_candidate(link)
    }

    /// Re-insert displaced candidate entries into the tree, rolling a
    /// fresh chain state forward from the branch point.
    fn repopulate_tree(&mut self, point: Height, links: &[HeaderLink]) {
        if links.is_empty() {
            return;
        }
        let Some(mut state) = self.archive.get_candidate_chain_state(&self.bitcoin, point) else {
            return;
        };
        for link in links {
            let Some(entry) = D::fetch(self.archive.as_ref(), *link) else {
                // Unassociated headers have nothing to reuse on the
                // block path.
                return;
            };
            state = ChainState::from_parent(&state, entry.entry_header());
            self.tree.insert(entry, state.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegate::HeaderPolicy;
    use obelisk_archive::MemoryArchive;
    use obelisk_common::{checkpoint::Checkpoint, work, BlockState};

    const EASY_BITS: u32 = 0x207fffff;
    // Meets the target with fewer leading-zero bits, so mining needs
    // more attempts but each header carries more proof.
    const HARD_BITS: u32 = 0x2000ffff;

    fn mine(mut header: Header) -> Header {
        let target = work::expand_compact(header.bits).expect("valid bits");
        while work::to_number(&header.hash()) > target {
            header.nonce += 1;
        }
        header
    }

    fn child(previous: &Header, bits: u32, salt: u32) -> Header {
        mine(Header {
            version: 1,
            previous_hash: previous.hash(),
            merkle_root: Hash::ZERO,
            timestamp: previous.timestamp + 600,
            bits,
            nonce: salt * 100_000,
        })
    }

    struct Fixture {
        organizer: Organizer<HeaderPolicy>,
        archive: Arc<MemoryArchive>,
        genesis: Header,
    }

    fn fixture_with(bitcoin: BitcoinSettings) -> Fixture {
        let genesis = bitcoin.genesis_header();
        let archive = Arc::new(MemoryArchive::new(genesis.clone()));
        let node = NodeSettings {
            currency_window_minutes: 0,
            ..Default::default()
        };
        let mut organizer = Organizer::new(archive.clone(), bitcoin, node);
        organizer.start().unwrap();
        Fixture {
            organizer,
            archive,
            genesis,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(BitcoinSettings::default())
    }

    #[test]
    fn linear_extension_advances_top() {
        let mut fx = fixture();
        let h1 = child(&fx.genesis, EASY_BITS, 0);

        let (outcome, events) = fx.organizer.organize(Arc::new(h1.clone()));
        assert_eq!(outcome, OrganizeOutcome::new(OrganizeCode::Success, 1));
        assert_eq!(events, vec![ChaseEvent::Header { branch_point: 0 }]);
        assert_eq!(fx.archive.get_top_candidate(), 1);
        assert_eq!(fx.organizer.top_state().unwrap().hash(), h1.hash());

        // Second admission of the same header is a duplicate.
        let (outcome, events) = fx.organizer.organize(Arc::new(h1));
        assert_eq!(outcome, OrganizeOutcome::new(OrganizeCode::Duplicate, 1));
        assert!(events.is_empty());
        assert_eq!(fx.archive.get_top_candidate(), 1);
    }

    #[test]
    fn unknown_parent_is_an_orphan() {
        let mut fx = fixture();
        let mut stray = child(&fx.genesis, EASY_BITS, 0);
        stray.previous_hash = Hash::new([9u8; 32]);
        let stray = mine(stray);

        let (outcome, _) = fx.organizer.organize(Arc::new(stray));
        assert_eq!(outcome.code, OrganizeCode::Orphan);
    }

    #[test]
    fn equal_work_fork_is_weak() {
        let mut fx = fixture();
        let h1 = child(&fx.genesis, EASY_BITS, 0);
        fx.organizer.organize(Arc::new(h1.clone()));

        // Same parent, same bits: identical proof, so the branch is
        // weak and only cached.
        let rival = child(&fx.genesis, EASY_BITS, 1);
        assert_ne!(rival.hash(), h1.hash());
        let (outcome, events) = fx.organizer.organize(Arc::new(rival.clone()));
        assert_eq!(outcome, OrganizeOutcome::new(OrganizeCode::Success, 1));
        assert!(events.is_empty());
        assert!(fx.organizer.tree_contains(&rival.hash()));
        assert_eq!(fx.archive.to_candidate(1), fx.archive.to_header(&h1.hash()));
    }

    #[test]
    fn stronger_fork_reorganizes() {
        let mut fx = fixture();
        let h1 = child(&fx.genesis, EASY_BITS, 0);
        fx.organizer.organize(Arc::new(h1.clone()));

        let rival1 = child(&fx.genesis, EASY_BITS, 1);
        fx.organizer.organize(Arc::new(rival1.clone()));

        // Extending the cached fork tips total work above the
        // candidate's: reorganization.
        let rival2 = child(&rival1, EASY_BITS, 2);
        let (outcome, events) = fx.organizer.organize(Arc::new(rival2.clone()));
        assert_eq!(outcome, OrganizeOutcome::new(OrganizeCode::Success, 2));
        assert_eq!(
            events,
            vec![
                ChaseEvent::Regressed { branch_point: 0 },
                ChaseEvent::Header { branch_point: 0 },
            ]
        );

        assert_eq!(fx.archive.get_top_candidate(), 2);
        assert_eq!(fx.archive.to_candidate(1), fx.archive.to_header(&rival1.hash()));
        assert_eq!(fx.archive.to_candidate(2), fx.archive.to_header(&rival2.hash()));

        // The displaced candidate is evicted to the tree.
        assert!(fx.organizer.tree_contains(&h1.hash()));
        assert!(!fx.organizer.tree_contains(&rival1.hash()));
        assert_eq!(fx.organizer.top_state().unwrap().hash(), rival2.hash());
    }

    #[test]
    fn single_header_with_more_work_reorganizes() {
        let mut fx = fixture();
        let h1 = child(&fx.genesis, EASY_BITS, 0);
        fx.organizer.organize(Arc::new(h1.clone()));

        let heavy = child(&fx.genesis, HARD_BITS, 1);
        let (outcome, _) = fx.organizer.organize(Arc::new(heavy.clone()));
        assert_eq!(outcome.code, OrganizeCode::Success);
        assert_eq!(fx.archive.to_candidate(1), fx.archive.to_header(&heavy.hash()));
        assert!(fx.organizer.tree_contains(&h1.hash()));
    }

    #[test]
    fn checkpoint_conflict_is_rejected() {
        let h1;
        let mut bitcoin = BitcoinSettings::default();
        {
            let genesis = bitcoin.genesis_header();
            h1 = child(&genesis, EASY_BITS, 0);
        }
        bitcoin.checkpoints = vec![Checkpoint::new(Hash::new([7u8; 32]), 1)];
        let mut fx = fixture_with(bitcoin);

        let (outcome, _) = fx.organizer.organize(Arc::new(h1));
        assert_eq!(outcome, OrganizeOutcome::new(OrganizeCode::CheckpointConflict, 1));
        assert_eq!(fx.archive.get_top_candidate(), 0);
    }

    #[test]
    fn checkpointed_header_is_stored_despite_low_work() {
        let mut bitcoin = BitcoinSettings::default();
        // Work floor no chain here can reach.
        bitcoin.minimum_work = Work::from(1u8) << 200;
        let genesis = bitcoin.genesis_header();
        let h1 = child(&genesis, EASY_BITS, 0);
        bitcoin.checkpoints = vec![Checkpoint::new(h1.hash(), 1)];
        let mut fx = fixture_with(bitcoin);

        let (outcome, _) = fx.organizer.organize(Arc::new(h1.clone()));
        assert_eq!(outcome.code, OrganizeCode::Success);
        assert_eq!(fx.archive.get_top_candidate(), 1);

        // An unpinned sibling with the same low work only reaches the tree.
        let h2 = child(&h1, EASY_BITS, 1);
        let (outcome, _) = fx.organizer.organize(Arc::new(h2.clone()));
        assert_eq!(outcome.code, OrganizeCode::Success);
        assert!(fx.organizer.tree_contains(&h2.hash()));
        assert_eq!(fx.archive.get_top_candidate(), 1);
    }

    #[test]
    fn invalid_proof_of_work_is_rejected() {
        let mut fx = fixture();
        let mut bad = child(&fx.genesis, EASY_BITS, 0);
        bad.bits = 0; // degenerate compact
        let (outcome, _) = fx.organizer.organize(Arc::new(bad));
        assert!(matches!(outcome.code, OrganizeCode::Invalid(_)));
    }

    #[test]
    fn stopped_organizer_refuses_admission() {
        let mut fx = fixture();
        fx.organizer.handle_stop();
        let h1 = child(&fx.genesis, EASY_BITS, 0);
        let (outcome, _) = fx.organizer.organize(Arc::new(h1));
        assert_eq!(outcome.code, OrganizeCode::Stopped);
        assert_eq!(fx.organizer.tree_len(), 0);
    }

    #[test]
    fn disorganize_resets_to_confirmed_top() {
        let mut fx = fixture();
        let mut chain = vec![fx.genesis.clone()];
        for i in 0..4 {
            let next = child(chain.last().unwrap(), EASY_BITS, i);
            let (outcome, _) = fx.organizer.organize(Arc::new(next.clone()));
            assert_eq!(outcome.code, OrganizeCode::Success);
            chain.push(next);
        }
        assert_eq!(fx.archive.get_top_candidate(), 4);

        // Preconfirmation found the block at height 2 bad and marked it.
        let bad = fx.archive.to_candidate(2);
        assert!(fx.archive.set_block_unconfirmable(bad));

        let (code, events) = fx.organizer.disorganize(bad);
        assert_eq!(code, OrganizeCode::Success);
        assert_eq!(events, vec![ChaseEvent::Disorganized { top_confirmed: 0 }]);

        // Candidate chain reset to the confirmed top (genesis).
        assert_eq!(fx.archive.get_top_candidate(), 0);
        assert_eq!(fx.organizer.top_state().unwrap().height(), 0);

        // Everything above the offender was marked on the way down.
        for header in &chain[3..] {
            let link = fx.archive.to_header(&header.hash());
            assert_eq!(fx.archive.get_block_state(link), Some(BlockState::Unconfirmable));
        }

        // Displaced candidates are reusable from the tree.
        assert_eq!(fx.organizer.tree_len(), 4);
        assert!(fx.organizer.tree_contains(&chain[1].hash()));
    }

    #[test]
    fn disorganize_ignores_non_candidates() {
        let mut fx = fixture();
        let h1 = child(&fx.genesis, EASY_BITS, 0);
        fx.organizer.organize(Arc::new(h1));

        let (code, events) = fx.organizer.disorganize(HeaderLink(9999));
        assert_eq!(code, OrganizeCode::Success);
        assert!(events.is_empty());
        assert_eq!(fx.archive.get_top_candidate(), 1);
    }

    #[test]
    fn disorganize_below_fork_point_is_fatal() {
        let mut fx = fixture();
        let genesis_link = fx.archive.to_candidate(0);
        let (code, _) = fx.organizer.disorganize(genesis_link);
        assert_eq!(code, OrganizeCode::InternalError);
        assert!(fx.organizer.closed());
    }

    #[test]
    fn non_current_header_is_cached_not_stored() {
        let bitcoin = BitcoinSettings::default();
        let genesis = bitcoin.genesis_header();
        let archive = Arc::new(MemoryArchive::new(genesis.clone()));
        // Currency window on: 2009-era timestamps are far from current.
        let node = NodeSettings::default();
        let mut organizer: Organizer<HeaderPolicy> =
            Organizer::new(archive.clone(), bitcoin, node);
        organizer.start().unwrap();

        let h1 = child(&genesis, EASY_BITS, 0);
        let (outcome, events) = organizer.organize(Arc::new(h1.clone()));
        assert_eq!(outcome.code, OrganizeCode::Success);
        assert!(events.is_empty());
        assert!(organizer.tree_contains(&h1.hash()));
        assert_eq!(archive.get_top_candidate(), 0);
    }
}
