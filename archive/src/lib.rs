//! Abstract chain archive.
//!
//! The archive holds header records addressed by [`HeaderLink`], the
//! candidate and confirmed chains as link sequences, block bodies, and
//! per-link validation state. Chasers and peer protocols treat it as a
//! shared, internally serialised collaborator: every query and
//! mutation is totally ordered with respect to the others.
//!
//! The persistent store behind this interface is out of scope here;
//! [`MemoryArchive`] is the reference implementation the node and the
//! tests run on.

mod memory;

pub use memory::MemoryArchive;

use std::sync::{Arc, OnceLock};

use obelisk_common::{
    associations::AssociationMap,
    chain::{Block, Header},
    chain_state::ChainState,
    settings::BitcoinSettings,
    BlockState, Context, Hash, HeaderLink, Height,
};

/// The abstract candidate/confirmed chain store.
///
/// Lookups that miss return `None` (or a terminal link); mutations
/// report success as `bool`. A `false` mutation is an archive
/// integrity violation and fatal to the caller.
pub trait Archive: Send + Sync {
    // Chain shape
    fn get_top_candidate(&self) -> Height;
    fn get_top_confirmed(&self) -> Height;
    /// Highest height at which candidate and confirmed chains agree.
    fn get_fork(&self) -> Height;
    fn to_candidate(&self, height: Height) -> HeaderLink;
    fn to_confirmed(&self, height: Height) -> HeaderLink;

    // Record lookups
    fn to_header(&self, hash: &Hash) -> HeaderLink;
    fn to_parent(&self, link: HeaderLink) -> HeaderLink;
    fn get_height(&self, link: HeaderLink) -> Option<Height>;
    fn get_bits(&self, link: HeaderLink) -> Option<u32>;
    fn get_header(&self, link: HeaderLink) -> Option<Header>;
    fn get_block(&self, link: HeaderLink) -> Option<Arc<Block>>;
    fn get_context(&self, link: HeaderLink) -> Option<Context>;
    /// State of the bare header record (associated or not).
    fn get_header_state(&self, link: HeaderLink) -> Option<BlockState>;
    /// Validation state of the block under the link.
    fn get_block_state(&self, link: HeaderLink) -> Option<BlockState>;
    fn is_header(&self, hash: &Hash) -> bool;
    fn is_candidate_block(&self, link: HeaderLink) -> bool;
    fn is_associated(&self, link: HeaderLink) -> bool;
    fn is_malleable(&self, link: HeaderLink) -> bool;

    // Derived queries
    /// Chain state of the candidate chain at the given height,
    /// rolled forward from genesis.
    fn get_candidate_chain_state(
        &self,
        settings: &BitcoinSettings,
        height: Height,
    ) -> Option<Arc<ChainState>>;
    /// Candidate-chain hashes at the given heights, for locators.
    fn get_candidate_hashes(&self, heights: &[Height]) -> Vec<Hash>;
    /// Up to `count` candidate headers above `start` whose blocks are
    /// not yet associated, in ascending height order.
    fn get_unassociated_above(&self, start: Height, count: usize) -> AssociationMap;
    /// Resolve a block's inputs against the store's output view.
    fn populate(&self, block: &Block) -> bool;

    // Mutations
    /// Store a header record; idempotent on re-store.
    fn set_link_header(&self, header: &Header, ctx: &Context) -> HeaderLink;
    /// Associate a block with its header record, creating the record
    /// when a context is supplied. Terminal on failure.
    fn set_link_block(&self, block: &Block, ctx: Option<&Context>) -> HeaderLink;
    fn push_candidate(&self, link: HeaderLink) -> bool;
    fn pop_candidate(&self) -> bool;
    fn push_confirmed(&self, link: HeaderLink) -> bool;
    fn set_block_unconfirmable(&self, link: HeaderLink) -> bool;
    fn set_block_preconfirmable(&self, link: HeaderLink) -> bool;
    fn set_txs_connected(&self, link: HeaderLink) -> bool;
}

static SHARED: OnceLock<Arc<MemoryArchive>> = OnceLock::new();

/// The process-wide archive handle, initialised from settings on
/// first use and shared by every module thereafter.
pub fn shared(settings: &BitcoinSettings) -> Arc<dyn Archive> {
    SHARED
        .get_or_init(|| Arc::new(MemoryArchive::new(settings.genesis_header())))
        .clone()
}
