//! The capability bundle distinguishing the header organizer from the
//! block organizer. The organize algorithm itself is identical; the
//! delegate supplies validation, duplicate policy, storage and the
//! event tag.

use std::sync::Arc;

use obelisk_archive::Archive;
use obelisk_common::{
    chain::{Block, ChainEntry, Header, ValidateError},
    chain_state::ChainState,
    messages::ChaseEvent,
    settings::BitcoinSettings,
    Context, HeaderLink, Height,
};

pub trait OrganizeDelegate: Send + 'static {
    type Entry: ChainEntry;

    /// Block organizers notify unconditionally and admit blocks for
    /// headers already archived as unassociated.
    const IS_BLOCK: bool;

    /// Context-free check plus contextual accept of the entry.
    fn validate(
        entry: &Self::Entry,
        state: &ChainState,
        settings: &BitcoinSettings,
    ) -> Result<(), ValidateError>;

    /// The chase event fired when this organizer extends the chain.
    fn organized_event(branch_point: Height) -> ChaseEvent;

    /// Store the entry under the given context.
    fn set_link(archive: &dyn Archive, entry: &Self::Entry, ctx: &Context) -> HeaderLink;

    /// Pull an archived entry back out, for tree reuse after a
    /// disorganization.
    fn fetch(archive: &dyn Archive, link: HeaderLink) -> Option<Arc<Self::Entry>>;
}

/// Header-first organization.
pub struct HeaderPolicy;

impl OrganizeDelegate for HeaderPolicy {
    type Entry = Header;

    const IS_BLOCK: bool = false;

    fn validate(
        header: &Header,
        state: &ChainState,
        settings: &BitcoinSettings,
    ) -> Result<(), ValidateError> {
        header.check(
            settings.timestamp_limit_seconds,
            settings.proof_of_work_limit,
            settings.scrypt_proof_of_work,
        )?;
        header.accept(&state.context())
    }

    fn organized_event(branch_point: Height) -> ChaseEvent {
        ChaseEvent::Header { branch_point }
    }

    fn set_link(archive: &dyn Archive, header: &Header, ctx: &Context) -> HeaderLink {
        archive.set_link_header(header, ctx)
    }

    fn fetch(archive: &dyn Archive, link: HeaderLink) -> Option<Arc<Header>> {
        archive.get_header(link).map(Arc::new)
    }
}

/// Full-block organization, used below the header-first activation.
pub struct BlockPolicy;

impl OrganizeDelegate for BlockPolicy {
    type Entry = Block;

    const IS_BLOCK: bool = true;

    fn validate(
        block: &Block,
        state: &ChainState,
        settings: &BitcoinSettings,
    ) -> Result<(), ValidateError> {
        block.header.check(
            settings.timestamp_limit_seconds,
            settings.proof_of_work_limit,
            settings.scrypt_proof_of_work,
        )?;
        block.check()?;
        let ctx = state.context();
        block.check_in_context(&ctx)?;
        block.accept(&ctx, settings.subsidy_interval_blocks, settings.initial_subsidy)
    }

    fn organized_event(branch_point: Height) -> ChaseEvent {
        ChaseEvent::Block { branch_point }
    }

    fn set_link(archive: &dyn Archive, block: &Block, ctx: &Context) -> HeaderLink {
        archive.set_link_block(block, Some(ctx))
    }

    fn fetch(archive: &dyn Archive, link: HeaderLink) -> Option<Arc<Block>> {
        archive.get_block(link)
    }
}
