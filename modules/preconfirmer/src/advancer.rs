//! In-order validation advance over the candidate chain.
//!
//! Blocks arrive and are archived out of order; this machine advances
//! a single watermark, `validated`, through accept + connect as the
//! gaps fill in. Redundant bumps are harmless by construction.

use std::sync::Arc;

use obelisk_archive::Archive;
use obelisk_common::{
    chain::ValidateError,
    messages::ChaseEvent,
    settings::BitcoinSettings,
    BlockState, HeaderLink, Height,
};
use tracing::{debug, warn};

enum Validation {
    /// Under the bypass height and not malleable; trusted.
    Bypass,
    /// A cached verdict short-circuits revalidation.
    Cached(BlockState),
    /// Freshly passed accept + connect.
    Valid,
    /// Failed validation.
    Invalid(ValidateError),
    /// Archive inconsistency; fatal.
    StoreIntegrity,
}

pub struct Advancer {
    archive: Arc<dyn Archive>,
    bitcoin: BitcoinSettings,
    /// Highest height for which accept + connect has succeeded.
    validated: Height,
    closed: bool,
}

impl Advancer {
    pub fn new(archive: Arc<dyn Archive>, bitcoin: BitcoinSettings) -> Self {
        Self {
            archive,
            bitcoin,
            validated: 0,
            closed: false,
        }
    }

    pub fn start(&mut self) {
        self.validated = self.archive.get_fork();
    }

    pub fn validated(&self) -> Height {
        self.validated
    }

    pub fn closed(&self) -> bool {
        self.closed
    }

    pub fn handle_stop(&mut self) {
        self.closed = true;
    }

    /// A block was checked and archived at the given height.
    pub fn handle_checked(&mut self, height: Height) -> Vec<ChaseEvent> {
        if height == self.validated + 1 {
            self.bump()
        } else {
            Vec::new()
        }
    }

    /// The candidate chain was rewound to the branch point.
    pub fn handle_regressed(&mut self, branch_point: Height) -> Vec<ChaseEvent> {
        if branch_point < self.validated {
            self.validated = branch_point;
        }
        self.bump()
    }

    /// The candidate chain was fully reverted to the confirmed top.
    pub fn handle_disorganized(&mut self, top_confirmed: Height) -> Vec<ChaseEvent> {
        self.validated = top_confirmed;
        self.bump()
    }

    /// Drain: validate candidate blocks in height order for as long as
    /// they are associated.
    pub fn bump(&mut self) -> Vec<ChaseEvent> {
        let mut events = Vec::new();

        loop {
            if self.closed {
                return events;
            }
            let height = self.validated + 1;

            // Precondition (associated).
            let link = self.archive.to_candidate(height);
            if !self.archive.is_associated(link) {
                return events;
            }

            // Accept/connect the block.
            match self.validate(link, height) {
                Validation::Bypass | Validation::Cached(BlockState::Preconfirmable)
                | Validation::Cached(BlockState::Confirmable) => {
                    self.validated += 1;
                    debug!(height, "validation bypassed");
                    events.push(ChaseEvent::Preconfirmable { height });
                }
                Validation::Valid => {
                    // Commit validation metadata before advancing.
                    if !self.archive.set_txs_connected(link)
                        || !self.archive.set_block_preconfirmable(link)
                    {
                        self.closed = true;
                        events.push(ChaseEvent::Stop);
                        return events;
                    }
                    self.validated += 1;
                    debug!(height, "block validated");
                    events.push(ChaseEvent::Preconfirmable { height });
                }
                Validation::StoreIntegrity => {
                    self.closed = true;
                    events.push(ChaseEvent::Stop);
                    return events;
                }
                Validation::Cached(BlockState::Unconfirmable) => {
                    // Already marked; just renotify and halt.
                    warn!(height, "unpreconfirmed block (cached)");
                    events.push(ChaseEvent::Unpreconfirmable { link });
                    return events;
                }
                Validation::Cached(_) => {
                    // Associated-but-unvalidated is not a cached verdict.
                    self.closed = true;
                    events.push(ChaseEvent::Stop);
                    return events;
                }
                Validation::Invalid(error) => {
                    if self.archive.is_malleable(link) {
                        // The header chain will receive a replacement
                        // block; do not condemn the link.
                        warn!(height, %error, "malleated block");
                        events.push(ChaseEvent::Malleated { link });
                    } else {
                        if !self.archive.set_block_unconfirmable(link) {
                            self.closed = true;
                            events.push(ChaseEvent::Stop);
                            return events;
                        }
                        warn!(height, %error, "unpreconfirmed block");
                        events.push(ChaseEvent::Unpreconfirmable { link });
                    }
                    return events;
                }
            }
        }
    }

    fn validate(&self, link: HeaderLink, height: Height) -> Validation {
        if height <= self.bitcoin.bypass_height() && !self.archive.is_malleable(link) {
            return Validation::Bypass;
        }

        match self.archive.get_block_state(link) {
            Some(
                state @ (BlockState::Confirmable
                | BlockState::Unconfirmable
                | BlockState::Preconfirmable),
            ) => return Validation::Cached(state),
            _ => {}
        }

        let Some(block) = self.archive.get_block(link) else {
            return Validation::StoreIntegrity;
        };
        let Some(context) = self.archive.get_context(link) else {
            return Validation::StoreIntegrity;
        };

        if !self.archive.populate(&block) {
            return Validation::Invalid(ValidateError::MissingPreviousOutput);
        }

        if let Err(error) = block.accept(
            &context,
            self.bitcoin.subsidy_interval_blocks,
            self.bitcoin.initial_subsidy,
        ) {
            return Validation::Invalid(error);
        }
        if let Err(error) = block.connect(&context) {
            return Validation::Invalid(error);
        }

        Validation::Valid
    }
}
