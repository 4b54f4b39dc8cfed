//! Per-peer header-first sync: request header batches, validate them
//! against a rolling chain state, and hand them to the organizer.

use std::sync::Arc;

use obelisk_archive::Archive;
use obelisk_common::{
    chain::Header,
    chain_state::ChainState,
    checkpoint,
    settings::BitcoinSettings,
};
use tracing::{debug, info};

use crate::{
    connection::StopReason,
    wire::{locator_heights, Locator, WireMessage, MAX_GET_HEADERS},
};

/// What to do after a validated batch.
pub struct HeadersDisposition {
    /// Headers to organize, in receipt order.
    pub organize: Vec<Header>,
    /// The next locator when the peer likely has more.
    pub next_request: Option<WireMessage>,
}

pub struct HeaderIn {
    bitcoin: BitcoinSettings,
    /// Rolling state; eliminates store lookups per header.
    state: Arc<ChainState>,
}

impl HeaderIn {
    /// Seed the rolling state from the archive's top candidate.
    /// Header sync is always against the candidate chain.
    pub fn start(archive: &dyn Archive, bitcoin: BitcoinSettings) -> Option<Self> {
        let top = archive.get_top_candidate();
        let state = archive.get_candidate_chain_state(&bitcoin, top)?;
        Some(Self { bitcoin, state })
    }

    pub fn height(&self) -> u64 {
        self.state.height()
    }

    /// The initial `get_headers` request from the candidate chain.
    pub fn initial_request(archive: &dyn Archive) -> WireMessage {
        let heights = locator_heights(archive.get_top_candidate());
        WireMessage::GetHeaders(Locator {
            hashes: archive.get_candidate_hashes(&heights),
            stop: Default::default(),
        })
    }

    /// Validate one batch in order. Any violation indicts the peer;
    /// organization outcomes do not.
    pub fn handle_headers(
        &mut self,
        headers: &[Header],
    ) -> Result<HeadersDisposition, StopReason> {
        debug!(count = headers.len(), "headers received");
        let mut organize = Vec::with_capacity(headers.len());

        for header in headers {
            let hash = header.hash();

            // Out of order or forking from an unannounced parent.
            if header.previous_hash != self.state.hash() {
                debug!(%hash, "orphan header in batch");
                return Err(StopReason::ProtocolViolation);
            }

            if header
                .check(
                    self.bitcoin.timestamp_limit_seconds,
                    self.bitcoin.proof_of_work_limit,
                    self.bitcoin.scrypt_proof_of_work,
                )
                .is_err()
            {
                return Err(StopReason::ProtocolViolation);
            }

            // Checkpoints are chain validation, not header validation.
            if checkpoint::is_conflict(&self.bitcoin.checkpoints, &hash, self.state.height() + 1) {
                return Err(StopReason::ProtocolViolation);
            }

            // Rolling forward chain state eliminates database cost.
            self.state = ChainState::from_parent(&self.state, header);

            if header.accept(&self.state.context()).is_err() {
                return Err(StopReason::ProtocolViolation);
            }

            if self.state.height() % 1000 == 0 {
                info!(height = self.state.height(), "header sync progress");
            }

            organize.push(header.clone());
        }

        // A full response presumes more; anything less means caught up.
        let next_request = if headers.len() == MAX_GET_HEADERS {
            let last = headers.last().expect("non-empty batch").hash();
            Some(WireMessage::GetHeaders(Locator {
                hashes: vec![last],
                stop: Default::default(),
            }))
        } else {
            info!(height = self.state.height(), "headers complete");
            None
        };

        Ok(HeadersDisposition {
            organize,
            next_request,
        })
    }
}
