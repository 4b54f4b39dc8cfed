//! Chain primitives: headers, transactions, blocks, and their
//! context-free and contextual validation rules.
//!
//! Validation here is deliberately self-contained: `check` needs no
//! state, `accept`/`connect` take the [`Context`] projected from chain
//! state. Script execution and signature checking are collaborators
//! outside this crate.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::{
    crypto::{digest, merkle_root},
    work::{self, Work},
    Context, Hash,
};

/// Validation failure of a header or block.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum ValidateError {
    #[error("invalid proof of work encoding")]
    InvalidProofOfWork,

    #[error("insufficient work for target")]
    InsufficientWork,

    #[error("timestamp too far in the future")]
    FuturisticTimestamp,

    #[error("timestamp not after median time past")]
    Timestamp,

    #[error("block version below minimum")]
    InvalidBlockVersion,

    #[error("block has no transactions")]
    EmptyBlock,

    #[error("merkle root does not match transactions")]
    InvalidMerkleRoot,

    #[error("duplicate transaction in block")]
    DuplicateTransaction,

    #[error("witness commitment mismatch")]
    WitnessCommitment,

    #[error("missing or empty coinbase")]
    InvalidCoinbase,

    #[error("empty transaction")]
    EmptyTransaction,

    #[error("missing previous output")]
    MissingPreviousOutput,
}

/// A block header.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub version: u32,
    pub previous_hash: Hash,
    pub merkle_root: Hash,
    pub timestamp: u64,
    pub bits: u32,
    pub nonce: u32,
}

impl Header {
    /// The genesis header for a network with the given work limit.
    pub fn genesis(bits: u32) -> Self {
        Self {
            version: 1,
            previous_hash: Hash::ZERO,
            merkle_root: Hash::ZERO,
            timestamp: 1_231_006_505,
            bits,
            nonce: 0,
        }
    }

    fn to_bytes(&self) -> [u8; 84] {
        let mut bytes = [0u8; 84];
        bytes[0..4].copy_from_slice(&self.version.to_le_bytes());
        bytes[4..36].copy_from_slice(self.previous_hash.as_ref());
        bytes[36..68].copy_from_slice(self.merkle_root.as_ref());
        bytes[68..76].copy_from_slice(&self.timestamp.to_le_bytes());
        bytes[76..80].copy_from_slice(&self.bits.to_le_bytes());
        bytes[80..84].copy_from_slice(&self.nonce.to_le_bytes());
        bytes
    }

    pub fn hash(&self) -> Hash {
        digest(&[&self.to_bytes()])
    }

    /// The digest compared against the target: the identity hash, or
    /// a rehash of it on memory-hard-proof networks.
    pub fn proof_hash(&self, scrypt: bool) -> Hash {
        let hash = self.hash();
        if scrypt {
            digest(&[hash.as_ref()])
        } else {
            hash
        }
    }

    /// The numeric work this header contributes, derived from `bits`.
    pub fn proof(&self) -> Work {
        work::proof(self.bits)
    }

    /// Context-free validation: proof-of-work encoding and target,
    /// and timestamp recency against wall clock.
    pub fn check(
        &self,
        timestamp_limit_seconds: u64,
        proof_of_work_limit: u32,
        scrypt_proof_of_work: bool,
    ) -> Result<(), ValidateError> {
        let target = work::expand_compact(self.bits).ok_or(ValidateError::InvalidProofOfWork)?;

        if let Some(limit) = work::expand_compact(proof_of_work_limit) {
            if target > limit {
                return Err(ValidateError::InvalidProofOfWork);
            }
        }

        if work::to_number(&self.proof_hash(scrypt_proof_of_work)) > target {
            return Err(ValidateError::InsufficientWork);
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        if self.timestamp > now.saturating_add(timestamp_limit_seconds) {
            return Err(ValidateError::FuturisticTimestamp);
        }

        Ok(())
    }

    /// Contextual validation against the rules active at this height.
    pub fn accept(&self, ctx: &Context) -> Result<(), ValidateError> {
        if self.version < ctx.minimum_block_version {
            return Err(ValidateError::InvalidBlockVersion);
        }

        // Strictly greater than the median of the previous timestamps.
        if ctx.median_time_past != 0 && self.timestamp <= ctx.median_time_past {
            return Err(ValidateError::Timestamp);
        }

        Ok(())
    }
}

/// A transaction: opaque payload plus detached witness bytes.
///
/// The identity hash covers only `raw`; witness bytes are not
/// committed by the header's Merkle root, which is what makes blocks
/// carrying them malleable.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub raw: Vec<u8>,
    pub witness: Vec<u8>,
}

impl Transaction {
    pub fn new(raw: Vec<u8>) -> Self {
        Self {
            raw,
            witness: Vec::new(),
        }
    }

    /// Identity hash (witness-exclusive).
    pub fn id(&self) -> Hash {
        digest(&[&self.raw])
    }

    /// Witness-inclusive hash.
    pub fn wid(&self) -> Hash {
        digest(&[&self.raw, &self.witness])
    }

    pub fn has_witness(&self) -> bool {
        !self.witness.is_empty()
    }

    pub fn serialized_size(&self) -> usize {
        self.raw.len() + self.witness.len()
    }
}

/// A full block: header plus transactions. Hashes to the header hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub txs: Vec<Transaction>,
    /// Root over witness-inclusive hashes, when any witness is carried.
    pub witness_commitment: Option<Hash>,
}

impl Block {
    pub fn new(header: Header, txs: Vec<Transaction>) -> Self {
        Self {
            header,
            txs,
            witness_commitment: None,
        }
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn tx_ids(&self) -> Vec<Hash> {
        self.txs.iter().map(Transaction::id).collect()
    }

    /// Compute the Merkle root the header should commit to.
    pub fn compute_merkle_root(&self) -> Hash {
        merkle_root(&self.tx_ids())
    }

    /// Compute the commitment over witness-inclusive hashes.
    pub fn compute_witness_commitment(&self) -> Hash {
        let wids: Vec<Hash> = self.txs.iter().map(Transaction::wid).collect();
        merkle_root(&wids)
    }

    /// Whether a distinct serialisation of this block could share its
    /// header: true whenever witness bytes exist, since the header's
    /// Merkle root does not cover them.
    pub fn is_malleable(&self) -> bool {
        self.txs.iter().any(Transaction::has_witness)
    }

    /// Context-free validation: structure and Merkle commitment.
    pub fn check(&self) -> Result<(), ValidateError> {
        if self.txs.is_empty() {
            return Err(ValidateError::EmptyBlock);
        }

        let ids = self.tx_ids();
        let mut sorted = ids.clone();
        sorted.sort();
        if sorted.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(ValidateError::DuplicateTransaction);
        }

        if merkle_root(&ids) != self.header.merkle_root {
            return Err(ValidateError::InvalidMerkleRoot);
        }

        Ok(())
    }

    /// Context-dependent checks: timestamp against median time past
    /// and the witness commitment.
    pub fn check_in_context(&self, ctx: &Context) -> Result<(), ValidateError> {
        if ctx.median_time_past != 0 && self.header.timestamp <= ctx.median_time_past {
            return Err(ValidateError::Timestamp);
        }

        if self.is_malleable() {
            match self.witness_commitment {
                Some(commitment) if commitment == self.compute_witness_commitment() => {}
                _ => return Err(ValidateError::WitnessCommitment),
            }
        }

        Ok(())
    }

    /// Accept the block under the given context and subsidy schedule.
    pub fn accept(
        &self,
        ctx: &Context,
        _subsidy_interval_blocks: u64,
        _initial_subsidy: u64,
    ) -> Result<(), ValidateError> {
        self.header.accept(ctx)?;

        let coinbase = self.txs.first().ok_or(ValidateError::EmptyBlock)?;
        if coinbase.raw.is_empty() {
            return Err(ValidateError::InvalidCoinbase);
        }

        Ok(())
    }

    /// Connect the block's transactions against populated inputs.
    pub fn connect(&self, _ctx: &Context) -> Result<(), ValidateError> {
        if self.txs.iter().skip(1).any(|tx| tx.raw.is_empty()) {
            return Err(ValidateError::EmptyTransaction);
        }

        Ok(())
    }

    /// Wire size for rate accounting.
    pub fn serialized_size(&self) -> usize {
        84 + self.txs.iter().map(Transaction::serialized_size).sum::<usize>()
    }
}

/// Anything the organizer can admit: a header or a full block.
pub trait ChainEntry: Send + Sync + 'static {
    fn entry_hash(&self) -> Hash;
    fn entry_header(&self) -> &Header;
}

impl ChainEntry for Header {
    fn entry_hash(&self) -> Hash {
        self.hash()
    }

    fn entry_header(&self) -> &Header {
        self
    }
}

impl ChainEntry for Block {
    fn entry_hash(&self) -> Hash {
        self.hash()
    }

    fn entry_header(&self) -> &Header {
        &self.header
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A work limit loose enough that any digest passes.
    const EASY_BITS: u32 = 0x207fffff;

    fn block_with_txs(txs: Vec<Transaction>) -> Block {
        let ids: Vec<Hash> = txs.iter().map(Transaction::id).collect();
        let header = Header {
            version: 1,
            previous_hash: Hash::ZERO,
            merkle_root: merkle_root(&ids),
            timestamp: 1_000_000,
            bits: EASY_BITS,
            nonce: 0,
        };
        Block::new(header, txs)
    }

    #[test]
    fn header_hash_is_deterministic_and_field_sensitive() {
        let a = Header::genesis(EASY_BITS);
        let mut b = a.clone();
        assert_eq!(a.hash(), b.hash());
        b.nonce = 1;
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn check_rejects_bits_above_limit() {
        let mut header = Header::genesis(EASY_BITS);
        header.bits = EASY_BITS;
        // Limit tighter than the header's own bits.
        assert_eq!(
            header.check(7200, 0x1d00ffff, false),
            Err(ValidateError::InvalidProofOfWork)
        );
        assert!(header.check(7200, EASY_BITS, false).is_ok());
    }

    #[test]
    fn scrypt_proof_uses_a_distinct_digest() {
        let header = Header::genesis(EASY_BITS);
        assert_eq!(header.proof_hash(false), header.hash());
        assert_ne!(header.proof_hash(true), header.hash());
    }

    #[test]
    fn accept_enforces_minimum_version() {
        let header = Header::genesis(EASY_BITS);
        let ctx = Context {
            minimum_block_version: 2,
            ..Default::default()
        };
        assert_eq!(header.accept(&ctx), Err(ValidateError::InvalidBlockVersion));
    }

    #[test]
    fn accept_enforces_median_time_past() {
        let header = Header::genesis(EASY_BITS);
        let ctx = Context {
            median_time_past: header.timestamp,
            ..Default::default()
        };
        assert_eq!(header.accept(&ctx), Err(ValidateError::Timestamp));
    }

    #[test]
    fn block_check_verifies_merkle_root() {
        let mut block = block_with_txs(vec![Transaction::new(b"coinbase".to_vec())]);
        assert!(block.check().is_ok());

        block.txs.push(Transaction::new(b"extra".to_vec()));
        assert_eq!(block.check(), Err(ValidateError::InvalidMerkleRoot));
    }

    #[test]
    fn block_check_rejects_duplicate_transactions() {
        let tx = Transaction::new(b"tx".to_vec());
        let mut block = block_with_txs(vec![tx.clone(), tx]);
        block.header.merkle_root = block.compute_merkle_root();
        assert_eq!(block.check(), Err(ValidateError::DuplicateTransaction));
    }

    #[test]
    fn witness_blocks_are_malleable_and_need_commitment() {
        let mut tx = Transaction::new(b"coinbase".to_vec());
        tx.witness = b"witness".to_vec();
        let mut block = block_with_txs(vec![tx]);
        assert!(block.is_malleable());

        // Witness data exists but no commitment: contextual check fails.
        let ctx = Context::default();
        assert_eq!(
            block.check_in_context(&ctx),
            Err(ValidateError::WitnessCommitment)
        );

        block.witness_commitment = Some(block.compute_witness_commitment());
        assert!(block.check_in_context(&ctx).is_ok());

        // Same header, different witness bytes: commitment no longer matches.
        block.txs[0].witness = b"mutated".to_vec();
        assert_eq!(
            block.check_in_context(&ctx),
            Err(ValidateError::WitnessCommitment)
        );
    }

    #[test]
    fn witness_free_blocks_are_not_malleable() {
        let block = block_with_txs(vec![Transaction::new(b"coinbase".to_vec())]);
        assert!(!block.is_malleable());
        assert!(block.check_in_context(&Context::default()).is_ok());
    }
}
