//! Block headers and blocks
//!
//! A block header carries its own proof of work: the header hash must not
//! exceed the compact target, and the target must be within the network's
//! proof-of-work limit.  Both are checked when a header is read from the
//! wire.  Chain placement (height, cumulative work, on-chain flag) is set by
//! the external chain layer.

use crate::buffer::SerializedBuffer;
use crate::error::{CoreError, Result};
use crate::hash::{object_hash, Hash256, U256};
use crate::merkle::merkle_root;
use crate::netparams::{self, ALLOWED_TIME_DRIFT, MAX_BLOCK_SIZE};
use crate::transaction::Transaction;

use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// Serialized block header length
pub const HEADER_SIZE: usize = 80;

fn now_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A block header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    version: i32,
    hash: Hash256,
    prev_hash: Hash256,
    merkle_root: Hash256,
    time: u64,
    target: u32,
    nonce: u32,
    on_chain: bool,
    height: u32,
    chain_work: U256,
    matches: Option<Vec<Hash256>>,
}

impl BlockHeader {
    /// Creates a header from its fields, computing the block hash
    pub fn new(
        version: i32,
        prev_hash: Hash256,
        merkle_root: Hash256,
        time: u64,
        target: u32,
        nonce: u32,
    ) -> BlockHeader {
        let mut header = BlockHeader {
            version,
            hash: Hash256::ZERO,
            prev_hash,
            merkle_root,
            time,
            target,
            nonce,
            on_chain: false,
            height: 0,
            chain_work: U256::ZERO,
            matches: None,
        };
        let mut buffer = SerializedBuffer::with_capacity(HEADER_SIZE);
        header.write(&mut buffer);
        header.hash = object_hash(buffer.as_slice());
        header
    }

    /// Reads an 80-byte header, computing the block hash from the
    /// serialized bytes and validating the proof of work when requested
    pub fn read(buffer: &mut SerializedBuffer, verify: bool) -> Result<BlockHeader> {
        buffer.set_start();
        let version = buffer.get_i32()?;
        let prev_hash = buffer.get_hash()?;
        let merkle_root = buffer.get_hash()?;
        let time = buffer.get_u32()? as u64;
        let target = buffer.get_u32()?;
        let nonce = buffer.get_u32()?;
        let hash = object_hash(buffer.segment());
        let header = BlockHeader {
            version,
            hash,
            prev_hash,
            merkle_root,
            time,
            target,
            nonce,
            on_chain: false,
            height: 0,
            chain_work: U256::ZERO,
            matches: None,
        };
        if verify {
            header.validate()?;
        }
        Ok(header)
    }

    /// Writes the 80-byte serialized header
    pub fn write(&self, buffer: &mut SerializedBuffer) {
        buffer.put_i32(self.version);
        buffer.put_hash(&self.prev_hash);
        buffer.put_hash(&self.merkle_root);
        buffer.put_u32(self.time as u32);
        buffer.put_u32(self.target);
        buffer.put_u32(self.nonce);
    }

    /// Validates the stated target and the proof of work.
    ///
    /// The target must be positive and within the network limit, the block
    /// hash must not exceed it numerically, and the block time must not be
    /// too far in the future.
    pub fn validate(&self) -> Result<()> {
        let params = netparams::params()?;
        let target = U256::from_compact(self.target);
        if target.is_zero() || target > params.proof_of_work_limit {
            return Err(CoreError::invalid_item(
                "target difficulty is not valid",
                self.hash.clone(),
            ));
        }
        if self.hash.to_u256() > target {
            return Err(CoreError::invalid_item(
                "block hash is higher than the target difficulty",
                self.hash.clone(),
            ));
        }
        if self.time > now_seconds() + ALLOWED_TIME_DRIFT {
            return Err(CoreError::invalid_item(
                "block timestamp is too far in the future",
                self.hash.clone(),
            ));
        }
        Ok(())
    }

    /// The amount of work this header represents: 2^256 / (target + 1)
    pub fn block_work(&self) -> U256 {
        U256::from_compact(self.target).work_from_target()
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn hash(&self) -> &Hash256 {
        &self.hash
    }

    pub fn prev_hash(&self) -> &Hash256 {
        &self.prev_hash
    }

    pub fn merkle_root(&self) -> &Hash256 {
        &self.merkle_root
    }

    pub fn time(&self) -> u64 {
        self.time
    }

    /// The compact target difficulty
    pub fn target(&self) -> u32 {
        self.target
    }

    pub fn nonce(&self) -> u32 {
        self.nonce
    }

    pub fn is_on_chain(&self) -> bool {
        self.on_chain
    }

    pub fn set_on_chain(&mut self, on_chain: bool) {
        self.on_chain = on_chain;
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn set_height(&mut self, height: u32) {
        self.height = height;
    }

    pub fn chain_work(&self) -> U256 {
        self.chain_work
    }

    pub fn set_chain_work(&mut self, chain_work: U256) {
        self.chain_work = chain_work;
    }

    /// Matched transaction hashes from a Merkle block
    pub fn matches(&self) -> Option<&[Hash256]> {
        self.matches.as_deref()
    }

    pub fn set_matches(&mut self, matches: Vec<Hash256>) {
        self.matches = Some(matches);
    }
}

/// A block: a header and the full ordered transaction list
#[derive(Debug, Clone)]
pub struct Block {
    header: BlockHeader,
    transactions: Vec<Transaction>,
    tx_hashes: OnceLock<Vec<Hash256>>,
}

impl Block {
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Block {
        Block {
            header,
            transactions,
            tx_hashes: OnceLock::new(),
        }
    }

    /// Reads a block: the header, a transaction count, and the
    /// transactions.  When verifying, the computed Merkle root must match
    /// the header and the block must not contain duplicate transactions.
    pub fn read(buffer: &mut SerializedBuffer, verify: bool) -> Result<Block> {
        let header = BlockHeader::read(buffer, verify)?;
        let tx_count = buffer.get_var_int()? as usize;
        if tx_count == 0 || tx_count > MAX_BLOCK_SIZE / 60 {
            return Err(CoreError::invalid_item(
                format!("block transaction count {} is not valid", tx_count),
                header.hash().clone(),
            ));
        }
        let mut transactions = Vec::with_capacity(tx_count.min(4096));
        for _ in 0..tx_count {
            transactions.push(Transaction::read(buffer)?);
        }
        let block = Block::new(header, transactions);
        if verify {
            block.validate()?;
        }
        Ok(block)
    }

    /// Writes the serialized block
    pub fn write(&self, buffer: &mut SerializedBuffer) {
        self.header.write(buffer);
        buffer.put_var_int(self.transactions.len() as u64);
        for tx in &self.transactions {
            tx.write(buffer);
        }
    }

    /// Checks the Merkle root against the header and rejects duplicate
    /// transactions
    pub fn validate(&self) -> Result<()> {
        let hashes = self.tx_hashes();
        for (i, hash) in hashes.iter().enumerate() {
            if hashes[..i].contains(hash) {
                return Err(CoreError::invalid_item(
                    "block contains a duplicate transaction",
                    self.header.hash().clone(),
                ));
            }
        }
        if &self.merkle_root() != self.header.merkle_root() {
            return Err(CoreError::invalid_item(
                "block merkle root is incorrect",
                self.header.hash().clone(),
            ));
        }
        Ok(())
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut BlockHeader {
        &mut self.header
    }

    pub fn hash(&self) -> &Hash256 {
        self.header.hash()
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// The ordered transaction hashes, computed once on first request
    pub fn tx_hashes(&self) -> &[Hash256] {
        self.tx_hashes
            .get_or_init(|| self.transactions.iter().map(|tx| tx.hash().clone()).collect())
    }

    /// The Merkle root over the transaction list
    pub fn merkle_root(&self) -> Hash256 {
        merkle_root(self.tx_hashes())
    }
}
