//! Merkle tree construction and the partial Merkle branch
//!
//! The tree commits to the ordered transaction list of a block.  Each level
//! pairs adjacent hashes, duplicating the last hash when a level has an odd
//! count, and hashes left‖right with double SHA-256 over the wire-order
//! bytes.
//!
//! The partial branch is the 'merkleblock' payload body: a depth-first
//! traversal emitting one flag bit per visited node and the hashes needed
//! to reconstruct the root for a subset of matched transactions.

use crate::buffer::SerializedBuffer;
use crate::error::{CoreError, Result};
use crate::hash::Hash256;
use crate::netparams::MAX_BLOCK_SIZE;

use bitcoin_hashes::{sha256d, Hash as BitcoinHash, HashEngine};

/// Hashes a pair of child nodes into their parent
fn combine(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut engine = sha256d::Hash::engine();
    engine.input(&left.to_wire_bytes());
    engine.input(&right.to_wire_bytes());
    Hash256::from_wire_bytes(&sha256d::Hash::from_engine(engine).to_byte_array())
}

/// Computes the Merkle root of an ordered list of transaction hashes.
///
/// A single-entry list is its own root.
pub fn merkle_root(tx_hashes: &[Hash256]) -> Hash256 {
    if tx_hashes.is_empty() {
        return Hash256::ZERO;
    }
    let mut layer = tx_hashes.to_vec();
    while layer.len() > 1 {
        if layer.len() % 2 == 1 {
            layer.push(layer[layer.len() - 1].clone());
        }
        layer = layer
            .chunks_exact(2)
            .map(|pair| combine(&pair[0], &pair[1]))
            .collect();
    }
    layer.remove(0)
}

/// A partial Merkle tree proving a subset of a block's transactions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleBranch {
    tx_count: u32,
    hashes: Vec<Hash256>,
    flags: Vec<u8>,
}

impl MerkleBranch {
    /// Builds the branch for the matched transaction indexes
    pub fn build(tx_hashes: &[Hash256], matched_indexes: &[usize]) -> MerkleBranch {
        let tx_count = tx_hashes.len() as u32;
        let height = tree_height(tx_count);
        let mut branch = MerkleBranch {
            tx_count,
            hashes: Vec::new(),
            flags: Vec::new(),
        };
        let mut bit_count = 0;
        build_node(
            height,
            0,
            tx_hashes,
            matched_indexes,
            &mut branch,
            &mut bit_count,
        );
        branch
    }

    /// Reads the branch from its wire form: 4-byte transaction count,
    /// var-int hash count and hashes, var-int flag byte count and flags
    pub fn read(buffer: &mut SerializedBuffer) -> Result<MerkleBranch> {
        let tx_count = buffer.get_u32()?;
        if tx_count == 0 || tx_count as usize > MAX_BLOCK_SIZE / 60 {
            return Err(CoreError::malformed(format!(
                "merkle branch transaction count {} is not valid",
                tx_count
            )));
        }
        let hash_count = buffer.get_var_int()? as usize;
        if hash_count > tx_count as usize {
            return Err(CoreError::malformed(
                "merkle branch has more hashes than transactions",
            ));
        }
        let mut hashes = Vec::with_capacity(hash_count);
        for _ in 0..hash_count {
            hashes.push(buffer.get_hash()?);
        }
        let flags = buffer.get_var_bytes()?;
        Ok(MerkleBranch {
            tx_count,
            hashes,
            flags,
        })
    }

    /// Writes the branch in its wire form
    pub fn write(&self, buffer: &mut SerializedBuffer) {
        buffer.put_u32(self.tx_count);
        buffer.put_var_int(self.hashes.len() as u64);
        for hash in &self.hashes {
            buffer.put_hash(hash);
        }
        buffer.put_var_bytes(&self.flags);
    }

    /// Total number of transactions in the block
    pub fn tx_count(&self) -> u32 {
        self.tx_count
    }

    /// Reconstructs the Merkle root, collecting the matched transaction
    /// hashes in leaf order
    pub fn calculate_root(&self, matches: &mut Vec<Hash256>) -> Result<Hash256> {
        let height = tree_height(self.tx_count);
        let mut cursor = BranchCursor {
            branch: self,
            bits_used: 0,
            hashes_used: 0,
        };
        let root = cursor.descend(height, 0, matches)?;
        // Every hash must be consumed, and no more than a byte of padding
        // bits may remain
        if cursor.hashes_used != self.hashes.len() {
            return Err(CoreError::invalid("merkle branch has unused hashes"));
        }
        if (cursor.bits_used + 7) / 8 != self.flags.len() {
            return Err(CoreError::invalid("merkle branch has unused flag bits"));
        }
        Ok(root)
    }

    fn flag(&self, index: usize) -> Result<bool> {
        let byte = self
            .flags
            .get(index / 8)
            .ok_or_else(|| CoreError::EndOfData("merkle branch flag bits exhausted".to_string()))?;
        Ok(byte & (1 << (index % 8)) != 0)
    }
}

/// Height of the tree over `tx_count` leaves (0 for a single transaction)
fn tree_height(tx_count: u32) -> u32 {
    let mut height = 0;
    while level_width(tx_count, height) > 1 {
        height += 1;
    }
    height
}

/// Number of nodes at the given height above the leaves
fn level_width(tx_count: u32, height: u32) -> u32 {
    (tx_count + (1 << height) - 1) >> height
}

fn build_node(
    height: u32,
    position: u32,
    tx_hashes: &[Hash256],
    matched: &[usize],
    branch: &mut MerkleBranch,
    bit_count: &mut usize,
) {
    // A node is marked when any leaf below it is matched
    let first_leaf = (position << height) as usize;
    let last_leaf = (((position + 1) << height) as usize).min(tx_hashes.len());
    let is_matched = matched
        .iter()
        .any(|&index| index >= first_leaf && index < last_leaf);
    if *bit_count % 8 == 0 {
        branch.flags.push(0);
    }
    if is_matched {
        let byte = *bit_count / 8;
        branch.flags[byte] |= 1 << (*bit_count % 8);
    }
    *bit_count += 1;
    if height == 0 || !is_matched {
        branch.hashes.push(node_hash(height, position, tx_hashes));
    } else {
        build_node(height - 1, position * 2, tx_hashes, matched, branch, bit_count);
        if position * 2 + 1 < level_width(tx_hashes.len() as u32, height - 1) {
            build_node(
                height - 1,
                position * 2 + 1,
                tx_hashes,
                matched,
                branch,
                bit_count,
            );
        }
    }
}

/// Hash of the tree node at (height, position), duplicating the last node
/// of an odd-width level
fn node_hash(height: u32, position: u32, tx_hashes: &[Hash256]) -> Hash256 {
    if height == 0 {
        return tx_hashes[position as usize].clone();
    }
    let left = node_hash(height - 1, position * 2, tx_hashes);
    let right = if position * 2 + 1 < level_width(tx_hashes.len() as u32, height - 1) {
        node_hash(height - 1, position * 2 + 1, tx_hashes)
    } else {
        left.clone()
    };
    combine(&left, &right)
}

struct BranchCursor<'a> {
    branch: &'a MerkleBranch,
    bits_used: usize,
    hashes_used: usize,
}

impl BranchCursor<'_> {
    fn next_hash(&mut self) -> Result<Hash256> {
        let hash = self
            .branch
            .hashes
            .get(self.hashes_used)
            .cloned()
            .ok_or_else(|| CoreError::EndOfData("merkle branch hashes exhausted".to_string()))?;
        self.hashes_used += 1;
        Ok(hash)
    }

    fn descend(&mut self, height: u32, position: u32, matches: &mut Vec<Hash256>) -> Result<Hash256> {
        let flag = self.branch.flag(self.bits_used)?;
        self.bits_used += 1;
        if height == 0 {
            let hash = self.next_hash()?;
            if flag {
                matches.push(hash.clone());
            }
            return Ok(hash);
        }
        if !flag {
            return self.next_hash();
        }
        let left = self.descend(height - 1, position * 2, matches)?;
        let right = if position * 2 + 1 < level_width(self.branch.tx_count, height - 1) {
            self.descend(height - 1, position * 2 + 1, matches)?
        } else {
            left.clone()
        };
        Ok(combine(&left, &right))
    }
}
