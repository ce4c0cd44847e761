//! Application listener contract
//!
//! The dispatcher decodes and validates each message, then hands the typed
//! result to the application through this trait.  Every callback has a
//! no-op default so an implementation only provides the ones it cares
//! about; the core performs no routing beyond dispatch.

use crate::alert::Alert;
use crate::block::{Block, BlockHeader};
use crate::bloom::BloomFilter;
use crate::hash::Hash256;
use crate::message::{InvType, InventoryItem};
use crate::peer::{Peer, PeerAddress};
use crate::transaction::Transaction;

/// Callbacks invoked during message processing
#[allow(unused_variables)]
pub trait MessageListener {
    /// A 'getdata' request: the application should send the requested
    /// items to the peer
    fn send_inventory(&mut self, peer: &Peer, items: Vec<InventoryItem>) {}

    /// An 'inv' announcement: the application should request any items
    /// it needs
    fn request_inventory(&mut self, peer: &Peer, items: Vec<InventoryItem>) {}

    /// A 'block', 'merkleblock' or 'tx' arrived, completing an earlier
    /// inventory request
    fn request_completed(&mut self, peer: &Peer, inv_type: InvType, hash: Hash256) {}

    /// A 'notfound' response: the request can be discarded or retried
    /// with a different peer
    fn request_not_found(&mut self, peer: &Peer, items: Vec<InventoryItem>) {}

    /// An 'addr' message with recently seen peers
    fn process_addresses(&mut self, peer: &Peer, addresses: Vec<PeerAddress>) {}

    /// An 'alert' message; signature verification is the application's
    /// responsibility
    fn process_alert(&mut self, peer: &Peer, alert: Alert) {}

    /// A 'block' message
    fn process_block(&mut self, peer: &Peer, block: Block) {}

    /// A 'headers' batch; every header has passed proof-of-work checks
    fn process_block_headers(&mut self, peer: &Peer, headers: Vec<BlockHeader>) {}

    /// A 'filterload' message; the peer's filter has already been replaced
    fn process_filter_load(
        &mut self,
        peer: &Peer,
        old_filter: Option<BloomFilter>,
        new_filter: BloomFilter,
    ) {
    }

    /// A 'filterclear' message; the peer's filter has already been removed
    fn process_filter_clear(&mut self, peer: &Peer, old_filter: Option<BloomFilter>) {}

    /// A 'getaddr' request for known peer addresses
    fn process_get_address(&mut self, peer: &Peer) {}

    /// A 'getblocks' request: the application should find the latest
    /// common block from the locator and announce the blocks that follow
    fn process_get_blocks(
        &mut self,
        peer: &Peer,
        version: u32,
        locator: Vec<Hash256>,
        stop: Hash256,
    ) {
    }

    /// A 'getheaders' request
    fn process_get_headers(
        &mut self,
        peer: &Peer,
        version: u32,
        locator: Vec<Hash256>,
        stop: Hash256,
    ) {
    }

    /// A 'mempool' request for pool contents
    fn process_mempool(&mut self, peer: &Peer) {}

    /// A 'merkleblock' message: the header carries the matched
    /// transaction hashes and its Merkle root has been verified
    fn process_merkle_block(&mut self, peer: &Peer, header: BlockHeader) {}

    /// A 'ping' message
    fn process_ping(&mut self, peer: &Peer, nonce: u64) {}

    /// A 'pong' message
    fn process_pong(&mut self, peer: &Peer, nonce: u64) {}

    /// A 'reject' message
    fn process_reject(
        &mut self,
        peer: &Peer,
        command: String,
        reason: u8,
        description: String,
        hash: Hash256,
    ) {
    }

    /// A 'tx' message
    fn process_transaction(&mut self, peer: &Peer, transaction: Transaction) {}

    /// A 'version' message; the peer state has been updated
    fn process_version(&mut self, peer: &Peer) {}

    /// A 'verack' message completing the handshake
    fn process_version_ack(&mut self, peer: &Peer) {}
}

/// A listener that ignores everything
pub struct NullMessageListener;

impl MessageListener for NullMessageListener {}
