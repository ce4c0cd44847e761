//! Per-command message handlers and the dispatcher
//!
//! Each of the twenty-one commands has a `build_*` function producing a
//! framed [`Message`] and a `process_*` function that decodes the payload,
//! checks its invariants, updates peer state, and notifies the listener.
//! [`dispatch_message`] ties them together: envelope verification, the
//! handshake state machine, and payload dispatch.  [`handle_failure`]
//! applies the failure policy: broken envelopes disconnect, verification
//! failures raise the ban score and may produce an outgoing 'reject'.

use crate::alert::Alert;
use crate::block::{Block, BlockHeader};
use crate::bloom::BloomFilter;
use crate::buffer::SerializedBuffer;
use crate::error::{CoreError, Result};
use crate::hash::Hash256;
use crate::listener::MessageListener;
use crate::merkle::MerkleBranch;
use crate::message::{
    build_message, process_header, InvType, InventoryItem, Message, MessageCommand,
};
use crate::netparams::{self, NODE_NETWORK, PROTOCOL_VERSION};
use crate::peer::{HandshakeState, Peer, PeerAddress};
use crate::transaction::Transaction;

use rand::Rng;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Ban score applied for a message that fails verification
pub const BAN_SCORE_VERIFICATION: u32 = 25;

/// Ban score applied for a command sent before the version handshake
pub const BAN_SCORE_PROTOCOL_VIOLATION: u32 = 10;

/// Addresses older than this are not relayed
const ADDRESS_MAX_AGE: u64 = 15 * 60;

/// Maximum addresses included in an outgoing 'addr' message
const ADDRESS_BUILD_LIMIT: usize = 250;

/// Maximum 'filteradd' element length
const FILTER_ELEMENT_LIMIT: usize = 520;

fn now_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Process-wide node identity nonce sent in 'version' messages
fn node_id() -> u64 {
    static NODE_ID: OnceLock<u64> = OnceLock::new();
    *NODE_ID.get_or_init(|| rand::thread_rng().gen())
}

//
// version
//

/// Builds a 'version' message for the remote peer.
///
/// The transaction-relay flag is an explicit choice, not derived from the
/// advertised services.
pub fn build_version_message(peer: &Peer, chain_height: u32, relay_tx: bool) -> Result<Message> {
    let params = netparams::params()?;
    let mut payload = SerializedBuffer::with_capacity(128);
    payload.put_u32(PROTOCOL_VERSION);
    payload.put_u64(params.supported_services);
    payload.put_u64(now_seconds());
    // Remote address as we see it
    peer.address().write(&mut payload);
    // Our own address; the wire form carries the unspecified address
    let mut local = PeerAddress::new(std::net::Ipv4Addr::UNSPECIFIED.into(), 0);
    local.set_services(params.supported_services);
    local.write(&mut payload);
    payload.put_u64(node_id());
    payload.put_var_string(&params.user_agent());
    payload.put_u32(chain_height);
    payload.put_u8(u8::from(relay_tx));
    build_message(MessageCommand::Version, payload.as_slice())
}

/// Processes a 'version' message, negotiating the connection
pub fn process_version_message(
    peer: &mut Peer,
    buffer: &mut SerializedBuffer,
    listener: &mut dyn MessageListener,
) -> Result<()> {
    let params = netparams::params()?;
    let version = buffer.get_u32()?;
    if version < params.min_protocol_version {
        return Err(CoreError::Obsolete { version });
    }
    let services = buffer.get_u64()?;
    if services & NODE_NETWORK == 0 {
        return Err(CoreError::NonStandard(
            "peer does not provide network services".to_string(),
        ));
    }
    let _timestamp = buffer.get_i64()?;
    let _recv_address = PeerAddress::read(buffer)?;
    let _from_address = PeerAddress::read(buffer)?;
    let _nonce = buffer.get_u64()?;
    let user_agent = buffer.get_var_string(255)?;
    let height = buffer.get_u32()?;
    // The tx-relay byte is absent for older protocol versions
    if buffer.remaining() > 0 {
        let _relay = buffer.get_u8()?;
    }
    peer.set_version(version.min(PROTOCOL_VERSION));
    peer.set_services(services);
    peer.set_user_agent(user_agent);
    peer.set_height(height);
    peer.address_mut().set_services(services);
    peer.record_version_received();
    listener.process_version(peer);
    Ok(())
}

//
// verack
//

/// Builds a 'verack' message
pub fn build_verack_message() -> Result<Message> {
    build_message(MessageCommand::Verack, &[])
}

/// Processes a 'verack' message, completing the handshake
pub fn process_verack_message(
    peer: &mut Peer,
    _buffer: &mut SerializedBuffer,
    listener: &mut dyn MessageListener,
) -> Result<()> {
    peer.record_verack_received()?;
    listener.process_version_ack(peer);
    Ok(())
}

//
// addr
//

/// Builds an 'addr' message.
///
/// Only addresses seen within the last fifteen minutes are included,
/// static addresses are excluded, and the list is capped at 250 entries.
pub fn build_address_message(addresses: &[PeerAddress]) -> Result<Message> {
    let oldest = now_seconds().saturating_sub(ADDRESS_MAX_AGE);
    let included: Vec<&PeerAddress> = addresses
        .iter()
        .filter(|address| address.time_seen() >= oldest && !address.is_static())
        .take(ADDRESS_BUILD_LIMIT)
        .collect();
    let mut payload = SerializedBuffer::with_capacity(included.len() * 30 + 4);
    payload.put_var_int(included.len() as u64);
    for address in included {
        payload.put_u32(address.time_seen() as u32);
        address.write(&mut payload);
    }
    build_message(MessageCommand::Addr, payload.as_slice())
}

/// Processes an 'addr' message, keeping recent network-node addresses
pub fn process_address_message(
    peer: &mut Peer,
    buffer: &mut SerializedBuffer,
    listener: &mut dyn MessageListener,
) -> Result<()> {
    let count = buffer.get_var_int()?;
    if count > 1000 {
        return Err(CoreError::malformed(
            "more than 1000 addresses in 'addr' message",
        ));
    }
    let oldest = now_seconds().saturating_sub(ADDRESS_MAX_AGE);
    let mut addresses = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let time_seen = buffer.get_u32()? as u64;
        let mut address = PeerAddress::read(buffer)?;
        address.set_time_seen(time_seen);
        if time_seen < oldest || address.services() & NODE_NETWORK == 0 {
            continue;
        }
        addresses.push(address);
    }
    listener.process_addresses(peer, addresses);
    Ok(())
}

//
// inv / getdata / notfound
//

fn build_inventory_payload(items: &[InventoryItem]) -> SerializedBuffer {
    let mut payload = SerializedBuffer::with_capacity(items.len() * 36 + 4);
    payload.put_var_int(items.len() as u64);
    for item in items {
        item.write(&mut payload);
    }
    payload
}

fn read_inventory_items(
    buffer: &mut SerializedBuffer,
    limit: u64,
    command: &str,
) -> Result<Vec<InventoryItem>> {
    let count = buffer.get_var_int()?;
    if count > limit {
        return Err(CoreError::malformed(format!(
            "more than {} inventory entries in '{}' message",
            limit, command
        )));
    }
    let mut items = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        items.push(InventoryItem::read(buffer)?);
    }
    Ok(items)
}

/// Builds an 'inv' message announcing available items
pub fn build_inventory_message(items: &[InventoryItem]) -> Result<Message> {
    build_message(MessageCommand::Inv, build_inventory_payload(items).as_slice())
}

/// Processes an 'inv' message
pub fn process_inventory_message(
    peer: &mut Peer,
    buffer: &mut SerializedBuffer,
    listener: &mut dyn MessageListener,
) -> Result<()> {
    let items = read_inventory_items(buffer, 1000, "inv")?;
    listener.request_inventory(peer, items);
    Ok(())
}

/// Builds a 'getdata' message requesting items
pub fn build_get_data_message(items: &[InventoryItem]) -> Result<Message> {
    build_message(
        MessageCommand::GetData,
        build_inventory_payload(items).as_slice(),
    )
}

/// Processes a 'getdata' message
pub fn process_get_data_message(
    peer: &mut Peer,
    buffer: &mut SerializedBuffer,
    listener: &mut dyn MessageListener,
) -> Result<()> {
    let items = read_inventory_items(buffer, 50_000, "getdata")?;
    listener.send_inventory(peer, items);
    Ok(())
}

/// Builds a 'notfound' message for requests that cannot be served
pub fn build_not_found_message(items: &[InventoryItem]) -> Result<Message> {
    build_message(
        MessageCommand::NotFound,
        build_inventory_payload(items).as_slice(),
    )
}

/// Processes a 'notfound' message
pub fn process_not_found_message(
    peer: &mut Peer,
    buffer: &mut SerializedBuffer,
    listener: &mut dyn MessageListener,
) -> Result<()> {
    let items = read_inventory_items(buffer, 1000, "notfound")?;
    listener.request_not_found(peer, items);
    Ok(())
}

//
// getblocks / getheaders
//

fn build_locator_payload(peer: &Peer, locator: &[Hash256], stop: &Hash256) -> SerializedBuffer {
    let mut payload = SerializedBuffer::with_capacity(locator.len() * 32 + 40);
    // The lesser of our version and the peer's version
    payload.put_u32(peer.version().min(PROTOCOL_VERSION));
    payload.put_var_int(locator.len() as u64);
    for hash in locator {
        payload.put_hash(hash);
    }
    payload.put_hash(stop);
    payload
}

fn read_locator(
    buffer: &mut SerializedBuffer,
    command: &str,
) -> Result<(u32, Vec<Hash256>, Hash256)> {
    let params = netparams::params()?;
    let version = buffer.get_u32()?;
    if version < params.min_protocol_version {
        return Err(CoreError::Obsolete { version });
    }
    let count = buffer.get_var_int()?;
    if count > 500 {
        return Err(CoreError::malformed(format!(
            "more than 500 locator entries in '{}' message",
            command
        )));
    }
    let mut locator = Vec::with_capacity(count as usize);
    for _ in 0..count {
        locator.push(buffer.get_hash()?);
    }
    let stop = buffer.get_hash()?;
    Ok((version, locator, stop))
}

/// Builds a 'getblocks' message from a block locator
pub fn build_get_blocks_message(
    peer: &Peer,
    locator: &[Hash256],
    stop: &Hash256,
) -> Result<Message> {
    build_message(
        MessageCommand::GetBlocks,
        build_locator_payload(peer, locator, stop).as_slice(),
    )
}

/// Processes a 'getblocks' message
pub fn process_get_blocks_message(
    peer: &mut Peer,
    buffer: &mut SerializedBuffer,
    listener: &mut dyn MessageListener,
) -> Result<()> {
    let (version, locator, stop) = read_locator(buffer, "getblocks")?;
    listener.process_get_blocks(peer, version, locator, stop);
    Ok(())
}

/// Builds a 'getheaders' message from a block locator
pub fn build_get_headers_message(
    peer: &Peer,
    locator: &[Hash256],
    stop: &Hash256,
) -> Result<Message> {
    build_message(
        MessageCommand::GetHeaders,
        build_locator_payload(peer, locator, stop).as_slice(),
    )
}

/// Processes a 'getheaders' message
pub fn process_get_headers_message(
    peer: &mut Peer,
    buffer: &mut SerializedBuffer,
    listener: &mut dyn MessageListener,
) -> Result<()> {
    let (version, locator, stop) = read_locator(buffer, "getheaders")?;
    listener.process_get_headers(peer, version, locator, stop);
    Ok(())
}

//
// headers
//

/// Builds a 'headers' message.  Each header is followed by a zero
/// transaction count.
pub fn build_headers_message(headers: &[BlockHeader]) -> Result<Message> {
    let mut payload = SerializedBuffer::with_capacity(headers.len() * 81 + 4);
    payload.put_var_int(headers.len() as u64);
    for header in headers {
        header.write(&mut payload);
        payload.put_u8(0);
    }
    build_message(MessageCommand::Headers, payload.as_slice())
}

/// Processes a 'headers' message, validating each header
pub fn process_headers_message(
    peer: &mut Peer,
    buffer: &mut SerializedBuffer,
    listener: &mut dyn MessageListener,
) -> Result<()> {
    let count = buffer.get_var_int()?;
    if count > 2000 {
        return Err(CoreError::malformed(
            "more than 2000 headers in 'headers' message",
        ));
    }
    let mut headers = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let header = BlockHeader::read(buffer, true)?;
        let tx_count = buffer.get_var_int()?;
        if tx_count != 0 {
            return Err(CoreError::invalid_item(
                "header transaction count is non-zero",
                header.hash().clone(),
            ));
        }
        headers.push(header);
    }
    listener.process_block_headers(peer, headers);
    Ok(())
}

//
// block / tx
//

/// Builds a 'block' message
pub fn build_block_message(block: &Block) -> Result<Message> {
    let mut payload = SerializedBuffer::with_capacity(1024);
    block.write(&mut payload);
    build_message(MessageCommand::Block, payload.as_slice())
}

/// Processes a 'block' message
pub fn process_block_message(
    peer: &mut Peer,
    buffer: &mut SerializedBuffer,
    listener: &mut dyn MessageListener,
) -> Result<()> {
    let block = Block::read(buffer, true)?;
    listener.request_completed(peer, InvType::Block, block.hash().clone());
    listener.process_block(peer, block);
    Ok(())
}

/// Builds a 'tx' message
pub fn build_transaction_message(transaction: &Transaction) -> Result<Message> {
    build_message(MessageCommand::Tx, transaction.bytes())
}

/// Processes a 'tx' message
pub fn process_transaction_message(
    peer: &mut Peer,
    buffer: &mut SerializedBuffer,
    listener: &mut dyn MessageListener,
) -> Result<()> {
    let transaction = Transaction::read(buffer)?;
    listener.request_completed(peer, InvType::Tx, transaction.hash().clone());
    listener.process_transaction(peer, transaction);
    Ok(())
}

//
// merkleblock
//

/// Builds a 'merkleblock' message proving the matched transactions
pub fn build_merkle_block_message(block: &Block, matched_indexes: &[usize]) -> Result<Message> {
    let mut payload = SerializedBuffer::with_capacity(128 + matched_indexes.len() * 32);
    block.header().write(&mut payload);
    MerkleBranch::build(block.tx_hashes(), matched_indexes).write(&mut payload);
    build_message(MessageCommand::MerkleBlock, payload.as_slice())
}

/// Processes a 'merkleblock' message, reconstructing the Merkle root from
/// the partial tree and verifying it against the header
pub fn process_merkle_block_message(
    peer: &mut Peer,
    buffer: &mut SerializedBuffer,
    listener: &mut dyn MessageListener,
) -> Result<()> {
    let mut header = BlockHeader::read(buffer, true)?;
    let branch = MerkleBranch::read(buffer)?;
    let mut matches = Vec::new();
    let root = branch.calculate_root(&mut matches)?;
    if &root != header.merkle_root() {
        return Err(CoreError::invalid_item(
            "merkle root is incorrect",
            header.hash().clone(),
        ));
    }
    header.set_matches(matches);
    listener.request_completed(peer, InvType::FilteredBlock, header.hash().clone());
    listener.process_merkle_block(peer, header);
    Ok(())
}

//
// filterload / filteradd / filterclear
//

/// Builds a 'filterload' message
pub fn build_filter_load_message(filter: &BloomFilter) -> Result<Message> {
    let mut payload = SerializedBuffer::with_capacity(128);
    filter.write(&mut payload);
    build_message(MessageCommand::FilterLoad, payload.as_slice())
}

/// Processes a 'filterload' message, installing the filter on the peer
pub fn process_filter_load_message(
    peer: &mut Peer,
    buffer: &mut SerializedBuffer,
    listener: &mut dyn MessageListener,
) -> Result<()> {
    let new_filter = BloomFilter::read(buffer)?;
    let old_filter = peer.install_filter(new_filter.clone());
    listener.process_filter_load(peer, old_filter, new_filter);
    Ok(())
}

/// Builds a 'filteradd' message
pub fn build_filter_add_message(element: &[u8]) -> Result<Message> {
    let mut payload = SerializedBuffer::with_capacity(element.len() + 4);
    payload.put_var_bytes(element);
    build_message(MessageCommand::FilterAdd, payload.as_slice())
}

/// Processes a 'filteradd' message.  The element is added to the current
/// filter; the request is silently ignored when no filter is installed.
pub fn process_filter_add_message(
    peer: &mut Peer,
    buffer: &mut SerializedBuffer,
    _listener: &mut dyn MessageListener,
) -> Result<()> {
    let element = buffer.get_var_bytes()?;
    if element.len() > FILTER_ELEMENT_LIMIT {
        return Err(CoreError::malformed(
            "filter element length is greater than 520 bytes",
        ));
    }
    if !peer.add_filter_element(&element) {
        debug!(peer = %peer.address(), "'filteradd' ignored: no filter installed");
    }
    Ok(())
}

/// Builds a 'filterclear' message
pub fn build_filter_clear_message() -> Result<Message> {
    build_message(MessageCommand::FilterClear, &[])
}

/// Processes a 'filterclear' message, uninstalling the peer's filter
pub fn process_filter_clear_message(
    peer: &mut Peer,
    _buffer: &mut SerializedBuffer,
    listener: &mut dyn MessageListener,
) -> Result<()> {
    let old_filter = peer.clear_filter();
    listener.process_filter_clear(peer, old_filter);
    Ok(())
}

//
// getaddr / mempool
//

/// Builds a 'getaddr' message
pub fn build_get_address_message() -> Result<Message> {
    build_message(MessageCommand::GetAddr, &[])
}

/// Processes a 'getaddr' message
pub fn process_get_address_message(
    peer: &mut Peer,
    _buffer: &mut SerializedBuffer,
    listener: &mut dyn MessageListener,
) -> Result<()> {
    listener.process_get_address(peer);
    Ok(())
}

/// Builds a 'mempool' message
pub fn build_mempool_message() -> Result<Message> {
    build_message(MessageCommand::Mempool, &[])
}

/// Processes a 'mempool' message
pub fn process_mempool_message(
    peer: &mut Peer,
    _buffer: &mut SerializedBuffer,
    listener: &mut dyn MessageListener,
) -> Result<()> {
    listener.process_mempool(peer);
    Ok(())
}

//
// ping / pong
//

/// Builds a 'ping' message with the clock as the nonce
pub fn build_ping_message() -> Result<Message> {
    build_ping_message_with_nonce(now_millis())
}

/// Builds a 'ping' message with an explicit nonce
pub fn build_ping_message_with_nonce(nonce: u64) -> Result<Message> {
    let mut payload = SerializedBuffer::with_capacity(8);
    payload.put_u64(nonce);
    build_message(MessageCommand::Ping, payload.as_slice())
}

/// Processes a 'ping' message
pub fn process_ping_message(
    peer: &mut Peer,
    buffer: &mut SerializedBuffer,
    listener: &mut dyn MessageListener,
) -> Result<()> {
    let nonce = buffer.get_u64()?;
    listener.process_ping(peer, nonce);
    Ok(())
}

/// Builds a 'pong' message echoing the ping nonce
pub fn build_pong_message(nonce: u64) -> Result<Message> {
    let mut payload = SerializedBuffer::with_capacity(8);
    payload.put_u64(nonce);
    build_message(MessageCommand::Pong, payload.as_slice())
}

/// Processes a 'pong' message, clearing the outstanding-ping flag
pub fn process_pong_message(
    peer: &mut Peer,
    buffer: &mut SerializedBuffer,
    listener: &mut dyn MessageListener,
) -> Result<()> {
    let nonce = buffer.get_u64()?;
    peer.set_ping_sent(false);
    listener.process_pong(peer, nonce);
    Ok(())
}

//
// reject
//

/// Builds a 'reject' message.  The hash is included for 'block' and 'tx'
/// failures and omitted otherwise.
pub fn build_reject_message(
    command: &str,
    reason: u8,
    description: &str,
    hash: Option<&Hash256>,
) -> Result<Message> {
    let mut payload = SerializedBuffer::with_capacity(command.len() + description.len() + 40);
    payload.put_var_string(command);
    payload.put_u8(reason);
    payload.put_var_string(description);
    if let Some(hash) = hash {
        payload.put_hash(hash);
    }
    build_message(MessageCommand::Reject, payload.as_slice())
}

/// Processes a 'reject' message
pub fn process_reject_message(
    peer: &mut Peer,
    buffer: &mut SerializedBuffer,
    listener: &mut dyn MessageListener,
) -> Result<()> {
    let command = buffer.get_var_string(12)?;
    let reason = buffer.get_u8()?;
    let description = buffer.get_var_string(256)?;
    let hash = if buffer.remaining() >= 32 {
        buffer.get_hash()?
    } else {
        Hash256::ZERO
    };
    listener.process_reject(peer, command, reason, description, hash);
    Ok(())
}

//
// alert
//

/// Builds an 'alert' message from a signed payload
pub fn build_alert_message(payload: &[u8], signature: &[u8]) -> Result<Message> {
    let mut body = SerializedBuffer::with_capacity(payload.len() + signature.len() + 8);
    body.put_var_bytes(payload);
    body.put_var_bytes(signature);
    build_message(MessageCommand::Alert, body.as_slice())
}

/// Processes an 'alert' message.  Signature verification is left to the
/// listener.
pub fn process_alert_message(
    peer: &mut Peer,
    buffer: &mut SerializedBuffer,
    listener: &mut dyn MessageListener,
) -> Result<()> {
    let payload = buffer.get_var_bytes()?;
    let signature = buffer.get_var_bytes()?;
    let alert = Alert::new(payload, signature)?;
    listener.process_alert(peer, alert);
    Ok(())
}

//
// dispatch
//

/// Verifies a framed message and dispatches its payload.
///
/// Returns the processed command, or `None` when the command is not
/// recognized (the message is otherwise well-formed and may be ignored).
/// Any command other than 'version' from a peer that has not begun the
/// handshake is a protocol violation.
pub fn dispatch_message(
    peer: &mut Peer,
    frame: &[u8],
    listener: &mut dyn MessageListener,
) -> Result<Option<MessageCommand>> {
    let mut buffer = SerializedBuffer::from_bytes(frame.to_vec());
    let Some(command) = process_header(&mut buffer)? else {
        return Ok(None);
    };
    if peer.handshake() == HandshakeState::New && command != MessageCommand::Version {
        peer.add_ban_score(BAN_SCORE_PROTOCOL_VIOLATION);
        return Err(CoreError::invalid(format!(
            "'{}' received before the version handshake",
            command.as_str()
        )));
    }
    debug!(peer = %peer.address(), command = command.as_str(), "dispatching message");
    match command {
        MessageCommand::Addr => process_address_message(peer, &mut buffer, listener)?,
        MessageCommand::Alert => process_alert_message(peer, &mut buffer, listener)?,
        MessageCommand::Block => process_block_message(peer, &mut buffer, listener)?,
        MessageCommand::FilterAdd => process_filter_add_message(peer, &mut buffer, listener)?,
        MessageCommand::FilterClear => process_filter_clear_message(peer, &mut buffer, listener)?,
        MessageCommand::FilterLoad => process_filter_load_message(peer, &mut buffer, listener)?,
        MessageCommand::GetAddr => process_get_address_message(peer, &mut buffer, listener)?,
        MessageCommand::GetBlocks => process_get_blocks_message(peer, &mut buffer, listener)?,
        MessageCommand::GetData => process_get_data_message(peer, &mut buffer, listener)?,
        MessageCommand::GetHeaders => process_get_headers_message(peer, &mut buffer, listener)?,
        MessageCommand::Headers => process_headers_message(peer, &mut buffer, listener)?,
        MessageCommand::Inv => process_inventory_message(peer, &mut buffer, listener)?,
        MessageCommand::Mempool => process_mempool_message(peer, &mut buffer, listener)?,
        MessageCommand::MerkleBlock => process_merkle_block_message(peer, &mut buffer, listener)?,
        MessageCommand::NotFound => process_not_found_message(peer, &mut buffer, listener)?,
        MessageCommand::Ping => process_ping_message(peer, &mut buffer, listener)?,
        MessageCommand::Pong => process_pong_message(peer, &mut buffer, listener)?,
        MessageCommand::Reject => process_reject_message(peer, &mut buffer, listener)?,
        MessageCommand::Tx => process_transaction_message(peer, &mut buffer, listener)?,
        MessageCommand::Verack => process_verack_message(peer, &mut buffer, listener)?,
        MessageCommand::Version => process_version_message(peer, &mut buffer, listener)?,
    }
    Ok(Some(command))
}

/// Applies the failure policy for a message that could not be processed.
///
/// Broken envelopes (short header, bad magic, bad checksum) disconnect the
/// peer.  Obsolete peers get a 'reject' and are disconnected.  Peers
/// lacking required services are disconnected.  Verification failures
/// raise the ban score and produce a 'reject' carrying the reason code and
/// item hash.  Cryptographic and configuration failures never affect peer
/// state.  The returned message, if any, should be sent to the peer.
pub fn handle_failure(
    peer: &mut Peer,
    command: Option<MessageCommand>,
    error: &CoreError,
) -> Option<Message> {
    match error {
        CoreError::Crypto(_) | CoreError::Config(_) => None,
        CoreError::Obsolete { .. } => {
            warn!(peer = %peer.address(), %error, "disconnecting obsolete peer");
            let reject = build_reject_message(
                command.map(|c| c.as_str()).unwrap_or(""),
                error.reject_code(),
                &error.to_string(),
                None,
            )
            .ok();
            peer.set_disconnect(true);
            reject
        }
        CoreError::NonStandard(_) => {
            warn!(peer = %peer.address(), %error, "disconnecting non-standard peer");
            peer.set_disconnect(true);
            None
        }
        CoreError::EndOfData(_) | CoreError::Malformed { .. } | CoreError::Invalid { .. } => {
            let Some(command) = command else {
                // The envelope itself could not be trusted
                warn!(peer = %peer.address(), %error, "broken message envelope");
                peer.set_disconnect(true);
                return None;
            };
            warn!(peer = %peer.address(), command = command.as_str(), %error,
                  "message failed verification");
            peer.add_ban_score(BAN_SCORE_VERIFICATION);
            build_reject_message(
                command.as_str(),
                error.reject_code(),
                &error.to_string(),
                error.item_hash(),
            )
            .ok()
        }
    }
}
