//! Message envelope framing
//!
//! Every message on the network is the 24-byte header followed by an
//! optional payload:
//!
//! ```text
//!   Size       Field           Description
//!   ====       =====           ===========
//!   4 bytes    Magic           Magic number for the configured network
//!  12 bytes    Command         Zero-padded ASCII command name
//!   4 bytes    Length          Payload length
//!   4 bytes    Checksum        First 4 bytes of the double SHA-256 of the payload
//! ```
//!
//! A message built for broadcast is cloned per peer: the clones share the
//! same immutable frame bytes, each with independent read state.

use crate::buffer::SerializedBuffer;
use crate::error::{CoreError, Result};
use crate::hash::{double_sha256, Hash256};
use crate::netparams::{self, MAX_MESSAGE_SIZE};

use std::sync::Arc;
use tracing::debug;

/// Message header length
pub const HEADER_LENGTH: usize = 24;

/// Checksum used for a zero-length payload
pub const ZERO_LENGTH_CHECKSUM: [u8; 4] = [0x5d, 0xf6, 0xe0, 0xe2];

/// The closed set of message commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageCommand {
    Addr,
    Alert,
    Block,
    FilterAdd,
    FilterClear,
    FilterLoad,
    GetAddr,
    GetBlocks,
    GetData,
    GetHeaders,
    Headers,
    Inv,
    Mempool,
    MerkleBlock,
    NotFound,
    Ping,
    Pong,
    Reject,
    Tx,
    Verack,
    Version,
}

impl MessageCommand {
    /// The wire command name
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageCommand::Addr => "addr",
            MessageCommand::Alert => "alert",
            MessageCommand::Block => "block",
            MessageCommand::FilterAdd => "filteradd",
            MessageCommand::FilterClear => "filterclear",
            MessageCommand::FilterLoad => "filterload",
            MessageCommand::GetAddr => "getaddr",
            MessageCommand::GetBlocks => "getblocks",
            MessageCommand::GetData => "getdata",
            MessageCommand::GetHeaders => "getheaders",
            MessageCommand::Headers => "headers",
            MessageCommand::Inv => "inv",
            MessageCommand::Mempool => "mempool",
            MessageCommand::MerkleBlock => "merkleblock",
            MessageCommand::NotFound => "notfound",
            MessageCommand::Ping => "ping",
            MessageCommand::Pong => "pong",
            MessageCommand::Reject => "reject",
            MessageCommand::Tx => "tx",
            MessageCommand::Verack => "verack",
            MessageCommand::Version => "version",
        }
    }

    /// Looks up a command name
    pub fn from_name(name: &str) -> Option<MessageCommand> {
        Some(match name {
            "addr" => MessageCommand::Addr,
            "alert" => MessageCommand::Alert,
            "block" => MessageCommand::Block,
            "filteradd" => MessageCommand::FilterAdd,
            "filterclear" => MessageCommand::FilterClear,
            "filterload" => MessageCommand::FilterLoad,
            "getaddr" => MessageCommand::GetAddr,
            "getblocks" => MessageCommand::GetBlocks,
            "getdata" => MessageCommand::GetData,
            "getheaders" => MessageCommand::GetHeaders,
            "headers" => MessageCommand::Headers,
            "inv" => MessageCommand::Inv,
            "mempool" => MessageCommand::Mempool,
            "merkleblock" => MessageCommand::MerkleBlock,
            "notfound" => MessageCommand::NotFound,
            "ping" => MessageCommand::Ping,
            "pong" => MessageCommand::Pong,
            "reject" => MessageCommand::Reject,
            "tx" => MessageCommand::Tx,
            "verack" => MessageCommand::Verack,
            "version" => MessageCommand::Version,
            _ => return None,
        })
    }

    /// The zero-padded 12-byte command field
    pub fn to_field(&self) -> [u8; 12] {
        let name = self.as_str().as_bytes();
        let mut field = [0u8; 12];
        field[..name.len()].copy_from_slice(name);
        field
    }
}

/// Inventory item type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvType {
    Error,
    Tx,
    Block,
    FilteredBlock,
}

impl InvType {
    pub fn to_u32(self) -> u32 {
        match self {
            InvType::Error => 0,
            InvType::Tx => 1,
            InvType::Block => 2,
            InvType::FilteredBlock => 3,
        }
    }

    pub fn from_u32(value: u32) -> Result<InvType> {
        match value {
            0 => Ok(InvType::Error),
            1 => Ok(InvType::Tx),
            2 => Ok(InvType::Block),
            3 => Ok(InvType::FilteredBlock),
            _ => Err(CoreError::malformed(format!(
                "inventory type {} is not valid",
                value
            ))),
        }
    }
}

/// A (type, hash) pair advertising or requesting an object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InventoryItem {
    inv_type: InvType,
    hash: Hash256,
}

impl InventoryItem {
    pub fn new(inv_type: InvType, hash: Hash256) -> InventoryItem {
        InventoryItem { inv_type, hash }
    }

    pub fn inv_type(&self) -> InvType {
        self.inv_type
    }

    pub fn hash(&self) -> &Hash256 {
        &self.hash
    }

    /// Reads the 36-byte wire form
    pub fn read(buffer: &mut SerializedBuffer) -> Result<InventoryItem> {
        let inv_type = InvType::from_u32(buffer.get_u32()?)?;
        let hash = buffer.get_hash()?;
        Ok(InventoryItem { inv_type, hash })
    }

    /// Writes the 36-byte wire form
    pub fn write(&self, buffer: &mut SerializedBuffer) {
        buffer.put_u32(self.inv_type.to_u32()).put_hash(&self.hash);
    }
}

/// A framed message ready to send.
///
/// Cloning shares the underlying frame bytes, which are never mutated
/// after framing, so a broadcast costs one buffer regardless of the
/// number of peers.
#[derive(Debug, Clone)]
pub struct Message {
    frame: Arc<Vec<u8>>,
    command: MessageCommand,
}

impl Message {
    pub fn new(frame: Vec<u8>, command: MessageCommand) -> Message {
        Message {
            frame: Arc::new(frame),
            command,
        }
    }

    /// The complete frame: header plus payload
    pub fn bytes(&self) -> &[u8] {
        &self.frame
    }

    pub fn command(&self) -> MessageCommand {
        self.command
    }
}

/// Builds the framed message for a command and payload
pub fn build_message(command: MessageCommand, payload: &[u8]) -> Result<Message> {
    let params = netparams::params()?;
    let mut frame = Vec::with_capacity(HEADER_LENGTH + payload.len());
    frame.extend_from_slice(&params.magic.to_le_bytes());
    frame.extend_from_slice(&command.to_field());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    if payload.is_empty() {
        frame.extend_from_slice(&ZERO_LENGTH_CHECKSUM);
    } else {
        let digest = double_sha256(payload);
        frame.extend_from_slice(&digest[0..4]);
        frame.extend_from_slice(payload);
    }
    Ok(Message::new(frame, command))
}

/// Verifies a framed message and returns its command.
///
/// The magic number must match the configured network, the length field
/// must match the payload, and the checksum must verify.  An unknown
/// command is reported as `None` rather than an error; the transport may
/// choose to discard the message.  On return the buffer is positioned at
/// the start of the payload.
pub fn process_header(buffer: &mut SerializedBuffer) -> Result<Option<MessageCommand>> {
    if buffer.remaining() < HEADER_LENGTH {
        return Err(CoreError::malformed(
            "message is shorter than the message header",
        ));
    }
    if buffer.remaining() > MAX_MESSAGE_SIZE {
        return Err(CoreError::malformed("message exceeds the maximum size"));
    }
    let params = netparams::params()?;
    let magic = buffer.get_u32()?;
    if magic != params.magic {
        return Err(CoreError::malformed(format!(
            "message magic number {:#010x} is invalid",
            magic
        )));
    }
    let mut command_field = [0u8; 12];
    buffer.get_into(&mut command_field)?;
    let length = buffer.get_u32()? as usize;
    let mut checksum = [0u8; 4];
    buffer.get_into(&mut checksum)?;
    if length != buffer.remaining() {
        return Err(CoreError::malformed(
            "message length does not match the payload",
        ));
    }
    let expected = if length == 0 {
        ZERO_LENGTH_CHECKSUM
    } else {
        let digest = double_sha256(&buffer.as_slice()[HEADER_LENGTH..]);
        [digest[0], digest[1], digest[2], digest[3]]
    };
    if checksum != expected {
        return Err(CoreError::malformed("message checksum is incorrect"));
    }
    // The command name ends at the first zero byte
    let name_length = command_field
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(command_field.len());
    let name = std::str::from_utf8(&command_field[..name_length])
        .map_err(|_| CoreError::malformed("message command is not ASCII"))?;
    let command = MessageCommand::from_name(name);
    if command.is_none() {
        debug!(command = name, "unrecognized message command");
    }
    Ok(command)
}
