//! Error types for message verification and cryptographic operations

use crate::hash::Hash256;
use crate::netparams;
use thiserror::Error;

/// Failures surfaced by the protocol core.
///
/// Verification failures carry the reject reason code sent back to the peer
/// and, where one is known, the hash of the offending block or transaction.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A decoder ran out of bytes before the field was complete
    #[error("end-of-data: {0}")]
    EndOfData(String),

    /// The message structure is wrong: bad magic, bad checksum, a count or
    /// length above its documented cap
    #[error("{description}")]
    Malformed {
        description: String,
        hash: Option<Hash256>,
    },

    /// A semantic invariant was violated (hash above target, Merkle root
    /// mismatch, empty input/output list)
    #[error("{description}")]
    Invalid {
        description: String,
        hash: Option<Hash256>,
    },

    /// Peer protocol version is below the configured floor
    #[error("protocol version {version} is not supported")]
    Obsolete { version: u32 },

    /// Peer does not provide a required service
    #[error("{0}")]
    NonStandard(String),

    /// Signing, verification, or encryption failure
    #[error("cryptographic failure: {0}")]
    Crypto(String),

    /// Network parameters missing or configured twice with different values
    #[error("configuration error: {0}")]
    Config(String),
}

impl CoreError {
    /// Convenience constructor for a malformed-message failure with no item hash
    pub fn malformed(description: impl Into<String>) -> CoreError {
        CoreError::Malformed {
            description: description.into(),
            hash: None,
        }
    }

    /// Convenience constructor for an invalid-message failure with no item hash
    pub fn invalid(description: impl Into<String>) -> CoreError {
        CoreError::Invalid {
            description: description.into(),
            hash: None,
        }
    }

    /// Invalid-message failure tagged with the offending block or transaction hash
    pub fn invalid_item(description: impl Into<String>, hash: Hash256) -> CoreError {
        CoreError::Invalid {
            description: description.into(),
            hash: Some(hash),
        }
    }

    /// The reason code carried in an outgoing 'reject' message
    pub fn reject_code(&self) -> u8 {
        match self {
            CoreError::EndOfData(_) | CoreError::Malformed { .. } => netparams::REJECT_MALFORMED,
            CoreError::Invalid { .. } => netparams::REJECT_INVALID,
            CoreError::Obsolete { .. } => netparams::REJECT_OBSOLETE,
            CoreError::NonStandard(_) => netparams::REJECT_NONSTANDARD,
            CoreError::Crypto(_) | CoreError::Config(_) => netparams::REJECT_INVALID,
        }
    }

    /// The block or transaction hash associated with the failure, if any
    pub fn item_hash(&self) -> Option<&Hash256> {
        match self {
            CoreError::Malformed { hash, .. } | CoreError::Invalid { hash, .. } => hash.as_ref(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
