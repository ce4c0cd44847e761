//! Network-specific parameters and protocol constants
//!
//! The library supports the production network and the test network.  A
//! single `configure` call selects the network before any other use; the
//! parameters are process-wide and immutable once set.

use crate::error::{CoreError, Result};
use crate::hash::{Hash256, U256};
use std::sync::OnceLock;

/// Protocol version implemented by this library
pub const PROTOCOL_VERSION: u32 = 70002;

/// Earliest protocol version with Bloom filter support
pub const BLOOM_FILTER_VERSION: u32 = 70001;

/// Peer provides network services
pub const NODE_NETWORK: u64 = 1;

/// Maximum serialized block size
pub const MAX_BLOCK_SIZE: usize = 1024 * 1024;

/// Maximum framed message size including the header
pub const MAX_MESSAGE_SIZE: usize = 2 * 1024 * 1024;

/// Maximum clock drift accepted for a block timestamp, in seconds
pub const ALLOWED_TIME_DRIFT: u64 = 2 * 60 * 60;

/// Maximum amount of money in the system, in satoshis
pub const MAX_MONEY: u64 = 21_000_000 * 100_000_000;

/// Production network magic number
pub const MAGIC_NUMBER_PRODNET: u32 = 0xd9b4bef9;

/// Test network magic number
pub const MAGIC_NUMBER_TESTNET: u32 = 0xdab5bffa;

/// Production network maximum target difficulty (compact form)
pub const MAX_DIFFICULTY_PRODNET: u32 = 0x1d00ffff;

/// Test network maximum target difficulty (compact form)
pub const MAX_DIFFICULTY_TESTNET: u32 = 0x207fffff;

/// Malformed message reject code
pub const REJECT_MALFORMED: u8 = 0x01;

/// Invalid message reject code
pub const REJECT_INVALID: u8 = 0x10;

/// Obsolete message reject code
pub const REJECT_OBSOLETE: u8 = 0x11;

/// Duplicate transaction reject code
pub const REJECT_DUPLICATE: u8 = 0x12;

/// Non-standard transaction reject code
pub const REJECT_NONSTANDARD: u8 = 0x40;

/// Dust transaction reject code
pub const REJECT_DUST: u8 = 0x41;

/// Insufficient fee reject code
pub const REJECT_INSUFFICIENT_FEE: u8 = 0x42;

/// Block checkpoint mismatch reject code
pub const REJECT_CHECKPOINT: u8 = 0x43;

const GENESIS_BLOCK_PRODNET: &str =
    "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f";
const GENESIS_BLOCK_TESTNET: &str =
    "0f9188f13cb7b2c71f2a335e3a4fc328bf5beb436012afca590b1a11466e2206";

const GENESIS_TIME_PRODNET: u64 = 0x495fab29;
const GENESIS_TIME_TESTNET: u64 = 1296688602;

/// Network selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Prodnet,
    Testnet,
}

/// Parameters for the selected network
#[derive(Debug, Clone)]
pub struct NetParams {
    /// Selected network
    pub network: Network,
    /// Message magic number
    pub magic: u32,
    /// Address version byte
    pub address_version: u8,
    /// Dumped private key version byte
    pub dumped_key_version: u8,
    /// Genesis block hash
    pub genesis_hash: Hash256,
    /// Genesis block time
    pub genesis_time: u64,
    /// Maximum target difficulty in compact form
    pub max_target: u32,
    /// Proof-of-work limit (expanded maximum target)
    pub proof_of_work_limit: U256,
    /// Minimum accepted peer protocol version
    pub min_protocol_version: u32,
    /// Application name advertised in the user agent
    pub application_name: String,
    /// Services advertised in 'version' and 'addr' messages
    pub supported_services: u64,
}

static PARAMS: OnceLock<NetParams> = OnceLock::new();

impl NetParams {
    fn build(
        network: Network,
        application_name: &str,
        min_protocol_version: u32,
        supported_services: u64,
    ) -> NetParams {
        let (magic, address_version, dumped_key_version, genesis, genesis_time, max_target) =
            match network {
                Network::Prodnet => (
                    MAGIC_NUMBER_PRODNET,
                    0,
                    128,
                    GENESIS_BLOCK_PRODNET,
                    GENESIS_TIME_PRODNET,
                    MAX_DIFFICULTY_PRODNET,
                ),
                Network::Testnet => (
                    MAGIC_NUMBER_TESTNET,
                    111,
                    239,
                    GENESIS_BLOCK_TESTNET,
                    GENESIS_TIME_TESTNET,
                    MAX_DIFFICULTY_TESTNET,
                ),
            };
        NetParams {
            network,
            magic,
            address_version,
            dumped_key_version,
            genesis_hash: Hash256::from_hex(genesis).unwrap_or(Hash256::ZERO),
            genesis_time,
            max_target,
            proof_of_work_limit: U256::from_compact(max_target),
            min_protocol_version,
            application_name: application_name.to_string(),
            supported_services,
        }
    }

    /// The user agent advertised in the 'version' message:
    /// `/application/library:version/`
    pub fn user_agent(&self) -> String {
        format!("/{}/{}/", self.application_name, library_id())
    }
}

/// The library identifier included in the user agent
pub fn library_id() -> String {
    format!("{}:{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

/// Configures the network parameters.
///
/// Must be called before any other use of the library.  Calling again with
/// the same selection is a no-op; calling again with a different selection
/// is a configuration error.
pub fn configure(
    network: Network,
    application_name: &str,
    min_protocol_version: u32,
    supported_services: u64,
) -> Result<()> {
    let requested = NetParams::build(
        network,
        application_name,
        min_protocol_version,
        supported_services,
    );
    let current = PARAMS.get_or_init(|| requested.clone());
    if current.network != requested.network
        || current.application_name != requested.application_name
        || current.min_protocol_version != requested.min_protocol_version
        || current.supported_services != requested.supported_services
    {
        return Err(CoreError::Config(
            "network parameters already configured with different values".to_string(),
        ));
    }
    Ok(())
}

/// Returns the configured network parameters
pub fn params() -> Result<&'static NetParams> {
    PARAMS
        .get()
        .ok_or_else(|| CoreError::Config("network parameters have not been configured".to_string()))
}

#[cfg(test)]
pub(crate) fn configure_for_tests() {
    let _ = configure(Network::Prodnet, "test", 60001, NODE_NETWORK);
}
