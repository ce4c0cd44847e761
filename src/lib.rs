//! # peercore
//!
//! Support library for the Bitcoin peer-to-peer protocol.
//!
//! The crate provides the wire codec for the twenty-one protocol message
//! types, the transaction and block data model with its signing algorithm,
//! elliptic-curve keys on secp256k1, Bloom filters, and a protocol-aware
//! dispatcher with per-peer connection state.  Socket I/O, chain storage,
//! the memory pool, and the address book are the embedding application's
//! responsibility: the application registers a [`MessageListener`] and the
//! dispatcher hands it typed, validated domain objects.
//!
//! ## Usage
//!
//! Network parameters must be configured once before any other use:
//!
//! ```rust
//! use peercore::netparams::{self, Network, NODE_NETWORK};
//!
//! netparams::configure(Network::Prodnet, "app", 60001, NODE_NETWORK).unwrap();
//! ```
//!
//! Ingress flow: the I/O layer reads one framed message and hands it to
//! [`handlers::dispatch_message`] along with the peer and the listener.
//! Egress flow: the application calls a `handlers::build_*` function and
//! queues the returned [`Message`] on the peer for the I/O layer to send.
//!
//! ```rust
//! use peercore::handlers::{build_ping_message_with_nonce, dispatch_message, handle_failure};
//! use peercore::listener::NullMessageListener;
//! use peercore::netparams::{self, Network, NODE_NETWORK};
//! use peercore::peer::{Peer, PeerAddress};
//!
//! netparams::configure(Network::Prodnet, "app", 60001, NODE_NETWORK).unwrap();
//! let mut peer = Peer::new(PeerAddress::from_text("[127.0.0.1]:8333").unwrap());
//! peer.record_version_sent();
//! peer.record_version_received();
//! peer.record_verack_received().unwrap();
//!
//! let ping = build_ping_message_with_nonce(1).unwrap();
//! let mut listener = NullMessageListener;
//! match dispatch_message(&mut peer, ping.bytes(), &mut listener) {
//!     Ok(_) => {}
//!     Err(error) => {
//!         if let Some(reject) = handle_failure(&mut peer, None, &error) {
//!             peer.queue_message(reject);
//!         }
//!     }
//! }
//! ```

pub mod alert;
pub mod base58;
pub mod block;
pub mod bloom;
pub mod buffer;
pub mod error;
pub mod handlers;
pub mod hash;
pub mod keys;
pub mod listener;
pub mod merkle;
pub mod message;
pub mod netparams;
pub mod peer;
pub mod script;
pub mod transaction;

// Re-export commonly used types
pub use alert::Alert;
pub use block::{Block, BlockHeader};
pub use bloom::{BloomFilter, UpdateMode};
pub use buffer::SerializedBuffer;
pub use error::{CoreError, Result};
pub use hash::{Hash256, U256};
pub use keys::{Address, ECKey, EncryptedPrivateKey};
pub use listener::{MessageListener, NullMessageListener};
pub use merkle::MerkleBranch;
pub use message::{InvType, InventoryItem, Message, MessageCommand};
pub use netparams::{NetParams, Network};
pub use peer::{HandshakeState, Peer, PeerAddress};
pub use script::{SigHashMode, SigHashType};
pub use transaction::{
    OutPoint, SignedInput, Transaction, TransactionInput, TransactionOutput,
};
