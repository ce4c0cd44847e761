//! Elliptic-curve keys on secp256k1
//!
//! A key pair holds an optional private key, the public key in compressed or
//! uncompressed form, and an optional encrypted private-key container.
//! Signing uses the deterministic nonce derivation provided by the secp256k1
//! crate (RFC 6979) and always produces canonical low-S signatures.

use crate::base58;
use crate::buffer::SerializedBuffer;
use crate::error::{CoreError, Result};
use crate::hash::{double_sha256, hash160, sha256};
use crate::netparams;

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId, Signature};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Prefix prepended to signed text messages
const SIGNED_MESSAGE_HEADER: &str = "Bitcoin Signed Message:\n";

fn now_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A pay-to-pubkey-hash address: version byte plus RIPEMD-160(SHA-256(pubkey))
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    version: u8,
    hash: [u8; 20],
}

impl Address {
    /// Creates an address for the configured network
    pub fn new(hash: [u8; 20]) -> Result<Address> {
        Ok(Address {
            version: netparams::params()?.address_version,
            hash,
        })
    }

    /// Decodes a Base58Check address string
    pub fn from_base58(encoded: &str) -> Result<Address> {
        let (version, payload) = base58::check_decode(encoded)?;
        if payload.len() != 20 {
            return Err(CoreError::malformed("address payload is not 20 bytes"));
        }
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&payload);
        Ok(Address { version, hash })
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn hash(&self) -> &[u8; 20] {
        &self.hash
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", base58::check_encode(self.version, &self.hash))
    }
}

/// An elliptic-curve key pair
#[derive(Debug, Clone)]
pub struct ECKey {
    secret: Option<SecretKey>,
    public: PublicKey,
    compressed: bool,
    creation_time: u64,
    encrypted: Option<EncryptedPrivateKey>,
}

impl ECKey {
    /// Generates a new random key pair with a compressed public key
    pub fn new() -> ECKey {
        let secp = Secp256k1::new();
        let (secret, public) = secp.generate_keypair(&mut rand::thread_rng());
        ECKey {
            secret: Some(secret),
            public,
            compressed: true,
            creation_time: now_seconds(),
            encrypted: None,
        }
    }

    /// Builds a key pair from a 32-byte private scalar
    pub fn from_secret(bytes: &[u8], compressed: bool) -> Result<ECKey> {
        let secret = SecretKey::from_slice(bytes)
            .map_err(|e| CoreError::Crypto(format!("invalid private key: {}", e)))?;
        let secp = Secp256k1::new();
        let public = PublicKey::from_secret_key(&secp, &secret);
        Ok(ECKey {
            secret: Some(secret),
            public,
            compressed,
            creation_time: now_seconds(),
            encrypted: None,
        })
    }

    /// Builds a verification-only key from a serialized public key
    /// (33-byte compressed or 65-byte uncompressed form)
    pub fn from_public(bytes: &[u8]) -> Result<ECKey> {
        let public = PublicKey::from_slice(bytes)
            .map_err(|e| CoreError::Crypto(format!("invalid public key: {}", e)))?;
        Ok(ECKey {
            secret: None,
            public,
            compressed: bytes.len() == 33,
            creation_time: now_seconds(),
            encrypted: None,
        })
    }

    /// TRUE if the private key is present
    pub fn has_private_key(&self) -> bool {
        self.secret.is_some()
    }

    /// TRUE if the public key is in compressed form
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// The serialized public key in the key's preferred form
    pub fn public_key_bytes(&self) -> Vec<u8> {
        if self.compressed {
            self.public.serialize().to_vec()
        } else {
            self.public.serialize_uncompressed().to_vec()
        }
    }

    /// RIPEMD-160(SHA-256(pubkey)), the address payload
    pub fn public_key_hash(&self) -> [u8; 20] {
        hash160(&self.public_key_bytes())
    }

    /// The pay-to-pubkey-hash address for the configured network
    pub fn to_address(&self) -> Result<Address> {
        Address::new(self.public_key_hash())
    }

    pub fn creation_time(&self) -> u64 {
        self.creation_time
    }

    pub fn set_creation_time(&mut self, seconds: u64) {
        self.creation_time = seconds;
    }

    pub fn encrypted_private_key(&self) -> Option<&EncryptedPrivateKey> {
        self.encrypted.as_ref()
    }

    /// Encrypts the private key under the passphrase and stores the container
    pub fn encrypt_private_key(&mut self, passphrase: &str) -> Result<()> {
        let secret = self
            .secret
            .as_ref()
            .ok_or_else(|| CoreError::Crypto("key has no private key".to_string()))?;
        self.encrypted = Some(EncryptedPrivateKey::new(secret, passphrase)?);
        Ok(())
    }

    /// Signs a 32-byte digest, returning the canonical DER encoding
    pub fn sign(&self, digest: &[u8; 32]) -> Result<Vec<u8>> {
        let secret = self
            .secret
            .as_ref()
            .ok_or_else(|| CoreError::Crypto("key has no private key".to_string()))?;
        let secp = Secp256k1::new();
        let message = Message::from_digest(*digest);
        let mut signature = secp.sign_ecdsa(&message, secret);
        signature.normalize_s();
        Ok(signature.serialize_der().to_vec())
    }

    /// Verifies a DER-encoded signature over a 32-byte digest
    pub fn verify(&self, digest: &[u8; 32], der_signature: &[u8]) -> Result<bool> {
        ECKey::verify_with_key(digest, der_signature, &self.public_key_bytes())
    }

    /// Verifies a DER-encoded signature against a serialized public key
    pub fn verify_with_key(
        digest: &[u8; 32],
        der_signature: &[u8],
        public_key: &[u8],
    ) -> Result<bool> {
        let public = PublicKey::from_slice(public_key)
            .map_err(|e| CoreError::Crypto(format!("invalid public key: {}", e)))?;
        let mut signature = Signature::from_der(der_signature)
            .map_err(|e| CoreError::Crypto(format!("invalid DER signature: {}", e)))?;
        // Accept high-S signatures from older peers by normalizing first
        signature.normalize_s();
        let secp = Secp256k1::verification_only();
        let message = Message::from_digest(*digest);
        Ok(secp.verify_ecdsa(&message, &signature, &public).is_ok())
    }

    /// Recovers the public key from a compact signature and the recovery id
    pub fn recover(digest: &[u8; 32], recovery_id: u8, compact: &[u8; 64]) -> Result<PublicKey> {
        let id = RecoveryId::from_i32(recovery_id as i32)
            .map_err(|e| CoreError::Crypto(format!("invalid recovery id: {}", e)))?;
        let signature = RecoverableSignature::from_compact(compact, id)
            .map_err(|e| CoreError::Crypto(format!("invalid compact signature: {}", e)))?;
        let secp = Secp256k1::new();
        let message = Message::from_digest(*digest);
        secp.recover_ecdsa(&message, &signature)
            .map_err(|e| CoreError::Crypto(format!("key recovery failed: {}", e)))
    }

    /// Signs a text message, returning the 65-byte compact signature.
    ///
    /// The header byte encodes the recovery id and the compression flag so
    /// the public key can be recovered from the signature alone.
    pub fn sign_message(&self, message: &str) -> Result<[u8; 65]> {
        let secret = self
            .secret
            .as_ref()
            .ok_or_else(|| CoreError::Crypto("key has no private key".to_string()))?;
        let digest = signed_message_digest(message);
        let secp = Secp256k1::new();
        let signature = secp.sign_ecdsa_recoverable(&Message::from_digest(digest), secret);
        let (id, compact) = signature.serialize_compact();
        let mut out = [0u8; 65];
        out[0] = 27 + id.to_i32() as u8 + if self.compressed { 4 } else { 0 };
        out[1..].copy_from_slice(&compact);
        Ok(out)
    }

    /// Verifies a 65-byte compact message signature and returns the
    /// recovered public key bytes
    pub fn verify_message(message: &str, signature: &[u8]) -> Result<Vec<u8>> {
        if signature.len() != 65 {
            return Err(CoreError::Crypto(
                "compact signature must be 65 bytes".to_string(),
            ));
        }
        let header = signature[0];
        if header < 27 {
            return Err(CoreError::Crypto("signature header is not valid".to_string()));
        }
        let compressed = (header - 27) & 4 != 0;
        let recovery_id = (header - 27) & 3;
        let mut compact = [0u8; 64];
        compact.copy_from_slice(&signature[1..]);
        let digest = signed_message_digest(message);
        let public = ECKey::recover(&digest, recovery_id, &compact)?;
        Ok(if compressed {
            public.serialize().to_vec()
        } else {
            public.serialize_uncompressed().to_vec()
        })
    }

    /// Exports the private key in the dumped (WIF) format:
    /// version byte, 32-byte scalar, compression flag, Base58Check
    pub fn to_dumped_key(&self) -> Result<String> {
        let secret = self
            .secret
            .as_ref()
            .ok_or_else(|| CoreError::Crypto("key has no private key".to_string()))?;
        let mut payload = secret.secret_bytes().to_vec();
        if self.compressed {
            payload.push(0x01);
        }
        Ok(base58::check_encode(
            netparams::params()?.dumped_key_version,
            &payload,
        ))
    }

    /// Imports a private key in the dumped (WIF) format
    pub fn from_dumped_key(encoded: &str) -> Result<ECKey> {
        let (version, payload) = base58::check_decode(encoded)?;
        if version != netparams::params()?.dumped_key_version {
            return Err(CoreError::malformed(format!(
                "dumped key version {} does not match the configured network",
                version
            )));
        }
        let (scalar, compressed) = match payload.len() {
            32 => (&payload[..], false),
            33 if payload[32] == 0x01 => (&payload[..32], true),
            _ => return Err(CoreError::malformed("dumped key payload is not valid")),
        };
        ECKey::from_secret(scalar, compressed)
    }
}

impl Default for ECKey {
    fn default() -> Self {
        ECKey::new()
    }
}

/// The digest signed for a text message: the signed-message header and the
/// message are each written as var-length strings, then double hashed
fn signed_message_digest(message: &str) -> [u8; 32] {
    let mut buffer = SerializedBuffer::with_capacity(message.len() + 32);
    buffer.put_var_string(SIGNED_MESSAGE_HEADER);
    buffer.put_var_string(message);
    double_sha256(buffer.as_slice())
}

/// An encrypted private key container.
///
/// The AES-256 key is the double SHA-256 of (salt ‖ SHA-256(passphrase));
/// the scalar is encrypted with AES-256-CBC and PKCS#7 padding.
#[derive(Debug, Clone)]
pub struct EncryptedPrivateKey {
    ciphertext: Vec<u8>,
    iv: Vec<u8>,
    salt: Vec<u8>,
}

impl EncryptedPrivateKey {
    const SALT_LENGTH: usize = 32;
    const IV_LENGTH: usize = 16;

    /// Encrypts a private key under a passphrase with a random salt and IV
    pub fn new(secret: &SecretKey, passphrase: &str) -> Result<EncryptedPrivateKey> {
        let mut salt = vec![0u8; Self::SALT_LENGTH];
        rand::thread_rng().fill_bytes(&mut salt);
        let mut iv = vec![0u8; Self::IV_LENGTH];
        rand::thread_rng().fill_bytes(&mut iv);
        let key = derive_key(passphrase, &salt);
        let cipher = Aes256CbcEnc::new_from_slices(&key, &iv)
            .map_err(|e| CoreError::Crypto(format!("unable to initialize cipher: {}", e)))?;
        let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(&secret.secret_bytes());
        Ok(EncryptedPrivateKey {
            ciphertext,
            iv,
            salt,
        })
    }

    /// Decrypts the private key with the passphrase
    pub fn decrypt(&self, passphrase: &str) -> Result<SecretKey> {
        let key = derive_key(passphrase, &self.salt);
        let cipher = Aes256CbcDec::new_from_slices(&key, &self.iv)
            .map_err(|e| CoreError::Crypto(format!("unable to initialize cipher: {}", e)))?;
        let plaintext = cipher
            .decrypt_padded_vec_mut::<Pkcs7>(&self.ciphertext)
            .map_err(|_| CoreError::Crypto("unable to decrypt the private key".to_string()))?;
        SecretKey::from_slice(&plaintext)
            .map_err(|e| CoreError::Crypto(format!("decrypted key is not valid: {}", e)))
    }

    /// Writes the container: var-bytes ciphertext, var-bytes IV, var-bytes salt
    pub fn write(&self, buffer: &mut SerializedBuffer) {
        buffer
            .put_var_bytes(&self.ciphertext)
            .put_var_bytes(&self.iv)
            .put_var_bytes(&self.salt);
    }

    /// Reads a serialized container
    pub fn read(buffer: &mut SerializedBuffer) -> Result<EncryptedPrivateKey> {
        Ok(EncryptedPrivateKey {
            ciphertext: buffer.get_var_bytes()?,
            iv: buffer.get_var_bytes()?,
            salt: buffer.get_var_bytes()?,
        })
    }
}

fn derive_key(passphrase: &str, salt: &[u8]) -> [u8; 32] {
    let phrase_hash = sha256(passphrase.as_bytes());
    let mut material = Vec::with_capacity(salt.len() + 32);
    material.extend_from_slice(salt);
    material.extend_from_slice(&phrase_hash);
    double_sha256(&material)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netparams::configure_for_tests;

    #[test]
    fn test_sign_and_verify() {
        let key = ECKey::new();
        let digest = double_sha256(b"message to sign");
        let signature = key.sign(&digest).unwrap();
        assert!(key.verify(&digest, &signature).unwrap());
        let other = double_sha256(b"a different message");
        assert!(!key.verify(&other, &signature).unwrap());
    }

    #[test]
    fn test_deterministic_signatures() {
        let key = ECKey::from_secret(&[0x11u8; 32], true).unwrap();
        let digest = double_sha256(b"deterministic");
        assert_eq!(key.sign(&digest).unwrap(), key.sign(&digest).unwrap());
    }

    #[test]
    fn test_public_key_forms() {
        let compressed = ECKey::from_secret(&[0x22u8; 32], true).unwrap();
        assert_eq!(compressed.public_key_bytes().len(), 33);
        let uncompressed = ECKey::from_secret(&[0x22u8; 32], false).unwrap();
        assert_eq!(uncompressed.public_key_bytes().len(), 65);
        // Same scalar, same point
        assert_eq!(
            ECKey::from_public(&compressed.public_key_bytes())
                .unwrap()
                .public_key_hash(),
            hash160(&compressed.public_key_bytes())
        );
    }

    #[test]
    fn test_verify_with_public_only_key(){
        let signer = ECKey::new();
        let digest = double_sha256(b"payload");
        let signature = signer.sign(&digest).unwrap();
        let verifier = ECKey::from_public(&signer.public_key_bytes()).unwrap();
        assert!(!verifier.has_private_key());
        assert!(verifier.verify(&digest, &signature).unwrap());
        assert!(verifier.sign(&digest).is_err());
    }

    #[test]
    fn test_address_round_trip() {
        configure_for_tests();
        let key = ECKey::from_secret(&[0x33u8; 32], true).unwrap();
        let address = key.to_address().unwrap();
        assert_eq!(address.version(), 0);
        let decoded = Address::from_base58(&address.to_string()).unwrap();
        assert_eq!(decoded, address);
        assert_eq!(decoded.hash(), &key.public_key_hash());
    }

    #[test]
    fn test_dumped_key_round_trip() {
        configure_for_tests();
        let key = ECKey::from_secret(&[0x44u8; 32], true).unwrap();
        let dumped = key.to_dumped_key().unwrap();
        let restored = ECKey::from_dumped_key(&dumped).unwrap();
        assert!(restored.is_compressed());
        assert_eq!(restored.public_key_bytes(), key.public_key_bytes());

        let plain = ECKey::from_secret(&[0x44u8; 32], false).unwrap();
        let restored = ECKey::from_dumped_key(&plain.to_dumped_key().unwrap()).unwrap();
        assert!(!restored.is_compressed());
    }

    #[test]
    fn test_signed_message_recovery() {
        let key = ECKey::new();
        let signature = key.sign_message("a signed note").unwrap();
        assert_eq!(signature.len(), 65);
        let recovered = ECKey::verify_message("a signed note", &signature).unwrap();
        assert_eq!(recovered, key.public_key_bytes());
        // A different message never recovers the signer's key
        if let Ok(other) = ECKey::verify_message("another note", &signature) {
            assert_ne!(other, key.public_key_bytes());
        }
    }

    #[test]
    fn test_recover_from_compact() {
        let key = ECKey::new();
        let digest = double_sha256(b"recovery");
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&key.secret.unwrap().secret_bytes()).unwrap();
        let recoverable = secp.sign_ecdsa_recoverable(&Message::from_digest(digest), &secret);
        let (id, compact) = recoverable.serialize_compact();
        let public = ECKey::recover(&digest, id.to_i32() as u8, &compact).unwrap();
        assert_eq!(public.serialize().to_vec(), key.public_key_bytes());
    }

    #[test]
    fn test_encrypted_private_key_round_trip() {
        let key = ECKey::from_secret(&[0x55u8; 32], true).unwrap();
        let secret = key.secret.unwrap();
        let container = EncryptedPrivateKey::new(&secret, "correct horse").unwrap();
        let decrypted = container.decrypt("correct horse").unwrap();
        assert_eq!(decrypted.secret_bytes(), secret.secret_bytes());
        assert!(container.decrypt("wrong phrase").is_err());
    }

    #[test]
    fn test_encrypted_private_key_serialization() {
        let key = ECKey::from_secret(&[0x66u8; 32], true).unwrap();
        let container = EncryptedPrivateKey::new(&key.secret.unwrap(), "phrase").unwrap();
        let mut buffer = SerializedBuffer::new();
        container.write(&mut buffer);
        let mut buffer = SerializedBuffer::from_bytes(buffer.into_bytes());
        let restored = EncryptedPrivateKey::read(&mut buffer).unwrap();
        assert_eq!(
            restored.decrypt("phrase").unwrap().secret_bytes(),
            [0x66u8; 32]
        );
    }

    #[test]
    fn test_encrypt_private_key_container() {
        let mut key = ECKey::from_secret(&[0x77u8; 32], true).unwrap();
        assert!(key.encrypted_private_key().is_none());
        key.encrypt_private_key("phrase").unwrap();
        let container = key.encrypted_private_key().unwrap();
        assert_eq!(
            container.decrypt("phrase").unwrap().secret_bytes(),
            [0x77u8; 32]
        );
    }
}
