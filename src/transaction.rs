//! Transaction data model, canonical serialization, and signing
//!
//! The transaction hash is the double SHA-256 of the exact serialized bytes,
//! reversed.  Both are computed once at construction and cached, along with
//! the normalized transaction ID: a hash over the outpoints and outputs only,
//! which is stable under input-script malleability.

use crate::buffer::SerializedBuffer;
use crate::error::{CoreError, Result};
use crate::hash::{double_sha256, Hash256};
use crate::keys::{Address, ECKey};
use crate::script::{
    pay_to_pubkey_hash, SigHashMode, SigHashType, SignatureChecker,
};

use serde::{Deserialize, Serialize};

/// A reference to the output of a previous transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    hash: Hash256,
    index: i32,
}

impl OutPoint {
    /// The outpoint used by a coinbase input
    pub fn coinbase() -> OutPoint {
        OutPoint {
            hash: Hash256::ZERO,
            index: -1,
        }
    }

    pub fn new(hash: Hash256, index: i32) -> OutPoint {
        OutPoint { hash, index }
    }

    pub fn hash(&self) -> &Hash256 {
        &self.hash
    }

    pub fn index(&self) -> i32 {
        self.index
    }

    /// TRUE for the zero-hash, index -1 coinbase form
    pub fn is_coinbase(&self) -> bool {
        self.hash.is_zero() && self.index == -1
    }

    pub fn read(buffer: &mut SerializedBuffer) -> Result<OutPoint> {
        let hash = buffer.get_hash()?;
        let index = buffer.get_i32()?;
        Ok(OutPoint { hash, index })
    }

    pub fn write(&self, buffer: &mut SerializedBuffer) {
        buffer.put_hash(&self.hash).put_i32(self.index);
    }

    /// The 36-byte serialized form
    pub fn serialize(&self) -> Vec<u8> {
        let mut buffer = SerializedBuffer::with_capacity(36);
        self.write(&mut buffer);
        buffer.into_bytes()
    }
}

/// A transaction input.
///
/// The input knows its ordinal position in the parent transaction; the
/// parent owns the list, so there is no owning back-reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    index: u32,
    out_point: OutPoint,
    script_bytes: Vec<u8>,
    sequence: u32,
}

impl TransactionInput {
    /// Creates an unsigned input with an empty script
    pub fn new(index: u32, out_point: OutPoint) -> TransactionInput {
        TransactionInput {
            index,
            out_point,
            script_bytes: Vec::new(),
            sequence: 0xffff_ffff,
        }
    }

    pub fn read(index: u32, buffer: &mut SerializedBuffer) -> Result<TransactionInput> {
        let out_point = OutPoint::read(buffer)?;
        let script_bytes = buffer.get_var_bytes()?;
        let sequence = buffer.get_u32()?;
        Ok(TransactionInput {
            index,
            out_point,
            script_bytes,
            sequence,
        })
    }

    pub fn write(&self, buffer: &mut SerializedBuffer) {
        self.out_point.write(buffer);
        buffer.put_var_bytes(&self.script_bytes).put_u32(self.sequence);
    }

    /// Ordinal position within the parent transaction
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn out_point(&self) -> &OutPoint {
        &self.out_point
    }

    pub fn script_bytes(&self) -> &[u8] {
        &self.script_bytes
    }

    pub fn set_script_bytes(&mut self, script_bytes: Vec<u8>) {
        self.script_bytes = script_bytes;
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Writes the input as it appears in a signature serialization.
    ///
    /// The signing input carries the replacement script; every other input
    /// carries an empty script, and its sequence is preserved only under
    /// SIGHASH_ALL.
    fn write_for_signature(
        &self,
        signing_index: u32,
        mode: SigHashMode,
        subscript: &[u8],
        buffer: &mut SerializedBuffer,
    ) {
        self.out_point.write(buffer);
        buffer.put_var_bytes(subscript);
        if mode == SigHashMode::All || self.index == signing_index {
            buffer.put_u32(self.sequence);
        } else {
            buffer.put_u32(0);
        }
    }
}

/// A transaction output: a value in satoshis and the script that locks it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    index: u32,
    value: u64,
    script_bytes: Vec<u8>,
}

impl TransactionOutput {
    pub fn new(index: u32, value: u64, script_bytes: Vec<u8>) -> TransactionOutput {
        TransactionOutput {
            index,
            value,
            script_bytes,
        }
    }

    /// Creates a standard pay-to-pubkey-hash output for the address
    pub fn pay_to_address(index: u32, value: u64, address: &Address) -> TransactionOutput {
        TransactionOutput {
            index,
            value,
            script_bytes: pay_to_pubkey_hash(address.hash()),
        }
    }

    pub fn read(index: u32, buffer: &mut SerializedBuffer) -> Result<TransactionOutput> {
        let value = buffer.get_u64()?;
        let script_bytes = buffer.get_var_bytes()?;
        Ok(TransactionOutput {
            index,
            value,
            script_bytes,
        })
    }

    pub fn write(&self, buffer: &mut SerializedBuffer) {
        buffer.put_u64(self.value).put_var_bytes(&self.script_bytes);
    }

    /// The serialized form used by the normalized transaction ID
    pub fn serialize(&self) -> Vec<u8> {
        let mut buffer = SerializedBuffer::with_capacity(9 + self.script_bytes.len());
        self.write(&mut buffer);
        buffer.into_bytes()
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn script_bytes(&self) -> &[u8] {
        &self.script_bytes
    }

    /// Writes the output as it appears in a signature serialization.
    ///
    /// Under SIGHASH_SINGLE, outputs before the signing index become the
    /// "value -1, empty script" placeholder.
    fn write_for_signature(
        &self,
        signing_index: u32,
        mode: SigHashMode,
        buffer: &mut SerializedBuffer,
    ) {
        if mode == SigHashMode::Single && self.index != signing_index {
            buffer.put_u64(u64::MAX).put_u8(0);
        } else {
            self.write(buffer);
        }
    }
}

/// An input ready for signing: the outpoint being spent, the value and
/// script of the connected output, and the key that controls it
pub struct SignedInput {
    key: ECKey,
    out_point: OutPoint,
    value: u64,
    script_bytes: Vec<u8>,
}

impl SignedInput {
    pub fn new(key: ECKey, out_point: OutPoint, value: u64, script_bytes: Vec<u8>) -> SignedInput {
        SignedInput {
            key,
            out_point,
            value,
            script_bytes,
        }
    }

    pub fn key(&self) -> &ECKey {
        &self.key
    }

    pub fn out_point(&self) -> &OutPoint {
        &self.out_point
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn script_bytes(&self) -> &[u8] {
        &self.script_bytes
    }
}

/// A transaction
#[derive(Debug, Clone)]
pub struct Transaction {
    version: u32,
    inputs: Vec<TransactionInput>,
    outputs: Vec<TransactionOutput>,
    lock_time: u32,
    tx_data: Vec<u8>,
    hash: Hash256,
    normalized_id: Hash256,
    coinbase: bool,
}

impl Transaction {
    /// Builds and signs a new transaction spending the supplied inputs.
    ///
    /// Each input script is created as `<sig+type> <pubkey>` using
    /// SIGHASH_ALL over the connected output's script.
    pub fn build_signed(
        signed_inputs: &[SignedInput],
        outputs: Vec<TransactionOutput>,
    ) -> Result<Transaction> {
        let version = 1u32;
        let lock_time = 0u32;
        let mut inputs: Vec<TransactionInput> = signed_inputs
            .iter()
            .enumerate()
            .map(|(i, input)| TransactionInput::new(i as u32, input.out_point().clone()))
            .collect();
        // Sign each input against the connected output's script
        for (i, signed) in signed_inputs.iter().enumerate() {
            let digest = signature_hash_parts(
                version,
                &inputs,
                &outputs,
                lock_time,
                i as u32,
                SigHashType::ALL,
                signed.script_bytes(),
            )?;
            let mut signature = signed.key().sign(&digest)?;
            signature.push(SigHashType::ALL.to_byte());
            let pubkey = signed.key().public_key_bytes();
            let mut script = Vec::with_capacity(2 + signature.len() + pubkey.len());
            script.push(signature.len() as u8);
            script.extend_from_slice(&signature);
            script.push(pubkey.len() as u8);
            script.extend_from_slice(&pubkey);
            inputs[i].set_script_bytes(script);
        }
        Transaction::from_parts(version, inputs, outputs, lock_time)
    }

    /// Assembles a transaction from its parts, computing the cached
    /// serialization, hash, and normalized ID
    pub fn from_parts(
        version: u32,
        inputs: Vec<TransactionInput>,
        outputs: Vec<TransactionOutput>,
        lock_time: u32,
    ) -> Result<Transaction> {
        let mut buffer = SerializedBuffer::with_capacity(1024);
        write_parts(version, &inputs, &outputs, lock_time, &mut buffer);
        let tx_data = buffer.into_bytes();
        Transaction::assemble(version, inputs, outputs, lock_time, tx_data)
    }

    /// Reads a transaction from its serialized form
    pub fn read(buffer: &mut SerializedBuffer) -> Result<Transaction> {
        buffer.set_start();
        let version = buffer.get_u32()?;
        let input_count = buffer.get_var_int()? as usize;
        let mut inputs = Vec::with_capacity(input_count.min(1000));
        for i in 0..input_count {
            inputs.push(TransactionInput::read(i as u32, buffer)?);
        }
        let output_count = buffer.get_var_int()? as usize;
        let mut outputs = Vec::with_capacity(output_count.min(1000));
        for i in 0..output_count {
            outputs.push(TransactionOutput::read(i as u32, buffer)?);
        }
        let lock_time = buffer.get_u32()?;
        let tx_data = buffer.segment().to_vec();
        Transaction::assemble(version, inputs, outputs, lock_time, tx_data)
    }

    fn assemble(
        version: u32,
        inputs: Vec<TransactionInput>,
        outputs: Vec<TransactionOutput>,
        lock_time: u32,
        tx_data: Vec<u8>,
    ) -> Result<Transaction> {
        let hash = Hash256::from_wire_bytes(&double_sha256(&tx_data));
        // A coinbase transaction has a single unconnected input with a
        // zero transaction hash and an output index of -1
        let coinbase = inputs.len() == 1 && inputs[0].out_point().is_coinbase();
        let mut norm_data = Vec::new();
        if !coinbase {
            for input in &inputs {
                norm_data.extend_from_slice(&input.out_point().serialize());
            }
        }
        for output in &outputs {
            norm_data.extend_from_slice(&output.serialize());
        }
        let normalized_id = Hash256::from_wire_bytes(&double_sha256(&norm_data));
        if inputs.is_empty() {
            return Err(CoreError::invalid_item("transaction has no inputs", hash));
        }
        if outputs.is_empty() {
            return Err(CoreError::invalid_item("transaction has no outputs", hash));
        }
        Ok(Transaction {
            version,
            inputs,
            outputs,
            lock_time,
            tx_data,
            hash,
            normalized_id,
            coinbase,
        })
    }

    /// Writes the canonical serialization
    pub fn write(&self, buffer: &mut SerializedBuffer) {
        buffer.put_bytes(&self.tx_data);
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn lock_time(&self) -> u32 {
        self.lock_time
    }

    pub fn inputs(&self) -> &[TransactionInput] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TransactionOutput] {
        &self.outputs
    }

    /// The transaction hash (double SHA-256 of the serialization, reversed)
    pub fn hash(&self) -> &Hash256 {
        &self.hash
    }

    /// The normalized transaction ID over outpoints and outputs only
    pub fn normalized_id(&self) -> &Hash256 {
        &self.normalized_id
    }

    pub fn is_coinbase(&self) -> bool {
        self.coinbase
    }

    /// The exact serialized bytes the hash was computed over
    pub fn bytes(&self) -> &[u8] {
        &self.tx_data
    }

    /// Serializes the transaction for a signature, without the trailing
    /// signature-hash-type word
    pub fn serialize_for_signature(
        &self,
        index: u32,
        sig_hash_type: SigHashType,
        subscript: &[u8],
    ) -> Result<Vec<u8>> {
        serialize_for_signature_parts(
            self.version,
            &self.inputs,
            &self.outputs,
            self.lock_time,
            index,
            sig_hash_type,
            subscript,
        )
    }

    /// The digest that is signed: the signature serialization with the
    /// 32-bit signature-hash-type appended, double hashed
    pub fn signature_hash(
        &self,
        index: u32,
        sig_hash_type: SigHashType,
        subscript: &[u8],
    ) -> Result<[u8; 32]> {
        signature_hash_parts(
            self.version,
            &self.inputs,
            &self.outputs,
            self.lock_time,
            index,
            sig_hash_type,
            subscript,
        )
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for Transaction {}

fn write_parts(
    version: u32,
    inputs: &[TransactionInput],
    outputs: &[TransactionOutput],
    lock_time: u32,
    buffer: &mut SerializedBuffer,
) {
    buffer.put_u32(version);
    buffer.put_var_int(inputs.len() as u64);
    for input in inputs {
        input.write(buffer);
    }
    buffer.put_var_int(outputs.len() as u64);
    for output in outputs {
        output.write(buffer);
    }
    buffer.put_u32(lock_time);
}

fn serialize_for_signature_parts(
    version: u32,
    inputs: &[TransactionInput],
    outputs: &[TransactionOutput],
    lock_time: u32,
    index: u32,
    sig_hash_type: SigHashType,
    subscript: &[u8],
) -> Result<Vec<u8>> {
    if index as usize >= inputs.len() {
        return Err(CoreError::invalid("transaction input index is not valid"));
    }
    let mut buffer = SerializedBuffer::with_capacity(1024);
    buffer.put_u32(version);
    // Under ANYONE_CAN_PAY only the signing input is committed to
    let signing_inputs: Vec<&TransactionInput> = if sig_hash_type.anyone_can_pay {
        vec![&inputs[index as usize]]
    } else {
        inputs.iter().collect()
    };
    buffer.put_var_int(signing_inputs.len() as u64);
    for input in signing_inputs {
        let script: &[u8] = if input.index() == index { subscript } else { &[] };
        input.write_for_signature(index, sig_hash_type.mode, script, &mut buffer);
    }
    match sig_hash_type.mode {
        SigHashMode::None => {
            buffer.put_var_int(0);
        }
        SigHashMode::Single => {
            if outputs.len() <= index as usize {
                return Err(CoreError::invalid(
                    "input index out-of-range for SIGHASH_SINGLE",
                ));
            }
            buffer.put_var_int(index as u64 + 1);
            for output in outputs.iter().take(index as usize + 1) {
                output.write_for_signature(index, sig_hash_type.mode, &mut buffer);
            }
        }
        SigHashMode::All => {
            buffer.put_var_int(outputs.len() as u64);
            for output in outputs {
                output.write_for_signature(index, sig_hash_type.mode, &mut buffer);
            }
        }
    }
    buffer.put_u32(lock_time);
    Ok(buffer.into_bytes())
}

fn signature_hash_parts(
    version: u32,
    inputs: &[TransactionInput],
    outputs: &[TransactionOutput],
    lock_time: u32,
    index: u32,
    sig_hash_type: SigHashType,
    subscript: &[u8],
) -> Result<[u8; 32]> {
    let mut contents = serialize_for_signature_parts(
        version,
        inputs,
        outputs,
        lock_time,
        index,
        sig_hash_type,
        subscript,
    )?;
    contents.extend_from_slice(&(sig_hash_type.to_byte() as u32).to_le_bytes());
    Ok(double_sha256(&contents))
}

/// Checks an input signature against the transaction it belongs to.
///
/// The signature's trailing byte selects the signature-hash type; the
/// digest is computed over the connected output's script.
pub struct TransactionSignatureChecker<'a> {
    transaction: &'a Transaction,
    input_index: u32,
    script_pubkey: &'a [u8],
}

impl<'a> TransactionSignatureChecker<'a> {
    pub fn new(
        transaction: &'a Transaction,
        input_index: u32,
        script_pubkey: &'a [u8],
    ) -> TransactionSignatureChecker<'a> {
        TransactionSignatureChecker {
            transaction,
            input_index,
            script_pubkey,
        }
    }
}

impl SignatureChecker for TransactionSignatureChecker<'_> {
    fn check_signature(&self, signature: &[u8], public_key: &[u8]) -> bool {
        let Some((&type_byte, der)) = signature.split_last() else {
            return false;
        };
        let Ok(sig_hash_type) = SigHashType::from_byte(type_byte) else {
            return false;
        };
        let Ok(digest) =
            self.transaction
                .signature_hash(self.input_index, sig_hash_type, self.script_pubkey)
        else {
            return false;
        };
        ECKey::verify_with_key(&digest, der, public_key).unwrap_or(false)
    }
}
