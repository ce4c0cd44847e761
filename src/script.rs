//! Script opcodes and a stack evaluator for standard scripts
//!
//! The evaluator covers the opcodes used by the standard transaction
//! templates (pay-to-pubkey-hash, pay-to-pubkey, multisig).  Signature
//! checking is delegated to a [`SignatureChecker`] so the evaluator itself
//! stays free of transaction context.

use crate::error::{CoreError, Result};
use crate::hash::{double_sha256, hash160, sha256};
use ripemd::{Digest, Ripemd160};

/// Push an empty array
pub const OP_0: u8 = 0x00;
/// The next byte holds the push length
pub const OP_PUSHDATA1: u8 = 0x4c;
/// The next two bytes hold the push length
pub const OP_PUSHDATA2: u8 = 0x4d;
/// The next four bytes hold the push length
pub const OP_PUSHDATA4: u8 = 0x4e;
/// Push the number 1
pub const OP_1: u8 = 0x51;
/// Push the number 16
pub const OP_16: u8 = 0x60;
pub const OP_NOP: u8 = 0x61;
pub const OP_VERIFY: u8 = 0x69;
pub const OP_RETURN: u8 = 0x6a;
pub const OP_DROP: u8 = 0x75;
pub const OP_DUP: u8 = 0x76;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_RIPEMD160: u8 = 0xa6;
pub const OP_SHA256: u8 = 0xa8;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_HASH256: u8 = 0xaa;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKSIGVERIFY: u8 = 0xad;
pub const OP_CHECKMULTISIG: u8 = 0xae;

/// Everything about the transaction is signed except the input scripts
pub const SIGHASH_ALL: u8 = 1;
/// The outputs are not signed
pub const SIGHASH_NONE: u8 = 2;
/// Outputs up to the signing input's index are signed
pub const SIGHASH_SINGLE: u8 = 3;
/// Only the signing input is included in the signature
pub const SIGHASH_ANYONE_CAN_PAY: u8 = 0x80;

/// Maximum script length
pub const MAX_SCRIPT_SIZE: usize = 10_000;

/// Maximum stack depth during execution
pub const MAX_STACK_SIZE: usize = 1000;

/// Maximum number of non-push operations per script
pub const MAX_SCRIPT_OPS: usize = 201;

/// Base signature-hash mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigHashMode {
    All,
    None,
    Single,
}

/// A signature-hash type: base mode plus the ANYONE_CAN_PAY modifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SigHashType {
    pub mode: SigHashMode,
    pub anyone_can_pay: bool,
}

impl SigHashType {
    pub const ALL: SigHashType = SigHashType {
        mode: SigHashMode::All,
        anyone_can_pay: false,
    };

    pub fn new(mode: SigHashMode, anyone_can_pay: bool) -> SigHashType {
        SigHashType {
            mode,
            anyone_can_pay,
        }
    }

    /// The type byte appended to signatures
    pub fn to_byte(self) -> u8 {
        let base = match self.mode {
            SigHashMode::All => SIGHASH_ALL,
            SigHashMode::None => SIGHASH_NONE,
            SigHashMode::Single => SIGHASH_SINGLE,
        };
        base | if self.anyone_can_pay {
            SIGHASH_ANYONE_CAN_PAY
        } else {
            0
        }
    }

    /// Decodes a signature-hash type byte
    pub fn from_byte(value: u8) -> Result<SigHashType> {
        let anyone_can_pay = value & SIGHASH_ANYONE_CAN_PAY != 0;
        let mode = match value & !SIGHASH_ANYONE_CAN_PAY {
            SIGHASH_ALL => SigHashMode::All,
            SIGHASH_NONE => SigHashMode::None,
            SIGHASH_SINGLE => SigHashMode::Single,
            other => {
                return Err(CoreError::invalid(format!(
                    "signature hash type {} is not supported",
                    other
                )))
            }
        };
        Ok(SigHashType {
            mode,
            anyone_can_pay,
        })
    }
}

/// Checks transaction signatures on behalf of the evaluator.
///
/// The signature bytes include the trailing signature-hash-type byte; the
/// checker owns the transaction context needed to compute the digest.
pub trait SignatureChecker {
    fn check_signature(&self, signature: &[u8], public_key: &[u8]) -> bool;
}

/// A checker that rejects every signature, for scripts with no
/// signature operations
pub struct NullSignatureChecker;

impl SignatureChecker for NullSignatureChecker {
    fn check_signature(&self, _signature: &[u8], _public_key: &[u8]) -> bool {
        false
    }
}

/// Builds the standard pay-to-pubkey-hash output script:
/// `OP_DUP OP_HASH160 <pubkey-hash> OP_EQUALVERIFY OP_CHECKSIG`
pub fn pay_to_pubkey_hash(pubkey_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.push(OP_DUP);
    script.push(OP_HASH160);
    script.push(20);
    script.extend_from_slice(pubkey_hash);
    script.push(OP_EQUALVERIFY);
    script.push(OP_CHECKSIG);
    script
}

/// Checks for the standard pay-to-pubkey-hash template
pub fn is_pay_to_pubkey_hash(script: &[u8]) -> bool {
    script.len() == 25
        && script[0] == OP_DUP
        && script[1] == OP_HASH160
        && script[2] == 20
        && script[23] == OP_EQUALVERIFY
        && script[24] == OP_CHECKSIG
}

/// Verifies an input script against an output script.
///
/// The input script runs first, then the output script on the resulting
/// stack.  The scripts verify if execution succeeds and leaves a single
/// true value on the stack.
pub fn verify_script(
    script_sig: &[u8],
    script_pubkey: &[u8],
    checker: &dyn SignatureChecker,
) -> Result<bool> {
    let mut stack: Vec<Vec<u8>> = Vec::new();
    if !eval_script(script_sig, &mut stack, checker)? {
        return Ok(false);
    }
    if !eval_script(script_pubkey, &mut stack, checker)? {
        return Ok(false);
    }
    Ok(stack.len() == 1 && cast_to_bool(&stack[0]))
}

/// Executes a script against the given stack
pub fn eval_script(
    script: &[u8],
    stack: &mut Vec<Vec<u8>>,
    checker: &dyn SignatureChecker,
) -> Result<bool> {
    if script.len() > MAX_SCRIPT_SIZE {
        return Err(CoreError::invalid("script is too long"));
    }
    let mut op_count = 0;
    let mut offset = 0;
    while offset < script.len() {
        let opcode = script[offset];
        offset += 1;
        if stack.len() > MAX_STACK_SIZE {
            return Err(CoreError::invalid("script stack overflow"));
        }
        // Direct pushes
        if (1..=0x4b).contains(&opcode) {
            let length = opcode as usize;
            let bytes = read_push(script, &mut offset, length)?;
            stack.push(bytes);
            continue;
        }
        match opcode {
            OP_0 => stack.push(Vec::new()),
            OP_PUSHDATA1 => {
                let length = read_push(script, &mut offset, 1)?[0] as usize;
                let bytes = read_push(script, &mut offset, length)?;
                stack.push(bytes);
            }
            OP_PUSHDATA2 => {
                let prefix = read_push(script, &mut offset, 2)?;
                let length = u16::from_le_bytes([prefix[0], prefix[1]]) as usize;
                let bytes = read_push(script, &mut offset, length)?;
                stack.push(bytes);
            }
            OP_PUSHDATA4 => {
                let prefix = read_push(script, &mut offset, 4)?;
                let length = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
                let bytes = read_push(script, &mut offset, length as usize)?;
                stack.push(bytes);
            }
            _ => {
                op_count += 1;
                if op_count > MAX_SCRIPT_OPS {
                    return Err(CoreError::invalid("script operation limit exceeded"));
                }
                if !execute_opcode(opcode, stack, checker)? {
                    return Ok(false);
                }
            }
        }
    }
    Ok(true)
}

fn read_push(script: &[u8], offset: &mut usize, length: usize) -> Result<Vec<u8>> {
    if *offset + length > script.len() {
        return Err(CoreError::invalid("script push extends past end of script"));
    }
    let bytes = script[*offset..*offset + length].to_vec();
    *offset += length;
    Ok(bytes)
}

fn pop(stack: &mut Vec<Vec<u8>>) -> Result<Vec<u8>> {
    stack
        .pop()
        .ok_or_else(|| CoreError::invalid("script stack underflow"))
}

/// A stack value is true if any byte is set, ignoring a negative-zero
/// sign byte in the last position
fn cast_to_bool(value: &[u8]) -> bool {
    for (i, &byte) in value.iter().enumerate() {
        if byte != 0 {
            return !(i == value.len() - 1 && byte == 0x80);
        }
    }
    false
}

fn execute_opcode(
    opcode: u8,
    stack: &mut Vec<Vec<u8>>,
    checker: &dyn SignatureChecker,
) -> Result<bool> {
    match opcode {
        OP_1..=OP_16 => {
            stack.push(vec![opcode - OP_1 + 1]);
            Ok(true)
        }
        OP_NOP => Ok(true),
        OP_VERIFY => {
            let value = pop(stack)?;
            Ok(cast_to_bool(&value))
        }
        OP_RETURN => Ok(false),
        OP_DROP => {
            pop(stack)?;
            Ok(true)
        }
        OP_DUP => {
            let top = stack
                .last()
                .cloned()
                .ok_or_else(|| CoreError::invalid("script stack underflow"))?;
            stack.push(top);
            Ok(true)
        }
        OP_EQUAL | OP_EQUALVERIFY => {
            let a = pop(stack)?;
            let b = pop(stack)?;
            let equal = a == b;
            if opcode == OP_EQUAL {
                stack.push(vec![u8::from(equal)]);
                Ok(true)
            } else {
                Ok(equal)
            }
        }
        OP_RIPEMD160 => {
            let value = pop(stack)?;
            stack.push(Ripemd160::digest(&value).to_vec());
            Ok(true)
        }
        OP_SHA256 => {
            let value = pop(stack)?;
            stack.push(sha256(&value).to_vec());
            Ok(true)
        }
        OP_HASH160 => {
            let value = pop(stack)?;
            stack.push(hash160(&value).to_vec());
            Ok(true)
        }
        OP_HASH256 => {
            let value = pop(stack)?;
            stack.push(double_sha256(&value).to_vec());
            Ok(true)
        }
        OP_CHECKSIG | OP_CHECKSIGVERIFY => {
            let public_key = pop(stack)?;
            let signature = pop(stack)?;
            let valid = checker.check_signature(&signature, &public_key);
            if opcode == OP_CHECKSIG {
                stack.push(vec![u8::from(valid)]);
                Ok(true)
            } else {
                Ok(valid)
            }
        }
        OP_CHECKMULTISIG => {
            let key_count = small_int(&pop(stack)?)?;
            if key_count > 20 {
                return Err(CoreError::invalid("too many multisig public keys"));
            }
            let mut keys = Vec::with_capacity(key_count);
            for _ in 0..key_count {
                keys.push(pop(stack)?);
            }
            let sig_count = small_int(&pop(stack)?)?;
            if sig_count > key_count {
                return Err(CoreError::invalid("more signatures than public keys"));
            }
            let mut sigs = Vec::with_capacity(sig_count);
            for _ in 0..sig_count {
                sigs.push(pop(stack)?);
            }
            // The original protocol pops one extra stack element
            pop(stack)?;
            // Signatures must match keys in order
            let mut key_iter = keys.iter();
            let mut matched = 0;
            for sig in &sigs {
                for key in key_iter.by_ref() {
                    if checker.check_signature(sig, key) {
                        matched += 1;
                        break;
                    }
                }
            }
            stack.push(vec![u8::from(matched == sigs.len())]);
            Ok(true)
        }
        _ => Err(CoreError::invalid(format!(
            "unsupported opcode {:#04x}",
            opcode
        ))),
    }
}

fn small_int(value: &[u8]) -> Result<usize> {
    match value.len() {
        0 => Ok(0),
        1 => Ok(value[0] as usize),
        _ => Err(CoreError::invalid("script number is out of range")),
    }
}
