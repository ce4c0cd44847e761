//! Transaction signing and key tests

use peercore::hash::double_sha256;
use peercore::keys::{Address, ECKey};
use peercore::netparams::{self, Network, NODE_NETWORK};
use peercore::script::{
    pay_to_pubkey_hash, verify_script, SigHashMode, SigHashType,
};
use peercore::transaction::{
    OutPoint, SignedInput, Transaction, TransactionInput, TransactionOutput,
    TransactionSignatureChecker,
};
use peercore::{Hash256, SerializedBuffer};

fn configure() {
    netparams::configure(Network::Prodnet, "app", 60001, NODE_NETWORK).unwrap();
}

/// The fixed three-input, three-output transaction used by the signing law
fn reference_tx() -> Transaction {
    let inputs: Vec<TransactionInput> = (0u32..3)
        .map(|i| {
            let mut input = TransactionInput::new(
                i,
                OutPoint::new(Hash256::from_bytes([i as u8 + 0x40; 32]), i as i32),
            );
            input.set_script_bytes(vec![0x51, i as u8]);
            input
        })
        .collect();
    let outputs: Vec<TransactionOutput> = (0u32..3)
        .map(|i| TransactionOutput::new(i, (i as u64 + 1) * 10_000, vec![0x52, i as u8]))
        .collect();
    Transaction::from_parts(1, inputs, outputs, 0).unwrap()
}

/// Builds the expected signature serialization by hand for the given
/// mode, signing input 1 with the subscript `0x51 0x87`
fn expected_serialization(mode: SigHashMode, anyone_can_pay: bool) -> Vec<u8> {
    let tx = reference_tx();
    let subscript = [0x51u8, 0x87];
    let mut buffer = SerializedBuffer::new();
    buffer.put_u32(1);
    if anyone_can_pay {
        buffer.put_var_int(1);
        tx.inputs()[1].out_point().write(&mut buffer);
        buffer.put_var_bytes(&subscript);
        buffer.put_u32(0xffff_ffff);
    } else {
        buffer.put_var_int(3);
        for (i, input) in tx.inputs().iter().enumerate() {
            input.out_point().write(&mut buffer);
            if i == 1 {
                buffer.put_var_bytes(&subscript);
            } else {
                buffer.put_var_bytes(&[]);
            }
            if mode == SigHashMode::All || i == 1 {
                buffer.put_u32(0xffff_ffff);
            } else {
                buffer.put_u32(0);
            }
        }
    }
    match mode {
        SigHashMode::All => {
            buffer.put_var_int(3);
            for output in tx.outputs() {
                output.write(&mut buffer);
            }
        }
        SigHashMode::None => {
            buffer.put_var_int(0);
        }
        SigHashMode::Single => {
            buffer.put_var_int(2);
            buffer.put_u64(u64::MAX).put_u8(0);
            tx.outputs()[1].write(&mut buffer);
        }
    }
    buffer.put_u32(0);
    buffer.into_bytes()
}

#[test]
fn signing_law_all_six_combinations() {
    configure();
    let tx = reference_tx();
    let key = ECKey::from_secret(&[0x5au8; 32], true).unwrap();
    let subscript = [0x51u8, 0x87];
    for mode in [SigHashMode::All, SigHashMode::None, SigHashMode::Single] {
        for anyone_can_pay in [false, true] {
            let ty = SigHashType::new(mode, anyone_can_pay);
            // Serialization matches the independently constructed bytes
            let serialized = tx.serialize_for_signature(1, ty, &subscript).unwrap();
            assert_eq!(
                serialized,
                expected_serialization(mode, anyone_can_pay),
                "serialization for {:?}/{}",
                mode,
                anyone_can_pay
            );
            // verify(sign(tx, key), pubkey) holds
            let digest = tx.signature_hash(1, ty, &subscript).unwrap();
            let signature = key.sign(&digest).unwrap();
            assert!(
                key.verify(&digest, &signature).unwrap(),
                "signature for {:?}/{}",
                mode,
                anyone_can_pay
            );
        }
    }
}

#[test]
fn sighash_digest_appends_type_word() {
    configure();
    let tx = reference_tx();
    let ty = SigHashType::new(SigHashMode::Single, true);
    let mut contents = tx.serialize_for_signature(1, ty, &[0x51, 0x87]).unwrap();
    contents.extend_from_slice(&(ty.to_byte() as u32).to_le_bytes());
    assert_eq!(
        tx.signature_hash(1, ty, &[0x51, 0x87]).unwrap(),
        double_sha256(&contents)
    );
}

#[test]
fn signed_transaction_spends_p2pkh() {
    configure();
    let key = ECKey::new();
    let connected = pay_to_pubkey_hash(&key.public_key_hash());
    let input = SignedInput::new(
        key,
        OutPoint::new(Hash256::from_bytes([0x77; 32]), 0),
        1_000_000,
        connected.clone(),
    );
    let address = Address::new([0x42; 20]).unwrap();
    let output = TransactionOutput::pay_to_address(0, 990_000, &address);
    let tx = Transaction::build_signed(&[input], vec![output]).unwrap();

    let checker = TransactionSignatureChecker::new(&tx, 0, &connected);
    assert!(verify_script(tx.inputs()[0].script_bytes(), &connected, &checker).unwrap());
    // The scriptSig layout is <sig+type> <pubkey> with SIGHASH_ALL
    let script = tx.inputs()[0].script_bytes();
    let sig_length = script[0] as usize;
    assert_eq!(script[sig_length], 1); // trailing SIGHASH_ALL byte
}

#[test]
fn serialized_signed_transaction_still_verifies() {
    configure();
    let key = ECKey::new();
    let connected = pay_to_pubkey_hash(&key.public_key_hash());
    let input = SignedInput::new(
        key,
        OutPoint::new(Hash256::from_bytes([0x78; 32]), 2),
        500_000,
        connected.clone(),
    );
    let output = TransactionOutput::new(0, 400_000, pay_to_pubkey_hash(&[3; 20]));
    let tx = Transaction::build_signed(&[input], vec![output]).unwrap();

    // Round-trip through the wire form
    let mut buffer = SerializedBuffer::new();
    tx.write(&mut buffer);
    let mut buffer = SerializedBuffer::from_bytes(buffer.into_bytes());
    let decoded = Transaction::read(&mut buffer).unwrap();
    assert_eq!(decoded.hash(), tx.hash());
    let checker = TransactionSignatureChecker::new(&decoded, 0, &connected);
    assert!(verify_script(decoded.inputs()[0].script_bytes(), &connected, &checker).unwrap());
}

#[test]
fn tampered_output_breaks_signature() {
    configure();
    let key = ECKey::new();
    let connected = pay_to_pubkey_hash(&key.public_key_hash());
    let input = SignedInput::new(
        key,
        OutPoint::new(Hash256::from_bytes([0x79; 32]), 0),
        500_000,
        connected.clone(),
    );
    let output = TransactionOutput::new(0, 400_000, pay_to_pubkey_hash(&[3; 20]));
    let tx = Transaction::build_signed(&[input], vec![output]).unwrap();

    // Redirect the output after signing
    let tampered_output = TransactionOutput::new(0, 400_000, pay_to_pubkey_hash(&[4; 20]));
    let tampered =
        Transaction::from_parts(1, tx.inputs().to_vec(), vec![tampered_output], 0).unwrap();
    let checker = TransactionSignatureChecker::new(&tampered, 0, &connected);
    assert!(!verify_script(tampered.inputs()[0].script_bytes(), &connected, &checker).unwrap());
}

#[test]
fn message_signing_round_trip() {
    configure();
    let key = ECKey::new();
    let signature = key.sign_message("peercore signed message").unwrap();
    let recovered = ECKey::verify_message("peercore signed message", &signature).unwrap();
    assert_eq!(recovered, key.public_key_bytes());
    // The recovered key's address matches the signer's
    let recovered_key = ECKey::from_public(&recovered).unwrap();
    assert_eq!(
        recovered_key.to_address().unwrap(),
        key.to_address().unwrap()
    );
}

#[test]
fn dumped_key_round_trip_matches_address() {
    configure();
    let key = ECKey::from_secret(&[0x4bu8; 32], true).unwrap();
    let dumped = key.to_dumped_key().unwrap();
    // Production network dumped keys start with '5' (uncompressed) or
    // 'K'/'L' (compressed)
    assert!(dumped.starts_with('K') || dumped.starts_with('L'));
    let restored = ECKey::from_dumped_key(&dumped).unwrap();
    assert_eq!(
        restored.to_address().unwrap(),
        key.to_address().unwrap()
    );
}

#[test]
fn encrypted_key_protects_scalar() {
    configure();
    let mut key = ECKey::from_secret(&[0x3cu8; 32], true).unwrap();
    key.encrypt_private_key("open sesame").unwrap();
    let container = key.encrypted_private_key().unwrap();
    let recovered = container.decrypt("open sesame").unwrap();
    assert_eq!(recovered.secret_bytes(), [0x3cu8; 32]);
    assert!(container.decrypt("wrong").is_err());
}
