use crate::prelude::*;
use bitcoin::hashes::{hash160, Hash};
use bitcoin::secp256k1::{self, ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{Amount, Script, Transaction};

use crate::policy::error::{invalid_argument_error, ChannelError};

/// HASH160 (RIPEMD160 of SHA256) of the data
pub fn hash160(data: &[u8]) -> [u8; 20] {
    hash160::Hash::hash(data).to_byte_array()
}

/// Convert a [Signature] to Bitcoin signature bytes, with SIGHASH_ALL
pub fn signature_to_bitcoin_vec(sig: Signature) -> Vec<u8> {
    let mut sigvec = sig.serialize_der().to_vec();
    sigvec.push(EcdsaSighashType::All as u8);
    sigvec
}

/// Generate 32 random bytes from the OS RNG
pub fn generate_secret_bytes() -> [u8; 32] {
    use secp256k1::rand::RngCore;
    let mut bytes = [0; 32];
    let mut rng = secp256k1::rand::rngs::OsRng;
    rng.fill_bytes(&mut bytes);
    bytes
}

/// Generate a fresh secret key from the OS RNG
pub fn generate_secret_key() -> SecretKey {
    SecretKey::new(&mut secp256k1::rand::rngs::OsRng)
}

/// The legacy (pre-segwit) SIGHASH_ALL digest of an input, committing to `script_code`.
///
/// For a P2SH input the script code is the redeem script.
pub fn legacy_sighash(
    tx: &Transaction,
    input: usize,
    script_code: &Script,
) -> Result<Message, ChannelError> {
    if input >= tx.input.len() {
        return Err(invalid_argument_error(format!(
            "{}: bad input index: {} >= {}",
            short_function!(),
            input,
            tx.input.len()
        )));
    }
    let sighash = SighashCache::new(tx)
        .legacy_signature_hash(input, script_code, EcdsaSighashType::All.to_u32())
        .map_err(|e| invalid_argument_error(format!("legacy_sighash: {}", e)))?;
    Ok(Message::from_digest(sighash.to_byte_array()))
}

/// The segwit v0 SIGHASH_ALL digest of an input spending a P2WSH output
pub fn segwit_sighash(
    tx: &Transaction,
    input: usize,
    witness_script: &Script,
    value_sat: u64,
) -> Result<Message, ChannelError> {
    let sighash = SighashCache::new(tx)
        .p2wsh_signature_hash(input, witness_script, Amount::from_sat(value_sat), EcdsaSighashType::All)
        .map_err(|e| invalid_argument_error(format!("segwit_sighash: {}", e)))?;
    Ok(Message::from_digest(sighash.to_byte_array()))
}

/// Sign an input spending a P2WSH output with the given witness script
pub fn sign_segwit_input(
    secp_ctx: &Secp256k1<secp256k1::All>,
    tx: &Transaction,
    input: usize,
    witness_script: &Script,
    value_sat: u64,
    key: &SecretKey,
) -> Result<Signature, ChannelError> {
    let message = segwit_sighash(tx, input, witness_script, value_sat)?;
    Ok(secp_ctx.sign_ecdsa(&message, key))
}

/// Verify a signature over an input spending a P2WSH output
pub fn verify_segwit_input(
    secp_ctx: &Secp256k1<secp256k1::All>,
    tx: &Transaction,
    input: usize,
    witness_script: &Script,
    value_sat: u64,
    sig: &Signature,
    pubkey: &PublicKey,
) -> Result<bool, ChannelError> {
    let message = segwit_sighash(tx, input, witness_script, value_sat)?;
    Ok(secp_ctx.verify_ecdsa(&message, sig, pubkey).is_ok())
}

/// Sign an input spending a P2SH output with the given redeem script
pub fn sign_legacy_input(
    secp_ctx: &Secp256k1<secp256k1::All>,
    tx: &Transaction,
    input: usize,
    redeem_script: &Script,
    key: &SecretKey,
) -> Result<Signature, ChannelError> {
    let message = legacy_sighash(tx, input, redeem_script)?;
    Ok(secp_ctx.sign_ecdsa(&message, key))
}

/// Verify a signature over an input spending a P2SH output
pub fn verify_legacy_input(
    secp_ctx: &Secp256k1<secp256k1::All>,
    tx: &Transaction,
    input: usize,
    redeem_script: &Script,
    sig: &Signature,
    pubkey: &PublicKey,
) -> Result<bool, ChannelError> {
    let message = legacy_sighash(tx, input, redeem_script)?;
    Ok(secp_ctx.verify_ecdsa(&message, sig, pubkey).is_ok())
}
