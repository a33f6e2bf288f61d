use bitcoin::absolute::LockTime;
use bitcoin::opcodes::all::{OP_CHECKMULTISIG, OP_PUSHNUM_2};
use bitcoin::script::Builder;
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::PublicKey;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};

use crate::policy::error::{insufficient_funds_error, invalid_argument_error, ChannelError};
use crate::prelude::*;
use crate::util::crypto_utils::signature_to_bitcoin_vec;

/// Outputs below this value are not relayed
pub const DUST_LIMIT_SAT: u64 = 546;

/// The 2-of-2 funding redeem script, keys in lexicographic order
pub fn make_funding_redeemscript(a: &PublicKey, b: &PublicKey) -> ScriptBuf {
    let a_first = a.serialize()[..] < b.serialize()[..];
    let (first, second) = if a_first { (a, b) } else { (b, a) };
    Builder::new()
        .push_opcode(OP_PUSHNUM_2)
        .push_key(&bitcoin::PublicKey::new(*first))
        .push_key(&bitcoin::PublicKey::new(*second))
        .push_opcode(OP_PUSHNUM_2)
        .push_opcode(OP_CHECKMULTISIG)
        .into_script()
}

/// The P2WSH output paying to the funding redeem script
pub fn funding_script_pubkey(funding_redeemscript: &ScriptBuf) -> ScriptBuf {
    ScriptBuf::new_p2wsh(&funding_redeemscript.wscript_hash())
}

/// Set the witness of the funding input to `<> <sig1> <sig2> <redeem>`,
/// with signatures in the order of their keys in the redeem script.
pub(crate) fn add_funding_sigs(
    tx: &mut Transaction,
    holder_sig: Signature,
    counterparty_sig: Signature,
    holder_funding_key: &PublicKey,
    counterparty_funding_key: &PublicKey,
) -> Result<(), ChannelError> {
    if tx.input.len() != 1 {
        return Err(invalid_argument_error(format!(
            "{}: expected a single funding input, got {}",
            short_function!(),
            tx.input.len()
        )));
    }
    let funding_redeemscript =
        make_funding_redeemscript(holder_funding_key, counterparty_funding_key);

    let ser_holder_sig = signature_to_bitcoin_vec(holder_sig);
    let ser_cp_sig = signature_to_bitcoin_vec(counterparty_sig);

    let holder_sig_first =
        holder_funding_key.serialize()[..] < counterparty_funding_key.serialize()[..];

    let witness = &mut tx.input[0].witness;
    witness.clear();
    witness.push(Vec::<u8>::new());
    if holder_sig_first {
        witness.push(ser_holder_sig);
        witness.push(ser_cp_sig);
    } else {
        witness.push(ser_cp_sig);
        witness.push(ser_holder_sig);
    }
    witness.push(funding_redeemscript.as_bytes());
    Ok(())
}

/// An input with an empty script_sig
pub(crate) fn unsigned_input(previous_output: OutPoint, sequence: Sequence) -> TxIn {
    TxIn { previous_output, script_sig: ScriptBuf::new(), sequence, witness: Witness::default() }
}

/// A version 2 transaction with no lock time
pub(crate) fn build_transaction(input: Vec<TxIn>, output: Vec<TxOut>) -> Transaction {
    Transaction { version: Version::TWO, lock_time: LockTime::ZERO, input, output }
}

/// The sum of the output values
pub(crate) fn total_output_sat(tx: &Transaction) -> u64 {
    tx.output.iter().map(|o| o.value.to_sat()).sum()
}

/// Add a change output if the leftover after `fee_sat` is above dust.
///
/// Fails if the inputs can't cover the outputs plus the fee.
pub fn maybe_add_change_output(
    tx: &mut Transaction,
    input_value_sat: u64,
    fee_sat: u64,
    change_destination_script: ScriptBuf,
) -> Result<(), ChannelError> {
    let needed = total_output_sat(tx)
        .checked_add(fee_sat)
        .ok_or_else(|| invalid_argument_error("output value overflow"))?;
    if input_value_sat < needed {
        return Err(insufficient_funds_error(format!(
            "{}: inputs {} < outputs plus fee {}",
            short_function!(),
            input_value_sat,
            needed
        )));
    }
    let change_sat = input_value_sat - needed;
    if change_sat >= DUST_LIMIT_SAT {
        tx.output.push(TxOut {
            value: Amount::from_sat(change_sat),
            script_pubkey: change_destination_script,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::{Message, Secp256k1, SecretKey};

    fn key(i: u8) -> (SecretKey, PublicKey) {
        let secret = SecretKey::from_slice(&[i; 32]).unwrap();
        (secret, PublicKey::from_secret_key(&Secp256k1::new(), &secret))
    }

    #[test]
    fn funding_redeemscript_is_symmetric_test() {
        let (_, a) = key(1);
        let (_, b) = key(2);
        let script = make_funding_redeemscript(&a, &b);
        assert_eq!(script, make_funding_redeemscript(&b, &a));
        assert_eq!(script.as_bytes()[0], OP_PUSHNUM_2.to_u8());
        assert_eq!(*script.as_bytes().last().unwrap(), OP_CHECKMULTISIG.to_u8());
    }

    #[test]
    fn add_funding_sigs_orders_by_key_test() {
        let secp = Secp256k1::new();
        let (ska, a) = key(1);
        let (skb, b) = key(2);
        let msg = Message::from_digest([9; 32]);
        let siga = secp.sign_ecdsa(&msg, &ska);
        let sigb = secp.sign_ecdsa(&msg, &skb);
        let mut tx1 = build_transaction(
            vec![unsigned_input(OutPoint::null(), Sequence::MAX)],
            vec![],
        );
        let mut tx2 = tx1.clone();
        add_funding_sigs(&mut tx1, siga, sigb, &a, &b).unwrap();
        add_funding_sigs(&mut tx2, sigb, siga, &b, &a).unwrap();
        assert_eq!(tx1, tx2);
        let witness = &tx1.input[0].witness;
        assert_eq!(witness.len(), 4);
        assert!(witness.nth(0).unwrap().is_empty());
        assert_eq!(witness.nth(3).unwrap(), make_funding_redeemscript(&a, &b).as_bytes());
        assert!(tx1.input[0].script_sig.is_empty());
    }

    #[test]
    fn change_output_test() {
        let mut tx = build_transaction(
            vec![],
            vec![TxOut { value: Amount::from_sat(10_000), script_pubkey: ScriptBuf::new() }],
        );
        maybe_add_change_output(&mut tx, 10_500, 100, ScriptBuf::new()).unwrap();
        assert_eq!(tx.output.len(), 1);
        maybe_add_change_output(&mut tx, 20_100, 100, ScriptBuf::new()).unwrap();
        assert_eq!(tx.output.len(), 2);
        assert_eq!(tx.output[1].value, Amount::from_sat(10_000));
        assert!(maybe_add_change_output(&mut tx, 100, 100, ScriptBuf::new()).is_err());
    }
}
