//! Redeem scripts for commitment outputs and the witnesses that spend them.
//!
//! Every output is paid to P2SH.  A spending input's script is the witness
//! of the chosen branch followed by a push of the redeem script.  Branch
//! selectors are pushed last so that the outermost `OP_IF` consumes the
//! topmost item; the signature is always pushed first.

use bitcoin::opcodes::all::*;
use bitcoin::opcodes::Opcode;
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::PublicKey;
use bitcoin::{Script, ScriptBuf};
use serde_derive::{Deserialize, Serialize};

use crate::policy::error::{invalid_argument_error, missing_parameter_error, ChannelError};
use crate::prelude::*;
use crate::signer::secrets::{SecretHash, SecretPreimage};
use crate::util::crypto_utils::{hash160, signature_to_bitcoin_vec};

/// Blocks that must elapse after confirmation before a timeout branch can be spent
pub const RELATIVE_TIMEOUT_BLOCKS: u16 = 100;

const OP_TRUE: Opcode = OP_PUSHNUM_1;
const OP_FALSE: Opcode = OP_PUSHBYTES_0;

/// Payable to a single key
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlainCondition {
    /// The receiving key
    pub pubkey: PublicKey,
}

/// Payee spends with the preimage of `secret_hash`, or payer spends after the timeout
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtlcCondition {
    /// Claims by revealing the preimage
    pub payee_pubkey: PublicKey,
    /// Reclaims after the timeout
    pub payer_pubkey: PublicKey,
    /// The payment hash
    pub secret_hash: SecretHash,
}

/// An HTLC offered by `owner` on its own commitment, with a penalty branch.
///
/// The counterparty claims with the HTLC preimage, the owner reclaims after
/// the timeout, and the counterparty takes the output at any time once the
/// owner's revocation secret for this commitment is disclosed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocableHtlcCondition {
    /// The holder of the commitment carrying this output, and the payer
    pub owner_pubkey: PublicKey,
    /// The payee, who may also penalize
    pub counterparty_pubkey: PublicKey,
    /// The payment hash
    pub htlc_secret_hash: SecretHash,
    /// The owner's revocation hash for the commitment
    pub revocation_secret_hash: SecretHash,
}

/// The holder's own balance on its commitment.
///
/// The owner spends after the timeout. The counterparty takes it at once
/// with the owner's revocation secret for this commitment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocableBalanceCondition {
    /// The holder of the commitment carrying this output
    pub owner_pubkey: PublicKey,
    /// Penalizes a revoked commitment
    pub counterparty_pubkey: PublicKey,
    /// The owner's revocation hash for the commitment
    pub revocation_secret_hash: SecretHash,
}

/// The spending condition of a commitment output
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputCondition {
    /// The counterparty's balance
    Plain(PlainCondition),
    /// The commitment holder's balance
    RevocableBalance(RevocableBalanceCondition),
    /// An HTLC received by the commitment holder
    Htlc(HtlcCondition),
    /// An HTLC offered by the commitment holder
    RevocableHtlc(RevocableHtlcCondition),
}

impl PlainCondition {
    /// `<pubkey> OP_CHECKSIG`
    pub fn redeem_script(&self) -> ScriptBuf {
        Builder::new()
            .push_key(&bitcoin::PublicKey::new(self.pubkey))
            .push_opcode(OP_CHECKSIG)
            .into_script()
    }
}

impl HtlcCondition {
    /// The timeout, in blocks
    pub fn relative_timeout_blocks(&self) -> u16 {
        RELATIVE_TIMEOUT_BLOCKS
    }

    /// The redeem script
    pub fn redeem_script(&self) -> ScriptBuf {
        let builder = Builder::new().push_opcode(OP_IF);
        let builder = push_hashlock(builder, &self.secret_hash, &self.payee_pubkey)
            .push_opcode(OP_ELSE);
        push_timelock(builder, &self.payer_pubkey).push_opcode(OP_ENDIF).into_script()
    }
}

impl RevocableHtlcCondition {
    /// The timeout, in blocks
    pub fn relative_timeout_blocks(&self) -> u16 {
        RELATIVE_TIMEOUT_BLOCKS
    }

    /// The redeem script
    pub fn redeem_script(&self) -> ScriptBuf {
        let builder = Builder::new().push_opcode(OP_IF);
        let builder = push_hashlock(builder, &self.htlc_secret_hash, &self.counterparty_pubkey)
            .push_opcode(OP_ELSE)
            .push_opcode(OP_IF);
        let builder = push_timelock(builder, &self.owner_pubkey).push_opcode(OP_ELSE);
        push_hashlock(builder, &self.revocation_secret_hash, &self.counterparty_pubkey)
            .push_opcode(OP_ENDIF)
            .push_opcode(OP_ENDIF)
            .into_script()
    }
}

impl RevocableBalanceCondition {
    /// The timeout, in blocks
    pub fn relative_timeout_blocks(&self) -> u16 {
        RELATIVE_TIMEOUT_BLOCKS
    }

    /// The redeem script
    pub fn redeem_script(&self) -> ScriptBuf {
        let builder = Builder::new().push_opcode(OP_IF);
        let builder = push_timelock(builder, &self.owner_pubkey).push_opcode(OP_ELSE);
        push_hashlock(builder, &self.revocation_secret_hash, &self.counterparty_pubkey)
            .push_opcode(OP_ENDIF)
            .into_script()
    }
}

impl OutputCondition {
    /// The redeem script
    pub fn redeem_script(&self) -> ScriptBuf {
        match self {
            OutputCondition::Plain(c) => c.redeem_script(),
            OutputCondition::RevocableBalance(c) => c.redeem_script(),
            OutputCondition::Htlc(c) => c.redeem_script(),
            OutputCondition::RevocableHtlc(c) => c.redeem_script(),
        }
    }

    /// The P2SH locking script
    pub fn script_pubkey(&self) -> ScriptBuf {
        p2sh_script_pubkey(&self.redeem_script())
    }
}

// OP_HASH160 <hash> OP_EQUALVERIFY <key> OP_CHECKSIG
fn push_hashlock(builder: Builder, hash: &SecretHash, key: &PublicKey) -> Builder {
    builder
        .push_opcode(OP_HASH160)
        .push_slice(hash.0)
        .push_opcode(OP_EQUALVERIFY)
        .push_key(&bitcoin::PublicKey::new(*key))
        .push_opcode(OP_CHECKSIG)
}

// <timeout> OP_CSV OP_DROP <key> OP_CHECKSIG
fn push_timelock(builder: Builder, key: &PublicKey) -> Builder {
    builder
        .push_int(RELATIVE_TIMEOUT_BLOCKS as i64)
        .push_opcode(OP_CSV)
        .push_opcode(OP_DROP)
        .push_key(&bitcoin::PublicKey::new(*key))
        .push_opcode(OP_CHECKSIG)
}

fn p2sh_script_pubkey(redeem_script: &Script) -> ScriptBuf {
    Builder::new()
        .push_opcode(OP_HASH160)
        .push_slice(hash160(redeem_script.as_bytes()))
        .push_opcode(OP_EQUAL)
        .into_script()
}

fn required<'a, T: ?Sized>(value: Option<&'a T>, name: &str) -> Result<&'a T, ChannelError> {
    value.ok_or_else(|| missing_parameter_error(format!("{} is required", name)))
}

/// Build an HTLC redeem script from possibly absent parts
pub fn build_htlc(
    payee_pubkey: Option<&PublicKey>,
    payer_pubkey: Option<&PublicKey>,
    secret_hash: Option<&SecretHash>,
) -> Result<ScriptBuf, ChannelError> {
    let condition = HtlcCondition {
        payee_pubkey: *required(payee_pubkey, "payee pubkey")?,
        payer_pubkey: *required(payer_pubkey, "payer pubkey")?,
        secret_hash: *required(secret_hash, "secret hash")?,
    };
    Ok(condition.redeem_script())
}

/// Build a revocable HTLC redeem script from possibly absent parts
pub fn build_revocable_htlc(
    owner_pubkey: Option<&PublicKey>,
    counterparty_pubkey: Option<&PublicKey>,
    htlc_secret_hash: Option<&SecretHash>,
    revocation_secret_hash: Option<&SecretHash>,
) -> Result<ScriptBuf, ChannelError> {
    let condition = RevocableHtlcCondition {
        owner_pubkey: *required(owner_pubkey, "owner pubkey")?,
        counterparty_pubkey: *required(counterparty_pubkey, "counterparty pubkey")?,
        htlc_secret_hash: *required(htlc_secret_hash, "htlc secret hash")?,
        revocation_secret_hash: *required(revocation_secret_hash, "revocation secret hash")?,
    };
    Ok(condition.redeem_script())
}

/// Build a revocable balance redeem script from possibly absent parts
pub fn build_revocable_balance(
    owner_pubkey: Option<&PublicKey>,
    counterparty_pubkey: Option<&PublicKey>,
    revocation_secret_hash: Option<&SecretHash>,
) -> Result<ScriptBuf, ChannelError> {
    let condition = RevocableBalanceCondition {
        owner_pubkey: *required(owner_pubkey, "owner pubkey")?,
        counterparty_pubkey: *required(counterparty_pubkey, "counterparty pubkey")?,
        revocation_secret_hash: *required(revocation_secret_hash, "revocation secret hash")?,
    };
    Ok(condition.redeem_script())
}

/// An element of a spending script
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WitnessItem {
    /// The signature slot, empty until signed
    Signature(Option<Signature>),
    /// A data push, such as a preimage
    Data(Vec<u8>),
    /// A branch selector
    Branch(bool),
}

/// A spending script whose signature slot may still be a placeholder
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartialWitness {
    items: Vec<WitnessItem>,
}

impl PartialWitness {
    fn new(data: Option<&SecretPreimage>, branches: &[bool]) -> Self {
        let mut items = vec![WitnessItem::Signature(None)];
        if let Some(preimage) = data {
            items.push(WitnessItem::Data(preimage.0.to_vec()));
        }
        items.extend(branches.iter().map(|b| WitnessItem::Branch(*b)));
        PartialWitness { items }
    }

    /// The items, first pushed first
    pub fn items(&self) -> &[WitnessItem] {
        &self.items
    }

    /// Whether the signature slot is filled
    pub fn is_signed(&self) -> bool {
        matches!(self.items.first(), Some(WitnessItem::Signature(Some(_))))
    }

    /// Fill the signature slot
    pub fn with_signature(mut self, sig: Signature) -> Self {
        self.items[0] = WitnessItem::Signature(Some(sig));
        self
    }

    /// Encode as a script.  The placeholder signature is an empty push.
    pub fn to_script(&self) -> Result<ScriptBuf, ChannelError> {
        let mut builder = Builder::new();
        for item in &self.items {
            builder = match item {
                WitnessItem::Signature(None) => builder.push_opcode(OP_FALSE),
                WitnessItem::Signature(Some(sig)) =>
                    builder.push_slice(push_bytes(signature_to_bitcoin_vec(*sig))?),
                WitnessItem::Data(data) => builder.push_slice(push_bytes(data.clone())?),
                WitnessItem::Branch(true) => builder.push_opcode(OP_TRUE),
                WitnessItem::Branch(false) => builder.push_opcode(OP_FALSE),
            };
        }
        Ok(builder.into_script())
    }
}

fn push_bytes(data: Vec<u8>) -> Result<PushBytesBuf, ChannelError> {
    PushBytesBuf::try_from(data)
        .map_err(|e| invalid_argument_error(format!("push too large: {}", e)))
}

/// Spend a plain output: `<sig>`
pub fn plain_witness() -> PartialWitness {
    PartialWitness::new(None, &[])
}

/// Payee spends an HTLC: `<sig> <preimage> TRUE`
pub fn htlc_claim_witness(secret_preimage: &SecretPreimage) -> PartialWitness {
    PartialWitness::new(Some(secret_preimage), &[true])
}

/// Payer reclaims an HTLC after the timeout: `<sig> FALSE`
pub fn htlc_timeout_witness() -> PartialWitness {
    PartialWitness::new(None, &[false])
}

/// Counterparty spends a revocable HTLC: `<sig> <preimage> TRUE`
pub fn revocable_htlc_claim_witness(secret_preimage: &SecretPreimage) -> PartialWitness {
    PartialWitness::new(Some(secret_preimage), &[true])
}

/// Owner reclaims a revocable HTLC after the timeout: `<sig> TRUE FALSE`
pub fn revocable_htlc_timeout_witness() -> PartialWitness {
    PartialWitness::new(None, &[true, false])
}

/// Counterparty takes a revoked output: `<sig> <revocation preimage> FALSE FALSE`
pub fn revocable_htlc_penalty_witness(revocation_preimage: &SecretPreimage) -> PartialWitness {
    PartialWitness::new(Some(revocation_preimage), &[false, false])
}

/// Owner takes its balance after the timeout: `<sig> TRUE`
pub fn revocable_balance_timeout_witness() -> PartialWitness {
    PartialWitness::new(None, &[true])
}

/// Counterparty takes a revoked balance: `<sig> <revocation preimage> FALSE`
pub fn revocable_balance_penalty_witness(revocation_preimage: &SecretPreimage) -> PartialWitness {
    PartialWitness::new(Some(revocation_preimage), &[false])
}

/// Append a push of the redeem script to the spending script
pub fn wrap_as_p2sh_input(
    spending_script: Option<&Script>,
    redeem_script: Option<&Script>,
) -> Result<ScriptBuf, ChannelError> {
    let spending_script = required(spending_script, "spending script")?;
    let redeem_script = required(redeem_script, "redeem script")?;
    let mut bytes = spending_script.to_bytes();
    let redeem_push = Builder::new()
        .push_slice(push_bytes(redeem_script.to_bytes())?)
        .into_script();
    bytes.extend_from_slice(redeem_push.as_bytes());
    Ok(ScriptBuf::from_bytes(bytes))
}

/// `OP_HASH160 <HASH160(redeem_script)> OP_EQUAL`
///
/// The hash is computed in-process, so this completes without suspending.
pub fn derive_p2sh_output_script(redeem_script: &Script) -> Result<ScriptBuf, ChannelError> {
    if redeem_script.is_empty() {
        return Err(missing_parameter_error("redeem script is empty"));
    }
    Ok(p2sh_script_pubkey(redeem_script))
}
