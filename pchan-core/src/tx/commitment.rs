use core::fmt;

use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxOut, Txid};
use serde_derive::{Deserialize, Serialize};
use tracing::*;

use crate::channel::{ChannelSetup, ChannelState};
use crate::policy::error::{
    insufficient_funds_error, invalid_argument_error, missing_secret_error, protocol_violation_error,
    ChannelError,
};
use crate::prelude::*;
use crate::signer::keys::{ChannelKeys, ChannelPublicKeys};
use crate::signer::secrets::{SecretHash, SecretStore};
use crate::tx::script::{
    HtlcCondition, OutputCondition, PlainCondition, RevocableBalanceCondition,
    RevocableHtlcCondition,
};
use crate::util::crypto_utils::verify_segwit_input;
use crate::util::transaction_utils::{
    add_funding_sigs, build_transaction, funding_script_pubkey, make_funding_redeemscript,
    unsigned_input,
};

/// A pending hash-locked payment
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtlcInfo {
    /// The payment amount
    pub value_sat: u64,
    /// The payment hash
    pub secret_hash: SecretHash,
}

impl fmt::Debug for HtlcInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HtlcInfo")
            .field("value_sat", &self.value_sat)
            .field("secret_hash", &self.secret_hash)
            .finish()
    }
}

/// An output of a commitment transaction with its spending condition
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentOutput {
    /// The spending condition
    pub condition: OutputCondition,
    /// The output value
    pub value_sat: u64,
}

impl CommitmentOutput {
    fn to_txout(&self) -> TxOut {
        TxOut { value: Amount::from_sat(self.value_sat), script_pubkey: self.condition.script_pubkey() }
    }

    /// The redeem script of the output
    pub fn redeem_script(&self) -> ScriptBuf {
        self.condition.redeem_script()
    }
}

/// The commitment transaction for one channel state, as held by its broadcaster.
///
/// `countersignature` is the other party's signature over the funding input;
/// the holder adds its own only when it decides to broadcast.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommitmentTransaction {
    /// The channel state this commitment belongs to
    pub sequence_number: u64,
    /// The outputs, in transaction order
    pub outputs: Vec<CommitmentOutput>,
    /// The unsigned transaction
    pub transaction: Transaction,
    /// The countersigner's signature, if any
    pub countersignature: Option<Signature>,
}

impl CommitmentTransaction {
    /// The transaction id, which signatures do not affect
    pub fn txid(&self) -> Txid {
        self.transaction.compute_txid()
    }

    /// The output at `vout`
    pub fn output(&self, vout: usize) -> Result<&CommitmentOutput, ChannelError> {
        self.outputs.get(vout).ok_or_else(|| {
            invalid_argument_error(format!(
                "output index {} out of range, commitment has {} outputs",
                vout,
                self.outputs.len()
            ))
        })
    }

    /// The outpoint of the output at `vout`
    pub fn outpoint(&self, vout: usize) -> OutPoint {
        OutPoint { txid: self.txid(), vout: vout as u32 }
    }

    /// Whether both describe the same transaction, regardless of signatures
    pub fn same_contents(&self, other: &CommitmentTransaction) -> bool {
        self.sequence_number == other.sequence_number
            && self.outputs == other.outputs
            && self.transaction == other.transaction
    }
}

/// Builds, countersigns and verifies the commitments held by one party.
///
/// The holder is the party that may broadcast the commitments built here.
pub struct CommitmentBuilder<'a> {
    holder_pubkeys: &'a ChannelPublicKeys,
    counterparty_pubkeys: &'a ChannelPublicKeys,
    holder_is_funder: bool,
    capacity_sat: u64,
    funding_outpoint: OutPoint,
    fee_sat: u64,
}

impl<'a> CommitmentBuilder<'a> {
    /// A builder for commitments held by `holder_pubkeys`
    pub fn new(
        holder_pubkeys: &'a ChannelPublicKeys,
        counterparty_pubkeys: &'a ChannelPublicKeys,
        holder_is_funder: bool,
        capacity_sat: u64,
        funding_outpoint: OutPoint,
        fee_sat: u64,
    ) -> Self {
        CommitmentBuilder {
            holder_pubkeys,
            counterparty_pubkeys,
            holder_is_funder,
            capacity_sat,
            funding_outpoint,
            fee_sat,
        }
    }

    /// A builder for our own commitments
    pub fn for_holder(
        setup: &'a ChannelSetup,
        our_pubkeys: &'a ChannelPublicKeys,
        fee_sat: u64,
    ) -> Self {
        Self::new(
            our_pubkeys,
            &setup.counterparty_pubkeys,
            setup.is_funder,
            setup.capacity_sat,
            setup.funding_outpoint,
            fee_sat,
        )
    }

    /// A builder for the counterparty's commitments
    pub fn for_counterparty(
        setup: &'a ChannelSetup,
        our_pubkeys: &'a ChannelPublicKeys,
        fee_sat: u64,
    ) -> Self {
        Self::new(
            &setup.counterparty_pubkeys,
            our_pubkeys,
            !setup.is_funder,
            setup.capacity_sat,
            setup.funding_outpoint,
            fee_sat,
        )
    }

    /// The redeem script of the funding output
    pub fn funding_redeemscript(&self) -> ScriptBuf {
        make_funding_redeemscript(
            &self.holder_pubkeys.funding_pubkey,
            &self.counterparty_pubkeys.funding_pubkey,
        )
    }

    /// The P2WSH funding output script
    pub fn funding_script_pubkey(&self) -> ScriptBuf {
        funding_script_pubkey(&self.funding_redeemscript())
    }

    /// Build the unsigned commitment for `state`, which is seen from the holder's side.
    pub fn build(
        &self,
        state: &ChannelState,
        secrets: &SecretStore,
    ) -> Result<CommitmentTransaction, ChannelError> {
        let total = state.total_sat().ok_or_else(|| {
            insufficient_funds_error(format!("{}: balance overflow", short_function!()))
        })?;
        if total != self.capacity_sat {
            return Err(insufficient_funds_error(format!(
                "{}: balances and htlcs sum to {} but capacity is {}",
                short_function!(),
                total,
                self.capacity_sat
            )));
        }

        let funder_balance = if self.holder_is_funder {
            state.local_balance_sat
        } else {
            state.remote_balance_sat
        };
        if funder_balance < self.fee_sat {
            return Err(insufficient_funds_error(format!(
                "{}: funder balance {} can't pay fee {}",
                short_function!(),
                funder_balance,
                self.fee_sat
            )));
        }
        let (to_holder_sat, to_counterparty_sat) = if self.holder_is_funder {
            (state.local_balance_sat - self.fee_sat, state.remote_balance_sat)
        } else {
            (state.local_balance_sat, state.remote_balance_sat - self.fee_sat)
        };

        // the holder's balance and offered htlcs are penalizable once this state is revoked
        let revocation_secret_hash = if to_holder_sat > 0 || !state.offered_htlcs.is_empty() {
            let hash = state.local_revocation_hash.ok_or_else(|| {
                missing_secret_error(format!(
                    "{}: no revocation hash for state {}",
                    short_function!(),
                    state.sequence_number
                ))
            })?;
            secrets.require(&hash)?;
            Some(hash)
        } else {
            None
        };

        let mut outputs = Vec::new();
        if let Some(revocation_secret_hash) = revocation_secret_hash.filter(|_| to_holder_sat > 0) {
            outputs.push(CommitmentOutput {
                condition: OutputCondition::RevocableBalance(RevocableBalanceCondition {
                    owner_pubkey: self.holder_pubkeys.payment_pubkey,
                    counterparty_pubkey: self.counterparty_pubkeys.payment_pubkey,
                    revocation_secret_hash,
                }),
                value_sat: to_holder_sat,
            });
        }
        if to_counterparty_sat > 0 {
            outputs.push(CommitmentOutput {
                condition: OutputCondition::Plain(PlainCondition {
                    pubkey: self.counterparty_pubkeys.payment_pubkey,
                }),
                value_sat: to_counterparty_sat,
            });
        }

        if let Some(revocation_secret_hash) = revocation_secret_hash {
            for htlc in &state.offered_htlcs {
                secrets.require(&htlc.secret_hash)?;
                outputs.push(CommitmentOutput {
                    condition: OutputCondition::RevocableHtlc(RevocableHtlcCondition {
                        owner_pubkey: self.holder_pubkeys.htlc_pubkey,
                        counterparty_pubkey: self.counterparty_pubkeys.htlc_pubkey,
                        htlc_secret_hash: htlc.secret_hash,
                        revocation_secret_hash,
                    }),
                    value_sat: htlc.value_sat,
                });
            }
        }
        for htlc in &state.received_htlcs {
            secrets.require(&htlc.secret_hash)?;
            outputs.push(CommitmentOutput {
                condition: OutputCondition::Htlc(HtlcCondition {
                    payee_pubkey: self.holder_pubkeys.htlc_pubkey,
                    payer_pubkey: self.counterparty_pubkeys.htlc_pubkey,
                    secret_hash: htlc.secret_hash,
                }),
                value_sat: htlc.value_sat,
            });
        }

        let transaction = build_transaction(
            vec![unsigned_input(self.funding_outpoint, Sequence::MAX)],
            outputs.iter().map(|o| o.to_txout()).collect(),
        );
        trace!(
            "built commitment {} for state {} with {} outputs",
            transaction.compute_txid(),
            state.sequence_number,
            outputs.len()
        );
        Ok(CommitmentTransaction {
            sequence_number: state.sequence_number,
            outputs,
            transaction,
            countersignature: None,
        })
    }

    /// Sign the holder's commitment as the countersigner
    pub fn countersign(
        &self,
        commitment: &mut CommitmentTransaction,
        countersigner_keys: &ChannelKeys,
    ) -> Result<(), ChannelError> {
        if countersigner_keys.pubkeys() != self.counterparty_pubkeys {
            return Err(invalid_argument_error(format!(
                "{}: keys are not the countersigner's",
                short_function!()
            )));
        }
        let sig = countersigner_keys.sign_funding_input(
            &commitment.transaction,
            0,
            &self.funding_redeemscript(),
            self.capacity_sat,
        )?;
        commitment.countersignature = Some(sig);
        Ok(())
    }

    /// Check the countersignature on a commitment received for the holder
    pub fn verify_countersignature(
        &self,
        commitment: &CommitmentTransaction,
        holder_keys: &ChannelKeys,
    ) -> Result<(), ChannelError> {
        let sig = commitment.countersignature.as_ref().ok_or_else(|| {
            protocol_violation_error(format!(
                "{}: commitment {} is not countersigned",
                short_function!(),
                commitment.sequence_number
            ))
        })?;
        let valid = verify_segwit_input(
            holder_keys.secp_ctx(),
            &commitment.transaction,
            0,
            &self.funding_redeemscript(),
            self.capacity_sat,
            sig,
            &self.counterparty_pubkeys.funding_pubkey,
        )?;
        if !valid {
            return Err(protocol_violation_error(format!(
                "{}: bad countersignature on commitment {}",
                short_function!(),
                commitment.sequence_number
            )));
        }
        Ok(())
    }

    /// Add the holder's signature, producing a transaction ready to broadcast
    pub fn sign_for_broadcast(
        &self,
        commitment: &CommitmentTransaction,
        holder_keys: &ChannelKeys,
    ) -> Result<Transaction, ChannelError> {
        self.verify_countersignature(commitment, holder_keys)?;
        let countersignature = commitment.countersignature.ok_or_else(|| {
            invalid_argument_error(format!("{}: not countersigned", short_function!()))
        })?;
        let holder_sig = holder_keys.sign_funding_input(
            &commitment.transaction,
            0,
            &self.funding_redeemscript(),
            self.capacity_sat,
        )?;
        let mut tx = commitment.transaction.clone();
        add_funding_sigs(
            &mut tx,
            holder_sig,
            countersignature,
            &self.holder_pubkeys.funding_pubkey,
            &self.counterparty_pubkeys.funding_pubkey,
        )?;
        Ok(tx)
    }
}
