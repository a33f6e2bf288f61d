//! Spending confirmed commitment outputs.
//!
//! [select_branch] decides which script branch, if any, we can use for an
//! output, and [build_spend] builds and signs the sweep for it.

use bitcoin::{Amount, ScriptBuf, Sequence, Transaction, TxOut};
use tracing::*;

use crate::policy::error::{
    insufficient_funds_error, invalid_argument_error, no_applicable_branch_error, ChannelError,
};
use crate::prelude::*;
use crate::signer::keys::{ChannelKeys, KeyRole};
use crate::signer::secrets::{SecretPreimage, SecretStore};
use crate::tx::commitment::{CommitmentOutput, CommitmentTransaction};
use crate::tx::script::{
    htlc_claim_witness, htlc_timeout_witness, plain_witness, revocable_balance_penalty_witness,
    revocable_balance_timeout_witness, revocable_htlc_claim_witness,
    revocable_htlc_penalty_witness, revocable_htlc_timeout_witness, wrap_as_p2sh_input,
    OutputCondition, PartialWitness, RELATIVE_TIMEOUT_BLOCKS,
};
use crate::util::transaction_utils::{build_transaction, unsigned_input};

/// What we know when enforcing
pub struct EnforcementContext<'a> {
    /// Our channel keys
    pub keys: &'a ChannelKeys,
    /// Our secrets, including those disclosed to us
    pub secrets: &'a SecretStore,
    /// Fee paid by each sweep
    pub sweep_fee_sat: u64,
}

/// The branch used to spend an output
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpendBranch {
    /// The counterparty's commitment pays us directly
    Direct,
    /// Reveal the HTLC preimage
    Claim(SecretPreimage),
    /// Wait out the relative timeout
    Timeout,
    /// Reveal the owner's revocation preimage
    Penalty(SecretPreimage),
}

impl SpendBranch {
    /// The unsigned spending script for this branch of `condition`
    pub fn witness(&self, condition: &OutputCondition) -> Result<PartialWitness, ChannelError> {
        let witness = match (condition, self) {
            (OutputCondition::Plain(_), SpendBranch::Direct) => plain_witness(),
            (OutputCondition::RevocableBalance(_), SpendBranch::Timeout) =>
                revocable_balance_timeout_witness(),
            (OutputCondition::RevocableBalance(_), SpendBranch::Penalty(p)) =>
                revocable_balance_penalty_witness(p),
            (OutputCondition::Htlc(_), SpendBranch::Claim(p)) => htlc_claim_witness(p),
            (OutputCondition::Htlc(_), SpendBranch::Timeout) => htlc_timeout_witness(),
            (OutputCondition::RevocableHtlc(_), SpendBranch::Claim(p)) =>
                revocable_htlc_claim_witness(p),
            (OutputCondition::RevocableHtlc(_), SpendBranch::Timeout) =>
                revocable_htlc_timeout_witness(),
            (OutputCondition::RevocableHtlc(_), SpendBranch::Penalty(p)) =>
                revocable_htlc_penalty_witness(p),
            _ =>
                return Err(invalid_argument_error(format!(
                    "{:?} does not apply to {:?}",
                    self, condition
                ))),
        };
        Ok(witness)
    }

    /// The input sequence a spend through this branch needs
    pub fn sequence(&self) -> Sequence {
        match self {
            SpendBranch::Timeout => Sequence::from_height(RELATIVE_TIMEOUT_BLOCKS),
            _ => Sequence::MAX,
        }
    }
}

/// Choose how we can spend `output` of a commitment confirmed `depth` blocks deep.
///
/// In order of preference: our plain output, a penalty on a revoked output,
/// a claim with a known preimage, and a timeout once it has elapsed.  Our
/// balance on our own commitment is a timeout spend.
pub fn select_branch(
    output: &CommitmentOutput,
    ctx: &EnforcementContext,
    depth: u32,
) -> Result<SpendBranch, ChannelError> {
    let ours = ctx.keys.pubkeys();
    let timed_out = depth >= RELATIVE_TIMEOUT_BLOCKS as u32;
    match &output.condition {
        OutputCondition::Plain(c) => {
            if c.pubkey == ours.payment_pubkey {
                return Ok(SpendBranch::Direct);
            }
        }
        OutputCondition::RevocableBalance(c) => {
            if c.counterparty_pubkey == ours.payment_pubkey {
                if let Some(preimage) = ctx.secrets.preimage(&c.revocation_secret_hash) {
                    return Ok(SpendBranch::Penalty(preimage));
                }
            }
            if c.owner_pubkey == ours.payment_pubkey && timed_out {
                return Ok(SpendBranch::Timeout);
            }
        }
        OutputCondition::RevocableHtlc(c) => {
            if c.counterparty_pubkey == ours.htlc_pubkey {
                if let Some(preimage) = ctx.secrets.preimage(&c.revocation_secret_hash) {
                    return Ok(SpendBranch::Penalty(preimage));
                }
                if let Some(preimage) = ctx.secrets.preimage(&c.htlc_secret_hash) {
                    return Ok(SpendBranch::Claim(preimage));
                }
            }
            if c.owner_pubkey == ours.htlc_pubkey && timed_out {
                return Ok(SpendBranch::Timeout);
            }
        }
        OutputCondition::Htlc(c) => {
            if c.payee_pubkey == ours.htlc_pubkey {
                if let Some(preimage) = ctx.secrets.preimage(&c.secret_hash) {
                    return Ok(SpendBranch::Claim(preimage));
                }
            }
            if c.payer_pubkey == ours.htlc_pubkey && timed_out {
                return Ok(SpendBranch::Timeout);
            }
        }
    }
    Err(no_applicable_branch_error(format!(
        "{}: nothing spendable at depth {} for {:?}",
        short_function!(),
        depth,
        output.condition
    )))
}

/// Build and sign a transaction sweeping output `vout` of `commitment` to `destination`
pub fn build_spend(
    commitment: &CommitmentTransaction,
    vout: usize,
    ctx: &EnforcementContext,
    depth: u32,
    destination: ScriptBuf,
) -> Result<Transaction, ChannelError> {
    let output = commitment.output(vout)?;
    let branch = select_branch(output, ctx, depth)?;
    if output.value_sat <= ctx.sweep_fee_sat {
        return Err(insufficient_funds_error(format!(
            "{}: output {} of {} sat can't pay sweep fee {}",
            short_function!(),
            vout,
            output.value_sat,
            ctx.sweep_fee_sat
        )));
    }

    let mut tx = build_transaction(
        vec![unsigned_input(commitment.outpoint(vout), branch.sequence())],
        vec![TxOut {
            value: Amount::from_sat(output.value_sat - ctx.sweep_fee_sat),
            script_pubkey: destination,
        }],
    );
    let redeem_script = output.redeem_script();
    let role = match output.condition {
        OutputCondition::Plain(_) | OutputCondition::RevocableBalance(_) => KeyRole::Payment,
        OutputCondition::Htlc(_) | OutputCondition::RevocableHtlc(_) => KeyRole::Htlc,
    };
    let sig = ctx.keys.sign_input(role, &tx, 0, &redeem_script)?;
    let spending_script = branch.witness(&output.condition)?.with_signature(sig).to_script()?;
    tx.input[0].script_sig = wrap_as_p2sh_input(Some(&spending_script), Some(&redeem_script))?;
    debug!(
        "sweeping {}:{} via {:?} at depth {}",
        commitment.txid(),
        vout,
        match branch {
            SpendBranch::Direct => "direct",
            SpendBranch::Claim(_) => "claim",
            SpendBranch::Timeout => "timeout",
            SpendBranch::Penalty(_) => "penalty",
        },
        depth
    );
    Ok(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::secrets::Secret;
    use crate::tx::script::{
        HtlcCondition, PlainCondition, RevocableBalanceCondition, RevocableHtlcCondition,
    };

    struct Party {
        keys: ChannelKeys,
        secrets: SecretStore,
    }

    impl Party {
        fn ctx(&self) -> EnforcementContext {
            EnforcementContext { keys: &self.keys, secrets: &self.secrets, sweep_fee_sat: 500 }
        }
    }

    fn make_parties() -> (Party, Party) {
        (
            Party { keys: ChannelKeys::generate(), secrets: SecretStore::new() },
            Party { keys: ChannelKeys::generate(), secrets: SecretStore::new() },
        )
    }

    fn rhtlc(owner: &Party, counterparty: &Party, htlc: &Secret, rev: &Secret) -> CommitmentOutput {
        CommitmentOutput {
            condition: OutputCondition::RevocableHtlc(RevocableHtlcCondition {
                owner_pubkey: owner.keys.pubkeys().htlc_pubkey,
                counterparty_pubkey: counterparty.keys.pubkeys().htlc_pubkey,
                htlc_secret_hash: htlc.hash,
                revocation_secret_hash: rev.hash,
            }),
            value_sat: 10_000,
        }
    }

    #[test]
    fn plain_output_test() {
        let (alice, bob) = make_parties();
        let output = CommitmentOutput {
            condition: OutputCondition::Plain(PlainCondition {
                pubkey: alice.keys.pubkeys().payment_pubkey,
            }),
            value_sat: 10_000,
        };
        assert_eq!(select_branch(&output, &alice.ctx(), 0).unwrap(), SpendBranch::Direct);
        assert_error_kind!(select_branch(&output, &bob.ctx(), 1000), NoApplicableBranch);
    }

    #[test]
    fn revocable_balance_test() {
        let (mut alice, mut bob) = make_parties();
        let rev = alice.secrets.generate();
        bob.secrets.register_hash(rev.hash);
        let output = CommitmentOutput {
            condition: OutputCondition::RevocableBalance(RevocableBalanceCondition {
                owner_pubkey: alice.keys.pubkeys().payment_pubkey,
                counterparty_pubkey: bob.keys.pubkeys().payment_pubkey,
                revocation_secret_hash: rev.hash,
            }),
            value_sat: 10_000,
        };

        assert_error_kind!(select_branch(&output, &alice.ctx(), 99), NoApplicableBranch);
        assert_eq!(select_branch(&output, &alice.ctx(), 100).unwrap(), SpendBranch::Timeout);
        assert_error_kind!(select_branch(&output, &bob.ctx(), 1000), NoApplicableBranch);

        assert!(bob.secrets.reveal(rev.preimage));
        assert_eq!(
            select_branch(&output, &bob.ctx(), 0).unwrap(),
            SpendBranch::Penalty(rev.preimage)
        );
        // the owner's own revocation secret gives it nothing early
        assert_error_kind!(select_branch(&output, &alice.ctx(), 0), NoApplicableBranch);
        assert_error_kind!(SpendBranch::Direct.witness(&output.condition), InvalidArgument);
        assert_channel_ok!(SpendBranch::Timeout.witness(&output.condition));
    }

    #[test]
    fn revocable_htlc_priority_test() {
        let (mut alice, mut bob) = make_parties();
        let htlc = bob.secrets.generate();
        let rev = alice.secrets.generate();
        alice.secrets.register_hash(htlc.hash);
        bob.secrets.register_hash(rev.hash);
        let output = rhtlc(&alice, &bob, &htlc, &rev);

        // owner before and after the timeout
        assert_error_kind!(select_branch(&output, &alice.ctx(), 99), NoApplicableBranch);
        assert_eq!(select_branch(&output, &alice.ctx(), 100).unwrap(), SpendBranch::Timeout);
        // the owner knows its own revocation secret, but can't use it
        assert!(alice.secrets.preimage(&rev.hash).is_some());

        // counterparty with the htlc secret
        assert_eq!(
            select_branch(&output, &bob.ctx(), 0).unwrap(),
            SpendBranch::Claim(htlc.preimage)
        );

        // once revoked, the penalty wins regardless of depth
        assert!(bob.secrets.reveal(rev.preimage));
        assert_eq!(
            select_branch(&output, &bob.ctx(), 0).unwrap(),
            SpendBranch::Penalty(rev.preimage)
        );
        assert_eq!(
            select_branch(&output, &bob.ctx(), 500).unwrap(),
            SpendBranch::Penalty(rev.preimage)
        );

        // owner learns the htlc preimage, still only the timeout applies
        alice.secrets.reveal(htlc.preimage);
        assert_error_kind!(select_branch(&output, &alice.ctx(), 10), NoApplicableBranch);
    }

    #[test]
    fn htlc_test() {
        let (mut alice, mut bob) = make_parties();
        let htlc = bob.secrets.generate();
        alice.secrets.register_hash(htlc.hash);
        let output = CommitmentOutput {
            condition: OutputCondition::Htlc(HtlcCondition {
                payee_pubkey: bob.keys.pubkeys().htlc_pubkey,
                payer_pubkey: alice.keys.pubkeys().htlc_pubkey,
                secret_hash: htlc.hash,
            }),
            value_sat: 10_000,
        };
        assert_eq!(select_branch(&output, &bob.ctx(), 0).unwrap(), SpendBranch::Claim(htlc.preimage));
        assert_error_kind!(select_branch(&output, &alice.ctx(), 0), NoApplicableBranch);
        assert_eq!(select_branch(&output, &alice.ctx(), 150).unwrap(), SpendBranch::Timeout);
        // without the preimage the payee has nothing
        bob.secrets = SecretStore::new();
        assert_error_kind!(select_branch(&output, &bob.ctx(), 150), NoApplicableBranch);
    }

    #[test]
    fn witness_mismatch_test() {
        let (alice, _) = make_parties();
        let condition =
            OutputCondition::Plain(PlainCondition { pubkey: alice.keys.pubkeys().payment_pubkey });
        assert_error_kind!(SpendBranch::Timeout.witness(&condition), InvalidArgument);
        assert_eq!(SpendBranch::Timeout.sequence(), Sequence::from_height(100));
        assert_eq!(SpendBranch::Direct.sequence(), Sequence::MAX);
    }
}
