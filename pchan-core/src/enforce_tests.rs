#[cfg(test)]
mod tests {
    use bitcoin::{Amount, ScriptBuf, Sequence, Transaction, TxOut};
    use test_log::test;

    use crate::channel::ChannelStatus;
    use crate::monitor::MonitorEvent;
    use crate::signer::keys::{ChannelKeys, KeyRole};
    use crate::signer::secrets::{Secret, SecretHash};
    use crate::tx::commitment::CommitmentTransaction;
    use crate::tx::enforce::{select_branch, SpendBranch};
    use crate::tx::script::{
        htlc_claim_witness, revocable_htlc_penalty_witness, revocable_htlc_timeout_witness,
        wrap_as_p2sh_input, OutputCondition, PartialWitness,
    };
    use crate::util::test_utils::*;
    use crate::util::transaction_utils::{build_transaction, unsigned_input};

    const SWEEP_FEE_SAT: u64 = 500;

    struct Fixture {
        ch: TestChannel,
        alice_keys: ChannelKeys,
        bob_keys: ChannelKeys,
        destination: ScriptBuf,
    }

    // alice funds 1_000_000 and pays bob 400_000 in an unsettled htlc
    fn make_fixture() -> Fixture {
        let alice_keys = ChannelKeys::generate();
        let bob_keys = ChannelKeys::generate();
        let mut ch = open_test_channel_with_keys(1_000_000, alice_keys.clone(), bob_keys.clone());
        send_payment(&mut ch.funder, &mut ch.fundee, 400_000).unwrap();
        Fixture { ch, alice_keys, bob_keys, destination: make_destination() }
    }

    // sign a spend of `vout` through `witness` by hand
    fn manual_spend(
        keys: &ChannelKeys,
        commitment: &CommitmentTransaction,
        vout: usize,
        witness: PartialWitness,
        sequence: Sequence,
        destination: ScriptBuf,
    ) -> Transaction {
        let output = commitment.output(vout).unwrap();
        let mut tx = build_transaction(
            vec![unsigned_input(commitment.outpoint(vout), sequence)],
            vec![TxOut {
                value: Amount::from_sat(output.value_sat - SWEEP_FEE_SAT),
                script_pubkey: destination,
            }],
        );
        let redeem_script = output.redeem_script();
        let sig = keys.sign_input(KeyRole::Htlc, &tx, 0, &redeem_script).unwrap();
        let spending_script = witness.with_signature(sig).to_script().unwrap();
        tx.input[0].script_sig =
            wrap_as_p2sh_input(Some(&spending_script), Some(&redeem_script)).unwrap();
        tx
    }

    #[test]
    fn revocable_htlc_claim_and_timeout_test() {
        let mut fx = make_fixture();
        let commitment = fx.ch.funder.holder_commitment().unwrap().clone();
        let tx = fx.ch.funder.force_close().unwrap();
        assert_eq!(fx.ch.funder.status(), ChannelStatus::Closing);
        assert_eq!(tx.compute_txid(), commitment.txid());
        fx.ch.chain.confirm(&tx).unwrap();
        assert!(matches!(commitment.outputs[1].condition, OutputCondition::RevocableHtlc(_)));

        let txid = tx.compute_txid();
        let events = fx.ch.fundee.transaction_confirmed(&txid, 1);
        assert!(matches!(
            events[0],
            MonitorEvent::CounterpartyCommitmentConfirmed { sequence_number: 1, .. }
        ));
        assert_eq!(fx.ch.fundee.status(), ChannelStatus::Closing);
        let theirs = fx.ch.fundee.counterparty_commitment(&txid).unwrap().clone();
        assert!(!fx.ch.fundee.is_revoked(&theirs));

        // bob claims with his preimage right away
        let claim = fx.ch.fundee.build_spend(&theirs, 1, 1, fx.destination.clone()).unwrap();
        assert_eq!(claim.input[0].sequence, Sequence::MAX);
        assert_eq!(claim.output[0].value, Amount::from_sat(400_000 - SWEEP_FEE_SAT));
        fx.ch.chain.clone().confirm(&claim).unwrap();
        assert_error_kind!(
            fx.ch.fundee.build_spend(&theirs, 0, 1000, fx.destination.clone()),
            NoApplicableBranch
        );

        // alice must wait out the relative timeout
        assert_error_kind!(
            fx.ch.funder.build_spend(&commitment, 1, 99, fx.destination.clone()),
            NoApplicableBranch
        );
        let timeout = fx.ch.funder.build_spend(&commitment, 1, 100, fx.destination.clone()).unwrap();
        assert_eq!(timeout.input[0].sequence, Sequence::from_height(100));
        fx.ch.chain.clone().confirm(&timeout).unwrap();

        // the script enforces the delay
        let early = manual_spend(
            &fx.alice_keys,
            &commitment,
            1,
            revocable_htlc_timeout_witness(),
            Sequence::from_height(99),
            fx.destination.clone(),
        );
        assert!(fx.ch.chain.clone().confirm(&early).is_err());

        // her balance is locked for the same delay
        assert!(fx.ch.funder.sweep(&commitment, 1, &fx.destination).unwrap().is_empty());
        let spends = fx.ch.funder.sweep(&commitment, 100, &fx.destination).unwrap();
        assert_eq!(spends.len(), 2);
        assert_eq!(spends[0].input[0].sequence, Sequence::from_height(100));
        assert_eq!(spends[0].output[0].value, Amount::from_sat(599_000 - SWEEP_FEE_SAT));
        fx.ch.chain.confirm(&spends[0]).unwrap();
    }

    #[test]
    fn htlc_claim_and_timeout_test() {
        let mut fx = make_fixture();
        let commitment = fx.ch.fundee.holder_commitment().unwrap().clone();
        let tx = fx.ch.fundee.force_close().unwrap();
        fx.ch.chain.confirm(&tx).unwrap();
        let txid = tx.compute_txid();
        fx.ch.funder.transaction_confirmed(&txid, 1);
        let theirs = fx.ch.funder.counterparty_commitment(&txid).unwrap().clone();
        assert_eq!(theirs.txid(), commitment.txid());
        assert!(!fx.ch.funder.is_revoked(&theirs));

        // bob's balance is zero, so alice's output comes first
        assert_eq!(commitment.outputs.len(), 2);
        assert!(matches!(commitment.outputs[1].condition, OutputCondition::Htlc(_)));

        let claim = fx.ch.fundee.build_spend(&commitment, 1, 1, fx.destination.clone()).unwrap();
        fx.ch.chain.clone().confirm(&claim).unwrap();

        let wrong = manual_spend(
            &fx.bob_keys,
            &commitment,
            1,
            htlc_claim_witness(&Secret::generate().preimage),
            Sequence::MAX,
            fx.destination.clone(),
        );
        assert!(fx.ch.chain.clone().confirm(&wrong).is_err());

        assert_error_kind!(
            fx.ch.funder.build_spend(&theirs, 1, 50, fx.destination.clone()),
            NoApplicableBranch
        );
        let timeout = fx.ch.funder.build_spend(&theirs, 1, 144, fx.destination.clone()).unwrap();
        fx.ch.chain.clone().confirm(&timeout).unwrap();

        let spends = fx.ch.funder.sweep(&theirs, 1, &fx.destination).unwrap();
        assert_eq!(spends.len(), 1);
        fx.ch.chain.confirm(&spends[0]).unwrap();
    }

    #[test]
    fn penalty_on_stale_commitment_test() {
        let mut fx = make_fixture();
        let stale = fx.ch.funder.holder_commitment().unwrap().clone();
        send_payment(&mut fx.ch.funder, &mut fx.ch.fundee, 300_000).unwrap();
        assert_eq!(fx.ch.funder.holder_state().unwrap().sequence_number, 2);

        // alice broadcasts state 1, which she revoked
        let tx = sign_holder_commitment(&fx.ch.funder, &fx.alice_keys, &stale);
        fx.ch.chain.confirm(&tx).unwrap();
        let txid = tx.compute_txid();
        let events = fx.ch.fundee.transaction_confirmed(&txid, 1);
        assert!(matches!(
            events[0],
            MonitorEvent::CounterpartyCommitmentConfirmed { sequence_number: 1, .. }
        ));
        let theirs = fx.ch.fundee.counterparty_commitment(&txid).unwrap().clone();
        assert!(fx.ch.fundee.is_revoked(&theirs));

        let ctx = fx.ch.fundee.enforcement_context().unwrap();
        let branch = select_branch(theirs.output(1).unwrap(), &ctx, 1).unwrap();
        assert!(matches!(branch, SpendBranch::Penalty(_)));

        // both alice's balance and the htlc
        let spends = fx.ch.fundee.sweep(&theirs, 1, &fx.destination).unwrap();
        assert_eq!(spends.len(), 2);
        assert_eq!(spends[0].input[0].previous_output, theirs.outpoint(0));
        assert_eq!(spends[0].output[0].value, Amount::from_sat(599_000 - SWEEP_FEE_SAT));
        assert_eq!(spends[1].input[0].previous_output, theirs.outpoint(1));
        let mut chain = fx.ch.chain.clone();
        chain.confirm(&spends[0]).unwrap();
        chain.confirm(&spends[1]).unwrap();

        // a wrong revocation preimage does not unlock it
        let forged = manual_spend(
            &fx.bob_keys,
            &theirs,
            1,
            revocable_htlc_penalty_witness(&Secret::generate().preimage),
            Sequence::MAX,
            fx.destination.clone(),
        );
        assert!(fx.ch.chain.clone().confirm(&forged).is_err());

        // nor can alice take it with her own revocation secret
        let own_secret = fx.ch.funder.secrets().preimage(&rev_hash(&theirs)).unwrap();
        let forged = manual_spend(
            &fx.alice_keys,
            &theirs,
            1,
            revocable_htlc_penalty_witness(&own_secret),
            Sequence::MAX,
            fx.destination.clone(),
        );
        assert!(fx.ch.chain.clone().confirm(&forged).is_err());
    }

    #[test]
    fn penalty_on_revoked_initial_state_test() {
        let alice_keys = ChannelKeys::generate();
        let mut ch =
            open_test_channel_with_keys(1_000_000, alice_keys.clone(), ChannelKeys::generate());
        let initial = ch.funder.holder_commitment().unwrap().clone();
        assert_eq!(initial.sequence_number, 0);
        assert_eq!(initial.outputs.len(), 1);
        assert!(matches!(initial.outputs[0].condition, OutputCondition::RevocableBalance(_)));

        let hash = send_payment(&mut ch.funder, &mut ch.fundee, 400_000).unwrap();
        settle_payment(&mut ch.fundee, &mut ch.funder, hash).unwrap();
        assert!(!ch.funder.holder_state().unwrap().has_pending_htlcs());

        // alice broadcasts the state where she held everything
        let tx = sign_holder_commitment(&ch.funder, &alice_keys, &initial);
        ch.chain.confirm(&tx).unwrap();
        let txid = tx.compute_txid();
        let events = ch.fundee.transaction_confirmed(&txid, 1);
        assert!(matches!(
            events[0],
            MonitorEvent::CounterpartyCommitmentConfirmed { sequence_number: 0, .. }
        ));
        let theirs = ch.fundee.counterparty_commitment(&txid).unwrap().clone();
        assert!(ch.fundee.is_revoked(&theirs));

        let destination = make_destination();
        let spends = ch.fundee.sweep(&theirs, 1, &destination).unwrap();
        assert_eq!(spends.len(), 1);
        assert_eq!(spends[0].input[0].previous_output, theirs.outpoint(0));
        assert_eq!(spends[0].input[0].sequence, Sequence::MAX);
        assert_eq!(spends[0].output[0].value, Amount::from_sat(999_000 - SWEEP_FEE_SAT));

        // whoever confirms first takes the output
        let timeout = ch.funder.build_spend(&initial, 0, 100, make_destination()).unwrap();
        let mut chain = ch.chain.clone();
        chain.confirm(&spends[0]).unwrap();
        assert!(chain.confirm(&timeout).is_err());

        // alice's timeout is valid on its own, but not before the delay
        ch.chain.clone().confirm(&timeout).unwrap();
        assert_error_kind!(
            ch.funder.build_spend(&initial, 0, 99, make_destination()),
            NoApplicableBranch
        );
    }

    fn rev_hash(commitment: &CommitmentTransaction) -> SecretHash {
        match &commitment.outputs[1].condition {
            OutputCondition::RevocableHtlc(c) => c.revocation_secret_hash,
            c => panic!("unexpected {:?}", c),
        }
    }

    #[test]
    fn sweep_fee_test() {
        let mut fx = make_fixture();
        let commitment = fx.ch.funder.holder_commitment().unwrap().clone();
        fx.ch.funder.force_close().unwrap();
        let ctx = fx.ch.funder.enforcement_context().unwrap();
        let mut dust = commitment.clone();
        dust.outputs[0].value_sat = SWEEP_FEE_SAT;
        assert_error_kind!(
            crate::tx::enforce::build_spend(&dust, 0, &ctx, 100, fx.destination.clone()),
            InsufficientFunds
        );
        assert_error_kind!(
            fx.ch.funder.build_spend(&commitment, 7, 1, fx.destination.clone()),
            InvalidArgument
        );
    }
}
