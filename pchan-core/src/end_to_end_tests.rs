#[cfg(test)]
mod tests {
    use bitcoin::{OutPoint, ScriptBuf, Transaction};
    use test_log::test;

    use crate::channel::{ChannelAgent, ChannelStatus};
    use crate::msgs::Message;
    use crate::signer::keys::ChannelKeys;
    use crate::tx::commitment::CommitmentTransaction;
    use crate::util::loopback;
    use crate::util::test_utils::*;

    const CAPACITY_SAT: u64 = 1_000_000;
    const COMMITMENT_FEE_SAT: u64 = 1_000;
    const SWEEP_FEE_SAT: u64 = 500;

    fn value_to(tx: &Transaction, script: &ScriptBuf) -> u64 {
        tx.output.iter().filter(|o| &o.script_pubkey == script).map(|o| o.value.to_sat()).sum()
    }

    // confirm every spend and return what landed at `destination`
    fn confirm_all(chain: &mut TestChain, spends: &[Transaction], destination: &ScriptBuf) -> u64 {
        let mut total = 0;
        for tx in spends {
            chain.confirm(tx).unwrap();
            total += value_to(tx, destination);
        }
        total
    }

    fn open_with_two_payments() -> (TestChannel, ChannelKeys, ChannelKeys) {
        let alice_keys = ChannelKeys::generate();
        let bob_keys = ChannelKeys::generate();
        let mut ch =
            open_test_channel_with_keys(CAPACITY_SAT, alice_keys.clone(), bob_keys.clone());
        send_payment(&mut ch.funder, &mut ch.fundee, 400_000).unwrap();
        send_payment(&mut ch.funder, &mut ch.fundee, 300_000).unwrap();
        (ch, alice_keys, bob_keys)
    }

    #[test]
    fn funding_test() {
        let ch = open_test_channel(CAPACITY_SAT);
        let funding_tx = ch.funder.funding_transaction().unwrap();
        let setup = ch.funder.setup().unwrap();
        assert_eq!(setup.funding_outpoint, ch.fundee.setup().unwrap().funding_outpoint);
        assert_eq!(setup.funding_outpoint.txid, funding_tx.compute_txid());
        let funding_output = ch.chain.utxo(&setup.funding_outpoint).unwrap();
        assert_eq!(funding_output.value.to_sat(), CAPACITY_SAT);
        assert!(funding_output.script_pubkey.is_p2wsh());
        // the wallet's first output wasn't enough, so both were spent
        assert_eq!(funding_tx.input.len(), 2);
        for utxo in ch.wallet.utxos() {
            assert!(ch.chain.utxo(&utxo.outpoint).is_none());
        }
    }

    #[test]
    fn payments_and_balances_test() {
        let (mut ch, _, _) = open_with_two_payments();
        let alice = ch.funder.holder_state().unwrap();
        assert_eq!(alice.local_balance_sat, 300_000);
        assert_eq!(alice.offered_htlcs.len(), 2);
        assert_eq!(ch.fundee.holder_state().unwrap().received_htlcs.len(), 2);

        let hashes: Vec<_> = ch
            .fundee
            .holder_state()
            .unwrap()
            .received_htlcs
            .iter()
            .map(|h| h.secret_hash)
            .collect();
        let initial = ch.fundee.holder_state().unwrap().local_balance_sat;
        for hash in hashes {
            settle_payment(&mut ch.fundee, &mut ch.funder, hash).unwrap();
        }
        let alice = ch.funder.holder_state().unwrap();
        assert_eq!(alice.remote_balance_sat - initial, 700_000);
        assert_eq!(alice.local_balance_sat, 300_000);
        assert!(!alice.has_pending_htlcs());
        assert_eq!(Some(alice), ch.fundee.counterparty_state());
        assert_eq!(ch.fundee.status(), ChannelStatus::ChannelOpen);
    }

    // alice holds [alice 299_000, rhtlc 400_000, rhtlc 300_000]
    #[test]
    fn enforce_funder_commitment_test() {
        let (mut ch, _, _) = open_with_two_payments();
        let commitment = ch.funder.holder_commitment().unwrap().clone();
        assert_eq!(commitment.outputs.len(), 3);
        let tx = ch.funder.force_close().unwrap();
        ch.chain.confirm(&tx).unwrap();
        ch.fundee.transaction_confirmed(&tx.compute_txid(), 1);
        let theirs = ch.fundee.counterparty_commitment(&tx.compute_txid()).unwrap().clone();
        assert!(!ch.fundee.is_revoked(&theirs));

        let alice_dest = make_destination();
        let bob_dest = make_destination();

        // bob claims both htlcs
        let mut chain = ch.chain.clone();
        let bob_spends = ch.fundee.sweep(&theirs, 1, &bob_dest).unwrap();
        assert_eq!(bob_spends.len(), 2);
        assert_eq!(confirm_all(&mut chain, &bob_spends, &bob_dest), 700_000 - 2 * SWEEP_FEE_SAT);
        // alice's balance waits out the delay
        assert!(ch.funder.sweep(&commitment, 1, &alice_dest).unwrap().is_empty());
        let balance = ch.funder.build_spend(&commitment, 0, 100, alice_dest.clone()).unwrap();
        assert_eq!(
            confirm_all(&mut chain, &[balance], &alice_dest),
            300_000 - COMMITMENT_FEE_SAT - SWEEP_FEE_SAT
        );
        assert_all_spent(&chain, &commitment);

        // bob never claims, so alice recovers everything after the timeout
        let mut chain = ch.chain.clone();
        let alice_spends = ch.funder.sweep(&commitment, 100, &alice_dest).unwrap();
        assert_eq!(alice_spends.len(), 3);
        assert_eq!(
            confirm_all(&mut chain, &alice_spends, &alice_dest),
            CAPACITY_SAT - COMMITMENT_FEE_SAT - 3 * SWEEP_FEE_SAT
        );
        assert_all_spent(&chain, &commitment);
    }

    // bob holds [alice 299_000, htlc 400_000, htlc 300_000]
    #[test]
    fn enforce_fundee_commitment_test() {
        let (mut ch, _, _) = open_with_two_payments();
        let commitment = ch.fundee.holder_commitment().unwrap().clone();
        let tx = ch.fundee.force_close().unwrap();
        ch.chain.confirm(&tx).unwrap();
        ch.funder.transaction_confirmed(&tx.compute_txid(), 1);
        let theirs = ch.funder.counterparty_commitment(&tx.compute_txid()).unwrap().clone();

        let alice_dest = make_destination();
        let bob_dest = make_destination();
        let mut chain = ch.chain.clone();
        let bob_spends = ch.fundee.sweep(&commitment, 1, &bob_dest).unwrap();
        assert_eq!(confirm_all(&mut chain, &bob_spends, &bob_dest), 700_000 - 2 * SWEEP_FEE_SAT);
        let alice_spends = ch.funder.sweep(&theirs, 1, &alice_dest).unwrap();
        assert_eq!(alice_spends.len(), 1);
        confirm_all(&mut chain, &alice_spends, &alice_dest);
        assert_all_spent(&chain, &commitment);

        // alice's timeouts on bob's commitment
        let mut chain = ch.chain.clone();
        let alice_spends = ch.funder.sweep(&theirs, 144, &alice_dest).unwrap();
        assert_eq!(alice_spends.len(), 3);
        confirm_all(&mut chain, &alice_spends, &alice_dest);
        assert_all_spent(&chain, &commitment);
    }

    #[test]
    fn penalize_after_settle_test() {
        let (mut ch, alice_keys, _) = open_with_two_payments();
        let stale = ch.funder.holder_commitment().unwrap().clone();
        let hashes: Vec<_> =
            ch.funder.holder_state().unwrap().offered_htlcs.iter().map(|h| h.secret_hash).collect();
        for hash in hashes {
            settle_payment(&mut ch.fundee, &mut ch.funder, hash).unwrap();
        }

        // alice broadcasts the state where she still held the htlcs
        let tx = sign_holder_commitment(&ch.funder, &alice_keys, &stale);
        ch.chain.confirm(&tx).unwrap();
        ch.fundee.transaction_confirmed(&tx.compute_txid(), 1);
        let theirs = ch.fundee.counterparty_commitment(&tx.compute_txid()).unwrap().clone();
        assert!(ch.fundee.is_revoked(&theirs));

        let bob_dest = make_destination();
        // her balance and both htlcs
        let spends = ch.fundee.sweep(&theirs, 1, &bob_dest).unwrap();
        assert_eq!(spends.len(), 3);
        let mut chain = ch.chain.clone();
        assert_eq!(
            confirm_all(&mut chain, &spends, &bob_dest),
            CAPACITY_SAT - COMMITMENT_FEE_SAT - 3 * SWEEP_FEE_SAT
        );
        assert_all_spent(&chain, &stale);
        // alice's timeouts lose the race
        let alice_spends = ch.funder.sweep(&stale, 100, &make_destination()).unwrap();
        assert_eq!(alice_spends.len(), 3);
        for tx in &alice_spends {
            assert!(chain.confirm(tx).is_err());
        }
    }

    #[test]
    fn cooperative_close_after_payments_test() {
        let mut ch = open_test_channel(CAPACITY_SAT);
        let hash = send_payment(&mut ch.funder, &mut ch.fundee, 250_000).unwrap();
        settle_payment(&mut ch.fundee, &mut ch.funder, hash).unwrap();
        // and back again
        let hash = send_payment(&mut ch.fundee, &mut ch.funder, 50_000).unwrap();
        settle_payment(&mut ch.funder, &mut ch.fundee, hash).unwrap();

        let close = ch.fundee.close_channel().unwrap();
        let transcript = loopback::exchange(&mut ch.fundee, &mut ch.funder, close).unwrap();
        let commands: Vec<_> = transcript.iter().map(Message::command).collect();
        assert_eq!(commands, vec!["close_channel", "closing_signed"]);

        let closing_tx = ch.fundee.closing_transaction().unwrap().clone();
        ch.chain.confirm(&closing_tx).unwrap();
        let values: Vec<u64> = closing_tx.output.iter().map(|o| o.value.to_sat()).collect();
        assert_eq!(values, vec![800_000 - COMMITMENT_FEE_SAT, 200_000]);
        close_both(&mut ch.funder, &mut ch.fundee, &closing_tx);
    }

    fn close_both(a: &mut ChannelAgent, b: &mut ChannelAgent, tx: &Transaction) {
        let txid = tx.compute_txid();
        for agent in [a, b] {
            let depth = agent.config().close_confirmation_depth;
            agent.transaction_confirmed(&txid, depth);
            assert_eq!(agent.status(), ChannelStatus::Closed);
        }
    }

    fn assert_all_spent(chain: &TestChain, commitment: &CommitmentTransaction) {
        for vout in 0..commitment.outputs.len() {
            let outpoint = OutPoint { txid: commitment.txid(), vout: vout as u32 };
            assert!(chain.utxo(&outpoint).is_none(), "{} unspent", outpoint);
        }
    }
}
