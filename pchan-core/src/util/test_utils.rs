use bitcoin::hashes::{sha256, Hash};
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::secp256k1::{self, Secp256k1, SecretKey};
use bitcoin::{Amount, OutPoint, ScriptBuf, Transaction, TxOut, Txid};
use bitcoinconsensus::{
    VERIFY_CHECKLOCKTIMEVERIFY, VERIFY_CHECKSEQUENCEVERIFY, VERIFY_P2SH, VERIFY_WITNESS,
};

use crate::channel::{ChannelAgent, ChannelConfig, ChannelStatus};
use crate::msgs::Message;
use crate::policy::error::{insufficient_funds_error, invalid_argument_error, ChannelError};
use crate::prelude::*;
use crate::signer::keys::ChannelKeys;
use crate::signer::secrets::SecretHash;
use crate::tx::commitment::{CommitmentBuilder, CommitmentTransaction};
use crate::util::crypto_utils::{generate_secret_key, sign_legacy_input, signature_to_bitcoin_vec};
use crate::util::loopback;
use crate::wallet::{Utxo, Wallet};

/// Unwrap a channel result, panicking with the error message
#[macro_export]
macro_rules! assert_channel_ok {
    ($res: expr) => {
        match $res {
            Ok(v) => v,
            Err(e) => panic!("expected Ok, got {}", e),
        }
    };
}

/// Assert that a channel result is an error of the given kind
#[macro_export]
macro_rules! assert_error_kind {
    ($res: expr, $kind: ident) => {
        match $res {
            Err(ref e) => assert!(
                matches!(e.kind, $crate::policy::error::ChannelErrorKind::$kind(_)),
                "expected {} error, got {:?}",
                stringify!($kind),
                e.kind
            ),
            Ok(_) => panic!("expected {} error, got Ok", stringify!($kind)),
        }
    };
}

/// Run the consensus script interpreter over every input of `tx`.
///
/// `spent` holds the outputs spent by the inputs.
pub fn verify_spend(tx: &Transaction, spent: &[(OutPoint, TxOut)]) -> Result<(), String> {
    let flags =
        VERIFY_P2SH | VERIFY_WITNESS | VERIFY_CHECKLOCKTIMEVERIFY | VERIFY_CHECKSEQUENCEVERIFY;
    tx.verify_with_flags(
        |outpoint| spent.iter().find(|(o, _)| o == outpoint).map(|(_, txout)| txout.clone()),
        flags,
    )
    .map_err(|e| format!("{:?}", e))
}

/// A wallet with P2PKH outputs under a single key
pub struct TestWallet {
    secp_ctx: Secp256k1<secp256k1::All>,
    key: SecretKey,
    pubkey: bitcoin::PublicKey,
    utxos: Vec<Utxo>,
}

impl TestWallet {
    /// A wallet holding one output of each value
    pub fn new(values_sat: &[u64]) -> Self {
        let secp_ctx = Secp256k1::new();
        let key = generate_secret_key();
        let pubkey = bitcoin::PublicKey::new(secp256k1::PublicKey::from_secret_key(&secp_ctx, &key));
        let script_pubkey = ScriptBuf::new_p2pkh(&pubkey.pubkey_hash());
        let utxos = values_sat
            .iter()
            .enumerate()
            .map(|(i, value)| Utxo {
                outpoint: OutPoint {
                    txid: Txid::from_byte_array(
                        sha256::Hash::hash(&(i as u32).to_be_bytes()).to_byte_array(),
                    ),
                    vout: i as u32,
                },
                txout: TxOut { value: Amount::from_sat(*value), script_pubkey: script_pubkey.clone() },
            })
            .collect();
        TestWallet { secp_ctx, key, pubkey, utxos }
    }

    /// The wallet's outputs
    pub fn utxos(&self) -> &[Utxo] {
        &self.utxos
    }
}

impl Wallet for TestWallet {
    fn select_funds(&self, amount_sat: u64) -> Result<Vec<Utxo>, ChannelError> {
        let mut selected = Vec::new();
        let mut total = 0;
        for utxo in &self.utxos {
            if total >= amount_sat {
                break;
            }
            total += utxo.txout.value.to_sat();
            selected.push(utxo.clone());
        }
        if total < amount_sat {
            return Err(insufficient_funds_error(format!(
                "wallet has {} but {} needed",
                total, amount_sat
            )));
        }
        Ok(selected)
    }

    fn change_script(&self) -> ScriptBuf {
        ScriptBuf::new_p2pkh(&self.pubkey.pubkey_hash())
    }

    fn sign_funding_transaction(
        &self,
        tx: &mut Transaction,
        utxos: &[Utxo],
    ) -> Result<(), ChannelError> {
        for i in 0..tx.input.len() {
            let utxo = utxos
                .iter()
                .find(|u| u.outpoint == tx.input[i].previous_output)
                .ok_or_else(|| invalid_argument_error(format!("input {} is not ours", i)))?;
            let sig =
                sign_legacy_input(&self.secp_ctx, tx, i, &utxo.txout.script_pubkey, &self.key)?;
            let sig_push = PushBytesBuf::try_from(signature_to_bitcoin_vec(sig))
                .map_err(|e| invalid_argument_error(format!("{}", e)))?;
            tx.input[i].script_sig =
                Builder::new().push_slice(sig_push).push_key(&self.pubkey).into_script();
        }
        Ok(())
    }
}

/// A set of unspent outputs that only accepts valid spends
#[derive(Clone, Default)]
pub struct TestChain {
    utxos: Map<OutPoint, TxOut>,
}

impl TestChain {
    /// An empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the wallet's outputs
    pub fn fund(&mut self, wallet: &TestWallet) {
        for utxo in wallet.utxos() {
            self.utxos.insert(utxo.outpoint, utxo.txout.clone());
        }
    }

    /// The unspent output at `outpoint`
    pub fn utxo(&self, outpoint: &OutPoint) -> Option<&TxOut> {
        self.utxos.get(outpoint)
    }

    /// Verify `tx` against the unspent outputs, then apply it
    pub fn confirm(&mut self, tx: &Transaction) -> Result<(), String> {
        let mut spent = Vec::new();
        for input in &tx.input {
            let txout = self
                .utxos
                .get(&input.previous_output)
                .ok_or_else(|| format!("{} is not unspent", input.previous_output))?;
            spent.push((input.previous_output, txout.clone()));
        }
        verify_spend(tx, &spent)?;
        for input in &tx.input {
            self.utxos.remove(&input.previous_output);
        }
        let txid = tx.compute_txid();
        for (vout, txout) in tx.output.iter().enumerate() {
            self.utxos.insert(OutPoint { txid, vout: vout as u32 }, txout.clone());
        }
        Ok(())
    }
}

/// A P2PKH script for a fresh key
pub fn make_destination() -> ScriptBuf {
    let secp_ctx = Secp256k1::signing_only();
    let pubkey = secp256k1::PublicKey::from_secret_key(&secp_ctx, &generate_secret_key());
    ScriptBuf::new_p2pkh(&bitcoin::PublicKey::new(pubkey).pubkey_hash())
}

/// An initialized agent with default configuration
pub fn make_test_agent() -> ChannelAgent {
    make_test_agent_with_keys(ChannelKeys::generate())
}

/// An initialized agent using `keys`
pub fn make_test_agent_with_keys(keys: ChannelKeys) -> ChannelAgent {
    let mut agent = ChannelAgent::new(ChannelConfig::default());
    agent.initialize(keys).expect("initialize");
    agent
}

/// Two agents with an open channel, and the chain holding its funding output
pub struct TestChannel {
    /// Opened the channel
    pub funder: ChannelAgent,
    /// Accepted the channel
    pub fundee: ChannelAgent,
    /// The funder's wallet
    pub wallet: TestWallet,
    /// The funding transaction is confirmed here
    pub chain: TestChain,
}

/// Open a channel of `capacity_sat` between two fresh agents
pub fn open_test_channel(capacity_sat: u64) -> TestChannel {
    open_test_channel_with_keys(capacity_sat, ChannelKeys::generate(), ChannelKeys::generate())
}

/// Open a channel of `capacity_sat` between agents using the given keys
pub fn open_test_channel_with_keys(
    capacity_sat: u64,
    funder_keys: ChannelKeys,
    fundee_keys: ChannelKeys,
) -> TestChannel {
    let wallet = TestWallet::new(&[capacity_sat / 2, capacity_sat]);
    let mut chain = TestChain::new();
    chain.fund(&wallet);
    let mut funder = make_test_agent_with_keys(funder_keys);
    let mut fundee = make_test_agent_with_keys(fundee_keys);

    let peer = fundee.peer_info().expect("peer_info");
    let open = funder.open_channel(capacity_sat, &peer, &wallet).expect("open_channel");
    loopback::exchange(&mut funder, &mut fundee, open).expect("open exchange");
    assert_eq!(funder.status(), ChannelStatus::ChannelOpen);
    assert_eq!(fundee.status(), ChannelStatus::ChannelOpen);

    let funding_tx = funder.funding_transaction().expect("funding tx").clone();
    chain.confirm(&funding_tx).expect("funding tx is valid");
    TestChannel { funder, fundee, wallet, chain }
}

/// Fully sign any commitment `agent` holds, including revoked ones.
///
/// `keys` must be the agent's keys.
pub fn sign_holder_commitment(
    agent: &ChannelAgent,
    keys: &ChannelKeys,
    commitment: &CommitmentTransaction,
) -> Transaction {
    let setup = agent.setup().expect("channel setup");
    CommitmentBuilder::for_holder(setup, keys.pubkeys(), agent.config().commitment_fee_sat)
        .sign_for_broadcast(commitment, keys)
        .expect("sign commitment")
}

/// Have `payer` send `amount_sat` to `payee` and run the update to completion.
///
/// Returns the payee's secret hash for the new HTLC.
pub fn send_payment(
    payer: &mut ChannelAgent,
    payee: &mut ChannelAgent,
    amount_sat: u64,
) -> Result<SecretHash, ChannelError> {
    let secret_hash = payee.new_payment_secret();
    let balance = payer.holder_state().map_or(0, |s| s.local_balance_sat);
    let change_sat = balance.saturating_sub(amount_sat);
    let update = payer.send(amount_sat, change_sat, secret_hash)?;
    loopback::exchange(payer, payee, update)?;
    Ok(secret_hash)
}

/// Have `payee` settle the HTLC for `secret_hash` with `payer`
pub fn settle_payment(
    payee: &mut ChannelAgent,
    payer: &mut ChannelAgent,
    secret_hash: SecretHash,
) -> Result<Vec<Message>, ChannelError> {
    let settle = payee.fulfill(secret_hash)?;
    loopback::exchange(payee, payer, settle)
}
