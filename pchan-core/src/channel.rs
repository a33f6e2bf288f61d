use core::fmt::{self, Debug, Formatter};

use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::{Address, Amount, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxOut, Txid};
use serde_derive::{Deserialize, Serialize};
use tracing::*;

use crate::monitor::{ChannelMonitor, MonitorEvent};
use crate::msgs::{Message, PeerInfo};
use crate::policy::error::{
    insufficient_funds_error, invalid_argument_error, invalid_state_error, missing_secret_error,
    not_initialized_error, ChannelError, ChannelErrorKind,
};
use crate::policy::validator::{SimpleValidator, Validator};
use crate::prelude::*;
use crate::signer::keys::{ChannelKeys, ChannelPublicKeys};
use crate::signer::secrets::{Secret, SecretHash, SecretPreimage, SecretStore};
use crate::tx::commitment::{CommitmentBuilder, CommitmentTransaction, HtlcInfo};
use crate::tx::enforce::{self, EnforcementContext};
use crate::tx::script::{derive_p2sh_output_script, PlainCondition};
use crate::util::crypto_utils::verify_segwit_input;
use crate::util::transaction_utils::{
    add_funding_sigs, build_transaction, funding_script_pubkey, make_funding_redeemscript,
    unsigned_input,
};
use crate::wallet::{build_funding_transaction, Wallet};
use crate::Arc;

/// Per-agent configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// The network, used for logging addresses
    pub network: Network,
    /// Fee of every commitment and of the cooperative close, paid by the funder
    pub commitment_fee_sat: u64,
    /// Fee of the funding transaction
    pub funding_fee_sat: u64,
    /// Fee of each enforcement spend
    pub sweep_fee_sat: u64,
    /// Confirmations after which a closed channel is done
    pub close_confirmation_depth: u32,
    /// Most HTLCs pending at once
    pub max_pending_htlcs: usize,
    /// Smallest HTLC accepted
    pub min_htlc_value_sat: u64,
}

impl ChannelConfig {
    /// Default configuration for a network
    pub fn new(network: Network) -> Self {
        ChannelConfig { network, ..Default::default() }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            network: Network::Regtest,
            commitment_fee_sat: 1000,
            funding_fee_sat: 1000,
            sweep_fee_sat: 500,
            close_confirmation_depth: 6,
            max_pending_htlcs: 10,
            min_htlc_value_sat: 1000,
        }
    }
}

/// The agent's lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelStatus {
    /// No keys yet
    Uninitialized,
    /// Keys and first revocation secrets generated
    Initialized,
    /// Both parties hold a countersigned commitment and no update is in flight
    ChannelOpen,
    /// An update is in flight
    Updating,
    /// A closing transaction exists
    Closing,
    /// The close is buried deep enough
    Closed,
}

/// The parameters agreed when the channel was opened
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSetup {
    /// Whether we funded the channel
    pub is_funder: bool,
    /// The channel capacity
    pub capacity_sat: u64,
    /// The 2-of-2 funding output
    pub funding_outpoint: OutPoint,
    /// The other party's keys
    pub counterparty_pubkeys: ChannelPublicKeys,
}

/// One party's view of a channel state.
///
/// Local and remote are from the point of view of the party whose
/// commitment this state describes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelState {
    /// Increases by one with each update
    pub sequence_number: u64,
    /// Our balance
    pub local_balance_sat: u64,
    /// Their balance
    pub remote_balance_sat: u64,
    /// HTLCs we pay
    pub offered_htlcs: Vec<HtlcInfo>,
    /// HTLCs we are paid
    pub received_htlcs: Vec<HtlcInfo>,
    /// Our revocation hash for this state
    pub local_revocation_hash: Option<SecretHash>,
    /// The revocation secret we disclosed for the previous state
    pub local_revocation_secret_for_prev_state: Option<SecretPreimage>,
    /// The counterparty's revocation hash for the previous state
    pub remote_revocation_secret_hash_for_prev_state: Option<SecretHash>,
}

impl ChannelState {
    /// The initial state
    pub fn new(
        local_balance_sat: u64,
        remote_balance_sat: u64,
        local_revocation_hash: Option<SecretHash>,
    ) -> Self {
        ChannelState {
            sequence_number: 0,
            local_balance_sat,
            remote_balance_sat,
            offered_htlcs: Vec::new(),
            received_htlcs: Vec::new(),
            local_revocation_hash,
            local_revocation_secret_for_prev_state: None,
            remote_revocation_secret_hash_for_prev_state: None,
        }
    }

    /// Balances plus pending HTLCs, None on overflow
    pub fn total_sat(&self) -> Option<u64> {
        self.offered_htlcs
            .iter()
            .chain(self.received_htlcs.iter())
            .try_fold(self.local_balance_sat.checked_add(self.remote_balance_sat)?, |acc, h| {
                acc.checked_add(h.value_sat)
            })
    }

    /// Whether any HTLC is pending
    pub fn has_pending_htlcs(&self) -> bool {
        !self.offered_htlcs.is_empty() || !self.received_htlcs.is_empty()
    }

    /// Number of pending HTLCs
    pub fn pending_htlc_count(&self) -> usize {
        self.offered_htlcs.len() + self.received_htlcs.len()
    }

    fn next_state(&self) -> Result<ChannelState, ChannelError> {
        let sequence_number = self.sequence_number.checked_add(1).ok_or_else(|| {
            invalid_state_error(format!("{}: sequence number exhausted", short_function!()))
        })?;
        Ok(ChannelState {
            sequence_number,
            local_revocation_hash: None,
            local_revocation_secret_for_prev_state: None,
            remote_revocation_secret_hash_for_prev_state: None,
            ..self.clone()
        })
    }

    /// The next state, with an HTLC we pay
    pub fn offer_htlc(&self, htlc: HtlcInfo) -> Result<ChannelState, ChannelError> {
        let mut next = self.next_state()?;
        next.local_balance_sat =
            self.local_balance_sat.checked_sub(htlc.value_sat).ok_or_else(|| {
                insufficient_funds_error(format!(
                    "offer_htlc: {} exceeds balance {}",
                    htlc.value_sat, self.local_balance_sat
                ))
            })?;
        next.offered_htlcs.push(htlc);
        Ok(next)
    }

    /// The next state, with an HTLC we are paid
    pub fn accept_htlc(&self, htlc: HtlcInfo) -> Result<ChannelState, ChannelError> {
        let mut next = self.next_state()?;
        next.remote_balance_sat =
            self.remote_balance_sat.checked_sub(htlc.value_sat).ok_or_else(|| {
                insufficient_funds_error(format!(
                    "accept_htlc: {} exceeds remote balance {}",
                    htlc.value_sat, self.remote_balance_sat
                ))
            })?;
        next.received_htlcs.push(htlc);
        Ok(next)
    }

    /// The next state, with a received HTLC paid into our balance
    pub fn settle_received(&self, secret_hash: &SecretHash) -> Result<ChannelState, ChannelError> {
        let mut next = self.next_state()?;
        let htlc = take_htlc(&mut next.received_htlcs, secret_hash)?;
        next.local_balance_sat = add_sat(next.local_balance_sat, htlc.value_sat)?;
        Ok(next)
    }

    /// The next state, with an offered HTLC paid into the remote balance
    pub fn settle_offered(&self, secret_hash: &SecretHash) -> Result<ChannelState, ChannelError> {
        let mut next = self.next_state()?;
        let htlc = take_htlc(&mut next.offered_htlcs, secret_hash)?;
        next.remote_balance_sat = add_sat(next.remote_balance_sat, htlc.value_sat)?;
        Ok(next)
    }
}

fn take_htlc(htlcs: &mut Vec<HtlcInfo>, secret_hash: &SecretHash) -> Result<HtlcInfo, ChannelError> {
    let index = htlcs
        .iter()
        .position(|h| h.secret_hash == *secret_hash)
        .ok_or_else(|| invalid_argument_error(format!("no pending htlc for {}", secret_hash)))?;
    Ok(htlcs.remove(index))
}

fn add_sat(a: u64, b: u64) -> Result<u64, ChannelError> {
    a.checked_add(b).ok_or_else(|| invalid_argument_error("balance overflow"))
}

/// Our current state and the commitment we can broadcast for it
#[derive(Clone, Debug)]
pub struct HolderView {
    /// The state, from our side
    pub state: ChannelState,
    /// Our commitment, countersigned by the counterparty
    pub commitment: CommitmentTransaction,
}

/// The counterparty's current state and the commitment we countersigned for it
#[derive(Clone, Debug)]
pub struct CounterpartyView {
    /// The state, from their side
    pub state: ChannelState,
    /// Their commitment, countersigned by us
    pub commitment: CommitmentTransaction,
}

/// An update that has not completed
#[derive(Clone, Debug)]
pub enum PendingUpdate {
    /// We proposed a new state and wait for the ack
    Proposed {
        /// Our side of the proposed state
        holder_state: ChannelState,
        /// Their side, with the commitment we sent
        counterparty: CounterpartyView,
        /// What we sent, for resending
        message: Message,
    },
    /// We accepted a proposal and wait for the revocation
    Accepted {
        /// Their side of the accepted state
        counterparty: CounterpartyView,
    },
}

/// One party of a payment channel.
///
/// The agent is a state machine: operations return the messages to deliver
/// to the peer, and [ChannelAgent::handle_message] returns the replies.
/// Incoming messages are fully validated before any state changes.
pub struct ChannelAgent {
    config: ChannelConfig,
    validator: Arc<dyn Validator>,
    status: ChannelStatus,
    keys: Option<ChannelKeys>,
    secrets: SecretStore,
    // our revocation hashes, by the state they revoke
    holder_revocation_hashes: OrderedMap<u64, SecretHash>,
    counterparty_revocation_hashes: OrderedMap<u64, SecretHash>,
    setup: Option<ChannelSetup>,
    funding_tx: Option<Transaction>,
    holder: Option<HolderView>,
    counterparty: Option<CounterpartyView>,
    // every counterparty commitment we countersigned
    counterparty_commitments: Map<Txid, CommitmentTransaction>,
    pending: Option<PendingUpdate>,
    // the last message handled and our replies, for answering resends
    last_handled: Option<(Message, Vec<Message>)>,
    closing_proposal: Option<(Transaction, Signature)>,
    closing_tx: Option<Transaction>,
    monitor: ChannelMonitor,
}

impl Debug for ChannelAgent {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelAgent")
            .field("status", &self.status)
            .field("keys", &self.keys)
            .field("setup", &self.setup)
            .field("holder", &self.holder)
            .field("counterparty", &self.counterparty)
            .field("pending", &self.pending)
            .field("secrets", &self.secrets)
            .field("counterparty_commitments", &self.counterparty_commitments.len())
            .field("closing_tx", &self.closing_tx.as_ref().map(|tx| tx.compute_txid()))
            .field("monitor", &self.monitor)
            .finish()
    }
}

impl ChannelAgent {
    /// An uninitialized agent validating with a [SimpleValidator]
    pub fn new(config: ChannelConfig) -> Self {
        let validator = Arc::new(SimpleValidator::new(config.clone()));
        Self::with_validator(config, validator)
    }

    /// An uninitialized agent with a custom validator
    pub fn with_validator(config: ChannelConfig, validator: Arc<dyn Validator>) -> Self {
        let monitor = ChannelMonitor::new(config.close_confirmation_depth);
        ChannelAgent {
            config,
            validator,
            status: ChannelStatus::Uninitialized,
            keys: None,
            secrets: SecretStore::new(),
            holder_revocation_hashes: OrderedMap::new(),
            counterparty_revocation_hashes: OrderedMap::new(),
            setup: None,
            funding_tx: None,
            holder: None,
            counterparty: None,
            counterparty_commitments: Map::new(),
            pending: None,
            last_handled: None,
            closing_proposal: None,
            closing_tx: None,
            monitor,
        }
    }

    /// Install keys and generate the revocation secrets for states 0 and 1
    #[instrument(skip(self, keys))]
    pub fn initialize(&mut self, keys: ChannelKeys) -> Result<(), ChannelError> {
        if self.status != ChannelStatus::Uninitialized {
            return Err(invalid_state_error(format!(
                "{}: already initialized, status {:?}",
                short_function!(),
                self.status
            )));
        }
        for n in 0..2 {
            let secret = self.secrets.generate();
            self.holder_revocation_hashes.insert(n, secret.hash);
        }
        info!("initialized with funding key {}", keys.pubkeys().funding_pubkey);
        self.keys = Some(keys);
        self.status = ChannelStatus::Initialized;
        trace_channel_state!(self);
        Ok(())
    }

    /// What the peer needs to open a channel with us
    pub fn peer_info(&self) -> Result<PeerInfo, ChannelError> {
        Ok(PeerInfo {
            pubkeys: *self.require_keys()?.pubkeys(),
            first_revocation_hash: self.holder_revocation_hash(0)?,
            second_revocation_hash: self.holder_revocation_hash(1)?,
        })
    }

    /// Generate a secret for an incoming payment and return its hash
    pub fn new_payment_secret(&mut self) -> SecretHash {
        let secret = self.secrets.generate();
        debug!("new payment secret {}", secret.hash);
        secret.hash
    }

    /// Fund a channel of `capacity_sat` with `peer` from `wallet`.
    ///
    /// Returns the [Message::OpenChannel] for the peer.
    #[instrument(skip(self, peer, wallet))]
    pub fn open_channel(
        &mut self,
        capacity_sat: u64,
        peer: &PeerInfo,
        wallet: &dyn Wallet,
    ) -> Result<Message, ChannelError> {
        self.require_status(&[ChannelStatus::Initialized], "open_channel")?;
        if self.setup.is_some() {
            return Err(invalid_state_error("open_channel: channel already opening"));
        }
        if capacity_sat <= self.config.commitment_fee_sat {
            return Err(insufficient_funds_error(format!(
                "open_channel: capacity {} does not cover commitment fee {}",
                capacity_sat, self.config.commitment_fee_sat
            )));
        }
        let keys = self.require_keys()?;
        let our_info = self.peer_info()?;

        let funding_redeemscript =
            make_funding_redeemscript(&keys.pubkeys().funding_pubkey, &peer.pubkeys.funding_pubkey);
        info!(
            "funding {} sat to {}",
            capacity_sat,
            Address::p2wsh(&funding_redeemscript, self.config.network)
        );
        let funding_tx = build_funding_transaction(
            wallet,
            capacity_sat,
            funding_script_pubkey(&funding_redeemscript),
            self.config.funding_fee_sat,
        )?;
        let funding_outpoint = OutPoint { txid: funding_tx.compute_txid(), vout: 0 };
        let setup = ChannelSetup {
            is_funder: true,
            capacity_sat,
            funding_outpoint,
            counterparty_pubkeys: peer.pubkeys,
        };

        let mut secrets = self.secrets.clone();
        secrets.register_hash(peer.first_revocation_hash);
        secrets.register_hash(peer.second_revocation_hash);
        let holder_state = ChannelState::new(capacity_sat, 0, Some(our_info.first_revocation_hash));
        let cp_state = ChannelState::new(0, capacity_sat, Some(peer.first_revocation_hash));
        self.holder_builder(&setup, keys).build(&holder_state, &secrets)?;
        let cp_builder = self.counterparty_builder(&setup, keys);
        let mut cp_commitment = cp_builder.build(&cp_state, &secrets)?;
        cp_builder.countersign(&mut cp_commitment, keys)?;

        let message = Message::OpenChannel {
            capacity_sat,
            funding_outpoint,
            peer: our_info,
            commitment: cp_commitment.clone(),
        };

        self.secrets = secrets;
        self.counterparty_revocation_hashes.insert(0, peer.first_revocation_hash);
        self.counterparty_revocation_hashes.insert(1, peer.second_revocation_hash);
        self.monitor.watch_funding(funding_outpoint.txid);
        self.watch_counterparty_commitment(&cp_commitment);
        self.setup = Some(setup);
        self.funding_tx = Some(funding_tx);
        self.pending = Some(PendingUpdate::Proposed {
            holder_state,
            counterparty: CounterpartyView { state: cp_state, commitment: cp_commitment },
            message: message.clone(),
        });
        trace_channel_state!(self);
        Ok(message)
    }

    /// Pay `amount_sat` to the holder of `destination_secret_hash` through a new HTLC.
    ///
    /// `change_sat` must be our balance after the payment.
    #[instrument(skip(self))]
    pub fn send(
        &mut self,
        amount_sat: u64,
        change_sat: u64,
        destination_secret_hash: SecretHash,
    ) -> Result<Message, ChannelError> {
        self.require_status(&[ChannelStatus::ChannelOpen], "send")?;
        let holder = self.require_holder()?;
        let balance = holder.state.local_balance_sat;
        if amount_sat > balance {
            return Err(insufficient_funds_error(format!(
                "send: amount {} exceeds balance {}",
                amount_sat, balance
            )));
        }
        if balance - amount_sat != change_sat {
            return Err(invalid_argument_error(format!(
                "send: change {} != balance {} - amount {}",
                change_sat, balance, amount_sat
            )));
        }
        if amount_sat < self.config.min_htlc_value_sat {
            return Err(invalid_argument_error(format!(
                "send: amount {} below minimum {}",
                amount_sat, self.config.min_htlc_value_sat
            )));
        }
        if holder.state.pending_htlc_count() >= self.config.max_pending_htlcs {
            return Err(invalid_state_error(format!(
                "send: {} htlcs already pending",
                holder.state.pending_htlc_count()
            )));
        }
        if holder.state.offered_htlcs.iter().any(|h| h.secret_hash == destination_secret_hash) {
            return Err(invalid_argument_error(format!(
                "send: already paying {}",
                destination_secret_hash
            )));
        }

        let htlc = HtlcInfo { value_sat: amount_sat, secret_hash: destination_secret_hash };
        let holder_state = holder.state.offer_htlc(htlc)?;
        let cp_state = self.require_counterparty()?.state.accept_htlc(htlc)?;
        let mut secrets = self.secrets.clone();
        secrets.register_hash(destination_secret_hash);
        let message = self.propose(holder_state, cp_state, secrets, |commitment| Message::Update {
            amount_sat,
            change_sat,
            secret_hash: destination_secret_hash,
            commitment,
        })?;
        info!("sending {} sat to {}", amount_sat, destination_secret_hash);
        Ok(message)
    }

    /// Settle a received HTLC by disclosing its preimage
    #[instrument(skip(self))]
    pub fn fulfill(&mut self, secret_hash: SecretHash) -> Result<Message, ChannelError> {
        self.require_status(&[ChannelStatus::ChannelOpen], "fulfill")?;
        let holder = self.require_holder()?;
        if !holder.state.received_htlcs.iter().any(|h| h.secret_hash == secret_hash) {
            return Err(invalid_argument_error(format!(
                "fulfill: no received htlc for {}",
                secret_hash
            )));
        }
        let preimage = self.secrets.preimage(&secret_hash).ok_or_else(|| {
            missing_secret_error(format!("fulfill: no preimage for {}", secret_hash))
        })?;
        let holder_state = holder.state.settle_received(&secret_hash)?;
        let cp_state = self.require_counterparty()?.state.settle_offered(&secret_hash)?;
        let secrets = self.secrets.clone();
        let message = self.propose(holder_state, cp_state, secrets, |commitment| {
            Message::Settle { secret_hash, preimage, commitment }
        })?;
        info!("settling {}", secret_hash);
        Ok(message)
    }

    /// The proposal or close request we are waiting on, to send again
    pub fn resend_pending_update(&self) -> Result<Message, ChannelError> {
        if let Some(PendingUpdate::Proposed { message, .. }) = &self.pending {
            return Ok(message.clone());
        }
        if let Some((transaction, signature)) = &self.closing_proposal {
            return Ok(Message::CloseChannel {
                transaction: transaction.clone(),
                signature: *signature,
            });
        }
        Err(invalid_state_error(format!(
            "{}: nothing pending in {:?}",
            short_function!(),
            self.status
        )))
    }

    /// Handle a message from the peer, returning the replies.
    ///
    /// A repeat of the last message handled gets the same replies again.
    /// Any failure is a protocol violation and leaves the agent unchanged.
    #[instrument(skip_all, fields(command = msg.command()))]
    pub fn handle_message(&mut self, msg: &Message) -> Result<Vec<Message>, ChannelError> {
        if let Some((last, replies)) = &self.last_handled {
            if last == msg {
                debug!("repeated {}, sending cached replies", msg.command());
                return Ok(replies.clone());
            }
        }
        let result = match msg {
            Message::OpenChannel { capacity_sat, funding_outpoint, peer, commitment } =>
                self.handle_open_channel(*capacity_sat, *funding_outpoint, peer, commitment),
            Message::AcceptChannel { commitment } => self.handle_accept_channel(commitment),
            Message::Update { amount_sat, change_sat, secret_hash, commitment } =>
                self.handle_update(*amount_sat, *change_sat, secret_hash, commitment),
            Message::Settle { secret_hash, preimage, commitment } =>
                self.handle_settle(secret_hash, preimage, commitment),
            Message::UpdateAck { commitment, revocation_secret, next_revocation_hash } =>
                self.handle_update_ack(commitment, revocation_secret, next_revocation_hash),
            Message::Revoke { sequence_number, revocation_secret, next_revocation_hash } =>
                self.handle_revoke(*sequence_number, revocation_secret, next_revocation_hash),
            Message::CloseChannel { transaction, signature } =>
                self.handle_close_channel(transaction, signature),
            Message::ClosingSigned { signature } => self.handle_closing_signed(signature),
        };
        match result {
            Ok(replies) => {
                self.last_handled = Some((msg.clone(), replies.clone()));
                trace_channel_state!(self);
                Ok(replies)
            }
            Err(e) => Err(e.into_protocol_violation()),
        }
    }

    fn handle_open_channel(
        &mut self,
        capacity_sat: u64,
        funding_outpoint: OutPoint,
        peer: &PeerInfo,
        commitment: &CommitmentTransaction,
    ) -> Result<Vec<Message>, ChannelError> {
        self.require_status(&[ChannelStatus::Initialized], "open_channel")?;
        if self.setup.is_some() {
            protocol_err!("channel already opening");
        }
        self.validator.validate_open(capacity_sat)?;
        let keys = self.require_keys()?;
        let setup = ChannelSetup {
            is_funder: false,
            capacity_sat,
            funding_outpoint,
            counterparty_pubkeys: peer.pubkeys,
        };
        let mut secrets = self.secrets.clone();
        secrets.register_hash(peer.first_revocation_hash);
        secrets.register_hash(peer.second_revocation_hash);

        let holder_state = ChannelState::new(0, capacity_sat, Some(self.holder_revocation_hash(0)?));
        let holder_builder = self.holder_builder(&setup, keys);
        let expected = holder_builder.build(&holder_state, &secrets)?;
        self.validator.validate_commitment(&expected, commitment)?;
        holder_builder.verify_countersignature(commitment, keys)?;

        let cp_state = ChannelState::new(capacity_sat, 0, Some(peer.first_revocation_hash));
        let cp_builder = self.counterparty_builder(&setup, keys);
        let mut cp_commitment = cp_builder.build(&cp_state, &secrets)?;
        cp_builder.countersign(&mut cp_commitment, keys)?;
        let reply = Message::AcceptChannel { commitment: cp_commitment.clone() };

        self.secrets = secrets;
        self.counterparty_revocation_hashes.insert(0, peer.first_revocation_hash);
        self.counterparty_revocation_hashes.insert(1, peer.second_revocation_hash);
        self.monitor.watch_funding(funding_outpoint.txid);
        self.watch_counterparty_commitment(&cp_commitment);
        self.setup = Some(setup);
        self.holder = Some(HolderView { state: holder_state, commitment: commitment.clone() });
        self.counterparty = Some(CounterpartyView { state: cp_state, commitment: cp_commitment });
        self.status = ChannelStatus::ChannelOpen;
        info!("accepted channel of {} sat funded at {}", capacity_sat, funding_outpoint);
        Ok(vec![reply])
    }

    fn handle_accept_channel(
        &mut self,
        commitment: &CommitmentTransaction,
    ) -> Result<Vec<Message>, ChannelError> {
        self.require_status(&[ChannelStatus::Initialized], "accept_channel")?;
        let (holder_state, counterparty) = match &self.pending {
            Some(PendingUpdate::Proposed { holder_state, counterparty, .. }) =>
                (holder_state.clone(), counterparty.clone()),
            _ => protocol_err!("no channel open in progress"),
        };
        let setup = self.require_setup()?;
        let keys = self.require_keys()?;
        let holder_builder = self.holder_builder(setup, keys);
        let expected = holder_builder.build(&holder_state, &self.secrets)?;
        self.validator.validate_commitment(&expected, commitment)?;
        holder_builder.verify_countersignature(commitment, keys)?;
        let capacity_sat = setup.capacity_sat;

        self.holder = Some(HolderView { state: holder_state, commitment: commitment.clone() });
        self.counterparty = Some(counterparty);
        self.pending = None;
        self.status = ChannelStatus::ChannelOpen;
        info!("channel of {} sat open", capacity_sat);
        Ok(vec![])
    }

    fn handle_update(
        &mut self,
        amount_sat: u64,
        change_sat: u64,
        secret_hash: &SecretHash,
        commitment: &CommitmentTransaction,
    ) -> Result<Vec<Message>, ChannelError> {
        self.require_status(&[ChannelStatus::ChannelOpen], "update")?;
        let holder = self.require_holder()?;
        let counterparty = self.require_counterparty()?;
        self.validator.validate_sequence(&holder.state, commitment.sequence_number)?;
        self.validator.validate_add_htlc(
            &counterparty.state,
            amount_sat,
            change_sat,
            secret_hash,
            &self.secrets,
        )?;
        let htlc = HtlcInfo { value_sat: amount_sat, secret_hash: *secret_hash };
        let holder_state = holder.state.accept_htlc(htlc)?;
        let cp_state = counterparty.state.offer_htlc(htlc)?;
        let secrets = self.secrets.clone();
        let replies = self.accept_proposal(holder_state, cp_state, commitment, secrets)?;
        info!("accepted htlc of {} sat for {}", amount_sat, secret_hash);
        Ok(replies)
    }

    fn handle_settle(
        &mut self,
        secret_hash: &SecretHash,
        preimage: &SecretPreimage,
        commitment: &CommitmentTransaction,
    ) -> Result<Vec<Message>, ChannelError> {
        self.require_status(&[ChannelStatus::ChannelOpen], "settle")?;
        let holder = self.require_holder()?;
        let counterparty = self.require_counterparty()?;
        self.validator.validate_sequence(&holder.state, commitment.sequence_number)?;
        self.validator.validate_settle(&holder.state, secret_hash, preimage)?;
        let holder_state = holder.state.settle_offered(secret_hash)?;
        let cp_state = counterparty.state.settle_received(secret_hash)?;
        let mut secrets = self.secrets.clone();
        secrets.reveal(*preimage);
        let replies = self.accept_proposal(holder_state, cp_state, commitment, secrets)?;
        info!("htlc {} settled", secret_hash);
        Ok(replies)
    }

    fn handle_update_ack(
        &mut self,
        commitment: &CommitmentTransaction,
        revocation_secret: &SecretPreimage,
        next_revocation_hash: &SecretHash,
    ) -> Result<Vec<Message>, ChannelError> {
        self.require_status(&[ChannelStatus::Updating], "update_ack")?;
        let (holder_state, counterparty) = match &self.pending {
            Some(PendingUpdate::Proposed { holder_state, counterparty, .. }) =>
                (holder_state.clone(), counterparty.clone()),
            _ => protocol_err!("no proposal pending"),
        };
        let setup = self.require_setup()?;
        let keys = self.require_keys()?;
        let n = self.require_holder()?.state.sequence_number;

        let holder_builder = self.holder_builder(setup, keys);
        let expected = holder_builder.build(&holder_state, &self.secrets)?;
        self.validator.validate_commitment(&expected, commitment)?;
        holder_builder.verify_countersignature(commitment, keys)?;
        let cp_revocation_hash = self.counterparty_revocation_hashes.get(&n).copied();
        self.validator.validate_revocation(n, cp_revocation_hash.as_ref(), revocation_secret)?;
        let our_revocation_secret = self.holder_revocation_secret(n)?;
        let our_revocation_hash = self.holder_revocation_hash(n)?;
        let next = Secret::generate();
        let next_n = n + 2;
        let reply = Message::Revoke {
            sequence_number: n,
            revocation_secret: our_revocation_secret,
            next_revocation_hash: next.hash,
        };

        self.secrets.reveal(*revocation_secret);
        self.secrets.register_hash(*next_revocation_hash);
        self.counterparty_revocation_hashes.insert(next_n, *next_revocation_hash);
        self.secrets.insert(next);
        self.holder_revocation_hashes.insert(next_n, next.hash);

        let mut holder_state = holder_state;
        holder_state.local_revocation_secret_for_prev_state = Some(our_revocation_secret);
        holder_state.remote_revocation_secret_hash_for_prev_state = cp_revocation_hash;
        let mut counterparty = counterparty;
        counterparty.state.local_revocation_secret_for_prev_state = Some(*revocation_secret);
        counterparty.state.remote_revocation_secret_hash_for_prev_state = Some(our_revocation_hash);
        self.holder = Some(HolderView { state: holder_state, commitment: commitment.clone() });
        self.counterparty = Some(counterparty);
        self.pending = None;
        self.status = ChannelStatus::ChannelOpen;
        debug!("state {} revoked, now at {}", n, n + 1);
        Ok(vec![reply])
    }

    fn handle_revoke(
        &mut self,
        sequence_number: u64,
        revocation_secret: &SecretPreimage,
        next_revocation_hash: &SecretHash,
    ) -> Result<Vec<Message>, ChannelError> {
        self.require_status(&[ChannelStatus::Updating], "revoke")?;
        let mut counterparty = match &self.pending {
            Some(PendingUpdate::Accepted { counterparty }) => counterparty.clone(),
            _ => protocol_err!("no accepted update pending"),
        };
        let current = self.require_holder()?.state.sequence_number;
        if sequence_number.checked_add(1) != Some(current) {
            protocol_err!("revoking state {} while at {}", sequence_number, current);
        }
        let cp_revocation_hash = self.counterparty_revocation_hashes.get(&sequence_number).copied();
        self.validator.validate_revocation(
            sequence_number,
            cp_revocation_hash.as_ref(),
            revocation_secret,
        )?;
        let our_revocation_hash = self.holder_revocation_hash(sequence_number)?;

        self.secrets.reveal(*revocation_secret);
        self.secrets.register_hash(*next_revocation_hash);
        self.counterparty_revocation_hashes.insert(sequence_number + 2, *next_revocation_hash);
        counterparty.state.local_revocation_secret_for_prev_state = Some(*revocation_secret);
        counterparty.state.remote_revocation_secret_hash_for_prev_state = Some(our_revocation_hash);
        self.counterparty = Some(counterparty);
        self.pending = None;
        self.status = ChannelStatus::ChannelOpen;
        debug!("counterparty revoked state {}", sequence_number);
        Ok(vec![])
    }

    /// Countersign the counterparty's side of a proposal and remember it
    fn propose<F>(
        &mut self,
        mut holder_state: ChannelState,
        mut cp_state: ChannelState,
        secrets: SecretStore,
        make_message: F,
    ) -> Result<Message, ChannelError>
    where
        F: FnOnce(CommitmentTransaction) -> Message,
    {
        let n = holder_state.sequence_number;
        holder_state.local_revocation_hash = Some(self.holder_revocation_hash(n)?);
        cp_state.local_revocation_hash = Some(self.counterparty_revocation_hash(n)?);
        let setup = self.require_setup()?;
        let keys = self.require_keys()?;
        // our own side must be buildable before we commit to theirs
        self.holder_builder(setup, keys).build(&holder_state, &secrets)?;
        let cp_builder = self.counterparty_builder(setup, keys);
        let mut cp_commitment = cp_builder.build(&cp_state, &secrets)?;
        cp_builder.countersign(&mut cp_commitment, keys)?;
        let message = make_message(cp_commitment.clone());

        self.secrets = secrets;
        self.watch_counterparty_commitment(&cp_commitment);
        self.pending = Some(PendingUpdate::Proposed {
            holder_state,
            counterparty: CounterpartyView { state: cp_state, commitment: cp_commitment },
            message: message.clone(),
        });
        self.status = ChannelStatus::Updating;
        trace_channel_state!(self);
        Ok(message)
    }

    /// Check a proposed commitment, countersign theirs and revoke our previous state
    fn accept_proposal(
        &mut self,
        mut holder_state: ChannelState,
        mut cp_state: ChannelState,
        commitment: &CommitmentTransaction,
        secrets: SecretStore,
    ) -> Result<Vec<Message>, ChannelError> {
        let next_n = holder_state.sequence_number;
        let n = next_n - 1;
        holder_state.local_revocation_hash = Some(self.holder_revocation_hash(next_n)?);
        cp_state.local_revocation_hash = Some(self.counterparty_revocation_hash(next_n)?);
        let setup = self.require_setup()?;
        let keys = self.require_keys()?;

        let holder_builder = self.holder_builder(setup, keys);
        let expected = holder_builder.build(&holder_state, &secrets)?;
        self.validator.validate_commitment(&expected, commitment)?;
        holder_builder.verify_countersignature(commitment, keys)?;
        let cp_builder = self.counterparty_builder(setup, keys);
        let mut cp_commitment = cp_builder.build(&cp_state, &secrets)?;
        cp_builder.countersign(&mut cp_commitment, keys)?;

        let our_revocation_secret = self.holder_revocation_secret(n)?;
        let cp_revocation_hash = self.counterparty_revocation_hashes.get(&n).copied();
        let next = Secret::generate();
        let reply = Message::UpdateAck {
            commitment: cp_commitment.clone(),
            revocation_secret: our_revocation_secret,
            next_revocation_hash: next.hash,
        };

        self.secrets = secrets;
        self.secrets.insert(next);
        self.holder_revocation_hashes.insert(n + 2, next.hash);
        holder_state.local_revocation_secret_for_prev_state = Some(our_revocation_secret);
        holder_state.remote_revocation_secret_hash_for_prev_state = cp_revocation_hash;
        self.holder = Some(HolderView { state: holder_state, commitment: commitment.clone() });
        self.watch_counterparty_commitment(&cp_commitment);
        self.pending = Some(PendingUpdate::Accepted {
            counterparty: CounterpartyView { state: cp_state, commitment: cp_commitment },
        });
        self.status = ChannelStatus::Updating;
        Ok(vec![reply])
    }

    /// Propose a cooperative close.  No HTLC may be pending.
    #[instrument(skip(self))]
    pub fn close_channel(&mut self) -> Result<Message, ChannelError> {
        self.require_status(&[ChannelStatus::ChannelOpen], "close_channel")?;
        let holder = self.require_holder()?;
        if holder.state.has_pending_htlcs() {
            return Err(invalid_state_error(format!(
                "close_channel: {} htlcs pending",
                holder.state.pending_htlc_count()
            )));
        }
        let transaction = self.build_closing_transaction()?;
        let signature = self.sign_closing_transaction(&transaction)?;

        self.closing_proposal = Some((transaction.clone(), signature));
        self.status = ChannelStatus::Closing;
        info!("proposing close {}", transaction.compute_txid());
        trace_channel_state!(self);
        Ok(Message::CloseChannel { transaction, signature })
    }

    fn handle_close_channel(
        &mut self,
        transaction: &Transaction,
        signature: &Signature,
    ) -> Result<Vec<Message>, ChannelError> {
        self.require_status(&[ChannelStatus::ChannelOpen], "close_channel")?;
        self.validator.validate_close(&self.require_holder()?.state)?;
        let expected = self.build_closing_transaction()?;
        if expected != *transaction {
            protocol_err!(
                "closing transaction {} does not match expected {}",
                transaction.compute_txid(),
                expected.compute_txid()
            );
        }
        self.verify_closing_signature(transaction, signature)?;
        let our_signature = self.sign_closing_transaction(transaction)?;
        let signed = self.complete_closing_transaction(transaction, our_signature, *signature)?;

        let txid = signed.compute_txid();
        self.monitor.watch_closing(txid);
        self.closing_tx = Some(signed);
        self.status = ChannelStatus::Closing;
        info!("agreed to close with {}", txid);
        Ok(vec![Message::ClosingSigned { signature: our_signature }])
    }

    fn handle_closing_signed(&mut self, signature: &Signature) -> Result<Vec<Message>, ChannelError> {
        self.require_status(&[ChannelStatus::Closing], "closing_signed")?;
        let (transaction, our_signature) = match &self.closing_proposal {
            Some((transaction, our_signature)) => (transaction.clone(), *our_signature),
            None => protocol_err!("no close proposed"),
        };
        self.verify_closing_signature(&transaction, signature)?;
        let signed = self.complete_closing_transaction(&transaction, our_signature, *signature)?;

        let txid = signed.compute_txid();
        self.monitor.watch_closing(txid);
        self.closing_tx = Some(signed);
        self.closing_proposal = None;
        info!("close {} fully signed", txid);
        Ok(vec![])
    }

    /// Sign our latest commitment and give up on cooperation.
    ///
    /// Returns the transaction to broadcast.
    #[instrument(skip(self))]
    pub fn force_close(&mut self) -> Result<Transaction, ChannelError> {
        self.require_status(
            &[ChannelStatus::ChannelOpen, ChannelStatus::Updating, ChannelStatus::Closing],
            "force_close",
        )?;
        if self.closing_tx.is_some() {
            return Err(invalid_state_error("force_close: a closing transaction already exists"));
        }
        let setup = self.require_setup()?;
        let keys = self.require_keys()?;
        let holder = self.require_holder()?;
        let tx = self.holder_builder(setup, keys).sign_for_broadcast(&holder.commitment, keys)?;
        let sequence_number = holder.commitment.sequence_number;

        let txid = tx.compute_txid();
        self.monitor.watch_closing(txid);
        self.closing_tx = Some(tx.clone());
        self.closing_proposal = None;
        self.pending = None;
        self.status = ChannelStatus::Closing;
        warn!("force closing with commitment {} for state {}", txid, sequence_number);
        trace_channel_state!(self);
        Ok(tx)
    }

    /// Apply a confirmation notification from the chain
    #[instrument(skip(self))]
    pub fn transaction_confirmed(&mut self, txid: &Txid, depth: u32) -> Vec<MonitorEvent> {
        let events = self.monitor.transaction_confirmed(txid, depth);
        for event in &events {
            match event {
                MonitorEvent::FundingConfirmed { depth } => {
                    debug!("funding confirmed at depth {}", depth);
                }
                MonitorEvent::CounterpartyCommitmentConfirmed { sequence_number, txid, .. } => {
                    if self.is_revoked_state(*sequence_number) {
                        warn!("counterparty broadcast revoked state {} in {}", sequence_number, txid);
                    } else {
                        info!("counterparty closed with state {} in {}", sequence_number, txid);
                    }
                    if self.status != ChannelStatus::Closed {
                        self.pending = None;
                        self.closing_proposal = None;
                        self.status = ChannelStatus::Closing;
                    }
                }
                MonitorEvent::ClosingConfirmed { txid, depth } => {
                    info!("channel closed by {} at depth {}", txid, depth);
                    self.status = ChannelStatus::Closed;
                }
            }
        }
        if !events.is_empty() {
            trace_channel_state!(self);
        }
        events
    }

    /// A counterparty commitment we countersigned, by txid
    pub fn counterparty_commitment(&self, txid: &Txid) -> Option<&CommitmentTransaction> {
        self.counterparty_commitments.get(txid)
    }

    /// Whether we know the revocation secret of a counterparty commitment
    pub fn is_revoked(&self, commitment: &CommitmentTransaction) -> bool {
        self.counterparty_commitments.contains_key(&commitment.txid())
            && self.is_revoked_state(commitment.sequence_number)
    }

    fn is_revoked_state(&self, sequence_number: u64) -> bool {
        self.counterparty_revocation_hashes
            .get(&sequence_number)
            .map_or(false, |hash| self.secrets.preimage(hash).is_some())
    }

    /// Keys and secrets for spending confirmed commitment outputs
    pub fn enforcement_context(&self) -> Result<EnforcementContext<'_>, ChannelError> {
        Ok(EnforcementContext {
            keys: self.require_keys()?,
            secrets: &self.secrets,
            sweep_fee_sat: self.config.sweep_fee_sat,
        })
    }

    /// Spend output `vout` of a commitment confirmed `depth` blocks deep
    pub fn build_spend(
        &self,
        commitment: &CommitmentTransaction,
        vout: usize,
        depth: u32,
        destination: ScriptBuf,
    ) -> Result<Transaction, ChannelError> {
        enforce::build_spend(commitment, vout, &self.enforcement_context()?, depth, destination)
    }

    /// Spend every output of `commitment` we currently can
    pub fn sweep(
        &self,
        commitment: &CommitmentTransaction,
        depth: u32,
        destination: &ScriptBuf,
    ) -> Result<Vec<Transaction>, ChannelError> {
        let ctx = self.enforcement_context()?;
        let mut spends = Vec::new();
        for vout in 0..commitment.outputs.len() {
            match enforce::build_spend(commitment, vout, &ctx, depth, destination.clone()) {
                Ok(tx) => spends.push(tx),
                Err(e) => match e.kind {
                    ChannelErrorKind::NoApplicableBranch(_)
                    | ChannelErrorKind::InsufficientFunds(_) => {
                        debug!("skipping output {}: {}", vout, e.message());
                    }
                    _ => return Err(e),
                },
            }
        }
        Ok(spends)
    }

    /// Current status
    pub fn status(&self) -> ChannelStatus {
        self.status
    }

    /// The configuration
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Our public keys, once initialized
    pub fn pubkeys(&self) -> Option<&ChannelPublicKeys> {
        self.keys.as_ref().map(|k| k.pubkeys())
    }

    /// The channel parameters, once opening
    pub fn setup(&self) -> Option<&ChannelSetup> {
        self.setup.as_ref()
    }

    /// Our current state
    pub fn holder_state(&self) -> Option<&ChannelState> {
        self.holder.as_ref().map(|h| &h.state)
    }

    /// Our current commitment
    pub fn holder_commitment(&self) -> Option<&CommitmentTransaction> {
        self.holder.as_ref().map(|h| &h.commitment)
    }

    /// The counterparty's current state
    pub fn counterparty_state(&self) -> Option<&ChannelState> {
        self.counterparty.as_ref().map(|c| &c.state)
    }

    /// The counterparty's current commitment
    pub fn counterparty_current_commitment(&self) -> Option<&CommitmentTransaction> {
        self.counterparty.as_ref().map(|c| &c.commitment)
    }

    /// The funding transaction, if we funded
    pub fn funding_transaction(&self) -> Option<&Transaction> {
        self.funding_tx.as_ref()
    }

    /// The fully signed closing transaction, if any
    pub fn closing_transaction(&self) -> Option<&Transaction> {
        self.closing_tx.as_ref()
    }

    /// Known secrets and secret hashes
    pub fn secrets(&self) -> &SecretStore {
        &self.secrets
    }

    /// The chain monitor
    pub fn monitor(&self) -> &ChannelMonitor {
        &self.monitor
    }

    fn require_status(&self, allowed: &[ChannelStatus], op: &str) -> Result<(), ChannelError> {
        if allowed.contains(&self.status) {
            return Ok(());
        }
        if self.status == ChannelStatus::Uninitialized {
            return Err(not_initialized_error(format!("{}: agent not initialized", op)));
        }
        Err(invalid_state_error(format!("{}: not allowed in {:?}", op, self.status)))
    }

    fn require_keys(&self) -> Result<&ChannelKeys, ChannelError> {
        self.keys.as_ref().ok_or_else(|| not_initialized_error("no keys"))
    }

    fn require_setup(&self) -> Result<&ChannelSetup, ChannelError> {
        self.setup.as_ref().ok_or_else(|| not_initialized_error("no channel"))
    }

    fn require_holder(&self) -> Result<&HolderView, ChannelError> {
        self.holder.as_ref().ok_or_else(|| not_initialized_error("channel not open"))
    }

    fn require_counterparty(&self) -> Result<&CounterpartyView, ChannelError> {
        self.counterparty.as_ref().ok_or_else(|| not_initialized_error("channel not open"))
    }

    fn holder_builder<'a>(
        &self,
        setup: &'a ChannelSetup,
        keys: &'a ChannelKeys,
    ) -> CommitmentBuilder<'a> {
        CommitmentBuilder::for_holder(setup, keys.pubkeys(), self.config.commitment_fee_sat)
    }

    fn counterparty_builder<'a>(
        &self,
        setup: &'a ChannelSetup,
        keys: &'a ChannelKeys,
    ) -> CommitmentBuilder<'a> {
        CommitmentBuilder::for_counterparty(setup, keys.pubkeys(), self.config.commitment_fee_sat)
    }

    fn holder_revocation_hash(&self, n: u64) -> Result<SecretHash, ChannelError> {
        self.holder_revocation_hashes
            .get(&n)
            .copied()
            .ok_or_else(|| missing_secret_error(format!("no revocation hash for our state {}", n)))
    }

    fn holder_revocation_secret(&self, n: u64) -> Result<SecretPreimage, ChannelError> {
        let hash = self.holder_revocation_hash(n)?;
        self.secrets.preimage(&hash).ok_or_else(|| {
            missing_secret_error(format!("no revocation secret for our state {}", n))
        })
    }

    fn counterparty_revocation_hash(&self, n: u64) -> Result<SecretHash, ChannelError> {
        self.counterparty_revocation_hashes.get(&n).copied().ok_or_else(|| {
            missing_secret_error(format!("no revocation hash for counterparty state {}", n))
        })
    }

    fn watch_counterparty_commitment(&mut self, commitment: &CommitmentTransaction) {
        let txid = commitment.txid();
        self.monitor.watch_counterparty_commitment(txid, commitment.sequence_number);
        self.counterparty_commitments.insert(txid, commitment.clone());
    }

    fn funding_redeemscript(&self) -> Result<ScriptBuf, ChannelError> {
        let setup = self.require_setup()?;
        let keys = self.require_keys()?;
        Ok(make_funding_redeemscript(
            &keys.pubkeys().funding_pubkey,
            &setup.counterparty_pubkeys.funding_pubkey,
        ))
    }

    /// Funder's output first, each paying P2SH to a plain script on the
    /// payment key.  The funder pays the fee.
    fn build_closing_transaction(&self) -> Result<Transaction, ChannelError> {
        let setup = self.require_setup()?;
        let keys = self.require_keys()?;
        let state = &self.require_holder()?.state;
        let (funder_pubkeys, funder_sat, fundee_pubkeys, fundee_sat) = if setup.is_funder {
            (keys.pubkeys(), state.local_balance_sat, &setup.counterparty_pubkeys, state.remote_balance_sat)
        } else {
            (&setup.counterparty_pubkeys, state.remote_balance_sat, keys.pubkeys(), state.local_balance_sat)
        };
        let fee_sat = self.config.commitment_fee_sat;
        if funder_sat < fee_sat {
            return Err(insufficient_funds_error(format!(
                "{}: funder balance {} can't pay fee {}",
                short_function!(),
                funder_sat,
                fee_sat
            )));
        }
        let mut outputs = Vec::new();
        for (pubkeys, value_sat) in
            [(funder_pubkeys, funder_sat - fee_sat), (fundee_pubkeys, fundee_sat)]
        {
            if value_sat > 0 {
                let redeem_script =
                    PlainCondition { pubkey: pubkeys.payment_pubkey }.redeem_script();
                outputs.push(TxOut {
                    value: Amount::from_sat(value_sat),
                    script_pubkey: derive_p2sh_output_script(&redeem_script)?,
                });
            }
        }
        Ok(build_transaction(vec![unsigned_input(setup.funding_outpoint, Sequence::MAX)], outputs))
    }

    fn sign_closing_transaction(&self, tx: &Transaction) -> Result<Signature, ChannelError> {
        let capacity_sat = self.require_setup()?.capacity_sat;
        self.require_keys()?.sign_funding_input(tx, 0, &self.funding_redeemscript()?, capacity_sat)
    }

    fn verify_closing_signature(
        &self,
        tx: &Transaction,
        signature: &Signature,
    ) -> Result<(), ChannelError> {
        let setup = self.require_setup()?;
        let valid = verify_segwit_input(
            self.require_keys()?.secp_ctx(),
            tx,
            0,
            &self.funding_redeemscript()?,
            setup.capacity_sat,
            signature,
            &setup.counterparty_pubkeys.funding_pubkey,
        )?;
        if !valid {
            protocol_err!("bad signature on closing transaction {}", tx.compute_txid());
        }
        Ok(())
    }

    fn complete_closing_transaction(
        &self,
        tx: &Transaction,
        our_signature: Signature,
        their_signature: Signature,
    ) -> Result<Transaction, ChannelError> {
        let setup = self.require_setup()?;
        let keys = self.require_keys()?;
        let mut signed = tx.clone();
        add_funding_sigs(
            &mut signed,
            our_signature,
            their_signature,
            &keys.pubkeys().funding_pubkey,
            &setup.counterparty_pubkeys.funding_pubkey,
        )?;
        Ok(signed)
    }
}
