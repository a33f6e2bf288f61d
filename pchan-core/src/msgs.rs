use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::{OutPoint, Transaction};
use serde_derive::{Deserialize, Serialize};

use crate::policy::error::{invalid_argument_error, ChannelError};
use crate::prelude::*;
use crate::signer::keys::ChannelPublicKeys;
use crate::signer::secrets::{SecretHash, SecretPreimage};
use crate::tx::commitment::CommitmentTransaction;

/// What an agent tells its peer before a channel is opened
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// The agent's channel public keys
    pub pubkeys: ChannelPublicKeys,
    /// Revocation hash for state 0
    pub first_revocation_hash: SecretHash,
    /// Revocation hash for state 1
    pub second_revocation_hash: SecretHash,
}

/// Channel protocol messages.
///
/// Serialized as `{"command": ..., "args": {...}}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "args", rename_all = "snake_case")]
pub enum Message {
    /// Funder to fundee: the funding outpoint and the fundee's countersigned
    /// commitment for state 0
    OpenChannel {
        /// Channel capacity
        capacity_sat: u64,
        /// The 2-of-2 output of the funding transaction
        funding_outpoint: OutPoint,
        /// The funder's keys and first revocation hashes
        peer: PeerInfo,
        /// The fundee's commitment, countersigned by the funder
        commitment: CommitmentTransaction,
    },
    /// Fundee to funder: the funder's countersigned commitment for state 0
    AcceptChannel {
        /// The funder's commitment, countersigned by the fundee
        commitment: CommitmentTransaction,
    },
    /// Payer to payee: add an HTLC
    Update {
        /// The HTLC value
        amount_sat: u64,
        /// The payer's balance after the HTLC
        change_sat: u64,
        /// The payee's secret hash
        secret_hash: SecretHash,
        /// The payee's new commitment, countersigned by the payer
        commitment: CommitmentTransaction,
    },
    /// Payee to payer: fulfill an HTLC, disclosing its preimage
    Settle {
        /// The HTLC's secret hash
        secret_hash: SecretHash,
        /// The preimage
        preimage: SecretPreimage,
        /// The payer's new commitment, countersigned by the payee
        commitment: CommitmentTransaction,
    },
    /// Accept a proposed state and revoke the previous one
    UpdateAck {
        /// The proposer's new commitment, countersigned
        commitment: CommitmentTransaction,
        /// Revocation secret for the previous state
        revocation_secret: SecretPreimage,
        /// Revocation hash for the state after the proposed one
        next_revocation_hash: SecretHash,
    },
    /// Complete an update by revoking the previous state
    Revoke {
        /// The revoked state
        sequence_number: u64,
        /// Its revocation secret
        revocation_secret: SecretPreimage,
        /// Revocation hash for the state after next
        next_revocation_hash: SecretHash,
    },
    /// Propose a cooperative close
    CloseChannel {
        /// The unsigned closing transaction
        transaction: Transaction,
        /// The proposer's signature over the funding input
        signature: Signature,
    },
    /// Accept a cooperative close
    ClosingSigned {
        /// The acceptor's signature over the funding input
        signature: Signature,
    },
}

impl Message {
    /// The command name
    pub fn command(&self) -> &'static str {
        match self {
            Message::OpenChannel { .. } => "open_channel",
            Message::AcceptChannel { .. } => "accept_channel",
            Message::Update { .. } => "update",
            Message::Settle { .. } => "settle",
            Message::UpdateAck { .. } => "update_ack",
            Message::Revoke { .. } => "revoke",
            Message::CloseChannel { .. } => "close_channel",
            Message::ClosingSigned { .. } => "closing_signed",
        }
    }

    /// The commitment carried by the message, if any
    pub fn commitment(&self) -> Option<&CommitmentTransaction> {
        match self {
            Message::OpenChannel { commitment, .. }
            | Message::AcceptChannel { commitment }
            | Message::Update { commitment, .. }
            | Message::Settle { commitment, .. }
            | Message::UpdateAck { commitment, .. } => Some(commitment),
            _ => None,
        }
    }

    /// The payment amount of an update
    pub fn amount_sat(&self) -> Option<u64> {
        match self {
            Message::Update { amount_sat, .. } => Some(*amount_sat),
            _ => None,
        }
    }

    /// The secret hash of an update or settlement
    pub fn secret_hash(&self) -> Option<&SecretHash> {
        match self {
            Message::Update { secret_hash, .. } | Message::Settle { secret_hash, .. } =>
                Some(secret_hash),
            _ => None,
        }
    }

    /// The channel state the message is about
    pub fn sequence_number(&self) -> Option<u64> {
        match self {
            Message::Revoke { sequence_number, .. } => Some(*sequence_number),
            _ => self.commitment().map(|c| c.sequence_number),
        }
    }

    /// Serialize
    pub fn as_vec(&self) -> Result<Vec<u8>, ChannelError> {
        serde_json::to_vec(self)
            .map_err(|e| invalid_argument_error(format!("encode {}: {}", self.command(), e)))
    }
}

/// Deserialize a message
pub fn from_vec(v: &[u8]) -> Result<Message, ChannelError> {
    serde_json::from_slice(v).map_err(|e| invalid_argument_error(format!("decode message: {}", e)))
}
