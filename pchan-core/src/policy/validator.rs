use crate::channel::{ChannelConfig, ChannelState};
use crate::signer::secrets::{SecretHash, SecretPreimage, SecretStore};
use crate::tx::commitment::CommitmentTransaction;

use super::error::ChannelError;

/// Checks what the counterparty sends us.
///
/// Called by the agent before any state changes.  Every failure is a
/// protocol violation.
pub trait Validator {
    /// Validate the parameters of a channel the counterparty opens with us
    fn validate_open(&self, capacity_sat: u64) -> Result<(), ChannelError>;

    /// Validate the sequence number of a proposed state
    fn validate_sequence(&self, current: &ChannelState, proposed: u64) -> Result<(), ChannelError>;

    /// Validate an HTLC the counterparty offers us.
    ///
    /// `payer_state` is the counterparty's state before the HTLC.
    fn validate_add_htlc(
        &self,
        payer_state: &ChannelState,
        amount_sat: u64,
        change_sat: u64,
        secret_hash: &SecretHash,
        secrets: &SecretStore,
    ) -> Result<(), ChannelError>;

    /// Validate the fulfillment of an HTLC we offered
    fn validate_settle(
        &self,
        holder_state: &ChannelState,
        secret_hash: &SecretHash,
        preimage: &SecretPreimage,
    ) -> Result<(), ChannelError>;

    /// Validate a received commitment against the one we expect
    fn validate_commitment(
        &self,
        expected: &CommitmentTransaction,
        received: &CommitmentTransaction,
    ) -> Result<(), ChannelError>;

    /// Validate a disclosed revocation secret
    fn validate_revocation(
        &self,
        revoke_num: u64,
        expected_hash: Option<&SecretHash>,
        secret: &SecretPreimage,
    ) -> Result<(), ChannelError>;

    /// Validate a cooperative close request
    fn validate_close(&self, holder_state: &ChannelState) -> Result<(), ChannelError>;
}

/// A validator enforcing the limits in a [ChannelConfig]
#[derive(Clone, Debug)]
pub struct SimpleValidator {
    config: ChannelConfig,
}

impl SimpleValidator {
    /// Create a validator
    pub fn new(config: ChannelConfig) -> Self {
        SimpleValidator { config }
    }
}

impl Validator for SimpleValidator {
    fn validate_open(&self, capacity_sat: u64) -> Result<(), ChannelError> {
        if capacity_sat <= self.config.commitment_fee_sat {
            protocol_err!(
                "capacity {} does not cover commitment fee {}",
                capacity_sat,
                self.config.commitment_fee_sat
            );
        }
        Ok(())
    }

    fn validate_sequence(&self, current: &ChannelState, proposed: u64) -> Result<(), ChannelError> {
        if current.sequence_number.checked_add(1) != Some(proposed) {
            protocol_err!(
                "proposed state {} does not follow {}",
                proposed,
                current.sequence_number
            );
        }
        Ok(())
    }

    fn validate_add_htlc(
        &self,
        payer_state: &ChannelState,
        amount_sat: u64,
        change_sat: u64,
        secret_hash: &SecretHash,
        secrets: &SecretStore,
    ) -> Result<(), ChannelError> {
        if amount_sat.checked_add(change_sat) != Some(payer_state.local_balance_sat) {
            protocol_err!(
                "amount {} plus change {} != payer balance {}",
                amount_sat,
                change_sat,
                payer_state.local_balance_sat
            );
        }
        if amount_sat < self.config.min_htlc_value_sat {
            protocol_err!(
                "amount {} below minimum {}",
                amount_sat,
                self.config.min_htlc_value_sat
            );
        }
        let pending = payer_state.offered_htlcs.len() + payer_state.received_htlcs.len();
        if pending >= self.config.max_pending_htlcs {
            protocol_err!("{} htlcs already pending", pending);
        }
        if payer_state.offered_htlcs.iter().any(|h| h.secret_hash == *secret_hash) {
            protocol_err!("duplicate htlc for {}", secret_hash);
        }
        if secrets.preimage(secret_hash).is_none() {
            protocol_err!("unknown secret hash {}", secret_hash);
        }
        Ok(())
    }

    fn validate_settle(
        &self,
        holder_state: &ChannelState,
        secret_hash: &SecretHash,
        preimage: &SecretPreimage,
    ) -> Result<(), ChannelError> {
        if preimage.hash() != *secret_hash {
            protocol_err!("preimage does not match {}", secret_hash);
        }
        if !holder_state.offered_htlcs.iter().any(|h| h.secret_hash == *secret_hash) {
            protocol_err!("no offered htlc for {}", secret_hash);
        }
        Ok(())
    }

    fn validate_commitment(
        &self,
        expected: &CommitmentTransaction,
        received: &CommitmentTransaction,
    ) -> Result<(), ChannelError> {
        if !expected.same_contents(received) {
            protocol_err!(
                "commitment {} does not match expected {} for state {}",
                received.txid(),
                expected.txid(),
                expected.sequence_number
            );
        }
        Ok(())
    }

    fn validate_revocation(
        &self,
        revoke_num: u64,
        expected_hash: Option<&SecretHash>,
        secret: &SecretPreimage,
    ) -> Result<(), ChannelError> {
        match expected_hash {
            None => protocol_err!("no revocation hash known for state {}", revoke_num),
            Some(hash) if secret.hash() != *hash =>
                protocol_err!("revocation secret for state {} does not match {}", revoke_num, hash),
            Some(_) => Ok(()),
        }
    }

    fn validate_close(&self, holder_state: &ChannelState) -> Result<(), ChannelError> {
        if holder_state.has_pending_htlcs() {
            protocol_err!(
                "cannot close with {} pending htlcs",
                holder_state.offered_htlcs.len() + holder_state.received_htlcs.len()
            );
        }
        Ok(())
    }
}
