use core::fmt::{self, Debug, Formatter};

use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::{self, PublicKey, Secp256k1, SecretKey};
use bitcoin::{Script, Transaction};
use serde_derive::{Deserialize, Serialize};

use crate::policy::error::ChannelError;
use crate::util::crypto_utils::{generate_secret_key, sign_legacy_input, sign_segwit_input};

/// Which of the channel keys to use
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyRole {
    /// Signs the funding output: commitments and the closing transaction
    Funding,
    /// Receives plain balance outputs
    Payment,
    /// Appears in HTLC and revocable HTLC outputs
    Htlc,
}

/// The public half of an agent's channel keys
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPublicKeys {
    /// Key in the 2-of-2 funding script
    pub funding_pubkey: PublicKey,
    /// Key paid by plain balance outputs
    pub payment_pubkey: PublicKey,
    /// Key used in hash-locked outputs
    pub htlc_pubkey: PublicKey,
}

impl ChannelPublicKeys {
    /// The public key for the role
    pub fn get(&self, role: KeyRole) -> &PublicKey {
        match role {
            KeyRole::Funding => &self.funding_pubkey,
            KeyRole::Payment => &self.payment_pubkey,
            KeyRole::Htlc => &self.htlc_pubkey,
        }
    }
}

/// An agent's private channel keys
#[derive(Clone)]
pub struct ChannelKeys {
    secp_ctx: Secp256k1<secp256k1::All>,
    funding_key: SecretKey,
    payment_key: SecretKey,
    htlc_key: SecretKey,
    pubkeys: ChannelPublicKeys,
}

impl ChannelKeys {
    /// Fresh random keys
    pub fn generate() -> Self {
        Self::new(generate_secret_key(), generate_secret_key(), generate_secret_key())
    }

    /// Use the given keys
    pub fn new(funding_key: SecretKey, payment_key: SecretKey, htlc_key: SecretKey) -> Self {
        let secp_ctx = Secp256k1::new();
        let pubkeys = ChannelPublicKeys {
            funding_pubkey: PublicKey::from_secret_key(&secp_ctx, &funding_key),
            payment_pubkey: PublicKey::from_secret_key(&secp_ctx, &payment_key),
            htlc_pubkey: PublicKey::from_secret_key(&secp_ctx, &htlc_key),
        };
        ChannelKeys { secp_ctx, funding_key, payment_key, htlc_key, pubkeys }
    }

    /// The public keys
    pub fn pubkeys(&self) -> &ChannelPublicKeys {
        &self.pubkeys
    }

    /// The secp256k1 context
    pub fn secp_ctx(&self) -> &Secp256k1<secp256k1::All> {
        &self.secp_ctx
    }

    fn secret(&self, role: KeyRole) -> &SecretKey {
        match role {
            KeyRole::Funding => &self.funding_key,
            KeyRole::Payment => &self.payment_key,
            KeyRole::Htlc => &self.htlc_key,
        }
    }

    /// Sign `input` of `tx`, which spends a P2SH output with `redeem_script`
    pub fn sign_input(
        &self,
        role: KeyRole,
        tx: &Transaction,
        input: usize,
        redeem_script: &Script,
    ) -> Result<Signature, ChannelError> {
        sign_legacy_input(&self.secp_ctx, tx, input, redeem_script, self.secret(role))
    }

    /// Sign `input` of `tx`, which spends the P2WSH funding output
    pub fn sign_funding_input(
        &self,
        tx: &Transaction,
        input: usize,
        funding_redeemscript: &Script,
        funding_value_sat: u64,
    ) -> Result<Signature, ChannelError> {
        sign_segwit_input(
            &self.secp_ctx,
            tx,
            input,
            funding_redeemscript,
            funding_value_sat,
            &self.funding_key,
        )
    }
}

impl Debug for ChannelKeys {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("ChannelKeys").field("pubkeys", &self.pubkeys).finish_non_exhaustive()
    }
}
