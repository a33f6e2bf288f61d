use core::fmt::{self, Debug, Formatter};

use pchan_common::HexEncode;
use serde_derive::{Deserialize, Serialize};
use serde_with::hex::Hex;
use serde_with::{serde_as, Bytes, IfIsHumanReadable};
use tracing::*;

use crate::policy::error::{missing_secret_error, ChannelError};
use crate::prelude::*;
use crate::util::crypto_utils::{generate_secret_bytes, hash160};
use crate::util::debug_utils::DebugBytes;

/// The HASH160 commitment to a secret preimage
#[serde_as]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SecretHash(#[serde_as(as = "IfIsHumanReadable<Hex, Bytes>")] pub [u8; 20]);

impl Debug for SecretHash {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        DebugBytes(&self.0).fmt(f)
    }
}

impl fmt::Display for SecretHash {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(&self.0.to_hex())
    }
}

/// A 32-byte secret preimage
#[serde_as]
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretPreimage(#[serde_as(as = "IfIsHumanReadable<Hex, Bytes>")] pub [u8; 32]);

impl SecretPreimage {
    /// The hash this preimage commits to
    pub fn hash(&self) -> SecretHash {
        SecretHash(hash160(&self.0))
    }
}

// Preimages are disclosed over the wire, but we still keep them out of routine logs
impl Debug for SecretPreimage {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "SecretPreimage(for {})", self.hash())
    }
}

/// A secret preimage together with its hash
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Secret {
    /// The private value
    pub preimage: SecretPreimage,
    /// `HASH160(preimage)`
    pub hash: SecretHash,
}

impl Secret {
    /// Create a fresh random secret
    pub fn generate() -> Self {
        Self::from_preimage(SecretPreimage(generate_secret_bytes()))
    }

    /// Wrap an existing preimage
    pub fn from_preimage(preimage: SecretPreimage) -> Self {
        Secret { preimage, hash: preimage.hash() }
    }
}

/// Tracks secret hashes known to an agent, with the preimage where known.
///
/// A hash enters the store either together with its preimage (a secret we
/// created) or alone (a hash announced by the counterparty).  A registered
/// hash gains its preimage when the counterparty discloses it.
#[derive(Clone, Default)]
pub struct SecretStore {
    secrets: OrderedMap<SecretHash, Option<SecretPreimage>>,
}

impl SecretStore {
    /// An empty store
    pub fn new() -> Self {
        SecretStore { secrets: OrderedMap::new() }
    }

    /// Create a new secret and remember it
    pub fn generate(&mut self) -> Secret {
        let secret = Secret::generate();
        self.insert(secret);
        secret
    }

    /// Remember a secret whose preimage we know
    pub fn insert(&mut self, secret: Secret) {
        self.secrets.insert(secret.hash, Some(secret.preimage));
    }

    /// Register a hash whose preimage is held by someone else.
    ///
    /// Returns false if the hash was already known.
    pub fn register_hash(&mut self, hash: SecretHash) -> bool {
        if self.secrets.contains_key(&hash) {
            return false;
        }
        self.secrets.insert(hash, None);
        true
    }

    /// Attach a disclosed preimage to its registered hash.
    ///
    /// Returns false, and stores nothing, if the preimage doesn't match any
    /// registered hash.
    pub fn reveal(&mut self, preimage: SecretPreimage) -> bool {
        let hash = preimage.hash();
        match self.secrets.get_mut(&hash) {
            Some(slot) => {
                if slot.is_none() {
                    debug!("learned preimage for {}", hash);
                }
                *slot = Some(preimage);
                true
            }
            None => false,
        }
    }

    /// Whether the hash is registered
    pub fn contains(&self, hash: &SecretHash) -> bool {
        self.secrets.contains_key(hash)
    }

    /// The preimage of the hash, if we know it
    pub fn preimage(&self, hash: &SecretHash) -> Option<SecretPreimage> {
        self.secrets.get(hash).cloned().flatten()
    }

    /// Fail with `MissingSecret` unless the hash is registered
    pub fn require(&self, hash: &SecretHash) -> Result<(), ChannelError> {
        if self.contains(hash) {
            Ok(())
        } else {
            Err(missing_secret_error(format!("hash {} is not registered", hash)))
        }
    }

    /// Number of registered hashes
    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

impl Debug for SecretStore {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_map()
            .entries(self.secrets.iter().map(|(h, p)| (h, p.is_some())))
            .finish()
    }
}
