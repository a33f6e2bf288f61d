#![crate_name = "payment_channel"]

//! A two-party payment channel over Bitcoin script.
//!
//! Two [`channel::ChannelAgent`]s exchange countersigned commitment
//! transactions whose outputs are plain, hash-time-locked ([HTLC]) or
//! revocable hash-time-locked ([RHTLC]).  Revealing revocation secrets
//! for superseded states lets the other side penalize a stale broadcast,
//! and [`tx::enforce`] builds the spending transaction for whichever
//! branch of a confirmed commitment output applies.
//!
//! [HTLC]: tx::script::HtlcCondition
//! [RHTLC]: tx::script::RevocableHtlcCondition

#![forbid(unsafe_code)]
#![allow(bare_trait_objects)]
#![warn(rustdoc::broken_intra_doc_links)]
#![warn(missing_docs)]

#[macro_use]
extern crate alloc;
extern crate core;

pub use bitcoin;

/// Various utilities
#[macro_use]
pub mod util;
/// Errors and counterparty validation
#[macro_use]
pub mod policy;
/// Channel agent and channel state
pub mod channel;
/// Chain monitor interface
pub mod monitor;
/// Protocol messages
pub mod msgs;
/// Keys and secrets
pub mod signer;
/// Script templates and transaction builders
pub mod tx;
/// Layer-1 wallet
pub mod wallet;

pub use alloc::sync::Arc;

/// Common imports
pub mod prelude {
    pub use alloc::{boxed::Box, string::String, vec, vec::Vec};

    pub use hashbrown::HashMap as Map;

    pub use alloc::collections::BTreeMap as OrderedMap;

    pub use alloc::borrow::ToOwned;
    pub use alloc::string::ToString;
}

#[cfg(test)]
mod end_to_end_tests;
#[cfg(test)]
mod enforce_tests;
