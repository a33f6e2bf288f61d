/// Channel key material
pub mod keys;
/// Hash-preimage secrets
pub mod secrets;
