/// Channel errors
#[macro_use]
pub mod error;
/// Counterparty validation
pub mod validator;
