/// Logging macros and debug printers
#[macro_use]
pub mod debug_utils;
/// Signing and hashing helpers
pub mod crypto_utils;
/// In-process transport between two agents
pub mod loopback;
/// Transaction helpers
pub mod transaction_utils;

/// Test helpers
#[cfg(any(test, feature = "test_utils"))]
#[macro_use]
pub mod test_utils;
