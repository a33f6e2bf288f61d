/// Commitment transactions
pub mod commitment;
/// Spending confirmed commitment outputs
pub mod enforce;
/// Output conditions and their scripts
pub mod script;
