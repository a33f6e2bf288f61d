#[cfg(feature = "use_backtrace")]
use backtrace::Backtrace;
use tracing::{error, warn};

use ChannelErrorKind::*;

use crate::prelude::*;

/// Kind of channel error
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelErrorKind {
    /// An operation was attempted before the required setup
    NotInitialized(String),
    /// A value needed to build a script or transaction was absent
    MissingParameter(String),
    /// A referenced secret hash is not registered in the secret store
    MissingSecret(String),
    /// The balance invariant would be violated
    InsufficientFunds(String),
    /// A counterparty message failed validation
    ProtocolViolation(String),
    /// No spending branch of an output is currently available to us
    NoApplicableBranch(String),
    /// The operation is not permitted in the current channel state
    InvalidState(String),
    /// The caller passed inconsistent values
    InvalidArgument(String),
}

// Explicit PartialEq which ignores backtrace.
impl PartialEq for ChannelError {
    fn eq(&self, other: &ChannelError) -> bool {
        self.kind == other.kind
    }
}

/// Channel error
#[derive(Clone)]
pub struct ChannelError {
    /// The kind of error
    pub kind: ChannelErrorKind,
    /// A non-resolved backtrace
    #[cfg(feature = "use_backtrace")]
    pub bt: Backtrace,
}

impl ChannelError {
    fn new(kind: ChannelErrorKind) -> Self {
        ChannelError {
            kind,
            #[cfg(feature = "use_backtrace")]
            bt: Backtrace::new_unresolved(),
        }
    }

    /// Resolve the backtrace for display to the user
    #[cfg(feature = "use_backtrace")]
    pub fn resolved_backtrace(&self) -> Backtrace {
        let mut mve = self.clone();
        mve.bt.resolve();
        mve.bt
    }

    /// The message carried by the error, without the kind
    pub fn message(&self) -> &str {
        match &self.kind {
            NotInitialized(s)
            | MissingParameter(s)
            | MissingSecret(s)
            | InsufficientFunds(s)
            | ProtocolViolation(s)
            | NoApplicableBranch(s)
            | InvalidState(s)
            | InvalidArgument(s) => s,
        }
    }

    /// Return a new ChannelError with the message prepended
    pub fn prepend_msg(&self, premsg: String) -> ChannelError {
        let modkind = match &self.kind {
            NotInitialized(s0) => NotInitialized(premsg + &s0),
            MissingParameter(s0) => MissingParameter(premsg + &s0),
            MissingSecret(s0) => MissingSecret(premsg + &s0),
            InsufficientFunds(s0) => InsufficientFunds(premsg + &s0),
            ProtocolViolation(s0) => ProtocolViolation(premsg + &s0),
            NoApplicableBranch(s0) => NoApplicableBranch(premsg + &s0),
            InvalidState(s0) => InvalidState(premsg + &s0),
            InvalidArgument(s0) => InvalidArgument(premsg + &s0),
        };
        ChannelError {
            kind: modkind,
            #[cfg(feature = "use_backtrace")]
            bt: self.bt.clone(),
        }
    }

    /// Reclassify an error raised while checking a counterparty message.
    ///
    /// Whatever went wrong locally while validating, the peer's message is at fault.
    pub fn into_protocol_violation(self) -> ChannelError {
        match self.kind {
            ProtocolViolation(_) => self,
            _ => {
                let s: String = self.clone().into();
                ChannelError {
                    kind: ProtocolViolation(s),
                    #[cfg(feature = "use_backtrace")]
                    bt: self.bt,
                }
            }
        }
    }
}

impl core::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "{:?}", self.kind)
    }
}

impl core::fmt::Debug for ChannelError {
    #[cfg(not(feature = "use_backtrace"))]
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("ChannelError").field("kind", &self.kind).finish()
    }
    #[cfg(feature = "use_backtrace")]
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("ChannelError")
            .field("kind", &self.kind)
            .field("bt", &self.resolved_backtrace())
            .finish()
    }
}

impl std::error::Error for ChannelError {}

impl Into<String> for ChannelError {
    fn into(self) -> String {
        match self.kind {
            NotInitialized(s) => "not initialized: ".to_string() + &s,
            MissingParameter(s) => "missing parameter: ".to_string() + &s,
            MissingSecret(s) => "missing secret: ".to_string() + &s,
            InsufficientFunds(s) => "insufficient funds: ".to_string() + &s,
            ProtocolViolation(s) => "protocol violation: ".to_string() + &s,
            NoApplicableBranch(s) => "no applicable branch: ".to_string() + &s,
            InvalidState(s) => "invalid state: ".to_string() + &s,
            InvalidArgument(s) => "invalid argument: ".to_string() + &s,
        }
    }
}

/// An operation was attempted before the agent was set up for it
pub fn not_initialized_error(msg: impl Into<String>) -> ChannelError {
    let s = msg.into();
    error!("NOT INITIALIZED: {}", &s);
    ChannelError::new(NotInitialized(s))
}

/// A script or transaction was requested with a required value absent
pub fn missing_parameter_error(msg: impl Into<String>) -> ChannelError {
    let s = msg.into();
    error!("MISSING PARAMETER: {}", &s);
    ChannelError::new(MissingParameter(s))
}

/// A secret hash was referenced that the secret store doesn't know
pub fn missing_secret_error(msg: impl Into<String>) -> ChannelError {
    let s = msg.into();
    error!("MISSING SECRET: {}", &s);
    ChannelError::new(MissingSecret(s))
}

/// The balances can't cover the request
pub fn insufficient_funds_error(msg: impl Into<String>) -> ChannelError {
    let s = msg.into();
    error!("INSUFFICIENT FUNDS: {}", &s);
    ChannelError::new(InsufficientFunds(s))
}

/// The counterparty sent something we won't accept
pub fn protocol_violation_error(msg: impl Into<String>) -> ChannelError {
    let s = msg.into();
    warn!("PROTOCOL VIOLATION: {}", &s);
    ChannelError::new(ProtocolViolation(s))
}

/// None of the spending paths of an output can be used by us right now
pub fn no_applicable_branch_error(msg: impl Into<String>) -> ChannelError {
    let s = msg.into();
    error!("NO APPLICABLE BRANCH: {}", &s);
    ChannelError::new(NoApplicableBranch(s))
}

/// The agent is not in a state that permits the operation
pub fn invalid_state_error(msg: impl Into<String>) -> ChannelError {
    let s = msg.into();
    error!("INVALID STATE: {}", &s);
    ChannelError::new(InvalidState(s))
}

/// An invalid argument was detected
pub fn invalid_argument_error(msg: impl Into<String>) -> ChannelError {
    let s = msg.into();
    error!("INVALID ARGUMENT: {}", &s);
    ChannelError::new(InvalidArgument(s))
}

/// Return a protocol violation from the current function, prefixed with
/// the function name.
#[doc(hidden)]
#[macro_export]
macro_rules! protocol_err {
	($($arg:tt)*) => (
        return Err($crate::policy::error::protocol_violation_error(format!(
            "{}: {}",
            short_function!(),
            format!($($arg)*)
        )))
    )
}
