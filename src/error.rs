//! Domain error kinds
//! Mission: Give callers a typed error to match on at the boundaries that
//! need it, while the rest of the crate keeps using `anyhow::Result` the way
//! the teacher's modules do.
//!
//! `PolicyVeto` deliberately has no variant here - a risk-gate rejection is
//! not an error, it's a `RiskDecision { approved: false, .. }`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrainError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("transient exchange error: {0}")]
    TransientExchange(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("circuit open: recovery window has not elapsed")]
    CircuitOpen,
}

pub type BrainResult<T> = Result<T, BrainError>;

impl From<serde_json::Error> for BrainError {
    fn from(e: serde_json::Error) -> Self {
        BrainError::Persistence(format!("serialization error: {e}"))
    }
}

/// Process exit codes, per the control-plane's external interface contract.
pub mod exit_code {
    pub const CLEAN_SHUTDOWN: i32 = 0;
    pub const CONFIGURATION_ERROR: i32 = 1;
    pub const PERSISTENCE_UNREACHABLE: i32 = 2;
    pub const FATAL_INVARIANT_VIOLATION: i32 = 3;
}

impl BrainError {
    pub fn exit_code(&self) -> i32 {
        match self {
            BrainError::Configuration(_) => exit_code::CONFIGURATION_ERROR,
            BrainError::Persistence(_) => exit_code::PERSISTENCE_UNREACHABLE,
            BrainError::InvariantViolation(_) => exit_code::FATAL_INVARIANT_VIOLATION,
            BrainError::TransientExchange(_) | BrainError::CircuitOpen => exit_code::CLEAN_SHUTDOWN,
        }
    }
}
