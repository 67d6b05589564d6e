//! Failure taxonomy shared by every subcommand.
//!
//! Outcomes that a *caller* has to act on are encoded as distinguished exit
//! codes: a parent process decides between "requeue" and "mark failed" purely
//! from the code, never by parsing stderr. Stderr carries a human-readable
//! `ERROR: ...` line; stdout stays reserved for machine-readable payload.

use thiserror::Error;

/// Normal completion.
pub const EXIT_SUCCESS: i32 = 0;
/// A job could not be processed (bad audio, all models failed, tool error).
pub const EXIT_PROCESSING: i32 = 1;
/// Missing or malformed arguments, missing input, missing external binary.
pub const EXIT_VALIDATION: i32 = 2;
/// A peer holds the relevant lock; try again later, do not count as failed.
pub const EXIT_RETRYABLE: i32 = 10;
/// The remote filesystem became unresponsive mid-operation; abort the batch.
pub const EXIT_TRANSPORT_LOST: i32 = 20;

/// Classified failure of an operation.
#[derive(Debug, Error)]
pub enum Failure {
    #[error("{0}")]
    Validation(String),

    #[error("missing dependency: {0}")]
    Dependency(String),

    #[error("lock '{0}' is held by another process")]
    LockHeld(String),

    #[error("remote transport lost: {0}")]
    TransportLost(String),

    #[error("{0}")]
    Processing(String),
}

impl Failure {
    /// Map the failure class onto its process exit code.
    pub fn exit_code(&self) -> i32 {
        match self {
            Failure::Validation(_) | Failure::Dependency(_) => EXIT_VALIDATION,
            Failure::LockHeld(_) => EXIT_RETRYABLE,
            Failure::TransportLost(_) => EXIT_TRANSPORT_LOST,
            Failure::Processing(_) => EXIT_PROCESSING,
        }
    }
}

/// Render an error chain to stderr and derive the exit code.
///
/// Classified [`Failure`]s keep their distinguished code; anything else is a
/// generic internal failure.
pub fn report(err: &anyhow::Error) -> i32 {
    eprintln!("ERROR: {err:#}");
    match err.downcast_ref::<Failure>() {
        Some(failure) => failure.exit_code(),
        None => EXIT_PROCESSING,
    }
}
