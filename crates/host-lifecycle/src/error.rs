//! Explicit error-kind taxonomy.
//!
//! spec.md's source material decided whether a cleanup failure was permanent
//! or transient by substring-matching the error message. That REDESIGN FLAG
//! asked for an explicit taxonomy instead, so `CleanupError` below is a typed
//! enum the call sites construct directly rather than something a caller has
//! to pattern-match text out of.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type shared by both the agent and the controller-manager.
#[derive(Debug, Error)]
pub enum Error {
    /// The object store returned a conflict on an optimistic-concurrency
    /// write. Callers should re-read and retry.
    #[error("optimistic concurrency conflict on {0}")]
    Conflict(String),

    /// A transient infrastructure error: timeouts, connection resets, a
    /// watch that dropped. Safe to retry with backoff.
    #[error("transient infrastructure error: {0}")]
    Transient(#[source] anyhow::Error),

    /// A validation error that must be surfaced on the object's status and
    /// not retried until the object changes (malformed provider-ID, invalid
    /// API-server URL, invalid PEM).
    #[error("validation error: {0}")]
    Validation(String),

    /// The referenced object (Host, Machine, Node, ConfigMap, ...) does not
    /// exist. Some call sites treat this as "too early" rather than as a
    /// true error; see [`Error::is_not_found`].
    #[error("not found: {0}")]
    NotFound(String),

    /// A Kubernetes API client error that doesn't fit one of the above.
    #[error(transparent)]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// True if this error represents a 404 from the API server.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }

    /// True if this error represents a 409 conflict from the API server.
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict(_) => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code == 409,
            _ => false,
        }
    }
}

/// Distinguishes permanent from transient failures during agent-side
/// cleanup (spec.md 4.F). Permanent failures are logged and allowed to
/// proceed to deletion; transient ones requeue with a delay.
#[derive(Debug, Error)]
pub enum CleanupError {
    /// The thing we tried to remove was already gone, or the peer we talked
    /// to refused the connection outright. Proceeding is always correct.
    #[error("permanent cleanup failure, proceeding: {0}")]
    Permanent(#[source] anyhow::Error),

    /// Worth retrying: the API server, systemd, or the shell runner might
    /// succeed on the next pass.
    #[error("transient cleanup failure, will retry: {0}")]
    Transient(#[source] anyhow::Error),
}

impl CleanupError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, CleanupError::Permanent(_))
    }
}
