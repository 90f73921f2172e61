/// Engine error types
use std::time::Duration;

use thiserror::Error;

/// Failure while declaring a resource. Fatal for the whole run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid resource request for '{name}': {reason}")]
    InvalidRequest { name: String, reason: String },

    #[error("provider '{0}' has not been registered")]
    UnknownProvider(String),

    #[error("invalid {operation} timeout '{literal}': {reason}")]
    InvalidTimeout {
        operation: &'static str,
        literal: String,
        reason: String,
    },

    #[error("{operation} of '{name}' timed out after {}s", .after.as_secs())]
    Timeout {
        operation: &'static str,
        name: String,
        after: Duration,
    },

    #[error("provisioner failed for '{name}': {message}")]
    Provisioner { name: String, message: String },
}

/// Failure while computing a single output
///
/// Scoped to that output; other outputs of the same run still resolve.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutputError {
    #[error("command `{command}` failed: {reason}")]
    Command { command: String, reason: String },

    #[error("output of `{command}` is not valid UTF-8")]
    Decode { command: String },

    #[error("malformed kubeconfig: {0}")]
    MalformedKubeconfig(String),

    #[error("output '{key}' is not a {expected}")]
    UnexpectedType { key: String, expected: &'static str },
}
