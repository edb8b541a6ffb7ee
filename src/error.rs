//! Error types for mail-filer.

use std::path::PathBuf;

/// Top-level error type for a filer or trainer run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mail store error: {0}")]
    Store(#[from] StoreError),

    #[error("Rules error: {0}")]
    Rules(#[from] RulesError),

    #[error("Invalid run state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

/// Configuration-related errors. Always fatal, raised before any connection.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Could not determine the home directory for {0}")]
    NoHomeDir(String),
}

/// Mail-store (IMAP) errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to connect to {host}: {reason}")]
    Connect { host: String, reason: String },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Authentication failed for {user}: {reason}")]
    AuthFailed { user: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed by server")]
    Disconnected,

    #[error("{command} rejected ({status}): {text}")]
    Rejected {
        command: String,
        status: String,
        text: String,
    },

    #[error("Unexpected server response to {command}: {detail}")]
    Protocol { command: String, detail: String },
}

impl StoreError {
    /// Whether the session is unusable after this error.
    ///
    /// Command rejections and malformed responses only affect the current
    /// operation; everything else means the connection is gone.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Rejected { .. } | Self::Protocol { .. })
    }
}

/// Outbound mail (SMTP) errors.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Invalid address {address}: {reason}")]
    Address { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("SMTP relay error: {0}")]
    Relay(String),

    #[error("SMTP send failed: {0}")]
    Send(String),
}

/// Rule file errors.
#[derive(Debug, thiserror::Error)]
pub enum RulesError {
    #[error("Failed to read rules file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse rules file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Failed to serialize rules: {0}")]
    Serialize(#[from] serde_yaml::Error),

    #[error("Failed to write rules file {path}: {reason}")]
    Write { path: PathBuf, reason: String },
}

/// Failure of a single action against a single message.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("Store operation failed: {0}")]
    Store(#[from] StoreError),

    #[error("Forward failed: {0}")]
    Send(#[from] SendError),

    #[error("Move to {dest} failed: append: {append}; copy: {copy}")]
    MoveFailed {
        dest: String,
        append: String,
        copy: String,
    },
}

/// Result type alias for a run.
pub type Result<T> = std::result::Result<T, Error>;
