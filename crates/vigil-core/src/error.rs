//! Error types for the vigil agent.

use thiserror::Error;

/// A shared error type for the whole agent.
///
/// These are the failures that are *not* recovery signals: local storage
/// problems, malformed controller payloads, a dead desktop bridge. The main
/// loop never swallows them.
#[derive(Error, Debug, Clone)]
pub enum VigilError {
    /// IO error (file system operations)
    #[error("IO error: {message}")]
    Io { message: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {format} - {message}")]
    Serialization {
        format: String, // "TOML", "JSON", ...
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Persisted record access error
    #[error("Record store error: {0}")]
    Store(String),

    /// Network transport error (controller, upload store, captcha service)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Controller answered with something we cannot interpret
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Desktop capability failure (bridge process died, bad reply)
    #[error("Desktop error: {0}")]
    Desktop(String),

    /// Process management failure
    #[error("Process error: {0}")]
    Process(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl VigilError {
    // ============================================================================
    // Constructor helpers
    // ============================================================================

    /// Creates an IO error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Creates a Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates a Store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Creates a Transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Creates a Protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Creates a Desktop error
    pub fn desktop(message: impl Into<String>) -> Self {
        Self::Desktop(message.into())
    }

    /// Creates a Process error
    pub fn process(message: impl Into<String>) -> Self {
        Self::Process(message.into())
    }

    /// Creates an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    // ============================================================================
    // Type checking methods
    // ============================================================================

    /// Check if this is a transport error.
    ///
    /// Transport errors are the only ones the network clients retry.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Check if this is a config error
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

// ============================================================================
// From implementations for automatic conversion
// ============================================================================

impl From<std::io::Error> for VigilError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: format!("{} (kind: {:?})", err, err.kind()),
        }
    }
}

impl From<serde_json::Error> for VigilError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for VigilError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::ser::Error> for VigilError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

/// A type alias for `Result<T, VigilError>`.
pub type Result<T> = std::result::Result<T, VigilError>;
