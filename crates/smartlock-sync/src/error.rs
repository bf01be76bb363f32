//! # Sync Error Types
//!
//! Error types for the agent, the MQTT transport and configuration.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Operations          │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Connection     │  │  Rejected(Rejection)    │ │
//! │  │  InvalidUrl     │  │  Disconnected   │  │  InvalidPayload         │ │
//! │  │  ConfigLoad/Save│  │  PublishFailed  │  │  InvalidTag             │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use smartlock_core::{CoreError, Rejection};
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all agent, transport and config failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Broker URL could not be parsed or uses an unsupported scheme.
    #[error("Invalid broker URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// The broker connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The broker link is down.
    #[error("Disconnected from broker")]
    Disconnected,

    /// The client refused to queue a publish or subscribe request.
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    // =========================================================================
    // Operation Errors
    // =========================================================================
    /// An operator intent was refused by a guard.
    #[error("{0}")]
    Rejected(Rejection),

    /// A payload from the device could not be decoded.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// A tag id supplied by the operator is not valid.
    #[error("Invalid tag: {0}")]
    InvalidTag(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Agent is shutting down.
    #[error("Tag sync agent is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<Rejection> for SyncError {
    fn from(rejection: Rejection) -> Self {
        SyncError::Rejected(rejection)
    }
}

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidTagId { .. } => SyncError::InvalidTag(err.to_string()),
            other => SyncError::InvalidPayload(other.to_string()),
        }
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<rumqttc::ClientError> for SyncError {
    fn from(err: rumqttc::ClientError) -> Self {
        SyncError::PublishFailed(err.to_string())
    }
}

impl From<rumqttc::ConnectionError> for SyncError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        SyncError::ConnectionFailed(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the failure is transient and the operation can be retried.
    ///
    /// ## Retryable Errors
    /// - Connection failures and disconnections
    /// - A full client request queue
    /// - `NotConnected` rejections (retry once the link is back)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::ConnectionFailed(_)
                | SyncError::Disconnected
                | SyncError::PublishFailed(_)
                | SyncError::Rejected(Rejection::NotConnected)
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if a guard refused the request. Nothing was published.
    pub fn is_rejection(&self) -> bool {
        matches!(self, SyncError::Rejected(_))
    }

    /// The guard rejection, if this is one.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            SyncError::Rejected(r) => Some(r),
            _ => None,
        }
    }
}
