use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Audio device unavailable [{}]: {reason}", device.as_deref().unwrap_or("default"))]
    DeviceUnavailable {
        device: Option<String>,
        reason: String,
    },

    #[error("No {role} endpoint found for {purpose}")]
    EndpointNotFound { role: String, purpose: String },

    #[error("Noise suppression unavailable: {0}")]
    SuppressionUnavailable(String),

    #[error("Audio stream error: {0}")]
    StreamError(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Shorthand for a device that could not be opened
    pub fn device_unavailable(device: Option<&str>, reason: impl Into<String>) -> Self {
        Self::DeviceUnavailable {
            device: device.map(|d| d.to_string()),
            reason: reason.into(),
        }
    }

    /// Whether the condition should be shown to the user so they can act on it
    /// (grant a permission, plug in a headset) and retry.
    pub fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            AppError::PermissionDenied(_) | AppError::DeviceUnavailable { .. }
        )
    }
}

/// Result type alias used across the crate
pub type Result<T> = std::result::Result<T, AppError>;
