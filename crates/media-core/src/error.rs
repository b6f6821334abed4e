//! Error types for media acquisition.

use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors produced while acquiring capture devices.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    /// The user or platform refused access to the device.
    #[error("Device access denied: {reason}")]
    DeviceDenied { reason: String },

    /// The requested device does not exist or cannot be opened.
    #[error("Device unavailable: {reason}")]
    DeviceUnavailable { reason: String },
}

impl MediaError {
    pub fn device_denied(reason: impl Into<String>) -> Self {
        Self::DeviceDenied {
            reason: reason.into(),
        }
    }

    pub fn device_unavailable(reason: impl Into<String>) -> Self {
        Self::DeviceUnavailable {
            reason: reason.into(),
        }
    }

    /// Acquisition failures are always worth retrying once the user has
    /// granted permission or plugged the device back in.
    pub fn is_recoverable(&self) -> bool {
        match self {
            MediaError::DeviceDenied { .. } | MediaError::DeviceUnavailable { .. } => true,
        }
    }
}
