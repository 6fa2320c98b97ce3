//! Sound device error types
//!
//! This module defines unified error types for every sound source and for the manager.
//! Backend-specific errors are mapped to these generic variants.

use thiserror::Error;

/// Unified error type for sound device operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SoundDeviceError {
    /// Requested device no longer matches any live device
    #[error("Error, can't open: {0} (device not found)")]
    DeviceNotFound(String),
    /// The source's own start routine failed
    #[error("Error, can't open: {device} ({reason})")]
    ActivationFailed { device: String, reason: String },
    /// Clearing a priority override could not bring the previous device back
    #[error("Error, can't restore: {device} ({reason})")]
    RestoreFailed { device: String, reason: String },
    /// A source failed to list its devices
    #[error("Device enumeration failed: {0}")]
    Enumeration(String),
    /// Configuration could not be read or parsed
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl SoundDeviceError {
    pub fn activation(device: impl Into<String>, reason: impl ToString) -> Self {
        Self::ActivationFailed {
            device: device.into(),
            reason: reason.to_string(),
        }
    }

    /// Name of the device the error is about, if any
    pub fn device(&self) -> Option<&str> {
        match self {
            Self::DeviceNotFound(device)
            | Self::ActivationFailed { device, .. }
            | Self::RestoreFailed { device, .. } => Some(device),
            Self::Enumeration(_) | Self::Config(_) => None,
        }
    }

    /// Short reason without the device name
    pub fn reason(&self) -> String {
        match self {
            Self::DeviceNotFound(_) => "device not found".to_string(),
            Self::ActivationFailed { reason, .. } | Self::RestoreFailed { reason, .. } => {
                reason.clone()
            }
            Self::Enumeration(reason) | Self::Config(reason) => reason.clone(),
        }
    }
}

/// Result type alias for sound device operations
pub type Result<T> = std::result::Result<T, SoundDeviceError>;
