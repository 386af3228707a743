// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Security error types

use std::fmt;

use crate::core::ser::SerError;

/// Security-related errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityError {
    /// A plugin rejected an identity or a handshake step (`FAILED`)
    AuthenticationFailed(String),

    /// Key material could not be registered or derived
    CryptographicError(String),

    /// Change allocation, publication or endpoint creation failed
    ResourceExhausted(String),

    /// Configuration error (zero periods, empty history, ...)
    ConfigurationError(String),

    /// Invalid security token or wire format
    InvalidToken(String),

    /// Operation requires a successful `init()` first
    NotInitialized,
}

impl fmt::Display for SecurityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthenticationFailed(msg) => write!(f, "Authentication failed: {}", msg),
            Self::CryptographicError(msg) => write!(f, "Cryptographic error: {}", msg),
            Self::ResourceExhausted(msg) => write!(f, "Resource exhausted: {}", msg),
            Self::ConfigurationError(msg) => write!(f, "Configuration error: {}", msg),
            Self::InvalidToken(msg) => write!(f, "Invalid token: {}", msg),
            Self::NotInitialized => write!(f, "Security manager not initialized"),
        }
    }
}

impl std::error::Error for SecurityError {}

impl From<SerError> for SecurityError {
    fn from(err: SerError) -> Self {
        match err {
            SerError::WriteFailed { .. } => Self::ResourceExhausted(err.to_string()),
            SerError::ReadFailed { .. } | SerError::InvalidData { .. } => {
                Self::InvalidToken(err.to_string())
            }
        }
    }
}
