// SPDX-License-Identifier: MIT OR Apache-2.0
//! Ambient error taxonomy with stable, machine-readable error codes.
//!
//! `bkd-error` covers infrastructure-level failures — configuration loading,
//! queue transport, secret-envelope parsing — that sit underneath the
//! domain-specific `BackupError` kinds in `bkd-core` (scheduling, credential
//! resolution, source/destination execution). The two taxonomies never
//! overlap: a `BkdError` never wraps a `BackupError` and vice versa.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration loading/validation errors.
    Config,
    /// Work queue transport/storage errors.
    Queue,
    /// Secret envelope token parsing errors.
    Envelope,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Queue => "queue",
            Self::Envelope => "envelope",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string guaranteed not
/// to change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Config --
    /// Configuration file or value is invalid.
    ConfigInvalid,
    /// A required environment variable was not set.
    ConfigMissingEnv,

    // -- Queue --
    /// The queue broker connection could not be established or was lost.
    QueueConnectionFailed,
    /// A queue operation was attempted on an unknown channel.
    QueueChannelNotFound,
    /// A repeatable queue entry referenced an unknown key.
    QueueRepeatableNotFound,

    // -- Envelope --
    /// An encrypted token failed to parse (segment count, hex decode, or
    /// component length).
    EnvelopeMalformed,
    /// An encrypted token's authentication tag did not verify.
    EnvelopeAuthenticationFailed,

    // -- Internal --
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigInvalid | Self::ConfigMissingEnv => ErrorCategory::Config,
            Self::QueueConnectionFailed
            | Self::QueueChannelNotFound
            | Self::QueueRepeatableNotFound => ErrorCategory::Queue,
            Self::EnvelopeMalformed | Self::EnvelopeAuthenticationFailed => {
                ErrorCategory::Envelope
            }
            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Stable `&'static str` representation (e.g. `"CONFIG_INVALID"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::ConfigMissingEnv => "CONFIG_MISSING_ENV",
            Self::QueueConnectionFailed => "QUEUE_CONNECTION_FAILED",
            Self::QueueChannelNotFound => "QUEUE_CHANNEL_NOT_FOUND",
            Self::QueueRepeatableNotFound => "QUEUE_REPEATABLE_NOT_FOUND",
            Self::EnvelopeMalformed => "ENVELOPE_MALFORMED",
            Self::EnvelopeAuthenticationFailed => "ENVELOPE_AUTHENTICATION_FAILED",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// BkdError
// ---------------------------------------------------------------------------

/// Unified ambient error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// cause, and arbitrary key-value context.
pub struct BkdError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl BkdError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }
}

impl fmt::Debug for BkdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("BkdError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for BkdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for BkdError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_without_context() {
        let err = BkdError::new(ErrorCode::ConfigInvalid, "bad toml");
        assert_eq!(err.to_string(), "[CONFIG_INVALID] bad toml");
    }

    #[test]
    fn display_with_context() {
        let err = BkdError::new(ErrorCode::QueueConnectionFailed, "refused")
            .with_context("host", "localhost");
        let s = err.to_string();
        assert!(s.starts_with("[QUEUE_CONNECTION_FAILED] refused"));
        assert!(s.contains("host"));
    }

    #[test]
    fn category_mapping() {
        assert_eq!(ErrorCode::EnvelopeMalformed.category(), ErrorCategory::Envelope);
        assert_eq!(ErrorCode::Internal.category(), ErrorCategory::Internal);
    }

    #[test]
    fn source_chain() {
        let io_err = std::io::Error::other("disk");
        let err = BkdError::new(ErrorCode::Internal, "wrapped").with_source(io_err);
        assert!(std::error::Error::source(&err).is_some());
    }
}
