// ABOUTME: Error taxonomy for code execution requests
// ABOUTME: Every failure maps to an ErrorKind so callers can tell bad code from slow code from engine faults

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::archive::ArchiveError;
use crate::providers::ProviderError;

/// Machine-readable failure category reported alongside an error result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnsupportedLanguage,
    InvalidRequest,
    CapacityExhausted,
    ImageUnavailable,
    SandboxCreationFailed,
    InjectionFailed,
    StartFailed,
    RuntimeFailure,
    Crashed,
    TimeoutExceeded,
    TeardownFailed,
    EngineUnavailable,
    ArchiveFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnsupportedLanguage => "unsupported_language",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::CapacityExhausted => "capacity_exhausted",
            ErrorKind::ImageUnavailable => "image_unavailable",
            ErrorKind::SandboxCreationFailed => "sandbox_creation_failed",
            ErrorKind::InjectionFailed => "injection_failed",
            ErrorKind::StartFailed => "start_failed",
            ErrorKind::RuntimeFailure => "runtime_failure",
            ErrorKind::Crashed => "crashed",
            ErrorKind::TimeoutExceeded => "timeout_exceeded",
            ErrorKind::TeardownFailed => "teardown_failed",
            ErrorKind::EngineUnavailable => "engine_unavailable",
            ErrorKind::ArchiveFailed => "archive_failed",
        }
    }

    /// Whether a caller-level retry with backoff could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::CapacityExhausted
                | ErrorKind::SandboxCreationFailed
                | ErrorKind::EngineUnavailable
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures that stop an execution before the submitted program produced a verdict
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("execution capacity exhausted: no sandbox slot freed up within {waited_secs}s")]
    CapacityExhausted { waited_secs: u64 },

    #[error("image {image} is unavailable: {reason}")]
    ImageUnavailable { image: String, reason: String },

    #[error("failed to create sandbox: {0}")]
    SandboxCreationFailed(#[source] ProviderError),

    #[error("failed to inject source into sandbox: {0}")]
    InjectionFailed(#[source] ProviderError),

    #[error("failed to start sandbox: {0}")]
    StartFailed(#[source] ProviderError),

    #[error("execution engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("failed to package source: {0}")]
    Archive(#[from] ArchiveError),
}

impl ExecutionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecutionError::UnsupportedLanguage(_) => ErrorKind::UnsupportedLanguage,
            ExecutionError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            ExecutionError::CapacityExhausted { .. } => ErrorKind::CapacityExhausted,
            ExecutionError::ImageUnavailable { .. } => ErrorKind::ImageUnavailable,
            ExecutionError::SandboxCreationFailed(_) => ErrorKind::SandboxCreationFailed,
            ExecutionError::InjectionFailed(_) => ErrorKind::InjectionFailed,
            ExecutionError::StartFailed(_) => ErrorKind::StartFailed,
            ExecutionError::EngineUnavailable(_) => ErrorKind::EngineUnavailable,
            ExecutionError::Archive(_) => ErrorKind::ArchiveFailed,
        }
    }

    /// Classify a provider failure at a given stage, promoting connectivity faults
    pub(crate) fn from_stage(
        stage: fn(ProviderError) -> ExecutionError,
        err: ProviderError,
    ) -> ExecutionError {
        if err.is_connection() {
            ExecutionError::EngineUnavailable(err.to_string())
        } else {
            stage(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, ExecutionError>;
