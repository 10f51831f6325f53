// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error taxonomy for a single transfer.

use std::fmt;

/// Why a transfer did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// Timeout, connection reset, 5xx, 408, 429. Retried with backoff.
    Transient { status: Option<u16>, message: String },
    /// 4xx (except 416) or a malformed response. Never retried.
    Permanent { status: Option<u16>, message: String },
    /// Server and disk disagree in a way local state cannot be trusted.
    Inconsistent(String),
    /// Local filesystem failure.
    Io(String),
    /// Interrupt requested; bytes on disk were flushed and kept.
    Cancelled { bytes_on_disk: u64 },
    /// Retry budget used up on transient failures.
    Exhausted { attempts: u32, last: Box<TransferError> },
}

impl TransferError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient { status: None, message: message.into() }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent { status: None, message: message.into() }
    }

    /// Map an HTTP status outside 2xx to the right category.
    pub fn from_status(status: u16) -> Self {
        let message = format!("server responded with HTTP {}", status);
        if is_transient_status(status) {
            Self::Transient { status: Some(status), message }
        } else {
            Self::Permanent { status: Some(status), message }
        }
    }

    /// Only transient failures are worth another attempt.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// HTTP status involved, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transient { status, .. } | Self::Permanent { status, .. } => *status,
            Self::Exhausted { last, .. } => last.status(),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transient { .. } => "transient",
            Self::Permanent { .. } => "permanent",
            Self::Inconsistent(_) => "inconsistent",
            Self::Io(_) => "io",
            Self::Cancelled { .. } => "cancelled",
            Self::Exhausted { .. } => "exhausted",
        }
    }
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient { message, .. } => write!(f, "transient failure: {}", message),
            Self::Permanent { message, .. } => write!(f, "permanent failure: {}", message),
            Self::Inconsistent(msg) => write!(f, "inconsistent state: {}", msg),
            Self::Io(msg) => write!(f, "file error: {}", msg),
            Self::Cancelled { bytes_on_disk } => {
                write!(f, "interrupted with {} bytes on disk", bytes_on_disk)
            }
            Self::Exhausted { attempts, last } => {
                write!(f, "gave up after {} attempts: {}", attempts, last)
            }
        }
    }
}

impl std::error::Error for TransferError {}

impl From<std::io::Error> for TransferError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// 408, 429 and every 5xx are worth retrying.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500..=599)
}
