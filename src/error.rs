//! Service-level error kinds.
//!
//! Every failure surfaced by the repository, assembler, ledger and order
//! services is a [`ShopError`]. Each variant maps to a stable machine-readable
//! code ([`ShopError::error_code`]) and a public message that never carries
//! storage driver text ([`ShopError::public_message`]). The `Display` impl is
//! meant for logs and keeps the full detail.

use crate::executor::StoreError;
use std::fmt;

/// Stable error codes returned to callers.
pub mod error_code {
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const INVALID_ARGUMENT: &str = "INVALID_ARGUMENT";
    pub const INSUFFICIENT_USAGE: &str = "INSUFFICIENT_USAGE";
    pub const CONFLICT: &str = "CONFLICT";
    pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
}

/// Coarse classification of a [`ShopError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    InsufficientUsage,
    Conflict,
    Storage,
    Timeout,
    Unauthorized,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => error_code::NOT_FOUND,
            ErrorKind::InvalidArgument => error_code::INVALID_ARGUMENT,
            ErrorKind::InsufficientUsage => error_code::INSUFFICIENT_USAGE,
            ErrorKind::Conflict => error_code::CONFLICT,
            ErrorKind::Storage => error_code::STORAGE_ERROR,
            ErrorKind::Timeout => error_code::TIMEOUT,
            ErrorKind::Unauthorized => error_code::UNAUTHORIZED,
        }
    }
}

/// Error returned by every public operation of the crate.
#[derive(Debug)]
pub enum ShopError {
    /// Missing location, plan, subscription, order or item
    NotFound(String),
    /// Non-positive quantity, malformed coordinates or radius, bad rating
    InvalidArgument(String),
    /// Redemption exceeds the remaining prepaid quantity
    InsufficientUsage {
        subscription_id: i64,
        requested: i32,
        remaining: i32,
    },
    /// Concurrent modification detected (or retries exhausted)
    Conflict(String),
    /// Executor failure, named after the statement that failed
    Storage {
        operation: &'static str,
        source: StoreError,
    },
    /// A caller-supplied deadline or statement timeout elapsed
    Timeout { operation: &'static str },
    /// The API key did not resolve to a member
    Unauthorized,
}

impl ShopError {
    /// Wrap an executor error, naming the statement that produced it.
    ///
    /// Timeouts and conflicts reported by the executor keep their own kind so
    /// callers can tell "try again" from "storage is broken".
    pub fn from_store(operation: &'static str, source: StoreError) -> Self {
        match source {
            StoreError::Timeout(_) => ShopError::Timeout { operation },
            StoreError::Conflict(detail) => {
                ShopError::Conflict(format!("{operation}: {detail}"))
            }
            source => ShopError::Storage { operation, source },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ShopError::NotFound(_) => ErrorKind::NotFound,
            ShopError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            ShopError::InsufficientUsage { .. } => ErrorKind::InsufficientUsage,
            ShopError::Conflict(_) => ErrorKind::Conflict,
            ShopError::Storage { .. } => ErrorKind::Storage,
            ShopError::Timeout { .. } => ErrorKind::Timeout,
            ShopError::Unauthorized => ErrorKind::Unauthorized,
        }
    }

    pub fn error_code(&self) -> &'static str {
        self.kind().code()
    }

    /// Message safe to show to an end user.
    pub fn public_message(&self) -> String {
        match self {
            ShopError::NotFound(what) => format!("{what} not found"),
            ShopError::InvalidArgument(msg) => msg.clone(),
            ShopError::InsufficientUsage {
                requested,
                remaining,
                ..
            } => format!(
                "requested {requested} but only {remaining} remaining on this subscription"
            ),
            ShopError::Conflict(_) => {
                "the subscription was modified concurrently, please retry".to_string()
            }
            ShopError::Storage { .. } => "the service is temporarily unavailable".to_string(),
            ShopError::Timeout { .. } => "the request timed out".to_string(),
            ShopError::Unauthorized => "invalid api key".to_string(),
        }
    }

    /// Whether a ledger attempt may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ShopError::Conflict(_))
    }
}

impl fmt::Display for ShopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShopError::NotFound(what) => write!(f, "Not found: {what}"),
            ShopError::InvalidArgument(msg) => write!(f, "Invalid argument: {msg}"),
            ShopError::InsufficientUsage {
                subscription_id,
                requested,
                remaining,
            } => write!(
                f,
                "Insufficient usage on subscription {subscription_id}: requested {requested}, remaining {remaining}"
            ),
            ShopError::Conflict(msg) => write!(f, "Conflict: {msg}"),
            ShopError::Storage { operation, source } => {
                write!(f, "Storage error in {operation}: {source}")
            }
            ShopError::Timeout { operation } => write!(f, "Timeout in {operation}"),
            ShopError::Unauthorized => write!(f, "Unauthorized"),
        }
    }
}

impl std::error::Error for ShopError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ShopError::Storage { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<StoreError> for ShopError {
    fn from(err: StoreError) -> Self {
        ShopError::from_store("transaction", err)
    }
}
