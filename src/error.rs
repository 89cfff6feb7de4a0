/*!
 * Error types for Rampart
 */

use std::fmt;
use std::io;
use std::path::PathBuf;

use rampart_core_resilience::{Classify, ErrorCategory, ResilienceError, Severity};

pub type Result<T> = std::result::Result<T, RampartError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

#[derive(Debug)]
pub enum RampartError {
    /// I/O error
    Io(io::Error),

    /// Configuration error
    Config(String),

    /// Snapshot file could not be encoded or decoded
    Serialization(String),

    /// Snapshot file is missing required content
    CorruptSnapshot { path: PathBuf, reason: String },

    /// Snapshot collaborator failed
    Source(String),

    /// Failure reported by the resilience layer
    Resilience(ResilienceError),

    /// Generic error with message
    Other(String),
}

impl RampartError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            RampartError::Config(_) | RampartError::CorruptSnapshot { .. } => EXIT_FATAL,
            _ => EXIT_PARTIAL,
        }
    }

    /// Check if this error is transient (temporary, worth retrying)
    pub fn is_transient(&self) -> bool {
        match self {
            RampartError::Io(io_err) => Self::is_io_transient(io_err),
            RampartError::Source(_) => true,
            RampartError::Resilience(err) => err.is_transient(),
            _ => false,
        }
    }

    fn is_io_transient(io_err: &io::Error) -> bool {
        use io::ErrorKind::*;
        matches!(
            io_err.kind(),
            ConnectionRefused
                | ConnectionReset
                | ConnectionAborted
                | NotConnected
                | BrokenPipe
                | TimedOut
                | Interrupted
                | WouldBlock
        )
    }

    /// Get error category for the resilience pipeline
    pub fn category(&self) -> ErrorCategory {
        match self {
            RampartError::Io(io_err) if Self::is_io_transient(io_err) => ErrorCategory::Network,
            RampartError::Io(_) => ErrorCategory::System,
            RampartError::Config(_) => ErrorCategory::Validation,
            RampartError::Serialization(_) | RampartError::CorruptSnapshot { .. } => {
                ErrorCategory::Data
            }
            RampartError::Source(_) => ErrorCategory::Api,
            RampartError::Resilience(err) => err.category(),
            RampartError::Other(_) => ErrorCategory::System,
        }
    }
}

impl Classify for RampartError {
    fn category(&self) -> ErrorCategory {
        RampartError::category(self)
    }

    fn severity(&self) -> Severity {
        match self {
            RampartError::Resilience(err) => err.severity(),
            RampartError::CorruptSnapshot { .. } | RampartError::Config(_) => Severity::High,
            RampartError::Io(_) | RampartError::Serialization(_) | RampartError::Other(_) => {
                Severity::Medium
            }
            RampartError::Source(_) => Severity::Medium,
        }
    }
}

impl fmt::Display for RampartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RampartError::Io(err) => {
                write!(f, "I/O error: {}", err)
            }
            RampartError::Config(msg) => {
                write!(f, "Configuration error: {}", msg)
            }
            RampartError::Serialization(msg) => {
                write!(f, "Serialization error: {}", msg)
            }
            RampartError::CorruptSnapshot { path, reason } => {
                write!(f, "Corrupt snapshot {}: {}", path.display(), reason)
            }
            RampartError::Source(msg) => {
                write!(f, "Snapshot source error: {}", msg)
            }
            RampartError::Resilience(err) => {
                write!(f, "{}", err)
            }
            RampartError::Other(msg) => {
                write!(f, "{}", msg)
            }
        }
    }
}

impl std::error::Error for RampartError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RampartError::Io(err) => Some(err),
            RampartError::Resilience(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for RampartError {
    fn from(err: io::Error) -> Self {
        RampartError::Io(err)
    }
}

impl From<serde_json::Error> for RampartError {
    fn from(err: serde_json::Error) -> Self {
        RampartError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for RampartError {
    fn from(err: toml::de::Error) -> Self {
        RampartError::Config(err.to_string())
    }
}

impl From<ResilienceError> for RampartError {
    fn from(err: ResilienceError) -> Self {
        RampartError::Resilience(err)
    }
}

impl From<RampartError> for ResilienceError {
    fn from(err: RampartError) -> Self {
        match err {
            RampartError::Resilience(inner) => inner,
            other => ResilienceError::Persistence(other.to_string()),
        }
    }
}
