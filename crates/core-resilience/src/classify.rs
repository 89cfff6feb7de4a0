//! Error classification: categories, severities and structured error events
//!
//! Every failure reported to the resilience layer is first turned into an
//! [`ErrorEvent`]. The category decides which circuit breaker and recovery
//! strategy apply; the severity decides how loudly it is logged and whether
//! an alert goes out.
//!
//! # Example
//!
//! ```
//! use rampart_core_resilience::classify::{ErrorCategory, ErrorEvent, Severity};
//!
//! let event = ErrorEvent::new(ErrorCategory::Network, Severity::Medium, "connection reset")
//!     .with_context("retry_count", "2");
//!
//! assert_eq!(event.context_value("retry_count"), Some("2"));
//! assert!(!event.severity().is_alerting());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::backtrace::Backtrace;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{error, info, warn};

use crate::error::ResilienceError;

/// Category of a failure in the host process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Brokerage/account API failures
    #[serde(rename = "api_error")]
    Api,
    /// Connectivity failures
    #[serde(rename = "network_error")]
    Network,
    /// Market data feed failures
    #[serde(rename = "data_error")]
    Data,
    /// Model training or inference failures
    #[serde(rename = "model_error")]
    Model,
    /// Order placement and execution failures
    #[serde(rename = "trading_error")]
    Trading,
    /// Host resource failures
    #[serde(rename = "system_error")]
    System,
    /// Invalid input data
    #[serde(rename = "validation_error")]
    Validation,
}

impl ErrorCategory {
    /// Every category, in a stable order
    pub const ALL: [ErrorCategory; 7] = [
        ErrorCategory::Api,
        ErrorCategory::Network,
        ErrorCategory::Data,
        ErrorCategory::Model,
        ErrorCategory::Trading,
        ErrorCategory::System,
        ErrorCategory::Validation,
    ];

    /// Wire name used in logs, configuration keys and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Api => "api_error",
            ErrorCategory::Network => "network_error",
            ErrorCategory::Data => "data_error",
            ErrorCategory::Model => "model_error",
            ErrorCategory::Trading => "trading_error",
            ErrorCategory::System => "system_error",
            ErrorCategory::Validation => "validation_error",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCategory {
    type Err = String;

    /// Accepts both the short (`api`) and the wire (`api_error`) form, case-insensitive
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        let short = lowered.strip_suffix("_error").unwrap_or(&lowered);
        match short {
            "api" => Ok(ErrorCategory::Api),
            "network" => Ok(ErrorCategory::Network),
            "data" => Ok(ErrorCategory::Data),
            "model" => Ok(ErrorCategory::Model),
            "trading" => Ok(ErrorCategory::Trading),
            "system" => Ok(ErrorCategory::System),
            "validation" => Ok(ErrorCategory::Validation),
            _ => Err(format!("unknown error category: {}", s)),
        }
    }
}

/// Severity of a failure, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// High and Critical events always raise an alert
    pub fn is_alerting(&self) -> bool {
        *self >= Severity::High
    }

    /// Degradation levels added when recovery from an event of this severity fails
    pub fn degradation_weight(&self) -> u8 {
        match self {
            Severity::Low => 0,
            Severity::Medium | Severity::High => 1,
            Severity::Critical => 2,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Errors that know their own category and severity
pub trait Classify {
    fn category(&self) -> ErrorCategory;
    fn severity(&self) -> Severity;
}

impl Classify for ResilienceError {
    fn category(&self) -> ErrorCategory {
        match self {
            ResilienceError::CircuitOpen { category } => *category,
            ResilienceError::Transient(_) => ErrorCategory::Network,
            ResilienceError::Cancelled
            | ResilienceError::Permanent(_)
            | ResilienceError::Persistence(_)
            | ResilienceError::Hook(_)
            | ResilienceError::HandlerPanicked(_) => ErrorCategory::System,
        }
    }

    fn severity(&self) -> Severity {
        match self {
            ResilienceError::Cancelled => Severity::Low,
            ResilienceError::CircuitOpen { .. }
            | ResilienceError::Transient(_)
            | ResilienceError::Hook(_) => Severity::Medium,
            ResilienceError::Permanent(_) | ResilienceError::Persistence(_) => Severity::High,
            ResilienceError::HandlerPanicked(_) => Severity::Critical,
        }
    }
}

/// A classified failure. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEvent {
    category: ErrorCategory,
    severity: Severity,
    message: String,
    occurred_at: DateTime<Utc>,
    context: BTreeMap<String, String>,
    stack_trace: Option<String>,
}

impl ErrorEvent {
    /// Create an event stamped with the current wall-clock time
    pub fn new(category: ErrorCategory, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            category,
            severity,
            message: message.into(),
            occurred_at: Utc::now(),
            context: BTreeMap::new(),
            stack_trace: None,
        }
    }

    /// Build an event from an error that classifies itself
    pub fn from_error<E>(err: &E) -> Self
    where
        E: Classify + fmt::Display + ?Sized,
    {
        Self::new(err.category(), err.severity(), err.to_string())
    }

    /// Attach a context entry
    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    /// Attach an explicit stack trace
    pub fn with_stack_trace(mut self, trace: impl Into<String>) -> Self {
        self.stack_trace = Some(trace.into());
        self
    }

    /// Capture the current backtrace (honours `RUST_BACKTRACE`)
    pub fn with_backtrace(self) -> Self {
        let trace = Backtrace::capture().to_string();
        self.with_stack_trace(trace)
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Wall-clock time of the failure, for display only
    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context.get(key).map(String::as_str)
    }

    pub fn stack_trace(&self) -> Option<&str> {
        self.stack_trace.as_deref()
    }

    /// Emit the event at a level matching its severity
    pub fn log(&self) {
        match self.severity {
            Severity::Critical => error!(
                critical = true,
                category = %self.category,
                context = ?self.context,
                "[{}] {}",
                self.category,
                self.message
            ),
            Severity::High => error!(
                category = %self.category,
                context = ?self.context,
                "[{}] {}",
                self.category,
                self.message
            ),
            Severity::Medium => warn!(
                category = %self.category,
                "[{}] {}",
                self.category,
                self.message
            ),
            Severity::Low => info!(
                category = %self.category,
                "[{}] {}",
                self.category,
                self.message
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
        assert!(!Severity::Medium.is_alerting());
        assert!(Severity::High.is_alerting());
        assert!(Severity::Critical.is_alerting());
    }

    #[test]
    fn test_category_parsing_accepts_short_and_wire_names() {
        assert_eq!("api".parse::<ErrorCategory>(), Ok(ErrorCategory::Api));
        assert_eq!("api_error".parse::<ErrorCategory>(), Ok(ErrorCategory::Api));
        assert_eq!(
            "Validation".parse::<ErrorCategory>(),
            Ok(ErrorCategory::Validation)
        );
        assert!("disk".parse::<ErrorCategory>().is_err());

        for category in ErrorCategory::ALL {
            assert_eq!(category.as_str().parse::<ErrorCategory>(), Ok(category));
        }
    }

    #[test]
    fn test_event_from_classified_error() {
        let err = ResilienceError::CircuitOpen {
            category: ErrorCategory::Model,
        };
        let event = ErrorEvent::from_error(&err).with_context("symbol", "AAPL");

        assert_eq!(event.category(), ErrorCategory::Model);
        assert_eq!(event.severity(), Severity::Medium);
        assert_eq!(event.context_value("symbol"), Some("AAPL"));
        assert!(event.stack_trace().is_none());
    }

    #[test]
    fn test_degradation_weight() {
        assert_eq!(Severity::Low.degradation_weight(), 0);
        assert_eq!(Severity::High.degradation_weight(), 1);
        assert_eq!(Severity::Critical.degradation_weight(), 2);
    }
}
