use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::browser::DriverError;

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Errors that stop a run or a harness operation outright
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The shared browser environment could not be launched
    #[error("failed to start browser environment: {0}")]
    EnvironmentStart(#[source] DriverError),

    /// Run-level directories could not be created
    #[error("failed to create run directories under {path}: {source}")]
    Namespace {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("browser error: {0}")]
    Driver(#[from] DriverError),

    #[error("report sink error: {0}")]
    Report(#[from] crate::report::ReportError),

    #[error("invalid scenario: {0}")]
    Scenario(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Category of a test failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A check in the test body did not hold
    Assertion,
    /// A page interaction failed
    Interaction,
    /// A bounded wait expired
    Timeout,
    /// The test body panicked
    Panic,
    /// The test could not be set up (namespace, context)
    Setup,
}

/// Why a test failed. The message is reported verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TestFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn assertion(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Assertion, message)
    }

    pub fn setup(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Setup, message)
    }

    /// Build a failure from a caught panic payload
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "test body panicked".to_string()
        };
        Self::new(FailureKind::Panic, message)
    }
}

impl fmt::Display for TestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TestFailure {}

impl From<DriverError> for TestFailure {
    fn from(err: DriverError) -> Self {
        let kind = match err {
            DriverError::Timeout { .. } => FailureKind::Timeout,
            _ => FailureKind::Interaction,
        };
        Self::new(kind, err.to_string())
    }
}

/// What a test body returns
pub type TestOutcome = Result<(), TestFailure>;

/// Final outcome of one test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Failed(TestFailure),
}

impl Verdict {
    pub fn is_passed(&self) -> bool {
        matches!(self, Verdict::Passed)
    }

    pub fn failure(&self) -> Option<&TestFailure> {
        match self {
            Verdict::Passed => None,
            Verdict::Failed(failure) => Some(failure),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Passed => "passed",
            Verdict::Failed(_) => "failed",
        }
    }
}

impl From<TestOutcome> for Verdict {
    fn from(outcome: TestOutcome) -> Self {
        match outcome {
            Ok(()) => Verdict::Passed,
            Err(failure) => Verdict::Failed(failure),
        }
    }
}

/// Fail the current test unless `cond` holds.
///
/// ```
/// use browser_harness::{check, TestOutcome};
///
/// fn body(count: usize) -> TestOutcome {
///     check!(count > 0, "expected at least one row, got {}", count);
///     Ok(())
/// }
/// assert!(body(0).is_err());
/// ```
#[macro_export]
macro_rules! check {
    ($cond:expr $(,)?) => {
        if !$cond {
            return Err($crate::harness::TestFailure::assertion(concat!(
                "assertion failed: ",
                stringify!($cond)
            )));
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::harness::TestFailure::assertion(format!(
                "assertion failed: {}: {}",
                stringify!($cond),
                format_args!($($arg)+)
            )));
        }
    };
}

/// Fail the current test unless both sides are equal
#[macro_export]
macro_rules! check_eq {
    ($left:expr, $right:expr $(,)?) => {
        match (&$left, &$right) {
            (left, right) => {
                if !(*left == *right) {
                    return Err($crate::harness::TestFailure::assertion(format!(
                        "assertion failed: {} == {} (left: {:?}, right: {:?})",
                        stringify!($left),
                        stringify!($right),
                        left,
                        right
                    )));
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn equal(a: i32, b: i32) -> TestOutcome {
        crate::check_eq!(a, b);
        Ok(())
    }

    fn positive(n: i32) -> TestOutcome {
        crate::check!(n > 0, "got {}", n);
        Ok(())
    }

    #[test]
    fn test_check_eq_message_contains_expression() {
        let failure = equal(1, 2).unwrap_err();
        assert_eq!(failure.kind, FailureKind::Assertion);
        assert!(failure.message.contains("a == b"), "{}", failure.message);
        assert!(failure.message.contains("left: 1, right: 2"));
        assert!(equal(3, 3).is_ok());
    }

    #[test]
    fn test_check_with_message() {
        let failure = positive(-4).unwrap_err();
        assert_eq!(failure.message, "assertion failed: n > 0: got -4");
    }

    #[test]
    fn test_driver_errors_map_to_failure_kinds() {
        let timeout: TestFailure = DriverError::Timeout {
            what: "#finish".to_string(),
            timeout: Duration::from_secs(1),
        }
        .into();
        assert_eq!(timeout.kind, FailureKind::Timeout);
        let missing: TestFailure = DriverError::ElementNotFound("#nope".to_string()).into();
        assert_eq!(missing.kind, FailureKind::Interaction);
        assert!(missing.message.contains("#nope"));
    }

    #[test]
    fn test_panic_payloads() {
        let failure = TestFailure::from_panic(&"boom");
        assert_eq!(failure.kind, FailureKind::Panic);
        assert_eq!(failure.message, "boom");
        let failure = TestFailure::from_panic(&String::from("owned"));
        assert_eq!(failure.message, "owned");
    }

    #[test]
    fn test_verdict_serializes_with_status_tag() {
        let json = serde_json::to_value(Verdict::Failed(TestFailure::assertion("nope"))).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["message"], "nope");
        assert_eq!(serde_json::to_value(Verdict::Passed).unwrap()["status"], "passed");
    }
}
