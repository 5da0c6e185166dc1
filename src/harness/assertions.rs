//! Assertion helpers for scenario verification
//!
//! Two shapes cover every check the suite makes:
//! - exact equality of a success payload
//! - expected error kind, plus optional substrings of the raw diagnostic

use super::error::{ErrorKind, HarnessError, HarnessResult};
use serde::Serialize;
use std::collections::BTreeMap;

/// Result of an assertion check
#[derive(Debug, Clone, Serialize)]
pub struct AssertionResult {
    pub assertion_type: String,
    pub passed: bool,
    pub message: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
    /// Additional details for debugging
    pub details: BTreeMap<String, String>,
}

impl AssertionResult {
    pub fn pass(assertion_type: &str, message: &str) -> Self {
        Self {
            assertion_type: assertion_type.to_string(),
            passed: true,
            message: message.to_string(),
            expected: None,
            actual: None,
            details: BTreeMap::new(),
        }
    }

    pub fn fail(assertion_type: &str, message: &str, expected: &str, actual: &str) -> Self {
        Self {
            assertion_type: assertion_type.to_string(),
            passed: false,
            message: message.to_string(),
            expected: Some(expected.to_string()),
            actual: Some(actual.to_string()),
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: &str) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }

    /// Turn a failed result into [`HarnessError::AssertionFailed`]
    pub fn into_result(self) -> HarnessResult<()> {
        if self.passed {
            Ok(())
        } else {
            Err(HarnessError::AssertionFailed {
                assertion_type: self.assertion_type,
                expected: self.expected.unwrap_or_default(),
                actual: self.actual.unwrap_or_default(),
                message: self.message,
            })
        }
    }
}

/// What a failing statement is expected to report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorExpectation {
    pub kind: ErrorKind,
    pub detail_contains: Vec<String>,
}

impl ErrorExpectation {
    pub fn kind(kind: ErrorKind) -> Self {
        Self {
            kind,
            detail_contains: Vec::new(),
        }
    }

    /// Also require `fragment` in the raw diagnostic
    pub fn containing(mut self, fragment: impl Into<String>) -> Self {
        self.detail_contains.push(fragment.into());
        self
    }
}

/// Exact, byte-for-byte comparison of a payload
pub fn assert_exact(label: &str, expected: &str, actual: &str) -> AssertionResult {
    if expected == actual {
        AssertionResult::pass("exact", &format!("{} matches ({} bytes)", label, actual.len()))
    } else {
        let mismatch_at = expected
            .bytes()
            .zip(actual.bytes())
            .position(|(e, a)| e != a)
            .unwrap_or_else(|| expected.len().min(actual.len()));
        AssertionResult::fail("exact", &format!("{} mismatch", label), expected, actual)
            .with_detail("first_difference_at", &mismatch_at.to_string())
    }
}

/// Check that `error` has the expected kind and diagnostic fragments
pub fn assert_error(error: &HarnessError, expectation: &ErrorExpectation) -> AssertionResult {
    let actual_kind = error.kind();
    let detail = error.detail();

    if actual_kind != expectation.kind {
        return AssertionResult::fail(
            "error_kind",
            "unexpected error kind",
            &expectation.kind.to_string(),
            &actual_kind.to_string(),
        )
        .with_detail("diagnostic", &detail);
    }

    if let Some(missing) = expectation
        .detail_contains
        .iter()
        .find(|fragment| !detail.contains(fragment.as_str()))
    {
        return AssertionResult::fail(
            "error_detail",
            "diagnostic is missing an expected fragment",
            missing,
            &detail,
        );
    }

    AssertionResult::pass(
        "error",
        &format!("got expected {} error", expectation.kind),
    )
}

/// Check the outcome of a statement that must fail
pub fn assert_fails<T: std::fmt::Debug>(
    outcome: &HarnessResult<T>,
    expectation: &ErrorExpectation,
) -> AssertionResult {
    match outcome {
        Ok(value) => AssertionResult::fail(
            "error_kind",
            "statement succeeded but was expected to fail",
            &expectation.kind.to_string(),
            &format!("{:?}", value),
        ),
        Err(e) => assert_error(e, expectation),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::error::EngineErrorKind;

    const PROHIBITED: &str = "Code: 210. DB::Exception: Unable to open HDFS file: /storage_user_two_prohibited error: Permission denied: user=specuser, access=WRITE, inode=\"/\":root:supergroup:drwxr-xr-x";

    #[test]
    fn test_exact_pass_and_fail() {
        assert!(assert_exact("select", "1\tMark\t72.53\n", "1\tMark\t72.53\n").passed);

        let result = assert_exact("select", "1\tMark\t72.53\n", "1\tMark\t72.53");
        assert!(!result.passed);
        assert_eq!(result.details["first_difference_at"], "12");
        let err = result.into_result().unwrap_err();
        assert!(err.to_string().contains("expected: \"1\\tMark\\t72.53\\n\""));
    }

    #[test]
    fn test_error_kind_and_fragments() {
        let err = HarnessError::engine("insert", PROHIBITED);
        let expectation = ErrorExpectation::kind(ErrorKind::Engine(
            EngineErrorKind::PermissionDenied,
        ))
        .containing("user=specuser")
        .containing("access=WRITE")
        .containing("/storage_user_two_prohibited");
        assert!(assert_error(&err, &expectation).passed);
    }

    #[test]
    fn test_error_missing_fragment_reports_diagnostic() {
        let err = HarnessError::engine("insert", PROHIBITED);
        let expectation = ErrorExpectation::kind(ErrorKind::Engine(
            EngineErrorKind::PermissionDenied,
        ))
        .containing("user=root");
        let result = assert_error(&err, &expectation);
        assert!(!result.passed);
        assert_eq!(result.expected.as_deref(), Some("user=root"));
        assert_eq!(result.actual.as_deref(), Some(PROHIBITED));
    }

    #[test]
    fn test_wrong_kind() {
        let err = HarnessError::NotFound {
            path: "/x".to_string(),
        };
        let expectation =
            ErrorExpectation::kind(ErrorKind::Engine(EngineErrorKind::KerberosInitFailure));
        let result = assert_error(&err, &expectation);
        assert_eq!(result.assertion_type, "error_kind");
        assert_eq!(result.actual.as_deref(), Some("not_found"));
    }

    #[test]
    fn test_assert_fails_on_success() {
        let outcome: HarnessResult<String> = Ok("1\n".to_string());
        let expectation = ErrorExpectation::kind(ErrorKind::Engine(EngineErrorKind::Other));
        assert!(!assert_fails(&outcome, &expectation).passed);
    }
}
