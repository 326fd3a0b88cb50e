//! Failure taxonomy for finished agent runs
//!
//! The category drives analytics and future retry policy; no remediation
//! happens here.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Category assigned to a finished execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Cancelled,
    Timeout,
    Oom,
    RateLimit,
    PermissionDenied,
    DependencyError,
    Crash,
    Unknown,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
            Self::Oom => "oom",
            Self::RateLimit => "rate_limit",
            Self::PermissionDenied => "permission_denied",
            Self::DependencyError => "dependency_error",
            Self::Crash => "crash",
            Self::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// Classifier output: the category plus how strong the signal was.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FailureClassification {
    pub kind: FailureKind,
    pub confidence: f32,
}

impl FailureClassification {
    const fn new(kind: FailureKind, confidence: f32) -> Self {
        Self { kind, confidence }
    }
}

/// Conventional exit code of the `timeout` utility.
const TIMEOUT_EXIT_CODE: i32 = 124;
/// 128 + SIGKILL, the usual signature of the kernel OOM killer.
const OOM_EXIT_CODE: i32 = 137;

const TIMEOUT_MARKERS: &[&str] = &["timed out", "timeout", "deadline exceeded"];

const OOM_MARKERS: &[&str] = &[
    "out of memory",
    "cannot allocate memory",
    "oom-kill",
    "oomkilled",
    "heap limit",
];

const RATE_LIMIT_MARKERS: &[&str] = &[
    "rate limit",
    "too many requests",
    "429",
    "quota exceeded",
    "overloaded",
];

const PERMISSION_MARKERS: &[&str] = &[
    "permission denied",
    "eacces",
    "eperm",
    "operation not permitted",
    "unauthorized",
    "access denied",
];

const DEPENDENCY_MARKERS: &[&str] = &[
    "command not found",
    "no such file or directory",
    "cannot find module",
    "module not found",
    "could not resolve",
    "unresolved import",
    "is not recognized as",
    "enoent",
];

fn contains_any(haystack: &str, markers: &[&str]) -> bool {
    markers.iter().any(|marker| haystack.contains(marker))
}

/// Classify a finished execution from its exit status, stderr text, and the
/// cooperative cancellation flag.
///
/// Precedence is fixed, first match wins: cancellation, timeout, memory
/// exhaustion, rate limiting, permission problems, missing dependencies.
/// Any other abnormal exit is a crash with low confidence; a zero exit with
/// no signal is unknown.
pub fn classify_failure(
    exit_code: Option<i32>,
    stderr: &str,
    was_cancelled: bool,
) -> FailureClassification {
    if was_cancelled {
        return FailureClassification::new(FailureKind::Cancelled, 1.0);
    }

    let stderr = stderr.to_lowercase();

    if exit_code == Some(TIMEOUT_EXIT_CODE) {
        return FailureClassification::new(FailureKind::Timeout, 0.95);
    }
    if contains_any(&stderr, TIMEOUT_MARKERS) {
        return FailureClassification::new(FailureKind::Timeout, 0.8);
    }

    if exit_code == Some(OOM_EXIT_CODE) {
        return FailureClassification::new(FailureKind::Oom, 0.9);
    }
    if contains_any(&stderr, OOM_MARKERS) {
        return FailureClassification::new(FailureKind::Oom, 0.8);
    }

    if contains_any(&stderr, RATE_LIMIT_MARKERS) {
        return FailureClassification::new(FailureKind::RateLimit, 0.85);
    }

    if contains_any(&stderr, PERMISSION_MARKERS) {
        return FailureClassification::new(FailureKind::PermissionDenied, 0.85);
    }

    if contains_any(&stderr, DEPENDENCY_MARKERS) {
        return FailureClassification::new(FailureKind::DependencyError, 0.8);
    }

    match exit_code {
        Some(0) => FailureClassification::new(FailureKind::Unknown, 0.2),
        // Non-zero exit, or killed by a signal we cannot attribute.
        _ => FailureClassification::new(FailureKind::Crash, 0.4),
    }
}
