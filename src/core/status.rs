//! Status codes and their classification
//!
//! The status code is the only field callers branch on:
//!
//! | code | meaning |
//! |------|---------|
//! | 0    | success |
//! | -1   | empty submission |
//! | -2   | system / internal error |
//! | -3   | compile error |
//! | -4   | non-zero exit |
//! | N>0  | killed by signal N |

use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const SIGABRT: i32 = Signal::SIGABRT as i32;
pub const SIGFPE: i32 = Signal::SIGFPE as i32;
pub const SIGXCPU: i32 = Signal::SIGXCPU as i32;

/// How an execution attempt concluded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    EmptySubmission,
    SystemError,
    CompileError,
    NonZeroExit,
    /// Terminated by the given signal
    Signaled(i32),
    /// A negative code outside the known set
    Unknown(i32),
}

impl Status {
    pub fn code(&self) -> i32 {
        match *self {
            Status::Success => 0,
            Status::EmptySubmission => -1,
            Status::SystemError => -2,
            Status::CompileError => -3,
            Status::NonZeroExit => -4,
            Status::Signaled(sig) => sig,
            Status::Unknown(code) => code,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Status::Success,
            -1 => Status::EmptySubmission,
            -2 => Status::SystemError,
            -3 => Status::CompileError,
            -4 => Status::NonZeroExit,
            sig if sig > 0 => Status::Signaled(sig),
            other => Status::Unknown(other),
        }
    }

    pub fn signal(&self) -> Option<i32> {
        match *self {
            Status::Signaled(sig) => Some(sig),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Status::Success)
    }
}

/// Coarse bucket a status falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Success,
    SubmissionError,
    SystemError,
    CompileError,
    WrongAnswer,
    MemoryLimit,
    TimeLimit,
    FloatingPoint,
    RuntimeError,
    UnknownError,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::Success => "success",
            Category::SubmissionError => "submission-error",
            Category::SystemError => "system-error",
            Category::CompileError => "compile-error",
            Category::WrongAnswer => "wrong-answer",
            Category::MemoryLimit => "memory-limit",
            Category::TimeLimit => "time-limit",
            Category::FloatingPoint => "floating-point",
            Category::RuntimeError => "runtime-error",
            Category::UnknownError => "unknown-error",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub reason: String,
    pub category: Category,
}

/// Map a status to its reason text and category.
///
/// `compile_diagnostic` is the content of the compiler-error artifact and
/// is only consulted for [`Status::CompileError`].
pub fn classify(status: Status, compile_diagnostic: Option<&str>) -> Classification {
    let (reason, category) = match status {
        Status::Success => ("Compiled and ran successfully".to_string(), Category::Success),
        Status::EmptySubmission => ("Submitted code is empty".to_string(), Category::SubmissionError),
        Status::SystemError => ("System error".to_string(), Category::SystemError),
        Status::CompileError => (
            compile_diagnostic
                .map(str::to_string)
                .unwrap_or_else(|| "Compilation failed".to_string()),
            Category::CompileError,
        ),
        Status::NonZeroExit => (
            "Test case failed: program exited with a non-zero code".to_string(),
            Category::WrongAnswer,
        ),
        Status::Signaled(SIGABRT) => (
            "Memory limit exceeded (aborted)".to_string(),
            Category::MemoryLimit,
        ),
        Status::Signaled(SIGXCPU) => ("CPU time limit exceeded".to_string(), Category::TimeLimit),
        Status::Signaled(SIGFPE) => ("Floating point exception".to_string(), Category::FloatingPoint),
        Status::Signaled(sig) => (uncaught_signal(sig), Category::RuntimeError),
        Status::Unknown(code) => (format!("Unknown error: {}", code), Category::UnknownError),
    };
    Classification { reason, category }
}

fn uncaught_signal(sig: i32) -> String {
    match Signal::try_from(sig) {
        Ok(signal) => format!("Terminated by signal {} ({})", sig, signal.as_str()),
        Err(_) => format!("Terminated by signal {}", sig),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trip() {
        for code in [-7, -4, -3, -2, -1, 0, 6, 8, 9, 11, 24, 200] {
            assert_eq!(Status::from_code(code).code(), code);
        }
    }

    #[test]
    fn test_fixed_table() {
        assert_eq!(classify(Status::Success, None).category, Category::Success);
        assert_eq!(classify(Status::EmptySubmission, None).category, Category::SubmissionError);
        assert_eq!(classify(Status::SystemError, None).category, Category::SystemError);
        assert_eq!(classify(Status::NonZeroExit, None).category, Category::WrongAnswer);
        assert_eq!(classify(Status::Signaled(6), None).category, Category::MemoryLimit);
        assert_eq!(classify(Status::Signaled(24), None).category, Category::TimeLimit);
        assert_eq!(classify(Status::Signaled(8), None).category, Category::FloatingPoint);
        assert_eq!(classify(Status::Unknown(-9), None).category, Category::UnknownError);
    }

    #[test]
    fn test_compile_error_uses_diagnostic_verbatim() {
        let diag = "main.cpp:1:1: error: expected unqualified-id\n";
        let c = classify(Status::CompileError, Some(diag));
        assert_eq!(c.reason, diag);
        assert_eq!(c.category, Category::CompileError);
        assert_eq!(classify(Status::CompileError, None).reason, "Compilation failed");
    }

    #[test]
    fn test_other_signals_are_generic() {
        let c = classify(Status::Signaled(11), None);
        assert_eq!(c.category, Category::RuntimeError);
        assert!(c.reason.contains("11"));
        assert!(c.reason.contains("SIGSEGV"));

        let c = classify(Status::from_code(77), None);
        assert_eq!(c.category, Category::RuntimeError);
        assert!(c.reason.contains("77"));
    }

    #[test]
    fn test_category_wire_names() {
        assert_eq!(Category::TimeLimit.to_string(), "time-limit");
        assert_eq!(
            serde_json::to_string(&Category::MemoryLimit).unwrap(),
            "\"memory-limit\""
        );
    }
}
