//! JSON wire types of the execution service and the judge API

use serde::{Deserialize, Serialize};

use crate::core::{classify, Category, Status};

/// Largest accepted CPU limit in seconds
pub const MAX_CPU_LIMIT_SECS: u64 = 30;
/// Largest accepted memory limit in KB (512 MB)
pub const MAX_MEM_LIMIT_KB: u64 = 512 * 1024;

/// Body of `POST /compile_and_run`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub cpu_limit: i64,
    #[serde(default)]
    pub mem_limit: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Why a system error (status -2) happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorDetail {
    #[serde(rename = "stream-open failure")]
    StreamOpen,
    #[serde(rename = "spawn failure")]
    Spawn,
    #[serde(rename = "unknown language")]
    UnknownLanguage,
    #[serde(rename = "unknown")]
    Unknown,
}

/// Body answered by `POST /compile_and_run`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub status: i32,
    pub reason: String,
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<ErrorDetail>,
}

impl ExecuteResponse {
    /// Response for a status with the classifier's reason and category
    pub fn from_status(status: Status) -> Self {
        let classification = classify(status, None);
        Self {
            status: status.code(),
            reason: classification.reason,
            category: classification.category,
            stdout: None,
            stderr: None,
            signal: status.signal(),
            error_detail: None,
        }
    }

    pub fn system_error(detail: ErrorDetail) -> Self {
        Self {
            error_detail: Some(detail),
            ..Self::from_status(Status::SystemError)
        }
    }

    pub fn status(&self) -> Status {
        Status::from_code(self.status)
    }
}

/// Body of `POST /judge/{id}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JudgeRequest {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// One test case of a problem
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub expect: String,
}

/// Result of one judged test case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub name: String,
    pub pass: bool,
    pub input: String,
    pub output: String,
    pub expected: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub overall: String,
}

impl Summary {
    pub fn new(total: usize, passed: usize) -> Self {
        let overall = if passed == total {
            "All Passed".to_string()
        } else {
            format!("{}/{} Passed", passed, total)
        };
        Self {
            total,
            passed,
            overall,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.passed == self.total
    }
}

/// Per-case report of a completed judge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub cases: Vec<CaseResult>,
    pub summary: Summary,
}

/// `stdout` of a judge response: a report when every case ran, otherwise
/// the raw program output of the short-circuiting execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JudgeOutput {
    Report(Report),
    Raw(String),
}

/// Body answered by `POST /judge/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeResponse {
    pub status: i32,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<JudgeOutput>,
    #[serde(default)]
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<ErrorDetail>,
}

impl JudgeResponse {
    /// A completed judge: every case ran
    pub fn completed(report: Report) -> Self {
        Self {
            status: Status::Success.code(),
            reason: report.summary.overall.clone(),
            category: Some(Category::Success),
            stdout: Some(JudgeOutput::Report(report)),
            stderr: String::new(),
            signal: None,
            error_detail: None,
        }
    }

    /// A short-circuiting execution response, passed through verbatim
    pub fn from_execution(resp: ExecuteResponse) -> Self {
        Self {
            status: resp.status,
            reason: resp.reason,
            category: Some(resp.category),
            stdout: resp.stdout.map(JudgeOutput::Raw),
            stderr: resp.stderr.unwrap_or_default(),
            signal: resp.signal,
            error_detail: resp.error_detail,
        }
    }

    /// A judge-level system error (host exhaustion, unknown problem)
    pub fn system_error(reason: impl Into<String>) -> Self {
        Self {
            status: Status::SystemError.code(),
            reason: reason.into(),
            category: Some(Category::SystemError),
            stdout: None,
            stderr: String::new(),
            signal: None,
            error_detail: None,
        }
    }

    pub fn report(&self) -> Option<&Report> {
        match &self.stdout {
            Some(JudgeOutput::Report(report)) => Some(report),
            _ => None,
        }
    }
}
