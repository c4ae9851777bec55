//! Problem definitions stored as `<problems_dir>/<number>.toml`
//!
//! ```toml
//! number = "1"
//! title = "A+B"
//! cpu_limit = 1
//! mem_limit = 65536
//! tests = '[{"input": "1 2", "expect": "3"}]'
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::protocol::TestCase;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    #[serde(default)]
    pub number: String,
    #[serde(default)]
    pub title: String,
    /// CPU limit in seconds
    #[serde(default)]
    pub cpu_limit: i64,
    /// Memory limit in KB
    #[serde(default)]
    pub mem_limit: i64,
    /// JSON-encoded `[{"input": .., "expect": ..}]`
    #[serde(default)]
    pub tests: Option<String>,
}

impl Problem {
    /// Ordered test cases, or `None` when absent, malformed or empty
    pub fn test_cases(&self) -> Option<Vec<TestCase>> {
        let raw = self.tests.as_deref()?;
        match serde_json::from_str::<Vec<TestCase>>(raw) {
            Ok(cases) if !cases.is_empty() => Some(cases),
            Ok(_) => None,
            Err(e) => {
                warn!("Malformed test cases for problem {}: {}", self.number, e);
                None
            }
        }
    }
}

#[async_trait]
pub trait ProblemStore: Send + Sync {
    async fn get(&self, number: &str) -> Result<Option<Problem>, StoreError>;
}

/// Reads problem files from a directory
#[derive(Debug, Clone)]
pub struct FsProblemStore {
    dir: PathBuf,
}

impl FsProblemStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

/// Problem numbers are used as file names
fn is_valid_number(number: &str) -> bool {
    !number.is_empty()
        && number
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[async_trait]
impl ProblemStore for FsProblemStore {
    async fn get(&self, number: &str) -> Result<Option<Problem>, StoreError> {
        if !is_valid_number(number) {
            debug!("Rejecting problem number {:?}", number);
            return Ok(None);
        }
        let path = self.dir.join(format!("{}.toml", number));
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    number: number.to_string(),
                    source,
                })
            }
        };
        let mut problem: Problem = toml::from_str(&content).map_err(|source| StoreError::Parse {
            number: number.to_string(),
            source,
        })?;
        if problem.number.is_empty() {
            problem.number = number.to_string();
        }
        Ok(Some(problem))
    }
}
