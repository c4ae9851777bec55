//! Storage collaborators of the judge
//!
//! - `problems`: problem definitions with their test cases
//! - `submissions`: judged submission records

pub mod problems;
pub mod submissions;

pub use problems::{FsProblemStore, Problem, ProblemStore};
pub use submissions::{
    MemorySubmissionStore, RedisSubmissionStore, SubmissionRecord, SubmissionStore,
};
