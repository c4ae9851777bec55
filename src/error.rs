//! Error types shared across the execution and dispatch layers
//!
//! Every component boundary returns one of these instead of panicking.
//! Failures of the judged program itself are *not* errors: they are
//! reported as status codes (see `core::status`).

use std::path::PathBuf;
use thiserror::Error;

/// Failure to allocate, populate or read back a workspace
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("failed to create workspace directory {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Host pool failures
#[derive(Debug, Error)]
pub enum PoolError {
    /// Every host is offline
    #[error("no execution host is online")]
    Unavailable,
    #[error("invalid host configuration: {0}")]
    Config(String),
    #[error("failed to read host configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure to obtain a response from an execution host.
///
/// Any of these offlines the host; none of them counts as a test failure.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("transport failure talking to {host}: {source}")]
    Transport {
        host: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{host} answered with HTTP {status}")]
    Status { host: String, status: u16 },
    #[error("{host} sent an undecodable response: {source}")]
    Decode {
        host: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Problem / submission storage failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read problem {number}: {source}")]
    Io {
        number: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed problem {number}: {source}")]
    Parse {
        number: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
