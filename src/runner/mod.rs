//! Runner module - Execution abstraction layer
//!
//! This module turns an executable path plus resource limits into a
//! finished child process:
//! - `SandboxedRunner`: resource-limited, unprivileged, network-isolated execution
//!
//! The runner module does NOT:
//! - Compile anything
//! - Compare outputs or interpret status codes (see `core::status`)
//! - Retry; retries happen at the dispatch layer on another host

pub mod sandboxed;

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::Status;
use crate::languages::Language;
use crate::workspace::Workspace;

/// Process/thread ceiling applied to every sandboxed child
pub const PROCESS_LIMIT: u64 = 200;

/// Resource limits for one execution
#[derive(Debug, Clone, PartialEq)]
pub struct RunLimits {
    /// CPU time limit in seconds
    pub cpu_secs: u64,
    /// Address-space limit in KB
    pub memory_kb: u64,
    /// Wall-clock limit; derived from the CPU limit unless overridden
    wall_clock: Option<Duration>,
}

impl RunLimits {
    pub fn new(cpu_secs: u64, memory_kb: u64) -> Self {
        Self {
            cpu_secs,
            memory_kb,
            wall_clock: None,
        }
    }

    pub fn with_wall_clock(mut self, wall_clock: Duration) -> Self {
        self.wall_clock = Some(wall_clock);
        self
    }

    pub fn memory_bytes(&self) -> u64 {
        self.memory_kb.saturating_mul(1024)
    }

    /// Wall time = 2x CPU time + 1s buffer
    pub fn wall_clock(&self) -> Duration {
        self.wall_clock
            .unwrap_or_else(|| Duration::from_secs(self.cpu_secs.saturating_mul(2) + 1))
    }
}

/// Isolation knobs that are best-effort by nature
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxPolicy {
    /// Account to drop to when running as root (`None` disables the drop)
    pub unprivileged_user: Option<String>,
    /// Move the child into a fresh network namespace
    pub isolate_network: bool,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self {
            unprivileged_user: Some("nobody".to_string()),
            isolate_network: true,
        }
    }
}

/// Files and entry point of one execution
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub executable: PathBuf,
    pub stdin: PathBuf,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
    pub language: Language,
    pub work_dir: Option<PathBuf>,
}

impl RunSpec {
    pub fn for_workspace(workspace: &Workspace) -> Self {
        Self {
            executable: workspace.executable_path(),
            stdin: workspace.stdin_path(),
            stdout: workspace.stdout_path(),
            stderr: workspace.stderr_path(),
            language: workspace.language(),
            work_dir: Some(workspace.dir().to_path_buf()),
        }
    }
}

/// Raw execution status (no verdict interpretation)
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RunStatus {
    /// Program exited normally with given exit code
    Exited(i32),
    /// Killed by signal
    Signaled(i32),
    /// One of the standard stream files could not be opened; nothing was spawned
    StreamOpenFailure,
    /// The child could not be created or failed before reaching user code
    SpawnFailure,
    /// Waiting on the child failed
    WaitFailure,
}

impl RunStatus {
    /// Status code reported to callers
    pub fn status(&self) -> Status {
        match *self {
            RunStatus::Exited(0) => Status::Success,
            RunStatus::Exited(_) => Status::NonZeroExit,
            RunStatus::Signaled(sig) => Status::Signaled(sig),
            RunStatus::StreamOpenFailure | RunStatus::SpawnFailure | RunStatus::WaitFailure => {
                Status::SystemError
            }
        }
    }
}

/// Outcome of running a program
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    /// Wall time elapsed in milliseconds
    pub wall_time_ms: u64,
    /// The wall-clock watchdog killed the child
    pub wall_timed_out: bool,
}

impl RunOutcome {
    pub fn failed(status: RunStatus) -> Self {
        Self {
            status,
            wall_time_ms: 0,
            wall_timed_out: false,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, RunStatus::Exited(0))
    }
}

/// Runner trait for executing programs
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(&self, spec: &RunSpec, limits: &RunLimits) -> RunOutcome;
}

pub use sandboxed::SandboxedRunner;
