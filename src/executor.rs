//! Execution request service
//!
//! One request in, one response out: validate and clamp the request,
//! allocate a workspace, compile, run in the sandbox, classify, read the
//! stream files back and release the workspace.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::compiler::Compiler;
use crate::core::{classify, Status};
use crate::languages::Language;
use crate::protocol::{
    ErrorDetail, ExecuteRequest, ExecuteResponse, MAX_CPU_LIMIT_SECS, MAX_MEM_LIMIT_KB,
};
use crate::runner::{RunLimits, RunSpec, RunStatus, Runner};
use crate::workspace::Workspace;

/// Clamp requested limits into `(0, 30]` seconds and `(0, 512 MB]`.
/// Out-of-range values become the maximum.
pub fn clamp_limits(cpu_limit: i64, mem_limit: i64) -> RunLimits {
    let cpu = match u64::try_from(cpu_limit) {
        Ok(cpu) if cpu > 0 && cpu <= MAX_CPU_LIMIT_SECS => cpu,
        _ => {
            warn!(
                "CPU limit {} out of range, clamped to {}s",
                cpu_limit, MAX_CPU_LIMIT_SECS
            );
            MAX_CPU_LIMIT_SECS
        }
    };
    let mem = match u64::try_from(mem_limit) {
        Ok(mem) if mem > 0 && mem <= MAX_MEM_LIMIT_KB => mem,
        _ => {
            warn!(
                "Memory limit {} out of range, clamped to {}KB",
                mem_limit, MAX_MEM_LIMIT_KB
            );
            MAX_MEM_LIMIT_KB
        }
    };
    RunLimits::new(cpu, mem)
}

pub struct ExecutionService {
    workspace_root: PathBuf,
    compiler: Arc<dyn Compiler>,
    runner: Arc<dyn Runner>,
}

impl ExecutionService {
    pub fn new(
        workspace_root: impl Into<PathBuf>,
        compiler: Arc<dyn Compiler>,
        runner: Arc<dyn Runner>,
    ) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            compiler,
            runner,
        }
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub async fn execute(&self, req: &ExecuteRequest) -> ExecuteResponse {
        let limits = clamp_limits(req.cpu_limit, req.mem_limit);

        if req.code.is_empty() {
            return ExecuteResponse::from_status(Status::EmptySubmission);
        }

        let language = match req.language.as_deref() {
            None => Language::default(),
            Some(name) => match name.parse::<Language>() {
                Ok(language) => language,
                Err(e) => {
                    warn!("{}", e);
                    return ExecuteResponse::system_error(ErrorDetail::UnknownLanguage);
                }
            },
        };

        let workspace = match Workspace::create(&self.workspace_root, language) {
            Ok(ws) => ws,
            Err(e) => {
                error!("{}", e);
                return ExecuteResponse::system_error(ErrorDetail::Unknown);
            }
        };
        info!(
            "Executing {} submission in workspace {} (cpu={}s, mem={}KB)",
            language,
            workspace.id(),
            limits.cpu_secs,
            limits.memory_kb
        );

        // `workspace` is dropped, and its directory removed, on every return below
        self.execute_in(&workspace, req, &limits).await
    }

    async fn execute_in(
        &self,
        workspace: &Workspace,
        req: &ExecuteRequest,
        limits: &RunLimits,
    ) -> ExecuteResponse {
        if let Err(e) = workspace
            .write_source(&req.code)
            .and_then(|_| workspace.write_stdin(&req.input))
        {
            error!("{}", e);
            return ExecuteResponse::system_error(ErrorDetail::Unknown);
        }

        match self.compiler.compile(workspace).await {
            Ok(result) if result.success => {}
            Ok(result) => {
                let diagnostic = workspace
                    .read_compile_error()
                    .filter(|s| !s.is_empty())
                    .or(result.message);
                info!("Compilation failed in workspace {}", workspace.id());
                let classification = classify(Status::CompileError, diagnostic.as_deref());
                return ExecuteResponse {
                    reason: classification.reason,
                    category: classification.category,
                    stdout: workspace.read_stdout(),
                    stderr: workspace.read_stderr(),
                    ..ExecuteResponse::from_status(Status::CompileError)
                };
            }
            Err(e) => {
                error!("Compiler failure in workspace {}: {:#}", workspace.id(), e);
                return ExecuteResponse::system_error(ErrorDetail::Unknown);
            }
        }

        workspace.expose_executable();

        let outcome = self
            .runner
            .run(&RunSpec::for_workspace(workspace), limits)
            .await;

        let error_detail = match outcome.status {
            RunStatus::StreamOpenFailure => Some(ErrorDetail::StreamOpen),
            RunStatus::SpawnFailure => Some(ErrorDetail::Spawn),
            RunStatus::WaitFailure => Some(ErrorDetail::Unknown),
            RunStatus::Exited(_) | RunStatus::Signaled(_) => None,
        };

        ExecuteResponse {
            stdout: workspace.read_stdout(),
            stderr: workspace.read_stderr(),
            error_detail,
            ..ExecuteResponse::from_status(outcome.status.status())
        }
    }
}
