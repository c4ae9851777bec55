//! Compiler module - Source code compilation
//!
//! This module turns the source file of a workspace into the artifact the
//! runner executes:
//! - `ToolchainCompiler`: runs the language's toolchain (g++, javac)
//!
//! The compiler is a collaborator of the execution service; only its
//! success/diagnostic result matters to callers.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::workspace::{Workspace, PRIVATE_MODE};

/// Result of a compilation attempt
#[derive(Debug, Clone, PartialEq)]
pub struct CompileResult {
    pub success: bool,
    /// Compiler diagnostic, verbatim
    pub message: Option<String>,
}

impl CompileResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

/// Builds the runnable artifact of a workspace
#[async_trait]
pub trait Compiler: Send + Sync {
    /// `Err` means the workspace itself is unusable (system error), while a
    /// rejected source is `Ok` with `success == false`.
    async fn compile(&self, workspace: &Workspace) -> Result<CompileResult>;
}

/// Compiler that shells out to the installed toolchain
#[derive(Debug, Clone)]
pub struct ToolchainCompiler {
    timeout: Duration,
}

impl ToolchainCompiler {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ToolchainCompiler {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl Compiler for ToolchainCompiler {
    async fn compile(&self, workspace: &Workspace) -> Result<CompileResult> {
        let language = workspace.language();
        let command = match language.compile_command() {
            Some(cmd) => cmd,
            // Interpreted language, no compilation needed
            None => return Ok(CompileResult::ok()),
        };

        let diag_path = workspace.compile_error_path();
        let diag = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(PRIVATE_MODE)
            .open(&diag_path)
            .with_context(|| format!("Failed to create {:?}", diag_path))?;

        debug!("Compiling {} with {:?} in {:?}", language, command, workspace.dir());

        let mut cmd = Command::new(&command[0]);
        cmd.args(&command[1..])
            .current_dir(workspace.dir())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(diag))
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to start {}: {}", command[0], e);
                return Ok(CompileResult::failed(format!(
                    "Failed to start compiler {}: {}",
                    command[0], e
                )));
            }
        };
        drop(cmd);

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => status.context("Failed to wait for compiler")?,
            Err(_) => {
                warn!("Compilation exceeded {:?}; killing compiler", self.timeout);
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Ok(CompileResult::failed("Compilation timed out"));
            }
        };

        let diagnostic = workspace.read_compile_error().filter(|s| !s.is_empty());
        let artifact = language.artifact(workspace.dir());

        if status.success() && artifact.exists() {
            info!("Compiled workspace {}", workspace.id());
            return Ok(CompileResult::ok());
        }

        let message = diagnostic.unwrap_or_else(|| match status.code() {
            Some(code) if code != 0 => format!("Compilation failed with exit code {}", code),
            Some(_) => "Compilation produced no executable".to_string(),
            None => "Compiler crashed".to_string(),
        });
        Ok(CompileResult::failed(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::Language;

    #[tokio::test]
    async fn test_interpreted_language_skips_compilation() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::create(root.path(), Language::Python).unwrap();
        ws.write_source("print(1)").unwrap();

        let result = ToolchainCompiler::default().compile(&ws).await.unwrap();
        assert_eq!(result, CompileResult::ok());
        assert!(!ws.compile_error_path().exists());
    }

    #[tokio::test]
    async fn test_diagnostics_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::create(root.path(), Language::Cpp).unwrap();
        ws.write_source("int main(").unwrap();

        // Created before the toolchain starts, so this holds without g++ too
        let result = ToolchainCompiler::default().compile(&ws).await.unwrap();
        assert!(!result.success);
        let mode = std::fs::metadata(ws.compile_error_path())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_compile_result_constructors() {
        let failed = CompileResult::failed("main.cpp:1: error");
        assert!(!failed.success);
        assert_eq!(failed.message.as_deref(), Some("main.cpp:1: error"));
        assert!(CompileResult::ok().success);
    }
}
