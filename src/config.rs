//! Command line / environment configuration
//!
//! Every flag can also be set through the environment (and `.env`).

use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::runner::SandboxPolicy;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Serve the sandboxed execution service")]
    Exec(ExecArgs),

    #[command(about = "Serve the judge API in front of the execution hosts")]
    Judge(JudgeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ExecArgs {
    #[arg(long, env = "EXEC_BIND", default_value = "0.0.0.0:8081")]
    pub bind: SocketAddr,

    #[arg(long, env = "WORKSPACE_ROOT", default_value = "./temp")]
    pub workspace_root: PathBuf,

    #[arg(long, env = "SANDBOX_USER", default_value = "nobody")]
    pub sandbox_user: String,

    #[arg(long, default_value_t = false)]
    pub no_network_isolation: bool,

    #[arg(long, env = "COMPILE_TIMEOUT_SECS", default_value_t = 30)]
    pub compile_timeout_secs: u64,
}

#[derive(Args, Debug, Clone)]
pub struct JudgeArgs {
    #[arg(long, env = "JUDGE_BIND", default_value = "0.0.0.0:8088")]
    pub bind: SocketAddr,

    #[arg(long, env = "HOSTS_CONFIG", default_value = "./conf/service_machine.conf")]
    pub hosts: PathBuf,

    #[arg(long, env = "PROBLEMS_DIR", default_value = "./problems")]
    pub problems_dir: PathBuf,

    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    #[arg(long, env = "DISPATCH_TIMEOUT_SECS", default_value_t = 120)]
    pub dispatch_timeout_secs: u64,
}

/// Execution host settings
#[derive(Debug, Clone)]
pub struct ExecConfig {
    pub bind: SocketAddr,
    pub workspace_root: PathBuf,
    pub sandbox: SandboxPolicy,
    pub compile_timeout: Duration,
}

impl From<ExecArgs> for ExecConfig {
    fn from(args: ExecArgs) -> Self {
        let unprivileged_user = Some(args.sandbox_user).filter(|u| !u.is_empty());
        Self {
            bind: args.bind,
            workspace_root: args.workspace_root,
            sandbox: SandboxPolicy {
                unprivileged_user,
                isolate_network: !args.no_network_isolation,
            },
            compile_timeout: Duration::from_secs(args.compile_timeout_secs),
        }
    }
}

/// Judge server settings
#[derive(Debug, Clone)]
pub struct JudgeConfig {
    pub bind: SocketAddr,
    pub hosts: PathBuf,
    pub problems_dir: PathBuf,
    pub redis_url: Option<String>,
    pub dispatch_timeout: Duration,
}

impl From<JudgeArgs> for JudgeConfig {
    fn from(args: JudgeArgs) -> Self {
        Self {
            bind: args.bind,
            hosts: args.hosts,
            problems_dir: args.problems_dir,
            redis_url: args.redis_url.filter(|u| !u.is_empty()),
            dispatch_timeout: Duration::from_secs(args.dispatch_timeout_secs),
        }
    }
}
