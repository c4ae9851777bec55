//! HTTP surfaces of the two roles
//!
//! - exec: `POST /compile_and_run`
//! - judge: `POST /judge/{id}`, `GET /api/hosts`, `POST /api/hosts/recover`

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use crate::compiler::ToolchainCompiler;
use crate::config::{ExecConfig, JudgeConfig};
use crate::dispatch::HttpExecutionClient;
use crate::executor::ExecutionService;
use crate::judger::{Judger, Submission};
use crate::pool::{HostPool, PoolSnapshot};
use crate::protocol::{ExecuteRequest, ExecuteResponse, JudgeRequest, JudgeResponse};
use crate::runner::SandboxedRunner;
use crate::storage::{
    FsProblemStore, MemorySubmissionStore, RedisSubmissionStore, SubmissionStore,
};
use crate::storage::submissions::DEFAULT_MEMORY_CAPACITY;
use crate::workspace::prepare_root;

/// Header carrying the authenticated submitter, set by the auth layer
pub const USER_ID_HEADER: &str = "x-user-id";

pub fn exec_router(service: Arc<ExecutionService>) -> Router {
    Router::new()
        .route("/compile_and_run", post(compile_and_run))
        .with_state(service)
}

async fn compile_and_run(
    State(service): State<Arc<ExecutionService>>,
    Json(req): Json<ExecuteRequest>,
) -> Json<ExecuteResponse> {
    Json(service.execute(&req).await)
}

pub fn judge_router(judger: Arc<Judger>) -> Router {
    Router::new()
        .route("/judge/{id}", post(judge))
        .route("/api/hosts", get(hosts))
        .route("/api/hosts/recover", post(recover))
        .with_state(judger)
}

async fn judge(
    State(judger): State<Arc<Judger>>,
    Path(problem_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<JudgeRequest>,
) -> Json<JudgeResponse> {
    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    let submission = Submission {
        problem_id,
        user_id,
        code: req.code,
        input: req.input,
        language: req.language,
    };
    Json(judger.judge(&submission).await)
}

async fn hosts(State(judger): State<Arc<Judger>>) -> Json<PoolSnapshot> {
    Json(judger.pool().snapshot())
}

async fn recover(State(judger): State<Arc<Judger>>) -> Json<Value> {
    let recovered = judger.pool().recover();
    Json(json!({ "recovered": recovered }))
}

/// Run the execution service until Ctrl-C
pub async fn serve_exec(config: ExecConfig) -> Result<()> {
    prepare_root(&config.workspace_root)
        .with_context(|| format!("Failed to create workspace root {:?}", config.workspace_root))?;

    let service = ExecutionService::new(
        &config.workspace_root,
        Arc::new(ToolchainCompiler::new(config.compile_timeout)),
        Arc::new(SandboxedRunner::new(config.sandbox.clone())),
    );
    info!(
        "Sandbox policy: user={:?}, network isolation={}",
        config.sandbox.unprivileged_user, config.sandbox.isolate_network
    );

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    info!("Execution service listening on {}", config.bind);

    axum::serve(listener, exec_router(Arc::new(service)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Execution service failed")
}

/// Run the judge API until Ctrl-C
pub async fn serve_judge(config: JudgeConfig) -> Result<()> {
    let pool = Arc::new(HostPool::load(&config.hosts)?);
    let client = HttpExecutionClient::new(config.dispatch_timeout)
        .context("Failed to build HTTP client")?;

    let submissions: Arc<dyn SubmissionStore> = match &config.redis_url {
        Some(url) => Arc::new(RedisSubmissionStore::connect(url).await?),
        None => {
            warn!(
                "No Redis URL configured; keeping the last {} submissions in memory",
                DEFAULT_MEMORY_CAPACITY
            );
            Arc::new(MemorySubmissionStore::new())
        }
    };

    let judger = Judger::new(
        Arc::clone(&pool),
        Arc::new(client),
        Arc::new(FsProblemStore::new(&config.problems_dir)),
        submissions,
    );

    spawn_recover_on_sigquit(Arc::clone(&pool))?;

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    info!("Judge server listening on {}", config.bind);

    axum::serve(listener, judge_router(Arc::new(judger)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Judge server failed")
}

/// SIGQUIT brings every offline host back online
fn spawn_recover_on_sigquit(pool: Arc<HostPool>) -> Result<()> {
    let mut quit = signal(SignalKind::quit()).context("Failed to install SIGQUIT handler")?;
    tokio::spawn(async move {
        while quit.recv().await.is_some() {
            info!("SIGQUIT received; recovering offline hosts");
            pool.recover();
        }
    });
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
