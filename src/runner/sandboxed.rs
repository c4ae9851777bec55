//! Sandboxed runner implementation
//!
//! Executes untrusted user code as a child process with:
//! - RLIMIT_CPU (SIGXCPU on overrun, SIGKILL one second later)
//! - RLIMIT_AS
//! - RLIMIT_NPROC
//! - a private network namespace (best effort)
//! - an unprivileged account when started as root (best effort)
//! - a wall-clock watchdog
//! - its own process group, killed as a whole once the child is done

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sched::{unshare, CloneFlags};
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::{setgid, setgroups, setuid, Gid, Pid, Uid, User};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use super::{RunLimits, RunOutcome, RunSpec, RunStatus, Runner, SandboxPolicy, PROCESS_LIMIT};

const SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Runner that executes code under OS resource limits
#[derive(Debug, Clone, Default)]
pub struct SandboxedRunner {
    policy: SandboxPolicy,
}

/// Everything the child applies to itself between fork and exec
#[derive(Debug, Clone, Copy)]
struct ChildSetup {
    cpu_secs: u64,
    memory_bytes: u64,
    processes: u64,
    isolate_network: bool,
    credentials: Option<(Uid, Gid)>,
}

impl ChildSetup {
    /// Runs in the forked child: only async-signal-safe syscalls here
    fn apply(&self) -> std::io::Result<()> {
        if self.isolate_network {
            // unavailable without CAP_SYS_ADMIN; keep running
            let _ = unshare(CloneFlags::CLONE_NEWNET);
        }

        setrlimit(Resource::RLIMIT_CPU, self.cpu_secs, self.cpu_secs + 1)?;
        setrlimit(Resource::RLIMIT_AS, self.memory_bytes, self.memory_bytes)?;
        setrlimit(Resource::RLIMIT_NPROC, self.processes, self.processes)?;

        if let Some((uid, gid)) = self.credentials {
            setgroups(&[gid])?;
            setgid(gid)?;
            setuid(uid)?;
        }
        Ok(())
    }
}

struct Streams {
    stdin: File,
    stdout: File,
    stderr: File,
}

impl SandboxedRunner {
    pub fn new(policy: SandboxPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    /// Run a program in the sandbox and wait for it to finish
    pub async fn execute(&self, spec: &RunSpec, limits: &RunLimits) -> RunOutcome {
        let streams = match open_streams(spec) {
            Ok(streams) => streams,
            Err(e) => {
                error!("Failed to open standard stream files: {}", e);
                return RunOutcome::failed(RunStatus::StreamOpenFailure);
            }
        };

        let setup = ChildSetup {
            cpu_secs: limits.cpu_secs,
            memory_bytes: limits.memory_bytes(),
            processes: PROCESS_LIMIT,
            isolate_network: self.policy.isolate_network,
            credentials: self.resolve_credentials(),
        };

        let entry = spec.language.entry_point(&spec.executable);
        debug!(
            "Running {:?} {:?} (cpu={}s, mem={}KB)",
            entry.program, entry.args, limits.cpu_secs, limits.memory_kb
        );

        let mut cmd = Command::new(&entry.program);
        cmd.args(&entry.args)
            .stdin(Stdio::from(streams.stdin))
            .stdout(Stdio::from(streams.stdout))
            .stderr(Stdio::from(streams.stderr))
            .env_clear()
            .env("PATH", SANDBOX_PATH)
            .process_group(0)
            .kill_on_drop(true);
        if let Some(dir) = &spec.work_dir {
            cmd.current_dir(dir).env("HOME", dir);
        }
        // SAFETY: ChildSetup::apply only performs raw syscalls (unshare,
        // setrlimit, setgroups, setgid, setuid) and does not allocate.
        unsafe {
            cmd.pre_exec(move || setup.apply());
        }

        let started = Instant::now();
        let spawned = cmd.spawn();
        // Releases the parent's copies of the stream descriptors
        drop(cmd);

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to spawn {:?}: {}", entry.program, e);
                return RunOutcome::failed(RunStatus::SpawnFailure);
            }
        };

        // The child leads its own group, so its pid is the group id
        let group = child.id().map(|pid| Pid::from_raw(pid as i32));

        let wall_clock = limits.wall_clock();
        let (waited, wall_timed_out) = match tokio::time::timeout(wall_clock, child.wait()).await {
            Ok(waited) => (waited, false),
            Err(_) => {
                warn!(
                    "Child exceeded wall-clock limit of {:?}; killing it",
                    wall_clock
                );
                kill_group(group);
                if let Err(e) = child.start_kill() {
                    warn!("Failed to kill child: {}", e);
                }
                (child.wait().await, true)
            }
        };
        // Background processes the program left behind
        kill_group(group);

        let status = match waited {
            Ok(exit) => exit_to_status(exit),
            Err(e) => {
                error!("Failed to wait for child: {}", e);
                RunStatus::WaitFailure
            }
        };
        info!("Run finished: {:?}", status);

        RunOutcome {
            status,
            wall_time_ms: started.elapsed().as_millis() as u64,
            wall_timed_out,
        }
    }

    /// uid/gid of the unprivileged account, resolved only when running as root
    fn resolve_credentials(&self) -> Option<(Uid, Gid)> {
        if !Uid::effective().is_root() {
            return None;
        }
        let name = self.policy.unprivileged_user.as_deref()?;
        match User::from_name(name) {
            Ok(Some(user)) => Some((user.uid, user.gid)),
            Ok(None) => {
                warn!(
                    "Sandbox account {:?} does not exist; untrusted code runs as root",
                    name
                );
                None
            }
            Err(e) => {
                warn!(
                    "Failed to resolve sandbox account {:?}: {}; untrusted code runs as root",
                    name, e
                );
                None
            }
        }
    }
}

#[async_trait]
impl Runner for SandboxedRunner {
    async fn run(&self, spec: &RunSpec, limits: &RunLimits) -> RunOutcome {
        self.execute(spec, limits).await
    }
}

fn open_streams(spec: &RunSpec) -> std::io::Result<Streams> {
    Ok(Streams {
        stdin: open_input(&spec.stdin)?,
        stdout: open_output(&spec.stdout)?,
        stderr: open_output(&spec.stderr)?,
    })
}

/// stdin is created empty when absent
fn open_input(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .mode(0o600)
        .open(path)
}

/// Stream files stay private to the service account; the child only gets
/// the descriptors
fn open_output(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

fn kill_group(group: Option<Pid>) {
    let Some(pgid) = group else {
        return;
    };
    match killpg(pgid, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!("Failed to kill process group {}: {}", pgid, e),
    }
}

fn exit_to_status(exit: ExitStatus) -> RunStatus {
    match (exit.code(), exit.signal()) {
        (Some(code), _) => RunStatus::Exited(code),
        (None, Some(sig)) => RunStatus::Signaled(sig),
        (None, None) => RunStatus::WaitFailure,
    }
}
