//! Per-submission workspace
//!
//! A workspace is a private directory under the configured root holding the
//! source, stdin, stdout, stderr, compiler-error and executable files of one
//! execution request. It is removed when the `Workspace` value is dropped, so
//! every exit path of a request releases it.

use std::fs;
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::error::WorkspaceError;
use crate::languages::Language;

/// Process-wide counter mixed into workspace identifiers
static WORKSPACE_COUNTER: AtomicU64 = AtomicU64::new(0);

const STDIN_FILE: &str = "stdin";
const STDOUT_FILE: &str = "stdout";
const STDERR_FILE: &str = "stderr";
const COMPILE_ERROR_FILE: &str = "compile_error";

/// Traverse without listing
const DIR_MODE: u32 = 0o711;
/// Member files only the service reads and writes
pub const PRIVATE_MODE: u32 = 0o600;

/// Next collision-free workspace identifier: `<unix millis>_<counter>`
pub fn unique_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let seq = WORKSPACE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}_{}", millis, seq)
}

/// Create the workspace root if missing. An existing root keeps its mode,
/// but one other accounts can list is reported.
pub fn prepare_root(root: &Path) -> Result<(), WorkspaceError> {
    create_root(root)?;
    if let Ok(meta) = fs::metadata(root) {
        let mode = meta.permissions().mode() & 0o777;
        if mode & 0o044 != 0 {
            warn!(
                "Workspace root {:?} is listable by other accounts (mode {:o})",
                root, mode
            );
        }
    }
    Ok(())
}

fn create_root(root: &Path) -> Result<(), WorkspaceError> {
    fs::DirBuilder::new()
        .recursive(true)
        .mode(DIR_MODE)
        .create(root)
        .map_err(|source| WorkspaceError::Create {
            path: root.to_path_buf(),
            source,
        })
}

#[derive(Debug)]
pub struct Workspace {
    id: String,
    dir: PathBuf,
    language: Language,
}

impl Workspace {
    /// Allocate a fresh workspace directory under `root`.
    ///
    /// The directory is traversable but not listable, so the unprivileged
    /// sandbox account can reach the executable by name and nothing else.
    pub fn create(root: &Path, language: Language) -> Result<Self, WorkspaceError> {
        create_root(root)?;

        let id = unique_id();
        let dir = root.join(&id);
        fs::DirBuilder::new()
            .mode(DIR_MODE)
            .create(&dir)
            .map_err(|source| WorkspaceError::Create {
                path: dir.clone(),
                source,
            })?;
        // umask may have stripped bits from the mode above
        if let Err(e) = fs::set_permissions(&dir, fs::Permissions::from_mode(DIR_MODE)) {
            warn!("Failed to set permissions on workspace {:?}: {}", dir, e);
        }

        debug!("Allocated workspace {} at {:?}", id, dir);
        Ok(Self { id, dir, language })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn source_path(&self) -> PathBuf {
        self.dir.join(self.language.source_file())
    }

    pub fn stdin_path(&self) -> PathBuf {
        self.dir.join(STDIN_FILE)
    }

    pub fn stdout_path(&self) -> PathBuf {
        self.dir.join(STDOUT_FILE)
    }

    pub fn stderr_path(&self) -> PathBuf {
        self.dir.join(STDERR_FILE)
    }

    pub fn compile_error_path(&self) -> PathBuf {
        self.dir.join(COMPILE_ERROR_FILE)
    }

    pub fn executable_path(&self) -> PathBuf {
        self.language.executable(&self.dir)
    }

    /// The interpreted script is its own executable, so only it is readable
    /// by the sandbox account
    pub fn write_source(&self, code: &str) -> Result<(), WorkspaceError> {
        let mode = match self.language {
            Language::Python => 0o644,
            _ => PRIVATE_MODE,
        };
        write_file(&self.source_path(), code.as_bytes(), mode)
    }

    pub fn write_stdin(&self, input: &str) -> Result<(), WorkspaceError> {
        write_file(&self.stdin_path(), input.as_bytes(), PRIVATE_MODE)
    }

    /// Make the built artifact readable/executable by the sandbox account
    pub fn expose_executable(&self) {
        let artifact = self.language.artifact(&self.dir);
        let mode = match self.language {
            Language::Cpp => 0o755,
            _ => 0o644,
        };
        if artifact.exists() {
            if let Err(e) = fs::set_permissions(&artifact, fs::Permissions::from_mode(mode)) {
                warn!("Failed to chmod {:?}: {}", artifact, e);
            }
        }
    }

    pub fn read_stdout(&self) -> Option<String> {
        read_lossy(&self.stdout_path())
    }

    pub fn read_stderr(&self) -> Option<String> {
        read_lossy(&self.stderr_path())
    }

    pub fn read_compile_error(&self) -> Option<String> {
        read_lossy(&self.compile_error_path())
    }

    /// Remove every known member file, then the directory itself.
    /// Anything left behind by the toolchain (e.g. extra `.class` files)
    /// is swept up with a recursive removal.
    fn cleanup(&mut self) {
        let members = [
            self.source_path(),
            self.stdin_path(),
            self.stdout_path(),
            self.stderr_path(),
            self.compile_error_path(),
            self.language.artifact(&self.dir),
        ];
        for path in members.iter() {
            if path == &self.dir {
                continue;
            }
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {:?}: {}", path, e),
            }
        }

        if fs::remove_dir(&self.dir).is_err() {
            if let Err(e) = fs::remove_dir_all(&self.dir) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove workspace {:?}: {}", self.dir, e);
                }
            }
        }
        debug!("Released workspace {}", self.id);
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn write_file(path: &Path, content: &[u8], mode: u32) -> Result<(), WorkspaceError> {
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)
        .and_then(|mut file| file.write_all(content))
        .map_err(|source| WorkspaceError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    // umask may have stripped bits from the mode above
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
        warn!("Failed to chmod {:?}: {}", path, e);
    }
    Ok(())
}

fn read_lossy(path: &Path) -> Option<String> {
    fs::read(path)
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_unique_ids_across_threads() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| (0..250).map(|_| unique_id()).collect::<Vec<_>>()))
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate workspace id");
            }
        }
        assert_eq!(seen.len(), 2000);
    }

    #[test]
    fn test_files_round_trip_and_cleanup() {
        let root = tempfile::tempdir().unwrap();
        let dir;
        {
            let ws = Workspace::create(root.path(), Language::Cpp).unwrap();
            dir = ws.dir().to_path_buf();
            ws.write_source("int main() {}").unwrap();
            ws.write_stdin("1 2\n").unwrap();
            fs::write(ws.stdout_path(), b"3\n").unwrap();

            assert_eq!(ws.source_path(), dir.join("main.cpp"));
            assert_eq!(fs::read_to_string(ws.stdin_path()).unwrap(), "1 2\n");
            assert_eq!(ws.read_stdout().as_deref(), Some("3\n"));
            assert_eq!(ws.read_stderr(), None);
            assert!(dir.is_dir());
        }
        assert!(!dir.exists());
    }

    #[test]
    fn test_cleanup_sweeps_unknown_files() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::create(root.path(), Language::Java).unwrap();
        let dir = ws.dir().to_path_buf();
        fs::write(dir.join("Main$Inner.class"), b"\xca\xfe").unwrap();
        fs::write(dir.join("Main.class"), b"\xca\xfe").unwrap();
        drop(ws);
        assert!(!dir.exists());
    }

    #[test]
    fn test_workspace_dir_is_traversable() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::create(root.path(), Language::Python).unwrap();
        let mode = fs::metadata(ws.dir()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o711);
    }

    fn mode_of(path: &Path) -> u32 {
        fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[test]
    fn test_member_files_hidden_from_other_accounts() {
        let root = tempfile::tempdir().unwrap();

        let cpp = Workspace::create(root.path(), Language::Cpp).unwrap();
        cpp.write_source("int main() {}").unwrap();
        cpp.write_stdin("secret input").unwrap();
        assert_eq!(mode_of(&cpp.source_path()), 0o600);
        assert_eq!(mode_of(&cpp.stdin_path()), 0o600);

        let py = Workspace::create(root.path(), Language::Python).unwrap();
        py.write_source("print(1)").unwrap();
        py.write_stdin("").unwrap();
        assert_eq!(mode_of(&py.source_path()), 0o644);
        assert_eq!(mode_of(&py.stdin_path()), 0o600);
    }

    #[test]
    fn test_prepare_root_creates_missing_root() {
        let parent = tempfile::tempdir().unwrap();
        let root = parent.path().join("a").join("workspaces");
        prepare_root(&root).unwrap();
        assert!(root.is_dir());
        // umask can only clear bits
        assert_eq!(mode_of(&root) & !0o711, 0);

        // an existing root is left alone
        fs::set_permissions(&root, fs::Permissions::from_mode(0o700)).unwrap();
        prepare_root(&root).unwrap();
        assert_eq!(mode_of(&root), 0o700);
    }
}
