//! Executable discovery (specification §11 supplement, grounded on the
//! original `PythonRunner::findExecutorScript` / `findPythonExecutable`).
//!
//! This executor spawns `aperture-worker`, not a Python interpreter, so the
//! two original lookups collapse into one: find a worker binary next to the
//! current executable, then on `PATH`, unless the caller already pinned
//! `worker_path` in `IsolationConfig`.

use std::env;
use std::path::{Path, PathBuf};

const WORKER_BINARY_NAME: &str = "aperture-worker";

/// Locate the worker binary, preferring (in order): an explicit
/// `configured` path, a binary alongside the current executable, then
/// `PATH`.
pub fn find_worker_executable(configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
    }

    if let Ok(current_exe) = env::current_exe() {
        if let Some(dir) = current_exe.parent() {
            let candidate = dir.join(binary_name());
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }

    find_on_path(binary_name())
}

#[cfg(windows)]
fn binary_name() -> String {
    format!("{WORKER_BINARY_NAME}.exe")
}

#[cfg(not(windows))]
fn binary_name() -> String {
    WORKER_BINARY_NAME.to_string()
}

fn find_on_path(name: impl AsRef<Path>) -> Option<PathBuf> {
    let path_var = env::var_os("PATH")?;
    env::split_paths(&path_var)
        .map(|dir| dir.join(name.as_ref()))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn explicit_configured_path_wins_when_it_exists() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("my-worker");
        fs::write(&fake, b"").unwrap();
        let found = find_worker_executable(Some(&fake));
        assert_eq!(found, Some(fake));
    }

    #[test]
    fn nonexistent_configured_path_falls_through() {
        let found = find_worker_executable(Some(Path::new("/nonexistent/worker/binary")));
        // Falls through to PATH/current-exe lookup; in a clean test
        // environment this is almost always `None`, but the important
        // invariant is that it does not return the bogus configured path.
        assert_ne!(found, Some(PathBuf::from("/nonexistent/worker/binary")));
    }
}
