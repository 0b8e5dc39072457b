//! Workspace lock
//!
//! `~/.k1/<cluster>.lock` prevents two processes from driving the same
//! install. The lock is refreshed on every session file write, so a lock
//! that has not been touched for the stale window belongs to a process that
//! is no longer making progress.

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Lock information
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
    #[serde(default)]
    refreshed_at: Option<DateTime<Utc>>,
}

impl LockInfo {
    fn last_seen(&self) -> DateTime<Utc> {
        self.refreshed_at.unwrap_or(self.acquired_at)
    }
}

fn hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn process_alive(pid: u32) -> bool {
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => kill(Pid::from_raw(raw), None).is_ok(),
        _ => false,
    }
}

/// RAII guard for the workspace lock. Dropping it removes the lock file.
#[derive(Debug)]
pub struct WorkspaceLock {
    path: PathBuf,
    info: Mutex<LockInfo>,
}

impl WorkspaceLock {
    /// Acquire the lock at `path`.
    ///
    /// An existing lock refreshed less than `stale_after` ago by a live
    /// process refuses with `conflict`. A stale lock, or one whose holder on
    /// this host has exited, is replaced.
    pub fn acquire(path: impl Into<PathBuf>, stale_after: Duration) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::io(format!("failed to create {}", parent.display()), e))?;
        }

        let now = Utc::now();
        let info = LockInfo {
            holder: hostname(),
            pid: std::process::id(),
            acquired_at: now,
            refreshed_at: Some(now),
        };

        // Second attempt only happens after a stale lock was removed.
        for _ in 0..2 {
            match create_exclusive(&path, &info) {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), "acquired workspace lock");
                    return Ok(Self {
                        path,
                        info: Mutex::new(info),
                    });
                }
                Err(e) if e.kind() == IoErrorKind::AlreadyExists => {
                    check_existing(&path, stale_after, &info)?;
                    match fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == IoErrorKind::NotFound => {}
                        Err(e) => {
                            return Err(Error::io(
                                format!("failed to remove stale lock {}", path.display()),
                                e,
                            ));
                        }
                    }
                }
                Err(e) => {
                    return Err(Error::io(
                        format!("failed to create lock {}", path.display()),
                        e,
                    ));
                }
            }
        }

        Err(Error::conflict(format!(
            "another k1 process acquired {} concurrently",
            path.display()
        )))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record that the holder is still making progress.
    pub fn heartbeat(&self) -> Result<()> {
        let mut info = self.info.lock().unwrap_or_else(|p| p.into_inner());
        info.refreshed_at = Some(Utc::now());
        let content = serde_json::to_string_pretty(&*info)
            .map_err(|e| Error::internal(format!("failed to serialize lock: {}", e)))?;
        fs::write(&self.path, content)
            .map_err(|e| Error::io(format!("failed to refresh {}", self.path.display()), e))
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path)
            && e.kind() != IoErrorKind::NotFound
        {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove workspace lock");
        } else {
            tracing::debug!("released workspace lock");
        }
    }
}

fn create_exclusive(path: &Path, info: &LockInfo) -> std::io::Result<()> {
    let content = serde_json::to_string_pretty(info).map_err(std::io::Error::other)?;
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()
}

/// Decide whether an existing lock may be taken over.
fn check_existing(path: &Path, stale_after: Duration, ours: &LockInfo) -> Result<()> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(Error::io(format!("failed to read {}", path.display()), e));
        }
    };

    let existing: LockInfo = match serde_json::from_str(&content) {
        Ok(info) => info,
        Err(e) => {
            // Unreadable locks fall back to their modification time.
            let modified = fs::metadata(path)
                .and_then(|m| m.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            if Utc::now().signed_duration_since(modified) < stale_after {
                return Err(locked_conflict(path, "an unknown process", modified));
            }
            tracing::warn!(path = %path.display(), error = %e, "replacing unreadable stale lock");
            return Ok(());
        }
    };

    let age = Utc::now().signed_duration_since(existing.last_seen());
    let same_host = existing.holder == ours.holder;
    let holder_gone = same_host && existing.pid != ours.pid && !process_alive(existing.pid);

    if holder_gone {
        tracing::warn!(
            holder = %existing.holder,
            pid = existing.pid,
            "replacing lock held by an exited process"
        );
        return Ok(());
    }

    if age < stale_after {
        let who = format!("{} (pid {})", existing.holder, existing.pid);
        return Err(locked_conflict(path, &who, existing.last_seen()));
    }

    tracing::warn!(
        holder = %existing.holder,
        pid = existing.pid,
        last_seen = %existing.last_seen(),
        "replacing stale workspace lock"
    );
    Ok(())
}

fn locked_conflict(path: &Path, who: &str, since: DateTime<Utc>) -> Error {
    Error::conflict_with(
        format!("workspace is locked by {} since {}", who, since),
        vec![
            "wait for the other k1 process to finish".to_string(),
            format!(
                "if no other k1 process is running, remove {}",
                path.display()
            ),
        ],
    )
}
