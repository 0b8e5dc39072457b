//! Session file
//!
//! `~/.k1/<cluster>.yaml` holds the install session, the checkpoint map and
//! the local vault. It is the only file the engine must round-trip
//! losslessly, so every write replaces it atomically.

use crate::error::{Error, Result};
use crate::lock::WorkspaceLock;
use crate::session::InstallSession;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

pub const STATE_VERSION: u32 = 1;

fn default_version() -> u32 {
    STATE_VERSION
}

/// Recorded status of one step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub done: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Set when destroy reverted the step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleared_at: Option<DateTime<Utc>>,
}

/// On-disk layout of the session file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDocument {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<InstallSession>,

    #[serde(default, deserialize_with = "lenient_checkpoints")]
    pub checkpoints: BTreeMap<String, CheckpointEntry>,

    /// Secret name to base64 encoded value
    #[serde(default)]
    pub vault: BTreeMap<String, String>,
}

impl Default for SessionDocument {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            session: None,
            checkpoints: BTreeMap::new(),
            vault: BTreeMap::new(),
        }
    }
}

/// Malformed checkpoint entries read as "not done" instead of failing the
/// whole document. A bare boolean is accepted as shorthand for `{done: b}`.
fn lenient_checkpoints<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, CheckpointEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, serde_yaml::Value>>::deserialize(deserializer)?
        .unwrap_or_default();

    Ok(raw
        .into_iter()
        .map(|(key, value)| {
            let entry = match value {
                serde_yaml::Value::Bool(done) => CheckpointEntry {
                    done,
                    ..Default::default()
                },
                other => serde_yaml::from_value(other).unwrap_or_else(|e| {
                    tracing::warn!(checkpoint = %key, error = %e, "malformed checkpoint entry, treating as not done");
                    CheckpointEntry::default()
                }),
            };
            (key, entry)
        })
        .collect())
}

/// Handle on the session file with its last persisted contents.
pub struct StateFile {
    path: PathBuf,
    doc: SessionDocument,
    heartbeat: Option<Arc<WorkspaceLock>>,
}

impl StateFile {
    /// Load the session file, starting empty when it does not exist.
    ///
    /// A file that cannot be parsed is moved aside to
    /// `<name>.corrupt-<unix-ts>` so a broken file never causes a crash loop.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let doc = read_document(&path)?;
        Ok(Self {
            path,
            doc,
            heartbeat: None,
        })
    }

    /// Refresh `lock` after every successful write.
    pub(crate) fn with_heartbeat(mut self, lock: Arc<WorkspaceLock>) -> Self {
        self.heartbeat = Some(lock);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn document(&self) -> &SessionDocument {
        &self.doc
    }

    /// Apply `f` to a copy of the document and persist it.
    ///
    /// The in-memory document only changes once the new file is durable; if
    /// `f` fails or the write fails, nothing changes.
    pub fn update<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut SessionDocument) -> Result<T>,
    {
        let mut next = self.doc.clone();
        let out = f(&mut next)?;
        if next != self.doc {
            write_atomic(&self.path, &next)?;
            self.doc = next;
            if let Some(lock) = &self.heartbeat
                && let Err(e) = lock.heartbeat()
            {
                tracing::warn!(error = %e, "failed to refresh workspace lock");
            }
        }
        Ok(out)
    }

    /// Delete the session file and forget its contents.
    pub fn remove(&mut self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == IoErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::io(
                    format!("failed to remove {}", self.path.display()),
                    e,
                ));
            }
        }
        self.doc = SessionDocument::default();
        tracing::debug!(path = %self.path.display(), "removed session file");
        Ok(())
    }
}

/// State shared by the checkpoint store and the vault of one workspace.
pub type SharedState = Arc<Mutex<StateFile>>;

pub(crate) fn shared(state: StateFile) -> SharedState {
    Arc::new(Mutex::new(state))
}

/// Lock the shared state. A panic while holding the lock cannot leave a
/// half-applied document behind, so a poisoned mutex is still usable.
pub(crate) fn lock_state(state: &SharedState) -> MutexGuard<'_, StateFile> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read_document(path: &Path) -> Result<SessionDocument> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(SessionDocument::default()),
        Err(e) => {
            return Err(Error::io(
                format!("failed to read {}", path.display()),
                e,
            ));
        }
    };

    if content.trim().is_empty() {
        return Ok(SessionDocument::default());
    }

    match serde_yaml::from_str::<SessionDocument>(&content) {
        Ok(doc) if doc.version > STATE_VERSION => Err(Error::precondition(format!(
            "{} was written by a newer k1 (format version {})",
            path.display(),
            doc.version
        ))),
        Ok(doc) => Ok(doc),
        Err(e) => {
            let aside = quarantine(path)?;
            tracing::warn!(
                path = %path.display(),
                moved_to = %aside.display(),
                error = %e,
                "session file is corrupt, starting a fresh session"
            );
            Ok(SessionDocument::default())
        }
    }
}

fn quarantine(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "session".to_string());
    let aside = path.with_file_name(format!("{}.corrupt-{}", name, Utc::now().timestamp()));
    fs::rename(path, &aside).map_err(|e| {
        Error::io(
            format!("failed to move corrupt {} aside", path.display()),
            e,
        )
    })?;
    Ok(aside)
}

/// Write `doc` through a temp file in the same directory, fsync it, rename
/// it over `path`, then fsync the directory.
pub(crate) fn write_atomic(path: &Path, doc: &SessionDocument) -> Result<()> {
    let content = serde_yaml::to_string(doc)
        .map_err(|e| Error::internal(format!("failed to serialize session file: {}", e)))?;

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)
        .map_err(|e| Error::io(format!("failed to create {}", parent.display()), e))?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "session".to_string());
    let temp_path = parent.join(format!(".{}.tmp-{}", name, std::process::id()));

    let written = File::create(&temp_path).and_then(|mut file| {
        file.write_all(content.as_bytes())?;
        file.sync_all()
    });
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(Error::io(
            format!("failed to write {}", temp_path.display()),
            e,
        ));
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(Error::io(
            format!("failed to replace {}", path.display()),
            e,
        ));
    }

    if let Ok(dir) = File::open(&parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_starts_empty() {
        let dir = tempdir().unwrap();
        let state = StateFile::load(dir.path().join("kf.yaml")).unwrap();
        assert_eq!(state.document(), &SessionDocument::default());
    }

    #[test]
    fn test_update_persists_and_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kf.yaml");
        let mut state = StateFile::load(&path).unwrap();

        state
            .update(|doc| {
                doc.checkpoints.insert(
                    "cloud-credentials".into(),
                    CheckpointEntry {
                        done: true,
                        ..Default::default()
                    },
                );
                Ok(())
            })
            .unwrap();

        let reloaded = StateFile::load(&path).unwrap();
        assert_eq!(reloaded.document(), state.document());
        assert!(reloaded.document().checkpoints["cloud-credentials"].done);
    }

    #[test]
    fn test_failed_update_leaves_document_untouched() {
        let dir = tempdir().unwrap();
        let mut state = StateFile::load(dir.path().join("kf.yaml")).unwrap();

        let result: Result<()> = state.update(|doc| {
            doc.vault.insert("x".into(), "eA==".into());
            Err(Error::internal("boom"))
        });

        assert!(result.is_err());
        assert!(state.document().vault.is_empty());
        assert!(!dir.path().join("kf.yaml").exists());
    }

    /// Malformed entries read as not done; bare booleans are accepted
    #[test]
    fn test_malformed_checkpoint_entries_read_as_not_done() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kf.yaml");
        fs::write(
            &path,
            r#"version: 1
checkpoints:
  cloud-credentials:
    done: true
  state-store-create: "yes please"
  domain-liveness: true
  kbot-setup:
    done: [1, 2]
"#,
        )
        .unwrap();

        let state = StateFile::load(&path).unwrap();
        let checkpoints = &state.document().checkpoints;
        assert!(checkpoints["cloud-credentials"].done);
        assert!(!checkpoints["state-store-create"].done);
        assert!(checkpoints["domain-liveness"].done);
        assert!(!checkpoints["kbot-setup"].done);
    }

    #[test]
    fn test_corrupt_document_is_moved_aside() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kf.yaml");
        fs::write(&path, "version: [unterminated\n  : :").unwrap();

        let state = StateFile::load(&path).unwrap();
        assert_eq!(state.document(), &SessionDocument::default());
        assert!(!path.exists());

        let moved: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with("kf.yaml.corrupt-"))
            .collect();
        assert_eq!(moved.len(), 1);
    }

    #[test]
    fn test_newer_format_is_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kf.yaml");
        fs::write(&path, "version: 99\n").unwrap();

        let err = StateFile::load(&path).err().unwrap();
        assert_eq!(err.kind(), crate::ErrorKind::Precondition);
        assert!(path.exists());
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempdir().unwrap();
        let mut state = StateFile::load(dir.path().join("kf.yaml")).unwrap();
        state
            .update(|doc| {
                doc.vault.insert("bot.password".into(), "cGFzcw==".into());
                Ok(())
            })
            .unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["kf.yaml".to_string()]);
    }

    #[test]
    fn test_remove_resets_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kf.yaml");
        let mut state = StateFile::load(&path).unwrap();
        state
            .update(|doc| {
                doc.vault.insert("a".into(), "Yg==".into());
                Ok(())
            })
            .unwrap();

        state.remove().unwrap();
        assert!(!path.exists());
        assert!(state.document().vault.is_empty());
        // removing twice is fine
        state.remove().unwrap();
    }
}
