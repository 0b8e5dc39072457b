//! Template repository preparation
//!
//! A cloned template may carry one subtree per cloud/git/cluster-type
//! combination; the matching subtree becomes the repository root. Files then
//! get their `<TOKEN>` placeholders replaced with session values.

use k1_engine::{Error, Result};
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub type Tokens = BTreeMap<String, String>;

fn io(context: String) -> impl FnOnce(std::io::Error) -> Error {
    move |e| Error::io(context, e)
}

/// Candidate subtrees, most specific first: `<cloud>-<git>/<cluster-type>`
/// then `<cloud>-<git>`.
pub fn subtree_candidates(cloud: &str, git: &str, cluster_type: &str) -> Vec<String> {
    vec![
        format!("{}-{}/{}", cloud, git, cluster_type),
        format!("{}-{}", cloud, git),
    ]
}

/// Replace `dir` with the first candidate subtree that exists in it.
///
/// Returns the promoted candidate, or `None` when the template has no
/// matching subtree and is used as is.
pub fn promote_subtree(dir: &Path, candidates: &[String]) -> Result<Option<String>> {
    let Some(chosen) = candidates.iter().find(|c| dir.join(c).is_dir()) else {
        return Ok(None);
    };

    let staging = staging_path(dir);
    if staging.exists() {
        fs::remove_dir_all(&staging).map_err(io(format!("clearing {}", staging.display())))?;
    }
    fs::rename(dir.join(chosen), &staging)
        .map_err(io(format!("moving template subtree {}", chosen)))?;
    fs::remove_dir_all(dir).map_err(io(format!("clearing {}", dir.display())))?;
    fs::rename(&staging, dir).map_err(io(format!("promoting {}", chosen)))?;

    tracing::debug!(dir = %dir.display(), subtree = %chosen, "promoted template subtree");
    Ok(Some(chosen.clone()))
}

fn staging_path(dir: &Path) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.with_file_name(format!(".{}.promote", name))
}

/// Replace known `<TOKEN>` placeholders in `content`. Unknown tokens are
/// left alone.
pub fn detokenize_str(content: &str, tokens: &Tokens) -> Result<String> {
    let pattern = Regex::new(r"<([A-Z][A-Z0-9_]*)>")
        .map_err(|e| Error::internal(format!("token pattern: {}", e)))?;
    Ok(pattern
        .replace_all(content, |caps: &Captures<'_>| match tokens.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned())
}

/// Detokenize every UTF-8 file under `dir`, skipping `.git`.
///
/// Returns the number of files changed.
pub fn detokenize_dir(dir: &Path, tokens: &Tokens) -> Result<usize> {
    let mut changed = 0;
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let entries =
            fs::read_dir(&current).map_err(io(format!("reading {}", current.display())))?;
        for entry in entries {
            let entry = entry.map_err(io(format!("reading {}", current.display())))?;
            let path = entry.path();
            let file_type = entry
                .file_type()
                .map_err(io(format!("inspecting {}", path.display())))?;

            if file_type.is_dir() {
                if entry.file_name() != ".git" {
                    pending.push(path);
                }
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            let bytes = fs::read(&path).map_err(io(format!("reading {}", path.display())))?;
            let Ok(content) = String::from_utf8(bytes) else {
                continue;
            };
            let replaced = detokenize_str(&content, tokens)?;
            if replaced != content {
                fs::write(&path, replaced).map_err(io(format!("writing {}", path.display())))?;
                changed += 1;
            }
        }
    }

    Ok(changed)
}
