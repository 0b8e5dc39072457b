pub mod error;
pub mod settings;

pub use error::*;
pub use settings::{Ports, Settings, TemplateSource, Timeouts, ToolVersions};

use std::path::{Path, PathBuf};

/// Environment variable naming the workspace root.
pub const HOME_ENV: &str = "K1_HOME";
/// Environment variable pointing directly at a config file.
pub const CONFIG_PATH_ENV: &str = "K1_CONFIG_PATH";

pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Workspace root: `K1_HOME` when set, else `~/.k1`.
pub fn get_workspace_root() -> Result<PathBuf> {
    if let Some(root) = non_empty_env(HOME_ENV) {
        return Ok(PathBuf::from(root));
    }
    let home = dirs::home_dir().ok_or(ConfigError::HomeDirNotFound)?;
    Ok(home.join(".k1"))
}

/// Locate the config file.
///
/// Search order:
/// 1. `K1_CONFIG_PATH` (direct path, used only if it exists)
/// 2. `<workspace_root>/config.yaml`
///
/// Returns `None` when neither exists; built-in defaults apply then.
pub fn find_config_file(workspace_root: &Path) -> Option<PathBuf> {
    if let Some(path) = non_empty_env(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
        tracing::warn!(path = %path.display(), "{} points at a missing file", CONFIG_PATH_ENV);
    }

    let path = workspace_root.join(CONFIG_FILE_NAME);
    path.exists().then_some(path)
}

pub(crate) fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    #[test]
    #[serial]
    fn test_workspace_root_from_env() {
        temp_env::with_var(HOME_ENV, Some("/tmp/k1-home"), || {
            assert_eq!(get_workspace_root().unwrap(), PathBuf::from("/tmp/k1-home"));
        });
    }

    #[test]
    #[serial]
    fn test_workspace_root_defaults_under_home() {
        temp_env::with_var_unset(HOME_ENV, || {
            let root = get_workspace_root().unwrap();
            assert!(root.ends_with(".k1"));
        });
    }

    #[test]
    #[serial]
    fn test_find_config_file_env_var_wins() {
        let temp_dir = tempfile::tempdir().unwrap();
        let custom = temp_dir.path().join("custom.yaml");
        fs::write(&custom, "event_buffer: 8\n").unwrap();
        fs::write(temp_dir.path().join(CONFIG_FILE_NAME), "event_buffer: 16\n").unwrap();

        temp_env::with_var(CONFIG_PATH_ENV, Some(custom.to_str().unwrap()), || {
            assert_eq!(find_config_file(temp_dir.path()), Some(custom.clone()));
        });
    }

    #[test]
    #[serial]
    fn test_find_config_file_in_workspace_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join(CONFIG_FILE_NAME), "{}\n").unwrap();

        temp_env::with_var_unset(CONFIG_PATH_ENV, || {
            let found = find_config_file(temp_dir.path()).unwrap();
            assert!(found.ends_with(CONFIG_FILE_NAME));
        });
    }

    #[test]
    #[serial]
    fn test_find_config_file_missing_env_path_falls_through() {
        let temp_dir = tempfile::tempdir().unwrap();

        temp_env::with_var(CONFIG_PATH_ENV, Some("/nonexistent/k1.yaml"), || {
            assert_eq!(find_config_file(temp_dir.path()), None);
        });
    }
}
