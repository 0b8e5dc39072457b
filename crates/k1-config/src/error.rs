use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("home directory not found; set K1_HOME to choose a workspace root")]
    HomeDirNotFound,

    #[error("config file `{path}` is not valid YAML: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("environment variable {name} has invalid value `{value}`")]
    InvalidEnv { name: String, value: String },

    #[error("--gitops-template-url requires --gitops-template-branch")]
    TemplateBranchMissing,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
