//! Downloads the pinned kubectl and terraform binaries

use crate::error::{AdapterError, Result as AdapterResult};
use crate::http;
use async_trait::async_trait;
use k1_engine::adapter::{ToolInstaller, ToolSpec};
use k1_engine::{Error, Result};
use std::io::Read;
use std::path::{Path, PathBuf};

/// Where a tool is published, and whether it ships inside a zip.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Source {
    Binary(String),
    Zip(String),
}

fn platform() -> (&'static str, &'static str) {
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    };
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };
    (os, arch)
}

fn source(tool: &ToolSpec, os: &str, arch: &str) -> AdapterResult<Source> {
    let version = &tool.version;
    match tool.name.as_str() {
        "kubectl" => Ok(Source::Binary(format!(
            "https://dl.k8s.io/release/{}/bin/{}/{}/kubectl",
            version, os, arch
        ))),
        "terraform" => {
            let version = version.trim_start_matches('v');
            Ok(Source::Zip(format!(
                "https://releases.hashicorp.com/terraform/{0}/terraform_{0}_{1}_{2}.zip",
                version, os, arch
            )))
        }
        other => Err(AdapterError::Unsupported(format!("no download source for {}", other))),
    }
}

/// Pull `binary_name` out of a zip archive held in memory.
fn extract_zip(data: &[u8], binary_name: &str) -> AdapterResult<Vec<u8>> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(data))?;
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let is_match = Path::new(file.name())
            .file_name()
            .is_some_and(|n| n == binary_name);
        if is_match && !file.is_dir() {
            let mut contents = Vec::new();
            file.read_to_end(&mut contents)?;
            return Ok(contents);
        }
    }
    Err(AdapterError::Unexpected(format!(
        "{} not found in downloaded archive",
        binary_name
    )))
}

/// Write through a temporary file so a half-written binary is never picked up.
async fn install_binary(data: &[u8], path: &Path) -> Result<()> {
    let tmp = path.with_extension("download");
    tokio::fs::write(&tmp, data)
        .await
        .map_err(|e| Error::io(format!("writing {}", tmp.display()), e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o755))
            .await
            .map_err(|e| Error::io(format!("chmod {}", tmp.display()), e))?;
    }
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| Error::io(format!("installing {}", path.display()), e))
}

pub struct HttpToolInstaller {
    client: reqwest::Client,
}

impl HttpToolInstaller {
    pub fn new() -> Self {
        Self {
            client: http::client(),
        }
    }

    async fn download(&self, url: &str) -> AdapterResult<Vec<u8>> {
        let response = http::send(&self.client, self.client.get(url)).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

impl Default for HttpToolInstaller {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolInstaller for HttpToolInstaller {
    async fn ensure(&self, tool: &ToolSpec, dest_dir: &Path) -> Result<PathBuf> {
        let path = dest_dir.join(&tool.name);
        if path.is_file() {
            tracing::debug!(tool = %tool.name, "already downloaded");
            return Ok(path);
        }
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| Error::io(format!("creating {}", dest_dir.display()), e))?;

        let (os, arch) = platform();
        let binary = match source(tool, os, arch)? {
            Source::Binary(url) => {
                tracing::info!(tool = %tool.name, version = %tool.version, "downloading");
                self.download(&url).await?
            }
            Source::Zip(url) => {
                tracing::info!(tool = %tool.name, version = %tool.version, "downloading");
                let archive = self.download(&url).await?;
                extract_zip(&archive, &tool.name)?
            }
        };
        install_binary(&binary, &path).await?;
        Ok(path)
    }
}
