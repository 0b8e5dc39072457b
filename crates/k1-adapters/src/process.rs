//! Running external command line tools

use crate::error::{AdapterError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// A single invocation of an external program.
///
/// Children are killed when the future running them is dropped, so a
/// cancelled step never leaves a tool running behind it.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: PathBuf,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    cwd: Option<PathBuf>,
    stdin: Option<String>,
}

impl Cmd {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    /// The program and arguments as logged. Stdin and environment are left out.
    pub(crate) fn command_line(&self) -> String {
        let mut line = self.program_name();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Build the tokio command. Environment values are never logged.
    pub(crate) fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.envs(&self.env);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        cmd.kill_on_drop(true);
        cmd
    }

    /// Run to completion and return stdout.
    pub async fn run(&self) -> Result<String> {
        let mut cmd = self.command();
        cmd.stdin(if self.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!("Running: {}", self.command_line());

        let mut child = cmd.spawn().map_err(|e| self.spawn_error(e))?;
        if let Some(input) = &self.stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(input.as_bytes()).await?;
                pipe.shutdown().await?;
            }
        }
        let output = child.wait_with_output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(AdapterError::CommandFailed {
                program: self.program_name(),
                status: output.status.to_string(),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    pub(crate) fn spawn_error(&self, e: std::io::Error) -> AdapterError {
        if e.kind() == std::io::ErrorKind::NotFound {
            AdapterError::NotInstalled(self.program_name())
        } else {
            AdapterError::Io(e)
        }
    }
}

/// Prefer a binary k1 downloaded into `tools_dir`, else rely on `PATH`.
pub fn resolve_tool(tools_dir: &Path, name: &str) -> PathBuf {
    let local = tools_dir.join(name);
    if local.is_file() {
        local
    } else {
        PathBuf::from(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_captures_stdout_and_stdin() {
        let out = Cmd::new("sh")
            .args(["-c", "cat; echo \" $GREETING\""])
            .env("GREETING", "world")
            .stdin("hello")
            .run()
            .await
            .unwrap();
        assert_eq!(out.trim(), "hello world");
    }

    #[tokio::test]
    async fn test_failure_carries_stderr() {
        let err = Cmd::new("sh")
            .args(["-c", "echo 'resource already exists' >&2; exit 3"])
            .run()
            .await
            .unwrap_err();
        match err {
            AdapterError::CommandFailed { program, stderr, .. } => {
                assert_eq!(program, "sh");
                assert_eq!(stderr, "resource already exists");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_not_installed() {
        let err = Cmd::new("k1-no-such-tool").run().await.unwrap_err();
        assert!(matches!(err, AdapterError::NotInstalled(name) if name == "k1-no-such-tool"));
    }

    #[test]
    fn test_resolve_tool_prefers_downloaded_binary() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_tool(dir.path(), "kubectl"), PathBuf::from("kubectl"));
        std::fs::write(dir.path().join("kubectl"), b"").unwrap();
        assert_eq!(resolve_tool(dir.path(), "kubectl"), dir.path().join("kubectl"));
    }
}
