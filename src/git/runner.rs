//! VCS command execution behind an injectable runner
//!
//! Production code shells out to `git`; tests substitute a scripted runner
//! with canned transcripts. Only three commands are depended upon across
//! the engine: `diff --name-status`, `log`, and `blame --line-porcelain`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

use crate::errors::{CieError, Result};

/// Executes VCS commands; injected so tests never spawn processes
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `git <args>` and return stdout. A non-zero exit is a `Vcs`
    /// error carrying stderr.
    async fn run(&self, args: &[&str]) -> Result<String>;
}

/// Shells out to the `git` binary in a fixed working directory
pub struct GitCommandRunner {
    repo_root: PathBuf,
}

impl GitCommandRunner {
    pub fn new(repo_root: impl AsRef<Path>) -> Self {
        Self {
            repo_root: repo_root.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl CommandRunner for GitCommandRunner {
    async fn run(&self, args: &[&str]) -> Result<String> {
        let command_line = format!("git {}", args.join(" "));
        debug!(command = %command_line, "running vcs command");

        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_root)
            .output()
            .await
            .map_err(|e| CieError::vcs(command_line.clone(), format!("spawn failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(CieError::vcs(command_line, stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Scripted runner for tests: maps joined argument strings to canned
/// outputs and records every invocation.
#[derive(Default)]
pub struct ScriptedRunner {
    responses: HashMap<String, Result<String>>,
    calls: std::sync::Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, args: &str, output: &str) -> Self {
        self.responses
            .insert(args.to_string(), Ok(output.to_string()));
        self
    }

    pub fn fail(mut self, args: &str, message: &str) -> Self {
        self.responses.insert(
            args.to_string(),
            Err(CieError::vcs(format!("git {args}"), message)),
        );
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, args: &[&str]) -> Result<String> {
        let key = args.join(" ");
        self.calls.lock().unwrap().push(key.clone());
        match self.responses.get(&key) {
            Some(Ok(output)) => Ok(output.clone()),
            Some(Err(e)) => Err(CieError::vcs(format!("git {key}"), e.to_string())),
            None => Err(CieError::vcs(
                format!("git {key}"),
                "no scripted response for command",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_runner_replays_and_records() {
        let runner = ScriptedRunner::new().respond("rev-parse HEAD", "abc123\n");
        let output = runner.run(&["rev-parse", "HEAD"]).await.unwrap();
        assert_eq!(output, "abc123\n");
        assert_eq!(runner.calls(), vec!["rev-parse HEAD".to_string()]);
    }

    #[tokio::test]
    async fn unscripted_command_is_vcs_error() {
        let runner = ScriptedRunner::new();
        let err = runner.run(&["status"]).await.unwrap_err();
        assert!(matches!(err, CieError::Vcs { .. }));
    }
}
