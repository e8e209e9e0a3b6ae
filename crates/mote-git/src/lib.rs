//! `git` adapter for the bleeding-edge updater.
//!
//! Every operation is one `git` subprocess run in the project root, bounded by
//! a timeout; a subprocess that outlives it is killed.

use std::{
    path::PathBuf,
    process::{Output, Stdio},
    time::Duration,
};

use async_trait::async_trait;
use mote_core::{
    errors::Error,
    update::vcs::{StashOutcome, Vcs},
    Result,
};
use tokio::process::Command;

const STDERR_PREVIEW_MAX: usize = 500;
const NOTHING_TO_STASH: &str = "No local changes to save";

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("failed to spawn git: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("git {args} timed out after {after:?}")]
    Timeout { args: String, after: Duration },

    #[error("git {args} exited with {status}: {stderr}")]
    Failed {
        args: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("git {args} printed nothing")]
    EmptyOutput { args: String },
}

impl From<GitError> for Error {
    fn from(e: GitError) -> Self {
        Error::External(e.to_string())
    }
}

#[derive(Clone, Debug)]
pub struct GitCli {
    program: PathBuf,
    repo_dir: PathBuf,
    timeout: Duration,
}

impl GitCli {
    pub fn new(repo_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: PathBuf::from("git"),
            repo_dir: repo_dir.into(),
            timeout,
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    async fn run(&self, args: &[&str]) -> std::result::Result<String, GitError> {
        let output = self.output(args).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn output(&self, args: &[&str]) -> std::result::Result<Output, GitError> {
        let joined = args.join(" ");
        tracing::debug!(args = %joined, dir = %self.repo_dir.display(), "running git");

        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .current_dir(&self.repo_dir)
            .env("LC_ALL", "C")
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(res) => res.map_err(GitError::Spawn)?,
            Err(_) => {
                return Err(GitError::Timeout {
                    args: joined,
                    after: self.timeout,
                })
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GitError::Failed {
                args: joined,
                status: output.status,
                stderr: truncate_text(stderr.trim(), STDERR_PREVIEW_MAX),
            });
        }

        Ok(output)
    }

    async fn run_non_empty(&self, args: &[&str]) -> std::result::Result<String, GitError> {
        let out = self.run(args).await?;
        if out.is_empty() {
            return Err(GitError::EmptyOutput {
                args: args.join(" "),
            });
        }
        Ok(out)
    }
}

#[async_trait]
impl Vcs for GitCli {
    async fn head(&self) -> Result<String> {
        Ok(self.run_non_empty(&["rev-parse", "HEAD"]).await?)
    }

    async fn version(&self) -> Result<String> {
        let out = self.run_non_empty(&["--version"]).await?;
        Ok(out
            .strip_prefix("git version")
            .map(str::trim)
            .unwrap_or(&out)
            .to_string())
    }

    async fn fetch(&self, remote: &str) -> Result<()> {
        self.run(&["fetch", remote]).await?;
        Ok(())
    }

    async fn save_stash(&self) -> Result<StashOutcome> {
        let out = self.output(&["stash", "push"]).await?;
        let said_nothing = [&out.stdout, &out.stderr]
            .iter()
            .any(|stream| String::from_utf8_lossy(stream).contains(NOTHING_TO_STASH));
        if said_nothing {
            return Ok(StashOutcome::NothingToSave);
        }
        Ok(StashOutcome::Saved)
    }

    async fn merge(&self, branch_ref: &str) -> Result<()> {
        self.run(&["merge", "--no-edit", branch_ref]).await?;
        Ok(())
    }

    async fn pop_stash(&self) -> Result<()> {
        self.run(&["stash", "pop"]).await?;
        Ok(())
    }

    async fn reset_hard(&self, commit: &str) -> Result<()> {
        self.run(&["reset", "--hard", commit]).await?;
        Ok(())
    }
}

fn truncate_text(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut out = s.chars().take(max_len).collect::<String>();
    out.push_str("...");
    out
}
