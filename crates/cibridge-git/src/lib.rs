//! `git` command-line adapter implementing [`VersionControl`].
//!
//! Every operation runs `git` with an explicit argument vector inside one
//! working copy. Nothing is ever passed through a shell.

use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::debug;

use cibridge_core::ports::{VcsError, VcsResult, VersionControl};
use cibridge_core::CommitSha;

/// Author and committer recorded on synthetic merge commits.
const COMMITTER_NAME: &str = "cibridge";
const COMMITTER_EMAIL: &str = "cibridge@localhost";

/// `VersionControl` backed by the `git` binary.
#[derive(Debug, Clone)]
pub struct GitCli {
    workdir: PathBuf,
}

impl GitCli {
    /// Operate on the (possibly still empty) directory `workdir`.
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        GitCli {
            workdir: workdir.into(),
        }
    }

    /// A stopped merge leaves `MERGE_HEAD` behind.
    async fn merge_in_progress(&self) -> bool {
        self.output(&["rev-parse", "-q", "--verify", "MERGE_HEAD"])
            .await
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    async fn output(&self, args: &[&str]) -> VcsResult<Output> {
        debug!(args = %redact_credentials(&args.join(" ")), "git");
        let output = Command::new("git")
            .arg("-c")
            .arg(format!("user.name={COMMITTER_NAME}"))
            .arg("-c")
            .arg(format!("user.email={COMMITTER_EMAIL}"))
            .args(args)
            .current_dir(&self.workdir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;
        Ok(output)
    }

    /// Run git and fail with `CommandFailed` on a non-zero exit.
    async fn run(&self, args: &[&str]) -> VcsResult<String> {
        let output = self.output(args).await?;
        if !output.status.success() {
            return Err(command_failed(args, &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

fn command_failed(args: &[&str], output: &Output) -> VcsError {
    VcsError::CommandFailed {
        command: args.first().copied().unwrap_or("git").to_string(),
        stderr: stderr_of(output),
    }
}

fn stderr_of(output: &Output) -> String {
    redact_credentials(String::from_utf8_lossy(&output.stderr).trim())
}

/// Replace the userinfo part of any URL in `text` with `***`.
///
/// Push URLs carry the CI token; git echoes them back in errors.
pub fn redact_credentials(text: &str) -> String {
    static USERINFO: OnceLock<Regex> = OnceLock::new();
    USERINFO
        .get_or_init(|| Regex::new(r"://[^/@\s]+@").expect("valid userinfo pattern"))
        .replace_all(text, "://***@")
        .into_owned()
}

#[async_trait]
impl VersionControl for GitCli {
    async fn clone_repo(&self, url: &str, branch: Option<&str>) -> VcsResult<()> {
        let mut args = vec!["clone", "-q"];
        if let Some(branch) = branch {
            args.extend(["-b", branch]);
        }
        args.extend(["--", url, "."]);
        self.run(&args).await.map(drop)
    }

    async fn fetch(&self, remote: &str, refspec: &str) -> VcsResult<()> {
        self.run(&["fetch", "-q", "--end-of-options", remote, refspec])
            .await
            .map(drop)
    }

    async fn checkout(&self, reference: &str, new_branch: Option<&str>) -> VcsResult<()> {
        match new_branch {
            Some(branch) => self.run(&["checkout", "-q", "-B", branch, reference]).await,
            None => self.run(&["checkout", "-q", reference]).await,
        }
        .map(drop)
    }

    async fn reset(&self, reference: &str, hard: bool) -> VcsResult<()> {
        let mode = if hard { "--hard" } else { "--mixed" };
        self.run(&["reset", "-q", mode, reference]).await.map(drop)
    }

    async fn merge(&self, reference: &str, message: &str) -> VcsResult<()> {
        let args = ["merge", "--no-ff", "--no-edit", "-m", message, reference];
        let output = self.output(&args).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = stderr_of(&output);
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let reported_conflict = [stdout.as_str(), stderr.as_str()]
            .iter()
            .any(|text| text.contains("CONFLICT") || text.contains("Automatic merge failed"));
        if !reported_conflict && !self.merge_in_progress().await {
            return Err(VcsError::CommandFailed {
                command: "merge".to_string(),
                stderr,
            });
        }
        if let Err(e) = self.run(&["merge", "--abort"]).await {
            debug!(error = %e, "merge --abort after failed merge");
        }
        Err(VcsError::MergeConflict {
            reference: reference.to_string(),
            detail: if stderr.is_empty() { stdout } else { stderr },
        })
    }

    async fn remote_add(&self, name: &str, url: &str) -> VcsResult<()> {
        let args = ["remote", "add", name, url];
        let output = self.output(&args).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = stderr_of(&output);
        if stderr.contains("already exists") {
            return Err(VcsError::RemoteExists {
                name: name.to_string(),
            });
        }
        Err(VcsError::CommandFailed {
            command: "remote".to_string(),
            stderr,
        })
    }

    async fn delete_remote_branch(&self, remote: &str, branch: &str) -> VcsResult<()> {
        let args = ["push", "-q", remote, "--delete", branch];
        let output = self.output(&args).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = stderr_of(&output);
        if stderr.contains("remote ref does not exist") {
            return Err(VcsError::NotFound {
                what: format!("branch {branch} on {remote}"),
            });
        }
        Err(VcsError::CommandFailed {
            command: "push".to_string(),
            stderr,
        })
    }

    async fn resolve_sha(&self, reference: &str) -> VcsResult<CommitSha> {
        let rev = format!("{reference}^{{commit}}");
        let args = ["rev-parse", "-q", "--verify", rev.as_str()];
        let output = self.output(&args).await?;
        if !output.status.success() {
            return Err(VcsError::NotFound {
                what: format!("revision {reference}"),
            });
        }
        Ok(CommitSha::new(String::from_utf8_lossy(&output.stdout)))
    }

    async fn log_oneline(&self, reference: &str) -> VcsResult<String> {
        self.run(&["log", "-1", "--oneline", reference, "--"]).await
    }

    async fn push(&self, remote: &str, branch: &str, force: bool) -> VcsResult<()> {
        let mut args = vec!["push", "-q"];
        if force {
            args.push("-f");
        }
        args.extend(["-u", remote, branch]);
        self.run(&args).await.map(drop)
    }
}
