//! Point-in-time history of instance directories
//!
//! Every mutating operation on an instance brackets itself with commits so
//! the directory can be rolled back by hand after a crash or a bad change.
//! The default backend shells out to `git`; anything that can initialise a
//! history and commit idempotently can stand in for it.

use crate::error::{FleetError, Result};
use async_trait::async_trait;
use log::{debug, error, info};
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::fs;
use tokio::process::Command;

pub const GITIGNORE: &str = "\n*~\nlogs/\n";

pub const GITCONFIG: &str = "
[core]
\trepositoryformatversion = 0
\tfilemode = true
\tbare = false
\tlogallrefupdates = true
[user]
\temail = mcmanager@local
\tname = mcmanager
";

#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    /// Starts a fresh history in `dir` with an "initial" commit.
    async fn initialize(&self, dir: &Path) -> Result<()>;

    /// Records the current state of `dir`. Committing an unchanged directory
    /// is a success.
    async fn commit(&self, dir: &Path, message: &str) -> Result<()>;
}

/// Snapshots through the `git` command line.
#[derive(Debug, Clone)]
pub struct GitBackend {
    program: String,
}

impl Default for GitBackend {
    fn default() -> Self {
        Self::new("git")
    }
}

impl GitBackend {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn locate(&self) -> Result<PathBuf> {
        which::which(&self.program).map_err(|_| FleetError::ToolUnavailable(self.program.clone()))
    }

    async fn run(&self, dir: &Path, args: &[&str]) -> Result<Output> {
        let program = self.locate()?;
        debug!("Running {} {:?} in {}", self.program, args, dir.display());
        let output = Command::new(program)
            .args(args)
            .current_dir(dir)
            .output()
            .await?;
        Ok(output)
    }
}

fn report(output: &Output) -> String {
    format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

#[async_trait]
impl SnapshotBackend for GitBackend {
    async fn initialize(&self, dir: &Path) -> Result<()> {
        let output = self.run(dir, &["init"]).await?;
        if !output.status.success() {
            error!("git init failed in {}:\n{}", dir.display(), report(&output));
            return Err(FleetError::Snapshot(format!(
                "git init exited with {}",
                output.status
            )));
        }

        fs::write(dir.join(".gitignore"), GITIGNORE).await?;
        fs::write(dir.join(".git").join("config"), GITCONFIG).await?;

        self.commit(dir, "initial").await?;
        info!("Initialised snapshot history in {}", dir.display());
        Ok(())
    }

    async fn commit(&self, dir: &Path, message: &str) -> Result<()> {
        let add = self.run(dir, &["add", "-A"]).await?;
        if !add.status.success() {
            error!("git add failed in {}:\n{}", dir.display(), report(&add));
            return Err(FleetError::Snapshot(format!(
                "git add exited with {}",
                add.status
            )));
        }

        let commit = self.run(dir, &["commit", "-m", message]).await?;
        match commit.status.code() {
            Some(0) => {
                debug!("Committed '{}' in {}", message, dir.display());
                Ok(())
            }
            // nothing to commit
            Some(1) => Ok(()),
            _ => {
                error!("git commit failed in {}:\n{}", dir.display(), report(&commit));
                Err(FleetError::Snapshot(format!(
                    "git commit exited with {}",
                    commit.status
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git_available() -> bool {
        which::which("git").is_ok()
    }

    #[tokio::test]
    async fn test_missing_tool_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let backend = GitBackend::new("definitely-not-a-real-vcs-binary");

        assert!(matches!(
            backend.initialize(dir.path()).await,
            Err(FleetError::ToolUnavailable(_))
        ));
        assert!(matches!(
            backend.commit(dir.path(), "x").await,
            Err(FleetError::ToolUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_initialize_writes_ignore_and_identity() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("server.properties"), "pvp=true\n").unwrap();

        GitBackend::default().initialize(dir.path()).await.unwrap();

        let ignore = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert!(ignore.contains("logs/"));
        let config = std::fs::read_to_string(dir.path().join(".git/config")).unwrap();
        assert!(config.contains("name = mcmanager"));
    }

    #[tokio::test]
    async fn test_commit_unmodified_is_ok() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("server.properties"), "pvp=true\n").unwrap();

        let backend = GitBackend::default();
        backend.initialize(dir.path()).await.unwrap();
        backend.commit(dir.path(), "nothing changed").await.unwrap();
        backend.commit(dir.path(), "still nothing").await.unwrap();

        std::fs::write(dir.path().join("server.properties"), "pvp=false\n").unwrap();
        backend.commit(dir.path(), "pvp off").await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_outside_repository_fails() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        // `git add` outside a work tree exits 128
        let result = GitBackend::default().commit(dir.path(), "x").await;
        assert!(matches!(result, Err(FleetError::Snapshot(_))));
    }
}
