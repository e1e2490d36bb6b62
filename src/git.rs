use std::path::{Path, PathBuf};

use crate::error::GitError;

/// Version-control operations the indexing pipeline needs.
pub trait GitRemote: Send + Sync {
    /// Clone `url` into `dest` and return the checked-out commit.
    fn clone_repo(
        &self,
        url: &str,
        dest: &Path,
    ) -> impl Future<Output = Result<String, GitError>> + Send;

    /// Fetch the tracked branch of the working copy at `repo` and return its remote head.
    fn fetch_head(&self, repo: &Path) -> impl Future<Output = Result<String, GitError>> + Send;

    /// Repository-relative paths changed between two commits. A renamed file is reported
    /// under both its old and new path.
    fn diff_files(
        &self,
        repo: &Path,
        from: &str,
        to: &str,
    ) -> impl Future<Output = Result<Vec<PathBuf>, GitError>> + Send;

    /// Move the working copy to `commit`.
    fn checkout(&self, repo: &Path, commit: &str)
    -> impl Future<Output = Result<(), GitError>> + Send;
}

/// [`GitRemote`] backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
    branch: String,
}

impl GitCli {
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
        }
    }

    async fn run(&self, repo: Option<&Path>, args: &[&str]) -> Result<String, GitError> {
        let mut cmd = tokio::process::Command::new("git");
        if let Some(repo) = repo {
            cmd.arg("-C").arg(repo);
        }
        cmd.args(args);
        tracing::debug!(?repo, ?args, "running git");

        let output = cmd.output().await?;
        if !output.status.success() {
            return Err(GitError::Command {
                args: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }
}

impl GitRemote for GitCli {
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<String, GitError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let dest_str = dest.to_string_lossy();
        self.run(None, &["clone", "--quiet", url, &dest_str]).await?;
        self.run(Some(dest), &["rev-parse", "HEAD"]).await
    }

    async fn fetch_head(&self, repo: &Path) -> Result<String, GitError> {
        self.run(Some(repo), &["fetch", "--quiet", "origin", &self.branch])
            .await?;
        self.run(Some(repo), &["rev-parse", "FETCH_HEAD"]).await
    }

    async fn diff_files(&self, repo: &Path, from: &str, to: &str) -> Result<Vec<PathBuf>, GitError> {
        // A rename must surface as delete + add so nodes under the old path are dropped.
        let out = self
            .run(Some(repo), &["diff", "--name-only", "--no-renames", from, to])
            .await?;
        Ok(out
            .lines()
            .filter(|l| !l.is_empty())
            .map(PathBuf::from)
            .collect())
    }

    async fn checkout(&self, repo: &Path, commit: &str) -> Result<(), GitError> {
        self.run(Some(repo), &["checkout", "--quiet", "--force", commit])
            .await?;
        Ok(())
    }
}
