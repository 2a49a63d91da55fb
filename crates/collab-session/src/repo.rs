//! Repository references and acquisition.
//!
//! Only GitHub repositories are accepted, written either as an HTTPS URL or
//! in SSH form. Acquisition clones over SSH into `<repos_dir>/<owner>/<name>`
//! and reuses an existing checkout.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;

use collab_common::SessionError;
use regex::Regex;

static HTTPS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://github\.com/([\w.-]+)/([\w.-]+?)(?:\.git)?$").unwrap()
});

static SSH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^git@github\.com:([\w.-]+)/([\w.-]+?)(?:\.git)?$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn parse(url: &str) -> Result<Self, SessionError> {
        let url = url.trim();
        let caps = SSH_RE
            .captures(url)
            .or_else(|| HTTPS_RE.captures(url))
            .ok_or_else(|| SessionError::InvalidRepo(url.to_string()))?;
        let owner = caps[1].to_string();
        let name = caps[2].to_string();
        if owner.contains("..") || name.contains("..") {
            return Err(SessionError::InvalidRepo(format!(
                "{url}: path traversal in owner/name"
            )));
        }
        Ok(Self { owner, name })
    }

    /// `owner/name`, shown to participants.
    pub fn label(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    pub fn ssh_url(&self) -> String {
        format!("git@github.com:{}/{}.git", self.owner, self.name)
    }

    /// Where the checkout lives under `repos_dir`.
    pub fn checkout_dir(&self, repos_dir: &Path) -> PathBuf {
        repos_dir.join(&self.owner).join(&self.name)
    }
}

/// Produces a working directory for a repository. Called on the blocking
/// pool.
pub trait RepoAcquirer: Send + Sync {
    fn acquire(&self, repo: &RepoRef, repos_dir: &Path) -> Result<PathBuf, SessionError>;
}

/// Clones with the system `git` binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct GitAcquirer;

impl RepoAcquirer for GitAcquirer {
    fn acquire(&self, repo: &RepoRef, repos_dir: &Path) -> Result<PathBuf, SessionError> {
        let dir = repo.checkout_dir(repos_dir);
        if dir.join(".git").is_dir() {
            tracing::info!(repo = %repo.label(), "reusing existing checkout at {}", dir.display());
            return Ok(dir);
        }

        std::fs::create_dir_all(repos_dir.join(&repo.owner))?;
        let url = repo.ssh_url();
        tracing::info!(repo = %repo.label(), "cloning {url} into {}", dir.display());
        let status = Command::new("git")
            .arg("clone")
            .arg(&url)
            .arg(&dir)
            .status()
            .map_err(|e| SessionError::Acquisition(format!("failed to run git: {e}")))?;
        if !status.success() {
            return Err(SessionError::Acquisition(format!(
                "git clone exited with {status}"
            )));
        }
        Ok(dir)
    }
}
