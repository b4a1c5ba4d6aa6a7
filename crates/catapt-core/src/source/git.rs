//! Git acquisition and pinning via [`tokio::process::Command`].
//!
//! Clones are shallow, blob-filtered and checkout-less; only the packaging
//! subtree is materialized through sparse checkout.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use catapt_schema::{Pin, Protocol, VersioningPolicy};
use tokio::process::Command;
use tracing::{debug, instrument};

use super::{AcquireRequest, Pinner, SourceAcquirer, parse_ls_remote, select_semver_tag};
use crate::error::{Error, Result};

/// Acquirer and pinner backed by the system `git` binary.
#[derive(Debug, Clone)]
pub struct GitSource {
    program: PathBuf,
}

impl Default for GitSource {
    fn default() -> Self {
        Self::new()
    }
}

impl GitSource {
    /// Use `git` from `PATH`.
    pub fn new() -> Self {
        let program = which::which("git").unwrap_or_else(|_| PathBuf::from("git"));
        Self { program }
    }

    /// Use a specific `git` binary.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Run git and return stdout. The error string carries stderr.
    async fn run(&self, dir: Option<&Path>, args: &[&str]) -> std::result::Result<String, String> {
        let mut cmd = Command::new(&self.program);
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(?args, "spawning git");
        let output = cmd
            .output()
            .await
            .map_err(|e| format!("failed to spawn git: {e}"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "git {} failed ({}): {}",
                args.first().copied().unwrap_or_default(),
                output.status,
                stderr.trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn has_commit(&self, workdir: &Path, commit: &str) -> bool {
        let object = format!("{commit}^{{commit}}");
        self.run(Some(workdir), &["cat-file", "-e", &object])
            .await
            .is_ok()
    }

    async fn fetch_shallow(&self, workdir: &Path, refspec: &str) -> std::result::Result<(), String> {
        self.run(Some(workdir), &["fetch", "--depth", "1", "origin", refspec])
            .await
            .map(|_| ())
    }

    async fn pin_semantic_tag(&self, workdir: &Path) -> Result<Pin> {
        let listing = self
            .run(Some(workdir), &["ls-remote", "--tags", "origin"])
            .await
            .map_err(Error::Pinning)?;
        let tags = parse_ls_remote(&listing);
        let (tag, version, commit) = select_semver_tag(&tags).ok_or_else(|| {
            Error::Pinning(format!("no SemVer tag among {} remote tags", tags.len()))
        })?;

        if !self.has_commit(workdir, &commit).await {
            self.fetch_shallow(workdir, &format!("refs/tags/{tag}"))
                .await
                .map_err(Error::Pinning)?;
        }
        debug!(%tag, %commit, "pinned semantic tag");
        Ok(Pin::new(version, commit))
    }

    async fn pin_latest_commit(&self, workdir: &Path, branch: &str) -> Result<Pin> {
        let reference = format!("refs/heads/{branch}");
        let listing = self
            .run(Some(workdir), &["ls-remote", "origin", &reference])
            .await
            .map_err(Error::Pinning)?;
        let commit = listing
            .lines()
            .find_map(|line| {
                line.split_once('\t')
                    .filter(|(_, r)| *r == reference)
                    .map(|(c, _)| c.to_string())
            })
            .ok_or_else(|| Error::Pinning(format!("branch '{branch}' not found on remote")))?;

        if !self.has_commit(workdir, &commit).await {
            self.fetch_shallow(workdir, &reference)
                .await
                .map_err(Error::Pinning)?;
        }
        let timestamp = self
            .run(Some(workdir), &["show", "-s", "--format=%ct", &commit])
            .await
            .map_err(Error::Pinning)?;
        let timestamp = timestamp.trim();
        if timestamp.is_empty() || !timestamp.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::Pinning(format!(
                "unexpected commit timestamp '{timestamp}' for {commit}"
            )));
        }
        debug!(%branch, %commit, "pinned latest commit");
        Ok(Pin::new(timestamp, commit))
    }
}

#[async_trait]
impl SourceAcquirer for GitSource {
    #[instrument(skip(self, request), fields(url = %request.url, dest = %request.dest.display()))]
    async fn acquire(&self, request: &AcquireRequest) -> Result<()> {
        let Protocol::Git = request.protocol;

        let dest = request.dest.to_string_lossy();
        self.run(
            None,
            &[
                "clone",
                "--filter=blob:none",
                "--no-checkout",
                "--depth",
                "1",
                "--",
                &request.url,
                &dest,
            ],
        )
        .await
        .map_err(Error::Acquisition)?;

        let subpath = request.subpath.trim_matches('/');
        if !subpath.is_empty() {
            self.run(Some(&request.dest), &["sparse-checkout", "set", subpath])
                .await
                .map_err(Error::Acquisition)?;
        }

        let commit = match &request.pin {
            Some(pin) => pin.commit.clone(),
            None => self
                .run(Some(&request.dest), &["rev-parse", "HEAD"])
                .await
                .map_err(Error::Acquisition)?
                .trim()
                .to_string(),
        };
        self.checkout(&request.dest, &commit).await
    }

    async fn checkout(&self, workdir: &Path, commit: &str) -> Result<()> {
        if !self.has_commit(workdir, commit).await {
            self.fetch_shallow(workdir, commit)
                .await
                .map_err(Error::Acquisition)?;
        }
        self.run(
            Some(workdir),
            &["checkout", "--force", "--detach", commit],
        )
        .await
        .map_err(Error::Acquisition)?;
        Ok(())
    }
}

#[async_trait]
impl Pinner for GitSource {
    #[instrument(skip(self, workdir), fields(workdir = %workdir.display()))]
    async fn pin(&self, workdir: &Path, policy: &VersioningPolicy) -> Result<Pin> {
        match policy {
            VersioningPolicy::SemanticTag => self.pin_semantic_tag(workdir).await,
            VersioningPolicy::LatestCommit { branch } => {
                self.pin_latest_commit(workdir, branch).await
            }
        }
    }
}
