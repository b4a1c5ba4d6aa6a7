//! Upstream acquisition and pinning.
//!
//! The engine only talks to upstreams through [`SourceAcquirer`] and
//! [`Pinner`]; [`git::GitSource`] implements both by shelling out to `git`.

pub mod git;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use catapt_schema::{Pin, Protocol, VersioningPolicy};

use crate::error::Result;

pub use git::GitSource;

/// What to materialize and where.
#[derive(Debug, Clone)]
pub struct AcquireRequest {
    /// Transport.
    pub protocol: Protocol,
    /// Remote URL.
    pub url: String,
    /// Directory to create; must not exist yet.
    pub dest: PathBuf,
    /// Subtree to check out; empty for everything.
    pub subpath: String,
    /// Commit to check out; the remote default branch head when `None`.
    pub pin: Option<Pin>,
}

/// Populates working copies.
#[async_trait]
pub trait SourceAcquirer: Send + Sync + std::fmt::Debug {
    /// Create `request.dest` holding `request.subpath` at the requested
    /// commit.
    async fn acquire(&self, request: &AcquireRequest) -> Result<()>;

    /// Move an existing working copy to `commit`.
    async fn checkout(&self, workdir: &Path, commit: &str) -> Result<()>;
}

/// Turns a working copy and a policy into a [`Pin`].
#[async_trait]
pub trait Pinner: Send + Sync + std::fmt::Debug {
    /// Pick the version and commit `policy` selects.
    async fn pin(&self, workdir: &Path, policy: &VersioningPolicy) -> Result<Pin>;
}

/// Tag to commit mapping parsed from `git ls-remote` output. Peeled
/// entries (`^{}`) win over the tag object they belong to.
pub fn parse_ls_remote(output: &str) -> Vec<(String, String)> {
    let mut refs: Vec<(String, String)> = Vec::new();
    for line in output.lines() {
        let Some((commit, reference)) = line.split_once('\t') else {
            continue;
        };
        let Some(tag) = reference.strip_prefix("refs/tags/") else {
            continue;
        };
        let (tag, peeled) = match tag.strip_suffix("^{}") {
            Some(tag) => (tag, true),
            None => (tag, false),
        };
        match refs.iter_mut().find(|(name, _)| name == tag) {
            Some((_, existing)) if peeled => *existing = commit.to_string(),
            Some(_) => {}
            None => refs.push((tag.to_string(), commit.to_string())),
        }
    }
    refs
}

/// Highest SemVer tag, as `(tag, version without 'v', commit)`. Tags that
/// do not parse are ignored.
pub fn select_semver_tag(tags: &[(String, String)]) -> Option<(String, String, String)> {
    tags.iter()
        .filter_map(|(tag, commit)| {
            let bare = tag.strip_prefix('v').unwrap_or(tag);
            semver::Version::parse(bare)
                .ok()
                .map(|version| (version, tag, commit))
        })
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(version, tag, commit)| (tag.clone(), version.to_string(), commit.clone()))
}
