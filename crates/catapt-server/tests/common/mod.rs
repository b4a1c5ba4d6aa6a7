//! Test harness: an archive backed by in-memory upstreams.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use catapt_core::host::SystemHost;
use catapt_core::signing::Signer;
use catapt_core::source::{AcquireRequest, Pinner, SourceAcquirer};
use catapt_core::{Error, Result};
use catapt_schema::{HostEnv, Pin, VersioningPolicy};
use catapt_server::{AppState, Collaborators, Config, create_router};
use tempfile::TempDir;
use tower::ServiceExt;

/// Seed of the archive key used by every test.
pub const SEED: [u8; 32] = [42; 32];
/// Key creation time baked into the fingerprint.
pub const KEY_CREATED: u32 = 1_700_000_000;
/// Marker written at the root of each working copy.
const MARKER: &str = ".upstream";

/// What an upstream repository holds at its pinned commit.
#[derive(Debug, Clone)]
pub struct Upstream {
    /// Pin the fake pinner reports.
    pub pin: Pin,
    /// Files relative to the packaging directory.
    pub files: Vec<(String, Vec<u8>)>,
    /// Symlinks relative to the packaging directory, pointing anywhere.
    pub symlinks: Vec<(String, PathBuf)>,
    /// Whether the remote answers at all.
    pub reachable: bool,
}

impl Upstream {
    /// Upstream tagged `v{version}` with a single tool under `bin.all`.
    pub fn tagged(version: &str) -> Self {
        let commit = format!("{:0>40}", version.replace('.', ""));
        Self {
            pin: Pin::new(version, commit),
            files: vec![("bin.all/tool".into(), b"#!/bin/sh\necho tool\n".to_vec())],
            symlinks: Vec::new(),
            reachable: true,
        }
    }

    /// A remote that refuses every clone.
    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    /// Add a symlink.
    pub fn with_symlink(mut self, at: &str, target: impl Into<PathBuf>) -> Self {
        self.symlinks.push((at.into(), target.into()));
        self
    }
}

/// Acquirer and pinner serving [`Upstream`]s by URL.
#[derive(Debug, Default)]
pub struct FakeUpstreams {
    repos: HashMap<String, Upstream>,
    checkouts: Mutex<HashMap<String, usize>>,
    acquisitions: AtomicUsize,
}

impl FakeUpstreams {
    /// Builds (checkouts) performed for `url`.
    pub fn builds(&self, url: &str) -> usize {
        self.checkouts
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or_default()
    }

    /// Working copies created so far.
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    fn url_of(workdir: &Path) -> Result<String> {
        std::fs::read_to_string(workdir.join(MARKER))
            .map_err(|e| Error::Acquisition(format!("no marker in {}: {e}", workdir.display())))
    }
}

#[async_trait]
impl SourceAcquirer for FakeUpstreams {
    async fn acquire(&self, request: &AcquireRequest) -> Result<()> {
        let upstream = self
            .repos
            .get(&request.url)
            .filter(|u| u.reachable)
            .ok_or_else(|| Error::Acquisition(format!("cannot reach {}", request.url)))?;
        self.acquisitions.fetch_add(1, Ordering::SeqCst);

        let tree = request.dest.join(&request.subpath);
        std::fs::create_dir_all(&tree)?;
        std::fs::write(request.dest.join(MARKER), &request.url)?;
        for (path, contents) in &upstream.files {
            let path = tree.join(path);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, contents)?;
        }
        #[cfg(unix)]
        for (at, target) in &upstream.symlinks {
            let at = tree.join(at);
            if let Some(parent) = at.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::os::unix::fs::symlink(target, at)?;
        }
        Ok(())
    }

    async fn checkout(&self, workdir: &Path, _commit: &str) -> Result<()> {
        let url = Self::url_of(workdir)?;
        *self.checkouts.lock().unwrap().entry(url).or_default() += 1;
        // long enough for concurrent requests to pile up on one build
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        Ok(())
    }
}

#[async_trait]
impl Pinner for FakeUpstreams {
    async fn pin(&self, workdir: &Path, _policy: &VersioningPolicy) -> Result<Pin> {
        let url = Self::url_of(workdir)?;
        self.repos
            .get(&url)
            .map(|u| u.pin.clone())
            .ok_or_else(|| Error::Pinning(format!("no tags on {url}")))
    }
}

/// URL the harness registers for component `name`.
pub fn url_for(name: &str) -> String {
    format!("https://git.example.com/{name}.git")
}

/// Builder for a test archive.
pub struct Harness {
    tmp: TempDir,
    host: HostEnv,
    upstreams: FakeUpstreams,
}

impl Harness {
    /// Empty archive for `host`.
    pub fn new(host: HostEnv) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("catalogue")).unwrap();
        Self {
            tmp,
            host,
            upstreams: FakeUpstreams::default(),
        }
    }

    /// Directory outside the sandbox base.
    pub fn outside(&self) -> PathBuf {
        self.tmp.path().join("outside")
    }

    /// Register `name`. `extra` is descriptor TOML placed before the
    /// `[source]` table, so it may start with top-level keys.
    pub fn component(mut self, name: &str, extra: &str, upstream: Upstream) -> Self {
        let url = url_for(name);
        let descriptor = format!(
            "name = \"{name}\"\ntype = \"package\"\n{extra}\n\n[source]\nurl = \"{url}\"\npath = \"debian\"\n\n[versioning]\npolicy = \"semantic-tag\"\n"
        );
        std::fs::write(
            self.tmp.path().join("catalogue").join(format!("{name}.toml")),
            descriptor,
        )
        .unwrap();
        self.upstreams.repos.insert(url, upstream);
        self
    }

    /// Start the archive.
    pub fn start(self) -> Archive {
        let base = self.tmp.path().join("base");
        let config = Config::parse(&format!(
            r#"
base_dir = "{base}"
catalogue_dir = "{catalogue}"
user = "catapt tests <ci@example.com>"
request_timeout_secs = 30
max_parallel_builds = 4

[archive]
repository = "tools"
suite = "stable"
codename = "bookworm"
"#,
            base = base.display(),
            catalogue = self.tmp.path().join("catalogue").display(),
        ))
        .unwrap();

        let upstreams = Arc::new(self.upstreams);
        let signer = Signer::from_seed(SEED, KEY_CREATED, config.user.clone());
        let verifying_key = signer.verifying_key();
        let state = AppState::build(
            config,
            Collaborators {
                host: Arc::new(SystemHost::new(self.host)),
                acquirer: Arc::clone(&upstreams) as Arc<dyn SourceAcquirer>,
                pinner: Arc::clone(&upstreams) as Arc<dyn Pinner>,
                signer,
            },
        )
        .unwrap();

        Archive {
            tmp: self.tmp,
            base,
            state: Arc::new(state),
            upstreams,
            verifying_key,
        }
    }
}

/// A running (in-process) archive.
pub struct Archive {
    /// Keeps the directories alive.
    pub tmp: TempDir,
    /// Sandbox base.
    pub base: PathBuf,
    /// Shared state behind the router.
    pub state: Arc<AppState>,
    /// The fake upstreams.
    pub upstreams: Arc<FakeUpstreams>,
    /// Public half of the archive key.
    pub verifying_key: ed25519_dalek::VerifyingKey,
}

impl Archive {
    /// `GET path` through the router.
    pub async fn get(&self, path: &str) -> (StatusCode, Vec<u8>) {
        let response = create_router(Arc::clone(&self.state))
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    /// `GET path`, asserting 200 and UTF-8.
    pub async fn get_text(&self, path: &str) -> String {
        let (status, body) = self.get(path).await;
        let text = String::from_utf8(body).unwrap();
        assert_eq!(status, StatusCode::OK, "{path}: {text}");
        text
    }
}

/// `/repositories/tools/dists/stable/<rest>`
pub fn dists(rest: &str) -> String {
    format!("/repositories/tools/dists/stable/{rest}")
}
