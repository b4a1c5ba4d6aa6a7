//! Shared application state, built once at start.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use catapt_core::catalogue::Catalogue;
use catapt_core::disk::Disk;
use catapt_core::download::Downloader;
use catapt_core::engine::{Engine, EngineParts};
use catapt_core::host::{HostAdapter, SystemHost};
use catapt_core::indexer::ArchiveIndexer;
use catapt_core::signing::Signer;
use catapt_core::source::{GitSource, Pinner, SourceAcquirer};
use tracing::info;

use crate::config::Config;

/// Everything a request handler needs.
#[derive(Debug)]
pub struct AppState {
    /// Parsed configuration.
    pub config: Arc<Config>,
    /// Index builder (and, through it, the engine).
    pub indexer: Arc<ArchiveIndexer>,
    /// Per-request deadline.
    pub timeout: Duration,
}

/// Collaborators normally discovered from the system.
#[derive(Debug)]
pub struct Collaborators {
    /// Host facts.
    pub host: Arc<dyn HostAdapter>,
    /// Working copy provider.
    pub acquirer: Arc<dyn SourceAcquirer>,
    /// Version selection.
    pub pinner: Arc<dyn Pinner>,
    /// Archive signing key.
    pub signer: Signer,
}

impl Collaborators {
    /// Real host, `git` and the configured signing key.
    pub fn discover(config: &Config) -> Result<Self> {
        let discovered = SystemHost::discover().context("failed to discover host")?;
        let host = SystemHost::new(config.host_env(discovered.environment().clone()));
        let git = Arc::new(GitSource::new());
        Ok(Self {
            host: Arc::new(host),
            acquirer: Arc::clone(&git) as Arc<dyn SourceAcquirer>,
            pinner: git,
            signer: config.signer()?,
        })
    }
}

impl AppState {
    /// Load the catalogue and assemble the engine.
    pub fn build(config: Config, parts: Collaborators) -> Result<Self> {
        let disk = Disk::new(&config.base_dir)
            .with_context(|| format!("failed to open base dir {}", config.base_dir.display()))?;
        let catalogue = Catalogue::load(&config.catalogue_dir).map_err(|e| anyhow::anyhow!(e.report()))?;

        let engine = Engine::new(EngineParts {
            disk,
            host: parts.host,
            acquirer: parts.acquirer,
            pinner: parts.pinner,
            catalogue: Arc::new(catalogue),
            downloader: Downloader::default(),
            default_maintainer: config.user.clone(),
        })?;
        info!(
            arch = %engine.host().arch,
            os = %engine.host().os_release_id,
            components = engine.catalogue().len(),
            fingerprint = %parts.signer.fingerprint_hex(),
            "engine ready"
        );

        let indexer = ArchiveIndexer::new(
            Arc::new(engine),
            Arc::new(parts.signer),
            config.archive_settings(),
            config.parallelism(),
        );
        Ok(Self {
            timeout: config.request_timeout(),
            config: Arc::new(config),
            indexer: Arc::new(indexer),
        })
    }
}
