//! Per-component refresh pipeline: acquire, pin, then build through the
//! cache.

use std::path::PathBuf;
use std::sync::Arc;

use catapt_schema::{BuildRecord, Fingerprint, HostEnv, MetadataOverlay, Pin};
use tracing::{debug, info, instrument};

use crate::builder::{BuildJob, PackageBuilder};
use crate::cache::BuildCache;
use crate::catalogue::{Catalogue, Component, discover_file_maps};
use crate::disk::{Disk, EntryKind};
use crate::download::Downloader;
use crate::error::{Error, Result, ResultExt};
use crate::host::HostAdapter;
use crate::scratch::{ScratchArea, ScratchDir};
use crate::source::{AcquireRequest, Pinner, SourceAcquirer};

/// What a refresh produced for one component.
#[derive(Debug, Clone)]
pub struct Artifact {
    /// Cache key of the build.
    pub fingerprint: Fingerprint,
    /// The built package.
    pub record: BuildRecord,
    /// Metadata merged for the host, as published in `Packages`.
    pub metadata: MetadataOverlay,
}

/// Collaborators the engine is assembled from.
#[derive(Debug, Clone)]
pub struct EngineParts {
    /// Sandbox for all file operations.
    pub disk: Disk,
    /// Host facts and anchors.
    pub host: Arc<dyn HostAdapter>,
    /// Working copy provider.
    pub acquirer: Arc<dyn SourceAcquirer>,
    /// Version selection.
    pub pinner: Arc<dyn Pinner>,
    /// Registered components.
    pub catalogue: Arc<Catalogue>,
    /// HTTP client for download entries.
    pub downloader: Downloader,
    /// Fallback `Maintainer` for control files.
    pub default_maintainer: String,
}

/// The catalogue engine.
#[derive(Debug)]
pub struct Engine {
    disk: Disk,
    scratch: ScratchArea,
    host: Arc<dyn HostAdapter>,
    acquirer: Arc<dyn SourceAcquirer>,
    pinner: Arc<dyn Pinner>,
    catalogue: Arc<Catalogue>,
    builder: PackageBuilder,
    cache: Arc<BuildCache>,
}

impl Engine {
    /// Assemble an engine. Clears stale scratch space under the base.
    pub fn new(parts: EngineParts) -> Result<Self> {
        let scratch = ScratchArea::new(parts.disk.clone())?;
        let builder = PackageBuilder::new(
            parts.disk.clone(),
            Arc::clone(&parts.host),
            parts.downloader,
            parts.default_maintainer,
        );
        Ok(Self {
            disk: parts.disk,
            scratch,
            host: parts.host,
            acquirer: parts.acquirer,
            pinner: parts.pinner,
            catalogue: parts.catalogue,
            builder,
            cache: BuildCache::new(),
        })
    }

    /// Host environment snapshot.
    pub fn host(&self) -> &HostEnv {
        self.host.environment()
    }

    /// Registered components.
    pub fn catalogue(&self) -> &Catalogue {
        &self.catalogue
    }

    /// Sandbox adapter.
    pub fn disk(&self) -> &Disk {
        &self.disk
    }

    /// Location of the `.deb` for `name` at exactly `version` and `commit`.
    ///
    /// Builds from this process come from the cache; packages a previous
    /// process left in the pool are served as long as the component is
    /// still registered.
    pub fn pool_file(&self, name: &str, version: &str, commit: &str) -> Result<PathBuf> {
        let fingerprint = Fingerprint::new(name, &Pin::new(version, commit));
        let not_found = || Error::NotFound(format!("build {fingerprint}"));
        if self.catalogue.get(name).is_none() {
            return Err(Error::NotFound(format!("component '{name}'")));
        }
        if let Some(record) = self.cache.lookup(&fingerprint) {
            return Ok(record.path);
        }
        if [version, commit]
            .iter()
            .any(|s| s.is_empty() || s.contains(['/', '\\']) || s.starts_with('.'))
        {
            return Err(not_found());
        }
        let path = self.disk.base().join(fingerprint.pool_path());
        match self.disk.stat(&path)? {
            Some(EntryKind::File) => Ok(path),
            _ => Err(not_found()),
        }
    }

    /// Whether `component` builds for this host at all.
    pub fn supports(&self, component: &Component) -> Result<bool> {
        Ok(component.descriptor().supports(self.host())?)
    }

    /// The build cache shared by every refresh.
    pub fn cache(&self) -> &Arc<BuildCache> {
        &self.cache
    }

    /// Pin `name` afresh and make sure a package exists for the pin.
    #[instrument(skip(self))]
    pub async fn refresh(&self, name: &str) -> Result<Artifact> {
        let component = self
            .catalogue
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("component '{name}'")))?;
        let descriptor = component.descriptor();
        let metadata = descriptor.metadata_for(self.host())?;

        let workdir = self.scratch.allocate(name);
        if self.disk.exists(workdir.path())? {
            return Err(Error::Internal(format!(
                "scratch path {} already exists",
                workdir.path().display()
            )));
        }
        let request = AcquireRequest {
            protocol: descriptor.source.protocol,
            url: descriptor.source.url.clone(),
            dest: workdir.path().to_path_buf(),
            subpath: descriptor.source.path.clone(),
            pin: None,
        };
        self.acquirer
            .acquire(&request)
            .await
            .with_context(|| format!("acquiring {name} from {}", descriptor.source.url))?;

        let pin = self
            .pinner
            .pin(workdir.path(), &descriptor.versioning)
            .await
            .with_context(|| format!("pinning {name}"))?;
        component.set_latest_pin(pin.clone());
        debug!(%pin, "pinned");

        let fingerprint = Fingerprint::new(name, &pin);
        let build = BuildTask {
            fingerprint: fingerprint.clone(),
            pin,
            component: Arc::clone(&component),
            workdir,
            staging: self.scratch.allocate(&format!("{name}-staging")),
            output: self.disk.base().join(fingerprint.pool_path()),
            subpath: descriptor.source.path.clone(),
            disk: self.disk.clone(),
            host: Arc::clone(&self.host),
            acquirer: Arc::clone(&self.acquirer),
            builder: self.builder.clone(),
        };
        let record = self
            .cache
            .get_or_build(fingerprint.clone(), move || build.run())
            .await
            .with_context(|| format!("building {fingerprint}"))?;

        Ok(Artifact {
            fingerprint,
            record,
            metadata,
        })
    }
}

/// State moved into the cache's build task. Scratch guards go with it so
/// they outlive an abandoned request.
struct BuildTask {
    fingerprint: Fingerprint,
    pin: Pin,
    component: Arc<Component>,
    workdir: ScratchDir,
    staging: ScratchDir,
    output: PathBuf,
    subpath: String,
    disk: Disk,
    host: Arc<dyn HostAdapter>,
    acquirer: Arc<dyn SourceAcquirer>,
    builder: PackageBuilder,
}

impl BuildTask {
    async fn run(self) -> Result<BuildRecord> {
        self.acquirer
            .checkout(self.workdir.path(), &self.pin.commit)
            .await
            .with_context(|| format!("checking out {}", self.pin.commit))?;

        let tree = self.workdir.path().join(self.subpath.trim_matches('/'));
        if self.disk.stat(&tree)?.is_none() {
            return Err(Error::Acquisition(format!(
                "source path '{}' missing at {}",
                self.subpath, self.pin.commit
            )));
        }
        let descriptor = discover_file_maps(self.component.descriptor().clone(), &tree, &self.disk)?;
        let resolved = descriptor.resolve_for(self.host.environment())?;

        let job = BuildJob {
            name: self.component.name().to_string(),
            pin: self.pin.clone(),
            component: resolved,
            staging: self.staging.path().to_path_buf(),
            output: self.output.clone(),
        };
        let record = self.builder.build(&job).await?;
        info!(fingerprint = %self.fingerprint, sha256 = %record.sha256, "package ready");
        Ok(record)
    }
}
