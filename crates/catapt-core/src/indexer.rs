//! APT index files: `Packages`, `Packages.xz`, `Release` and `InRelease`.

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use catapt_schema::control::emit_paragraphs;
use catapt_schema::{ARCHIVE_COMPONENT, Arch, Paragraph};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream;
use tracing::{debug, info, instrument, warn};
use xz2::write::XzEncoder;

use crate::engine::{Artifact, Engine};
use crate::error::{Error, ErrorKind, Result};
use crate::signing::Signer;

/// Compression variants of the `Packages` stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Uncompressed `Packages`.
    Plain,
    /// `Packages.xz`.
    Xz,
}

impl Compression {
    /// Both variants, in the order `Release` lists them.
    pub const ALL: [Self; 2] = [Self::Plain, Self::Xz];

    /// File name under `binary-<arch>/`.
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Plain => "Packages",
            Self::Xz => "Packages.xz",
        }
    }

    /// Variant served under `name`, if any.
    pub fn from_file_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.file_name() == name)
    }
}

/// One snapshot of a `Packages` stream in every compression.
#[derive(Debug, Clone)]
pub struct PackagesIndex {
    /// Uncompressed text.
    pub plain: Bytes,
    /// xz-compressed text.
    pub xz: Bytes,
}

impl PackagesIndex {
    /// Bytes for one variant.
    pub fn get(&self, compression: Compression) -> Bytes {
        match compression {
            Compression::Plain => self.plain.clone(),
            Compression::Xz => self.xz.clone(),
        }
    }
}

/// Archive-wide `Release` fields.
#[derive(Debug, Clone, Default)]
pub struct ArchiveSettings {
    /// `Origin`
    pub origin: String,
    /// `Label`
    pub label: String,
    /// `Suite`
    pub suite: String,
    /// `Codename`
    pub codename: String,
    /// `Version`
    pub version: String,
}

/// Builds and caches index files for the engine's catalogue.
#[derive(Debug)]
pub struct ArchiveIndexer {
    engine: Arc<Engine>,
    signer: Arc<Signer>,
    settings: ArchiveSettings,
    parallelism: usize,
    indices: RwLock<HashMap<Arch, PackagesIndex>>,
    cold: tokio::sync::Mutex<()>,
}

impl ArchiveIndexer {
    /// New indexer; `parallelism` bounds concurrent component refreshes.
    pub fn new(
        engine: Arc<Engine>,
        signer: Arc<Signer>,
        settings: ArchiveSettings,
        parallelism: usize,
    ) -> Self {
        Self {
            engine,
            signer,
            settings,
            parallelism: parallelism.max(1),
            indices: RwLock::new(HashMap::new()),
            cold: tokio::sync::Mutex::new(()),
        }
    }

    /// The engine behind this indexer.
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// `Packages` bytes for `arch`, computed on first use. Concurrent
    /// first requests wait on a single refresh.
    pub async fn packages(&self, arch: Arch, compression: Compression) -> Result<Bytes> {
        self.check_arch(arch)?;
        if let Some(bytes) = self.cached(arch, compression) {
            debug!(%arch, file = compression.file_name(), "serving cached index");
            return Ok(bytes);
        }
        let _cold = self.cold.lock().await;
        if let Some(bytes) = self.cached(arch, compression) {
            debug!(%arch, file = compression.file_name(), "index filled while waiting");
            return Ok(bytes);
        }
        Ok(self.refresh_packages(arch).await?.get(compression))
    }

    fn cached(&self, arch: Arch, compression: Compression) -> Option<Bytes> {
        self.indices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&arch)
            .map(|index| index.get(compression))
    }

    /// Re-pin every component and replace the cached `Packages` for `arch`.
    ///
    /// Components that fail are logged and left out, except for sandbox
    /// violations, which fail the whole index.
    #[instrument(skip(self))]
    pub async fn refresh_packages(&self, arch: Arch) -> Result<PackagesIndex> {
        self.check_arch(arch)?;
        let components: Vec<_> = self.engine.catalogue().components().cloned().collect();
        let collected = Arc::new(tokio::sync::Mutex::new(Vec::with_capacity(components.len())));

        let outcomes: Vec<Result<()>> = stream::iter(components)
            .map(|component| {
                let collected = Arc::clone(&collected);
                async move {
                    let name = component.name().to_string();
                    match self.engine.supports(&component) {
                        Ok(true) => {}
                        Ok(false) => {
                            debug!(component = %name, "not built for this host");
                            return Ok(());
                        }
                        Err(e) => {
                            warn!(component = %name, error = %e.report(), "skipping component");
                            return Ok(());
                        }
                    }
                    match self.engine.refresh(&name).await {
                        Ok(artifact) => {
                            collected.lock().await.push(package_paragraph(&artifact));
                            Ok(())
                        }
                        Err(e) if e.kind() == ErrorKind::BlockedPath => Err(e),
                        Err(e) => {
                            warn!(component = %name, error = %e.report(), "omitting component from index");
                            Ok(())
                        }
                    }
                }
            })
            .buffer_unordered(self.parallelism)
            .collect()
            .await;
        outcomes.into_iter().collect::<Result<()>>()?;

        let mut paragraphs = std::mem::take(&mut *collected.lock().await);
        paragraphs.sort_by(|a, b| a.get("Package").cmp(&b.get("Package")));
        let text = emit_paragraphs(&paragraphs);

        let plain = Bytes::from(text.into_bytes());
        let xz = {
            let plain = plain.clone();
            tokio::task::spawn_blocking(move || xz_compress(&plain)).await??
        };
        let index = PackagesIndex {
            plain,
            xz: Bytes::from(xz),
        };
        info!(%arch, packages = paragraphs.len(), bytes = index.plain.len(), "index refreshed");

        self.indices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(arch, index.clone());
        Ok(index)
    }

    /// Unsigned `Release` for a fresh snapshot of the host's index.
    pub async fn release(&self) -> Result<String> {
        let arch = self.engine.host().arch;
        let index = self.refresh_packages(arch).await?;
        Ok(self.render_release(arch, &index, Utc::now()))
    }

    /// Clear-signed `Release`.
    pub async fn in_release(&self) -> Result<String> {
        let release = self.release().await?;
        Ok(self.signer.clear_sign(&release))
    }

    /// `Release` text describing `index`.
    pub fn render_release(&self, arch: Arch, index: &PackagesIndex, date: DateTime<Utc>) -> String {
        let mut sha256 = String::new();
        for compression in Compression::ALL {
            let bytes = index.get(compression);
            sha256.push_str(&format!(
                "\n{} {} {}/{}/{}",
                catapt_schema::Sha256Hash::compute(&bytes),
                bytes.len(),
                ARCHIVE_COMPONENT,
                arch.binary_dir(),
                compression.file_name(),
            ));
        }
        let s = &self.settings;
        Paragraph::new()
            .with("Origin", s.origin.as_str())
            .with("Label", s.label.as_str())
            .with("Suite", s.suite.as_str())
            .with("Codename", s.codename.as_str())
            .with("Version", s.version.as_str())
            .with("Date", date.format("%a, %d %b %Y %H:%M:%S UTC").to_string())
            .with("Architectures", arch.as_str())
            .with("Components", ARCHIVE_COMPONENT)
            .with("SHA256", sha256)
            .emit()
    }

    fn check_arch(&self, arch: Arch) -> Result<()> {
        let host = self.engine.host().arch;
        if arch == host {
            Ok(())
        } else {
            Err(Error::Validation(format!(
                "this archive only serves {host}, not {arch}"
            )))
        }
    }
}

/// `Packages` paragraph for a built component.
pub fn package_paragraph(artifact: &Artifact) -> Paragraph {
    let m = &artifact.metadata;
    Paragraph::new()
        .with("Package", artifact.fingerprint.name.as_str())
        .with("Version", artifact.record.version.as_str())
        .with("Filename", artifact.fingerprint.pool_path())
        .with_opt("Depends", m.depends.as_deref())
        .with_opt("Recommends", m.recommends.as_deref())
        .with_opt("Section", m.section.as_deref())
        .with_opt("Priority", m.priority.as_deref())
        .with_opt("Homepage", m.homepage.as_deref())
        .with_opt("Maintainer", m.maintainer.as_deref())
        .with_opt("Description", m.description.as_deref())
        .with_opt("Architecture", m.architecture.as_deref())
        .with("SHA256", artifact.record.sha256.as_str())
        .with("Size", artifact.record.size.to_string())
        .without_empty()
}

fn xz_compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = XzEncoder::new(Vec::new(), 6);
    encoder
        .write_all(data)
        .map_err(|e| Error::build(format!("xz: {e}")))?;
    encoder.finish().map_err(|e| Error::build(format!("xz: {e}")))
}
