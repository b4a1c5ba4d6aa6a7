//! `.deb` assembly.
//!
//! A package is an ar archive with exactly three members, in order:
//! `debian-binary`, `control.tar.gz` and `data.tar.gz`. The data tarball is
//! the staging tree built from the component's file maps and downloads.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use catapt_schema::{BuildRecord, MetadataOverlay, Paragraph, Pin, ResolvedComponent, Sha256Hash};
use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::{debug, info, instrument};

use crate::disk::{Disk, EntryKind};
use crate::download::{Downloader, render_url};
use crate::error::{Error, Result, ResultExt};
use crate::host::{HostAdapter, staged_path};

/// Contents of the `debian-binary` member.
pub const DEBIAN_BINARY: &[u8] = b"2.0\n";

/// Everything one build needs.
#[derive(Debug, Clone)]
pub struct BuildJob {
    /// Package name.
    pub name: String,
    /// Version and commit being built.
    pub pin: Pin,
    /// Descriptor narrowed to the host.
    pub component: ResolvedComponent,
    /// Staging directory (created on demand).
    pub staging: PathBuf,
    /// Final `.deb` location.
    pub output: PathBuf,
}

/// Builds `.deb` files inside the sandbox.
#[derive(Debug, Clone)]
pub struct PackageBuilder {
    disk: Disk,
    host: Arc<dyn HostAdapter>,
    downloader: Downloader,
    default_maintainer: String,
}

impl PackageBuilder {
    /// New builder. `default_maintainer` fills the control file's
    /// `Maintainer` when no overlay sets one.
    pub fn new(
        disk: Disk,
        host: Arc<dyn HostAdapter>,
        downloader: Downloader,
        default_maintainer: impl Into<String>,
    ) -> Self {
        Self {
            disk,
            host,
            downloader,
            default_maintainer: default_maintainer.into(),
        }
    }

    /// Build `job`, or reuse the output if it already exists.
    #[instrument(skip_all, fields(name = %job.name, version = %job.pin.version))]
    pub async fn build(&self, job: &BuildJob) -> Result<BuildRecord> {
        if self.disk.exists(&job.output)? {
            debug!(output = %job.output.display(), "package already built");
            return self.record(job, self.disk.read(&job.output)?);
        }

        let data_root = job.staging.join("data");
        self.disk.create_dir_all(&data_root)?;

        for map in &job.component.file_maps {
            let dest = staged_path(self.host.as_ref(), &data_root, &map.anchor, Path::new(""))?;
            let disk = self.disk.clone();
            let source = map.dir.clone();
            let copied = tokio::task::spawn_blocking(move || transfer_tree(&disk, &source, &dest))
                .await?
                .with_context(|| format!("staging file map {}", map.dir.display()))?;
            debug!(anchor = %map.anchor, target = map.target.name(), copied, "staged file map");
        }

        for download in &job.component.downloads {
            let dest = staged_path(
                self.host.as_ref(),
                &data_root,
                &download.dst.anchor,
                Path::new(&download.dst.path),
            )?;
            let url = render_url(&download.src, &job.pin);
            self.downloader
                .fetch(&self.disk, &url, &dest)
                .await
                .with_context(|| format!("fetching download '{}'", download.name))?;
        }

        let control = control_paragraph(
            &job.name,
            &job.pin,
            &job.component.metadata,
            &self.default_maintainer,
        )
        .emit();
        let disk = self.disk.clone();
        let output = job.output.clone();
        let bytes = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let deb = assemble_deb(&disk, &control, &data_root)?;
            write_atomically(&disk, &output, &deb)?;
            Ok(deb)
        })
        .await?
        .context("assembling package")?;

        info!(size = bytes.len(), output = %job.output.display(), "built package");
        self.record(job, bytes)
    }

    fn record(&self, job: &BuildJob, bytes: Vec<u8>) -> Result<BuildRecord> {
        Ok(BuildRecord {
            version: job.pin.version.clone(),
            commit: job.pin.commit.clone(),
            path: self.disk.resolve(&job.output)?,
            sha256: Sha256Hash::compute(&bytes),
            size: bytes.len() as u64,
        })
    }
}

/// The `control` file contents. dpkg insists on `Architecture`,
/// `Maintainer` and `Description`, so those fall back to `all`, the default
/// maintainer and the package name.
pub fn control_paragraph(
    name: &str,
    pin: &Pin,
    metadata: &MetadataOverlay,
    default_maintainer: &str,
) -> Paragraph {
    fn field(value: &Option<String>) -> Option<&str> {
        value.as_deref().filter(|v| !v.is_empty())
    }
    Paragraph::new()
        .with("Package", name)
        .with("Version", pin.version.as_str())
        .with("Architecture", field(&metadata.architecture).unwrap_or("all"))
        .with(
            "Maintainer",
            field(&metadata.maintainer).unwrap_or(default_maintainer),
        )
        .with_opt("Depends", field(&metadata.depends))
        .with_opt("Recommends", field(&metadata.recommends))
        .with_opt("Section", field(&metadata.section))
        .with_opt("Priority", field(&metadata.priority))
        .with_opt("Homepage", field(&metadata.homepage))
        .with("Description", field(&metadata.description).unwrap_or(name))
}

/// Copy every file under `source` to the same relative path under `dest`.
/// Existing destination files are left alone. Returns the number copied.
pub fn transfer_tree(disk: &Disk, source: &Path, dest: &Path) -> Result<usize> {
    let mut copied = 0;
    disk.create_dir_all(dest)?;
    for entry in disk.walk(source)? {
        let target = dest.join(&entry.relative);
        match entry.kind {
            EntryKind::Dir => disk.create_dir_all(&target)?,
            EntryKind::File | EntryKind::Symlink => {
                if disk.exists(&target)? {
                    continue;
                }
                if let Some(parent) = target.parent() {
                    disk.create_dir_all(parent)?;
                }
                disk.copy(&entry.path, &target)?;
                copied += 1;
            }
        }
    }
    Ok(copied)
}

/// Pack the control text and the data tree into `.deb` bytes.
pub fn assemble_deb(disk: &Disk, control: &str, data_root: &Path) -> Result<Vec<u8>> {
    let data_root = disk.resolve(data_root)?;
    let mtime = chrono::Utc::now().timestamp().max(0) as u64;

    let control_tar = control_tarball(control, mtime).map_err(Error::build)?;
    let data_tar = data_tarball(&data_root).map_err(Error::build)?;

    let mut archive = ar::Builder::new(Vec::new());
    for (name, data) in [
        ("debian-binary", DEBIAN_BINARY),
        ("control.tar.gz", control_tar.as_slice()),
        ("data.tar.gz", data_tar.as_slice()),
    ] {
        let mut header = ar::Header::new(name.as_bytes().to_vec(), data.len() as u64);
        header.set_mtime(mtime);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mode(0o100_644);
        archive.append(&header, data).map_err(Error::build)?;
    }
    archive.into_inner().map_err(Error::build)
}

fn control_tarball(control: &str, mtime: u64) -> std::io::Result<Vec<u8>> {
    let mut tar = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(control.len() as u64);
    header.set_mode(0o644);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(mtime);
    tar.append_data(&mut header, "control", control.as_bytes())?;
    tar.into_inner()?.finish()
}

fn data_tarball(data_root: &Path) -> std::io::Result<Vec<u8>> {
    let mut tar = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    tar.mode(tar::HeaderMode::Deterministic);
    tar.follow_symlinks(false);
    tar.append_dir_all(".", data_root)?;
    let mut encoder = tar.into_inner()?;
    encoder.flush()?;
    encoder.finish()
}

fn write_atomically(disk: &Disk, output: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = output.parent() {
        disk.create_dir_all(parent)?;
    }
    let partial = output.with_extension("deb.partial");
    disk.write(&partial, bytes)?;
    disk.rename(&partial, output)
}
