//! Per-process scratch area for working copies and staging trees.

use std::path::{Path, PathBuf};

use rand::RngCore;

use crate::disk::Disk;
use crate::error::Result;

/// Directory under the sandbox base that hands out random subdirectory
/// names.
#[derive(Debug, Clone)]
pub struct ScratchArea {
    disk: Disk,
    root: PathBuf,
}

impl ScratchArea {
    /// Use `<base>/scratch`, clearing whatever a previous process left.
    pub fn new(disk: Disk) -> Result<Self> {
        let root = disk.base().join("scratch");
        disk.remove_dir_all(&root)?;
        disk.create_dir_all(&root)?;
        Ok(Self { disk, root })
    }

    /// Reserve a fresh path. Nothing is created on disk; the path is
    /// removed when the returned guard drops.
    pub fn allocate(&self, label: &str) -> ScratchDir {
        let mut bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut bytes);
        let path = self.root.join(format!("{label}-{}", hex::encode(bytes)));
        ScratchDir {
            disk: self.disk.clone(),
            path,
        }
    }
}

/// A scratch path removed on drop.
#[derive(Debug)]
pub struct ScratchDir {
    disk: Disk,
    path: PathBuf,
}

impl ScratchDir {
    /// The reserved path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = self.disk.remove_dir_all(&self.path) {
            tracing::debug!(path = %self.path.display(), error = %e, "failed to clean scratch dir");
        }
    }
}
