use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::Sha256Hash;

/// A concrete build input: version name plus full commit hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pin {
    /// `1.2.3` for tag pins, the committer Unix timestamp for branch pins.
    pub version: String,
    /// Full 40-character commit hash.
    pub commit: String,
}

impl Pin {
    /// Construct a pin.
    pub fn new(version: impl Into<String>, commit: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            commit: commit.into(),
        }
    }
}

impl std::fmt::Display for Pin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.version, self.commit)
    }
}

/// Build cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint {
    /// Component name.
    pub name: String,
    /// Pinned version.
    pub version: String,
    /// Pinned commit.
    pub commit: String,
}

impl Fingerprint {
    /// Key for `name` at `pin`.
    pub fn new(name: impl Into<String>, pin: &Pin) -> Self {
        Self {
            name: name.into(),
            version: pin.version.clone(),
            commit: pin.commit.clone(),
        }
    }

    /// Archive-relative pool path, `pool/<name>/<version>/<commit>/install.deb`.
    pub fn pool_path(&self) -> String {
        format!(
            "pool/{}/{}/{}/install.deb",
            self.name, self.version, self.commit
        )
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.name, self.version, self.commit)
    }
}

/// A finished `.deb` on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    /// Pinned version the package was built from.
    pub version: String,
    /// Pinned commit the package was built from.
    pub commit: String,
    /// Absolute path of the `.deb`.
    pub path: PathBuf,
    /// Digest of the file.
    pub sha256: Sha256Hash,
    /// Size in bytes.
    pub size: u64,
}
