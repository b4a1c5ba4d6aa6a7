//! Server configuration, read from a TOML file at start.
//!
//! ```toml
//! port = 8080
//! base_dir = "/var/lib/catapt"
//! catalogue_dir = "/etc/catapt/components"
//! user = "Archive Team <apt@example.com>"
//!
//! [archive]
//! repository = "tools"
//! suite = "stable"
//! codename = "bookworm"
//!
//! [signing]
//! key_file = "/etc/catapt/signing.key"
//! created = 1700000000
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use catapt_core::indexer::ArchiveSettings;
use catapt_core::signing::Signer;
use catapt_schema::{Arch, HostEnv};
use serde::Deserialize;

/// Environment variable that overrides the configured signing key.
pub const SIGNING_KEY_ENV: &str = "CATAPT_SIGNING_KEY";

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Listen address.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Listen port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Sandbox base for scratch space and the pool.
    pub base_dir: PathBuf,
    /// Directory holding component descriptors.
    pub catalogue_dir: PathBuf,
    /// Default `Maintainer` and key user ID.
    #[serde(default = "default_user")]
    pub user: String,
    /// Deadline for a single request.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Components refreshed concurrently; defaults to the CPU count.
    #[serde(default)]
    pub max_parallel_builds: Option<usize>,
    /// `Release` fields and URL names.
    pub archive: ArchiveConfig,
    /// Signing key source.
    #[serde(default)]
    pub signing: SigningConfig,
    /// Host facts to use instead of the discovered ones.
    #[serde(default)]
    pub host: HostOverrides,
}

/// Archive naming.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchiveConfig {
    /// `{repo}` segment of every URL.
    pub repository: String,
    #[serde(default = "default_origin")]
    #[allow(missing_docs)]
    pub origin: String,
    #[serde(default = "default_origin")]
    #[allow(missing_docs)]
    pub label: String,
    /// `Suite`; accepted as `{distro}`.
    #[serde(default = "default_suite")]
    pub suite: String,
    /// `Codename`; also accepted as `{distro}`. Defaults to the suite.
    #[serde(default)]
    pub codename: Option<String>,
    /// `Version`, omitted when empty.
    #[serde(default)]
    pub version: String,
}

/// Where the Ed25519 seed comes from. [`SIGNING_KEY_ENV`] wins over both.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SigningConfig {
    /// Base64 seed inline.
    pub key: Option<String>,
    /// File holding the base64 seed.
    pub key_file: Option<PathBuf>,
    /// Key creation time (Unix seconds); part of the fingerprint.
    #[serde(default)]
    pub created: u32,
}

/// Overrides for discovered host facts.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
#[allow(missing_docs)]
pub struct HostOverrides {
    pub arch: Option<Arch>,
    pub os_release_id: Option<String>,
    pub os_release_version: Option<String>,
    pub os_release_version_id: Option<String>,
    pub os_release_version_codename: Option<String>,
}

fn default_bind() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8080
}

fn default_user() -> String {
    "catapt <root@localhost>".into()
}

fn default_request_timeout() -> u64 {
    300
}

fn default_origin() -> String {
    "catapt".into()
}

fn default_suite() -> String {
    "stable".into()
}

impl Config {
    /// Read and validate `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("invalid config file: {}", path.display()))
    }

    /// Parse and validate TOML text.
    pub fn parse(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let repo = &self.archive.repository;
        anyhow::ensure!(
            !repo.is_empty() && !repo.contains('/'),
            "archive.repository must be a single non-empty path segment"
        );
        anyhow::ensure!(
            !self.archive.suite.is_empty() && !self.archive.suite.contains('/'),
            "archive.suite must be a single non-empty path segment"
        );
        anyhow::ensure!(
            self.request_timeout_secs > 0,
            "request_timeout_secs must be positive"
        );
        anyhow::ensure!(
            self.max_parallel_builds != Some(0),
            "max_parallel_builds must be positive"
        );
        Ok(())
    }

    /// `Codename`, falling back to the suite.
    pub fn codename(&self) -> &str {
        self.archive
            .codename
            .as_deref()
            .unwrap_or(&self.archive.suite)
    }

    /// Whether `distro` names this archive's suite or codename.
    pub fn serves_distro(&self, distro: &str) -> bool {
        distro == self.archive.suite || distro == self.codename()
    }

    /// `Release` fields.
    pub fn archive_settings(&self) -> ArchiveSettings {
        ArchiveSettings {
            origin: self.archive.origin.clone(),
            label: self.archive.label.clone(),
            suite: self.archive.suite.clone(),
            codename: self.codename().to_string(),
            version: self.archive.version.clone(),
        }
    }

    /// Bounded fan-out for index refreshes.
    pub fn parallelism(&self) -> usize {
        self.max_parallel_builds.unwrap_or_else(num_cpus::get)
    }

    /// Request deadline.
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }

    /// Apply `[host]` overrides to a discovered environment.
    pub fn host_env(&self, mut env: HostEnv) -> HostEnv {
        let o = &self.host;
        if let Some(arch) = o.arch {
            env.arch = arch;
        }
        for (slot, value) in [
            (&mut env.os_release_id, &o.os_release_id),
            (&mut env.os_release_version, &o.os_release_version),
            (&mut env.os_release_version_id, &o.os_release_version_id),
            (
                &mut env.os_release_version_codename,
                &o.os_release_version_codename,
            ),
        ] {
            if let Some(value) = value {
                slot.clone_from(value);
            }
        }
        env
    }

    /// Load the signing key, preferring the environment variable.
    pub fn signer(&self) -> Result<Signer> {
        self.signer_with(std::env::var(SIGNING_KEY_ENV).ok())
    }

    /// Load the signing key with an explicit environment override.
    pub fn signer_with(&self, env_key: Option<String>) -> Result<Signer> {
        let encoded = match (env_key, &self.signing.key, &self.signing.key_file) {
            (Some(key), _, _) => key,
            (None, Some(key), _) => key.clone(),
            (None, None, Some(file)) => std::fs::read_to_string(file)
                .with_context(|| format!("failed to read signing key: {}", file.display()))?,
            (None, None, None) => anyhow::bail!(
                "no signing key: set {SIGNING_KEY_ENV}, signing.key or signing.key_file"
            ),
        };
        Signer::from_base64(&encoded, self.signing.created, self.user.clone())
            .map_err(|e| anyhow::anyhow!(e.report()))
    }
}
