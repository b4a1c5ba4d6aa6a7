//! Host environment discovery and anchor resolution.

use std::fmt::Debug;
use std::path::Path;

use catapt_schema::{Arch, HostEnv};

use crate::error::{Error, Result};

/// Facts about the machine packages are built for.
pub trait HostAdapter: Send + Sync + Debug {
    /// Architecture and `os-release` slots.
    fn environment(&self) -> &HostEnv;

    /// Install prefix for an anchor, e.g. `bin` -> `/usr/bin`.
    fn anchor_prefix(&self, anchor: &str) -> Option<&str> {
        default_anchor_prefix(anchor)
    }
}

/// The anchors every host understands.
pub fn default_anchor_prefix(anchor: &str) -> Option<&'static str> {
    Some(match anchor {
        "root" => "/",
        "etc" => "/etc",
        "bin" => "/usr/bin",
        "sbin" => "/usr/sbin",
        "lib" => "/usr/lib",
        "share" => "/usr/share",
        "doc" => "/usr/share/doc",
        "opt" => "/opt",
        "systemd" => "/usr/lib/systemd/system",
        _ => return None,
    })
}

/// Host adapter backed by a fixed [`HostEnv`].
#[derive(Debug, Clone)]
pub struct SystemHost {
    env: HostEnv,
}

impl SystemHost {
    /// Read `/etc/os-release` (falling back to `/usr/lib/os-release`) and
    /// pair it with the running architecture.
    pub fn discover() -> Result<Self> {
        for candidate in ["/etc/os-release", "/usr/lib/os-release"] {
            match std::fs::read_to_string(candidate) {
                Ok(text) => {
                    return Ok(Self::from_os_release(Arch::current(), &text));
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::Internal(format!("reading {candidate}: {e}"))),
            }
        }
        tracing::warn!("no os-release file found; OS-scoped targets will never match");
        Ok(Self::new(HostEnv::new(Arch::current())))
    }

    /// Host from `os-release` text.
    pub fn from_os_release(arch: Arch, text: &str) -> Self {
        Self::new(HostEnv::new(arch).with_os_release(text))
    }

    /// Host with an explicit environment.
    pub fn new(env: HostEnv) -> Self {
        Self { env }
    }
}

impl HostAdapter for SystemHost {
    fn environment(&self) -> &HostEnv {
        &self.env
    }
}

/// Where `anchor`/`relative` lands inside a staging data root.
pub fn staged_path(
    host: &dyn HostAdapter,
    data_root: &Path,
    anchor: &str,
    relative: &Path,
) -> Result<std::path::PathBuf> {
    let prefix = host
        .anchor_prefix(anchor)
        .ok_or_else(|| Error::Validation(format!("unknown anchor '{anchor}'")))?;
    Ok(data_root
        .join(prefix.trim_start_matches('/'))
        .join(relative))
}
