use serde::{Deserialize, Serialize};

use crate::Arch;

/// The environment packages are built for: architecture plus the four
/// `os-release` slots targets may match on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEnv {
    /// Processor architecture.
    pub arch: Arch,
    /// `ID` from `os-release` (e.g. `ubuntu`).
    #[serde(default)]
    pub os_release_id: String,
    /// `VERSION` from `os-release`.
    #[serde(default)]
    pub os_release_version: String,
    /// `VERSION_ID` from `os-release` (e.g. `24.04`).
    #[serde(default)]
    pub os_release_version_id: String,
    /// `VERSION_CODENAME` from `os-release` (e.g. `noble`).
    #[serde(default)]
    pub os_release_version_codename: String,
}

impl HostEnv {
    /// A host with only the architecture known.
    pub fn new(arch: Arch) -> Self {
        Self {
            arch,
            os_release_id: String::new(),
            os_release_version: String::new(),
            os_release_version_id: String::new(),
            os_release_version_codename: String::new(),
        }
    }

    /// Set the `os-release` ID.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.os_release_id = id.into();
        self
    }

    /// Set the `os-release` version ID.
    pub fn with_version_id(mut self, version_id: impl Into<String>) -> Self {
        self.os_release_version_id = version_id.into();
        self
    }

    /// Set the `os-release` codename.
    pub fn with_codename(mut self, codename: impl Into<String>) -> Self {
        self.os_release_version_codename = codename.into();
        self
    }

    /// Fill the OS slots from the text of an `os-release` file.
    ///
    /// Unknown keys are ignored; values may be quoted.
    pub fn with_os_release(mut self, text: &str) -> Self {
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches(|c| c == '"' || c == '\'').to_string();
            match key.trim() {
                "ID" => self.os_release_id = value,
                "VERSION" => self.os_release_version = value,
                "VERSION_ID" => self.os_release_version_id = value,
                "VERSION_CODENAME" => self.os_release_version_codename = value,
                _ => {}
            }
        }
        self
    }
}
