//! TOML component descriptors
//!
//! ```toml
//! name = "foo"
//! type = "package"
//! supported_targets = ["amd64", "arm64-ubuntu"]
//!
//! [source]
//! protocol = "git"
//! url = "https://example.com/foo.git"
//! path = "packaging"
//!
//! [versioning]
//! policy = "semantic-tag"
//!
//! [target.ubuntu]
//! os_release_id = "ubuntu"
//!
//! [metadata.all]
//! maintainer = "Me <me@example.com>"
//!
//! [download.tool.amd64]
//! src = "https://example.com/releases/{{version}}/tool-x86_64"
//! dst = "path://bin/tool"
//! ```
//!
//! Tables keep document order, so overlays with equal rank are applied in
//! the order they are written.

use std::path::PathBuf;
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::target::{HasTarget, Scoped, Target, TargetRegistry, TargetSpec, rank};
use crate::{HostEnv, SchemaError};

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9_]+$").expect("identifier pattern compiles"));

/// Whether `s` is a non-empty `[a-z0-9_]` identifier.
pub fn is_identifier(s: &str) -> bool {
    IDENTIFIER.is_match(s)
}

/// What a component publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    /// An ordinary package.
    Package,
    /// A package that configures an additional APT source.
    Repository,
}

/// Upstream transport. Only git today.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// A git remote.
    #[default]
    Git,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Git => f.write_str("git"),
        }
    }
}

/// Where a component's sources live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceCoordinate {
    /// Transport for `url`.
    #[serde(default)]
    pub protocol: Protocol,
    /// Remote URL.
    pub url: String,
    /// Directory inside the remote holding the packaging tree; empty means
    /// the repository root.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
}

/// How a component is pinned to a concrete version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "kebab-case")]
pub enum VersioningPolicy {
    /// Highest SemVer tag; a leading `v` is accepted.
    #[default]
    SemanticTag,
    /// Head of `branch`; the version is the committer Unix timestamp.
    LatestCommit {
        /// Branch to follow.
        branch: String,
    },
}

/// Control fields a target may contribute. The set is closed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
#[allow(missing_docs)]
pub struct MetadataOverlay {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintainer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommends: Option<String>,
}

impl MetadataOverlay {
    fn slots(&self) -> [&Option<String>; 8] {
        [
            &self.depends,
            &self.section,
            &self.priority,
            &self.homepage,
            &self.maintainer,
            &self.description,
            &self.architecture,
            &self.recommends,
        ]
    }

    fn slots_mut(&mut self) -> [&mut Option<String>; 8] {
        [
            &mut self.depends,
            &mut self.section,
            &mut self.priority,
            &mut self.homepage,
            &mut self.maintainer,
            &mut self.description,
            &mut self.architecture,
            &mut self.recommends,
        ]
    }

    /// Fill every field that is still empty from `other`.
    pub fn fill_from(&mut self, other: &Self) {
        for (mine, theirs) in self.slots_mut().into_iter().zip(other.slots()) {
            if mine.as_deref().is_some_and(|v| !v.is_empty()) {
                continue;
            }
            if let Some(value) = theirs.as_deref().filter(|v| !v.is_empty()) {
                *mine = Some(value.to_string());
            }
        }
    }

    /// First-writer-wins merge over overlays already in ranked order.
    pub fn merge_ranked<'a>(overlays: impl IntoIterator<Item = &'a Self>) -> Self {
        let mut merged = Self::default();
        for overlay in overlays {
            merged.fill_from(overlay);
        }
        merged
    }
}

/// A file fetched into the staging tree at build time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DownloadEntry {
    /// `http(s)` URL; `{{version}}` and `{{commit}}` expand to the pin.
    pub src: String,
    /// `path://<anchor>/<relative path>`.
    pub dst: String,
}

/// A decoded `path://<anchor>/<relative>` destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathUrl {
    /// Anchor name, e.g. `bin`.
    pub anchor: String,
    /// Path below the anchor's prefix.
    pub path: String,
}

impl std::str::FromStr for PathUrl {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((scheme, rest)) = s.split_once("://") else {
            return Err(SchemaError::validation(format!(
                "download destination '{s}' is not a URL"
            )));
        };
        if scheme != "path" {
            return Err(SchemaError::validation(format!(
                "download destination '{s}' must use the path:// scheme"
            )));
        }
        let (anchor, path) = rest.split_once('/').unwrap_or((rest, ""));
        if !is_identifier(anchor) {
            return Err(SchemaError::validation(format!(
                "download destination '{s}' has an invalid anchor"
            )));
        }
        if path.is_empty() || path.split('/').any(|part| part.is_empty() || part == "..") {
            return Err(SchemaError::validation(format!(
                "download destination '{s}' needs a relative file path"
            )));
        }
        Ok(Self {
            anchor: anchor.to_string(),
            path: path.to_string(),
        })
    }
}

/// A directory from the component's tree layered into staging under an
/// anchor when its target applies. Discovered from `<anchor>.<target-expr>`
/// directory names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMap {
    /// Anchor the directory's contents land under.
    pub anchor: String,
    /// Scope parsed from the directory name.
    pub target: Target,
    /// Directory on disk.
    pub dir: PathBuf,
}

impl HasTarget for FileMap {
    fn target(&self) -> &Target {
        &self.target
    }
}

/// A download whose target applies to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDownload {
    /// Entry name from the descriptor.
    pub name: String,
    /// Source URL template.
    pub src: String,
    /// Decoded destination.
    pub dst: PathUrl,
}

/// A descriptor narrowed to one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedComponent {
    /// Merged metadata.
    pub metadata: MetadataOverlay,
    /// Best-ranked entry per download name.
    pub downloads: Vec<ResolvedDownload>,
    /// Applicable file maps, most specific first.
    pub file_maps: Vec<FileMap>,
}

fn default_supported_targets() -> Vec<String> {
    vec![crate::target::ALL.to_string()]
}

/// A registered component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentDescriptor {
    /// Component and package name.
    pub name: String,
    /// Package or repository.
    #[serde(rename = "type")]
    pub kind: ComponentKind,
    /// Target expressions this component builds for.
    #[serde(default = "default_supported_targets")]
    pub supported_targets: Vec<String>,
    /// Upstream coordinate.
    pub source: SourceCoordinate,
    /// Pinning policy.
    #[serde(default)]
    pub versioning: VersioningPolicy,
    /// User-defined targets.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub target: IndexMap<String, TargetSpec>,
    /// Metadata overlays by target expression.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub metadata: IndexMap<String, MetadataOverlay>,
    /// Downloads by name, then by target expression.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub download: IndexMap<String, IndexMap<String, DownloadEntry>>,
    /// File maps found in the source tree; never serialized.
    #[serde(skip)]
    pub file_maps: Vec<FileMap>,
}

impl ComponentDescriptor {
    /// Parse and validate descriptor text.
    pub fn parse(text: &str) -> Result<Self, SchemaError> {
        let descriptor: Self = toml::from_str(text).map_err(SchemaError::parse)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Render back to TOML. File maps are not part of the text form.
    pub fn emit(&self) -> Result<String, SchemaError> {
        toml::to_string(self).map_err(SchemaError::parse)
    }

    /// Registry of built-in and user targets for this descriptor.
    pub fn targets(&self) -> Result<TargetRegistry, SchemaError> {
        TargetRegistry::with_user_targets(&self.target)
    }

    /// Check names, target references, download destinations and the
    /// versioning companion fields.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if !is_identifier(&self.name) {
            return Err(SchemaError::validation(format!(
                "component name '{}' must match [a-z0-9_]+",
                self.name
            )));
        }
        if self.source.url.trim().is_empty() {
            return Err(SchemaError::parse(format!(
                "{}: source.url is required",
                self.name
            )));
        }
        if let VersioningPolicy::LatestCommit { branch } = &self.versioning {
            if branch.trim().is_empty() {
                return Err(SchemaError::validation(format!(
                    "{}: latest-commit versioning needs a branch",
                    self.name
                )));
            }
        }

        let registry = self.targets()?;
        if self.supported_targets.is_empty() {
            return Err(SchemaError::validation(format!(
                "{}: supported_targets is empty",
                self.name
            )));
        }
        for expr in &self.supported_targets {
            registry.resolve(expr)?;
        }
        for expr in self.metadata.keys() {
            registry.resolve(expr)?;
        }
        for (name, entries) in &self.download {
            if !is_identifier(name) {
                return Err(SchemaError::validation(format!(
                    "{}: download name '{name}' must match [a-z0-9_]+",
                    self.name
                )));
            }
            for (expr, entry) in entries {
                registry.resolve(expr)?;
                entry.dst.parse::<PathUrl>()?;
                if !(entry.src.starts_with("http://") || entry.src.starts_with("https://")) {
                    return Err(SchemaError::validation(format!(
                        "{}: download '{name}' source '{}' is not an http(s) URL",
                        self.name, entry.src
                    )));
                }
            }
        }
        Ok(())
    }

    /// Whether any supported target applies to `host`.
    pub fn supports(&self, host: &HostEnv) -> Result<bool, SchemaError> {
        let registry = self.targets()?;
        for expr in &self.supported_targets {
            if registry.resolve(expr)?.applies_to(host) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Attach file maps from `(directory name, path)` pairs.
    ///
    /// Names without a `.` or whose anchor part is not an identifier are
    /// ordinary directories and are skipped; an anchored name whose target
    /// expression does not resolve is an error.
    pub fn with_file_maps(
        mut self,
        dirs: impl IntoIterator<Item = (String, PathBuf)>,
    ) -> Result<Self, SchemaError> {
        let registry = self.targets()?;
        let mut maps = Vec::new();
        for (dir_name, path) in dirs {
            let Some((anchor, expr)) = dir_name.split_once('.') else {
                continue;
            };
            if !is_identifier(anchor) {
                continue;
            }
            let target = registry.resolve(expr).map_err(|e| {
                SchemaError::validation(format!("file map '{dir_name}': {e}"))
            })?;
            maps.push((
                dir_name.clone(),
                FileMap {
                    anchor: anchor.to_string(),
                    target,
                    dir: path,
                },
            ));
        }
        maps.sort_by(|a, b| a.0.cmp(&b.0));
        self.file_maps = maps.into_iter().map(|(_, map)| map).collect();
        Ok(self)
    }

    /// Merged metadata for `host`.
    pub fn metadata_for(&self, host: &HostEnv) -> Result<MetadataOverlay, SchemaError> {
        let overlays = self.scoped(&self.metadata)?;
        let ranked = rank(&overlays, host);
        Ok(MetadataOverlay::merge_ranked(ranked.into_iter().map(|s| s.value)))
    }

    /// Narrow the descriptor to what applies on `host`.
    pub fn resolve_for(&self, host: &HostEnv) -> Result<ResolvedComponent, SchemaError> {
        let metadata = self.metadata_for(host)?;

        let mut downloads = Vec::new();
        for (name, entries) in &self.download {
            let scoped = self.scoped(entries)?;
            if let Some(best) = rank(&scoped, host).first() {
                downloads.push(ResolvedDownload {
                    name: name.clone(),
                    src: best.value.src.clone(),
                    dst: best.value.dst.parse()?,
                });
            }
        }

        let file_maps = rank(&self.file_maps, host).into_iter().cloned().collect();

        Ok(ResolvedComponent {
            metadata,
            downloads,
            file_maps,
        })
    }

    fn scoped<'a, T>(
        &self,
        table: &'a IndexMap<String, T>,
    ) -> Result<Vec<Scoped<&'a T>>, SchemaError> {
        let registry = self.targets()?;
        table
            .iter()
            .map(|(expr, value)| {
                Ok(Scoped {
                    target: registry.resolve(expr)?,
                    value,
                })
            })
            .collect()
    }
}

impl std::str::FromStr for ComponentDescriptor {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Arch;

    const FULL: &str = r#"
name = "foo"
type = "package"
supported_targets = ["amd64", "arm64-ubuntu"]

[source]
url = "https://example.com/foo.git"
path = "packaging"

[versioning]
policy = "latest-commit"
branch = "main"

[target.ubuntu]
os_release_id = "ubuntu"

[metadata.all]
maintainer = "Me"
description = "Foo"

[metadata.amd64]
architecture = "amd64"

[metadata.arm64-ubuntu]
maintainer = "Them"

[download.tool.all]
src = "https://example.com/{{version}}/tool"
dst = "path://bin/tool"

[download.tool.amd64]
src = "https://example.com/{{version}}/tool-x86_64"
dst = "path://bin/tool"
"#;

    fn ubuntu(arch: Arch) -> HostEnv {
        HostEnv::new(arch).with_id("ubuntu")
    }

    #[test]
    fn parses_full_descriptor() {
        let d = ComponentDescriptor::parse(FULL).unwrap();
        assert_eq!(d.kind, ComponentKind::Package);
        assert_eq!(d.source.protocol, Protocol::Git);
        assert_eq!(
            d.versioning,
            VersioningPolicy::LatestCommit {
                branch: "main".into()
            }
        );
        assert_eq!(d.metadata.len(), 3);
        assert_eq!(d.download["tool"].len(), 2);
    }

    #[test]
    fn defaults_apply_to_minimal_descriptor() {
        let d = ComponentDescriptor::parse(
            "name = \"bar\"\ntype = \"repository\"\n[source]\nurl = \"https://x/bar.git\"\n",
        )
        .unwrap();
        assert_eq!(d.supported_targets, vec!["all"]);
        assert_eq!(d.versioning, VersioningPolicy::SemanticTag);
        assert!(d.metadata.is_empty());
        assert!(d.supports(&HostEnv::new(Arch::Arm64)).unwrap());
    }

    #[test]
    fn emit_then_parse_is_identity() {
        let d = ComponentDescriptor::parse(FULL).unwrap();
        let text = d.emit().unwrap();
        assert_eq!(ComponentDescriptor::parse(&text).unwrap(), d);
    }

    #[test]
    fn merged_metadata_follows_rank() {
        let d = ComponentDescriptor::parse(FULL).unwrap();

        let amd = d.metadata_for(&ubuntu(Arch::Amd64)).unwrap();
        assert_eq!(amd.maintainer.as_deref(), Some("Me"));
        assert_eq!(amd.architecture.as_deref(), Some("amd64"));
        assert_eq!(amd.description.as_deref(), Some("Foo"));

        let arm = d.metadata_for(&ubuntu(Arch::Arm64)).unwrap();
        assert_eq!(arm.maintainer.as_deref(), Some("Them"));
        assert_eq!(arm.architecture, None);
    }

    #[test]
    fn equal_rank_overlays_apply_in_document_order() {
        let text = |first: &str, second: &str| {
            format!(
                "name = \"foo\"\ntype = \"package\"\n[source]\nurl = \"https://x/foo.git\"\n\
                 [target.ubuntu]\nos_release_id = \"ubuntu\"\n\
                 [metadata.{first}]\nmaintainer = \"{first}\"\n\
                 [metadata.{second}]\nmaintainer = \"{second}\"\n"
            )
        };
        let host = ubuntu(Arch::Amd64);

        let d = ComponentDescriptor::parse(&text("ubuntu", "amd64")).unwrap();
        let keys: Vec<_> = d.metadata.keys().map(String::as_str).collect();
        assert_eq!(keys, ["ubuntu", "amd64"]);
        assert_eq!(d.metadata_for(&host).unwrap().maintainer.as_deref(), Some("ubuntu"));

        let d = ComponentDescriptor::parse(&text("amd64", "ubuntu")).unwrap();
        assert_eq!(d.metadata_for(&host).unwrap().maintainer.as_deref(), Some("amd64"));
    }

    #[test]
    fn best_download_wins_per_name() {
        let d = ComponentDescriptor::parse(FULL).unwrap();
        let resolved = d.resolve_for(&ubuntu(Arch::Amd64)).unwrap();
        assert_eq!(resolved.downloads.len(), 1);
        assert!(resolved.downloads[0].src.ends_with("tool-x86_64"));
        assert_eq!(resolved.downloads[0].dst.anchor, "bin");

        let resolved = d.resolve_for(&ubuntu(Arch::Arm64)).unwrap();
        assert!(resolved.downloads[0].src.ends_with("/tool"));
    }

    #[test]
    fn supported_targets_gate_hosts() {
        let d = ComponentDescriptor::parse(FULL).unwrap();
        assert!(d.supports(&ubuntu(Arch::Arm64)).unwrap());
        assert!(!d.supports(&HostEnv::new(Arch::Arm64).with_id("debian")).unwrap());
    }

    #[test]
    fn rejects_invalid_descriptors() {
        let base = "type = \"package\"\n[source]\nurl = \"https://x/y.git\"\n";

        let bad_name = format!("name = \"Foo-Bar\"\n{base}");
        assert!(matches!(
            ComponentDescriptor::parse(&bad_name),
            Err(SchemaError::Validation(_))
        ));

        let unknown_target = format!("name = \"foo\"\n{base}[metadata.fedora]\nsection = \"x\"\n");
        assert!(matches!(
            ComponentDescriptor::parse(&unknown_target),
            Err(SchemaError::Validation(_))
        ));

        let reserved = format!("name = \"foo\"\n{base}[target.all]\narch = \"amd64\"\n");
        assert!(matches!(
            ComponentDescriptor::parse(&reserved),
            Err(SchemaError::Validation(_))
        ));

        let bad_dst = format!(
            "name = \"foo\"\n{base}[download.x.all]\nsrc = \"https://a/b\"\ndst = \"file:///etc/x\"\n"
        );
        assert!(matches!(
            ComponentDescriptor::parse(&bad_dst),
            Err(SchemaError::Validation(_))
        ));

        let no_branch = format!("name = \"foo\"\n{base}[versioning]\npolicy = \"latest-commit\"\n");
        assert!(matches!(
            ComponentDescriptor::parse(&no_branch),
            Err(SchemaError::Parse(_))
        ));

        let unknown_field = format!("name = \"foo\"\n{base}[metadata.all]\nlicense = \"MIT\"\n");
        assert!(matches!(
            ComponentDescriptor::parse(&unknown_field),
            Err(SchemaError::Parse(_))
        ));

        let unknown_kind = "name = \"foo\"\ntype = \"plugin\"\n[source]\nurl = \"https://x\"\n";
        assert!(matches!(
            ComponentDescriptor::parse(unknown_kind),
            Err(SchemaError::Parse(_))
        ));
    }

    #[test]
    fn path_urls_are_decoded_and_checked() {
        let url: PathUrl = "path://share/doc/foo/README".parse().unwrap();
        assert_eq!(url.anchor, "share");
        assert_eq!(url.path, "doc/foo/README");

        assert!("path://bin/../../etc/passwd".parse::<PathUrl>().is_err());
        assert!("path://bin".parse::<PathUrl>().is_err());
        assert!("https://bin/tool".parse::<PathUrl>().is_err());
    }

    #[test]
    fn file_maps_come_from_directory_names() {
        let d = ComponentDescriptor::parse(FULL).unwrap();
        let d = d
            .with_file_maps([
                ("root.all".to_string(), PathBuf::from("/w/root.all")),
                ("etc.amd64-ubuntu".to_string(), PathBuf::from("/w/etc.amd64-ubuntu")),
                ("README".to_string(), PathBuf::from("/w/README")),
                ("share.arm64".to_string(), PathBuf::from("/w/share.arm64")),
            ])
            .unwrap();
        assert_eq!(d.file_maps.len(), 3);

        let resolved = d.resolve_for(&ubuntu(Arch::Amd64)).unwrap();
        let anchors: Vec<_> = resolved
            .file_maps
            .iter()
            .map(|m| m.anchor.as_str())
            .collect();
        assert_eq!(anchors, vec!["etc", "root"]);

        let err = ComponentDescriptor::parse(FULL)
            .unwrap()
            .with_file_maps([("root.plan9".to_string(), PathBuf::from("/w/root.plan9"))])
            .unwrap_err();
        assert!(matches!(err, SchemaError::Validation(_)));
    }
}
