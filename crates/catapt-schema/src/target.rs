//! Targets: named predicates over host environments.
//!
//! A descriptor scopes its overlays by target expression (`all`, `amd64`,
//! `arm64-ubuntu`, ...). [`rank`] orders scoped items for a host so that
//! consumers can apply a first-writer-wins merge.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Arch, HostEnv, SchemaError, descriptor::is_identifier};

/// Name of the target that matches every host.
pub const ALL: &str = "all";

/// Names that user target tables may not redefine.
pub const RESERVED: [&str; 3] = [ALL, "amd64", "arm64"];

/// The five host slots a target may pin. Unset slots match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetSpec {
    /// Required architecture.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<Arch>,
    /// Required `os-release` ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_release_id: Option<String>,
    /// Required `os-release` version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_release_version: Option<String>,
    /// Required `os-release` version ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_release_version_id: Option<String>,
    /// Required `os-release` codename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_release_version_codename: Option<String>,
}

impl TargetSpec {
    fn os_slots(&self) -> [(&'static str, Option<&str>); 4] {
        [
            ("os_release_id", non_empty(self.os_release_id.as_deref())),
            (
                "os_release_version",
                non_empty(self.os_release_version.as_deref()),
            ),
            (
                "os_release_version_id",
                non_empty(self.os_release_version_id.as_deref()),
            ),
            (
                "os_release_version_codename",
                non_empty(self.os_release_version_codename.as_deref()),
            ),
        ]
    }

    fn os_slots_mut(&mut self) -> [&mut Option<String>; 4] {
        [
            &mut self.os_release_id,
            &mut self.os_release_version,
            &mut self.os_release_version_id,
            &mut self.os_release_version_codename,
        ]
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// A resolved target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Matches every host with the lowest priority.
    All,
    /// Conjunction of the slots set in `spec`.
    Match {
        /// Target name; composites join their parts with `-`.
        name: String,
        /// Required slot values.
        spec: TargetSpec,
    },
}

impl Target {
    /// Target name as written in descriptors.
    pub fn name(&self) -> &str {
        match self {
            Self::All => ALL,
            Self::Match { name, .. } => name,
        }
    }

    /// Whether this is the distinguished `all` target.
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// Score this target against `host`; `None` means not applicable.
    ///
    /// Every slot the target sets must equal the host's value and adds one
    /// point, so the maximum is 5. `all` always scores 0.
    pub fn score(&self, host: &HostEnv) -> Option<u8> {
        let Self::Match { spec, .. } = self else {
            return Some(0);
        };

        let mut score = 0;
        if let Some(arch) = spec.arch {
            if arch != host.arch {
                return None;
            }
            score += 1;
        }

        let have = [
            host.os_release_id.as_str(),
            host.os_release_version.as_str(),
            host.os_release_version_id.as_str(),
            host.os_release_version_codename.as_str(),
        ];
        for ((_, want), have) in spec.os_slots().into_iter().zip(have) {
            match want {
                None => {}
                Some(want) if want == have => score += 1,
                Some(_) => return None,
            }
        }
        Some(score)
    }

    /// Whether this target matches `host` at all.
    pub fn applies_to(&self, host: &HostEnv) -> bool {
        self.score(host).is_some()
    }
}

/// Anything scoped by a target.
pub trait HasTarget {
    /// The target this item is scoped to.
    fn target(&self) -> &Target;
}

impl<T: HasTarget + ?Sized> HasTarget for &T {
    fn target(&self) -> &Target {
        (**self).target()
    }
}

/// A value paired with the target it applies under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scoped<T> {
    /// Scope of `value`.
    pub target: Target,
    /// The scoped value.
    pub value: T,
}

impl<T> HasTarget for Scoped<T> {
    fn target(&self) -> &Target {
        &self.target
    }
}

/// Order `items` for `host`: non-applicable entries are dropped, the rest
/// sorted by descending score. Ties keep input order, except that `all`
/// always follows every other applicable entry.
pub fn rank<T: HasTarget>(items: impl IntoIterator<Item = T>, host: &HostEnv) -> Vec<T> {
    let mut scored: Vec<(u8, bool, T)> = items
        .into_iter()
        .filter_map(|item| {
            let target = item.target();
            let is_all = target.is_all();
            target.score(host).map(|score| (score, is_all, item))
        })
        .collect();

    // sort_by is stable
    scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    scored.into_iter().map(|(_, _, item)| item).collect()
}

/// Built-in and user-defined targets of one descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRegistry {
    targets: BTreeMap<String, Target>,
}

impl Default for TargetRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TargetRegistry {
    /// Registry holding only `all`, `amd64` and `arm64`.
    pub fn builtin() -> Self {
        let mut targets = BTreeMap::new();
        targets.insert(ALL.to_string(), Target::All);
        for arch in [Arch::Amd64, Arch::Arm64] {
            targets.insert(
                arch.as_str().to_string(),
                Target::Match {
                    name: arch.as_str().to_string(),
                    spec: TargetSpec {
                        arch: Some(arch),
                        ..TargetSpec::default()
                    },
                },
            );
        }
        Self { targets }
    }

    /// Built-ins plus user definitions from a descriptor's `target` table.
    pub fn with_user_targets<'a>(
        defs: impl IntoIterator<Item = (&'a String, &'a TargetSpec)>,
    ) -> Result<Self, SchemaError> {
        let mut registry = Self::builtin();
        for (name, spec) in defs {
            if RESERVED.contains(&name.as_str()) {
                return Err(SchemaError::validation(format!(
                    "target name '{name}' is reserved"
                )));
            }
            if !is_identifier(name) {
                return Err(SchemaError::validation(format!(
                    "target name '{name}' must match [a-z0-9_]+"
                )));
            }
            registry.targets.insert(
                name.clone(),
                Target::Match {
                    name: name.clone(),
                    spec: spec.clone(),
                },
            );
        }
        Ok(registry)
    }

    /// Look up a single target by name.
    pub fn get(&self, name: &str) -> Option<&Target> {
        self.targets.get(name)
    }

    /// Merge base targets into one composite.
    ///
    /// Each slot takes the sole value any part sets; differing values are a
    /// conflict. `all` cannot take part in a composite.
    pub fn compose<S: AsRef<str>>(&self, names: &[S]) -> Result<Target, SchemaError> {
        let parts = names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                self.get(name).ok_or_else(|| {
                    SchemaError::validation(format!("unknown target '{name}'"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        match parts.as_slice() {
            [] => Err(SchemaError::validation("empty target expression")),
            [single] => Ok((*single).clone()),
            _ => {
                let mut merged = TargetSpec::default();
                let mut joined = Vec::with_capacity(parts.len());
                for part in parts {
                    let Target::Match { name, spec } = part else {
                        return Err(SchemaError::validation(
                            "target 'all' cannot be combined with other targets",
                        ));
                    };
                    if let Some(arch) = spec.arch {
                        if let Some(existing) = merged.arch.filter(|a| *a != arch) {
                            return Err(SchemaError::validation(format!(
                                "conflicting architectures {existing} and {arch} in '{}'",
                                names_joined(names)
                            )));
                        }
                        merged.arch = Some(arch);
                    }
                    for ((slot, value), current) in
                        spec.os_slots().into_iter().zip(merged.os_slots_mut())
                    {
                        let Some(value) = value else { continue };
                        if let Some(existing) = current.as_deref().filter(|c| *c != value) {
                            return Err(SchemaError::validation(format!(
                                "conflicting {slot} values '{existing}' and '{value}' in '{}'",
                                names_joined(names)
                            )));
                        }
                        *current = Some(value.to_string());
                    }
                    joined.push(name.as_str());
                }
                Ok(Target::Match {
                    name: joined.join("-"),
                    spec: merged,
                })
            }
        }
    }

    /// Resolve a target expression such as `arm64-ubuntu`.
    pub fn resolve(&self, expr: &str) -> Result<Target, SchemaError> {
        let names: Vec<&str> = expr.split('-').collect();
        self.compose(&names)
    }
}

fn names_joined<S: AsRef<str>>(names: &[S]) -> String {
    names.iter().map(AsRef::as_ref).collect::<Vec<_>>().join("-")
}
