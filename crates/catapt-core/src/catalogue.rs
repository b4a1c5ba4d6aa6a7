//! Descriptor store: the registered components and their latest pins.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use catapt_schema::{ComponentDescriptor, Pin};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::disk::{Disk, EntryKind};
use crate::error::{Error, Result, ResultExt};

/// A registered component.
#[derive(Debug)]
pub struct Component {
    descriptor: ComponentDescriptor,
    latest_pin: RwLock<Option<Pin>>,
}

impl Component {
    /// Wrap a parsed descriptor.
    pub fn new(descriptor: ComponentDescriptor) -> Self {
        Self {
            descriptor,
            latest_pin: RwLock::new(None),
        }
    }

    /// Component name.
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// The descriptor as registered (without file maps).
    pub fn descriptor(&self) -> &ComponentDescriptor {
        &self.descriptor
    }

    /// Pin chosen by the most recent successful refresh.
    pub fn latest_pin(&self) -> Option<Pin> {
        self.latest_pin
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record the pin a refresh resolved to.
    pub fn set_latest_pin(&self, pin: Pin) {
        *self
            .latest_pin
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(pin);
    }
}

/// All registered components, keyed by name.
#[derive(Debug, Default)]
pub struct Catalogue {
    components: BTreeMap<String, Arc<Component>>,
}

impl Catalogue {
    /// Load every `*.toml` descriptor below `dir`. Flat and sharded layouts
    /// both work; duplicate names are rejected.
    pub fn load(dir: &Path) -> Result<Self> {
        let mut descriptors = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::Internal(format!("walking {}: {e}", dir.display())))?;
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().is_none_or(|ext| ext != "toml") {
                continue;
            }
            let text = std::fs::read_to_string(path)
                .map_err(|e| Error::Internal(format!("reading {}: {e}", path.display())))?;
            let descriptor = ComponentDescriptor::parse(&text)
                .with_context(|| format!("loading descriptor {}", path.display()))?;
            debug!(name = %descriptor.name, path = %path.display(), "loaded descriptor");
            descriptors.push(descriptor);
        }
        let catalogue = Self::from_descriptors(descriptors)?;
        info!(components = catalogue.len(), dir = %dir.display(), "catalogue loaded");
        Ok(catalogue)
    }

    /// Build from already-parsed descriptors.
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = ComponentDescriptor>) -> Result<Self> {
        let mut components = BTreeMap::new();
        for descriptor in descriptors {
            let name = descriptor.name.clone();
            if components
                .insert(name.clone(), Arc::new(Component::new(descriptor)))
                .is_some()
            {
                return Err(Error::Validation(format!(
                    "component '{name}' is registered twice"
                )));
            }
        }
        Ok(Self { components })
    }

    /// Component by name.
    pub fn get(&self, name: &str) -> Option<Arc<Component>> {
        self.components.get(name).cloned()
    }

    /// Components in name order.
    pub fn components(&self) -> impl Iterator<Item = &Arc<Component>> {
        self.components.values()
    }

    /// Number of registered components.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

/// Attach the file maps found directly under `root` to `descriptor`.
///
/// Directory names of the form `<anchor>.<target-expr>` become file maps.
/// Symlinked entries are included so the sandbox vets them when they are
/// staged.
pub fn discover_file_maps(
    descriptor: ComponentDescriptor,
    root: &Path,
    disk: &Disk,
) -> Result<ComponentDescriptor> {
    let dirs = disk
        .list_dir(root)?
        .into_iter()
        .filter(|(_, kind, _)| matches!(kind, EntryKind::Dir | EntryKind::Symlink))
        .map(|(name, _, path)| (name, path));
    Ok(descriptor.with_file_maps(dirs)?)
}

/// Parse descriptor text and discover its file maps under `root`.
pub fn parse_with_filesystems(text: &str, root: &Path, disk: &Disk) -> Result<ComponentDescriptor> {
    discover_file_maps(ComponentDescriptor::parse(text)?, root, disk)
}
