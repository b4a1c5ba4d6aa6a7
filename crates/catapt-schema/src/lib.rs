//! Data model and text formats shared by the catapt engine and server.
//!
//! Nothing in this crate touches the network or spawns processes; the only
//! filesystem access is what callers hand in explicitly.

pub mod arch;
pub mod control;
pub mod descriptor;
pub mod error;
pub mod hash;
pub mod host;
pub mod target;
pub mod types;

// Re-exports
pub use arch::*;
pub use control::Paragraph;
pub use descriptor::{
    ComponentDescriptor, ComponentKind, DownloadEntry, FileMap, MetadataOverlay, PathUrl, Protocol,
    ResolvedComponent, ResolvedDownload, SourceCoordinate, VersioningPolicy,
};
pub use error::SchemaError;
pub use hash::Sha256Hash;
pub use host::HostEnv;
pub use target::{HasTarget, Scoped, Target, TargetRegistry, TargetSpec, rank};
pub use types::*;

/// Name of the single APT component every archive publishes.
pub const ARCHIVE_COMPONENT: &str = "packages";
