//! The catapt catalogue engine.
//!
//! Turns registered components into pinned, built `.deb` packages and the
//! APT index files that describe them:
//!
//! - [`source`] materializes working copies and picks a version ([`source::Pinner`]).
//! - [`builder`] stages file maps and downloads and assembles the package.
//! - [`cache`] makes sure each name/version/commit is built once.
//! - [`engine`] wires these into a per-component refresh.
//! - [`indexer`] fans out over the catalogue and renders `Packages` and
//!   `Release`, signed by [`signing`].
//!
//! All filesystem access goes through the [`disk::Disk`] sandbox.

pub mod builder;
pub mod cache;
pub mod catalogue;
pub mod disk;
pub mod download;
pub mod engine;
pub mod error;
pub mod host;
pub mod indexer;
pub mod scratch;
pub mod signing;
pub mod source;

pub use error::{Error, ErrorKind, Result};
