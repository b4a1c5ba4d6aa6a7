//! Sandboxed filesystem access.
//!
//! Every primitive resolves its path arguments against the sandbox base and
//! refuses, with [`Error::BlockedPath`], anything that does not end up
//! strictly below it. The check happens before the filesystem is touched.

use std::fs;
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Kind of an existing filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A directory.
    Dir,
    /// A regular file.
    File,
    /// A symbolic link (not followed).
    Symlink,
}

/// One entry yielded by [`Disk::walk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    /// Path relative to the walk root.
    pub relative: PathBuf,
    /// Absolute path.
    pub path: PathBuf,
    /// Entry kind; symlinks are reported, not followed.
    pub kind: EntryKind,
}

/// Filesystem adapter rooted at a canonical base directory.
#[derive(Debug, Clone)]
pub struct Disk {
    base: PathBuf,
}

impl Disk {
    /// Create the base directory if needed and canonicalize it.
    pub fn new(base: impl AsRef<Path>) -> Result<Self> {
        let base = base.as_ref();
        fs::create_dir_all(base).map_err(|e| Error::io("create", base, &e))?;
        let base = fs::canonicalize(base).map_err(|e| Error::io("canonicalize", base, &e))?;
        Ok(Self { base })
    }

    /// Canonical base directory.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Resolve `path` (relative paths are taken from the base) to the
    /// location the OS would actually touch, or fail with `BlockedPath`.
    ///
    /// The longest existing ancestor is canonicalized so symlinks inside
    /// the base cannot point out of it. Dangling symlinks are refused.
    pub fn resolve(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let requested = path.as_ref();
        let lexical = self.lexical(requested);

        let mut existing = lexical.clone();
        let mut tail = Vec::new();
        let canonical = loop {
            match fs::canonicalize(&existing) {
                Ok(canonical) => break canonical,
                Err(_) => {
                    if fs::symlink_metadata(&existing).is_ok() {
                        // present but unresolvable: a dangling link
                        return Err(Error::BlockedPath(requested.to_path_buf()));
                    }
                    let Some(name) = existing.file_name().map(ToOwned::to_owned) else {
                        return Err(Error::BlockedPath(requested.to_path_buf()));
                    };
                    tail.push(name);
                    if !existing.pop() {
                        return Err(Error::BlockedPath(requested.to_path_buf()));
                    }
                }
            }
        };

        let mut resolved = canonical;
        for name in tail.into_iter().rev() {
            resolved.push(name);
        }

        if resolved != self.base && resolved.starts_with(&self.base) {
            Ok(resolved)
        } else {
            Err(Error::BlockedPath(requested.to_path_buf()))
        }
    }

    fn lexical(&self, path: &Path) -> PathBuf {
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base.join(path)
        };
        let mut out = PathBuf::new();
        for component in joined.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    out.pop();
                }
                other => out.push(other.as_os_str()),
            }
        }
        out
    }

    /// Kind of the entry at `path`, or `None` if nothing is there.
    pub fn stat(&self, path: impl AsRef<Path>) -> Result<Option<EntryKind>> {
        let path = path.as_ref();
        self.resolve(path)?;
        let lexical = self.lexical(path);
        match fs::symlink_metadata(&lexical) {
            Ok(meta) if meta.file_type().is_symlink() => Ok(Some(EntryKind::Symlink)),
            Ok(meta) if meta.is_dir() => Ok(Some(EntryKind::Dir)),
            Ok(_) => Ok(Some(EntryKind::File)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io("stat", path, &e)),
        }
    }

    /// Whether anything exists at `path`.
    pub fn exists(&self, path: impl AsRef<Path>) -> Result<bool> {
        Ok(self.stat(path)?.is_some())
    }

    /// `mkdir -p`.
    pub fn create_dir_all(&self, path: impl AsRef<Path>) -> Result<()> {
        let target = self.resolve(&path)?;
        fs::create_dir_all(&target).map_err(|e| Error::io("create", &target, &e))
    }

    /// Write `data` to `path`, replacing any existing file.
    pub fn write(&self, path: impl AsRef<Path>, data: impl AsRef<[u8]>) -> Result<()> {
        let target = self.resolve(&path)?;
        fs::write(&target, data).map_err(|e| Error::io("write", &target, &e))
    }

    /// Read the whole file at `path`.
    pub fn read(&self, path: impl AsRef<Path>) -> Result<Vec<u8>> {
        let target = self.resolve(&path)?;
        fs::read(&target).map_err(|e| Error::io("read", &target, &e))
    }

    /// Open `path` for asynchronous reading.
    pub async fn open(&self, path: impl AsRef<Path>) -> Result<tokio::fs::File> {
        let target = self.resolve(&path)?;
        tokio::fs::File::open(&target)
            .await
            .map_err(|e| Error::io("open", &target, &e))
    }

    /// Copy a file; both ends must be inside the sandbox.
    pub fn copy(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> Result<u64> {
        let source = self.resolve(&from)?;
        let dest = self.resolve(&to)?;
        fs::copy(&source, &dest).map_err(|e| Error::io("copy", &source, &e))
    }

    /// Rename within the sandbox.
    pub fn rename(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> Result<()> {
        let source = self.resolve(&from)?;
        let dest = self.resolve(&to)?;
        fs::rename(&source, &dest).map_err(|e| Error::io("rename", &source, &e))
    }

    /// `rm -rf`; a missing path is not an error.
    pub fn remove_dir_all(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.resolve(path)?;
        let lexical = self.lexical(path);
        match fs::remove_dir_all(&lexical) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io("remove", &lexical, &e)),
        }
    }

    /// Immediate children of a directory as `(name, kind, path)`, sorted by
    /// name.
    pub fn list_dir(&self, path: impl AsRef<Path>) -> Result<Vec<(String, EntryKind, PathBuf)>> {
        let dir = self.resolve(&path)?;
        let read = fs::read_dir(&dir).map_err(|e| Error::io("list", &dir, &e))?;
        let mut entries = Vec::new();
        for entry in read {
            let entry = entry.map_err(|e| Error::io("list", &dir, &e))?;
            let file_type = entry
                .file_type()
                .map_err(|e| Error::io("stat", &entry.path(), &e))?;
            let kind = if file_type.is_symlink() {
                EntryKind::Symlink
            } else if file_type.is_dir() {
                EntryKind::Dir
            } else {
                EntryKind::File
            };
            entries.push((entry.file_name().to_string_lossy().into_owned(), kind, entry.path()));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    /// Every entry below `root` (excluding `root` itself), parents before
    /// children. Symlinks are not followed.
    pub fn walk(&self, root: impl AsRef<Path>) -> Result<Vec<WalkEntry>> {
        let root = self.resolve(&root)?;
        let mut entries = Vec::new();
        for entry in WalkDir::new(&root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| Error::build(format!("walk {}: {e}", root.display())))?;
            let file_type = entry.file_type();
            let kind = if file_type.is_symlink() {
                EntryKind::Symlink
            } else if file_type.is_dir() {
                EntryKind::Dir
            } else {
                EntryKind::File
            };
            let relative = entry
                .path()
                .strip_prefix(&root)
                .map_err(|e| Error::Internal(e.to_string()))?
                .to_path_buf();
            entries.push(WalkEntry {
                relative,
                path: entry.path().to_path_buf(),
                kind,
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn sandbox() -> (tempfile::TempDir, Disk, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("base");
        let outside = tmp.path().join("outside");
        fs::create_dir_all(&outside).unwrap();
        fs::write(outside.join("secret"), b"secret").unwrap();
        let disk = Disk::new(&base).unwrap();
        (tmp, disk, outside)
    }

    fn assert_blocked<T: std::fmt::Debug>(result: Result<T>) {
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BlockedPath, "{err}");
    }

    #[test]
    fn relative_paths_land_under_base() {
        let (_tmp, disk, _) = sandbox();
        disk.create_dir_all("a/b").unwrap();
        disk.write("a/b/c.txt", b"hi").unwrap();
        assert_eq!(disk.read(disk.base().join("a/b/c.txt")).unwrap(), b"hi");
        assert_eq!(disk.stat("a/b").unwrap(), Some(EntryKind::Dir));
        assert_eq!(disk.stat("a/b/c.txt").unwrap(), Some(EntryKind::File));
        assert_eq!(disk.stat("a/missing").unwrap(), None);
    }

    #[test]
    fn escapes_are_refused_without_side_effects() {
        let (_tmp, disk, outside) = sandbox();
        let sneaky = disk.base().join("../outside/new");

        assert_blocked(disk.create_dir_all(&sneaky));
        assert_blocked(disk.write(&sneaky, b"x"));
        assert_blocked(disk.read(outside.join("secret")));
        assert_blocked(disk.rename(outside.join("secret"), "stolen"));
        assert_blocked(disk.copy(outside.join("secret"), "stolen"));
        assert_blocked(disk.remove_dir_all(&outside));
        assert_blocked(disk.stat("/etc"));

        assert!(!outside.join("new").exists());
        assert!(outside.join("secret").exists());
        assert!(!disk.base().join("stolen").exists());
    }

    #[test]
    fn base_itself_is_not_a_descendant() {
        let (_tmp, disk, _) = sandbox();
        assert_blocked(disk.remove_dir_all(disk.base().to_path_buf()));
        assert_blocked(disk.write("a/..", b"x"));
        assert!(disk.base().exists());
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_cannot_point_outside() {
        let (_tmp, disk, outside) = sandbox();
        std::os::unix::fs::symlink(&outside, disk.base().join("link")).unwrap();
        std::os::unix::fs::symlink(outside.join("gone"), disk.base().join("dangling")).unwrap();

        assert_blocked(disk.read("link/secret"));
        assert_blocked(disk.write("link/planted", b"x"));
        assert_blocked(disk.write("dangling", b"x"));
        assert!(!outside.join("planted").exists());
        assert!(!outside.join("gone").exists());

        // dangling links cannot be vetted, so even stat refuses them
        assert_eq!(disk.stat("dangling").unwrap_err().kind(), ErrorKind::BlockedPath);
    }

    #[cfg(unix)]
    #[test]
    fn walk_reports_links_without_following() {
        let (_tmp, disk, outside) = sandbox();
        disk.create_dir_all("tree/etc").unwrap();
        disk.write("tree/etc/conf", b"c").unwrap();
        std::os::unix::fs::symlink(&outside, disk.base().join("tree/escape")).unwrap();

        let entries = disk.walk("tree").unwrap();
        let listed: Vec<_> = entries
            .iter()
            .map(|e| (e.relative.to_string_lossy().into_owned(), e.kind))
            .collect();
        assert_eq!(
            listed,
            vec![
                ("escape".to_string(), EntryKind::Symlink),
                ("etc".to_string(), EntryKind::Dir),
                ("etc/conf".to_string(), EntryKind::File),
            ]
        );
    }
}
