//! The archive as a file system: path lookups, directory listings,
//! and file reads.
//!
//! Paths are absolute and `/`-separated: `/` is the root,
//! `/dir/file.txt` is `dir/file.txt` in the archive.
//! Directories exist wherever some entry implies them,
//! whether or not the archive has an entry for the directory itself.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use camino::Utf8PathBuf;
use chrono::NaiveDateTime;
use log::*;

use crate::archive::{CompressionMethod, Entry, ZipArchive};
use crate::file::*;
use crate::result::*;
use crate::source::ReadAt;
use crate::trie::PathTrie;

/// Mode of directories that only exist because of their contents
const SYNTHETIC_DIR_MODE: u32 = 0o755;
/// Mode of the root directory
const ROOT_MODE: u32 = 0o777;

/// Something paths can be opened in.
pub trait FileSystem {
    /// Opens the file or directory at the absolute path `path`.
    fn open(&self, path: &str) -> ZipResult<File>;
}

impl<F: FileSystem + ?Sized> FileSystem for &F {
    fn open(&self, path: &str) -> ZipResult<File> {
        (**self).open(path)
    }
}

impl<F: FileSystem + ?Sized> FileSystem for Box<F> {
    fn open(&self, path: &str) -> ZipResult<File> {
        (**self).open(path)
    }
}

impl<F: FileSystem + ?Sized> FileSystem for Arc<F> {
    fn open(&self, path: &str) -> ZipResult<File> {
        (**self).open(path)
    }
}

/// What a path in the archive leads to
#[derive(Debug)]
enum Node {
    /// Index into the archive's entries
    File(usize),
    Directory(Arc<DirNode>),
}

#[derive(Debug)]
struct DirNode {
    info: FileInfo,
    /// Immediate children, named relative to the directory, sorted by name
    children: Arc<[FileInfo]>,
}

/// A read-only file system over the contents of a ZIP archive.
///
/// Everything is indexed up front, so opening files afterwards
/// is just a lookup, and any number of threads can do it at once.
pub struct ZipFileSystem {
    archive: ZipArchive,
    paths: PathTrie<Node>,
    seekable: bool,
}

impl ZipFileSystem {
    /// Indexes the archive. Stored (uncompressed) files can be seeked
    /// since they're read straight from the archive's source.
    pub fn new(archive: ZipArchive) -> Self {
        Self::build(archive, true)
    }

    /// Like `new()`, but every file is opened as a front-to-back stream.
    pub fn without_seeking(archive: ZipArchive) -> Self {
        Self::build(archive, false)
    }

    /// Opens the archive at `path`.
    pub fn open_path<P: AsRef<Path>>(path: P) -> ZipResult<Self> {
        let path = path.as_ref();
        info!("Opening archive {}", path.display());
        let file = std::fs::File::open(path)?;
        Ok(Self::new(ZipArchive::new(file)?))
    }

    /// Opens the archive appended to the running executable.
    pub fn embedded() -> ZipResult<Self> {
        Ok(Self::new(ZipArchive::embedded()?))
    }

    /// Opens an archive from any source, ignoring whatever precedes it.
    pub fn from_source<R: ReadAt + 'static>(source: R) -> ZipResult<Self> {
        Ok(Self::new(ZipArchive::with_prepended_data(source)?.0))
    }

    fn build(archive: ZipArchive, seekable: bool) -> Self {
        let built_at = chrono::Local::now().naive_local();
        let mut paths = PathTrie::new();

        // Archive-relative directory paths ("" is the root),
        // mapped to their own entry if the archive has one.
        let mut directories: BTreeMap<String, Option<usize>> = BTreeMap::new();
        directories.insert(String::new(), None);

        for (index, entry) in archive.entries().iter().enumerate() {
            let relative = match relative_path(entry) {
                Some(r) => r,
                None => {
                    warn!("Skipping entry with unusable path {:?}", entry.name());
                    continue;
                }
            };

            for (i, _) in relative.match_indices('/') {
                directories.entry(relative[..i].to_owned()).or_insert(None);
            }

            if entry.is_dir() {
                directories.insert(relative.to_owned(), Some(index));
            } else if paths
                .insert(&format!("/{relative}"), Node::File(index))
                .is_some()
            {
                warn!("Duplicate entry for {}, using the last one", relative);
            }
        }

        // Children sort after their parents, so going backwards
        // means every subdirectory is in the trie before its parent is listed.
        for (relative, own_entry) in directories.iter().rev() {
            let key = format!("/{relative}");
            let children_prefix = if relative.is_empty() {
                String::from("/")
            } else {
                format!("/{relative}/")
            };

            let mut children: Vec<FileInfo> = paths
                .prefix_search(&children_prefix)
                .into_iter()
                .filter_map(|child| {
                    let name = &child[children_prefix.len()..];
                    if name.is_empty() || name.contains('/') {
                        return None;
                    }
                    match paths.get(&child)? {
                        Node::File(i) => Some(FileInfo::from_entry(&archive.entries()[*i], name)),
                        Node::Directory(d) => Some(d.info.renamed(name)),
                    }
                })
                .collect();
            children.sort_by(|a, b| a.name().cmp(b.name()));

            let info = dir_info(relative, own_entry.map(|i| &archive.entries()[i]), built_at);
            trace!("{} has {} children", key, children.len());
            let dir = DirNode {
                info,
                children: children.into(),
            };
            if let Some(Node::File(_)) = paths.insert(&key, Node::Directory(Arc::new(dir))) {
                warn!("{} is both a file and a directory, keeping the directory", key);
            }
        }

        debug!(
            "Indexed {} paths from {} entries",
            paths.len(),
            archive.entries().len()
        );
        Self {
            archive,
            paths,
            seekable,
        }
    }

    /// The archive being served
    pub fn archive(&self) -> &ZipArchive {
        &self.archive
    }

    /// Stats a path without opening it.
    pub fn stat(&self, path: &str) -> ZipResult<FileInfo> {
        match self.lookup(path)? {
            Node::File(i) => {
                let entry = &self.archive.entries()[*i];
                Ok(FileInfo::from_entry(entry, base_name(path)))
            }
            Node::Directory(d) => Ok(d.info.clone()),
        }
    }

    /// Every file and directory path starting with `prefix`, shortest first.
    pub fn paths_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.paths.prefix_search(prefix)
    }

    /// Every path containing the characters of `pattern` in order, shortest first.
    pub fn fuzzy_find(&self, pattern: &str) -> Vec<String> {
        self.paths.fuzzy_search(pattern)
    }

    fn lookup(&self, path: &str) -> ZipResult<&Node> {
        if !path.starts_with('/') {
            return Err(ZipError::NotFound(path.into()));
        }
        self.paths
            .get(path)
            .ok_or_else(|| ZipError::NotFound(path.into()))
    }

    fn open_file(&self, path: &str, entry: &Entry) -> ZipResult<File> {
        let info = FileInfo::from_entry(entry, base_name(path));
        let path = Utf8PathBuf::from(path);

        if self.seekable
            && entry.compression_method == CompressionMethod::Stored
            && !entry.encrypted
        {
            debug!("Opening {} in place", path);
            let section = self.archive.raw(entry)?;
            if section.len() != entry.size {
                return Err(ZipError::InvalidArchive(
                    "Stored entry's compressed and uncompressed sizes differ",
                ));
            }
            return Ok(File::Seekable(SeekableFile {
                path,
                info,
                section,
            }));
        }

        debug!("Opening {} as a stream", path);
        let reader = self.archive.read(entry)?;
        Ok(File::Stream(StreamFile { path, info, reader }))
    }
}

impl FileSystem for ZipFileSystem {
    fn open(&self, path: &str) -> ZipResult<File> {
        match self.lookup(path)? {
            Node::File(i) => self.open_file(path, &self.archive.entries()[*i]),
            Node::Directory(d) => Ok(File::Directory(DirHandle::new(
                path.into(),
                d.info.clone(),
                d.children.clone(),
            ))),
        }
    }
}

impl std::fmt::Debug for ZipFileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipFileSystem")
            .field("entries", &self.archive.entries().len())
            .field("paths", &self.paths.len())
            .field("seekable", &self.seekable)
            .finish()
    }
}

/// The entry's path relative to the archive root, without a trailing slash,
/// or `None` if it's empty or has `.`, `..`, or empty components.
fn relative_path(entry: &Entry) -> Option<&str> {
    let trimmed = entry.name().trim_start_matches('/').trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    let usable = trimmed
        .split('/')
        .all(|part| !part.is_empty() && part != "." && part != "..");
    usable.then_some(trimmed)
}

/// Last component of a path, with or without a leading slash,
/// or `/` for the root.
fn base_name(path: &str) -> &str {
    match path.trim_end_matches('/').rsplit('/').next() {
        Some(base) if !base.is_empty() => base,
        _ => "/",
    }
}

fn dir_info(relative: &str, own_entry: Option<&Entry>, built_at: NaiveDateTime) -> FileInfo {
    if relative.is_empty() {
        return FileInfo::synthetic_dir("/", built_at, ROOT_MODE);
    }
    let name = base_name(relative);
    match own_entry {
        Some(entry) => {
            let mut info = FileInfo::from_entry(entry, name);
            // An entry flagged as a directory only by its attributes
            // still gets listed as one.
            if !info.is_dir() {
                info = FileInfo::synthetic_dir(name, entry.last_modified, entry.permissions());
            }
            info
        }
        None => FileInfo::synthetic_dir(name, built_at, SYNTHETIC_DIR_MODE),
    }
}

/// Serves another file system under a fixed path prefix:
/// opening `/x` opens `<prefix>/x` in the inner one.
#[derive(Debug, Clone)]
pub struct Prefixed<F> {
    prefix: String,
    inner: F,
}

/// Mounts `inner` so that `prefix` becomes its root.
///
/// The prefix is normalized to `/a/b` form, so `"a/b/"`, `"/a/b"`, and `"a/b"`
/// are all the same.
pub fn prefix<F: FileSystem>(prefix: &str, inner: F) -> Prefixed<F> {
    let trimmed = prefix.trim_matches('/');
    let prefix = if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    };
    Prefixed { prefix, inner }
}

impl<F> Prefixed<F> {
    /// The normalized prefix (empty for the root)
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn into_inner(self) -> F {
        self.inner
    }

    fn rewrite(&self, path: &str) -> String {
        let joined = format!("{}/{}", self.prefix, path.trim_start_matches('/'));
        let trimmed = joined.trim_end_matches('/');
        if trimmed.is_empty() {
            String::from("/")
        } else {
            trimmed.to_owned()
        }
    }
}

impl<F: FileSystem> FileSystem for Prefixed<F> {
    fn open(&self, path: &str) -> ZipResult<File> {
        self.inner.open(&self.rewrite(path))
    }
}

/// Opens the archive at `path`, or if that fails for any reason,
/// the one appended to the running executable.
///
/// This is handy for programs that ship their assets inside themselves
/// but can be pointed at a loose archive during development.
/// If both fail, the error from the embedded archive is returned.
pub fn open_or_embedded<P: AsRef<Path>>(path: P) -> ZipResult<ZipFileSystem> {
    let path = path.as_ref();
    match ZipFileSystem::open_path(path) {
        Ok(fs) => Ok(fs),
        Err(e) => {
            warn!(
                "Couldn't open {} ({}), looking for an embedded archive",
                path.display(),
                e
            );
            ZipFileSystem::embedded()
        }
    }
}
