//! Open files and directories, and their metadata.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use camino::Utf8PathBuf;
use chrono::NaiveDateTime;

use crate::archive::{Entry, SharedSource};
use crate::result::*;
use crate::source::SectionReader;

/// What `stat` says about a file or directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    name: String,
    size: u64,
    modified: NaiveDateTime,
    mode: u32,
    is_dir: bool,
}

impl FileInfo {
    /// Describes an archive entry under the given (base) name.
    pub(crate) fn from_entry(entry: &Entry, name: &str) -> Self {
        let is_dir = entry.is_dir();
        Self {
            name: name.to_owned(),
            size: if is_dir { 0 } else { entry.size },
            modified: entry.last_modified,
            mode: entry.permissions(),
            is_dir,
        }
    }

    /// Describes a directory that has no entry of its own in the archive.
    pub(crate) fn synthetic_dir(name: &str, modified: NaiveDateTime, mode: u32) -> Self {
        Self {
            name: name.to_owned(),
            size: 0,
            modified,
            mode,
            is_dir: true,
        }
    }

    pub(crate) fn renamed(&self, name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..self.clone()
        }
    }

    /// Base name of the file, or `/` for the root
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Uncompressed size in bytes (0 for directories)
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn modified(&self) -> NaiveDateTime {
        self.modified
    }

    /// Unix-style permission bits
    pub fn mode(&self) -> u32 {
        self.mode
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }
}

/// A file or directory opened from a [`ZipFileSystem`].
///
/// [`ZipFileSystem`]: ../fs/struct.ZipFileSystem.html
pub enum File {
    /// A stored (uncompressed) file read straight out of the source
    Seekable(SeekableFile),
    /// A file decompressed on the fly, front to back
    Stream(StreamFile),
    Directory(DirHandle),
}

impl File {
    pub fn stat(&self) -> FileInfo {
        match self {
            File::Seekable(f) => f.info.clone(),
            File::Stream(f) => f.info.clone(),
            File::Directory(d) => d.info.clone(),
        }
    }

    /// Full path the file was opened with
    pub fn path(&self) -> &Utf8PathBuf {
        match self {
            File::Seekable(f) => &f.path,
            File::Stream(f) => &f.path,
            File::Directory(d) => &d.path,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, File::Directory(_))
    }

    /// Lists up to `count` more directory entries,
    /// or all that remain if `count` is zero or negative.
    ///
    /// Each call picks up where the last left off;
    /// an empty list means the listing is finished.
    pub fn read_dir(&mut self, count: isize) -> ZipResult<Vec<FileInfo>> {
        match self {
            File::Directory(d) => Ok(d.read_dir(count)),
            other => Err(ZipError::NotADirectory(other.path().clone())),
        }
    }

    /// Closes the file.
    ///
    /// Dropping does the same; this is just for symmetry with `open`.
    pub fn close(self) -> ZipResult<()> {
        Ok(())
    }
}

impl Read for File {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            File::Seekable(f) => f.section.read(buf),
            File::Stream(f) => f.reader.read(buf),
            File::Directory(d) => Err(ZipError::NotAFile(d.path.clone()).into()),
        }
    }
}

impl Seek for File {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            File::Seekable(f) => f.section.seek(pos),
            File::Stream(f) => Err(ZipError::SeekUnsupported(f.path.clone()).into()),
            File::Directory(d) => Err(ZipError::NotAFile(d.path.clone()).into()),
        }
    }
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            File::Seekable(_) => "Seekable",
            File::Stream(_) => "Stream",
            File::Directory(_) => "Directory",
        };
        f.debug_struct("File")
            .field("kind", &kind)
            .field("path", self.path())
            .finish()
    }
}

/// A stored file backed directly by the archive's source.
pub struct SeekableFile {
    pub(crate) path: Utf8PathBuf,
    pub(crate) info: FileInfo,
    pub(crate) section: SectionReader<SharedSource>,
}

/// A file read through its decompressor.
pub struct StreamFile {
    pub(crate) path: Utf8PathBuf,
    pub(crate) info: FileInfo,
    pub(crate) reader: Box<dyn Read + Send>,
}

/// An open directory and how far through its listing we've gotten.
///
/// Every `open()` gets its own cursor; the listing itself is shared.
#[derive(Debug, Clone)]
pub struct DirHandle {
    pub(crate) path: Utf8PathBuf,
    pub(crate) info: FileInfo,
    pub(crate) children: Arc<[FileInfo]>,
    pub(crate) position: usize,
}

impl DirHandle {
    pub(crate) fn new(path: Utf8PathBuf, info: FileInfo, children: Arc<[FileInfo]>) -> Self {
        Self {
            path,
            info,
            children,
            position: 0,
        }
    }

    fn read_dir(&mut self, count: isize) -> Vec<FileInfo> {
        let remaining = &self.children[self.position..];
        let take = if count <= 0 {
            remaining.len()
        } else {
            remaining.len().min(count as usize)
        };
        self.position += take;
        remaining[..take].to_vec()
    }

    /// Entries not yet listed
    pub fn remaining(&self) -> usize {
        self.children.len() - self.position
    }
}

impl Iterator for DirHandle {
    type Item = FileInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.children.get(self.position)?.clone();
        self.position += 1;
        Some(next)
    }
}
