//! zipvfs serves the contents of a ZIP archive as a read-only file system.
//! The archive can be a file of its own, or it can be appended to the end
//! of the running executable, so a program can carry its assets inside itself:
//!
//! ```no_run
//! # use std::io::Read;
//! # use zipvfs::*;
//! // Look for an archive glued onto our own binary,
//! let fs = ZipFileSystem::embedded()?;
//!
//! // then open files in it by their absolute path.
//! let mut index = fs.open("/static/index.html")?;
//! let mut html = String::new();
//! index.read_to_string(&mut html)?;
//!
//! // Directories list their contents, a page at a time if you'd like.
//! let mut dir = fs.open("/static")?;
//! for info in dir.read_dir(-1)? {
//!     println!("{} ({} bytes)", info.name(), info.size());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Building such a binary is just a matter of concatenating it with an archive:
//! `cat server assets.zip > server-with-assets`.
//! ZIP archives are read from the back, and their central directory says how big
//! they are, so we can find where the archive starts without any help.
//! (See [`locate()`].)
//!
//! Archives can also come from any other [`ReadAt`] source:
//!
//! ```no_run
//! # use std::fs;
//! # use zipvfs::*;
//! let bytes = fs::read("assets.zip")?;
//! let fs = ZipFileSystem::new(ZipArchive::new(bytes)?);
//!
//! // Paths live in a trie, so they can be searched too.
//! let stylesheets = fs.paths_with_prefix("/css/");
//! let likely = fs.fuzzy_find("idxhtml");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Stored (uncompressed) files are read straight out of the source and can be seeked.
//! Deflated files are decompressed as they're read, and have their CRC-32 checked
//! once they've been read to the end.
//! Nothing is locked after the archive is indexed,
//! so any number of threads can open and read files at once.

pub mod archive;
pub mod file;
pub mod fs;
pub mod locate;
pub mod result;
pub mod source;
pub mod trie;

mod arch;
mod crc_reader;
mod format;

pub use archive::{CompressionMethod, Entry, ZipArchive};
pub use file::{DirHandle, File, FileInfo};
pub use fs::{open_or_embedded, prefix, FileSystem, Prefixed, ZipFileSystem};
pub use locate::{locate, ArchiveRange};
pub use result::{ZipError, ZipResult};
pub use source::{ReadAt, SectionReader};
pub use trie::PathTrie;
