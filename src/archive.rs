//! Tools for reading a ZIP archive.
//!
//! To start reading an archive, first create a [`ZipArchive`] from any
//! [`ReadAt`] source: a file, a byte buffer, or the running executable.
//!
//! [`ZipArchive`]: struct.ZipArchive.html
//! [`ReadAt`]: ../source/trait.ReadAt.html

use std::io;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDateTime;
use flate2::read::DeflateDecoder;
use log::*;

use crate::arch::usize;
use crate::crc_reader::Crc32Reader;
use crate::format::{self, CentralDirectoryEntry, LocalFileHeader, System};
use crate::locate;
use crate::result::*;
use crate::source::{ReadAt, SectionReader};

/// The compression method used to store a file
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompressionMethod {
    /// The file is stored as-is and can be read (and seeked) in place.
    Stored,
    /// The file is [DEFLATE](https://en.wikipedia.org/wiki/DEFLATE)d.
    /// This is the most common format used by ZIP archives.
    Deflate,
    /// The file is compressed with a yet-unsupported format.
    /// (The u16 indicates the internal format code.)
    Unsupported(u16),
}

impl CompressionMethod {
    fn from_u16(u: u16) -> Self {
        match u {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            v => CompressionMethod::Unsupported(v),
        }
    }
}

/// A source shared between the archive and every file opened from it
pub type SharedSource = Arc<dyn ReadAt>;

/// Metadata for a file or directory in the archive,
/// retrieved from its central directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The path of the entry as stored in the archive.
    /// Directories conventionally end in `/`.
    pub path: Utf8PathBuf,

    /// Uncompressed size of the file in bytes
    pub size: u64,

    /// Compressed size of the file in bytes
    pub compressed_size: u64,

    /// Compression algorithm used to store the file
    pub compression_method: CompressionMethod,

    /// The CRC-32 of the decompressed file
    pub crc32: u32,

    /// True if the file is encrypted (decryption is unsupported)
    pub encrypted: bool,

    /// When the file was last modified, in the archiver's local time
    pub last_modified: NaiveDateTime,

    /// Unix mode bits, if the file was archived in a Unix OS.
    pub unix_mode: Option<u32>,

    /// MS-DOS attribute byte from the external attributes
    pub(crate) dos_attributes: u8,

    /// The offset to the local file header in the archive
    pub(crate) header_offset: u64,
}

const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;
const DOS_READ_ONLY: u8 = 0x01;
const DOS_DIRECTORY: u8 = 0x10;

impl Entry {
    /// Extracts an `Entry` from a central directory entry
    pub(crate) fn from_cde(cde: &CentralDirectoryEntry) -> ZipResult<Self> {
        let path = Utf8PathBuf::from(format::decode_name(cde.path, cde.flags)?);

        if cde.disk_number != 0 {
            return Err(ZipError::UnsupportedArchive(format!(
                "No support for multi-disk archives: file {} claims to be on disk {}",
                path, cde.disk_number,
            )));
        }

        let zip64 = format::parse_zip64_extra(cde.extra_field, cde)?;

        let unix_mode = match System::from_source_version(cde.source_version) {
            System::Unix => Some(cde.external_file_attributes >> 16),
            System::Dos | System::Unknown => None,
        };

        Ok(Self {
            path,
            size: zip64
                .uncompressed_size
                .unwrap_or(cde.uncompressed_size as u64),
            compressed_size: zip64.compressed_size.unwrap_or(cde.compressed_size as u64),
            compression_method: CompressionMethod::from_u16(cde.compression_method),
            crc32: cde.crc32,
            encrypted: format::is_encrypted(cde.flags),
            last_modified: format::parse_msdos(cde.last_modified_time, cde.last_modified_date),
            unix_mode,
            dos_attributes: cde.external_file_attributes as u8,
            header_offset: zip64.header_offset.unwrap_or(cde.header_offset as u64),
        })
    }

    /// The entry's name, exactly as stored
    pub fn name(&self) -> &str {
        self.path.as_str()
    }

    /// Returns true if the given entry is a directory
    pub fn is_dir(&self) -> bool {
        // Path::ends_with() doesn't consider separators,
        // so check the string.
        self.path.as_str().ends_with('/')
            || self.unix_mode.map_or(false, |m| m & S_IFMT == S_IFDIR)
            || self.dos_attributes & DOS_DIRECTORY != 0
    }

    /// Returns true if the given entry is a file
    pub fn is_file(&self) -> bool {
        !self.is_dir()
    }

    /// Unix-style permission bits.
    ///
    /// Entries from other systems get `0o666` (`0o777` for directories),
    /// minus write bits if the DOS read-only attribute is set.
    pub fn permissions(&self) -> u32 {
        if let Some(mode) = self.unix_mode.filter(|m| m & 0o777 != 0) {
            return mode & 0o777;
        }
        let mut mode = if self.is_dir() { 0o777 } else { 0o666 };
        if self.dos_attributes & DOS_READ_ONLY != 0 {
            mode &= !0o222;
        }
        mode
    }
}

/// A ZIP archive to be read
pub struct ZipArchive {
    /// The bytes of the archive itself, minus anything prepended to it
    source: SectionReader<SharedSource>,
    /// A list of entries from the ZIP's central directory
    entries: Vec<Entry>,
}

impl ZipArchive {
    /// Reads a ZIP archive that starts at the very beginning of `source`.
    ///
    /// ```no_run
    /// # use std::fs::File;
    /// # use zipvfs::ZipArchive;
    /// let archive = ZipArchive::new(File::open("foo.zip")?)?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn new<R: ReadAt + 'static>(source: R) -> ZipResult<Self> {
        let (new_archive, archive_offset) = Self::with_prepended_data(source)?;
        if archive_offset != 0 {
            return Err(ZipError::PrependedWithUnknownBytes(archive_offset));
        }
        Ok(new_archive)
    }

    /// Like `ZipArchive::new()`, but allows arbitrary data to prepend the archive.
    /// Returns the ZipArchive and the number of bytes prepended to the archive.
    ///
    /// Since a ZIP archive's metadata sits at the back of the file,
    /// many formats consist of ZIP archives prepended with some other data.
    /// For example, a program can carry its assets as an archive on its own end.
    pub fn with_prepended_data<R: ReadAt + 'static>(source: R) -> ZipResult<(Self, u64)> {
        let source: SharedSource = Arc::new(source);
        let total_size = source.size()?;
        let (range, eocdr) = locate::find_archive(&*source, total_size)?;

        if eocdr.disk_number != eocdr.disk_with_central_directory {
            return Err(ZipError::UnsupportedArchive(format!(
                "No support for multi-disk archives: disk ({}) != disk with central directory ({})",
                eocdr.disk_number, eocdr.disk_with_central_directory
            )));
        }
        if eocdr.entries != eocdr.entries_on_this_disk {
            return Err(ZipError::UnsupportedArchive(format!(
                "No support for multi-disk archives: entries ({}) != entries this disk ({})",
                eocdr.entries, eocdr.entries_on_this_disk
            )));
        }
        if eocdr.is_zip64() {
            return Err(ZipError::UnsupportedArchive(String::from(
                "No support for Zip64 End Of Central Directory Records",
            )));
        }

        let source = SectionReader::new(source, range.start, range.len);
        let mut central_directory = vec![0; usize(eocdr.central_directory_size)?];
        source.read_exact_at(
            eocdr.central_directory_offset as u64,
            &mut central_directory,
        )?;
        trace!(
            "{} entries at offset {}",
            eocdr.entries,
            eocdr.central_directory_offset
        );

        let mut remaining = central_directory.as_slice();
        let mut entries = Vec::with_capacity(eocdr.entries as usize);
        for _ in 0..eocdr.entries {
            let dir_entry = CentralDirectoryEntry::parse_and_consume(&mut remaining)?;
            trace!("{:?}", dir_entry);

            let entry = Entry::from_cde(&dir_entry)?;
            debug!("{:?}", entry);
            entries.push(entry);
        }

        info!(
            "Loaded archive of {} entries ({} bytes, {} prepended)",
            entries.len(),
            range.len,
            range.start
        );
        Ok((ZipArchive { source, entries }, range.start))
    }

    /// Reads the archive appended to the running executable.
    pub fn embedded() -> ZipResult<Self> {
        let (exe, path) = locate::open_current_exe()?;
        debug!("Looking for an archive at the end of {}", path.display());
        Ok(Self::with_prepended_data(exe)?.0)
    }

    /// Returns the entries found in the ZIP archive's central directory.
    ///
    /// No effort is made to deduplicate or otherwise validate these entries.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Finds the entry with exactly the given stored name.
    pub fn by_name<P: AsRef<Utf8Path>>(&self, name: P) -> Option<&Entry> {
        let name = name.as_ref();
        self.entries.iter().find(|e| e.path.as_path() == name)
    }

    /// The archive's bytes, from its first local header
    /// through the end of its trailing comment.
    pub fn source(&self) -> &SectionReader<SharedSource> {
        &self.source
    }

    /// Finds where the entry's (possibly compressed) data starts in the archive
    /// by reading past its local file header.
    pub fn data_offset(&self, entry: &Entry) -> ZipResult<u64> {
        let mut header = [0; LocalFileHeader::FIXED_SIZE];
        self.source.read_exact_at(entry.header_offset, &mut header)?;
        let local = LocalFileHeader::parse(&header)?;
        trace!("{:?}", local);

        if cfg!(feature = "check-local-metadata") {
            self.check_local_header(entry, &local)?;
        }

        let offset = entry.header_offset.checked_add(local.total_size());
        let end = offset.and_then(|o| o.checked_add(entry.compressed_size));
        match (offset, end) {
            (Some(offset), Some(end)) if end <= self.source.len() => Ok(offset),
            _ => Err(ZipError::InvalidArchive(
                "Entry data runs past the end of the archive",
            )),
        }
    }

    fn check_local_header(&self, entry: &Entry, local: &LocalFileHeader) -> ZipResult<()> {
        let mismatch = ZipError::InvalidArchive(
            "Central directory entry doesn't match local file header",
        );
        if CompressionMethod::from_u16(local.compression_method) != entry.compression_method {
            return Err(mismatch);
        }
        let mut raw_name = vec![0; local.path_length as usize];
        self.source.read_exact_at(
            entry.header_offset + LocalFileHeader::FIXED_SIZE as u64,
            &mut raw_name,
        )?;
        if format::decode_name(&raw_name, local.flags)? != entry.name() {
            return Err(mismatch);
        }
        Ok(())
    }

    /// The entry's bytes as stored in the archive, without copying them.
    ///
    /// For [`CompressionMethod::Stored`] entries, this is the file itself.
    pub fn raw(&self, entry: &Entry) -> ZipResult<SectionReader<SharedSource>> {
        let offset = self.data_offset(entry)?;
        Ok(self.source.section(offset, entry.compressed_size))
    }

    /// Reads the given file from the ZIP archive, decompressing as needed.
    ///
    /// The reader checks the file's CRC-32 and size when it hits the end.
    pub fn read(&self, entry: &Entry) -> ZipResult<Box<dyn io::Read + Send>> {
        if entry.encrypted {
            return Err(ZipError::UnsupportedArchive(format!(
                "Can't read encrypted file {}",
                entry.path
            )));
        }
        debug!("Reading {}", entry.path);
        let raw = self.raw(entry)?;
        make_reader(entry.compression_method, entry.crc32, entry.size, raw)
    }
}

/// Returns a boxed read trait for a compressed file,
/// given its compression method and expected CRC and size.
fn make_reader<R: io::Read + Send + 'static>(
    compression_method: CompressionMethod,
    crc32: u32,
    size: u64,
    reader: R,
) -> ZipResult<Box<dyn io::Read + Send>> {
    match compression_method {
        CompressionMethod::Stored => Ok(Box::new(Crc32Reader::new(reader, crc32, size))),
        CompressionMethod::Deflate => {
            let deflate_reader = DeflateDecoder::new(reader);
            Ok(Box::new(Crc32Reader::new(deflate_reader, crc32, size)))
        }
        CompressionMethod::Unsupported(method) => Err(ZipError::UnsupportedArchive(format!(
            "Compression method {method} not supported"
        ))),
    }
}
