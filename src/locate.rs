//! Finding a ZIP archive inside some larger file.
//!
//! A ZIP archive is read from the back: its End of central directory record
//! says where the central directory is, relative to the archive's start.
//! When an archive is glued onto the end of an executable,
//! nothing tells us where that start is, but the record's offsets do:
//! the central directory ends right where the record begins,
//! so the archive is `offset + size` bytes long, plus the record itself.

use std::env;
use std::ffi::OsString;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use log::*;

use crate::arch::usize;
use crate::format::{self, EndOfCentralDirectory};
use crate::result::*;
use crate::source::ReadAt;

/// How far from the end of the file we look for the End of central directory record:
/// a maximum-length comment plus the fixed part of the record (and some slack).
pub const TAIL_SEARCH_LEN: u64 = 65 * 1024 + EndOfCentralDirectory::FIXED_SIZE as u64;

/// The bytes of a source occupied by an archive.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ArchiveRange {
    /// Offset of the archive's first byte in the source
    pub start: u64,
    /// Length of the archive, through the end of its trailing comment
    pub len: u64,
}

impl ArchiveRange {
    pub fn end(&self) -> u64 {
        self.start + self.len
    }
}

/// Finds the archive in the last `total_size` bytes of `source`.
pub fn locate<R: ReadAt + ?Sized>(source: &R, total_size: u64) -> ZipResult<ArchiveRange> {
    find_archive(source, total_size).map(|(range, _)| range)
}

/// Like [`locate()`], but also hands back the parsed End of central directory record.
pub(crate) fn find_archive<R: ReadAt + ?Sized>(
    source: &R,
    total_size: u64,
) -> ZipResult<(ArchiveRange, EndOfCentralDirectory)> {
    if total_size == 0 {
        return Err(ZipError::InvalidArchive("Empty file"));
    }

    let tail_len = total_size.min(TAIL_SEARCH_LEN);
    let mut tail = vec![0; usize(tail_len)?];
    source.read_exact_at(total_size - tail_len, &mut tail)?;

    let eocdr_posit = format::find_eocdr(&tail).ok_or(ZipError::InvalidArchive(
        "Couldn't find End Of Central Directory Record",
    ))?;
    let eocdr = EndOfCentralDirectory::parse(&tail[eocdr_posit..])?;
    trace!("{:?}", eocdr);

    // Everything from the record's signature to the end of the file
    // belongs to the archive too.
    let trailer_len = tail_len - eocdr_posit as u64;
    let archive_len = eocdr.central_directory_offset as u64
        + eocdr.central_directory_size as u64
        + trailer_len;
    if archive_len > total_size {
        return Err(ZipError::InvalidArchive(
            "Central directory extends past the start of the file",
        ));
    }

    let range = ArchiveRange {
        start: total_size - archive_len,
        len: archive_len,
    };
    debug!(
        "Found {}-byte archive at offset {} of {}-byte file",
        range.len, range.start, total_size
    );
    Ok((range, eocdr))
}

/// Opens the running executable, so we can look for an archive on its end.
///
/// Goes by `argv[0]` like the archive-appending tools expect,
/// falling back to [`std::env::current_exe()`] when that's unavailable
/// or doesn't name a file (e.g., the program was found through `$PATH`).
pub fn open_current_exe() -> io::Result<(File, PathBuf)> {
    let invoked_as = env::args_os()
        .next()
        .filter(|arg| !arg.is_empty())
        .map(PathBuf::from);
    open_invoked_as(invoked_as)
}

fn open_invoked_as(invoked_as: Option<PathBuf>) -> io::Result<(File, PathBuf)> {
    if let Some(path) = invoked_as {
        match open_with_suffix(&path, env::consts::EXE_SUFFIX) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(
                    "{} isn't a path to us, asking the OS where we are",
                    path.display()
                );
            }
            opened => return opened,
        }
    }
    let current = env::current_exe()?;
    open_with_suffix(&current, env::consts::EXE_SUFFIX)
}

/// Opens `path`, or `path` + `suffix` if the former doesn't exist
/// (on platforms like Windows, executables can be invoked without their `.exe`).
pub fn open_with_suffix(path: &Path, suffix: &str) -> io::Result<(File, PathBuf)> {
    match File::open(path) {
        Ok(f) => Ok((f, path.to_owned())),
        Err(e) if e.kind() == io::ErrorKind::NotFound && !suffix.is_empty() => {
            let mut with_suffix = OsString::from(path.as_os_str());
            with_suffix.push(suffix);
            let with_suffix = PathBuf::from(with_suffix);
            debug!(
                "{} not found, trying {}",
                path.display(),
                with_suffix.display()
            );
            File::open(&with_suffix).map(|f| (f, with_suffix))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::format::EOCDR_MAGIC;

    /// An empty archive: just the End of central directory record,
    /// pointing at a central directory of `cd_size` bytes at `cd_offset`.
    fn end_record(cd_offset: u32, cd_size: u32, comment: &[u8]) -> Vec<u8> {
        let mut record = EOCDR_MAGIC.to_vec();
        record.extend_from_slice(&[0; 8]);
        record.extend_from_slice(&cd_size.to_le_bytes());
        record.extend_from_slice(&cd_offset.to_le_bytes());
        record.extend_from_slice(&(comment.len() as u16).to_le_bytes());
        record.extend_from_slice(comment);
        record
    }

    fn locate_in(file: &[u8]) -> ZipResult<ArchiveRange> {
        locate(file, file.len() as u64)
    }

    #[test]
    fn bare_archive_starts_at_zero() {
        // 40 bytes of "entries", 10 of central directory, then the record
        let mut file = vec![0xaa; 50];
        file.extend_from_slice(&end_record(40, 10, b""));
        let range = locate_in(&file).unwrap();
        assert_eq!(range, ArchiveRange { start: 0, len: 72 });
        assert_eq!(range.end(), file.len() as u64);
    }

    #[test]
    fn prepended_bytes_are_skipped() {
        let mut file = b"#!/bin/sh\necho this is the host program\n".to_vec();
        let host_len = file.len() as u64;
        file.extend_from_slice(&[0xaa; 50]);
        file.extend_from_slice(&end_record(40, 10, b"a comment"));
        let range = locate_in(&file).unwrap();
        assert_eq!(range.start, host_len);
        assert_eq!(range.len, 50 + 22 + 9);
    }

    #[test]
    fn trailing_record_beats_earlier_signatures() {
        // The host program happens to contain a whole (bogus) record.
        let mut file = b"host".to_vec();
        file.extend_from_slice(&end_record(0, 0, b""));
        file.extend_from_slice(b"more host code");
        let host_len = file.len() as u64;
        file.extend_from_slice(&[0xaa; 30]);
        file.extend_from_slice(&end_record(20, 10, b""));
        let range = locate_in(&file).unwrap();
        assert_eq!(range.start, host_len);
        assert_eq!(range.len, 52);
    }

    #[test]
    fn signature_in_comment_is_ignored() {
        let mut comment = b"see ".to_vec();
        comment.extend_from_slice(&EOCDR_MAGIC);
        let mut file = vec![0xaa; 30];
        file.extend_from_slice(&end_record(20, 10, &comment));
        let range = locate_in(&file).unwrap();
        assert_eq!(range, ArchiveRange { start: 0, len: 30 + 22 + 8 });
    }

    #[test]
    fn only_the_tail_is_searched() {
        let mut file = end_record(0, 0, b"");
        file.extend(std::iter::repeat(0).take(TAIL_SEARCH_LEN as usize));
        match locate_in(&file) {
            Err(ZipError::InvalidArchive(_)) => {}
            other => panic!("Expected InvalidArchive, got {:?}", other),
        }
    }

    #[test]
    fn failures() {
        match locate_in(b"") {
            Err(ZipError::InvalidArchive(msg)) => assert_eq!(msg, "Empty file"),
            other => panic!("Expected InvalidArchive, got {:?}", other),
        }
        match locate_in(b"no archive here, sorry") {
            Err(ZipError::InvalidArchive(_)) => {}
            other => panic!("Expected InvalidArchive, got {:?}", other),
        }
        // Claims a central directory bigger than the whole file
        let file = end_record(1000, 10, b"");
        match locate_in(&file) {
            Err(ZipError::InvalidArchive(_)) => {}
            other => panic!("Expected InvalidArchive, got {:?}", other),
        }
    }

    #[test]
    fn short_reads_are_io_errors() {
        let file = end_record(0, 0, b"");
        // Claim the source is bigger than it is.
        match locate(&file[..], 100) {
            Err(ZipError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("Expected Io, got {:?}", other),
        }
    }

    #[test]
    fn suffix_is_tried_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let bare = dir.path().join("server");
        let suffixed = dir.path().join("server.exe");
        std::fs::write(&suffixed, b"MZ").unwrap();

        let (_, opened) = open_with_suffix(&bare, ".exe").unwrap();
        assert_eq!(opened, suffixed);

        // No suffix to try, no luck
        let err = open_with_suffix(&bare, "").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        // The bare path wins when it exists.
        std::fs::write(&bare, b"\x7fELF").unwrap();
        let (_, opened) = open_with_suffix(&bare, ".exe").unwrap();
        assert_eq!(opened, bare);
    }

    #[test]
    fn finds_our_own_executable() {
        // The test binary has no archive on it, but we should be able to open it.
        let (file, _) = open_current_exe().unwrap();
        assert!(file.metadata().unwrap().len() > 0);
    }

    #[test]
    fn bare_program_names_fall_back_to_the_os() {
        // What argv[0] looks like when a program is found through $PATH
        let bare = PathBuf::from("some-program-that-is-not-in-the-working-directory");
        let (_, opened) = open_invoked_as(Some(bare)).unwrap();
        assert_eq!(opened, env::current_exe().unwrap());

        let (_, opened) = open_invoked_as(None).unwrap();
        assert_eq!(opened, env::current_exe().unwrap());
    }
}
