//! Code specific to the ZIP file format.
//!
//! Fixed-layout records are parsed here; higher-level stuff
//! lives in the [`archive`] and [`locate`] modules.
//!
//! Field layouts quote [`APPNOTE.TXT`].
//!
//! [`archive`]: ../archive/index.html
//! [`locate`]: ../locate/index.html
//! [`APPNOTE.TXT`]: https://pkware.cachefly.net/webdocs/APPNOTE/APPNOTE-6.3.6.TXT

use std::borrow::Cow;

use chrono::{NaiveDate, NaiveDateTime};
use codepage_437::*;

use crate::result::*;

/// End of central directory magic number (0x06054b50, little-endian)
pub const EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 5, 6];
/// Central directory magic number
const CENTRAL_DIRECTORY_MAGIC: [u8; 4] = [b'P', b'K', 1, 2];
/// Local file header magic number
const LOCAL_FILE_HEADER_MAGIC: [u8; 4] = [b'P', b'K', 3, 4];

/// Marks a 32-bit field whose real value lives in a Zip64 record.
pub const ZIP64_SENTINEL: u32 = u32::MAX;

/// A cursor that pulls little-endian fields off the front of a record,
/// failing instead of panicking when the record is cut short.
struct Fields<'a> {
    rest: &'a [u8],
    what: &'static str,
}

impl<'a> Fields<'a> {
    fn new(rest: &'a [u8], what: &'static str) -> Self {
        Self { rest, what }
    }

    fn take(&mut self, n: usize) -> ZipResult<&'a [u8]> {
        if self.rest.len() < n {
            return Err(ZipError::InvalidArchive(self.what));
        }
        let (taken, rest) = self.rest.split_at(n);
        self.rest = rest;
        Ok(taken)
    }

    fn magic(&mut self, expected: [u8; 4]) -> ZipResult<()> {
        if self.take(4)? != expected {
            return Err(ZipError::InvalidArchive(self.what));
        }
        Ok(())
    }

    fn u16(&mut self) -> ZipResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> ZipResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> ZipResult<u64> {
        let b = self.take(8)?;
        let mut bytes = [0; 8];
        bytes.copy_from_slice(b);
        Ok(u64::from_le_bytes(bytes))
    }
}

/// Data from the End of central directory record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_central_directory: u16,
    pub entries_on_this_disk: u16,
    pub entries: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
    pub comment_length: u16,
}

impl EndOfCentralDirectory {
    /// Size of the record without its trailing comment
    pub const FIXED_SIZE: usize = 22;

    pub fn parse(record: &[u8]) -> ZipResult<Self> {
        // 4.3.16  End of central directory record:
        //
        // end of central dir signature    4 bytes  (0x06054b50)
        // number of this disk             2 bytes
        // number of the disk with the
        // start of the central directory  2 bytes
        // total number of entries in
        // the central dir on this disk    2 bytes
        // total number of entries in
        // the central dir                 2 bytes
        // size of the central directory   4 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        4 bytes
        // zipfile comment length          2 bytes
        let mut fields = Fields::new(record, "Truncated End Of Central Directory Record");
        fields.magic(EOCDR_MAGIC)?;
        Ok(Self {
            disk_number: fields.u16()?,
            disk_with_central_directory: fields.u16()?,
            entries_on_this_disk: fields.u16()?,
            entries: fields.u16()?,
            central_directory_size: fields.u32()?,
            central_directory_offset: fields.u32()?,
            comment_length: fields.u16()?,
        })
    }

    /// True if any field holds a placeholder for a Zip64 record.
    pub fn is_zip64(&self) -> bool {
        self.entries == u16::MAX
            || self.central_directory_size == ZIP64_SENTINEL
            || self.central_directory_offset == ZIP64_SENTINEL
    }
}

/// Finds the last plausible End of central directory record in `block`.
///
/// A candidate only counts if the fixed record fits in the block
/// and its comment doesn't run past the block's end,
/// so signature bytes that happen to show up in a comment are skipped.
pub fn find_eocdr(block: &[u8]) -> Option<usize> {
    let mut end = block.len();
    while let Some(candidate) = memchr::memmem::rfind(&block[..end], &EOCDR_MAGIC) {
        let fixed_end = candidate + EndOfCentralDirectory::FIXED_SIZE;
        if fixed_end <= block.len() {
            let comment_length =
                u16::from_le_bytes([block[fixed_end - 2], block[fixed_end - 1]]) as usize;
            if fixed_end + comment_length <= block.len() {
                return Some(candidate);
            }
        }
        end = candidate;
    }
    None
}

/// Data from a central directory entry
///
/// Each of these records contians information about a file or folder
/// stored in the ZIP archive.
#[derive(Debug)]
pub struct CentralDirectoryEntry<'a> {
    pub source_version: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub disk_number: u16,
    pub external_file_attributes: u32,
    pub header_offset: u32,
    pub path: &'a [u8],
    pub extra_field: &'a [u8],
}

impl<'a> CentralDirectoryEntry<'a> {
    pub fn parse_and_consume(directory: &mut &'a [u8]) -> ZipResult<Self> {
        // 4.3.12  Central directory structure:
        //
        //   central file header signature   4 bytes  (0x02014b50)
        //   version made by                 2 bytes
        //   version needed to extract       2 bytes
        //   general purpose bit flag        2 bytes
        //   compression method              2 bytes
        //   last mod file time              2 bytes
        //   last mod file date              2 bytes
        //   crc-32                          4 bytes
        //   compressed size                 4 bytes
        //   uncompressed size               4 bytes
        //   file name length                2 bytes
        //   extra field length              2 bytes
        //   file comment length             2 bytes
        //   disk number start               2 bytes
        //   internal file attributes        2 bytes
        //   external file attributes        4 bytes
        //   relative offset of local header 4 bytes
        //
        //   file name (variable size)
        //   extra field (variable size)
        //   file comment (variable size)
        let mut fields = Fields::new(directory, "Truncated central directory entry");
        fields
            .magic(CENTRAL_DIRECTORY_MAGIC)
            .map_err(|_| ZipError::InvalidArchive("Invalid central directory entry"))?;
        let source_version = fields.u16()?;
        let _minimum_extract_version = fields.u16()?;
        let flags = fields.u16()?;
        let compression_method = fields.u16()?;
        let last_modified_time = fields.u16()?;
        let last_modified_date = fields.u16()?;
        let crc32 = fields.u32()?;
        let compressed_size = fields.u32()?;
        let uncompressed_size = fields.u32()?;
        let path_length = fields.u16()? as usize;
        let extra_field_length = fields.u16()? as usize;
        let comment_length = fields.u16()? as usize;
        let disk_number = fields.u16()?;
        let _internal_file_attributes = fields.u16()?;
        let external_file_attributes = fields.u32()?;
        let header_offset = fields.u32()?;
        let path = fields.take(path_length)?;
        let extra_field = fields.take(extra_field_length)?;
        let _comment = fields.take(comment_length)?;
        *directory = fields.rest;

        Ok(Self {
            source_version,
            flags,
            compression_method,
            last_modified_time,
            last_modified_date,
            crc32,
            compressed_size,
            uncompressed_size,
            disk_number,
            external_file_attributes,
            header_offset,
            path,
            extra_field,
        })
    }
}

/// The fixed-size front of a local file header.
///
/// The name and extra field follow it; the file's data follows those.
#[derive(Debug)]
pub struct LocalFileHeader {
    pub flags: u16,
    pub compression_method: u16,
    pub path_length: u16,
    pub extra_field_length: u16,
}

impl LocalFileHeader {
    pub const FIXED_SIZE: usize = 30;

    pub fn parse(header: &[u8]) -> ZipResult<Self> {
        // 4.3.7  Local file header:
        //
        // local file header signature     4 bytes  (0x04034b50)
        // version needed to extract       2 bytes
        // general purpose bit flag        2 bytes
        // compression method              2 bytes
        // last mod file time              2 bytes
        // last mod file date              2 bytes
        // crc-32                          4 bytes
        // compressed size                 4 bytes
        // uncompressed size               4 bytes
        // file name length                2 bytes
        // extra field length              2 bytes
        let mut fields = Fields::new(header, "Truncated local file header");
        fields
            .magic(LOCAL_FILE_HEADER_MAGIC)
            .map_err(|_| ZipError::InvalidArchive("Invalid local file header"))?;
        let _minimum_extract_version = fields.u16()?;
        let flags = fields.u16()?;
        let compression_method = fields.u16()?;
        // Times, CRC and sizes are repeated (or zeroed, with a data descriptor)
        // from the central directory, which is what we trust.
        fields.take(16)?;
        let path_length = fields.u16()?;
        let extra_field_length = fields.u16()?;
        Ok(Self {
            flags,
            compression_method,
            path_length,
            extra_field_length,
        })
    }

    /// Bytes between the start of the header and the file's data
    pub fn total_size(&self) -> u64 {
        Self::FIXED_SIZE as u64 + self.path_length as u64 + self.extra_field_length as u64
    }
}

/// The OS a file in the archive was compressed with.
/// Used to decode permissions from the external attributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum System {
    Dos,
    Unix,
    Unknown,
}

impl System {
    pub fn from_source_version(source_version: u16) -> Self {
        // 4.4.2.2: the upper byte of "version made by" names the host system.
        //  0 - MS-DOS and OS/2 (FAT / VFAT / FAT32 file systems)
        //  3 - UNIX
        // Everything else (Amiga, VMS, NTFS, Darwin...) we don't decode.
        match source_version >> 8 {
            0 => System::Dos,
            3 => System::Unix,
            _ => System::Unknown,
        }
    }
}

/// Extracts the "is this text UTF-8?" bit from the 16-bit flags field.
///
/// If false, text is assumed to be CP437.
pub fn is_utf8(flags: u16) -> bool {
    // Bit 11: Language encoding flag (EFS).
    flags & (1 << 11) != 0
}

/// Extracts the "is this file encrypted?" bit from the 16-bit flags field.
pub fn is_encrypted(flags: u16) -> bool {
    flags & 1 != 0
}

/// Decodes an entry name per its flags.
pub fn decode_name(raw: &[u8], flags: u16) -> ZipResult<String> {
    if is_utf8(flags) {
        Ok(std::str::from_utf8(raw)?.to_owned())
    } else {
        let decoded: Cow<str> = Cow::borrow_from_cp437(raw, &CP437_CONTROL);
        Ok(decoded.into_owned())
    }
}

/// Converts MS-DOS date and time fields.
///
/// Garbage dates (month 0, February 30th...) come back as the DOS epoch
/// rather than failing the whole archive.
pub fn parse_msdos(time: u16, date: u16) -> NaiveDateTime {
    let seconds = (time & 0b0000_0000_0001_1111) as u32 * 2; // 2-second precision
    let minutes = (time & 0b0000_0111_1110_0000) as u32 >> 5;
    let hours = (time & 0b1111_1000_0000_0000) as u32 >> 11;

    let days = (date & 0b0000_0000_0001_1111) as u32;
    let months = (date & 0b0000_0001_1110_0000) as u32 >> 5;
    let years = ((date & 0b1111_1110_0000_0000) >> 9) as i32 + 1980;

    NaiveDate::from_ymd_opt(years, months, days)
        .and_then(|d| d.and_hms_opt(hours, minutes, seconds))
        .unwrap_or_else(dos_epoch)
}

pub fn dos_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1980, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// 64-bit values from a Zip64 extended information extra field.
///
/// Each is only present if the matching 32-bit field was saturated.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Zip64Sizes {
    pub uncompressed_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub header_offset: Option<u64>,
}

/// Walks the extra field looking for Zip64 info (header ID 0x0001).
pub fn parse_zip64_extra(
    mut extra_field: &[u8],
    cde: &CentralDirectoryEntry,
) -> ZipResult<Zip64Sizes> {
    // 4.5.1: header1+data1 + header2+data2 . . .
    // Each header is a 2-byte ID followed by a 2-byte data size.
    let mut sizes = Zip64Sizes::default();
    while !extra_field.is_empty() {
        let mut header = Fields::new(extra_field, "Truncated extra field");
        let kind = header.u16()?;
        let field_len = header.u16()? as usize;
        let data = header.take(field_len)?;
        extra_field = header.rest;

        if kind != 0x0001 {
            continue;
        }
        let mut data = Fields::new(data, "Truncated Zip64 extra field");
        if cde.uncompressed_size == ZIP64_SENTINEL {
            sizes.uncompressed_size = Some(data.u64()?);
        }
        if cde.compressed_size == ZIP64_SENTINEL {
            sizes.compressed_size = Some(data.u64()?);
        }
        if cde.header_offset == ZIP64_SENTINEL {
            sizes.header_offset = Some(data.u64()?);
        }
    }
    Ok(sizes)
}

#[cfg(test)]
mod test {
    use super::*;

    fn eocdr(comment: &[u8]) -> Vec<u8> {
        let mut record = EOCDR_MAGIC.to_vec();
        record.extend_from_slice(&[0, 0, 0, 0]); // disks
        record.extend_from_slice(&3u16.to_le_bytes());
        record.extend_from_slice(&3u16.to_le_bytes());
        record.extend_from_slice(&150u32.to_le_bytes());
        record.extend_from_slice(&1000u32.to_le_bytes());
        record.extend_from_slice(&(comment.len() as u16).to_le_bytes());
        record.extend_from_slice(comment);
        record
    }

    #[test]
    fn parses_end_record() {
        let record = eocdr(b"hi");
        let parsed = EndOfCentralDirectory::parse(&record).unwrap();
        assert_eq!(parsed.entries, 3);
        assert_eq!(parsed.central_directory_size, 150);
        assert_eq!(parsed.central_directory_offset, 1000);
        assert_eq!(parsed.comment_length, 2);
        assert!(!parsed.is_zip64());
    }

    #[test]
    fn truncated_end_record_is_an_error() {
        let record = eocdr(b"");
        match EndOfCentralDirectory::parse(&record[..15]) {
            Err(ZipError::InvalidArchive(_)) => {}
            other => panic!("Expected InvalidArchive, got {:?}", other),
        }
    }

    #[test]
    fn skips_signatures_inside_comments() {
        // The comment itself contains the magic, followed by too few bytes
        // to be a real record.
        let mut comment = b"junk".to_vec();
        comment.extend_from_slice(&EOCDR_MAGIC);
        comment.extend_from_slice(b"more");
        let mut block = b"leading bytes".to_vec();
        let genuine = block.len();
        block.extend_from_slice(&eocdr(&comment));
        assert_eq!(find_eocdr(&block), Some(genuine));
    }

    #[test]
    fn no_signature_no_record() {
        assert_eq!(find_eocdr(b"definitely not a zip file"), None);
        assert_eq!(find_eocdr(b""), None);
        // Magic with no room for the rest of the record
        assert_eq!(find_eocdr(&EOCDR_MAGIC), None);
    }

    #[test]
    fn msdos_times() {
        // 2020-06-15 13:45:30
        let date = ((2020 - 1980) << 9) | (6 << 5) | 15;
        let time = (13 << 11) | (45 << 5) | (30 / 2);
        let parsed = parse_msdos(time, date);
        assert_eq!(parsed.to_string(), "2020-06-15 13:45:30");

        // Month zero isn't a thing.
        assert_eq!(parse_msdos(0, 0), dos_epoch());
    }

    #[test]
    fn names_decode_by_flag() {
        assert_eq!(decode_name("caf\u{e9}".as_bytes(), 1 << 11).unwrap(), "café");
        // 0x82 is é in CP437
        assert_eq!(decode_name(&[b'c', b'a', b'f', 0x82], 0).unwrap(), "café");
        assert!(decode_name(&[0xff, 0xfe], 1 << 11).is_err());
    }

    #[test]
    fn local_header_size() {
        let mut header = LOCAL_FILE_HEADER_MAGIC.to_vec();
        header.extend_from_slice(&[20, 0, 0, 0, 8, 0]);
        header.extend_from_slice(&[0; 16]);
        header.extend_from_slice(&5u16.to_le_bytes());
        header.extend_from_slice(&4u16.to_le_bytes());
        let parsed = LocalFileHeader::parse(&header).unwrap();
        assert_eq!(parsed.compression_method, 8);
        assert_eq!(parsed.total_size(), 39);
        assert!(LocalFileHeader::parse(&header[..20]).is_err());
    }

    fn entry_with_sizes<'a>(
        compressed: u32,
        uncompressed: u32,
        offset: u32,
    ) -> CentralDirectoryEntry<'a> {
        CentralDirectoryEntry {
            source_version: 20,
            flags: 0,
            compression_method: 0,
            last_modified_time: 0,
            last_modified_date: 0,
            crc32: 0,
            compressed_size: compressed,
            uncompressed_size: uncompressed,
            disk_number: 0,
            external_file_attributes: 0,
            header_offset: offset,
            path: b"big.bin",
            extra_field: &[],
        }
    }

    fn extra_field(id: u16, values: &[u64]) -> Vec<u8> {
        let mut field = id.to_le_bytes().to_vec();
        field.extend_from_slice(&((values.len() * 8) as u16).to_le_bytes());
        for v in values {
            field.extend_from_slice(&v.to_le_bytes());
        }
        field
    }

    #[test]
    fn zip64_extra_fills_saturated_fields() {
        let cde = entry_with_sizes(ZIP64_SENTINEL, ZIP64_SENTINEL, ZIP64_SENTINEL);
        // Some other extra field first, which should be skipped
        let mut extra = extra_field(0x5455, &[7]);
        extra.extend(extra_field(0x0001, &[5_000_000_000, 4_000_000_000, 6_000_000_000]));
        let sizes = parse_zip64_extra(&extra, &cde).unwrap();
        assert_eq!(
            sizes,
            Zip64Sizes {
                uncompressed_size: Some(5_000_000_000),
                compressed_size: Some(4_000_000_000),
                header_offset: Some(6_000_000_000),
            }
        );
    }

    #[test]
    fn zip64_extra_only_covers_saturated_fields() {
        // Only the compressed size is saturated, so the one value is that.
        let cde = entry_with_sizes(ZIP64_SENTINEL, 100, 0);
        let extra = extra_field(0x0001, &[5_000_000_000]);
        let sizes = parse_zip64_extra(&extra, &cde).unwrap();
        assert_eq!(sizes.uncompressed_size, None);
        assert_eq!(sizes.compressed_size, Some(5_000_000_000));
        assert_eq!(sizes.header_offset, None);

        // Nothing saturated, nothing read
        let cde = entry_with_sizes(10, 10, 0);
        assert_eq!(parse_zip64_extra(&extra, &cde).unwrap(), Zip64Sizes::default());
    }

    #[test]
    fn truncated_zip64_extra_is_an_error() {
        let cde = entry_with_sizes(ZIP64_SENTINEL, ZIP64_SENTINEL, 0);
        // Room for one of the two values the entry needs
        let extra = extra_field(0x0001, &[42]);
        match parse_zip64_extra(&extra, &cde) {
            Err(ZipError::InvalidArchive(_)) => {}
            other => panic!("Expected InvalidArchive, got {:?}", other),
        }
        // A field header claiming more data than there is
        let extra = [1, 0, 16, 0, 1, 2, 3];
        assert!(parse_zip64_extra(&extra, &cde).is_err());
    }
}
