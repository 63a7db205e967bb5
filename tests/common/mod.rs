//! Builds small ZIP archives in memory so tests don't need fixture files.

#![allow(dead_code)]

use std::io::Write;

use flate2::write::DeflateEncoder;
use flate2::Compression;

const LOCAL_FILE_HEADER_MAGIC: u32 = 0x04034b50;
const CENTRAL_DIRECTORY_MAGIC: u32 = 0x02014b50;
const EOCDR_MAGIC: u32 = 0x06054b50;

/// Made by Unix, ZIP version 2.0
const MADE_BY_UNIX: u16 = (3 << 8) | 20;
const UTF8_FLAG: u16 = 1 << 11;

// 2021-06-15 12:30:00
const DOS_TIME: u16 = (12 << 11) | (30 << 5);
const DOS_DATE: u16 = ((2021 - 1980) << 9) | (6 << 5) | 15;

struct PendingEntry {
    name: String,
    data: Vec<u8>,
    deflate: bool,
    mode: u32,
}

#[derive(Default)]
pub struct ZipBuilder {
    prefix: Vec<u8>,
    comment: Vec<u8>,
    entries: Vec<PendingEntry>,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes to put in front of the archive, like the executable it's appended to
    pub fn prepend(mut self, bytes: &[u8]) -> Self {
        self.prefix = bytes.to_vec();
        self
    }

    pub fn comment(mut self, comment: &[u8]) -> Self {
        self.comment = comment.to_vec();
        self
    }

    pub fn stored(self, name: &str, data: &[u8]) -> Self {
        self.entry(name, data, false, 0o100644)
    }

    pub fn deflated(self, name: &str, data: &[u8]) -> Self {
        self.entry(name, data, true, 0o100644)
    }

    pub fn dir(self, name: &str) -> Self {
        let name = if name.ends_with('/') {
            name.to_owned()
        } else {
            format!("{name}/")
        };
        self.entry(&name, b"", false, 0o040750)
    }

    pub fn entry(mut self, name: &str, data: &[u8], deflate: bool, mode: u32) -> Self {
        self.entries.push(PendingEntry {
            name: name.to_owned(),
            data: data.to_vec(),
            deflate,
            mode,
        });
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut archive = Vec::new();
        let mut central_directory = Vec::new();

        for entry in &self.entries {
            let crc = crc32fast::hash(&entry.data);
            let (method, payload) = if entry.deflate {
                let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&entry.data).unwrap();
                (8u16, encoder.finish().unwrap())
            } else {
                (0u16, entry.data.clone())
            };
            // Offsets are relative to the archive, not whatever precedes it.
            let header_offset = archive.len() as u32;
            let name = entry.name.as_bytes();

            put32(&mut archive, LOCAL_FILE_HEADER_MAGIC);
            put16(&mut archive, 20);
            put16(&mut archive, UTF8_FLAG);
            put16(&mut archive, method);
            put16(&mut archive, DOS_TIME);
            put16(&mut archive, DOS_DATE);
            put32(&mut archive, crc);
            put32(&mut archive, payload.len() as u32);
            put32(&mut archive, entry.data.len() as u32);
            put16(&mut archive, name.len() as u16);
            put16(&mut archive, 0);
            archive.extend_from_slice(name);
            archive.extend_from_slice(&payload);

            put32(&mut central_directory, CENTRAL_DIRECTORY_MAGIC);
            put16(&mut central_directory, MADE_BY_UNIX);
            put16(&mut central_directory, 20);
            put16(&mut central_directory, UTF8_FLAG);
            put16(&mut central_directory, method);
            put16(&mut central_directory, DOS_TIME);
            put16(&mut central_directory, DOS_DATE);
            put32(&mut central_directory, crc);
            put32(&mut central_directory, payload.len() as u32);
            put32(&mut central_directory, entry.data.len() as u32);
            put16(&mut central_directory, name.len() as u16);
            put16(&mut central_directory, 0); // extra
            put16(&mut central_directory, 0); // comment
            put16(&mut central_directory, 0); // disk
            put16(&mut central_directory, 0); // internal attributes
            put32(&mut central_directory, entry.mode << 16);
            put32(&mut central_directory, header_offset);
            central_directory.extend_from_slice(name);
        }

        let central_directory_offset = archive.len() as u32;
        archive.extend_from_slice(&central_directory);

        put32(&mut archive, EOCDR_MAGIC);
        put16(&mut archive, 0);
        put16(&mut archive, 0);
        put16(&mut archive, self.entries.len() as u16);
        put16(&mut archive, self.entries.len() as u16);
        put32(&mut archive, central_directory.len() as u32);
        put32(&mut archive, central_directory_offset);
        put16(&mut archive, self.comment.len() as u16);
        archive.extend_from_slice(&self.comment);

        let mut file = self.prefix;
        file.extend_from_slice(&archive);
        file
    }
}

fn put16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

/// Something big and repetitive enough to actually shrink when deflated
pub fn lorem(lines: usize) -> Vec<u8> {
    (0..lines)
        .flat_map(|i| {
            format!("{i}: Lorem ipsum dolor sit amet, consectetur adipiscing elit\n").into_bytes()
        })
        .collect()
}
