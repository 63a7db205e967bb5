//! Verifies decompressed entries as they're read.

use std::io;
use std::io::prelude::*;

use crc32fast::Hasher;

/// Reader that checks the CRC-32 and length of everything it passed along
/// once the inner reader runs dry.
pub struct Crc32Reader<R> {
    inner: R,
    hasher: Hasher,
    expected_crc: u32,
    expected_len: u64,
    seen: u64,
}

impl<R> Crc32Reader<R> {
    pub fn new(inner: R, expected_crc: u32, expected_len: u64) -> Crc32Reader<R> {
        Crc32Reader {
            inner,
            hasher: Hasher::new(),
            expected_crc,
            expected_len,
            seen: 0,
        }
    }

    fn verify(&self) -> io::Result<()> {
        if self.seen != self.expected_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Entry decompressed to {} bytes, expected {}",
                    self.seen, self.expected_len
                ),
            ));
        }
        if self.hasher.clone().finalize() != self.expected_crc {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "Invalid checksum"));
        }
        Ok(())
    }
}

impl<R: Read> Read for Crc32Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.inner.read(buf)?;
        if count == 0 && !buf.is_empty() {
            self.verify()?;
        }
        self.hasher.update(&buf[..count]);
        self.seen += count as u64;
        Ok(count)
    }
}
