//! Error types and the related `Result<T>`

use std::io;

use camino::Utf8PathBuf;
use thiserror::Error;

pub type ZipResult<T> = Result<T, ZipError>;

#[derive(Debug, Error)]
pub enum ZipError {
    /// An error from the underlying byte source or decompressor
    #[error("I/O Error")]
    Io(#[from] io::Error),

    /// The ZIP archive is malformed or couldn't be found at all.
    #[error("Invalid Zip archive: {0}")]
    InvalidArchive(&'static str),

    /// Decoding a UTF-8 name failed
    #[error("Invalid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),

    /// The ZIP archive uses an unsupported feature
    #[error("Unsupported Zip archive: {0}")]
    UnsupportedArchive(String),

    /// The ZIP archive is prepended some unknown bytes.
    /// (Use [`ZipArchive::with_prepended_data()`] if this is okay.)
    ///
    /// [`ZipArchive::with_prepended_data()`]: ../archive/struct.ZipArchive.html#method.with_prepended_data
    #[error("Archive prepended with {0} unknown bytes")]
    PrependedWithUnknownBytes(u64),

    /// Nothing in the file system lives at the given path.
    #[error("No such file or directory: {0}")]
    NotFound(Utf8PathBuf),

    /// A directory operation was attempted on a file.
    #[error("Not a directory: {0}")]
    NotADirectory(Utf8PathBuf),

    /// A data operation was attempted on a directory.
    #[error("Not a file: {0}")]
    NotAFile(Utf8PathBuf),

    /// Compressed entries can only be read front to back.
    #[error("Can't seek in compressed file {0}")]
    SeekUnsupported(Utf8PathBuf),

    /// A 64-bit size didn't fit in a usize while allocating a buffer,
    /// probably on a 32-bit system.
    #[error("Zip archive too large for address space")]
    InsufficientAddressSpace,
}

/// Lets file handles report typed errors through `io::Read` and `io::Seek`.
impl From<ZipError> for io::Error {
    fn from(err: ZipError) -> Self {
        match err {
            ZipError::Io(inner) => inner,
            other => io::Error::new(io_kind(&other), other),
        }
    }
}

fn io_kind(err: &ZipError) -> io::ErrorKind {
    match err {
        ZipError::Io(e) => e.kind(),
        ZipError::NotFound(_) => io::ErrorKind::NotFound,
        ZipError::SeekUnsupported(_) | ZipError::UnsupportedArchive(_) => {
            io::ErrorKind::Unsupported
        }
        ZipError::NotADirectory(_) | ZipError::NotAFile(_) => io::ErrorKind::InvalidInput,
        ZipError::InvalidArchive(_)
        | ZipError::Encoding(_)
        | ZipError::PrependedWithUnknownBytes(_) => io::ErrorKind::InvalidData,
        ZipError::InsufficientAddressSpace => io::ErrorKind::OutOfMemory,
    }
}
