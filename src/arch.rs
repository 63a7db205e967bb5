use crate::result::*;

/// A checked cast from u64 to usize, for sizing buffers
/// from values read out of the archive.
pub fn usize<I: Into<u64>>(i: I) -> ZipResult<usize> {
    let i: u64 = i.into();
    usize::try_from(i).map_err(|_| ZipError::InsufficientAddressSpace)
}
