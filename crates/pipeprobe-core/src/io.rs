//! Kernel I/O seam.
//!
//! Every syscall the probe issues goes through [`KernelIo`], so the same
//! sequence runs against the real kernel ([`crate::live::LiveKernel`]) and
//! against a deterministic in-process model ([`crate::fake::FakeKernel`]).
//! Descriptors are opaque [`Fd`] tokens minted by the provider; callers never
//! assume they are real OS descriptors.

use std::path::Path;

use crate::error::Errno;

/// Provider-scoped descriptor token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fd(pub i32);

/// The syscall surface the probe depends on.
///
/// Methods mirror their POSIX counterparts but return [`Errno`] directly
/// instead of setting a thread-local. Partial transfers are reported through
/// the returned counts, exactly as the real calls do.
pub trait KernelIo {
    /// Page size the provider's page cache uses.
    fn page_size(&self) -> u64;

    /// Create an anonymous pipe; returns `(read_end, write_end)`.
    fn create_pipe(&self) -> Result<(Fd, Fd), Errno>;

    /// Total ring capacity of the pipe, in bytes (`F_GETPIPE_SZ`).
    fn pipe_capacity(&self, write_end: Fd) -> Result<usize, Errno>;

    /// Open an existing file read-only.
    fn open_readonly(&self, path: &Path) -> Result<Fd, Errno>;

    /// Create (or truncate) a file for writing with the given mode bits.
    fn create_file(&self, path: &Path, mode: u32) -> Result<Fd, Errno>;

    /// Size of the open file in bytes.
    fn file_size(&self, fd: Fd) -> Result<u64, Errno>;

    /// Read up to `buf.len()` bytes; `Ok(0)` means end of data.
    fn read(&self, fd: Fd, buf: &mut [u8]) -> Result<usize, Errno>;

    /// Write up to `buf.len()` bytes; may transfer fewer.
    fn write(&self, fd: Fd, buf: &[u8]) -> Result<usize, Errno>;

    /// Move up to `len` bytes from `file` at `*offset` into the pipe without
    /// copying through userspace. Advances `*offset` by the count moved; the
    /// file's own cursor is untouched. `Ok(0)` means nothing could move.
    fn splice_to_pipe(
        &self,
        file: Fd,
        offset: &mut i64,
        pipe_write: Fd,
        len: usize,
    ) -> Result<usize, Errno>;

    /// Remove a name from the filesystem.
    fn unlink(&self, path: &Path) -> Result<(), Errno>;

    /// Release a descriptor. Closing an already-closed or invalid descriptor
    /// is a provider-level error, but callers routinely ignore it.
    fn close(&self, fd: Fd) -> Result<(), Errno>;
}

/// Closes a descriptor through its provider when dropped.
///
/// Error paths in the probe bail with `?` in several places; owning every
/// descriptor through this guard keeps the descriptor table balanced no
/// matter which step fails.
#[derive(Debug)]
pub struct ScopedFd<'io, P: KernelIo + ?Sized> {
    io: &'io P,
    fd: Fd,
}

impl<'io, P: KernelIo + ?Sized> ScopedFd<'io, P> {
    /// Take ownership of `fd`; it is closed when the guard drops.
    pub fn new(io: &'io P, fd: Fd) -> Self {
        ScopedFd { io, fd }
    }

    /// The wrapped descriptor, still owned by the guard.
    #[must_use]
    pub fn get(&self) -> Fd {
        self.fd
    }
}

impl<P: KernelIo + ?Sized> Drop for ScopedFd<'_, P> {
    fn drop(&mut self) {
        // Close failures on teardown have no recovery path.
        let _ = self.io.close(self.fd);
    }
}
