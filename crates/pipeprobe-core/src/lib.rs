//! Primitives for probing the pipe-buffer page-cache write path.
//!
//! Linux pipes keep their contents in a ring of page-sized buffers. A buffer
//! created by an ordinary `write(2)` is flagged mergeable, so a later write
//! may append into it instead of opening a new one. A buffer attached by
//! `splice(2)` is not a copy at all: it references the source file's page in
//! the page cache. Kernels affected by CVE-2022-0847 ("Dirty Pipe") fail to
//! clear the mergeable flag that a previous occupant of the ring slot left
//! behind, so a write that follows such a splice merges straight into the
//! cached page of a file opened read-only.
//!
//! This crate drives that exact sequence as a measurement: prime a pipe so
//! every ring slot carries a stale flag ([`pipe::PreparedPipe`]), splice one
//! byte from the target file, write a payload, and let the caller read the
//! file back to see whether the kernel merged
//! ([`overwrite::attempt_overwrite`]). All I/O goes through the [`KernelIo`]
//! seam, with a real provider ([`LiveKernel`]) and a deterministic model of
//! both kernel flavors ([`FakeKernel`]) for tests.

pub mod error;
pub mod fake;
pub mod io;
#[allow(unsafe_code)]
pub mod live;
pub mod overwrite;
pub mod page;
pub mod pipe;

pub use error::{Errno, ErrorClass, WriteError};
pub use fake::{FakeKernel, Faults, KernelFlavor};
pub use io::{Fd, KernelIo, ScopedFd};
pub use live::LiveKernel;
pub use overwrite::{WriteRequest, attempt_overwrite};
pub use page::FALLBACK_PAGE_SIZE;
pub use pipe::PreparedPipe;
