//! Error taxonomy for the probe's syscall sequence.
//!
//! Every failure maps to one [`WriteError`] variant, and every variant
//! classifies into one [`ErrorClass`] bucket:
//!
//! - `Config`: the request itself is wrong and the caller can correct it.
//! - `Resource`: the environment refused a resource the probe needs.
//! - `Transfer`: the OS failed partway through the splice/write sequence.
//!
//! Nothing here retries. Errors propagate to the caller unchanged, and the
//! harness surfaces them as an Error verdict rather than a Safe one.

use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Errno
// ---------------------------------------------------------------------------

/// Raw OS error number carried by provider results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Errno(pub i32);

impl Errno {
    /// `ENOENT` — no such file or directory.
    pub const NOENT: Errno = Errno(2);
    /// `EBADF` — bad file descriptor.
    pub const BADF: Errno = Errno(9);
    /// `EACCES` — permission denied.
    pub const ACCES: Errno = Errno(13);
    /// `EINVAL` — invalid argument.
    pub const INVAL: Errno = Errno(22);

    /// The raw errno value.
    #[must_use]
    pub const fn raw(self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for Errno {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", std::io::Error::from_raw_os_error(self.0))
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Coarse bucket a [`WriteError`] falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The request is malformed; correct the offset or payload and resubmit.
    Config,
    /// The environment refused a file or pipe the probe needs.
    Resource,
    /// The OS failed mid-sequence after validation had passed.
    Transfer,
}

impl ErrorClass {
    /// Stable lowercase name for reports and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Config => "config",
            ErrorClass::Resource => "resource",
            ErrorClass::Transfer => "transfer",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// WriteError
// ---------------------------------------------------------------------------

/// Failure modes of a page-cache overwrite attempt.
///
/// Validation errors are reported in a fixed order: the first failing check
/// wins and nothing later in the sequence runs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WriteError {
    /// The write would start exactly on a page boundary, so no byte exists
    /// before it inside the same page to splice.
    #[error("cannot start writing at a page boundary (offset {offset}, page size {page_size})")]
    PageBoundaryOffset { offset: u64, page_size: u64 },

    /// The payload would spill past the end of the page it starts in.
    #[error(
        "cannot write across a page boundary (offset {offset} + {len} bytes ends past {next_boundary})"
    )]
    CrossesPageBoundary {
        offset: u64,
        len: usize,
        next_boundary: u64,
    },

    /// A zero-length write proves nothing; rejected before any file access.
    #[error("payload is empty")]
    EmptyPayload,

    /// The target could not be opened read-only.
    #[error("cannot open {path:?} read-only: {errno}")]
    OpenFailed { path: PathBuf, errno: Errno },

    /// The target's size could not be read.
    #[error("cannot stat target: {errno}")]
    StatFailed { errno: Errno },

    /// The offset does not name a byte strictly inside the file.
    #[error("offset {offset} is not inside the file ({size} bytes)")]
    OffsetOutOfRange { offset: u64, size: u64 },

    /// The write would extend the file, which the page-cache path cannot do.
    #[error("cannot enlarge the file (write ends at {end_offset}, file has {size} bytes)")]
    WouldGrowFile { end_offset: u64, size: u64 },

    /// The OS refused to allocate a pipe. Fatal for the run; never retried.
    #[error("pipe unavailable: {errno}")]
    PipeUnavailable { errno: Errno },

    /// `F_GETPIPE_SZ` failed, so the pipe cannot be primed to capacity.
    #[error("pipe capacity query failed: {errno}")]
    CapacityQueryFailed { errno: Errno },

    /// A fill or drain transfer moved zero bytes before reaching capacity.
    #[error("pipe priming stalled after {moved} of {capacity} bytes")]
    PrimingStalled { moved: usize, capacity: usize },

    /// The OS failed a fill or drain transfer while priming.
    #[error("pipe priming failed: {errno}")]
    PrimingFailed { errno: Errno },

    /// The OS rejected the one-byte splice from the target into the pipe.
    #[error("splice failed: {errno}")]
    SpliceFailed { errno: Errno },

    /// The splice moved zero bytes, so no pipe buffer references the page.
    #[error("short splice")]
    ShortSplice,

    /// The OS rejected the payload write into the pipe.
    #[error("write failed: {errno}")]
    WriteFailed { errno: Errno },

    /// The payload write stopped short of the full payload.
    #[error("short write ({written} of {expected} bytes)")]
    ShortWrite { written: usize, expected: usize },
}

impl WriteError {
    /// Which bucket this error falls into.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            WriteError::PageBoundaryOffset { .. }
            | WriteError::CrossesPageBoundary { .. }
            | WriteError::EmptyPayload
            | WriteError::OffsetOutOfRange { .. }
            | WriteError::WouldGrowFile { .. } => ErrorClass::Config,
            WriteError::OpenFailed { .. }
            | WriteError::StatFailed { .. }
            | WriteError::PipeUnavailable { .. }
            | WriteError::CapacityQueryFailed { .. }
            | WriteError::PrimingStalled { .. }
            | WriteError::PrimingFailed { .. } => ErrorClass::Resource,
            WriteError::SpliceFailed { .. }
            | WriteError::ShortSplice
            | WriteError::WriteFailed { .. }
            | WriteError::ShortWrite { .. } => ErrorClass::Transfer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_displays_the_os_message() {
        let text = Errno::NOENT.to_string();
        assert!(
            text.contains("os error 2"),
            "ENOENT display should carry the raw errno, got {text:?}"
        );
    }

    #[test]
    fn classes_partition_the_variants() {
        assert_eq!(
            WriteError::PageBoundaryOffset {
                offset: 4096,
                page_size: 4096
            }
            .class(),
            ErrorClass::Config
        );
        assert_eq!(WriteError::EmptyPayload.class(), ErrorClass::Config);
        assert_eq!(
            WriteError::OffsetOutOfRange {
                offset: 99,
                size: 13
            }
            .class(),
            ErrorClass::Config
        );
        assert_eq!(
            WriteError::OpenFailed {
                path: PathBuf::from("/x"),
                errno: Errno::NOENT
            }
            .class(),
            ErrorClass::Resource
        );
        assert_eq!(
            WriteError::PipeUnavailable {
                errno: Errno::INVAL
            }
            .class(),
            ErrorClass::Resource
        );
        assert_eq!(WriteError::ShortSplice.class(), ErrorClass::Transfer);
        assert_eq!(
            WriteError::ShortWrite {
                written: 2,
                expected: 5
            }
            .class(),
            ErrorClass::Transfer
        );
    }

    #[test]
    fn display_names_the_failing_precondition() {
        let err = WriteError::CrossesPageBoundary {
            offset: 4094,
            len: 8,
            next_boundary: 4096,
        };
        let text = err.to_string();
        assert!(text.contains("page boundary"), "got {text:?}");
        assert!(text.contains("4094"), "got {text:?}");

        let err = WriteError::WouldGrowFile {
            end_offset: 20,
            size: 13,
        };
        assert!(err.to_string().contains("enlarge"), "got {err}");
    }

    #[test]
    fn class_names_are_stable() {
        assert_eq!(ErrorClass::Config.as_str(), "config");
        assert_eq!(ErrorClass::Resource.as_str(), "resource");
        assert_eq!(ErrorClass::Transfer.as_str(), "transfer");
    }
}
