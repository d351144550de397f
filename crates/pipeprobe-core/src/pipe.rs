//! Pipe construction and priming.
//!
//! A freshly spliced pipe buffer only merges with a later write if the ring
//! slot it occupies still carries a mergeable flag from a previous occupant.
//! Priming manufactures that state: fill the pipe to its ring capacity with
//! ordinary writes (every buffer they create is flagged mergeable), then
//! drain it completely, so every slot in the ring has held and freed a
//! flagged buffer.

use crate::error::WriteError;
use crate::io::{Fd, KernelIo, ScopedFd};

/// Fill and drain transfer size. One page per transfer keeps each ring slot
/// occupied by exactly one buffer.
const PRIME_CHUNK: usize = 4096;

/// An anonymous pipe, primed so that every ring slot carries a stale
/// mergeable flag. Both ends close when this drops.
#[derive(Debug)]
pub struct PreparedPipe<'io, P: KernelIo + ?Sized> {
    reader: ScopedFd<'io, P>,
    writer: ScopedFd<'io, P>,
    capacity: usize,
}

impl<'io, P: KernelIo + ?Sized> PreparedPipe<'io, P> {
    /// Create a pipe and prime its ring with 4096-byte transfers.
    ///
    /// Fails with [`WriteError::PipeUnavailable`] when no pipe can be
    /// created, [`WriteError::CapacityQueryFailed`] when the ring size is
    /// unknown, and [`WriteError::PrimingStalled`] or
    /// [`WriteError::PrimingFailed`] when a transfer stops early. A failure
    /// here is fatal for the attempt; nothing retries.
    pub fn prepare(io: &'io P) -> Result<Self, WriteError> {
        let (read_end, write_end) = io
            .create_pipe()
            .map_err(|errno| WriteError::PipeUnavailable { errno })?;
        let reader = ScopedFd::new(io, read_end);
        let writer = ScopedFd::new(io, write_end);

        let capacity = io
            .pipe_capacity(writer.get())
            .map_err(|errno| WriteError::CapacityQueryFailed { errno })?;

        let chunk = [0u8; PRIME_CHUNK];
        let mut filled = 0;
        while filled < capacity {
            let want = (capacity - filled).min(PRIME_CHUNK);
            let moved = io
                .write(writer.get(), &chunk[..want])
                .map_err(|errno| WriteError::PrimingFailed { errno })?;
            if moved == 0 {
                return Err(WriteError::PrimingStalled {
                    moved: filled,
                    capacity,
                });
            }
            filled += moved;
        }

        let mut sink = [0u8; PRIME_CHUNK];
        let mut drained = 0;
        while drained < capacity {
            let want = (capacity - drained).min(PRIME_CHUNK);
            let moved = io
                .read(reader.get(), &mut sink[..want])
                .map_err(|errno| WriteError::PrimingFailed { errno })?;
            if moved == 0 {
                return Err(WriteError::PrimingStalled {
                    moved: drained,
                    capacity,
                });
            }
            drained += moved;
        }

        Ok(PreparedPipe {
            reader,
            writer,
            capacity,
        })
    }

    /// Write end, for the splice and the payload write.
    #[must_use]
    pub fn writer_fd(&self) -> Fd {
        self.writer.get()
    }

    /// Read end. The probe never reads after priming, but the end must stay
    /// open so the pipe survives.
    #[must_use]
    pub fn reader_fd(&self) -> Fd {
        self.reader.get()
    }

    /// Ring capacity in bytes, as reported by the provider.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Errno;
    use crate::fake::{FakeKernel, Faults};

    #[test]
    fn prepare_fills_to_capacity_and_drains_back_to_empty() {
        let kernel = FakeKernel::patched();
        let pipe = PreparedPipe::prepare(&kernel).unwrap();
        assert_eq!(pipe.capacity(), 65_536);
        assert_eq!(kernel.pipe_buffered(0), 0, "priming must leave the pipe empty");
        assert!(
            kernel.pipe_has_stale_flag(0),
            "priming must leave stale mergeable flags behind"
        );

        let sizes = kernel.pipe_write_sizes();
        let total: usize = sizes.iter().sum();
        assert_eq!(total, 65_536, "fill phase should move exactly the capacity");
        assert!(
            sizes.iter().all(|&n| n <= 4096),
            "fill transfers should be at most one page, got {sizes:?}"
        );
    }

    #[test]
    fn prepare_honors_a_smaller_ring() {
        let kernel = FakeKernel::patched().with_pipe_capacity(8192);
        let pipe = PreparedPipe::prepare(&kernel).unwrap();
        assert_eq!(pipe.capacity(), 8192);
        assert_eq!(kernel.pipe_write_sizes(), vec![4096, 4096]);
    }

    #[test]
    fn pipe_creation_failure_is_fatal_and_leaks_nothing() {
        let kernel = FakeKernel::patched().with_faults(Faults {
            pipe: Some(Errno::INVAL),
            ..Faults::default()
        });
        let err = PreparedPipe::prepare(&kernel).unwrap_err();
        assert_eq!(
            err,
            WriteError::PipeUnavailable {
                errno: Errno::INVAL
            }
        );
        assert_eq!(kernel.open_descriptors(), 0);
    }

    #[test]
    fn capacity_query_failure_closes_both_ends() {
        let kernel = FakeKernel::patched().with_faults(Faults {
            capacity: Some(Errno::BADF),
            ..Faults::default()
        });
        let err = PreparedPipe::prepare(&kernel).unwrap_err();
        assert_eq!(err, WriteError::CapacityQueryFailed { errno: Errno::BADF });
        assert_eq!(
            kernel.open_descriptors(),
            0,
            "guards must close the pipe ends on the error path"
        );
    }

    #[test]
    fn both_ends_close_on_drop() {
        let kernel = FakeKernel::patched();
        {
            let _pipe = PreparedPipe::prepare(&kernel).unwrap();
            assert_eq!(kernel.open_descriptors(), 2);
        }
        assert_eq!(kernel.open_descriptors(), 0);
    }
}
