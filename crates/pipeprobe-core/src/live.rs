//! Real-kernel provider.
//!
//! Thin veneer over the raw syscalls the probe needs. Each method makes
//! exactly one call, checks the return code, and converts `errno` into
//! [`Errno`]. All `unsafe` in the crate lives here; every block carries the
//! invariant that makes it sound.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::error::Errno;
use crate::io::{Fd, KernelIo};
use crate::page::FALLBACK_PAGE_SIZE;

/// Provider backed by the running kernel.
#[derive(Debug, Default, Clone, Copy)]
pub struct LiveKernel;

impl LiveKernel {
    #[must_use]
    pub fn new() -> Self {
        LiveKernel
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn last_errno() -> Errno {
    Errno(std::io::Error::last_os_error().raw_os_error().unwrap_or(0))
}

fn c_path(path: &Path) -> Result<CString, Errno> {
    // An interior NUL can never name a real file.
    CString::new(path.as_os_str().as_bytes()).map_err(|_| Errno::INVAL)
}

// ---------------------------------------------------------------------------
// KernelIo
// ---------------------------------------------------------------------------

impl KernelIo for LiveKernel {
    fn page_size(&self) -> u64 {
        // SAFETY: sysconf has no memory preconditions.
        let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if raw > 0 { raw as u64 } else { FALLBACK_PAGE_SIZE }
    }

    fn create_pipe(&self) -> Result<(Fd, Fd), Errno> {
        let mut fds = [0i32; 2];
        // SAFETY: fds is a valid array of two c_ints, as pipe(2) requires.
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        if rc < 0 {
            return Err(last_errno());
        }
        Ok((Fd(fds[0]), Fd(fds[1])))
    }

    fn pipe_capacity(&self, write_end: Fd) -> Result<usize, Errno> {
        // SAFETY: F_GETPIPE_SZ takes no pointer argument.
        let rc = unsafe { libc::fcntl(write_end.0, libc::F_GETPIPE_SZ) };
        if rc < 0 {
            return Err(last_errno());
        }
        Ok(rc as usize)
    }

    fn open_readonly(&self, path: &Path) -> Result<Fd, Errno> {
        let c = c_path(path)?;
        // SAFETY: c is a valid NUL-terminated string for the call's duration.
        let rc = unsafe { libc::open(c.as_ptr(), libc::O_RDONLY) };
        if rc < 0 {
            return Err(last_errno());
        }
        Ok(Fd(rc))
    }

    fn create_file(&self, path: &Path, mode: u32) -> Result<Fd, Errno> {
        let c = c_path(path)?;
        // SAFETY: c is a valid NUL-terminated string; O_CREAT supplies the
        // variadic mode argument open(2) expects.
        let rc = unsafe {
            libc::open(
                c.as_ptr(),
                libc::O_CREAT | libc::O_WRONLY | libc::O_TRUNC,
                mode as libc::mode_t,
            )
        };
        if rc < 0 {
            return Err(last_errno());
        }
        Ok(Fd(rc))
    }

    fn file_size(&self, fd: Fd) -> Result<u64, Errno> {
        // SAFETY: stat is plain data; zeroed is a valid initial value and the
        // kernel overwrites the fields we read.
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        // SAFETY: st points to a full stat buffer for the call's duration.
        let rc = unsafe { libc::fstat(fd.0, &mut st) };
        if rc < 0 {
            return Err(last_errno());
        }
        Ok(u64::try_from(st.st_size).unwrap_or(0))
    }

    fn read(&self, fd: Fd, buf: &mut [u8]) -> Result<usize, Errno> {
        // SAFETY: buf is a valid writable region of buf.len() bytes.
        let rc = unsafe { libc::read(fd.0, buf.as_mut_ptr().cast(), buf.len()) };
        if rc < 0 {
            return Err(last_errno());
        }
        Ok(rc as usize)
    }

    fn write(&self, fd: Fd, buf: &[u8]) -> Result<usize, Errno> {
        // SAFETY: buf is a valid readable region of buf.len() bytes.
        let rc = unsafe { libc::write(fd.0, buf.as_ptr().cast(), buf.len()) };
        if rc < 0 {
            return Err(last_errno());
        }
        Ok(rc as usize)
    }

    fn splice_to_pipe(
        &self,
        file: Fd,
        offset: &mut i64,
        pipe_write: Fd,
        len: usize,
    ) -> Result<usize, Errno> {
        let mut off: libc::loff_t = *offset;
        // SAFETY: off is a valid loff_t for the call's duration; the output
        // offset is NULL because the pipe end has no file position.
        let rc = unsafe {
            libc::splice(
                file.0,
                &mut off,
                pipe_write.0,
                std::ptr::null_mut(),
                len,
                0,
            )
        };
        if rc < 0 {
            return Err(last_errno());
        }
        *offset = off;
        Ok(rc as usize)
    }

    fn unlink(&self, path: &Path) -> Result<(), Errno> {
        let c = c_path(path)?;
        // SAFETY: c is a valid NUL-terminated string for the call's duration.
        let rc = unsafe { libc::unlink(c.as_ptr()) };
        if rc < 0 {
            return Err(last_errno());
        }
        Ok(())
    }

    fn close(&self, fd: Fd) -> Result<(), Errno> {
        // SAFETY: close tolerates any descriptor value; invalid ones fail
        // with EBADF rather than faulting.
        let rc = unsafe { libc::close(fd.0) };
        if rc < 0 {
            return Err(last_errno());
        }
        Ok(())
    }
}
