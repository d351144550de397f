//! Deterministic in-process kernel model.
//!
//! [`FakeKernel`] implements [`KernelIo`] over a pipe-ring model precise
//! enough to reproduce the behavior the probe measures: writes fill
//! page-sized slots whose mergeable flag survives a full drain, splice
//! attaches a slot that references the source file's cached page, and on the
//! [`KernelFlavor::Vulnerable`] flavor a write that merges into such a slot
//! lands in the backing file. The [`KernelFlavor::Patched`] flavor never
//! treats a spliced slot as mergeable, which is the whole fix.
//!
//! [`Faults`] injects errors at each syscall so error paths can be tested
//! without a cooperating kernel.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::Errno;
use crate::io::{Fd, KernelIo};

/// Which kernel behavior the fake reproduces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KernelFlavor {
    /// Spliced slots are never mergeable; writes after a splice open a fresh
    /// slot and the backing file is untouched.
    #[default]
    Patched,
    /// A spliced slot inherits a stale mergeable flag, so the next write
    /// merges into the cached page and shows up in the backing file.
    Vulnerable,
}

/// Error injection plan, one knob per syscall the probe issues.
#[derive(Debug, Clone, Copy, Default)]
pub struct Faults {
    /// Fail `open_readonly` with this errno.
    pub open: Option<Errno>,
    /// Fail `create_file` with this errno.
    pub create: Option<Errno>,
    /// Fail `file_size` with this errno.
    pub stat: Option<Errno>,
    /// Fail `create_pipe` with this errno.
    pub pipe: Option<Errno>,
    /// Fail `pipe_capacity` with this errno.
    pub capacity: Option<Errno>,
    /// Fail `splice_to_pipe` with this errno.
    pub splice: Option<Errno>,
    /// Make `splice_to_pipe` report zero bytes moved.
    pub short_splice: bool,
    /// Fail the pipe write that follows a splice with this errno.
    pub payload_write: Option<Errno>,
    /// Truncate the pipe write that follows a splice to this many bytes.
    pub short_payload_write: Option<usize>,
}

#[derive(Debug, Clone)]
struct FakeFile {
    bytes: Vec<u8>,
    mode: u32,
}

#[derive(Debug, Clone)]
enum Handle {
    ReadFile { path: PathBuf, pos: u64 },
    WriteFile { path: PathBuf },
    PipeReader { pipe: usize },
    PipeWriter { pipe: usize },
}

/// Where a spliced slot's bytes came from, and where a merged write lands.
#[derive(Debug, Clone)]
struct PageRef {
    path: PathBuf,
    /// Absolute file offset the next merged byte writes to.
    cursor: u64,
    /// Merges stop at the end of the referenced page.
    page_end: u64,
}

#[derive(Debug, Clone)]
struct Slot {
    data: Vec<u8>,
    consumed: usize,
    can_merge: bool,
    page: Option<PageRef>,
}

#[derive(Debug, Default)]
struct FakePipe {
    slots: VecDeque<Slot>,
    capacity: usize,
    /// Set when a fully drained mergeable slot frees its ring entry; the
    /// flag it leaves behind is what a later splice inherits.
    stale_mergeable: bool,
}

impl FakePipe {
    fn buffered(&self) -> usize {
        self.slots.iter().map(|s| s.data.len() - s.consumed).sum()
    }
}

#[derive(Debug, Default)]
struct FakeState {
    files: BTreeMap<PathBuf, FakeFile>,
    handles: BTreeMap<i32, Handle>,
    pipes: Vec<FakePipe>,
    next_fd: i32,
    pipe_write_sizes: Vec<usize>,
}

impl FakeState {
    fn mint_fd(&mut self, handle: Handle) -> Fd {
        let fd = self.next_fd;
        self.next_fd += 1;
        self.handles.insert(fd, handle);
        Fd(fd)
    }

    /// Write `buf` into the pipe the way the ring does: merge into the tail
    /// slot when its flag allows, then open fresh page-sized slots. Returns
    /// the number of bytes accepted.
    fn fill_pipe(&mut self, pipe_idx: usize, buf: &[u8], page_size: u64) -> usize {
        let files = &mut self.files;
        let pipe = &mut self.pipes[pipe_idx];
        let space = pipe.capacity.saturating_sub(pipe.buffered());
        let total = buf.len().min(space);
        if total == 0 {
            return 0;
        }
        let mut remaining = &buf[..total];
        let page = usize::try_from(page_size).unwrap_or(usize::MAX).max(1);

        if let Some(tail) = pipe.slots.back_mut() {
            if tail.can_merge {
                let Slot { data, page: backing, .. } = tail;
                match backing {
                    Some(page_ref) => {
                        // The merge lands in the referenced cached page, so
                        // it writes through to the backing file. Bytes past
                        // the file's end stay in the slot but never grow the
                        // file, matching what the page cache does.
                        let room = usize::try_from(page_ref.page_end.saturating_sub(page_ref.cursor))
                            .unwrap_or(usize::MAX);
                        let n = remaining.len().min(room);
                        if n > 0 {
                            if let Some(file) = files.get_mut(&page_ref.path) {
                                let start =
                                    usize::try_from(page_ref.cursor).unwrap_or(usize::MAX);
                                if start < file.bytes.len() {
                                    let end = (start + n).min(file.bytes.len());
                                    file.bytes[start..end]
                                        .copy_from_slice(&remaining[..end - start]);
                                }
                            }
                            data.extend_from_slice(&remaining[..n]);
                            page_ref.cursor += n as u64;
                            remaining = &remaining[n..];
                        }
                    }
                    None => {
                        let room = page.saturating_sub(data.len());
                        let n = remaining.len().min(room);
                        if n > 0 {
                            data.extend_from_slice(&remaining[..n]);
                            remaining = &remaining[n..];
                        }
                    }
                }
            }
        }

        while !remaining.is_empty() {
            let n = remaining.len().min(page);
            pipe.slots.push_back(Slot {
                data: remaining[..n].to_vec(),
                consumed: 0,
                can_merge: true,
                page: None,
            });
            remaining = &remaining[n..];
        }
        total
    }

    /// Read from the front of the ring. A fully drained slot pops, and if it
    /// was mergeable its flag stays behind on the freed entry.
    fn drain_pipe(&mut self, pipe_idx: usize, buf: &mut [u8]) -> usize {
        let pipe = &mut self.pipes[pipe_idx];
        let mut copied = 0;
        while copied < buf.len() {
            let Some(front) = pipe.slots.front_mut() else {
                break;
            };
            let available = front.data.len() - front.consumed;
            let n = available.min(buf.len() - copied);
            buf[copied..copied + n]
                .copy_from_slice(&front.data[front.consumed..front.consumed + n]);
            front.consumed += n;
            copied += n;
            if front.consumed == front.data.len() {
                if front.can_merge {
                    pipe.stale_mergeable = true;
                }
                pipe.slots.pop_front();
            }
        }
        copied
    }
}

/// In-process [`KernelIo`] provider with injectable faults.
#[derive(Debug)]
pub struct FakeKernel {
    flavor: KernelFlavor,
    faults: Faults,
    page_size: u64,
    pipe_capacity: usize,
    state: Mutex<FakeState>,
}

impl FakeKernel {
    #[must_use]
    pub fn new(flavor: KernelFlavor) -> Self {
        FakeKernel {
            flavor,
            faults: Faults::default(),
            page_size: 4096,
            pipe_capacity: 65_536,
            state: Mutex::new(FakeState {
                next_fd: 3,
                ..FakeState::default()
            }),
        }
    }

    /// A kernel that clears the mergeable flag on spliced slots.
    #[must_use]
    pub fn patched() -> Self {
        Self::new(KernelFlavor::Patched)
    }

    /// A kernel that lets spliced slots inherit stale mergeable flags.
    #[must_use]
    pub fn vulnerable() -> Self {
        Self::new(KernelFlavor::Vulnerable)
    }

    #[must_use]
    pub fn with_faults(mut self, faults: Faults) -> Self {
        self.faults = faults;
        self
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub fn with_pipe_capacity(mut self, capacity: usize) -> Self {
        self.pipe_capacity = capacity;
        self
    }

    // ---------- state seeding and inspection ----------

    /// Install a file with mode 0644.
    pub fn put_file(&self, path: &Path, bytes: &[u8]) {
        self.state.lock().files.insert(
            path.to_path_buf(),
            FakeFile {
                bytes: bytes.to_vec(),
                mode: 0o644,
            },
        );
    }

    /// Current contents of a file, if it exists.
    #[must_use]
    pub fn file_bytes(&self, path: &Path) -> Option<Vec<u8>> {
        self.state.lock().files.get(path).map(|f| f.bytes.clone())
    }

    /// Mode bits of a file, if it exists.
    #[must_use]
    pub fn file_mode(&self, path: &Path) -> Option<u32> {
        self.state.lock().files.get(path).map(|f| f.mode)
    }

    /// Descriptors currently open. Zero after a leak-free run.
    #[must_use]
    pub fn open_descriptors(&self) -> usize {
        self.state.lock().handles.len()
    }

    /// Pipes created over the provider's lifetime.
    #[must_use]
    pub fn pipes_created(&self) -> usize {
        self.state.lock().pipes.len()
    }

    /// Sizes of every pipe write, in call order.
    #[must_use]
    pub fn pipe_write_sizes(&self) -> Vec<usize> {
        self.state.lock().pipe_write_sizes.clone()
    }

    /// Whether a drained mergeable slot left its flag on the given pipe.
    #[must_use]
    pub fn pipe_has_stale_flag(&self, pipe: usize) -> bool {
        self.state
            .lock()
            .pipes
            .get(pipe)
            .is_some_and(|p| p.stale_mergeable)
    }

    /// Bytes currently buffered in the given pipe.
    #[must_use]
    pub fn pipe_buffered(&self, pipe: usize) -> usize {
        self.state.lock().pipes.get(pipe).map_or(0, FakePipe::buffered)
    }
}

impl KernelIo for FakeKernel {
    fn page_size(&self) -> u64 {
        self.page_size
    }

    fn create_pipe(&self) -> Result<(Fd, Fd), Errno> {
        if let Some(errno) = self.faults.pipe {
            return Err(errno);
        }
        let mut state = self.state.lock();
        state.pipes.push(FakePipe {
            capacity: self.pipe_capacity,
            ..FakePipe::default()
        });
        let pipe = state.pipes.len() - 1;
        let reader = state.mint_fd(Handle::PipeReader { pipe });
        let writer = state.mint_fd(Handle::PipeWriter { pipe });
        Ok((reader, writer))
    }

    fn pipe_capacity(&self, write_end: Fd) -> Result<usize, Errno> {
        if let Some(errno) = self.faults.capacity {
            return Err(errno);
        }
        let state = self.state.lock();
        match state.handles.get(&write_end.0) {
            Some(Handle::PipeWriter { pipe }) => Ok(state.pipes[*pipe].capacity),
            _ => Err(Errno::BADF),
        }
    }

    fn open_readonly(&self, path: &Path) -> Result<Fd, Errno> {
        if let Some(errno) = self.faults.open {
            return Err(errno);
        }
        let mut state = self.state.lock();
        if !state.files.contains_key(path) {
            return Err(Errno::NOENT);
        }
        Ok(state.mint_fd(Handle::ReadFile {
            path: path.to_path_buf(),
            pos: 0,
        }))
    }

    fn create_file(&self, path: &Path, mode: u32) -> Result<Fd, Errno> {
        if let Some(errno) = self.faults.create {
            return Err(errno);
        }
        let mut state = self.state.lock();
        // Opening an existing file for writing honors its mode bits, so a
        // leftover read-only artifact must be unlinked first.
        if state.files.get(path).is_some_and(|f| f.mode & 0o200 == 0) {
            return Err(Errno::ACCES);
        }
        state.files.insert(
            path.to_path_buf(),
            FakeFile {
                bytes: Vec::new(),
                mode,
            },
        );
        Ok(state.mint_fd(Handle::WriteFile {
            path: path.to_path_buf(),
        }))
    }

    fn file_size(&self, fd: Fd) -> Result<u64, Errno> {
        if let Some(errno) = self.faults.stat {
            return Err(errno);
        }
        let state = self.state.lock();
        let path = match state.handles.get(&fd.0) {
            Some(Handle::ReadFile { path, .. }) | Some(Handle::WriteFile { path }) => path,
            _ => return Err(Errno::BADF),
        };
        match state.files.get(path) {
            Some(file) => Ok(file.bytes.len() as u64),
            None => Err(Errno::NOENT),
        }
    }

    fn read(&self, fd: Fd, buf: &mut [u8]) -> Result<usize, Errno> {
        let mut state = self.state.lock();
        match state.handles.get(&fd.0).cloned() {
            Some(Handle::ReadFile { path, pos }) => {
                let bytes = match state.files.get(&path) {
                    Some(file) => &file.bytes,
                    None => return Err(Errno::NOENT),
                };
                let start = usize::try_from(pos).unwrap_or(usize::MAX).min(bytes.len());
                let n = (bytes.len() - start).min(buf.len());
                buf[..n].copy_from_slice(&bytes[start..start + n]);
                if let Some(Handle::ReadFile { pos, .. }) = state.handles.get_mut(&fd.0) {
                    *pos += n as u64;
                }
                Ok(n)
            }
            Some(Handle::PipeReader { pipe }) => Ok(state.drain_pipe(pipe, buf)),
            _ => Err(Errno::BADF),
        }
    }

    fn write(&self, fd: Fd, buf: &[u8]) -> Result<usize, Errno> {
        let mut state = self.state.lock();
        match state.handles.get(&fd.0).cloned() {
            Some(Handle::WriteFile { path }) => match state.files.get_mut(&path) {
                Some(file) => {
                    file.bytes.extend_from_slice(buf);
                    Ok(buf.len())
                }
                None => Err(Errno::NOENT),
            },
            Some(Handle::PipeWriter { pipe }) => {
                state.pipe_write_sizes.push(buf.len());
                let backed_tail = state.pipes[pipe]
                    .slots
                    .back()
                    .is_some_and(|slot| slot.page.is_some());
                if backed_tail {
                    if let Some(errno) = self.faults.payload_write {
                        return Err(errno);
                    }
                    if let Some(limit) = self.faults.short_payload_write {
                        let n = limit.min(buf.len());
                        return Ok(state.fill_pipe(pipe, &buf[..n], self.page_size));
                    }
                }
                Ok(state.fill_pipe(pipe, buf, self.page_size))
            }
            _ => Err(Errno::BADF),
        }
    }

    fn splice_to_pipe(
        &self,
        file: Fd,
        offset: &mut i64,
        pipe_write: Fd,
        len: usize,
    ) -> Result<usize, Errno> {
        if let Some(errno) = self.faults.splice {
            return Err(errno);
        }
        if self.faults.short_splice {
            return Ok(0);
        }
        let mut state = self.state.lock();
        let path = match state.handles.get(&file.0) {
            Some(Handle::ReadFile { path, .. }) => path.clone(),
            _ => return Err(Errno::BADF),
        };
        let pipe_idx = match state.handles.get(&pipe_write.0) {
            Some(Handle::PipeWriter { pipe }) => *pipe,
            _ => return Err(Errno::BADF),
        };
        if *offset < 0 {
            return Err(Errno::INVAL);
        }
        let off = *offset as u64;
        let file_bytes = match state.files.get(&path) {
            Some(entry) => entry.bytes.clone(),
            None => return Err(Errno::NOENT),
        };
        let file_len = file_bytes.len() as u64;
        if off >= file_len {
            return Ok(0);
        }

        let space = {
            let pipe = &state.pipes[pipe_idx];
            pipe.capacity.saturating_sub(pipe.buffered())
        };
        let n = len.min((file_len - off) as usize).min(space);
        if n == 0 {
            return Ok(0);
        }

        let start = off as usize;
        let ps = self.page_size.max(1);
        let can_merge =
            self.flavor == KernelFlavor::Vulnerable && state.pipes[pipe_idx].stale_mergeable;
        state.pipes[pipe_idx].slots.push_back(Slot {
            data: file_bytes[start..start + n].to_vec(),
            consumed: 0,
            can_merge,
            page: Some(PageRef {
                path,
                cursor: off + n as u64,
                page_end: (off / ps) * ps + ps,
            }),
        });
        *offset += n as i64;
        Ok(n)
    }

    fn unlink(&self, path: &Path) -> Result<(), Errno> {
        match self.state.lock().files.remove(path) {
            Some(_) => Ok(()),
            None => Err(Errno::NOENT),
        }
    }

    fn close(&self, fd: Fd) -> Result<(), Errno> {
        match self.state.lock().handles.remove(&fd.0) {
            Some(_) => Ok(()),
            None => Err(Errno::BADF),
        }
    }
}
