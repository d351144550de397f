//! End-to-end probe runs.
//!
//! A run creates a disposable read-only artifact, drives the overwrite
//! sequence against it, reads it back, classifies the outcome, and removes
//! the artifact again whatever happened in between. Every step lands in the
//! event log when one is attached; a log failure never aborts a probe.

use std::path::{Path, PathBuf};

use pipeprobe_core::{Errno, ErrorClass, KernelIo, ScopedFd, WriteRequest, attempt_overwrite};

use crate::event_log::{EventLevel, EventOutcome, LogEmitter, ProbeEvent};
use crate::report::{ProbeReport, Verdict, sha256_hex};

/// Artifact content written by default.
pub const DEFAULT_CONTENT: &[u8] = b"Hello World!\n";
/// Default overwrite offset: the start of `World`.
pub const DEFAULT_OFFSET: u64 = 6;
/// Default payload, same length as the word it replaces.
pub const DEFAULT_PAYLOAD: &[u8] = b"mammy";
/// The artifact is read-only; that is the point of the measurement.
pub const ARTIFACT_MODE: u32 = 0o444;

/// One probe's inputs.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub artifact_path: PathBuf,
    pub content: Vec<u8>,
    pub mode: u32,
    pub offset: u64,
    pub payload: Vec<u8>,
}

impl ProbeConfig {
    /// Defaults reproduce the classic demonstration: replace `World` in
    /// `Hello World!` inside a mode-0444 file.
    pub fn new(artifact_path: impl Into<PathBuf>) -> Self {
        ProbeConfig {
            artifact_path: artifact_path.into(),
            content: DEFAULT_CONTENT.to_vec(),
            mode: ARTIFACT_MODE,
            offset: DEFAULT_OFFSET,
            payload: DEFAULT_PAYLOAD.to_vec(),
        }
    }

    #[must_use]
    pub fn with_content(mut self, content: impl Into<Vec<u8>>) -> Self {
        self.content = content.into();
        self
    }

    #[must_use]
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// The artifact bytes a successful merge would leave behind, when the
    /// request stays inside the content.
    #[must_use]
    pub fn expected_content(&self) -> Option<Vec<u8>> {
        if self.payload.is_empty() {
            return None;
        }
        let offset = usize::try_from(self.offset).ok()?;
        let end = offset.checked_add(self.payload.len())?;
        if end > self.content.len() {
            return None;
        }
        let mut expected = self.content.clone();
        expected[offset..end].copy_from_slice(&self.payload);
        Some(expected)
    }
}

/// Runs probes and classifies what they observe.
#[derive(Debug)]
pub struct ProbeHarness {
    config: ProbeConfig,
    log: Option<LogEmitter>,
}

impl ProbeHarness {
    #[must_use]
    pub fn new(config: ProbeConfig) -> Self {
        ProbeHarness { config, log: None }
    }

    #[must_use]
    pub fn with_log(mut self, log: LogEmitter) -> Self {
        self.log = Some(log);
        self
    }

    /// Execute one full probe against `io`.
    ///
    /// The artifact is removed on every path, including errors, so repeated
    /// runs against the same path behave identically.
    pub fn run<P: KernelIo + ?Sized>(&mut self, io: &P) -> ProbeReport {
        self.emit(
            ProbeEvent::new(EventLevel::Info, "probe_started").with_details(format!(
                "target {:?}, offset {}, payload {} bytes",
                self.config.artifact_path,
                self.config.offset,
                self.config.payload.len()
            )),
        );

        let report = self.run_sequence(io);

        let level = match report.verdict {
            Verdict::Safe => EventLevel::Info,
            Verdict::Vulnerable => EventLevel::Warn,
            Verdict::Error => EventLevel::Error,
        };
        let outcome = if report.verdict == Verdict::Error {
            EventOutcome::Fail
        } else {
            EventOutcome::Pass
        };
        let details = report
            .error
            .clone()
            .unwrap_or_else(|| report.verdict.to_string());
        self.emit(
            ProbeEvent::new(level, "verdict")
                .with_outcome(outcome)
                .with_details(details),
        );

        // The artifact never outlives the run, whichever way it went.
        match io.unlink(&self.config.artifact_path) {
            Ok(()) => self.emit(
                ProbeEvent::new(EventLevel::Info, "artifact_removed")
                    .with_outcome(EventOutcome::Pass),
            ),
            Err(errno) => self.emit(
                ProbeEvent::new(EventLevel::Warn, "artifact_removed")
                    .with_outcome(EventOutcome::Skip)
                    .with_errno(errno.raw()),
            ),
        }

        if let Some(log) = &mut self.log {
            let _ = log.flush();
        }
        report
    }

    fn run_sequence<P: KernelIo + ?Sized>(&mut self, io: &P) -> ProbeReport {
        let content = self.config.content.clone();
        let payload = self.config.payload.clone();
        let expected = self.config.expected_content();

        let mut report = ProbeReport {
            verdict: Verdict::Error,
            target: self.config.artifact_path.clone(),
            offset: self.config.offset,
            payload_len: payload.len(),
            page_size: io.page_size(),
            baseline_sha256: sha256_hex(&content),
            expected_sha256: expected.as_deref().map(sha256_hex),
            observed_sha256: None,
            error: None,
            error_class: None,
            notes: Vec::new(),
        };
        if expected.as_deref() == Some(content.as_slice()) {
            report.notes.push(
                "payload matches the bytes it replaces; a merged write is not observable"
                    .to_string(),
            );
        }

        if let Err(message) = self.create_artifact(io) {
            report.error = Some(message);
            report.error_class = Some(ErrorClass::Resource.as_str().to_string());
            return report;
        }
        self.emit(
            ProbeEvent::new(EventLevel::Info, "artifact_created")
                .with_outcome(EventOutcome::Pass)
                .with_details(format!("{} bytes, mode {:o}", content.len(), self.config.mode)),
        );

        let request = WriteRequest {
            offset: self.config.offset,
            payload: &payload,
        };
        match attempt_overwrite(io, &self.config.artifact_path, request) {
            Ok(()) => self.emit(
                ProbeEvent::new(EventLevel::Info, "overwrite_attempted")
                    .with_outcome(EventOutcome::Pass),
            ),
            Err(err) => {
                self.emit(
                    ProbeEvent::new(EventLevel::Error, "overwrite_attempted")
                        .with_outcome(EventOutcome::Fail)
                        .with_details(err.to_string()),
                );
                report.error = Some(err.to_string());
                report.error_class = Some(err.class().as_str().to_string());
                return report;
            }
        }

        match read_artifact(io, &self.config.artifact_path) {
            Ok(observed) => {
                self.emit(
                    ProbeEvent::new(EventLevel::Info, "readback_done")
                        .with_outcome(EventOutcome::Pass),
                );
                report.observed_sha256 = Some(sha256_hex(&observed));
                if observed == content {
                    report.verdict = Verdict::Safe;
                } else if expected.as_deref() == Some(observed.as_slice()) {
                    report.verdict = Verdict::Vulnerable;
                } else {
                    report.error = Some(
                        "artifact content matches neither the original nor the overwritten form"
                            .to_string(),
                    );
                    report.error_class = Some(ErrorClass::Transfer.as_str().to_string());
                }
            }
            Err(errno) => {
                self.emit(
                    ProbeEvent::new(EventLevel::Error, "readback_done")
                        .with_outcome(EventOutcome::Fail)
                        .with_errno(errno.raw()),
                );
                report.error = Some(format!("cannot re-read artifact: {errno}"));
                report.error_class = Some(ErrorClass::Resource.as_str().to_string());
            }
        }
        report
    }

    fn create_artifact<P: KernelIo + ?Sized>(&mut self, io: &P) -> Result<(), String> {
        let path = self.config.artifact_path.clone();
        let content = self.config.content.clone();

        // A leftover read-only artifact would block the create, so clear the
        // name first.
        let _ = io.unlink(&path);

        let fd = match io.create_file(&path, self.config.mode) {
            Ok(fd) => fd,
            Err(errno) => {
                self.emit(
                    ProbeEvent::new(EventLevel::Error, "artifact_created")
                        .with_outcome(EventOutcome::Fail)
                        .with_errno(errno.raw()),
                );
                return Err(format!("cannot create artifact {path:?}: {errno}"));
            }
        };
        let guard = ScopedFd::new(io, fd);
        let mut written = 0;
        while written < content.len() {
            match io.write(guard.get(), &content[written..]) {
                Ok(0) => {
                    return Err(format!(
                        "artifact write stalled at {written} of {} bytes",
                        content.len()
                    ));
                }
                Ok(n) => written += n,
                Err(errno) => return Err(format!("cannot write artifact: {errno}")),
            }
        }
        Ok(())
    }

    /// Emit into the attached log, if any. A log failure never aborts the
    /// probe.
    fn emit(&mut self, event: ProbeEvent) {
        if let Some(log) = &mut self.log {
            let _ = log.emit(event);
        }
    }
}

fn read_artifact<P: KernelIo + ?Sized>(io: &P, path: &Path) -> Result<Vec<u8>, Errno> {
    let guard = ScopedFd::new(io, io.open_readonly(path)?);
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = io.read(guard.get(), &mut buf)?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    Ok(out)
}
