//! Probe harness: artifact lifecycle, verdict classification, reporting,
//! and the JSON-lines event log.
//!
//! The harness owns everything around the core overwrite sequence. It
//! creates the disposable read-only artifact, runs the sequence from
//! `pipeprobe-core`, reads the artifact back, classifies the result as
//! [`Verdict::Safe`], [`Verdict::Vulnerable`], or [`Verdict::Error`], and
//! removes the artifact unconditionally. Kernel access stays behind
//! [`pipeprobe_core::KernelIo`], so the whole harness runs under the fake
//! provider in tests.

#![forbid(unsafe_code)]

pub mod event_log;
pub mod probe;
pub mod report;

pub use event_log::{EventLevel, EventOutcome, LogEmitter, ProbeEvent};
pub use probe::{
    ARTIFACT_MODE, DEFAULT_CONTENT, DEFAULT_OFFSET, DEFAULT_PAYLOAD, ProbeConfig, ProbeHarness,
};
pub use report::{ProbeReport, Verdict, sha256_hex};
