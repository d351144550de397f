//! Full harness runs against the deterministic kernel model: both kernel
//! flavors, fault injection on every stage, and the cleanup guarantees.

use std::path::Path;

use pipeprobe_core::{Errno, FakeKernel, Faults};
use pipeprobe_harness::{
    LogEmitter, ProbeConfig, ProbeEvent, ProbeHarness, ProbeReport, Verdict, sha256_hex,
};

const ARTIFACT: &str = "/probe/artifact.txt";

fn run_probe(kernel: &FakeKernel, config: ProbeConfig) -> ProbeReport {
    ProbeHarness::new(config).run(kernel)
}

#[test]
fn vulnerable_kernel_yields_a_vulnerable_verdict() {
    let kernel = FakeKernel::vulnerable();
    let report = run_probe(&kernel, ProbeConfig::new(ARTIFACT));

    assert_eq!(report.verdict, Verdict::Vulnerable);
    assert_eq!(report.baseline_sha256, sha256_hex(b"Hello World!\n"));
    assert_eq!(
        report.observed_sha256.as_deref(),
        Some(sha256_hex(b"Hello mammy!\n").as_str()),
        "the payload should have landed in the read-only artifact"
    );
    assert_eq!(report.observed_sha256, report.expected_sha256);
    assert!(report.error.is_none());

    assert_eq!(
        kernel.file_bytes(Path::new(ARTIFACT)),
        None,
        "the artifact must be removed after the run"
    );
    assert_eq!(kernel.open_descriptors(), 0, "no descriptor may leak");
}

#[test]
fn patched_kernel_yields_a_safe_verdict() {
    let kernel = FakeKernel::patched();
    let report = run_probe(&kernel, ProbeConfig::new(ARTIFACT));

    assert_eq!(report.verdict, Verdict::Safe);
    assert_eq!(
        report.observed_sha256.as_deref(),
        Some(report.baseline_sha256.as_str()),
        "a patched kernel must leave the artifact untouched"
    );
    assert_eq!(kernel.file_bytes(Path::new(ARTIFACT)), None);
    assert_eq!(kernel.open_descriptors(), 0);
}

#[test]
fn repeated_runs_reach_the_same_verdict() {
    let kernel = FakeKernel::vulnerable();
    let mut harness = ProbeHarness::new(ProbeConfig::new(ARTIFACT));
    let first = harness.run(&kernel);
    let second = harness.run(&kernel);

    assert_eq!(first.verdict, Verdict::Vulnerable);
    assert_eq!(second.verdict, first.verdict, "runs must be independent");
    assert_eq!(kernel.file_bytes(Path::new(ARTIFACT)), None);
    assert_eq!(kernel.open_descriptors(), 0);
}

#[test]
fn transfer_fault_yields_an_error_verdict_and_still_cleans_up() {
    let kernel = FakeKernel::vulnerable().with_faults(Faults {
        splice: Some(Errno::INVAL),
        ..Faults::default()
    });
    let report = run_probe(&kernel, ProbeConfig::new(ARTIFACT));

    assert_eq!(report.verdict, Verdict::Error);
    assert_eq!(report.error_class.as_deref(), Some("transfer"));
    assert!(report.observed_sha256.is_none(), "no read-back after a failure");
    assert_eq!(
        kernel.file_bytes(Path::new(ARTIFACT)),
        None,
        "cleanup must run on the error path too"
    );
    assert_eq!(kernel.open_descriptors(), 0);
}

#[test]
fn boundary_offset_is_a_config_error_before_any_pipe_exists() {
    let kernel = FakeKernel::patched();
    let report = run_probe(&kernel, ProbeConfig::new(ARTIFACT).with_offset(0));

    assert_eq!(report.verdict, Verdict::Error);
    assert_eq!(report.error_class.as_deref(), Some("config"));
    let message = report.error.as_deref().unwrap_or_default();
    assert!(message.contains("page boundary"), "got {message:?}");
    assert_eq!(kernel.pipes_created(), 0);
    assert_eq!(kernel.file_bytes(Path::new(ARTIFACT)), None);
}

#[test]
fn create_fault_is_a_resource_error() {
    let kernel = FakeKernel::patched().with_faults(Faults {
        create: Some(Errno::ACCES),
        ..Faults::default()
    });
    let report = run_probe(&kernel, ProbeConfig::new(ARTIFACT));

    assert_eq!(report.verdict, Verdict::Error);
    assert_eq!(report.error_class.as_deref(), Some("resource"));
    assert!(
        report.error.as_deref().unwrap_or_default().contains("create"),
        "the message should name the failing step: {:?}",
        report.error
    );
}

#[test]
fn payload_equal_to_replaced_bytes_reads_safe_with_a_note() {
    // Overwriting "World" with "World" succeeds invisibly on both flavors,
    // so classification prefers Safe and the report calls the blind spot out.
    let kernel = FakeKernel::vulnerable();
    let report = run_probe(
        &kernel,
        ProbeConfig::new(ARTIFACT).with_payload(b"World".as_slice()),
    );

    assert_eq!(report.verdict, Verdict::Safe);
    assert_eq!(report.expected_sha256.as_deref(), Some(report.baseline_sha256.as_str()));
    assert!(
        report.notes.iter().any(|n| n.contains("not observable")),
        "the degenerate payload deserves a note, got {:?}",
        report.notes
    );
}

#[test]
fn custom_content_and_offset_probe_the_requested_bytes() {
    let kernel = FakeKernel::vulnerable();
    let report = run_probe(
        &kernel,
        ProbeConfig::new(ARTIFACT)
            .with_content(b"The quick brown fox\n".as_slice())
            .with_offset(4)
            .with_payload(b"swift".as_slice()),
    );

    assert_eq!(report.verdict, Verdict::Vulnerable);
    assert_eq!(
        report.observed_sha256.as_deref(),
        Some(sha256_hex(b"The swift brown fox\n").as_str())
    );
}

#[test]
fn event_log_records_the_whole_sequence_in_order() {
    let log_path = std::env::temp_dir().join(format!(
        "pipeprobe-events-{}.jsonl",
        std::process::id()
    ));
    let kernel = FakeKernel::vulnerable();
    let log = LogEmitter::to_file(&log_path, "fake").unwrap();
    let report = ProbeHarness::new(ProbeConfig::new(ARTIFACT))
        .with_log(log)
        .run(&kernel);
    assert_eq!(report.verdict, Verdict::Vulnerable);

    let text = std::fs::read_to_string(&log_path).unwrap();
    let events: Vec<ProbeEvent> = text
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let names: Vec<&str> = events.iter().map(|e| e.event.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "probe_started",
            "artifact_created",
            "overwrite_attempted",
            "readback_done",
            "verdict",
            "artifact_removed",
        ]
    );
    assert!(events.iter().all(|e| e.trace_id.starts_with("probe::fake::")));
    std::fs::remove_file(&log_path).unwrap();
}

#[test]
fn report_json_roundtrips_after_a_run() {
    let kernel = FakeKernel::patched();
    let report = run_probe(&kernel, ProbeConfig::new(ARTIFACT));
    let parsed: ProbeReport = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(parsed, report);
}
