//! Command-line probe.
//!
//! Runs one probe against the live kernel and prints the verdict. Exit code
//! 0 means the probe completed and classified the kernel either way; a
//! non-zero exit means the probe itself failed and made no claim.

use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use pipeprobe_core::LiveKernel;
use pipeprobe_harness::{DEFAULT_OFFSET, LogEmitter, ProbeConfig, ProbeHarness, Verdict};

#[derive(Parser, Debug)]
#[command(
    name = "pipeprobe",
    version,
    about = "Checks whether the running kernel lets pipe writes merge into \
             read-only page-cache pages (CVE-2022-0847)"
)]
struct Cli {
    /// Artifact path. Defaults to a per-process file under the temp dir.
    #[arg(long)]
    path: Option<PathBuf>,

    /// Offset of the first byte the payload replaces.
    #[arg(long, default_value_t = DEFAULT_OFFSET)]
    offset: u64,

    /// Replacement text written through the pipe. Defaults to "mammy".
    #[arg(long)]
    payload: Option<String>,

    /// Artifact content written before the attempt. Defaults to
    /// "Hello World!" plus a newline.
    #[arg(long)]
    content: Option<String>,

    /// Print the full report as JSON instead of the one-line verdict.
    #[arg(long)]
    json: bool,

    /// Also write the JSON report to this file.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Write JSON-lines events to this file.
    #[arg(long)]
    log: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let artifact = cli.path.unwrap_or_else(|| {
        std::env::temp_dir().join(format!("pipeprobe-{}.txt", std::process::id()))
    });

    let mut config = ProbeConfig::new(artifact).with_offset(cli.offset);
    if let Some(payload) = cli.payload {
        config = config.with_payload(payload.into_bytes());
    }
    if let Some(content) = cli.content {
        config = config.with_content(content.into_bytes());
    }

    let mut harness = ProbeHarness::new(config);
    if let Some(log_path) = &cli.log {
        let run_id = std::process::id().to_string();
        harness = harness.with_log(LogEmitter::to_file(log_path, &run_id)?);
    }

    let report = harness.run(&LiveKernel::new());

    if let Some(report_path) = &cli.report {
        std::fs::write(report_path, report.to_json()?)?;
    }
    if cli.json {
        println!("{}", report.to_json()?);
    }

    match report.verdict {
        Verdict::Safe | Verdict::Vulnerable => {
            if !cli.json {
                println!("{}", report.verdict);
            }
            Ok(())
        }
        Verdict::Error => {
            let message = report
                .error
                .unwrap_or_else(|| "probe failed for an unknown reason".to_string());
            Err(message.into())
        }
    }
}
