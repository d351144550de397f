//! Probe outcome types and the machine-readable report.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// What one probe run concluded about the running kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// The sequence ran and the artifact kept its original bytes.
    Safe,
    /// The payload showed up in a file that was only ever opened read-only.
    Vulnerable,
    /// The sequence could not complete, or the read-back matched neither
    /// expected content. No claim about the kernel either way.
    Error,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Verdict::Safe => "You are safe",
            Verdict::Vulnerable => "VULNERABLE!",
            Verdict::Error => "probe error",
        };
        f.write_str(text)
    }
}

/// Everything a run observed, serializable as JSON.
///
/// Content is reported as SHA-256 digests rather than raw bytes, so the
/// report stays small and diffable whatever the artifact holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub verdict: Verdict,
    /// Artifact the probe created and attacked.
    pub target: PathBuf,
    pub offset: u64,
    pub payload_len: usize,
    pub page_size: u64,
    /// Digest of the artifact as written.
    pub baseline_sha256: String,
    /// Digest the artifact would have after a successful merge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_sha256: Option<String>,
    /// Digest of the artifact as read back after the attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_class: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl ProbeReport {
    /// Pretty-printed JSON rendering.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Lowercase hex SHA-256 of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        let _ = write!(&mut out, "{b:02x}");
    }
    out
}
