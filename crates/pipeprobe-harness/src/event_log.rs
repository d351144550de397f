//! JSON-lines event log for probe runs.
//!
//! One JSON object per line, timestamped in unix-epoch milliseconds, with a
//! `probe::<run>::<seq>` trace id minted per event. Consumers tail the file;
//! absent optional fields are omitted rather than null. Logging is
//! best-effort by contract: the harness never lets an emit failure change a
//! verdict.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Severity of one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// How a step ended, when the event marks a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOutcome {
    Pass,
    Fail,
    Skip,
}

/// One log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeEvent {
    /// Milliseconds since the unix epoch at emit time.
    pub unix_ms: u64,
    /// Filled by the emitter when left empty.
    pub trace_id: String,
    pub level: EventLevel,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<EventOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errno: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ProbeEvent {
    #[must_use]
    pub fn new(level: EventLevel, event: impl Into<String>) -> Self {
        ProbeEvent {
            unix_ms: unix_ms_now(),
            trace_id: String::new(),
            level,
            event: event.into(),
            outcome: None,
            errno: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: EventOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    #[must_use]
    pub fn with_errno(mut self, errno: i32) -> Self {
        self.errno = Some(errno);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Writes events as JSON lines and mints their trace ids.
pub struct LogEmitter {
    writer: Box<dyn Write>,
    seq: u64,
    run_id: String,
}

impl LogEmitter {
    /// Emit into a freshly created (or truncated) file, buffered.
    pub fn to_file(path: &Path, run_id: &str) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::to_writer(Box::new(BufWriter::new(file)), run_id))
    }

    /// Emit into any writer. Tests sink into shared buffers this way.
    #[must_use]
    pub fn to_writer(writer: Box<dyn Write>, run_id: &str) -> Self {
        LogEmitter {
            writer,
            seq: 0,
            run_id: run_id.to_string(),
        }
    }

    fn next_trace_id(&mut self) -> String {
        let id = format!("probe::{}::{:03}", self.run_id, self.seq);
        self.seq += 1;
        id
    }

    /// Write one event as a JSON line, minting a trace id if the event
    /// carries none, and hand the completed event back.
    pub fn emit(&mut self, mut event: ProbeEvent) -> io::Result<ProbeEvent> {
        if event.trace_id.is_empty() {
            event.trace_id = self.next_trace_id();
        }
        let line = serde_json::to_string(&event)?;
        writeln!(self.writer, "{line}")?;
        Ok(event)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl std::fmt::Debug for LogEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogEmitter")
            .field("seq", &self.seq)
            .field("run_id", &self.run_id)
            .finish_non_exhaustive()
    }
}

fn unix_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn trace_ids_are_sequential_per_run() {
        let buf = SharedBuf::default();
        let mut log = LogEmitter::to_writer(Box::new(buf.clone()), "t1");
        let a = log.emit(ProbeEvent::new(EventLevel::Info, "probe_started")).unwrap();
        let b = log.emit(ProbeEvent::new(EventLevel::Info, "verdict")).unwrap();
        assert_eq!(a.trace_id, "probe::t1::000");
        assert_eq!(b.trace_id, "probe::t1::001");
    }

    #[test]
    fn preset_trace_ids_survive_emission() {
        let buf = SharedBuf::default();
        let mut log = LogEmitter::to_writer(Box::new(buf.clone()), "t1");
        let mut event = ProbeEvent::new(EventLevel::Warn, "artifact_removed");
        event.trace_id = "external::7".to_string();
        let emitted = log.emit(event).unwrap();
        assert_eq!(emitted.trace_id, "external::7");
    }

    #[test]
    fn absent_optionals_are_omitted_from_the_line() {
        let event = ProbeEvent::new(EventLevel::Info, "probe_started");
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("outcome"), "got {json}");
        assert!(!json.contains("errno"), "got {json}");
        assert!(!json.contains("details"), "got {json}");

        let event = ProbeEvent::new(EventLevel::Error, "overwrite_attempted")
            .with_outcome(EventOutcome::Fail)
            .with_errno(13)
            .with_details("permission denied");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"outcome\":\"fail\""), "got {json}");
        assert!(json.contains("\"errno\":13"), "got {json}");
    }

    #[test]
    fn every_line_parses_back_as_an_event() {
        let buf = SharedBuf::default();
        let mut log = LogEmitter::to_writer(Box::new(buf.clone()), "t2");
        log.emit(ProbeEvent::new(EventLevel::Info, "probe_started")).unwrap();
        log.emit(
            ProbeEvent::new(EventLevel::Info, "verdict").with_outcome(EventOutcome::Pass),
        )
        .unwrap();
        log.flush().unwrap();

        let text = buf.contents();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let parsed: ProbeEvent = serde_json::from_str(line).unwrap();
            assert!(parsed.trace_id.starts_with("probe::t2::"), "got {parsed:?}");
        }
    }
}
