use std::path::Path;
use std::time::{Duration, Instant};

use rollcall_proto::wall_timestamp;

/// The per-frame analysis seam.
///
/// Implementations get the saved frame and its capture timestamp and
/// return one result record. The coordinator treats the record as
/// opaque JSON and only appends it to the batch log, so implementations
/// own its shape end to end; the only firm expectation downstream is a
/// `timestamp` field echoing the input.
pub trait Analyzer: Send + Sync {
    fn analyze(&self, image: &Path, timestamp: &str) -> anyhow::Result<serde_json::Value>;
}

/// Built-in analyzer that recognizes no one.
///
/// Stands in for a real face-analysis model during protocol and
/// scheduling tests; the configurable delay makes workers artificially
/// fast or slow to exercise the dynamic policy.
pub struct StubAnalyzer {
    delay: Duration,
}

impl StubAnalyzer {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Analyzer for StubAnalyzer {
    fn analyze(&self, image: &Path, timestamp: &str) -> anyhow::Result<serde_json::Value> {
        let started_at = wall_timestamp();
        let clock = Instant::now();

        // Touch the frame so a missing or unreadable file still fails
        // the task instead of silently producing a record.
        let _ = std::fs::metadata(image)?;

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        Ok(serde_json::json!({
            "timestamp": timestamp,
            "time_records": {
                "task_start_time": started_at,
                "task_end_time": wall_timestamp(),
                "task_time_taken": clock.elapsed().as_secs_f64(),
            },
            "people_present": [],
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_echoes_the_timestamp_and_reports_no_one() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("frame_00.jpg");
        std::fs::write(&image, b"bytes").unwrap();

        let analyzer = StubAnalyzer::new(Duration::ZERO);
        let record = analyzer.analyze(&image, "8/8/2024, 12:56:36 am, 0").unwrap();

        assert_eq!(record["timestamp"], "8/8/2024, 12:56:36 am, 0");
        assert!(record["people_present"].as_array().unwrap().is_empty());
        assert!(record["time_records"]["task_time_taken"].as_f64().is_some());
    }

    #[test]
    fn missing_frame_is_an_error() {
        let analyzer = StubAnalyzer::new(Duration::ZERO);
        let err = analyzer.analyze(Path::new("no/such/frame.jpg"), "t0");
        assert!(err.is_err());
    }
}
