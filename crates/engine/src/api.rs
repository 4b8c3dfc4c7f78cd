//! Public API types for the `rollcall` coordinator engine.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for one coordinator run (one batch).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface the listener binds to.
    pub host: String,

    /// Listener port; `0` picks an ephemeral port (reported via
    /// [`DispatchEvent::Started`]).
    pub port: u16,

    /// Number of workers the roster waits for before scheduling.
    pub workers: usize,

    /// How long each `accept` may wait while the roster fills.
    pub accept_timeout: Duration,

    /// Bound on every single socket read/write; `None` waits forever.
    pub io_timeout: Option<Duration>,

    /// Class register file pushed to every worker during setup.
    pub class_register: PathBuf,

    /// Directory of model blobs pushed to every worker during setup.
    pub models_dir: PathBuf,

    /// Batch descriptor file (frame list, timestamps, scheduling mode).
    pub descriptor: PathBuf,

    /// Result log, rewritten after every recorded frame.
    pub result_log: PathBuf,
}

impl ServerConfig {
    /// Default accept timeout while waiting for workers.
    pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(8);
}

/// Scheduling policy for one batch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    /// Pre-partition the frame list into one contiguous slice per worker.
    Static,
    /// Hand frames to whichever worker is free, one at a time.
    Dynamic,
}

impl ProcessingMode {
    /// Parse the descriptor's mode string, case-insensitively.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.eq_ignore_ascii_case("static") {
            Some(ProcessingMode::Static)
        } else if raw.eq_ignore_ascii_case("dynamic") {
            Some(ProcessingMode::Dynamic)
        } else {
            None
        }
    }

    /// Canonical lowercase wire form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMode::Static => "static",
            ProcessingMode::Dynamic => "dynamic",
        }
    }
}

impl std::fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a finished batch went, overall.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BatchStatus {
    /// Every scheduled frame was processed and no worker failed.
    Complete,
    /// Some results were recorded, but frames or workers were lost.
    Partial,
    /// Nothing was recorded.
    Failed,
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BatchStatus::Complete => "complete",
            BatchStatus::Partial => "partial",
            BatchStatus::Failed => "failed",
        })
    }
}

/// Summary returned when the coordinator finishes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchReport {
    /// Overall outcome.
    pub status: BatchStatus,
    /// Frames listed in the batch descriptor.
    pub frame_count: usize,
    /// Frames the chosen policy intended to dispatch (static mode drops
    /// the `frame_count mod workers` remainder).
    pub scheduled: usize,
    /// Results actually appended to the log.
    pub recorded: usize,
    /// Ids of workers whose dialog failed, ascending.
    pub failed_workers: Vec<u32>,
}

/// Coordinator event stream payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum DispatchEvent {
    /// Listener is up. Carries the actually-bound address.
    Started {
        /// Bound interface.
        host: String,
        /// Bound port.
        port: u16,
    },
    /// A worker finished the greeting and reported its name.
    WorkerConnected {
        /// Assigned slot id (1-based).
        worker_id: u32,
        /// Hostname the worker reported.
        name: String,
        /// Remote address.
        addr: String,
    },
    /// A worker received the register and all model blobs.
    WorkerInitialized {
        /// Slot id.
        worker_id: u32,
    },
    /// Every slot is filled and initialized.
    RosterFilled {
        /// Roster size.
        workers: usize,
    },
    /// The scheduling mode was announced to all workers.
    ModeAnnounced {
        /// Announced mode.
        mode: ProcessingMode,
    },
    /// One frame went out to a worker.
    TaskSent {
        /// Slot id.
        worker_id: u32,
        /// Frame timestamp string.
        timestamp: String,
    },
    /// One result came back and was persisted.
    ResultRecorded {
        /// Slot id.
        worker_id: u32,
        /// Log length after the append.
        recorded: usize,
    },
    /// Static partitioning dropped the division remainder.
    TasksDropped {
        /// Number of frames never dispatched.
        count: usize,
    },
    /// A worker's dialog failed; its participation ends here.
    WorkerFailed {
        /// Slot id.
        worker_id: u32,
        /// Failure description.
        message: String,
    },
    /// A non-fatal irregularity.
    Warning {
        /// Description.
        message: String,
    },
    /// A fatal error (for one dialog or the whole batch).
    Error {
        /// Description.
        message: String,
    },
    /// Graceful stop was requested.
    StopRequested,
    /// All worker connections were closed.
    WorkersReleased,
    /// The coordinator is done.
    Stopped {
        /// Final status.
        status: BatchStatus,
    },
}

/// Handle to a running coordinator instance.
pub struct CoordinatorHandle {
    pub(crate) inner: std::sync::Arc<crate::driver::CoordinatorInner>,
    pub(crate) join: tokio::task::JoinHandle<anyhow::Result<BatchReport>>,
}

/// Start a coordinator for one batch.
pub fn start_coordinator(config: ServerConfig) -> CoordinatorHandle {
    crate::driver::start_coordinator(config)
}

impl CoordinatorHandle {
    /// Subscribe to the coordinator event stream.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<DispatchEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Request a graceful stop (finish in-flight frames, then clean up).
    pub fn request_stop(&self) {
        self.inner.request_stop();
    }

    /// Wait for the batch to finish and take its report.
    pub async fn wait(self) -> anyhow::Result<BatchReport> {
        match self.join.await {
            Ok(res) => res,
            Err(err) => Err(anyhow::anyhow!("coordinator task join error: {err}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ProcessingMode;

    #[test]
    fn mode_parsing_is_case_insensitive() {
        assert_eq!(ProcessingMode::parse("static"), Some(ProcessingMode::Static));
        assert_eq!(ProcessingMode::parse("Static"), Some(ProcessingMode::Static));
        assert_eq!(ProcessingMode::parse("DYNAMIC"), Some(ProcessingMode::Dynamic));
        assert_eq!(ProcessingMode::parse("round-robin"), None);
    }
}
