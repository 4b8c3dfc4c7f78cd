use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context as _;
use rollcall_proto::topic;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::api::{BatchReport, BatchStatus, CoordinatorHandle, DispatchEvent, ProcessingMode, ServerConfig};
use crate::batch::BatchDescriptor;
use crate::registry::Registry;
use crate::results::ResultLog;
use crate::scheduler;
use crate::setup::fill_roster;

pub(crate) struct CoordinatorInner {
    pub(crate) event_tx: broadcast::Sender<DispatchEvent>,
    stop_requested: AtomicBool,
}

impl CoordinatorInner {
    pub(crate) fn emit(&self, event: DispatchEvent) {
        let _ = self.event_tx.send(event);
    }

    pub(crate) fn request_stop(&self) {
        if !self.stop_requested.swap(true, Ordering::SeqCst) {
            self.emit(DispatchEvent::StopRequested);
        }
    }

    pub(crate) fn should_stop(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }
}

pub(crate) fn start_coordinator(config: ServerConfig) -> CoordinatorHandle {
    let (event_tx, _) = broadcast::channel::<DispatchEvent>(1024);
    let inner = Arc::new(CoordinatorInner {
        event_tx,
        stop_requested: AtomicBool::new(false),
    });

    let join = tokio::spawn(run(inner.clone(), config));
    CoordinatorHandle { inner, join }
}

/// One full batch: listen → fill roster → load descriptor → announce
/// mode → schedule → release workers → close listener.
async fn run(
    inner: Arc<CoordinatorInner>,
    cfg: ServerConfig,
) -> anyhow::Result<BatchReport> {
    let cfg = Arc::new(cfg);
    let listener = TcpListener::bind((cfg.host.as_str(), cfg.port))
        .await
        .with_context(|| format!("bind {}:{}", cfg.host, cfg.port))?;
    let local = listener.local_addr().context("listener local address")?;
    inner.emit(DispatchEvent::Started {
        host: local.ip().to_string(),
        port: local.port(),
    });

    let registry = Arc::new(Registry::new(cfg.workers));
    let outcome = run_batch(&inner, &cfg, &listener, &registry).await;

    // The cleanup path runs on success, failure, and interrupt alike.
    // Partial results stay in the log; it is never rolled back.
    registry.clear();
    inner.emit(DispatchEvent::WorkersReleased);
    drop(listener);

    match outcome {
        Ok(report) => {
            inner.emit(DispatchEvent::Stopped {
                status: report.status,
            });
            Ok(report)
        }
        Err(err) => {
            inner.emit(DispatchEvent::Error {
                message: format!("{err:#}"),
            });
            inner.emit(DispatchEvent::Stopped {
                status: BatchStatus::Failed,
            });
            Err(err)
        }
    }
}

async fn run_batch(
    inner: &Arc<CoordinatorInner>,
    cfg: &Arc<ServerConfig>,
    listener: &TcpListener,
    registry: &Arc<Registry>,
) -> anyhow::Result<BatchReport> {
    fill_roster(listener, registry, cfg, inner).await?;
    inner.emit(DispatchEvent::RosterFilled {
        workers: cfg.workers,
    });

    let descriptor = BatchDescriptor::load(&cfg.descriptor).await?;
    let mode = descriptor.mode()?;
    let tasks = descriptor.tasks();
    let frame_count = tasks.len();
    let results = Arc::new(ResultLog::new(cfg.result_log.clone()));

    // M1: every worker learns the mode before any frame moves.
    let slots = registry.ready_slots();
    let mut failed_workers: Vec<u32> = Vec::new();
    for slot in &slots {
        let sent = {
            let mut conn = slot.conn.lock().await;
            conn.send(topic::LOAD_BALANCING, Some(mode.as_str()), None)
                .await
        };
        if let Err(err) = sent {
            slot.mark_failed();
            let err = anyhow::Error::from(err);
            inner.emit(DispatchEvent::WorkerFailed {
                worker_id: slot.id,
                message: format!("{}: {err:#}", slot.name),
            });
            failed_workers.push(slot.id);
        }
    }
    inner.emit(DispatchEvent::ModeAnnounced { mode });

    let outcome = match mode {
        ProcessingMode::Static => {
            scheduler::run_static(tasks, slots, results.clone(), inner.clone()).await
        }
        ProcessingMode::Dynamic => {
            scheduler::run_dynamic(tasks, slots, results.clone(), inner.clone()).await
        }
    };

    let recorded = results.len().await;
    failed_workers.extend(outcome.failed_workers);
    failed_workers.sort_unstable();
    failed_workers.dedup();

    let status = if failed_workers.is_empty() && !inner.should_stop() && recorded == outcome.scheduled
    {
        BatchStatus::Complete
    } else if recorded > 0 {
        BatchStatus::Partial
    } else {
        BatchStatus::Failed
    };

    Ok(BatchReport {
        status,
        frame_count,
        scheduled: outcome.scheduled,
        recorded,
        failed_workers,
    })
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use rollcall_proto::{Channel, ProtoError, topic};
    use serde_json::json;
    use tokio::net::TcpStream;

    use crate::api::{BatchStatus, DispatchEvent, ServerConfig, start_coordinator};

    /// Build a full coordinator-side fixture: register, model blobs,
    /// uploaded frames, and the batch descriptor.
    fn fixture_config(root: &Path, frames: usize, mode: &str, workers: usize) -> ServerConfig {
        let jsons = root.join("jsons");
        let models = root.join("models");
        let uploads = root.join("uploads");
        std::fs::create_dir_all(&jsons).unwrap();
        std::fs::create_dir_all(&models).unwrap();
        std::fs::create_dir_all(&uploads).unwrap();

        std::fs::write(
            jsons.join("class_register.json"),
            serde_json::to_string_pretty(&json!([
                {"Reg_No": "22BCE001", "Name": "Asha", "Disp_name": "Asha", "Pickle": "22BCE001.dat"},
                {"Reg_No": "22BCE002", "Name": "Dev", "Disp_name": "Dev", "Pickle": "22BCE002.dat"}
            ]))
            .unwrap(),
        )
        .unwrap();
        std::fs::write(models.join("22BCE001.dat"), b"blob-one").unwrap();
        std::fs::write(models.join("22BCE002.dat"), b"blob-two").unwrap();

        let mut files = Vec::new();
        let mut stamps = Vec::new();
        for index in 0..frames {
            let file = uploads.join(format!("frame_{index:02}.jpg"));
            std::fs::write(&file, vec![0xAB; 64 + index]).unwrap();
            files.push(file.to_string_lossy().into_owned());
            stamps.push(format!("8/8/2024, 12:56:36 am, {index}"));
        }

        std::fs::write(
            jsons.join("uploaded_data.json"),
            serde_json::to_string_pretty(&json!({
                "files": files,
                "js_mod": stamps,
                "frame_count": frames,
                "processing_mode": mode,
            }))
            .unwrap(),
        )
        .unwrap();

        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            workers,
            accept_timeout: Duration::from_secs(5),
            io_timeout: None,
            class_register: jsons.join("class_register.json"),
            models_dir: models,
            descriptor: jsons.join("uploaded_data.json"),
            result_log: jsons.join("attendance_raw.json"),
        }
    }

    async fn wait_for_port(
        events: &mut tokio::sync::broadcast::Receiver<DispatchEvent>,
    ) -> u16 {
        loop {
            if let DispatchEvent::Started { port, .. } = events.recv().await.unwrap() {
                return port;
            }
        }
    }

    /// A worker speaking the mirror dialog, with scripted speed and an
    /// optional wrong-topic reply at a given frame index.
    async fn scripted_worker(
        port: u16,
        name: String,
        delay: Duration,
        desync_at: Option<usize>,
        workdir: PathBuf,
    ) -> anyhow::Result<usize> {
        let stream = TcpStream::connect(("127.0.0.1", port)).await?;
        let mut conn = Channel::new(stream);

        conn.expect(topic::HI, None).await?;
        conn.send(topic::SETUP, Some(&name), None).await?;
        conn.expect(topic::CLIENT_ID, None).await?;
        conn.expect(topic::CLASS_REGISTER, Some(&workdir.join("jsons")))
            .await?;
        let models: usize = conn
            .expect(topic::MODELS_COUNT, None)
            .await?
            .message
            .unwrap_or_default()
            .parse()?;
        for _ in 0..models {
            conn.expect(topic::PICKLE, Some(&workdir.join("models")))
                .await?;
        }

        let mode = conn
            .expect(topic::LOAD_BALANCING, None)
            .await?
            .message
            .unwrap_or_default();

        let mut processed = 0usize;
        if mode == "static" {
            let count: usize = conn
                .expect(topic::STATIC_IMAGES_COUNT, None)
                .await?
                .message
                .unwrap_or_default()
                .parse()?;
            for index in 0..count {
                let frame = conn
                    .expect(topic::STATIC_IMAGE, Some(&workdir.join("images")))
                    .await?;
                tokio::time::sleep(delay).await;
                if desync_at == Some(index) {
                    conn.send("Other", Some("{}"), None).await?;
                    return Ok(processed);
                }
                let record = json!({"timestamp": frame.message, "people_present": [], "worker": name});
                conn.send(topic::PROCESSED_DATA, Some(&record.to_string()), None)
                    .await?;
                processed += 1;
            }
        } else {
            loop {
                let frame = conn
                    .expect(topic::DYNAMIC_TASK, Some(&workdir.join("images")))
                    .await?;
                if frame
                    .message
                    .as_deref()
                    .is_some_and(|m| m.eq_ignore_ascii_case(topic::DONE_SENTINEL))
                {
                    break;
                }
                tokio::time::sleep(delay).await;
                let record = json!({"timestamp": frame.message, "people_present": [], "worker": name});
                conn.send(topic::PROCESSED_DATA, Some(&record.to_string()), None)
                    .await?;
                processed += 1;
            }
        }

        // The coordinator ends the batch by closing the connection.
        match conn.expect(topic::LOAD_BALANCING, None).await {
            Err(ProtoError::ConnectionClosed) => {}
            other => {
                other?;
            }
        }
        Ok(processed)
    }

    fn read_log(path: &Path) -> Vec<serde_json::Value> {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn static_single_worker_processes_every_frame_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = fixture_config(dir.path(), 3, "static", 1);
        let result_log = cfg.result_log.clone();

        let handle = start_coordinator(cfg);
        let mut events = handle.subscribe();
        let port = wait_for_port(&mut events).await;

        let worker = tokio::spawn(scripted_worker(
            port,
            "alpha".to_string(),
            Duration::ZERO,
            None,
            dir.path().join("w1"),
        ));

        let report = handle.wait().await.unwrap();
        assert_eq!(report.status, BatchStatus::Complete);
        assert_eq!(report.frame_count, 3);
        assert_eq!(report.scheduled, 3);
        assert_eq!(report.recorded, 3);
        assert!(report.failed_workers.is_empty());

        // One sequential worker keeps task order in the log.
        let log = read_log(&result_log);
        let stamps: Vec<&str> = log.iter().map(|r| r["timestamp"].as_str().unwrap()).collect();
        assert_eq!(
            stamps,
            vec![
                "8/8/2024, 12:56:36 am, 0",
                "8/8/2024, 12:56:36 am, 1",
                "8/8/2024, 12:56:36 am, 2"
            ]
        );

        assert_eq!(worker.await.unwrap().unwrap(), 3);
    }

    #[tokio::test]
    async fn static_partition_drops_the_remainder() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = fixture_config(dir.path(), 5, "static", 2);
        let result_log = cfg.result_log.clone();

        let handle = start_coordinator(cfg);
        let mut events = handle.subscribe();
        let port = wait_for_port(&mut events).await;

        let first = tokio::spawn(scripted_worker(
            port,
            "alpha".to_string(),
            Duration::ZERO,
            None,
            dir.path().join("w1"),
        ));
        let second = tokio::spawn(scripted_worker(
            port,
            "beta".to_string(),
            Duration::ZERO,
            None,
            dir.path().join("w2"),
        ));

        let report = handle.wait().await.unwrap();
        assert_eq!(report.status, BatchStatus::Complete);
        assert_eq!(report.frame_count, 5);
        assert_eq!(report.scheduled, 4);
        assert_eq!(report.recorded, 4);

        // Each worker got exactly floor(5 / 2) frames; the fifth frame
        // was dropped, and the log covers exactly frames 0..4.
        assert_eq!(first.await.unwrap().unwrap(), 2);
        assert_eq!(second.await.unwrap().unwrap(), 2);

        let mut stamps: Vec<String> = read_log(&result_log)
            .iter()
            .map(|r| r["timestamp"].as_str().unwrap().to_string())
            .collect();
        stamps.sort();
        assert_eq!(
            stamps,
            vec![
                "8/8/2024, 12:56:36 am, 0",
                "8/8/2024, 12:56:36 am, 1",
                "8/8/2024, 12:56:36 am, 2",
                "8/8/2024, 12:56:36 am, 3"
            ]
        );
    }

    #[tokio::test]
    async fn dynamic_mode_favors_the_faster_worker_and_finishes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = fixture_config(dir.path(), 4, "dynamic", 2);
        let result_log = cfg.result_log.clone();

        let handle = start_coordinator(cfg);
        let mut events = handle.subscribe();
        let port = wait_for_port(&mut events).await;

        let fast = tokio::spawn(scripted_worker(
            port,
            "fast".to_string(),
            Duration::from_millis(30),
            None,
            dir.path().join("w1"),
        ));
        let slow = tokio::spawn(scripted_worker(
            port,
            "slow".to_string(),
            Duration::from_millis(150),
            None,
            dir.path().join("w2"),
        ));

        let report = handle.wait().await.unwrap();
        assert_eq!(report.status, BatchStatus::Complete);
        assert_eq!(report.recorded, 4);
        assert!(report.failed_workers.is_empty());

        // Both workers got the end sentinel and returned cleanly; the
        // faster one took at least half the batch.
        let fast_count = fast.await.unwrap().unwrap();
        let slow_count = slow.await.unwrap().unwrap();
        assert_eq!(fast_count + slow_count, 4);
        assert!(fast_count >= 2, "fast worker only processed {fast_count}");

        // Every task appears exactly once, though not in task order.
        let mut stamps: Vec<String> = read_log(&result_log)
            .iter()
            .map(|r| r["timestamp"].as_str().unwrap().to_string())
            .collect();
        stamps.sort();
        assert_eq!(
            stamps,
            (0..4)
                .map(|i| format!("8/8/2024, 12:56:36 am, {i}"))
                .collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn out_of_sync_worker_loses_its_slice_but_not_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = fixture_config(dir.path(), 6, "static", 2);

        let handle = start_coordinator(cfg);
        let mut events = handle.subscribe();
        let port = wait_for_port(&mut events).await;

        let honest = tokio::spawn(scripted_worker(
            port,
            "honest".to_string(),
            Duration::ZERO,
            None,
            dir.path().join("w1"),
        ));
        let desynced = tokio::spawn(scripted_worker(
            port,
            "desynced".to_string(),
            Duration::ZERO,
            Some(0),
            dir.path().join("w2"),
        ));

        let report = handle.wait().await.unwrap();
        assert_eq!(report.status, BatchStatus::Partial);
        assert_eq!(report.scheduled, 6);
        assert_eq!(report.recorded, 3);
        assert_eq!(report.failed_workers.len(), 1);

        assert_eq!(honest.await.unwrap().unwrap(), 3);
        assert_eq!(desynced.await.unwrap().unwrap(), 0);

        // The failure was surfaced as an event for the lost worker.
        let mut saw_failure = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, DispatchEvent::WorkerFailed { .. }) {
                saw_failure = true;
            }
        }
        assert!(saw_failure);
    }

    #[tokio::test]
    async fn invalid_mode_fails_before_any_frame_moves() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = fixture_config(dir.path(), 2, "round-robin", 1);
        let result_log = cfg.result_log.clone();

        let handle = start_coordinator(cfg);
        let mut events = handle.subscribe();
        let port = wait_for_port(&mut events).await;

        let worker = tokio::spawn(scripted_worker(
            port,
            "alpha".to_string(),
            Duration::ZERO,
            None,
            dir.path().join("w1"),
        ));

        let err = handle.wait().await.unwrap_err();
        assert!(format!("{err:#}").contains("invalid processing mode"));
        assert!(!result_log.exists());

        // The worker is released without ever seeing a mode message.
        let outcome = worker.await.unwrap();
        assert!(outcome.is_err());
    }
}
