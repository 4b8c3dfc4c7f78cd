use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use rollcall_proto::{Channel, Envelope, topic};
use tokio::net::TcpStream;

use crate::analyze::Analyzer;
use crate::folders::WorkFolders;

/// The client side of the dialog: handshake, artifact download, then
/// load-balancing rounds until the coordinator closes the connection.
pub struct WorkerRuntime {
    server: String,
    device_name: String,
    folders: WorkFolders,
    analyzer: Arc<dyn Analyzer>,
    io_timeout: Option<Duration>,
}

impl WorkerRuntime {
    pub fn new(
        server: String,
        device_name: String,
        folders: WorkFolders,
        analyzer: Arc<dyn Analyzer>,
        io_timeout: Option<Duration>,
    ) -> Self {
        Self {
            server,
            device_name,
            folders,
            analyzer,
            io_timeout,
        }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        println!("Connecting to coordinator at {}...", self.server);
        let stream = TcpStream::connect(&self.server)
            .await
            .with_context(|| format!("connect to {}", self.server))?;
        let mut conn = Channel::new(stream);
        conn.set_io_timeout(self.io_timeout);

        let worker_id = self.handshake(&mut conn).await?;
        println!("Initialization complete; standing by as worker {worker_id}.");

        // The load-balancing phase may repeat for any number of
        // batches; a closed connection is the normal release path.
        loop {
            let mode = match conn.expect(topic::LOAD_BALANCING, None).await {
                Ok(reply) => reply.message.unwrap_or_default(),
                Err(err) if err.is_disconnect() => {
                    println!("Coordinator released this worker; closing.");
                    break;
                }
                Err(err) => return Err(err.into()),
            };
            println!("`{mode}` load balancing mode selected.");

            let processed = if mode.eq_ignore_ascii_case("static") {
                self.static_phase(&mut conn).await?
            } else if mode.eq_ignore_ascii_case("dynamic") {
                self.dynamic_phase(&mut conn).await?
            } else {
                anyhow::bail!("coordinator announced unknown mode `{mode}`");
            };
            println!("Processed total [{processed}] frames.");
        }

        Ok(())
    }

    /// Mirror of S1..S5: greeting, device name, worker id, class
    /// register, then every model blob.
    async fn handshake(&self, conn: &mut Channel<TcpStream>) -> anyhow::Result<String> {
        conn.expect(topic::HI, None).await?;
        println!("Connected to coordinator successfully.");

        conn.send(topic::SETUP, Some(&self.device_name), None)
            .await?;
        println!("Sent device name       : '{}'", self.device_name);

        let worker_id = conn
            .expect(topic::CLIENT_ID, None)
            .await?
            .message
            .context("worker id missing from `Client Id` message")?;
        println!("Received worker id     : '{worker_id}'");

        let register = conn
            .expect(topic::CLASS_REGISTER, Some(&self.folders.jsons))
            .await?;
        if let Some(data) = &register.data {
            println!("Received class register: '{}'", data.filename);
        }

        let models: usize = conn
            .expect(topic::MODELS_COUNT, None)
            .await?
            .message
            .context("model count missing from `Models Count` message")?
            .parse()
            .context("parse model count")?;
        println!("Receiving {models} model blobs:");
        for _ in 0..models {
            let blob = conn
                .expect(topic::PICKLE, Some(&self.folders.models))
                .await?;
            if let Some(data) = &blob.data {
                println!("  - {}", data.filename);
            }
        }

        Ok(worker_id)
    }

    /// Static rounds: the announced number of frames, each answered
    /// with its result before the next arrives.
    async fn static_phase(&self, conn: &mut Channel<TcpStream>) -> anyhow::Result<usize> {
        let count: usize = conn
            .expect(topic::STATIC_IMAGES_COUNT, None)
            .await?
            .message
            .context("frame count missing from `Static Images Count` message")?
            .parse()
            .context("parse frame count")?;
        println!("Total frame count      : '{count}'");

        for _ in 0..count {
            let frame = conn
                .expect(topic::STATIC_IMAGE, Some(&self.folders.images))
                .await?;
            let record = self.process(&frame).await?;
            conn.send(topic::PROCESSED_DATA, Some(&record.to_string()), None)
                .await?;
        }
        Ok(count)
    }

    /// Dynamic rounds: frames keep coming until the `done` sentinel.
    async fn dynamic_phase(&self, conn: &mut Channel<TcpStream>) -> anyhow::Result<usize> {
        let mut processed = 0usize;
        loop {
            let frame = conn
                .expect(topic::DYNAMIC_TASK, Some(&self.folders.images))
                .await?;
            if frame
                .message
                .as_deref()
                .is_some_and(|m| m.eq_ignore_ascii_case(topic::DONE_SENTINEL))
            {
                break;
            }

            let record = self.process(&frame).await?;
            conn.send(topic::PROCESSED_DATA, Some(&record.to_string()), None)
                .await?;
            processed += 1;
        }
        Ok(processed)
    }

    /// Run the analyzer on a received frame, off the reactor thread.
    async fn process(&self, frame: &Envelope) -> anyhow::Result<serde_json::Value> {
        let timestamp = frame
            .message
            .clone()
            .context("frame timestamp missing")?;
        let filename = frame
            .data
            .as_ref()
            .map(|data| data.filename.clone())
            .context("frame file missing")?;
        println!("Received frame         : '{filename}' [{timestamp}]");

        let image = self.folders.images.join(&filename);
        let analyzer = self.analyzer.clone();
        tokio::task::spawn_blocking(move || analyzer.analyze(&image, &timestamp))
            .await
            .map_err(|err| anyhow::anyhow!("analyzer task join error: {err:#}"))?
    }
}
