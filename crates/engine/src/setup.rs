use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use rollcall_proto::{Channel, topic};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

use crate::api::{DispatchEvent, ServerConfig};
use crate::driver::CoordinatorInner;
use crate::registry::{Registry, WorkerSlot};

/// Accept connections until every roster slot is filled and
/// initialized, running the setup dialogs concurrently.
pub(crate) async fn fill_roster(
    listener: &TcpListener,
    registry: &Arc<Registry>,
    cfg: &Arc<ServerConfig>,
    inner: &Arc<CoordinatorInner>,
) -> anyhow::Result<()> {
    let mut join: JoinSet<anyhow::Result<u32>> = JoinSet::new();
    for _ in 0..cfg.workers {
        let (stream, addr) = accept_next(listener, cfg, inner).await?;
        let registry = Arc::clone(registry);
        let cfg = Arc::clone(cfg);
        let inner = Arc::clone(inner);
        join.spawn(async move { setup_worker(stream, addr, &registry, &cfg, &inner).await });
    }

    while let Some(res) = join.join_next().await {
        match res {
            // Setup failures were already reported and released their
            // held slot; the re-offer loop below fills the gap.
            Ok(_) => {}
            Err(err) => inner.emit(DispatchEvent::Error {
                message: format!("setup task join error: {err:#}"),
            }),
        }
    }

    while registry.ready_count() < cfg.workers {
        let (stream, addr) = accept_next(listener, cfg, inner).await?;
        let _ = setup_worker(stream, addr, registry, cfg, inner).await;
    }

    Ok(())
}

async fn accept_next(
    listener: &TcpListener,
    cfg: &ServerConfig,
    inner: &CoordinatorInner,
) -> anyhow::Result<(TcpStream, SocketAddr)> {
    if inner.should_stop() {
        anyhow::bail!("interrupted while filling the worker roster");
    }
    tokio::time::timeout(cfg.accept_timeout, listener.accept())
        .await
        .context("timed out waiting for a worker to connect")?
        .context("accept failed")
}

async fn setup_worker(
    stream: TcpStream,
    addr: SocketAddr,
    registry: &Registry,
    cfg: &ServerConfig,
    inner: &CoordinatorInner,
) -> anyhow::Result<u32> {
    let Some(id) = registry.hold_lowest_free() else {
        inner.emit(DispatchEvent::Warning {
            message: format!("no free worker slot for connection from {addr}"),
        });
        anyhow::bail!("no free worker slot for {addr}");
    };

    match run_setup_dialog(stream, addr, id, registry, cfg, inner).await {
        Ok(()) => Ok(id),
        Err(err) => {
            registry.release_held(id);
            inner.emit(DispatchEvent::Error {
                message: format!("worker {id} setup failed: {err:#}"),
            });
            Err(err)
        }
    }
}

/// S1..S5: greet, learn the device name, assign the id, push the class
/// register, then every model blob.
async fn run_setup_dialog(
    stream: TcpStream,
    addr: SocketAddr,
    id: u32,
    registry: &Registry,
    cfg: &ServerConfig,
    inner: &CoordinatorInner,
) -> anyhow::Result<()> {
    let mut conn = Channel::new(stream);
    conn.set_io_timeout(cfg.io_timeout);

    conn.send(topic::HI, None, None).await?;

    let reply = conn.expect(topic::SETUP, None).await?;
    let name = reply.message.unwrap_or_else(|| "unresolved".to_string());
    inner.emit(DispatchEvent::WorkerConnected {
        worker_id: id,
        name: name.clone(),
        addr: addr.to_string(),
    });

    conn.send(topic::CLIENT_ID, Some(&id.to_string()), None)
        .await?;
    conn.send(topic::CLASS_REGISTER, None, Some(&cfg.class_register))
        .await?;

    let models = list_models(&cfg.models_dir).await?;
    conn.send(topic::MODELS_COUNT, Some(&models.len().to_string()), None)
        .await?;
    for model in &models {
        conn.send(topic::PICKLE, None, Some(model)).await?;
    }

    registry.finalize(WorkerSlot::new(id, name, conn));
    inner.emit(DispatchEvent::WorkerInitialized { worker_id: id });
    Ok(())
}

async fn list_models(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("read models directory {}", dir.display()))?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}
