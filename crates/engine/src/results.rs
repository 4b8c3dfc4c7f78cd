use std::path::{Path, PathBuf};

/// The batch result log: an in-memory list of worker result records
/// mirrored to a JSON array file.
///
/// The whole array is rewritten on every append. That is quadratic over
/// a batch, acceptable for the few hundred frames a batch carries;
/// larger deployments should switch to an append-only stream with
/// checkpoint rewrites.
pub(crate) struct ResultLog {
    path: PathBuf,
    records: tokio::sync::Mutex<Vec<serde_json::Value>>,
}

impl ResultLog {
    /// A log born empty; the file appears on the first append.
    pub(crate) fn new(path: PathBuf) -> Self {
        Self {
            path,
            records: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Append one record and rewrite the file before returning, so the
    /// persisted array always equals the in-memory list. Returns the
    /// new length.
    pub(crate) async fn append(&self, record: serde_json::Value) -> anyhow::Result<usize> {
        let mut records = self.records.lock().await;
        records.push(record);

        let json = serde_json::to_string_pretty(&*records)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || persist_file(&path, &json))
            .await
            .map_err(|err| anyhow::anyhow!("persist result log: {err:#}"))??;

        Ok(records.len())
    }

    pub(crate) async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

fn persist_file(path: &Path, json: &str) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(tmp, path)?;
    Ok(())
}
