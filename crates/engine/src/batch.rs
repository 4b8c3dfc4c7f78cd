use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Deserialize;

use crate::api::ProcessingMode;

/// One frame to dispatch: an image on disk plus its capture timestamp
/// (`DD/MM/YYYY, hh:mm:ss am|pm, index`).
#[derive(Debug, Clone)]
pub(crate) struct Task {
    pub(crate) image: PathBuf,
    pub(crate) timestamp: String,
}

/// The batch descriptor handed over by the upload side.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct BatchDescriptor {
    files: Vec<String>,
    js_mod: Vec<String>,
    frame_count: usize,
    processing_mode: String,
}

impl BatchDescriptor {
    pub(crate) async fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("read batch descriptor {}", path.display()))?;
        let descriptor: Self =
            serde_json::from_str(&raw).context("parse batch descriptor")?;

        if descriptor.js_mod.len() != descriptor.files.len() {
            anyhow::bail!(
                "batch descriptor lists {} files but {} timestamps",
                descriptor.files.len(),
                descriptor.js_mod.len()
            );
        }
        if descriptor.frame_count != descriptor.files.len() {
            anyhow::bail!(
                "batch descriptor frame_count {} does not match {} listed files",
                descriptor.frame_count,
                descriptor.files.len()
            );
        }
        Ok(descriptor)
    }

    /// The scheduling mode, rejected before any worker is disturbed if
    /// it is neither `static` nor `dynamic` (any casing).
    pub(crate) fn mode(&self) -> anyhow::Result<ProcessingMode> {
        ProcessingMode::parse(&self.processing_mode).ok_or_else(|| {
            anyhow::anyhow!(
                "invalid processing mode `{}`: expected `static` or `dynamic`",
                self.processing_mode
            )
        })
    }

    /// The ordered task list. Immutable once the descriptor is loaded.
    pub(crate) fn tasks(&self) -> Vec<Task> {
        self.files
            .iter()
            .zip(self.js_mod.iter())
            .map(|(file, timestamp)| Task {
                image: PathBuf::from(file),
                timestamp: timestamp.clone(),
            })
            .collect()
    }
}
