use std::path::{Path, PathBuf};

use anyhow::Context as _;

/// The worker's local artifact directories, freshly emptied at startup
/// so nothing from a previous batch can leak into this one.
#[derive(Debug, Clone)]
pub struct WorkFolders {
    /// Model blobs received during setup.
    pub models: PathBuf,
    /// Frames received during scheduling.
    pub images: PathBuf,
    /// JSON artifacts (class register).
    pub jsons: PathBuf,
}

impl WorkFolders {
    pub fn prepare(root: &Path) -> anyhow::Result<Self> {
        let folders = Self {
            models: root.join("Models"),
            images: root.join("Images"),
            jsons: root.join("Jsons"),
        };
        for folder in [&folders.models, &folders.images, &folders.jsons] {
            prepare_folder(folder)
                .with_context(|| format!("prepare folder {}", folder.display()))?;
        }
        Ok(folders)
    }
}

/// Empty the folder of plain files, or create it if absent.
fn prepare_folder(folder: &Path) -> anyhow::Result<()> {
    if folder.exists() {
        for entry in std::fs::read_dir(folder)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                std::fs::remove_file(entry.path())?;
            }
        }
    } else {
        std::fs::create_dir_all(folder)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_creates_missing_folders_and_empties_existing_ones() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("Models");
        std::fs::create_dir_all(&stale).unwrap();
        std::fs::write(stale.join("old.dat"), b"stale").unwrap();

        let folders = WorkFolders::prepare(dir.path()).unwrap();

        assert!(folders.models.is_dir());
        assert!(folders.images.is_dir());
        assert!(folders.jsons.is_dir());
        assert_eq!(std::fs::read_dir(&folders.models).unwrap().count(), 0);
    }
}
