//! Common test fixtures for forecast-cycle tests.
//!
//! [`DataRoot`] is a throwaway data root laid out the way the pipeline
//! expects: raw cycle directories at the top, normalized ones under
//! `normalized/`.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// A temporary data root, removed on drop.
pub struct DataRoot {
    dir: TempDir,
}

impl DataRoot {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create temp data root"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Create `<root>/<name>` with one placeholder raw file.
    pub fn add_raw_cycle(&self, name: &str) -> PathBuf {
        let dir = self.path().join(name);
        fs::create_dir_all(&dir).expect("failed to create raw cycle dir");
        fs::write(dir.join("tile.grib2"), b"GRIB").expect("failed to write raw file");
        dir
    }

    /// Create `<root>/normalized/<name>` holding the given files.
    pub fn add_normalized_cycle(&self, name: &str, files: &[(&str, String)]) -> PathBuf {
        let dir = self.path().join("normalized").join(name);
        fs::create_dir_all(&dir).expect("failed to create normalized cycle dir");
        for (file, content) in files {
            fs::write(dir.join(file), content).expect("failed to write normalized file");
        }
        dir
    }

    /// Sorted names of the directories directly under `rel` (relative to the
    /// root). Missing directories list as empty.
    pub fn dir_names(&self, rel: &str) -> Vec<String> {
        let Ok(entries) = fs::read_dir(self.path().join(rel)) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        names.sort();
        names
    }

    /// Raw cycle directory names, without `normalized`.
    pub fn raw_cycle_names(&self) -> Vec<String> {
        self.dir_names("")
            .into_iter()
            .filter(|n| n != "normalized")
            .collect()
    }
}

impl Default for DataRoot {
    fn default() -> Self {
        Self::new()
    }
}
