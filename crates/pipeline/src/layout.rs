//! On-disk layout of the data root.
//!
//! ```text
//! <root>/<cycle>/               raw tiles
//! <root>/normalized/<cycle>/    tabular output
//! ```
//!
//! `<cycle>` is either `YYYYMMDD_HH` or `YYYYMMDDHH`. New directories are
//! always created under the canonical separated name.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use forecast_common::{latest_cycle, CycleId, ForecastError, ForecastResult};

/// Name of the normalized subtree under the data root.
pub const NORMALIZED_DIR: &str = "normalized";

/// Every directory on disk that belongs to one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleDirs {
    pub cycle: CycleId,
    pub raw: Vec<PathBuf>,
    pub normalized: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn raw_dir(&self, cycle: &CycleId) -> PathBuf {
        self.root.join(cycle.canonical())
    }

    pub fn normalized_root(&self) -> PathBuf {
        self.root.join(NORMALIZED_DIR)
    }

    pub fn normalized_dir(&self, cycle: &CycleId) -> PathBuf {
        self.normalized_root().join(cycle.canonical())
    }

    /// Existing normalized directory for a cycle, trying the canonical name
    /// first and the compact name second.
    pub async fn find_normalized_dir(&self, cycle: &CycleId) -> Option<PathBuf> {
        for name in [cycle.canonical(), cycle.compact()] {
            let candidate = self.normalized_root().join(name);
            if is_dir(&candidate).await {
                return Some(candidate);
            }
        }
        None
    }

    /// Names of raw cycle directories directly under the root.
    pub async fn raw_cycle_names(&self) -> ForecastResult<Vec<String>> {
        list_cycle_dir_names(&self.root).await
    }

    /// Most recent raw cycle on disk.
    pub async fn latest_cycle(&self) -> ForecastResult<CycleId> {
        let names = self.raw_cycle_names().await?;
        latest_cycle(&names).map_err(|e| match e {
            ForecastError::NoCyclesFound(_) => {
                ForecastError::NoCyclesFound(self.root.display().to_string())
            }
            other => other,
        })
    }

    /// All cycles on disk, raw or normalized, newest first. Directories of
    /// both naming forms for the same cycle are grouped together.
    pub async fn cycle_dirs(&self) -> ForecastResult<Vec<CycleDirs>> {
        let mut groups: BTreeMap<CycleId, CycleDirs> = BTreeMap::new();

        for name in list_cycle_dir_names(&self.root).await? {
            if let Ok(cycle) = CycleId::parse(&name) {
                group(&mut groups, cycle).raw.push(self.root.join(&name));
            }
        }

        let normalized_root = self.normalized_root();
        if is_dir(&normalized_root).await {
            for name in list_cycle_dir_names(&normalized_root).await? {
                if let Ok(cycle) = CycleId::parse(&name) {
                    group(&mut groups, cycle)
                        .normalized
                        .push(normalized_root.join(&name));
                }
            }
        }

        Ok(groups.into_values().rev().collect())
    }
}

fn group(groups: &mut BTreeMap<CycleId, CycleDirs>, cycle: CycleId) -> &mut CycleDirs {
    groups.entry(cycle).or_insert_with(|| CycleDirs {
        cycle,
        raw: Vec::new(),
        normalized: Vec::new(),
    })
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
}

/// Directory names under `dir` that parse as cycle names, sorted.
async fn list_cycle_dir_names(dir: &Path) -> ForecastResult<Vec<String>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(ForecastError::IoError(format!(
                "Failed to list {}: {}",
                dir.display(),
                e
            )))
        }
    };

    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if CycleId::parse(&name).is_ok() {
            names.push(name);
        } else {
            debug!(dir = %dir.display(), name = %name, "Ignoring non-cycle directory");
        }
    }

    names.sort();
    Ok(names)
}

/// Remove a directory tree. Returns `false` if it was already gone.
pub async fn remove_dir(path: &Path) -> std::io::Result<bool> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cycle_dirs_groups_both_forms() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["2024010100", "20240101_00", "20240101_06", "junk"] {
            std::fs::create_dir_all(tmp.path().join(name)).unwrap();
        }
        std::fs::create_dir_all(tmp.path().join("normalized/20240101_06")).unwrap();

        let layout = DataLayout::new(tmp.path());
        let dirs = layout.cycle_dirs().await.unwrap();

        assert_eq!(dirs.len(), 2);
        assert_eq!(dirs[0].cycle.canonical(), "20240101_06");
        assert_eq!(dirs[0].normalized.len(), 1);
        assert_eq!(dirs[1].cycle.canonical(), "20240101_00");
        assert_eq!(dirs[1].raw.len(), 2);
    }

    #[tokio::test]
    async fn test_latest_cycle_empty_root() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("normalized")).unwrap();
        let layout = DataLayout::new(tmp.path());
        assert!(matches!(
            layout.latest_cycle().await,
            Err(ForecastError::NoCyclesFound(_))
        ));
    }

    #[tokio::test]
    async fn test_find_normalized_dir_falls_back_to_compact() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("normalized/2024010112")).unwrap();
        let layout = DataLayout::new(tmp.path());
        let cycle = CycleId::parse("20240101_12").unwrap();

        let found = layout.find_normalized_dir(&cycle).await.unwrap();
        assert!(found.ends_with("2024010112"));
    }

    #[tokio::test]
    async fn test_remove_missing_dir_is_not_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!remove_dir(&tmp.path().join("absent")).await.unwrap());
    }
}
