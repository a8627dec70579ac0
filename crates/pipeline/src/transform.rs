//! Transformation stage: turn raw tiles into per-tile tabular files.
//!
//! The normalization itself is an external processor. This module only
//! prepares its output directory, invokes it and checks that it produced
//! something importable.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use forecast_common::{CycleId, ForecastError, ForecastResult};

use crate::layout::{remove_dir, DataLayout};

/// Extension of normalized output files.
pub const NORMALIZED_EXT: &str = "csv";

/// Inputs handed to a transformer for one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformJob {
    pub cycle: CycleId,
    pub raw_dir: PathBuf,
    pub output_dir: PathBuf,
    pub data_root: PathBuf,
}

#[async_trait]
pub trait Transformer: Send + Sync {
    /// Write normalized files for `job.cycle` into `job.output_dir`, which
    /// exists and is empty when this is called.
    async fn transform(&self, job: &TransformJob) -> ForecastResult<()>;
}

/// Runs an external command. The template is split on whitespace and the
/// placeholders `{raw_dir}`, `{output_dir}`, `{cycle}` and `{data_root}` are
/// substituted in each argument.
pub struct CommandTransformer {
    template: String,
}

impl CommandTransformer {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Program and arguments with placeholders filled in.
    pub fn render(&self, job: &TransformJob) -> ForecastResult<(String, Vec<String>)> {
        let cycle = job.cycle.canonical();
        let raw_dir = job.raw_dir.display().to_string();
        let output_dir = job.output_dir.display().to_string();
        let data_root = job.data_root.display().to_string();

        let mut parts = self.template.split_whitespace().map(|part| {
            part.replace("{raw_dir}", &raw_dir)
                .replace("{output_dir}", &output_dir)
                .replace("{cycle}", &cycle)
                .replace("{data_root}", &data_root)
        });

        let program = parts.next().ok_or_else(|| {
            ForecastError::ConfigError("PROCESSOR_COMMAND is empty".to_string())
        })?;
        Ok((program, parts.collect()))
    }
}

#[async_trait]
impl Transformer for CommandTransformer {
    #[instrument(skip(self, job), fields(cycle = %job.cycle))]
    async fn transform(&self, job: &TransformJob) -> ForecastResult<()> {
        let (program, args) = self.render(job)?;
        debug!(program = %program, args = ?args, "Running processor");

        let output = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                ForecastError::ProcessingIncomplete(format!("Failed to start {}: {}", program, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<&str> = stderr.lines().collect();
            let tail = lines[lines.len().saturating_sub(5)..].join(" | ");
            warn!(program = %program, status = %output.status, "Processor failed");
            return Err(ForecastError::ProcessingIncomplete(format!(
                "{} exited with {}: {}",
                program, output.status, tail
            )));
        }

        Ok(())
    }
}

/// Run the transformation for one cycle and verify its output.
///
/// The cycle's normalized directory is recreated empty first, so stale files
/// from an earlier attempt can never be mistaken for fresh output. Returns the
/// directory and the number of normalized files found in it.
#[instrument(skip(transformer, layout), fields(cycle = %cycle))]
pub async fn run_transform(
    transformer: &dyn Transformer,
    layout: &DataLayout,
    cycle: &CycleId,
    raw_dir: &Path,
) -> ForecastResult<(PathBuf, usize)> {
    let output_dir = layout.normalized_dir(cycle);
    remove_dir(&output_dir).await.map_err(|e| {
        ForecastError::IoError(format!("Failed to clear {}: {}", output_dir.display(), e))
    })?;
    fs::create_dir_all(&output_dir).await.map_err(|e| {
        ForecastError::IoError(format!("Failed to create {}: {}", output_dir.display(), e))
    })?;

    let job = TransformJob {
        cycle: *cycle,
        raw_dir: raw_dir.to_path_buf(),
        output_dir: output_dir.clone(),
        data_root: layout.root().to_path_buf(),
    };
    transformer.transform(&job).await?;

    let output_exists = fs::metadata(&output_dir)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);
    if !output_exists {
        return Err(ForecastError::ProcessingIncomplete(format!(
            "output directory {} missing after transformation",
            output_dir.display()
        )));
    }

    let files = list_normalized_files(&output_dir)
        .await
        .map_err(|e| ForecastError::ProcessingIncomplete(e.to_string()))?;
    if files.is_empty() {
        return Err(ForecastError::ProcessingIncomplete(format!(
            "no .{} files produced in {}",
            NORMALIZED_EXT,
            output_dir.display()
        )));
    }

    info!(dir = %output_dir.display(), files = files.len(), "Transformation complete");
    Ok((output_dir, files.len()))
}

/// Normalized files directly inside `dir`, sorted by name.
pub async fn list_normalized_files(dir: &Path) -> ForecastResult<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir).await.map_err(|e| {
        ForecastError::IoError(format!("Failed to list {}: {}", dir.display(), e))
    })?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_csv = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(NORMALIZED_EXT));
        if is_csv && entry.file_type().await?.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(root: &Path) -> TransformJob {
        let cycle = CycleId::parse("20240101_06").unwrap();
        TransformJob {
            cycle,
            raw_dir: root.join("20240101_06"),
            output_dir: root.join("normalized/20240101_06"),
            data_root: root.to_path_buf(),
        }
    }

    #[test]
    fn test_render_substitutes_placeholders() {
        let t = CommandTransformer::new(
            "python3 processor.py --input {raw_dir} --output {output_dir} --cycle {cycle}",
        );
        let (program, args) = t.render(&job(Path::new("/data"))).unwrap();
        assert_eq!(program, "python3");
        assert_eq!(
            args,
            vec![
                "processor.py",
                "--input",
                "/data/20240101_06",
                "--output",
                "/data/normalized/20240101_06",
                "--cycle",
                "20240101_06",
            ]
        );
    }

    #[test]
    fn test_render_empty_template() {
        let t = CommandTransformer::new("   ");
        assert!(matches!(
            t.render(&job(Path::new("/data"))),
            Err(ForecastError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_failing_command_is_processing_incomplete() {
        let tmp = tempfile::tempdir().unwrap();
        let t = CommandTransformer::new("false");
        let result = t.transform(&job(tmp.path())).await;
        assert!(matches!(result, Err(ForecastError::ProcessingIncomplete(_))));
    }

    #[tokio::test]
    async fn test_missing_program_is_processing_incomplete() {
        let tmp = tempfile::tempdir().unwrap();
        let t = CommandTransformer::new("definitely-not-a-real-processor-binary {cycle}");
        let result = t.transform(&job(tmp.path())).await;
        assert!(matches!(result, Err(ForecastError::ProcessingIncomplete(_))));
    }

    /// Succeeds but deletes the directory it was asked to fill.
    struct DirRemovingTransformer;

    #[async_trait]
    impl Transformer for DirRemovingTransformer {
        async fn transform(&self, job: &TransformJob) -> ForecastResult<()> {
            std::fs::remove_dir_all(&job.output_dir)?;
            Ok(())
        }
    }

    /// Succeeds without writing anything.
    struct NoopTransformer;

    #[async_trait]
    impl Transformer for NoopTransformer {
        async fn transform(&self, _job: &TransformJob) -> ForecastResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_missing_output_dir_is_processing_incomplete() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(tmp.path());
        let cycle = CycleId::parse("20240101_06").unwrap();
        let raw_dir = layout.raw_dir(&cycle);

        let err = run_transform(&DirRemovingTransformer, &layout, &cycle, &raw_dir)
            .await
            .unwrap_err();
        assert!(
            matches!(err, ForecastError::ProcessingIncomplete(_)),
            "got {:?}",
            err
        );
        assert!(!layout.normalized_dir(&cycle).exists());
    }

    #[tokio::test]
    async fn test_empty_output_dir_is_processing_incomplete() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(tmp.path());
        let cycle = CycleId::parse("20240101_06").unwrap();
        std::fs::create_dir_all(layout.normalized_dir(&cycle)).unwrap();
        std::fs::write(layout.normalized_dir(&cycle).join("stale.csv"), "x").unwrap();

        let err = run_transform(&NoopTransformer, &layout, &cycle, &layout.raw_dir(&cycle))
            .await
            .unwrap_err();
        assert!(matches!(err, ForecastError::ProcessingIncomplete(_)));
        assert!(!layout.normalized_dir(&cycle).join("stale.csv").exists());
    }

    #[tokio::test]
    async fn test_list_normalized_files_filters_extension() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("b.csv"), "x").unwrap();
        std::fs::write(tmp.path().join("a.CSV"), "x").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "x").unwrap();
        std::fs::create_dir(tmp.path().join("dir.csv")).unwrap();

        let files = list_normalized_files(tmp.path()).await.unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.CSV", "b.csv"]);
    }
}
