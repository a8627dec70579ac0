//! Pipeline orchestrator.
//!
//! One invocation drives one plan through a fixed state machine:
//!
//! ```text
//! Acquire -> Transform -> ResolveCycle -> PreImportRetain -> Import
//!         -> Verify -> PostImportRetain -> Done
//! ```
//!
//! Any stage can move the machine to `Failed`. There is no retry; the
//! remaining stages are skipped and the failing stage is reported.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use forecast_common::{
    CycleId, CycleStatus, ForecastCycle, ForecastError, ForecastResult, ImportConfig,
    RetentionPolicy,
};
use storage::ForecastStore;

use crate::acquisition::Acquirer;
use crate::clock::Clock;
use crate::import::{ImportSummary, Importer};
use crate::layout::DataLayout;
use crate::retention::{PostImportReport, PreImportReport, RetentionManager};
use crate::transform::{run_transform, Transformer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Acquire,
    Transform,
    ResolveCycle,
    PreImportRetain,
    Import,
    Verify,
    PostImportRetain,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Acquire => "acquire",
            Stage::Transform => "transform",
            Stage::ResolveCycle => "resolve_cycle",
            Stage::PreImportRetain => "pre_import_retain",
            Stage::Import => "import",
            Stage::Verify => "verify",
            Stage::PostImportRetain => "post_import_retain",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Full end-to-end plan.
pub const FULL_RUN: &[Stage] = &[
    Stage::Acquire,
    Stage::Transform,
    Stage::ResolveCycle,
    Stage::PreImportRetain,
    Stage::Import,
    Stage::Verify,
    Stage::PostImportRetain,
];

const DOWNLOAD_ONLY: &[Stage] = &[Stage::Acquire];

const IMPORT_ONLY: &[Stage] = &[
    Stage::ResolveCycle,
    Stage::PreImportRetain,
    Stage::Import,
    Stage::Verify,
];

const CLEANUP_ONLY: &[Stage] = &[Stage::ResolveCycle, Stage::PostImportRetain];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum PipelineState {
    Running(Stage),
    Done,
    Failed(Stage),
}

/// What a run did, stage by stage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub cycle: Option<CycleId>,
    /// Raw directory of the cycle, when known
    pub cycle_dir: Option<PathBuf>,
    pub normalized_dir: Option<PathBuf>,
    pub pre_import: Option<PreImportReport>,
    pub import: Option<ImportSummary>,
    /// Table size after import
    pub total_rows: Option<u64>,
    pub post_import: Option<PostImportReport>,
    /// The run's cycle and the furthest status it reached
    pub lifecycle: Option<ForecastCycle>,
    /// Every status the cycle moved through during this run
    pub status_history: Vec<CycleStatus>,
    /// Every state visited, in order
    pub transitions: Vec<PipelineState>,
}

impl RunReport {
    /// Record that the run's cycle reached `status`.
    fn mark(&mut self, status: CycleStatus) {
        let Some(id) = self.cycle else {
            return;
        };
        let advanced = match &mut self.lifecycle {
            Some(cycle) if cycle.id == id => cycle.advance(status),
            _ => {
                self.lifecycle = Some(ForecastCycle::new(id, status));
                true
            }
        };
        if advanced {
            self.status_history.push(status);
        }
    }
}

/// A run that ended in `Failed`.
#[derive(Debug, Error)]
#[error("stage '{stage}' failed: {source}")]
pub struct PipelineFailure {
    pub stage: Stage,
    #[source]
    pub source: ForecastError,
    /// Progress up to and including the failure
    pub report: RunReport,
}

pub struct Pipeline {
    layout: DataLayout,
    acquirer: Arc<dyn Acquirer>,
    transformer: Arc<dyn Transformer>,
    store: Arc<dyn ForecastStore>,
    importer: Importer,
    retention: RetentionManager,
    min_rows: u64,
    clock: Arc<dyn Clock>,
}

impl Pipeline {
    pub fn new(
        layout: DataLayout,
        acquirer: Arc<dyn Acquirer>,
        transformer: Arc<dyn Transformer>,
        store: Arc<dyn ForecastStore>,
        import: ImportConfig,
        policy: RetentionPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            importer: Importer::new(store.clone(), import.batch_size),
            retention: RetentionManager::new(store.clone(), policy),
            layout,
            acquirer,
            transformer,
            store,
            min_rows: import.min_rows,
            clock,
        }
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    pub fn store(&self) -> &Arc<dyn ForecastStore> {
        &self.store
    }

    /// Acquire, transform, import and apply both retention policies.
    pub async fn run(&self) -> Result<RunReport, PipelineFailure> {
        self.execute(FULL_RUN, None).await
    }

    /// Acquisition only.
    pub async fn download(&self) -> Result<RunReport, PipelineFailure> {
        self.execute(DOWNLOAD_ONLY, None).await
    }

    /// Import an already-normalized cycle by directory name, in either
    /// naming form.
    pub async fn import_cycle(&self, cycle_name: &str) -> Result<RunReport, PipelineFailure> {
        self.execute(IMPORT_ONLY, Some(cycle_name)).await
    }

    /// Count-based retention only, treating the newest cycle on disk as the
    /// most recent completed one.
    pub async fn cleanup(&self) -> Result<RunReport, PipelineFailure> {
        self.execute(CLEANUP_ONLY, None).await
    }

    #[instrument(skip(self), fields(root = %self.layout.root().display()))]
    async fn execute(
        &self,
        plan: &[Stage],
        requested: Option<&str>,
    ) -> Result<RunReport, PipelineFailure> {
        let mut report = RunReport::default();

        for &stage in plan {
            report.transitions.push(PipelineState::Running(stage));
            info!(stage = stage.name(), "Entering stage");

            let needs_import = plan.contains(&Stage::Import);
            if let Err(source) = self.step(stage, requested, needs_import, &mut report).await {
                error!(stage = stage.name(), kind = source.kind(), error = %source, "Stage failed");
                report.transitions.push(PipelineState::Failed(stage));
                return Err(PipelineFailure {
                    stage,
                    source,
                    report,
                });
            }
        }

        report.transitions.push(PipelineState::Done);
        info!(
            cycle = ?report.cycle.map(|c| c.canonical()),
            stages = plan.len(),
            "Pipeline finished"
        );
        Ok(report)
    }

    async fn step(
        &self,
        stage: Stage,
        requested: Option<&str>,
        needs_import: bool,
        report: &mut RunReport,
    ) -> ForecastResult<()> {
        match stage {
            Stage::Acquire => {
                let acquired = self.acquirer.acquire(&self.layout).await?;
                info!(
                    cycle = %acquired.cycle,
                    files = acquired.files,
                    bytes = acquired.bytes,
                    "Cycle acquired"
                );
                report.cycle = Some(acquired.cycle);
                report.cycle_dir = Some(acquired.dir);
                report.mark(CycleStatus::Downloaded);
            }

            Stage::Transform => {
                let cycle = match report.cycle {
                    Some(cycle) => cycle,
                    None => self.layout.latest_cycle().await?,
                };
                let raw_dir = report
                    .cycle_dir
                    .clone()
                    .unwrap_or_else(|| self.layout.raw_dir(&cycle));
                let (dir, _files) =
                    run_transform(self.transformer.as_ref(), &self.layout, &cycle, &raw_dir)
                        .await?;
                report.cycle = Some(cycle);
                report.normalized_dir = Some(dir);
                report.mark(CycleStatus::Processed);
            }

            Stage::ResolveCycle => {
                let cycle = self.resolve_cycle(requested, report.cycle).await?;
                report.cycle = Some(cycle);
                if report.cycle_dir.is_none() {
                    report.cycle_dir = Some(self.layout.raw_dir(&cycle));
                }
                if needs_import && report.normalized_dir.is_none() {
                    let dir = self.layout.find_normalized_dir(&cycle).await.ok_or_else(|| {
                        ForecastError::ImportError(format!(
                            "no normalized directory for cycle {} under {}",
                            cycle,
                            self.layout.normalized_root().display()
                        ))
                    })?;
                    report.normalized_dir = Some(dir);
                }
                info!(cycle = %cycle, "Cycle resolved");
            }

            Stage::PreImportRetain => {
                let cycle = resolved(report)?;
                let pre = self.retention.pre_import(&cycle, self.clock.now()).await?;
                report.pre_import = Some(pre);
            }

            Stage::Import => {
                let cycle = resolved(report)?;
                let dir = report.normalized_dir.clone().ok_or_else(|| {
                    ForecastError::ImportError(format!("no normalized directory for {}", cycle))
                })?;
                let summary = self.importer.import_cycle(&dir, &cycle).await?;
                report.import = Some(summary);
                report.mark(CycleStatus::Imported);
            }

            Stage::Verify => {
                let cycle = resolved(report)?;
                let total = self.store.count_all().await?;
                let cycle_rows = self.store.count_cycle(&cycle).await?;
                report.total_rows = Some(total);

                if total < self.min_rows || cycle_rows == 0 {
                    return Err(ForecastError::ImportVerificationFailed {
                        cycle: cycle.canonical(),
                        rows: total,
                        floor: self.min_rows,
                    });
                }
                info!(total_rows = total, cycle_rows = cycle_rows, "Import verified");
                report.mark(CycleStatus::Verified);
            }

            Stage::PostImportRetain => {
                let cycle = resolved(report)?;
                let post = self.retention.post_import(&self.layout, &cycle).await?;
                report.post_import = Some(post);
            }
        }
        Ok(())
    }

    /// Pick the cycle the remaining stages work on.
    ///
    /// An explicit name wins. Otherwise the cycle produced by earlier stages
    /// of this run is used; the newest cycle on disk is the fallback.
    async fn resolve_cycle(
        &self,
        requested: Option<&str>,
        current: Option<CycleId>,
    ) -> ForecastResult<CycleId> {
        if let Some(name) = requested {
            return CycleId::parse(name);
        }

        let on_disk = self.layout.latest_cycle().await;
        match (current, on_disk) {
            (Some(current), Ok(latest)) => {
                if latest > current {
                    warn!(
                        current = %current,
                        newer = %latest,
                        "A newer cycle exists on disk than the one just processed"
                    );
                }
                Ok(current)
            }
            (Some(current), Err(_)) => Ok(current),
            (None, latest) => latest,
        }
    }
}

fn resolved(report: &RunReport) -> ForecastResult<CycleId> {
    report
        .cycle
        .ok_or_else(|| ForecastError::NoCyclesFound("no cycle resolved for this run".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        let names: Vec<_> = FULL_RUN.iter().map(Stage::name).collect();
        assert_eq!(
            names,
            vec![
                "acquire",
                "transform",
                "resolve_cycle",
                "pre_import_retain",
                "import",
                "verify",
                "post_import_retain"
            ]
        );
    }

    #[test]
    fn test_failure_display_names_stage_and_cause() {
        let failure = PipelineFailure {
            stage: Stage::Transform,
            source: ForecastError::ProcessingIncomplete("no .csv files".to_string()),
            report: RunReport::default(),
        };
        let msg = failure.to_string();
        assert!(msg.contains("transform"));
        assert!(msg.contains("no .csv files"));
    }
}
