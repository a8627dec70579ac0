//! Retention manager.
//!
//! Two policies with different invariants:
//!
//! * pre-import, time based, database only: drop rows whose valid time has
//!   passed, and rows of runs more than a day older than the incoming cycle
//!   that are not valid in the future;
//! * post-import, count based, disk and database: keep the newest
//!   `max_cycles` cycles and purge everything older.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use forecast_common::{
    CycleId, CycleStatus, ForecastCycle, ForecastError, ForecastResult, RetentionPolicy,
};
use storage::ForecastStore;

use crate::layout::{remove_dir, DataLayout};

/// Rows removed before an import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PreImportReport {
    pub expired_rows: u64,
    pub aged_rows: u64,
}

/// Outcome of count-based cleanup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PostImportReport {
    /// Cycles kept, newest first
    pub retained: Vec<CycleId>,
    /// Stale cycles, each marked purged
    pub removed_cycles: Vec<ForecastCycle>,
    pub removed_dirs: usize,
    pub removed_rows: u64,
}

pub struct RetentionManager {
    store: Arc<dyn ForecastStore>,
    policy: RetentionPolicy,
}

impl RetentionManager {
    pub fn new(store: Arc<dyn ForecastStore>, policy: RetentionPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Time-based cleanup run immediately before importing `incoming`.
    ///
    /// Rows with a valid time strictly in the future are never removed.
    #[instrument(skip(self), fields(incoming = %incoming))]
    pub async fn pre_import(
        &self,
        incoming: &CycleId,
        now: DateTime<Utc>,
    ) -> ForecastResult<PreImportReport> {
        let expired_rows = self
            .store
            .delete_expired(now)
            .await
            .map_err(|e| cleanup_error("expired rows", e))?;

        let cutoff = incoming.run_date - Duration::days(1);
        let aged_rows = self
            .store
            .delete_aged_runs(cutoff, now)
            .await
            .map_err(|e| cleanup_error("aged runs", e))?;

        info!(
            expired_rows = expired_rows,
            aged_rows = aged_rows,
            cutoff = %cutoff,
            "Pre-import retention complete"
        );
        Ok(PreImportReport {
            expired_rows,
            aged_rows,
        })
    }

    /// Count-based cleanup after a successful import.
    ///
    /// `latest` is the most recently completed cycle and is always retained,
    /// even if newer directories exist on disk. Removal is attempted for every
    /// stale cycle; any failure fails the whole call once all attempts are
    /// done.
    #[instrument(skip(self, layout), fields(latest = %latest, max_cycles = self.policy.max_cycles))]
    pub async fn post_import(
        &self,
        layout: &DataLayout,
        latest: &CycleId,
    ) -> ForecastResult<PostImportReport> {
        let on_disk = layout.cycle_dirs().await.map_err(|e| {
            ForecastError::RetentionCleanupError(format!("Cannot enumerate cycles: {}", e))
        })?;

        // Latest first, then the rest newest first.
        let (mut ordered, rest): (Vec<_>, Vec<_>) =
            on_disk.into_iter().partition(|dirs| dirs.cycle == *latest);
        ordered.extend(rest);

        let mut keep_on_disk = self.policy.max_cycles.max(1);
        let mut report = PostImportReport::default();
        let mut failures: Vec<String> = Vec::new();

        // A latest cycle with no directory still takes one of the slots.
        if !ordered.iter().any(|dirs| dirs.cycle == *latest) {
            report.retained.push(*latest);
            keep_on_disk -= 1;
        }

        for (index, dirs) in ordered.into_iter().enumerate() {
            if index < keep_on_disk {
                report.retained.push(dirs.cycle);
                continue;
            }

            // Anything with a directory on disk got at least as far as download.
            let mut stale = ForecastCycle::new(dirs.cycle, CycleStatus::Downloaded);
            info!(cycle = %dirs.cycle, "Purging stale cycle");
            for path in dirs.raw.iter().chain(dirs.normalized.iter()) {
                match remove_dir(path).await {
                    Ok(true) => report.removed_dirs += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to remove directory");
                        failures.push(format!("{}: {}", path.display(), e));
                    }
                }
            }

            if self.policy.db_cleanup {
                match self.store.delete_cycle(&dirs.cycle).await {
                    Ok(rows) => report.removed_rows += rows,
                    Err(e) => {
                        error!(cycle = %dirs.cycle, error = %e, "Failed to delete cycle rows");
                        failures.push(format!("rows of {}: {}", dirs.cycle, e));
                    }
                }
            }

            stale.purge();
            report.removed_cycles.push(stale);
        }

        if self.policy.keep_latest_only {
            match self.store.delete_all_except(latest).await {
                Ok(rows) => report.removed_rows += rows,
                Err(e) => {
                    error!(error = %e, "Failed to delete rows of superseded cycles");
                    failures.push(format!("rows other than {}: {}", latest, e));
                }
            }
        }

        report.retained.sort_by(|a, b| b.cmp(a));

        if !failures.is_empty() {
            return Err(ForecastError::RetentionCleanupError(failures.join("; ")));
        }

        info!(
            retained = report.retained.len(),
            removed_cycles = report.removed_cycles.len(),
            removed_dirs = report.removed_dirs,
            removed_rows = report.removed_rows,
            "Post-import retention complete"
        );
        Ok(report)
    }
}

fn cleanup_error(what: &str, e: ForecastError) -> ForecastError {
    ForecastError::RetentionCleanupError(format!("Failed to delete {}: {}", what, e))
}
