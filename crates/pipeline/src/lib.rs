//! Forecast-cycle pipeline.
//!
//! Stages, in the order a full run visits them:
//! - [`acquisition`]: fetch raw tiles for the newest published cycle
//! - [`transform`]: run the external normalizer and check its output
//! - [`import`]: merge normalized rows and upsert them into the forecast table
//! - [`retention`]: time-based cleanup before import, count-based after
//!
//! [`Pipeline`] drives them as a state machine and reports the failing stage.

pub mod acquisition;
pub mod clock;
pub mod import;
pub mod layout;
pub mod orchestrator;
pub mod retention;
pub mod transform;

pub use acquisition::{AcquiredCycle, Acquirer, DownloadJob, HttpAcquirer};
pub use clock::{Clock, FixedClock, SystemClock};
pub use import::{ImportSummary, Importer};
pub use layout::{CycleDirs, DataLayout};
pub use orchestrator::{Pipeline, PipelineFailure, PipelineState, RunReport, Stage};
pub use retention::{PostImportReport, PreImportReport, RetentionManager};
pub use transform::{run_transform, CommandTransformer, TransformJob, Transformer};
