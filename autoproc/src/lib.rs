//! # Autoproc
//!
//! Stage-group controller for automated diffraction data reduction.
//!
//! Autoproc sequences the external tools of a reduction run (indexing,
//! integration, merging-law estimation, refinement, scaling and the
//! downstream analyses) with support for:
//!
//! - **Stage groups**: concurrent stages joined at a single barrier
//! - **Decision policies**: resolution cutoff and anomalous-signal detection
//! - **Anomalous second pass**: branch reruns when the signal is significant
//! - **Status tracking**: best-effort reporting to an external tracking service
//! - **Isolated workspaces**: one fresh working directory per stage
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use autoproc::prelude::*;
//!
//! let catalog = StageCatalog::from_fn(|kind| my_runner_for(kind));
//! let controller = PipelineController::new(
//!     PipelineConfig::from_file("autoproc.json")?,
//!     catalog,
//!     Arc::new(LoggingTrackingService::new()),
//!     Arc::new(LoggingEventSink::default()),
//! );
//!
//! let request = PipelineRequest::new("1234", "/data/lyso_1_master.h5", 1, 3600);
//! let report = controller.run(request).await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod policies;
pub mod stages;
pub mod testing;
pub mod tracking;
pub mod workspace;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{LogFormat, PipelineConfig};
    pub use crate::core::{Branch, RunStatus, SpaceGroup, TrackingStatus, UnitCell};
    pub use crate::errors::{FailureKind, PipelineError, PolicyError, PreconditionError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::init_logging;
    pub use crate::pipeline::{
        PipelineController, PipelineRequest, ProcessingReport, StageCatalog, StageGroup,
    };
    pub use crate::policies::{
        AnomalousSignalPolicy, CompletenessEntry, ResolutionCutoffPolicy, SignalAssessment,
    };
    pub use crate::stages::{CommandStage, FnStage, StageInput, StageKind, StageResult, StageRunner};
    pub use crate::tracking::{
        LoggingTrackingService, NoOpTrackingService, StatusReporter, TrackingHandle,
        TrackingService,
    };
    pub use crate::workspace::WorkspaceAllocator;
}
