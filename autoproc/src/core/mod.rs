//! Core domain model types for autoproc.
//!
//! This module contains the small value types shared across the crate:
//! - Tracking and run status enums
//! - Processing branches
//! - Crystal parameters supplied with a request

mod branch;
mod crystal;
mod status;

pub use branch::Branch;
pub use crystal::{SpaceGroup, UnitCell};
pub use status::{RunStatus, TrackingStatus};
