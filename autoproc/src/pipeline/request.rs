//! The immutable processing request and its validation.

use crate::core::{SpaceGroup, UnitCell};
use crate::errors::PreconditionError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

#[allow(clippy::unwrap_used)]
static MASTER_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Za-z0-9_-]+)_master\.h5$").unwrap());

/// One request to reduce a dataset.
///
/// Created once by the caller and shared read-only with every stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRequest {
    /// Dataset (data collection) identifier.
    pub dataset_id: String,
    /// Path to the `<template>_master.h5` file.
    pub master_file: PathBuf,
    /// Space group to force during indexing.
    #[serde(default)]
    pub space_group: Option<SpaceGroup>,
    /// Unit cell to force during indexing, six numbers.
    #[serde(default)]
    pub unit_cell: Option<String>,
    /// Whether both Friedel treatments should be processed.
    #[serde(default)]
    pub anomalous: bool,
    /// First image number.
    pub image_start: u32,
    /// Last image number (inclusive).
    pub image_end: u32,
    /// Whether the run is attached to the live tracking service.
    #[serde(default)]
    pub online: bool,
}

/// Request fields parsed and checked before any stage runs.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest {
    /// Normalized space group, `None` when not supplied.
    pub space_group: Option<SpaceGroup>,
    /// Parsed unit cell, `None` when not supplied.
    pub unit_cell: Option<UnitCell>,
    /// Number of images in the range.
    pub image_count: u64,
    /// File template derived from the master file name.
    pub file_template: String,
    /// Prefix for result files.
    pub result_prefix: String,
}

impl PipelineRequest {
    /// Creates a non-anomalous offline request.
    #[must_use]
    pub fn new(
        dataset_id: impl Into<String>,
        master_file: impl Into<PathBuf>,
        image_start: u32,
        image_end: u32,
    ) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            master_file: master_file.into(),
            space_group: None,
            unit_cell: None,
            anomalous: false,
            image_start,
            image_end,
            online: false,
        }
    }

    /// Requests both Friedel treatments.
    #[must_use]
    pub fn with_anomalous(mut self, anomalous: bool) -> Self {
        self.anomalous = anomalous;
        self
    }

    /// Forces a space group.
    #[must_use]
    pub fn with_space_group(mut self, space_group: SpaceGroup) -> Self {
        self.space_group = Some(space_group);
        self
    }

    /// Forces a unit cell.
    #[must_use]
    pub fn with_unit_cell(mut self, unit_cell: impl Into<String>) -> Self {
        self.unit_cell = Some(unit_cell.into());
        self
    }

    /// Marks the request as online.
    #[must_use]
    pub fn with_online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    /// Number of images in the inclusive range; zero if inverted.
    #[must_use]
    pub fn image_count(&self) -> u64 {
        if self.image_end < self.image_start {
            0
        } else {
            u64::from(self.image_end - self.image_start) + 1
        }
    }

    /// Checks every precondition and parses the optional crystal parameters.
    ///
    /// # Errors
    ///
    /// Returns the first [`PreconditionError`] found.
    pub fn validate(&self, min_images: u64) -> Result<ValidatedRequest, PreconditionError> {
        if self.image_end < self.image_start {
            return Err(PreconditionError::InvalidImageRange {
                start: self.image_start,
                end: self.image_end,
            });
        }
        let image_count = self.image_count();
        if image_count < min_images {
            return Err(PreconditionError::InsufficientImages {
                found: image_count,
                minimum: min_images,
            });
        }
        if self.dataset_id.trim().is_empty() {
            return Err(PreconditionError::MissingField("dataset_id"));
        }
        if self.master_file.as_os_str().is_empty() {
            return Err(PreconditionError::MissingField("master_file"));
        }

        let file_template = file_template(&self.master_file)?;
        let space_group = match self.space_group.clone() {
            Some(sg) => sg.normalize()?,
            None => None,
        };
        let unit_cell = match self.unit_cell.as_deref().map(str::trim) {
            Some(cell) if !cell.is_empty() => Some(cell.parse::<UnitCell>()?),
            _ => None,
        };

        Ok(ValidatedRequest {
            space_group,
            unit_cell,
            image_count,
            result_prefix: result_prefix(&file_template),
            file_template,
        })
    }
}

/// Derives the file template from a `<template>_master.h5` path.
///
/// # Errors
///
/// Returns [`PreconditionError::InvalidMasterFile`] if the file name does not
/// match.
pub fn file_template(master_file: &Path) -> Result<String, PreconditionError> {
    let name = master_file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    MASTER_FILE
        .captures(name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| PreconditionError::InvalidMasterFile(master_file.display().to_string()))
}

/// Builds the `ap_<sample>_run<run>` prefix for result files.
///
/// The template's underscore-separated parts are read as
/// `..._<sample>_<run>`; shorter templates keep what they have.
#[must_use]
pub fn result_prefix(file_template: &str) -> String {
    let parts: Vec<&str> = file_template.split('_').collect();
    match parts.as_slice() {
        [.., sample, run] => format!("ap_{sample}_run{run}"),
        [single] => format!("ap_{single}_run"),
        _ => "ap_run".to_string(),
    }
}
