//! Artifact and parameter keys shared by the controller and stage runners.

/// Per-shell completeness table (array of `CompletenessEntry`).
pub const COMPLETENESS_ENTRIES: &str = "completeness_entries";
/// Space-group number determined by the merging-law stage.
pub const SPACE_GROUP_NUMBER: &str = "space_group_number";
/// Unit cell determined by the merging-law stage (array of six numbers).
pub const UNIT_CELL: &str = "unit_cell";
/// Resolution cutoff in Å passed to a stage.
pub const RESOLUTION_CUTOFF: &str = "resolution_cutoff";
/// Whether the stage applies the anomalous treatment.
pub const ANOMALOUS: &str = "anomalous";
/// Reflection file written by integration and its reruns.
pub const XDS_ASCII_HKL: &str = "xds_ascii_hkl";
/// Path of the scaling log.
pub const SCALING_LOG: &str = "scaling_log";
/// Inline scaling log text, used instead of [`SCALING_LOG`] when present.
pub const SCALING_LOG_TEXT: &str = "scaling_log_text";
/// Merged reflection file from scaling.
pub const MERGED_MTZ: &str = "merged_mtz";
/// Unmerged reflection file from scaling.
pub const UNMERGED_MTZ: &str = "unmerged_mtz";
/// Twinning detected by the twinning analysis.
pub const HAS_TWINNING: &str = "has_twinning";
/// Pseudo-translation detected by the twinning analysis.
pub const HAS_PSEUDOTRANSLATION: &str = "has_pseudotranslation";
/// First image number of the processed range.
pub const IMAGE_START: &str = "image_start";
/// Last image number of the processed range.
pub const IMAGE_END: &str = "image_end";
/// Space group supplied with the request (number or symbol).
pub const SPACE_GROUP: &str = "space_group";
/// File template derived from the master file name.
pub const FILE_TEMPLATE: &str = "file_template";
