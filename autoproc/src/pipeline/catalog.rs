//! Registry of stage runners, one per stage kind.

use crate::errors::PipelineError;
use crate::stages::{StageKind, StageRunner};
use std::collections::HashMap;
use std::sync::Arc;

/// Maps every [`StageKind`] to the runner that executes it.
#[derive(Debug, Clone, Default)]
pub struct StageCatalog {
    runners: HashMap<StageKind, Arc<dyn StageRunner>>,
}

impl StageCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a catalog by asking `factory` for every stage kind.
    #[must_use]
    pub fn from_fn(mut factory: impl FnMut(StageKind) -> Arc<dyn StageRunner>) -> Self {
        let runners = StageKind::ALL
            .iter()
            .map(|&kind| (kind, factory(kind)))
            .collect();
        Self { runners }
    }

    /// Adds or replaces a runner.
    #[must_use]
    pub fn with_runner(mut self, kind: StageKind, runner: Arc<dyn StageRunner>) -> Self {
        self.register(kind, runner);
        self
    }

    /// Adds or replaces a runner in place.
    pub fn register(&mut self, kind: StageKind, runner: Arc<dyn StageRunner>) {
        self.runners.insert(kind, runner);
    }

    /// Returns the runner for a kind.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingRunner`] if none is registered.
    pub fn get(&self, kind: StageKind) -> Result<Arc<dyn StageRunner>, PipelineError> {
        self.runners
            .get(&kind)
            .cloned()
            .ok_or_else(|| PipelineError::MissingRunner(kind.name().to_string()))
    }

    /// Stage kinds without a runner, in graph order.
    #[must_use]
    pub fn missing(&self) -> Vec<StageKind> {
        StageKind::ALL
            .into_iter()
            .filter(|kind| !self.runners.contains_key(kind))
            .collect()
    }

    /// Checks that every stage kind has a runner.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingRunner`] for the first gap.
    pub fn validate(&self) -> Result<(), PipelineError> {
        match self.missing().first() {
            Some(kind) => Err(PipelineError::MissingRunner(kind.name().to_string())),
            None => Ok(()),
        }
    }

    /// Number of registered runners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.runners.len()
    }

    /// Returns true if no runner is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedStage;

    #[test]
    fn test_empty_catalog_reports_every_kind_missing() {
        let catalog = StageCatalog::new();
        assert!(catalog.is_empty());
        assert_eq!(catalog.missing().len(), StageKind::ALL.len());
        assert!(matches!(
            catalog.validate(),
            Err(PipelineError::MissingRunner(name)) if name == "indexing"
        ));
    }

    #[test]
    fn test_from_fn_covers_everything() {
        let catalog = StageCatalog::from_fn(|kind| Arc::new(ScriptedStage::new(kind.name())));
        assert_eq!(catalog.len(), StageKind::ALL.len());
        assert!(catalog.validate().is_ok());
        assert_eq!(catalog.get(StageKind::Truncate).unwrap().name(), "truncate");
    }

    #[test]
    fn test_partial_catalog() {
        let catalog = StageCatalog::new()
            .with_runner(StageKind::Indexing, Arc::new(ScriptedStage::new("indexing")));

        assert!(catalog.get(StageKind::Indexing).is_ok());
        assert!(catalog.get(StageKind::Integration).is_err());
        assert_eq!(catalog.missing()[0], StageKind::Integration);
    }
}
