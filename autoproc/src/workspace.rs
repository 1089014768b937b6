//! Collision-free working directories for stages.

use crate::errors::PipelineError;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

const DEFAULT_SUFFIX_LIMIT: u64 = 10_000;

/// Hands out one fresh directory per stage invocation.
///
/// Directories are named `<base>/<stage>_<n>` with the smallest `n` that is
/// neither on disk nor already handed out by this allocator. The directory
/// is created while the lock is held, so concurrent callers asking for the
/// same stage name always receive distinct paths.
///
/// Allocation is synchronous: each attempt is a single `mkdir`, issued from
/// the controller between stage groups while no stage task is waiting on it.
#[derive(Debug)]
pub struct WorkspaceAllocator {
    base: PathBuf,
    suffix_limit: u64,
    claimed: Mutex<HashSet<PathBuf>>,
}

impl WorkspaceAllocator {
    /// Creates an allocator rooted at `base`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Workspace`] if the base directory cannot be
    /// created.
    pub fn new(base: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let base = base.into();
        std::fs::create_dir_all(&base).map_err(|source| PipelineError::Workspace {
            path: base.clone(),
            source,
        })?;
        Ok(Self {
            base,
            suffix_limit: DEFAULT_SUFFIX_LIMIT,
            claimed: Mutex::new(HashSet::new()),
        })
    }

    /// Caps the number of suffixes tried per stage name.
    #[must_use]
    pub fn with_suffix_limit(mut self, limit: u64) -> Self {
        self.suffix_limit = limit;
        self
    }

    /// Returns the base directory.
    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Claims and creates a working directory for `stage_name`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Workspace`] if the name is not a plain file
    /// name, every suffix up to the limit is taken, or the directory cannot
    /// be created.
    pub fn allocate(&self, stage_name: &str) -> Result<PathBuf, PipelineError> {
        if stage_name.is_empty() || stage_name.contains(['/', '\\']) || stage_name == ".." {
            return Err(PipelineError::Workspace {
                path: self.base.join(stage_name),
                source: io::Error::new(io::ErrorKind::InvalidInput, "invalid stage name"),
            });
        }

        let mut claimed = self.claimed.lock();
        for n in 0..self.suffix_limit {
            let path = self.base.join(format!("{stage_name}_{n}"));
            if claimed.contains(&path) {
                continue;
            }
            match std::fs::create_dir(&path) {
                Ok(()) => {
                    debug!(stage = %stage_name, path = %path.display(), "Allocated working directory");
                    claimed.insert(path.clone());
                    return Ok(path);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(PipelineError::Workspace { path, source }),
            }
        }
        Err(PipelineError::Workspace {
            path: self.base.join(format!("{stage_name}_{}", self.suffix_limit)),
            source: io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("no free working directory among {} suffixes", self.suffix_limit),
            ),
        })
    }

    /// Returns every directory claimed so far.
    #[must_use]
    pub fn claimed(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.claimed.lock().iter().cloned().collect();
        paths.sort();
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_first_allocation_uses_suffix_zero() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = WorkspaceAllocator::new(dir.path()).unwrap();

        let path = allocator.allocate("indexing").unwrap();

        assert_eq!(path, dir.path().join("indexing_0"));
        assert!(path.is_dir());
    }

    #[test]
    fn test_repeated_allocation_increments_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = WorkspaceAllocator::new(dir.path()).unwrap();

        let first = allocator.allocate("scaling_anom").unwrap();
        let second = allocator.allocate("scaling_anom").unwrap();

        assert_eq!(first, dir.path().join("scaling_anom_0"));
        assert_eq!(second, dir.path().join("scaling_anom_1"));
    }

    #[test]
    fn test_existing_directories_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("integration_0")).unwrap();
        std::fs::create_dir(dir.path().join("integration_1")).unwrap();
        let allocator = WorkspaceAllocator::new(dir.path()).unwrap();

        let path = allocator.allocate("integration").unwrap();

        assert_eq!(path, dir.path().join("integration_2"));
    }

    #[test]
    fn test_concurrent_callers_never_share_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = Arc::new(WorkspaceAllocator::new(dir.path()).unwrap());

        let paths: Vec<PathBuf> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let allocator = Arc::clone(&allocator);
                    scope.spawn(move || allocator.allocate("refine_correct").unwrap())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let unique: HashSet<_> = paths.iter().collect();
        assert_eq!(unique.len(), 8);
        assert_eq!(allocator.claimed().len(), 8);
    }

    #[test]
    fn test_invalid_stage_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = WorkspaceAllocator::new(dir.path()).unwrap();

        assert!(allocator.allocate("../escape").is_err());
        assert!(allocator.allocate("").is_err());
    }

    #[test]
    fn test_exhausted_suffixes_are_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = WorkspaceAllocator::new(dir.path()).unwrap().with_suffix_limit(2);

        allocator.allocate("scaling_anom").unwrap();
        allocator.allocate("scaling_anom").unwrap();
        let err = allocator.allocate("scaling_anom").unwrap_err();

        assert!(matches!(err, PipelineError::Workspace { .. }));
        assert!(err.to_string().contains("no free working directory"));
    }
}
