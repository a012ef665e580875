//! Worker script location: check candidates once, remember the winner.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, OnceLock,
    },
};

use tokio::sync::OnceCell;

use crate::error::{EngineError, EngineResult};

/// Process-wide cache of logical script id -> verified path.
///
/// Entries are filled lazily on the first successful lookup and never
/// invalidated. Each id owns a compute-once cell, so concurrent first
/// callers share one lookup and observe one value.
#[derive(Debug, Default)]
pub struct PathResolver {
    cells: Mutex<HashMap<String, Arc<OnceCell<PathBuf>>>>,
    lookups: AtomicUsize,
}

impl PathResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared resolver for the lifetime of the process.
    pub fn global() -> &'static PathResolver {
        static GLOBAL: OnceLock<PathResolver> = OnceLock::new();
        GLOBAL.get_or_init(PathResolver::new)
    }

    /// Returns the first existing candidate for `id`, probing only when the
    /// id has not been resolved before.
    pub async fn resolve(&self, id: &str, candidates: &[PathBuf]) -> EngineResult<PathBuf> {
        let cell = self.cell(id);
        if let Some(path) = cell.get() {
            tracing::trace!(id, path = %path.display(), "script path cache hit");
            return Ok(path.clone());
        }

        let path = cell
            .get_or_try_init(|| async {
                self.lookups.fetch_add(1, Ordering::Relaxed);
                match first_existing(candidates).await {
                    Some(found) => {
                        tracing::info!(id, path = %found.display(), "script found and cached");
                        Ok(found)
                    }
                    None => {
                        tracing::error!(id, "no script found in any expected location");
                        Err(EngineError::PathNotFound {
                            id: id.to_string(),
                            candidates: candidates.to_vec(),
                        })
                    }
                }
            })
            .await?;
        Ok(path.clone())
    }

    /// Cached path for `id`, if it has been resolved.
    pub fn cached(&self, id: &str) -> Option<PathBuf> {
        self.cells
            .lock()
            .ok()
            .and_then(|cells| cells.get(id).and_then(|c| c.get().cloned()))
    }

    /// Number of file-system lookup rounds performed so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }

    fn cell(&self, id: &str) -> Arc<OnceCell<PathBuf>> {
        let mut cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
        cells
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }
}

async fn first_existing(candidates: &[PathBuf]) -> Option<PathBuf> {
    for candidate in candidates {
        if exists(candidate).await {
            return Some(absolute(candidate));
        }
        tracing::debug!(path = %candidate.display(), "script not found at candidate");
    }
    None
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn picks_first_existing_candidate() {
        let tmp = TempDir::new().unwrap();
        let second = tmp.path().join("b.py");
        let third = tmp.path().join("c.py");
        std::fs::write(&second, "").unwrap();
        std::fs::write(&third, "").unwrap();

        let resolver = PathResolver::new();
        let got = resolver
            .resolve("s", &[tmp.path().join("a.py"), second.clone(), third])
            .await
            .unwrap();
        assert_eq!(got, second);
    }

    #[tokio::test]
    async fn second_resolve_uses_cache() {
        let tmp = TempDir::new().unwrap();
        let script = tmp.path().join("casestudy.py");
        std::fs::write(&script, "").unwrap();
        let resolver = PathResolver::new();

        let first = resolver.resolve("case", &[script.clone()]).await.unwrap();
        std::fs::remove_file(&script).unwrap();
        let second = resolver.resolve("case", &[script.clone()]).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(resolver.lookup_count(), 1);
        assert_eq!(resolver.cached("case"), Some(first));
    }

    #[tokio::test]
    async fn missing_everywhere_is_path_not_found() {
        let tmp = TempDir::new().unwrap();
        let resolver = PathResolver::new();
        let err = resolver
            .resolve("ghost", &[tmp.path().join("nope.py")])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PathNotFound { ref id, .. } if id == "ghost"));
        assert!(resolver.cached("ghost").is_none());
    }

    #[tokio::test]
    async fn failed_lookup_is_retried_later() {
        let tmp = TempDir::new().unwrap();
        let script = tmp.path().join("late.py");
        let resolver = PathResolver::new();

        assert!(resolver.resolve("late", &[script.clone()]).await.is_err());
        std::fs::write(&script, "").unwrap();
        assert_eq!(resolver.resolve("late", &[script.clone()]).await.unwrap(), script);
        assert_eq!(resolver.lookup_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_resolution_agrees() {
        let tmp = TempDir::new().unwrap();
        let script = tmp.path().join("shared.py");
        std::fs::write(&script, "").unwrap();
        let resolver = Arc::new(PathResolver::new());

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let resolver = resolver.clone();
            let candidates = vec![tmp.path().join("missing.py"), script.clone()];
            tasks.push(tokio::spawn(async move {
                resolver.resolve("shared", &candidates).await.unwrap()
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap(), script);
        }
        assert_eq!(resolver.lookup_count(), 1);
    }
}
