//! Ephemeral working directories with guaranteed release.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use super::error::{SandboxError, SandboxResult};
use crate::obs;

/// An ephemeral workspace exclusively owned by one trial.
pub trait IsolatedContext: Send {
    /// Root directory graders run against.
    fn working_dir(&self) -> &Path;

    /// Release the workspace. Called exactly once per acquired context.
    fn cleanup(&mut self) -> SandboxResult<()>;
}

/// Source of fresh isolated contexts.
pub trait ContextProvider: Send + Sync {
    fn acquire(&self) -> SandboxResult<Box<dyn IsolatedContext>>;
}

/// Scoped owner of an [`IsolatedContext`].
///
/// Cleanup runs once: either explicitly through [`ContextGuard::release`],
/// or from `Drop` on every other exit path (early return, panic, a dropped
/// future). Cleanup failures in `Drop` are logged.
pub struct ContextGuard {
    inner: Option<Box<dyn IsolatedContext>>,
    working_dir: PathBuf,
}

impl ContextGuard {
    pub fn new(context: Box<dyn IsolatedContext>) -> Self {
        let working_dir = context.working_dir().to_path_buf();
        Self {
            inner: Some(context),
            working_dir,
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Release the context now and report the cleanup outcome.
    pub fn release(mut self) -> SandboxResult<()> {
        match self.inner.take() {
            Some(mut context) => context.cleanup(),
            None => Ok(()),
        }
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if let Some(mut context) = self.inner.take() {
            if let Err(err) = context.cleanup() {
                obs::emit_context_cleanup_error(&self.working_dir, &err);
            }
        }
    }
}

/// A context backed by a temporary directory.
#[derive(Debug)]
pub struct TempDirContext {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl TempDirContext {
    fn new(dir: TempDir) -> Self {
        let path = dir.path().to_path_buf();
        Self {
            dir: Some(dir),
            path,
        }
    }
}

impl IsolatedContext for TempDirContext {
    fn working_dir(&self) -> &Path {
        &self.path
    }

    fn cleanup(&mut self) -> SandboxResult<()> {
        match self.dir.take() {
            Some(dir) => dir.close().map_err(|source| SandboxError::Cleanup {
                path: self.path.clone(),
                source,
            }),
            None => Err(SandboxError::AlreadyReleased {
                path: self.path.clone(),
            }),
        }
    }
}

/// Hands out fresh temporary directories, optionally pre-populated from a
/// seed directory.
#[derive(Debug, Clone)]
pub struct TempDirProvider {
    prefix: String,
    parent: Option<PathBuf>,
    seed: Option<PathBuf>,
}

impl Default for TempDirProvider {
    fn default() -> Self {
        Self {
            prefix: "passk-trial-".to_string(),
            parent: None,
            seed: None,
        }
    }
}

impl TempDirProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the contents of `seed` into every acquired context.
    pub fn with_seed(mut self, seed: impl Into<PathBuf>) -> Self {
        self.seed = Some(seed.into());
        self
    }

    /// Create contexts under `parent` instead of the system temp dir.
    pub fn in_dir(mut self, parent: impl Into<PathBuf>) -> Self {
        self.parent = Some(parent.into());
        self
    }
}

impl TempDirProvider {
    /// Refuse a seed that would contain the contexts being seeded.
    fn check_seed(&self, seed: &Path) -> SandboxResult<()> {
        let seed_error = |source| SandboxError::Seed {
            path: seed.to_path_buf(),
            source,
        };
        let seed = fs::canonicalize(seed).map_err(seed_error)?;
        let parent = self.parent.clone().unwrap_or_else(std::env::temp_dir);
        let parent = fs::canonicalize(&parent).map_err(SandboxError::Create)?;
        if parent.starts_with(&seed) {
            return Err(SandboxError::SeedContainsContexts { seed, parent });
        }
        Ok(())
    }
}

impl ContextProvider for TempDirProvider {
    fn acquire(&self) -> SandboxResult<Box<dyn IsolatedContext>> {
        if let Some(seed) = &self.seed {
            self.check_seed(seed)?;
        }

        let mut builder = tempfile::Builder::new();
        builder.prefix(&self.prefix);
        let dir = match &self.parent {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
        .map_err(SandboxError::Create)?;

        if let Some(seed) = &self.seed {
            copy_dir_recursive(seed, dir.path()).map_err(|source| SandboxError::Seed {
                path: seed.clone(),
                source,
            })?;
        }

        Ok(Box::new(TempDirContext::new(dir)))
    }
}

/// Copy regular files and directories. Symlinks are skipped so a context
/// never points outside itself.
fn copy_dir_recursive(from: &Path, to: &Path) -> std::io::Result<()> {
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_symlink() {
            obs::emit_seed_symlink_skipped(&entry.path());
        } else if file_type.is_dir() {
            fs::create_dir_all(&target)?;
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct CountingContext {
        dir: PathBuf,
        cleanups: Arc<AtomicU32>,
    }

    impl IsolatedContext for CountingContext {
        fn working_dir(&self) -> &Path {
            &self.dir
        }

        fn cleanup(&mut self) -> SandboxResult<()> {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn counting() -> (Box<dyn IsolatedContext>, Arc<AtomicU32>) {
        let cleanups = Arc::new(AtomicU32::new(0));
        let ctx = CountingContext {
            dir: PathBuf::from("/tmp/counting"),
            cleanups: cleanups.clone(),
        };
        (Box::new(ctx), cleanups)
    }

    #[test]
    fn test_guard_release_cleans_once() {
        let (ctx, cleanups) = counting();
        let guard = ContextGuard::new(ctx);
        guard.release().unwrap();
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_guard_drop_cleans_once() {
        let (ctx, cleanups) = counting();
        {
            let guard = ContextGuard::new(ctx);
            assert_eq!(guard.working_dir(), Path::new("/tmp/counting"));
        }
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_tempdir_provider_creates_and_removes_dir() {
        let provider = TempDirProvider::new();
        let ctx = provider.acquire().unwrap();
        let path = ctx.working_dir().to_path_buf();
        assert!(path.is_dir());

        ContextGuard::new(ctx).release().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_tempdir_context_second_cleanup_errors() {
        let mut ctx = TempDirProvider::new().acquire().unwrap();
        ctx.cleanup().unwrap();
        assert!(matches!(
            ctx.cleanup(),
            Err(SandboxError::AlreadyReleased { .. })
        ));
    }

    #[test]
    fn test_tempdir_provider_copies_seed() {
        let seed = tempfile::tempdir().unwrap();
        fs::create_dir_all(seed.path().join("src")).unwrap();
        fs::write(seed.path().join("src/lib.rs"), "pub fn hello() {}").unwrap();
        fs::write(seed.path().join("README.md"), "# seed").unwrap();

        let parent = tempfile::tempdir().unwrap();
        let provider = TempDirProvider::new()
            .with_seed(seed.path())
            .in_dir(parent.path());

        let first = provider.acquire().unwrap();
        let second = provider.acquire().unwrap();
        assert_ne!(first.working_dir(), second.working_dir());
        assert!(first.working_dir().starts_with(parent.path()));
        assert!(first.working_dir().join("src/lib.rs").is_file());
        assert!(second.working_dir().join("README.md").is_file());
    }

    #[test]
    fn test_seed_containing_the_context_parent_is_rejected() {
        let seed = tempfile::tempdir().unwrap();
        let parent = seed.path().join("contexts");
        fs::create_dir(&parent).unwrap();

        let provider = TempDirProvider::new()
            .with_seed(seed.path())
            .in_dir(&parent);
        match provider.acquire() {
            Err(SandboxError::SeedContainsContexts { .. }) => {}
            Err(other) => panic!("expected SeedContainsContexts, got {other:?}"),
            Ok(_) => panic!("expected SeedContainsContexts"),
        }
        assert_eq!(fs::read_dir(&parent).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_seed_symlinks_are_not_copied() {
        let seed = tempfile::tempdir().unwrap();
        fs::write(seed.path().join("real.txt"), "x").unwrap();
        std::os::unix::fs::symlink("/etc", seed.path().join("etc-link")).unwrap();
        std::os::unix::fs::symlink(seed.path(), seed.path().join("loop")).unwrap();

        let parent = tempfile::tempdir().unwrap();
        let ctx = TempDirProvider::new()
            .with_seed(seed.path())
            .in_dir(parent.path())
            .acquire()
            .unwrap();
        assert!(ctx.working_dir().join("real.txt").is_file());
        assert!(fs::symlink_metadata(ctx.working_dir().join("etc-link")).is_err());
        assert!(fs::symlink_metadata(ctx.working_dir().join("loop")).is_err());
    }

    #[test]
    fn test_missing_seed_is_reported() {
        let provider = TempDirProvider::new().with_seed("/definitely/not/a/seed/dir");
        match provider.acquire() {
            Err(SandboxError::Seed { path, .. }) => {
                assert_eq!(path, PathBuf::from("/definitely/not/a/seed/dir"))
            }
            Err(other) => panic!("expected Seed error, got {other:?}"),
            Ok(_) => panic!("expected Seed error"),
        }
    }
}
