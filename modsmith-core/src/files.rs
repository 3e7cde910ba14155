//! # Guarded file writes
//!
//! Generated code only lands in approved source directories. Paths are
//! normalized lexically before any check, so `src/main/java/../../.git`
//! is judged by where it points and not by how it starts.

use crate::config::{FileOperations, Settings};
use crate::error::{file_too_large, io_failed, Error, Result};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteOutcome {
    pub path: PathBuf,
    pub backup: Option<PathBuf>,
    pub bytes: usize,
    /// False when an existing file was replaced
    pub created: bool,
}

#[derive(Debug, Clone)]
pub struct FileGuard {
    base: PathBuf,
    allowed: Vec<PathBuf>,
    blocked: Vec<PathBuf>,
    extensions: Vec<String>,
    max_bytes: usize,
    backup: bool,
}

impl FileGuard {
    /// Relative entries in `rules` are resolved against `base`
    pub fn new(base: impl AsRef<Path>, rules: &FileOperations) -> Self {
        let base = absolute(base.as_ref());
        let resolve = |entry: &String| normalize(&base.join(entry));

        Self {
            allowed: rules.allowed_directories.iter().map(resolve).collect(),
            blocked: rules.blocked_directories.iter().map(resolve).collect(),
            extensions: rules
                .allowed_extensions
                .iter()
                .map(|e| e.to_ascii_lowercase())
                .collect(),
            max_bytes: (rules.max_file_size_mb * 1024.0 * 1024.0) as usize,
            backup: rules.enable_backup_before_overwrite,
            base,
        }
    }

    /// Guard rooted at `main.workspace_path`. Backups need both backup switches on.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut guard = Self::new(&settings.main.workspace_path, &settings.security.file_operations);
        guard.backup &= settings.main.auto_backup;
        guard
    }

    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Absolute, normalized form of `path` as the guard sees it
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        normalize(&self.base.join(path))
    }

    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.resolve(path).is_file()
    }

    /// Check a write target. Returns the resolved path on success.
    pub fn validate(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let resolved = self.resolve(path.as_ref());
        let display = resolved.display().to_string();

        if let Some(blocked) = self.blocked.iter().find(|b| resolved.starts_with(b)) {
            return Err(Error::path_not_allowed(&display, format!("inside blocked directory {}", blocked.display()))
                .with_operation("files::validate"));
        }

        if !self.allowed.iter().any(|a| resolved.starts_with(a)) {
            return Err(Error::path_not_allowed(&display, "outside approved directories")
                .with_operation("files::validate"));
        }

        let extension = resolved
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_ascii_lowercase()));
        match extension {
            Some(ext) if self.extensions.contains(&ext) => Ok(resolved),
            other => Err(Error::path_not_allowed(
                &display,
                format!("extension {} not allowed", other.as_deref().unwrap_or("(none)")),
            )
            .with_operation("files::validate")),
        }
    }

    /// Validate, back up any existing file, then write
    pub fn write(&self, path: impl AsRef<Path>, content: &str) -> Result<WriteOutcome> {
        let resolved = self.validate(path)?;
        if content.len() > self.max_bytes {
            return Err(file_too_large(&resolved, content.len(), self.max_bytes).with_operation("files::write"));
        }

        let created = !resolved.exists();
        let backup = if self.backup { self.backup(&resolved)? } else { None };

        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_failed("files::write", parent, e))?;
        }
        std::fs::write(&resolved, content).map_err(|e| io_failed("files::write", &resolved, e))?;

        tracing::info!(
            path = %resolved.display(),
            bytes = content.len(),
            backup = backup.is_some(),
            "file written"
        );
        Ok(WriteOutcome {
            path: resolved,
            backup,
            bytes: content.len(),
            created,
        })
    }

    /// Copy an existing file to `<file>.bak`. Nothing to do for a missing file.
    pub fn backup(&self, path: impl AsRef<Path>) -> Result<Option<PathBuf>> {
        let resolved = self.resolve(path);
        if !resolved.is_file() {
            return Ok(None);
        }

        let mut name = OsString::from(resolved.as_os_str());
        name.push(".bak");
        let backup = PathBuf::from(name);

        std::fs::copy(&resolved, &backup).map_err(|e| io_failed("files::backup", &resolved, e))?;
        tracing::debug!(backup = %backup.display(), "backup created");
        Ok(Some(backup))
    }
}

fn absolute(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };
    normalize(&joined)
}

/// Resolve `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn guard(base: &Path) -> FileGuard {
        FileGuard::new(base, &FileOperations::default())
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/a/b/../c/./d.java")), PathBuf::from("/a/c/d.java"));
        assert_eq!(normalize(Path::new("/../../x")), PathBuf::from("/x"));
    }

    #[test]
    fn test_validate_allowed_path() {
        let dir = tempfile::tempdir().unwrap();
        let guard = guard(dir.path());

        let resolved = guard.validate("src/main/java/com/example/RubyBlock.java").unwrap();
        assert!(resolved.starts_with(dir.path()));
        assert!(guard.validate("generated/Thing.JAVA").is_ok());
    }

    #[test]
    fn test_validate_rejections() {
        let dir = tempfile::tempdir().unwrap();
        let guard = guard(dir.path());

        let cases = [
            "README.java",
            "src/main/resources/fabric.mod.json",
            "src/main/java/../../../.git/config.java",
            "/etc/passwd.java",
            "src/main/java/Ruby",
        ];
        for case in cases {
            let err = guard.validate(case).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::PathNotAllowed, "{}", case);
        }
    }

    #[test]
    fn test_blocked_wins_over_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let rules = FileOperations {
            allowed_directories: vec![".".into()],
            blocked_directories: vec!["target".into()],
            ..Default::default()
        };
        let guard = FileGuard::new(dir.path(), &rules);

        assert!(guard.validate("Any.java").is_ok());
        let err = guard.validate("target/Gen.java").unwrap_err();
        assert!(err.to_string().contains("blocked"));
    }

    #[test]
    fn test_write_creates_parents_and_backups() {
        let dir = tempfile::tempdir().unwrap();
        let guard = guard(dir.path());
        let target = "src/main/java/com/example/RubyBlock.java";

        let first = guard.write(target, "class A {}").unwrap();
        assert!(first.created);
        assert_eq!(first.backup, None);

        let second = guard.write(target, "class B {}").unwrap();
        assert!(!second.created);
        let backup = second.backup.unwrap();
        assert!(backup.to_string_lossy().ends_with("RubyBlock.java.bak"));
        assert_eq!(std::fs::read_to_string(backup).unwrap(), "class A {}");
        assert_eq!(std::fs::read_to_string(second.path).unwrap(), "class B {}");
    }

    #[test]
    fn test_backup_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let rules = FileOperations {
            enable_backup_before_overwrite: false,
            ..Default::default()
        };
        let guard = FileGuard::new(dir.path(), &rules);

        guard.write("generated/A.java", "1").unwrap();
        let outcome = guard.write("generated/A.java", "2").unwrap();
        assert_eq!(outcome.backup, None);
    }

    #[test]
    fn test_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        let rules = FileOperations {
            max_file_size_mb: 0.001,
            ..Default::default()
        };
        let guard = FileGuard::new(dir.path(), &rules);

        let err = guard.write("generated/Big.java", &"x".repeat(2048)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileTooLarge);
        assert!(!guard.exists("generated/Big.java"));
    }

    #[test]
    fn test_from_settings_respects_auto_backup() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.main.workspace_path = dir.path().display().to_string();
        settings.main.auto_backup = false;

        let guard = FileGuard::from_settings(&settings);
        guard.write("generated/A.java", "1").unwrap();
        assert_eq!(guard.write("generated/A.java", "2").unwrap().backup, None);
    }
}
