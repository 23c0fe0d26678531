//! HTML Publisher
//!
//! Writes the rendered memo document to the configured output file.
//! The file is replaced wholesale through a temporary file in the same
//! directory, so readers only ever see a complete document.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur during publishing
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Writer for the HTML output artifact
#[derive(Debug, Clone, Default)]
pub struct HtmlPublisher {
    path: Option<PathBuf>,
}

impl HtmlPublisher {
    /// Create a publisher writing to `path`; `None` disables output
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    /// Whether an output file is configured
    pub fn is_enabled(&self) -> bool {
        self.path.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Replace the output file with `html`
    ///
    /// # Returns
    /// `true` if a file was written, `false` when output is disabled
    pub fn publish(&self, html: &str) -> Result<bool, PublishError> {
        let Some(path) = &self.path else {
            return Ok(false);
        };
        write_atomic(path, html.as_bytes()).map_err(|source| PublishError::Write {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), bytes = html.len(), "Published HTML");
        Ok(true)
    }
}

/// Write `contents` to `path` via a temporary file and rename
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_publish_writes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("memos.html");
        let publisher = HtmlPublisher::new(Some(path.clone()));

        assert!(publisher.publish("<html></html>").unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "<html></html>");
    }

    #[test]
    fn test_publish_overwrites_wholesale() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("memos.html");
        let publisher = HtmlPublisher::new(Some(path.clone()));

        publisher.publish("a much longer first document").unwrap();
        publisher.publish("short").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "short");
    }

    #[test]
    fn test_publish_disabled_is_noop() {
        let publisher = HtmlPublisher::default();
        assert!(!publisher.is_enabled());
        assert!(!publisher.publish("<html></html>").unwrap());
    }

    #[test]
    fn test_publish_missing_directory_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nope").join("memos.html");
        let publisher = HtmlPublisher::new(Some(path));
        assert!(matches!(
            publisher.publish("x"),
            Err(PublishError::Write { .. })
        ));
    }

    #[test]
    fn test_write_atomic_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.json");
        write_atomic(&path, b"[]").unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("out.json")]);
    }
}
