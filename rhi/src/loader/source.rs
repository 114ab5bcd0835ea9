//! Where material files are read from.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::MaterialError;

/// Byte source for material files.
///
/// `read` is called from loader worker threads and may block.
pub trait MaterialSource: Send + Sync + 'static {
    /// Read the whole file at `path` as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns [`MaterialError::Source`] if the file is missing or not
    /// valid UTF-8.
    fn read(&self, path: &str) -> Result<String, MaterialError>;
}

/// Material files on disk, relative to a root directory.
///
/// # Example
///
/// ```ignore
/// let source = FileSystemSource::new("./assets");
/// // Reads ./assets/materials/render.material
/// let text = source.read("materials/render.material")?;
/// ```
#[derive(Debug, Clone)]
pub struct FileSystemSource {
    root: PathBuf,
}

impl FileSystemSource {
    /// Create a source rooted at `root`. The directory is not checked until
    /// the first read.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    pub fn root(&self) -> &std::path::Path {
        &self.root
    }
}

impl MaterialSource for FileSystemSource {
    fn read(&self, path: &str) -> Result<String, MaterialError> {
        let full_path = self.root.join(path);
        std::fs::read_to_string(&full_path).map_err(|e| MaterialError::Source {
            path: path.to_string(),
            reason: format!("{}: {e}", full_path.display()),
        })
    }
}

/// In-memory material files for tests and embedded assets.
///
/// Cloning shares the underlying map, so files can be added after the
/// source was handed to a loader.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    files: Arc<RwLock<HashMap<String, String>>>,
}

impl MemorySource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the file at `path`.
    pub fn insert(&self, path: impl Into<String>, text: impl Into<String>) {
        self.files.write().insert(path.into(), text.into());
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(self, path: impl Into<String>, text: impl Into<String>) -> Self {
        self.insert(path, text);
        self
    }

    /// Remove the file at `path`, returning its text if it existed.
    pub fn remove(&self, path: &str) -> Option<String> {
        self.files.write().remove(path)
    }
}

impl MaterialSource for MemorySource {
    fn read(&self, path: &str) -> Result<String, MaterialError> {
        self.files
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| MaterialError::Source {
                path: path.to_string(),
                reason: "file not found".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_source_read() {
        let source = MemorySource::new().with("a.material", "{}");
        assert_eq!(source.read("a.material").unwrap(), "{}");
        assert!(matches!(
            source.read("b.material"),
            Err(MaterialError::Source { .. })
        ));
    }

    #[test]
    fn test_memory_source_shared_between_clones() {
        let source = MemorySource::new();
        let shared = source.clone();
        source.insert("late.material", "x");
        assert_eq!(shared.read("late.material").unwrap(), "x");
        assert_eq!(shared.remove("late.material").as_deref(), Some("x"));
    }

    #[test]
    fn test_file_system_source_reports_missing_file() {
        let source = FileSystemSource::new(std::env::temp_dir().join("redlilium-rhi-missing"));
        let err = source.read("nope.material").unwrap_err();
        assert!(err.to_string().contains("nope.material"));
    }
}
