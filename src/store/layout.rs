//! On-disk layout of one book directory.
//!
//! ```text
//! <book_dir>/
//!   chapter.raw.sqlite        acquisition output
//!   chapter.<stage>.sqlite    one store per processing stage
//!   book_info.raw.json
//!   book_info.<stage>.json
//!   pipeline.json             provenance manifest
//! ```
//!
//! Later runs depend on these names for incremental reuse.

use std::fmt;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::StorageError;
use crate::book::BookInfo;

/// Name of the acquisition generation.
pub const RAW_GENERATION: &str = "raw";

/// File name of the provenance manifest.
pub const MANIFEST_FILE: &str = "pipeline.json";

/// A named snapshot of a book's chapters (`raw` or a stage name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(String);

impl Generation {
    /// The acquisition output generation.
    #[must_use]
    pub fn raw() -> Self {
        Self(RAW_GENERATION.to_string())
    }

    /// Validates a generation name for use in file names.
    ///
    /// Returns `None` for empty names or names containing path separators,
    /// dots or whitespace.
    #[must_use]
    pub fn new(name: &str) -> Option<Self> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        valid.then(|| Self(name.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_raw(&self) -> bool {
        self.0 == RAW_GENERATION
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Paths of every persisted artifact of one book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookLayout {
    dir: PathBuf,
}

impl BookLayout {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Layout for `book_id` under a shared data root.
    #[must_use]
    pub fn for_book(data_root: &Path, book_id: &str) -> Self {
        Self::new(data_root.join(sanitize_book_id(book_id)))
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn chapter_store_path(&self, generation: &Generation) -> PathBuf {
        self.dir.join(format!("chapter.{generation}.sqlite"))
    }

    #[must_use]
    pub fn book_info_path(&self, generation: &Generation) -> PathBuf {
        self.dir.join(format!("book_info.{generation}.json"))
    }

    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    /// Creates the book directory if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the directory cannot be created.
    pub fn ensure_dir(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir).map_err(|e| StorageError::io(&self.dir, &e))
    }

    /// Loads the BookInfo of a generation, `None` if it was never written.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the file exists but cannot be read or decoded.
    pub fn load_book_info(&self, generation: &Generation) -> Result<Option<BookInfo>, StorageError> {
        read_json(&self.book_info_path(generation))
    }

    /// Persists the BookInfo of a generation atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the file cannot be written.
    pub fn save_book_info(
        &self,
        generation: &Generation,
        info: &BookInfo,
    ) -> Result<(), StorageError> {
        self.ensure_dir()?;
        write_json_atomic(&self.book_info_path(generation), info)
    }

    /// Generations that currently have a chapter store file, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the directory cannot be listed.
    pub fn stored_generations(&self) -> Result<Vec<Generation>, StorageError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.dir).map_err(|e| StorageError::io(&self.dir, &e))?;
        let mut generations: Vec<Generation> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name();
                let name = name.to_str()?;
                let stem = name.strip_prefix("chapter.")?.strip_suffix(".sqlite")?;
                Generation::new(stem)
            })
            .collect();
        generations.sort();
        Ok(generations)
    }
}

/// Replaces characters that are unsafe in a directory name.
fn sanitize_book_id(book_id: &str) -> String {
    let cleaned: String = book_id
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(StorageError::io(path, &error)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|error| StorageError::Io {
            path: path.to_path_buf(),
            message: format!("invalid JSON: {error}"),
        })
}

/// Writes `value` as pretty JSON through a temp file renamed into place.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let tmp_path = path.with_extension("json.tmp");
    let file = fs::File::create(&tmp_path).map_err(|e| StorageError::io(&tmp_path, &e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).map_err(|error| StorageError::Io {
        path: tmp_path.clone(),
        message: error.to_string(),
    })?;
    writer.flush().map_err(|e| StorageError::io(&tmp_path, &e))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| StorageError::io(&tmp_path, &e))?;
    drop(writer);
    fs::rename(&tmp_path, path).map_err(|e| StorageError::io(path, &e))?;
    debug!(path = %path.display(), "wrote json file");
    Ok(())
}
