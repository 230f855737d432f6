//! `pipeline.json`: which stages ran, in what order, with which config.
//!
//! ```json
//! {
//!   "pipeline": ["cleaner", "replace"],
//!   "executed": {
//!     "cleaner": {"processed_at": "...", "depends_on": [], "config_hash": "..."},
//!     "replace": {"processed_at": "...", "depends_on": ["cleaner"], "config_hash": "..."}
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::{Generation, StorageError, read_json, write_json_atomic};

/// Provenance of one executed stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub processed_at: DateTime<Utc>,
    /// Stages completed before this one, in order.
    pub depends_on: Vec<String>,
    pub config_hash: String,
}

/// The cache-invalidation ledger of one book. Owned by the stage engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineMeta {
    /// Stage names of the last run, in run order.
    #[serde(default)]
    pub pipeline: Vec<String>,
    #[serde(default)]
    pub executed: BTreeMap<String, StageRecord>,
}

impl PipelineMeta {
    /// Loads the manifest at `path`.
    ///
    /// A missing file yields an empty manifest. So does an unreadable one,
    /// with a warning: losing it only costs cache reuse.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        match read_json(path) {
            Ok(Some(meta)) => meta,
            Ok(None) => Self::default(),
            Err(error) => {
                warn!(path = %path.display(), error = %error, "discarding unreadable pipeline manifest");
                Self::default()
            }
        }
    }

    /// Writes the manifest atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        write_json_atomic(path, self)
    }

    /// Generation an exporter should read: the last stage of the last run,
    /// or `raw` when no stage has run.
    #[must_use]
    pub fn latest_generation(&self) -> Generation {
        self.pipeline
            .last()
            .and_then(|name| Generation::new(name))
            .unwrap_or_else(Generation::raw)
    }
}
