//! Stage configuration and the option hash used for cache invalidation.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::db::DbOptions;

/// Free-form processor options as written in the run file.
pub type StageOptions = BTreeMap<String, Value>;

/// Default chapters per output batch.
pub const DEFAULT_STAGE_BATCH_SIZE: usize = 200;

/// One entry of the stage list.
///
/// `name` is the output generation name and, unless `processor` is set, also
/// the processor to run. Naming stages explicitly lets the same processor run
/// more than once in a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processor: Option<String>,
    /// Reprocess every chapter even when the cached output is reusable.
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default)]
    pub options: StageOptions,
}

impl StageConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            processor: None,
            overwrite: false,
            options: StageOptions::new(),
        }
    }

    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_processor(mut self, processor: impl Into<String>) -> Self {
        self.processor = Some(processor.into());
        self
    }

    #[must_use]
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Registry key of the processor this stage runs.
    #[must_use]
    pub fn processor_name(&self) -> &str {
        self.processor.as_deref().unwrap_or(&self.name)
    }

    /// SHA-256 (hex) of the processor name and the canonical, key-sorted
    /// serialization of `options`.
    ///
    /// Any option change yields a different hash; key order in the run file
    /// does not matter. `overwrite` is not part of the hash.
    #[must_use]
    pub fn config_hash(&self) -> String {
        let mut canonical = String::new();
        canonical.push_str(self.processor_name());
        canonical.push('\n');
        write_canonical(&Value::Object(self.options.clone().into_iter().collect()), &mut canonical);
        format!("{:x}", Sha256::digest(canonical.as_bytes()))
    }
}

/// Compact JSON with object keys sorted at every depth.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (index, (key, value)) in entries.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}

/// Tuning for the stage engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageEngineOptions {
    /// Chapters per input load and per output flush (>= 1).
    pub batch_size: usize,
    pub db: DbOptions,
}

impl Default for StageEngineOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_STAGE_BATCH_SIZE,
            db: DbOptions::default(),
        }
    }
}
