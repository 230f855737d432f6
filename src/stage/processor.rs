//! Processor trait and the name-keyed registry that builds processors from
//! stage options.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use super::StageOptions;
use super::processors::{Cleaner, Replace};
use crate::book::{BookInfo, Chapter};

/// Errors raised by processors and their factories.
#[derive(Debug, Clone, Error)]
pub enum ProcessorError {
    #[error("unknown processor '{0}'")]
    Unknown(String),

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("{0}")]
    Failed(String),
}

/// A pure transformation of one generation into the next.
///
/// Implementations must be deterministic given their options; the stage
/// engine reuses earlier outputs whenever the option hash is unchanged.
pub trait Processor: Send + Sync {
    /// # Errors
    ///
    /// Returns [`ProcessorError`] if the book info cannot be transformed.
    fn process_book_info(&self, info: BookInfo) -> Result<BookInfo, ProcessorError>;

    /// # Errors
    ///
    /// Returns [`ProcessorError`] if the chapter cannot be transformed.
    fn process_chapter(&self, chapter: Chapter) -> Result<Chapter, ProcessorError>;
}

/// Builds a processor from its stage options.
pub type ProcessorFactory =
    Arc<dyn Fn(&StageOptions) -> Result<Box<dyn Processor>, ProcessorError> + Send + Sync>;

/// Decodes stage options into a processor's typed option struct.
///
/// # Errors
///
/// Returns [`ProcessorError::InvalidOptions`] if decoding fails (unknown keys
/// included, when the struct denies them).
pub fn parse_options<T: DeserializeOwned>(options: &StageOptions) -> Result<T, ProcessorError> {
    let object: serde_json::Map<String, Value> = options
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    serde_json::from_value(Value::Object(object))
        .map_err(|e| ProcessorError::InvalidOptions(e.to_string()))
}

/// Processor factories keyed by name.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    factories: BTreeMap<String, ProcessorFactory>,
}

impl ProcessorRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in `cleaner` and `replace` processors.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("cleaner", |options| {
            Ok(Box::new(Cleaner::from_options(options)?) as Box<dyn Processor>)
        });
        registry.register("replace", |options| {
            Ok(Box::new(Replace::from_options(options)?) as Box<dyn Processor>)
        });
        registry
    }

    /// Adds or replaces the factory for `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&StageOptions) -> Result<Box<dyn Processor>, ProcessorError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Instantiates processor `name` with `options`.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessorError::Unknown`] for unregistered names and whatever
    /// the factory reports for bad options.
    pub fn create(
        &self,
        name: &str,
        options: &StageOptions,
    ) -> Result<Box<dyn Processor>, ProcessorError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ProcessorError::Unknown(name.to_string()))?;
        factory(options)
    }
}

impl fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}
