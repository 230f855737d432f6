//! Built-in processors.

mod cleaner;
mod replace;

pub use cleaner::Cleaner;
pub use replace::{Replace, ReplaceRule};
