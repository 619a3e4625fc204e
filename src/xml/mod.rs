//! XML security utilities.

pub mod sanitizer;

pub use sanitizer::{SanitizeError, XmlSanitizer};
