//! Small shared helpers

pub mod json;
pub mod text;

pub use json::{extract_object, last_object_with_keys};
pub use text::{tail_snippet, truncate_chars};
