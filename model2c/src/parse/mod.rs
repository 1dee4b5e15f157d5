//! Model readers.

pub mod json;

pub use json::{load_model, parse_model};
