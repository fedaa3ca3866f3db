//! Shared utility functions for capsule-forge.

pub mod json_extraction;

pub use json_extraction::{extract_json_object, find_matching_brace, preview, JsonExtraction};
