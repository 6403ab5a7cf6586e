//! Shared utility functions for research-forge.
//!
//! Currently: JSON extraction from free-form model output.

pub mod json_extraction;

pub use json_extraction::{
    extract_from_code_block, extract_json_object, extract_largest_json_object,
    find_matching_brace, try_extract_json_object, JsonExtractionResult,
};
