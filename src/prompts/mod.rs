//! Prompt module for LLM-based operations.
//!
//! This module provides prompt templates for the tagging stage.

pub mod tag_extraction;

pub use tag_extraction::*;
