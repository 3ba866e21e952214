//! Core types for the retrieval engine
//!
//! This crate provides the types shared across all other crates:
//! - Knowledge-base document model
//! - Query rewriting result
//! - Workspace-wide error type

pub mod document;
pub mod error;

pub use document::{Document, RankedDocument, RewrittenQuery};
pub use error::{Error, Result};
