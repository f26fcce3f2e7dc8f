//! Shared types for the tern DDL coordinator: identifiers, cluster metadata,
//! the error taxonomy and configuration.

pub mod config;
pub mod error;
pub mod metadata;
pub mod types;

pub use error::{TernError, TernResult};
