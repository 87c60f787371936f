//! Shared vocabulary of the retrieval layer: value types, the error taxonomy,
//! configuration, backend/engine traits, result fusion and lexical resolution.

pub mod config;
pub mod embed;
pub mod error;
pub mod fusion;
pub mod resolver;
pub mod traits;
pub mod types;

pub use error::{Error, ErrorKind, Result};
