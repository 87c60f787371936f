//! Keyword search for stores whose backend cannot score text itself.
//!
//! [`LexicalStore`] owns the lifecycle, the id -> payload side table and
//! persistence; the engines in [`engines`] (tantivy, bm25, inverted) only map
//! query text to scored ids and are swappable through `LexicalEngineKind`.

pub mod engines;
pub mod persist;
pub mod store;
pub mod text;

pub use persist::LexicalLocation;
pub use store::LexicalStore;
