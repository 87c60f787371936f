use std::path::Path;

use ragstore_core::config::{LexicalEngineKind, LexicalSettings};
use ragstore_core::types::{DocumentId, LexicalIndexEntry};

pub mod bm25;
pub mod inverted;
pub mod tantivy;

pub use self::bm25::Bm25Index;
pub use self::inverted::InvertedIndex;
pub use self::tantivy::TantivyIndex;

/// Token index behind a [`crate::LexicalStore`]. The store owns payloads and
/// lifecycle; an index only maps query text to scored ids.
pub trait LexicalIndex: Send + Sync {
	fn kind(&self) -> LexicalEngineKind;

	/// Start empty. `dir` is `None` when running in-memory.
	fn create(&mut self, dir: Option<&Path>, name: &str) -> anyhow::Result<()>;
	/// Reload a previously exported index; `entries` is the saved side table.
	fn restore(&mut self, dir: &Path, name: &str, entries: &[LexicalIndexEntry]) -> anyhow::Result<()>;
	fn export(&mut self, dir: &Path, name: &str) -> anyhow::Result<()>;

	/// Upsert by id.
	fn insert(&mut self, entries: &[LexicalIndexEntry]) -> anyhow::Result<()>;
	fn remove(&mut self, ids: &[DocumentId]) -> anyhow::Result<()>;
	fn clear(&mut self) -> anyhow::Result<()>;
	/// Best first.
	fn query(&self, query: &str, limit: usize) -> anyhow::Result<Vec<(DocumentId, f32)>>;
}

pub fn build_index(kind: LexicalEngineKind, settings: &LexicalSettings) -> Box<dyn LexicalIndex> {
	match kind {
		LexicalEngineKind::Tantivy => Box::new(TantivyIndex::new(settings.clone())),
		LexicalEngineKind::Bm25 => Box::new(Bm25Index::new()),
		LexicalEngineKind::Inverted => Box::new(InvertedIndex::new(settings.clone())),
	}
}
