use anyhow::Result;
use bm25::{Document, Language, SearchEngine, SearchEngineBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ragstore_core::config::LexicalEngineKind;
use ragstore_core::types::{DocumentId, LexicalIndexEntry};

use super::LexicalIndex;
use crate::persist::write_json_atomic;

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
	engine: String,
	document_count: usize,
}

/// In-memory BM25 over the `bm25` crate (English stemming and stop words).
///
/// The crate fits average document length when the engine is built, so the
/// engine is rebuilt from `docs` after every mutation.
pub struct Bm25Index {
	docs: BTreeMap<DocumentId, String>,
	engine: SearchEngine<DocumentId>,
}

fn build(docs: &BTreeMap<DocumentId, String>) -> SearchEngine<DocumentId> {
	let documents: Vec<Document<DocumentId>> =
		docs.iter().map(|(id, contents)| Document { id: id.clone(), contents: contents.clone() }).collect();
	SearchEngineBuilder::<DocumentId>::with_documents(Language::English, documents).build()
}

impl Bm25Index {
	pub fn new() -> Self {
		let docs = BTreeMap::new();
		let engine = build(&docs);
		Self { docs, engine }
	}

	fn manifest_path(dir: &Path, name: &str) -> PathBuf {
		dir.join(format!("{name}.json"))
	}

	fn rebuild(&mut self) {
		self.engine = build(&self.docs);
	}
}

impl Default for Bm25Index {
	fn default() -> Self {
		Self::new()
	}
}

impl LexicalIndex for Bm25Index {
	fn kind(&self) -> LexicalEngineKind {
		LexicalEngineKind::Bm25
	}

	fn create(&mut self, _dir: Option<&Path>, _name: &str) -> Result<()> {
		self.docs.clear();
		self.rebuild();
		Ok(())
	}

	fn restore(&mut self, _dir: &Path, _name: &str, entries: &[LexicalIndexEntry]) -> Result<()> {
		// the side table is authoritative; the manifest only describes it
		self.docs = entries.iter().map(|e| (e.id.clone(), e.content.clone())).collect();
		self.rebuild();
		Ok(())
	}

	fn export(&mut self, dir: &Path, name: &str) -> Result<()> {
		let manifest = Manifest { engine: LexicalEngineKind::Bm25.to_string(), document_count: self.docs.len() };
		write_json_atomic(&Self::manifest_path(dir, name), &manifest)
	}

	fn insert(&mut self, entries: &[LexicalIndexEntry]) -> Result<()> {
		for e in entries {
			self.docs.insert(e.id.clone(), e.content.clone());
		}
		self.rebuild();
		Ok(())
	}

	fn remove(&mut self, ids: &[DocumentId]) -> Result<()> {
		let before = self.docs.len();
		for id in ids {
			self.docs.remove(id);
		}
		if self.docs.len() != before {
			self.rebuild();
		}
		Ok(())
	}

	fn clear(&mut self) -> Result<()> {
		self.docs.clear();
		self.rebuild();
		Ok(())
	}

	fn query(&self, query: &str, limit: usize) -> Result<Vec<(DocumentId, f32)>> {
		if limit == 0 || self.docs.is_empty() {
			return Ok(Vec::new());
		}
		Ok(self
			.engine
			.search(query, limit)
			.into_iter()
			.map(|r| (r.document.id, r.score))
			.collect())
	}
}
