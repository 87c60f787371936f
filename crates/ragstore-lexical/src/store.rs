use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use ragstore_core::config::{LexicalEngineKind, LexicalSettings};
use ragstore_core::error::{translate_local, Error, Result};
use ragstore_core::traits::LexicalEngine;
use ragstore_core::types::{
	assign_ids, Degradation, DeleteSelector, DocumentId, Filter, IndexedDocument, LexicalIndexEntry, LexicalResult,
	LexicalStats, LifecycleState, Outcome,
};

use crate::engines::{build_index, LexicalIndex};
use crate::persist::{read_json, side_table_path, write_json_atomic, LexicalLocation};

struct Inner {
	state: LifecycleState,
	index: Box<dyn LexicalIndex>,
	entries: BTreeMap<DocumentId, LexicalIndexEntry>,
	/// `None` while running in-memory.
	dir: Option<PathBuf>,
	loaded: bool,
	dirty: bool,
}

/// One lexical index with its side table, lifecycle and persistence.
///
/// Engines are interchangeable: the store holds payloads and resolves filters
/// and document-id deletes itself, so an engine only scores ids.
pub struct LexicalStore {
	kind: LexicalEngineKind,
	location: Option<LexicalLocation>,
	settings: LexicalSettings,
	inner: Mutex<Inner>,
}

impl LexicalStore {
	pub fn new(kind: LexicalEngineKind, location: Option<LexicalLocation>, settings: LexicalSettings) -> Self {
		let index = build_index(kind, &settings);
		Self {
			kind,
			location,
			settings,
			inner: Mutex::new(Inner {
				state: LifecycleState::Uninitialized,
				index,
				entries: BTreeMap::new(),
				dir: None,
				loaded: false,
				dirty: false,
			}),
		}
	}

	/// Never touches the filesystem.
	pub fn in_memory(kind: LexicalEngineKind, settings: LexicalSettings) -> Self {
		Self::new(kind, None, settings)
	}

	pub fn state(&self) -> LifecycleState {
		self.inner.lock().state
	}

	fn name(&self) -> String {
		self.location.as_ref().map(LexicalLocation::name).unwrap_or_else(|| "memory".to_string())
	}

	fn open(&self, inner: &mut Inner) -> Result<Outcome<bool>> {
		let mut degraded = Vec::new();
		let name = self.name();

		let mut dir = match (&self.location, self.settings.in_memory) {
			(_, true) => {
				degraded.push(Degradation::PersistenceDisabled { reason: "in-memory mode is configured".into() });
				None
			}
			(None, false) => None,
			(Some(loc), false) => {
				let dir = loc.dir(self.kind);
				match std::fs::create_dir_all(&dir) {
					Ok(()) => Some(dir),
					Err(e) => {
						degraded.push(Degradation::PersistenceDisabled {
							reason: format!("cannot create {}: {e}", dir.display()),
						});
						None
					}
				}
			}
		};

		inner.entries.clear();
		let mut loaded = false;
		match dir.clone() {
			Some(d) if side_table_path(&d, &name).exists() => {
				let rows: Vec<LexicalIndexEntry> =
					read_json(&side_table_path(&d, &name)).map_err(|e| translate_local("lexical index load", e))?;
				inner.index.restore(&d, &name, &rows).map_err(|e| translate_local("lexical index load", e))?;
				inner.entries = rows.into_iter().map(|r| (r.id.clone(), r)).collect();
				loaded = true;
			}
			Some(d) => {
				if let Err(e) = inner.index.create(Some(&d), &name) {
					degraded.push(Degradation::PersistenceDisabled { reason: format!("{e:#}") });
					inner.index.create(None, &name).map_err(|e| translate_local("lexical index create", e))?;
					dir = None;
				}
			}
			None => inner.index.create(None, &name).map_err(|e| translate_local("lexical index create", e))?,
		}

		for d in &degraded {
			warn!(engine = %self.kind, "{d}");
		}
		info!(engine = %self.kind, dir = ?dir, documents = inner.entries.len(), loaded, "lexical index ready");
		inner.dir = dir;
		inner.loaded = loaded;
		inner.dirty = false;
		Ok(Outcome::with(loaded, degraded))
	}

	fn ensure_ready(&self, inner: &mut Inner) -> Result<()> {
		match inner.state {
			LifecycleState::Ready => Ok(()),
			LifecycleState::Closed => Err(Error::closed("lexical index")),
			LifecycleState::Uninitialized | LifecycleState::Initializing => {
				debug!(engine = %self.kind, "auto-initializing lexical index");
				inner.state = LifecycleState::Initializing;
				match self.open(inner) {
					Ok(_) => {
						inner.state = LifecycleState::Ready;
						Ok(())
					}
					Err(e) => {
						inner.state = LifecycleState::Uninitialized;
						Err(e)
					}
				}
			}
		}
	}

	fn save_locked(&self, inner: &mut Inner) -> Result<()> {
		let Some(dir) = inner.dir.clone() else {
			debug!(engine = %self.kind, "lexical index is in-memory, nothing to save");
			return Ok(());
		};
		let name = self.name();
		let rows: Vec<&LexicalIndexEntry> = inner.entries.values().collect();
		write_json_atomic(&side_table_path(&dir, &name), &rows).map_err(|e| translate_local("lexical index save", e))?;
		inner.index.export(&dir, &name).map_err(|e| translate_local("lexical index save", e))?;
		inner.dirty = false;
		debug!(engine = %self.kind, documents = rows.len(), "lexical index saved");
		Ok(())
	}
}

#[async_trait]
impl LexicalEngine for LexicalStore {
	fn kind(&self) -> LexicalEngineKind {
		self.kind
	}

	fn persist_dir(&self) -> Option<PathBuf> {
		if self.settings.in_memory {
			return None;
		}
		self.location.as_ref().map(|l| l.dir(self.kind))
	}

	async fn initialize(&self) -> Result<Outcome<bool>> {
		let mut inner = self.inner.lock();
		match inner.state {
			LifecycleState::Ready => return Ok(Outcome::ok(inner.loaded)),
			LifecycleState::Closed => return Err(Error::closed("lexical index")),
			LifecycleState::Uninitialized | LifecycleState::Initializing => {}
		}
		inner.state = LifecycleState::Initializing;
		match self.open(&mut inner) {
			Ok(outcome) => {
				inner.state = LifecycleState::Ready;
				Ok(outcome)
			}
			Err(e) => {
				inner.state = LifecycleState::Uninitialized;
				Err(e)
			}
		}
	}

	async fn add_documents(&self, docs: &[IndexedDocument], ids: Option<&[DocumentId]>) -> Result<Vec<DocumentId>> {
		let ids = assign_ids(docs, ids)?;
		let mut inner = self.inner.lock();
		self.ensure_ready(&mut inner)?;
		let rows: Vec<LexicalIndexEntry> = docs
			.iter()
			.zip(&ids)
			.map(|(d, id)| LexicalIndexEntry { id: id.clone(), content: d.content.clone(), metadata: d.metadata.clone() })
			.collect();
		inner.index.insert(&rows).map_err(|e| translate_local("lexical index insert", e))?;
		for r in rows {
			inner.entries.insert(r.id.clone(), r);
		}
		inner.dirty = true;
		debug!(engine = %self.kind, added = ids.len(), "lexical documents indexed");
		Ok(ids)
	}

	async fn search(&self, query: &str, top_k: usize, filter: Option<&Filter>) -> Result<Vec<LexicalResult>> {
		let mut inner = self.inner.lock();
		self.ensure_ready(&mut inner)?;
		if top_k == 0 || inner.entries.is_empty() {
			return Ok(Vec::new());
		}
		let filter = filter.filter(|f| !f.is_empty());
		// filtering happens here, so scan every match when a filter is set
		let limit = if filter.is_some() { inner.entries.len().max(top_k) } else { top_k };
		let hits = inner.index.query(query, limit).map_err(|e| translate_local("lexical search", e))?;
		let results = hits
			.into_iter()
			.filter_map(|(id, score)| {
				let row = inner.entries.get(&id)?;
				if filter.is_some_and(|f| !f.matches(&row.metadata)) {
					return None;
				}
				Some(LexicalResult { id: Some(id), content: row.content.clone(), metadata: row.metadata.clone(), score })
			})
			.take(top_k)
			.collect();
		Ok(results)
	}

	async fn delete(&self, selector: &DeleteSelector) -> Result<usize> {
		let mut inner = self.inner.lock();
		self.ensure_ready(&mut inner)?;
		let ids: Vec<DocumentId> = inner
			.entries
			.values()
			.filter(|r| selector.matches(&r.id, &r.metadata))
			.map(|r| r.id.clone())
			.collect();
		if ids.is_empty() {
			return Ok(0);
		}
		inner.index.remove(&ids).map_err(|e| translate_local("lexical delete", e))?;
		for id in &ids {
			inner.entries.remove(id);
		}
		inner.dirty = true;
		Ok(ids.len())
	}

	async fn clear(&self) -> Result<()> {
		let mut inner = self.inner.lock();
		self.ensure_ready(&mut inner)?;
		inner.index.clear().map_err(|e| translate_local("lexical clear", e))?;
		inner.entries.clear();
		inner.dirty = true;
		Ok(())
	}

	async fn save(&self) -> Result<()> {
		let mut inner = self.inner.lock();
		match inner.state {
			LifecycleState::Closed => Err(Error::closed("lexical index")),
			LifecycleState::Ready => self.save_locked(&mut inner),
			LifecycleState::Uninitialized | LifecycleState::Initializing => Ok(()),
		}
	}

	async fn get_stats(&self) -> Result<LexicalStats> {
		let inner = self.inner.lock();
		if inner.state == LifecycleState::Closed {
			return Err(Error::closed("lexical index"));
		}
		let persist_path = inner.dir.clone().or_else(|| self.persist_dir());
		Ok(LexicalStats {
			engine: self.kind.to_string(),
			persist_path: persist_path.map(|d| d.display().to_string()),
			document_count: inner.entries.len(),
			persistent: inner.dir.is_some(),
		})
	}

	async fn close(&self) -> Result<()> {
		let mut inner = self.inner.lock();
		let result = match inner.state {
			LifecycleState::Closed => return Ok(()),
			LifecycleState::Ready if inner.dirty => self.save_locked(&mut inner),
			_ => Ok(()),
		};
		inner.state = LifecycleState::Closed;
		info!(engine = %self.kind, "lexical index closed");
		result
	}
}
