use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, BoostQuery, FuzzyTermQuery, Occur, Query, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, Value, STRING, STORED};
use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, StopWordFilter, TextAnalyzer, TokenStream};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::{debug, warn};

use ragstore_core::config::{LexicalEngineKind, LexicalSettings};
use ragstore_core::types::{DocumentId, LexicalIndexEntry};

use super::LexicalIndex;
use crate::text::{max_edits, STOP_WORDS};

const TOKENIZER: &str = "ragstore_text";
const WRITER_HEAP: usize = 50_000_000;
const FUZZY_WEIGHT: f32 = 0.5;

pub fn build_schema() -> Schema {
	let mut schema_builder = Schema::builder();
	schema_builder.add_text_field("id", STRING | STORED);
	let content_indexing = TextFieldIndexing::default().set_tokenizer(TOKENIZER).set_index_option(IndexRecordOption::WithFreqsAndPositions);
	schema_builder.add_text_field("content", TextOptions::default().set_indexing_options(content_indexing));
	schema_builder.build()
}

pub fn register_tokenizer(index: &Index, stop_words: bool) {
	let tokenizer = if stop_words {
		TextAnalyzer::builder(SimpleTokenizer::default())
			.filter(LowerCaser)
			.filter(StopWordFilter::remove(STOP_WORDS.iter().map(|s| s.to_string())))
			.build()
	} else {
		TextAnalyzer::builder(SimpleTokenizer::default()).filter(LowerCaser).build()
	};
	index.tokenizers().register(TOKENIZER, tokenizer);
}

struct Opened {
	index: Index,
	id_field: Field,
	content_field: Field,
}

/// Tantivy-backed BM25 index, on disk under `{name}.tantivy/` or in RAM.
pub struct TantivyIndex {
	settings: LexicalSettings,
	opened: Option<Opened>,
}

impl TantivyIndex {
	pub fn new(settings: LexicalSettings) -> Self {
		Self { settings, opened: None }
	}

	pub fn index_dir(dir: &Path, name: &str) -> PathBuf {
		dir.join(format!("{name}.tantivy"))
	}

	fn open(&mut self, index: Index) -> Result<()> {
		register_tokenizer(&index, self.settings.stop_words);
		let schema = index.schema();
		let id_field = schema.get_field("id")?;
		let content_field = schema.get_field("content")?;
		self.opened = Some(Opened { index, id_field, content_field });
		Ok(())
	}

	fn opened(&self) -> Result<&Opened> {
		self.opened.as_ref().ok_or_else(|| anyhow!("tantivy index is not open"))
	}

	fn num_docs(&self) -> Result<u64> {
		let o = self.opened()?;
		let reader: IndexReader = o.index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into()?;
		Ok(reader.searcher().num_docs())
	}

	fn build_query(&self, o: &Opened, query: &str) -> Result<Option<Box<dyn Query>>> {
		let mut analyzer = o.index.tokenizer_for_field(o.content_field)?;
		let mut stream = analyzer.token_stream(query);
		let mut words = Vec::new();
		while stream.advance() {
			words.push(stream.token().text.clone());
		}
		if words.is_empty() {
			return Ok(None);
		}

		let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
		for word in words {
			let term = Term::from_field_text(o.content_field, &word);
			let exact: Box<dyn Query> = Box::new(TermQuery::new(term.clone(), IndexRecordOption::WithFreqs));
			let exact = if (self.settings.boost_exact - 1.0).abs() > f32::EPSILON {
				Box::new(BoostQuery::new(exact, self.settings.boost_exact)) as Box<dyn Query>
			} else {
				exact
			};
			clauses.push((Occur::Should, exact));

			// tantivy's automaton tops out at two edits
			let distance = max_edits(&word).min(2) as u8;
			if self.settings.fuzzy && distance > 0 {
				let fuzzy = FuzzyTermQuery::new(term, distance, true);
				clauses.push((Occur::Should, Box::new(BoostQuery::new(Box::new(fuzzy), FUZZY_WEIGHT))));
			}
		}
		Ok(Some(Box::new(BooleanQuery::new(clauses))))
	}
}

impl LexicalIndex for TantivyIndex {
	fn kind(&self) -> LexicalEngineKind {
		LexicalEngineKind::Tantivy
	}

	fn create(&mut self, dir: Option<&Path>, name: &str) -> Result<()> {
		let index = match dir {
			Some(dir) => {
				let path = Self::index_dir(dir, name);
				if path.exists() { std::fs::remove_dir_all(&path)?; }
				std::fs::create_dir_all(&path)?;
				Index::create_in_dir(&path, build_schema())?
			}
			None => Index::create_in_ram(build_schema()),
		};
		self.open(index)
	}

	fn restore(&mut self, dir: &Path, name: &str, entries: &[LexicalIndexEntry]) -> Result<()> {
		let path = Self::index_dir(dir, name);
		let reopened = if path.join("meta.json").exists() {
			match Index::open_in_dir(&path) {
				Ok(index) => self.open(index).is_ok(),
				Err(e) => {
					warn!(path = %path.display(), error = %e, "tantivy index unreadable, rebuilding");
					false
				}
			}
		} else {
			false
		};
		if reopened && self.num_docs()? == entries.len() as u64 {
			return Ok(());
		}
		debug!(path = %path.display(), docs = entries.len(), "rebuilding tantivy index from side table");
		self.create(Some(dir), name)?;
		self.insert(entries)
	}

	fn export(&mut self, _dir: &Path, _name: &str) -> Result<()> {
		// every insert commits, the directory is already current
		Ok(())
	}

	fn insert(&mut self, entries: &[LexicalIndexEntry]) -> Result<()> {
		let o = self.opened()?;
		let mut writer: IndexWriter = o.index.writer(WRITER_HEAP)?;
		for e in entries {
			writer.delete_term(Term::from_field_text(o.id_field, &e.id));
			writer.add_document(doc!(
				o.id_field => e.id.clone(),
				o.content_field => e.content.clone(),
			))?;
		}
		writer.commit()?;
		Ok(())
	}

	fn remove(&mut self, ids: &[DocumentId]) -> Result<()> {
		let o = self.opened()?;
		let mut writer: IndexWriter = o.index.writer(WRITER_HEAP)?;
		for id in ids {
			writer.delete_term(Term::from_field_text(o.id_field, id));
		}
		writer.commit()?;
		Ok(())
	}

	fn clear(&mut self) -> Result<()> {
		let o = self.opened()?;
		let mut writer: IndexWriter = o.index.writer(WRITER_HEAP)?;
		writer.delete_all_documents()?;
		writer.commit()?;
		Ok(())
	}

	fn query(&self, query: &str, limit: usize) -> Result<Vec<(DocumentId, f32)>> {
		let o = self.opened()?;
		if limit == 0 {
			return Ok(Vec::new());
		}
		let Some(q) = self.build_query(o, query)? else { return Ok(Vec::new()) };
		let reader: IndexReader = o.index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into()?;
		let searcher = reader.searcher();
		let top_docs = searcher.search(&*q, &TopDocs::with_limit(limit))?;
		let mut hits = Vec::with_capacity(top_docs.len());
		for (score, addr) in top_docs {
			let doc: TantivyDocument = searcher.doc(addr)?;
			if let Some(id) = doc.get_first(o.id_field).and_then(|v| v.as_str()) {
				hits.push((id.to_string(), score));
			}
		}
		Ok(hits)
	}
}
