use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::warn;

use ragstore_core::config::{LexicalEngineKind, LexicalSettings};
use ragstore_core::types::{DocumentId, LexicalIndexEntry};

use super::LexicalIndex;
use crate::persist::write_json_atomic;
use crate::text::{levenshtein_within, max_edits, soundex, tokenize};

const K1: f32 = 1.2;
const B: f32 = 0.75;

const PREFIX_WEIGHT: f32 = 0.7;
const FUZZY_WEIGHT: f32 = 0.5;
const PHONETIC_WEIGHT: f32 = 0.3;
const MIN_PREFIX_LEN: usize = 2;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Postings {
	/// term -> (doc -> term frequency)
	terms: BTreeMap<String, BTreeMap<DocumentId, u32>>,
	doc_lengths: BTreeMap<DocumentId, u32>,
}

#[derive(Debug, Deserialize)]
struct Export {
	#[serde(flatten)]
	postings: Postings,
}

#[derive(Serialize)]
struct ExportRef<'a> {
	engine: &'a str,
	#[serde(flatten)]
	postings: &'a Postings,
}

/// Hand-rolled inverted index with BM25 scoring and query expansion.
///
/// Each query word expands to prefix, fuzzy (bounded edit distance) and
/// Soundex matches when enabled; an expansion scores at its weight and a
/// document keeps only the best expansion per query word.
pub struct InvertedIndex {
	settings: LexicalSettings,
	postings: Postings,
	total_length: u64,
	/// Lowercased text for exact-phrase boosting; rebuilt from the side table.
	phrases: HashMap<DocumentId, String>,
}

impl InvertedIndex {
	pub fn new(settings: LexicalSettings) -> Self {
		Self { settings, postings: Postings::default(), total_length: 0, phrases: HashMap::new() }
	}

	fn export_path(dir: &Path, name: &str) -> PathBuf {
		dir.join(format!("{name}.json"))
	}

	fn remove_one(&mut self, id: &str) {
		let Some(len) = self.postings.doc_lengths.remove(id) else { return };
		self.total_length = self.total_length.saturating_sub(u64::from(len));
		self.postings.terms.retain(|_, docs| {
			docs.remove(id);
			!docs.is_empty()
		});
		self.phrases.remove(id);
	}

	fn add_one(&mut self, entry: &LexicalIndexEntry) {
		self.remove_one(&entry.id);
		let tokens = tokenize(&entry.content, self.settings.stop_words);
		let len = tokens.len() as u32;
		for t in tokens {
			*self.postings.terms.entry(t).or_default().entry(entry.id.clone()).or_insert(0) += 1;
		}
		self.postings.doc_lengths.insert(entry.id.clone(), len);
		self.total_length += u64::from(len);
		self.phrases.insert(entry.id.clone(), entry.content.to_lowercase());
	}

	fn recount(&mut self) {
		self.total_length = self.postings.doc_lengths.values().map(|l| u64::from(*l)).sum();
	}

	/// Index terms a query word matches, with the weight of each match.
	fn expand(&self, word: &str) -> Vec<(&str, f32)> {
		let mut out: Vec<(&str, f32)> = Vec::new();
		if let Some((term, _)) = self.postings.terms.get_key_value(word) {
			out.push((term.as_str(), 1.0));
		}
		let fuzzy_budget = if self.settings.fuzzy { max_edits(word) } else { 0 };
		let word_code = if self.settings.phonetic { soundex(word) } else { None };
		let allow_prefix = self.settings.prefix && word.chars().count() >= MIN_PREFIX_LEN;
		if !allow_prefix && fuzzy_budget == 0 && word_code.is_none() {
			return out;
		}
		for term in self.postings.terms.keys() {
			if term == word {
				continue;
			}
			let mut weight = 0f32;
			if allow_prefix && term.starts_with(word) {
				weight = weight.max(PREFIX_WEIGHT);
			}
			if fuzzy_budget > 0 {
				if let Some(d) = levenshtein_within(word, term, fuzzy_budget) {
					weight = weight.max(FUZZY_WEIGHT * (1.0 - d as f32 / (fuzzy_budget as f32 + 1.0)));
				}
			}
			if let Some(code) = &word_code {
				if soundex(term).as_ref() == Some(code) {
					weight = weight.max(PHONETIC_WEIGHT);
				}
			}
			if weight > 0.0 {
				out.push((term.as_str(), weight));
			}
		}
		out
	}

	fn bm25(&self, tf: u32, df: usize, doc_len: u32) -> f32 {
		let n = self.postings.doc_lengths.len() as f32;
		let avgdl = if n > 0.0 { self.total_length as f32 / n } else { 0.0 };
		let idf = ((n - df as f32 + 0.5) / (df as f32 + 0.5) + 1.0).ln();
		let tf = tf as f32;
		let norm = if avgdl > 0.0 { doc_len as f32 / avgdl } else { 1.0 };
		idf * (tf * (K1 + 1.0)) / (tf + K1 * (1.0 - B + B * norm))
	}
}

impl LexicalIndex for InvertedIndex {
	fn kind(&self) -> LexicalEngineKind {
		LexicalEngineKind::Inverted
	}

	fn create(&mut self, _dir: Option<&Path>, _name: &str) -> Result<()> {
		self.clear()
	}

	fn restore(&mut self, dir: &Path, name: &str, entries: &[LexicalIndexEntry]) -> Result<()> {
		let path = Self::export_path(dir, name);
		let loaded = std::fs::read_to_string(&path)
			.with_context(|| format!("reading {}", path.display()))
			.and_then(|raw| serde_json::from_str::<Export>(&raw).context("parsing inverted index export"));
		match loaded {
			Ok(export) if export.postings.doc_lengths.len() == entries.len() => {
				self.postings = export.postings;
				self.recount();
				self.phrases = entries.iter().map(|e| (e.id.clone(), e.content.to_lowercase())).collect();
			}
			Ok(_) => {
				warn!(path = %path.display(), "inverted index export out of date, rebuilding");
				self.clear()?;
				self.insert(entries)?;
			}
			Err(e) => {
				warn!(path = %path.display(), error = %e, "inverted index export unreadable, rebuilding");
				self.clear()?;
				self.insert(entries)?;
			}
		}
		Ok(())
	}

	fn export(&mut self, dir: &Path, name: &str) -> Result<()> {
		let export = ExportRef { engine: LexicalEngineKind::Inverted.as_str(), postings: &self.postings };
		write_json_atomic(&Self::export_path(dir, name), &export)
	}

	fn insert(&mut self, entries: &[LexicalIndexEntry]) -> Result<()> {
		for e in entries {
			self.add_one(e);
		}
		Ok(())
	}

	fn remove(&mut self, ids: &[DocumentId]) -> Result<()> {
		for id in ids {
			self.remove_one(id);
		}
		Ok(())
	}

	fn clear(&mut self) -> Result<()> {
		self.postings = Postings::default();
		self.total_length = 0;
		self.phrases.clear();
		Ok(())
	}

	fn query(&self, query: &str, limit: usize) -> Result<Vec<(DocumentId, f32)>> {
		if limit == 0 {
			return Ok(Vec::new());
		}
		let words = tokenize(query, self.settings.stop_words);
		let mut scores: HashMap<&str, f32> = HashMap::new();
		for word in &words {
			let mut best: HashMap<&str, f32> = HashMap::new();
			for (term, weight) in self.expand(word) {
				let Some(docs) = self.postings.terms.get(term) else { continue };
				for (doc, tf) in docs {
					let len = self.postings.doc_lengths.get(doc).copied().unwrap_or(0);
					let s = self.bm25(*tf, docs.len(), len) * weight;
					let slot = best.entry(doc.as_str()).or_insert(0.0);
					if s > *slot {
						*slot = s;
					}
				}
			}
			for (doc, s) in best {
				*scores.entry(doc).or_insert(0.0) += s;
			}
		}

		let phrase = query.trim().to_lowercase();
		let boost = self.settings.boost_exact;
		let mut ranked: Vec<(DocumentId, f32)> = scores
			.into_iter()
			.map(|(doc, s)| {
				let exact = !phrase.is_empty() && self.phrases.get(doc).is_some_and(|p| p.contains(&phrase));
				(doc.to_string(), if exact { s * boost } else { s })
			})
			.collect();
		ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
		ranked.truncate(limit);
		Ok(ranked)
	}
}
