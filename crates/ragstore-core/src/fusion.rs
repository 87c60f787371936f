//! Merging vector and lexical hit lists into one ranking.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::Hasher;
use twox_hash::XxHash64;

use crate::types::{metadata_id, FusedResult, LexicalResult, Metadata, SearchType, SimilarityResult};

/// RRF damping constant.
pub const RRF_K: f32 = 60.0;
const CONTENT_KEY_CHARS: usize = 128;

/// Deduplication key: stable metadata id, then result id, then a hash of the content prefix.
pub fn dedup_key(id: Option<&str>, content: &str, metadata: &Metadata) -> String {
    if let Some(meta_id) = metadata_id(metadata) {
        return meta_id;
    }
    if let Some(id) = id.filter(|s| !s.is_empty()) {
        return id.to_string();
    }
    let prefix: String = content.chars().take(CONTENT_KEY_CHARS).collect();
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(prefix.as_bytes());
    format!("content:{:016x}", hasher.finish())
}

struct Slot {
    id: Option<String>,
    content: String,
    metadata: Metadata,
    score: f32,
    from_vector: bool,
    from_lexical: bool,
}

impl Slot {
    fn search_type(&self) -> SearchType {
        match (self.from_vector, self.from_lexical) {
            (true, false) => SearchType::Vector,
            (false, true) => SearchType::Lexical,
            _ => SearchType::Hybrid,
        }
    }
}

#[derive(Default)]
struct Merger {
    slots: HashMap<String, Slot>,
}

impl Merger {
    fn add(&mut self, id: Option<&str>, content: &str, metadata: &Metadata, score: f32, vector: bool) {
        let key = dedup_key(id, content, metadata);
        let slot = self.slots.entry(key).or_insert_with(|| Slot {
            id: id.map(str::to_string),
            content: content.to_string(),
            metadata: metadata.clone(),
            score: 0.0,
            from_vector: false,
            from_lexical: false,
        });
        slot.score += score;
        if slot.id.is_none() {
            slot.id = id.map(str::to_string);
        }
        if vector {
            slot.from_vector = true;
        } else {
            slot.from_lexical = true;
        }
    }

    fn finish(self, top_k: usize, single_source_tag: bool) -> Vec<FusedResult> {
        let mut ranked: Vec<(String, Slot)> = self.slots.into_iter().collect();
        ranked.sort_by(|(ka, a), (kb, b)| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal).then_with(|| ka.cmp(kb)));
        ranked.truncate(top_k);
        ranked
            .into_iter()
            .map(|(_, slot)| {
                let search_type = if single_source_tag { slot.search_type() } else { SearchType::Hybrid };
                FusedResult { id: slot.id, content: slot.content, metadata: slot.metadata, score: slot.score, search_type }
            })
            .collect()
    }
}

/// Alpha-weighted linear fusion.
///
/// Vector scores are scaled by `alpha`, lexical scores by `1 - alpha`, and a
/// document seen by both accumulates both. A side with zero weight contributes
/// nothing, so `alpha = 1.0` reproduces the vector ranking and `alpha = 0.0`
/// the lexical one; only then are results tagged `Vector`/`Lexical`.
pub fn fuse(vector: &[SimilarityResult], lexical: &[LexicalResult], alpha: f32, top_k: usize) -> Vec<FusedResult> {
    let alpha = if alpha.is_nan() { 0.5 } else { alpha.clamp(0.0, 1.0) };
    let lexical_weight = 1.0 - alpha;
    let mut merger = Merger::default();
    if alpha > 0.0 {
        for r in vector {
            merger.add(r.id.as_deref(), &r.content, &r.metadata, r.score * alpha, true);
        }
    }
    if lexical_weight > 0.0 {
        for r in lexical {
            merger.add(r.id.as_deref(), &r.content, &r.metadata, r.score * lexical_weight, false);
        }
    }
    let pure = alpha == 0.0 || alpha == 1.0;
    merger.finish(top_k, pure)
}

/// Reciprocal rank fusion: each list contributes `weight / (k + rank)`.
pub fn fuse_reciprocal_rank(
    vector: &[SimilarityResult],
    lexical: &[LexicalResult],
    alpha: f32,
    top_k: usize,
) -> Vec<FusedResult> {
    let alpha = if alpha.is_nan() { 0.5 } else { alpha.clamp(0.0, 1.0) };
    let mut merger = Merger::default();
    for (rank, r) in vector.iter().enumerate() {
        merger.add(r.id.as_deref(), &r.content, &r.metadata, alpha / (RRF_K + rank as f32 + 1.0), true);
    }
    for (rank, r) in lexical.iter().enumerate() {
        merger.add(r.id.as_deref(), &r.content, &r.metadata, (1.0 - alpha) / (RRF_K + rank as f32 + 1.0), false);
    }
    merger.finish(top_k, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vec_hit(id: &str, score: f32) -> SimilarityResult {
        SimilarityResult { id: Some(id.into()), content: format!("doc {id}"), metadata: Metadata::new(), score }
    }

    fn lex_hit(id: &str, score: f32) -> LexicalResult {
        LexicalResult { id: Some(id.into()), content: format!("doc {id}"), metadata: Metadata::new(), score }
    }

    #[test]
    fn overlapping_document_accumulates_both_signals() {
        let v = vec![vec_hit("a", 1.0), vec_hit("b", 0.5)];
        let l = vec![lex_hit("b", 1.0), lex_hit("c", 0.5)];
        let out = fuse(&v, &l, 0.5, 10);
        assert_eq!(out[0].id.as_deref(), Some("b"));
        assert!((out[0].score - 0.75).abs() < 1e-6);
        assert_eq!(out[0].search_type, SearchType::Hybrid);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn alpha_one_is_pure_vector() {
        let v = vec![vec_hit("a", 0.9), vec_hit("b", 0.4)];
        let l = vec![lex_hit("c", 7.0)];
        let out = fuse(&v, &l, 1.0, 10);
        let ids: Vec<_> = out.iter().filter_map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(out.iter().all(|r| r.search_type == SearchType::Vector));
    }

    #[test]
    fn alpha_zero_is_pure_lexical() {
        let v = vec![vec_hit("a", 0.9)];
        let l = vec![lex_hit("c", 7.0), lex_hit("d", 3.0)];
        let out = fuse(&v, &l, 0.0, 10);
        let ids: Vec<_> = out.iter().filter_map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec!["c", "d"]);
        assert!(out.iter().all(|r| r.search_type == SearchType::Lexical));
    }

    #[test]
    fn metadata_id_beats_result_id() {
        let mut meta = Metadata::new();
        meta.insert("chunk_id".into(), json!("stable"));
        let v = vec![SimilarityResult { id: Some("uuid-1".into()), content: "x".into(), metadata: meta.clone(), score: 1.0 }];
        let l = vec![LexicalResult { id: Some("uuid-2".into()), content: "x".into(), metadata: meta, score: 1.0 }];
        assert_eq!(fuse(&v, &l, 0.5, 10).len(), 1);
    }

    #[test]
    fn content_hash_dedups_anonymous_results() {
        let v = vec![SimilarityResult { id: None, content: "same text".into(), metadata: Metadata::new(), score: 0.2 }];
        let l = vec![LexicalResult { id: None, content: "same text".into(), metadata: Metadata::new(), score: 0.4 }];
        let out = fuse(&v, &l, 0.5, 10);
        assert_eq!(out.len(), 1);
        assert!((out[0].score - 0.3).abs() < 1e-6);
    }

    #[test]
    fn truncates_to_top_k() {
        let v: Vec<_> = (0..10).map(|i| vec_hit(&format!("v{i}"), i as f32)).collect();
        assert_eq!(fuse(&v, &[], 0.5, 3).len(), 3);
    }

    #[test]
    fn rrf_favours_items_in_both_lists() {
        let v = vec![vec_hit("a", 0.9), vec_hit("b", 0.8), vec_hit("c", 0.7)];
        let l = vec![lex_hit("b", 9.0), lex_hit("a", 8.0), lex_hit("d", 7.0)];
        let out = fuse_reciprocal_rank(&v, &l, 0.5, 10);
        let pos = |id: &str| out.iter().position(|r| r.id.as_deref() == Some(id)).expect("present");
        assert!(pos("a") < pos("d"));
        assert!(out.iter().all(|r| r.search_type == SearchType::Hybrid));
    }
}
