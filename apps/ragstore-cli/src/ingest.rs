use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use ragstore_core::types::{Degradation, IndexedDocument, Metadata};
use ragstore_hybrid::VectorStore;

/// Words carried over between consecutive pieces of a split paragraph.
const OVERLAP_PERCENT: f32 = 0.2;

pub struct IngestSummary {
    pub files: usize,
    pub chunks: usize,
    pub degraded: Vec<Degradation>,
}

pub fn list_txt_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("txt"))
        .collect();
    files.sort();
    files
}

fn read_lossy(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(_) => Ok(String::from_utf8_lossy(&fs::read(path).with_context(|| format!("reading {}", path.display()))?).into_owned()),
    }
}

/// Splits an over-long paragraph on word boundaries with overlap.
fn split_long(paragraph: &str, max_chars: usize) -> Vec<String> {
    let words: Vec<&str> = paragraph.split_whitespace().collect();
    let avg = (paragraph.len() / words.len().max(1)).max(1) + 1;
    let per_chunk = (max_chars / avg).max(1);
    let overlap = ((per_chunk as f32 * OVERLAP_PERCENT) as usize).min(per_chunk - 1);
    let mut out = Vec::new();
    let mut start = 0;
    while start < words.len() {
        let end = (start + per_chunk).min(words.len());
        out.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start = end - overlap;
    }
    out
}

/// Packs blank-line separated paragraphs into chunks of at most `max_chars`.
pub fn chunk_text(content: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    for paragraph in content.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        if paragraph.len() > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            chunks.extend(split_long(paragraph, max_chars));
            continue;
        }
        if !current.is_empty() && current.len() + 2 + paragraph.len() > max_chars {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn category(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .ok()
        .and_then(Path::parent)
        .and_then(Path::to_str)
        .filter(|s| !s.is_empty())
        .unwrap_or("misc")
        .to_string()
}

/// One document per chunk; ids are `{file stem}:{index}` so re-ingesting overwrites.
pub fn documents_for_file(path: &Path, root: &Path, max_chars: usize) -> Result<Vec<IndexedDocument>> {
    let content = read_lossy(path)?;
    let doc_id = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "document".to_string());
    let category = category(path, root);
    let chunks = chunk_text(&content, max_chars);
    let total = chunks.len();
    Ok(chunks
        .into_iter()
        .enumerate()
        .map(|(i, text)| {
            let metadata: Metadata = match json!({
                "id": format!("{doc_id}:{i}"),
                "document_id": doc_id,
                "path": path.to_string_lossy(),
                "category": category,
                "chunk_index": i,
                "total_chunks": total,
            }) {
                Value::Object(m) => m,
                _ => Metadata::new(),
            };
            IndexedDocument::with_metadata(text, metadata)
        })
        .collect())
}

pub async fn ingest_dir(store: &VectorStore, root: &Path, max_chars: usize) -> Result<IngestSummary> {
    let files = list_txt_files(root);
    let bar = ProgressBar::new(files.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );

    let mut summary = IngestSummary { files: files.len(), chunks: 0, degraded: Vec::new() };
    for path in &files {
        bar.set_message(path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default());
        let docs = documents_for_file(path, root, max_chars)?;
        if !docs.is_empty() {
            let outcome = store.add_documents(&docs, None).await?;
            summary.chunks += outcome.len();
            for d in outcome.degraded {
                if !summary.degraded.contains(&d) {
                    summary.degraded.push(d);
                }
            }
        }
        debug!(path = %path.display(), chunks = docs.len(), "file ingested");
        bar.inc(1);
    }
    bar.finish_and_clear();
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paragraphs_are_packed_up_to_the_limit() {
        let text = "one two\n\nthree four\n\n\n\nfive";
        assert_eq!(chunk_text(text, 20), vec!["one two\n\nthree four", "five"]);
        assert_eq!(chunk_text(text, 1000), vec!["one two\n\nthree four\n\nfive"]);
        assert!(chunk_text("  \n\n ", 10).is_empty());
    }

    #[test]
    fn long_paragraphs_split_with_overlap() {
        let words: Vec<String> = (0..50).map(|i| format!("w{i:02}")).collect();
        let chunks = chunk_text(&words.join(" "), 40);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.len() <= 40), "{chunks:?}");
        assert!(chunks.last().is_some_and(|c| c.ends_with("w49")));
    }

    #[test]
    fn files_become_documents_with_stable_ids() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sub = dir.path().join("garden");
        fs::create_dir_all(&sub).expect("mkdir");
        fs::write(sub.join("tomatoes.txt"), "Stake early.\n\nWater deeply.").expect("write");
        fs::write(dir.path().join("skip.md"), "not text").expect("write");

        let files = list_txt_files(dir.path());
        assert_eq!(files.len(), 1);
        let docs = documents_for_file(&files[0], dir.path(), 20).expect("docs");
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1].id_hint().as_deref(), Some("tomatoes:1"));
        assert_eq!(docs[0].document_id().as_deref(), Some("tomatoes"));
        assert_eq!(docs[0].metadata.get("category"), Some(&json!("garden")));
    }
}
