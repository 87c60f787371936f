use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use ragstore_core::config::LexicalEngineKind;

/// Where a lexical index lives: `{base}/{engine}/{project}/{index_name}.*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexicalLocation {
	pub base_data_dir: PathBuf,
	pub project_id: String,
	pub index_name: String,
}

impl LexicalLocation {
	pub fn new(base_data_dir: impl Into<PathBuf>, project_id: impl Into<String>, index_name: impl Into<String>) -> Self {
		Self { base_data_dir: base_data_dir.into(), project_id: project_id.into(), index_name: index_name.into() }
	}

	pub fn dir(&self, engine: LexicalEngineKind) -> PathBuf {
		self.base_data_dir.join(engine.as_str()).join(path_segment(&self.project_id))
	}

	pub fn name(&self) -> String {
		path_segment(&self.index_name)
	}
}

/// Keeps a user-supplied name inside a single path component.
pub fn path_segment(raw: &str) -> String {
	let s: String = raw
		.chars()
		.map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
		.collect();
	if s.is_empty() || s.chars().all(|c| c == '.') { "_".to_string() } else { s }
}

pub fn side_table_path(dir: &Path, name: &str) -> PathBuf {
	dir.join(format!("{name}.docs.json"))
}

/// Serialize to a temp file in the target directory, then rename over `path`.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
	let dir = path.parent().unwrap_or_else(|| Path::new("."));
	let tmp = tempfile::NamedTempFile::new_in(dir).with_context(|| format!("creating temp file in {}", dir.display()))?;
	{
		let mut w = BufWriter::new(tmp.as_file());
		serde_json::to_writer(&mut w, value)?;
		w.flush()?;
	}
	tmp.as_file().sync_all()?;
	tmp.persist(path).with_context(|| format!("replacing {}", path.display()))?;
	Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
	let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
	serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn segments_cannot_escape_the_directory() {
		assert_eq!(path_segment("../etc"), ".._etc");
		assert_eq!(path_segment(".."), "_");
		assert_eq!(path_segment("qdrant-docs v2"), "qdrant-docs_v2");
	}

	#[test]
	fn atomic_write_replaces_file() {
		let tmp = tempfile::tempdir().expect("tempdir");
		let path = tmp.path().join("x.json");
		write_json_atomic(&path, &vec![1, 2]).expect("first");
		write_json_atomic(&path, &vec![3]).expect("second");
		let back: Vec<i32> = read_json(&path).expect("read");
		assert_eq!(back, vec![3]);
	}
}
