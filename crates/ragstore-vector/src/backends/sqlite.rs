use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;
use tokio_rusqlite::Connection;
use tracing::debug;

use ragstore_core::embed::cosine_similarity;
use ragstore_core::traits::{NativeLexical, VectorBackend};
use ragstore_core::types::{
    metadata_document_id, Capabilities, DeleteSelector, Filter, LexicalResult, Metadata, Provider,
    SimilarityResult, VectorRecord,
};

/// SQLite file with a row table for vectors and an FTS5 table for keywords.
///
/// Similarity is a brute-force cosine scan; full-text search uses FTS5
/// `bm25()` with the porter tokenizer.
pub struct SqliteBackend {
    path: PathBuf,
    table: String,
    conn: Mutex<Option<Connection>>,
}

/// Identifier safe to splice into SQL.
pub fn sanitize_table(name: &str) -> String {
    let mut out: String = name.chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' }).collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, 't');
    }
    out
}

fn encode_vector(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
}

/// Quote every word and OR them, so user input never parses as FTS5 syntax.
fn escape_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|w| w.replace('"', ""))
        .filter(|w| !w.is_empty())
        .map(|w| format!("\"{w}\""))
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn parse_metadata(raw: &str) -> Metadata {
    serde_json::from_str(raw).unwrap_or_default()
}

impl SqliteBackend {
    pub fn new(path: impl Into<PathBuf>, table: &str) -> Self {
        Self { path: path.into(), table: sanitize_table(table), conn: Mutex::new(None) }
    }

    async fn conn(&self) -> Result<Connection> {
        let existing = self.conn.lock().clone();
        if let Some(c) = existing {
            return Ok(c);
        }
        if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        let conn = Connection::open(&self.path)
            .await
            .with_context(|| format!("opening sqlite database {}", self.path.display()))?;
        debug!(path = %self.path.display(), "sqlite connection opened");
        let mut slot = self.conn.lock();
        Ok(slot.get_or_insert(conn).clone())
    }
}

#[async_trait]
impl VectorBackend for SqliteBackend {
    fn provider(&self) -> Provider {
        Provider::Sqlite
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { native_lexical: true, auto_persist: true, ..Capabilities::default() }
    }

    fn table_name(&self) -> &str {
        &self.table
    }

    fn persist_location(&self) -> String {
        self.path.display().to_string()
    }

    async fn exists(&self) -> Result<bool> {
        let table = self.table.clone();
        let found = self
            .conn()
            .await?
            .call(move |conn| {
                let n: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    rusqlite::params![table],
                    |row| row.get(0),
                )?;
                Ok(n > 0)
            })
            .await?;
        Ok(found)
    }

    async fn create(&self, _dimension: usize) -> Result<()> {
        let t = self.table.clone();
        self.conn()
            .await?
            .call(move |conn| {
                conn.execute_batch(&format!(
                    r#"
                    CREATE TABLE IF NOT EXISTS "{t}" (
                        id TEXT PRIMARY KEY,
                        content TEXT NOT NULL,
                        metadata TEXT NOT NULL,
                        document_id TEXT,
                        vector BLOB NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS "{t}_document_id" ON "{t}"(document_id);
                    CREATE VIRTUAL TABLE IF NOT EXISTS "{t}_fts" USING fts5(
                        id UNINDEXED,
                        content,
                        tokenize='porter unicode61'
                    );
                    "#
                ))?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn load(&self) -> Result<()> {
        // tables are created idempotently, so loading is the same statement set
        self.create(0).await
    }

    async fn insert(&self, records: &[VectorRecord]) -> Result<()> {
        let t = self.table.clone();
        let rows: Vec<(String, String, String, Option<String>, Vec<u8>)> = records
            .iter()
            .map(|r| {
                Ok((
                    r.id.clone(),
                    r.content.clone(),
                    serde_json::to_string(&r.metadata)?,
                    metadata_document_id(&r.metadata),
                    encode_vector(&r.vector),
                ))
            })
            .collect::<Result<_>>()?;
        self.conn()
            .await?
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut upsert = tx.prepare(&format!(
                        r#"INSERT OR REPLACE INTO "{t}" (id, content, metadata, document_id, vector) VALUES (?1, ?2, ?3, ?4, ?5)"#
                    ))?;
                    let mut unindex = tx.prepare(&format!(r#"DELETE FROM "{t}_fts" WHERE id = ?1"#))?;
                    let mut index = tx.prepare(&format!(r#"INSERT INTO "{t}_fts" (id, content) VALUES (?1, ?2)"#))?;
                    for (id, content, metadata, document_id, vector) in &rows {
                        upsert.execute(rusqlite::params![id, content, metadata, document_id, vector])?;
                        unindex.execute(rusqlite::params![id])?;
                        index.execute(rusqlite::params![id, content])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize, _filter: Option<&Filter>) -> Result<Vec<SimilarityResult>> {
        let t = self.table.clone();
        let rows = self
            .conn()
            .await?
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(r#"SELECT id, content, metadata, vector FROM "{t}""#))?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, Vec<u8>>(3)?,
                        ))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        let mut hits: Vec<SimilarityResult> = rows
            .into_iter()
            .map(|(id, content, metadata, blob)| SimilarityResult {
                id: Some(id),
                content,
                metadata: parse_metadata(&metadata),
                score: cosine_similarity(vector, &decode_vector(&blob)),
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete(&self, selector: &DeleteSelector) -> Result<usize> {
        let t = self.table.clone();
        let selector = selector.clone();
        let removed = self
            .conn()
            .await?
            .call(move |conn| {
                let tx = conn.transaction()?;
                let ids: Vec<String> = match &selector {
                    DeleteSelector::Ids(ids) => ids.clone(),
                    DeleteSelector::Document(doc) => {
                        let mut stmt = tx.prepare(&format!(r#"SELECT id FROM "{t}" WHERE document_id = ?1"#))?;
                        let ids = stmt
                            .query_map(rusqlite::params![doc], |row| row.get::<_, String>(0))?
                            .collect::<std::result::Result<Vec<_>, _>>()?;
                        ids
                    }
                };
                let mut removed = 0;
                {
                    let mut rows = tx.prepare(&format!(r#"DELETE FROM "{t}" WHERE id = ?1"#))?;
                    let mut fts = tx.prepare(&format!(r#"DELETE FROM "{t}_fts" WHERE id = ?1"#))?;
                    for id in &ids {
                        removed += rows.execute(rusqlite::params![id])?;
                        fts.execute(rusqlite::params![id])?;
                    }
                }
                tx.commit()?;
                Ok(removed)
            })
            .await?;
        Ok(removed)
    }

    async fn count(&self) -> Result<Option<u64>> {
        let t = self.table.clone();
        let n = self
            .conn()
            .await?
            .call(move |conn| {
                let n: i64 = conn.query_row(&format!(r#"SELECT COUNT(*) FROM "{t}""#), [], |row| row.get(0))?;
                Ok(n)
            })
            .await?;
        Ok(Some(u64::try_from(n).unwrap_or(0)))
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.conn()
            .await?
            .call(|conn| Ok(conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?))
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let conn = self.conn.lock().take();
        if let Some(conn) = conn {
            conn.close().await?;
            debug!(path = %self.path.display(), "sqlite connection closed");
        }
        Ok(())
    }

    fn as_native_lexical(&self) -> Option<&dyn NativeLexical> {
        Some(self)
    }
}

#[async_trait]
impl NativeLexical for SqliteBackend {
    async fn full_text_search(&self, query: &str, top_k: usize, _filter: Option<&Filter>) -> Result<Vec<LexicalResult>> {
        let escaped = escape_fts_query(query);
        if escaped.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let t = self.table.clone();
        let limit = i64::try_from(top_k).unwrap_or(i64::MAX);
        let rows = self
            .conn()
            .await?
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    r#"
                    SELECT "{t}".id, "{t}".content, "{t}".metadata, bm25("{t}_fts") AS rank
                    FROM "{t}_fts"
                    JOIN "{t}" ON "{t}".id = "{t}_fts".id
                    WHERE "{t}_fts" MATCH ?1
                    ORDER BY rank
                    LIMIT ?2
                    "#
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![escaped, limit], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, f64>(3)?,
                        ))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        // bm25() is lower-is-better
        Ok(rows
            .into_iter()
            .map(|(id, content, metadata, rank)| LexicalResult {
                id: Some(id),
                content,
                metadata: parse_metadata(&metadata),
                score: -rank as f32,
            })
            .collect())
    }
}
