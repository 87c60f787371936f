use anyhow::{anyhow, Result};
use arrow_array::types::Float32Type;
use arrow_array::{Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection, DistanceType, Table};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

use ragstore_core::traits::VectorBackend;
use ragstore_core::types::{
    metadata_document_id, Capabilities, DeleteSelector, Filter, Provider, SimilarityResult, VectorRecord,
};

pub fn build_schema(dim: i32) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("content", DataType::Utf8, false),
        Field::new("metadata", DataType::Utf8, false),
        Field::new("document_id", DataType::Utf8, true),
        Field::new(
            "vector",
            DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim),
            true,
        ),
    ]))
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn string_col<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow!("lancedb result is missing the {name} column"))
}

/// Embedded LanceDB table; every write is durable when it returns.
pub struct LanceDbBackend {
    uri: String,
    table: String,
    conn: OnceCell<Connection>,
}

impl LanceDbBackend {
    pub fn new(uri: impl Into<String>, table: impl Into<String>) -> Self {
        Self { uri: uri.into(), table: table.into(), conn: OnceCell::new() }
    }

    async fn conn(&self) -> Result<&Connection> {
        self.conn
            .get_or_try_init(|| async {
                if !self.uri.contains("://") {
                    std::fs::create_dir_all(&self.uri)?;
                }
                Ok::<_, anyhow::Error>(connect(&self.uri).execute().await?)
            })
            .await
    }

    async fn open(&self) -> Result<Table> {
        Ok(self.conn().await?.open_table(&self.table).execute().await?)
    }

    fn to_batch(records: &[VectorRecord]) -> Result<(Arc<Schema>, RecordBatch)> {
        let dim = records.first().map(|r| r.vector.len()).unwrap_or(0);
        if let Some(bad) = records.iter().find(|r| r.vector.len() != dim) {
            return Err(anyhow!("embedding dimension mismatch for {}: expected {dim}, got {}", bad.id, bad.vector.len()));
        }
        let schema = build_schema(i32::try_from(dim)?);
        let ids = StringArray::from(records.iter().map(|r| r.id.as_str()).collect::<Vec<_>>());
        let contents = StringArray::from(records.iter().map(|r| r.content.as_str()).collect::<Vec<_>>());
        let metadata = records
            .iter()
            .map(|r| serde_json::to_string(&r.metadata))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let metadata = StringArray::from(metadata);
        let document_ids = StringArray::from(records.iter().map(|r| metadata_document_id(&r.metadata)).collect::<Vec<_>>());
        let vectors = FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
            records.iter().map(|r| Some(r.vector.iter().copied().map(Some).collect::<Vec<_>>())),
            i32::try_from(dim)?,
        );
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(ids), Arc::new(contents), Arc::new(metadata), Arc::new(document_ids), Arc::new(vectors)],
        )?;
        Ok((schema, batch))
    }
}

#[async_trait]
impl VectorBackend for LanceDbBackend {
    fn provider(&self) -> Provider {
        Provider::LanceDb
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { auto_persist: true, ..Capabilities::default() }
    }

    fn table_name(&self) -> &str {
        &self.table
    }

    fn persist_location(&self) -> String {
        self.uri.clone()
    }

    async fn exists(&self) -> Result<bool> {
        let names = self.conn().await?.table_names().execute().await?;
        Ok(names.contains(&self.table))
    }

    async fn create(&self, dimension: usize) -> Result<()> {
        let conn = self.conn().await?;
        let names = conn.table_names().execute().await?;
        if names.contains(&self.table) {
            return Ok(());
        }
        let schema = build_schema(i32::try_from(dimension)?);
        // create empty table with 0 rows
        let iter = RecordBatchIterator::new(vec![].into_iter(), schema);
        conn.create_table(&self.table, Box::new(iter)).execute().await?;
        debug!(table = %self.table, dimension, "lancedb table created");
        Ok(())
    }

    async fn load(&self) -> Result<()> {
        self.open().await?;
        Ok(())
    }

    async fn insert(&self, records: &[VectorRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let table = self.open().await?;
        let (schema, batch) = Self::to_batch(records)?;
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
        // upsert keyed by id so re-adding a chunk replaces it
        let mut mi = table.merge_insert(&["id"]);
        mi.when_matched_update_all(None).when_not_matched_insert_all();
        mi.execute(reader).await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize, _filter: Option<&Filter>) -> Result<Vec<SimilarityResult>> {
        let table = self.open().await?;
        let mut stream = table
            .vector_search(vector.to_vec())?
            .distance_type(DistanceType::Cosine)
            .limit(top_k)
            .execute()
            .await?;
        let mut hits = Vec::new();
        while let Some(batch) = stream.try_next().await? {
            let ids = string_col(&batch, "id")?;
            let contents = string_col(&batch, "content")?;
            let metadata = string_col(&batch, "metadata")?;
            let distances = batch.column_by_name("_distance").and_then(|c| c.as_any().downcast_ref::<Float32Array>());
            for i in 0..batch.num_rows() {
                let score = match distances {
                    Some(d) if !d.is_null(i) => 1.0 - d.value(i),
                    _ => 0.0,
                };
                hits.push(SimilarityResult {
                    id: Some(ids.value(i).to_string()),
                    content: contents.value(i).to_string(),
                    metadata: serde_json::from_str(metadata.value(i)).unwrap_or_default(),
                    score,
                });
            }
        }
        Ok(hits)
    }

    async fn delete(&self, selector: &DeleteSelector) -> Result<usize> {
        let predicate = match selector {
            DeleteSelector::Ids(ids) if ids.is_empty() => return Ok(0),
            DeleteSelector::Ids(ids) => {
                format!("id IN ({})", ids.iter().map(|i| quote(i)).collect::<Vec<_>>().join(", "))
            }
            DeleteSelector::Document(doc) => format!("document_id = {}", quote(doc)),
        };
        let table = self.open().await?;
        let matching = table.count_rows(Some(predicate.clone())).await?;
        if matching > 0 {
            table.delete(&predicate).await?;
        }
        Ok(matching)
    }

    async fn count(&self) -> Result<Option<u64>> {
        Ok(Some(self.open().await?.count_rows(None).await? as u64))
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.conn().await?.table_names().execute().await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, doc: &str, vector: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.into(),
            content: format!("text {id}"),
            metadata: json!({"document_id": doc}).as_object().cloned().unwrap_or_default(),
            vector,
        }
    }

    #[tokio::test]
    async fn create_insert_query_delete() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let uri = tmp.path().join("lance").display().to_string();
        let db = LanceDbBackend::new(uri, "chunks");
        assert!(!db.exists().await.expect("exists"));
        db.create(3).await.expect("create");
        assert!(db.exists().await.expect("exists"));

        db.insert(&[
            record("a", "d1", vec![1.0, 0.0, 0.0]),
            record("b", "d1", vec![0.0, 1.0, 0.0]),
            record("c", "d2", vec![0.0, 0.0, 1.0]),
        ])
        .await
        .expect("insert");
        assert_eq!(db.count().await.expect("count"), Some(3));

        let hits = db.query(&[1.0, 0.0, 0.0], 2, None).await.expect("query");
        assert_eq!(hits[0].id.as_deref(), Some("a"));
        assert!(hits[0].score > hits[1].score);
        assert_eq!(hits[0].metadata.get("document_id"), Some(&json!("d1")));

        let removed = db.delete(&DeleteSelector::Document("d1".into())).await.expect("delete");
        assert_eq!(removed, 2);
        assert_eq!(db.count().await.expect("count"), Some(1));
    }
}
