use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{blob_to_vec, cosine_similarity, vec_to_blob, DocFilter, IndexedDocument, VectorStore};
use crate::error::{StoreError, StoreResult};
use crate::store::SqliteStore;

/// Upper bound on candidate rows scanned per similarity query. Keeps the
/// in-process ranking pass bounded on large stores.
const MAX_SCAN_ROWS: i64 = 2_000;

#[async_trait]
impl VectorStore for SqliteStore {
    async fn upsert_document(&self, doc: &IndexedDocument) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, ticker, doc_type, content, source, embedding, indexed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                ticker = excluded.ticker,
                doc_type = excluded.doc_type,
                content = excluded.content,
                source = excluded.source,
                embedding = excluded.embedding,
                indexed_at = excluded.indexed_at
            WHERE excluded.indexed_at >= documents.indexed_at
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.ticker)
        .bind(doc.doc_type.to_string())
        .bind(&doc.content)
        .bind(&doc.source)
        .bind(vec_to_blob(&doc.embedding))
        .bind(doc.indexed_at.to_rfc3339())
        .execute(self.pool())
        .await?;

        Ok(())
    }

    async fn query_similar(
        &self,
        embedding: &[f32],
        filter: &DocFilter,
        top_k: usize,
    ) -> StoreResult<Vec<(IndexedDocument, f32)>> {
        // Metadata filtering happens in SQL; similarity ranking in-process.
        let mut sql = String::from(
            "SELECT id, ticker, doc_type, content, source, embedding, indexed_at \
             FROM documents WHERE 1=1",
        );
        if filter.ticker.is_some() {
            sql.push_str(" AND ticker = ?");
        }
        if filter.doc_type.is_some() {
            sql.push_str(" AND doc_type = ?");
        }
        if filter.since.is_some() {
            sql.push_str(" AND indexed_at >= ?");
        }
        sql.push_str(" ORDER BY indexed_at DESC LIMIT ?");

        let mut query = sqlx::query_as::<_, DocumentRow>(&sql);
        if let Some(ticker) = &filter.ticker {
            query = query.bind(ticker.clone());
        }
        if let Some(doc_type) = &filter.doc_type {
            query = query.bind(doc_type.to_string());
        }
        if let Some(since) = &filter.since {
            query = query.bind(since.to_rfc3339());
        }
        query = query.bind(MAX_SCAN_ROWS);

        let rows = query.fetch_all(self.pool()).await?;

        let mut scored: Vec<(IndexedDocument, f32)> = Vec::with_capacity(rows.len());
        for row in rows {
            let doc = IndexedDocument::try_from(row)?;
            let score = cosine_similarity(embedding, &doc.embedding);
            scored.push((doc, score));
        }

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        Ok(scored)
    }
}

#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: String,
    ticker: Option<String>,
    doc_type: String,
    content: String,
    source: String,
    embedding: Vec<u8>,
    indexed_at: String,
}

impl TryFrom<DocumentRow> for IndexedDocument {
    type Error = StoreError;

    fn try_from(row: DocumentRow) -> Result<Self, Self::Error> {
        let doc_type = row.doc_type.parse().map_err(|e| StoreError::Query {
            message: format!("Corrupt document row {}: {}", row.id, e),
        })?;
        let indexed_at = DateTime::parse_from_rfc3339(&row.indexed_at)
            .map_err(|e| StoreError::Query {
                message: format!("Corrupt timestamp for document {}: {}", row.id, e),
            })?
            .with_timezone(&Utc);

        Ok(IndexedDocument {
            id: row.id,
            ticker: row.ticker,
            doc_type,
            content: row.content,
            source: row.source,
            embedding: blob_to_vec(&row.embedding),
            indexed_at,
        })
    }
}
