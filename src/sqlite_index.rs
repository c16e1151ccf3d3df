//! SQLite-backed [`DocumentIndex`].
//!
//! The read path serves the research pipeline: brute-force cosine
//! similarity over embedding BLOBs for semantic queries, and FTS5 `bm25`
//! for lexical queries. The write path ([`SqliteIndex::upsert`]) exists only
//! for `rh import`; the pipeline never calls it.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use research_harness_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use research_harness_core::models::{assign_ranks, Document, Pool, SearchHit};
use research_harness_core::store::{hit_from_document, DocumentIndex};

use crate::config::Config;
use crate::db;

/// SQLite implementation of [`DocumentIndex`].
pub struct SqliteIndex {
    pool: SqlitePool,
    preview_chars: usize,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool, preview_chars: usize) -> Self {
        Self {
            pool,
            preview_chars,
        }
    }

    /// Connect to `[db].path` using `[retrieval].preview_chars`.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        Ok(Self::new(pool, config.retrieval.preview_chars))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Stored content hash for `id`, if the document exists.
    pub async fn content_hash(&self, id: &str) -> Result<Option<String>> {
        let hash: Option<String> =
            sqlx::query_scalar("SELECT content_hash FROM documents WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(hash)
    }

    /// Insert or replace a document with its embedding and FTS row.
    pub async fn upsert(
        &self,
        doc: &Document,
        vector: Option<&[f32]>,
        embedding_model: Option<&str>,
        content_hash: &str,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let metadata_json = serde_json::to_string(&doc.metadata)?;
        let blob = vector.map(vec_to_blob);

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, pool, title, body, category, metadata_json,
                                   embedding, embedding_model, content_hash, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                pool = excluded.pool,
                title = excluded.title,
                body = excluded.body,
                category = excluded.category,
                metadata_json = excluded.metadata_json,
                embedding = excluded.embedding,
                embedding_model = excluded.embedding_model,
                content_hash = excluded.content_hash,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&doc.id)
        .bind(doc.pool.as_str())
        .bind(&doc.title)
        .bind(&doc.body)
        .bind(&doc.category)
        .bind(&metadata_json)
        .bind(&blob)
        .bind(embedding_model)
        .bind(content_hash)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM documents_fts WHERE document_id = ?")
            .bind(&doc.id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO documents_fts (document_id, pool, title, body) VALUES (?, ?, ?, ?)")
            .bind(&doc.id)
            .bind(doc.pool.as_str())
            .bind(&doc.title)
            .bind(&doc.body)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Document count per pool, in [`Pool::ALL`] order.
    pub async fn counts(&self) -> Result<Vec<(Pool, i64)>> {
        let mut counts = Vec::with_capacity(Pool::ALL.len());
        for pool in Pool::ALL {
            let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE pool = ?")
                .bind(pool.as_str())
                .fetch_one(&self.pool)
                .await?;
            counts.push((pool, n));
        }
        Ok(counts)
    }
}

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    let id: String = row.get("id");
    let pool_label: String = row.get("pool");
    let pool = Pool::parse(&pool_label)
        .ok_or_else(|| anyhow!("document {} has unknown pool {:?}", id, pool_label))?;
    let metadata_json: String = row.get("metadata_json");
    let metadata: Map<String, Value> = serde_json::from_str(&metadata_json)
        .with_context(|| format!("document {} has invalid metadata_json", id))?;

    Ok(Document {
        id,
        pool,
        title: row.get("title"),
        body: row.get("body"),
        category: row.get("category"),
        metadata,
    })
}

/// Build an FTS5 MATCH expression from free text.
///
/// Every alphanumeric term is quoted and the terms are OR-ed, so
/// punctuation in user questions can never produce an FTS syntax error.
/// Returns `None` when the text has no terms.
pub fn fts_query(text: &str) -> Option<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let term = term.to_lowercase();
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

#[async_trait]
impl DocumentIndex for SqliteIndex {
    async fn semantic_query(
        &self,
        pool: Pool,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let rows = sqlx::query(
            r#"
            SELECT id, pool, title, body, category, metadata_json, embedding
            FROM documents
            WHERE pool = ? AND embedding IS NOT NULL
            ORDER BY id
            "#,
        )
        .bind(pool.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let similarity = cosine_similarity(embedding, &blob_to_vec(&blob)) as f64;
            let doc = row_to_document(row)?;
            hits.push(hit_from_document(&doc, similarity, self.preview_chars));
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        assign_ranks(&mut hits);
        Ok(hits)
    }

    async fn lexical_query(&self, pool: Pool, text: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let Some(expr) = fts_query(text) else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(
            r#"
            SELECT d.id, d.pool, d.title, d.body, d.category, d.metadata_json,
                   bm25(documents_fts) AS rank
            FROM documents_fts
            JOIN documents d ON d.id = documents_fts.document_id
            WHERE documents_fts MATCH ? AND documents_fts.pool = ?
            ORDER BY rank, d.id
            LIMIT ?
            "#,
        )
        .bind(&expr)
        .bind(pool.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let rank: f64 = row.get("rank");
            let doc = row_to_document(row)?;
            // bm25 is lower-is-better; negate so higher = better
            hits.push(hit_from_document(&doc, -rank, self.preview_chars));
        }
        assign_ranks(&mut hits);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use serde_json::json;
    use tempfile::TempDir;

    fn doc(id: &str, pool: Pool, title: &str, body: &str, metadata: Value) -> Document {
        Document {
            id: id.into(),
            pool,
            title: title.into(),
            body: body.into(),
            category: Some("Accounting".into()),
            metadata: metadata.as_object().cloned().unwrap_or_default(),
        }
    }

    async fn seeded() -> (TempDir, SqliteIndex) {
        let tmp = TempDir::new().unwrap();
        let config = Config::with_db_path(tmp.path().join("rh.sqlite"));
        let pool = db::connect(&config).await.unwrap();
        migrate::apply(&pool).await.unwrap();
        let index = SqliteIndex::new(pool, 500);

        let docs = [
            (
                doc("KB-1", Pool::Kb, "Voucher sync guide", "How to resync a voucher", json!({})),
                vec![1.0, 0.0],
            ),
            (
                doc("KB-2", Pool::Kb, "Move-in checklist", "Configure the checklist", json!({})),
                vec![0.0, 1.0],
            ),
            (
                doc(
                    "SCRIPT-1",
                    Pool::Script,
                    "Fix voucher",
                    "UPDATE vouchers SET status = <STATUS> WHERE id = <VOUCHER_ID>",
                    json!({}),
                ),
                vec![1.0, 0.0],
            ),
            (
                doc(
                    "TR-1",
                    Pool::TicketResolution,
                    "Voucher stuck",
                    "Ran the voucher fix script",
                    json!({"module": "Compliance", "priority": "High"}),
                ),
                vec![0.8, 0.6],
            ),
        ];
        for (d, v) in &docs {
            index.upsert(d, Some(v), Some("test"), "h").await.unwrap();
        }
        (tmp, index)
    }

    #[test]
    fn test_fts_query_quotes_terms() {
        assert_eq!(
            fts_query("voucher's \"sync\" -- failing?").as_deref(),
            Some("\"voucher\" OR \"s\" OR \"sync\" OR \"failing\"")
        );
        assert_eq!(fts_query("  ?! "), None);
    }

    #[tokio::test]
    async fn test_semantic_query_filters_pool() {
        let (_tmp, index) = seeded().await;
        let hits = index.semantic_query(Pool::Kb, &[1.0, 0.0], 10).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.source_id.as_str()).collect();
        assert_eq!(ids, vec!["KB-1", "KB-2"]);
        assert_eq!(hits[0].rank, 1);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!(hits.iter().all(|h| h.pool == Pool::Kb));
    }

    #[tokio::test]
    async fn test_lexical_query_ranks_by_bm25() {
        let (_tmp, index) = seeded().await;
        let hits = index
            .lexical_query(Pool::Kb, "voucher sync?", 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source_id, "KB-1");
        assert!(hits[0].score > 0.0);
    }

    #[tokio::test]
    async fn test_lexical_query_punctuation_only() {
        let (_tmp, index) = seeded().await;
        assert!(index.lexical_query(Pool::Kb, "???", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pool_extras() {
        let (_tmp, index) = seeded().await;
        let scripts = index
            .semantic_query(Pool::Script, &[1.0, 0.0], 1)
            .await
            .unwrap();
        assert_eq!(scripts[0].placeholders, vec!["<STATUS>", "<VOUCHER_ID>"]);

        let tickets = index
            .lexical_query(Pool::TicketResolution, "voucher", 1)
            .await
            .unwrap();
        assert_eq!(tickets[0].extras["module"], "Compliance");
        assert_eq!(tickets[0].extras["priority"], "High");
        assert!(tickets[0].extras.get("root_cause").is_none());
    }

    #[tokio::test]
    async fn test_upsert_replaces_fts_row() {
        let (_tmp, index) = seeded().await;
        let updated = doc("KB-1", Pool::Kb, "Renamed article", "Nothing about that", json!({}));
        index.upsert(&updated, None, None, "h2").await.unwrap();

        assert!(index
            .lexical_query(Pool::Kb, "resync", 10)
            .await
            .unwrap()
            .is_empty());
        let hits = index.lexical_query(Pool::Kb, "renamed", 10).await.unwrap();
        assert_eq!(hits[0].source_id, "KB-1");
        assert_eq!(index.content_hash("KB-1").await.unwrap().as_deref(), Some("h2"));

        // No vector any more: excluded from semantic results.
        let sem = index.semantic_query(Pool::Kb, &[1.0, 0.0], 10).await.unwrap();
        assert_eq!(sem.len(), 1);
        assert_eq!(sem[0].source_id, "KB-2");
    }

    #[tokio::test]
    async fn test_counts() {
        let (_tmp, index) = seeded().await;
        let counts = index.counts().await.unwrap();
        assert_eq!(
            counts,
            vec![(Pool::Script, 1), (Pool::Kb, 2), (Pool::TicketResolution, 1)]
        );
    }
}
