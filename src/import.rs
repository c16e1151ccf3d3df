//! JSONL document import into the SQLite index.
//!
//! One document per line:
//!
//! ```json
//! {"id": "KB-0042", "pool": "KB", "title": "...", "body": "...", "category": "Accounting", "metadata": {}}
//! ```
//!
//! Documents whose SHA-256 content hash matches the stored one are
//! skipped. When embeddings are enabled, `title + "\n" + body` is embedded
//! in batches of `[embedding].batch_size`; a failed batch is reported and
//! not written, so the next import retries it.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::Path;

use research_harness_core::embedding::EmbeddingProvider;
use research_harness_core::models::Document;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::migrate;
use crate::sqlite_index::SqliteIndex;

/// Counters reported by an import run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportStats {
    pub read: usize,
    pub imported: usize,
    pub unchanged: usize,
    pub malformed: usize,
    pub failed: usize,
}

/// Parse JSONL, skipping blank lines. Malformed lines are logged with
/// their 1-based line number and counted.
pub fn parse_documents(content: &str) -> (Vec<Document>, usize) {
    let mut docs = Vec::new();
    let mut malformed = 0;
    for (i, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Document>(line) {
            Ok(doc) if !doc.id.trim().is_empty() => docs.push(doc),
            Ok(_) => {
                tracing::warn!(line = i + 1, "document has an empty id; skipped");
                malformed += 1;
            }
            Err(e) => {
                tracing::warn!(line = i + 1, error = %e, "malformed document line; skipped");
                malformed += 1;
            }
        }
    }
    (docs, malformed)
}

/// Hex SHA-256 over every stored field of `doc`.
pub fn content_hash(doc: &Document) -> String {
    let mut hasher = Sha256::new();
    hasher.update(doc.pool.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(doc.title.as_bytes());
    hasher.update([0]);
    hasher.update(doc.body.as_bytes());
    hasher.update([0]);
    hasher.update(doc.category.as_deref().unwrap_or("").as_bytes());
    hasher.update([0]);
    hasher.update(serde_json::Value::Object(doc.metadata.clone()).to_string().as_bytes());
    hex::encode(hasher.finalize())
}

fn embed_text(doc: &Document) -> String {
    format!("{}\n{}", doc.title, doc.body)
}

/// Write changed documents, embedding them first when `embedder` is given.
pub async fn import_documents(
    index: &SqliteIndex,
    embedder: Option<&dyn EmbeddingProvider>,
    docs: Vec<Document>,
    batch_size: usize,
) -> Result<ImportStats> {
    let mut stats = ImportStats {
        read: docs.len(),
        ..ImportStats::default()
    };

    let mut changed: Vec<(Document, String)> = Vec::new();
    for doc in docs {
        let hash = content_hash(&doc);
        if index.content_hash(&doc.id).await?.as_deref() == Some(hash.as_str()) {
            stats.unchanged += 1;
        } else {
            changed.push((doc, hash));
        }
    }

    for batch in changed.chunks(batch_size.max(1)) {
        let vectors: Option<Vec<Vec<f32>>> = match embedder {
            Some(provider) => {
                let texts: Vec<String> = batch.iter().map(|(doc, _)| embed_text(doc)).collect();
                match provider.embed_batch(&texts).await {
                    Ok(v) if v.len() == texts.len() => Some(v),
                    Ok(v) => {
                        eprintln!(
                            "Warning: embedding batch returned {} vectors for {} documents",
                            v.len(),
                            texts.len()
                        );
                        stats.failed += batch.len();
                        continue;
                    }
                    Err(e) => {
                        eprintln!("Warning: embedding batch failed: {:#}", e);
                        stats.failed += batch.len();
                        continue;
                    }
                }
            }
            None => None,
        };

        let model = embedder.map(|p| p.model_name());
        for (i, (doc, hash)) in batch.iter().enumerate() {
            let vector = vectors.as_ref().map(|v| v[i].as_slice());
            index
                .upsert(doc, vector, model, hash)
                .await
                .with_context(|| format!("Failed to store document {}", doc.id))?;
            stats.imported += 1;
        }
    }

    Ok(stats)
}

/// `rh import <path>`: parse, embed and store, then print a summary.
pub async fn run_import(config: &Config, path: &Path) -> Result<ImportStats> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read documents: {}", path.display()))?;
    let (docs, malformed) = parse_documents(&content);

    let index = SqliteIndex::open(config).await?;
    migrate::apply(index.pool()).await?;

    let provider = if config.embedding.is_enabled() {
        Some(create_provider(&config.embedding)?)
    } else {
        eprintln!("Warning: embeddings disabled; documents are stored without vectors and only lexical search will find them");
        None
    };

    let mut stats = import_documents(
        &index,
        provider.as_deref(),
        docs,
        config.embedding.batch_size,
    )
    .await?;
    stats.malformed = malformed;
    stats.read += malformed;

    println!("import {}", path.display());
    println!("  lines read: {}", stats.read);
    println!("  imported: {}", stats.imported);
    println!("  unchanged: {}", stats.unchanged);
    println!("  malformed: {}", stats.malformed);
    if stats.failed > 0 {
        println!("  embedding failed: {}", stats.failed);
    }
    for (pool, count) in index.counts().await? {
        println!("  {}: {} documents", pool, count);
    }
    println!("ok");

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use anyhow::bail;
    use async_trait::async_trait;
    use research_harness_core::models::Pool;
    use research_harness_core::store::DocumentIndex;
    use tempfile::TempDir;

    const JSONL: &str = r#"{"id": "KB-1", "pool": "KB", "title": "Voucher sync", "body": "Resync the voucher"}

{"id": "SCRIPT-1", "pool": "SCRIPT", "title": "Fix voucher", "body": "UPDATE v SET s = <STATUS>"}
not json
{"id": "X-1", "pool": "WIKI", "title": "t", "body": "b"}
{"id": " ", "pool": "KB", "title": "t", "body": "b"}
"#;

    struct Unit;

    #[async_trait]
    impl EmbeddingProvider for Unit {
        fn model_name(&self) -> &str {
            "unit"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    struct Broken;

    #[async_trait]
    impl EmbeddingProvider for Broken {
        fn model_name(&self) -> &str {
            "broken"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            bail!("503 Service Unavailable")
        }
    }

    async fn index() -> (TempDir, SqliteIndex) {
        let tmp = TempDir::new().unwrap();
        let config = Config::with_db_path(tmp.path().join("rh.sqlite"));
        let pool = db::connect(&config).await.unwrap();
        migrate::apply(&pool).await.unwrap();
        (tmp, SqliteIndex::new(pool, 500))
    }

    #[test]
    fn test_parse_skips_blank_and_counts_malformed() {
        let (docs, malformed) = parse_documents(JSONL);
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["KB-1", "SCRIPT-1"]);
        assert_eq!(malformed, 3);
    }

    #[test]
    fn test_hash_tracks_content() {
        let (docs, _) = parse_documents(JSONL);
        let mut doc = docs[0].clone();
        let before = content_hash(&doc);
        assert_eq!(before, content_hash(&doc));
        assert_eq!(before.len(), 64);
        doc.body.push('!');
        assert_ne!(before, content_hash(&doc));
    }

    #[tokio::test]
    async fn test_reimport_skips_unchanged() {
        let (_tmp, index) = index().await;
        let (docs, _) = parse_documents(JSONL);

        let first = import_documents(&index, Some(&Unit), docs.clone(), 64).await.unwrap();
        assert_eq!(first.imported, 2);
        assert_eq!(first.unchanged, 0);

        let second = import_documents(&index, Some(&Unit), docs, 64).await.unwrap();
        assert_eq!(second.imported, 0);
        assert_eq!(second.unchanged, 2);

        let hits = index.semantic_query(Pool::Kb, &[1.0, 0.0], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source_id, "KB-1");
    }

    #[tokio::test]
    async fn test_failed_batch_is_not_written() {
        let (_tmp, index) = index().await;
        let (docs, _) = parse_documents(JSONL);
        let stats = import_documents(&index, Some(&Broken), docs.clone(), 1).await.unwrap();
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.imported, 0);

        // Nothing stored, so a retry imports everything.
        let retry = import_documents(&index, Some(&Unit), docs, 1).await.unwrap();
        assert_eq!(retry.imported, 2);
    }

    #[tokio::test]
    async fn test_import_without_embedder_is_lexical_only() {
        let (_tmp, index) = index().await;
        let (docs, _) = parse_documents(JSONL);
        import_documents(&index, None, docs, 64).await.unwrap();
        assert!(index.semantic_query(Pool::Kb, &[1.0, 0.0], 5).await.unwrap().is_empty());
        let lexical = index.lexical_query(Pool::Kb, "voucher", 5).await.unwrap();
        assert_eq!(lexical[0].source_id, "KB-1");
    }
}
