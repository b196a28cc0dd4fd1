//! In-memory [`Store`] implementation for tests and embedding.
//!
//! All state sits behind one `std::sync::RwLock`, so `save_pass` is atomic.
//! Vector search is brute-force cosine distance over the page's vectors.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use uuid::Uuid;

use crate::embedding::cosine_distance;
use crate::models::{url_domain, ChunkRole, Page, PageStatus};

use super::{ChunkHit, IssueRecord, PageRecord, Store};

struct StoredChunk {
    seq: i64,
    id: String,
    page_id: String,
    path: String,
    role: ChunkRole,
    text: String,
    hash: String,
}

struct StoredVector {
    chunk_id: String,
    page_id: String,
    vector: Vec<f32>,
    model: String,
}

#[derive(Default)]
struct State {
    pages: HashMap<String, PageRecord>,
    chunks: Vec<StoredChunk>,
    vectors: Vec<StoredVector>,
    issues: Vec<IssueRecord>,
    next_seq: i64,
}

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

fn hit(chunk: &StoredChunk, distance: Option<f64>) -> ChunkHit {
    ChunkHit {
        chunk_id: chunk.id.clone(),
        path: chunk.path.clone(),
        role: chunk.role,
        text: chunk.text.clone(),
        distance,
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_page(&self, url: Option<&str>) -> Result<String> {
        let mut state = self.state.write().map_err(poisoned)?;
        if let Some(url) = url {
            if let Some(existing) = state.pages.values().find(|p| p.url.as_deref() == Some(url)) {
                return Ok(existing.id.clone());
            }
        }
        let id = Uuid::new_v4().to_string();
        let now = now_ts();
        state.pages.insert(
            id.clone(),
            PageRecord {
                id: id.clone(),
                url: url.map(str::to_string),
                domain: url.and_then(url_domain),
                status: PageStatus::New,
                fixed_html: None,
                summary: None,
                error: None,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn save_pass(&self, page: &Page, embedding_model: &str) -> Result<()> {
        let mut state = self.state.write().map_err(poisoned)?;
        let now = now_ts();

        let record = state
            .pages
            .get_mut(&page.id)
            .ok_or_else(|| anyhow!("page not found: {}", page.id))?;
        record.domain = page.domain.clone();
        record.status = page.status;
        record.fixed_html = page.fixed_html.clone();
        record.summary = page.summary.clone();
        record.error = None;
        record.updated_at = now;

        state.chunks.retain(|c| c.page_id != page.id);
        state.vectors.retain(|v| v.page_id != page.id);
        state.issues.retain(|i| i.page_id != page.id);

        let mut chunk_ids = Vec::with_capacity(page.chunks.len());
        for chunk in &page.chunks {
            let id = Uuid::new_v4().to_string();
            state.next_seq += 1;
            let seq = state.next_seq;
            state.chunks.push(StoredChunk {
                seq,
                id: id.clone(),
                page_id: page.id.clone(),
                path: chunk.path.clone(),
                role: chunk.role,
                text: chunk.text.clone(),
                hash: chunk.hash.clone(),
            });
            if let Some(vector) = &chunk.embedding {
                state.vectors.push(StoredVector {
                    chunk_id: id.clone(),
                    page_id: page.id.clone(),
                    vector: vector.clone(),
                    model: embedding_model.to_string(),
                });
            }
            chunk_ids.push(id);
        }

        for issue in &page.issues {
            state.issues.push(IssueRecord {
                id: Uuid::new_v4().to_string(),
                page_id: page.id.clone(),
                chunk_id: chunk_ids.get(issue.chunk.index).cloned(),
                chunk_path: Some(issue.chunk.path.clone()),
                issue_type: issue.issue_type,
                severity: issue.severity,
                details: issue.details.clone(),
                created_at: now,
            });
        }
        Ok(())
    }

    async fn mark_failed(&self, page_id: &str, error: &str) -> Result<()> {
        let mut state = self.state.write().map_err(poisoned)?;
        let record = state
            .pages
            .get_mut(page_id)
            .ok_or_else(|| anyhow!("page not found: {}", page_id))?;
        record.status = PageStatus::Failed;
        record.error = Some(error.to_string());
        record.updated_at = now_ts();
        Ok(())
    }

    async fn get_page(&self, page_id: &str) -> Result<Option<PageRecord>> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.pages.get(page_id).cloned())
    }

    async fn list_issues(&self, page_id: &str) -> Result<Vec<IssueRecord>> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state
            .issues
            .iter()
            .filter(|i| i.page_id == page_id)
            .cloned()
            .collect())
    }

    async fn vector_search(
        &self,
        page_id: &str,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<ChunkHit>> {
        let state = self.state.read().map_err(poisoned)?;
        let chunks: HashMap<&str, &StoredChunk> = state
            .chunks
            .iter()
            .filter(|c| c.page_id == page_id)
            .map(|c| (c.id.as_str(), c))
            .collect();

        let mut hits: Vec<ChunkHit> = state
            .vectors
            .iter()
            .filter(|v| v.page_id == page_id)
            .filter_map(|v| {
                let chunk = chunks.get(v.chunk_id.as_str())?;
                Some(hit(chunk, Some(cosine_distance(query, &v.vector))))
            })
            .collect();
        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn recent_embedded(&self, page_id: &str, limit: usize) -> Result<Vec<ChunkHit>> {
        let state = self.state.read().map_err(poisoned)?;
        let mut embedded: Vec<&StoredChunk> = state
            .chunks
            .iter()
            .filter(|c| c.page_id == page_id)
            .filter(|c| state.vectors.iter().any(|v| v.chunk_id == c.id))
            .collect();
        embedded.sort_by(|a, b| b.seq.cmp(&a.seq));
        Ok(embedded
            .into_iter()
            .take(limit)
            .map(|c| hit(c, None))
            .collect())
    }

    async fn stored_embeddings(
        &self,
        page_id: &str,
        model: &str,
    ) -> Result<HashMap<String, Vec<f32>>> {
        let state = self.state.read().map_err(poisoned)?;
        let hashes: HashMap<&str, &str> = state
            .chunks
            .iter()
            .filter(|c| c.page_id == page_id)
            .map(|c| (c.id.as_str(), c.hash.as_str()))
            .collect();
        Ok(state
            .vectors
            .iter()
            .filter(|v| v.page_id == page_id && v.model == model)
            .filter_map(|v| {
                let hash = hashes.get(v.chunk_id.as_str())?;
                Some((hash.to_string(), v.vector.clone()))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::content_hash;
    use crate::models::{Chunk, Issue, IssueType};
    use std::collections::BTreeMap;

    fn chunk(role: ChunkRole, text: &str, embedding: Option<Vec<f32>>) -> Chunk {
        Chunk {
            role,
            path: format!("html>body>p:nth-of-type({})", text.len()),
            text: text.to_string(),
            attributes: BTreeMap::new(),
            hash: content_hash(text),
            embedding,
        }
    }

    async fn seeded(store: &InMemoryStore) -> String {
        let id = store
            .upsert_page(Some("https://example.org/"))
            .await
            .unwrap();
        let mut page = Page::new(id.clone(), Some("https://example.org/".into()), "<p>x</p>");
        let chunks = vec![
            chunk(ChunkRole::Document, "", None),
            chunk(ChunkRole::Section, "alpha", Some(vec![1.0, 0.0])),
            chunk(ChunkRole::Section, "beta", Some(vec![0.0, 1.0])),
            chunk(ChunkRole::Section, "gamma", Some(vec![0.7, 0.7])),
            chunk(ChunkRole::Heading, "no vector", None),
        ];
        let issues = vec![Issue::new(
            IssueType::MissingLang,
            serde_json::json!({}),
            0,
            &chunks[0],
        )];
        page.record_audit(chunks, issues);
        page.record_fix("<html lang=\"en\"></html>".into());
        store.save_pass(&page, "fake").await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_upsert_reuses_url() {
        let store = InMemoryStore::new();
        let a = store.upsert_page(Some("https://e.org/x")).await.unwrap();
        let b = store.upsert_page(Some("https://e.org/x")).await.unwrap();
        let c = store.upsert_page(None).await.unwrap();
        let d = store.upsert_page(None).await.unwrap();
        assert_eq!(a, b);
        assert_ne!(c, d);
        let page = store.get_page(&a).await.unwrap().unwrap();
        assert_eq!(page.status, PageStatus::New);
        assert_eq!(page.domain.as_deref(), Some("e.org"));
    }

    #[tokio::test]
    async fn test_save_pass_and_issues() {
        let store = InMemoryStore::new();
        let id = seeded(&store).await;
        let page = store.get_page(&id).await.unwrap().unwrap();
        assert_eq!(page.status, PageStatus::Fixed);
        assert!(page.fixed_html.unwrap().contains("lang"));

        let issues = store.list_issues(&id).await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, IssueType::MissingLang);
        assert!(issues[0].chunk_id.is_some());
    }

    #[tokio::test]
    async fn test_vector_search_ascending() {
        let store = InMemoryStore::new();
        let id = seeded(&store).await;
        let hits = store.vector_search(&id, &[1.0, 0.1], 10).await.unwrap();
        let texts: Vec<&str> = hits.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(texts, vec!["alpha", "gamma", "beta"]);
        for pair in hits.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
        assert_eq!(store.vector_search(&id, &[1.0, 0.0], 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_recent_embedded() {
        let store = InMemoryStore::new();
        let id = seeded(&store).await;
        let hits = store.recent_embedded(&id, 2).await.unwrap();
        let texts: Vec<&str> = hits.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(texts, vec!["gamma", "beta"]);
        assert!(hits.iter().all(|h| h.distance.is_none()));
    }

    #[tokio::test]
    async fn test_rerun_replaces_snapshot_and_failure_keeps_it() {
        let store = InMemoryStore::new();
        let id = seeded(&store).await;
        seeded(&store).await;
        assert_eq!(store.list_issues(&id).await.unwrap().len(), 1);
        assert_eq!(store.recent_embedded(&id, 10).await.unwrap().len(), 3);

        store.mark_failed(&id, "timed out").await.unwrap();
        let page = store.get_page(&id).await.unwrap().unwrap();
        assert_eq!(page.status, PageStatus::Failed);
        assert_eq!(page.error.as_deref(), Some("timed out"));
        assert_eq!(store.list_issues(&id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stored_embeddings_by_hash_and_model() {
        let store = InMemoryStore::new();
        let id = seeded(&store).await;
        let stored = store.stored_embeddings(&id, "fake").await.unwrap();
        assert_eq!(stored.len(), 3);
        assert_eq!(stored.get(&content_hash("beta")), Some(&vec![0.0, 1.0]));
        assert!(!stored.contains_key(&content_hash("no vector")));
        assert!(store.stored_embeddings(&id, "other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_page() {
        let store = InMemoryStore::new();
        assert!(store.get_page("nope").await.unwrap().is_none());
        assert!(store.mark_failed("nope", "x").await.is_err());
        assert!(store.vector_search("nope", &[1.0], 5).await.unwrap().is_empty());
    }
}
