//! Storage abstraction for processed pages.
//!
//! The [`Store`] trait covers everything the pipeline and the chat responder
//! persist or read back: page rows, the chunk/issue/vector snapshot of the
//! latest successful run, and the two retrieval queries. Backends:
//!
//! - [`memory::InMemoryStore`] (this crate) for tests and embedding;
//! - `SqliteStore` in the `a11y-harness` app crate.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{ChunkRole, IssueType, Page, PageStatus, Severity};

/// A stored page row.
#[derive(Debug, Clone, Serialize)]
pub struct PageRecord {
    pub id: String,
    pub url: Option<String>,
    pub domain: Option<String>,
    pub status: PageStatus,
    pub fixed_html: Option<String>,
    pub summary: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A stored issue, joined with its chunk's path.
#[derive(Debug, Clone, Serialize)]
pub struct IssueRecord {
    pub id: String,
    pub page_id: String,
    pub chunk_id: Option<String>,
    pub chunk_path: Option<String>,
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub severity: Severity,
    pub details: serde_json::Value,
    pub created_at: i64,
}

/// A chunk returned by a retrieval query.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkHit {
    pub chunk_id: String,
    pub path: String,
    pub role: ChunkRole,
    pub text: String,
    /// Cosine distance to the query; `None` for unranked results.
    pub distance: Option<f64>,
}

/// Abstract storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_page`](Store::upsert_page) | Find the page for a URL or create a new one |
/// | [`save_pass`](Store::save_pass) | Atomically replace a page's run output |
/// | [`mark_failed`](Store::mark_failed) | Record a failed run |
/// | [`get_page`](Store::get_page) | Read a page row |
/// | [`list_issues`](Store::list_issues) | Issues of the latest run |
/// | [`vector_search`](Store::vector_search) | Nearest embedded chunks by cosine distance |
/// | [`recent_embedded`](Store::recent_embedded) | Most recently inserted embedded chunks |
/// | [`stored_embeddings`](Store::stored_embeddings) | Vectors of the latest run, by chunk hash |
#[async_trait]
pub trait Store: Send + Sync {
    /// Return the id of the page for `url`, creating it (status `NEW`) when
    /// it does not exist. `None` always creates a new page.
    async fn upsert_page(&self, url: Option<&str>) -> Result<String>;

    /// Persist a finished run: page fields, then chunks, vectors and issues
    /// replacing those of any previous run. All or nothing.
    async fn save_pass(&self, page: &Page, embedding_model: &str) -> Result<()>;

    /// Set status `FAILED` with an error message. Earlier run output is kept.
    async fn mark_failed(&self, page_id: &str, error: &str) -> Result<()>;

    async fn get_page(&self, page_id: &str) -> Result<Option<PageRecord>>;

    async fn list_issues(&self, page_id: &str) -> Result<Vec<IssueRecord>>;

    /// Embedded chunks of `page_id`, ascending by cosine distance to `query`.
    async fn vector_search(
        &self,
        page_id: &str,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<ChunkHit>>;

    /// The `limit` most recently inserted embedded chunks of `page_id`.
    async fn recent_embedded(&self, page_id: &str, limit: usize) -> Result<Vec<ChunkHit>>;

    /// Vectors saved by the latest run of `page_id` with `model`, keyed by
    /// chunk content hash.
    async fn stored_embeddings(
        &self,
        page_id: &str,
        model: &str,
    ) -> Result<HashMap<String, Vec<f32>>>;
}
