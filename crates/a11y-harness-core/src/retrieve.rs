//! Retrieval strategies for page chat.
//!
//! A [`Retriever`] turns a question embedding into the chunks handed to the
//! chat model. The strategy is picked once from configuration
//! ([`RetrievalStrategy`]) and never switched per request.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::store::{ChunkHit, Store};

#[async_trait]
pub trait Retriever: Send + Sync {
    /// Up to `k` chunks of `page_id` relevant to `query`.
    async fn retrieve(&self, page_id: &str, query: Option<&[f32]>, k: usize)
        -> Result<Vec<ChunkHit>>;

    fn strategy(&self) -> RetrievalStrategy;
}

/// Ranks embedded chunks by cosine distance to the query, nearest first.
///
/// Without a query vector there is nothing to rank by, and the result is empty.
pub struct DistanceRetriever {
    store: Arc<dyn Store>,
}

impl DistanceRetriever {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Retriever for DistanceRetriever {
    async fn retrieve(
        &self,
        page_id: &str,
        query: Option<&[f32]>,
        k: usize,
    ) -> Result<Vec<ChunkHit>> {
        match query {
            Some(query) => self.store.vector_search(page_id, query, k).await,
            None => Ok(Vec::new()),
        }
    }

    fn strategy(&self) -> RetrievalStrategy {
        RetrievalStrategy::Distance
    }
}

/// Unranked fallback for backends without vector search: the `k` most
/// recently inserted embedded chunks. The query is ignored.
pub struct RecentRetriever {
    store: Arc<dyn Store>,
}

impl RecentRetriever {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Retriever for RecentRetriever {
    async fn retrieve(
        &self,
        page_id: &str,
        _query: Option<&[f32]>,
        k: usize,
    ) -> Result<Vec<ChunkHit>> {
        self.store.recent_embedded(page_id, k).await
    }

    fn strategy(&self) -> RetrievalStrategy {
        RetrievalStrategy::Recent
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalStrategy {
    #[default]
    Distance,
    Recent,
}

impl RetrievalStrategy {
    /// Strategy to use when no query vector is available. Ranking needs a
    /// query, so `distance` degrades to `recent`.
    pub fn without_query(self) -> RetrievalStrategy {
        match self {
            RetrievalStrategy::Distance | RetrievalStrategy::Recent => RetrievalStrategy::Recent,
        }
    }

    pub fn build(self, store: Arc<dyn Store>) -> Arc<dyn Retriever> {
        match self {
            RetrievalStrategy::Distance => Arc::new(DistanceRetriever::new(store)),
            RetrievalStrategy::Recent => Arc::new(RecentRetriever::new(store)),
        }
    }
}

impl fmt::Display for RetrievalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrievalStrategy::Distance => f.write_str("distance"),
            RetrievalStrategy::Recent => f.write_str("recent"),
        }
    }
}

impl FromStr for RetrievalStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "distance" => Ok(RetrievalStrategy::Distance),
            "recent" => Ok(RetrievalStrategy::Recent),
            other => bail!("unknown retrieval strategy: {}. Use distance or recent.", other),
        }
    }
}
