//! Embedding selection and indexing.
//!
//! Only a page's longest prose is worth embedding: [`select_for_embedding`]
//! picks section and heading chunks with enough text, longest first,
//! [`reuse_embeddings`] carries over vectors of unchanged chunks from the
//! previous run, and [`embed_selected`] sends the rest to the provider in
//! one batch.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::ai::AiClient;
use crate::models::{Chunk, ChunkRole};

/// Minimum trimmed text length (chars) for a chunk to be embedded.
pub const EMBED_MIN_CHARS: usize = 60;

/// Default per-text cap (chars) sent to the embedding model.
pub const DEFAULT_MAX_CHARS: usize = 2000;

/// Indices of the chunks to embed: sections and headings with at least
/// [`EMBED_MIN_CHARS`] of text, longest first (document order on ties),
/// at most `k`.
pub fn select_for_embedding(chunks: &[Chunk], k: usize) -> Vec<usize> {
    let mut candidates: Vec<(usize, usize)> = chunks
        .iter()
        .enumerate()
        .filter(|(_, c)| matches!(c.role, ChunkRole::Section | ChunkRole::Heading))
        .map(|(i, c)| (i, c.text.trim().chars().count()))
        .filter(|(_, len)| *len >= EMBED_MIN_CHARS)
        .collect();
    candidates.sort_by(|a, b| b.1.cmp(&a.1));
    candidates.into_iter().take(k).map(|(i, _)| i).collect()
}

/// Attach vectors from a previous run to selected chunks whose content hash
/// is unchanged. `previous` maps chunk hash to vector and must come from the
/// same embedding model; vectors of the wrong length are ignored.
///
/// Returns the selected indices that still need embedding.
pub fn reuse_embeddings(
    chunks: &mut [Chunk],
    selected: &[usize],
    previous: &HashMap<String, Vec<f32>>,
    dims: usize,
) -> Vec<usize> {
    let mut remaining = Vec::new();
    for &i in selected {
        let Some(chunk) = chunks.get_mut(i) else {
            continue;
        };
        match previous.get(&chunk.hash) {
            Some(vector) if vector.len() == dims => chunk.embedding = Some(vector.clone()),
            _ => remaining.push(i),
        }
    }
    if remaining.len() < selected.len() {
        debug!(
            reused = selected.len() - remaining.len(),
            "reusing embeddings of unchanged chunks"
        );
    }
    remaining
}

/// Embed the selected chunks with one batched request and store the vectors
/// on the chunks. Returns how many chunks received a vector.
///
/// A failed request, or a response with the wrong number of vectors or a
/// vector of the wrong length, leaves every selected chunk without an
/// embedding.
pub async fn embed_selected(
    ai: &dyn AiClient,
    chunks: &mut [Chunk],
    selected: &[usize],
    max_chars: usize,
) -> usize {
    let selected: Vec<usize> = selected
        .iter()
        .copied()
        .filter(|i| *i < chunks.len())
        .collect();
    for i in &selected {
        chunks[*i].embedding = None;
    }
    if selected.is_empty() {
        return 0;
    }
    if !ai.is_enabled() {
        debug!("embedding provider disabled, skipping {} chunks", selected.len());
        return 0;
    }

    let texts: Vec<String> = selected
        .iter()
        .map(|i| truncate_chars(chunks[*i].text.trim(), max_chars).to_string())
        .collect();

    let vectors = match ai.embed_batch(&texts).await {
        Ok(vectors) => vectors,
        Err(e) => {
            warn!(error = %e, count = texts.len(), "embedding batch failed");
            return 0;
        }
    };
    if vectors.len() != selected.len() {
        warn!(
            expected = selected.len(),
            got = vectors.len(),
            "embedding response size mismatch, discarding batch"
        );
        return 0;
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != ai.dims()) {
        warn!(
            expected = ai.dims(),
            got = bad.len(),
            "embedding dimension mismatch, discarding batch"
        );
        return 0;
    }

    for (i, vector) in selected.iter().zip(vectors) {
        chunks[*i].embedding = Some(vector);
    }
    selected.len()
}

/// Prefix of `s` with at most `max` chars.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
