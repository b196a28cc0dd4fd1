//! SQLite-backed [`Store`] implementation.
//!
//! Pages, chunks, vectors and issues live in the tables created by
//! [`crate::migrate`]. Vector search is brute-force cosine distance over the
//! page's `chunk_vectors` rows; pages are small enough that this beats
//! maintaining an ANN index.

use std::collections::HashMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use a11y_harness_core::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use a11y_harness_core::models::{url_domain, Page};
use a11y_harness_core::store::{ChunkHit, IssueRecord, PageRecord, Store};

use crate::config::Config;
use crate::db;
use crate::migrate;

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database and make sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

fn page_from_row(row: &SqliteRow) -> Result<PageRecord> {
    let status: String = row.get("status");
    Ok(PageRecord {
        id: row.get("id"),
        url: row.get("url"),
        domain: row.get("domain"),
        status: status.parse()?,
        fixed_html: row.get("fixed_html"),
        summary: row.get("summary"),
        error: row.get("error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn hit_from_row(row: &SqliteRow, distance: Option<f64>) -> Result<ChunkHit> {
    let role: String = row.get("role");
    Ok(ChunkHit {
        chunk_id: row.get("id"),
        path: row.get("path"),
        role: role.parse()?,
        text: row.get("text"),
        distance,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_page(&self, url: Option<&str>) -> Result<String> {
        let now = now_ts();
        let domain = url.and_then(url_domain);

        if let Some(url) = url {
            let existing: Option<String> = sqlx::query_scalar("SELECT id FROM pages WHERE url = ?")
                .bind(url)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(id) = existing {
                return Ok(id);
            }
        }

        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO pages (id, url, domain, status, created_at, updated_at)
            VALUES (?, ?, ?, 'NEW', ?, ?)
            ON CONFLICT(url) DO NOTHING
            "#,
        )
        .bind(&id)
        .bind(url)
        .bind(&domain)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        // A concurrent run may have inserted the same URL first.
        match url {
            Some(url) => Ok(sqlx::query_scalar::<_, String>("SELECT id FROM pages WHERE url = ?")
                .bind(url)
                .fetch_one(&self.pool)
                .await?),
            None => Ok(id),
        }
    }

    async fn save_pass(&self, page: &Page, embedding_model: &str) -> Result<()> {
        let now = now_ts();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE pages
            SET domain = ?, raw_html = ?, fixed_html = ?, status = ?, summary = ?,
                error = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&page.domain)
        .bind(&page.raw_html)
        .bind(&page.fixed_html)
        .bind(page.status.as_str())
        .bind(&page.summary)
        .bind(now)
        .bind(&page.id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            bail!("page not found: {}", page.id);
        }

        sqlx::query("DELETE FROM chunk_vectors WHERE page_id = ?")
            .bind(&page.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM issues WHERE page_id = ?")
            .bind(&page.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE page_id = ?")
            .bind(&page.id)
            .execute(&mut *tx)
            .await?;

        let mut chunk_ids = Vec::with_capacity(page.chunks.len());
        for chunk in &page.chunks {
            let chunk_id = Uuid::new_v4().to_string();
            let attrs = serde_json::to_string(&chunk.attributes)?;
            sqlx::query(
                r#"
                INSERT INTO chunks (id, page_id, path, role, text, attrs, hash)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk_id)
            .bind(&page.id)
            .bind(&chunk.path)
            .bind(chunk.role.as_str())
            .bind(&chunk.text)
            .bind(&attrs)
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await?;

            if let Some(vector) = &chunk.embedding {
                sqlx::query(
                    r#"
                    INSERT INTO chunk_vectors (chunk_id, page_id, model, dims, embedding, created_at)
                    VALUES (?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&chunk_id)
                .bind(&page.id)
                .bind(embedding_model)
                .bind(vector.len() as i64)
                .bind(vec_to_blob(vector))
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
            chunk_ids.push(chunk_id);
        }

        for issue in &page.issues {
            sqlx::query(
                r#"
                INSERT INTO issues (id, page_id, chunk_id, type, severity, details, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&page.id)
            .bind(chunk_ids.get(issue.chunk.index).cloned())
            .bind(issue.issue_type.as_str())
            .bind(issue.severity.as_str())
            .bind(issue.details.to_string())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn mark_failed(&self, page_id: &str, error: &str) -> Result<()> {
        let updated =
            sqlx::query("UPDATE pages SET status = 'FAILED', error = ?, updated_at = ? WHERE id = ?")
                .bind(error)
                .bind(now_ts())
                .bind(page_id)
                .execute(&self.pool)
                .await?;
        if updated.rows_affected() == 0 {
            bail!("page not found: {}", page_id);
        }
        Ok(())
    }

    async fn get_page(&self, page_id: &str) -> Result<Option<PageRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, url, domain, status, fixed_html, summary, error, created_at, updated_at
            FROM pages WHERE id = ?
            "#,
        )
        .bind(page_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(page_from_row).transpose()
    }

    async fn list_issues(&self, page_id: &str) -> Result<Vec<IssueRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT i.id, i.page_id, i.chunk_id, c.path AS chunk_path, i.type, i.severity,
                   i.details, i.created_at
            FROM issues i
            LEFT JOIN chunks c ON c.id = i.chunk_id
            WHERE i.page_id = ?
            ORDER BY i.rowid ASC
            "#,
        )
        .bind(page_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let issue_type: String = row.get("type");
                let severity: String = row.get("severity");
                let details: String = row.get("details");
                Ok(IssueRecord {
                    id: row.get("id"),
                    page_id: row.get("page_id"),
                    chunk_id: row.get("chunk_id"),
                    chunk_path: row.get("chunk_path"),
                    issue_type: issue_type.parse()?,
                    severity: severity.parse()?,
                    details: serde_json::from_str(&details).unwrap_or(serde_json::json!({})),
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }

    async fn vector_search(
        &self,
        page_id: &str,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<ChunkHit>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.path, c.role, c.text, cv.embedding
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            WHERE cv.page_id = ?
            "#,
        )
        .bind(page_id)
        .fetch_all(&self.pool)
        .await?;

        let mut hits = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let distance = cosine_distance(query, &blob_to_vec(&blob));
                hit_from_row(row, Some(distance))
            })
            .collect::<Result<Vec<_>>>()?;

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);

        Ok(hits)
    }

    async fn recent_embedded(&self, page_id: &str, limit: usize) -> Result<Vec<ChunkHit>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.path, c.role, c.text
            FROM chunks c
            JOIN chunk_vectors cv ON cv.chunk_id = c.id
            WHERE c.page_id = ?
            ORDER BY c.seq DESC
            LIMIT ?
            "#,
        )
        .bind(page_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| hit_from_row(row, None)).collect()
    }

    async fn stored_embeddings(
        &self,
        page_id: &str,
        model: &str,
    ) -> Result<HashMap<String, Vec<f32>>> {
        let rows = sqlx::query(
            r#"
            SELECT c.hash, cv.embedding
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            WHERE cv.page_id = ? AND cv.model = ?
            "#,
        )
        .bind(page_id)
        .bind(model)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let hash: String = row.get("hash");
                let blob: Vec<u8> = row.get("embedding");
                (hash, blob_to_vec(&blob))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use a11y_harness_core::extract::content_hash;
    use a11y_harness_core::models::{Chunk, ChunkRole, Issue, IssueType, PageStatus};
    use std::collections::BTreeMap;

    async fn temp_store(dir: &tempfile::TempDir) -> SqliteStore {
        let toml_str = format!(
            "[db]\npath = \"{}\"\n",
            dir.path().join("data/a11y.sqlite").display()
        );
        let config: Config = toml::from_str(&toml_str).unwrap();
        SqliteStore::open(&config).await.unwrap()
    }

    fn chunk(role: ChunkRole, path: &str, text: &str, embedding: Option<Vec<f32>>) -> Chunk {
        Chunk {
            role,
            path: path.to_string(),
            text: text.to_string(),
            attributes: BTreeMap::new(),
            hash: content_hash(text),
            embedding,
        }
    }

    async fn seeded(store: &SqliteStore, url: &str) -> String {
        let id = store.upsert_page(Some(url)).await.unwrap();
        let mut page = Page::new(id.clone(), Some(url.to_string()), "<p>raw</p>");
        let chunks = vec![
            chunk(ChunkRole::Document, "html", "", None),
            chunk(ChunkRole::Section, "html>body>p:nth-of-type(1)", "alpha", Some(vec![1.0, 0.0])),
            chunk(ChunkRole::Section, "html>body>p:nth-of-type(2)", "beta", Some(vec![0.0, 1.0])),
            chunk(ChunkRole::Heading, "html>body>h1", "title", None),
        ];
        let issues = vec![
            Issue::new(IssueType::MissingLang, serde_json::json!({"reason": "x"}), 0, &chunks[0]),
            Issue::new(IssueType::MissingMain, serde_json::json!({}), 0, &chunks[0]),
        ];
        page.record_audit(chunks, issues);
        page.record_fix("<html lang=\"en\"><body><main></main></body></html>".into());
        page.summary = Some("- a page".into());
        store.save_pass(&page, "fake-model").await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_upsert_page_by_url() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;
        let a = store.upsert_page(Some("https://www.example.org/a")).await.unwrap();
        let b = store.upsert_page(Some("https://www.example.org/a")).await.unwrap();
        let c = store.upsert_page(None).await.unwrap();
        let d = store.upsert_page(None).await.unwrap();
        assert_eq!(a, b);
        assert_ne!(c, d);

        let page = store.get_page(&a).await.unwrap().unwrap();
        assert_eq!(page.status, PageStatus::New);
        assert_eq!(page.domain.as_deref(), Some("www.example.org"));
    }

    #[tokio::test]
    async fn test_save_pass_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;
        let id = seeded(&store, "https://example.org/").await;

        let page = store.get_page(&id).await.unwrap().unwrap();
        assert_eq!(page.status, PageStatus::Fixed);
        assert!(page.fixed_html.unwrap().contains("<main>"));
        assert_eq!(page.summary.as_deref(), Some("- a page"));

        let issues = store.list_issues(&id).await.unwrap();
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].issue_type, IssueType::MissingLang);
        assert_eq!(issues[0].details["reason"], "x");
        assert_eq!(issues[0].chunk_path.as_deref(), Some("html"));
    }

    #[tokio::test]
    async fn test_rerun_replaces_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;
        let id = seeded(&store, "https://example.org/").await;
        let again = seeded(&store, "https://example.org/").await;
        assert_eq!(id, again);
        assert_eq!(store.list_issues(&id).await.unwrap().len(), 2);
        assert_eq!(store.recent_embedded(&id, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_vector_search_and_recent() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;
        let id = seeded(&store, "https://example.org/").await;

        let hits = store.vector_search(&id, &[0.1, 1.0], 8).await.unwrap();
        let texts: Vec<&str> = hits.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(texts, vec!["beta", "alpha"]);
        assert!(hits[0].distance <= hits[1].distance);

        let recent = store.recent_embedded(&id, 1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].text, "beta");
        assert!(recent[0].distance.is_none());
    }

    #[tokio::test]
    async fn test_stored_embeddings_keyed_by_hash() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;
        let id = seeded(&store, "https://example.org/").await;

        let stored = store.stored_embeddings(&id, "fake-model").await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored.get(&content_hash("alpha")), Some(&vec![1.0, 0.0]));
        assert!(store
            .stored_embeddings(&id, "other-model")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_mark_failed_keeps_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;
        let id = seeded(&store, "https://example.org/").await;
        store.mark_failed(&id, "fetch failed: 503").await.unwrap();

        let page = store.get_page(&id).await.unwrap().unwrap();
        assert_eq!(page.status, PageStatus::Failed);
        assert_eq!(page.error.as_deref(), Some("fetch failed: 503"));
        assert!(page.fixed_html.is_some());
        assert_eq!(store.list_issues(&id).await.unwrap().len(), 2);

        assert!(store.mark_failed("missing", "x").await.is_err());
        assert!(store.get_page("missing").await.unwrap().is_none());
    }
}
