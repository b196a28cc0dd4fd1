//! Page processing: fetch → extract → audit → fix → embed (→ summarize).
//!
//! One [`Pipeline::process`] call handles one page. Everything after the
//! fetch is computed in memory under `pipeline.timeout_secs` and persisted
//! with a single [`Store::save_pass`]; a fetch failure or timeout marks the
//! page `FAILED` and keeps whatever an earlier successful run stored.
//! Chunks whose content and embedding model are unchanged since the last
//! run keep their stored vector instead of being embedded again.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{info, warn};

use a11y_harness_core::ai::AiClient;
use a11y_harness_core::audit::audit;
use a11y_harness_core::chat::summarize_page;
use a11y_harness_core::dom::Document;
use a11y_harness_core::extract::extract;
use a11y_harness_core::index::{embed_selected, reuse_embeddings, select_for_embedding};
use a11y_harness_core::models::{IssueType, Page, PageStatus, ProcessMode};
use a11y_harness_core::remediate::{apply_fixes, FixOptions, FixReport};
use a11y_harness_core::store::Store;

use crate::ai::create_client;
use crate::config::{Config, PipelineConfig};
use crate::fetch::{validate_url, Fetcher};
use crate::sqlite_store::SqliteStore;

/// What to process.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    /// Fetched over HTTP(S); re-runs reuse the same page.
    Url(String),
    /// Raw markup; always a new page.
    Html(String),
}

impl Source {
    pub fn url(&self) -> Option<&str> {
        match self {
            Source::Url(url) => Some(url),
            Source::Html(_) => None,
        }
    }

    /// Short label for logs and CLI output.
    pub fn label(&self) -> String {
        match self {
            Source::Url(url) => url.clone(),
            Source::Html(html) => format!("<html: {} bytes>", html.len()),
        }
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    pub page_id: String,
    pub status: PageStatus,
    pub issues_found: usize,
    pub by_type: BTreeMap<IssueType, usize>,
    pub fixes_applied: usize,
    pub fixes_skipped: usize,
    pub embedded: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Processing entry point, shared by the CLI and the HTTP server.
#[derive(Clone)]
pub struct Pipeline {
    store: Arc<dyn Store>,
    ai: Arc<dyn AiClient>,
    fetcher: Fetcher,
    settings: PipelineConfig,
    embed_max_chars: usize,
}

impl Pipeline {
    pub fn new(config: &Config, store: Arc<dyn Store>, ai: Arc<dyn AiClient>) -> Result<Self> {
        Ok(Self {
            store,
            ai,
            fetcher: Fetcher::new(&config.pipeline)?,
            settings: config.pipeline.clone(),
            embed_max_chars: config.embedding.max_chars,
        })
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Process one page end to end.
    pub async fn process(&self, source: Source, mode: ProcessMode) -> Result<ProcessOutcome> {
        if let Source::Url(url) = &source {
            validate_url(url)?;
        }
        let page_id = self.store.upsert_page(source.url()).await?;
        info!(page_id = %page_id, source = %source.label(), ?mode, "processing page");

        let (url, html) = match source {
            Source::Url(url) => match self.fetcher.fetch(&url).await {
                Ok(html) => (Some(url), html),
                Err(e) => {
                    warn!(page_id = %page_id, error = %format!("{:#}", e), "fetch failed");
                    self.store
                        .mark_failed(&page_id, &format!("fetch failed: {:#}", e))
                        .await?;
                    return Err(e.context("fetch failed"));
                }
            },
            Source::Html(html) => (None, html),
        };

        let previous = self.previous_embeddings(&page_id).await;
        let mut page = Page::new(page_id.clone(), url, html);
        let deadline = Duration::from_secs(self.settings.timeout_secs);
        let run = self.run(&mut page, mode, &previous);
        let report = match tokio::time::timeout(deadline, run).await {
            Ok(report) => report,
            Err(_) => {
                let message = format!("timed out after {}s", self.settings.timeout_secs);
                warn!(page_id = %page_id, "{}", message);
                self.store.mark_failed(&page_id, &message).await?;
                return Err(anyhow!("processing {}", message));
            }
        };

        if let Err(e) = self.store.save_pass(&page, self.ai.embedding_model()).await {
            warn!(page_id = %page_id, error = %e, "saving run failed");
            self.store
                .mark_failed(&page_id, &format!("save failed: {:#}", e))
                .await?;
            return Err(e);
        }

        let outcome = ProcessOutcome {
            page_id,
            status: page.status,
            issues_found: page.issues.len(),
            by_type: page.issues_by_type(),
            fixes_applied: report.applied_total(),
            fixes_skipped: report.skipped.len(),
            embedded: page.chunks.iter().filter(|c| c.embedding.is_some()).count(),
            summary: page.summary.clone(),
        };
        info!(
            page_id = %outcome.page_id,
            issues = outcome.issues_found,
            fixes = outcome.fixes_applied,
            embedded = outcome.embedded,
            "page processed"
        );
        Ok(outcome)
    }

    /// Process several pages, at most `pipeline.max_concurrent_pages` at a
    /// time. Results come back in input order.
    pub async fn process_many(
        &self,
        sources: Vec<Source>,
        mode: ProcessMode,
    ) -> Vec<(String, Result<ProcessOutcome>)> {
        stream::iter(sources)
            .map(|source| async move {
                let label = source.label();
                (label, self.process(source, mode).await)
            })
            .buffered(self.settings.max_concurrent_pages.max(1))
            .collect()
            .await
    }

    /// Vectors stored by the page's last run with the current model.
    async fn previous_embeddings(&self, page_id: &str) -> HashMap<String, Vec<f32>> {
        if !self.ai.is_enabled() {
            return HashMap::new();
        }
        self.store
            .stored_embeddings(page_id, self.ai.embedding_model())
            .await
            .unwrap_or_else(|e| {
                warn!(page_id = %page_id, error = %e, "loading stored embeddings failed");
                HashMap::new()
            })
    }

    /// The in-memory part of a run. Never fails: every AI step has a fallback.
    async fn run(
        &self,
        page: &mut Page,
        mode: ProcessMode,
        previous: &HashMap<String, Vec<f32>>,
    ) -> FixReport {
        let mut doc = Document::parse(&page.raw_html);
        let chunks = extract(&doc);
        let issues = audit(&chunks);
        page.record_audit(chunks, issues);

        let ai = self.ai.is_enabled().then(|| &*self.ai);
        let options = FixOptions {
            ai,
            page_url: page.url.as_deref(),
            alt_text_concurrency: self.settings.alt_text_concurrency,
        };
        let report = apply_fixes(&mut doc, &page.chunks, &page.issues, &options).await;
        page.record_fix(doc.to_html());

        let selected = select_for_embedding(&page.chunks, mode.embed_top_k());
        let remaining = reuse_embeddings(&mut page.chunks, &selected, previous, self.ai.dims());
        embed_selected(
            &*self.ai,
            &mut page.chunks,
            &remaining,
            self.embed_max_chars,
        )
        .await;

        if self.settings.summarize {
            page.summary = summarize_page(&*self.ai, &page.chunks).await;
        }

        report
    }
}

/// CLI entry point for `a11y process`.
///
/// Prints one result block per page; fails when any page failed.
pub async fn run_process(
    config: &Config,
    urls: Vec<String>,
    html_file: Option<&Path>,
    mode: ProcessMode,
) -> Result<()> {
    let mut sources: Vec<Source> = urls.into_iter().map(Source::Url).collect();
    if let Some(path) = html_file {
        let html = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read HTML file: {}", path.display()))?;
        sources.push(Source::Html(html));
    }
    if sources.is_empty() {
        bail!("nothing to process: pass one or more URLs or --html-file");
    }

    let store = Arc::new(SqliteStore::open(config).await?);
    let ai = create_client(config)?;
    let pipeline = Pipeline::new(config, store.clone(), ai)?;

    let total = sources.len();
    let results = pipeline.process_many(sources, mode).await;
    store.close().await;

    let mut failed = 0;
    for (label, result) in results {
        match result {
            Ok(outcome) => {
                println!("Processed {}", label);
                println!("  page_id:       {}", outcome.page_id);
                println!("  issues_found:  {}", outcome.issues_found);
                for (issue_type, count) in &outcome.by_type {
                    println!("    {:<18} {}", issue_type.as_str(), count);
                }
                println!("  fixes_applied: {}", outcome.fixes_applied);
                if outcome.fixes_skipped > 0 {
                    println!("  fixes_skipped: {}", outcome.fixes_skipped);
                }
                println!("  embedded:      {}", outcome.embedded);
                if let Some(summary) = &outcome.summary {
                    println!("  summary:");
                    for line in summary.lines() {
                        println!("    {}", line);
                    }
                }
            }
            Err(e) => {
                failed += 1;
                eprintln!("Failed {}: {:#}", label, e);
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} pages failed", failed, total);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use a11y_harness_core::ai::CompletionRequest;
    use a11y_harness_core::store::memory::InMemoryStore;
    use async_trait::async_trait;
    use axum::response::Html;
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeAi {
        complete_delay: Option<Duration>,
        embedded_texts: AtomicUsize,
    }

    #[async_trait]
    impl AiClient for FakeAi {
        fn embedding_model(&self) -> &str {
            "fake"
        }

        fn dims(&self) -> usize {
            2
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.embedded_texts.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts.iter().map(|t| vec![1.0, t.len() as f32]).collect())
        }

        async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
            if let Some(delay) = self.complete_delay {
                tokio::time::sleep(delay).await;
            }
            Ok("A smiling dog".to_string())
        }
    }

    fn config(extra: &str) -> Config {
        toml::from_str(&format!("[db]\npath = \"unused.db\"\n{}", extra)).unwrap()
    }

    fn pipeline(extra: &str) -> Pipeline {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        Pipeline::new(&config(extra), store, Arc::new(FakeAi::default())).unwrap()
    }

    /// Serve `PAGE` at `/page` on an ephemeral port and return its URL.
    async fn serve_page() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/page", get(|| async { Html(PAGE) }));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/page", addr)
    }

    const PAGE: &str = r#"<html><head><title>Dogs</title></head><body>
        <h1>Dogs</h1><h3>Care</h3>
        <img src="dog.jpg">
        <p>Dogs need daily walks, fresh water, regular vet visits and a lot of patience from their owners.</p>
        <a href="/more">click here</a>
        </body></html>"#;

    #[tokio::test]
    async fn test_process_html_end_to_end() {
        let pipeline = pipeline("[pipeline]\nsummarize = true\n");
        let outcome = pipeline
            .process(Source::Html(PAGE.to_string()), ProcessMode::Fast)
            .await
            .unwrap();

        assert_eq!(outcome.status, PageStatus::Fixed);
        assert_eq!(outcome.by_type.get(&IssueType::MissingLang), Some(&1));
        assert_eq!(outcome.by_type.get(&IssueType::MissingAlt), Some(&1));
        assert_eq!(outcome.by_type.get(&IssueType::BadHeadingOrder), Some(&1));
        assert_eq!(outcome.by_type.get(&IssueType::PoorLinkText), Some(&1));
        assert!(outcome.fixes_applied >= 5);
        assert_eq!(outcome.embedded, 1);
        assert_eq!(outcome.summary.as_deref(), Some("A smiling dog"));

        let page = pipeline
            .store()
            .get_page(&outcome.page_id)
            .await
            .unwrap()
            .unwrap();
        let html = page.fixed_html.unwrap();
        assert!(html.contains("lang=\"en\""));
        assert!(html.contains("alt=\"A smiling dog\""));
        assert!(html.contains("<main>"));
        assert!(html.contains("<h2>Care</h2>"));
    }

    #[tokio::test]
    async fn test_raw_html_always_new_page() {
        let pipeline = pipeline("");
        let a = pipeline
            .process(Source::Html(PAGE.to_string()), ProcessMode::Fast)
            .await
            .unwrap();
        let b = pipeline
            .process(Source::Html(PAGE.to_string()), ProcessMode::Full)
            .await
            .unwrap();
        assert_ne!(a.page_id, b.page_id);
        assert_eq!(a.issues_found, b.issues_found);
        assert!(a.summary.is_none());
    }

    #[tokio::test]
    async fn test_invalid_url_rejected_before_store() {
        let pipeline = pipeline("");
        let err = pipeline
            .process(Source::Url("mailto:a@b.c".into()), ProcessMode::Fast)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unsupported URL scheme"));
    }

    #[tokio::test]
    async fn test_fetch_failure_marks_page_failed() {
        // Port 9 (discard) on localhost refuses connections.
        let pipeline = pipeline("[pipeline]\nfetch_timeout_secs = 2\nconnect_timeout_secs = 1\n");
        let url = "http://127.0.0.1:9/page";
        assert!(pipeline
            .process(Source::Url(url.into()), ProcessMode::Fast)
            .await
            .is_err());

        let page_id = pipeline.store().upsert_page(Some(url)).await.unwrap();
        let page = pipeline.store().get_page(&page_id).await.unwrap().unwrap();
        assert_eq!(page.status, PageStatus::Failed);
        assert!(page.error.unwrap().starts_with("fetch failed"));
        assert!(pipeline.store().list_issues(&page_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_marks_page_failed_and_keeps_earlier_run() {
        let url = serve_page().await;
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());

        let fast = Pipeline::new(&config(""), store.clone(), Arc::new(FakeAi::default())).unwrap();
        let first = fast
            .process(Source::Url(url.clone()), ProcessMode::Fast)
            .await
            .unwrap();

        let slow_ai = FakeAi {
            complete_delay: Some(Duration::from_secs(3)),
            ..FakeAi::default()
        };
        let slow = Pipeline::new(
            &config("[pipeline]\ntimeout_secs = 1\n"),
            store.clone(),
            Arc::new(slow_ai),
        )
        .unwrap();
        let err = slow
            .process(Source::Url(url.clone()), ProcessMode::Fast)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "processing timed out after 1s");

        let page = store.get_page(&first.page_id).await.unwrap().unwrap();
        assert_eq!(page.status, PageStatus::Failed);
        assert_eq!(page.error.as_deref(), Some("timed out after 1s"));
        assert!(page.fixed_html.is_some());
        let issues = store.list_issues(&first.page_id).await.unwrap();
        assert_eq!(issues.len(), first.issues_found);
    }

    #[tokio::test]
    async fn test_rerun_reuses_unchanged_embeddings() {
        let url = serve_page().await;
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let ai = Arc::new(FakeAi::default());
        let pipeline = Pipeline::new(&config(""), store, ai.clone()).unwrap();

        let first = pipeline
            .process(Source::Url(url.clone()), ProcessMode::Fast)
            .await
            .unwrap();
        assert_eq!(first.embedded, 1);
        assert_eq!(ai.embedded_texts.load(Ordering::SeqCst), 1);

        let second = pipeline
            .process(Source::Url(url), ProcessMode::Fast)
            .await
            .unwrap();
        assert_eq!(second.page_id, first.page_id);
        assert_eq!(second.embedded, 1);
        assert_eq!(ai.embedded_texts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_process_many_keeps_order() {
        let pipeline = pipeline("[pipeline]\nmax_concurrent_pages = 2\n");
        let sources = vec![
            Source::Html("<p>one</p>".into()),
            Source::Url("ftp://nope".into()),
            Source::Html("<p>three</p>".into()),
        ];
        let results = pipeline.process_many(sources, ProcessMode::Fast).await;
        assert_eq!(results.len(), 3);
        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_err());
        assert_eq!(results[1].0, "ftp://nope");
        assert!(results[2].1.is_ok());
    }
}
