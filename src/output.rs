//! Repaired HTML and issue listings for stored pages.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Serialize;

use a11y_harness_core::models::PageStatus;
use a11y_harness_core::store::{IssueRecord, Store};

use crate::config::Config;
use crate::sqlite_store::SqliteStore;

/// The repaired document of the page's latest successful run.
pub async fn fixed_html(store: &dyn Store, page_id: &str) -> Result<String> {
    let Some(page) = store.get_page(page_id).await? else {
        bail!("page not found: {}", page_id);
    };
    match page.fixed_html {
        Some(html) => Ok(html),
        None if page.status == PageStatus::Failed => bail!(
            "no output for page {}: processing failed ({})",
            page_id,
            page.error.as_deref().unwrap_or("unknown error")
        ),
        None => bail!("no output for page {}: not processed yet", page_id),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IssueListing {
    pub page_id: String,
    pub url: Option<String>,
    pub status: PageStatus,
    pub issues: Vec<IssueRecord>,
}

pub async fn page_issues(store: &dyn Store, page_id: &str) -> Result<IssueListing> {
    let Some(page) = store.get_page(page_id).await? else {
        bail!("page not found: {}", page_id);
    };
    Ok(IssueListing {
        page_id: page.id,
        url: page.url,
        status: page.status,
        issues: store.list_issues(page_id).await?,
    })
}

/// CLI entry point for `a11y output`: prints the HTML or writes it to `out`.
pub async fn run_output(config: &Config, page_id: &str, out: Option<&Path>) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let html = fixed_html(&store, page_id).await;
    store.close().await;
    let html = html?;

    match out {
        Some(path) => {
            std::fs::write(path, &html)
                .with_context(|| format!("Failed to write output: {}", path.display()))?;
            println!("Wrote {} bytes to {}", html.len(), path.display());
        }
        None => println!("{}", html),
    }
    Ok(())
}

/// CLI entry point for `a11y issues`.
pub async fn run_issues(config: &Config, page_id: &str, json: bool) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let listing = page_issues(&store, page_id).await;
    store.close().await;
    let listing = listing?;

    if json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    println!("--- Page ---");
    println!("id:     {}", listing.page_id);
    println!("url:    {}", listing.url.as_deref().unwrap_or("(raw html)"));
    println!("status: {}", listing.status);
    println!();
    println!("--- Issues ({}) ---", listing.issues.len());
    for issue in &listing.issues {
        println!(
            "{:<18} {:<6} {}",
            issue.issue_type.as_str(),
            issue.severity.as_str(),
            issue.chunk_path.as_deref().unwrap_or("-")
        );
        println!("    {}", issue.details);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use a11y_harness_core::models::Page;
    use a11y_harness_core::store::memory::InMemoryStore;

    #[tokio::test]
    async fn test_fixed_html_states() {
        let store = InMemoryStore::new();
        assert!(fixed_html(&store, "missing")
            .await
            .unwrap_err()
            .to_string()
            .contains("not found"));

        let id = store.upsert_page(None).await.unwrap();
        assert!(fixed_html(&store, &id)
            .await
            .unwrap_err()
            .to_string()
            .contains("not processed yet"));

        store.mark_failed(&id, "timed out after 120s").await.unwrap();
        assert!(fixed_html(&store, &id)
            .await
            .unwrap_err()
            .to_string()
            .contains("timed out"));

        let mut page = Page::new(id.clone(), None, "<p>x</p>");
        page.record_audit(Vec::new(), Vec::new());
        page.record_fix("<html lang=\"en\"></html>".into());
        store.save_pass(&page, "fake").await.unwrap();
        assert_eq!(
            fixed_html(&store, &id).await.unwrap(),
            "<html lang=\"en\"></html>"
        );
    }

    #[tokio::test]
    async fn test_page_issues_listing() {
        let store = InMemoryStore::new();
        let id = store.upsert_page(Some("https://example.org/")).await.unwrap();
        let listing = page_issues(&store, &id).await.unwrap();
        assert_eq!(listing.status, PageStatus::New);
        assert!(listing.issues.is_empty());
        assert!(page_issues(&store, "missing").await.is_err());
    }
}
