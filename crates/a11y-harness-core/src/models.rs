//! Core data models that flow through the audit and retrieval pipeline.
//!
//! A [`Page`] owns the [`Chunk`]s extracted from its HTML and the
//! [`Issue`]s detected over them. Chunks and issues are recreated on every
//! audit pass; nothing here is updated in place once an issue exists.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Semantic role of an extracted [`Chunk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkRole {
    Document,
    Image,
    Heading,
    Link,
    Section,
}

impl ChunkRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkRole::Document => "document",
            ChunkRole::Image => "image",
            ChunkRole::Heading => "heading",
            ChunkRole::Link => "link",
            ChunkRole::Section => "section",
        }
    }
}

impl fmt::Display for ChunkRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "document" => Ok(ChunkRole::Document),
            "image" => Ok(ChunkRole::Image),
            "heading" => Ok(ChunkRole::Heading),
            "link" => Ok(ChunkRole::Link),
            "section" => Ok(ChunkRole::Section),
            other => bail!("unknown chunk role: {}", other),
        }
    }
}

/// A semantic unit extracted from a document.
///
/// `attributes` always carries the keys relevant to the chunk's role
/// (possibly with empty values), so consumers can index it directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub role: ChunkRole,
    /// `>`-joined tag chain from the root, e.g. `html>body>div:nth-of-type(2)>h2`.
    pub path: String,
    pub text: String,
    pub attributes: BTreeMap<String, String>,
    /// SHA-256 of `text`.
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    /// Attribute value, or `""` when the key is missing.
    pub fn attr(&self, key: &str) -> &str {
        self.attributes.get(key).map(String::as_str).unwrap_or("")
    }

    /// Heading level (1–6) for heading chunks, `0` otherwise.
    pub fn heading_level(&self) -> u8 {
        self.attr("level").parse().unwrap_or(0)
    }
}

/// Closed set of defects the audit engine can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueType {
    MissingLang,
    MissingMain,
    LinkNoName,
    MissingAlt,
    BadHeadingOrder,
    PoorLinkText,
}

impl IssueType {
    /// All issue types in audit/fix pass order.
    pub const ALL: [IssueType; 6] = [
        IssueType::MissingLang,
        IssueType::MissingMain,
        IssueType::LinkNoName,
        IssueType::MissingAlt,
        IssueType::BadHeadingOrder,
        IssueType::PoorLinkText,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::MissingLang => "MISSING_LANG",
            IssueType::MissingMain => "MISSING_MAIN",
            IssueType::LinkNoName => "LINK_NO_NAME",
            IssueType::MissingAlt => "MISSING_ALT",
            IssueType::BadHeadingOrder => "BAD_HEADING_ORDER",
            IssueType::PoorLinkText => "POOR_LINK_TEXT",
        }
    }

    /// Severity is a property of the type, never of the instance.
    pub fn severity(&self) -> Severity {
        match self {
            IssueType::MissingLang => Severity::High,
            IssueType::MissingMain | IssueType::LinkNoName | IssueType::MissingAlt => {
                Severity::Medium
            }
            IssueType::BadHeadingOrder | IssueType::PoorLinkText => Severity::Low,
        }
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssueType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        IssueType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown issue type: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "HIGH" => Ok(Severity::High),
            "MEDIUM" => Ok(Severity::Medium),
            "LOW" => Ok(Severity::Low),
            other => bail!("unknown severity: {}", other),
        }
    }
}

/// Back-reference from an issue to the chunk that triggered it.
///
/// `index` points into the chunk list of the extraction pass that produced
/// the issue; `path` is carried along for display and persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    pub index: usize,
    pub path: String,
}

/// A detected accessibility defect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub severity: Severity,
    pub details: serde_json::Value,
    pub chunk: ChunkRef,
}

impl Issue {
    pub fn new(
        issue_type: IssueType,
        details: serde_json::Value,
        index: usize,
        chunk: &Chunk,
    ) -> Self {
        Self {
            issue_type,
            severity: issue_type.severity(),
            details,
            chunk: ChunkRef {
                index,
                path: chunk.path.clone(),
            },
        }
    }
}

/// Lifecycle of a [`Page`] through one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PageStatus {
    New,
    Audited,
    Fixed,
    Failed,
}

impl PageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageStatus::New => "NEW",
            PageStatus::Audited => "AUDITED",
            PageStatus::Fixed => "FIXED",
            PageStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for PageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PageStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NEW" => Ok(PageStatus::New),
            "AUDITED" => Ok(PageStatus::Audited),
            "FIXED" => Ok(PageStatus::Fixed),
            "FAILED" => Ok(PageStatus::Failed),
            other => bail!("unknown page status: {}", other),
        }
    }
}

/// Embedding breadth for a pipeline run. Does not affect audit or fixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessMode {
    #[default]
    Fast,
    Full,
}

impl ProcessMode {
    /// Maximum number of chunks embedded in this mode.
    pub fn embed_top_k(&self) -> usize {
        match self {
            ProcessMode::Fast => 24,
            ProcessMode::Full => 64,
        }
    }
}

impl FromStr for ProcessMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(ProcessMode::Fast),
            "full" => Ok(ProcessMode::Full),
            other => bail!("unknown mode: {}. Use fast or full.", other),
        }
    }
}

/// Host of `url`, when it parses as an absolute URL with a host.
pub fn url_domain(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}

/// The owning aggregate for one processed document.
///
/// Status moves `New → Audited → Fixed` through [`record_audit`](Page::record_audit)
/// and [`record_fix`](Page::record_fix); a failed run ends in `Failed`.
#[derive(Debug, Clone)]
pub struct Page {
    pub id: String,
    pub url: Option<String>,
    pub domain: Option<String>,
    pub raw_html: String,
    pub fixed_html: Option<String>,
    pub status: PageStatus,
    pub summary: Option<String>,
    pub chunks: Vec<Chunk>,
    pub issues: Vec<Issue>,
}

impl Page {
    pub fn new(id: impl Into<String>, url: Option<String>, raw_html: impl Into<String>) -> Self {
        let domain = url.as_deref().and_then(url_domain);
        Self {
            id: id.into(),
            url,
            domain,
            raw_html: raw_html.into(),
            fixed_html: None,
            status: PageStatus::New,
            summary: None,
            chunks: Vec::new(),
            issues: Vec::new(),
        }
    }

    /// Replace the chunk and issue collections with a fresh audit pass.
    pub fn record_audit(&mut self, chunks: Vec<Chunk>, issues: Vec<Issue>) {
        self.chunks = chunks;
        self.issues = issues;
        self.status = PageStatus::Audited;
    }

    pub fn record_fix(&mut self, fixed_html: String) {
        self.fixed_html = Some(fixed_html);
        self.status = PageStatus::Fixed;
    }

    /// Issue counts keyed by type, in pass order.
    pub fn issues_by_type(&self) -> BTreeMap<IssueType, usize> {
        let mut counts = BTreeMap::new();
        for issue in &self.issues {
            *counts.entry(issue.issue_type).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_type_roundtrip_names() {
        for t in IssueType::ALL {
            assert_eq!(t.as_str().parse::<IssueType>().unwrap(), t);
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
        }
    }

    #[test]
    fn test_severity_fixed_per_type() {
        assert_eq!(IssueType::MissingLang.severity(), Severity::High);
        assert_eq!(IssueType::MissingMain.severity(), Severity::Medium);
        assert_eq!(IssueType::LinkNoName.severity(), Severity::Medium);
        assert_eq!(IssueType::MissingAlt.severity(), Severity::Medium);
        assert_eq!(IssueType::BadHeadingOrder.severity(), Severity::Low);
        assert_eq!(IssueType::PoorLinkText.severity(), Severity::Low);
    }

    #[test]
    fn test_mode_top_k() {
        assert_eq!("fast".parse::<ProcessMode>().unwrap().embed_top_k(), 24);
        assert_eq!("FULL".parse::<ProcessMode>().unwrap().embed_top_k(), 64);
        assert!("slow".parse::<ProcessMode>().is_err());
    }

    #[test]
    fn test_page_lifecycle() {
        let mut page = Page::new("p1", Some("https://www.example.org/a".into()), "<p>x</p>");
        assert_eq!(page.domain.as_deref(), Some("www.example.org"));
        assert_eq!(page.status, PageStatus::New);
        page.record_audit(Vec::new(), Vec::new());
        assert_eq!(page.status, PageStatus::Audited);
        page.record_fix("<html></html>".into());
        assert_eq!(page.status, PageStatus::Fixed);
    }
}
