//! Remediation engine.
//!
//! [`apply_fixes`] repairs a [`Document`] in place from one audit snapshot.
//! Issues are handled grouped by type, in [`IssueType::ALL`] order, through
//! a strategy table ([`strategy_for`]). Each strategy locates its target
//! element from the triggering chunk's attributes and text, skipping nodes
//! already edited during this run, so two identical issues fix two distinct
//! elements.
//!
//! Alt-text completions are the only AI work here. They are resolved and
//! requested up front, concurrently, before the tree is touched; a failed or
//! empty completion falls back to `"Image"`.
//!
//! A strategy that finds nothing to edit is recorded in the [`FixReport`]
//! and the batch moves on.

use std::collections::{BTreeMap, HashMap, HashSet};

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use crate::ai::{AiClient, CompletionRequest};
use crate::dom::{Document, NodeId};
use crate::index::truncate_chars;
use crate::models::{Chunk, Issue, IssueType};

/// Alt text used whenever no better description is available.
pub const ALT_FALLBACK: &str = "Image";

/// Label used when a vague link offers nothing to build a better one from.
pub const LINK_TEXT_FALLBACK: &str = "Learn More";

pub const ALT_MAX_WORDS: usize = 12;
const ALT_CONTEXT_CHARS: usize = 500;
const ALT_TEMPERATURE: f32 = 0.2;
const ALT_MAX_TOKENS: u32 = 40;

const MAIN_CLASS_KEYWORDS: &[&str] = &["content", "main", "primary", "container"];
const MAIN_EXCLUDED: &[&str] = &["header", "footer", "nav", "script", "style"];
const IMAGE_SOURCES: &[&str] = &["src", "data-src", "data-original", "data-lazy"];
const UNTOUCHED_SCHEMES: &[&str] = &["javascript:", "mailto:", "tel:", "data:"];

/// Second-level labels that sit under a country-code TLD (`co.uk`, `com.au`).
const COUNTRY_SECOND_LEVEL: &[&str] = &["co", "com", "org", "net", "ac", "gov", "edu", "ne", "or"];

/// Host fragments that get a "Visit our <Platform> page" label.
const SOCIAL_PLATFORMS: &[(&str, &str)] = &[
    ("facebook", "Facebook"),
    ("twitter", "Twitter"),
    ("linkedin", "LinkedIn"),
    ("instagram", "Instagram"),
    ("youtube", "YouTube"),
    ("youtu.be", "YouTube"),
    ("github", "GitHub"),
];

/// Inputs that shape a remediation run.
#[derive(Clone, Copy)]
pub struct FixOptions<'a> {
    /// Completion provider for alt text. `None` means every image gets the fallback.
    pub ai: Option<&'a dyn AiClient>,
    /// When set, relative URLs are resolved against it and a `<base>` is injected.
    pub page_url: Option<&'a str>,
    pub alt_text_concurrency: usize,
}

impl Default for FixOptions<'_> {
    fn default() -> Self {
        Self {
            ai: None,
            page_url: None,
            alt_text_concurrency: 4,
        }
    }
}

/// A fix that could not be applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedFix {
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub path: String,
    pub reason: String,
}

/// Outcome of one [`apply_fixes`] run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FixReport {
    pub applied: BTreeMap<IssueType, usize>,
    pub skipped: Vec<SkippedFix>,
    pub urls_normalized: bool,
}

impl FixReport {
    pub fn applied_total(&self) -> usize {
        self.applied.values().sum()
    }
}

/// Mutable state shared by the strategies during one run.
pub struct FixContext<'a> {
    pub doc: &'a mut Document,
    processed: HashSet<NodeId>,
    alt_plan: HashMap<usize, (NodeId, String)>,
}

impl FixContext<'_> {
    fn claim(&mut self, node: NodeId) {
        self.processed.insert(node);
    }

    fn is_free(&self, node: NodeId) -> bool {
        !self.processed.contains(&node)
    }

    /// Elements with `tag`, in document order, not yet edited in this run.
    fn free_elements(&self, tag: &str) -> Vec<NodeId> {
        self.doc
            .descendants(self.doc.root())
            .filter(|id| self.doc.is_element(*id, tag) && self.is_free(*id))
            .collect()
    }
}

/// A fix strategy: gets the issue's position in the issue list and its
/// triggering chunk; returns whether the tree was edited.
pub type Strategy = fn(&mut FixContext<'_>, usize, &Chunk) -> bool;

/// The strategy table.
pub fn strategy_for(issue_type: IssueType) -> Strategy {
    match issue_type {
        IssueType::MissingLang => fix_missing_lang,
        IssueType::MissingMain => fix_missing_main,
        IssueType::LinkNoName => fix_link_no_name,
        IssueType::MissingAlt => fix_missing_alt,
        IssueType::BadHeadingOrder => fix_heading_order,
        IssueType::PoorLinkText => fix_poor_link_text,
    }
}

/// Apply every issue's fix to `doc`, then normalize URLs when the page URL
/// is known. `chunks` and `issues` must come from the same audit pass over
/// the unmodified document.
pub async fn apply_fixes(
    doc: &mut Document,
    chunks: &[Chunk],
    issues: &[Issue],
    options: &FixOptions<'_>,
) -> FixReport {
    let alt_plan = plan_alt_texts(doc, chunks, issues, options).await;
    let mut ctx = FixContext {
        doc,
        processed: HashSet::new(),
        alt_plan,
    };
    let mut report = FixReport::default();

    for issue_type in IssueType::ALL {
        let strategy = strategy_for(issue_type);
        for (i, issue) in issues
            .iter()
            .enumerate()
            .filter(|(_, issue)| issue.issue_type == issue_type)
        {
            let applied = match chunks.get(issue.chunk.index) {
                Some(chunk) => strategy(&mut ctx, i, chunk),
                None => false,
            };
            if applied {
                *report.applied.entry(issue_type).or_insert(0) += 1;
            } else {
                debug!(
                    issue = %issue_type,
                    path = %issue.chunk.path,
                    "no matching element, fix skipped"
                );
                report.skipped.push(SkippedFix {
                    issue_type,
                    path: issue.chunk.path.clone(),
                    reason: "no matching element".to_string(),
                });
            }
        }
    }

    if let Some(page_url) = options.page_url {
        report.urls_normalized = normalize_urls(ctx.doc, page_url);
    }

    report
}

// ---------- strategies ----------

fn fix_missing_lang(ctx: &mut FixContext<'_>, _issue: usize, _chunk: &Chunk) -> bool {
    let Some(html) = ctx.doc.document_element() else {
        return false;
    };
    if ctx.doc.attr_trimmed(html, "lang").is_empty() {
        ctx.doc.set_attr(html, "lang", "en");
    }
    ctx.claim(html);
    true
}

fn fix_missing_main(ctx: &mut FixContext<'_>, _issue: usize, _chunk: &Chunk) -> bool {
    let Some(body) = ctx.doc.body() else {
        return false;
    };
    if ctx.doc.find_first(body, "main").is_some() {
        return false;
    }

    let doc = &mut *ctx.doc;
    let candidate = doc.descendants(body).find(|id| {
        let class = doc.attr(*id, "class").unwrap_or("").to_lowercase();
        MAIN_CLASS_KEYWORDS.iter().any(|k| class.contains(k))
    });

    let main = doc.create_element("main", &[]);
    match candidate {
        Some(target) => {
            doc.wrap(target, main);
        }
        None => {
            let movable: Vec<NodeId> = doc
                .children(body)
                .iter()
                .copied()
                .filter(|child| match doc.tag_name(*child) {
                    Some(tag) => !MAIN_EXCLUDED.contains(&tag),
                    None => !doc.text_content(*child).is_empty(),
                })
                .collect();
            match movable.first() {
                Some(first) => {
                    doc.insert_before(*first, main);
                    for node in movable {
                        doc.append_child(main, node);
                    }
                }
                None => doc.append_child(body, main),
            }
        }
    }
    ctx.claim(main);
    true
}

fn fix_link_no_name(ctx: &mut FixContext<'_>, _issue: usize, chunk: &Chunk) -> bool {
    let href = chunk.attr("href");
    let target = ctx.free_elements("a").into_iter().find(|a| {
        ctx.doc.attr_trimmed(*a, "href") == href
            && ctx.doc.text_content(*a).is_empty()
            && ctx.doc.attr_trimmed(*a, "aria-label").is_empty()
            && ctx.doc.attr_trimmed(*a, "title").is_empty()
    });
    let Some(a) = target else {
        return false;
    };
    ctx.doc.set_attr(a, "aria-label", &link_label(href));
    ctx.claim(a);
    true
}

fn fix_missing_alt(ctx: &mut FixContext<'_>, issue: usize, _chunk: &Chunk) -> bool {
    let Some((img, alt)) = ctx.alt_plan.remove(&issue) else {
        return false;
    };
    if !ctx.is_free(img) {
        return false;
    }
    ctx.doc.set_attr(img, "alt", &alt);
    ctx.claim(img);
    true
}

fn fix_heading_order(ctx: &mut FixContext<'_>, _issue: usize, chunk: &Chunk) -> bool {
    let level = chunk.heading_level();
    if level < 2 {
        return false;
    }
    let tag = format!("h{}", level);
    let target = ctx
        .free_elements(&tag)
        .into_iter()
        .find(|h| ctx.doc.text_content(*h) == chunk.text);
    let Some(h) = target else {
        return false;
    };
    ctx.doc.rename(h, &format!("h{}", level - 1));
    ctx.claim(h);
    true
}

fn fix_poor_link_text(ctx: &mut FixContext<'_>, _issue: usize, chunk: &Chunk) -> bool {
    let href = chunk.attr("href");
    let target = ctx.free_elements("a").into_iter().find(|a| {
        ctx.doc.attr(*a, "href").is_some()
            && ctx.doc.attr_trimmed(*a, "href") == href
            && ctx.doc.text_content(*a) == chunk.text
    });
    let Some(a) = target else {
        return false;
    };

    let label = ctx.doc.attr_trimmed(a, "aria-label");
    let text = if !label.is_empty() {
        label.to_string()
    } else {
        slug_label(ctx.doc.attr_trimmed(a, "href"))
            .unwrap_or_else(|| LINK_TEXT_FALLBACK.to_string())
    };
    ctx.doc.set_text(a, &text);
    ctx.claim(a);
    true
}

// ---------- alt text ----------

struct AltTarget {
    issue: usize,
    node: NodeId,
    context: String,
}

/// Resolve every MISSING_ALT issue to an `<img>` and fetch its alt text.
async fn plan_alt_texts(
    doc: &Document,
    chunks: &[Chunk],
    issues: &[Issue],
    options: &FixOptions<'_>,
) -> HashMap<usize, (NodeId, String)> {
    let images: Vec<NodeId> = doc
        .descendants(doc.root())
        .filter(|id| doc.is_element(*id, "img"))
        .collect();
    let mut claimed = HashSet::new();
    let mut targets = Vec::new();

    for (i, issue) in issues.iter().enumerate() {
        if issue.issue_type != IssueType::MissingAlt {
            continue;
        }
        let Some(chunk) = chunks.get(issue.chunk.index) else {
            continue;
        };
        let src = chunk.attr("src");
        let found = images.iter().copied().find(|img| {
            !claimed.contains(img)
                && image_source(doc, *img) == src
                && doc.attr_trimmed(*img, "alt").is_empty()
        });
        if let Some(node) = found {
            claimed.insert(node);
            let context = doc
                .parent(node)
                .map(|p| doc.text_content(p))
                .unwrap_or_default();
            targets.push(AltTarget {
                issue: i,
                node,
                context: truncate_chars(&context, ALT_CONTEXT_CHARS).to_string(),
            });
        }
    }

    let ai = options.ai.filter(|ai| ai.is_enabled());
    stream::iter(targets)
        .map(|target| async move {
            let alt = generate_alt_text(ai, &target.context).await;
            (target.issue, (target.node, alt))
        })
        .buffered(options.alt_text_concurrency.max(1))
        .collect()
        .await
}

/// Prompt sent to the completion model for one image.
pub fn alt_text_prompt(context: &str) -> String {
    format!(
        "Write a short, objective alt text (max {} words) for this image context. \
         Avoid opinions, punctuation beyond commas/periods, and avoid quoting.\n\n\
         Context:\n{}\n\nAlt:",
        ALT_MAX_WORDS,
        truncate_chars(context, ALT_CONTEXT_CHARS)
    )
}

async fn generate_alt_text(ai: Option<&dyn AiClient>, context: &str) -> String {
    let Some(ai) = ai else {
        return ALT_FALLBACK.to_string();
    };
    let request =
        CompletionRequest::new(alt_text_prompt(context), ALT_TEMPERATURE, ALT_MAX_TOKENS);
    match ai.complete(&request).await {
        Ok(text) => clean_alt_text(&text),
        Err(e) => {
            warn!(error = %e, "alt text generation failed, using fallback");
            ALT_FALLBACK.to_string()
        }
    }
}

/// Trim, strip surrounding quotes, cap at [`ALT_MAX_WORDS`] words.
pub fn clean_alt_text(raw: &str) -> String {
    let quotes: &[char] = &['"', '\'', '\u{201c}', '\u{201d}', '\u{2018}', '\u{2019}'];
    let unquoted = raw.trim().trim_matches(quotes).trim();
    let words: Vec<&str> = unquoted.split_whitespace().take(ALT_MAX_WORDS).collect();
    if words.is_empty() {
        ALT_FALLBACK.to_string()
    } else {
        words.join(" ")
    }
}

fn image_source<'d>(doc: &'d Document, img: NodeId) -> &'d str {
    IMAGE_SOURCES
        .iter()
        .map(|name| doc.attr_trimmed(img, name))
        .find(|v| !v.is_empty())
        .unwrap_or("")
}

// ---------- labels ----------

/// Accessible name for a link that has none, derived from its href.
///
/// ```rust
/// use a11y_harness_core::remediate::link_label;
///
/// assert_eq!(link_label("https://www.facebook.com/acme"), "Visit our Facebook page");
/// assert_eq!(link_label("https://www.example.org/about"), "Visit example.org");
/// assert_eq!(link_label("/contact-us"), "Contact Us");
/// assert_eq!(link_label(""), "Link");
/// ```
pub fn link_label(href: &str) -> String {
    if let Some(host) = href_host(href) {
        if let Some(platform) = social_platform(&host) {
            return format!("Visit our {} page", platform);
        }
        return format!("Visit {}", registrable_domain(&host));
    }
    slug_label(href).unwrap_or_else(|| "Link".to_string())
}

fn href_host(href: &str) -> Option<String> {
    let parsed = if href.starts_with("//") {
        Url::parse(&format!("https:{}", href))
    } else {
        Url::parse(href)
    };
    parsed
        .ok()?
        .host_str()
        .filter(|h| !h.is_empty())
        .map(str::to_ascii_lowercase)
}

/// `host` reduced to its registrable part: `blog.example.org` becomes
/// `example.org`, `shop.bbc.co.uk` becomes `bbc.co.uk`. IP literals are
/// returned unchanged.
pub fn registrable_domain(host: &str) -> String {
    if host.starts_with('[') || host.parse::<std::net::IpAddr>().is_ok() {
        return host.to_string();
    }
    let labels: Vec<&str> = host
        .trim_end_matches('.')
        .split('.')
        .filter(|l| !l.is_empty())
        .collect();
    let keep = match labels.as_slice() {
        [.., second, tld]
            if tld.len() == 2 && COUNTRY_SECOND_LEVEL.contains(second) && labels.len() > 2 =>
        {
            3
        }
        _ => 2,
    };
    labels[labels.len().saturating_sub(keep)..].join(".")
}

fn social_platform(host: &str) -> Option<&'static str> {
    if host == "x.com" || host.ends_with(".x.com") {
        return Some("X");
    }
    SOCIAL_PLATFORMS
        .iter()
        .find(|(needle, _)| host.contains(needle))
        .map(|(_, name)| *name)
}

/// Title-cased final non-empty path segment of `href`, with query and
/// fragment removed and `-`/`_` read as spaces.
pub fn slug_label(href: &str) -> Option<String> {
    let path = href.split(['?', '#']).next().unwrap_or("");
    let segment = path.split('/').rev().find(|s| !s.trim().is_empty())?;
    let label = title_case(&segment.replace(['-', '_'], " "));
    if label.is_empty() {
        None
    } else {
        Some(label)
    }
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

// ---------- URL normalization ----------

/// Inject `<base href>` and absolutize image and link URLs against
/// `page_url`. Returns false when `page_url` is not an absolute URL.
pub fn normalize_urls(doc: &mut Document, page_url: &str) -> bool {
    let base = match Url::parse(page_url) {
        Ok(base) => base,
        Err(e) => {
            warn!(url = page_url, error = %e, "cannot normalize urls against invalid page url");
            return false;
        }
    };

    if let Some(head) = doc.head() {
        if doc.find_first(head, "base").is_none() {
            let base_el = doc.create_element("base", &[("href", page_url)]);
            doc.insert_child(head, 0, base_el);
        }
    }

    let targets: Vec<NodeId> = doc
        .descendants(doc.root())
        .filter(|id| doc.is_element(*id, "img") || doc.is_element(*id, "a"))
        .collect();

    for node in targets {
        if doc.is_element(node, "img") {
            let src = image_source(doc, node).to_string();
            if !src.is_empty() {
                doc.set_attr(node, "src", &absolutize(&base, &src));
            }
            if let Some(srcset) = doc.attr(node, "srcset").map(str::to_string) {
                doc.set_attr(node, "srcset", &absolutize_srcset(&base, &srcset));
            }
        } else {
            let href = doc.attr_trimmed(node, "href").to_string();
            if !href.is_empty() {
                doc.set_attr(node, "href", &absolutize(&base, &href));
            }
        }
    }
    true
}

/// Resolve `value` against `base`, leaving fragments and non-navigational
/// schemes as they are.
pub fn absolutize(base: &Url, value: &str) -> String {
    let trimmed = value.trim();
    let lower = trimmed.to_ascii_lowercase();
    if trimmed.starts_with('#') || UNTOUCHED_SCHEMES.iter().any(|s| lower.starts_with(s)) {
        return value.to_string();
    }
    base.join(trimmed)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| value.to_string())
}

fn absolutize_srcset(base: &Url, srcset: &str) -> String {
    srcset
        .split(',')
        .filter_map(|candidate| {
            let mut parts = candidate.split_whitespace();
            let url = parts.next()?;
            let mut out = vec![absolutize(base, url)];
            out.extend(parts.map(str::to_string));
            Some(out.join(" "))
        })
        .collect::<Vec<_>>()
        .join(", ")
}
