//! Accessibility audit rules.
//!
//! [`audit`] runs six independent rules over one extraction pass, in the
//! order of [`IssueType::ALL`]. Every issue points back at the chunk that
//! triggered it by index into the same chunk slice.

use serde_json::json;

use crate::models::{Chunk, ChunkRole, Issue, IssueType};

/// Link texts that say nothing about the destination.
pub const VAGUE_LINK_TEXT: &[&str] = &[
    "click here",
    "read more",
    "learn more",
    "more",
    "here",
    "details",
    "link",
    "this",
    "go",
    "open",
    "continue",
];

/// True when `text` (trimmed, case-insensitive) is a vague link phrase.
pub fn is_vague_link_text(text: &str) -> bool {
    let normalized = text.trim().to_lowercase();
    VAGUE_LINK_TEXT.contains(&normalized.as_str())
}

/// Run every rule over `chunks`. Pure and deterministic.
pub fn audit(chunks: &[Chunk]) -> Vec<Issue> {
    let mut issues = Vec::new();
    for issue_type in IssueType::ALL {
        match issue_type {
            IssueType::MissingLang => missing_lang(chunks, &mut issues),
            IssueType::MissingMain => missing_main(chunks, &mut issues),
            IssueType::LinkNoName => link_no_name(chunks, &mut issues),
            IssueType::MissingAlt => missing_alt(chunks, &mut issues),
            IssueType::BadHeadingOrder => bad_heading_order(chunks, &mut issues),
            IssueType::PoorLinkText => poor_link_text(chunks, &mut issues),
        }
    }
    issues
}

fn by_role(chunks: &[Chunk], role: ChunkRole) -> impl Iterator<Item = (usize, &Chunk)> {
    chunks.iter().enumerate().filter(move |(_, c)| c.role == role)
}

fn missing_lang(chunks: &[Chunk], issues: &mut Vec<Issue>) {
    for (i, chunk) in by_role(chunks, ChunkRole::Document) {
        if chunk.attr("lang").trim().is_empty() {
            issues.push(Issue::new(
                IssueType::MissingLang,
                json!({ "reason": "<html> element has no lang attribute" }),
                i,
                chunk,
            ));
        }
    }
}

fn missing_main(chunks: &[Chunk], issues: &mut Vec<Issue>) {
    for (i, chunk) in by_role(chunks, ChunkRole::Document) {
        if chunk.attr("has_main") != "true" {
            issues.push(Issue::new(
                IssueType::MissingMain,
                json!({ "reason": "page has no <main> landmark" }),
                i,
                chunk,
            ));
        }
    }
}

fn link_no_name(chunks: &[Chunk], issues: &mut Vec<Issue>) {
    for (i, chunk) in by_role(chunks, ChunkRole::Link) {
        let nameless = chunk.text.trim().is_empty()
            && chunk.attr("aria-label").trim().is_empty()
            && chunk.attr("title").trim().is_empty();
        if nameless {
            issues.push(Issue::new(
                IssueType::LinkNoName,
                json!({
                    "reason": "link has no text, aria-label or title",
                    "href": chunk.attr("href"),
                }),
                i,
                chunk,
            ));
        }
    }
}

fn missing_alt(chunks: &[Chunk], issues: &mut Vec<Issue>) {
    for (i, chunk) in by_role(chunks, ChunkRole::Image) {
        if chunk.attr("alt").trim().is_empty() {
            issues.push(Issue::new(
                IssueType::MissingAlt,
                json!({
                    "reason": "image without alt attribute or empty alt",
                    "src": chunk.attr("src"),
                }),
                i,
                chunk,
            ));
        }
    }
}

fn bad_heading_order(chunks: &[Chunk], issues: &mut Vec<Issue>) {
    let mut last = 0u8;
    for (i, chunk) in by_role(chunks, ChunkRole::Heading) {
        let level = chunk.heading_level();
        if level == 0 {
            continue;
        }
        if last != 0 && level > last + 1 {
            issues.push(Issue::new(
                IssueType::BadHeadingOrder,
                json!({ "prev": last, "curr": level }),
                i,
                chunk,
            ));
        }
        last = level;
    }
}

fn poor_link_text(chunks: &[Chunk], issues: &mut Vec<Issue>) {
    for (i, chunk) in by_role(chunks, ChunkRole::Link) {
        if is_vague_link_text(&chunk.text) {
            issues.push(Issue::new(
                IssueType::PoorLinkText,
                json!({ "text": chunk.text }),
                i,
                chunk,
            ));
        }
    }
}
