//! Chunk extraction.
//!
//! Walks a [`Document`] once, depth-first from the `<html>` element, and
//! emits [`Chunk`]s in document order:
//!
//! - one `document` chunk (always first) describing the page as a whole;
//! - one `image` chunk per `<img>`;
//! - one `heading` chunk per `h1`–`h6`;
//! - one `link` chunk per `<a href>`;
//! - `section` chunks for text blocks (`p`, `li`, `article`, `section`, and
//!   long `div`s) used as retrieval context.
//!
//! Paths look like `html>body>div:nth-of-type(2)>h2`. The ordinal suffix is
//! only added when a parent has more than one element child with that tag.
//! Elements nested deeper than [`MAX_DEPTH`] levels (counting `<html>` as 1)
//! are not chunked, though their text still counts toward their ancestors.

use std::collections::{BTreeMap, HashMap};

use sha2::{Digest, Sha256};

use crate::dom::{Document, NodeId};
use crate::models::{Chunk, ChunkRole};

pub const MAX_DEPTH: usize = 12;

/// Minimum text length (chars) for a section chunk.
pub const SECTION_MIN_CHARS: usize = 60;

/// Minimum text length (chars) for a `<div>` to count as a text block.
pub const DIV_BLOCK_MIN_CHARS: usize = 120;

const BLOCK_TAGS: &[&str] = &["p", "li", "article", "section"];

const IMAGE_SOURCES: &[&str] = &["src", "data-src", "data-original", "data-lazy"];

/// Extract the chunk list for a document. Pure and deterministic.
pub fn extract(doc: &Document) -> Vec<Chunk> {
    let Some(html) = doc.document_element() else {
        return vec![document_chunk(doc, None)];
    };

    let mut chunks = vec![document_chunk(doc, Some(html))];
    let root_path = doc.tag_name(html).unwrap_or("html").to_string();
    let mut stack: Vec<(NodeId, usize, String)> = vec![(html, 1, root_path)];

    while let Some((node, depth, path)) = stack.pop() {
        if let Some(chunk) = classify(doc, node, &path) {
            chunks.push(chunk);
        }
        if depth >= MAX_DEPTH {
            continue;
        }

        let children: Vec<NodeId> = doc.element_children(node).collect();
        let mut totals: HashMap<&str, usize> = HashMap::new();
        for child in &children {
            *totals.entry(doc.tag_name(*child).unwrap_or("")).or_default() += 1;
        }

        let mut seen: HashMap<&str, usize> = HashMap::new();
        let mut next = Vec::with_capacity(children.len());
        for child in children {
            let name = doc.tag_name(child).unwrap_or("");
            let ordinal = seen.entry(name).or_default();
            *ordinal += 1;
            let segment = if totals.get(name).copied().unwrap_or(0) > 1 {
                format!("{}:nth-of-type({})", name, ordinal)
            } else {
                name.to_string()
            };
            next.push((child, depth + 1, format!("{}>{}", path, segment)));
        }
        stack.extend(next.into_iter().rev());
    }

    chunks
}

/// SHA-256 hex digest of a chunk's text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn make_chunk(role: ChunkRole, path: &str, text: String, attrs: &[(&str, &str)]) -> Chunk {
    let attributes: BTreeMap<String, String> = attrs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Chunk {
        role,
        path: path.to_string(),
        hash: content_hash(&text),
        text,
        attributes,
        embedding: None,
    }
}

fn document_chunk(doc: &Document, html: Option<NodeId>) -> Chunk {
    let lang = html.map(|h| doc.attr_trimmed(h, "lang")).unwrap_or("");
    let has_main = doc
        .body()
        .and_then(|body| doc.find_first(body, "main"))
        .is_some();
    let title = doc
        .head()
        .and_then(|head| doc.find_first(head, "title"))
        .map(|t| doc.text_content(t))
        .unwrap_or_default();
    let path = html.and_then(|h| doc.tag_name(h)).unwrap_or("html");

    make_chunk(
        ChunkRole::Document,
        path,
        title.clone(),
        &[
            ("lang", lang),
            ("has_lang", bool_str(!lang.is_empty())),
            ("has_main", bool_str(has_main)),
            ("title", &title),
        ],
    )
}

fn classify(doc: &Document, node: NodeId, path: &str) -> Option<Chunk> {
    let tag = doc.tag_name(node)?;
    match tag {
        "img" => {
            let src = IMAGE_SOURCES
                .iter()
                .map(|name| doc.attr_trimmed(node, name))
                .find(|v| !v.is_empty())
                .unwrap_or("");
            Some(make_chunk(
                ChunkRole::Image,
                path,
                String::new(),
                &[
                    ("src", src),
                    ("alt", doc.attr_trimmed(node, "alt")),
                    ("width", doc.attr_trimmed(node, "width")),
                    ("height", doc.attr_trimmed(node, "height")),
                ],
            ))
        }
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => Some(make_chunk(
            ChunkRole::Heading,
            path,
            doc.text_content(node),
            &[("level", &tag[1..]), ("tag", tag)],
        )),
        "a" if doc.attr(node, "href").is_some() => Some(make_chunk(
            ChunkRole::Link,
            path,
            doc.text_content(node),
            &[
                ("href", doc.attr_trimmed(node, "href")),
                ("aria-label", doc.attr_trimmed(node, "aria-label")),
                ("title", doc.attr_trimmed(node, "title")),
            ],
        )),
        _ => {
            let is_block = BLOCK_TAGS.contains(&tag);
            if !is_block && tag != "div" {
                return None;
            }
            let text = doc.text_content(node);
            let len = text.chars().count();
            if tag == "div" && len < DIV_BLOCK_MIN_CHARS {
                return None;
            }
            if len < SECTION_MIN_CHARS {
                return None;
            }
            Some(make_chunk(ChunkRole::Section, path, text, &[("tag", tag)]))
        }
    }
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn long_text(n: usize) -> String {
        "word ".repeat(n / 5).trim().to_string()
    }

    #[test]
    fn test_document_chunk_first() {
        let doc = Document::parse(
            r#"<html lang="fr"><head><title> Hello  Page </title></head><body><main><p>x</p></main></body></html>"#,
        );
        let chunks = extract(&doc);
        let first = &chunks[0];
        assert_eq!(first.role, ChunkRole::Document);
        assert_eq!(first.path, "html");
        assert_eq!(first.attr("lang"), "fr");
        assert_eq!(first.attr("has_lang"), "true");
        assert_eq!(first.attr("has_main"), "true");
        assert_eq!(first.attr("title"), "Hello Page");
        assert_eq!(
            chunks.iter().filter(|c| c.role == ChunkRole::Document).count(),
            1
        );
    }

    #[test]
    fn test_missing_lang_and_main_reported() {
        let doc = Document::parse("<p>hi</p>");
        let first = &extract(&doc)[0];
        assert_eq!(first.attr("lang"), "");
        assert_eq!(first.attr("has_lang"), "false");
        assert_eq!(first.attr("has_main"), "false");
    }

    #[test]
    fn test_paths_with_nth_of_type() {
        let doc = Document::parse(
            "<body><div><h2>One</h2></div><div><h2>Two</h2><h2>Three</h2></div><h1>Solo</h1></body>",
        );
        let chunks = extract(&doc);
        let paths: Vec<&str> = chunks
            .iter()
            .filter(|c| c.role == ChunkRole::Heading)
            .map(|c| c.path.as_str())
            .collect();
        assert_eq!(
            paths,
            vec![
                "html>body>div:nth-of-type(1)>h2",
                "html>body>div:nth-of-type(2)>h2:nth-of-type(1)",
                "html>body>div:nth-of-type(2)>h2:nth-of-type(2)",
                "html>body>h1",
            ]
        );
    }

    #[test]
    fn test_roles_and_attribute_keys() {
        let doc = Document::parse(
            r#"<body>
                <img data-src="/lazy.png" width="10">
                <h3>Title</h3>
                <a href="/x" title="T">Go</a>
                <a name="anchor">not a link</a>
            </body>"#,
        );
        let chunks = extract(&doc);

        let img = chunks.iter().find(|c| c.role == ChunkRole::Image).unwrap();
        assert_eq!(img.attr("src"), "/lazy.png");
        assert_eq!(img.attr("width"), "10");
        for key in ["src", "alt", "width", "height"] {
            assert!(img.attributes.contains_key(key), "image missing {}", key);
        }

        let heading = chunks.iter().find(|c| c.role == ChunkRole::Heading).unwrap();
        assert_eq!(heading.heading_level(), 3);
        assert_eq!(heading.attr("tag"), "h3");
        assert_eq!(heading.text, "Title");

        let links: Vec<_> = chunks.iter().filter(|c| c.role == ChunkRole::Link).collect();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].attr("href"), "/x");
        assert_eq!(links[0].attr("title"), "T");
        assert!(links[0].attributes.contains_key("aria-label"));
    }

    #[test]
    fn test_section_thresholds() {
        let html = format!(
            "<body><p>{}</p><p>short</p><div>{}</div><div>{}</div></body>",
            long_text(80),
            long_text(90),
            long_text(150),
        );
        let chunks = extract(&Document::parse(&html));
        let sections: Vec<_> = chunks
            .iter()
            .filter(|c| c.role == ChunkRole::Section)
            .collect();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].attr("tag"), "p");
        assert_eq!(sections[1].attr("tag"), "div");
    }

    #[test]
    fn test_depth_cap() {
        let chunked = format!("<body>{}<img src=a.png></body>", "<div>".repeat(9));
        let too_deep = format!("<body>{}<img src=a.png></body>", "<div>".repeat(10));

        let has_img = |html: &str| {
            extract(&Document::parse(html))
                .iter()
                .any(|c| c.role == ChunkRole::Image)
        };
        assert!(has_img(&chunked));
        assert!(!has_img(&too_deep));
    }

    #[test]
    fn test_deep_text_counts_toward_ancestor() {
        let html = format!(
            "<body><section>{}{}</section></body>",
            "<div>".repeat(14),
            long_text(80)
        );
        let chunks = extract(&Document::parse(&html));
        let section = chunks
            .iter()
            .find(|c| c.role == ChunkRole::Section && c.attr("tag") == "section")
            .unwrap();
        assert!(section.text.starts_with("word"));
    }

    #[test]
    fn test_deterministic_and_unique_paths() {
        let html = r#"<html><body><nav><a href="/a">A</a><a href="/b">B</a></nav>
            <ul><li><a href="/c">C</a></li><li><a href="/d">D</a></li></ul>
            <img src="1.png"><img src="2.png"></body></html>"#;
        let doc = Document::parse(html);
        let first = extract(&doc);
        let second = extract(&doc);
        assert_eq!(first, second);

        let paths: HashSet<&str> = first.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths.len(), first.len());
    }

    #[test]
    fn test_hash_is_sha256_of_text() {
        let chunks = extract(&Document::parse("<h1>Hi</h1>"));
        let h1 = chunks.iter().find(|c| c.role == ChunkRole::Heading).unwrap();
        assert_eq!(h1.hash, content_hash("Hi"));
        assert_eq!(h1.hash.len(), 64);
    }
}
