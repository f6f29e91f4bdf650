//! Page metadata extraction from a parsed HTML tree.
//!
//! Walks the document in pre-order with an explicit stack, collecting:
//! - the first `<title>` directly under `<head>`
//! - `<meta name="description">` (last one wins)
//! - `<meta name="keywords">`, split on commas and appended in order; empty
//!   entries are kept
//!
//! The walk stops as soon as all three are present.

use linkshelf_shared::{Cancellation, ExtractedMetadata, LinkshelfError, Result};
use scraper::Html;
use scraper::node::Element;

/// Parse an HTML document. html5ever recovers from malformed markup, so this
/// never fails.
pub fn parse_document(body: &str) -> Html {
    Html::parse_document(body)
}

/// Extract metadata from a parsed document, checking `cancel` at every node.
pub fn extract(doc: &Html, cancel: &Cancellation) -> Result<ExtractedMetadata> {
    extract_with(doc, || cancel.is_cancelled())
}

/// Parse `body` and extract its metadata.
pub fn extract_from_str(body: &str, cancel: &Cancellation) -> Result<ExtractedMetadata> {
    extract(&parse_document(body), cancel)
}

fn extract_with(doc: &Html, mut is_cancelled: impl FnMut() -> bool) -> Result<ExtractedMetadata> {
    let mut meta = ExtractedMetadata::default();
    let mut stack = vec![doc.tree.root()];

    while let Some(node) = stack.pop() {
        if is_cancelled() {
            return Err(LinkshelfError::Cancelled);
        }

        if let Some(element) = node.value().as_element() {
            match element.name() {
                "meta" => apply_meta(&mut meta, element),
                "title" if meta.title.is_empty() => {
                    let in_head = node
                        .parent()
                        .and_then(|p| p.value().as_element().map(|e| e.name() == "head"))
                        .unwrap_or(false);
                    if in_head {
                        meta.title = node
                            .first_child()
                            .and_then(|c| c.value().as_text().map(|t| t.to_string()))
                            .unwrap_or_default();
                    }
                }
                _ => {}
            }
        }

        if meta.is_complete() {
            break;
        }

        // Reversed so the leftmost child is visited next
        stack.extend(node.children().rev());
    }

    Ok(meta)
}

fn apply_meta(meta: &mut ExtractedMetadata, element: &Element) {
    if element.attrs().count() < 2 {
        return;
    }

    let name = element.attr("name").map(str::to_ascii_lowercase);
    let content = element.attr("content").unwrap_or_default();

    match name.as_deref() {
        Some("description") => meta.description = content.to_string(),
        Some("keywords") => meta
            .tags
            .extend(content.split(',').map(str::trim).map(str::to_string)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_fixture(name: &str) -> String {
        let path = format!("../../../fixtures/html/{name}");
        std::fs::read_to_string(&path).unwrap_or_else(|_| panic!("missing fixture: {path}"))
    }

    fn extract_str(html: &str) -> ExtractedMetadata {
        extract_from_str(html, &Cancellation::new()).expect("extract")
    }

    #[test]
    fn canonical_document() {
        let meta = extract_str(
            r#"<html><head><title>T</title><meta name="description" content="D"><meta name="keywords" content="a, b , c"></head></html>"#,
        );
        assert_eq!(
            meta,
            ExtractedMetadata {
                title: "T".into(),
                description: "D".into(),
                tags: vec!["a".into(), "b".into(), "c".into()],
            }
        );
    }

    #[test]
    fn article_fixture() {
        let meta = extract_str(&load_fixture("article.html"));
        assert_eq!(meta.title, "Understanding Ownership");
        assert_eq!(
            meta.description,
            "How Rust manages memory without a garbage collector."
        );
        assert_eq!(
            meta.tags,
            vec!["rust", "ownership", "borrowing", "", "lifetimes"]
        );
    }

    #[test]
    fn bare_fixture_yields_defaults() {
        let meta = extract_str(&load_fixture("bare.html"));
        assert_eq!(meta, ExtractedMetadata::default());
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let meta = extract_str("<html><head><title>Only a title</title></head><body></body></html>");
        assert_eq!(meta.title, "Only a title");
        assert!(meta.description.is_empty());
        assert!(meta.tags.is_empty());

        assert_eq!(extract_str(""), ExtractedMetadata::default());
    }

    #[test]
    fn meta_name_is_case_insensitive() {
        let meta = extract_str(
            r#"<head><meta NAME="KeyWords" content="x,y"><meta name="DESCRIPTION" content="d"></head>"#,
        );
        assert_eq!(meta.tags, vec!["x", "y"]);
        assert_eq!(meta.description, "d");
    }

    #[test]
    fn meta_needs_two_attributes() {
        let meta = extract_str(r#"<head><meta name="keywords"><meta content="a,b"></head>"#);
        assert!(meta.tags.is_empty());
    }

    #[test]
    fn keywords_accumulate_across_tags() {
        let meta = extract_str(
            r#"<head><meta name="keywords" content="a, b"><meta name="keywords" content=" c ,, "></head>"#,
        );
        assert_eq!(meta.tags, vec!["a", "b", "c", "", ""]);
    }

    #[test]
    fn empty_keyword_entries_are_kept() {
        let meta = extract_str(r#"<head><meta name="keywords" content="a, , b"></head>"#);
        assert_eq!(meta.tags, vec!["a", "", "b"]);
    }

    #[test]
    fn empty_keywords_content_completes_extraction() {
        let html = r#"<html><head>
            <title>T</title>
            <meta name="description" content="D">
            <meta name="keywords" content="">
            <meta name="keywords" content="late">
        </head></html>"#;
        let meta = extract_str(html);
        assert_eq!(meta.tags, vec![""]);
    }

    #[test]
    fn title_text_is_kept_verbatim() {
        let meta = extract_str("<head><title>  Spaced Out \n</title></head>");
        assert_eq!(meta.title, "  Spaced Out \n");
    }

    #[test]
    fn last_description_wins() {
        let meta = extract_str(
            r#"<head><meta name="description" content="first"><meta name="description" content="second"></head>"#,
        );
        assert_eq!(meta.description, "second");
    }

    #[test]
    fn title_outside_head_ignored() {
        let meta = extract_str(
            r#"<html><head></head><body><svg><title>icon</title></svg><title>stray</title></body></html>"#,
        );
        assert!(meta.title.is_empty());
    }

    #[test]
    fn stops_once_complete() {
        let html = r#"<html><head>
            <title>First</title>
            <meta name="description" content="D">
            <meta name="keywords" content="k">
            <title>Second</title>
            <meta name="keywords" content="late">
        </head></html>"#;
        let meta = extract_str(html);
        assert_eq!(meta.title, "First");
        assert_eq!(meta.tags, vec!["k"]);
    }

    #[test]
    fn first_title_wins_while_incomplete() {
        let meta = extract_str("<head><title>One</title><title>Two</title></head>");
        assert_eq!(meta.title, "One");
    }

    #[test]
    fn deep_nesting_does_not_overflow() {
        let depth = 5_000;
        let mut html = String::from("<html><head><title>Deep</title></head><body>");
        html.push_str(&"<div>".repeat(depth));
        html.push_str(r#"<meta name="keywords" content="bottom">"#);
        html.push_str(&"</div>".repeat(depth));
        html.push_str("</body></html>");

        let meta = extract_str(&html);
        assert_eq!(meta.title, "Deep");
        assert_eq!(meta.tags, vec!["bottom"]);
    }

    #[test]
    fn cancelled_mid_traversal() {
        let doc = parse_document(
            r#"<html><head><title>T</title></head><body><p>a</p><p>b</p><p>c</p></body></html>"#,
        );
        let mut visited = 0;
        let result = extract_with(&doc, || {
            visited += 1;
            visited > 4
        });
        assert!(matches!(result, Err(LinkshelfError::Cancelled)));
    }

    #[test]
    fn cancelled_before_start() {
        let cancel = Cancellation::new();
        cancel.cancel();
        let result = extract_from_str("<head><title>T</title></head>", &cancel);
        assert!(matches!(result, Err(LinkshelfError::Cancelled)));
    }
}
