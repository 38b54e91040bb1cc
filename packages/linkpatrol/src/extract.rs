//! HTML link/anchor extraction.
//!
//! Pure functions over HTML fragments: no state, restartable. Parsing is
//! lenient (malformed HTML is handled best-effort by html5ever); the only
//! hard failure is a fetched body that cannot be decoded, which callers
//! must distinguish from "anchor not found".

use std::collections::HashSet;

use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("response body is not valid UTF-8: {0}")]
    Decode(#[from] std::str::Utf8Error),
}

fn selector(css: &str) -> Selector {
    // Selectors are compile-time constants; a parse failure is a bug.
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid selector {css:?}: {e:?}"))
}

/// Display text for a link: all descendant text, with ` [image:<src>] `
/// standing in for any image nested inside the anchor.
fn link_text(element: ElementRef) -> String {
    let mut text = String::new();
    for node in element.descendants() {
        match node.value() {
            Node::Text(t) => text.push_str(t),
            Node::Element(el) if el.name() == "img" => {
                if let Some(src) = el.attr("src") {
                    text.push_str(&format!(" [image:{src}] "));
                }
            }
            _ => {}
        }
    }
    text
}

/// Extract `(display_text, href)` pairs for every `<a href=...>`, in
/// document order. Anchors without an `href` attribute yield nothing.
pub fn extract_links(html: &str) -> Vec<(String, String)> {
    let fragment = Html::parse_fragment(html);
    let anchors = selector("a[href]");
    fragment
        .select(&anchors)
        .filter_map(|a| {
            a.value()
                .attr("href")
                .map(|href| (link_text(a), href.to_string()))
        })
        .collect()
}

/// Extract `("", src)` pairs for every `<img src=...>`, regardless of
/// anchor nesting, in document order.
pub fn extract_images(html: &str) -> Vec<(String, String)> {
    let fragment = Html::parse_fragment(html);
    let images = selector("img[src]");
    fragment
        .select(&images)
        .filter_map(|img| {
            img.value()
                .attr("src")
                .map(|src| (String::new(), src.to_string()))
        })
        .collect()
}

/// All fragment targets in the document: every element's `id` attribute
/// plus every `<a name=...>`.
pub fn extract_anchor_names(html: &str) -> HashSet<String> {
    let fragment = Html::parse_fragment(html);
    let mut names = HashSet::new();
    for element in fragment.select(&selector("[id]")) {
        if let Some(id) = element.value().attr("id") {
            names.insert(id.to_string());
        }
    }
    for element in fragment.select(&selector("a[name]")) {
        if let Some(name) = element.value().attr("name") {
            names.insert(name.to_string());
        }
    }
    names
}

/// Anchor names from a fetched response body. A body that is not text is a
/// decode error, not an empty set.
pub fn anchor_names_from_bytes(body: &[u8]) -> Result<HashSet<String>, ExtractError> {
    let html = std::str::from_utf8(body)?;
    Ok(extract_anchor_names(html))
}

/// Decode the few HTML entities that show up in attribute-sourced paths.
/// This does not strip tags.
pub fn html_decode(s: &str) -> String {
    s.replace("&#39;", "'")
        .replace("&quot;", "\"")
        .replace("&gt;", ">")
        .replace("&lt;", "<")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_links_in_document_order() {
        let html = r#"<p><a href="/one/">One</a> and <a href="/two/">Two</a>
            and <a href="/three/">Three</a></p>"#;
        let links = extract_links(html);
        assert_eq!(links.len(), 3);
        assert_eq!(links[0], ("One".to_string(), "/one/".to_string()));
        assert_eq!(links[1], ("Two".to_string(), "/two/".to_string()));
        assert_eq!(links[2], ("Three".to_string(), "/three/".to_string()));
    }

    #[test]
    fn test_anchor_without_href_is_skipped() {
        let html = r#"<a name="here">no href</a><a href="/x/">x</a>"#;
        let links = extract_links(html);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].1, "/x/");
    }

    #[test]
    fn test_nested_image_marker() {
        let html = r#"<a href="/home/">Go <img src="/logo.png"> home</a>"#;
        let links = extract_links(html);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].0, "Go  [image:/logo.png]  home");
    }

    #[test]
    fn test_extract_images_regardless_of_nesting() {
        let html = r#"<a href="/x/"><img src="/a.png"></a><img src="/b.png">"#;
        let images = extract_images(html);
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].1, "/a.png");
        assert_eq!(images[1].1, "/b.png");
    }

    #[test]
    fn test_extract_anchor_names() {
        let html = r#"<h2 id="intro">Intro</h2><a name="old-style"></a>
            <div id="details"></div>"#;
        let names = extract_anchor_names(html);
        assert!(names.contains("intro"));
        assert!(names.contains("old-style"));
        assert!(names.contains("details"));
        assert_eq!(names.len(), 3);
    }

    #[test]
    fn test_anchor_names_from_invalid_bytes() {
        let body = [0xff, 0xfe, 0x00, 0x01];
        assert!(anchor_names_from_bytes(&body).is_err());
    }

    #[test]
    fn test_anchor_names_from_bytes_ok() {
        let names = anchor_names_from_bytes(b"<p id=\"p1\"></p>").unwrap();
        assert!(names.contains("p1"));
    }

    #[test]
    fn test_html_decode() {
        assert_eq!(html_decode("a&amp;b &quot;c&quot;"), "a&b \"c\"");
        assert_eq!(html_decode("<p>kept</p>"), "<p>kept</p>");
    }
}
