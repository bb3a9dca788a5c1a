//! Markdown helpers shared by duplicate detection, moderation and sync
//! normalisation.

use once_cell::sync::Lazy;
use regex::Regex;

/// `![alt](url)` or `![alt](url "title")`
static MARKDOWN_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"!\[[^\]]*\]\(\s*<?([^)\s>]+)>?(?:\s+"[^"]*")?\s*\)"#)
        .unwrap_or_else(|e| unreachable!("markdown image pattern: {e}"))
});

/// `<img ... src="url" ...>`, the form GitHub inserts for drag-and-drop uploads.
static HTML_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<img\b[^>]*?\bsrc\s*=\s*["']([^"']+)["'][^>]*>"#)
        .unwrap_or_else(|e| unreachable!("html image pattern: {e}"))
});

/// Whitespace, punctuation (ASCII, full-width, CJK, brackets) and symbols.
static NON_CONTENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\s\p{P}\p{S}]+").unwrap_or_else(|e| unreachable!("punctuation pattern: {e}"))
});

/// Returns every embedded image URL in document order, without duplicates.
pub fn extract_image_urls(body: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = MARKDOWN_IMAGE
        .captures_iter(body)
        .chain(HTML_IMAGE.captures_iter(body))
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let url = caps.get(1)?;
            Some((whole.start(), url.as_str().trim().to_string()))
        })
        .collect();
    found.sort_by_key(|(pos, _)| *pos);

    let mut urls: Vec<String> = Vec::with_capacity(found.len());
    for (_, url) in found {
        if !url.is_empty() && !urls.contains(&url) {
            urls.push(url);
        }
    }
    urls
}

pub fn has_image(body: &str) -> bool {
    MARKDOWN_IMAGE.is_match(body) || HTML_IMAGE.is_match(body)
}

/// Removes image embeds and trims the remaining text.
pub fn strip_images(body: &str) -> String {
    let without_md = MARKDOWN_IMAGE.replace_all(body, " ");
    let without_html = HTML_IMAGE.replace_all(&without_md, " ");
    without_html.trim().to_string()
}

/// Text form used for edit-distance comparison: lower-cased with
/// whitespace, punctuation and symbols removed.
pub fn normalize_text(text: &str) -> String {
    NON_CONTENT.replace_all(&text.to_lowercase(), "").into_owned()
}
