//! HTML assembly, image bookkeeping and chunking.
//!
//! ## Why stash images before the LLM call?
//!
//! Embedded images travel as `data:` URIs, which can be megabytes of base64.
//! Sending them to the model wastes tokens and invites the model to mangle
//! them. [`stash_images`] swaps every image source (embedded, relative or
//! remote) for a short `docimg:<n>` token and [`restore_images`] puts the
//! originals back after the model has answered. Any other source in the
//! model's answer was invented by the model.
//!
//! ## Why split at top-level boundaries only?
//!
//! Each chunk is restyled independently and then concatenated. Cutting inside
//! an element would hand the model unbalanced markup and produce broken HTML
//! after stitching, so chunks only end where nesting depth returns to zero.
//! A single oversized top-level element becomes a chunk of its own.

use crate::error::BeautifyError;
use crate::pipeline::encode::data_uri;
use crate::pipeline::extract::{Block, ExtractedDocument};
use once_cell::sync::Lazy;
use regex::Regex;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

/// Base stylesheet for assembled documents. The model may override it.
const BASE_CSS: &str = "body{max-width:860px;margin:2rem auto;padding:0 1rem;\
font-family:-apple-system,'Segoe UI','PingFang SC','Microsoft YaHei',sans-serif;line-height:1.6;color:#222}\
table{border-collapse:collapse;width:100%;margin:1rem 0}td,th{border:1px solid #ccc;padding:.4rem .6rem}\
figure{margin:1rem 0;text-align:center}figure img{max-width:100%}hr.page-break{border:0;border-top:1px dashed #ddd;margin:2rem 0}";

/// Escape text for use in element content or a quoted attribute.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn escape_multiline(text: &str) -> String {
    text.lines().map(escape).collect::<Vec<_>>().join("<br>")
}

/// Render extracted blocks as an HTML body fragment.
pub fn render_body(doc: &ExtractedDocument) -> String {
    let mut out = String::new();
    let has_heading = doc.blocks.iter().any(|b| matches!(b, Block::Heading { level: 1, .. }));

    if let (Some(title), false) = (&doc.title, has_heading) {
        out.push_str(&format!("<h1>{}</h1>\n", escape(title)));
    }

    for block in &doc.blocks {
        match block {
            Block::Heading { level, text } => {
                let level = (*level).clamp(1, 6);
                out.push_str(&format!("<h{level}>{}</h{level}>\n", escape(text)));
            }
            Block::Paragraph(text) => {
                out.push_str(&format!("<p>{}</p>\n", escape_multiline(text)));
            }
            Block::Table(rows) => {
                out.push_str("<table>\n<tbody>\n");
                for row in rows {
                    out.push_str("<tr>");
                    for cell in row {
                        out.push_str(&format!("<td>{}</td>", escape_multiline(cell)));
                    }
                    out.push_str("</tr>\n");
                }
                out.push_str("</tbody>\n</table>\n");
            }
            Block::Image(idx) => {
                if let Some(img) = doc.images.get(*idx) {
                    out.push_str(&format!(
                        "<figure><img src=\"{}\" alt=\"{}\"></figure>\n",
                        data_uri(img.mime, &img.bytes),
                        escape(&img.name)
                    ));
                }
            }
            Block::Page(n) if *n > 1 => {
                out.push_str(&format!("<hr class=\"page-break\" data-page=\"{n}\">\n"));
            }
            Block::Page(_) => {}
        }
    }
    out
}

/// Wrap a body fragment into a standalone HTML document.
pub fn wrap_document(title: Option<&str>, body: &str) -> String {
    let title = escape(title.unwrap_or("Document"));
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{title}</title>\n<style>{BASE_CSS}</style>\n</head>\n<body>\n{}\n</body>\n</html>\n",
        body.trim()
    )
}

// ── Images ────────────────────────────────────────────────────────────────

static RE_IMG_SRC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<img\b[^>]*?\bsrc\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap()
});

static RE_DOCIMG: Lazy<Regex> = Lazy::new(|| Regex::new(r"docimg:(\d+)").unwrap());

/// An `<img>` source found in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// 0-based position among all `<img>` elements.
    pub index: usize,
    pub src: String,
    /// Byte range of the `src` value inside the document.
    pub span: (usize, usize),
}

impl ImageRef {
    pub fn is_data_uri(&self) -> bool {
        self.src.starts_with("data:")
    }
}

/// Find every `<img>` with a quoted `src` attribute, in document order.
pub fn find_images(html: &str) -> Vec<ImageRef> {
    RE_IMG_SRC
        .captures_iter(html)
        .enumerate()
        .filter_map(|(index, caps)| {
            let m = caps.get(1).or_else(|| caps.get(2))?;
            Some(ImageRef {
                index,
                src: m.as_str().to_string(),
                span: (m.start(), m.end()),
            })
        })
        .collect()
}

/// Replace the `src` of the `index`-th image.
pub fn replace_image_src(html: &str, index: usize, new_src: &str) -> Result<String, BeautifyError> {
    let images = find_images(html);
    let img = images.get(index).ok_or_else(|| {
        BeautifyError::InvalidRequest(format!(
            "image index {} out of range (document has {} images)",
            index,
            images.len()
        ))
    })?;
    let (start, end) = img.span;
    Ok(format!("{}{}{}", &html[..start], escape(new_src), &html[end..]))
}

/// Swap every image source for a `docimg:<n>` token.
pub fn stash_images(html: &str) -> (String, Vec<String>) {
    let mut stash = Vec::new();
    let mut out = String::with_capacity(html.len());
    let mut last = 0;
    for img in find_images(html) {
        let (start, end) = img.span;
        out.push_str(&html[last..start]);
        out.push_str(&format!("docimg:{}", stash.len()));
        stash.push(img.src);
        last = end;
    }
    out.push_str(&html[last..]);
    (out, stash)
}

/// Put stashed sources back. Unknown tokens are left as they are.
pub fn restore_images(html: &str, stash: &[String]) -> String {
    RE_DOCIMG
        .replace_all(html, |caps: &regex::Captures<'_>| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|i| stash.get(i))
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .to_string()
}

// ── Chunking ──────────────────────────────────────────────────────────────

static RE_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<!--.*?-->|<(/?)([a-zA-Z][a-zA-Z0-9-]*)\b[^>]*?(/?)>").unwrap()
});

/// Byte offsets where nesting depth returns to zero.
fn top_level_boundaries(html: &str) -> Vec<usize> {
    let mut depth: usize = 0;
    let mut boundaries = Vec::new();
    for caps in RE_TAG.captures_iter(html) {
        let Some(whole) = caps.get(0) else { continue };
        let Some(name) = caps.get(2) else {
            // comment
            if depth == 0 {
                boundaries.push(whole.end());
            }
            continue;
        };
        let name = name.as_str().to_ascii_lowercase();
        let closing = caps.get(1).is_some_and(|m| !m.as_str().is_empty());
        let self_closing = caps.get(3).is_some_and(|m| !m.as_str().is_empty());

        if closing {
            depth = depth.saturating_sub(1);
        } else if !self_closing && !VOID_ELEMENTS.contains(&name.as_str()) {
            depth += 1;
            continue;
        }
        if depth == 0 {
            boundaries.push(whole.end());
        }
    }
    boundaries
}

/// Split an HTML fragment into chunks of at most `max_chars` characters,
/// cutting only between top-level elements.
pub fn split_chunks(html: &str, max_chars: usize) -> Vec<String> {
    let mut segments = Vec::new();
    let mut last = 0;
    for b in top_level_boundaries(html) {
        segments.push(&html[last..b]);
        last = b;
    }
    segments.push(&html[last..]);

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0;
    for seg in segments {
        let seg_chars = seg.chars().count();
        if current_chars > 0 && current_chars + seg_chars > max_chars && !current.trim().is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_chars = 0;
        }
        current.push_str(seg);
        current_chars += seg_chars;
    }
    if !current.trim().is_empty() {
        chunks.push(current);
    }

    chunks
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}
