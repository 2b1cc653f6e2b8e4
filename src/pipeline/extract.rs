//! Document extraction: PDF via pdfium, DOCX via zip (see [`crate::pipeline::docx`]).
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and is CPU-bound; DOCX parsing is synchronous XML work. Both run in
//! `tokio::task::spawn_blocking` so the HTTP workers never stall while a
//! large upload is being parsed.
//!
//! ## Why blocks, not HTML?
//!
//! Extraction produces a flat list of [`Block`]s. HTML assembly lives in
//! [`crate::pipeline::html`] so escaping and layout rules are tested once,
//! independent of which parser produced the text.

use crate::error::BeautifyError;
use crate::pipeline::docx::extract_docx_blocking;
use crate::pipeline::encode::png_bytes;
use crate::pipeline::input::DocumentKind;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Upper bound on images pulled out of a single document.
pub(crate) const MAX_IMAGES: usize = 64;
/// Images smaller than this on both edges are decorations (bullets, rules).
const MIN_IMAGE_EDGE: u32 = 16;
/// Lines at least this long are treated as wrapped paragraph lines.
const WRAP_RATIO: f32 = 0.6;

/// One structural unit of extracted content.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Heading { level: u8, text: String },
    Paragraph(String),
    Table(Vec<Vec<String>>),
    /// Index into [`ExtractedDocument::images`].
    Image(usize),
    /// Start of a PDF page (1-indexed).
    Page(usize),
}

/// An embedded image ready to be inlined as a `data:` URI.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedImage {
    pub name: String,
    pub mime: &'static str,
    pub bytes: Vec<u8>,
}

/// Everything pulled out of an uploaded document.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedDocument {
    pub kind: DocumentKind,
    pub title: Option<String>,
    pub blocks: Vec<Block>,
    pub images: Vec<ExtractedImage>,
    pub page_count: Option<usize>,
}

/// Extract a staged PDF or DOCX file.
///
/// `name` is the client-facing file name, used only in error messages.
pub async fn extract(
    path: &Path,
    name: &str,
    kind: DocumentKind,
) -> Result<ExtractedDocument, BeautifyError> {
    let path = path.to_path_buf();
    let name = name.to_string();

    tokio::task::spawn_blocking(move || match kind {
        DocumentKind::Pdf => extract_pdf_blocking(&path, &name),
        DocumentKind::Docx => extract_docx_blocking(&path, &name),
        DocumentKind::Html => Err(BeautifyError::Internal(
            "HTML uploads are not extracted".into(),
        )),
    })
    .await
    .map_err(|e| BeautifyError::Internal(format!("Extraction task panicked: {}", e)))?
}

// ── PDF ───────────────────────────────────────────────────────────────────

/// Bind to pdfium: `PDFIUM_LIB_PATH`, then `./`, then the system library.
fn bind_pdfium() -> Result<Pdfium, BeautifyError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(p) if !p.trim().is_empty() => {
            let p = PathBuf::from(p.trim());
            if p.is_dir() {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&p))
            } else {
                Pdfium::bind_to_library(&p)
            }
        }
        _ => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| BeautifyError::PdfiumBindingFailed(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}

fn extract_pdf_blocking(path: &Path, name: &str) -> Result<ExtractedDocument, BeautifyError> {
    let pdfium = bind_pdfium()?;

    let document = pdfium.load_pdf_from_file(path, None).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.contains("Password") || err_str.contains("password") {
            BeautifyError::EncryptedPdf {
                name: name.to_string(),
            }
        } else {
            BeautifyError::CorruptPdf {
                name: name.to_string(),
                detail: err_str,
            }
        }
    })?;

    let title = document
        .metadata()
        .get(PdfDocumentMetadataTagType::Title)
        .map(|t| t.value().trim().to_string())
        .filter(|t| !t.is_empty());

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF '{}' loaded: {} pages", name, total_pages);

    let mut blocks = Vec::new();
    let mut images = Vec::new();

    for (idx, page) in pages.iter().enumerate() {
        let page_num = idx + 1;
        blocks.push(Block::Page(page_num));

        match page.text() {
            Ok(text) => {
                let paragraphs = paragraphs_from_page_text(&text.all());
                debug!("Page {}: {} paragraphs", page_num, paragraphs.len());
                blocks.extend(paragraphs.into_iter().map(Block::Paragraph));
            }
            Err(e) => warn!("Page {}: text extraction failed: {:?}", page_num, e),
        }

        for object in page.objects().iter() {
            if images.len() >= MAX_IMAGES {
                break;
            }
            let Some(image_object) = object.as_image_object() else {
                continue;
            };
            let image = match image_object.get_raw_image() {
                Ok(img) => img,
                Err(e) => {
                    debug!("Page {}: skipping unreadable image: {:?}", page_num, e);
                    continue;
                }
            };
            if image.width() < MIN_IMAGE_EDGE && image.height() < MIN_IMAGE_EDGE {
                continue;
            }
            match png_bytes(&image) {
                Ok(bytes) => {
                    blocks.push(Block::Image(images.len()));
                    images.push(ExtractedImage {
                        name: format!("page{}-image{}.png", page_num, images.len() + 1),
                        mime: "image/png",
                        bytes,
                    });
                }
                Err(e) => warn!("Page {}: failed to encode image: {}", page_num, e),
            }
        }
    }

    Ok(ExtractedDocument {
        kind: DocumentKind::Pdf,
        title,
        blocks,
        images,
        page_count: Some(total_pages),
    })
}

pub(crate) fn ends_sentence(line: &str) -> bool {
    line.trim_end()
        .chars()
        .last()
        .is_some_and(|c| matches!(c, '.' | ':' | '!' | '?' | '。' | '：' | '！' | '？' | '；'))
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32, 0x3000..=0x303F | 0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xFF00..=0xFFEF)
}

fn join_wrapped(buf: &mut String, line: &str) {
    if buf.is_empty() {
        buf.push_str(line);
        return;
    }
    if let Some(stripped) = buf.strip_suffix('-') {
        // hyphenated line break
        let keep = stripped.len();
        buf.truncate(keep);
        buf.push_str(line);
        return;
    }
    let prev_cjk = buf.chars().last().is_some_and(is_cjk);
    let next_cjk = line.chars().next().is_some_and(is_cjk);
    if !(prev_cjk && next_cjk) {
        buf.push(' ');
    }
    buf.push_str(line);
}

/// Rebuild paragraphs from pdfium's line-oriented page text.
///
/// pdfium emits one line per visual line. Blank lines always end a
/// paragraph; otherwise a line is joined to the next when it is close to
/// full width and does not end a sentence.
pub fn paragraphs_from_page_text(text: &str) -> Vec<String> {
    let normalised = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = Vec::new();

    for group in normalised.split("\n\n") {
        let lines: Vec<&str> = group
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        if lines.is_empty() {
            continue;
        }
        let widest = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0);
        let wrap_at = (widest as f32 * WRAP_RATIO) as usize;

        let mut current = String::new();
        for line in lines {
            join_wrapped(&mut current, line);
            let full_width = line.chars().count() >= wrap_at;
            if ends_sentence(line) || !full_width {
                out.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            out.push(current);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_lines_are_joined() {
        let text = "This is a long line that wraps onto\r\nthe next line of the page.\r\nShort one\r\nAnother";
        let paras = paragraphs_from_page_text(text);
        assert_eq!(
            paras,
            vec![
                "This is a long line that wraps onto the next line of the page.",
                "Short one",
                "Another"
            ]
        );
    }

    #[test]
    fn blank_lines_split_paragraphs() {
        let paras = paragraphs_from_page_text("First block\n\nSecond block\n\n\n");
        assert_eq!(paras, vec!["First block", "Second block"]);
    }

    #[test]
    fn hyphenation_and_cjk_joining() {
        let mut buf = String::from("inter-");
        join_wrapped(&mut buf, "national");
        assert_eq!(buf, "international");

        let mut buf = String::from("文档美化");
        join_wrapped(&mut buf, "服务");
        assert_eq!(buf, "文档美化服务");
    }

    #[tokio::test]
    async fn corrupt_docx_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.docx");
        std::fs::write(&path, b"PK\x03\x04 not really a zip").unwrap();
        let err = extract(&path, "broken.docx", DocumentKind::Docx).await.unwrap_err();
        assert!(matches!(err, BeautifyError::CorruptDocx { .. }), "got {err:?}");
    }
}
