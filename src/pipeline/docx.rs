//! DOCX extraction: a body-order walk over `word/document.xml`.
//!
//! ## Why walk the XML instead of using a DOCX model?
//!
//! Readers expect headings, tables and pictures where the author put them.
//! Walking the body tags in document order keeps a table between the
//! paragraphs that introduce and discuss it, and keeps an inline picture next
//! to its caption. Heading levels come from the paragraph style, resolved
//! through `word/styles.xml` (localized Word writes style ids such as `1`
//! whose display name is "heading 1"), or from an explicit outline level.
//! Pictures are resolved through `word/_rels/document.xml.rels` and read from
//! `word/media/` only when the body references them.

use crate::error::BeautifyError;
use crate::pipeline::extract::{ends_sentence, Block, ExtractedDocument, ExtractedImage, MAX_IMAGES};
use crate::pipeline::input::DocumentKind;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::io::{Read, Seek};
use std::path::Path;
use tracing::{debug, info, warn};

const DOCUMENT_XML: &str = "word/document.xml";
const STYLES_XML: &str = "word/styles.xml";
const DOCUMENT_RELS: &str = "word/_rels/document.xml.rels";
const CORE_XML: &str = "docProps/core.xml";

static RE_XML_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<(/?)([A-Za-z][\w.-]*(?::[\w.-]+)?)([^>]*?)(/?)>").unwrap());
static RE_CORE_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<dc:title>(.*?)</dc:title>").unwrap());
static RE_STYLE_DEF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<w:style\b([^>]*)>(.*?)</w:style>").unwrap());
static RE_STYLE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<w:name\b[^>]*\bw:val\s*=\s*"([^"]*)""#).unwrap());
static RE_RELATIONSHIP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<Relationship\b([^>]*?)/?>").unwrap());

pub(crate) fn extract_docx_blocking(
    path: &Path,
    name: &str,
) -> Result<ExtractedDocument, BeautifyError> {
    let corrupt = |detail: String| BeautifyError::CorruptDocx {
        name: name.to_string(),
        detail,
    };

    let file = std::fs::File::open(path).map_err(|e| corrupt(e.to_string()))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| corrupt(e.to_string()))?;

    let body = read_text(&mut archive, DOCUMENT_XML)
        .ok_or_else(|| corrupt(format!("missing {}", DOCUMENT_XML)))?;
    let styles = read_text(&mut archive, STYLES_XML)
        .map(|xml| parse_style_names(&xml))
        .unwrap_or_default();
    let rels = read_text(&mut archive, DOCUMENT_RELS)
        .map(|xml| parse_relationships(&xml))
        .unwrap_or_default();
    let core_title = read_core_title(&mut archive);

    let mut images: Vec<ExtractedImage> = Vec::new();
    let mut loaded: HashMap<String, usize> = HashMap::new();
    let mut blocks = body_blocks(&body, &styles, |rel_id| {
        let target = rels.get(rel_id)?;
        if let Some(&idx) = loaded.get(target) {
            return Some(idx);
        }
        if images.len() >= MAX_IMAGES {
            return None;
        }
        let Some(mime) = media_mime(target) else {
            debug!("Skipping media '{}': not a web image format", target);
            return None;
        };
        let bytes = read_bytes(&mut archive, target)?;
        let idx = images.len();
        images.push(ExtractedImage {
            name: target.rsplit('/').next().unwrap_or(target.as_str()).to_string(),
            mime,
            bytes,
        });
        loaded.insert(target.clone(), idx);
        Some(idx)
    });

    let title = core_title.or_else(|| promote_title(&mut blocks));
    let tables = blocks.iter().filter(|b| matches!(b, Block::Table(_))).count();

    info!(
        "DOCX '{}' parsed: {} blocks, {} tables, {} images",
        name,
        blocks.len(),
        tables,
        images.len()
    );

    Ok(ExtractedDocument {
        kind: DocumentKind::Docx,
        title,
        blocks,
        images,
        page_count: None,
    })
}

// ── Body walk ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct OpenParagraph {
    text: String,
    style: Option<String>,
    outline: Option<u8>,
    images: Vec<usize>,
}

#[derive(Default)]
struct OpenTable {
    rows: Vec<Vec<String>>,
    row: Vec<String>,
    cell: Vec<String>,
    images: Vec<usize>,
}

/// Turn the body of `word/document.xml` into blocks, in document order.
///
/// `resolve_image` maps a relationship id to an index in the caller's image
/// list, or `None` when the picture cannot be shown.
pub(crate) fn body_blocks<F>(
    xml: &str,
    styles: &HashMap<String, String>,
    mut resolve_image: F,
) -> Vec<Block>
where
    F: FnMut(&str) -> Option<usize>,
{
    let mut blocks = Vec::new();
    let mut para: Option<OpenParagraph> = None;
    let mut para_depth = 0usize;
    let mut table: Option<OpenTable> = None;
    let mut table_depth = 0usize;
    let mut in_text = false;
    let mut last = 0;

    for caps in RE_XML_TAG.captures_iter(xml) {
        let Some(whole) = caps.get(0) else { continue };
        if in_text {
            if let Some(p) = para.as_mut() {
                p.text.push_str(&unescape_xml(&xml[last..whole.start()]));
            }
        }
        last = whole.end();

        let closing = !caps[1].is_empty();
        let self_closing = !caps[4].is_empty();
        let attrs = caps.get(3).map_or("", |m| m.as_str());

        match (&caps[2], closing) {
            ("w:p", false) if !self_closing => {
                para_depth += 1;
                if para_depth == 1 {
                    para = Some(OpenParagraph::default());
                }
            }
            ("w:p", true) => {
                para_depth = para_depth.saturating_sub(1);
                if para_depth == 0 {
                    if let Some(p) = para.take() {
                        finish_paragraph(p, styles, table.as_mut(), &mut blocks);
                    }
                }
            }
            ("w:t", false) => in_text = !self_closing,
            ("w:t", true) => in_text = false,
            ("w:tab", false) => push_text(para.as_mut(), "\t"),
            ("w:br" | "w:cr", false) => {
                // page breaks carry no text
                if attr(attrs, "w:type") != Some("page") {
                    push_text(para.as_mut(), "\n");
                }
            }
            ("w:pStyle", false) => {
                if let Some(p) = para.as_mut() {
                    p.style = attr(attrs, "w:val").map(str::to_string);
                }
            }
            ("w:outlineLvl", false) => {
                if let Some(p) = para.as_mut() {
                    p.outline = attr(attrs, "w:val").and_then(|v| v.parse().ok());
                }
            }
            ("a:blip", false) | ("v:imagedata", false) => {
                let rel_id = attr(attrs, "r:embed").or_else(|| attr(attrs, "r:id"));
                if let (Some(p), Some(idx)) = (para.as_mut(), rel_id.and_then(&mut resolve_image)) {
                    p.images.push(idx);
                }
            }
            ("w:tbl", false) if !self_closing => {
                table_depth += 1;
                if table_depth == 1 {
                    table = Some(OpenTable::default());
                }
            }
            ("w:tbl", true) => {
                table_depth = table_depth.saturating_sub(1);
                if table_depth == 0 {
                    if let Some(t) = table.take() {
                        if !t.rows.is_empty() {
                            blocks.push(Block::Table(t.rows));
                        }
                        blocks.extend(t.images.into_iter().map(Block::Image));
                    }
                }
            }
            // nested tables fold into the enclosing cell
            ("w:tc", true) if table_depth == 1 => {
                if let Some(t) = table.as_mut() {
                    let cell = std::mem::take(&mut t.cell).join("\n");
                    t.row.push(cell);
                }
            }
            ("w:tr", true) if table_depth == 1 => {
                if let Some(t) = table.as_mut() {
                    let row = std::mem::take(&mut t.row);
                    if !row.is_empty() {
                        t.rows.push(row);
                    }
                }
            }
            _ => {}
        }
    }
    blocks
}

fn push_text(para: Option<&mut OpenParagraph>, text: &str) {
    if let Some(p) = para {
        p.text.push_str(text);
    }
}

fn finish_paragraph(
    p: OpenParagraph,
    styles: &HashMap<String, String>,
    table: Option<&mut OpenTable>,
    blocks: &mut Vec<Block>,
) {
    let text = p.text.trim().to_string();

    if let Some(t) = table {
        if !text.is_empty() {
            t.cell.push(text);
        }
        t.images.extend(p.images);
        return;
    }

    if !text.is_empty() {
        let block = match heading_level(p.style.as_deref(), p.outline, styles) {
            Some(level) => Block::Heading { level, text },
            None => Block::Paragraph(text),
        };
        blocks.push(block);
    }
    blocks.extend(p.images.into_iter().map(Block::Image));
}

/// Heading level from a paragraph style id or an outline level (0-based).
fn heading_level(
    style: Option<&str>,
    outline: Option<u8>,
    styles: &HashMap<String, String>,
) -> Option<u8> {
    let from_style = style.and_then(|id| {
        let name = styles.get(id).map(String::as_str).unwrap_or(id);
        let normalised: String = name
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalised.as_str() {
            "title" => Some(1),
            "subtitle" => Some(2),
            other => other
                .strip_prefix("heading")
                .and_then(|n| n.parse::<u8>().ok())
                .filter(|n| (1..=9).contains(n))
                .map(|n| n.min(6)),
        }
    });
    // outline level 9 is body text
    from_style.or_else(|| outline.filter(|l| *l < 9).map(|l| (l + 1).min(6)))
}

// ── Package parts ─────────────────────────────────────────────────────────

/// Value of `name="…"` in a tag's attribute text.
fn attr<'a>(attrs: &'a str, name: &str) -> Option<&'a str> {
    let mut offset = 0;
    while let Some(pos) = attrs[offset..].find(name) {
        let start = offset + pos;
        let end = start + name.len();
        offset = end;
        if start > 0 && !attrs[..start].ends_with(char::is_whitespace) {
            continue;
        }
        let Some(rest) = attrs[end..].trim_start().strip_prefix('=') else {
            continue;
        };
        let rest = rest.trim_start();
        let Some(quote) = rest.chars().next().filter(|c| *c == '"' || *c == '\'') else {
            continue;
        };
        let value = &rest[1..];
        return value.find(quote).map(|close| &value[..close]);
    }
    None
}

fn unescape_xml(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').filter(|semi| *semi <= 10).and_then(|semi| {
            let c = match &tail[1..semi] {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                entity => entity
                    .strip_prefix('#')
                    .and_then(|n| match n.strip_prefix(['x', 'X']) {
                        Some(hex) => u32::from_str_radix(hex, 16).ok(),
                        None => n.parse().ok(),
                    })
                    .and_then(char::from_u32),
            };
            c.map(|c| (c, semi))
        });
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Style id → display name, from `word/styles.xml`.
fn parse_style_names(xml: &str) -> HashMap<String, String> {
    RE_STYLE_DEF
        .captures_iter(xml)
        .filter_map(|caps| {
            let id = attr(caps.get(1)?.as_str(), "w:styleId")?;
            let name = RE_STYLE_NAME.captures(caps.get(2)?.as_str())?.get(1)?.as_str();
            Some((id.to_string(), name.to_string()))
        })
        .collect()
}

/// Relationship id → archive path, for parts inside the package.
fn parse_relationships(xml: &str) -> HashMap<String, String> {
    RE_RELATIONSHIP
        .captures_iter(xml)
        .filter_map(|caps| {
            let attrs = caps.get(1)?.as_str();
            if attr(attrs, "TargetMode").is_some_and(|m| m.eq_ignore_ascii_case("external")) {
                return None;
            }
            let id = attr(attrs, "Id")?;
            let target = attr(attrs, "Target")?;
            Some((id.to_string(), package_path(target)))
        })
        .collect()
}

/// Resolve a relationship target against the `word/` directory.
fn package_path(target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut parts = vec!["word"];
    for segment in target.split('/') {
        match segment {
            ".." => {
                parts.pop();
            }
            "" | "." => {}
            s => parts.push(s),
        }
    }
    parts.join("/")
}

fn read_bytes<R: Read + Seek>(archive: &mut zip::ZipArchive<R>, name: &str) -> Option<Vec<u8>> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(e) => {
            warn!("Failed to open '{}': {}", name, e);
            return None;
        }
    };
    let mut bytes = Vec::new();
    match entry.read_to_end(&mut bytes) {
        Ok(_) => Some(bytes),
        Err(e) => {
            warn!("Failed to read '{}': {}", name, e);
            None
        }
    }
}

fn read_text<R: Read + Seek>(archive: &mut zip::ZipArchive<R>, name: &str) -> Option<String> {
    let mut entry = archive.by_name(name).ok()?;
    let mut xml = String::new();
    entry.read_to_string(&mut xml).ok()?;
    Some(xml)
}

fn read_core_title<R: Read + Seek>(archive: &mut zip::ZipArchive<R>) -> Option<String> {
    let xml = read_text(archive, CORE_XML)?;
    let raw = RE_CORE_TITLE.captures(&xml)?.get(1)?.as_str();
    let title = unescape_xml(raw).trim().to_string();
    (!title.is_empty()).then_some(title)
}

/// Title from the first block: a heading as is, or a short leading
/// paragraph promoted to `<h1>`.
fn promote_title(blocks: &mut [Block]) -> Option<String> {
    let first = blocks.first_mut()?;
    let text = match first {
        Block::Heading { text, .. } => return Some(text.clone()),
        Block::Paragraph(text) => text.clone(),
        _ => return None,
    };
    if text.chars().count() > 120 || ends_sentence(&text) {
        return None;
    }
    *first = Block::Heading {
        level: 1,
        text: text.clone(),
    };
    Some(text)
}

fn media_mime(name: &str) -> Option<&'static str> {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())?
        .to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        "webp" => Some("image/webp"),
        // emf/wmf and friends cannot be shown by browsers
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    const BODY: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>
<w:p><w:pPr><w:pStyle w:val="1"/></w:pPr><w:r><w:t>Quarterly Report</w:t></w:r></w:p>
<w:p><w:r><w:t xml:space="preserve">Intro &amp; </w:t></w:r><w:r><w:t>scope</w:t></w:r></w:p>
<w:tbl><w:tblPr/><w:tr><w:tc><w:p><w:r><w:t>Region</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:t>Sales</w:t></w:r></w:p></w:tc></w:tr>
<w:tr><w:tc><w:p><w:r><w:t>North</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:t>42</w:t></w:r></w:p></w:tc></w:tr></w:tbl>
<w:p><w:r><w:t>After the table.</w:t></w:r></w:p>
<w:p><w:r><w:drawing><wp:inline><a:graphic><a:graphicData><pic:pic><pic:blipFill><a:blip r:embed="rId7"/></pic:blipFill></pic:pic></a:graphicData></a:graphic></wp:inline></w:drawing></w:r></w:p>
<w:p><w:r><w:t>Closing words.</w:t></w:r></w:p>
<w:sectPr/></w:body></w:document>"#;

    const STYLES: &str = r#"<w:styles><w:style w:type="paragraph" w:styleId="1"><w:name w:val="heading 1"/></w:style>
<w:style w:type="paragraph" w:styleId="Normal"><w:name w:val="Normal"/></w:style></w:styles>"#;

    const RELS: &str = r#"<Relationships><Relationship Id="rId7" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="media/image1.png"/>
<Relationship Id="rId9" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink" Target="https://x.io" TargetMode="External"/></Relationships>"#;

    fn write_docx(dir: &Path, parts: &[(&str, &[u8])]) -> std::path::PathBuf {
        let path = dir.join("sample.docx");
        let file = std::fs::File::create(&path).unwrap();
        let mut zw = zip::ZipWriter::new(file);
        let opts = SimpleFileOptions::default();
        for (name, bytes) in parts {
            zw.start_file(*name, opts).unwrap();
            zw.write_all(bytes).unwrap();
        }
        zw.finish().unwrap();
        path
    }

    #[test]
    fn blocks_follow_body_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_docx(
            dir.path(),
            &[
                (DOCUMENT_XML, BODY.as_bytes()),
                (STYLES_XML, STYLES.as_bytes()),
                (DOCUMENT_RELS, RELS.as_bytes()),
                ("word/media/image1.png", &b"png-1"[..]),
                ("word/media/unused.png", &b"png-2"[..]),
            ],
        );

        let doc = extract_docx_blocking(&path, "sample.docx").unwrap();
        assert_eq!(
            doc.blocks,
            vec![
                Block::Heading {
                    level: 1,
                    text: "Quarterly Report".into()
                },
                Block::Paragraph("Intro & scope".into()),
                Block::Table(vec![
                    vec!["Region".into(), "Sales".into()],
                    vec!["North".into(), "42".into()],
                ]),
                Block::Paragraph("After the table.".into()),
                Block::Image(0),
                Block::Paragraph("Closing words.".into()),
            ]
        );
        assert_eq!(doc.title.as_deref(), Some("Quarterly Report"));
        assert_eq!(doc.images.len(), 1);
        assert_eq!(doc.images[0].name, "image1.png");
        assert_eq!(doc.images[0].bytes, b"png-1");
    }

    #[test]
    fn core_title_wins_over_first_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_docx(
            dir.path(),
            &[
                (DOCUMENT_XML, BODY.as_bytes()),
                (
                    CORE_XML,
                    &b"<cp:coreProperties><dc:title> Q3 &amp; Q4 </dc:title></cp:coreProperties>"[..],
                ),
            ],
        );
        let doc = extract_docx_blocking(&path, "sample.docx").unwrap();
        assert_eq!(doc.title.as_deref(), Some("Q3 & Q4"));
        // no styles part: the localized id "1" is not a heading
        assert_eq!(doc.blocks[0], Block::Paragraph("Quarterly Report".into()));
        // no rels part: the picture is dropped
        assert!(doc.images.is_empty());
        assert!(!doc.blocks.iter().any(|b| matches!(b, Block::Image(_))));
    }

    #[test]
    fn missing_document_part_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_docx(dir.path(), &[("word/styles.xml", STYLES.as_bytes())]);
        let err = extract_docx_blocking(&path, "sample.docx").unwrap_err();
        assert!(matches!(err, BeautifyError::CorruptDocx { .. }), "got {err:?}");
    }

    #[test]
    fn heading_levels_from_style_and_outline() {
        let styles = parse_style_names(STYLES);
        assert_eq!(heading_level(Some("1"), None, &styles), Some(1));
        assert_eq!(heading_level(Some("Heading3"), None, &styles), Some(3));
        assert_eq!(heading_level(Some("heading 8"), None, &styles), Some(6));
        assert_eq!(heading_level(Some("Title"), None, &styles), Some(1));
        assert_eq!(heading_level(Some("Normal"), None, &styles), None);
        assert_eq!(heading_level(None, Some(1), &styles), Some(2));
        assert_eq!(heading_level(None, Some(9), &styles), None);
    }

    #[test]
    fn breaks_and_nested_tables() {
        let xml = r#"<w:body>
<w:p><w:r><w:t>line one</w:t><w:br/><w:t>line two</w:t><w:br w:type="page"/></w:r></w:p>
<w:tbl><w:tr><w:tc><w:p><w:r><w:t>outer</w:t></w:r></w:p>
<w:tbl><w:tr><w:tc><w:p><w:r><w:t>inner</w:t></w:r></w:p></w:tc></w:tr></w:tbl>
</w:tc></w:tr></w:tbl></w:body>"#;
        let blocks = body_blocks(xml, &HashMap::new(), |_| None);
        assert_eq!(
            blocks,
            vec![
                Block::Paragraph("line one\nline two".into()),
                Block::Table(vec![vec!["outer\ninner".into()]]),
            ]
        );
    }

    #[test]
    fn image_inside_table_follows_the_table() {
        let xml = r#"<w:tbl><w:tr><w:tc><w:p><w:r><w:t>cell</w:t></w:r>
<w:r><w:pict><v:shape><v:imagedata r:id="rId3" o:title=""/></v:shape></w:pict></w:r></w:p></w:tc></w:tr></w:tbl>"#;
        let blocks = body_blocks(xml, &HashMap::new(), |id| (id == "rId3").then_some(4));
        assert_eq!(
            blocks,
            vec![Block::Table(vec![vec!["cell".into()]]), Block::Image(4)]
        );
    }

    #[test]
    fn relationships_resolve_inside_package() {
        let rels = parse_relationships(RELS);
        assert_eq!(rels.get("rId7").map(String::as_str), Some("word/media/image1.png"));
        assert!(!rels.contains_key("rId9"));
        assert_eq!(package_path("../media/a.png"), "media/a.png");
        assert_eq!(package_path("/word/media/b.png"), "word/media/b.png");
    }

    #[test]
    fn attribute_lookup_is_exact() {
        let attrs = r#" w:valx="no" w:val='yes'"#;
        assert_eq!(attr(attrs, "w:val"), Some("yes"));
        assert_eq!(attr(r#" r:id="rId1""#, "id"), None);
    }

    #[test]
    fn unescapes_entities() {
        assert_eq!(unescape_xml("a &lt;b&gt; &#x4E2D;&#25991; &bogus; &"), "a <b> 中文 &bogus; &");
    }

    #[test]
    fn promote_short_first_paragraph() {
        let mut blocks = vec![
            Block::Paragraph("Annual Report".into()),
            Block::Paragraph("Body text.".into()),
        ];
        assert_eq!(promote_title(&mut blocks).as_deref(), Some("Annual Report"));
        assert!(matches!(blocks[0], Block::Heading { level: 1, .. }));

        let mut blocks = vec![Block::Paragraph("A sentence, not a title.".into())];
        assert!(promote_title(&mut blocks).is_none());
    }

    #[test]
    fn media_mime_skips_vector_formats() {
        assert_eq!(media_mime("word/media/image1.PNG"), Some("image/png"));
        assert_eq!(media_mime("word/media/image2.jpeg"), Some("image/jpeg"));
        assert_eq!(media_mime("word/media/image3.emf"), None);
    }
}
