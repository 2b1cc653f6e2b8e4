//! Post-processing: deterministic cleanup of model-generated HTML.
//!
//! ## Why is post-processing necessary?
//!
//! Even a well-prompted chat model occasionally wraps its answer in ways
//! that are *reasonable* for a chat transcript but *wrong* for a document
//! fragment, for example:
//!
//! - Wrapping output in ` ```html ... ``` ` fences despite the prompt
//!   saying "do not wrap in fences"
//! - Adding "Here is your restyled document:" before the markup
//! - Returning a complete `<!DOCTYPE html><html><head>…` page for a chunk
//!   that will be stitched together with others
//! - Inventing `<img src="placeholder.png">` for a figure it imagined
//!
//! This module applies cheap, deterministic regex/string rules that fix
//! these quirks without touching content. Each rule is independently
//! testable.
//!
//! ## Rule Order
//!
//! Fences are stripped before prose trimming (the fence lines are prose to
//! the trimmer), and document wrappers are unwrapped before script removal
//! so `<head>` scripts are seen.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all post-processing rules to raw model output.
///
/// Rules (applied in order):
/// 1. Strip ```` ```html ```` fences (keep the first fenced block)
/// 2. Normalise line endings (CRLF → LF)
/// 3. Drop prose before the first tag and after the last tag
/// 4. Unwrap `<!DOCTYPE>`/`<html>`/`<head>`/`<body>`, keeping `<style>` and body content
/// 5. Remove `<script>` blocks
/// 6. Remove hallucinated placeholder images
/// 7. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens, etc.)
/// 8. Trim trailing whitespace and collapse runs of blank lines
pub fn clean_html(input: &str) -> String {
    let s = strip_html_fences(input);
    let s = normalise_line_endings(&s);
    let s = trim_surrounding_prose(&s);
    let s = unwrap_document(&s);
    let s = remove_scripts(&s);
    let s = remove_placeholder_images(&s);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    collapse_blank_lines(&s).trim().to_string()
}

// ── Rule 1: Strip code fences ───────────────────────────────────────────────

static RE_FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[ \t]*(?:html|HTML|xml)?[ \t]*\r?\n(.*?)\r?\n?```").unwrap());

fn strip_html_fences(input: &str) -> String {
    if let Some(caps) = RE_FENCED_BLOCK.captures(input) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Rule 2: Normalise line endings ──────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Drop surrounding prose ──────────────────────────────────────────

fn trim_surrounding_prose(input: &str) -> String {
    match (input.find('<'), input.rfind('>')) {
        (Some(start), Some(end)) if start < end => input[start..=end].to_string(),
        // No markup at all: leave plain text alone rather than dropping it.
        _ => input.to_string(),
    }
}

// ── Rule 4: Unwrap full-document wrappers ───────────────────────────────────

static RE_BODY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<body\b[^>]*>(.*?)(?:</body\s*>|$)").unwrap());
static RE_HEAD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<head\b[^>]*>(.*?)</head\s*>").unwrap());
static RE_STYLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").unwrap());
static RE_WRAPPER_TAGS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<!DOCTYPE[^>]*>|</?html\b[^>]*>|</?body\b[^>]*>|<meta\b[^>]*>|<title\b[^>]*>.*?</title\s*>")
        .unwrap()
});

/// Reduce a full HTML page to its body content.
///
/// `<style>` blocks found in `<head>` are kept and placed before the body so
/// the model's styling survives. Fragments without wrappers pass through.
pub fn unwrap_document(input: &str) -> String {
    let head_styles: Vec<String> = RE_HEAD
        .captures(input)
        .map(|caps| {
            RE_STYLE
                .find_iter(&caps[1])
                .map(|m| m.as_str().to_string())
                .collect()
        })
        .unwrap_or_default();

    let body = match RE_BODY.captures(input) {
        Some(caps) => caps[1].to_string(),
        None => RE_HEAD.replace_all(input, "").to_string(),
    };
    let body = RE_WRAPPER_TAGS.replace_all(&body, "");

    if head_styles.is_empty() {
        body.trim().to_string()
    } else {
        format!("{}\n{}", head_styles.join("\n"), body.trim())
    }
}

/// Prepare user-supplied HTML: reduce it to body content and drop scripts.
pub fn sanitize_input(input: &str) -> String {
    remove_scripts(&unwrap_document(input))
}

// ── Rule 5: Remove scripts ──────────────────────────────────────────────────

static RE_SCRIPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>|<script\b[^>]*/>").unwrap());

fn remove_scripts(input: &str) -> String {
    RE_SCRIPT.replace_all(input, "").to_string()
}

// ── Rule 6: Remove hallucinated images ──────────────────────────────────────
//
// The model sometimes invents images for figures it imagines (`chart.png`,
// `https://via.placeholder.com/600x400`). Every image of the source
// document reaches the model as a `docimg:` token (see
// `html::stash_images`), so any other relative source, or one on a known
// placeholder host, is removed. A non-empty `alt` survives as an italic
// caption so the description text is not lost.

static RE_IMG_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<img\b[^>]*>").unwrap());
static RE_SRC_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)\bsrc\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#).unwrap());
static RE_ALT_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)\balt\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap());

fn attr_value<'a>(re: &Regex, tag: &'a str) -> Option<&'a str> {
    let caps = re.captures(tag)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))
        .map(|m| m.as_str())
}

fn is_placeholder_src(src: &str) -> bool {
    let u = src.trim();
    if u.starts_with("data:image/") || u.starts_with("docimg:") {
        return false;
    }
    if !u.starts_with("http://") && !u.starts_with("https://") {
        return true;
    }
    let fake_domains = [
        "example.com",
        "placeholder.com",
        "via.placeholder.com",
        "dummyimage.com",
        "lorempixel.com",
        "picsum.photos",
        "placehold.it",
        "placehold.co",
    ];
    fake_domains.iter().any(|d| u.contains(d))
}

fn remove_placeholder_images(input: &str) -> String {
    RE_IMG_TAG
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let tag = &caps[0];
            let src = attr_value(&RE_SRC_ATTR, tag).unwrap_or("");
            if !is_placeholder_src(src) {
                return tag.to_string();
            }
            match attr_value(&RE_ALT_ATTR, tag).map(str::trim) {
                Some(alt) if !alt.is_empty() => format!("<em>{}</em>", alt),
                _ => String::new(),
            }
        })
        .to_string()
}

// ── Rule 7: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 8: Whitespace ──────────────────────────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Tests ────────────────────────────────────────────────────────────────────
