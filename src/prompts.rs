//! System prompts and the built-in template catalogue.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth**: changing how the model is told to restyle
//!    a document, or adding a template, means editing exactly one place.
//!
//! 2. **Testability**: unit tests inspect prompts and template lookup
//!    directly without calling DeepSeek.

use serde::Serialize;

/// Base system prompt sent with every beautify request.
pub const BASE_SYSTEM_PROMPT: &str = r#"You are an expert document designer. You receive a fragment of an HTML document that was converted from a Word or PDF file, and you return the same fragment restyled.

Follow these rules precisely:

1. CONTENT PRESERVATION
   - Keep ALL text exactly as given: do not summarise, translate, reorder or invent content
   - Keep every <img> element and its src attribute unchanged
   - Keep tables as tables, with the same rows and cells

2. STRUCTURE
   - Promote obvious headings to <h1>-<h4>, at most one <h1> per document
   - Turn run-on bullet text into <ul>/<ol> lists when the intent is clear
   - Use <strong> and <em> for emphasis that is already implied by the text

3. STYLING
   - Style with inline style attributes or a single <style> block at the start
   - Never reference external stylesheets, fonts or scripts

4. OUTPUT FORMAT
   - Output ONLY HTML body content
   - Do NOT wrap in ```html fences
   - Do NOT add <!DOCTYPE>, <html>, <head> or <body>
   - Do NOT add commentary or explanations"#;

/// Appended when the fragment is not the first chunk of the document.
pub const CONTINUATION_SUFFIX: &str = r#"

5. CONTINUATION
   This fragment continues a document whose earlier part was already styled.
   Do not add a <style> block or a new <h1>; reuse the same visual language."#;

/// A named styling preset selectable by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Template {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    #[serde(skip)]
    pub instructions: &'static str,
}

/// Built-in templates, in the order they are listed to clients.
pub const TEMPLATES: &[Template] = &[
    Template {
        id: "professional",
        name: "Professional",
        description: "Clean business layout with navy headings and generous spacing",
        instructions: "Use a restrained business style: dark navy (#1f3a5f) headings, \
            a serif body font at 16px with 1.6 line height, thin grey rules between \
            sections, and zebra-striped tables with a header row.",
    },
    Template {
        id: "academic",
        name: "Academic",
        description: "Paper-like typography with numbered sections and captions",
        instructions: "Format like an academic paper: centred title, numbered section \
            headings (1., 1.1, ...), justified serif body text, figure and table captions \
            in italics, and a compact reference style for citations.",
    },
    Template {
        id: "minimal",
        name: "Minimal",
        description: "Plenty of white space and a single accent colour",
        instructions: "Use a minimal style: sans-serif font, large white space, black \
            text with one accent colour (#0070f3) for headings and links, no borders \
            except a hairline under table headers.",
    },
    Template {
        id: "colorful",
        name: "Colorful",
        description: "Vivid section banners and highlighted call-outs",
        instructions: "Use a vivid, friendly style: each top-level section gets a soft \
            coloured banner, key sentences become highlighted call-out boxes, lists use \
            coloured markers, and tables have a coloured header row.",
    },
    Template {
        id: "report",
        name: "Report",
        description: "Structured report with summary box and clear data tables",
        instructions: "Format as a formal report: a summary box at the top restating \
            the document title, clearly separated sections, right-aligned numbers in \
            tables, and bold totals rows.",
    },
];

/// Look up a built-in template by id (case-insensitive).
pub fn find_template(id: &str) -> Option<&'static Template> {
    let id = id.trim();
    TEMPLATES.iter().find(|t| t.id.eq_ignore_ascii_case(id))
}

/// Compose the system prompt for one chunk.
pub fn system_prompt(continuation: bool) -> String {
    if continuation {
        format!("{BASE_SYSTEM_PROMPT}{CONTINUATION_SUFFIX}")
    } else {
        BASE_SYSTEM_PROMPT.to_string()
    }
}

/// Merge a template's instructions with the user's free-text instructions.
///
/// Returns `None` when there is nothing to ask the model for, which puts the
/// task in convert-only mode. Unknown template ids are treated as free text
/// so that a client-side template name still reaches the model.
pub fn compose_instructions(template: Option<&str>, instructions: Option<&str>) -> Option<String> {
    let mut parts = Vec::new();

    if let Some(t) = template.map(str::trim).filter(|t| !t.is_empty()) {
        match find_template(t) {
            Some(tpl) => parts.push(format!("Style template \"{}\": {}", tpl.name, tpl.instructions)),
            None => parts.push(format!("Style template: {t}")),
        }
    }
    if let Some(i) = instructions.map(str::trim).filter(|i| !i.is_empty()) {
        parts.push(format!("Additional instructions from the user: {i}"));
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_ids_are_unique() {
        let mut ids: Vec<_> = TEMPLATES.iter().map(|t| t.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), TEMPLATES.len());
    }

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(find_template(" Academic ").map(|t| t.id), Some("academic"));
        assert!(find_template("gothic").is_none());
    }

    #[test]
    fn continuation_prompt_extends_base() {
        let p = system_prompt(true);
        assert!(p.starts_with(BASE_SYSTEM_PROMPT));
        assert!(p.contains("CONTINUATION"));
        assert_eq!(system_prompt(false), BASE_SYSTEM_PROMPT);
    }

    #[test]
    fn nothing_to_do_is_convert_only() {
        assert_eq!(compose_instructions(None, None), None);
        assert_eq!(compose_instructions(Some("  "), Some("")), None);
    }

    #[test]
    fn template_and_instructions_are_merged() {
        let s = compose_instructions(Some("report"), Some("Use British spelling")).unwrap();
        assert!(s.contains("\"Report\""));
        assert!(s.contains("British spelling"));
    }

    #[test]
    fn unknown_template_is_passed_through() {
        let s = compose_instructions(Some("neon-retro"), None).unwrap();
        assert!(s.contains("neon-retro"));
    }

    #[test]
    fn serialised_template_hides_instructions() {
        let v = serde_json::to_value(TEMPLATES[0]).unwrap();
        assert_eq!(v["id"], "professional");
        assert!(v.get("instructions").is_none());
    }
}
