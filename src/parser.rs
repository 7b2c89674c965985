//! File-format parsers that turn raw bytes into normalized records.
//!
//! Parsing stays outside the core pipeline: the chunker, indexer, and
//! store only ever see [`NormalizedRecord`]s. Adding a format means adding
//! a [`Parser`] here, nothing else changes.

use serde_json::{json, Value};

use crate::error::Error;
use crate::models::ContentClass;

/// Title, body, and open metadata extracted from one file.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub title: String,
    pub text: String,
    pub metadata: Value,
}

pub trait Parser: Send + Sync {
    fn source_type(&self) -> &'static str;
    fn content_class(&self) -> ContentClass;
    fn parse(&self, locator: &str, raw: &str) -> Result<ParsedDocument, Error>;
}

/// Parser for a file extension, or None when the format is unsupported
/// (such files are skipped by the scanner, not failed).
pub fn parser_for_extension(ext: &str) -> Option<&'static dyn Parser> {
    match ext.to_ascii_lowercase().as_str() {
        "md" | "markdown" => Some(&MarkdownParser),
        "txt" | "text" | "log" | "rst" => Some(&PlaintextParser),
        _ => None,
    }
}

/// Chunking policy for a stored source type. Types fed through external
/// adapters (email, feeds) are short-form; unknown types fall back to
/// fixed windows.
pub fn content_class_for(source_type: &str) -> ContentClass {
    match source_type {
        "markdown" => ContentClass::HeadingAware,
        "email" | "message" => ContentClass::ShortForm,
        _ => ContentClass::FixedWindow,
    }
}

fn file_stem(locator: &str) -> String {
    std::path::Path::new(locator)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| locator.to_string())
}

/// Markdown with optional YAML frontmatter. The frontmatter is stripped
/// from the indexed text; `title` and `tags` keys are lifted into
/// metadata. Only flat `key: value` pairs and simple tag lists are
/// understood, which covers note vaults in practice.
pub struct MarkdownParser;

impl Parser for MarkdownParser {
    fn source_type(&self) -> &'static str {
        "markdown"
    }

    fn content_class(&self) -> ContentClass {
        ContentClass::HeadingAware
    }

    fn parse(&self, locator: &str, raw: &str) -> Result<ParsedDocument, Error> {
        let (frontmatter, body) = split_frontmatter(raw);

        let mut fm_title = None;
        let mut tags: Vec<String> = Vec::new();

        if let Some(fm) = frontmatter {
            let mut in_tags_block = false;
            for line in fm.lines() {
                let trimmed = line.trim();
                if in_tags_block {
                    if let Some(item) = trimmed.strip_prefix("- ") {
                        push_tag(&mut tags, item);
                        continue;
                    }
                    in_tags_block = false;
                }
                if let Some(value) = strip_key(trimmed, "title") {
                    fm_title = Some(unquote(value).to_string());
                } else if let Some(value) = strip_key(trimmed, "tags") {
                    if value.is_empty() {
                        in_tags_block = true;
                    } else {
                        for item in value.trim_start_matches('[').trim_end_matches(']').split(',')
                        {
                            push_tag(&mut tags, item);
                        }
                    }
                }
            }
        }

        let title = fm_title
            .or_else(|| first_heading(body))
            .unwrap_or_else(|| file_stem(locator));

        let metadata = if tags.is_empty() {
            json!({})
        } else {
            json!({ "tags": tags })
        };

        Ok(ParsedDocument {
            title,
            text: body.trim().to_string(),
            metadata,
        })
    }
}

/// Plain text: the file stem as title, the content as-is.
pub struct PlaintextParser;

impl Parser for PlaintextParser {
    fn source_type(&self) -> &'static str {
        "plaintext"
    }

    fn content_class(&self) -> ContentClass {
        ContentClass::FixedWindow
    }

    fn parse(&self, locator: &str, raw: &str) -> Result<ParsedDocument, Error> {
        Ok(ParsedDocument {
            title: file_stem(locator),
            text: raw.trim().to_string(),
            metadata: json!({}),
        })
    }
}

/// Split leading `--- ... ---` frontmatter from the body.
fn split_frontmatter(raw: &str) -> (Option<&str>, &str) {
    let Some(rest) = raw.strip_prefix("---") else {
        return (None, raw);
    };
    let Some(rest) = rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n")) else {
        return (None, raw);
    };

    for marker in ["\n---\n", "\n---\r\n"] {
        if let Some(end) = rest.find(marker) {
            return (Some(&rest[..end]), &rest[end + marker.len()..]);
        }
    }
    if let Some(stripped) = rest.strip_suffix("\n---") {
        return (Some(stripped), "");
    }
    (None, raw)
}

fn strip_key<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.strip_prefix(key)
        .and_then(|rest| rest.strip_prefix(':'))
        .map(str::trim)
}

fn push_tag(tags: &mut Vec<String>, raw: &str) {
    let tag = unquote(raw.trim()).trim_start_matches('#').to_string();
    if !tag.is_empty() {
        tags.push(tag);
    }
}

fn unquote(s: &str) -> &str {
    s.trim_matches(|c| c == '"' || c == '\'')
}

fn first_heading(body: &str) -> Option<String> {
    body.lines().find_map(|line| {
        line.trim_start()
            .strip_prefix("# ")
            .map(|h| h.trim().to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markdown_strips_frontmatter_and_lifts_fields() {
        let raw = "---\ntitle: My Note\ntags: [rust, db]\n---\n# Heading\n\nbody";
        let doc = MarkdownParser.parse("notes/my-note.md", raw).unwrap();
        assert_eq!(doc.title, "My Note");
        assert_eq!(doc.metadata["tags"][0], "rust");
        assert_eq!(doc.metadata["tags"][1], "db");
        assert!(!doc.text.contains("---"));
        assert!(doc.text.starts_with("# Heading"));
    }

    #[test]
    fn test_markdown_tag_block_list() {
        let raw = "---\ntags:\n  - alpha\n  - '#beta'\n---\nbody";
        let doc = MarkdownParser.parse("n.md", raw).unwrap();
        assert_eq!(doc.metadata["tags"][0], "alpha");
        assert_eq!(doc.metadata["tags"][1], "beta");
    }

    #[test]
    fn test_markdown_title_falls_back_to_heading_then_stem() {
        let doc = MarkdownParser.parse("a/b.md", "# From Heading\n\nx").unwrap();
        assert_eq!(doc.title, "From Heading");

        let doc = MarkdownParser.parse("a/fallback-note.md", "no headings").unwrap();
        assert_eq!(doc.title, "fallback-note");
    }

    #[test]
    fn test_markdown_without_frontmatter_is_untouched() {
        let raw = "just text\n\nwith --- a divider --- inline";
        let doc = MarkdownParser.parse("n.md", raw).unwrap();
        assert_eq!(doc.text, raw);
    }

    #[test]
    fn test_plaintext_uses_stem_as_title() {
        let doc = PlaintextParser.parse("/var/log/build.log", "line one").unwrap();
        assert_eq!(doc.title, "build");
        assert_eq!(doc.text, "line one");
    }

    #[test]
    fn test_extension_routing() {
        assert_eq!(parser_for_extension("md").unwrap().source_type(), "markdown");
        assert_eq!(parser_for_extension("MD").unwrap().source_type(), "markdown");
        assert_eq!(parser_for_extension("txt").unwrap().source_type(), "plaintext");
        assert!(parser_for_extension("exe").is_none());
    }

    #[test]
    fn test_content_class_routing() {
        assert_eq!(content_class_for("markdown"), ContentClass::HeadingAware);
        assert_eq!(content_class_for("email"), ContentClass::ShortForm);
        assert_eq!(content_class_for("pdf"), ContentClass::FixedWindow);
    }
}
