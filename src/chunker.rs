//! Content-class-aware text chunker.
//!
//! Splits normalized text into overlapping retrieval units. Three policies:
//!
//! - [`ContentClass::HeadingAware`]: split at markdown heading boundaries,
//!   prefixing each chunk with its heading path so the chunk is
//!   self-describing out of context; long sections fall back to windowing.
//! - [`ContentClass::ShortForm`]: one chunk below the size target,
//!   paragraph-boundary splits above it.
//! - [`ContentClass::FixedWindow`]: sliding window over unstructured text;
//!   the final partial window is kept, never dropped or padded.
//!
//! Tokens are approximated by whitespace-separated words.

use serde_json::Value;

use crate::error::Error;
use crate::models::{ChunkDraft, ContentClass};

/// Window size and trailing overlap, in approximate tokens.
#[derive(Debug, Clone, Copy)]
pub struct ChunkParams {
    chunk_tokens: usize,
    overlap_tokens: usize,
}

impl ChunkParams {
    /// Overlap must be strictly smaller than the window, otherwise the
    /// window would never advance.
    pub fn new(chunk_tokens: usize, overlap_tokens: usize) -> Result<Self, Error> {
        if chunk_tokens == 0 {
            return Err(Error::ChunkParams("chunk_tokens must be > 0".into()));
        }
        if overlap_tokens >= chunk_tokens {
            return Err(Error::ChunkParams(format!(
                "overlap ({overlap_tokens}) must be smaller than window ({chunk_tokens})"
            )));
        }
        Ok(Self {
            chunk_tokens,
            overlap_tokens,
        })
    }

    pub fn chunk_tokens(&self) -> usize {
        self.chunk_tokens
    }

    pub fn overlap_tokens(&self) -> usize {
        self.overlap_tokens
    }
}

/// Split `text` into ordered chunk drafts. Empty input after trimming
/// yields zero chunks; the source is still considered indexed.
pub fn chunk(
    class: ContentClass,
    title: &str,
    text: &str,
    metadata: &Value,
    params: &ChunkParams,
) -> Vec<ChunkDraft> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let pieces = match class {
        ContentClass::HeadingAware => chunk_headings(text, params),
        ContentClass::ShortForm => chunk_short_form(text, params),
        ContentClass::FixedWindow => window_split(text, params)
            .into_iter()
            .map(|t| (t, None))
            .collect(),
    };

    pieces
        .into_iter()
        .enumerate()
        .map(|(i, (chunk_text, heading_path))| {
            let mut meta = metadata.clone();
            if !meta.is_object() {
                meta = Value::Object(serde_json::Map::new());
            }
            if let Some(path) = heading_path {
                if let Some(obj) = meta.as_object_mut() {
                    obj.insert("heading_path".to_string(), Value::String(path));
                }
            }
            ChunkDraft {
                chunk_index: i as i64,
                title: title.to_string(),
                text: chunk_text,
                metadata: meta,
            }
        })
        .collect()
}

fn token_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Sliding window over whitespace tokens. The step is window minus overlap,
/// so the last `overlap_tokens` words of each chunk reappear at the start
/// of the next.
fn window_split(text: &str, params: &ChunkParams) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let window = params.chunk_tokens;
    let step = window - params.overlap_tokens;
    let mut out = Vec::new();
    let mut start = 0;

    loop {
        let end = (start + window).min(words.len());
        out.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += step;
    }

    out
}

/// One chunk per heading section; long sections are windowed. Each chunk's
/// text carries its heading path ("Guide > Setup > Linux") as a prefix.
fn chunk_headings(text: &str, params: &ChunkParams) -> Vec<(String, Option<String>)> {
    // (level, heading text) stack describing the current position
    let mut path: Vec<(usize, String)> = Vec::new();
    let mut sections: Vec<(String, String)> = Vec::new(); // (path, body)
    let mut body = String::new();

    let flush = |path: &[(usize, String)], body: &mut String, sections: &mut Vec<(String, String)>| {
        let trimmed = body.trim();
        if !trimmed.is_empty() {
            let joined = path
                .iter()
                .map(|(_, h)| h.as_str())
                .collect::<Vec<_>>()
                .join(" > ");
            sections.push((joined, trimmed.to_string()));
        }
        body.clear();
    };

    for line in text.lines() {
        if let Some((level, heading)) = parse_heading(line) {
            flush(&path, &mut body, &mut sections);
            while path.last().is_some_and(|(l, _)| *l >= level) {
                path.pop();
            }
            path.push((level, heading));
        } else {
            body.push_str(line);
            body.push('\n');
        }
    }
    flush(&path, &mut body, &mut sections);

    let mut out = Vec::new();
    for (heading_path, section_body) in sections {
        let prefix = if heading_path.is_empty() {
            None
        } else {
            Some(heading_path)
        };
        if token_count(&section_body) <= params.chunk_tokens {
            out.push((prefixed(prefix.as_deref(), &section_body), prefix));
        } else {
            for piece in window_split(&section_body, params) {
                out.push((prefixed(prefix.as_deref(), &piece), prefix.clone()));
            }
        }
    }
    out
}

fn prefixed(path: Option<&str>, body: &str) -> String {
    match path {
        Some(p) => format!("{p}\n\n{body}"),
        None => body.to_string(),
    }
}

fn parse_heading(line: &str) -> Option<(usize, String)> {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|&c| c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &trimmed[hashes..];
    if !rest.starts_with(' ') {
        return None;
    }
    let heading = rest.trim().trim_end_matches('#').trim();
    if heading.is_empty() {
        return None;
    }
    Some((hashes, heading.to_string()))
}

/// Single chunk below the target; otherwise greedy paragraph packing with
/// a trailing overlap carried into the next chunk.
fn chunk_short_form(text: &str, params: &ChunkParams) -> Vec<(String, Option<String>)> {
    if token_count(text) <= params.chunk_tokens {
        return vec![(text.to_string(), None)];
    }

    let mut out: Vec<(String, Option<String>)> = Vec::new();
    let mut buf = String::new();
    let mut buf_tokens = 0usize;
    // Tracks whether buf holds anything beyond the carried overlap.
    let mut fresh = false;

    let flush = |buf: &mut String,
                 buf_tokens: &mut usize,
                 fresh: &mut bool,
                 out: &mut Vec<(String, Option<String>)>| {
        if !*fresh {
            return;
        }
        let carry = trailing_words(buf, params.overlap_tokens);
        out.push((std::mem::take(buf), None));
        *buf = carry;
        *buf_tokens = token_count(buf);
        *fresh = false;
    };

    for para in text.split("\n\n") {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }
        let para_tokens = token_count(para);

        if fresh && buf_tokens + para_tokens > params.chunk_tokens {
            flush(&mut buf, &mut buf_tokens, &mut fresh, &mut out);
        }

        if para_tokens > params.chunk_tokens {
            // One oversized paragraph: window it directly.
            flush(&mut buf, &mut buf_tokens, &mut fresh, &mut out);
            for piece in window_split(para, params) {
                out.push((piece, None));
            }
            buf.clear();
            buf_tokens = 0;
            fresh = false;
            continue;
        }

        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(para);
        buf_tokens += para_tokens;
        fresh = true;
    }

    flush(&mut buf, &mut buf_tokens, &mut fresh, &mut out);
    out
}

fn trailing_words(text: &str, n: usize) -> String {
    if n == 0 {
        return String::new();
    }
    let words: Vec<&str> = text.split_whitespace().collect();
    let start = words.len().saturating_sub(n);
    words[start..].join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(chunk: usize, overlap: usize) -> ChunkParams {
        ChunkParams::new(chunk, overlap).unwrap()
    }

    #[test]
    fn test_rejects_overlap_not_smaller_than_window() {
        assert!(ChunkParams::new(50, 50).is_err());
        assert!(ChunkParams::new(50, 80).is_err());
        assert!(ChunkParams::new(0, 0).is_err());
        assert!(ChunkParams::new(500, 50).is_ok());
    }

    #[test]
    fn test_empty_input_yields_zero_chunks() {
        let chunks = chunk(
            ContentClass::FixedWindow,
            "t",
            "   \n\n  ",
            &json!({}),
            &params(500, 50),
        );
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_fixed_window_keeps_final_partial() {
        let text = (0..25).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let chunks = chunk(ContentClass::FixedWindow, "t", &text, &json!({}), &params(10, 2));
        // step 8: windows at 0..10, 8..18, 16..25
        assert_eq!(chunks.len(), 3);
        assert_eq!(token_count(&chunks[2].text), 9);
        assert!(chunks[2].text.ends_with("w24"));
        // trailing overlap carried into the next window
        assert!(chunks[1].text.starts_with("w8 w9"));
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
        }
    }

    #[test]
    fn test_fixed_window_never_pads() {
        let text = "only three words";
        let chunks = chunk(ContentClass::FixedWindow, "t", text, &json!({}), &params(10, 2));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "only three words");
    }

    #[test]
    fn test_heading_chunks_carry_heading_path() {
        let text = "intro line\n\n# Guide\n\nguide body\n\n## Setup\n\nsetup body here";
        let chunks = chunk(
            ContentClass::HeadingAware,
            "doc",
            text,
            &json!({"tags": ["a"]}),
            &params(500, 50),
        );
        assert_eq!(chunks.len(), 3);
        // Preamble has no heading path
        assert_eq!(chunks[0].text, "intro line");
        assert!(chunks[0].metadata.get("heading_path").is_none());
        assert!(chunks[1].text.starts_with("Guide\n\n"));
        assert_eq!(chunks[1].metadata["heading_path"], "Guide");
        assert!(chunks[2].text.starts_with("Guide > Setup\n\n"));
        assert_eq!(chunks[2].metadata["heading_path"], "Guide > Setup");
        // base metadata preserved
        assert_eq!(chunks[2].metadata["tags"][0], "a");
    }

    #[test]
    fn test_heading_path_pops_on_sibling_heading() {
        let text = "# A\n\nbody a\n\n## A1\n\nbody a1\n\n# B\n\nbody b";
        let chunks = chunk(ContentClass::HeadingAware, "d", text, &json!({}), &params(500, 50));
        let paths: Vec<&str> = chunks
            .iter()
            .map(|c| c.metadata["heading_path"].as_str().unwrap())
            .collect();
        assert_eq!(paths, vec!["A", "A > A1", "B"]);
    }

    #[test]
    fn test_oversized_section_is_windowed_with_prefix() {
        let body = (0..30).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let text = format!("# Long\n\n{body}");
        let chunks = chunk(ContentClass::HeadingAware, "d", &text, &json!({}), &params(10, 2));
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.starts_with("Long\n\n"));
            assert_eq!(c.metadata["heading_path"], "Long");
        }
    }

    #[test]
    fn test_short_form_below_threshold_is_one_chunk() {
        let text = "Subject line.\n\nA short body paragraph.";
        let chunks = chunk(ContentClass::ShortForm, "mail", text, &json!({}), &params(500, 50));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
    }

    #[test]
    fn test_short_form_splits_on_paragraphs_with_overlap() {
        let paras: Vec<String> = (0..6)
            .map(|p| (0..8).map(|w| format!("p{p}w{w}")).collect::<Vec<_>>().join(" "))
            .collect();
        let text = paras.join("\n\n");
        let chunks = chunk(ContentClass::ShortForm, "mail", &text, &json!({}), &params(20, 4));
        assert!(chunks.len() > 1);
        // Each follow-up chunk starts with the previous chunk's tail.
        for pair in chunks.windows(2) {
            let carry = trailing_words(&pair[0].text, 4);
            assert!(
                pair[1].text.starts_with(&carry),
                "expected {:?} to start with {:?}",
                pair[1].text,
                carry
            );
        }
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let text = "# H\n\nalpha beta gamma\n\n## H2\n\ndelta epsilon";
        let a = chunk(ContentClass::HeadingAware, "d", text, &json!({}), &params(500, 50));
        let b = chunk(ContentClass::HeadingAware, "d", text, &json!({}), &params(500, 50));
        assert_eq!(a, b);
    }
}
