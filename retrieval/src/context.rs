//! Prompt context assembly.
//!
//! Entries are emitted in rank order as numbered paragraphs. The character
//! budget is hard: an entry that does not fit is cut at its last sentence
//! end, or dropped when no sentence fits.

use serde::{Deserialize, Serialize};

/// Characters that end a sentence.
const SENTENCE_ENDS: [char; 8] = ['.', '!', '?', '。', '！', '？', '…', '\n'];

/// Formatting options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextStyle {
    /// Prefix entries with `1.`, `2.`, ...
    pub numbered: bool,
    /// Prefix entries with `[source]` when a source is known.
    pub show_source: bool,
    /// Line emitted before the first entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    /// Text between entries.
    pub separator: String,
}

impl Default for ContextStyle {
    fn default() -> Self {
        Self {
            numbered: true,
            show_source: true,
            header: None,
            separator: "\n\n".to_string(),
        }
    }
}

impl ContextStyle {
    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }

    pub fn with_sources(mut self, show: bool) -> Self {
        self.show_source = show;
        self
    }
}

/// One ranked result to render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub doc_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Rendered as-is instead of the default formatting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preformatted: Option<String>,
}

impl ContextEntry {
    pub fn new(doc_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            text: text.into(),
            source: None,
            preformatted: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_preformatted(mut self, text: impl Into<String>) -> Self {
        self.preformatted = Some(text.into());
        self
    }
}

/// Assembled context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuiltContext {
    pub text: String,
    /// `doc_id`s of emitted entries, in order.
    pub citations: Vec<String>,
}

impl BuiltContext {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Length of `text` in characters.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Render `entries` into at most `max_chars` characters.
pub fn build(entries: &[ContextEntry], max_chars: usize, style: &ContextStyle) -> BuiltContext {
    let mut out = BuiltContext::default();
    let mut used = 0usize;

    if let Some(header) = style.header.as_deref().filter(|h| !h.is_empty()) {
        let header_len = header.chars().count();
        if header_len > max_chars {
            return out;
        }
        out.text.push_str(header);
        used = header_len;
    }

    for (i, entry) in entries.iter().enumerate() {
        let rendered = render(i + 1, entry, style);
        if rendered.trim().is_empty() {
            continue;
        }
        let sep = if used == 0 { "" } else { style.separator.as_str() };
        let sep_len = sep.chars().count();
        let Some(remaining) = max_chars.checked_sub(used + sep_len) else {
            break;
        };

        let rendered_len = rendered.chars().count();
        let (piece, piece_len, truncated) = if rendered_len <= remaining {
            (rendered, rendered_len, false)
        } else {
            match cut_at_sentence(&rendered, remaining) {
                Some(cut) => {
                    let len = cut.chars().count();
                    (cut.to_string(), len, true)
                }
                None => break,
            }
        };

        out.text.push_str(sep);
        out.text.push_str(&piece);
        out.citations.push(entry.doc_id.clone());
        used += sep_len + piece_len;
        if truncated {
            break;
        }
    }

    // A header alone is not a context.
    if out.citations.is_empty() {
        return BuiltContext::default();
    }
    out
}

fn render(index: usize, entry: &ContextEntry, style: &ContextStyle) -> String {
    if let Some(text) = entry.preformatted.as_deref() {
        return text.trim().to_string();
    }
    let mut line = String::new();
    if style.numbered {
        line.push_str(&format!("{index}. "));
    }
    if style.show_source
        && let Some(source) = entry.source.as_deref().filter(|s| !s.is_empty())
    {
        line.push_str(&format!("[{source}] "));
    }
    line.push_str(entry.text.trim());
    line
}

/// Longest prefix of `text` of at most `max_chars` characters that ends on a
/// sentence end or a blank line.
fn cut_at_sentence(text: &str, max_chars: usize) -> Option<&str> {
    let mut end = None;
    let mut prev = None;
    for (count, (byte, c)) in text.char_indices().enumerate() {
        if count >= max_chars {
            break;
        }
        let next = byte + c.len_utf8();
        let boundary = SENTENCE_ENDS.contains(&c)
            && text[next..]
                .chars()
                .next()
                .is_none_or(char::is_whitespace);
        if boundary || (c == '\n' && prev == Some('\n')) {
            end = Some(next);
        }
        prev = Some(c);
    }
    end.map(|e| text[..e].trim_end())
        .filter(|cut| !cut.is_empty() && !is_prefix_only(cut))
}

/// Whether `cut` holds nothing but an entry prefix such as `1.`.
fn is_prefix_only(cut: &str) -> bool {
    cut.trim_end_matches('.').chars().all(|c| c.is_ascii_digit())
}
