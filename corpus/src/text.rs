//! Text normalization and Korean-aware tokenization.
//!
//! No morphological analyzer is used. Instead, character bigrams are emitted
//! next to whole tokens so that sub-word matches (Korean stems with attached
//! particles, misspelled Latin words) still share terms.

/// Prefix that keeps bigram terms apart from whole-word terms.
const BIGRAM_PREFIX: char = '#';

/// Collapse runs of whitespace into single spaces and trim the ends.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether a character belongs to a script written without word-internal
/// spaces that benefits from bigram indexing (Hangul, Han, Kana).
pub fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{1100}'..='\u{11FF}'   // Hangul Jamo
        | '\u{3130}'..='\u{318F}' // Hangul compatibility Jamo
        | '\u{AC00}'..='\u{D7A3}' // Hangul syllables
        | '\u{3040}'..='\u{30FF}' // Hiragana, Katakana
        | '\u{3400}'..='\u{4DBF}' // Han extension A
        | '\u{4E00}'..='\u{9FFF}' // Han unified ideographs
    )
}

/// Configuration for [`Tokenizer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizerConfig {
    /// Emit bigrams for Hangul/Han tokens.
    pub cjk_bigrams: bool,

    /// Emit bigrams for Latin tokens.
    pub latin_bigrams: bool,

    /// Minimum Latin token length (in chars) that gets bigrams.
    pub min_latin_bigram_len: usize,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            cjk_bigrams: true,
            latin_bigrams: true,
            min_latin_bigram_len: 3,
        }
    }
}

/// Lowercasing tokenizer that splits on whitespace and punctuation.
#[derive(Debug, Clone, Default)]
pub struct Tokenizer {
    config: TokenizerConfig,
}

impl Tokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TokenizerConfig) -> Self {
        Self { config }
    }

    /// Split into lowercase words without bigram expansion.
    pub fn words(&self, text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Split into terms: whole words followed by their bigrams.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let mut terms = Vec::new();
        for word in self.words(text) {
            let chars: Vec<char> = word.chars().collect();
            let cjk = chars.iter().any(|c| is_cjk(*c));
            let wants_bigrams = if cjk {
                self.config.cjk_bigrams && chars.len() >= 2
            } else {
                self.config.latin_bigrams && chars.len() >= self.config.min_latin_bigram_len
            };

            terms.push(word);
            if wants_bigrams {
                for pair in chars.windows(2) {
                    let mut term = String::with_capacity(9);
                    term.push(BIGRAM_PREFIX);
                    term.push(pair[0]);
                    term.push(pair[1]);
                    terms.push(term);
                }
            }
        }
        terms
    }
}

/// Tokenize with the default configuration.
pub fn tokenize(text: &str) -> Vec<String> {
    Tokenizer::new().tokenize(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  Jupiter \n\t in  Sagittarius "), "Jupiter in Sagittarius");
    }

    #[test]
    fn test_words_split_on_punctuation() {
        let t = Tokenizer::new();
        assert_eq!(t.words("Mars, square-Saturn!"), vec!["mars", "square", "saturn"]);
    }

    #[test]
    fn test_korean_bigrams() {
        let terms = tokenize("갑목은");
        assert_eq!(terms, vec!["갑목은", "#갑목", "#목은"]);
    }

    #[test]
    fn test_latin_bigrams_skip_short_words() {
        let terms = tokenize("in Leo");
        assert_eq!(terms, vec!["in", "leo", "#le", "#eo"]);
    }

    #[test]
    fn test_bigrams_can_be_disabled() {
        let t = Tokenizer::with_config(TokenizerConfig {
            cjk_bigrams: false,
            latin_bigrams: false,
            min_latin_bigram_len: 3,
        });
        assert_eq!(t.tokenize("목성 Jupiter"), vec!["목성", "jupiter"]);
    }

    #[test]
    fn test_misspelling_shares_bigrams() {
        let a: std::collections::HashSet<_> = tokenize("jupiter").into_iter().collect();
        let b: std::collections::HashSet<_> = tokenize("juppiter").into_iter().collect();
        assert!(a.intersection(&b).count() >= 5);
    }
}
