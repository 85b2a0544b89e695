//! Prompt tokenization for the bundled engines

use std::path::Path;
use tokenizers::models::bpe::BPE;
use tokenizers::Tokenizer as HfTokenizer;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// One token of an encoded prompt together with the text it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSpan {
    pub id: u32,
    /// Prompt text from the end of the previous token to the end of this one
    pub text: String,
}

pub enum Tokenizer {
    /// HuggingFace tokenizer loaded from disk
    Hf(Box<HfTokenizer>),
    /// One token per character, ids are Unicode scalar values
    Chars,
}

impl Tokenizer {
    /// Load from a `tokenizer.json` file, or from a directory holding either
    /// `tokenizer.json` or `vocab.json` + `merges.txt`.
    pub fn from_path(path: &Path) -> Result<Self> {
        if path.is_file() {
            return Self::from_tokenizer_json(path);
        }

        let tokenizer_path = path.join("tokenizer.json");
        if tokenizer_path.exists() {
            return Self::from_tokenizer_json(&tokenizer_path);
        }

        let vocab_path = path.join("vocab.json");
        let merges_path = path.join("merges.txt");

        if vocab_path.exists() && merges_path.exists() {
            return Self::from_vocab_merges(&vocab_path, &merges_path);
        }

        Err(Error::TokenizationError(format!(
            "No tokenizer found in {:?}",
            path
        )))
    }

    fn from_tokenizer_json(path: &Path) -> Result<Self> {
        let inner =
            HfTokenizer::from_file(path).map_err(|e| Error::TokenizationError(e.to_string()))?;
        debug!("Loaded tokenizer from {:?}", path);
        Ok(Self::Hf(Box::new(inner)))
    }

    fn from_vocab_merges(vocab_path: &Path, merges_path: &Path) -> Result<Self> {
        info!("Loading BPE tokenizer from vocab.json + merges.txt");
        let vocab_str = vocab_path
            .to_str()
            .ok_or_else(|| Error::TokenizationError("Invalid vocab path".to_string()))?;
        let merges_str = merges_path
            .to_str()
            .ok_or_else(|| Error::TokenizationError("Invalid merges path".to_string()))?;

        let bpe = BPE::from_file(vocab_str, merges_str)
            .build()
            .map_err(|e| Error::TokenizationError(format!("BPE build failed: {}", e)))?;

        debug!("Loaded BPE tokenizer");
        Ok(Self::Hf(Box::new(HfTokenizer::new(bpe))))
    }

    /// Split `text` into tokens, each carrying the slice of `text` it ends.
    ///
    /// Concatenating the spans reproduces `text` up to the end of the last
    /// token; whitespace the tokenizer drops is attached to the following
    /// token.
    pub fn encode_spans(&self, text: &str) -> Result<Vec<TokenSpan>> {
        match self {
            Self::Chars => Ok(text
                .chars()
                .map(|c| TokenSpan {
                    id: c as u32,
                    text: c.to_string(),
                })
                .collect()),
            Self::Hf(inner) => {
                let encoding = inner
                    .encode(text, false)
                    .map_err(|e| Error::TokenizationError(e.to_string()))?;

                Ok(spans_from_offsets(
                    text,
                    encoding.get_ids(),
                    encoding.get_offsets(),
                ))
            }
        }
    }

    pub fn vocab_size(&self) -> usize {
        match self {
            Self::Hf(inner) => inner.get_vocab_size(true),
            Self::Chars => char::MAX as usize + 1,
        }
    }
}

/// Assign each token the text between the previous token's end and its own.
///
/// An end offset inside a multi-byte character is moved forward to the next
/// character boundary, so no prompt text is dropped.
fn spans_from_offsets(text: &str, ids: &[u32], offsets: &[(usize, usize)]) -> Vec<TokenSpan> {
    let mut spans = Vec::with_capacity(ids.len());
    let mut cursor = 0;
    for (&id, &(_, end)) in ids.iter().zip(offsets) {
        let mut end = end.min(text.len());
        while !text.is_char_boundary(end) {
            end += 1;
        }
        let piece = if end > cursor { &text[cursor..end] } else { "" };
        cursor = cursor.max(end);
        spans.push(TokenSpan {
            id,
            text: piece.to_string(),
        });
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_spans() {
        let spans = Tokenizer::Chars.encode_spans("héllo").unwrap();
        assert_eq!(spans.len(), 5);
        assert_eq!(spans[1].text, "é");
        assert_eq!(spans[1].id, 'é' as u32);
        let joined: String = spans.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(joined, "héllo");
    }

    #[test]
    fn test_offsets_inside_a_character_keep_text() {
        // 'é' spans bytes 1..3; the second token ends in the middle of it
        let text = "héllo";
        let offsets = [(0, 1), (1, 2), (2, 3), (3, 6)];
        let spans = spans_from_offsets(text, &[1, 2, 3, 4], &offsets);

        assert_eq!(spans[1].text, "é");
        assert_eq!(spans[2].text, "");
        let joined: String = spans.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn test_missing_tokenizer() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Tokenizer::from_path(dir.path()),
            Err(Error::TokenizationError(_))
        ));
    }
}
