//! Overlapping, boundary-aware text chunking for embedding.

use serde::Serialize;

use crate::error::{RagError, RagResult};

/// Break candidates, highest priority first. Separators within a tier compete
/// on position only.
const SEPARATOR_TIERS: &[&[&str]] = &[&["\n\n"], &["\n"], &[". ", "! ", "? "], &[" "]];

/// Chunk sizing knobs, measured in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl ChunkerConfig {
    /// Validates `0 <= chunk_overlap < chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> RagResult<Self> {
        if chunk_size == 0 {
            return Err(RagError::InvalidConfig("chunk size must be positive".into()));
        }
        if chunk_overlap >= chunk_size {
            return Err(RagError::InvalidConfig(format!(
                "chunk overlap {chunk_overlap} must be smaller than chunk size {chunk_size}"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    /// Maximum characters per chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Characters shared by consecutive chunks.
    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

/// Chunk of source text awaiting an embedding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextChunk {
    /// Originating document.
    pub source: String,
    /// Zero-based position within the document.
    pub chunk_index: usize,
    /// Text span.
    pub content: String,
    /// Character offset where the span starts.
    pub char_start: usize,
    /// Exclusive character offset where the span ends.
    pub char_end: usize,
}

/// Deterministic recursive-boundary splitter.
#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    /// Builds a chunker around a validated config.
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Returns the active config.
    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Splits `text` into ordered, overlapping chunks tagged with `source`.
    pub fn split(&self, source: &str, text: &str) -> Vec<TextChunk> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;

        let mut chunks = Vec::new();
        let mut start = 0usize;
        while start < total {
            let hard_end = (start + size).min(total);
            let end = if hard_end == total {
                total
            } else {
                find_break(&chars, start + overlap + 1, hard_end).unwrap_or(hard_end)
            };

            let content: String = chars[start..end].iter().collect();
            if !content.trim().is_empty() {
                chunks.push(TextChunk {
                    source: source.to_string(),
                    chunk_index: chunks.len(),
                    content,
                    char_start: start,
                    char_end: end,
                });
            }

            if end == total {
                break;
            }
            start = next_start(&chars, end, overlap);
        }
        chunks
    }
}

/// Finds the latest break in `[min_break, hard_end]` for the highest-priority
/// separator tier that has one. The returned offset sits just past the
/// separator.
fn find_break(chars: &[char], min_break: usize, hard_end: usize) -> Option<usize> {
    for tier in SEPARATOR_TIERS {
        let best = tier
            .iter()
            .filter_map(|sep| last_separator_end(chars, sep, min_break, hard_end))
            .max();
        if best.is_some() {
            return best;
        }
    }
    None
}

fn last_separator_end(chars: &[char], sep: &str, min_break: usize, hard_end: usize) -> Option<usize> {
    let sep: Vec<char> = sep.chars().collect();
    let len = sep.len();
    if hard_end < len {
        return None;
    }
    let mut pos = hard_end - len;
    loop {
        let break_at = pos + len;
        if break_at < min_break {
            return None;
        }
        if chars[pos..break_at] == sep[..] {
            return Some(break_at);
        }
        if pos == 0 {
            return None;
        }
        pos -= 1;
    }
}

/// Start of the chunk following one that ended at `end`: `overlap` characters
/// back, nudged forward to the next word start inside the overlap if any.
fn next_start(chars: &[char], end: usize, overlap: usize) -> usize {
    let candidate = end - overlap;
    if candidate == 0 || chars[candidate - 1].is_whitespace() {
        return candidate;
    }
    (candidate + 1..end)
        .find(|&pos| chars[pos - 1].is_whitespace() && !chars[pos].is_whitespace())
        .unwrap_or(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn prose(min_chars: usize) -> String {
        let sentences = [
            "Built a distributed ingestion service in Rust.",
            "Led a team of four engineers across two time zones!",
            "Shipped the search relevance overhaul ahead of schedule.",
            "Mentored interns on testing practices?",
        ];
        let mut text = String::new();
        let mut i = 0;
        while text.chars().count() < min_chars {
            text.push_str(sentences[i % sentences.len()]);
            text.push(if i % 5 == 4 { '\n' } else { ' ' });
            i += 1;
        }
        text
    }

    fn reconstruct(chunks: &[TextChunk]) -> String {
        let mut out = String::new();
        let mut covered = 0usize;
        for chunk in chunks {
            assert!(chunk.char_start <= covered, "gap before chunk {}", chunk.chunk_index);
            let skip = covered - chunk.char_start;
            out.extend(chunk.content.chars().skip(skip));
            covered = chunk.char_end;
        }
        out
    }

    #[test]
    fn rejects_invalid_config() {
        assert!(ChunkerConfig::new(0, 0).is_err());
        assert!(ChunkerConfig::new(100, 100).is_err());
        assert!(ChunkerConfig::new(100, 150).is_err());
        assert!(ChunkerConfig::new(100, 0).is_ok());
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let chunker = Chunker::default();
        assert!(chunker.split("empty.txt", "").is_empty());
        assert!(chunker.split("blank.txt", "  \n\n ").is_empty());
    }

    #[test]
    fn short_input_yields_single_chunk() {
        let chunker = Chunker::default();
        let chunks = chunker.split("bio.txt", "Rust engineer.");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "Rust engineer.");
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].source, "bio.txt");
    }

    #[test]
    fn hard_cut_document_strides_by_size_minus_overlap() {
        let text = "x".repeat(2500);
        let chunker = Chunker::new(ChunkerConfig::new(1000, 200).unwrap());
        let chunks = chunker.split("resume.pdf", &text);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].char_start, 0);
        assert_eq!(chunks[1].char_start, 800);
        assert_eq!(chunks[2].char_start, 1600);
        assert!(chunks.iter().all(|c| c.content.chars().count() <= 1000));
        assert_eq!(chunks[2].char_end, 2500);
    }

    #[test]
    fn prose_chunks_respect_size_and_boundaries() {
        let text = prose(5000);
        let chunker = Chunker::new(ChunkerConfig::new(1000, 200).unwrap());
        let chunks = chunker.split("resume.pdf", &text);
        let chars: Vec<char> = text.chars().collect();

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.content.chars().count() <= 1000);
            if chunk.char_end < chars.len() {
                assert!(
                    chars[chunk.char_end - 1].is_whitespace(),
                    "chunk {} ends mid-word",
                    chunk.chunk_index
                );
            }
        }
        for pair in chunks.windows(2) {
            assert!(pair[1].char_start < pair[0].char_end, "consecutive chunks overlap");
        }
    }

    #[test]
    fn chunking_is_lossless_modulo_overlap() {
        let text = prose(3200);
        let chunker = Chunker::new(ChunkerConfig::new(400, 80).unwrap());
        let chunks = chunker.split("notes.md", &text);
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn indices_are_contiguous() {
        let text = prose(4000);
        let chunker = Chunker::new(ChunkerConfig::new(300, 50).unwrap());
        let chunks = chunker.split("notes.md", &text);
        let indices: Vec<usize> = chunks.iter().map(|c| c.chunk_index).collect();
        let expected: Vec<usize> = (0..chunks.len()).collect();
        assert_eq!(indices, expected);
    }

    #[test]
    fn prefers_paragraph_breaks() {
        let first = "a".repeat(60);
        let second = "b ".repeat(40);
        let text = format!("{first}\n\n{second}");
        let chunker = Chunker::new(ChunkerConfig::new(100, 10).unwrap());
        let chunks = chunker.split("doc.txt", &text);
        assert_eq!(chunks[0].char_end, 62);
        assert!(chunks[0].content.ends_with("\n\n"));
    }

    #[test]
    fn zero_overlap_partitions_text() {
        let text = prose(1500);
        let chunker = Chunker::new(ChunkerConfig::new(250, 0).unwrap());
        let chunks = chunker.split("doc.txt", &text);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].char_end, pair[1].char_start);
        }
        let joined: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn handles_multibyte_text() {
        let text = "é".repeat(30);
        let chunker = Chunker::new(ChunkerConfig::new(10, 2).unwrap());
        let chunks = chunker.split("accents.txt", &text);
        assert!(chunks.iter().all(|c| c.content.chars().count() <= 10));
        assert_eq!(reconstruct(&chunks), text);
    }
}
