//! Text segmentation strategies
//!
//! Splits document text into bounded, optionally overlapping fragments that
//! become the unit of retrieval. Two strategies are provided behind the
//! [`Chunker`] trait: a fixed-size sliding window and a paragraph packer.
//! Identical input and parameters always yield identical fragments, which is
//! what makes re-ingestion diffs meaningful.

use thiserror::Error;
use tracing::warn;

/// Hard ceiling on input length (~5000 pages); longer texts are truncated
const MAX_TEXT_CHARS: usize = 10_000_000;

#[derive(Error, Debug)]
pub enum ChunkingError {
    /// The sliding window would stall or loop
    #[error("Invalid chunking window: overlap {overlap} must be smaller than size {size}")]
    InvalidWindow { size: usize, overlap: usize },
}

/// A contiguous fragment of a document's text, pre-persistence.
///
/// Offsets are character offsets into the (untrimmed) source text; the
/// stored text itself is whitespace-trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub index: usize,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

/// A text segmentation strategy
pub trait Chunker: Send + Sync {
    /// Split `text` into ordered fragments. Empty or whitespace-only input
    /// yields an empty sequence.
    fn chunk(&self, text: &str) -> Vec<TextChunk>;

    /// Strategy name recorded in chunk metadata
    fn name(&self) -> &'static str;
}

/// Build the chunker for a configured method name. Unknown methods fall back
/// to the fixed-size window.
pub fn chunker_for_method(
    method: &str,
    size: usize,
    overlap: usize,
) -> Result<Box<dyn Chunker>, ChunkingError> {
    match method {
        "paragraph" => Ok(Box::new(ParagraphChunker::new(size, overlap)?)),
        "fixed" => Ok(Box::new(FixedSizeChunker::new(size, overlap)?)),
        other => {
            warn!(method = other, "unknown chunking method, using fixed");
            Ok(Box::new(FixedSizeChunker::new(size, overlap)?))
        }
    }
}

fn bounded(text: &str) -> Vec<char> {
    let mut chars: Vec<char> = text.chars().collect();
    if chars.len() > MAX_TEXT_CHARS {
        warn!(
            original_length = chars.len(),
            max_length = MAX_TEXT_CHARS,
            "text too large, truncating"
        );
        chars.truncate(MAX_TEXT_CHARS);
    }
    chars
}

/// Fixed-size sliding window with overlap.
///
/// The window start advances by `size - overlap` characters each step; each
/// window is trimmed and windows that become empty after trimming are
/// dropped. The final fragment may be shorter than `size`.
pub struct FixedSizeChunker {
    size: usize,
    overlap: usize,
}

impl FixedSizeChunker {
    pub fn new(size: usize, overlap: usize) -> Result<Self, ChunkingError> {
        if size == 0 || overlap >= size {
            return Err(ChunkingError::InvalidWindow { size, overlap });
        }
        Ok(Self { size, overlap })
    }

    fn windows(&self, chars: &[char]) -> Vec<TextChunk> {
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < chars.len() {
            let end = (start + self.size).min(chars.len());
            let window: String = chars[start..end].iter().collect();
            let trimmed = window.trim();

            if !trimmed.is_empty() {
                chunks.push(TextChunk {
                    index: chunks.len(),
                    text: trimmed.to_string(),
                    start_offset: start,
                    end_offset: end,
                });
            }

            start += self.size - self.overlap;
        }

        chunks
    }
}

impl Chunker for FixedSizeChunker {
    fn chunk(&self, text: &str) -> Vec<TextChunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        self.windows(&bounded(text))
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

/// Paragraph-aware packer.
///
/// Paragraph boundaries are a blank line, or a sentence terminator followed
/// by a line starting with a capital letter, digit, or bullet. Paragraphs
/// are packed into fragments up to `max_size` characters joined by blank
/// lines, seeding each new fragment with the tail paragraphs of the previous
/// one up to `overlap` characters. A single paragraph larger than `max_size`
/// is split with the fixed-size window.
///
/// Offsets are a running cursor over the packed text (overlapped tails are
/// counted again), so offsets stay monotonic even though they no longer
/// point into the raw input.
pub struct ParagraphChunker {
    max_size: usize,
    overlap: usize,
    fallback: FixedSizeChunker,
}

impl ParagraphChunker {
    pub fn new(max_size: usize, overlap: usize) -> Result<Self, ChunkingError> {
        let fallback = FixedSizeChunker::new(max_size, overlap)?;
        Ok(Self {
            max_size,
            overlap,
            fallback,
        })
    }

    fn split_paragraphs(text: &str) -> Vec<String> {
        let text = text.replace("\r\n", "\n").replace('\r', "\n");
        let mut paragraphs = Vec::new();
        let mut current = String::new();

        for line in text.lines() {
            let line = line.trim();

            if line.is_empty() {
                if !current.trim().is_empty() {
                    paragraphs.push(std::mem::take(&mut current));
                }
                continue;
            }

            if current.is_empty() {
                current = line.to_string();
                continue;
            }

            let ends_sentence = current
                .trim_end()
                .ends_with(['.', '!', '?', ':']);
            let starts_new = line.chars().next().is_some_and(|c| {
                c.is_uppercase() || c.is_ascii_digit() || matches!(c, '-' | '•' | '*')
            });

            if ends_sentence && starts_new {
                paragraphs.push(std::mem::take(&mut current));
                current = line.to_string();
            } else {
                current.push(' ');
                current.push_str(line);
            }
        }

        if !current.trim().is_empty() {
            paragraphs.push(current);
        }

        paragraphs
    }

    fn overlap_tail(&self, packed: &str) -> Option<String> {
        if self.overlap == 0 {
            return None;
        }
        let mut tail = String::new();
        for paragraph in packed.split("\n\n").collect::<Vec<_>>().into_iter().rev() {
            if !tail.is_empty() && tail.chars().count() >= self.overlap {
                break;
            }
            if tail.is_empty() {
                tail = paragraph.to_string();
            } else {
                tail = format!("{paragraph}\n\n{tail}");
            }
        }
        (!tail.is_empty()).then_some(tail)
    }
}

impl Chunker for ParagraphChunker {
    fn chunk(&self, text: &str) -> Vec<TextChunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let chars = bounded(text);
        let text: String = chars.iter().collect();
        let paragraphs = Self::split_paragraphs(&text);

        let mut chunks: Vec<TextChunk> = Vec::new();
        let mut cursor = 0usize;
        let mut current: Vec<String> = Vec::new();
        let mut current_len = 0usize;

        let flush =
            |current: &mut Vec<String>, current_len: &mut usize, cursor: &mut usize, chunks: &mut Vec<TextChunk>| {
                if current.is_empty() {
                    return;
                }
                let packed = current.join("\n\n");
                let len = packed.chars().count();
                chunks.push(TextChunk {
                    index: chunks.len(),
                    text: packed,
                    start_offset: *cursor,
                    end_offset: *cursor + len,
                });
                *cursor += len;
                current.clear();
                *current_len = 0;
            };

        for paragraph in paragraphs {
            let para_len = paragraph.chars().count();

            // Oversized paragraph: flush and fall back to the fixed window
            if para_len > self.max_size {
                flush(&mut current, &mut current_len, &mut cursor, &mut chunks);
                for sub in self.fallback.chunk(&paragraph) {
                    let len = sub.text.chars().count();
                    chunks.push(TextChunk {
                        index: chunks.len(),
                        text: sub.text,
                        start_offset: cursor,
                        end_offset: cursor + len,
                    });
                    cursor += len;
                }
                continue;
            }

            let with_separator = para_len + if current.is_empty() { 0 } else { 2 };

            if current_len + with_separator > self.max_size && !current.is_empty() {
                let previous = current.join("\n\n");
                flush(&mut current, &mut current_len, &mut cursor, &mut chunks);

                if let Some(tail) = self.overlap_tail(&previous) {
                    current_len = tail.chars().count() + 2;
                    current.push(tail);
                }
                current_len += para_len;
                current.push(paragraph);
            } else {
                current_len += with_separator;
                current.push(paragraph);
            }
        }

        flush(&mut current, &mut current_len, &mut cursor, &mut chunks);
        chunks
    }

    fn name(&self) -> &'static str {
        "paragraph"
    }
}
