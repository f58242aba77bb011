//! Policy document chunking.
//!
//! [`ChunkStore`] splits a policy document hierarchically: paragraphs first,
//! then sentences, then words, and finally fixed-size windows with overlap
//! when a single word still exceeds the chunk size. Consecutive chunks share
//! up to `chunk_overlap` bytes so that context at a boundary is not lost.
//!
//! Every chunk records its byte offset in the source document and the policy
//! section label (`... Section 1.1`) it falls under.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use crate::document::PolicyChunk;

const SEPARATORS: [&str; 5] = ["\n\n", ". ", "! ", "? ", " "];

static SECTION_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:[A-Z][A-Za-z&]*[ \t]+)*Section[ \t]+\d+(?:\.\d+)*")
        .expect("section label pattern is valid")
});

/// Splits policy documents into overlapping [`PolicyChunk`]s.
///
/// Splitting is deterministic: the same text and parameters always yield the
/// same chunk sequence. Chunk IDs are `chunk_{ordinal}`.
///
/// # Example
///
/// ```rust
/// use govrag_index::ChunkStore;
///
/// let store = ChunkStore::new(500, 50);
/// let chunks = store.split("Section 1.1: user data must not leave approved infrastructure.");
/// assert_eq!(chunks.len(), 1);
/// assert_eq!(chunks[0].reference, "Section 1.1");
/// ```
#[derive(Debug, Clone)]
pub struct ChunkStore {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl ChunkStore {
    /// Create a new `ChunkStore`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size`: maximum number of bytes per chunk
    /// * `chunk_overlap`: number of bytes shared between consecutive chunks
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self { chunk_size: chunk_size.max(1), chunk_overlap }
    }

    /// Split a document into chunks.
    ///
    /// Returns an empty `Vec` if the document is empty or whitespace only.
    pub fn split(&self, document_text: &str) -> Vec<PolicyChunk> {
        if document_text.trim().is_empty() {
            return Vec::new();
        }

        // Leave room for the overlap prefix added afterwards.
        let budget = self.chunk_size.saturating_sub(self.chunk_overlap).max(1);
        let ranges = split_range(document_text, 0..document_text.len(), budget, &SEPARATORS);
        let ranges = apply_overlap(document_text, ranges, self.chunk_size, self.chunk_overlap);
        let labels = section_labels(document_text);

        ranges
            .into_iter()
            .filter_map(|range| trim_range(document_text, range))
            .enumerate()
            .map(|(ordinal, range)| PolicyChunk {
                id: format!("chunk_{ordinal}"),
                text: document_text[range.clone()].to_string(),
                source_offset: range.start,
                reference: reference_for(&labels, &range, ordinal),
            })
            .collect()
    }
}

/// Split `document_text` with a one-off [`ChunkStore`].
pub fn split(document_text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<PolicyChunk> {
    ChunkStore::new(chunk_size, chunk_overlap).split(document_text)
}

/// Split a byte range by the first separator, merging segments into
/// contiguous ranges of at most `budget` bytes. Ranges still too large are
/// split further with the next separator, then by fixed-size windows.
fn split_range(
    text: &str,
    range: Range<usize>,
    budget: usize,
    separators: &[&str],
) -> Vec<Range<usize>> {
    if range.len() <= budget {
        return vec![range];
    }
    let Some((separator, remaining)) = separators.split_first() else {
        return window_ranges(text, range, budget);
    };

    let mut chunks = Vec::new();
    let mut current: Option<Range<usize>> = None;

    for segment in segments_keeping_separator(text, range, separator) {
        current = match current.take() {
            None => Some(segment),
            Some(open) if segment.end - open.start <= budget => Some(open.start..segment.end),
            Some(open) => {
                chunks.extend(split_range(text, open, budget, remaining));
                Some(segment)
            }
        };
    }

    if let Some(open) = current {
        chunks.extend(split_range(text, open, budget, remaining));
    }

    chunks
}

/// Split a range at a separator, keeping the separator attached to the preceding segment.
fn segments_keeping_separator(
    text: &str,
    range: Range<usize>,
    separator: &str,
) -> Vec<Range<usize>> {
    let slice = &text[range.clone()];
    let mut segments = Vec::new();
    let mut start = 0;

    while let Some(pos) = slice[start..].find(separator) {
        let end = start + pos + separator.len();
        segments.push(range.start + start..range.start + end);
        start = end;
    }

    if start < slice.len() {
        segments.push(range.start + start..range.end);
    }

    segments
}

/// Contiguous fixed-size windows, snapped to char boundaries.
fn window_ranges(text: &str, range: Range<usize>, budget: usize) -> Vec<Range<usize>> {
    let mut windows = Vec::new();
    let mut start = range.start;

    while start < range.end {
        let mut end = floor_char_boundary(text, (start + budget).min(range.end));
        if end <= start {
            // budget is smaller than the character at `start`
            end = ceil_char_boundary(text, start + 1);
        }
        windows.push(start..end);
        start = end;
    }

    windows
}

/// Extend each chunk backwards over the tail of its predecessor, as long as
/// the result stays within `chunk_size`.
fn apply_overlap(
    text: &str,
    ranges: Vec<Range<usize>>,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<Range<usize>> {
    if chunk_overlap == 0 {
        return ranges;
    }

    let mut extended: Vec<Range<usize>> = Vec::with_capacity(ranges.len());
    for range in ranges {
        let start = match extended.last() {
            Some(previous) => {
                let candidate = ceil_char_boundary(
                    text,
                    previous.end.saturating_sub(chunk_overlap).max(previous.start),
                );
                if candidate < range.start && range.end - candidate <= chunk_size {
                    candidate
                } else {
                    range.start
                }
            }
            None => range.start,
        };
        extended.push(start..range.end);
    }
    extended
}

/// Strip surrounding whitespace from a range; `None` if nothing is left.
fn trim_range(text: &str, range: Range<usize>) -> Option<Range<usize>> {
    let slice = &text[range.clone()];
    let leading = slice.len() - slice.trim_start().len();
    let trailing = slice.len() - slice.trim_end().len();
    if leading == slice.len() {
        return None;
    }
    Some(range.start + leading..range.end - trailing)
}

/// All section labels in the document, in order of appearance.
fn section_labels(text: &str) -> Vec<(Range<usize>, String)> {
    SECTION_LABEL
        .find_iter(text)
        .map(|m| (m.range(), m.as_str().split_whitespace().collect::<Vec<_>>().join(" ")))
        .collect()
}

/// The first label inside the chunk, else the last label before it.
fn reference_for(labels: &[(Range<usize>, String)], range: &Range<usize>, ordinal: usize) -> String {
    labels
        .iter()
        .find(|(label, _)| label.start >= range.start && label.end <= range.end)
        .or_else(|| labels.iter().take_while(|(label, _)| label.start < range.start).last())
        .map(|(_, name)| name.clone())
        .unwrap_or_else(|| format!("Policy chunk {}", ordinal + 1))
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(text: &str, mut index: usize) -> usize {
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index
}
