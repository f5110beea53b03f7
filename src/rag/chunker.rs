//! Recursive text splitter.
//!
//! Breaks document content into overlapping passages, preferring natural
//! boundaries: paragraph, then sentence, then line, then word, with a hard
//! character cut as the last resort. Offsets are byte offsets on UTF-8 char
//! boundaries and chunk text is the exact `content[start..end]` slice, so the
//! spans cover the whole document and overlap-aware concatenation
//! reconstructs it losslessly.

/// A contiguous passage of a document's content.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub index: usize,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            // overlap must leave room for forward progress
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }

    /// Split `text` into ordered overlapping chunks. Whitespace-only input
    /// produces no chunks; callers treat that as a no-op, not an error.
    pub fn split(&self, text: &str) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let len = text.len();
        if len <= self.chunk_size {
            return vec![Chunk {
                index: 0,
                start: 0,
                end: len,
                text: text.to_string(),
            }];
        }

        let mut chunks = Vec::new();
        let mut start = 0usize;
        let mut prev_end = 0usize;

        while start < len {
            let mut hard_end = floor_char_boundary(text, (start + self.chunk_size).min(len));
            if hard_end <= start {
                // a multibyte char wider than the remaining budget
                hard_end = ceil_char_boundary(text, start + self.chunk_size);
            }
            let end = if hard_end < len {
                find_break(text, start, hard_end)
            } else {
                len
            };

            if end <= prev_end {
                // the overlap window re-found an already-emitted boundary
                start = prev_end;
                continue;
            }

            chunks.push(Chunk {
                index: chunks.len(),
                start,
                end,
                text: text[start..end].to_string(),
            });
            prev_end = end;

            if end >= len {
                break;
            }

            let mut next = ceil_char_boundary(text, end.saturating_sub(self.chunk_overlap));
            if next <= start {
                // boundary landed closer than the overlap window;
                // drop the overlap for this step to keep moving
                next = end;
            }
            start = next;
        }

        chunks
    }
}

/// Pick the best break position in `text[start..hard_end]`, returned as an
/// absolute byte offset. Falls back to `hard_end` when nothing natural fits.
fn find_break(text: &str, start: usize, hard_end: usize) -> usize {
    let window = &text[start..hard_end];

    if let Some(pos) = window.rfind("\n\n") {
        let end = start + pos + 2;
        if end > start {
            return end;
        }
    }

    // latest sentence ending wins
    let sentence = [". ", "! ", "? "]
        .iter()
        .filter_map(|sep| window.rfind(sep).map(|pos| pos + sep.len()))
        .max();
    if let Some(pos) = sentence {
        return start + pos;
    }

    if let Some(pos) = window.rfind('\n') {
        let end = start + pos + 1;
        if end > start {
            return end;
        }
    }

    if let Some(pos) = window.rfind(' ') {
        let end = start + pos + 1;
        if end > start {
            return end;
        }
    }

    hard_end
}

fn floor_char_boundary(text: &str, mut pos: usize) -> usize {
    pos = pos.min(text.len());
    while pos > 0 && !text.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

fn ceil_char_boundary(text: &str, mut pos: usize) -> usize {
    pos = pos.min(text.len());
    while pos < text.len() && !text.is_char_boundary(pos) {
        pos += 1;
    }
    pos
}
