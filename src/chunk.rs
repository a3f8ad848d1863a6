//! Line-window chunking for vector-index documents.
//!
//! Every chunk keeps its 1-based line span so search hits can point back
//! into the source file.

/// A slice of a file destined for the vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct FileChunk {
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
}

/// Split `content` into windows of at most `max_lines` lines, overlapping
/// by `overlap_lines`. Blank-only files yield nothing.
pub fn chunk_lines(content: &str, max_lines: usize, overlap_lines: usize) -> Vec<FileChunk> {
    let lines: Vec<&str> = content.lines().collect();
    if lines.iter().all(|l| l.trim().is_empty()) {
        return Vec::new();
    }

    let max_lines = max_lines.max(1);
    // A full overlap would never advance.
    let overlap = overlap_lines.min(max_lines - 1);
    let stride = max_lines - overlap;

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < lines.len() {
        let end = (start + max_lines).min(lines.len());
        chunks.push(FileChunk {
            content: lines[start..end].join("\n"),
            start_line: start + 1,
            end_line: end,
        });
        if end == lines.len() {
            break;
        }
        start += stride;
    }

    chunks
}
