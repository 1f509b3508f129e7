//! Line-aligned sliding-window chunker.
//!
//! Splits file text into [`Chunk`]s of roughly `target_size` characters.
//! Boundaries always fall between lines; each chunk after the first is
//! seeded with a trailing run of lines from its predecessor whose total
//! size never exceeds `overlap_size`.
//!
//! Sizes are counted in characters, with one extra character per line for
//! the `\n` terminator. Chunking is pure: the same text and parameters
//! always produce the same boundaries and hashes.

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::models::{BranchScope, Chunk, ChunkMetadata};

/// Everything about the source file that gets stamped onto its chunks.
#[derive(Debug, Clone, Copy)]
pub struct ChunkSource<'a> {
    /// Path relative to the indexed root.
    pub path: &'a str,
    /// SHA-256 of the whole file.
    pub file_hash: &'a str,
    pub mtime: i64,
    pub scope: &'a BranchScope,
    pub indexed_at: i64,
}

/// Split `text` into overlapping line-aligned chunks.
///
/// Empty text yields no chunks. Otherwise the final partial window is
/// always emitted, and a single line longer than `target_size` becomes a
/// chunk of its own.
pub fn chunk_text(
    text: &str,
    source: &ChunkSource<'_>,
    target_size: usize,
    overlap_size: usize,
) -> Vec<Chunk> {
    if text.is_empty() {
        return Vec::new();
    }

    let lines: Vec<&str> = text.split('\n').collect();
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_size = 0usize;
    let mut start_line = 1usize;

    for (idx, line) in lines.iter().enumerate() {
        let line_no = idx + 1;
        let size = line_size(line);

        if current_size + size > target_size && !current.is_empty() {
            chunks.push(make_chunk(source, &current, start_line, line_no - 1));

            let keep_from = overlap_start(&current, overlap_size);
            current.drain(..keep_from);
            current_size = current.iter().map(|l| line_size(l)).sum();
            start_line = line_no - current.len();
        }

        current.push(line);
        current_size += size;
    }

    if !current.is_empty() {
        chunks.push(make_chunk(source, &current, start_line, lines.len()));
    }

    chunks
}

/// Character count of a line plus its terminator.
fn line_size(line: &str) -> usize {
    line.chars().count() + 1
}

/// Index of the first line of the longest suffix that fits in `overlap_size`.
fn overlap_start(lines: &[&str], overlap_size: usize) -> usize {
    let mut start = lines.len();
    let mut size = 0usize;
    while start > 0 {
        let next = line_size(lines[start - 1]);
        if size + next > overlap_size {
            break;
        }
        size += next;
        start -= 1;
    }
    start
}

/// SHA-256 of `text`, lowercase hex.
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn make_chunk(source: &ChunkSource<'_>, lines: &[&str], start_line: usize, end_line: usize) -> Chunk {
    let text = lines.join("\n");
    let file_extension = Path::new(source.path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default();

    Chunk {
        metadata: ChunkMetadata {
            file_path: source.path.to_string(),
            start_line,
            end_line,
            file_extension,
            content_hash: sha256_hex(&text),
            file_hash: source.file_hash.to_string(),
            commit_hash: source.scope.commit.clone(),
            branch_name: source.scope.branch.clone(),
            indexed_at: source.indexed_at,
            mtime: source.mtime,
        },
        text,
    }
}
