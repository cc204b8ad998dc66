//! Error types.
//!
//! [`PaperError`] is fatal: the encode or decode run stops and nothing is
//! written. [`SymbolWarning`] describes a single symbol that could not be
//! read; those are collected in the decode report and the run continues.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PaperError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Symbol content is {len} bytes but the QR symbol holds at most {capacity}")]
    CapacityExceeded { len: usize, capacity: usize },

    #[error("Invalid page layout: {0}")]
    InvalidLayout(String),

    #[error("QR encoding failed: {0}")]
    Qr(String),

    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("Failed to write PDF: {0}")]
    PdfWrite(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Rasterisation failed for page {page}: {detail}")]
    Rasterize { page: usize, detail: String },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("No readable symbols were found in the input")]
    NoSymbols,

    #[error("Missing chunk(s): {}", join_indices(.0))]
    MissingChunk(Vec<u32>),

    #[error("Chunk {0} appears more than once with different content")]
    DuplicateChunk(u32),

    #[error("Found manifest symbols that describe different files")]
    ConflictingManifest,

    #[error("Symbols disagree on the chunk count: expected {expected}, found {found}")]
    InconsistentTotal { expected: u32, found: u32 },

    #[error("Chunks disagree on whether the payload is compressed")]
    InconsistentFlags,

    #[error("Decompression failed: {0}")]
    Decompress(String),

    #[error("Restored data does not match the manifest: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
}

impl PaperError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PaperError::Io {
            path: path.into(),
            source,
        }
    }
}

fn join_indices(indices: &[u32]) -> String {
    indices
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A symbol that was detected but could not be turned into a record.
#[derive(Debug, Clone, Error)]
pub enum SymbolWarning {
    #[error("page {page}: unreadable symbol: {detail}")]
    UnreadableSymbol { page: usize, detail: String },

    #[error("page {page}: {detail}")]
    UnreadablePage { page: usize, detail: String },
}

pub type Result<T> = std::result::Result<T, PaperError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_chunk_lists_all_indices() {
        let err = PaperError::MissingChunk(vec![2, 5, 9]);
        assert_eq!(err.to_string(), "Missing chunk(s): 2, 5, 9");
    }
}
