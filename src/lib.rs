//! Paper backups of small files as pages of QR codes.
//!
//! `encode` splits a file into chunks, renders each chunk as one QR symbol
//! and lays the symbols out on PDF pages. `decode` finds the symbols again in
//! that PDF, in a scan of its printout, or in a folder of page photos, and
//! rebuilds the file only if every chunk is accounted for.

pub mod chunk;
pub mod config;
#[cfg(feature = "decode")]
pub mod decode;
#[cfg(feature = "encode")]
pub mod encode;
pub mod error;
pub mod layout;
#[cfg(feature = "decode")]
pub mod pages;
pub mod pdf;
pub mod progress;
pub mod qr;

pub use chunk::{reassemble, restore, split_into_chunks, Chunk, Manifest, Record};
pub use config::{DecodeOptions, EcLevel, EncodeOptions, PageLayout, PageSourceMode, Paper, SymbolSpec};
#[cfg(feature = "decode")]
pub use decode::{decode_file, scan_input, DecodeResult, ScanSummary};
#[cfg(feature = "encode")]
pub use encode::{encode_data, encode_file, EncodeResult};
pub use error::{PaperError, Result, SymbolWarning};
pub use progress::{NoProgress, Progress, Stage};
