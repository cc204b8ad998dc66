use rayon::prelude::*;
use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::chunk::{
    compress, max_chunk_payload, max_manifest_name, sanitize_filename, sha256, split_into_chunks,
    Manifest, Record, FLAG_COMPRESSED, HEADER_SIZE,
};
use crate::config::EncodeOptions;
use crate::error::{PaperError, Result};
use crate::layout::{PageGeometry, MIN_MODULE_MM};
use crate::pdf::{write_document, PdfSymbol};
use crate::progress::{Progress, Stage};
use crate::qr::{encode_record, record_to_text, symbol_capacity};

// Longest filename kept in the manifest, in bytes.
const MAX_MANIFEST_NAME: usize = 255;

#[derive(Debug, Clone)]
pub struct EncodeResult {
    pub num_chunks: usize,
    pub num_symbols: usize,
    pub num_pages: usize,
    /// Payload bytes carried by each full chunk.
    pub chunk_size: usize,
    /// Bytes that were chunked, after optional compression.
    pub payload_size: usize,
    pub sha256: String,
    /// False when the manifest was turned off or did not fit the symbol.
    pub has_manifest: bool,
    pub output_path: PathBuf,
}

fn truncate_name(name: &str, max: usize) -> &str {
    if name.len() <= max {
        return name;
    }
    let mut end = max;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

fn caption_for(record: &Record) -> String {
    match record {
        Record::Chunk(c) => format!("chunk {}/{}", c.index + 1, c.total),
        Record::Manifest(m) => format!("manifest: {} ({} bytes)", m.filename, m.size),
    }
}

/// Reads `input_path` and writes its QR backup to `output_path`.
pub fn encode_file(
    input_path: &Path,
    output_path: &Path,
    options: &EncodeOptions,
    progress: &dyn Progress,
) -> Result<EncodeResult> {
    let data = fs::read(input_path).map_err(|e| PaperError::io(input_path, e))?;
    let filename = input_path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| PaperError::InvalidInput(format!("invalid filename: {}", input_path.display())))?;

    encode_data(&data, &filename, output_path, options, progress)
}

pub fn encode_data(
    data: &[u8],
    filename: &str,
    output_path: &Path,
    options: &EncodeOptions,
    progress: &dyn Progress,
) -> Result<EncodeResult> {
    if data.is_empty() {
        return Err(PaperError::InvalidInput("input is empty".to_string()));
    }

    let spec = options.symbol;
    spec.validate()?;
    let geometry = PageGeometry::new(&options.layout)?;

    let module_mm = geometry.module_size_mm(spec.modules_with_quiet_zone());
    if module_mm < MIN_MODULE_MM {
        warn!(
            "Printed QR modules will be {:.2} mm wide; below {} mm scans become unreliable. Use fewer columns/rows or a lower QR version.",
            module_mm, MIN_MODULE_MM
        );
    }

    let capacity = symbol_capacity(spec.version, spec.ec_level);
    let chunk_size = match options.chunk_size {
        Some(size) => size,
        None => max_chunk_payload(capacity).ok_or(PaperError::CapacityExceeded {
            len: (HEADER_SIZE + 1).div_ceil(3) * 4,
            capacity,
        })?,
    };
    info!(
        "QR version {} level {}: {} bytes per symbol, {} payload bytes per chunk",
        spec.version, spec.ec_level, capacity, chunk_size
    );

    let (payload, flags) = if options.compress {
        let compressed = compress(data)?;
        info!("Compressed {} bytes to {}", data.len(), compressed.len());
        (Cow::Owned(compressed), FLAG_COMPRESSED)
    } else {
        (Cow::Borrowed(data), 0)
    };

    let chunks = split_into_chunks(&payload, chunk_size, flags)?;
    let num_chunks = chunks.total() as usize;
    let digest = hex::encode(sha256(data));

    let name_limit = if options.no_manifest {
        None
    } else {
        let limit = max_manifest_name(capacity);
        if limit.is_none() {
            warn!(
                "QR version {} level {} holds {} bytes, too few for the manifest symbol; encoding without it",
                spec.version, spec.ec_level, capacity
            );
        }
        limit
    };

    let mut records: Vec<Record> = Vec::with_capacity(num_chunks + 1);
    if let Some(limit) = name_limit {
        let sanitized = sanitize_filename(filename);
        let name = truncate_name(&sanitized, limit.min(MAX_MANIFEST_NAME));
        if name.len() < sanitized.len() {
            debug!("Manifest filename shortened to {:?}", name);
        }
        records.push(Record::Manifest(Manifest::new(
            data,
            name,
            num_chunks as u32,
            flags,
        )));
    }
    records.extend(chunks.map(Record::Chunk));

    progress.start(Stage::Rendering, records.len());
    let symbols = records
        .par_iter()
        .map(|record| {
            let text = record_to_text(record);
            debug!("{}: {} bytes of symbol content", caption_for(record), text.len());
            let image = encode_record(record, &spec)?;
            progress.advance(Stage::Rendering);
            Ok(PdfSymbol {
                image,
                caption: caption_for(record),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    progress.finish(Stage::Rendering);

    let title = options.title.as_deref().unwrap_or(filename);
    let header = format!(
        "{} - {} bytes - {} QR codes - SHA256: {}",
        title,
        data.len(),
        symbols.len(),
        digest
    );
    let num_pages = write_document(&symbols, &geometry, &header, title, output_path)?;

    Ok(EncodeResult {
        num_chunks,
        num_symbols: symbols.len(),
        num_pages,
        chunk_size,
        payload_size: payload.len(),
        sha256: digest,
        has_manifest: name_limit.is_some(),
        output_path: output_path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EcLevel, SymbolSpec};
    use crate::progress::NoProgress;
    use tempfile::TempDir;

    #[test]
    fn test_empty_input_writes_nothing() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let output = temp_dir.path().join("empty.pdf");

        let result = encode_data(&[], "empty.bin", &output, &EncodeOptions::default(), &NoProgress);
        assert!(matches!(result, Err(PaperError::InvalidInput(_))));
        assert!(!output.exists());
    }

    #[test]
    fn test_oversized_chunk_is_capacity_error() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let output = temp_dir.path().join("big.pdf");
        let options = EncodeOptions {
            symbol: SymbolSpec {
                version: 40,
                ec_level: EcLevel::H,
                pixel_scale: 1,
            },
            chunk_size: Some(2000),
            ..EncodeOptions::default()
        };

        let result = encode_data(&[7u8; 3000], "big.bin", &output, &options, &NoProgress);
        assert!(matches!(result, Err(PaperError::CapacityExceeded { .. })));
        assert!(!output.exists());
    }

    #[test]
    fn test_encode_counts() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let output = temp_dir.path().join("counts.pdf");
        let options = EncodeOptions {
            symbol: SymbolSpec {
                version: 10,
                ec_level: EcLevel::M,
                pixel_scale: 2,
            },
            ..EncodeOptions::default()
        };

        let data: Vec<u8> = (0..1000u32).map(|i| (i * 7 % 251) as u8).collect();
        let result = encode_data(&data, "counts.bin", &output, &options, &NoProgress).unwrap();

        let capacity = symbol_capacity(10, EcLevel::M);
        assert_eq!(result.chunk_size, max_chunk_payload(capacity).unwrap());
        assert_eq!(result.num_chunks, data.len().div_ceil(result.chunk_size));
        assert_eq!(result.num_symbols, result.num_chunks + 1);
        assert_eq!(result.num_pages, result.num_symbols.div_ceil(6));
        assert!(output.exists());
    }

    #[test]
    fn test_manifest_fits_small_symbols() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let data = b"hello paper backup";

        for version in [3u8, 5, 6, 8, 10] {
            let output = temp_dir.path().join(format!("v{}.pdf", version));
            let options = EncodeOptions {
                symbol: SymbolSpec {
                    version,
                    ec_level: EcLevel::Q,
                    pixel_scale: 1,
                },
                ..EncodeOptions::default()
            };
            let result = encode_data(
                data,
                "a-rather-long-seed-phrase-backup-filename.txt",
                &output,
                &options,
                &NoProgress,
            )
            .unwrap();

            let capacity = symbol_capacity(version, EcLevel::Q);
            assert_eq!(result.has_manifest, max_manifest_name(capacity).is_some());
            let manifests = usize::from(result.has_manifest);
            assert_eq!(result.num_symbols, result.num_chunks + manifests);
            assert!(output.exists());
        }
    }

    #[test]
    fn test_no_manifest_option() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let output = temp_dir.path().join("bare.pdf");
        let options = EncodeOptions {
            no_manifest: true,
            ..EncodeOptions::default()
        };

        let result = encode_data(b"bare", "bare.txt", &output, &options, &NoProgress).unwrap();
        assert!(!result.has_manifest);
        assert_eq!(result.num_symbols, 1);
    }

    #[test]
    #[cfg(unix)]
    fn test_non_utf8_filename_is_accepted() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let input = temp_dir.path().join(OsStr::from_bytes(b"caf\xe9.txt"));
        fs::write(&input, b"latin-1 name").unwrap();
        let output = temp_dir.path().join("cafe.pdf");

        let result = encode_file(&input, &output, &EncodeOptions::default(), &NoProgress).unwrap();
        assert!(result.has_manifest);
        assert!(output.exists());
    }

    #[test]
    fn test_truncate_name_respects_char_boundaries() {
        assert_eq!(truncate_name("abc", 10), "abc");
        assert_eq!(truncate_name("ééé", 3), "é");
    }
}
