use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::chunk::{reassemble, restore, sanitize_filename, Record};
use crate::config::DecodeOptions;
use crate::error::{PaperError, Result, SymbolWarning};
use crate::pages::{load_pages, PageImage};
use crate::progress::{Progress, Stage};
use crate::qr::{record_from_text, scan_gray, ScannedSymbol};

const FALLBACK_FILENAME: &str = "restored.bin";

/// Everything found while scanning the input, before reassembly.
#[derive(Debug, Default)]
pub struct ScanSummary {
    pub records: Vec<Record>,
    pub warnings: Vec<SymbolWarning>,
    /// QR codes that decoded but are not ours.
    pub foreign_symbols: usize,
    pub pages: usize,
    pub images: usize,
}

#[derive(Debug)]
pub struct DecodeResult {
    pub original_filename: Option<String>,
    pub output_path: PathBuf,
    pub num_chunks: u32,
    pub num_symbols: usize,
    pub bytes_written: usize,
    /// Whether a manifest was found and the restored data matched it.
    pub verified: bool,
    pub warnings: Vec<SymbolWarning>,
}

struct ImageScan {
    records: Vec<Record>,
    warnings: Vec<SymbolWarning>,
    foreign: usize,
}

fn scan_page_image(page: PageImage) -> ImageScan {
    let mut scan = ImageScan {
        records: Vec::new(),
        warnings: Vec::new(),
        foreign: 0,
    };

    for symbol in scan_gray(page.image) {
        match symbol {
            ScannedSymbol::Decoded(text) => match record_from_text(&text) {
                Ok(record) => scan.records.push(record),
                Err(e) => {
                    debug!("Page {}: ignoring foreign QR code ({})", page.page, e);
                    scan.foreign += 1;
                }
            },
            ScannedSymbol::Unreadable(detail) => {
                let warning = SymbolWarning::UnreadableSymbol {
                    page: page.page,
                    detail,
                };
                warn!("{}", warning);
                scan.warnings.push(warning);
            }
        }
    }
    scan
}

/// Collects every record readable from `input` (PDF, image directory or
/// single image). Unreadable symbols become warnings.
pub fn scan_input(input: &Path, options: &DecodeOptions, progress: &dyn Progress) -> Result<ScanSummary> {
    let loaded = load_pages(input, options)?;
    let images = loaded.images.len();

    progress.start(Stage::Scanning, images);
    let scans: Vec<ImageScan> = loaded
        .images
        .into_par_iter()
        .map(|page| {
            let scan = scan_page_image(page);
            progress.advance(Stage::Scanning);
            scan
        })
        .collect();
    progress.finish(Stage::Scanning);

    let mut summary = ScanSummary {
        warnings: loaded.warnings,
        pages: loaded.page_count,
        images,
        ..ScanSummary::default()
    };
    for scan in scans {
        summary.records.extend(scan.records);
        summary.warnings.extend(scan.warnings);
        summary.foreign_symbols += scan.foreign;
    }

    info!(
        "Found {} symbol(s) in {} image(s) across {} page(s)",
        summary.records.len(),
        images,
        summary.pages
    );
    Ok(summary)
}

fn resolve_output_path(output: &Path, filename: Option<&str>) -> PathBuf {
    if output.is_dir() {
        let name = filename
            .map(sanitize_filename)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| FALLBACK_FILENAME.to_string());
        output.join(name)
    } else {
        output.to_path_buf()
    }
}

/// Restores the backed-up file from `input` and writes it to `output_path`.
/// When `output_path` is a directory the manifest filename is used inside
/// it. Nothing is written unless every chunk is present and consistent.
pub fn decode_file(
    input: &Path,
    output_path: &Path,
    options: &DecodeOptions,
    progress: &dyn Progress,
) -> Result<DecodeResult> {
    let summary = scan_input(input, options, progress)?;
    if summary.foreign_symbols > 0 {
        info!("Ignored {} QR code(s) not written by paperstore", summary.foreign_symbols);
    }

    let num_symbols = summary.records.len();
    let reassembled = reassemble(summary.records)?;
    let num_chunks = reassembled.total;
    let manifest = reassembled.manifest.clone();
    let data = restore(reassembled)?;

    let original_filename = manifest.as_ref().map(|m| m.filename.clone());
    let final_output_path = resolve_output_path(output_path, original_filename.as_deref());
    fs::write(&final_output_path, &data).map_err(|e| PaperError::io(&final_output_path, e))?;

    info!(
        "Restored {} bytes from {} chunk(s) to {}",
        data.len(),
        num_chunks,
        final_output_path.display()
    );

    Ok(DecodeResult {
        original_filename,
        output_path: final_output_path,
        num_chunks,
        num_symbols,
        bytes_written: data.len(),
        verified: manifest.is_some(),
        warnings: summary.warnings,
    })
}
