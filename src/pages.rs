//! Turns a decode input into grayscale bitmaps to scan.
//!
//! A PDF yields the images embedded in each page (or, with the `pdfium`
//! feature, a full rendering of each page). A directory yields every image
//! file in it, in name order. Anything else is opened as a single image.

use image::GrayImage;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::{DecodeOptions, PageSourceMode};
use crate::error::{PaperError, Result, SymbolWarning};
use crate::pdf::extract_page_images;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff", "bmp", "gif"];

pub struct PageImage {
    /// One-based page (or file) number.
    pub page: usize,
    pub image: GrayImage,
}

pub struct LoadedPages {
    pub images: Vec<PageImage>,
    pub page_count: usize,
    pub warnings: Vec<SymbolWarning>,
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

fn is_pdf(path: &Path) -> bool {
    if has_extension(path, &["pdf"]) {
        return true;
    }
    let mut magic = [0u8; 5];
    fs::File::open(path)
        .and_then(|mut f| f.read_exact(&mut magic))
        .map(|_| &magic == b"%PDF-")
        .unwrap_or(false)
}

fn image_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| PaperError::io(dir, e))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && has_extension(path, IMAGE_EXTENSIONS))
        .collect();
    files.sort();
    Ok(files)
}

fn load_image_files(files: &[PathBuf]) -> LoadedPages {
    let mut images = Vec::with_capacity(files.len());
    let mut warnings = Vec::new();

    for (i, path) in files.iter().enumerate() {
        match image::open(path) {
            Ok(img) => images.push(PageImage {
                page: i + 1,
                image: img.to_luma8(),
            }),
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                warnings.push(SymbolWarning::UnreadablePage {
                    page: i + 1,
                    detail: format!("{}: {}", path.display(), e),
                });
            }
        }
    }

    LoadedPages {
        images,
        page_count: files.len(),
        warnings,
    }
}

fn load_pdf_images(path: &Path) -> Result<LoadedPages> {
    let pages = extract_page_images(path)?;
    let page_count = pages.len();
    let mut images = Vec::new();
    let mut warnings = Vec::new();

    for page in pages {
        if page.images.is_empty() && page.skipped.is_empty() {
            warn!("Page {} has no images", page.page);
        }
        for reason in page.skipped {
            warn!("Page {}: skipped {}", page.page, reason);
            warnings.push(SymbolWarning::UnreadablePage {
                page: page.page,
                detail: reason,
            });
        }
        images.extend(page.images.into_iter().map(|image| PageImage {
            page: page.page,
            image,
        }));
    }

    Ok(LoadedPages {
        images,
        page_count,
        warnings,
    })
}

#[cfg(feature = "pdfium")]
fn rasterize_pdf(path: &Path, dpi: u32) -> Result<LoadedPages> {
    use pdfium_render::prelude::*;

    let bindings = Pdfium::bind_to_system_library().map_err(|e| PaperError::Rasterize {
        page: 0,
        detail: format!("pdfium library not available: {:?}", e),
    })?;
    let pdfium = Pdfium::new(bindings);
    let document = pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| PaperError::Rasterize {
            page: 0,
            detail: format!("{:?}", e),
        })?;

    let mut images = Vec::new();
    for (i, page) in document.pages().iter().enumerate() {
        let width_px = (page.width().value / 72.0 * dpi as f32).round() as i32;
        let config = PdfRenderConfig::new().set_target_width(width_px);
        let bitmap = page
            .render_with_config(&config)
            .map_err(|e| PaperError::Rasterize {
                page: i + 1,
                detail: format!("{:?}", e),
            })?;
        images.push(PageImage {
            page: i + 1,
            image: bitmap.as_image().to_luma8(),
        });
    }

    Ok(LoadedPages {
        page_count: images.len(),
        images,
        warnings: Vec::new(),
    })
}

#[cfg(not(feature = "pdfium"))]
fn rasterize_pdf(_path: &Path, _dpi: u32) -> Result<LoadedPages> {
    Err(PaperError::InvalidInput(
        "page rasterisation needs a build with the `pdfium` feature".to_string(),
    ))
}

pub fn load_pages(input: &Path, options: &DecodeOptions) -> Result<LoadedPages> {
    if !input.exists() {
        return Err(PaperError::InvalidInput(format!(
            "input path does not exist: {}",
            input.display()
        )));
    }

    let loaded = if input.is_dir() {
        let files = image_files(input)?;
        if files.is_empty() {
            return Err(PaperError::InvalidInput(format!(
                "no image files found in {}",
                input.display()
            )));
        }
        info!("Reading {} image file(s) from {}", files.len(), input.display());
        load_image_files(&files)
    } else if is_pdf(input) {
        match options.source {
            PageSourceMode::EmbeddedImages => load_pdf_images(input)?,
            PageSourceMode::Rasterize => rasterize_pdf(input, options.dpi)?,
        }
    } else {
        let image = image::open(input)?;
        LoadedPages {
            images: vec![PageImage {
                page: 1,
                image: image.to_luma8(),
            }],
            page_count: 1,
            warnings: Vec::new(),
        }
    };

    Ok(loaded)
}
