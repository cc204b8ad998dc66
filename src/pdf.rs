//! Writing symbol pages to PDF and reading page images back out of one.
//!
//! Symbols are stored as 8-bit DeviceGray image XObjects, so the reader can
//! recover them without a PDF renderer. The same reader handles the usual
//! scanner output of one full-page image per page.

use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::{GrayImage, ImageFormat};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{PaperError, Result};
use crate::layout::PageGeometry;

const HEADER_FONT_SIZE: f32 = 8.0;
const CAPTION_FONT_SIZE: f32 = 7.0;
const FONT_NAME: &str = "F1";
// Nesting allowed for Pages parents and Form XObjects.
const MAX_DEPTH: usize = 16;

/// A rendered symbol ready to be placed.
pub struct PdfSymbol {
    pub image: GrayImage,
    pub caption: String,
}

fn pdf_text(text: &str) -> Object {
    let ascii: String = text
        .chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '?' })
        .collect();
    Object::string_literal(ascii)
}

fn text_op(ops: &mut Vec<Operation>, text: &str, size: f32, x: f32, y: f32) {
    ops.push(Operation::new("BT", vec![]));
    ops.push(Operation::new("Tf", vec![FONT_NAME.into(), size.into()]));
    ops.push(Operation::new("Td", vec![x.into(), y.into()]));
    ops.push(Operation::new("Tj", vec![pdf_text(text)]));
    ops.push(Operation::new("ET", vec![]));
}

fn image_stream(image: &GrayImage) -> Result<Stream> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder
        .write_all(image.as_raw())
        .map_err(|e| PaperError::PdfWrite(e.to_string()))?;
    let compressed = encoder
        .finish()
        .map_err(|e| PaperError::PdfWrite(e.to_string()))?;

    let dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => Object::Integer(image.width() as i64),
        "Height" => Object::Integer(image.height() as i64),
        "ColorSpace" => "DeviceGray",
        "BitsPerComponent" => Object::Integer(8),
        "Filter" => "FlateDecode",
        "Interpolate" => Object::Boolean(false),
    };
    Ok(Stream::new(dict, compressed))
}

/// Lays `symbols` out with `geometry` and writes the document to `output`.
/// Returns the number of pages written.
pub fn write_document(
    symbols: &[PdfSymbol],
    geometry: &PageGeometry,
    header: &str,
    title: &str,
    output: &Path,
) -> Result<usize> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let page_count = geometry.page_count(symbols.len());
    let per_page = geometry.per_page();
    let mut kids: Vec<Object> = Vec::with_capacity(page_count);

    for page in 0..page_count {
        let mut ops = Vec::new();
        let mut xobjects = Dictionary::new();

        text_op(&mut ops, header, HEADER_FONT_SIZE, geometry.margin, geometry.header_baseline);
        let counter = format!("page {}/{}", page + 1, page_count);
        text_op(
            &mut ops,
            &counter,
            HEADER_FONT_SIZE,
            geometry.width - geometry.margin - 40.0,
            geometry.margin / 2.0,
        );

        let first = page * per_page;
        let last = (first + per_page).min(symbols.len());
        for (position, symbol) in symbols[first..last].iter().enumerate() {
            let placement = geometry.place(first + position);
            let image_id = doc.add_object(image_stream(&symbol.image)?);
            let name = format!("Im{}", position);
            xobjects.set(name.clone(), image_id);

            let rect = placement.symbol;
            ops.push(Operation::new("q", vec![]));
            ops.push(Operation::new(
                "cm",
                vec![
                    rect.width.into(),
                    0f32.into(),
                    0f32.into(),
                    rect.height.into(),
                    rect.x.into(),
                    rect.y.into(),
                ],
            ));
            ops.push(Operation::new("Do", vec![Object::Name(name.into_bytes())]));
            ops.push(Operation::new("Q", vec![]));

            text_op(
                &mut ops,
                &symbol.caption,
                CAPTION_FONT_SIZE,
                placement.caption_x,
                placement.caption_y,
            );
        }

        let content = Content { operations: ops }
            .encode()
            .map_err(|e| PaperError::PdfWrite(e.to_string()))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![0f32.into(), 0f32.into(), geometry.width.into(), geometry.height.into()],
            "Resources" => dictionary! {
                "Font" => dictionary! { FONT_NAME => font_id },
                "XObject" => xobjects,
            },
        });
        kids.push(page_id.into());
        debug!("Laid out page {} with {} symbol(s)", page + 1, last - first);
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => Object::Integer(page_count as i64),
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
        "Title" => pdf_text(title),
        "Producer" => pdf_text(concat!("paperstore ", env!("CARGO_PKG_VERSION"))),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| PaperError::PdfWrite(e.to_string()))?;
    fs::write(output, &buffer).map_err(|e| PaperError::io(output, e))?;

    info!("Wrote {} page(s) to {}", page_count, output.display());
    Ok(page_count)
}

/// Every image found on one PDF page, converted to grayscale.
pub struct PdfPageImages {
    /// One-based page number.
    pub page: usize,
    pub images: Vec<GrayImage>,
    /// Images that were present but could not be decoded.
    pub skipped: Vec<String>,
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> &'a Object {
    match object {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(object),
        _ => object,
    }
}

fn page_resources(doc: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let mut node = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_DEPTH {
        if let Ok(resources) = node.get(b"Resources") {
            return resolve(doc, resources).as_dict().ok();
        }
        let parent = node.get(b"Parent").ok()?.as_reference().ok()?;
        node = doc.get_dictionary(parent).ok()?;
    }
    None
}

fn collect_images(
    doc: &Document,
    resources: &Dictionary,
    depth: usize,
    images: &mut Vec<GrayImage>,
    skipped: &mut Vec<String>,
) {
    if depth > MAX_DEPTH {
        return;
    }
    let Some(xobjects) = resources
        .get(b"XObject")
        .ok()
        .and_then(|x| resolve(doc, x).as_dict().ok())
    else {
        return;
    };

    for (name, object) in xobjects.iter() {
        let Ok(stream) = resolve(doc, object).as_stream() else {
            continue;
        };
        let subtype = stream
            .dict
            .get(b"Subtype")
            .ok()
            .and_then(|s| s.as_name().ok())
            .unwrap_or_default();

        match subtype {
            b"Image" => match decode_image(doc, stream) {
                Ok(image) => images.push(image),
                Err(reason) => skipped.push(format!(
                    "image /{}: {}",
                    String::from_utf8_lossy(name),
                    reason
                )),
            },
            b"Form" => {
                if let Some(inner) = stream
                    .dict
                    .get(b"Resources")
                    .ok()
                    .and_then(|r| resolve(doc, r).as_dict().ok())
                {
                    collect_images(doc, inner, depth + 1, images, skipped);
                }
            }
            _ => {}
        }
    }
}

/// Decodes the images of every page of the PDF at `path`.
pub fn extract_page_images(path: &Path) -> Result<Vec<PdfPageImages>> {
    let doc = Document::load(path)?;
    let pages = doc.get_pages();
    info!("PDF loaded: {} page(s)", pages.len());

    let mut result = Vec::with_capacity(pages.len());
    for (number, page_id) in pages {
        let mut images = Vec::new();
        let mut skipped = Vec::new();
        if let Some(resources) = page_resources(&doc, page_id) {
            collect_images(&doc, resources, 0, &mut images, &mut skipped);
        }
        debug!("Page {}: {} image(s)", number, images.len());
        result.push(PdfPageImages {
            page: number as usize,
            images,
            skipped,
        });
    }
    Ok(result)
}

fn dict_int(doc: &Document, dict: &Dictionary, key: &[u8]) -> Option<i64> {
    dict.get(key).ok().and_then(|v| resolve(doc, v).as_i64().ok())
}

fn filter_names(doc: &Document, dict: &Dictionary) -> Vec<Vec<u8>> {
    match dict.get(b"Filter").map(|f| resolve(doc, f)) {
        Ok(Object::Name(name)) => vec![name.clone()],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|i| resolve(doc, i).as_name().ok().map(|n| n.to_vec()))
            .collect(),
        _ => Vec::new(),
    }
}

/// Number of colour components, or None for colour spaces we can't map to
/// gray.
fn color_components(doc: &Document, dict: &Dictionary) -> Option<usize> {
    let space = match dict.get(b"ColorSpace") {
        Ok(space) => resolve(doc, space),
        // Image masks carry no colour space.
        Err(_) => return Some(1),
    };
    match space {
        Object::Name(name) => match name.as_slice() {
            b"DeviceGray" | b"CalGray" | b"G" => Some(1),
            b"DeviceRGB" | b"CalRGB" | b"RGB" => Some(3),
            b"DeviceCMYK" | b"CMYK" => Some(4),
            _ => None,
        },
        Object::Array(items) => {
            let family = items.first().and_then(|f| resolve(doc, f).as_name().ok())?;
            match family {
                b"ICCBased" => {
                    let profile = items.get(1).map(|p| resolve(doc, p))?.as_stream().ok()?;
                    dict_int(doc, &profile.dict, b"N").map(|n| n as usize)
                }
                b"CalGray" => Some(1),
                b"CalRGB" | b"Lab" => Some(3),
                _ => None,
            }
        }
        _ => None,
    }
}

fn decode_parms<'a>(doc: &'a Document, dict: &'a Dictionary) -> Option<&'a Dictionary> {
    match dict.get(b"DecodeParms").map(|p| resolve(doc, p)) {
        Ok(Object::Array(items)) => items.first().and_then(|i| resolve(doc, i).as_dict().ok()),
        Ok(other) => other.as_dict().ok(),
        Err(_) => None,
    }
}

/// Runs the lossless filters of an image stream through lopdf. lopdf refuses
/// streams marked as images, so the filters go on a bare copy with indirect
/// parameters resolved.
fn decompress_filters(
    doc: &Document,
    stream: &Stream,
    filters: &[Vec<u8>],
) -> std::result::Result<Vec<u8>, String> {
    let mut names = Vec::with_capacity(filters.len());
    for filter in filters {
        let name: &[u8] = match filter.as_slice() {
            b"FlateDecode" | b"Fl" => b"FlateDecode",
            b"LZWDecode" | b"LZW" => b"LZWDecode",
            other => {
                return Err(format!(
                    "unsupported filter /{}",
                    String::from_utf8_lossy(other)
                ))
            }
        };
        names.push(Object::Name(name.to_vec()));
    }

    let mut dict = Dictionary::new();
    dict.set("Filter", Object::Array(names));
    if let Some(parms) = decode_parms(doc, &stream.dict) {
        dict.set("DecodeParms", Object::Dictionary(parms.clone()));
    }
    Stream::new(dict, stream.content.clone())
        .decompressed_content()
        .map_err(|e| format!("decompression failed: {}", e))
}

fn dimension(doc: &Document, dict: &Dictionary, key: &str) -> std::result::Result<u32, String> {
    let value = dict_int(doc, dict, key.as_bytes()).ok_or_else(|| format!("missing /{}", key))?;
    match u32::try_from(value) {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(format!("invalid /{} {}", key, value)),
    }
}

fn decode_image(doc: &Document, stream: &Stream) -> std::result::Result<GrayImage, String> {
    let dict = &stream.dict;
    let width = dimension(doc, dict, "Width")?;
    let height = dimension(doc, dict, "Height")?;

    let image_mask = matches!(
        dict.get(b"ImageMask").map(|m| resolve(doc, m)),
        Ok(Object::Boolean(true))
    );
    let bpc = if image_mask {
        1
    } else {
        dict_int(doc, dict, b"BitsPerComponent").unwrap_or(8) as usize
    };

    let filters = filter_names(doc, dict);
    let (lossless, jpeg) = match filters.split_last() {
        Some((last, rest)) if matches!(last.as_slice(), b"DCTDecode" | b"DCT") => (rest, true),
        _ => (filters.as_slice(), false),
    };
    let data = if lossless.is_empty() {
        stream.content.clone()
    } else {
        decompress_filters(doc, stream, lossless)?
    };
    if jpeg {
        let image = image::load_from_memory_with_format(&data, ImageFormat::Jpeg)
            .map_err(|e| format!("DCTDecode failed: {}", e))?;
        return Ok(image.to_luma8());
    }

    let components = color_components(doc, dict).ok_or("unsupported colour space")?;

    let inverted = match dict.get(b"Decode").map(|d| resolve(doc, d)) {
        Ok(Object::Array(items)) => match items.first() {
            Some(Object::Integer(1)) => true,
            Some(Object::Real(r)) => *r == 1.0,
            _ => false,
        },
        _ => false,
    };

    let (w, h) = (width as usize, height as usize);
    let mut gray = match (bpc, components) {
        (8, 1) => data.get(..w * h).ok_or("image data too short")?.to_vec(),
        (8, 3) => data
            .get(..w * h * 3)
            .ok_or("image data too short")?
            .chunks_exact(3)
            .map(|p| ((p[0] as u32 * 299 + p[1] as u32 * 587 + p[2] as u32 * 114) / 1000) as u8)
            .collect(),
        (8, 4) => data
            .get(..w * h * 4)
            .ok_or("image data too short")?
            .chunks_exact(4)
            .map(|p| {
                let ink = (p[0] as u32 * 30 + p[1] as u32 * 59 + p[2] as u32 * 11) / 100 + p[3] as u32;
                255 - ink.min(255) as u8
            })
            .collect(),
        (1, 1) => {
            let row_bytes = w.div_ceil(8);
            if data.len() < row_bytes * h {
                return Err("image data too short".to_string());
            }
            let mut out = Vec::with_capacity(w * h);
            for row in data.chunks_exact(row_bytes).take(h) {
                for x in 0..w {
                    let bit = (row[x / 8] >> (7 - x % 8)) & 1;
                    out.push(bit * 255);
                }
            }
            out
        }
        (bpc, components) => {
            return Err(format!(
                "unsupported sample format: {} bit(s), {} component(s)",
                bpc, components
            ))
        }
    };

    if inverted {
        gray.iter_mut().for_each(|v| *v = 255 - *v);
    }

    GrayImage::from_raw(width, height, gray).ok_or_else(|| "image data too short".to_string())
}
