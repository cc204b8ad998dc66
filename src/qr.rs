use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

#[cfg(any(feature = "encode", feature = "decode"))]
use image::GrayImage;

#[cfg(feature = "encode")]
use image::Luma;

#[cfg(feature = "encode")]
use qrcode::{bits::Bits, QrCode, Version};

#[cfg(feature = "decode")]
use rqrr::PreparedImage;

#[cfg(feature = "encode")]
use crate::config::{EcLevel, SymbolSpec};
use crate::chunk::Record;
use crate::error::{PaperError, Result};

// Byte-mode capacity never reaches this, even for version 40 at level L.
#[cfg(feature = "encode")]
const CAPACITY_SEARCH_LIMIT: usize = 4096;

/// Serialized symbol content of a record: the record bytes in base64.
pub fn record_to_text(record: &Record) -> String {
    BASE64.encode(record.to_bytes())
}

pub fn record_from_text(text: &str) -> Result<Record> {
    let bytes = BASE64
        .decode(text.trim())
        .map_err(|e| PaperError::InvalidRecord(format!("not base64: {}", e)))?;
    Record::from_bytes(&bytes)
}

#[cfg(feature = "encode")]
fn byte_mode_bits(data: &[u8], version: u8, ec_level: EcLevel) -> Option<Bits> {
    let mut bits = Bits::new(Version::Normal(version as i16));
    bits.push_byte_data(data).ok()?;
    bits.push_terminator(ec_level.into()).ok()?;
    Some(bits)
}

/// Exact number of bytes a symbol of this version and level holds in byte
/// mode.
#[cfg(feature = "encode")]
pub fn symbol_capacity(version: u8, ec_level: EcLevel) -> usize {
    let fits = |n: usize| byte_mode_bits(&vec![0u8; n], version, ec_level).is_some();

    let (mut lo, mut hi) = (0usize, CAPACITY_SEARCH_LIMIT);
    while lo + 1 < hi {
        let mid = (lo + hi) / 2;
        if fits(mid) {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    lo
}

/// Renders `data` as one QR symbol at the configured version and level, quiet
/// zone included, `pixel_scale` pixels per module.
#[cfg(feature = "encode")]
pub fn generate_qr_image(data: &[u8], spec: &SymbolSpec) -> Result<GrayImage> {
    // Capacity is only searched for when the data does not fit.
    let bits = byte_mode_bits(data, spec.version, spec.ec_level).ok_or_else(|| {
        PaperError::CapacityExceeded {
            len: data.len(),
            capacity: symbol_capacity(spec.version, spec.ec_level),
        }
    })?;
    let code = QrCode::with_bits(bits, spec.ec_level.into())
        .map_err(|e| PaperError::Qr(e.to_string()))?;

    let image = code
        .render::<Luma<u8>>()
        .quiet_zone(true)
        .module_dimensions(spec.pixel_scale, spec.pixel_scale)
        .build();

    Ok(image)
}

#[cfg(feature = "encode")]
pub fn encode_record(record: &Record, spec: &SymbolSpec) -> Result<GrayImage> {
    generate_qr_image(record_to_text(record).as_bytes(), spec)
}

/// Outcome of one QR candidate found in an image.
#[cfg(feature = "decode")]
#[derive(Debug, Clone)]
pub enum ScannedSymbol {
    Decoded(String),
    Unreadable(String),
}

/// Finds every QR candidate in `gray` and decodes what it can.
#[cfg(feature = "decode")]
pub fn scan_gray(gray: GrayImage) -> Vec<ScannedSymbol> {
    let mut prepared = PreparedImage::prepare(gray);
    let grids = prepared.detect_grids();

    grids
        .iter()
        .map(|grid| match grid.decode() {
            Ok((_, content)) => ScannedSymbol::Decoded(content),
            Err(e) => ScannedSymbol::Unreadable(format!("{:?}", e)),
        })
        .collect()
}
