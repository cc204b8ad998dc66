//! Encode and decode options, with the defaults the CLI exposes.

use std::fmt;

/// QR error-correction level. Higher levels survive more print/scan damage
/// and hold less data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum EcLevel {
    /// ~7% recovery
    L,
    /// ~15% recovery
    M,
    /// ~25% recovery
    Q,
    /// ~30% recovery
    H,
}

impl fmt::Display for EcLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EcLevel::L => "L",
            EcLevel::M => "M",
            EcLevel::Q => "Q",
            EcLevel::H => "H",
        };
        f.write_str(s)
    }
}

#[cfg(feature = "encode")]
impl From<EcLevel> for qrcode::EcLevel {
    fn from(level: EcLevel) -> Self {
        match level {
            EcLevel::L => qrcode::EcLevel::L,
            EcLevel::M => qrcode::EcLevel::M,
            EcLevel::Q => qrcode::EcLevel::Q,
            EcLevel::H => qrcode::EcLevel::H,
        }
    }
}

pub const MAX_QR_VERSION: u8 = 40;
/// Quiet zone the QR standard requires around a normal symbol, in modules.
pub const QUIET_ZONE_MODULES: u32 = 4;

/// How each symbol is built and rasterised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolSpec {
    /// QR version, 1..=40. All symbols of a document share it.
    pub version: u8,
    pub ec_level: EcLevel,
    /// Pixels per module in the embedded symbol image.
    pub pixel_scale: u32,
}

impl Default for SymbolSpec {
    fn default() -> Self {
        Self {
            version: MAX_QR_VERSION,
            ec_level: EcLevel::Q,
            pixel_scale: 4,
        }
    }
}

impl SymbolSpec {
    /// Modules per side, without the quiet zone.
    pub fn modules(&self) -> u32 {
        17 + 4 * self.version as u32
    }

    /// Modules per side, including the quiet zone on both sides.
    pub fn modules_with_quiet_zone(&self) -> u32 {
        self.modules() + 2 * QUIET_ZONE_MODULES
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.version == 0 || self.version > MAX_QR_VERSION {
            return Err(crate::PaperError::InvalidInput(format!(
                "QR version must be between 1 and {}, got {}",
                MAX_QR_VERSION, self.version
            )));
        }
        if self.pixel_scale == 0 {
            return Err(crate::PaperError::InvalidInput(
                "pixel scale must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Paper {
    A4,
    Letter,
}

impl Paper {
    /// (width, height) in millimetres, portrait.
    pub fn size_mm(&self) -> (f32, f32) {
        match self {
            Paper::A4 => (210.0, 297.0),
            Paper::Letter => (215.9, 279.4),
        }
    }
}

/// Grid geometry of a printed page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageLayout {
    pub paper: Paper,
    pub margin_mm: f32,
    pub columns: u32,
    pub rows: u32,
    /// Band at the top of each page holding the document header line.
    pub header_mm: f32,
    /// Band under each symbol holding its caption.
    pub caption_mm: f32,
}

impl Default for PageLayout {
    fn default() -> Self {
        Self {
            paper: Paper::A4,
            margin_mm: 8.0,
            columns: 2,
            rows: 3,
            header_mm: 10.0,
            caption_mm: 5.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EncodeOptions {
    pub symbol: SymbolSpec,
    pub layout: PageLayout,
    /// Overrides the largest chunk that fits the symbol. Too large a value
    /// fails with `CapacityExceeded`.
    pub chunk_size: Option<usize>,
    /// zlib-compress the payload before chunking.
    pub compress: bool,
    /// Skip the manifest symbol (filename, size, SHA-256).
    pub no_manifest: bool,
    /// Text for the page header; defaults to the input filename.
    pub title: Option<String>,
}

/// Where decode gets its page bitmaps from when the input is a PDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageSourceMode {
    /// Decode the image XObjects embedded in each page.
    #[default]
    EmbeddedImages,
    /// Render each page through pdfium.
    Rasterize,
}

#[derive(Debug, Clone)]
pub struct DecodeOptions {
    pub source: PageSourceMode,
    /// Rendering resolution for `PageSourceMode::Rasterize`.
    pub dpi: u32,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            source: PageSourceMode::EmbeddedImages,
            dpi: 300,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_dimensions() {
        let spec = SymbolSpec::default();
        assert_eq!(spec.modules(), 177);
        assert_eq!(spec.modules_with_quiet_zone(), 185);

        let small = SymbolSpec {
            version: 1,
            ..SymbolSpec::default()
        };
        assert_eq!(small.modules(), 21);
    }

    #[test]
    fn test_symbol_spec_validation() {
        assert!(SymbolSpec::default().validate().is_ok());
        let bad = SymbolSpec {
            version: 41,
            ..SymbolSpec::default()
        };
        assert!(bad.validate().is_err());
        let bad = SymbolSpec {
            pixel_scale: 0,
            ..SymbolSpec::default()
        };
        assert!(bad.validate().is_err());
    }
}
