//! Page geometry: where each symbol goes.
//!
//! Coordinates are PDF points with the origin at the bottom-left corner of
//! the page. Symbols fill a page left-to-right, top-to-bottom before the
//! next page starts.

use crate::config::PageLayout;
use crate::error::{PaperError, Result};

pub const PT_PER_MM: f32 = 72.0 / 25.4;

/// Fraction of a grid cell a symbol may occupy.
const CELL_FILL: f32 = 0.95;

/// Below this printed module size, consumer printers and scanners start to
/// lose symbols.
pub const MIN_MODULE_MM: f32 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    /// Zero-based page number.
    pub page: usize,
    pub row: u32,
    pub column: u32,
    /// Square area of the symbol, quiet zone included.
    pub symbol: Rect,
    /// Baseline origin of the caption under the symbol.
    pub caption_x: f32,
    pub caption_y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub width: f32,
    pub height: f32,
    pub margin: f32,
    pub cell_width: f32,
    pub cell_height: f32,
    pub symbol_size: f32,
    pub header_baseline: f32,
    layout: PageLayout,
}

impl PageGeometry {
    pub fn new(layout: &PageLayout) -> Result<Self> {
        if layout.columns == 0 || layout.rows == 0 {
            return Err(PaperError::InvalidLayout(format!(
                "grid must have at least one column and one row, got {}x{}",
                layout.columns, layout.rows
            )));
        }
        if layout.margin_mm < 0.0 || layout.header_mm < 0.0 || layout.caption_mm < 0.0 {
            return Err(PaperError::InvalidLayout(
                "margins and bands must not be negative".to_string(),
            ));
        }

        let (width_mm, height_mm) = layout.paper.size_mm();
        let width = width_mm * PT_PER_MM;
        let height = height_mm * PT_PER_MM;
        let margin = layout.margin_mm * PT_PER_MM;
        let header = layout.header_mm * PT_PER_MM;
        let caption = layout.caption_mm * PT_PER_MM;

        let avail_w = width - 2.0 * margin;
        let avail_h = height - 2.0 * margin - header;
        if avail_w <= 0.0 || avail_h <= 0.0 {
            return Err(PaperError::InvalidLayout(format!(
                "margins of {} mm leave no room on the page",
                layout.margin_mm
            )));
        }

        let cell_width = avail_w / layout.columns as f32;
        let cell_height = avail_h / layout.rows as f32;
        let symbol_size = (cell_width.min(cell_height - caption)) * CELL_FILL;
        if symbol_size <= 0.0 {
            return Err(PaperError::InvalidLayout(format!(
                "a {}x{} grid leaves no room for symbols",
                layout.columns, layout.rows
            )));
        }

        Ok(PageGeometry {
            width,
            height,
            margin,
            cell_width,
            cell_height,
            symbol_size,
            header_baseline: height - margin - header / 2.0,
            layout: *layout,
        })
    }

    pub fn per_page(&self) -> usize {
        (self.layout.columns * self.layout.rows) as usize
    }

    pub fn page_count(&self, symbols: usize) -> usize {
        symbols.div_ceil(self.per_page())
    }

    /// Printed size of one module of a symbol `modules` wide, quiet zone
    /// included.
    pub fn module_size_mm(&self, modules: u32) -> f32 {
        self.symbol_size / PT_PER_MM / modules as f32
    }

    pub fn place(&self, position: usize) -> Placement {
        let per_page = self.per_page();
        let page = position / per_page;
        let slot = (position % per_page) as u32;
        let row = slot / self.layout.columns;
        let column = slot % self.layout.columns;

        let caption = self.layout.caption_mm * PT_PER_MM;
        let grid_top = self.height - self.margin - self.layout.header_mm * PT_PER_MM;
        let cell_x = self.margin + column as f32 * self.cell_width;
        let cell_top = grid_top - row as f32 * self.cell_height;

        let x = cell_x + (self.cell_width - self.symbol_size) / 2.0;
        let y = cell_top - (self.cell_height - caption - self.symbol_size) / 2.0 - self.symbol_size;

        Placement {
            page,
            row,
            column,
            symbol: Rect {
                x,
                y,
                width: self.symbol_size,
                height: self.symbol_size,
            },
            caption_x: x,
            caption_y: y - caption * 0.7,
        }
    }
}

/// Placement of `count` symbols in order.
pub fn layout_symbols(count: usize, layout: &PageLayout) -> Result<Vec<Placement>> {
    let geometry = PageGeometry::new(layout)?;
    Ok((0..count).map(|i| geometry.place(i)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Paper;

    fn inside(inner: &Rect, outer: &Rect) -> bool {
        inner.x >= outer.x
            && inner.y >= outer.y
            && inner.x + inner.width <= outer.x + outer.width + 1e-3
            && inner.y + inner.height <= outer.y + outer.height + 1e-3
    }

    #[test]
    fn test_fill_order() {
        let layout = PageLayout {
            columns: 2,
            rows: 3,
            ..PageLayout::default()
        };
        let placements = layout_symbols(8, &layout).unwrap();

        let cells: Vec<(usize, u32, u32)> =
            placements.iter().map(|p| (p.page, p.row, p.column)).collect();
        assert_eq!(
            cells,
            vec![
                (0, 0, 0),
                (0, 0, 1),
                (0, 1, 0),
                (0, 1, 1),
                (0, 2, 0),
                (0, 2, 1),
                (1, 0, 0),
                (1, 0, 1)
            ]
        );

        // Left to right, then downwards in PDF space.
        assert!(placements[1].symbol.x > placements[0].symbol.x);
        assert!(placements[2].symbol.y < placements[0].symbol.y);
        assert_eq!(placements[6].symbol, placements[0].symbol);
    }

    #[test]
    fn test_symbols_stay_inside_margins() {
        let layout = PageLayout {
            paper: Paper::Letter,
            margin_mm: 12.0,
            columns: 3,
            rows: 4,
            ..PageLayout::default()
        };
        let geometry = PageGeometry::new(&layout).unwrap();
        let printable = Rect {
            x: geometry.margin,
            y: geometry.margin,
            width: geometry.width - 2.0 * geometry.margin,
            height: geometry.height - 2.0 * geometry.margin,
        };
        for p in layout_symbols(12, &layout).unwrap() {
            assert!(inside(&p.symbol, &printable), "{:?}", p);
            assert!(p.caption_y > geometry.margin);
        }
    }

    #[test]
    fn test_deterministic() {
        let layout = PageLayout::default();
        assert_eq!(
            layout_symbols(13, &layout).unwrap(),
            layout_symbols(13, &layout).unwrap()
        );
    }

    #[test]
    fn test_page_count() {
        let geometry = PageGeometry::new(&PageLayout::default()).unwrap();
        assert_eq!(geometry.per_page(), 6);
        assert_eq!(geometry.page_count(1), 1);
        assert_eq!(geometry.page_count(6), 1);
        assert_eq!(geometry.page_count(7), 2);
    }

    #[test]
    fn test_invalid_layouts() {
        let no_columns = PageLayout {
            columns: 0,
            ..PageLayout::default()
        };
        assert!(matches!(
            PageGeometry::new(&no_columns),
            Err(PaperError::InvalidLayout(_))
        ));

        let huge_margin = PageLayout {
            margin_mm: 120.0,
            ..PageLayout::default()
        };
        assert!(matches!(
            PageGeometry::new(&huge_margin),
            Err(PaperError::InvalidLayout(_))
        ));
    }

    #[test]
    fn test_module_size() {
        let geometry = PageGeometry::new(&PageLayout::default()).unwrap();
        // Version 40 with quiet zone on a 2x3 A4 grid prints comfortably.
        assert!(geometry.module_size_mm(185) > MIN_MODULE_MM);

        let dense = PageGeometry::new(&PageLayout {
            columns: 5,
            rows: 7,
            ..PageLayout::default()
        })
        .unwrap();
        assert!(dense.module_size_mm(185) < MIN_MODULE_MM);
    }
}
