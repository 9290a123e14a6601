//! Tabular report rendering to CSV and PDF.

use crate::error::{HarvestError, HarvestResult};
use printpdf::path::{PaintMode, WindingOrder};
use printpdf::*;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReportDocument {
    pub title: String,
    pub subtitle: Option<String>,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ReportDocument {
    pub fn new(title: impl Into<String>, headers: &[&str]) -> Self {
        Self {
            title: title.into(),
            subtitle: None,
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }
}

pub fn to_csv(doc: &ReportDocument) -> HarvestResult<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&doc.headers)?;
    for row in &doc.rows {
        writer.write_record(row)?;
    }
    writer
        .into_inner()
        .map_err(|e| HarvestError::Internal(format!("CSV flush failed: {}", e)))
}

// A4 portrait, in millimetres.
const PAGE_W: f32 = 210.0;
const PAGE_H: f32 = 297.0;
const MARGIN_X: f32 = 12.0;
const CONTENT_W: f32 = PAGE_W - 2.0 * MARGIN_X;
const TOP_Y: f32 = 280.0;
const BOTTOM_Y: f32 = 20.0;
const ROW_H: f32 = 7.0;
const TITLE_BLOCK_H: f32 = 22.0;
const BODY_SIZE: f32 = 8.0;

/// Table rows that fit on a page; the first page loses room to the title block.
pub fn rows_per_page(first_page: bool) -> usize {
    let mut usable = TOP_Y - BOTTOM_Y - ROW_H;
    if first_page {
        usable -= TITLE_BLOCK_H;
    }
    (usable / ROW_H).floor() as usize
}

pub fn page_count(row_count: usize) -> usize {
    let first = rows_per_page(true);
    if row_count <= first {
        return 1;
    }
    1 + (row_count - first).div_ceil(rows_per_page(false))
}

/// Clips a cell to what fits in `width_mm` at `size` pt of Helvetica.
pub fn fit_cell(text: &str, width_mm: f32, size: f32) -> String {
    // average Helvetica glyph is about half an em; 1pt = 0.3527mm
    let char_w = size * 0.5 * 0.3527;
    let max_chars = ((width_mm - 2.0) / char_w).floor().max(1.0) as usize;
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(2).max(1);
    let head: String = text.chars().take(keep).collect();
    format!("{}..", head)
}

/// Renders the document as a paginated table using the built-in Helvetica faces.
pub fn to_pdf(doc: &ReportDocument) -> HarvestResult<Vec<u8>> {
    let (pdf, page1, layer1) = PdfDocument::new(&doc.title, Mm(PAGE_W), Mm(PAGE_H), "Layer 1");
    let font = pdf.add_builtin_font(BuiltinFont::Helvetica)?;
    let bold = pdf.add_builtin_font(BuiltinFont::HelveticaBold)?;

    let cols = doc.headers.len().max(1);
    let col_w = CONTENT_W / cols as f32;
    let total_pages = page_count(doc.rows.len());

    let draw_line = |layer: &PdfLayerReference, x1: f32, y1: f32, x2: f32, y2: f32| {
        let line = Line::from_iter(
            std::iter::once((Point::new(Mm(x1), Mm(y1)), false))
                .chain(std::iter::once((Point::new(Mm(x2), Mm(y2)), false))),
        );
        layer.add_line(line);
    };

    let draw_header_band = |layer: &PdfLayerReference, y: f32| {
        let pts = vec![
            (Point::new(Mm(MARGIN_X), Mm(y - 2.0)), false),
            (Point::new(Mm(MARGIN_X + CONTENT_W), Mm(y - 2.0)), false),
            (Point::new(Mm(MARGIN_X + CONTENT_W), Mm(y + ROW_H - 2.0)), false),
            (Point::new(Mm(MARGIN_X), Mm(y + ROW_H - 2.0)), false),
        ];
        layer.set_fill_color(Color::Greyscale(Greyscale::new(0.9, None)));
        layer.add_polygon(Polygon {
            rings: vec![pts],
            mode: PaintMode::Fill,
            winding_order: WindingOrder::NonZero,
        });
        layer.set_fill_color(Color::Greyscale(Greyscale::new(0.0, None)));
        for (i, header) in doc.headers.iter().enumerate() {
            let x = MARGIN_X + i as f32 * col_w + 1.0;
            layer.use_text(fit_cell(header, col_w, BODY_SIZE), BODY_SIZE, Mm(x), Mm(y), &bold);
        }
    };

    let footer = |layer: &PdfLayerReference, page: usize| {
        let text = format!("Page {} of {}", page, total_pages);
        layer.use_text(text, 7.0, Mm(PAGE_W - MARGIN_X - 22.0), Mm(10.0), &font);
    };

    let mut layer = pdf.get_page(page1).get_layer(layer1);
    let mut y = TOP_Y;
    layer.use_text(doc.title.as_str(), 16.0, Mm(MARGIN_X), Mm(y), &bold);
    if let Some(sub) = &doc.subtitle {
        layer.use_text(sub.as_str(), 9.0, Mm(MARGIN_X), Mm(y - 8.0), &font);
    }
    layer.use_text(
        format!("{} rows", doc.rows.len()),
        9.0,
        Mm(MARGIN_X),
        Mm(y - 14.0),
        &font,
    );
    y -= TITLE_BLOCK_H;
    draw_header_band(&layer, y);
    y -= ROW_H;

    let mut page = 1;
    let mut on_page = 0;
    let mut capacity = rows_per_page(true);
    for row in &doc.rows {
        if on_page == capacity {
            footer(&layer, page);
            let (next_page, next_layer) = pdf.add_page(Mm(PAGE_W), Mm(PAGE_H), "Layer 1");
            layer = pdf.get_page(next_page).get_layer(next_layer);
            page += 1;
            on_page = 0;
            capacity = rows_per_page(false);
            y = TOP_Y;
            draw_header_band(&layer, y);
            y -= ROW_H;
        }
        for (i, cell) in row.iter().take(cols).enumerate() {
            let x = MARGIN_X + i as f32 * col_w + 1.0;
            layer.use_text(fit_cell(cell, col_w, BODY_SIZE), BODY_SIZE, Mm(x), Mm(y), &font);
        }
        layer.set_outline_thickness(0.2);
        draw_line(&layer, MARGIN_X, y - 2.0, MARGIN_X + CONTENT_W, y - 2.0);
        y -= ROW_H;
        on_page += 1;
    }
    footer(&layer, page);

    Ok(pdf.save_to_bytes()?)
}
