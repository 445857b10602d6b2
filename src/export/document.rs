//! Paginated PDF writer
//!
//! Writes a PDF 1.4 file front to back. Each page is emitted as soon as it
//! holds `rows_per_page` rows, so memory use is bounded by one page. Objects
//! that depend on the final page count (the page tree and catalog) are written
//! by `close`, together with the cross-reference table and trailer. Pages
//! point at the page tree by a reserved object number, which PDF allows as a
//! forward reference.
//!
//! Object layout:
//!
//! | Object | Content |
//! |--------|---------|
//! | 1 | Catalog |
//! | 2 | Page tree |
//! | 3 | Helvetica |
//! | 4 | Helvetica-Bold |
//! | 5 | Info dictionary |
//! | 6.. | Page / content stream pairs |

use std::fmt::Write as _;

use super::{DocumentStructure, DocumentWriter, WriterPhase, is_numeric, title_case};
use crate::error::WriteError;
use crate::types::{Row, TargetFormat};

const FORMAT: &str = "paginated-document";

// A4 landscape, in points
const PAGE_WIDTH: f32 = 842.0;
const PAGE_HEIGHT: f32 = 595.0;
const MARGIN_X: f32 = 30.0;
const MARGIN_TOP: f32 = 50.0;
const MARGIN_BOTTOM: f32 = 55.0;

const TITLE_SIZE: f32 = 12.0;
const TEXT_SIZE: f32 = 9.0;
const CELL_SIZE: f32 = 8.0;
const MAX_LEADING: f32 = 11.0;
// Average Helvetica glyph width relative to the font size
const GLYPH_WIDTH: f32 = 0.5;
// Criteria lines printed on the first page
const MAX_CRITERIA_LINES: usize = 6;

const CATALOG_ID: usize = 1;
const PAGES_ID: usize = 2;
const FONT_REGULAR_ID: usize = 3;
const FONT_BOLD_ID: usize = 4;
const INFO_ID: usize = 5;
const FIRST_PAGE_ID: usize = 6;

/// Streams a report as a landscape PDF table
#[derive(Debug)]
pub struct PdfWriter {
    structure: DocumentStructure,
    rows_per_page: usize,
    headings: Vec<String>,
    numeric_columns: Vec<bool>,
    pending: Vec<Row>,
    /// Byte offset of every object, indexed by object number
    offsets: Vec<Option<u64>>,
    page_ids: Vec<usize>,
    position: u64,
    phase: WriterPhase,
}

impl PdfWriter {
    /// Create a writer decorated with `structure`
    pub fn new(structure: DocumentStructure, rows_per_page: usize) -> Self {
        Self {
            structure,
            rows_per_page: rows_per_page.max(1),
            headings: Vec::new(),
            numeric_columns: Vec::new(),
            pending: Vec::new(),
            offsets: vec![None; FIRST_PAGE_ID],
            page_ids: Vec::new(),
            position: 0,
            phase: WriterPhase::default(),
        }
    }

    /// Pages emitted so far
    pub fn pages(&self) -> usize {
        self.page_ids.len()
    }

    fn emit(&mut self, bytes: &[u8], out: &mut Vec<u8>) {
        out.extend_from_slice(bytes);
        self.position += bytes.len() as u64;
    }

    fn emit_object(&mut self, id: usize, body: &[u8], out: &mut Vec<u8>) {
        if self.offsets.len() <= id {
            self.offsets.resize(id + 1, None);
        }
        self.offsets[id] = Some(self.position);

        self.emit(format!("{id} 0 obj\n").as_bytes(), out);
        self.emit(body, out);
        self.emit(b"\nendobj\n", out);
    }

    fn emit_page(&mut self, out: &mut Vec<u8>) {
        let rows = std::mem::take(&mut self.pending);
        let page_number = self.page_ids.len() + 1;
        let page_id = FIRST_PAGE_ID + self.page_ids.len() * 2;
        let content_id = page_id + 1;

        let content = self.render_page(page_number, &rows);

        let page = format!(
            "<< /Type /Page /Parent {PAGES_ID} 0 R /MediaBox [0 0 {PAGE_WIDTH} {PAGE_HEIGHT}] \
             /Resources << /Font << /F1 {FONT_REGULAR_ID} 0 R /F2 {FONT_BOLD_ID} 0 R >> >> \
             /Contents {content_id} 0 R >>"
        );
        self.emit_object(page_id, page.as_bytes(), out);

        let mut stream = format!("<< /Length {} >>\nstream\n", content.len()).into_bytes();
        stream.extend_from_slice(&content);
        stream.extend_from_slice(b"\nendstream");
        self.emit_object(content_id, &stream, out);

        self.page_ids.push(page_id);
        tracing::trace!(page = page_number, rows = rows.len(), "emitted document page");
    }

    fn render_page(&self, page_number: usize, rows: &[Row]) -> Vec<u8> {
        let mut content = Vec::new();
        let mut y = PAGE_HEIGHT - MARGIN_TOP;

        text(&mut content, "F2", TITLE_SIZE, MARGIN_X, y, &self.structure.title());
        y -= TITLE_SIZE + 4.0;

        let mut generated = format!(
            "Generated {}",
            self.structure.generated_at.format("%Y-%m-%d %H:%M UTC")
        );
        if let Some(user) = &self.structure.user {
            let _ = write!(generated, " by {user}");
        }
        text(&mut content, "F1", TEXT_SIZE, MARGIN_X, y, &generated);
        y -= TEXT_SIZE + 4.0;

        if page_number == 1 {
            for line in self.structure.criteria.iter().take(MAX_CRITERIA_LINES) {
                let line = truncate(&format!("- {line}"), PAGE_WIDTH - 2.0 * MARGIN_X, TEXT_SIZE);
                text(&mut content, "F1", TEXT_SIZE, MARGIN_X, y, &line);
                y -= TEXT_SIZE + 2.0;
            }
        }
        y -= 6.0;

        let columns = self.headings.len().max(1);
        let column_width = (PAGE_WIDTH - 2.0 * MARGIN_X) / columns as f32;
        let leading = ((y - MARGIN_BOTTOM) / (self.rows_per_page + 1) as f32).min(MAX_LEADING);

        for (i, heading) in self.headings.iter().enumerate() {
            let x = MARGIN_X + i as f32 * column_width;
            let heading = truncate(heading, column_width - 2.0, CELL_SIZE);
            text(&mut content, "F2", CELL_SIZE, x, y, &heading);
        }
        // Rule under the header row
        let rule_y = y - 2.5;
        let _ = writeln!(
            Lossy(&mut content),
            "0.5 w {MARGIN_X} {rule_y:.1} m {:.1} {rule_y:.1} l S",
            PAGE_WIDTH - MARGIN_X
        );
        y -= leading;

        for row in rows {
            for (i, cell) in row.iter().enumerate() {
                let cell = truncate(cell, column_width - 2.0, CELL_SIZE);
                let left = MARGIN_X + i as f32 * column_width;
                let numeric = self.numeric_columns.get(i).copied().unwrap_or(false);
                let x = if numeric && is_numeric(&cell) {
                    left + column_width - 2.0 - text_width(&cell, CELL_SIZE)
                } else {
                    left
                };
                text(&mut content, "F1", CELL_SIZE, x, y, &cell);
            }
            y -= leading;
        }

        let footer_y = MARGIN_BOTTOM / 2.0;
        if let Some(copyright) = &self.structure.copyright {
            text(&mut content, "F1", CELL_SIZE, MARGIN_X, footer_y, copyright);
        }
        let page_label = format!("Page {page_number}");
        let page_x = PAGE_WIDTH - MARGIN_X - text_width(&page_label, CELL_SIZE);
        text(&mut content, "F1", CELL_SIZE, page_x, footer_y, &page_label);

        content
    }
}

impl DocumentWriter for PdfWriter {
    fn format(&self) -> TargetFormat {
        TargetFormat::PaginatedDocument
    }

    fn write_header(&mut self, columns: &[String], out: &mut Vec<u8>) -> Result<(), WriteError> {
        self.phase.begin(FORMAT)?;
        self.headings = columns.iter().map(|c| title_case(c)).collect();
        self.numeric_columns = vec![true; columns.len()];

        // Version line plus binary marker
        self.emit(b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n", out);

        self.emit_object(
            FONT_REGULAR_ID,
            b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>",
            out,
        );
        self.emit_object(
            FONT_BOLD_ID,
            b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica-Bold /Encoding /WinAnsiEncoding >>",
            out,
        );

        let mut info = Vec::new();
        info.extend_from_slice(b"<< /Title ");
        pdf_string(&mut info, &self.structure.title());
        if let Some(user) = &self.structure.user {
            info.extend_from_slice(b" /Author ");
            pdf_string(&mut info, user);
        }
        info.extend_from_slice(b" /Producer (report-stream) /CreationDate ");
        pdf_string(
            &mut info,
            &self.structure.generated_at.format("D:%Y%m%d%H%M%SZ").to_string(),
        );
        info.extend_from_slice(b" >>");
        self.emit_object(INFO_ID, &info, out);

        Ok(())
    }

    fn write_rows(&mut self, rows: &[Row], out: &mut Vec<u8>) -> Result<(), WriteError> {
        self.phase.require_open(FORMAT)?;

        for row in rows {
            // A column stays right-aligned only while every non-empty value is numeric
            for (i, cell) in row.iter().enumerate() {
                if let Some(flag) = self.numeric_columns.get_mut(i) {
                    *flag &= cell.is_empty() || is_numeric(cell);
                }
            }
            self.pending.push(row.clone());
            if self.pending.len() >= self.rows_per_page {
                self.emit_page(out);
            }
        }
        Ok(())
    }

    fn close(&mut self, out: &mut Vec<u8>) -> Result<(), WriteError> {
        self.phase.finish(FORMAT)?;

        if !self.pending.is_empty() || self.page_ids.is_empty() {
            self.emit_page(out);
        }

        let kids: Vec<String> = self.page_ids.iter().map(|id| format!("{id} 0 R")).collect();
        let pages = format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids.join(" "),
            self.page_ids.len()
        );
        self.emit_object(PAGES_ID, pages.as_bytes(), out);

        let catalog = format!("<< /Type /Catalog /Pages {PAGES_ID} 0 R >>");
        self.emit_object(CATALOG_ID, catalog.as_bytes(), out);

        let xref_start = self.position;
        let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", self.offsets.len());
        for offset in &self.offsets[1..] {
            match offset {
                Some(offset) => {
                    let _ = write!(xref, "{offset:010} 00000 n \n");
                }
                None => xref.push_str("0000000000 65535 f \n"),
            }
        }
        let _ = write!(
            xref,
            "trailer\n<< /Size {} /Root {CATALOG_ID} 0 R /Info {INFO_ID} 0 R >>\nstartxref\n{xref_start}\n%%EOF\n",
            self.offsets.len()
        );
        self.emit(xref.as_bytes(), out);

        tracing::debug!(pages = self.page_ids.len(), bytes = self.position, "closed document");
        Ok(())
    }
}

/// `fmt::Write` adapter for byte buffers holding ASCII operators
struct Lossy<'a>(&'a mut Vec<u8>);

impl std::fmt::Write for Lossy<'_> {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        self.0.extend_from_slice(s.as_bytes());
        Ok(())
    }
}

/// Append one positioned text run
fn text(content: &mut Vec<u8>, font: &str, size: f32, x: f32, y: f32, value: &str) {
    let _ = write!(Lossy(content), "BT /{font} {size} Tf {x:.1} {y:.1} Td ");
    pdf_string(content, value);
    content.extend_from_slice(b" Tj ET\n");
}

/// Append a literal string in WinAnsi bytes
///
/// Characters outside Latin-1 become `?`; control characters become spaces.
fn pdf_string(out: &mut Vec<u8>, value: &str) {
    out.push(b'(');
    for c in value.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push(b'\\');
                out.push(c as u8);
            }
            c if (c as u32) < 0x20 || c == '\u{7F}' => out.push(b' '),
            c if (c as u32) < 0x80 => out.push(c as u8),
            c if (0xA0..=0xFF).contains(&(c as u32)) => out.push(c as u32 as u8),
            _ => out.push(b'?'),
        }
    }
    out.push(b')');
}

fn text_width(value: &str, size: f32) -> f32 {
    value.chars().count() as f32 * size * GLYPH_WIDTH
}

/// Shorten `value` to fit `width` points, marking the cut with `..`
fn truncate(value: &str, width: f32, size: f32) -> String {
    let max_chars = (width / (size * GLYPH_WIDTH)).floor().max(1.0) as usize;
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let keep = max_chars.saturating_sub(2);
    let mut short: String = value.chars().take(keep).collect();
    short.push_str("..");
    short
}
