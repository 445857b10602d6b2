//! SpreadsheetML 2003 writer
//!
//! Produces an XML workbook that spreadsheet applications open as `.xls`.
//! Unlike the zipped OOXML format it can be written strictly front to back,
//! which keeps the export streaming.

use std::fmt::Write as _;

use super::{DocumentStructure, DocumentWriter, WriterPhase, is_numeric, title_case};
use crate::error::WriteError;
use crate::types::{Row, TargetFormat};

const FORMAT: &str = "spreadsheet";

/// Writes a workbook with one header row per worksheet
///
/// After `max_rows_per_sheet` data rows the current worksheet is closed and a
/// new one opened with the header repeated.
#[derive(Debug)]
pub struct SpreadsheetWriter {
    structure: DocumentStructure,
    max_rows_per_sheet: u64,
    headings: Vec<String>,
    sheet: u32,
    rows_in_sheet: u64,
    phase: WriterPhase,
}

impl SpreadsheetWriter {
    /// Create a writer decorated with `structure`
    pub fn new(structure: DocumentStructure, max_rows_per_sheet: u64) -> Self {
        Self {
            structure,
            max_rows_per_sheet: max_rows_per_sheet.max(1),
            headings: Vec::new(),
            sheet: 0,
            rows_in_sheet: 0,
            phase: WriterPhase::default(),
        }
    }

    /// Worksheets opened so far
    pub fn sheets(&self) -> u32 {
        self.sheet
    }

    fn open_sheet(&mut self, out: &mut String) {
        self.sheet += 1;
        self.rows_in_sheet = 0;

        let _ = write!(out, "<Worksheet ss:Name=\"Sheet {}\">\n<Table>\n", self.sheet);
        out.push_str("<Row ss:StyleID=\"header\">");
        for heading in &self.headings {
            out.push_str("<Cell><Data ss:Type=\"String\">");
            xml_escape_into(heading, out);
            out.push_str("</Data></Cell>");
        }
        out.push_str("</Row>\n");
    }

    fn close_sheet(out: &mut String) {
        out.push_str("</Table>\n</Worksheet>\n");
    }

    fn push_row(row: &Row, out: &mut String) {
        out.push_str("<Row>");
        for cell in row {
            if is_numeric(cell) {
                out.push_str("<Cell><Data ss:Type=\"Number\">");
                out.push_str(cell);
            } else {
                // String cells are never evaluated, so formula-like text is kept as-is
                out.push_str("<Cell><Data ss:Type=\"String\">");
                xml_escape_into(cell, out);
            }
            out.push_str("</Data></Cell>");
        }
        out.push_str("</Row>\n");
    }
}

impl DocumentWriter for SpreadsheetWriter {
    fn format(&self) -> TargetFormat {
        TargetFormat::Spreadsheet
    }

    fn write_header(&mut self, columns: &[String], out: &mut Vec<u8>) -> Result<(), WriteError> {
        self.phase.begin(FORMAT)?;
        self.headings = columns.iter().map(|c| title_case(c)).collect();

        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str("<?mso-application progid=\"Excel.Sheet\"?>\n");
        xml.push_str(
            "<Workbook xmlns=\"urn:schemas-microsoft-com:office:spreadsheet\" \
             xmlns:o=\"urn:schemas-microsoft-com:office:office\" \
             xmlns:ss=\"urn:schemas-microsoft-com:office:spreadsheet\">\n",
        );

        xml.push_str("<DocumentProperties xmlns=\"urn:schemas-microsoft-com:office:office\">\n");
        xml.push_str("<Title>");
        xml_escape_into(&self.structure.title(), &mut xml);
        xml.push_str("</Title>\n");
        if let Some(user) = &self.structure.user {
            xml.push_str("<Author>");
            xml_escape_into(user, &mut xml);
            xml.push_str("</Author>\n");
        }
        if let Some(business) = &self.structure.business_name {
            xml.push_str("<Company>");
            xml_escape_into(business, &mut xml);
            xml.push_str("</Company>\n");
        }
        let _ = writeln!(
            xml,
            "<Created>{}</Created>",
            self.structure.generated_at.format("%Y-%m-%dT%H:%M:%SZ")
        );
        xml.push_str("</DocumentProperties>\n");

        xml.push_str(
            "<Styles>\n<Style ss:ID=\"header\"><Font ss:Bold=\"1\"/></Style>\n</Styles>\n",
        );

        self.open_sheet(&mut xml);
        out.extend_from_slice(xml.as_bytes());
        Ok(())
    }

    fn write_rows(&mut self, rows: &[Row], out: &mut Vec<u8>) -> Result<(), WriteError> {
        self.phase.require_open(FORMAT)?;

        let mut xml = String::new();
        for row in rows {
            if self.rows_in_sheet >= self.max_rows_per_sheet {
                Self::close_sheet(&mut xml);
                self.open_sheet(&mut xml);
            }
            Self::push_row(row, &mut xml);
            self.rows_in_sheet += 1;
        }
        out.extend_from_slice(xml.as_bytes());
        Ok(())
    }

    fn close(&mut self, out: &mut Vec<u8>) -> Result<(), WriteError> {
        self.phase.finish(FORMAT)?;

        let mut xml = String::new();
        Self::close_sheet(&mut xml);
        xml.push_str("</Workbook>\n");
        out.extend_from_slice(xml.as_bytes());
        Ok(())
    }
}

/// Escape markup characters and drop code points XML 1.0 cannot carry
fn xml_escape_into(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\n' => out.push_str("&#10;"),
            '\t' | '\r' => out.push(c),
            c if (c as u32) < 0x20 => {}
            '\u{FFFE}' | '\u{FFFF}' => {}
            c => out.push(c),
        }
    }
}
