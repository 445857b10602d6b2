//! Delimited text writer

use csv::{QuoteStyle, Terminator, WriterBuilder};

use super::{DocumentWriter, WriterPhase, title_case};
use crate::error::WriteError;
use crate::types::{Row, TargetFormat};

const FORMAT: &str = "delimited-text";

/// Writes one line per row, tab-separated unless configured otherwise
///
/// Fields containing the delimiter, a quote or a line break are wrapped in
/// double quotes with embedded quotes doubled. There is no footer.
#[derive(Debug)]
pub struct DelimitedWriter {
    delimiter: u8,
    phase: WriterPhase,
}

impl DelimitedWriter {
    /// Create a writer using the ASCII `delimiter` between fields
    pub fn new(delimiter: u8) -> Self {
        Self {
            delimiter,
            phase: WriterPhase::default(),
        }
    }

    /// Encode `records` onto the end of `out`
    fn encode<I, R>(&self, records: I, out: &mut Vec<u8>) -> Result<(), WriteError>
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator,
        R::Item: AsRef<[u8]>,
    {
        // Rows are checked against the header by the sink
        let mut writer = WriterBuilder::new()
            .delimiter(self.delimiter)
            .quote_style(QuoteStyle::Necessary)
            .terminator(Terminator::Any(b'\n'))
            .flexible(true)
            .from_writer(out);

        for record in records {
            writer.write_record(record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl DocumentWriter for DelimitedWriter {
    fn format(&self) -> TargetFormat {
        TargetFormat::DelimitedText
    }

    fn write_header(&mut self, columns: &[String], out: &mut Vec<u8>) -> Result<(), WriteError> {
        self.phase.begin(FORMAT)?;
        let headings: Vec<String> = columns.iter().map(|c| title_case(c)).collect();
        self.encode([headings], out)
    }

    fn write_rows(&mut self, rows: &[Row], out: &mut Vec<u8>) -> Result<(), WriteError> {
        self.phase.require_open(FORMAT)?;
        self.encode(rows, out)
    }

    fn close(&mut self, _out: &mut Vec<u8>) -> Result<(), WriteError> {
        self.phase.finish(FORMAT)
    }
}
