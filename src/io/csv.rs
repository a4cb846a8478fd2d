// Minimal delimited-text reader/writer for the stage artifacts

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::error::PipelineError;

use super::corpus::load_text;

const BOM: char = '\u{feff}';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvFormat {
    pub delimiter: char,
    pub decimal_separator: char,
}

impl Default for CsvFormat {
    fn default() -> Self {
        Self { delimiter: ',', decimal_separator: '.' }
    }
}

impl CsvFormat {
    /// Fixed four-place decimal with the configured separator.
    pub fn decimal(&self, value: f64) -> String {
        let s = format!("{:.4}", value);
        if self.decimal_separator == '.' { s } else { s.replace('.', &self.decimal_separator.to_string()) }
    }

    fn quote(&self, field: &str) -> String {
        let needs = field.contains(self.delimiter)
            || field.contains('"')
            || field.contains('\n')
            || field.contains('\r');
        if needs { format!("\"{}\"", field.replace('"', "\"\"")) } else { field.to_string() }
    }
}

/// A row type with a fixed header.
pub trait CsvRecord {
    const HEADER: &'static [&'static str];
    fn fields(&self, fmt: &CsvFormat) -> Vec<String>;
}

pub struct CsvWriter<W: Write> {
    out: W,
    fmt: CsvFormat,
}

impl<W: Write> CsvWriter<W> {
    pub fn new(out: W, fmt: CsvFormat, header: &[&str]) -> io::Result<Self> {
        let mut w = Self { out, fmt };
        let header: Vec<String> = header.iter().map(|h| h.to_string()).collect();
        w.write_row(&header)?;
        Ok(w)
    }

    pub fn write_row(&mut self, fields: &[String]) -> io::Result<()> {
        let line: Vec<String> = fields.iter().map(|f| self.fmt.quote(f)).collect();
        writeln!(self.out, "{}", line.join(&self.fmt.delimiter.to_string()))
    }

    pub fn write_record<R: CsvRecord>(&mut self, rec: &R) -> io::Result<()> {
        let fields = rec.fields(&self.fmt);
        self.write_row(&fields)
    }

    pub fn finish(mut self) -> io::Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Write `records` to `path` with a header row, creating parent directories.
pub fn write_records<R: CsvRecord>(path: &Path, fmt: CsvFormat, records: &[R]) -> Result<usize, PipelineError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    let file = BufWriter::new(File::create(path)?);
    let mut w = CsvWriter::new(file, fmt, R::HEADER)?;
    for rec in records {
        w.write_record(rec)?;
    }
    w.finish()?;
    Ok(records.len())
}

/// Parsed delimited file addressed by header name.
#[derive(Debug, Clone, Default)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvTable {
    pub fn read(path: &Path, delimiter: char) -> Result<Self, PipelineError> {
        let raw = load_text(path)?;
        Self::parse(&raw, delimiter).map_err(|msg| {
            PipelineError::SourceUnreadable {
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidData, msg),
            }
        })
    }

    pub fn parse(raw: &str, delimiter: char) -> Result<Self, String> {
        let raw = raw.strip_prefix(BOM).unwrap_or(raw);
        let mut records = parse_records(raw, delimiter)?.into_iter();
        let headers: Vec<String> = records
            .next()
            .unwrap_or_default()
            .into_iter()
            .map(|h| h.trim().to_string())
            .collect();
        let rows = records.filter(|r| !(r.len() == 1 && r[0].is_empty())).collect();
        Ok(Self { headers, rows })
    }

    pub fn column(&self, name: &str) -> Result<usize, PipelineError> {
        self.headers.iter().position(|h| h == name).ok_or_else(|| {
            PipelineError::InvalidConfiguration(format!(
                "missing column {name:?} (have: {})",
                self.headers.join(", ")
            ))
        })
    }

    pub fn cell<'a>(row: &'a [String], idx: usize) -> &'a str {
        row.get(idx).map(String::as_str).unwrap_or("")
    }
}

fn parse_records(raw: &str, delimiter: char) -> Result<Vec<Vec<String>>, String> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = raw.chars().peekable();
    let mut pending = false;

    while let Some(c) = chars.next() {
        pending = true;
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
                pending = false;
            }
            c if c == delimiter => record.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    if in_quotes {
        return Err("unterminated quoted field".into());
    }
    if pending {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}
