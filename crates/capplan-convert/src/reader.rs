//! Sizing sheet loading: delimited text via `csv`, workbooks via `calamine`.

use std::io::Read;
use std::path::Path;

use calamine::{Data, Reader, open_workbook_auto};
use capplan_core::{Cell, RawRow};
use tracing::debug;

use crate::error::{ConvertError, ConvertResult};

/// The physical format of an input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Delimited { delimiter: u8 },
    Workbook,
}

impl InputFormat {
    /// Pick a format from the file extension.
    pub fn from_path(path: &Path) -> ConvertResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "csv" | "txt" => Ok(InputFormat::Delimited { delimiter: b',' }),
            "tsv" | "tab" => Ok(InputFormat::Delimited { delimiter: b'\t' }),
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Ok(InputFormat::Workbook),
            "" => Err(ConvertError::UnsupportedFormat(format!(
                "{} has no extension",
                path.display()
            ))),
            other => Err(ConvertError::UnsupportedFormat(format!(".{other}"))),
        }
    }
}

/// One data row with the 1-based line it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow {
    pub line: usize,
    pub row: RawRow,
}

/// A loaded sheet: the header row plus its data rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<SourceRow>,
}

impl Table {
    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.headers.iter().map(String::as_str)
    }
}

/// Load a sizing sheet from disk.
pub fn read_table(path: &Path, sheet: Option<&str>) -> ConvertResult<Table> {
    let table = match InputFormat::from_path(path)? {
        InputFormat::Delimited { delimiter } => {
            let file = std::fs::File::open(path).map_err(|source| ConvertError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            read_delimited(file, delimiter).map_err(|e| match e {
                ConvertError::Parse { reason, .. } => ConvertError::Parse {
                    path: path.to_path_buf(),
                    reason,
                },
                other => other,
            })?
        }
        InputFormat::Workbook => read_workbook(path, sheet)?,
    };
    debug!(
        path = %path.display(),
        columns = table.headers.len(),
        rows = table.rows.len(),
        "sizing sheet loaded"
    );
    Ok(table)
}

/// Parse delimited text. UTF-8 (with or without BOM) is tried first and
/// Latin-1 is the fallback, so spreadsheet exports from any locale load.
pub fn read_delimited<R: Read>(mut reader: R, delimiter: u8) -> ConvertResult<Table> {
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .map_err(|source| ConvertError::Io {
            path: "<input>".into(),
            source,
        })?;
    let text = decode(bytes);

    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(text.as_bytes());

    let parse_err = |e: csv::Error| ConvertError::Parse {
        path: "<input>".into(),
        reason: e.to_string(),
    };

    let headers: Vec<String> = rdr
        .headers()
        .map_err(parse_err)?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for (idx, record) in rdr.records().enumerate() {
        let record = record.map_err(parse_err)?;
        let line = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(idx + 2);
        let row = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.clone(), record.get(i).map(Cell::from).unwrap_or(Cell::Blank)))
            .collect();
        rows.push(SourceRow { line, row });
    }

    Ok(Table { headers, rows })
}

fn decode(bytes: Vec<u8>) -> String {
    let body = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(&bytes);
    match std::str::from_utf8(body) {
        Ok(s) => s.to_string(),
        // Latin-1 maps each byte straight onto the first 256 code points.
        Err(_) => body.iter().map(|b| *b as char).collect(),
    }
}

/// Read one worksheet (the first one unless `sheet` names another).
pub fn read_workbook(path: &Path, sheet: Option<&str>) -> ConvertResult<Table> {
    let parse_err = |reason: String| ConvertError::Parse {
        path: path.to_path_buf(),
        reason,
    };

    let mut workbook = open_workbook_auto(path).map_err(|e| parse_err(e.to_string()))?;
    let names = workbook.sheet_names();
    let name = match sheet {
        Some(wanted) => names
            .iter()
            .find(|n| n.as_str() == wanted)
            .cloned()
            .ok_or_else(|| ConvertError::SheetNotFound(wanted.to_string()))?,
        None => names
            .first()
            .cloned()
            .ok_or_else(|| parse_err("workbook has no sheets".to_string()))?,
    };

    let range = workbook
        .worksheet_range(&name)
        .map_err(|e| parse_err(e.to_string()))?;
    let first_line = range.start().map(|(row, _)| row as usize + 1).unwrap_or(1);

    let mut sheet_rows = range.rows();
    let headers: Vec<String> = match sheet_rows.next() {
        Some(cells) => cells.iter().map(|c| c.to_string().trim().to_string()).collect(),
        None => return Ok(Table::default()),
    };

    let rows = sheet_rows
        .enumerate()
        .map(|(idx, cells)| SourceRow {
            line: first_line + idx + 1,
            row: headers
                .iter()
                .enumerate()
                .map(|(i, h)| (h.clone(), cells.get(i).map(cell_from).unwrap_or(Cell::Blank)))
                .collect(),
        })
        .collect();

    Ok(Table { headers, rows })
}

fn cell_from(data: &Data) -> Cell {
    match data {
        Data::Empty | Data::Error(_) => Cell::Blank,
        Data::String(s) => Cell::from(s.as_str()),
        Data::Float(f) => Cell::Number(*f),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Bool(b) => Cell::Bool(*b),
        other => Cell::Text(other.to_string()),
    }
}
