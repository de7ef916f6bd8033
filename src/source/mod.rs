// 🏗️ Tabular Record Sources
// Polymorphic readers for the container formats field-service systems export
//
// Every format ends up as the same thing: a lazy, restartable sequence of
// RawRecord (column name → raw value). Calling `records()` twice re-opens the
// file, so a source can be replayed for preview runs and re-imports.

pub mod dbase;
pub mod delimited;
pub mod workbook;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FileError, RowError};

pub use dbase::DbaseSource;
pub use delimited::DelimitedSource;
pub use workbook::WorkbookSource;

// ============================================================================
// CORE TYPES
// ============================================================================

/// SourceFormat - which container a file uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceFormat {
    /// Comma or tab separated text
    Delimited,

    /// Spreadsheet workbook (xlsx, xlsm, xls, ods)
    Workbook,

    /// Legacy dBase III / FoxPro table
    Dbase,
}

impl SourceFormat {
    pub fn name(&self) -> &'static str {
        match self {
            SourceFormat::Delimited => "delimited",
            SourceFormat::Workbook => "workbook",
            SourceFormat::Dbase => "dbase",
        }
    }
}

/// RawRecord - one source row, before any mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// 1-based position of the row among the file's data rows
    pub row: usize,
    fields: BTreeMap<String, String>,
}

impl RawRecord {
    /// Build a record by zipping normalized headers with row values.
    /// Missing trailing values become empty strings, extra values are dropped.
    pub fn from_row(row: usize, headers: &[String], values: Vec<String>) -> Self {
        let mut values = values.into_iter();
        let fields = headers
            .iter()
            .map(|header| (header.clone(), values.next().unwrap_or_default()))
            .collect();

        RawRecord { row, fields }
    }

    /// Trimmed, non-empty value for a column (column names are normalized).
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .get(&normalize_header(column))
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn is_blank(&self) -> bool {
        self.fields.values().all(|v| v.trim().is_empty())
    }
}

/// Stream of records; each item is a row or a row-level read failure.
pub type RecordIter<'a> = Box<dyn Iterator<Item = Result<RawRecord, RowError>> + 'a>;

/// RecordSource - the one interface all formats implement
pub trait RecordSource {
    fn format(&self) -> SourceFormat;

    fn path(&self) -> &Path;

    /// Normalized column names, in file order.
    fn headers(&self) -> Result<Vec<String>, FileError>;

    /// Fresh pass over the data rows. Re-opens the file on every call.
    fn records(&self) -> Result<RecordIter<'_>, FileError>;
}

// ============================================================================
// FACTORY FUNCTIONS
// ============================================================================

/// Trim, lower-case, drop a UTF-8 BOM and collapse inner whitespace.
pub fn normalize_header(header: &str) -> String {
    header
        .trim_start_matches('\u{feff}')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Detect the container format from the file extension.
pub fn detect_format(path: &Path) -> Result<SourceFormat, FileError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "csv" | "txt" | "tsv" => Ok(SourceFormat::Delimited),
        "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Ok(SourceFormat::Workbook),
        "dbf" => Ok(SourceFormat::Dbase),
        _ => Err(FileError::UnsupportedType {
            path: path.to_path_buf(),
            extension,
        }),
    }
}

/// Validate the path and return the matching source.
///
/// File-level failures (absent, empty, unsupported) are reported here, before
/// any row is read.
pub fn open_source(path: &Path) -> Result<Box<dyn RecordSource>, FileError> {
    let metadata = std::fs::metadata(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            FileError::NotFound(path.to_path_buf())
        } else {
            FileError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    if !metadata.is_file() {
        return Err(FileError::NotFound(path.to_path_buf()));
    }
    if metadata.len() == 0 {
        return Err(FileError::Empty(path.to_path_buf()));
    }

    let path: PathBuf = path.to_path_buf();
    Ok(match detect_format(&path)? {
        SourceFormat::Delimited => Box::new(DelimitedSource::new(path)),
        SourceFormat::Workbook => Box::new(WorkbookSource::new(path)),
        SourceFormat::Dbase => Box::new(DbaseSource::new(path)),
    })
}

/// Decode bytes as UTF-8, falling back to Windows-1252 for legacy exports.
pub(crate) fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header("\u{feff} Customer   Name "), "customer name");
        assert_eq!(normalize_header("ZIP"), "zip");
    }

    #[test]
    fn test_raw_record_get_is_case_insensitive_and_trims() {
        let headers = vec!["name".to_string(), "city".to_string(), "zip".to_string()];
        let record = RawRecord::from_row(3, &headers, vec![" Ann ".into(), "  ".into()]);

        assert_eq!(record.row, 3);
        assert_eq!(record.get("NAME"), Some("Ann"));
        assert_eq!(record.get("city"), None);
        assert_eq!(record.get("zip"), None);
        assert_eq!(record.columns().count(), 3);
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format(Path::new("a.CSV")).unwrap(), SourceFormat::Delimited);
        assert_eq!(detect_format(Path::new("a.xlsx")).unwrap(), SourceFormat::Workbook);
        assert_eq!(detect_format(Path::new("life.dbf")).unwrap(), SourceFormat::Dbase);
        assert!(matches!(
            detect_format(Path::new("a.pdf")),
            Err(FileError::UnsupportedType { .. })
        ));
    }

    #[test]
    fn test_open_source_file_errors_are_distinct() {
        let dir = tempdir().unwrap();

        let missing = dir.path().join("missing.csv");
        assert!(matches!(open_source(&missing), Err(FileError::NotFound(_))));

        let empty = dir.path().join("empty.csv");
        fs::write(&empty, "").unwrap();
        assert!(matches!(open_source(&empty), Err(FileError::Empty(_))));

        let pdf = dir.path().join("report.pdf");
        fs::write(&pdf, "%PDF").unwrap();
        assert!(matches!(open_source(&pdf), Err(FileError::UnsupportedType { .. })));
    }

    #[test]
    fn test_decode_text_windows_1252_fallback() {
        assert_eq!(decode_text(b"Caf\xe9"), "Café");
        assert_eq!(decode_text(b"O\x92Brien"), "O\u{2019}Brien");
        assert_eq!(decode_text(b"Smith \x96 Jones"), "Smith \u{2013} Jones");
        assert_eq!(decode_text("Café".as_bytes()), "Café");
    }
}
