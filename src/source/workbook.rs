// Spreadsheet workbook reader (first worksheet, first non-empty row is the header)

use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, DataType, Range, Reader};
use chrono::{Duration, NaiveDate};

use super::{normalize_header, RawRecord, RecordIter, RecordSource, SourceFormat};
use crate::error::FileError;

pub struct WorkbookSource {
    path: PathBuf,
}

impl WorkbookSource {
    pub fn new(path: PathBuf) -> Self {
        WorkbookSource { path }
    }

    fn workbook_error(&self, reason: impl ToString) -> FileError {
        FileError::Workbook {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }

    /// Load the first worksheet. calamine materializes the whole sheet.
    fn first_sheet(&self) -> Result<Range<DataType>, FileError> {
        let mut workbook = open_workbook_auto(&self.path).map_err(|e| self.workbook_error(e))?;

        let sheet_name = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| self.workbook_error("workbook has no worksheets"))?;

        let range = workbook
            .worksheet_range(&sheet_name)
            .ok_or_else(|| self.workbook_error(format!("missing sheet '{sheet_name}'")))?
            .map_err(|e| self.workbook_error(format!("unreadable sheet '{sheet_name}': {e}")))?;

        Ok(range)
    }

    /// Split a sheet into (headers, data rows). Leading blank rows are skipped.
    fn split_sheet(range: &Range<DataType>) -> (Vec<String>, Vec<Vec<String>>) {
        let mut rows = range
            .rows()
            .map(|row| row.iter().map(|cell| cell_to_string(Some(cell))).collect::<Vec<_>>())
            .skip_while(|row| row.iter().all(|v| v.trim().is_empty()));

        let headers = rows
            .next()
            .map(|row| row.iter().map(|h| normalize_header(h)).collect())
            .unwrap_or_default();

        (headers, rows.collect())
    }
}

impl RecordSource for WorkbookSource {
    fn format(&self) -> SourceFormat {
        SourceFormat::Workbook
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn headers(&self) -> Result<Vec<String>, FileError> {
        let range = self.first_sheet()?;
        Ok(Self::split_sheet(&range).0)
    }

    fn records(&self) -> Result<RecordIter<'_>, FileError> {
        let range = self.first_sheet()?;
        let (headers, rows) = Self::split_sheet(&range);

        let iter = rows
            .into_iter()
            .enumerate()
            .map(move |(index, values)| Ok(RawRecord::from_row(index + 1, &headers, values)));

        Ok(Box::new(iter))
    }
}

fn cell_to_string(cell: Option<&DataType>) -> String {
    match cell {
        Some(DataType::String(value)) => value.clone(),
        Some(DataType::Float(value)) => format_float(*value),
        Some(DataType::Int(value)) => value.to_string(),
        Some(DataType::Bool(value)) => value.to_string(),
        Some(DataType::DateTime(serial)) => excel_serial_to_date(*serial)
            .map(|date| date.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| serial.to_string()),
        Some(DataType::Empty) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Integral floats render without ".0" so ZIP codes and invoice numbers survive.
fn format_float(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Excel serial day number (1900 date system) to a calendar date.
fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 1.0 {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(Duration::days(serial.floor() as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::Workbook;
    use tempfile::tempdir;

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(60012.0), "60012");
        assert_eq!(format_float(87.99), "87.99");
    }

    #[test]
    fn test_excel_serial_to_date() {
        assert_eq!(
            excel_serial_to_date(45229.0),
            NaiveDate::from_ymd_opt(2023, 10, 30)
        );
        assert_eq!(excel_serial_to_date(0.0), None);
    }

    #[test]
    fn test_reads_first_sheet() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("invoices.xlsx");

        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "Customer Name").unwrap();
        sheet.write_string(0, 1, "Zip").unwrap();
        sheet.write_string(0, 2, "Total").unwrap();
        sheet.write_string(1, 0, "Clement, Todd").unwrap();
        sheet.write_number(1, 1, 60012.0).unwrap();
        sheet.write_number(1, 2, 87.99).unwrap();
        workbook.save(&path).unwrap();

        let source = WorkbookSource::new(path);
        assert_eq!(source.headers().unwrap(), vec!["customer name", "zip", "total"]);

        let records: Vec<_> = source.records().unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("customer name"), Some("Clement, Todd"));
        assert_eq!(records[0].get("zip"), Some("60012"));
        assert_eq!(records[0].get("total"), Some("87.99"));
    }

    #[test]
    fn test_corrupted_workbook_is_file_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.xlsx");
        std::fs::write(&path, b"this is not a zip archive").unwrap();

        let source = WorkbookSource::new(path);
        assert!(matches!(source.headers(), Err(FileError::Workbook { .. })));
    }
}
