// Delimited text reader (CSV / TSV)

use std::fs::File;
use std::path::{Path, PathBuf};

use csv::ReaderBuilder;

use super::{decode_text, normalize_header, RawRecord, RecordIter, RecordSource, SourceFormat};
use crate::error::{FileError, RowError};

pub struct DelimitedSource {
    path: PathBuf,
    delimiter: u8,
}

impl DelimitedSource {
    pub fn new(path: PathBuf) -> Self {
        let is_tsv = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("tsv"))
            .unwrap_or(false);

        DelimitedSource {
            path,
            delimiter: if is_tsv { b'\t' } else { b',' },
        }
    }

    fn reader(&self) -> Result<csv::Reader<File>, FileError> {
        let file = File::open(&self.path).map_err(|source| FileError::Io {
            path: self.path.clone(),
            source,
        })?;

        Ok(ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .delimiter(self.delimiter)
            .from_reader(file))
    }

    fn csv_error(&self, source: csv::Error) -> FileError {
        FileError::Csv {
            path: self.path.clone(),
            source,
        }
    }
}

impl RecordSource for DelimitedSource {
    fn format(&self) -> SourceFormat {
        SourceFormat::Delimited
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn headers(&self) -> Result<Vec<String>, FileError> {
        let mut reader = self.reader()?;
        let headers = reader
            .byte_headers()
            .map_err(|e| self.csv_error(e))?
            .iter()
            .map(|h| normalize_header(&decode_text(h)))
            .collect();
        Ok(headers)
    }

    fn records(&self) -> Result<RecordIter<'_>, FileError> {
        let headers = self.headers()?;
        let reader = self.reader()?;

        let iter = reader
            .into_byte_records()
            .enumerate()
            .map(move |(index, result)| -> Result<RawRecord, RowError> {
                let record = result.map_err(|e| {
                    RowError::Malformed(format!("line {}: {}", index + 2, e))
                })?;
                let values = record.iter().map(decode_text).collect();
                Ok(RawRecord::from_row(index + 1, &headers, values))
            });

        Ok(Box::new(iter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_reads_headers_and_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("export.csv");
        fs::write(&path, "Name,City,ZIP\n\"Smith, Matt\",Cary,60013\nDoe,Boston\n").unwrap();

        let source = DelimitedSource::new(path);
        assert_eq!(source.headers().unwrap(), vec!["name", "city", "zip"]);

        let records: Vec<_> = source.records().unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("name"), Some("Smith, Matt"));
        assert_eq!(records[1].row, 2);
        assert_eq!(records[1].get("zip"), None);
    }

    #[test]
    fn test_records_are_restartable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("export.csv");
        fs::write(&path, "a,b\n1,2\n3,4\n").unwrap();

        let source = DelimitedSource::new(path);
        assert_eq!(source.records().unwrap().count(), 2);
        assert_eq!(source.records().unwrap().count(), 2);
    }

    #[test]
    fn test_tab_separated_and_windows_1252() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("export.tsv");
        fs::write(&path, b"name\tcity\nJos\xe9 O\x92Brien\tSanta Fe\n").unwrap();

        let source = DelimitedSource::new(path);
        let record = source.records().unwrap().next().unwrap().unwrap();
        assert_eq!(record.get("name"), Some("José O\u{2019}Brien"));
        assert_eq!(record.get("city"), Some("Santa Fe"));
    }
}
