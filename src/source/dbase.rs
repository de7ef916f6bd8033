// dBase III / FoxPro table reader
//
// Layout:
//   32-byte file header  (record count @4 u32 LE, header length @8 u16, record length @10 u16)
//   N × 32-byte field descriptors, terminated by 0x0D
//   fixed-width records, each prefixed by a deletion flag (' ' live, '*' deleted)
//   optional 0x1A end-of-file marker

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::{decode_text, normalize_header, RawRecord, RecordIter, RecordSource, SourceFormat};
use crate::error::{FileError, RowError};

const FILE_HEADER_LEN: usize = 32;
const DESCRIPTOR_LEN: usize = 32;
const HEADER_TERMINATOR: u8 = 0x0D;
const EOF_MARKER: u8 = 0x1A;
const DELETED_FLAG: u8 = b'*';

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: char,
    pub length: usize,
    pub decimals: u8,
}

#[derive(Debug, Clone)]
struct TableHeader {
    record_count: u32,
    header_length: u64,
    record_length: usize,
    fields: Vec<FieldDescriptor>,
}

pub struct DbaseSource {
    path: PathBuf,
}

impl DbaseSource {
    pub fn new(path: PathBuf) -> Self {
        DbaseSource { path }
    }

    fn corrupted(&self, reason: impl Into<String>) -> FileError {
        FileError::Dbase {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }

    fn open(&self) -> Result<BufReader<File>, FileError> {
        let file = File::open(&self.path).map_err(|source| FileError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(BufReader::new(file))
    }

    fn read_header(&self, reader: &mut BufReader<File>) -> Result<TableHeader, FileError> {
        let mut fixed = [0u8; FILE_HEADER_LEN];
        reader
            .read_exact(&mut fixed)
            .map_err(|_| self.corrupted("file shorter than the 32-byte header"))?;

        let record_count = u32::from_le_bytes([fixed[4], fixed[5], fixed[6], fixed[7]]);
        let header_length = u16::from_le_bytes([fixed[8], fixed[9]]) as u64;
        let record_length = u16::from_le_bytes([fixed[10], fixed[11]]) as usize;

        if header_length < (FILE_HEADER_LEN + 1) as u64 || record_length == 0 {
            return Err(self.corrupted(format!(
                "implausible header length {header_length} / record length {record_length}"
            )));
        }

        let mut fields = Vec::new();
        loop {
            let mut first = [0u8; 1];
            reader
                .read_exact(&mut first)
                .map_err(|_| self.corrupted("field descriptors are not terminated"))?;
            if first[0] == HEADER_TERMINATOR {
                break;
            }

            let mut descriptor = [0u8; DESCRIPTOR_LEN];
            descriptor[0] = first[0];
            reader
                .read_exact(&mut descriptor[1..])
                .map_err(|_| self.corrupted("truncated field descriptor"))?;

            let name_end = descriptor[..11].iter().position(|&b| b == 0).unwrap_or(11);
            let name: String = descriptor[..name_end].iter().map(|&b| b as char).collect();

            fields.push(FieldDescriptor {
                name: name.trim().to_string(),
                kind: (descriptor[11] as char).to_ascii_uppercase(),
                length: descriptor[16] as usize,
                decimals: descriptor[17],
            });
        }

        if fields.is_empty() {
            return Err(self.corrupted("table declares no fields"));
        }

        let declared: usize = fields.iter().map(|f| f.length).sum::<usize>() + 1;
        if declared != record_length {
            return Err(self.corrupted(format!(
                "record length {record_length} does not match field widths ({declared})"
            )));
        }

        Ok(TableHeader {
            record_count,
            header_length,
            record_length,
            fields,
        })
    }

    pub fn fields(&self) -> Result<Vec<FieldDescriptor>, FileError> {
        let mut reader = self.open()?;
        Ok(self.read_header(&mut reader)?.fields)
    }
}

impl RecordSource for DbaseSource {
    fn format(&self) -> SourceFormat {
        SourceFormat::Dbase
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn headers(&self) -> Result<Vec<String>, FileError> {
        Ok(self
            .fields()?
            .iter()
            .map(|f| normalize_header(&f.name))
            .collect())
    }

    fn records(&self) -> Result<RecordIter<'_>, FileError> {
        let mut reader = self.open()?;
        let header = self.read_header(&mut reader)?;
        reader
            .seek(SeekFrom::Start(header.header_length))
            .map_err(|source| FileError::Io {
                path: self.path.clone(),
                source,
            })?;

        let headers: Vec<String> = header
            .fields
            .iter()
            .map(|f| normalize_header(&f.name))
            .collect();

        Ok(Box::new(DbaseRecords {
            reader,
            header,
            headers,
            physical_index: 0,
            finished: false,
        }))
    }
}

/// Lazy iterator over live records.
struct DbaseRecords {
    reader: BufReader<File>,
    header: TableHeader,
    headers: Vec<String>,
    physical_index: u32,
    finished: bool,
}

impl Iterator for DbaseRecords {
    type Item = Result<RawRecord, RowError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buffer = vec![0u8; self.header.record_length];

        while !self.finished && self.physical_index < self.header.record_count {
            let mut flag = [0u8; 1];
            if self.reader.read_exact(&mut flag).is_err() || flag[0] == EOF_MARKER {
                self.finished = true;
                return None;
            }

            if let Err(e) = self.reader.read_exact(&mut buffer[1..]) {
                self.finished = true;
                return Some(Err(RowError::Malformed(format!(
                    "record {} truncated: {}",
                    self.physical_index + 1,
                    e
                ))));
            }
            self.physical_index += 1;

            if flag[0] == DELETED_FLAG {
                continue;
            }

            let mut offset = 1;
            let values = self
                .header
                .fields
                .iter()
                .map(|field| {
                    let raw = &buffer[offset..offset + field.length];
                    offset += field.length;
                    render_field(field.kind, raw)
                })
                .collect();

            return Some(Ok(RawRecord::from_row(
                self.physical_index as usize,
                &self.headers,
                values,
            )));
        }

        None
    }
}

fn render_field(kind: char, raw: &[u8]) -> String {
    let text = decode_text(raw);
    let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());

    match kind {
        'L' => match text.chars().next() {
            Some('T' | 't' | 'Y' | 'y') => "true".to_string(),
            Some('F' | 'f' | 'N' | 'n') => "false".to_string(),
            _ => String::new(),
        },
        _ => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    /// Build a dBase III table in memory. Each record is (deleted, values);
    /// values are written one byte per char.
    fn build_table(fields: &[(&str, char, u8)], records: &[(bool, Vec<&str>)]) -> Vec<u8> {
        let record_length: usize = fields.iter().map(|f| f.2 as usize).sum::<usize>() + 1;
        let header_length = FILE_HEADER_LEN + fields.len() * DESCRIPTOR_LEN + 1;

        let mut bytes = vec![0u8; FILE_HEADER_LEN];
        bytes[0] = 0x03;
        bytes[4..8].copy_from_slice(&(records.len() as u32).to_le_bytes());
        bytes[8..10].copy_from_slice(&(header_length as u16).to_le_bytes());
        bytes[10..12].copy_from_slice(&(record_length as u16).to_le_bytes());

        for (name, kind, length) in fields {
            let mut descriptor = [0u8; DESCRIPTOR_LEN];
            descriptor[..name.len()].copy_from_slice(name.as_bytes());
            descriptor[11] = *kind as u8;
            descriptor[16] = *length;
            bytes.extend_from_slice(&descriptor);
        }
        bytes.push(HEADER_TERMINATOR);

        for (deleted, values) in records {
            bytes.push(if *deleted { DELETED_FLAG } else { b' ' });
            for ((_, _, length), value) in fields.iter().zip(values) {
                let raw: Vec<u8> = value.chars().map(|c| c as u8).collect();
                let mut cell = vec![b' '; *length as usize];
                cell[..raw.len()].copy_from_slice(&raw);
                bytes.extend_from_slice(&cell);
            }
        }
        bytes.push(EOF_MARKER);
        bytes
    }

    #[test]
    fn test_reads_live_records_and_skips_deleted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("life.dbf");
        let table = build_table(
            &[("NAME", 'C', 12), ("ZIP", 'C', 5), ("LASTSALE", 'D', 8), ("ACTIVE", 'L', 1)],
            &[
                (false, vec!["Smith, Matt", "60013", "20231106", "T"]),
                (true, vec!["Gone, Ghost", "00000", "20200101", "F"]),
                (false, vec!["José", "87501", "", "N"]),
            ],
        );
        fs::write(&path, table).unwrap();

        let source = DbaseSource::new(path);
        assert_eq!(source.headers().unwrap(), vec!["name", "zip", "lastsale", "active"]);

        let records: Vec<_> = source.records().unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("name"), Some("Smith, Matt"));
        assert_eq!(records[0].get("lastsale"), Some("20231106"));
        assert_eq!(records[0].get("active"), Some("true"));
        assert_eq!(records[1].row, 3);
        assert_eq!(records[1].get("name"), Some("José"));
        assert_eq!(records[1].get("active"), Some("false"));
    }

    #[test]
    fn test_windows_1252_punctuation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("customers.dbf");
        // \u{92} / \u{96} are written as the raw bytes 0x92 / 0x96
        let table = build_table(
            &[("NAME", 'C', 12), ("ADDRESS", 'C', 16)],
            &[(false, vec!["O\u{92}Brien", "12 Elm \u{96} Rear"])],
        );
        fs::write(&path, table).unwrap();

        let records: Vec<_> = DbaseSource::new(path)
            .records()
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records[0].get("name"), Some("O\u{2019}Brien"));
        assert_eq!(records[0].get("address"), Some("12 Elm \u{2013} Rear"));
    }

    #[test]
    fn test_record_length_mismatch_is_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.dbf");
        let mut table = build_table(&[("NAME", 'C', 10)], &[(false, vec!["A"])]);
        table[10] = 99;
        fs::write(&path, table).unwrap();

        let source = DbaseSource::new(path);
        assert!(matches!(source.headers(), Err(FileError::Dbase { .. })));
    }

    #[test]
    fn test_truncated_header_is_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.dbf");
        fs::write(&path, [0x03u8, 0x7b, 0x01]).unwrap();

        let source = DbaseSource::new(path);
        assert!(matches!(source.records().err(), Some(FileError::Dbase { .. })));
    }
}
