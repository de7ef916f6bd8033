// Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

pub const SERVICETITAN_HEADER: &str = "Customer Name,Customer Address,Customer City,Customer State,Customer Zip,Invoice #,Invoice Date,Total";

/// Ten invoice rows. Row 10 is Matt Smith again with a second invoice.
pub const TEN_ROWS_ONE_REPEAT: &[&str] = &[
    "\"Smith, Matt\",6605 Hunters Path,Cary,IL,60013,1007439,11/06/2023,$87.99",
    "\"Clement, Todd\",22 Lakeview Dr,Crystal Lake,IL,60012,1007440,11/06/2023,$120.00",
    "\"Nguyen, Linh\",410 Oak St,Algonquin,IL,60102,1007441,11/07/2023,$65.50",
    "\"Garcia, Ana\",9 Birch Ln,Cary,IL,60013,1007442,11/07/2023,$240.10",
    "\"Okafor, Chidi\",77 Elm Ct,Fox River Grove,IL,60021,1007443,11/08/2023,$99.00",
    "\"Kowalski, Jan\",1200 Main St,Crystal Lake,IL,60014,1007444,11/08/2023,$45.25",
    "\"Patel, Ravi\",3 Prairie Rd,Lake in the Hills,IL,60156,1007445,11/09/2023,$310.00",
    "\"Brown, Lee\",58 Center St,Algonquin,IL,60102,1007446,11/09/2023,$15.75",
    "\"Rossi, Marco\",16 Walnut Ave,Cary,IL,60013,1007447,11/10/2023,$180.40",
    "\"Smith, Matt\",6605 Hunters Path,Cary,IL,60013,1007512,11/20/2023,$40.00",
];

pub fn write_csv(dir: &Path, name: &str, header: &str, rows: &[&str]) -> PathBuf {
    let path = dir.join(name);
    let mut body = String::from(header);
    body.push('\n');
    for row in rows {
        body.push_str(row);
        body.push('\n');
    }
    fs::write(&path, body).unwrap();
    path
}

/// Minimal dBase III table writer. Values are written one byte per char.
pub fn write_dbf(path: &Path, fields: &[(&str, char, u8)], records: &[Vec<&str>]) {
    let record_length: usize = fields.iter().map(|f| f.2 as usize).sum::<usize>() + 1;
    let header_length = 32 + fields.len() * 32 + 1;

    let mut bytes = vec![0u8; 32];
    bytes[0] = 0x03;
    bytes[4..8].copy_from_slice(&(records.len() as u32).to_le_bytes());
    bytes[8..10].copy_from_slice(&(header_length as u16).to_le_bytes());
    bytes[10..12].copy_from_slice(&(record_length as u16).to_le_bytes());

    for (name, kind, length) in fields {
        let mut descriptor = [0u8; 32];
        descriptor[..name.len()].copy_from_slice(name.as_bytes());
        descriptor[11] = *kind as u8;
        descriptor[16] = *length;
        bytes.extend_from_slice(&descriptor);
    }
    bytes.push(0x0D);

    for values in records {
        bytes.push(b' ');
        for ((_, _, length), value) in fields.iter().zip(values) {
            let raw: Vec<u8> = value.chars().map(|c| c as u8).collect();
            let mut cell = vec![b' '; *length as usize];
            cell[..raw.len()].copy_from_slice(&raw);
            bytes.extend_from_slice(&cell);
        }
    }
    bytes.push(0x1A);

    fs::write(path, bytes).unwrap();
}
