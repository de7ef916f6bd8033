// 🗺️ Field Mapping - Source columns → canonical customer rows
//
// "Every export names its columns differently; the pipeline sees one shape"
//
// Problem solved:
// - ServiceTitan, MailManager and MailManager Life exports share no schema
// - Column names drift between versions ("Customer Name" vs "Name")
// - The data-source is rarely passed explicitly, so it is identified from the
//   headers and the file name
//
// A (DataSource, DataType) pair selects which columns are read. Resolving a
// mapping against a header row is a file-level check; applying it to a row is
// a row-level one.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::entities::parse_cents;
use crate::error::{FileError, RowError};
use crate::source::{normalize_header, RawRecord};

// ============================================================================
// CORE TYPES
// ============================================================================

/// DataSource - which system produced the export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    ServiceTitan,
    MailManager,
    MailManagerLife,
    Generic,
}

impl DataSource {
    pub fn name(&self) -> &'static str {
        match self {
            DataSource::ServiceTitan => "servicetitan",
            DataSource::MailManager => "mailmanager",
            DataSource::MailManagerLife => "mailmanagerlife",
            DataSource::Generic => "generic",
        }
    }

    /// Detection order: most specific first, generic last.
    pub fn all() -> [DataSource; 4] {
        [
            DataSource::MailManagerLife,
            DataSource::MailManager,
            DataSource::ServiceTitan,
            DataSource::Generic,
        ]
    }

    fn valid_names() -> Vec<String> {
        Self::all().iter().map(|s| s.name().to_string()).collect()
    }

    pub fn from_name(name: &str) -> Result<Self, FileError> {
        let wanted = name.trim().to_lowercase();
        Self::all()
            .into_iter()
            .find(|s| s.name() == wanted)
            .ok_or_else(|| FileError::InvalidDataSource {
                name: name.to_string(),
                valid: Self::valid_names(),
            })
    }

    pub fn supported_types(&self) -> &'static [DataType] {
        match self {
            DataSource::MailManager => &[DataType::Prospects, DataType::Customers],
            _ => &[DataType::Prospects, DataType::Customers, DataType::Invoices],
        }
    }

    pub fn supports(&self, data_type: DataType) -> bool {
        self.supported_types().contains(&data_type)
    }

    /// File-name rule for auto-detection. MailManager exports are dBase tables.
    fn matches_file(&self, path: &Path, headers: &[String]) -> bool {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_lowercase();
        let is_dbf = file_name.ends_with(".dbf");

        match self {
            DataSource::MailManagerLife => {
                is_dbf && (file_name.contains("life") || has_any(headers, LIFE_TOTAL))
            }
            DataSource::MailManager => is_dbf,
            DataSource::ServiceTitan => !is_dbf && has_any(headers, SERVICETITAN_SIGNATURE),
            DataSource::Generic => true,
        }
    }
}

/// DataType - which aggregates a file describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Prospects,
    Customers,
    Invoices,
}

impl DataType {
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Prospects => "prospects",
            DataType::Customers => "customers",
            DataType::Invoices => "invoices",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "prospects" => Some(DataType::Prospects),
            "customers" => Some(DataType::Customers),
            "invoices" => Some(DataType::Invoices),
            _ => None,
        }
    }
}

/// Canonical fields a mapping can fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Field {
    Name,
    FirstName,
    LastName,
    Address1,
    Address2,
    City,
    State,
    PostalCode,
    Country,
    InvoiceNumber,
    InvoiceDate,
    InvoiceTotal,
    Description,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::FirstName => "first_name",
            Field::LastName => "last_name",
            Field::Address1 => "address1",
            Field::Address2 => "address2",
            Field::City => "city",
            Field::State => "state",
            Field::PostalCode => "postal_code",
            Field::Country => "country",
            Field::InvoiceNumber => "invoice_number",
            Field::InvoiceDate => "invoice_date",
            Field::InvoiceTotal => "invoice_total",
            Field::Description => "description",
        }
    }
}

/// One canonical field, the column names it may appear under, and whether the
/// file must carry it.
#[derive(Debug, Clone, Copy)]
pub struct ColumnRule {
    pub field: Field,
    pub candidates: &'static [&'static str],
    pub required: bool,
}

const fn rule(field: Field, candidates: &'static [&'static str], required: bool) -> ColumnRule {
    ColumnRule {
        field,
        candidates,
        required,
    }
}

/// Invoice portion of a canonical row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub number: String,
    pub invoiced_on: NaiveDate,
    pub amount_cents: i64,
    pub description: Option<String>,
    /// Lifetime summary row: one per prospect, whatever its date.
    #[serde(default)]
    pub lifetime: bool,
}

/// CanonicalRecord - a source row in the pipeline's own vocabulary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub row: usize,
    pub name: String,
    pub address1: String,
    pub address2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: Option<String>,
    pub invoice: Option<InvoiceLine>,
}

// ============================================================================
// COLUMN TABLES
// ============================================================================

const SERVICETITAN_SIGNATURE: &[&str] = &[
    "customer id",
    "location id",
    "job #",
    "invoice #",
    "business unit",
];

const LIFE_TOTAL: &[&str] = &["lifetime", "totalsale", "sales", "amount"];

const SERVICETITAN_COLUMNS: &[ColumnRule] = &[
    rule(Field::Name, &["customer name", "customer", "name"], true),
    rule(Field::FirstName, &["customer first name", "first name"], false),
    rule(Field::LastName, &["customer last name", "last name"], false),
    rule(
        Field::Address1,
        &["customer address", "location address", "service address", "street", "address"],
        true,
    ),
    rule(Field::Address2, &["location address 2", "address 2", "unit"], false),
    rule(Field::City, &["customer city", "location city", "city"], true),
    rule(Field::State, &["customer state", "location state", "state"], true),
    rule(Field::PostalCode, &["customer zip", "location zip", "zip code", "zip"], true),
    rule(Field::Country, &["country"], false),
];

const SERVICETITAN_INVOICE: &[ColumnRule] = &[
    rule(Field::InvoiceNumber, &["invoice #", "invoice number", "invoice"], true),
    rule(Field::InvoiceDate, &["invoice date", "completed on", "date"], true),
    rule(Field::InvoiceTotal, &["total", "invoice total", "jobs total"], true),
    rule(Field::Description, &["summary", "job type", "description"], false),
];

const MAILMANAGER_COLUMNS: &[ColumnRule] = &[
    rule(Field::Name, &["name", "fullname"], true),
    rule(Field::FirstName, &["first", "firstname"], false),
    rule(Field::LastName, &["last", "lastname"], false),
    rule(Field::Address1, &["address", "addr1", "address1"], true),
    rule(Field::Address2, &["addr2", "address2"], false),
    rule(Field::City, &["city"], true),
    rule(Field::State, &["state", "st"], true),
    rule(Field::PostalCode, &["zip", "zipcode", "zip5"], true),
    rule(Field::Country, &["country"], false),
];

const MAILMANAGER_LIFE_INVOICE: &[ColumnRule] = &[
    rule(Field::InvoiceNumber, &["invoice", "jobno", "custno"], false),
    rule(Field::InvoiceDate, &["lastsale", "lastdate", "saledate"], true),
    rule(Field::InvoiceTotal, LIFE_TOTAL, true),
    rule(Field::Description, &["jobtype", "notes"], false),
];

const GENERIC_COLUMNS: &[ColumnRule] = &[
    rule(Field::Name, &["name", "customer name", "full name", "customer"], true),
    rule(Field::FirstName, &["first name", "first"], false),
    rule(Field::LastName, &["last name", "last"], false),
    rule(
        Field::Address1,
        &["address1", "address 1", "address", "street", "street address"],
        true,
    ),
    rule(Field::Address2, &["address2", "address 2", "unit", "apt"], false),
    rule(Field::City, &["city"], true),
    rule(Field::State, &["state", "state code", "st"], true),
    rule(Field::PostalCode, &["postal code", "zip", "zip code", "zipcode"], true),
    rule(Field::Country, &["country", "country code"], false),
];

const GENERIC_INVOICE: &[ColumnRule] = &[
    rule(Field::InvoiceNumber, &["invoice number", "invoice #", "invoice"], true),
    rule(Field::InvoiceDate, &["invoice date", "date"], true),
    rule(Field::InvoiceTotal, &["total", "amount", "invoice total"], true),
    rule(Field::Description, &["description", "summary"], false),
];

fn base_columns(source: DataSource) -> &'static [ColumnRule] {
    match source {
        DataSource::ServiceTitan => SERVICETITAN_COLUMNS,
        DataSource::MailManager | DataSource::MailManagerLife => MAILMANAGER_COLUMNS,
        DataSource::Generic => GENERIC_COLUMNS,
    }
}

fn invoice_columns(source: DataSource) -> &'static [ColumnRule] {
    match source {
        DataSource::ServiceTitan => SERVICETITAN_INVOICE,
        DataSource::MailManagerLife => MAILMANAGER_LIFE_INVOICE,
        DataSource::Generic => GENERIC_INVOICE,
        DataSource::MailManager => &[],
    }
}

fn has_any(headers: &[String], candidates: &[&str]) -> bool {
    candidates.iter().any(|c| headers.iter().any(|h| h == c))
}

fn find_column(headers: &[String], candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .map(|c| normalize_header(c))
        .find(|c| headers.contains(c))
}

// ============================================================================
// MAPPING
// ============================================================================

/// FieldMapping - a (source, type) pair resolved against one header row
#[derive(Debug, Clone)]
pub struct FieldMapping {
    pub source: DataSource,
    pub data_type: DataType,
    columns: BTreeMap<Field, String>,
}

impl FieldMapping {
    /// Resolve the mapping's rules against `headers`.
    ///
    /// Fails with `MissingColumns` listing every required field that no header
    /// satisfies. A name may be supplied as first + last name columns instead.
    pub fn resolve(
        source: DataSource,
        data_type: DataType,
        headers: &[String],
    ) -> Result<Self, FileError> {
        if !source.supports(data_type) {
            return Err(unsupported_type(source, data_type.name()));
        }

        let mut rules: Vec<ColumnRule> = base_columns(source).to_vec();
        if data_type == DataType::Invoices {
            rules.extend_from_slice(invoice_columns(source));
        }

        let mut columns = BTreeMap::new();
        for rule in &rules {
            if let Some(column) = find_column(headers, rule.candidates) {
                columns.insert(rule.field, column);
            }
        }

        let has_split_name =
            columns.contains_key(&Field::FirstName) || columns.contains_key(&Field::LastName);

        let missing: Vec<String> = rules
            .iter()
            .filter(|r| r.required && !columns.contains_key(&r.field))
            .filter(|r| !(r.field == Field::Name && has_split_name))
            .map(|r| format!("{} ({})", r.field.as_str(), r.candidates.join(" | ")))
            .collect();

        if !missing.is_empty() {
            return Err(FileError::MissingColumns { missing });
        }

        Ok(FieldMapping {
            source,
            data_type,
            columns,
        })
    }

    /// Column a field was resolved to, if any.
    pub fn column(&self, field: Field) -> Option<&str> {
        self.columns.get(&field).map(String::as_str)
    }

    fn value<'r>(&self, record: &'r RawRecord, field: Field) -> Option<&'r str> {
        self.column(field).and_then(|column| record.get(column))
    }

    /// Turn one raw row into a canonical row.
    pub fn apply(&self, record: &RawRecord) -> Result<CanonicalRecord, RowError> {
        let name = match self.value(record, Field::Name) {
            Some(name) => name.to_string(),
            None => {
                let parts: Vec<&str> = [Field::FirstName, Field::LastName]
                    .iter()
                    .filter_map(|f| self.value(record, *f))
                    .collect();
                parts.join(" ")
            }
        };
        if name.trim().is_empty() {
            return Err(RowError::MissingField("name"));
        }

        let address1 = self
            .value(record, Field::Address1)
            .ok_or(RowError::MissingField("address1"))?
            .to_string();

        let owned = |field| self.value(record, field).map(str::to_string);

        let invoice = if self.data_type == DataType::Invoices {
            Some(self.invoice_line(record)?)
        } else {
            None
        };

        Ok(CanonicalRecord {
            row: record.row,
            name,
            address1,
            address2: owned(Field::Address2),
            city: owned(Field::City).unwrap_or_default(),
            state: owned(Field::State).unwrap_or_default(),
            postal_code: owned(Field::PostalCode).unwrap_or_default(),
            country: owned(Field::Country),
            invoice,
        })
    }

    fn invoice_line(&self, record: &RawRecord) -> Result<InvoiceLine, RowError> {
        let raw_date = self
            .value(record, Field::InvoiceDate)
            .ok_or(RowError::MissingField("invoice_date"))?;
        let invoiced_on =
            parse_date(raw_date).ok_or_else(|| RowError::InvalidDate(raw_date.to_string()))?;

        let raw_total = self
            .value(record, Field::InvoiceTotal)
            .ok_or(RowError::MissingField("invoice_total"))?;
        let amount_cents =
            parse_cents(raw_total).ok_or_else(|| RowError::InvalidAmount(raw_total.to_string()))?;

        Ok(InvoiceLine {
            number: self
                .value(record, Field::InvoiceNumber)
                .unwrap_or("")
                .to_string(),
            invoiced_on,
            amount_cents,
            description: self.value(record, Field::Description).map(str::to_string),
            lifetime: self.source == DataSource::MailManagerLife,
        })
    }
}

// ============================================================================
// FACTORY FUNCTIONS
// ============================================================================

fn unsupported_type(source: DataSource, data_type: &str) -> FileError {
    FileError::UnsupportedDataType {
        source_name: source.name().to_string(),
        data_type: data_type.to_string(),
        valid: source
            .supported_types()
            .iter()
            .map(|t| t.name().to_string())
            .collect(),
    }
}

/// Identify the data-source from headers and file name.
///
/// The first source (most specific first) whose file rule matches and whose
/// required columns are all present wins.
pub fn identify_data_source(path: &Path, headers: &[String]) -> Result<DataSource, FileError> {
    DataSource::all()
        .into_iter()
        .find(|source| {
            source.matches_file(path, headers)
                && FieldMapping::resolve(*source, DataType::Prospects, headers).is_ok()
        })
        .ok_or_else(|| FileError::UnknownDataSource {
            valid: DataSource::valid_names(),
        })
}

/// Pick the data-type: the requested one if supported, otherwise invoices when
/// the source supports them and the invoice columns are present, otherwise
/// prospects.
pub fn resolve_data_type(
    source: DataSource,
    requested: Option<&str>,
    headers: &[String],
) -> Result<DataType, FileError> {
    if let Some(name) = requested.filter(|n| !n.trim().is_empty()) {
        return match DataType::parse(name) {
            Some(data_type) if source.supports(data_type) => Ok(data_type),
            _ => Err(unsupported_type(source, name)),
        };
    }

    let invoices_ready = source.supports(DataType::Invoices)
        && FieldMapping::resolve(source, DataType::Invoices, headers).is_ok();

    Ok(if invoices_ready {
        DataType::Invoices
    } else {
        DataType::Prospects
    })
}

/// Resolve source, type and mapping in one step.
pub fn select_mapping(
    path: &Path,
    headers: &[String],
    data_source: Option<&str>,
    data_type: Option<&str>,
) -> Result<FieldMapping, FileError> {
    let source = match data_source.filter(|s| !s.trim().is_empty()) {
        Some(name) => DataSource::from_name(name)?,
        None => identify_data_source(path, headers)?,
    };
    let data_type = resolve_data_type(source, data_type, headers)?;
    FieldMapping::resolve(source, data_type, headers)
}

/// Parse the date layouts found in field-service exports.
///
/// Accepts YYYY-MM-DD, MM/DD/YYYY, M/D/YY, YYYYMMDD and YYYY-MM-DD HH:MM:SS.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(datetime) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(datetime.date());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }

    if raw.contains('/') {
        // Two-digit years need %y, otherwise %Y reads "23" as the year 23
        let year_digits = raw.rsplit('/').next().map(str::len).unwrap_or(0);
        let format = if year_digits <= 2 { "%m/%d/%y" } else { "%m/%d/%Y" };
        return NaiveDate::parse_from_str(raw, format).ok();
    }

    if raw.len() == 8 && raw.chars().all(|c| c.is_ascii_digit()) {
        let year = raw[..4].parse().ok()?;
        let month = raw[4..6].parse().ok()?;
        let day = raw[6..].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    None
}
