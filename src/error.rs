// ❗ Error taxonomy for the migration pipeline
//
// File-level errors abort a run, row-level errors are recovered per row,
// provider errors never escape the row that triggered them.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that make a whole file unusable. These abort the run.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("input file not found: {0}")]
    NotFound(PathBuf),

    #[error("input file is empty: {0}")]
    Empty(PathBuf),

    #[error("unsupported file type '{extension}' for {path}")]
    UnsupportedType { path: PathBuf, extension: String },

    #[error("unreadable workbook {path}: {reason}")]
    Workbook { path: PathBuf, reason: String },

    #[error("corrupted dBase table {path}: {reason}")]
    Dbase { path: PathBuf, reason: String },

    #[error("CSV error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("required columns missing: {}", missing.join(", "))]
    MissingColumns { missing: Vec<String> },

    #[error("unable to determine the data-source; valid data-sources are [{}]", valid.join(", "))]
    UnknownDataSource { valid: Vec<String> },

    #[error("'{name}' is not a valid data-source; valid data-sources are [{}]", valid.join(", "))]
    InvalidDataSource { name: String, valid: Vec<String> },

    #[error("data-source '{source_name}' does not support the '{data_type}' data-type; valid data-types are [{}]", valid.join(", "))]
    UnsupportedDataType {
        source_name: String,
        data_type: String,
        valid: Vec<String>,
    },

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by an address verification provider for a single address.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider rejected the request payload (HTTP 400).
    #[error("address validation rejected: {payload}: {response}")]
    Validation { payload: String, response: String },

    /// The provider is throttling us (HTTP 429).
    #[error("rate limit exceeded (retry-after: {retry_after})")]
    RateLimited { retry_after: String },

    #[error("no address candidate found for {0}")]
    NoCandidate(String),

    #[error("address verification failed: {0}")]
    VerificationFailed(String),

    #[error("provider authentication failed: {0}")]
    Auth(String),

    #[error("provider transport error: {0}")]
    Transport(String),

    #[error("unable to decode provider response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ProviderError {
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Validation { .. } => "validation",
            ProviderError::RateLimited { .. } => "rate_limited",
            ProviderError::NoCandidate(_) => "no_candidate",
            ProviderError::VerificationFailed(_) => "verification_failed",
            ProviderError::Auth(_) => "auth",
            ProviderError::Transport(_) => "transport",
            ProviderError::Decode(_) => "decode",
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Transport(err.to_string())
    }
}

/// Persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no active unit of work")]
    NoTransaction,

    #[error("{entity} '{external_id}' references missing {missing}")]
    DanglingReference {
        entity: &'static str,
        external_id: String,
        missing: &'static str,
    },
}

/// Errors confined to one source row. The row is skipped, the run continues.
#[derive(Debug, Error)]
pub enum RowError {
    #[error("row has no value for required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid amount '{0}'")]
    InvalidAmount(String),

    #[error("invoice total for customer '{0}' overflows")]
    TotalOverflow(String),

    #[error("invalid date '{0}'")]
    InvalidDate(String),

    #[error("malformed row: {0}")]
    Malformed(String),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

/// Configuration problems detected before a run starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unknown address verification provider '{0}'")]
    UnknownProvider(String),

    #[error("missing credential {0} for the selected provider")]
    MissingCredential(&'static str),

    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Umbrella error for a migration run.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl MigrationError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            MigrationError::File(_) => 1,
            _ => 2,
        }
    }
}

pub type Result<T, E = MigrationError> = std::result::Result<T, E>;
