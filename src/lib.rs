// Customer Migration - Core Library
// Exposes the pipeline for the `migrate` CLI and for tests

pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod identity;
pub mod logging;
pub mod mapping;
pub mod migration;
pub mod reconciliation;
pub mod repository;
pub mod source;
pub mod verification;

// Re-export commonly used types
pub use config::MigrationConfig;
pub use db::{setup_database, SqliteRepository, SqliteTokenCache};
pub use entities::{Address, Customer, EntityKind, Invoice, Prospect};
pub use error::{ConfigError, FileError, MigrationError, ProviderError, RowError, StoreError};
pub use mapping::{select_mapping, CanonicalRecord, DataSource, DataType, FieldMapping};
pub use migration::{MigrationOptions, MigrationOrchestrator, MigrationReport};
pub use reconciliation::{Disposition, EntityReconciler, RowOutcome, VerificationOutcome};
pub use repository::{EntityCounts, InMemoryRepository, Repository};
pub use source::{open_source, RawRecord, RecordSource, SourceFormat};
pub use verification::{build_verifier, AddressVerifier, ProviderKind, Verification};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
