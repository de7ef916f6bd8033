// 🗄️ SQLite Repository - Aggregates + settings in one WAL database
//
// "The database is the record; a row either lands whole or not at all"
//
// Problem solved:
// - Re-imports must update, never duplicate: UNIQUE(company, external_id)
// - A crash mid-run must not leave half a row: one transaction per row
// - The USPS token must outlive the process: settings table

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::path::Path;
use std::rc::Rc;
use tracing::debug;

use crate::entities::{Address, Customer, Invoice, Prospect};
use crate::error::StoreError;
use crate::repository::Repository;
use crate::verification::usps::TOKEN_SETTING_NAME;
use crate::verification::{AccessToken, TokenCache};

/// SQLite-backed repository.
///
/// Every aggregate is unique on (company, external_id), so a second import of
/// the same rows resolves to updates of existing records, never new ones.
pub struct SqliteRepository {
    conn: Rc<Connection>,
    in_transaction: bool,
}

impl SqliteRepository {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        setup_database(&conn)?;
        debug!(path = %path.display(), "opened migration database");
        Ok(SqliteRepository {
            conn: Rc::new(conn),
            in_transaction: false,
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        Ok(SqliteRepository {
            conn: Rc::new(conn),
            in_transaction: false,
        })
    }

    /// Read-only view for dry runs. An existing database is opened without
    /// touching its schema; a missing one is not created and reads as empty.
    pub fn open_for_dry_run(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            debug!(path = %path.display(), "no database yet, dry run starts empty");
            return Self::open_in_memory();
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        debug!(path = %path.display(), "opened migration database read-only");
        Ok(SqliteRepository {
            conn: Rc::new(conn),
            in_transaction: false,
        })
    }

    /// Token cache over this database's settings table. Shares the connection,
    /// so a token refreshed mid-row is written inside that row's unit of work.
    pub fn token_cache(&self) -> SqliteTokenCache {
        SqliteTokenCache {
            conn: Rc::clone(&self.conn),
        }
    }

    fn require_transaction(&self) -> Result<(), StoreError> {
        if self.in_transaction {
            Ok(())
        } else {
            Err(StoreError::NoTransaction)
        }
    }

    fn customer_exists(&self, company: &str, external_id: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM customers WHERE company = ?1 AND external_id = ?2",
                params![company, external_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn address_exists(&self, company: &str, external_id: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM addresses WHERE company = ?1 AND external_id = ?2",
                params![company, external_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

pub fn setup_database(conn: &Connection) -> Result<(), StoreError> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Aggregates (all unique on company + external_id)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS customers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            company TEXT NOT NULL,
            external_id TEXT NOT NULL,
            name TEXT NOT NULL,
            count_invoices INTEGER NOT NULL DEFAULT 0,
            invoice_total_cents INTEGER NOT NULL DEFAULT 0,
            is_new_customer INTEGER NOT NULL DEFAULT 1,
            is_repeat_customer INTEGER NOT NULL DEFAULT 0,
            first_invoiced_on TEXT,
            last_invoiced_on TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (company, external_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS addresses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            company TEXT NOT NULL,
            external_id TEXT NOT NULL,
            address1 TEXT NOT NULL,
            address2 TEXT,
            city TEXT NOT NULL,
            state_code TEXT NOT NULL,
            postal_code TEXT NOT NULL,
            postal_code_short TEXT,
            country_code TEXT,
            is_business INTEGER NOT NULL DEFAULT 0,
            is_vacant INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            delivery_point TEXT,
            verified_at TEXT,
            verification_attempts INTEGER NOT NULL DEFAULT 0,
            api_type TEXT,
            api_response TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (company, external_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS prospects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            company TEXT NOT NULL,
            external_id TEXT NOT NULL,
            full_name TEXT NOT NULL,
            customer_external_id TEXT NOT NULL,
            address_external_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (company, external_id),
            FOREIGN KEY (company, customer_external_id) REFERENCES customers (company, external_id),
            FOREIGN KEY (company, address_external_id) REFERENCES addresses (company, external_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS invoices (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            company TEXT NOT NULL,
            external_id TEXT NOT NULL,
            customer_external_id TEXT NOT NULL,
            prospect_external_id TEXT NOT NULL,
            invoice_number TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            invoiced_on TEXT NOT NULL,
            description TEXT,
            created_at TEXT NOT NULL,
            UNIQUE (company, external_id),
            FOREIGN KEY (company, customer_external_id) REFERENCES customers (company, external_id)
        )",
        [],
    )?;

    // ==========================================================================
    // Settings (key/value, e.g. the USPS OAuth token)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings (
            name TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            type TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_prospects_customer ON prospects(company, customer_external_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_invoices_customer ON invoices(company, customer_external_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// ROW CONVERSION
// ============================================================================

fn conversion_error(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn optional_timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_error(idx, e))
    })
    .transpose()
}

fn date_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| conversion_error(idx, e))
}

fn optional_date_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn format_date(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format("%Y-%m-%d").to_string())
}

const CUSTOMER_COLUMNS: &str = "company, external_id, name, count_invoices, invoice_total_cents,
    is_new_customer, is_repeat_customer, first_invoiced_on, last_invoiced_on, created_at, updated_at";

fn customer_from_row(row: &Row<'_>) -> rusqlite::Result<Customer> {
    Ok(Customer {
        company: row.get(0)?,
        external_id: row.get(1)?,
        name: row.get(2)?,
        count_invoices: row.get(3)?,
        invoice_total_cents: row.get(4)?,
        is_new_customer: row.get(5)?,
        is_repeat_customer: row.get(6)?,
        first_invoiced_on: optional_date_at(row, 7)?,
        last_invoiced_on: optional_date_at(row, 8)?,
        created_at: timestamp_at(row, 9)?,
        updated_at: timestamp_at(row, 10)?,
    })
}

const ADDRESS_COLUMNS: &str = "company, external_id, address1, address2, city, state_code,
    postal_code, postal_code_short, country_code, is_business, is_vacant, is_active,
    delivery_point, verified_at, verification_attempts, api_type, api_response,
    created_at, updated_at";

fn address_from_row(row: &Row<'_>) -> rusqlite::Result<Address> {
    Ok(Address {
        company: row.get(0)?,
        external_id: row.get(1)?,
        address1: row.get(2)?,
        address2: row.get(3)?,
        city: row.get(4)?,
        state_code: row.get(5)?,
        postal_code: row.get(6)?,
        postal_code_short: row.get(7)?,
        country_code: row.get(8)?,
        is_business: row.get(9)?,
        is_vacant: row.get(10)?,
        is_active: row.get(11)?,
        delivery_point: row.get(12)?,
        verified_at: optional_timestamp_at(row, 13)?,
        verification_attempts: row.get(14)?,
        api_type: row.get(15)?,
        api_response: row.get(16)?,
        created_at: timestamp_at(row, 17)?,
        updated_at: timestamp_at(row, 18)?,
    })
}

const PROSPECT_COLUMNS: &str =
    "company, external_id, full_name, customer_external_id, address_external_id, created_at";

fn prospect_from_row(row: &Row<'_>) -> rusqlite::Result<Prospect> {
    Ok(Prospect {
        company: row.get(0)?,
        external_id: row.get(1)?,
        full_name: row.get(2)?,
        customer_external_id: row.get(3)?,
        address_external_id: row.get(4)?,
        created_at: timestamp_at(row, 5)?,
    })
}

const INVOICE_COLUMNS: &str = "company, external_id, customer_external_id, prospect_external_id,
    invoice_number, amount_cents, invoiced_on, description, created_at";

fn invoice_from_row(row: &Row<'_>) -> rusqlite::Result<Invoice> {
    Ok(Invoice {
        company: row.get(0)?,
        external_id: row.get(1)?,
        customer_external_id: row.get(2)?,
        prospect_external_id: row.get(3)?,
        invoice_number: row.get(4)?,
        amount_cents: row.get(5)?,
        invoiced_on: date_at(row, 6)?,
        description: row.get(7)?,
        created_at: timestamp_at(row, 8)?,
    })
}

fn find_one<T>(
    conn: &Connection,
    table: &str,
    columns: &str,
    company: &str,
    external_id: &str,
    from_row: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Option<T>, StoreError> {
    let sql = format!("SELECT {columns} FROM {table} WHERE company = ?1 AND external_id = ?2");
    let found = conn
        .query_row(&sql, params![company, external_id], from_row)
        .optional()?;
    Ok(found)
}

fn list_all<T>(
    conn: &Connection,
    table: &str,
    columns: &str,
    company: &str,
    from_row: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>, StoreError> {
    let sql = format!("SELECT {columns} FROM {table} WHERE company = ?1 ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![company], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

impl Repository for SqliteRepository {
    fn begin(&mut self) -> Result<(), StoreError> {
        if !self.in_transaction {
            self.conn.execute_batch("BEGIN IMMEDIATE")?;
            self.in_transaction = true;
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.require_transaction()?;
        self.conn.execute_batch("COMMIT")?;
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        self.require_transaction()?;
        self.in_transaction = false;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn find_customer(&self, company: &str, external_id: &str) -> Result<Option<Customer>, StoreError> {
        find_one(&self.conn, "customers", CUSTOMER_COLUMNS, company, external_id, customer_from_row)
    }

    fn find_address(&self, company: &str, external_id: &str) -> Result<Option<Address>, StoreError> {
        find_one(&self.conn, "addresses", ADDRESS_COLUMNS, company, external_id, address_from_row)
    }

    fn find_prospect(&self, company: &str, external_id: &str) -> Result<Option<Prospect>, StoreError> {
        find_one(&self.conn, "prospects", PROSPECT_COLUMNS, company, external_id, prospect_from_row)
    }

    fn find_invoice(&self, company: &str, external_id: &str) -> Result<Option<Invoice>, StoreError> {
        find_one(&self.conn, "invoices", INVOICE_COLUMNS, company, external_id, invoice_from_row)
    }

    fn save_customer(&mut self, customer: &Customer) -> Result<(), StoreError> {
        self.require_transaction()?;
        self.conn.execute(
            "INSERT INTO customers (
                company, external_id, name, count_invoices, invoice_total_cents,
                is_new_customer, is_repeat_customer, first_invoiced_on, last_invoiced_on,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT (company, external_id) DO UPDATE SET
                name = excluded.name,
                count_invoices = excluded.count_invoices,
                invoice_total_cents = excluded.invoice_total_cents,
                is_new_customer = excluded.is_new_customer,
                is_repeat_customer = excluded.is_repeat_customer,
                first_invoiced_on = excluded.first_invoiced_on,
                last_invoiced_on = excluded.last_invoiced_on,
                updated_at = excluded.updated_at",
            params![
                customer.company,
                customer.external_id,
                customer.name,
                customer.count_invoices,
                customer.invoice_total_cents,
                customer.is_new_customer,
                customer.is_repeat_customer,
                format_date(customer.first_invoiced_on),
                format_date(customer.last_invoiced_on),
                customer.created_at.to_rfc3339(),
                customer.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn save_address(&mut self, address: &Address) -> Result<(), StoreError> {
        self.require_transaction()?;
        self.conn.execute(
            "INSERT INTO addresses (
                company, external_id, address1, address2, city, state_code,
                postal_code, postal_code_short, country_code, is_business, is_vacant, is_active,
                delivery_point, verified_at, verification_attempts, api_type, api_response,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
            ON CONFLICT (company, external_id) DO UPDATE SET
                address1 = excluded.address1,
                address2 = excluded.address2,
                city = excluded.city,
                state_code = excluded.state_code,
                postal_code = excluded.postal_code,
                postal_code_short = excluded.postal_code_short,
                country_code = excluded.country_code,
                is_business = excluded.is_business,
                is_vacant = excluded.is_vacant,
                is_active = excluded.is_active,
                delivery_point = excluded.delivery_point,
                verified_at = excluded.verified_at,
                verification_attempts = MAX(addresses.verification_attempts, excluded.verification_attempts),
                api_type = excluded.api_type,
                api_response = excluded.api_response,
                updated_at = excluded.updated_at",
            params![
                address.company,
                address.external_id,
                address.address1,
                address.address2,
                address.city,
                address.state_code,
                address.postal_code,
                address.postal_code_short,
                address.country_code,
                address.is_business,
                address.is_vacant,
                address.is_active,
                address.delivery_point,
                address.verified_at.map(|dt| dt.to_rfc3339()),
                address.verification_attempts,
                address.api_type,
                address.api_response,
                address.created_at.to_rfc3339(),
                address.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn save_prospect(&mut self, prospect: &Prospect) -> Result<(), StoreError> {
        self.require_transaction()?;
        if !self.customer_exists(&prospect.company, &prospect.customer_external_id)? {
            return Err(StoreError::DanglingReference {
                entity: "prospect",
                external_id: prospect.external_id.clone(),
                missing: "customer",
            });
        }
        if !self.address_exists(&prospect.company, &prospect.address_external_id)? {
            return Err(StoreError::DanglingReference {
                entity: "prospect",
                external_id: prospect.external_id.clone(),
                missing: "address",
            });
        }

        self.conn.execute(
            "INSERT INTO prospects (
                company, external_id, full_name, customer_external_id, address_external_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (company, external_id) DO NOTHING",
            params![
                prospect.company,
                prospect.external_id,
                prospect.full_name,
                prospect.customer_external_id,
                prospect.address_external_id,
                prospect.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn save_invoice(&mut self, invoice: &Invoice) -> Result<(), StoreError> {
        self.require_transaction()?;
        if !self.customer_exists(&invoice.company, &invoice.customer_external_id)? {
            return Err(StoreError::DanglingReference {
                entity: "invoice",
                external_id: invoice.external_id.clone(),
                missing: "customer",
            });
        }

        self.conn.execute(
            "INSERT INTO invoices (
                company, external_id, customer_external_id, prospect_external_id,
                invoice_number, amount_cents, invoiced_on, description, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT (company, external_id) DO NOTHING",
            params![
                invoice.company,
                invoice.external_id,
                invoice.customer_external_id,
                invoice.prospect_external_id,
                invoice.invoice_number,
                invoice.amount_cents,
                invoice.invoiced_on.format("%Y-%m-%d").to_string(),
                invoice.description,
                invoice.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn customers(&self, company: &str) -> Result<Vec<Customer>, StoreError> {
        list_all(&self.conn, "customers", CUSTOMER_COLUMNS, company, customer_from_row)
    }

    fn addresses(&self, company: &str) -> Result<Vec<Address>, StoreError> {
        list_all(&self.conn, "addresses", ADDRESS_COLUMNS, company, address_from_row)
    }

    fn prospects(&self, company: &str) -> Result<Vec<Prospect>, StoreError> {
        list_all(&self.conn, "prospects", PROSPECT_COLUMNS, company, prospect_from_row)
    }

    fn invoices(&self, company: &str) -> Result<Vec<Invoice>, StoreError> {
        list_all(&self.conn, "invoices", INVOICE_COLUMNS, company, invoice_from_row)
    }
}

// ============================================================================
// SETTINGS-BACKED TOKEN CACHE
// ============================================================================

/// USPS token persisted as a JSON settings row.
pub struct SqliteTokenCache {
    conn: Rc<Connection>,
}

impl TokenCache for SqliteTokenCache {
    fn load(&self) -> Result<Option<AccessToken>, StoreError> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM settings WHERE name = ?1",
                params![TOKEN_SETTING_NAME],
                |row| row.get(0),
            )
            .optional()?;

        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn store(&self, token: &AccessToken) -> Result<(), StoreError> {
        let json = serde_json::to_string(token)?;
        self.conn.execute(
            "INSERT INTO settings (name, value, type, updated_at) VALUES (?1, ?2, 'json', ?3)
             ON CONFLICT (name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![TOKEN_SETTING_NAME, json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.conn.execute(
            "DELETE FROM settings WHERE name = ?1",
            params![TOKEN_SETTING_NAME],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_rows() -> (Customer, Address, Prospect, Invoice) {
        let address = Address::new("ACME", "6605 Hunters Path", None, "Cary", "IL", "60013", None);
        let key = crate::identity::derive_key("Smith, Matt", &address.parts());
        let mut customer = Customer::new("ACME", &key, "Smith, Matt");
        let date = NaiveDate::from_ymd_opt(2023, 11, 6).unwrap();
        customer.add_invoice(8799, date).unwrap();
        let prospect = Prospect::new("ACME", &key, "Smith, Matt", &key, &address.external_id);
        let invoice_key = crate::identity::invoice_key(&key, "1007439", date);
        let invoice = Invoice::new("ACME", &invoice_key, &key, &key, "1007439", 8799, date);
        (customer, address, prospect, invoice)
    }

    #[test]
    fn test_round_trip_all_aggregates() {
        let mut repo = SqliteRepository::open_in_memory().unwrap();
        let (customer, mut address, prospect, invoice) = sample_rows();
        address.record_attempt("mock", Some("{}".to_string()));
        address.mark_verified(Utc::now());

        repo.begin().unwrap();
        repo.save_customer(&customer).unwrap();
        repo.save_address(&address).unwrap();
        repo.save_prospect(&prospect).unwrap();
        repo.save_invoice(&invoice).unwrap();
        repo.commit().unwrap();

        let loaded = repo.find_customer("ACME", &customer.external_id).unwrap().unwrap();
        assert_eq!(loaded.count_invoices, 1);
        assert_eq!(loaded.invoice_total(), "87.99");
        assert_eq!(loaded.first_invoiced_on, customer.first_invoiced_on);

        let loaded = repo.find_address("ACME", &address.external_id).unwrap().unwrap();
        assert!(loaded.is_verified());
        assert_eq!(loaded.verification_attempts, 1);
        assert_eq!(loaded.api_type.as_deref(), Some("mock"));

        assert!(repo.find_prospect("ACME", &prospect.external_id).unwrap().is_some());
        let loaded = repo.find_invoice("ACME", &invoice.external_id).unwrap().unwrap();
        assert_eq!(loaded.amount(), "87.99");
        assert_eq!(repo.counts("ACME").unwrap().invoices, 1);
    }

    #[test]
    fn test_idempotency_save_twice() {
        let mut repo = SqliteRepository::open_in_memory().unwrap();
        let (customer, address, prospect, invoice) = sample_rows();

        for _ in 0..2 {
            repo.begin().unwrap();
            repo.save_customer(&customer).unwrap();
            repo.save_address(&address).unwrap();
            repo.save_prospect(&prospect).unwrap();
            repo.save_invoice(&invoice).unwrap();
            repo.commit().unwrap();
        }

        let counts = repo.counts("ACME").unwrap();
        assert_eq!(counts.customers, 1);
        assert_eq!(counts.addresses, 1);
        assert_eq!(counts.prospects, 1);
        assert_eq!(counts.invoices, 1);
    }

    #[test]
    fn test_rollback_discards_row() {
        let mut repo = SqliteRepository::open_in_memory().unwrap();
        let (customer, _, prospect, _) = sample_rows();

        repo.begin().unwrap();
        repo.save_customer(&customer).unwrap();
        let err = repo.save_prospect(&prospect).unwrap_err();
        assert!(matches!(err, StoreError::DanglingReference { missing: "address", .. }));
        repo.rollback().unwrap();

        assert!(repo.find_customer("ACME", &customer.external_id).unwrap().is_none());
        assert!(matches!(repo.save_customer(&customer), Err(StoreError::NoTransaction)));
    }

    #[test]
    fn test_token_cache_persists_across_connections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("migration.db");
        let token = AccessToken {
            access_token: "abc".to_string(),
            token_type: Some("Bearer".to_string()),
            issued_at: 1_700_000_000_000,
            expires_in: 28_800,
        };

        {
            let repo = SqliteRepository::open(&path).unwrap();
            let cache = repo.token_cache();
            assert!(cache.load().unwrap().is_none());
            cache.store(&token).unwrap();
        }

        let repo = SqliteRepository::open(&path).unwrap();
        let cache = repo.token_cache();
        assert_eq!(cache.load().unwrap(), Some(token));
        cache.clear().unwrap();
        assert!(cache.load().unwrap().is_none());
    }

    #[test]
    fn test_dry_run_open_never_creates_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.db");

        let repo = SqliteRepository::open_for_dry_run(&path).unwrap();
        assert_eq!(repo.counts("ACME").unwrap().customers, 0);
        drop(repo);

        assert!(!path.exists());
    }

    #[test]
    fn test_dry_run_open_reads_existing_without_writing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("migration.db");
        let (customer, address, prospect, invoice) = sample_rows();

        {
            let mut repo = SqliteRepository::open(&path).unwrap();
            repo.begin().unwrap();
            repo.save_customer(&customer).unwrap();
            repo.save_address(&address).unwrap();
            repo.save_prospect(&prospect).unwrap();
            repo.save_invoice(&invoice).unwrap();
            repo.commit().unwrap();
        }

        let mut repo = SqliteRepository::open_for_dry_run(&path).unwrap();
        assert!(repo.find_customer("ACME", &customer.external_id).unwrap().is_some());
        assert_eq!(repo.counts("ACME").unwrap().invoices, 1);

        let mut renamed = customer.clone();
        renamed.name = "Someone Else".to_string();
        let write = repo
            .begin()
            .and_then(|_| repo.save_customer(&renamed));
        assert!(matches!(write, Err(StoreError::Sqlite(_))));
    }
}
