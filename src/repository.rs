// 🗄️ Repository - Persistence boundary + per-row unit of work
//
// The reconciler only ever talks to this trait. Two implementations:
// - SqliteRepository (crate::db): durable, WAL-mode SQLite
// - InMemoryRepository (here): dry runs and tests
//
// Every write happens between begin() and commit(); a failed row calls
// rollback() and leaves no trace.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entities::{Address, Customer, EntityKind, Invoice, Prospect};
use crate::error::StoreError;

/// Per-category totals for one company.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCounts {
    pub customers: usize,
    pub addresses: usize,
    pub prospects: usize,
    pub invoices: usize,
}

impl EntityCounts {
    pub fn get(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Customer => self.customers,
            EntityKind::Address => self.addresses,
            EntityKind::Prospect => self.prospects,
            EntityKind::Invoice => self.invoices,
        }
    }
}

pub trait Repository {
    // ========================================================================
    // UNIT OF WORK
    // ========================================================================
    fn begin(&mut self) -> Result<(), StoreError>;

    fn commit(&mut self) -> Result<(), StoreError>;

    fn rollback(&mut self) -> Result<(), StoreError>;

    // ========================================================================
    // LOOKUPS (by company + external id)
    // ========================================================================
    fn find_customer(&self, company: &str, external_id: &str) -> Result<Option<Customer>, StoreError>;

    fn find_address(&self, company: &str, external_id: &str) -> Result<Option<Address>, StoreError>;

    fn find_prospect(&self, company: &str, external_id: &str) -> Result<Option<Prospect>, StoreError>;

    fn find_invoice(&self, company: &str, external_id: &str) -> Result<Option<Invoice>, StoreError>;

    // ========================================================================
    // UPSERTS (require an open unit of work)
    // ========================================================================
    fn save_customer(&mut self, customer: &Customer) -> Result<(), StoreError>;

    fn save_address(&mut self, address: &Address) -> Result<(), StoreError>;

    /// Fails with `DanglingReference` if the prospect's customer is unknown.
    fn save_prospect(&mut self, prospect: &Prospect) -> Result<(), StoreError>;

    /// Fails with `DanglingReference` if the invoice's customer is unknown.
    fn save_invoice(&mut self, invoice: &Invoice) -> Result<(), StoreError>;

    // ========================================================================
    // LISTINGS (reports + tests)
    // ========================================================================
    fn customers(&self, company: &str) -> Result<Vec<Customer>, StoreError>;

    fn addresses(&self, company: &str) -> Result<Vec<Address>, StoreError>;

    fn prospects(&self, company: &str) -> Result<Vec<Prospect>, StoreError>;

    fn invoices(&self, company: &str) -> Result<Vec<Invoice>, StoreError>;

    fn counts(&self, company: &str) -> Result<EntityCounts, StoreError> {
        Ok(EntityCounts {
            customers: self.customers(company)?.len(),
            addresses: self.addresses(company)?.len(),
            prospects: self.prospects(company)?.len(),
            invoices: self.invoices(company)?.len(),
        })
    }
}

type Key = (String, String);

fn key(company: &str, external_id: &str) -> Key {
    (company.to_string(), external_id.to_string())
}

#[derive(Debug, Clone, Default)]
struct Tables {
    customers: BTreeMap<Key, Customer>,
    addresses: BTreeMap<Key, Address>,
    prospects: BTreeMap<Key, Prospect>,
    invoices: BTreeMap<Key, Invoice>,
}

fn scoped<T: Clone>(table: &BTreeMap<Key, T>, company: &str) -> Vec<T> {
    table
        .iter()
        .filter(|((c, _), _)| c == company)
        .map(|(_, v)| v.clone())
        .collect()
}

/// In-memory repository. Rollback restores the snapshot taken at begin().
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    tables: Tables,
    snapshot: Option<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of one company's aggregates, for dry runs against live data.
    pub fn seeded_from(source: &dyn Repository, company: &str) -> Result<Self, StoreError> {
        let mut tables = Tables::default();
        for customer in source.customers(company)? {
            tables
                .customers
                .insert(key(&customer.company, &customer.external_id), customer);
        }
        for address in source.addresses(company)? {
            tables
                .addresses
                .insert(key(&address.company, &address.external_id), address);
        }
        for prospect in source.prospects(company)? {
            tables
                .prospects
                .insert(key(&prospect.company, &prospect.external_id), prospect);
        }
        for invoice in source.invoices(company)? {
            tables
                .invoices
                .insert(key(&invoice.company, &invoice.external_id), invoice);
        }
        debug!(company, customers = tables.customers.len(), "seeded in-memory repository");

        Ok(InMemoryRepository {
            tables,
            snapshot: None,
        })
    }

    fn require_transaction(&self) -> Result<(), StoreError> {
        if self.snapshot.is_some() {
            Ok(())
        } else {
            Err(StoreError::NoTransaction)
        }
    }
}

impl Repository for InMemoryRepository {
    fn begin(&mut self) -> Result<(), StoreError> {
        if self.snapshot.is_none() {
            self.snapshot = Some(self.tables.clone());
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.snapshot.take().ok_or(StoreError::NoTransaction)?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        let snapshot = self.snapshot.take().ok_or(StoreError::NoTransaction)?;
        self.tables = snapshot;
        debug!("in-memory unit of work rolled back");
        Ok(())
    }

    fn find_customer(&self, company: &str, external_id: &str) -> Result<Option<Customer>, StoreError> {
        Ok(self.tables.customers.get(&key(company, external_id)).cloned())
    }

    fn find_address(&self, company: &str, external_id: &str) -> Result<Option<Address>, StoreError> {
        Ok(self.tables.addresses.get(&key(company, external_id)).cloned())
    }

    fn find_prospect(&self, company: &str, external_id: &str) -> Result<Option<Prospect>, StoreError> {
        Ok(self.tables.prospects.get(&key(company, external_id)).cloned())
    }

    fn find_invoice(&self, company: &str, external_id: &str) -> Result<Option<Invoice>, StoreError> {
        Ok(self.tables.invoices.get(&key(company, external_id)).cloned())
    }

    fn save_customer(&mut self, customer: &Customer) -> Result<(), StoreError> {
        self.require_transaction()?;
        self.tables
            .customers
            .insert(key(&customer.company, &customer.external_id), customer.clone());
        Ok(())
    }

    fn save_address(&mut self, address: &Address) -> Result<(), StoreError> {
        self.require_transaction()?;
        self.tables
            .addresses
            .insert(key(&address.company, &address.external_id), address.clone());
        Ok(())
    }

    fn save_prospect(&mut self, prospect: &Prospect) -> Result<(), StoreError> {
        self.require_transaction()?;
        if !self
            .tables
            .customers
            .contains_key(&key(&prospect.company, &prospect.customer_external_id))
        {
            return Err(StoreError::DanglingReference {
                entity: "prospect",
                external_id: prospect.external_id.clone(),
                missing: "customer",
            });
        }
        if !self
            .tables
            .addresses
            .contains_key(&key(&prospect.company, &prospect.address_external_id))
        {
            return Err(StoreError::DanglingReference {
                entity: "prospect",
                external_id: prospect.external_id.clone(),
                missing: "address",
            });
        }
        self.tables
            .prospects
            .insert(key(&prospect.company, &prospect.external_id), prospect.clone());
        Ok(())
    }

    fn save_invoice(&mut self, invoice: &Invoice) -> Result<(), StoreError> {
        self.require_transaction()?;
        if !self
            .tables
            .customers
            .contains_key(&key(&invoice.company, &invoice.customer_external_id))
        {
            return Err(StoreError::DanglingReference {
                entity: "invoice",
                external_id: invoice.external_id.clone(),
                missing: "customer",
            });
        }
        self.tables
            .invoices
            .insert(key(&invoice.company, &invoice.external_id), invoice.clone());
        Ok(())
    }

    fn customers(&self, company: &str) -> Result<Vec<Customer>, StoreError> {
        Ok(scoped(&self.tables.customers, company))
    }

    fn addresses(&self, company: &str) -> Result<Vec<Address>, StoreError> {
        Ok(scoped(&self.tables.addresses, company))
    }

    fn prospects(&self, company: &str) -> Result<Vec<Prospect>, StoreError> {
        Ok(scoped(&self.tables.prospects, company))
    }

    fn invoices(&self, company: &str) -> Result<Vec<Invoice>, StoreError> {
        Ok(scoped(&self.tables.invoices, company))
    }
}
