// ⚖️ Entity Reconciler - Canonical rows → existing-or-new aggregates
//
// "Look up by derived key; create on first sight, merge on every later one"
//
// Per row:
//   1. normalize name + address fields
//   2. derive the prospect key (name + address) and the address key
//   3. Customer: find or create (is_new_customer = true)
//   4. Address: find, or create + verify once (failures are non-fatal)
//   5. Prospect: find or create, linked to Customer + Address
//   6. Invoice: find or create; a created invoice moves the customer totals
//
// First-seen name wins: later rows merge into the Customer without renaming it.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::entities::{Address, Customer, EntityKind, Invoice, Prospect};
use crate::error::RowError;
use crate::identity;
use crate::mapping::CanonicalRecord;
use crate::repository::Repository;
use crate::verification::{AddressVerifier, Verification};

// ============================================================================
// ROW OUTCOME
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    Created,
    Existing,
}

impl Disposition {
    pub fn is_created(&self) -> bool {
        matches!(self, Disposition::Created)
    }
}

/// What happened when a newly created address met the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VerificationOutcome {
    /// No provider configured, or the address already existed.
    NotAttempted,
    Verified,
    /// Skipped because the run is rate limited.
    Deferred,
    /// Provider error. The address was persisted unverified.
    Failed { kind: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowOutcome {
    pub row: usize,
    pub prospect_key: String,
    pub address_key: String,
    pub invoice_key: Option<String>,

    pub customer: Disposition,
    pub address: Disposition,
    pub prospect: Disposition,
    pub invoice: Option<Disposition>,

    pub verification: VerificationOutcome,
}

impl RowOutcome {
    pub fn disposition(&self, kind: EntityKind) -> Option<Disposition> {
        match kind {
            EntityKind::Customer => Some(self.customer),
            EntityKind::Address => Some(self.address),
            EntityKind::Prospect => Some(self.prospect),
            EntityKind::Invoice => self.invoice,
        }
    }
}

// ============================================================================
// RECONCILER
// ============================================================================

pub struct EntityReconciler {
    company: String,
    verifier: Option<Box<dyn AddressVerifier>>,
}

impl EntityReconciler {
    pub fn new(company: &str, verifier: Option<Box<dyn AddressVerifier>>) -> Self {
        EntityReconciler {
            company: company.trim().to_string(),
            verifier,
        }
    }

    pub fn company(&self) -> &str {
        &self.company
    }

    pub fn provider_name(&self) -> Option<&'static str> {
        self.verifier.as_ref().map(|v| v.api_type())
    }

    pub fn is_rate_limited(&self) -> bool {
        self.verifier.as_ref().map_or(false, |v| v.is_rate_limited())
    }

    /// Keys a record resolves to, without touching storage.
    pub fn keys_for(&self, record: &CanonicalRecord) -> (String, String) {
        let candidate = self.candidate_address(record);
        let prospect_key = identity::derive_key(&record.name, &candidate.parts());
        (prospect_key, candidate.external_id)
    }

    fn candidate_address(&self, record: &CanonicalRecord) -> Address {
        Address::new(
            &self.company,
            &record.address1,
            record.address2.as_deref(),
            &record.city,
            &record.state,
            &record.postal_code,
            record.country.as_deref(),
        )
    }

    /// Reconcile one canonical row. The caller owns the unit of work.
    pub fn reconcile(
        &mut self,
        repo: &mut dyn Repository,
        record: &CanonicalRecord,
    ) -> Result<RowOutcome, RowError> {
        let name = record.name.trim();
        if name.is_empty() {
            return Err(RowError::MissingField("name"));
        }

        let candidate = self.candidate_address(record);
        if candidate.address1.is_empty() {
            return Err(RowError::MissingField("address1"));
        }
        let prospect_key = identity::derive_key(name, &candidate.parts());
        let address_key = candidate.external_id.clone();

        // Customer
        let (mut customer, customer_disposition) =
            match repo.find_customer(&self.company, &prospect_key)? {
                Some(existing) => (existing, Disposition::Existing),
                None => (
                    Customer::new(&self.company, &prospect_key, name),
                    Disposition::Created,
                ),
            };

        // Address (verified once, on creation)
        let (address_disposition, verification) =
            match repo.find_address(&self.company, &address_key)? {
                Some(_) => (Disposition::Existing, VerificationOutcome::NotAttempted),
                None => {
                    let mut address = candidate;
                    let verification = self.verify(&mut address, name, record.row);
                    repo.save_address(&address)?;
                    (Disposition::Created, verification)
                }
            };

        if customer_disposition.is_created() {
            repo.save_customer(&customer)?;
        }

        // Prospect
        let prospect_disposition = match repo.find_prospect(&self.company, &prospect_key)? {
            Some(_) => Disposition::Existing,
            None => {
                let prospect = Prospect::new(
                    &self.company,
                    &prospect_key,
                    name,
                    &customer.external_id,
                    &address_key,
                );
                repo.save_prospect(&prospect)?;
                Disposition::Created
            }
        };

        // Invoice
        let (invoice_key, invoice_disposition) = match &record.invoice {
            Some(line) => {
                let key = if line.lifetime {
                    identity::lifetime_invoice_key(&prospect_key)
                } else {
                    identity::invoice_key(&prospect_key, &line.number, line.invoiced_on)
                };
                let disposition = match repo.find_invoice(&self.company, &key)? {
                    Some(_) => Disposition::Existing,
                    None => {
                        let invoice = Invoice::new(
                            &self.company,
                            &key,
                            &customer.external_id,
                            &prospect_key,
                            &line.number,
                            line.amount_cents,
                            line.invoiced_on,
                        )
                        .with_description(line.description.clone());

                        customer.add_invoice(invoice.amount_cents, invoice.invoiced_on)?;
                        repo.save_customer(&customer)?;
                        repo.save_invoice(&invoice)?;
                        Disposition::Created
                    }
                };
                (Some(key), Some(disposition))
            }
            None => (None, None),
        };

        let outcome = RowOutcome {
            row: record.row,
            prospect_key,
            address_key,
            invoice_key,
            customer: customer_disposition,
            address: address_disposition,
            prospect: prospect_disposition,
            invoice: invoice_disposition,
            verification,
        };

        debug!(
            row = outcome.row,
            key = %outcome.prospect_key,
            customer = ?outcome.customer,
            address = ?outcome.address,
            prospect = ?outcome.prospect,
            invoice = ?outcome.invoice,
            "row reconciled"
        );

        Ok(outcome)
    }

    fn verify(&mut self, address: &mut Address, firm: &str, row: usize) -> VerificationOutcome {
        let verifier = match self.verifier.as_mut() {
            Some(verifier) => verifier,
            None => return VerificationOutcome::NotAttempted,
        };

        match verifier.verify_for_firm(address, Some(firm)) {
            Ok(Verification::Verified) => VerificationOutcome::Verified,
            Ok(Verification::Deferred) => VerificationOutcome::Deferred,
            Err(e) => {
                warn!(
                    row,
                    address = %address.external_id,
                    provider = verifier.api_type(),
                    kind = e.kind(),
                    error = %e,
                    "address verification failed, keeping address unverified"
                );
                VerificationOutcome::Failed {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::mapping::InvoiceLine;
    use crate::repository::InMemoryRepository;
    use crate::verification::MockVerifier;
    use chrono::NaiveDate;

    fn record(row: usize, name: &str, address1: &str, invoice: Option<(&str, u32, i64)>) -> CanonicalRecord {
        CanonicalRecord {
            row,
            name: name.to_string(),
            address1: address1.to_string(),
            address2: None,
            city: "Cary".to_string(),
            state: "IL".to_string(),
            postal_code: "60013".to_string(),
            country: None,
            invoice: invoice.map(|(number, day, cents)| InvoiceLine {
                number: number.to_string(),
                invoiced_on: NaiveDate::from_ymd_opt(2023, 11, day).unwrap(),
                amount_cents: cents,
                description: None,
                lifetime: false,
            }),
        }
    }

    fn run(reconciler: &mut EntityReconciler, repo: &mut InMemoryRepository, rec: &CanonicalRecord) -> RowOutcome {
        repo.begin().unwrap();
        let outcome = reconciler.reconcile(repo, rec).unwrap();
        repo.commit().unwrap();
        outcome
    }

    struct FailingVerifier;

    impl AddressVerifier for FailingVerifier {
        fn api_type(&self) -> &'static str {
            "failing"
        }

        fn verify_and_normalize(&mut self, address: &mut Address) -> Result<Verification, ProviderError> {
            address.record_attempt("failing", None);
            Err(ProviderError::NoCandidate(address.one_line()))
        }
    }

    #[test]
    fn test_first_row_creates_everything() {
        let mut repo = InMemoryRepository::new();
        let mut reconciler = EntityReconciler::new("ACME", None);

        let outcome = run(&mut reconciler, &mut repo, &record(1, "Smith, Matt", "6605 Hunters Path", Some(("1007439", 6, 8799))));

        assert_eq!(outcome.customer, Disposition::Created);
        assert_eq!(outcome.address, Disposition::Created);
        assert_eq!(outcome.prospect, Disposition::Created);
        assert_eq!(outcome.invoice, Some(Disposition::Created));
        assert_eq!(outcome.verification, VerificationOutcome::NotAttempted);

        let customer = repo.find_customer("ACME", &outcome.prospect_key).unwrap().unwrap();
        assert_eq!(customer.count_invoices, 1);
        assert_eq!(customer.invoice_total(), "87.99");
        assert!(customer.is_new_customer);
    }

    #[test]
    fn test_same_row_twice_is_noop() {
        let mut repo = InMemoryRepository::new();
        let mut reconciler = EntityReconciler::new("ACME", None);
        let rec = record(1, "Smith, Matt", "6605 Hunters Path", Some(("1007439", 6, 8799)));

        run(&mut reconciler, &mut repo, &rec);
        let second = run(&mut reconciler, &mut repo, &rec);

        assert_eq!(second.customer, Disposition::Existing);
        assert_eq!(second.address, Disposition::Existing);
        assert_eq!(second.prospect, Disposition::Existing);
        assert_eq!(second.invoice, Some(Disposition::Existing));

        let customer = repo.find_customer("ACME", &second.prospect_key).unwrap().unwrap();
        assert_eq!(customer.count_invoices, 1);
        assert_eq!(repo.counts("ACME").unwrap().invoices, 1);
    }

    #[test]
    fn test_second_invoice_marks_repeat_and_keeps_first_name() {
        let mut repo = InMemoryRepository::new();
        let mut reconciler = EntityReconciler::new("ACME", None);

        run(&mut reconciler, &mut repo, &record(1, "Smith, Matt", "6605 Hunters Path", Some(("1007439", 6, 8799))));
        let outcome = run(&mut reconciler, &mut repo, &record(2, "SMITH MATT", "6605 Hunters Path", Some(("1007440", 9, 4000))));

        assert_eq!(outcome.customer, Disposition::Existing);
        assert_eq!(outcome.invoice, Some(Disposition::Created));

        let customer = repo.find_customer("ACME", &outcome.prospect_key).unwrap().unwrap();
        assert_eq!(customer.name, "Smith, Matt");
        assert_eq!(customer.count_invoices, 2);
        assert_eq!(customer.invoice_total(), "127.99");
        assert!(customer.is_repeat_customer);
        assert!(!customer.is_new_customer);
    }

    #[test]
    fn test_lifetime_row_with_new_sale_date_is_not_a_second_invoice() {
        let mut repo = InMemoryRepository::new();
        let mut reconciler = EntityReconciler::new("ACME", None);

        let mut first = record(1, "ADAMS JOHN", "10 MAPLE ST", Some(("", 6, 12500)));
        first.invoice.as_mut().unwrap().lifetime = true;
        let mut later = record(1, "ADAMS JOHN", "10 MAPLE ST", Some(("", 20, 19900)));
        later.invoice.as_mut().unwrap().lifetime = true;

        let created = run(&mut reconciler, &mut repo, &first);
        let again = run(&mut reconciler, &mut repo, &later);

        assert_eq!(created.invoice, Some(Disposition::Created));
        assert_eq!(again.invoice, Some(Disposition::Existing));
        assert_eq!(again.invoice_key, created.invoice_key);

        let customer = repo.find_customer("ACME", &again.prospect_key).unwrap().unwrap();
        assert_eq!(customer.count_invoices, 1);
        assert_eq!(customer.invoice_total(), "125.00");
        assert!(!customer.is_repeat_customer);
        assert_eq!(repo.counts("ACME").unwrap().invoices, 1);
    }

    #[test]
    fn test_overflowing_total_is_row_error() {
        let mut repo = InMemoryRepository::new();
        let mut reconciler = EntityReconciler::new("ACME", None);

        run(&mut reconciler, &mut repo, &record(1, "Ann Lee", "1 Elm St", Some(("1", 6, i64::MAX))));

        repo.begin().unwrap();
        let err = reconciler
            .reconcile(&mut repo, &record(2, "Ann Lee", "1 Elm St", Some(("2", 7, 1))))
            .unwrap_err();
        repo.rollback().unwrap();

        assert!(matches!(err, RowError::TotalOverflow(_)));
        let key = reconciler.keys_for(&record(2, "Ann Lee", "1 Elm St", None)).0;
        let customer = repo.find_customer("ACME", &key).unwrap().unwrap();
        assert_eq!(customer.count_invoices, 1);
        assert_eq!(customer.invoice_total_cents, i64::MAX);
        assert_eq!(repo.counts("ACME").unwrap().invoices, 1);
    }

    #[test]
    fn test_people_at_same_address_share_it() {
        let mut repo = InMemoryRepository::new();
        let mut reconciler = EntityReconciler::new("ACME", Some(Box::new(MockVerifier::new())));

        let first = run(&mut reconciler, &mut repo, &record(1, "Ann Lee", "1 Elm St", None));
        let second = run(&mut reconciler, &mut repo, &record(2, "Bob Lee", "1 Elm St", None));

        assert_eq!(first.address_key, second.address_key);
        assert_eq!(second.address, Disposition::Existing);
        assert_eq!(second.customer, Disposition::Created);
        assert_eq!(first.verification, VerificationOutcome::Verified);
        assert_eq!(second.verification, VerificationOutcome::NotAttempted);

        let address = repo.find_address("ACME", &first.address_key).unwrap().unwrap();
        assert_eq!(address.verification_attempts, 1);
        assert!(address.is_verified());

        let counts = repo.counts("ACME").unwrap();
        assert_eq!(counts.addresses, 1);
        assert_eq!(counts.prospects, 2);
    }

    #[test]
    fn test_verification_failure_is_not_fatal() {
        let mut repo = InMemoryRepository::new();
        let mut reconciler = EntityReconciler::new("ACME", Some(Box::new(FailingVerifier)));

        let outcome = run(&mut reconciler, &mut repo, &record(1, "Ann Lee", "1 Elm St", None));

        match &outcome.verification {
            VerificationOutcome::Failed { kind, .. } => assert_eq!(kind, "no_candidate"),
            other => panic!("expected failure, got {:?}", other),
        }
        let address = repo.find_address("ACME", &outcome.address_key).unwrap().unwrap();
        assert!(!address.is_verified());
        assert_eq!(address.verification_attempts, 1);
        assert!(repo.find_prospect("ACME", &outcome.prospect_key).unwrap().is_some());
    }

    #[test]
    fn test_blank_name_is_row_error() {
        let mut repo = InMemoryRepository::new();
        let mut reconciler = EntityReconciler::new("ACME", None);
        repo.begin().unwrap();
        let err = reconciler.reconcile(&mut repo, &record(3, "  ", "1 Elm St", None)).unwrap_err();
        assert!(matches!(err, RowError::MissingField("name")));
    }

    #[test]
    fn test_companies_do_not_share_entities() {
        let mut repo = InMemoryRepository::new();
        let rec = record(1, "Ann Lee", "1 Elm St", None);

        run(&mut EntityReconciler::new("ACME", None), &mut repo, &rec);
        let other = run(&mut EntityReconciler::new("GLOBEX", None), &mut repo, &rec);

        assert_eq!(other.customer, Disposition::Created);
        assert_eq!(repo.counts("ACME").unwrap().customers, 1);
        assert_eq!(repo.counts("GLOBEX").unwrap().customers, 1);
    }
}
