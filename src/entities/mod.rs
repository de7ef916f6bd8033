// Entity Models - canonical migration aggregates
// Following one rule: "Identity is derived, values are merged"
//
// Each entity has:
// - A company scope
// - A deterministic external id (see crate::identity) that NEVER changes
// - Merge semantics for repeat encounters (see crate::reconciliation)

pub mod address;
pub mod customer;
pub mod invoice;
pub mod prospect;

pub use address::{postal_code_short, sanitize_street_line, Address};
pub use customer::Customer;
pub use invoice::{format_cents, parse_cents, Invoice};
pub use prospect::Prospect;

use serde::{Deserialize, Serialize};

/// Aggregate categories tracked in run reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Customer,
    Address,
    Prospect,
    Invoice,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Customer => "customers",
            EntityKind::Address => "addresses",
            EntityKind::Prospect => "prospects",
            EntityKind::Invoice => "invoices",
        }
    }

    pub fn all() -> [EntityKind; 4] {
        [
            EntityKind::Prospect,
            EntityKind::Customer,
            EntityKind::Address,
            EntityKind::Invoice,
        ]
    }
}
