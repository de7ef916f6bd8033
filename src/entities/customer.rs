// 👤 Customer Entity - Running invoice aggregates
//
// "First-seen name wins; totals only move when a new invoice lands"
//
// Invariant: count_invoices == |invoices| and invoice_total == Σ amount.
// Both are maintained here and nowhere else.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::invoice::format_cents;
use crate::error::RowError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub company: String,
    pub external_id: String,
    pub name: String,

    pub count_invoices: u32,
    /// Sum of invoice amounts, in cents.
    pub invoice_total_cents: i64,

    pub is_new_customer: bool,
    pub is_repeat_customer: bool,

    pub first_invoiced_on: Option<chrono::NaiveDate>,
    pub last_invoiced_on: Option<chrono::NaiveDate>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    pub fn new(company: &str, external_id: &str, name: &str) -> Self {
        let now = Utc::now();

        Customer {
            company: company.to_string(),
            external_id: external_id.to_string(),
            name: name.trim().to_string(),
            count_invoices: 0,
            invoice_total_cents: 0,
            is_new_customer: true,
            is_repeat_customer: false,
            first_invoiced_on: None,
            last_invoiced_on: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fold one newly created invoice into the running aggregates.
    ///
    /// A customer who already had an invoice becomes a repeat customer. Fails,
    /// leaving the customer untouched, if the total would overflow.
    pub fn add_invoice(
        &mut self,
        amount_cents: i64,
        invoiced_on: chrono::NaiveDate,
    ) -> Result<(), RowError> {
        let total = self
            .invoice_total_cents
            .checked_add(amount_cents)
            .ok_or_else(|| RowError::TotalOverflow(self.external_id.clone()))?;
        let count = self
            .count_invoices
            .checked_add(1)
            .ok_or_else(|| RowError::TotalOverflow(self.external_id.clone()))?;

        if self.count_invoices > 0 {
            self.is_repeat_customer = true;
            self.is_new_customer = false;
        }

        self.count_invoices = count;
        self.invoice_total_cents = total;

        self.first_invoiced_on = Some(match self.first_invoiced_on {
            Some(first) => first.min(invoiced_on),
            None => invoiced_on,
        });
        self.last_invoiced_on = Some(match self.last_invoiced_on {
            Some(last) => last.max(invoiced_on),
            None => invoiced_on,
        });
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Invoice total rendered as "1234.56".
    pub fn invoice_total(&self) -> String {
        format_cents(self.invoice_total_cents)
    }
}
