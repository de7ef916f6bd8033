// 🧾 Invoice Entity
//
// Identity is derived from the prospect key + invoice number + date, so the
// same invoice row imported twice resolves to the same record.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub company: String,
    pub external_id: String,
    pub customer_external_id: String,
    pub prospect_external_id: String,

    pub invoice_number: String,
    pub amount_cents: i64,
    pub invoiced_on: NaiveDate,
    pub description: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl Invoice {
    pub fn new(
        company: &str,
        external_id: &str,
        customer_external_id: &str,
        prospect_external_id: &str,
        invoice_number: &str,
        amount_cents: i64,
        invoiced_on: NaiveDate,
    ) -> Self {
        Invoice {
            company: company.to_string(),
            external_id: external_id.to_string(),
            customer_external_id: customer_external_id.to_string(),
            prospect_external_id: prospect_external_id.to_string(),
            invoice_number: invoice_number.trim().to_string(),
            amount_cents,
            invoiced_on,
            description: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description.filter(|d| !d.trim().is_empty());
        self
    }

    pub fn amount(&self) -> String {
        format_cents(self.amount_cents)
    }
}

/// Render cents as a two-decimal string ("-12.05", "0.00").
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

/// Parse a currency string into cents.
///
/// Accepts "$1,234.56", "87.99", "40", "(12.50)" and "-12.5". Returns None for
/// anything else, including blanks and amounts that overflow i64 cents. Values
/// beyond two decimals are rounded half away from zero.
pub fn parse_cents(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let (negative, body) = if trimmed.starts_with('(') && trimmed.ends_with(')') {
        (true, &trimmed[1..trimmed.len() - 1])
    } else {
        (false, trimmed)
    };

    let cleaned: String = body
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | ' '))
        .collect();
    let (negative, cleaned) = match cleaned.strip_prefix('-') {
        Some(rest) => (!negative, rest.to_string()),
        None => (negative, cleaned),
    };

    let mut parts = cleaned.splitn(2, '.');
    let whole = parts.next().unwrap_or("");
    let fraction = parts.next().unwrap_or("");

    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut frac_digits: Vec<u32> = fraction.chars().filter_map(|c| c.to_digit(10)).collect();
    frac_digits.resize(3.max(frac_digits.len()), 0);

    let mut cents = whole
        .checked_mul(100)?
        .checked_add(i64::from(frac_digits[0] * 10 + frac_digits[1]))?;
    if frac_digits[2] >= 5 {
        cents = cents.checked_add(1)?;
    }

    Some(if negative { -cents } else { cents })
}
