// 📫 Address Entity - Verification state + normalized postal fields
//
// "Attempts only ever go up; verified_at reflects the latest attempt"
//
// Problem solved:
// - Source exports spell the same street a dozen ways
// - Providers normalize, but they fail, throttle, or find nothing
// - The address must persist either way, with an audit trail

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{self, AddressParts};

/// Postal address owned by a company, identified by its address key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub company: String,
    pub external_id: String,

    pub address1: String,
    pub address2: Option<String>,
    pub city: String,
    pub state_code: String,
    pub postal_code: String,
    pub postal_code_short: Option<String>,
    pub country_code: Option<String>,

    pub is_business: bool,
    pub is_vacant: bool,
    pub is_active: bool,
    pub delivery_point: Option<String>,

    // ========================================================================
    // VERIFICATION (monotonic attempts, timestamp tracks the latest attempt)
    // ========================================================================
    pub verified_at: Option<DateTime<Utc>>,
    pub verification_attempts: u32,
    pub api_type: Option<String>,
    pub api_response: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Address {
    /// Create a new, unverified address. The external id is derived from the
    /// fields as given, before any provider normalization.
    pub fn new(
        company: &str,
        address1: &str,
        address2: Option<&str>,
        city: &str,
        state_code: &str,
        postal_code: &str,
        country_code: Option<&str>,
    ) -> Self {
        let now = Utc::now();
        let address2 = address2.map(str::trim).filter(|s| !s.is_empty());

        let mut address = Address {
            company: company.to_string(),
            external_id: String::new(),
            address1: address1.trim().to_string(),
            address2: address2.map(str::to_string),
            city: city.trim().to_string(),
            state_code: state_code.trim().to_string(),
            postal_code: String::new(),
            postal_code_short: None,
            country_code: country_code
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            is_business: false,
            is_vacant: false,
            is_active: true,
            delivery_point: None,
            verified_at: None,
            verification_attempts: 0,
            api_type: None,
            api_response: None,
            created_at: now,
            updated_at: now,
        };
        address.set_postal_code(postal_code);
        address.external_id = identity::address_key(&address.parts());
        address
    }

    /// Identity-bearing fields, in key order.
    pub fn parts(&self) -> AddressParts<'_> {
        AddressParts {
            address1: &self.address1,
            address2: self.address2.as_deref().unwrap_or(""),
            city: &self.city,
            state: &self.state_code,
            postal_code: &self.postal_code,
        }
    }

    pub fn set_postal_code(&mut self, postal_code: &str) {
        self.postal_code = postal_code.trim().to_string();
        self.postal_code_short = postal_code_short(&self.postal_code);
    }

    pub fn is_verified(&self) -> bool {
        self.verified_at.is_some()
    }

    /// Count one provider call. Called on every attempt regardless of outcome.
    pub fn record_attempt(&mut self, api_type: &str, raw_response: Option<String>) {
        self.verification_attempts = self.verification_attempts.saturating_add(1);
        self.api_type = Some(api_type.to_string());
        if raw_response.is_some() {
            self.api_response = raw_response;
        }
        self.updated_at = Utc::now();
    }

    /// Latest attempt met the provider's acceptance rule.
    pub fn mark_verified(&mut self, at: DateTime<Utc>) {
        self.verified_at = Some(at);
    }

    /// Latest attempt did not meet the acceptance rule.
    pub fn mark_unverified(&mut self) {
        self.verified_at = None;
    }

    /// Single-line rendering used in logs and provider error messages.
    pub fn one_line(&self) -> String {
        let street = match &self.address2 {
            Some(line2) => format!("{} {}", self.address1, line2),
            None => self.address1.clone(),
        };
        format!(
            "{}, {} {} {}",
            street, self.city, self.state_code, self.postal_code
        )
    }
}

/// First five digits of a US ZIP / ZIP+4, if present.
pub fn postal_code_short(postal_code: &str) -> Option<String> {
    let digits: String = postal_code
        .chars()
        .take_while(|c| *c != '-')
        .filter(|c| c.is_ascii_digit())
        .collect();

    if digits.len() >= 5 {
        Some(digits[..5].to_string())
    } else if digits.is_empty() {
        None
    } else {
        // Leading zeros get dropped by spreadsheets: "2108" is Boston's "02108"
        Some(format!("{:0>5}", digits))
    }
}

/// Punctuation-free, upper-cased street line with common words abbreviated.
/// Applied to street lines before they are submitted to a provider.
pub fn sanitize_street_line(line: &str) -> String {
    const REPLACEMENTS: &[(&str, &str)] = &[
        // Street suffixes
        ("street", "st"),
        ("road", "rd"),
        ("avenue", "ave"),
        ("boulevard", "blvd"),
        ("lane", "ln"),
        ("drive", "dr"),
        ("court", "ct"),
        ("place", "pl"),
        ("square", "sq"),
        ("terrace", "ter"),
        ("parkway", "pkwy"),
        ("circle", "cir"),
        ("highway", "hwy"),
        // Directionals
        ("north", "n"),
        ("south", "s"),
        ("east", "e"),
        ("west", "w"),
        ("northeast", "ne"),
        ("northwest", "nw"),
        ("southeast", "se"),
        ("southwest", "sw"),
        // Units
        ("apartment", "apt"),
        ("suite", "ste"),
        ("floor", "fl"),
        ("building", "bldg"),
        ("room", "rm"),
        ("department", "dept"),
    ];

    let cleaned: String = line
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .to_lowercase();

    cleaned
        .split_whitespace()
        .map(|word| {
            REPLACEMENTS
                .iter()
                .find(|(long, _)| *long == word)
                .map(|(_, short)| *short)
                .unwrap_or(word)
        })
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Address {
        Address::new("ACME", "123 Main St", Some("Apt 4B"), "Boston", "MA", "02108", Some("US"))
    }

    #[test]
    fn test_new_address_derives_external_id() {
        let address = sample();
        assert_eq!(address.external_id, "123mainstapt4bbostonma02108");
        assert_eq!(address.postal_code_short.as_deref(), Some("02108"));
        assert_eq!(address.verification_attempts, 0);
        assert!(!address.is_verified());
    }

    #[test]
    fn test_blank_second_line_is_none() {
        let address = Address::new("ACME", "1 Elm", Some("   "), "X", "IL", "60012", None);
        assert!(address.address2.is_none());
        assert!(address.country_code.is_none());
    }

    #[test]
    fn test_attempts_are_monotonic() {
        let mut address = sample();
        address.record_attempt("mock", None);
        address.mark_verified(Utc::now());
        address.record_attempt("usps", Some("{}".to_string()));
        address.mark_unverified();

        assert_eq!(address.verification_attempts, 2);
        assert_eq!(address.api_type.as_deref(), Some("usps"));
        assert_eq!(address.api_response.as_deref(), Some("{}"));
        assert!(!address.is_verified());
    }

    #[test]
    fn test_postal_code_short() {
        assert_eq!(postal_code_short("60012-1234").as_deref(), Some("60012"));
        assert_eq!(postal_code_short("600121234").as_deref(), Some("60012"));
        assert_eq!(postal_code_short("2108").as_deref(), Some("02108"));
        assert_eq!(postal_code_short(""), None);
    }

    #[test]
    fn test_sanitize_street_line() {
        assert_eq!(sanitize_street_line("123 North Main Street, Apartment #4"), "123 N MAIN ST APT 4");
        assert_eq!(sanitize_street_line("  55  Lakeview   drive "), "55 LAKEVIEW DR");
        assert_eq!(sanitize_street_line(""), "");
    }
}
