// 🔑 Identity Key Generator - Deterministic external ids
//
// "The same logical entity always yields the same key"
//
// Problem solved:
// - Source systems share no primary key with each other (or with us)
// - Re-importing a file must find the rows it created last time
// - Keys are pure functions of normalized name + address tokens,
//   so dedup needs no prior lookup keyed on auto-increment ids

use chrono::NaiveDate;

/// Namespace tag prefixed to every prospect/customer key.
pub const KEY_NAMESPACE: &str = "id.";

/// Address fields that participate in identity, in key order.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddressParts<'a> {
    pub address1: &'a str,
    pub address2: &'a str,
    pub city: &'a str,
    pub state: &'a str,
    pub postal_code: &'a str,
}

/// Lower-case and keep only alphanumeric code points.
///
/// Uses Unicode case mapping, so "JOSÉ" and "josé" collapse to the same token.
pub fn normalize_token(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Address tokens alone: address1 + address2 + city + state + postal code.
pub fn address_key(address: &AddressParts<'_>) -> String {
    let mut key = String::new();
    for part in [
        address.address1,
        address.address2,
        address.city,
        address.state,
        address.postal_code,
    ] {
        key.push_str(&normalize_token(part));
    }
    key
}

/// Prospect/customer key: namespace + name tokens + address tokens.
pub fn derive_key(name: &str, address: &AddressParts<'_>) -> String {
    format!(
        "{}{}{}",
        KEY_NAMESPACE,
        normalize_token(name),
        address_key(address)
    )
}

/// Invoice key: prospect key (customer + address) + invoice number + YYYYMMDD.
pub fn invoice_key(prospect_key: &str, invoice_number: &str, invoiced_on: NaiveDate) -> String {
    format!(
        "{}{}{}",
        prospect_key,
        normalize_token(invoice_number),
        invoiced_on.format("%Y%m%d")
    )
}

/// Lifetime-summary invoice key: one per prospect, independent of the sale date.
pub fn lifetime_invoice_key(prospect_key: &str) -> String {
    format!("{}{}", prospect_key, LIFETIME_SUFFIX)
}

const LIFETIME_SUFFIX: &str = "lifetime";

#[cfg(test)]
mod tests {
    use super::*;

    fn parts<'a>(a1: &'a str, a2: &'a str, city: &'a str, state: &'a str, zip: &'a str) -> AddressParts<'a> {
        AddressParts {
            address1: a1,
            address2: a2,
            city,
            state,
            postal_code: zip,
        }
    }

    #[test]
    fn test_address_key_strips_punctuation_and_case() {
        let address = parts("4215 Main E. Trail", "", "Crystal Lake", "IL", "60012");
        assert_eq!(address_key(&address), "4215mainetrailcrystallakeil60012");
    }

    #[test]
    fn test_derive_key_matches_known_layout() {
        let address = parts("3010 Jonathon Lane", "", "Woodstock", "IL", "60098");
        let key = derive_key("Vanderwiel, Jay and Sarah", &address);
        assert_eq!(key, "id.vanderwieljayandsarah3010jonathonlanewoodstockil60098");
    }

    #[test]
    fn test_derive_key_is_stable_across_formatting() {
        let a = parts("123 Main St", "Apt 4B", "Boston", "MA", "02108");
        let b = parts("  123 MAIN ST ", "apt. 4-b", "BOSTON", "ma", "02108");
        assert_eq!(derive_key("Doe, John", &a), derive_key("DOE JOHN", &b));
    }

    #[test]
    fn test_unicode_names_normalize() {
        let address = parts("1 Plaza", "", "Santa Fe", "NM", "87501");
        assert_eq!(
            derive_key("JOSÉ Núñez", &address),
            derive_key("josé núñez", &address)
        );
        assert!(derive_key("José", &address).starts_with("id.josé"));
    }

    #[test]
    fn test_shared_address_distinct_names() {
        let address = parts("10 Elm St", "", "Springfield", "IL", "62701");
        assert_ne!(derive_key("Smith, Ann", &address), derive_key("Smith, Bob", &address));
        assert_eq!(address_key(&address), "10elmstspringfieldil62701");
    }

    #[test]
    fn test_invoice_key_appends_number_and_date() {
        let date = NaiveDate::from_ymd_opt(2023, 11, 6).unwrap();
        let key = invoice_key("id.smithmatt6605hunterspathcaryil60013", "1007439", date);
        assert_eq!(key, "id.smithmatt6605hunterspathcaryil60013100743920231106");
    }

    #[test]
    fn test_lifetime_invoice_key_ignores_date() {
        let key = lifetime_invoice_key("id.adamsjohn10maplestcaryil60013");
        assert_eq!(key, "id.adamsjohn10maplestcaryil60013lifetime");
    }
}
