// Mock provider: passthrough normalization, always verifies.

use chrono::Utc;
use serde_json::json;

use super::{AddressVerifier, Verification};
use crate::entities::{postal_code_short, Address};
use crate::error::ProviderError;

pub const API_TYPE: &str = "mock";

#[derive(Debug, Default)]
pub struct MockVerifier {
    calls: usize,
}

impl MockVerifier {
    pub fn new() -> Self {
        MockVerifier { calls: 0 }
    }

    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl AddressVerifier for MockVerifier {
    fn api_type(&self) -> &'static str {
        API_TYPE
    }

    fn verify_and_normalize(&mut self, address: &mut Address) -> Result<Verification, ProviderError> {
        self.calls += 1;

        address.state_code = address.state_code.trim().to_uppercase();
        address.postal_code_short = postal_code_short(&address.postal_code);

        let echo = json!({
            "address1": address.address1,
            "address2": address.address2,
            "city": address.city,
            "state": address.state_code,
            "postalCode": address.postal_code,
            "postalCodeShort": address.postal_code_short,
        });
        address.record_attempt(API_TYPE, Some(echo.to_string()));
        address.mark_verified(Utc::now());

        Ok(Verification::Verified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_always_verifies_and_counts() {
        let mut address = Address::new("ACME", "1 Elm St", None, "Cary", "il", "600131234", None);
        let external_id = address.external_id.clone();
        let mut verifier = MockVerifier::new();

        assert_eq!(verifier.verify_and_normalize(&mut address).unwrap(), Verification::Verified);
        assert_eq!(verifier.verify_and_normalize(&mut address).unwrap(), Verification::Verified);

        assert_eq!(address.verification_attempts, 2);
        assert_eq!(address.state_code, "IL");
        assert_eq!(address.postal_code_short.as_deref(), Some("60013"));
        assert_eq!(address.api_type.as_deref(), Some("mock"));
        assert!(address.is_verified());
        assert_eq!(address.external_id, external_id);
        assert_eq!(verifier.calls(), 2);
    }
}
