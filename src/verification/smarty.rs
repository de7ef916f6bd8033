// 🧭 Smarty US-Street provider
//
// Acceptance rule: first candidate with DPV footnotes "AABB" and DPV match
// code "Y". Anything else leaves the address unverified.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::transport::HttpTransport;
use super::{AddressVerifier, Verification};
use crate::entities::{sanitize_street_line, Address};
use crate::error::ProviderError;

pub const API_TYPE: &str = "smarty";
pub const SMARTY_STREET_ENDPOINT: &str = "https://us-street.api.smarty.com/street-address";

const ACCEPTED_FOOTNOTES: &str = "AABB";
const ACCEPTED_MATCH_CODE: &str = "Y";

// ============================================================================
// LOOKUP + CANDIDATE
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Lookup {
    pub street: String,
    pub secondary: String,
    pub city: String,
    pub state: String,
    pub zipcode: String,
    pub candidates: u8,
}

impl Lookup {
    pub fn from_address(address: &Address) -> Self {
        Lookup {
            street: sanitize_street_line(&address.address1),
            secondary: address
                .address2
                .as_deref()
                .map(sanitize_street_line)
                .unwrap_or_default(),
            city: address.city.clone(),
            state: address.state_code.to_uppercase(),
            zipcode: address.postal_code_short.clone().unwrap_or_default(),
            candidates: 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Components {
    #[serde(default)]
    pub city_name: String,
    #[serde(default)]
    pub state_abbreviation: String,
    #[serde(default)]
    pub zipcode: String,
    #[serde(default)]
    pub plus4_code: Option<String>,
    #[serde(default)]
    pub delivery_point: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// "Residential" or "Commercial"
    #[serde(default)]
    pub rdi: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    #[serde(default)]
    pub dpv_footnotes: Option<String>,
    #[serde(default)]
    pub dpv_match_code: Option<String>,
    #[serde(default, alias = "vacant")]
    pub dpv_vacant: Option<String>,
    #[serde(default)]
    pub active: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub delivery_line_1: String,
    #[serde(default)]
    pub delivery_line_2: Option<String>,
    #[serde(default)]
    pub components: Components,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub analysis: Analysis,
}

impl Candidate {
    pub fn is_deliverable(&self) -> bool {
        self.analysis.dpv_footnotes.as_deref() == Some(ACCEPTED_FOOTNOTES)
            && self.analysis.dpv_match_code.as_deref() == Some(ACCEPTED_MATCH_CODE)
    }
}

// ============================================================================
// CLIENT SEAM
// ============================================================================

pub trait SmartyClient {
    fn send_lookup(&self, lookup: &Lookup) -> Result<Vec<Candidate>, ProviderError>;
}

/// US-Street API over HTTP, authenticated with auth-id / auth-token.
pub struct SmartyHttpClient {
    auth_id: String,
    auth_token: String,
    transport: Box<dyn HttpTransport>,
}

impl SmartyHttpClient {
    pub fn new(auth_id: String, auth_token: String, transport: Box<dyn HttpTransport>) -> Self {
        SmartyHttpClient {
            auth_id,
            auth_token,
            transport,
        }
    }
}

impl SmartyClient for SmartyHttpClient {
    fn send_lookup(&self, lookup: &Lookup) -> Result<Vec<Candidate>, ProviderError> {
        let candidates = lookup.candidates.to_string();
        let mut query: Vec<(&str, &str)> = vec![
            ("auth-id", self.auth_id.as_str()),
            ("auth-token", self.auth_token.as_str()),
            ("street", lookup.street.as_str()),
            ("secondary", lookup.secondary.as_str()),
            ("city", lookup.city.as_str()),
            ("state", lookup.state.as_str()),
            ("zipcode", lookup.zipcode.as_str()),
            ("candidates", candidates.as_str()),
        ];
        query.retain(|(_, value)| !value.is_empty());

        let response = self.transport.get(SMARTY_STREET_ENDPOINT, &query, None)?;
        match response.status {
            200 => Ok(serde_json::from_str(&response.body)?),
            400 => Err(ProviderError::Validation {
                payload: serde_json::to_string(lookup)?,
                response: response.body,
            }),
            401 | 402 => Err(ProviderError::Auth(format!(
                "Smarty returned HTTP {}",
                response.status
            ))),
            429 => Err(ProviderError::RateLimited {
                retry_after: response.header("retry-after").unwrap_or("unknown").to_string(),
            }),
            status => Err(ProviderError::VerificationFailed(format!(
                "Smarty returned HTTP {status}"
            ))),
        }
    }
}

// ============================================================================
// VERIFIER
// ============================================================================

pub struct SmartyVerifier {
    client: Box<dyn SmartyClient>,
}

impl SmartyVerifier {
    pub fn new(client: Box<dyn SmartyClient>) -> Self {
        SmartyVerifier { client }
    }

    fn apply(address: &mut Address, candidate: &Candidate) {
        let components = &candidate.components;

        address.address1 = candidate.delivery_line_1.clone();
        address.address2 = candidate
            .delivery_line_2
            .clone()
            .filter(|line| !line.trim().is_empty());
        address.city = components.city_name.clone();
        address.state_code = components.state_abbreviation.clone();
        let postal = match components.plus4_code.as_deref().filter(|p| !p.is_empty()) {
            Some(plus4) => format!("{}-{}", components.zipcode, plus4),
            None => components.zipcode.clone(),
        };
        address.set_postal_code(&postal);
        if address.country_code.is_none() {
            address.country_code = Some("US".to_string());
        }
        address.delivery_point = components.delivery_point.clone();

        address.is_business = candidate.metadata.rdi.as_deref() == Some("Commercial");
        address.is_vacant = candidate.analysis.dpv_vacant.as_deref() == Some("Y");
        if let Some(active) = candidate.analysis.active.as_deref() {
            address.is_active = active == "Y";
        }
    }
}

impl AddressVerifier for SmartyVerifier {
    fn api_type(&self) -> &'static str {
        API_TYPE
    }

    fn verify_and_normalize(&mut self, address: &mut Address) -> Result<Verification, ProviderError> {
        let lookup = Lookup::from_address(address);
        debug!(street = %lookup.street, zipcode = %lookup.zipcode, "verifying address with Smarty");

        let candidates = match self.client.send_lookup(&lookup) {
            Ok(candidates) => candidates,
            Err(e) => {
                address.record_attempt(API_TYPE, None);
                address.mark_unverified();
                return Err(e);
            }
        };

        let raw = serde_json::to_string(&candidates)?;
        address.record_attempt(API_TYPE, Some(raw));

        let Some(candidate) = candidates.first() else {
            address.mark_unverified();
            return Err(ProviderError::NoCandidate(address.one_line()));
        };

        if !candidate.is_deliverable() {
            address.mark_unverified();
            warn!(
                address = %address.external_id,
                footnotes = candidate.analysis.dpv_footnotes.as_deref().unwrap_or(""),
                match_code = candidate.analysis.dpv_match_code.as_deref().unwrap_or(""),
                "Smarty candidate not deliverable"
            );
            return Err(ProviderError::VerificationFailed(format!(
                "{} is not deliverable",
                address.one_line()
            )));
        }

        Self::apply(address, candidate);
        address.mark_verified(Utc::now());
        Ok(Verification::Verified)
    }
}
