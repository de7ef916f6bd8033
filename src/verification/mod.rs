// 📮 Address Verification - Swappable providers behind one trait
//
// "Verification can fail; the address still lands"
//
// Problem solved:
// - Three backends (Mock / USPS / Smarty), each with its own acceptance rule
// - Providers throttle, reject, or find nothing
// - One throttled response must stop live calls for the rest of the run
//
// Every backend follows the same bookkeeping on every call:
// - verification_attempts + 1 (even when skipped or failed)
// - api_type recorded, raw provider response kept
// - verified_at set iff this attempt met the acceptance rule

pub mod mock;
pub mod smarty;
pub mod transport;
pub mod usps;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::MigrationConfig;
use crate::entities::Address;
use crate::error::{ConfigError, ProviderError};

pub use mock::MockVerifier;
pub use smarty::{SmartyClient, SmartyHttpClient, SmartyVerifier};
pub use transport::{HttpResponse, HttpTransport, ReqwestTransport};
pub use usps::{AccessToken, InMemoryTokenCache, TokenCache, UspsVerifier};

// ============================================================================
// CORE TYPES
// ============================================================================

/// Outcome of a call that did not raise a provider error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verification {
    /// Provider accepted the address; normalized fields were applied.
    Verified,

    /// Live verification was skipped (run is rate limited). Attempt counted.
    Deferred,
}

/// AddressVerifier - the one interface every backend implements
pub trait AddressVerifier {
    /// Provider name stored on the address (`api_type`).
    fn api_type(&self) -> &'static str;

    /// Verify one address and normalize it in place.
    ///
    /// The external id is never touched: identity is fixed at creation.
    fn verify_and_normalize(&mut self, address: &mut Address)
        -> Result<Verification, ProviderError>;

    /// Verify with the occupant's name as a hint. Providers that cannot match
    /// on a firm name ignore it.
    fn verify_for_firm(
        &mut self,
        address: &mut Address,
        firm: Option<&str>,
    ) -> Result<Verification, ProviderError> {
        let _ = firm;
        self.verify_and_normalize(address)
    }

    /// True once the provider has throttled this run.
    fn is_rate_limited(&self) -> bool {
        false
    }
}

/// Which backend a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    None,
    Mock,
    Usps,
    Smarty,
}

impl ProviderKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::None => "none",
            ProviderKind::Mock => "mock",
            ProviderKind::Usps => "usps",
            ProviderKind::Smarty => "smarty",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        match name.trim().to_lowercase().as_str() {
            "" | "none" | "off" => Ok(ProviderKind::None),
            "mock" => Ok(ProviderKind::Mock),
            "usps" => Ok(ProviderKind::Usps),
            "smarty" | "smartystreets" => Ok(ProviderKind::Smarty),
            _ => Err(ConfigError::UnknownProvider(name.to_string())),
        }
    }
}

// ============================================================================
// FACTORY FUNCTIONS
// ============================================================================

/// Build the configured verifier for one run.
///
/// Returns `None` when verification is switched off. A fresh instance per run
/// keeps rate-limit state from leaking between runs.
pub fn build_verifier(
    config: &MigrationConfig,
    token_cache: Box<dyn TokenCache>,
) -> Result<Option<Box<dyn AddressVerifier>>, ConfigError> {
    let timeout = Duration::from_secs(config.http_timeout_seconds);

    let verifier: Box<dyn AddressVerifier> = match config.provider {
        ProviderKind::None => return Ok(None),
        ProviderKind::Mock => Box::new(MockVerifier::new()),
        ProviderKind::Usps => {
            let client_id = config
                .usps
                .client_id
                .clone()
                .ok_or(ConfigError::MissingCredential("USPS_CLIENT_ID"))?;
            let client_secret = config
                .usps
                .client_secret
                .clone()
                .ok_or(ConfigError::MissingCredential("USPS_CLIENT_SECRET"))?;
            Box::new(UspsVerifier::new(
                client_id,
                client_secret,
                Box::new(http_transport(timeout)?),
                token_cache,
            ))
        }
        ProviderKind::Smarty => {
            let auth_id = config
                .smarty
                .auth_id
                .clone()
                .ok_or(ConfigError::MissingCredential("SMARTY_AUTH_ID"))?;
            let auth_token = config
                .smarty
                .auth_token
                .clone()
                .ok_or(ConfigError::MissingCredential("SMARTY_AUTH_TOKEN"))?;
            let client = SmartyHttpClient::new(auth_id, auth_token, Box::new(http_transport(timeout)?));
            Box::new(SmartyVerifier::new(Box::new(client)))
        }
    };

    Ok(Some(verifier))
}

fn http_transport(timeout: Duration) -> Result<ReqwestTransport, ConfigError> {
    ReqwestTransport::new(timeout).map_err(|e| ConfigError::InvalidValue {
        name: "http client",
        value: e.to_string(),
    })
}
