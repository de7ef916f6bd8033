// 🇺🇸 USPS Addresses v3 provider
//
// OAuth2 client-credentials token, cached through TokenCache and refreshed
// ahead of expiry. One 429 flips the run into rate-limited mode: every later
// address is counted but not sent.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::transport::HttpTransport;
use super::{AddressVerifier, Verification};
use crate::entities::{sanitize_street_line, Address};
use crate::error::{ProviderError, StoreError};

pub const API_TYPE: &str = "usps";
pub const USPS_OAUTH_ENDPOINT: &str = "https://api.usps.com/oauth2/v3/token";
pub const USPS_ADDRESSES_ENDPOINT: &str = "https://api.usps.com/addresses/v3/address";
pub const TOKEN_SETTING_NAME: &str = "usps_api_oauth_access_token";

/// Refresh this long before the token's stated expiry.
pub const TOKEN_EXPIRY_MARGIN_MS: i64 = 60_000;

// ============================================================================
// ACCESS TOKEN + CACHE
// ============================================================================

/// OAuth token as returned by the token endpoint.
/// `issued_at` is epoch milliseconds, `expires_in` is seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub issued_at: i64,
    #[serde(default)]
    pub expires_in: i64,
}

impl AccessToken {
    pub fn expires_at_ms(&self) -> i64 {
        self.issued_at + self.expires_in * 1000
    }

    /// Expired, or within `margin_ms` of expiring.
    pub fn is_expired_at(&self, now_ms: i64, margin_ms: i64) -> bool {
        self.access_token.is_empty() || now_ms + margin_ms >= self.expires_at_ms()
    }
}

/// Persistence for the access token between runs.
pub trait TokenCache {
    fn load(&self) -> Result<Option<AccessToken>, StoreError>;

    fn store(&self, token: &AccessToken) -> Result<(), StoreError>;

    fn clear(&self) -> Result<(), StoreError>;
}

/// Process-local cache. Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTokenCache {
    slot: Arc<Mutex<Option<AccessToken>>>,
}

impl InMemoryTokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: AccessToken) -> Self {
        InMemoryTokenCache {
            slot: Arc::new(Mutex::new(Some(token))),
        }
    }

    pub fn current(&self) -> Option<AccessToken> {
        self.slot.lock().ok().and_then(|slot| slot.clone())
    }
}

impl TokenCache for InMemoryTokenCache {
    fn load(&self) -> Result<Option<AccessToken>, StoreError> {
        Ok(self.current())
    }

    fn store(&self, token: &AccessToken) -> Result<(), StoreError> {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(token.clone());
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
        Ok(())
    }
}

// ============================================================================
// RESPONSE SHAPES
// ============================================================================

#[derive(Debug, Deserialize)]
struct AddressResponse {
    #[serde(default)]
    address: Option<UspsAddress>,
    #[serde(rename = "additionalInfo", default)]
    additional_info: Option<AdditionalInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UspsAddress {
    street_address: String,
    #[serde(default)]
    secondary_address: Option<String>,
    #[serde(default)]
    city: String,
    #[serde(default)]
    state: String,
    #[serde(rename = "ZIPCode", default)]
    zip_code: String,
    #[serde(rename = "ZIPPlus4", default)]
    zip_plus4: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdditionalInfo {
    #[serde(default)]
    delivery_point: Option<String>,
    #[serde(default)]
    carrier_route: Option<String>,
    #[serde(rename = "DPVConfirmation", default)]
    dpv_confirmation: Option<String>,
    #[serde(default)]
    vacant: Option<String>,
    #[serde(default)]
    business: Option<String>,
}

fn is_yes(flag: &Option<String>) -> bool {
    flag.as_deref().map(|f| f.eq_ignore_ascii_case("Y")).unwrap_or(false)
}

// ============================================================================
// VERIFIER
// ============================================================================

pub struct UspsVerifier {
    client_id: String,
    client_secret: String,
    transport: Box<dyn HttpTransport>,
    cache: Box<dyn TokenCache>,
    token: Option<AccessToken>,
    rate_limited: bool,
    clock: fn() -> i64,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl UspsVerifier {
    pub fn new(
        client_id: String,
        client_secret: String,
        transport: Box<dyn HttpTransport>,
        cache: Box<dyn TokenCache>,
    ) -> Self {
        UspsVerifier {
            client_id,
            client_secret,
            transport,
            cache,
            token: None,
            rate_limited: false,
            clock: now_ms,
        }
    }

    /// Replace the millisecond clock used for token expiry.
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    /// Current token, refreshed when missing or about to expire.
    fn access_token(&mut self) -> Result<String, ProviderError> {
        if self.token.is_none() {
            self.token = self.cache.load().map_err(cache_error)?;
        }

        let now = (self.clock)();
        let fresh = self
            .token
            .as_ref()
            .filter(|t| !t.is_expired_at(now, TOKEN_EXPIRY_MARGIN_MS))
            .map(|t| t.access_token.clone());

        match fresh {
            Some(token) => Ok(token),
            None => self.refresh_token(now),
        }
    }

    fn refresh_token(&mut self, now: i64) -> Result<String, ProviderError> {
        debug!("requesting USPS access token");
        let body = json!({
            "grant_type": "client_credentials",
            "client_id": self.client_id,
            "client_secret": self.client_secret,
        });
        let response = self.transport.post_json(USPS_OAUTH_ENDPOINT, &body)?;

        if response.status != 200 {
            return Err(ProviderError::Auth(format!(
                "token endpoint returned {}: {}",
                response.status, response.body
            )));
        }

        let mut token: AccessToken = serde_json::from_str(&response.body)?;
        if token.access_token.is_empty() {
            return Err(ProviderError::Auth("token endpoint returned no access_token".to_string()));
        }
        if token.issued_at == 0 {
            token.issued_at = now;
        }

        self.cache.store(&token).map_err(cache_error)?;
        info!(expires_at_ms = token.expires_at_ms(), "USPS access token refreshed");

        let access = token.access_token.clone();
        self.token = Some(token);
        Ok(access)
    }

    fn invalidate_token(&mut self) {
        self.token = None;
        if let Err(e) = self.cache.clear() {
            warn!(error = %e, "unable to clear cached USPS token");
        }
    }

    fn query_for(address: &Address, firm: Option<&str>) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("firm", firm.map(str::trim).unwrap_or_default().to_string()),
            ("streetAddress", sanitize_street_line(&address.address1)),
            (
                "secondaryAddress",
                address.address2.as_deref().map(sanitize_street_line).unwrap_or_default(),
            ),
            ("city", address.city.clone()),
            ("state", address.state_code.to_uppercase()),
            ("ZIPCode", address.postal_code_short.clone().unwrap_or_default()),
        ];
        query.retain(|(_, value)| !value.is_empty());
        query
    }

    fn apply(address: &mut Address, body: &str) -> Result<(), ProviderError> {
        let parsed: AddressResponse = serde_json::from_str(body)?;
        let normalized = parsed
            .address
            .ok_or_else(|| ProviderError::NoCandidate(address.one_line()))?;
        let info = parsed.additional_info.unwrap_or_default();

        address.address1 = normalized.street_address;
        address.address2 = normalized.secondary_address.filter(|s| !s.trim().is_empty());
        address.city = normalized.city;
        address.state_code = normalized.state;
        let postal = match normalized.zip_plus4.filter(|p| !p.trim().is_empty()) {
            Some(plus4) => format!("{}-{}", normalized.zip_code, plus4),
            None => normalized.zip_code,
        };
        address.set_postal_code(&postal);
        if address.country_code.is_none() {
            address.country_code = Some("US".to_string());
        }

        address.is_vacant = is_yes(&info.vacant);
        address.is_business = is_yes(&info.business);
        address.delivery_point = info.delivery_point;

        debug!(
            carrier_route = info.carrier_route.as_deref().unwrap_or(""),
            dpv = info.dpv_confirmation.as_deref().unwrap_or(""),
            "USPS normalized address"
        );
        Ok(())
    }
}

fn cache_error(err: StoreError) -> ProviderError {
    ProviderError::Auth(format!("token cache unavailable: {err}"))
}

impl AddressVerifier for UspsVerifier {
    fn api_type(&self) -> &'static str {
        API_TYPE
    }

    fn is_rate_limited(&self) -> bool {
        self.rate_limited
    }

    fn verify_and_normalize(&mut self, address: &mut Address) -> Result<Verification, ProviderError> {
        self.verify_for_firm(address, None)
    }

    fn verify_for_firm(
        &mut self,
        address: &mut Address,
        firm: Option<&str>,
    ) -> Result<Verification, ProviderError> {
        if self.rate_limited {
            address.record_attempt(API_TYPE, None);
            address.mark_unverified();
            debug!(address = %address.external_id, "USPS rate limited, verification deferred");
            return Ok(Verification::Deferred);
        }

        let query = Self::query_for(address, firm);
        let payload = serde_json::to_string(
            &query.iter().cloned().collect::<std::collections::BTreeMap<_, _>>(),
        )?;
        debug!(payload = %payload, "verifying address with USPS");

        let sent = self.access_token().and_then(|token| {
            let pairs: Vec<(&str, &str)> = query.iter().map(|(k, v)| (*k, v.as_str())).collect();
            self.transport.get(USPS_ADDRESSES_ENDPOINT, &pairs, Some(&token))
        });

        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                address.record_attempt(API_TYPE, None);
                address.mark_unverified();
                return Err(e);
            }
        };

        address.record_attempt(API_TYPE, Some(response.body.clone()));

        let outcome = match response.status {
            200 => Self::apply(address, &response.body),
            429 => {
                let retry_after = response.header("retry-after").unwrap_or("unknown").to_string();
                error!(
                    retry_after = %retry_after,
                    response = %response.body,
                    "USPS rate limit exceeded"
                );
                self.rate_limited = true;
                Err(ProviderError::RateLimited { retry_after })
            }
            400 => {
                error!(payload = %payload, response = %response.body, "USPS rejected address");
                Err(ProviderError::Validation {
                    payload,
                    response: response.body.clone(),
                })
            }
            401 => {
                self.invalidate_token();
                Err(ProviderError::Auth("USPS rejected the access token".to_string()))
            }
            status => Err(ProviderError::VerificationFailed(format!(
                "USPS returned HTTP {status} for {}",
                address.one_line()
            ))),
        };

        match outcome {
            Ok(()) => {
                address.mark_verified(Utc::now());
                Ok(Verification::Verified)
            }
            Err(e) => {
                address.mark_unverified();
                Err(e)
            }
        }
    }
}
