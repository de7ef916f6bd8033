// HTTP seam for address providers
//
// Providers speak to this trait, not to reqwest directly, so tests can replay
// canned responses (429s, 400s, token expiry) without a network.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;

use crate::error::ProviderError;

/// Status, lower-cased headers and body of one HTTP exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        HttpResponse {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_lowercase(), value.to_string());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Body as JSON; non-JSON bodies are wrapped as a string value.
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or_else(|_| Value::String(self.body.clone()))
    }
}

pub trait HttpTransport {
    fn post_json(&self, url: &str, body: &Value) -> Result<HttpResponse, ProviderError>;

    fn get(
        &self,
        url: &str,
        query: &[(&str, &str)],
        bearer: Option<&str>,
    ) -> Result<HttpResponse, ProviderError>;
}

/// Blocking reqwest client with a per-request timeout.
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("customer-migration/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(ReqwestTransport { client })
    }

    fn collect(response: reqwest::blocking::Response) -> Result<HttpResponse, ProviderError> {
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.text()?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

impl HttpTransport for ReqwestTransport {
    fn post_json(&self, url: &str, body: &Value) -> Result<HttpResponse, ProviderError> {
        let response = self.client.post(url).json(body).send()?;
        Self::collect(response)
    }

    fn get(
        &self,
        url: &str,
        query: &[(&str, &str)],
        bearer: Option<&str>,
    ) -> Result<HttpResponse, ProviderError> {
        let mut request = self.client.get(url).query(query);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        Self::collect(request.send()?)
    }
}
