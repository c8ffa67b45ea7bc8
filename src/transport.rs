//! HTTP transport contract.
//!
//! The engine never talks to `reqwest` directly outside of
//! [`DefaultTransport`] — every other module goes through the
//! [`Transport`] trait so tests can substitute an in-memory mock.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Method {
    Get,
    Head,
    Post,
}

impl Method {
    fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
        }
    }
}

/// A single outgoing HTTP request, as the engine builds it.
#[derive(Debug)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl TransportRequest {
    pub fn get(url: impl Into<String>) -> Self {
        TransportRequest {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn head(url: impl Into<String>) -> Self {
        TransportRequest {
            method: Method::Head,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: Vec<u8>) -> Self {
        TransportRequest {
            method: Method::Post,
            url: url.into(),
            headers: vec![("Content-Type".into(), "application/jose+json".into())],
            body: Some(body),
        }
    }
}

/// A response, with headers normalized to lowercase keys.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }

    pub fn text(&self) -> Result<String> {
        Ok(String::from_utf8(self.body.clone()).map_err(|e| e.utf8_error())?)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Parses the body as a problem document when the content-type says
    /// `application/problem+json` (or when it's simply JSON-ish and the
    /// status is non-2xx, which most ACME servers do not distinguish).
    pub fn problem(&self) -> crate::error::ProblemDocument {
        serde_json::from_slice(&self.body).unwrap_or_default()
    }
}

/// The injected HTTP transport. Implementations perform exactly one
/// request/response round trip; retries and nonce bookkeeping live above
/// this layer in [`crate::jws`].
pub trait Transport: Send + Sync {
    fn request(&self, req: TransportRequest) -> Result<TransportResponse>;
}

/// A blocking `reqwest`-backed transport, the crate's default.
pub struct DefaultTransport {
    client: Client,
}

impl DefaultTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("acme-rs/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(DefaultTransport { client })
    }
}

impl Default for DefaultTransport {
    fn default() -> Self {
        Self::new().expect("failed to build the default HTTP client")
    }
}

impl Transport for DefaultTransport {
    fn request(&self, req: TransportRequest) -> Result<TransportResponse> {
        let mut builder = match req.method {
            Method::Get => self.client.get(&req.url),
            Method::Head => self.client.head(&req.url),
            Method::Post => self.client.post(&req.url),
        };

        for (name, value) in &req.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = req.body {
            builder = builder.body(body);
        }

        let response = builder.send()?;
        let status = response.status().as_u16();
        let mut headers = BTreeMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_ascii_lowercase(), value.to_owned());
            }
        }
        let body = response.bytes()?.to_vec();

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

/// Convenience: raises an [`Error`] out of a non-2xx response, mapping the
/// problem document through [`Error::from_problem`].
pub fn ensure_success(response: &TransportResponse) -> Result<()> {
    if response.is_success() {
        return Ok(());
    }
    Err(Error::from_problem(response.problem()))
}
