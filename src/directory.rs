//! Directory loader. Fetched once at init and treated as immutable
//! thereafter.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::transport::{ensure_success, Transport, TransportRequest};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryMeta {
    #[serde(rename = "termsOfService")]
    pub terms_of_service: Option<String>,
    #[serde(rename = "website")]
    pub website: Option<String>,
    #[serde(default)]
    #[serde(rename = "externalAccountRequired")]
    pub external_account_required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Directory {
    #[serde(rename = "newNonce")]
    pub new_nonce: String,
    #[serde(rename = "newAccount")]
    pub new_account: String,
    #[serde(rename = "newOrder")]
    pub new_order: String,
    #[serde(rename = "revokeCert")]
    pub revoke_cert: Option<String>,
    #[serde(rename = "keyChange")]
    pub key_change: Option<String>,
    #[serde(default)]
    pub meta: DirectoryMeta,
}

impl Default for DirectoryMeta {
    fn default() -> Self {
        DirectoryMeta {
            terms_of_service: None,
            website: None,
            external_account_required: false,
        }
    }
}

impl Directory {
    /// GETs the directory document once. A caller that already holds a
    /// deserialized `Directory` from a previous run can skip this and
    /// build straight from it instead.
    pub fn fetch(transport: &dyn Transport, directory_url: &str) -> Result<Directory> {
        let response = transport.request(TransportRequest::get(directory_url))?;
        ensure_success(&response)?;
        Ok(response.json()?)
    }
}
