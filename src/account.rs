//! Account registration.

use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::sign::Signer;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::crypto::{b64u, Keypair};
use crate::directory::Directory;
use crate::error::{Error, Result};
use crate::jws::{signed_request, KeyId, Payload};
use crate::nonce::NonceCache;
use crate::transport::{ensure_success, Transport};

/// External Account Binding credentials, issued out of band by a CA
/// that requires linking the ACME account to an existing customer
/// record.
pub struct ExternalAccount {
    pub id: String,
    pub secret: Vec<u8>,
    pub alg: String,
}

impl ExternalAccount {
    pub fn new(id: impl Into<String>, secret: Vec<u8>) -> Self {
        ExternalAccount {
            id: id.into(),
            secret,
            alg: "HS256".to_string(),
        }
    }
}

/// Parameters for [`register`].
pub struct NewAccount<'a> {
    pub account_key: &'a Keypair,
    /// Called with the directory's `termsOfService` URL; must return the
    /// same URL to indicate consent, or registration fails with
    /// [`Error::AgreeTos`].
    pub agree_to_terms: &'a dyn Fn(&str) -> Result<String>,
    pub contact: Vec<String>,
    pub external_account: Option<ExternalAccount>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Account {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub contact: Vec<String>,
    #[serde(default)]
    #[serde(rename = "termsOfServiceAgreed")]
    pub terms_of_service_agreed: Option<bool>,
    #[serde(default)]
    pub orders: Option<String>,
    /// Set once the registration response is read; this is the account
    /// resource URL used as `kid` for every subsequent signed request.
    #[serde(skip)]
    pub kid: String,
}

fn eab_jws(eab: &ExternalAccount, jwk: &Value, url: &str) -> Result<Value> {
    let header = json!({
        "alg": eab.alg,
        "kid": eab.id,
        "url": url,
    });
    let protected64 = b64u(serde_json::to_string(&header)?.as_bytes());
    let payload64 = b64u(serde_json::to_string(jwk)?.as_bytes());
    let signing_input = format!("{protected64}.{payload64}");

    let hmac_key = PKey::hmac(&eab.secret)?;
    let mut signer = Signer::new(MessageDigest::sha256(), &hmac_key)?;
    signer.update(signing_input.as_bytes())?;
    let tag = signer.sign_to_vec()?;

    Ok(json!({
        "protected": protected64,
        "payload": payload64,
        "signature": b64u(&tag),
    }))
}

/// Registers (or recovers — the server returns the same account for the
/// same public key) an account.
pub fn register(
    transport: &dyn Transport,
    cache: &NonceCache,
    directory: &Directory,
    request: NewAccount,
) -> Result<Account> {
    let tos_url = directory
        .meta
        .terms_of_service
        .as_deref()
        .ok_or(Error::AgreeTos)?;
    let agreed = (request.agree_to_terms)(tos_url)?;
    if agreed != tos_url {
        return Err(Error::AgreeTos);
    }

    let jwk = request.account_key.public_jwk()?;

    let mut payload = json!({
        "termsOfServiceAgreed": true,
        "onlyReturnExisting": false,
        "contact": request.contact,
    });

    if let Some(eab) = &request.external_account {
        let binding = eab_jws(eab, &jwk, &directory.new_account)?;
        payload
            .as_object_mut()
            .expect("object literal")
            .insert("externalAccountBinding".into(), binding);
    }

    let response = signed_request(
        transport,
        cache,
        &directory.new_nonce,
        &directory.new_account,
        request.account_key,
        KeyId::Jwk,
        Payload::Json(&payload),
    )?;
    ensure_success(&response)?;

    let kid = response
        .header("location")
        .ok_or(Error::IncorrectResponse)?
        .to_owned();

    let mut account: Account = if response.body.is_empty() {
        Account::default()
    } else {
        response.json()?
    };
    account.kid = kid;

    Ok(account)
}
