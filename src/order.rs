//! Order driver: creates an order, drives every authorization it lists
//! through to `valid`, finalizes with a CSR, and downloads the issued
//! chain.

use std::thread::sleep;

use serde::Deserialize;
use serde_json::json;

use crate::authz;
use crate::challenge::Auth;
use crate::config::Config;
use crate::crypto::{csr_to_web64, Keypair};
use crate::directory::Directory;
use crate::error::{Error, Result};
use crate::jws::{signed_request, KeyId, Payload};
use crate::nonce::NonceCache;
use crate::pem::split_leaf_and_chain;
use crate::transport::{ensure_success, Transport};

#[derive(Debug, Deserialize)]
struct RawOrder {
    status: String,
    #[serde(default)]
    expires: String,
    #[serde(default)]
    authorizations: Vec<String>,
    finalize: String,
    #[serde(default)]
    certificate: Option<String>,
}

/// The finished product: a fresh private key and the certificate the CA
/// issued for it, leaf and chain kept separate so callers can install
/// them however their server wants them.
pub struct CertBundle {
    pub private_key_pem: Vec<u8>,
    pub leaf: String,
    pub chain: String,
    /// The order's `expires` timestamp, as the server sent it.
    pub expires: String,
    /// The `dns` identifier values the order covers, subject first.
    pub identifiers: Vec<String>,
}

/// Normalizes a requested domain list so the certificate subject ends up
/// at index 0 and the remaining entries are deduplicated and sorted, so
/// the same domain set always produces the same order regardless of
/// call order. `subject`, when given and present in `domains`, names
/// that domain explicitly (spec.md §4.5 step 4); otherwise the first
/// requested domain is the subject.
fn normalize_domains(domains: &[String], subject: Option<&str>) -> Result<Vec<String>> {
    if domains.is_empty() {
        return Err(Error::Preflight("at least one domain is required".into()));
    }

    let subject = match subject {
        Some(s) if domains.iter().any(|d| d == s) => s.to_string(),
        Some(s) => {
            return Err(Error::Preflight(format!(
                "subject {s:?} is not in the requested domain list"
            )))
        }
        None => domains[0].clone(),
    };

    let mut rest: Vec<String> = domains.iter().filter(|d| *d != &subject).cloned().collect();
    rest.sort();
    rest.dedup();

    let mut all = vec![subject];
    all.extend(rest);
    Ok(all)
}

/// Requests a certificate for `domains`, driving the order from
/// creation through to an issued chain. `domain_key` signs the CSR; it
/// need not be (and usually isn't) the account key.
#[allow(clippy::too_many_arguments)]
pub fn create(
    transport: &dyn Transport,
    cache: &NonceCache,
    directory: &Directory,
    account_key: &Keypair,
    kid: &str,
    config: &Config,
    domains: &[String],
    domain_key: &Keypair,
    set_challenge: &mut dyn FnMut(&Auth) -> Result<()>,
    remove_challenge: &mut dyn FnMut(&Auth) -> Result<()>,
) -> Result<CertBundle> {
    if config.challenge_types.is_empty() {
        return Err(Error::Preflight("no challenge types configured".into()));
    }
    if !config.challenge_types.iter().all(|t| t.is_supported()) {
        return Err(Error::Preflight(
            "only http-01 and dns-01 are driven through to completion".into(),
        ));
    }

    let all_domains = normalize_domains(domains, config.subject.as_deref())?;

    let identifiers: Vec<_> = all_domains
        .iter()
        .map(|d| json!({"type": "dns", "value": d}))
        .collect();
    let payload = json!({ "identifiers": identifiers });

    let response = signed_request(
        transport,
        cache,
        &directory.new_nonce,
        &directory.new_order,
        account_key,
        KeyId::Kid(kid),
        Payload::Json(&payload),
    )?;
    ensure_success(&response)?;

    let order_url = response
        .header("location")
        .ok_or(Error::IncorrectResponse)?
        .to_owned();
    let order: RawOrder = response.json()?;

    if order.authorizations.is_empty() {
        return Err(Error::NoAuthorizations);
    }

    authz::complete(
        transport,
        cache,
        directory,
        account_key,
        kid,
        config,
        &order.authorizations,
        set_challenge,
        remove_challenge,
    )?;

    let csr = domain_key.generate_csr(&all_domains)?;
    let csr64 = csr_to_web64(&csr)?;
    let finalize_response = signed_request(
        transport,
        cache,
        &directory.new_nonce,
        &order.finalize,
        account_key,
        KeyId::Kid(kid),
        Payload::Json(&json!({ "csr": csr64 })),
    )?;
    ensure_success(&finalize_response)?;

    let finalized = poll_order(transport, cache, directory, account_key, kid, config, &order_url, &all_domains)?;

    let certificate_url = finalized
        .certificate
        .ok_or_else(|| Error::Finalize {
            expected: all_domains.clone(),
            actual: Vec::new(),
            body: "order reached \"valid\" with no certificate URL".to_string(),
        })?;

    let cert_response = signed_request(
        transport,
        cache,
        &directory.new_nonce,
        &certificate_url,
        account_key,
        KeyId::Kid(kid),
        Payload::PostAsGet,
    )?;
    ensure_success(&cert_response)?;
    let chain_pem = cert_response.text()?;
    let (leaf, chain) = split_leaf_and_chain(&chain_pem);

    Ok(CertBundle {
        private_key_pem: domain_key.private_pem()?,
        leaf,
        chain,
        expires: finalized.expires,
        identifiers: all_domains,
    })
}

fn poll_order(
    transport: &dyn Transport,
    cache: &NonceCache,
    directory: &Directory,
    account_key: &Keypair,
    kid: &str,
    config: &Config,
    order_url: &str,
    domains: &[String],
) -> Result<RawOrder> {
    let mut poll_count: u32 = 0;

    loop {
        let response = signed_request(
            transport,
            cache,
            &directory.new_nonce,
            order_url,
            account_key,
            KeyId::Kid(kid),
            Payload::PostAsGet,
        )?;
        ensure_success(&response)?;
        let body = response.text()?;
        let order: RawOrder = serde_json::from_str(&body)?;

        match order.status.as_str() {
            "valid" => return Ok(order),
            "processing" => {
                poll_count += 1;
                if poll_count > config.retry_poll {
                    return Err(Error::PollExceeded);
                }
                sleep(config.retry_interval);
            }
            // pending/ready here means finalize was accepted without every
            // authorization actually being satisfied, or the server never
            // moved past ready into processing — either way this order
            // cannot be salvaged by waiting longer.
            other => {
                return Err(Error::Finalize {
                    expected: domains.to_vec(),
                    actual: vec![other.to_string()],
                    body,
                })
            }
        }
    }
}
