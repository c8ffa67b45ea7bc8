//! Authorization driver: publishes a challenge response for every
//! pending authorization on an order, then polls each one through to a
//! terminal state.
//!
//! Runs in two passes rather than one authorization at a time end to
//! end: publishing every challenge first lets a DNS-01 TXT record start
//! propagating while earlier authorizations are still being polled,
//! instead of paying each domain's propagation delay serially.

use std::thread::sleep;

use log::{debug, warn};
use serde_json::json;

use crate::challenge::{self, Auth, RawAuthorization, RawChallenge};
use crate::config::Config;
use crate::crypto::Keypair;
use crate::directory::Directory;
use crate::error::{Error, Result};
use crate::jws::{signed_request, KeyId, Payload};
use crate::nonce::NonceCache;
use crate::transport::{ensure_success, Transport};

/// Publishes and polls every authorization `order.authorizations` lists.
/// `set_challenge`/`remove_challenge` are the caller's publisher hooks —
/// the same shape the dry-run self-test already exercised.
pub fn complete(
    transport: &dyn Transport,
    cache: &NonceCache,
    directory: &Directory,
    account_key: &Keypair,
    kid: &str,
    config: &Config,
    authorization_urls: &[String],
    set_challenge: &mut dyn FnMut(&Auth) -> Result<()>,
    remove_challenge: &mut dyn FnMut(&Auth) -> Result<()>,
) -> Result<()> {
    let mut pending = Vec::new();

    for url in authorization_urls {
        if let Some(auth) = publish_one(transport, cache, directory, account_key, kid, config, url, set_challenge)? {
            pending.push(auth);
        }
    }

    for auth in &pending {
        poll_one(transport, cache, directory, account_key, kid, config, auth)?;
        let _ = remove_challenge(auth).map_err(|e| {
            warn!("remove_challenge failed for {}: {e}", auth.identifier);
            e
        });
    }

    Ok(())
}

/// Fetches an authorization, and if it isn't already `valid`, chooses and
/// publishes a challenge response and tells the server to start
/// validating it. Returns `None` for authorizations that were already
/// valid, so the caller doesn't poll them again.
fn publish_one(
    transport: &dyn Transport,
    cache: &NonceCache,
    directory: &Directory,
    account_key: &Keypair,
    kid: &str,
    config: &Config,
    authorization_url: &str,
    set_challenge: &mut dyn FnMut(&Auth) -> Result<()>,
) -> Result<Option<Auth>> {
    let response = signed_request(
        transport,
        cache,
        &directory.new_nonce,
        authorization_url,
        account_key,
        KeyId::Kid(kid),
        Payload::PostAsGet,
    )?;
    ensure_success(&response)?;
    let raw: RawAuthorization = response.json()?;

    if raw.status == "valid" {
        debug!("authorization for {} is already valid, skipping", raw.identifier.value);
        return Ok(None);
    }

    let acceptable = challenge::acceptable_types_for(raw.wildcard, &config.challenge_types);
    let chosen = challenge::choose(&raw, &acceptable).ok_or_else(|| {
        Error::Preflight(format!(
            "no acceptable challenge type offered for {}",
            raw.identifier.value
        ))
    })?;
    let auth = challenge::derive(&raw, chosen, account_key, false)?;

    set_challenge(&auth)?;
    sleep(config.set_challenge_wait);

    let trigger = signed_request(
        transport,
        cache,
        &directory.new_nonce,
        &auth.url,
        account_key,
        KeyId::Kid(kid),
        Payload::Json(&json!({})),
    )?;
    ensure_success(&trigger)?;

    Ok(Some(auth))
}

/// Polls a single challenge resource until it reaches `valid` or
/// `invalid`, honoring the pending/poll ceilings in `config`. A
/// `pending` response is retried by re-accepting the challenge; once
/// that has happened `retry_pending` times running, the authorization is
/// deactivated and given a longer `deauth_wait` before the next
/// re-accept, on the theory that the validation server needs more time
/// than usual to reach the publisher.
fn poll_one(
    transport: &dyn Transport,
    cache: &NonceCache,
    directory: &Directory,
    account_key: &Keypair,
    kid: &str,
    config: &Config,
    auth: &Auth,
) -> Result<()> {
    let mut poll_count: u32 = 0;
    let mut pending_count: u32 = 0;

    sleep(config.retry_interval);

    loop {
        let response = signed_request(
            transport,
            cache,
            &directory.new_nonce,
            &auth.url,
            account_key,
            KeyId::Kid(kid),
            Payload::PostAsGet,
        )?;
        ensure_success(&response)?;
        let challenge: RawChallenge = response.json()?;

        match challenge.status.as_str() {
            "valid" => return Ok(()),
            "invalid" => return Err(Error::StateInvalid(challenge.error)),
            "" => return Err(Error::StateEmpty),
            "pending" => {
                if pending_count >= config.retry_pending {
                    debug!(
                        "{} stuck pending after {pending_count} polls, deactivating and backing off {:?}",
                        auth.identifier, config.deauth_wait
                    );
                    let deactivate = signed_request(
                        transport,
                        cache,
                        &directory.new_nonce,
                        &auth.url,
                        account_key,
                        KeyId::Kid(kid),
                        Payload::Json(&json!({ "status": "deactivated" })),
                    )?;
                    ensure_success(&deactivate)?;
                    sleep(config.deauth_wait);
                }
                pending_count += 1;
                let reaccept = signed_request(
                    transport,
                    cache,
                    &directory.new_nonce,
                    &auth.url,
                    account_key,
                    KeyId::Kid(kid),
                    Payload::Json(&json!({})),
                )?;
                ensure_success(&reaccept)?;
            }
            "processing" => {}
            other => return Err(Error::StateUnknown(other.to_string())),
        }

        poll_count += 1;
        if poll_count > config.retry_poll {
            return Err(Error::PollExceeded);
        }
        sleep(config.retry_interval);
    }
}
