//! JWS request layer. The sole place that attaches a nonce, signs, POSTs
//! as `application/jose+json`, and harvests the reply nonce — every
//! other module goes through [`signed_request`] rather than calling
//! [`Transport`] directly, so nonce bookkeeping can never be skipped.

use log::debug;
use serde::Serialize;
use serde_json::{json, Value};

use crate::crypto::{b64u, Keypair};
use crate::error::{Error, Result};
use crate::nonce::NonceCache;
use crate::transport::{Transport, TransportRequest, TransportResponse};

/// How the protected header identifies the signer: the embedded public
/// key (used exactly once, for `newAccount`) or the server-assigned
/// account URL (every other request).
pub enum KeyId<'a> {
    Jwk,
    Kid(&'a str),
}

/// Flattened-JSON JWS body, as ACME expects it on the wire.
#[derive(Serialize)]
struct FlattenedJws {
    protected: String,
    payload: String,
    signature: String,
}

/// An empty JSON payload (e.g. `{}`, used to trigger a challenge) is
/// still a JSON document and must be distinguished from the true empty
/// string `""` that POST-as-GET sends.
pub enum Payload<'a> {
    Json(&'a Value),
    PostAsGet,
}

fn fetch_nonce(transport: &dyn Transport, cache: &NonceCache, new_nonce_url: &str) -> Result<String> {
    if let Some(nonce) = cache.pop_fresh() {
        return Ok(nonce);
    }
    let response = transport.request(TransportRequest::head(new_nonce_url))?;
    harvest_nonce(&response, cache);
    response
        .header("replay-nonce")
        .map(|s| s.to_owned())
        .ok_or(Error::BadNonce)
}

/// Scans a response for `Replay-Nonce` and, if present, caches it — every
/// response from every request must be scanned, since the server is
/// free to hand out a fresh nonce on any reply.
pub fn harvest_nonce(response: &TransportResponse, cache: &NonceCache) {
    if let Some(nonce) = response.header("replay-nonce") {
        cache.push(nonce.to_owned());
    }
}

fn build_protected(alg: &str, nonce: &str, url: &str, key_id: &KeyId, key: &Keypair) -> Result<Value> {
    let mut header = json!({
        "alg": alg,
        "nonce": nonce,
        "url": url,
    });
    let obj = header.as_object_mut().expect("object literal");
    match key_id {
        KeyId::Jwk => {
            obj.insert("jwk".into(), key.public_jwk()?);
        }
        KeyId::Kid(kid) => {
            obj.insert("kid".into(), Value::String((*kid).to_owned()));
        }
    }
    Ok(header)
}

fn sign_flattened(key: &Keypair, protected: &Value, payload: &Payload) -> Result<FlattenedJws> {
    let protected64 = b64u(serde_json::to_string(protected)?.as_bytes());
    let payload64 = match payload {
        Payload::Json(value) => b64u(serde_json::to_string(value)?.as_bytes()),
        Payload::PostAsGet => String::new(),
    };

    let signing_input = format!("{protected64}.{payload64}");
    let signature = b64u(&key.sign(signing_input.as_bytes())?);

    Ok(FlattenedJws {
        protected: protected64,
        payload: payload64,
        signature,
    })
}

/// Performs one signed ACME request: fetches/consumes a nonce, signs the
/// payload, POSTs it, and harvests whatever nonce the response carries —
/// win or lose. Retries exactly once, transparently, if the server's
/// answer is `badNonce` (the nonce harvested from that failed response is
/// already cached by the time the retry fires).
pub fn signed_request(
    transport: &dyn Transport,
    cache: &NonceCache,
    new_nonce_url: &str,
    url: &str,
    key: &Keypair,
    key_id: KeyId,
    payload: Payload,
) -> Result<TransportResponse> {
    let response = signed_request_once(transport, cache, new_nonce_url, url, key, &key_id, &payload)?;
    if response.is_success() {
        return Ok(response);
    }

    let problem = response.problem();
    if problem.kind.as_deref() == Some("urn:ietf:params:acme:error:badNonce") {
        debug!("badNonce for {url}, retrying once with the harvested nonce");
        let retry = signed_request_once(transport, cache, new_nonce_url, url, key, &key_id, &payload)?;
        return Ok(retry);
    }

    Ok(response)
}

fn signed_request_once(
    transport: &dyn Transport,
    cache: &NonceCache,
    new_nonce_url: &str,
    url: &str,
    key: &Keypair,
    key_id: &KeyId,
    payload: &Payload,
) -> Result<TransportResponse> {
    let nonce = fetch_nonce(transport, cache, new_nonce_url)?;
    let protected = build_protected(key.alg(), &nonce, url, key_id, key)?;
    let jws = sign_flattened(key, &protected, payload)?;

    let body = serde_json::to_vec(&jws)?;
    let response = transport.request(TransportRequest::post(url, body))?;
    harvest_nonce(&response, cache);
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    struct RecordingTransport {
        responses: RefCell<Vec<TransportResponse>>,
        requests: RefCell<Vec<TransportRequest>>,
    }

    impl Transport for RecordingTransport {
        fn request(&self, req: TransportRequest) -> Result<TransportResponse> {
            self.requests.borrow_mut().push(req);
            Ok(self.responses.borrow_mut().remove(0))
        }
    }

    fn response_with_nonce(nonce: &str) -> TransportResponse {
        let mut headers = BTreeMap::new();
        headers.insert("replay-nonce".to_string(), nonce.to_string());
        TransportResponse {
            status: 200,
            headers,
            body: b"{}".to_vec(),
        }
    }

    #[test]
    fn every_response_nonce_is_cached_and_consumed_lifo() {
        let cache = NonceCache::new();
        let key = Keypair::generate_rsa(2048).unwrap();
        let transport = RecordingTransport {
            responses: RefCell::new(vec![
                response_with_nonce("head-nonce"),
                response_with_nonce("post-nonce-1"),
            ]),
            requests: RefCell::new(Vec::new()),
        };

        let resp = signed_request(
            &transport,
            &cache,
            "https://example.test/new-nonce",
            "https://example.test/new-order",
            &key,
            KeyId::Kid("https://example.test/acct/1"),
            Payload::Json(&json!({"identifiers": []})),
        )
        .unwrap();
        assert!(resp.is_success());

        // the HEAD went to new-nonce, the POST to new-order, in that order
        let requests = transport.requests.borrow();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].url, "https://example.test/new-nonce");
        assert_eq!(requests[1].url, "https://example.test/new-order");

        // the nonce harvested from the POST response is now cached for reuse
        assert_eq!(cache.pop_fresh().as_deref(), Some("post-nonce-1"));
    }

    #[test]
    fn bad_nonce_is_retried_once() {
        let cache = NonceCache::new();
        let key = Keypair::generate_rsa(2048).unwrap();

        let mut bad_nonce_body = BTreeMap::new();
        bad_nonce_body.insert("replay-nonce".to_string(), "retry-nonce".to_string());
        let bad_response = TransportResponse {
            status: 400,
            headers: bad_nonce_body,
            body: br#"{"type":"urn:ietf:params:acme:error:badNonce","detail":"bad"}"#.to_vec(),
        };

        let transport = RecordingTransport {
            responses: RefCell::new(vec![
                response_with_nonce("head-nonce"),
                bad_response,
                response_with_nonce("final-nonce"),
            ]),
            requests: RefCell::new(Vec::new()),
        };

        let resp = signed_request(
            &transport,
            &cache,
            "https://example.test/new-nonce",
            "https://example.test/new-order",
            &key,
            KeyId::Kid("https://example.test/acct/1"),
            Payload::PostAsGet,
        )
        .unwrap();
        assert!(resp.is_success());
        assert_eq!(transport.requests.borrow().len(), 3);
    }
}
