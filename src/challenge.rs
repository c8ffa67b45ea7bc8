//! Challenge derivation: choosing which server-offered challenge to
//! answer, and computing the key-authorization values from it.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::crypto::{b64u, Keypair};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeType {
    #[serde(rename = "http-01")]
    Http01,
    #[serde(rename = "dns-01")]
    Dns01,
    #[serde(rename = "tls-alpn-01")]
    TlsAlpn01,
    #[serde(rename = "tls-sni-01")]
    TlsSni01,
}

impl ChallengeType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChallengeType::Http01 => "http-01",
            ChallengeType::Dns01 => "dns-01",
            ChallengeType::TlsAlpn01 => "tls-alpn-01",
            ChallengeType::TlsSni01 => "tls-sni-01",
        }
    }

    /// This crate only drives http-01 and dns-01 through to completion.
    pub fn is_supported(self) -> bool {
        matches!(self, ChallengeType::Http01 | ChallengeType::Dns01)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawChallenge {
    #[serde(rename = "type")]
    pub kind: ChallengeType,
    #[serde(default)]
    pub status: String,
    pub url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub error: Option<crate::error::ProblemDocument>,
}

impl RawChallenge {
    pub fn is_valid(&self) -> bool {
        self.status == "valid"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawAuthorization {
    pub identifier: Identifier,
    pub status: String,
    #[serde(default)]
    pub expires: Option<String>,
    pub challenges: Vec<RawChallenge>,
    #[serde(default)]
    pub wildcard: bool,
}

/// The fused, client-side view of an authorization plus a chosen
/// challenge: everything a publisher needs to answer it, computed once
/// and never round-tripped back through the server.
#[derive(Debug, Clone)]
pub struct Auth {
    pub identifier: String,
    pub hostname: String,
    pub altname: String,
    pub wildcard: bool,
    pub kind: ChallengeType,
    pub status: String,
    pub url: String,
    pub token: String,
    pub thumbprint: String,
    pub key_authorization: String,
    pub challenge_url: String,
    pub dns_host: String,
    pub dns_authorization: String,
    pub dry_run: bool,
}

/// Picks the first challenge offered by the server whose type appears in
/// `preferred` (iterated in the caller's preference order).
pub fn choose<'a>(
    authorization: &'a RawAuthorization,
    preferred: &[ChallengeType],
) -> Option<&'a RawChallenge> {
    preferred
        .iter()
        .find_map(|want| authorization.challenges.iter().find(|c| c.kind == *want))
}

/// Narrows a preference list to dns-01 only when the identifier is a
/// wildcard — the CA will never offer http-01 or tls-alpn-01 for one,
/// since neither can prove control over every possible subdomain.
pub fn acceptable_types_for(wildcard: bool, preferred: &[ChallengeType]) -> Vec<ChallengeType> {
    if wildcard {
        preferred
            .iter()
            .copied()
            .filter(|t| *t == ChallengeType::Dns01)
            .collect()
    } else {
        preferred.to_vec()
    }
}

/// A pseudorandom 4-byte hex suffix for the dry-run DNS host, so a failed
/// self-test does not leave stale `_acme-challenge` records behind in
/// recursive resolvers. Collision resistance, not unpredictability, is
/// the goal here, so `rand`'s default thread RNG is plenty.
fn dry_run_suffix() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 4] = rng.gen();
    hex_encode(&bytes)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn bare_hostname(value: &str) -> &str {
    value.strip_prefix("*.").unwrap_or(value)
}

/// Fuses an authorization and a chosen challenge with account-key-derived
/// data into an [`Auth`].
pub fn derive(
    authorization: &RawAuthorization,
    chosen: &RawChallenge,
    account_key: &Keypair,
    dry_run: bool,
) -> Result<Auth> {
    let hostname = bare_hostname(&authorization.identifier.value).to_string();
    let wildcard = authorization.wildcard || authorization.identifier.value.starts_with("*.");
    let altname = if wildcard {
        format!("*.{hostname}")
    } else {
        hostname.clone()
    };

    let thumbprint = account_key.thumbprint()?;
    let key_authorization = format!("{}.{}", chosen.token, thumbprint);
    let challenge_url = format!("http://{hostname}/.well-known/acme-challenge/{}", chosen.token);

    let dns_host = if dry_run {
        format!("greenlock-dryrun-{}.{}", dry_run_suffix(), hostname)
    } else {
        format!("_acme-challenge.{hostname}")
    };
    let dns_authorization = b64u(&openssl::sha::sha256(key_authorization.as_bytes()));

    Ok(Auth {
        identifier: authorization.identifier.value.clone(),
        hostname,
        altname,
        wildcard,
        kind: chosen.kind,
        status: chosen.status.clone(),
        url: chosen.url.clone(),
        token: chosen.token.clone(),
        thumbprint,
        key_authorization,
        challenge_url,
        dns_host,
        dns_authorization,
        dry_run,
    })
}

/// Synthesizes a fake authorization carrying one challenge per known
/// type, for the dry-run self-test — which must not touch the server at
/// all, so there's nothing here to fetch.
pub fn synthetic_authorization(hostname: &str, wildcard: bool) -> RawAuthorization {
    let token = format!("dry-run-token-{}", dry_run_suffix());
    let challenges = [
        ChallengeType::Http01,
        ChallengeType::Dns01,
        ChallengeType::TlsAlpn01,
        ChallengeType::TlsSni01,
    ]
    .into_iter()
    .map(|kind| RawChallenge {
        kind,
        status: "pending".to_string(),
        url: format!("https://dry-run.invalid/chall/{kind_str}", kind_str = kind.as_str()),
        token: token.clone(),
        error: None,
    })
    .collect();

    RawAuthorization {
        identifier: Identifier {
            kind: "dns".to_string(),
            value: hostname.to_string(),
        },
        status: "pending".to_string(),
        expires: None,
        challenges,
        wildcard,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account_key() -> Keypair {
        Keypair::generate_rsa(2048).unwrap()
    }

    #[test]
    fn key_authorization_law_holds() {
        let key = account_key();
        let auth = synthetic_authorization("example.test", false);
        let chosen = choose(&auth, &[ChallengeType::Http01]).unwrap();
        let derived = derive(&auth, chosen, &key, false).unwrap();

        let expected_thumb = key.thumbprint().unwrap();
        assert_eq!(
            derived.key_authorization,
            format!("{}.{}", chosen.token, expected_thumb)
        );
        let expected_dns =
            b64u(&openssl::sha::sha256(derived.key_authorization.as_bytes()));
        assert_eq!(derived.dns_authorization, expected_dns);
    }

    #[test]
    fn wildcard_only_accepts_dns01() {
        let preferred = vec![ChallengeType::Http01, ChallengeType::Dns01];
        let narrowed = acceptable_types_for(true, &preferred);
        assert_eq!(narrowed, vec![ChallengeType::Dns01]);

        let narrowed_no_dns = acceptable_types_for(true, &[ChallengeType::Http01]);
        assert!(narrowed_no_dns.is_empty());
    }

    #[test]
    fn wildcard_dns_host_has_no_acme_challenge_prefix_in_dry_run() {
        let key = account_key();
        let auth = synthetic_authorization("example.test", true);
        let chosen = choose(&auth, &[ChallengeType::Dns01]).unwrap();
        let derived = derive(&auth, chosen, &key, true).unwrap();
        assert!(derived.dns_host.starts_with("greenlock-dryrun-"));
        assert!(derived.dns_host.ends_with(".example.test"));
        assert!(!derived.dns_host.starts_with("_acme-challenge"));
        assert_eq!(derived.altname, "*.example.test");
    }

    #[test]
    fn chooser_prefers_caller_order() {
        let auth = synthetic_authorization("example.test", false);
        let chosen = choose(&auth, &[ChallengeType::Dns01, ChallengeType::Http01]).unwrap();
        assert_eq!(chosen.kind, ChallengeType::Dns01);
    }
}
