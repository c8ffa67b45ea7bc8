//! Challenge self-test / dry-run.
//!
//! Before any authorization is submitted to the CA, prove the caller's
//! publisher actually works — the CA rate-limits invalid validations
//! harshly, so catching a broken provisioner here is much cheaper.

use std::thread::sleep;
use std::time::Duration;

use log::debug;

use crate::challenge::{self, Auth, ChallengeType};
use crate::config::Config;
use crate::crypto::Keypair;
use crate::dns::DnsResolver;
use crate::error::{Error, Result};
use crate::transport::{Transport, TransportRequest};

fn bare_hostname(domain: &str) -> (&str, bool) {
    match domain.strip_prefix("*.") {
        Some(rest) => (rest, true),
        None => (domain, false),
    }
}

/// Runs the self-test for every domain, unless `config.skip_challenge_test`
/// is set. `set_challenge` receives the same callback the real
/// authorization pass will eventually use; it must be idempotent with
/// respect to being invoked with a `dry_run` [`Auth`] first.
pub fn run(
    transport: &dyn Transport,
    dns: &dyn DnsResolver,
    account_key: &Keypair,
    config: &Config,
    domains: &[String],
    set_challenge: &mut dyn FnMut(&Auth) -> Result<()>,
) -> Result<()> {
    if config.skip_challenge_test {
        debug!("skip_challenge_test is set, not running the dry-run self-test");
        return Ok(());
    }

    for domain in domains {
        let (hostname, wildcard) = bare_hostname(domain);
        let acceptable = challenge::acceptable_types_for(wildcard, &config.challenge_types);
        let synthetic = challenge::synthetic_authorization(hostname, wildcard);
        let chosen = challenge::choose(&synthetic, &acceptable).ok_or_else(|| {
            Error::Preflight(format!(
                "no acceptable challenge type for {domain} (wildcard identifiers require dns-01)"
            ))
        })?;

        let auth = challenge::derive(&synthetic, chosen, account_key, true)?;
        set_challenge(&auth)?;

        let wait = if chosen.kind == ChallengeType::Dns01 {
            Duration::from_millis(1500)
        } else {
            Duration::from_millis(0)
        };
        sleep(wait);

        verify(transport, dns, &auth)?;
    }

    Ok(())
}

fn verify(transport: &dyn Transport, dns: &dyn DnsResolver, auth: &Auth) -> Result<()> {
    match auth.kind {
        ChallengeType::Http01 => verify_http(transport, auth),
        ChallengeType::Dns01 => verify_dns(dns, auth),
        other => Err(Error::Preflight(format!(
            "self-test does not support challenge type {}",
            other.as_str()
        ))),
    }
}

fn verify_http(transport: &dyn Transport, auth: &Auth) -> Result<()> {
    let response = transport
        .request(TransportRequest::get(&auth.challenge_url))
        .map_err(|_| {
            Error::FailDryChallenge(format!(
                "could not reach {}; verify manually with: curl -s {}",
                auth.challenge_url, auth.challenge_url
            ))
        })?;

    let body = response.text().unwrap_or_default();
    if response.is_success() && body.trim() == auth.key_authorization {
        Ok(())
    } else {
        Err(Error::FailDryChallenge(format!(
            "expected {:?} at {}, got {:?}; verify manually with: curl -s {}",
            auth.key_authorization, auth.challenge_url, body.trim(), auth.challenge_url
        )))
    }
}

fn verify_dns(dns: &dyn DnsResolver, auth: &Auth) -> Result<()> {
    let records = dns.lookup_txt(&auth.dns_host).map_err(|_| {
        Error::FailDryChallenge(format!(
            "could not resolve TXT {}; verify manually with: dig -t txt {}",
            auth.dns_host, auth.dns_host
        ))
    })?;

    if records.iter().any(|r| r == &auth.dns_authorization) {
        Ok(())
    } else {
        Err(Error::FailDryChallenge(format!(
            "expected TXT {} = {:?}, got {:?}; verify manually with: dig -t txt {}",
            auth.dns_host, auth.dns_authorization, records, auth.dns_host
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportResponse;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    struct FakeHttp {
        body: Mutex<Option<String>>,
    }

    impl Transport for FakeHttp {
        fn request(&self, _req: TransportRequest) -> Result<TransportResponse> {
            let body = self.body.lock().unwrap().clone().unwrap_or_default();
            Ok(TransportResponse {
                status: 200,
                headers: BTreeMap::new(),
                body: body.into_bytes(),
            })
        }
    }

    struct FakeDns {
        records: Vec<String>,
    }

    impl DnsResolver for FakeDns {
        fn lookup_txt(&self, _name: &str) -> Result<Vec<String>> {
            Ok(self.records.clone())
        }
    }

    #[test]
    fn http01_dry_run_succeeds_when_the_publisher_matches() {
        let key = Keypair::generate_rsa(2048).unwrap();
        let config = Config::new("https://example.test/dir");
        let fake_body = Mutex::new(None);
        let transport = FakeHttp { body: fake_body };
        let dns = FakeDns { records: vec![] };

        let result = run(
            &transport,
            &dns,
            &key,
            &config,
            &["example.test".to_string()],
            &mut |auth| {
                *transport.body.lock().unwrap() = Some(auth.key_authorization.clone());
                Ok(())
            },
        );
        assert!(result.is_ok());
    }

    #[test]
    fn http01_dry_run_fails_fast_when_the_publisher_is_wrong() {
        let key = Keypair::generate_rsa(2048).unwrap();
        let config = Config::new("https://example.test/dir");
        let transport = FakeHttp {
            body: Mutex::new(Some("wrong-value".to_string())),
        };
        let dns = FakeDns { records: vec![] };

        let result = run(
            &transport,
            &dns,
            &key,
            &config,
            &["example.test".to_string()],
            &mut |_auth| Ok(()),
        );
        assert!(matches!(result, Err(Error::FailDryChallenge(_))));
    }

    #[test]
    fn dns01_dry_run_uses_randomized_prefix_not_acme_challenge() {
        let key = Keypair::generate_rsa(2048).unwrap();
        let mut config = Config::new("https://example.test/dir");
        config.challenge_types = vec![ChallengeType::Dns01];
        let transport = FakeHttp {
            body: Mutex::new(None),
        };
        let dns_records = Mutex::new(Vec::new());

        // capture the derived dns_authorization so the fake resolver can echo it back
        let captured_host = Mutex::new(String::new());
        let result = run(
            &transport,
            &FakeDns { records: vec![] },
            &key,
            &config,
            &["*.example.test".to_string()],
            &mut |auth| {
                *captured_host.lock().unwrap() = auth.dns_host.clone();
                dns_records.lock().unwrap().push(auth.dns_authorization.clone());
                Ok(())
            },
        );
        // the fake resolver above always returns empty records, so the
        // *first* invocation is expected to fail the verification step —
        // what matters here is the dns_host shape captured via set_challenge.
        assert!(result.is_err());
        assert!(captured_host.lock().unwrap().starts_with("greenlock-dryrun-"));
    }
}
