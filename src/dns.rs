//! DNS TXT lookups, injected so the dns-01 self-test can be driven
//! against a fake resolver in tests.

use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::Resolver;

use crate::error::{Error, Result};

/// The injected DNS resolver, used only for the dns-01 self-test.
pub trait DnsResolver: Send + Sync {
    /// Resolves all `TXT` record values for `name`, returning each record's
    /// decoded character-string data joined into one `String` per record
    /// (RFC 8555's dns-01 expects a single string value per record).
    fn lookup_txt(&self, name: &str) -> Result<Vec<String>>;
}

/// A resolver backed by `trust-dns-resolver`'s blocking `Resolver`.
pub struct DefaultResolver {
    resolver: Resolver,
}

impl DefaultResolver {
    pub fn new() -> Result<Self> {
        let resolver = Resolver::new(ResolverConfig::default(), ResolverOpts::default())
            .map_err(|_| Error::DnsError)?;
        Ok(DefaultResolver { resolver })
    }

    /// A resolver pointed at a specific recursive server, useful for tests
    /// that stand up a local authoritative responder.
    pub fn with_config(config: ResolverConfig, opts: ResolverOpts) -> Result<Self> {
        let resolver = Resolver::new(config, opts).map_err(|_| Error::DnsError)?;
        Ok(DefaultResolver { resolver })
    }
}

impl DnsResolver for DefaultResolver {
    fn lookup_txt(&self, name: &str) -> Result<Vec<String>> {
        let lookup = self.resolver.txt_lookup(name).map_err(|_| Error::DnsError)?;
        Ok(lookup
            .iter()
            .map(|txt| {
                txt.iter()
                    .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
                    .collect::<String>()
            })
            .collect())
    }
}
