//! Top-level orchestration: directory discovery, account registration,
//! the dry-run self-test, and the order driver, wired together into the
//! one call a caller actually wants to make.

use crate::account::{self, Account, NewAccount};
use crate::challenge::Auth;
use crate::config::Config;
use crate::crypto::Keypair;
use crate::directory::Directory;
use crate::dns::DnsResolver;
use crate::error::Result;
use crate::nonce::NonceCache;
use crate::order::{self, CertBundle};
use crate::selftest;
use crate::transport::Transport;

/// Bundles the collaborators an [`Engine`] needs: a transport, a DNS
/// resolver for the dns-01 self-test, a nonce cache, the loaded
/// directory, and tuning knobs. Build one per CA account session and
/// reuse it across certificate requests — the nonce cache and directory
/// are only useful if kept around.
pub struct Engine {
    transport: Box<dyn Transport>,
    dns: Box<dyn DnsResolver>,
    cache: NonceCache,
    directory: Directory,
    config: Config,
}

impl Engine {
    /// Fetches the directory document at `config.directory_url` and
    /// builds an engine around it.
    pub fn new(transport: Box<dyn Transport>, dns: Box<dyn DnsResolver>, config: Config) -> Result<Self> {
        let directory = Directory::fetch(transport.as_ref(), &config.directory_url)?;
        Ok(Engine {
            transport,
            dns,
            cache: NonceCache::new(),
            directory,
            config,
        })
    }

    /// Builds an engine around an already-loaded directory, skipping the
    /// initial fetch — useful when a caller cached the directory
    /// document from a previous run.
    pub fn with_directory(
        transport: Box<dyn Transport>,
        dns: Box<dyn DnsResolver>,
        directory: Directory,
        config: Config,
    ) -> Self {
        Engine {
            transport,
            dns,
            cache: NonceCache::new(),
            directory,
            config,
        }
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// How the caller identifies themselves to the CA for this request:
/// either an account that's already registered (fastest path — most
/// callers keep the `kid` around after the first run), or fresh
/// registration details to mint one.
pub enum AccountRef<'a> {
    Existing { kid: String },
    New(NewAccount<'a>),
}

/// Requests a certificate end to end: registers (or reuses) an account,
/// runs the dry-run self-test against the caller's challenge publisher,
/// then drives a full order to an issued chain.
#[allow(clippy::too_many_arguments)]
pub fn obtain(
    engine: &Engine,
    account_key: &Keypair,
    account: AccountRef,
    domains: &[String],
    domain_key: &Keypair,
    set_challenge: &mut dyn FnMut(&Auth) -> Result<()>,
    remove_challenge: &mut dyn FnMut(&Auth) -> Result<()>,
) -> Result<CertBundle> {
    let kid = match account {
        AccountRef::Existing { kid } => kid,
        AccountRef::New(new_account) => {
            let registered: Account = account::register(
                engine.transport.as_ref(),
                &engine.cache,
                &engine.directory,
                new_account,
            )?;
            registered.kid
        }
    };

    selftest::run(
        engine.transport.as_ref(),
        engine.dns.as_ref(),
        account_key,
        &engine.config,
        domains,
        set_challenge,
    )?;

    order::create(
        engine.transport.as_ref(),
        &engine.cache,
        &engine.directory,
        account_key,
        &kid,
        &engine.config,
        domains,
        domain_key,
        set_challenge,
        remove_challenge,
    )
}
