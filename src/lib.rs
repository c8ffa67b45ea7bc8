//! A synchronous RFC 8555 (ACME) client engine: directory discovery,
//! account registration (with optional External Account Binding), the
//! dry-run challenge self-test, and the full authorization/order/
//! finalize flow, all driven over an injected HTTP transport and DNS
//! resolver so tests never touch the network.
//!
//! [`certificates::obtain`] is the one call most callers need; the
//! individual modules exist so advanced callers can drive the protocol
//! by hand.

pub mod account;
pub mod authz;
pub mod certificates;
pub mod challenge;
pub mod config;
pub mod crypto;
pub mod directory;
pub mod dns;
pub mod error;
pub mod jws;
pub mod nonce;
pub mod order;
pub mod pem;
pub mod selftest;
pub mod transport;

pub use account::{Account, ExternalAccount, NewAccount};
pub use certificates::{obtain, AccountRef, Engine};
pub use challenge::{Auth, ChallengeType};
pub use config::Config;
pub use crypto::Keypair;
pub use directory::Directory;
pub use dns::{DefaultResolver, DnsResolver};
pub use error::{Error, Result};
pub use order::CertBundle;
pub use transport::{DefaultTransport, Transport};
