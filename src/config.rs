//! Configuration knobs for the polling loops and challenge selection.

use std::time::Duration;

use crate::challenge::ChallengeType;

/// Tuning for the polling loops in `authz` and `order`, plus feature
/// toggles. Construct with [`Config::new`] and adjust fields, or start
/// from [`Config::default`].
#[derive(Debug, Clone)]
pub struct Config {
    pub directory_url: String,
    pub debug: bool,
    pub skip_challenge_test: bool,
    pub retry_interval: Duration,
    pub retry_poll: u32,
    pub retry_pending: u32,
    pub deauth_wait: Duration,
    pub set_challenge_wait: Duration,
    pub challenge_types: Vec<ChallengeType>,
    /// The domain that becomes the certificate's subject / CSR common
    /// name. If set and present in the requested domain list, it is
    /// moved to index 0 before the rest of the list is sorted; if unset,
    /// the first requested domain is the subject (the prior behavior).
    pub subject: Option<String>,
}

impl Config {
    pub fn new(directory_url: impl Into<String>) -> Self {
        Config {
            directory_url: directory_url.into(),
            ..Config::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            directory_url: String::new(),
            debug: false,
            skip_challenge_test: false,
            retry_interval: Duration::from_millis(1000),
            retry_poll: 8,
            retry_pending: 4,
            deauth_wait: Duration::from_millis(10_000),
            set_challenge_wait: Duration::from_millis(500),
            challenge_types: vec![ChallengeType::Http01],
            subject: None,
        }
    }
}
