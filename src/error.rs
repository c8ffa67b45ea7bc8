use std::io;
use thiserror::Error;

use openssl::error::ErrorStack;
use reqwest::header::ToStrError;
use serde::Deserialize;

/// An RFC 8555 "problem document" (section 6.7), the JSON body the server
/// attaches to any non-2xx response.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ProblemDocument {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub detail: Option<String>,
    pub status: Option<u16>,
    #[serde(default)]
    pub subproblems: Vec<serde_json::Value>,
}

impl std::fmt::Display for ProblemDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}",
            self.kind.as_deref().unwrap_or("about:blank"),
            self.detail
                .as_ref()
                .map(|d| format!(": {d}"))
                .unwrap_or_default()
        )
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Account does not exist")]
    AccountDoesNotExist,
    #[error("Certificate has already been revoked")]
    AlreadyRevokedCertificate,
    #[error("The CSR is unacceptable")]
    BadCSR,
    #[error("Unacceptable anti-replay nonce")]
    BadNonce,
    #[error("Server does not support the given public key type")]
    BadPublicKey,
    #[error("Revocation reason provided is not allowed")]
    BadRevocationReason,
    #[error("Signing with an algorithm not supported")]
    BadSignatureAlgorithm,
    #[error("CAA records forbid the CA from issuing a certificate")]
    CaaError,
    #[error("Specific error conditions are indicated in the \"subproblems\" array")]
    Compound,
    #[error("Server could not connect to validation target")]
    Connection,
    #[error("Problem with a DNS query")]
    DnsError,
    #[error("The request must include a value for the \"externalAccountBinding\" field")]
    ExternalAccountRequired,
    #[error("Response received didn't match the challenge's requirements")]
    IncorrectResponse,
    #[error("Invalid contact URL for account")]
    InvalidContact,
    #[error("The request message was malformed")]
    MalformedRequest,
    #[error("Finalize an order that is not ready to be finalized")]
    OrderNotReady,
    #[error("Exceeds rate limit")]
    RateLimited,
    #[error("Will not issue certificates for the identifier")]
    RejectedIdentifier,
    #[error("Internal server error")]
    InternalServerError,
    #[error("TLS error during validation")]
    TlsError,
    #[error("Insufficient authorization")]
    Unauthorized,
    #[error("Unsupported protocol scheme")]
    UnsupportedContact,
    #[error("Unsupported type identifier")]
    UnsupportedIdentifier,
    #[error("Visit the \"instance\" URL and take actions specified there")]
    UserActionRequired,

    #[error("E_AGREE_TOS: terms-of-service URL returned by the caller does not match the directory's")]
    AgreeTos,
    #[error("E_FAIL_DRY_CHALLENGE: {0}")]
    FailDryChallenge(String),
    #[error("E_STATE_EMPTY: challenge poll response had no \"status\" field")]
    StateEmpty,
    #[error("E_STATE_INVALID: challenge reached status \"invalid\"{}", problem_suffix(.0))]
    StateInvalid(Option<ProblemDocument>),
    #[error("E_STATE_UKN: challenge reached unrecognized status \"{0}\"")]
    StateUnknown(String),
    #[error("stuck in bad pending/processing state after the poll ceiling was reached")]
    PollExceeded,
    #[error("server returned an order with no authorizations")]
    NoAuthorizations,
    #[error(
        "order finalize failed: expected domains {expected:?}, validated domains {actual:?}, server said: {body}"
    )]
    Finalize {
        expected: Vec<String>,
        actual: Vec<String>,
        body: String,
    },
    #[error("preflight check failed: {0}")]
    Preflight(String),
    #[error("server problem: {0}")]
    AcmeProblem(ProblemDocument),

    #[error("Error reading the string: {0}")]
    FromUtf8Error(#[from] std::str::Utf8Error),
    #[error("Error in reqwest: {0}")]
    FromReqwestError(#[from] reqwest::Error),
    #[error("Error in openssl: {0}")]
    FromRsaError(#[from] ErrorStack),
    #[error("Error while de/encoding json: {0}")]
    FromSerdeError(#[from] serde_json::Error),
    #[error("Error writing header value: {0}")]
    FromToStrError(#[from] ToStrError),
    #[error("IO error {0}")]
    FromIoError(#[from] io::Error),

    #[error("Currently just http-01 and dns-01 challenges are supported")]
    NoHttpChallengePresent,
    #[error("There was no web server found")]
    NoWebServer,
}

fn problem_suffix(problem: &Option<ProblemDocument>) -> String {
    match problem {
        Some(p) => format!(": {p}"),
        None => String::new(),
    }
}

impl Error {
    /// Maps a server problem document's `type` URN (RFC 8555 section 6.7)
    /// onto one of this crate's well-known variants, falling back to the
    /// generic [`Error::AcmeProblem`] carrier for anything unrecognized.
    pub fn from_problem(problem: ProblemDocument) -> Error {
        let kind = problem
            .kind
            .as_deref()
            .and_then(|k| k.rsplit(':').next())
            .unwrap_or("")
            .to_owned();

        match kind.as_str() {
            "accountDoesNotExist" => Error::AccountDoesNotExist,
            "alreadyRevoked" => Error::AlreadyRevokedCertificate,
            "badCSR" => Error::BadCSR,
            "badNonce" => Error::BadNonce,
            "badPublicKey" => Error::BadPublicKey,
            "badRevocationReason" => Error::BadRevocationReason,
            "badSignatureAlgorithm" => Error::BadSignatureAlgorithm,
            "caa" => Error::CaaError,
            "compound" => Error::Compound,
            "connection" => Error::Connection,
            "dns" => Error::DnsError,
            "externalAccountRequired" => Error::ExternalAccountRequired,
            "incorrectResponse" => Error::IncorrectResponse,
            "invalidContact" => Error::InvalidContact,
            "malformed" => Error::MalformedRequest,
            "orderNotReady" => Error::OrderNotReady,
            "rateLimited" => Error::RateLimited,
            "rejectedIdentifier" => Error::RejectedIdentifier,
            "serverInternal" => Error::InternalServerError,
            "tls" => Error::TlsError,
            "unauthorized" => Error::Unauthorized,
            "unsupportedContact" => Error::UnsupportedContact,
            "unsupportedIdentifier" => Error::UnsupportedIdentifier,
            "userActionRequired" => Error::UserActionRequired,
            _ => Error::AcmeProblem(problem),
        }
    }

    /// True for the one error the server asks us to retry by handing us a
    /// fresh nonce in the same response (RFC 8555 section 6.5).
    pub fn is_bad_nonce(&self) -> bool {
        matches!(self, Error::BadNonce)
            || matches!(self, Error::AcmeProblem(p) if p.kind.as_deref() == Some("urn:ietf:params:acme:error:badNonce"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
