//! Cryptographic primitives this crate needs — SHA-256, JWK
//! construction, JWS signing, CSR generation, and PEM key import —
//! wrapped over `openssl`. Covers both RSA and EC P-256 account/domain
//! keys.

use base64::{encode_config, URL_SAFE_NO_PAD};
use openssl::bn::{BigNum, BigNumContext};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{Id, PKey, Private};
use openssl::rsa::{Padding, Rsa};
use openssl::sign::Signer;
use openssl::x509::extension::SubjectAlternativeName;
use openssl::x509::{X509NameBuilder, X509Req, X509ReqBuilder};
use serde_json::{json, Value};

use crate::error::{Error, Result};

pub const RSA_KEY_BITS: u32 = 2048;

/// `base64url`, no padding — the encoding every JOSE component uses.
pub fn b64u(bytes: &[u8]) -> String {
    encode_config(bytes, URL_SAFE_NO_PAD)
}

/// Either half of an asymmetric keypair this crate signs with: the
/// account key (signs JWS requests) or the domain key (signs the CSR
/// only). Both need the same operations, so one type serves both roles.
pub enum Keypair {
    Rsa(PKey<Private>),
    Ec(PKey<Private>),
}

pub type AccountKey = Keypair;
pub type DomainKey = Keypair;

impl Keypair {
    pub fn generate_rsa(bits: u32) -> Result<Self> {
        let rsa = Rsa::generate(bits)?;
        Ok(Keypair::Rsa(PKey::from_rsa(rsa)?))
    }

    pub fn generate_ec_p256() -> Result<Self> {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
        let ec_key = EcKey::generate(&group)?;
        Ok(Keypair::Ec(PKey::from_ec_key(ec_key)?))
    }

    /// Imports a PEM-encoded private key, detecting RSA vs EC. The public
    /// half is always derivable from the private key, so a single
    /// keypair value stands in for the pair.
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let pkey = PKey::private_key_from_pem(pem)?;
        match pkey.id() {
            Id::RSA => Ok(Keypair::Rsa(pkey)),
            Id::EC => Ok(Keypair::Ec(pkey)),
            other => Err(Error::Preflight(format!(
                "unsupported private key type: {other:?}"
            ))),
        }
    }

    pub fn private_pem(&self) -> Result<Vec<u8>> {
        Ok(self.pkey().private_key_to_pem_pkcs8()?)
    }

    fn pkey(&self) -> &PKey<Private> {
        match self {
            Keypair::Rsa(k) | Keypair::Ec(k) => k,
        }
    }

    /// `ES256` for EC keys, `RS256` for everything else.
    pub fn alg(&self) -> &'static str {
        match self {
            Keypair::Rsa(_) => "RS256",
            Keypair::Ec(_) => "ES256",
        }
    }

    /// The canonical public JWK, with only the members RFC 7638 requires
    /// for the key's `kty` — building these as a `serde_json::Map` (a
    /// `BTreeMap` under the hood, since this crate doesn't enable
    /// `serde_json`'s `preserve_order` feature) means the keys always
    /// serialize in lexicographic order, i.e. already in thumbprint-
    /// canonical form.
    pub fn public_jwk(&self) -> Result<Value> {
        match self {
            Keypair::Rsa(pkey) => {
                let rsa = pkey.rsa()?;
                Ok(json!({
                    "e": b64u(&rsa.e().to_vec()),
                    "kty": "RSA",
                    "n": b64u(&rsa.n().to_vec()),
                }))
            }
            Keypair::Ec(pkey) => {
                let ec_key = pkey.ec_key()?;
                let group = ec_key.group();
                let mut ctx = BigNumContext::new()?;
                let mut x = BigNum::new()?;
                let mut y = BigNum::new()?;
                ec_key
                    .public_key()
                    .affine_coordinates_gfp(group, &mut x, &mut y, &mut ctx)?;
                Ok(json!({
                    "crv": "P-256",
                    "kty": "EC",
                    "x": b64u(&x.to_vec()),
                    "y": b64u(&y.to_vec()),
                }))
            }
        }
    }

    /// `base64url(SHA-256(canonical JWK))`, per RFC 7638.
    pub fn thumbprint(&self) -> Result<String> {
        let jwk = self.public_jwk()?;
        let canonical = serde_json::to_string(&jwk)?;
        Ok(b64u(&openssl::sha::sha256(canonical.as_bytes())))
    }

    /// Signs `signing_input` (the JWS `"{header}.{payload}"` bytes) and
    /// returns the raw JOSE signature bytes (not yet base64-encoded): for
    /// `RS256` that's the PKCS#1 v1.5 signature verbatim; for `ES256` the
    /// DER ECDSA signature is unpacked into the fixed-width `r || s` the
    /// JOSE spec requires.
    pub fn sign(&self, signing_input: &[u8]) -> Result<Vec<u8>> {
        match self {
            Keypair::Rsa(pkey) => {
                let mut signer = Signer::new(MessageDigest::sha256(), pkey)?;
                signer.set_rsa_padding(Padding::PKCS1)?;
                signer.update(signing_input)?;
                Ok(signer.sign_to_vec()?)
            }
            Keypair::Ec(pkey) => {
                let mut signer = Signer::new(MessageDigest::sha256(), pkey)?;
                signer.update(signing_input)?;
                let der = signer.sign_to_vec()?;
                let ecdsa_sig = openssl::ecdsa::EcdsaSig::from_der(&der)?;
                let mut raw = ecdsa_sig.r().to_vec_padded(32)?;
                raw.extend(ecdsa_sig.s().to_vec_padded(32)?);
                Ok(raw)
            }
        }
    }

    /// Generates a DER-encoded CSR over `domains` (first entry becomes the
    /// CN, all entries become `subjectAltName` DNS entries), signed by
    /// this keypair.
    pub fn generate_csr(&self, domains: &[String]) -> Result<X509Req> {
        let common_name = domains
            .first()
            .ok_or_else(|| Error::Preflight("cannot build a CSR with no domains".into()))?;

        let mut builder = X509ReqBuilder::new()?;

        let mut name_builder = X509NameBuilder::new()?;
        name_builder.append_entry_by_nid(openssl::nid::Nid::COMMONNAME, common_name)?;
        let name = name_builder.build();
        builder.set_subject_name(&name)?;

        let mut san = SubjectAlternativeName::new();
        for domain in domains {
            san.dns(domain);
        }
        let context = builder.x509v3_context(None);
        let san_extension = san.build(&context)?;
        let mut extensions = openssl::stack::Stack::new()?;
        extensions.push(san_extension)?;
        builder.add_extensions(&extensions)?;

        builder.set_pubkey(self.pkey())?;
        builder.sign(self.pkey(), MessageDigest::sha256())?;

        Ok(builder.build())
    }
}

/// base64url (no padding) of the DER-encoded CSR.
pub fn csr_to_web64(csr: &X509Req) -> Result<String> {
    Ok(b64u(&csr.to_der()?))
}
