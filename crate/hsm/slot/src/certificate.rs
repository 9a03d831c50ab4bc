//! X.509 certificate handling needed by the slot: issuer relations, subject rendering and
//! public-key comparison.

use std::fmt::{self, Debug, Formatter};

use openssl::{
    hash::MessageDigest,
    nid::Nid,
    pkey::{Id, PKey, PKeyRef, Public},
    x509::{X509, X509NameRef, X509VerifyResult},
};
use pki_logger::debug;

use crate::{HError, HResult};

/// A parsed X.509 certificate together with its DER encoding.
///
/// Two certificates are equal when their encodings are equal.
#[derive(Clone)]
pub struct Certificate {
    x509: X509,
    der: Vec<u8>,
}

impl Certificate {
    pub fn from_der(der: &[u8]) -> HResult<Self> {
        let x509 = X509::from_der(der)
            .map_err(|e| HError::Certificate(format!("invalid certificate encoding: {e}")))?;
        Ok(Self {
            x509,
            der: der.to_vec(),
        })
    }

    pub fn from_x509(x509: X509) -> HResult<Self> {
        let der = x509
            .to_der()
            .map_err(|e| HError::Certificate(format!("cannot encode certificate: {e}")))?;
        Ok(Self { x509, der })
    }

    #[must_use]
    pub const fn x509(&self) -> &X509 {
        &self.x509
    }

    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn public_key(&self) -> HResult<PKey<Public>> {
        self.x509
            .public_key()
            .map_err(|e| HError::Certificate(format!("cannot read certificate public key: {e}")))
    }

    /// Subject in RFC 4519 notation, e.g. `CN=Leaf,O=Example,C=DE`
    #[must_use]
    pub fn subject(&self) -> String {
        rfc4519_name(self.x509.subject_name())
    }

    /// Issuer in RFC 4519 notation
    #[must_use]
    pub fn issuer(&self) -> String {
        rfc4519_name(self.x509.issuer_name())
    }

    /// First common name of the subject, if any
    #[must_use]
    pub fn common_name(&self) -> Option<String> {
        self.x509
            .subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .and_then(|entry| entry.data().to_string().ok())
    }

    /// Serial number as uppercase hex
    #[must_use]
    pub fn serial_hex(&self) -> String {
        self.x509
            .serial_number()
            .to_bn()
            .and_then(|bn| bn.to_hex_str().map(|s| s.to_string()))
            .unwrap_or_else(|_| "ERROR".to_owned())
    }

    #[must_use]
    pub fn not_before(&self) -> String {
        self.x509.not_before().to_string()
    }

    #[must_use]
    pub fn not_after(&self) -> String {
        self.x509.not_after().to_string()
    }

    /// SHA-1 fingerprint of the DER encoding in lowercase hex
    #[must_use]
    pub fn sha1_hex(&self) -> String {
        self.x509
            .digest(MessageDigest::sha1())
            .map(hex::encode)
            .unwrap_or_else(|_| "ERROR".to_owned())
    }

    /// Whether this certificate issued `cert`: the issuer name and key identifiers match
    /// and the signature of `cert` verifies under this certificate's public key.
    #[must_use]
    pub fn issues(&self, cert: &Self) -> bool {
        if self.x509.issued(&cert.x509) != X509VerifyResult::OK {
            return false;
        }
        match self
            .x509
            .public_key()
            .and_then(|key| cert.x509.verify(&key))
        {
            Ok(verified) => verified,
            Err(e) => {
                debug!(
                    "could not verify the signature of '{}' with '{}': {e}",
                    cert.subject(),
                    self.subject()
                );
                false
            }
        }
    }

    #[must_use]
    pub fn is_self_signed(&self) -> bool {
        self.issues(self)
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for Certificate {}

impl Debug for Certificate {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject())
            .field("issuer", &self.issuer())
            .field("serial", &self.serial_hex())
            .finish()
    }
}

/// Render a name most significant RDN last, the way RFC 4519 strings read
fn rfc4519_name(name: &X509NameRef) -> String {
    let mut rdns = name
        .entries()
        .map(|entry| {
            let object = entry.object();
            let key = object
                .nid()
                .short_name()
                .map_or_else(|_| object.to_string(), ToOwned::to_owned);
            let value = entry
                .data()
                .to_string()
                .unwrap_or_else(|_| hex::encode(entry.data().as_slice()));
            format!("{key}={value}")
        })
        .collect::<Vec<_>>();
    rdns.reverse();
    rdns.join(",")
}

/// Compare the public components of two keys
#[must_use]
pub fn public_keys_equal(a: &PKeyRef<Public>, b: &PKeyRef<Public>) -> bool {
    a.public_eq(b)
}

/// Short algorithm name of a public key
#[must_use]
pub fn key_algorithm(key: &PKeyRef<Public>) -> String {
    match key.id() {
        Id::RSA => "RSA".to_owned(),
        Id::DSA => "DSA".to_owned(),
        Id::EC => "EC".to_owned(),
        Id::ED25519 => "Ed25519".to_owned(),
        Id::ED448 => "Ed448".to_owned(),
        other => format!("UNKNOWN({})", other.as_raw()),
    }
}
