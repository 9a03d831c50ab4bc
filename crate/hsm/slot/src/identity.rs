use std::fmt::{self, Debug, Formatter};

use openssl::pkey::{PKey, Public};

use crate::{
    Certificate, HError, HResult, IdentityId,
    certificate::{key_algorithm, public_keys_equal},
};

/// One usable credential on a token: a private or secret key, its public key when
/// asymmetric, and its certificate chain ordered leaf first.
#[derive(Clone)]
pub struct Identity {
    id: IdentityId,
    public_key: Option<PKey<Public>>,
    certificate_chain: Vec<Certificate>,
}

impl Identity {
    /// A symmetric key identity: no public key, no certificate
    #[must_use]
    pub const fn secret_key(id: IdentityId) -> Self {
        Self {
            id,
            public_key: None,
            certificate_chain: Vec::new(),
        }
    }

    /// An asymmetric key identity; the leaf certificate, if any, must certify `public_key`
    pub fn key_pair(
        id: IdentityId,
        public_key: PKey<Public>,
        certificate_chain: Vec<Certificate>,
    ) -> HResult<Self> {
        let mut identity = Self {
            id,
            public_key: Some(public_key),
            certificate_chain: Vec::new(),
        };
        identity.set_certificate_chain(certificate_chain)?;
        Ok(identity)
    }

    #[must_use]
    pub const fn id(&self) -> &IdentityId {
        &self.id
    }

    pub(crate) const fn id_mut(&mut self) -> &mut IdentityId {
        &mut self.id
    }

    #[must_use]
    pub const fn public_key(&self) -> Option<&PKey<Public>> {
        self.public_key.as_ref()
    }

    #[must_use]
    pub const fn is_secret_key(&self) -> bool {
        self.public_key.is_none()
    }

    /// The leaf certificate
    #[must_use]
    pub fn certificate(&self) -> Option<&Certificate> {
        self.certificate_chain.first()
    }

    #[must_use]
    pub fn certificate_chain(&self) -> &[Certificate] {
        &self.certificate_chain
    }

    /// Algorithm of the public key, `None` for secret keys
    #[must_use]
    pub fn algorithm(&self) -> Option<String> {
        self.public_key.as_deref().map(key_algorithm)
    }

    /// Replace the certificate chain.
    ///
    /// The leaf must certify this identity's public key; secret keys cannot hold certificates.
    pub fn set_certificate_chain(&mut self, chain: Vec<Certificate>) -> HResult<()> {
        if let Some(leaf) = chain.first() {
            let Some(public_key) = &self.public_key else {
                return Err(HError::Certificate(format!(
                    "the secret key {} cannot hold certificates",
                    self.id.key_id()
                )));
            };
            let leaf_key = leaf.public_key()?;
            if !public_keys_equal(public_key, &leaf_key) {
                return Err(HError::Certificate(format!(
                    "the certificate '{}' is not for key {}",
                    leaf.subject(),
                    self.id.key_id()
                )));
            }
        }
        self.certificate_chain = chain;
        Ok(())
    }

    pub(crate) fn clear_certificate_chain(&mut self) {
        self.certificate_chain.clear();
    }
}

impl Debug for Identity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id)
            .field("algorithm", &self.algorithm())
            .field("certificate_chain", &self.certificate_chain)
            .finish()
    }
}

/// A certificate object on the token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BareCertificate {
    certificate: Certificate,
}

impl BareCertificate {
    #[must_use]
    pub const fn new(certificate: Certificate) -> Self {
        Self { certificate }
    }

    #[must_use]
    pub const fn certificate(&self) -> &Certificate {
        &self.certificate
    }
}

impl From<Certificate> for BareCertificate {
    fn from(certificate: Certificate) -> Self {
        Self::new(certificate)
    }
}
