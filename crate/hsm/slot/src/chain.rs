//! Reconstruction of CA chains from the certificates cached for a slot.

use std::collections::BTreeMap;

use pki_logger::{debug, warn};

use crate::{BareCertificate, Certificate, Identity, ObjectIdentifier};

/// Upper bound on the chain length, whatever the cache contents
pub(crate) const MAX_CHAIN_LENGTH: usize = 32;

/// Build the chain of `leaf` from the `pool` of certificates, leaf first.
///
/// The walk stops at a self-signed certificate, at a certificate whose issuer is not in the
/// pool, when the next issuer is already part of the chain, or at [`MAX_CHAIN_LENGTH`].
pub(crate) fn build_cert_path<'a, I>(leaf: &Certificate, pool: I) -> Vec<Certificate>
where
    I: IntoIterator<Item = &'a Certificate> + Clone,
{
    let mut chain = vec![leaf.clone()];
    loop {
        let Some(current) = chain.last() else {
            break;
        };
        if current.is_self_signed() {
            break;
        }
        if chain.len() >= MAX_CHAIN_LENGTH {
            warn!(
                "certificate chain of '{}' truncated at {MAX_CHAIN_LENGTH} certificates",
                leaf.subject()
            );
            break;
        }
        let issuer = pool
            .clone()
            .into_iter()
            .find(|candidate| *candidate != current && candidate.issues(current));
        match issuer {
            Some(issuer) if chain.contains(issuer) => {
                debug!(
                    "issuance cycle detected at '{}' while building the chain of '{}'",
                    issuer.subject(),
                    leaf.subject()
                );
                break;
            }
            Some(issuer) => chain.push(issuer.clone()),
            None => break,
        }
    }
    chain
}

/// Recompute the chain of one identity against `certificates`.
///
/// The stored chain is only replaced when it differs; returns whether it was replaced.
/// A chain the identity refuses is logged and skipped.
pub(crate) fn update_ca_certs_of_identity(
    identity: &mut Identity,
    certificates: &BTreeMap<ObjectIdentifier, BareCertificate>,
) -> bool {
    let Some(leaf) = identity.certificate() else {
        return false;
    };
    let new_chain = build_cert_path(
        leaf,
        certificates.values().map(BareCertificate::certificate),
    );
    if new_chain.as_slice() == identity.certificate_chain() {
        return false;
    }
    match identity.set_certificate_chain(new_chain) {
        Ok(()) => true,
        Err(e) => {
            warn!(
                "could not set certificates for identity {}: {e}",
                identity.id()
            );
            false
        }
    }
}

/// Recompute the chains of all identities; returns how many chains were replaced
pub(crate) fn update_ca_certs_of_identities(
    identities: &mut BTreeMap<ObjectIdentifier, Identity>,
    certificates: &BTreeMap<ObjectIdentifier, BareCertificate>,
) -> usize {
    identities
        .values_mut()
        .map(|identity| update_ca_certs_of_identity(identity, certificates))
        .filter(|replaced| *replaced)
        .count()
}
