//! The in-memory view of a slot: permitted mechanisms, certificates and identities.
//!
//! Lookups in this module follow two different matching rules on purpose:
//! - lookups (`find_object_id`, `find_identity_id`) decide on the label when both an id
//!   and a label are given, the id is then ignored;
//! - the duplicate check rejects a candidate matching the id **or** the label.

use std::collections::{BTreeMap, BTreeSet};

use pkcs11_sys::CK_MECHANISM_TYPE;

use crate::{
    BareCertificate, Certificate, HError, HResult, Identity, IdentityId, ObjectIdentifier,
    SlotIdentifier,
    chain::{update_ca_certs_of_identities, update_ca_certs_of_identity},
};

#[derive(Debug, Default)]
pub(crate) struct SlotCache {
    pub(crate) mechanisms: BTreeSet<CK_MECHANISM_TYPE>,
    pub(crate) certificates: BTreeMap<ObjectIdentifier, BareCertificate>,
    pub(crate) identities: BTreeMap<ObjectIdentifier, Identity>,
}

/// Lookup rule: the label, when given, overrides the id criterion
fn lookup_matches(object_id: &ObjectIdentifier, id: Option<&[u8]>, label: Option<&str>) -> bool {
    let mut matched = true;
    if let Some(id) = id {
        matched = object_id.matches_id(id);
    }
    if let Some(label) = label {
        matched = object_id.matches_label(label);
    }
    matched
}

impl SlotCache {
    /// First certificate whose identifier carries `id`
    pub(crate) fn cert_for_id(&self, id: &[u8]) -> Option<&Certificate> {
        self.certificates
            .iter()
            .find(|(object_id, _)| object_id.matches_id(id))
            .map(|(_, cert)| cert.certificate())
    }

    pub(crate) fn find_object_id(
        &self,
        id: Option<&[u8]>,
        label: Option<&str>,
    ) -> Option<&ObjectIdentifier> {
        if id.is_none() && label.is_none() {
            return None;
        }
        self.identities
            .keys()
            .chain(self.certificates.keys())
            .find(|object_id| lookup_matches(object_id, id, label))
    }

    pub(crate) fn find_identity_id(
        &self,
        key_id: Option<&[u8]>,
        key_label: Option<&str>,
    ) -> Option<&IdentityId> {
        if key_id.is_none() && key_label.is_none() {
            return None;
        }
        self.identities
            .iter()
            .find(|(object_id, _)| lookup_matches(object_id, key_id, key_label))
            .map(|(_, identity)| identity.id())
    }

    /// Fail when an identity or certificate already uses the id or the label
    pub(crate) fn assert_no_duplicate(
        &self,
        id: Option<&[u8]>,
        label: Option<&str>,
    ) -> HResult<()> {
        if id.is_none() && label.is_none() {
            return Ok(());
        }
        for object_id in self.identities.keys().chain(self.certificates.keys()) {
            let match_id = id.is_some_and(|id| object_id.matches_id(id));
            let match_label = label.is_some_and(|label| object_id.matches_label(label));
            if match_id || match_label {
                let mut criteria = Vec::with_capacity(2);
                if let (true, Some(id)) = (match_id, id) {
                    criteria.push(format!("id=0x{}", hex::encode_upper(id)));
                }
                if let (true, Some(label)) = (match_label, label) {
                    criteria.push(format!("label={label}"));
                }
                return Err(HError::DuplicateEntity(format!(
                    "Identity or Certificate with {} already exists",
                    criteria.join(" and ")
                )));
            }
        }
        Ok(())
    }

    fn label_in_use(&self, label: &str) -> bool {
        self.identities
            .values()
            .any(|identity| identity.id().uses_label(label))
            || self
                .certificates
                .keys()
                .any(|object_id| object_id.matches_label(label))
    }

    /// `base`, or the first of `base-1`, `base-2`, ... not used by any object
    pub(crate) fn generate_label(&self, base: &str) -> String {
        let mut label = base.to_owned();
        let mut index = 0_u64;
        while self.label_in_use(&label) {
            index += 1;
            label = format!("{base}-{index}");
        }
        label
    }

    pub(crate) fn exists_identity_for_id(&self, id: &[u8]) -> bool {
        self.identities.keys().any(|object_id| object_id.matches_id(id))
    }

    pub(crate) fn exists_cert_for_id(&self, id: &[u8]) -> bool {
        self.certificates
            .keys()
            .any(|object_id| object_id.matches_id(id))
    }

    /// Insert an identity freshly created on the token and compute its chain
    pub(crate) fn add_identity(&mut self, slot: &SlotIdentifier, identity: Identity) -> HResult<()> {
        if identity.id().slot() != slot {
            return Err(HError::InvalidArgument(format!(
                "identity {} does not belong to slot {slot}",
                identity.id()
            )));
        }
        let key_id = identity.id().key_id().clone();
        if self.identities.contains_key(&key_id) {
            return Err(HError::DuplicateEntity(format!(
                "identity with key {key_id} already exists on slot {slot}"
            )));
        }
        let identity = self.identities.entry(key_id).or_insert(identity);
        update_ca_certs_of_identity(identity, &self.certificates);
        Ok(())
    }

    /// Drop an identity and its certificate; returns the removed identity id
    pub(crate) fn remove_identity(&mut self, key_id: &ObjectIdentifier) -> Option<IdentityId> {
        let mut identity = self.identities.remove(key_id)?;
        if let Some(cert_id) = identity.id().cert_id() {
            self.certificates.remove(cert_id);
        }
        identity.clear_certificate_chain();
        self.update_ca_certs_of_identities();
        Some(identity.id().clone())
    }

    pub(crate) fn update_ca_certs_of_identities(&mut self) -> usize {
        update_ca_certs_of_identities(&mut self.identities, &self.certificates)
    }
}
