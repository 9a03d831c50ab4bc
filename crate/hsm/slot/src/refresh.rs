use std::collections::{BTreeMap, BTreeSet};

use pkcs11_sys::CK_MECHANISM_TYPE;

use crate::{BareCertificate, Identity, ObjectIdentifier};

/// Snapshot produced by a full scan of the token, consumed by `Slot::refresh`
#[derive(Debug, Default)]
pub struct SlotRefreshResult {
    /// Mechanisms reported by the hardware, before policy filtering
    pub mechanisms: BTreeSet<CK_MECHANISM_TYPE>,
    /// Every certificate object found on the token
    pub certificates: BTreeMap<ObjectIdentifier, BareCertificate>,
    /// Identities keyed by the identifier of their private or secret key
    pub identities: BTreeMap<ObjectIdentifier, Identity>,
}

impl SlotRefreshResult {
    pub fn add_certificate(&mut self, object_id: ObjectIdentifier, certificate: BareCertificate) {
        self.certificates.insert(object_id, certificate);
    }

    pub fn add_identity(&mut self, identity: Identity) {
        self.identities
            .insert(identity.id().key_id().clone(), identity);
    }
}
