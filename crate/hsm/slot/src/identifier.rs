use std::{
    cmp::Ordering,
    fmt::{self, Display, Formatter},
};

use serde::{Deserialize, Serialize};

/// Address of one slot within a PKCS#11 module.
///
/// The `index` is the position of the slot in the module's slot list, the `id` is the
/// `CK_SLOT_ID` reported by the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotIdentifier {
    pub index: u32,
    pub id: u64,
}

impl SlotIdentifier {
    #[must_use]
    pub const fn new(index: u32, id: u64) -> Self {
        Self { index, id }
    }
}

impl Display for SlotIdentifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "(index = {}, id = {})", self.index, self.id)
    }
}

/// Identifier of one raw token object: a key, a public key or a certificate.
///
/// Objects stored on a token always carry at least one of the two attributes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectIdentifier {
    id: Option<Vec<u8>>,
    label: Option<String>,
}

impl ObjectIdentifier {
    #[must_use]
    pub const fn new(id: Option<Vec<u8>>, label: Option<String>) -> Self {
        Self { id, label }
    }

    #[must_use]
    pub fn with_id_and_label(id: &[u8], label: &str) -> Self {
        Self::new(Some(id.to_vec()), Some(label.to_owned()))
    }

    #[must_use]
    pub fn id(&self) -> Option<&[u8]> {
        self.id.as_deref()
    }

    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Lowercase hex encoding of the id, empty when no id is set
    #[must_use]
    pub fn id_hex(&self) -> String {
        self.id.as_deref().map(hex::encode).unwrap_or_default()
    }

    #[must_use]
    pub fn matches_id(&self, id: &[u8]) -> bool {
        self.id.as_deref() == Some(id)
    }

    #[must_use]
    pub fn matches_label(&self, label: &str) -> bool {
        self.label.as_deref() == Some(label)
    }
}

// Listings are sorted by label first so that reports read alphabetically.
impl Ord for ObjectIdentifier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.label
            .cmp(&other.label)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for ObjectIdentifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for ObjectIdentifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(id = {}, label = {})",
            self.id.as_deref().map_or_else(|| "null".to_owned(), hex::encode),
            self.label.as_deref().unwrap_or("null")
        )
    }
}

/// Binds the token objects making up one identity: the private or secret key,
/// the optional public key and the optional certificate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityId {
    slot: SlotIdentifier,
    key_id: ObjectIdentifier,
    public_key_id: Option<ObjectIdentifier>,
    cert_id: Option<ObjectIdentifier>,
}

impl IdentityId {
    #[must_use]
    pub const fn new(
        slot: SlotIdentifier,
        key_id: ObjectIdentifier,
        public_key_id: Option<ObjectIdentifier>,
        cert_id: Option<ObjectIdentifier>,
    ) -> Self {
        Self {
            slot,
            key_id,
            public_key_id,
            cert_id,
        }
    }

    #[must_use]
    pub const fn slot(&self) -> &SlotIdentifier {
        &self.slot
    }

    #[must_use]
    pub const fn key_id(&self) -> &ObjectIdentifier {
        &self.key_id
    }

    #[must_use]
    pub const fn public_key_id(&self) -> Option<&ObjectIdentifier> {
        self.public_key_id.as_ref()
    }

    #[must_use]
    pub const fn cert_id(&self) -> Option<&ObjectIdentifier> {
        self.cert_id.as_ref()
    }

    pub(crate) fn set_cert_id(&mut self, cert_id: Option<ObjectIdentifier>) {
        self.cert_id = cert_id;
    }

    /// Whether any of the objects of this identity carries the given label
    #[must_use]
    pub fn uses_label(&self, label: &str) -> bool {
        self.key_id.matches_label(label)
            || self
                .public_key_id
                .as_ref()
                .is_some_and(|id| id.matches_label(label))
            || self
                .cert_id
                .as_ref()
                .is_some_and(|id| id.matches_label(label))
    }
}

impl Display for IdentityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "(slot = {}, key = {}", self.slot, self.key_id)?;
        if let Some(public_key_id) = &self.public_key_id {
            write!(f, ", public key = {public_key_id}")?;
        }
        if let Some(cert_id) = &self.cert_id {
            write!(f, ", certificate = {cert_id}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::{IdentityId, ObjectIdentifier, SlotIdentifier};

    #[test]
    fn object_identifiers_sort_by_label_then_id() {
        let mut ids = vec![
            ObjectIdentifier::with_id_and_label(&[2], "b"),
            ObjectIdentifier::with_id_and_label(&[9], "a"),
            ObjectIdentifier::with_id_and_label(&[1], "b"),
        ];
        ids.sort();
        let labels: Vec<_> = ids.iter().map(|id| (id.label(), id.id_hex())).collect();
        assert_eq!(
            labels,
            vec![
                (Some("a"), "09".to_owned()),
                (Some("b"), "01".to_owned()),
                (Some("b"), "02".to_owned()),
            ]
        );
    }

    #[test]
    fn object_identifier_rendering() {
        let id = ObjectIdentifier::with_id_and_label(&[0xca, 0xfe], "key");
        assert_eq!(id.to_string(), "(id = cafe, label = key)");
        let id = ObjectIdentifier::new(None, Some("key".to_owned()));
        assert_eq!(id.to_string(), "(id = null, label = key)");
        assert!(!id.matches_id(&[]));
    }

    #[test]
    fn identity_id_label_usage() {
        let identity_id = IdentityId::new(
            SlotIdentifier::new(0, 1),
            ObjectIdentifier::with_id_and_label(&[1], "key"),
            Some(ObjectIdentifier::with_id_and_label(&[1], "key-pub")),
            Some(ObjectIdentifier::with_id_and_label(&[1], "key-cert")),
        );
        assert!(identity_id.uses_label("key"));
        assert!(identity_id.uses_label("key-pub"));
        assert!(identity_id.uses_label("key-cert"));
        assert!(!identity_id.uses_label("other"));
    }
}
