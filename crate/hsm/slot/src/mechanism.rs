//! PKCS#11 mechanism naming and the mechanism permission policy.
//!
//! The hardware reports which mechanisms it supports; the [`MechanismFilter`] decides which
//! of those the toolkit is allowed to use on a given slot.

use std::{borrow::Cow, collections::BTreeSet};

use pkcs11_sys::{
    CK_MECHANISM_TYPE, CKM_AES_CBC, CKM_AES_GCM, CKM_AES_KEY_GEN, CKM_DES3_KEY_GEN, CKM_DSA,
    CKM_DSA_KEY_PAIR_GEN, CKM_DSA_SHA1, CKM_DSA_SHA256, CKM_EC_KEY_PAIR_GEN, CKM_ECDSA,
    CKM_ECDSA_SHA1, CKM_ECDSA_SHA256, CKM_ECDSA_SHA384, CKM_ECDSA_SHA512,
    CKM_GENERIC_SECRET_KEY_GEN, CKM_RSA_PKCS, CKM_RSA_PKCS_KEY_PAIR_GEN, CKM_RSA_PKCS_OAEP,
    CKM_RSA_PKCS_PSS, CKM_RSA_X_509, CKM_SHA_1, CKM_SHA_1_HMAC, CKM_SHA1_RSA_PKCS,
    CKM_SHA1_RSA_PKCS_PSS, CKM_SHA224, CKM_SHA256, CKM_SHA256_HMAC, CKM_SHA256_RSA_PKCS,
    CKM_SHA256_RSA_PKCS_PSS, CKM_SHA384, CKM_SHA384_HMAC, CKM_SHA384_RSA_PKCS,
    CKM_SHA384_RSA_PKCS_PSS, CKM_SHA512, CKM_SHA512_HMAC, CKM_SHA512_RSA_PKCS,
    CKM_SHA512_RSA_PKCS_PSS, CKM_VENDOR_DEFINED,
};

use crate::{HError, HResult, SlotIdentifier};

/// Vendor mechanism generating SM2 key pairs
pub const CKM_VENDOR_SM2_KEY_PAIR_GEN: CK_MECHANISM_TYPE = CKM_VENDOR_DEFINED + 0xD001;
/// Vendor mechanism for SM2 signatures with SM3 digest
pub const CKM_VENDOR_SM2_SM3: CK_MECHANISM_TYPE = CKM_VENDOR_DEFINED + 0xD003;

macro_rules! mechanism_table {
    ($($mechanism:ident),+ $(,)?) => {
        &[$(($mechanism, stringify!($mechanism))),+]
    };
}

const MECHANISM_NAMES: &[(CK_MECHANISM_TYPE, &str)] = mechanism_table!(
    CKM_RSA_PKCS_KEY_PAIR_GEN,
    CKM_RSA_PKCS,
    CKM_RSA_X_509,
    CKM_SHA1_RSA_PKCS,
    CKM_RSA_PKCS_OAEP,
    CKM_RSA_PKCS_PSS,
    CKM_SHA1_RSA_PKCS_PSS,
    CKM_DSA_KEY_PAIR_GEN,
    CKM_DSA,
    CKM_DSA_SHA1,
    CKM_DSA_SHA256,
    CKM_SHA256_RSA_PKCS,
    CKM_SHA384_RSA_PKCS,
    CKM_SHA512_RSA_PKCS,
    CKM_SHA256_RSA_PKCS_PSS,
    CKM_SHA384_RSA_PKCS_PSS,
    CKM_SHA512_RSA_PKCS_PSS,
    CKM_SHA_1,
    CKM_SHA_1_HMAC,
    CKM_SHA224,
    CKM_SHA256,
    CKM_SHA256_HMAC,
    CKM_SHA384,
    CKM_SHA384_HMAC,
    CKM_SHA512,
    CKM_SHA512_HMAC,
    CKM_GENERIC_SECRET_KEY_GEN,
    CKM_EC_KEY_PAIR_GEN,
    CKM_ECDSA,
    CKM_ECDSA_SHA1,
    CKM_ECDSA_SHA256,
    CKM_ECDSA_SHA384,
    CKM_ECDSA_SHA512,
    CKM_DES3_KEY_GEN,
    CKM_AES_KEY_GEN,
    CKM_AES_CBC,
    CKM_AES_GCM,
    CKM_VENDOR_SM2_KEY_PAIR_GEN,
    CKM_VENDOR_SM2_SM3,
);

/// Human readable name of a mechanism code.
///
/// Unknown standard codes are rendered as `0x%08X`, unknown vendor codes relative to
/// `CKM_VENDOR_DEFINED`.
#[must_use]
pub fn mechanism_name(mechanism: CK_MECHANISM_TYPE) -> Cow<'static, str> {
    if let Some((_, name)) = MECHANISM_NAMES.iter().find(|(code, _)| *code == mechanism) {
        return Cow::Borrowed(name);
    }
    if mechanism >= CKM_VENDOR_DEFINED {
        Cow::Owned(format!(
            "CKM_VENDOR_DEFINED+{:#X}",
            mechanism - CKM_VENDOR_DEFINED
        ))
    } else {
        Cow::Owned(format!("{mechanism:#010X}"))
    }
}

/// Parse a mechanism given by name (`CKM_RSA_PKCS`, `rsa_pkcs`), by hex code (`0x1`)
/// or by decimal code.
pub fn parse_mechanism(value: &str) -> HResult<CK_MECHANISM_TYPE> {
    let value = value.trim();
    if let Some(hex) = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        return CK_MECHANISM_TYPE::from_str_radix(hex, 16)
            .map_err(|e| HError::InvalidArgument(format!("invalid mechanism code {value}: {e}")));
    }
    if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
        return value
            .parse::<CK_MECHANISM_TYPE>()
            .map_err(|e| HError::InvalidArgument(format!("invalid mechanism code {value}: {e}")));
    }
    let upper = value.to_ascii_uppercase();
    let name = if upper.starts_with("CKM_") {
        upper
    } else {
        format!("CKM_{upper}")
    };
    MECHANISM_NAMES
        .iter()
        .find(|(_, n)| *n == name)
        .map(|(code, _)| *code)
        .ok_or_else(|| HError::InvalidArgument(format!("unknown mechanism {value}")))
}

/// Policy deciding whether a mechanism may be used on a slot,
/// independently of what the hardware supports.
///
/// Implementations are shared between slots and must be read-only or thread-safe.
pub trait MechanismFilter: Send + Sync {
    fn is_permitted(&self, slot: &SlotIdentifier, mechanism: CK_MECHANISM_TYPE) -> bool;
}

/// Permits every mechanism the hardware reports
#[derive(Debug, Clone, Copy, Default)]
pub struct PermitAllMechanisms;

impl MechanismFilter for PermitAllMechanisms {
    fn is_permitted(&self, _slot: &SlotIdentifier, _mechanism: CK_MECHANISM_TYPE) -> bool {
        true
    }
}

/// Matches slots by index and/or id; unset fields match any slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotIdFilter {
    pub index: Option<u32>,
    pub id: Option<u64>,
}

impl SlotIdFilter {
    #[must_use]
    pub fn matches(&self, slot: &SlotIdentifier) -> bool {
        self.index.is_none_or(|index| index == slot.index) && self.id.is_none_or(|id| id == slot.id)
    }
}

/// The permitted mechanisms of the slots matched by `slots`.
/// `None` matches every slot.
#[derive(Debug, Clone, Default)]
pub struct SingleMechanismFilter {
    slots: Option<Vec<SlotIdFilter>>,
    mechanisms: BTreeSet<CK_MECHANISM_TYPE>,
}

impl SingleMechanismFilter {
    #[must_use]
    pub const fn new(
        slots: Option<Vec<SlotIdFilter>>,
        mechanisms: BTreeSet<CK_MECHANISM_TYPE>,
    ) -> Self {
        Self { slots, mechanisms }
    }

    fn matches_slot(&self, slot: &SlotIdentifier) -> bool {
        self.slots
            .as_ref()
            .is_none_or(|filters| filters.iter().any(|f| f.matches(slot)))
    }
}

/// Ordered list of single filters; the first one matching the slot decides.
/// Slots matched by no filter, and every slot when the list is empty, may use any mechanism.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredMechanismFilter {
    filters: Vec<SingleMechanismFilter>,
}

impl ConfiguredMechanismFilter {
    #[must_use]
    pub const fn new(filters: Vec<SingleMechanismFilter>) -> Self {
        Self { filters }
    }

    pub fn add_filter(&mut self, filter: SingleMechanismFilter) {
        self.filters.push(filter);
    }
}

impl MechanismFilter for ConfiguredMechanismFilter {
    fn is_permitted(&self, slot: &SlotIdentifier, mechanism: CK_MECHANISM_TYPE) -> bool {
        self.filters
            .iter()
            .find(|f| f.matches_slot(slot))
            .is_none_or(|f| f.mechanisms.contains(&mechanism))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use pkcs11_sys::{CKM_EC_KEY_PAIR_GEN, CKM_RSA_PKCS, CKM_RSA_PKCS_KEY_PAIR_GEN};

    use super::{
        CKM_VENDOR_SM2_KEY_PAIR_GEN, ConfiguredMechanismFilter, MechanismFilter,
        SingleMechanismFilter, SlotIdFilter, mechanism_name, parse_mechanism,
    };
    use crate::SlotIdentifier;

    #[test]
    fn names_and_parsing() {
        assert_eq!(mechanism_name(CKM_RSA_PKCS), "CKM_RSA_PKCS");
        assert_eq!(
            mechanism_name(CKM_VENDOR_SM2_KEY_PAIR_GEN),
            "CKM_VENDOR_SM2_KEY_PAIR_GEN"
        );
        assert_eq!(mechanism_name(0x7777), "0x00007777");
        assert_eq!(
            parse_mechanism("CKM_RSA_PKCS_KEY_PAIR_GEN").unwrap(),
            CKM_RSA_PKCS_KEY_PAIR_GEN
        );
        assert_eq!(parse_mechanism("ec_key_pair_gen").unwrap(), CKM_EC_KEY_PAIR_GEN);
        assert_eq!(parse_mechanism("0x1").unwrap(), CKM_RSA_PKCS);
        assert_eq!(parse_mechanism("1").unwrap(), CKM_RSA_PKCS);
        parse_mechanism("CKM_DOES_NOT_EXIST").unwrap_err();
    }

    #[test]
    fn first_matching_filter_decides() {
        let slot_0 = SlotIdentifier::new(0, 10);
        let slot_1 = SlotIdentifier::new(1, 11);
        let filter = ConfiguredMechanismFilter::new(vec![
            SingleMechanismFilter::new(
                Some(vec![SlotIdFilter {
                    index: Some(0),
                    id: None,
                }]),
                BTreeSet::from([CKM_RSA_PKCS]),
            ),
            SingleMechanismFilter::new(
                Some(vec![SlotIdFilter {
                    index: None,
                    id: Some(10),
                }]),
                BTreeSet::from([CKM_RSA_PKCS_KEY_PAIR_GEN]),
            ),
        ]);
        assert!(filter.is_permitted(&slot_0, CKM_RSA_PKCS));
        // the second filter also matches slot 0 but is never consulted
        assert!(!filter.is_permitted(&slot_0, CKM_RSA_PKCS_KEY_PAIR_GEN));
        // no filter matches slot 1
        assert!(filter.is_permitted(&slot_1, CKM_EC_KEY_PAIR_GEN));
    }

    #[test]
    fn empty_filter_permits_everything() {
        let filter = ConfiguredMechanismFilter::default();
        assert!(filter.is_permitted(&SlotIdentifier::new(3, 3), CKM_EC_KEY_PAIR_GEN));
    }
}
