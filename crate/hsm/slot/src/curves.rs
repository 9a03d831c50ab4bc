use crate::{HError, HResult};

/// Object identifier of the SM2 curve
pub const SM2P256V1_OID: &str = "1.2.156.10197.1.301";

/// Known curve aliases and their object identifiers
const CURVES: &[(&str, &str)] = &[
    ("secp256r1", "1.2.840.10045.3.1.7"),
    ("prime256v1", "1.2.840.10045.3.1.7"),
    ("P-256", "1.2.840.10045.3.1.7"),
    ("secp384r1", "1.3.132.0.34"),
    ("P-384", "1.3.132.0.34"),
    ("secp521r1", "1.3.132.0.35"),
    ("P-521", "1.3.132.0.35"),
    ("secp256k1", "1.3.132.0.10"),
    ("brainpoolP256r1", "1.3.36.3.3.2.8.1.1.7"),
    ("brainpoolP384r1", "1.3.36.3.3.2.8.1.1.11"),
    ("brainpoolP512r1", "1.3.36.3.3.2.8.1.1.13"),
    ("sm2p256v1", SM2P256V1_OID),
];

/// Resolve a curve given by name or dotted object identifier to its object identifier
pub fn resolve_curve(name_or_oid: &str) -> HResult<String> {
    let value = name_or_oid.trim();
    if value.is_empty() {
        return Err(HError::InvalidArgument(
            "the curve name or OID must not be blank".to_owned(),
        ));
    }
    if is_dotted_oid(value) {
        return Ok(value.to_owned());
    }
    CURVES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(value))
        .map(|(_, oid)| (*oid).to_owned())
        .ok_or_else(|| HError::InvalidArgument(format!("unknown curve {value}")))
}

/// Name of the curve with the given object identifier, if known
#[must_use]
pub fn curve_name(oid: &str) -> Option<&'static str> {
    CURVES
        .iter()
        .find(|(_, curve_oid)| *curve_oid == oid)
        .map(|(name, _)| *name)
}

fn is_dotted_oid(value: &str) -> bool {
    let arcs: Vec<&str> = value.split('.').collect();
    arcs.len() >= 2
        && arcs
            .iter()
            .all(|arc| !arc.is_empty() && arc.bytes().all(|b| b.is_ascii_digit()))
        && matches!(arcs.first(), Some(&("0" | "1" | "2")))
}

#[cfg(test)]
mod tests {
    use super::{curve_name, resolve_curve};
    use crate::HError;

    #[test]
    fn curves_resolve_by_name_or_oid() {
        assert_eq!(resolve_curve("P-256").unwrap(), "1.2.840.10045.3.1.7");
        assert_eq!(resolve_curve("SECP384R1").unwrap(), "1.3.132.0.34");
        assert_eq!(resolve_curve("1.3.132.0.35").unwrap(), "1.3.132.0.35");
        assert_eq!(curve_name("1.3.132.0.10"), Some("secp256k1"));
        assert!(matches!(
            resolve_curve("curve25519x"),
            Err(HError::InvalidArgument(_))
        ));
        assert!(matches!(
            resolve_curve("3.1.2"),
            Err(HError::InvalidArgument(_))
        ));
        assert!(matches!(resolve_curve(" "), Err(HError::InvalidArgument(_))));
    }
}
