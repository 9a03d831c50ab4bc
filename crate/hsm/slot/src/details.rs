//! Human readable reports over the slot cache.
//! Both functions are pure: emitting the text is left to the caller.

use std::fmt::Write;

use pkcs11_sys::CK_MECHANISM_TYPE;

use crate::{Certificate, ObjectIdentifier, SlotIdentifier, cache::SlotCache, mechanism::mechanism_name};

/// Summary logged after a refresh: mechanisms, ignored mechanisms, certificates and identities
pub(crate) fn refresh_summary(
    module_name: &str,
    slot_id: &SlotIdentifier,
    cache: &SlotCache,
    ignored_mechanisms: &[CK_MECHANISM_TYPE],
) -> String {
    let mut sb = format!("initialized module {module_name}, slot {slot_id}");

    sb.push_str("\nsupported mechanisms:\n");
    for mechanism in &cache.mechanisms {
        let _ = writeln!(sb, "\t{}", mechanism_name(*mechanism));
    }

    sb.push_str("\nsupported by device but ignored mechanisms:\n");
    if ignored_mechanisms.is_empty() {
        sb.push_str("\tNONE\n");
    } else {
        let mut ignored = ignored_mechanisms.to_vec();
        ignored.sort_unstable();
        for mechanism in ignored {
            let _ = writeln!(sb, "\t{}", mechanism_name(mechanism));
        }
    }

    let _ = writeln!(sb, "{} certificates:", cache.certificates.len());
    for (object_id, cert) in &cache.certificates {
        let _ = writeln!(
            sb,
            "\t{object_id}, subject='{}'",
            cert.certificate().subject()
        );
    }

    let _ = writeln!(sb, "{} identities:", cache.identities.len());
    for (object_id, identity) in &cache.identities {
        let _ = write!(sb, "\t{object_id}");
        match identity.algorithm() {
            Some(algorithm) => {
                let _ = write!(sb, ", algo={algorithm}");
                if let Some(cert) = identity.certificate() {
                    let _ = write!(sb, ", subject='{}'", cert.subject());
                }
            }
            None => sb.push_str(", algo=<symmetric>"),
        }
        sb.push('\n');
    }
    sb
}

/// Report of all identities followed by the certificates not bound to an identity,
/// both sorted by identifier
pub(crate) fn render_details(cache: &SlotCache, verbose: bool) -> String {
    let mut sb = String::new();

    for (i, (key_id, identity)) in cache.identities.iter().enumerate() {
        let _ = write!(
            sb,
            "\t{}. {} (id: {}",
            i + 1,
            label_of(key_id),
            key_id.id_hex()
        );
        let identity_id = identity.id();
        if let Some(cert_id) = identity_id.cert_id().filter(|id| *id != key_id) {
            let _ = write!(sb, ", certificate label: {}", label_of(cert_id));
        }
        if let Some(public_key_id) = identity_id.public_key_id().filter(|id| *id != key_id) {
            let _ = write!(sb, ", publicKey label: {}", label_of(public_key_id));
        }
        sb.push_str(")\n");

        match identity.algorithm() {
            Some(algorithm) => {
                let _ = writeln!(sb, "\t\tAlgorithm: {algorithm}");
                let chain = identity.certificate_chain();
                if chain.is_empty() {
                    sb.push_str("\t\tCertificate: NONE\n");
                }
                for (j, cert) in chain.iter().enumerate() {
                    format_certificate(&mut sb, Some(j), verbose, cert);
                }
            }
            None => sb.push_str("\t\tSymmetric key\n"),
        }
    }

    let bound = |object_id: &ObjectIdentifier| {
        cache.identities.values().any(|identity| {
            identity.id().key_id() == object_id || identity.id().cert_id() == Some(object_id)
        })
    };
    for (i, (object_id, cert)) in cache
        .certificates
        .iter()
        .filter(|(object_id, _)| !bound(object_id))
        .enumerate()
    {
        let _ = writeln!(
            sb,
            "\tCert-{}. {} (id: {})",
            i + 1,
            label_of(object_id),
            object_id.id_hex()
        );
        format_certificate(&mut sb, None, verbose, cert.certificate());
    }
    sb
}

fn label_of(object_id: &ObjectIdentifier) -> &str {
    object_id.label().unwrap_or("null")
}

fn format_certificate(sb: &mut String, index: Option<usize>, verbose: bool, cert: &Certificate) {
    sb.push_str("\t\tCertificate");
    if let Some(index) = index {
        let _ = write!(sb, "[{index}]");
    }
    sb.push_str(": ");

    if !verbose {
        let _ = writeln!(sb, "{}", cert.subject());
        return;
    }
    let _ = write!(sb, "\n\t\t\tSubject: {}", cert.subject());
    let _ = write!(sb, "\n\t\t\tIssuer: {}", cert.issuer());
    let _ = write!(sb, "\n\t\t\tSerial: 0x{}", cert.serial_hex());
    let _ = write!(sb, "\n\t\t\tStart time: {}", cert.not_before());
    let _ = write!(sb, "\n\t\t\tEnd time: {}", cert.not_after());
    let _ = writeln!(sb, "\n\t\t\tSHA1 Sum: {}", cert.sha1_hex());
}
