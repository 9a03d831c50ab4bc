use pkcs11_sys::{CKK_AES, CKM_EC_KEY_PAIR_GEN, CKM_RSA_PKCS_KEY_PAIR_GEN};
use pki_logger::log_init;

use super::test_helpers::{SLOT_ID, key_control, new_slot, root_ca, seed_key_pair};
use crate::{
    EmulatorDevice, HError, HResult, NewObjectControl, ObjectIdentifier, Slot, SlotDevice,
    cache::SlotCache, details::refresh_summary,
};

fn report(slot: &Slot<EmulatorDevice>, verbose: bool) -> HResult<String> {
    let mut out = Vec::new();
    slot.show_details(&mut out, verbose)?;
    String::from_utf8(out).map_err(|e| HError::Default(e.to_string()))
}

#[test]
fn details_list_identities_then_bare_certificates() -> HResult<()> {
    log_init(None);
    let root = root_ca("Root CA")?;
    let device = EmulatorDevice::new(SLOT_ID);
    device.add_certificate(
        &root.cert,
        &NewObjectControl::new(Some(vec![0x0a]), Some("root".to_owned())),
    )?;
    seed_key_pair(&device, &[0x01], "signer", &root)?;
    let slot = new_slot(device, false)?;
    slot.generate_secret_key(CKK_AES, 128, &key_control(&[0x02], "aes"))?;

    let expected = "\t1. aes (id: 02)\n\
                    \t\tSymmetric key\n\
                    \t2. signer (id: 01)\n\
                    \t\tAlgorithm: EC\n\
                    \t\tCertificate[0]: CN=signer,O=Test\n\
                    \t\tCertificate[1]: CN=Root CA,O=Test\n\
                    \tCert-1. root (id: 0a)\n\
                    \t\tCertificate: CN=Root CA,O=Test\n";
    assert_eq!(report(&slot, false)?, expected);
    Ok(())
}

#[test]
fn verbose_details_show_certificate_fields() -> HResult<()> {
    log_init(None);
    let root = root_ca("Root CA")?;
    let device = EmulatorDevice::new(SLOT_ID);
    device.add_certificate(
        &root.cert,
        &NewObjectControl::new(Some(vec![0x0a]), Some("root".to_owned())),
    )?;
    let slot = new_slot(device, false)?;

    let details = report(&slot, true)?;
    assert!(details.starts_with("\tCert-1. root (id: 0a)\n\t\tCertificate: \n"));
    assert!(details.contains("\t\t\tSubject: CN=Root CA,O=Test\n"));
    assert!(details.contains("\t\t\tIssuer: CN=Root CA,O=Test\n"));
    assert!(details.contains(&format!("\t\t\tSerial: 0x{}\n", root.cert.serial_hex())));
    assert!(details.ends_with(&format!("\t\t\tSHA1 Sum: {}\n", root.cert.sha1_hex())));
    Ok(())
}

#[test]
fn empty_slot_writes_nothing() -> HResult<()> {
    let slot = new_slot(EmulatorDevice::new(SLOT_ID), false)?;
    assert!(report(&slot, true)?.is_empty());
    Ok(())
}

#[test]
fn refresh_summary_lists_everything_sorted() -> HResult<()> {
    let root = root_ca("Root CA")?;
    let mut cache = SlotCache::default();
    cache.mechanisms.insert(CKM_EC_KEY_PAIR_GEN);
    cache.mechanisms.insert(CKM_RSA_PKCS_KEY_PAIR_GEN);
    cache.certificates.insert(
        ObjectIdentifier::with_id_and_label(&[0x0a], "root"),
        root.cert.into(),
    );

    let summary = refresh_summary("softhsm", &SLOT_ID, &cache, &[]);
    assert_eq!(
        summary,
        "initialized module softhsm, slot (index = 0, id = 1)\n\
         supported mechanisms:\n\
         \tCKM_RSA_PKCS_KEY_PAIR_GEN\n\
         \tCKM_EC_KEY_PAIR_GEN\n\
         \n\
         supported by device but ignored mechanisms:\n\
         \tNONE\n\
         1 certificates:\n\
         \t(id = 0a, label = root), subject='CN=Root CA,O=Test'\n\
         0 identities:\n"
    );

    let summary = refresh_summary(
        "softhsm",
        &SLOT_ID,
        &SlotCache::default(),
        &[CKM_EC_KEY_PAIR_GEN, CKM_RSA_PKCS_KEY_PAIR_GEN],
    );
    assert!(summary.contains(
        "ignored mechanisms:\n\tCKM_RSA_PKCS_KEY_PAIR_GEN\n\tCKM_EC_KEY_PAIR_GEN\n"
    ));
    Ok(())
}

#[test]
fn subjects_are_rendered_past_interior_nul() -> HResult<()> {
    let ca = root_ca("Root\0CA")?;
    assert_eq!(ca.cert.common_name().as_deref(), Some("Root\0CA"));
    assert_eq!(ca.cert.subject(), "CN=Root\0CA,O=Test");
    Ok(())
}
