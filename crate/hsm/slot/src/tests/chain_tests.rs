use pki_logger::log_init;

use super::test_helpers::{SLOT_ID, TestCa, ec_key, issue, public_key, root_ca, sub_ca};
use crate::{
    HError, HResult, Identity, IdentityId, ObjectIdentifier,
    cache::SlotCache,
    chain::build_cert_path,
};

#[test]
fn chain_is_built_leaf_to_root() -> HResult<()> {
    log_init(None);
    let root = root_ca("Root CA")?;
    let intermediate = sub_ca("Intermediate CA", &root)?;
    let key = ec_key()?;
    let leaf = issue("Leaf", &key, &intermediate)?;

    // pool order must not matter
    let pool = [&root.cert, &leaf, &intermediate.cert];
    let chain = build_cert_path(&leaf, pool);
    assert_eq!(chain, vec![leaf, intermediate.cert, root.cert]);
    Ok(())
}

#[test]
fn chain_stops_at_missing_issuer() -> HResult<()> {
    log_init(None);
    let root = root_ca("Root CA")?;
    let intermediate = sub_ca("Intermediate CA", &root)?;
    let key = ec_key()?;
    let leaf = issue("Leaf", &key, &intermediate)?;

    let chain = build_cert_path(&leaf, [&root.cert]);
    assert_eq!(chain, vec![leaf]);
    Ok(())
}

#[test]
fn self_signed_certificate_is_its_own_chain() -> HResult<()> {
    let root = root_ca("Root CA")?;
    assert!(root.cert.is_self_signed());
    let chain = build_cert_path(&root.cert, [&root.cert]);
    assert_eq!(chain, vec![root.cert]);
    Ok(())
}

#[test]
fn cross_certified_issuers_do_not_loop() -> HResult<()> {
    log_init(None);
    let a = root_ca("CA A")?;
    let b = root_ca("CA B")?;
    // A certified by B and B certified by A
    let a_by_b = TestCa {
        cert: issue("CA A", &a.key, &b)?,
        key: a.key,
    };
    let b_by_a = issue("CA B", &b.key, &a_by_b)?;
    assert!(!a_by_b.cert.is_self_signed());
    assert!(b_by_a.issues(&a_by_b.cert));

    let key = ec_key()?;
    let leaf = issue("Leaf", &key, &a_by_b)?;
    let chain = build_cert_path(&leaf, [&a_by_b.cert, &b_by_a]);
    assert_eq!(chain, vec![leaf, a_by_b.cert.clone(), b_by_a]);
    Ok(())
}

#[test]
fn chain_update_is_idempotent() -> HResult<()> {
    log_init(None);
    let root = root_ca("Root CA")?;
    let intermediate = sub_ca("Intermediate CA", &root)?;
    let key = ec_key()?;
    let leaf = issue("Leaf", &key, &intermediate)?;

    let key_id = ObjectIdentifier::with_id_and_label(&[1], "leaf");
    let identity = Identity::key_pair(
        IdentityId::new(SLOT_ID, key_id.clone(), None, Some(key_id.clone())),
        public_key(&key)?,
        vec![leaf.clone()],
    )?;

    let mut cache = SlotCache::default();
    cache
        .certificates
        .insert(key_id.clone(), leaf.clone().into());
    cache.certificates.insert(
        ObjectIdentifier::with_id_and_label(&[2], "intermediate"),
        intermediate.cert.clone().into(),
    );
    cache.certificates.insert(
        ObjectIdentifier::with_id_and_label(&[3], "root"),
        root.cert.clone().into(),
    );
    cache.identities.insert(key_id.clone(), identity);

    assert_eq!(cache.update_ca_certs_of_identities(), 1);
    assert_eq!(cache.update_ca_certs_of_identities(), 0);
    let identity = cache
        .identities
        .get(&key_id)
        .ok_or_else(|| HError::Default("identity lost".to_owned()))?;
    assert_eq!(
        identity.certificate_chain(),
        &[leaf, intermediate.cert, root.cert]
    );
    Ok(())
}

#[test]
fn identity_refuses_foreign_certificate() -> HResult<()> {
    let root = root_ca("Root CA")?;
    let key = ec_key()?;
    let other_key = ec_key()?;
    let cert = issue("Other", &other_key, &root)?;

    let key_id = ObjectIdentifier::with_id_and_label(&[1], "key");
    let result = Identity::key_pair(
        IdentityId::new(SLOT_ID, key_id.clone(), None, None),
        public_key(&key)?,
        vec![cert.clone()],
    );
    assert!(matches!(result, Err(HError::Certificate(_))));

    let mut secret = Identity::secret_key(IdentityId::new(SLOT_ID, key_id, None, None));
    assert!(secret.set_certificate_chain(vec![cert]).is_err());
    assert!(secret.set_certificate_chain(Vec::new()).is_ok());
    Ok(())
}
