//! A software token implementing [`SlotDevice`] in memory.
//!
//! Keys are real `openssl` keys so that certificates issued for them verify.
//! Objects sharing the same id are correlated into identities on `scan`,
//! the way tokens initialized by PKCS#11 tooling lay out key pairs.

use std::{
    collections::BTreeSet,
    sync::{Mutex, MutexGuard, RwLock},
};

use openssl::{
    asn1::Asn1Object,
    bn::BigNumRef,
    dsa::Dsa,
    ec::{EcGroup, EcKey},
    nid::Nid,
    pkey::{PKey, Private, Public},
    rsa::Rsa,
};
use pkcs11_sys::{
    CK_KEY_TYPE, CK_MECHANISM_TYPE, CKM_AES_KEY_GEN, CKM_DSA_KEY_PAIR_GEN, CKM_DSA_SHA256,
    CKM_EC_KEY_PAIR_GEN, CKM_ECDSA_SHA256, CKM_RSA_PKCS, CKM_RSA_PKCS_KEY_PAIR_GEN,
    CKM_SHA256_RSA_PKCS,
};
use pki_logger::{debug, trace, warn};
use rand::{TryRngCore, rngs::OsRng};
use zeroize::Zeroizing;

use crate::{
    Certificate, HError, HResult, Identity, IdentityId, NewKeyControl, NewObjectControl,
    ObjectIdentifier, SlotIdentifier, SlotRefreshResult,
    curves::SM2P256V1_OID,
    device::SlotDevice,
    hsm_ensure,
    mechanism::{CKM_VENDOR_SM2_KEY_PAIR_GEN, CKM_VENDOR_SM2_SM3},
};

const GENERATED_ID_LENGTH: usize = 8;

const DEFAULT_MECHANISMS: [CK_MECHANISM_TYPE; 10] = [
    CKM_RSA_PKCS_KEY_PAIR_GEN,
    CKM_RSA_PKCS,
    CKM_SHA256_RSA_PKCS,
    CKM_DSA_KEY_PAIR_GEN,
    CKM_DSA_SHA256,
    CKM_EC_KEY_PAIR_GEN,
    CKM_ECDSA_SHA256,
    CKM_AES_KEY_GEN,
    CKM_VENDOR_SM2_KEY_PAIR_GEN,
    CKM_VENDOR_SM2_SM3,
];

enum ObjectValue {
    PrivateKey {
        key: PKey<Private>,
        extractable: bool,
    },
    PublicKey(PKey<Public>),
    SecretKey {
        key_type: CK_KEY_TYPE,
        value: Zeroizing<Vec<u8>>,
        sensitive: bool,
    },
    /// DER encoding, as held in the value attribute of a certificate object
    Certificate(Vec<u8>),
}

impl ObjectValue {
    const fn class(&self) -> &'static str {
        match self {
            Self::PrivateKey { .. } => "private key",
            Self::PublicKey(_) => "public key",
            Self::SecretKey { .. } => "secret key",
            Self::Certificate(_) => "certificate",
        }
    }
}

struct TokenObject {
    id: Vec<u8>,
    label: String,
    value: ObjectValue,
}

impl TokenObject {
    fn object_id(&self) -> ObjectIdentifier {
        ObjectIdentifier::with_id_and_label(&self.id, &self.label)
    }

    fn is(&self, object_id: &ObjectIdentifier) -> bool {
        object_id.id() == Some(self.id.as_slice()) && object_id.label() == Some(self.label.as_str())
    }

    const fn is_private_key(&self) -> bool {
        matches!(self.value, ObjectValue::PrivateKey { .. })
    }

    const fn is_certificate(&self) -> bool {
        matches!(self.value, ObjectValue::Certificate(_))
    }
}

/// In-memory token of one slot
pub struct EmulatorDevice {
    slot_id: SlotIdentifier,
    mechanisms: RwLock<BTreeSet<CK_MECHANISM_TYPE>>,
    objects: Mutex<Vec<TokenObject>>,
    calls: Mutex<Vec<&'static str>>,
}

impl EmulatorDevice {
    /// An empty token reporting the key generation and signature mechanisms it implements
    #[must_use]
    pub fn new(slot_id: SlotIdentifier) -> Self {
        Self {
            slot_id,
            mechanisms: RwLock::new(BTreeSet::from(DEFAULT_MECHANISMS)),
            objects: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub const fn slot_id(&self) -> &SlotIdentifier {
        &self.slot_id
    }

    /// Replace the mechanisms the token reports on the next scan
    pub fn set_mechanisms(
        &self,
        mechanisms: impl IntoIterator<Item = CK_MECHANISM_TYPE>,
    ) -> HResult<()> {
        *self.mechanisms.write().map_err(|_| {
            HError::Default("Failed to acquire write lock on the emulated mechanisms".to_owned())
        })? = mechanisms.into_iter().collect();
        Ok(())
    }

    /// Names of the primitives invoked so far, oldest first
    pub fn calls(&self) -> HResult<Vec<&'static str>> {
        Ok(self.lock_calls()?.clone())
    }

    pub fn clear_calls(&self) -> HResult<()> {
        self.lock_calls()?.clear();
        Ok(())
    }

    /// Type and value of a stored secret key.
    ///
    /// The value of a sensitive key cannot be read: `Token` error.
    pub fn secret_key(
        &self,
        key_id: &ObjectIdentifier,
    ) -> HResult<Option<(CK_KEY_TYPE, Zeroizing<Vec<u8>>)>> {
        let objects = self.lock_objects()?;
        let Some((key_type, value, sensitive)) = objects.iter().find_map(|o| match &o.value {
            ObjectValue::SecretKey {
                key_type,
                value,
                sensitive,
            } if o.is(key_id) => Some((*key_type, value, *sensitive)),
            _ => None,
        }) else {
            return Ok(None);
        };
        hsm_ensure!(
            !sensitive,
            HError::Token(format!("the value of the sensitive key {key_id} cannot be read"))
        );
        Ok(Some((key_type, value.clone())))
    }

    /// Export a private key, which must have been created extractable
    pub fn export_private_key(&self, key_id: &ObjectIdentifier) -> HResult<PKey<Private>> {
        let objects = self.lock_objects()?;
        let (key, extractable) = objects
            .iter()
            .find_map(|o| match &o.value {
                ObjectValue::PrivateKey { key, extractable } if o.is(key_id) => {
                    Some((key, *extractable))
                }
                _ => None,
            })
            .ok_or_else(|| HError::UnknownEntity(format!("private key {key_id}")))?;
        hsm_ensure!(
            extractable,
            HError::Token(format!("the private key {key_id} is not extractable"))
        );
        Ok(key.clone())
    }

    /// Number of objects of all classes stored on the token
    pub fn object_count(&self) -> HResult<usize> {
        Ok(self.lock_objects()?.len())
    }

    fn lock_objects(&self) -> HResult<MutexGuard<'_, Vec<TokenObject>>> {
        self.objects
            .lock()
            .map_err(|_| HError::Default("Failed to lock the emulated token objects".to_owned()))
    }

    fn lock_calls(&self) -> HResult<MutexGuard<'_, Vec<&'static str>>> {
        self.calls
            .lock()
            .map_err(|_| HError::Default("Failed to lock the emulator call log".to_owned()))
    }

    fn record(&self, call: &'static str) -> HResult<()> {
        trace!("emulator: {call}");
        self.lock_calls()?.push(call);
        Ok(())
    }

    /// Id and label of a new object: the requested ones or generated ones.
    /// Objects of the same class may not share an id or a label.
    fn assign_id_and_label(
        objects: &[TokenObject],
        id: Option<&[u8]>,
        label: Option<&str>,
        class: &'static str,
    ) -> HResult<(Vec<u8>, String)> {
        let id = match id {
            Some(id) => id.to_vec(),
            None => random_id()?,
        };
        let label = label.map_or_else(|| hex::encode(&id), ToOwned::to_owned);
        let clash = objects
            .iter()
            .any(|o| o.value.class() == class && (o.id == id || o.label == label));
        if clash {
            return Err(HError::Token(format!(
                "a {class} with id {} or label {label} already exists",
                hex::encode(&id)
            )));
        }
        Ok((id, label))
    }

    fn store_key_pair(
        &self,
        private_key: PKey<Private>,
        control: &NewKeyControl,
    ) -> HResult<Identity> {
        let public_key = public_key_of(&private_key)?;
        let mut objects = self.lock_objects()?;
        let (id, label) =
            Self::assign_id_and_label(&objects, control.id(), control.label(), "private key")?;
        objects.push(TokenObject {
            id: id.clone(),
            label: label.clone(),
            value: ObjectValue::PublicKey(public_key.clone()),
        });
        objects.push(TokenObject {
            id: id.clone(),
            label: label.clone(),
            value: ObjectValue::PrivateKey {
                key: private_key,
                extractable: control.extractable,
            },
        });
        let object_id = ObjectIdentifier::with_id_and_label(&id, &label);
        debug!("emulator: stored key pair {object_id}");
        Identity::key_pair(
            IdentityId::new(self.slot_id, object_id.clone(), Some(object_id), None),
            public_key,
            Vec::new(),
        )
    }

    fn store_secret_key(
        &self,
        key_type: CK_KEY_TYPE,
        value: Zeroizing<Vec<u8>>,
        control: &NewKeyControl,
    ) -> HResult<Identity> {
        let mut objects = self.lock_objects()?;
        let (id, label) =
            Self::assign_id_and_label(&objects, control.id(), control.label(), "secret key")?;
        let object_id = ObjectIdentifier::with_id_and_label(&id, &label);
        objects.push(TokenObject {
            id,
            label,
            value: ObjectValue::SecretKey {
                key_type,
                value,
                sensitive: control.sensitive,
            },
        });
        debug!("emulator: stored secret key {object_id} of type {key_type:#x}");
        Ok(Identity::secret_key(IdentityId::new(
            self.slot_id,
            object_id,
            None,
            None,
        )))
    }

    fn generate_ec_key(&self, nid: Nid, control: &NewKeyControl) -> HResult<Identity> {
        let group = EcGroup::from_curve_name(nid)
            .map_err(|e| HError::Token(format!("unsupported curve {nid:?}: {e}")))?;
        let private_key = PKey::from_ec_key(EcKey::generate(&group)?)?;
        self.store_key_pair(private_key, control)
    }
}

fn random_id() -> HResult<Vec<u8>> {
    let mut id = vec![0_u8; GENERATED_ID_LENGTH];
    OsRng
        .try_fill_bytes(&mut id)
        .map_err(|e| HError::Token(format!("cannot generate a random object id: {e}")))?;
    Ok(id)
}

fn public_key_of(private_key: &PKey<Private>) -> HResult<PKey<Public>> {
    Ok(PKey::public_key_from_der(&private_key.public_key_to_der()?)?)
}

impl SlotDevice for EmulatorDevice {
    fn scan(&self) -> HResult<SlotRefreshResult> {
        self.record("scan")?;
        let mut result = SlotRefreshResult {
            mechanisms: self
                .mechanisms
                .read()
                .map_err(|_| {
                    HError::Default(
                        "Failed to acquire read lock on the emulated mechanisms".to_owned(),
                    )
                })?
                .clone(),
            ..SlotRefreshResult::default()
        };

        let objects = self.lock_objects()?;
        for object in objects.iter() {
            match &object.value {
                ObjectValue::Certificate(der) => {
                    result.add_certificate(object.object_id(), Certificate::from_der(der)?.into());
                }
                ObjectValue::SecretKey { .. } => {
                    result.add_identity(Identity::secret_key(IdentityId::new(
                        self.slot_id,
                        object.object_id(),
                        None,
                        None,
                    )));
                }
                ObjectValue::PrivateKey { key: private_key, .. } => {
                    let key_id = object.object_id();
                    let public_key = objects.iter().find_map(|o| match &o.value {
                        ObjectValue::PublicKey(pk) if o.id == object.id => {
                            Some((o.object_id(), pk.clone()))
                        }
                        _ => None,
                    });
                    let (public_key_id, public_key) = match public_key {
                        Some((public_key_id, public_key)) => (Some(public_key_id), public_key),
                        None => (None, public_key_of(private_key)?),
                    };
                    let cert = objects
                        .iter()
                        .find(|o| o.is_certificate() && o.id == object.id)
                        .and_then(|o| match &o.value {
                            ObjectValue::Certificate(der) => Some((o.object_id(), der)),
                            _ => None,
                        })
                        .map(|(id, der)| Certificate::from_der(der).map(|cert| (id, cert)))
                        .transpose()?;
                    let (cert_id, chain) = cert.map_or((None, Vec::new()), |(id, cert)| {
                        (Some(id), vec![cert])
                    });
                    let identity_id =
                        IdentityId::new(self.slot_id, key_id, public_key_id, cert_id);
                    match Identity::key_pair(identity_id.clone(), public_key.clone(), chain) {
                        Ok(identity) => result.add_identity(identity),
                        Err(e) => {
                            warn!("emulator: ignoring the certificate of {identity_id}: {e}");
                            result.add_identity(Identity::key_pair(
                                identity_id,
                                public_key,
                                Vec::new(),
                            )?);
                        }
                    }
                }
                ObjectValue::PublicKey(_) => {}
            }
        }
        Ok(result)
    }

    fn generate_secret_key(
        &self,
        key_type: CK_KEY_TYPE,
        key_size: u32,
        control: &NewKeyControl,
    ) -> HResult<Identity> {
        self.record("generate_secret_key")?;
        hsm_ensure!(
            key_size > 0 && key_size % 8 == 0,
            HError::Token(format!("invalid secret key size {key_size}"))
        );
        let length = usize::try_from(key_size / 8)
            .map_err(|e| HError::Token(format!("invalid secret key size {key_size}: {e}")))?;
        let mut value = Zeroizing::new(vec![0_u8; length]);
        OsRng
            .try_fill_bytes(&mut value)
            .map_err(|e| HError::Token(format!("cannot generate the secret key value: {e}")))?;
        self.store_secret_key(key_type, value, control)
    }

    fn import_secret_key(
        &self,
        key_type: CK_KEY_TYPE,
        key_value: &[u8],
        control: &NewKeyControl,
    ) -> HResult<Identity> {
        self.record("import_secret_key")?;
        hsm_ensure!(
            !key_value.is_empty(),
            HError::Token("empty secret key value".to_owned())
        );
        self.store_secret_key(key_type, Zeroizing::new(key_value.to_vec()), control)
    }

    fn generate_rsa_keypair(
        &self,
        key_size: u32,
        public_exponent: &BigNumRef,
        control: &NewKeyControl,
    ) -> HResult<Identity> {
        self.record("generate_rsa_keypair")?;
        let rsa = Rsa::generate_with_e(key_size, public_exponent)?;
        self.store_key_pair(PKey::from_rsa(rsa)?, control)
    }

    fn generate_dsa_keypair(
        &self,
        p: &BigNumRef,
        q: &BigNumRef,
        g: &BigNumRef,
        control: &NewKeyControl,
    ) -> HResult<Identity> {
        self.record("generate_dsa_keypair")?;
        let dsa = Dsa::from_pqg(p.to_owned()?, q.to_owned()?, g.to_owned()?)?.generate_key()?;
        self.store_key_pair(PKey::from_dsa(dsa)?, control)
    }

    fn generate_ec_keypair(&self, curve_oid: &str, control: &NewKeyControl) -> HResult<Identity> {
        self.record("generate_ec_keypair")?;
        if curve_oid == SM2P256V1_OID {
            return self.generate_ec_key(Nid::SM2, control);
        }
        let nid = Asn1Object::from_str(curve_oid)
            .map_err(|e| HError::Token(format!("invalid curve OID {curve_oid}: {e}")))?
            .nid();
        hsm_ensure!(
            nid != Nid::UNDEF,
            HError::Token(format!("unsupported curve {curve_oid}"))
        );
        self.generate_ec_key(nid, control)
    }

    fn generate_sm2_keypair(&self, control: &NewKeyControl) -> HResult<Identity> {
        self.record("generate_sm2_keypair")?;
        self.generate_ec_key(Nid::SM2, control)
    }

    fn add_certificate(
        &self,
        certificate: &Certificate,
        control: &NewObjectControl,
    ) -> HResult<ObjectIdentifier> {
        self.record("add_certificate")?;
        let mut objects = self.lock_objects()?;
        let (id, label) =
            Self::assign_id_and_label(&objects, control.id(), control.label(), "certificate")?;
        let object_id = ObjectIdentifier::with_id_and_label(&id, &label);
        objects.push(TokenObject {
            id,
            label,
            value: ObjectValue::Certificate(certificate.der().to_vec()),
        });
        Ok(object_id)
    }

    fn remove_certificates(&self, object_id: &ObjectIdentifier) -> HResult<()> {
        self.record("remove_certificates")?;
        self.lock_objects()?
            .retain(|o| !(o.is_certificate() && o.is(object_id)));
        Ok(())
    }

    fn remove_identity(&self, identity_id: &IdentityId) -> HResult<()> {
        self.record("remove_identity")?;
        let mut objects = self.lock_objects()?;
        let before = objects.len();
        objects.retain(|o| match &o.value {
            ObjectValue::PrivateKey { .. } | ObjectValue::SecretKey { .. } => {
                !o.is(identity_id.key_id())
            }
            ObjectValue::PublicKey(_) => identity_id.public_key_id().is_none_or(|id| !o.is(id)),
            ObjectValue::Certificate(_) => identity_id.cert_id().is_none_or(|id| !o.is(id)),
        });
        hsm_ensure!(
            objects.len() < before,
            HError::Token(format!("no object of identity {identity_id} on the token"))
        );
        Ok(())
    }

    fn update_certificate(
        &self,
        key_id: &ObjectIdentifier,
        certificate: &Certificate,
    ) -> HResult<ObjectIdentifier> {
        self.record("update_certificate")?;
        let mut objects = self.lock_objects()?;
        let (id, label) = objects
            .iter()
            .find(|o| o.is_private_key() && o.is(key_id))
            .map(|o| (o.id.clone(), o.label.clone()))
            .ok_or_else(|| HError::Token(format!("no private key {key_id} on the token")))?;
        objects.retain(|o| !(o.is_certificate() && o.id == id));
        let object_id = ObjectIdentifier::with_id_and_label(&id, &label);
        objects.push(TokenObject {
            id,
            label,
            value: ObjectValue::Certificate(certificate.der().to_vec()),
        });
        Ok(object_id)
    }

    fn remove_objects(&self, id: Option<&[u8]>, label: Option<&str>) -> HResult<usize> {
        self.record("remove_objects")?;
        let mut objects = self.lock_objects()?;
        let before = objects.len();
        objects.retain(|o| {
            !(id.is_none_or(|id| o.id == id) && label.is_none_or(|label| o.label == label))
        });
        Ok(before - objects.len())
    }

    fn close(&self) -> HResult<()> {
        self.record("close")
    }
}
