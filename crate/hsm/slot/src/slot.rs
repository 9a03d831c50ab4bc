use std::{
    io::Write,
    sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use openssl::bn::{BigNum, BigNumRef};
use pkcs11_sys::{
    CK_KEY_TYPE, CK_MECHANISM_TYPE, CKM_DSA_KEY_PAIR_GEN, CKM_EC_KEY_PAIR_GEN,
    CKM_RSA_PKCS_KEY_PAIR_GEN,
};
use pki_logger::{Level, enabled, info, warn};
use zeroize::Zeroizing;

use crate::{
    Certificate, HError, HResult, Identity, IdentityId, NewKeyControl, NewObjectControl,
    ObjectIdentifier, SlotConfig, SlotIdentifier,
    cache::SlotCache,
    certificate::public_keys_equal,
    curves::resolve_curve,
    details::{refresh_summary, render_details},
    device::SlotDevice,
    dsa_params::DsaParameterCache,
    mechanism::{CKM_VENDOR_SM2_KEY_PAIR_GEN, MechanismFilter},
};

/// Public exponent used when none is requested
pub const DEFAULT_RSA_PUBLIC_EXPONENT: u32 = 65537;

/// Label base of certificates whose subject has no common name
const DEFAULT_CERT_LABEL: &str = "certificate";

/// One slot of a PKCS#11 module.
///
/// The slot caches the permitted mechanisms, the certificates and the identities found on the
/// token. The device remains the source of truth: `refresh` rebuilds the cache from a full
/// scan and installs it in one swap, mutating operations update the device first (removals
/// update the cache first) and then the cache.
///
/// Readers only take the cache read lock. Mutating operations are serialized among
/// themselves so that the checks they perform against the cache still hold when the
/// device is called.
pub struct Slot<D: SlotDevice> {
    module_name: String,
    slot_id: SlotIdentifier,
    read_only: bool,
    mechanism_filter: Arc<dyn MechanismFilter>,
    device: D,
    dsa_parameters: Arc<DsaParameterCache>,
    cache: RwLock<SlotCache>,
    mutation: Mutex<()>,
}

impl<D: SlotDevice> Slot<D> {
    /// Create a slot with an empty cache; call [`Slot::refresh`] to load the token content
    pub fn new(
        module_name: impl Into<String>,
        slot_id: SlotIdentifier,
        read_only: bool,
        mechanism_filter: Arc<dyn MechanismFilter>,
        device: D,
    ) -> HResult<Self> {
        let module_name = module_name.into();
        if module_name.trim().is_empty() {
            return Err(HError::InvalidArgument(
                "the module name must not be blank".to_owned(),
            ));
        }
        Ok(Self {
            module_name,
            slot_id,
            read_only,
            mechanism_filter,
            device,
            dsa_parameters: DsaParameterCache::global(),
            cache: RwLock::new(SlotCache::default()),
            mutation: Mutex::new(()),
        })
    }

    /// Create the slot described by the configuration and load the token content
    pub fn open(config: &SlotConfig, device: D) -> HResult<Self> {
        let slot = Self::new(
            config.module_name.clone(),
            config.slot,
            config.read_only,
            Arc::new(config.mechanism_filter()?),
            device,
        )?;
        slot.refresh()?;
        Ok(slot)
    }

    /// Use another DSA parameter cache than the process-wide one
    #[must_use]
    pub fn with_dsa_parameter_cache(mut self, cache: Arc<DsaParameterCache>) -> Self {
        self.dsa_parameters = cache;
        self
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub const fn slot_id(&self) -> &SlotIdentifier {
        &self.slot_id
    }

    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub const fn device(&self) -> &D {
        &self.device
    }

    fn read_cache(&self) -> HResult<RwLockReadGuard<'_, SlotCache>> {
        self.cache
            .read()
            .map_err(|_| HError::Default("Failed to acquire read lock on the slot cache".to_owned()))
    }

    fn write_cache(&self) -> HResult<RwLockWriteGuard<'_, SlotCache>> {
        self.cache.write().map_err(|_| {
            HError::Default("Failed to acquire write lock on the slot cache".to_owned())
        })
    }

    fn lock_mutation(&self) -> HResult<MutexGuard<'_, ()>> {
        self.mutation
            .lock()
            .map_err(|_| HError::Default("Failed to acquire lock on slot mutations".to_owned()))
    }

    /// Reload mechanisms, certificates and identities from the device.
    ///
    /// The new view is computed completely, CA chains included, before it replaces the
    /// current one; a failed scan leaves the current view untouched.
    pub fn refresh(&self) -> HResult<()> {
        let _mutation = self.lock_mutation()?;
        self.refresh_locked()
    }

    fn refresh_locked(&self) -> HResult<()> {
        let scanned = self.device.scan()?;

        let mut cache = SlotCache::default();
        let mut ignored_mechanisms = Vec::new();
        for mechanism in scanned.mechanisms {
            if self.mechanism_filter.is_permitted(&self.slot_id, mechanism) {
                cache.mechanisms.insert(mechanism);
            } else {
                ignored_mechanisms.push(mechanism);
            }
        }
        cache.certificates = scanned.certificates;
        for (key_id, identity) in scanned.identities {
            if identity.id().slot() == &self.slot_id {
                cache.identities.insert(key_id, identity);
            } else {
                warn!(
                    "ignoring identity {} reported for another slot than {}",
                    identity.id(),
                    self.slot_id
                );
            }
        }
        cache.update_ca_certs_of_identities();

        if enabled!(Level::INFO) {
            info!(
                "{}",
                refresh_summary(
                    &self.module_name,
                    &self.slot_id,
                    &cache,
                    &ignored_mechanisms
                )
            );
        }

        *self.write_cache()? = cache;
        Ok(())
    }

    /// Sorted snapshot of the permitted mechanisms supported by the device
    pub fn mechanisms(&self) -> HResult<Vec<CK_MECHANISM_TYPE>> {
        Ok(self.read_cache()?.mechanisms.iter().copied().collect())
    }

    pub fn supports_mechanism(&self, mechanism: CK_MECHANISM_TYPE) -> HResult<bool> {
        Ok(self.read_cache()?.mechanisms.contains(&mechanism))
    }

    pub fn assert_mechanism_supported(&self, mechanism: CK_MECHANISM_TYPE) -> HResult<()> {
        if self.supports_mechanism(mechanism)? {
            Ok(())
        } else {
            Err(HError::UnsupportedMechanism {
                mechanism,
                slot: self.slot_id,
            })
        }
    }

    /// Sorted identifiers of the keys of all identities
    pub fn identity_ids(&self) -> HResult<Vec<ObjectIdentifier>> {
        Ok(self.read_cache()?.identities.keys().cloned().collect())
    }

    /// Sorted identifiers of all certificates
    pub fn cert_ids(&self) -> HResult<Vec<ObjectIdentifier>> {
        Ok(self.read_cache()?.certificates.keys().cloned().collect())
    }

    pub fn has_identity(&self, key_id: &ObjectIdentifier) -> HResult<bool> {
        Ok(self.read_cache()?.identities.contains_key(key_id))
    }

    pub fn get_identity(&self, key_id: &ObjectIdentifier) -> HResult<Identity> {
        self.read_cache()?
            .identities
            .get(key_id)
            .cloned()
            .ok_or_else(|| {
                HError::UnknownEntity(format!("identity {key_id} on slot {}", self.slot_id))
            })
    }

    /// The first certificate whose identifier carries `id`
    pub fn cert_for_id(&self, id: &[u8]) -> HResult<Option<Certificate>> {
        Ok(self.read_cache()?.cert_for_id(id).cloned())
    }

    /// Find an identity or certificate identifier. When both are given, the label decides.
    pub fn find_object_id(
        &self,
        id: Option<&[u8]>,
        label: Option<&str>,
    ) -> HResult<Option<ObjectIdentifier>> {
        Ok(self.read_cache()?.find_object_id(id, label).cloned())
    }

    /// Find the identity of a key. When both are given, the label decides.
    pub fn find_identity_id(
        &self,
        key_id: Option<&[u8]>,
        key_label: Option<&str>,
    ) -> HResult<Option<IdentityId>> {
        Ok(self.read_cache()?.find_identity_id(key_id, key_label).cloned())
    }

    /// Fail with `DuplicateEntity` when an identity or certificate uses the id or the label
    pub fn assert_no_duplicate(&self, id: Option<&[u8]>, label: Option<&str>) -> HResult<()> {
        self.read_cache()?.assert_no_duplicate(id, label)
    }

    /// A label derived from `base` that no object of the slot uses
    pub fn generate_label(&self, base: &str) -> HResult<String> {
        Ok(self.read_cache()?.generate_label(base))
    }

    pub fn exists_identity_for_id(&self, id: &[u8]) -> HResult<bool> {
        Ok(self.read_cache()?.exists_identity_for_id(id))
    }

    pub fn exists_cert_for_id(&self, id: &[u8]) -> HResult<bool> {
        Ok(self.read_cache()?.exists_cert_for_id(id))
    }

    fn assert_writable(&self, operation: &str) -> HResult<()> {
        if self.read_only {
            return Err(HError::Permission(format!(
                "Writable operation {operation} is not permitted on the read-only slot {}",
                self.slot_id
            )));
        }
        Ok(())
    }

    /// Export the certificate of an identity, or else the certificate with this identifier
    pub fn export_cert(&self, object_id: &ObjectIdentifier) -> HResult<Certificate> {
        let cache = self.read_cache()?;
        if let Some(cert) = cache
            .identities
            .get(object_id)
            .and_then(Identity::certificate)
        {
            return Ok(cert.clone());
        }
        cache
            .certificates
            .get(object_id)
            .map(|cert| cert.certificate().clone())
            .ok_or_else(|| {
                HError::UnknownEntity(format!("certificate {object_id} on slot {}", self.slot_id))
            })
    }

    /// Remove the certificates with this identifier, detaching it from its identity if any
    pub fn remove_certs(&self, object_id: &ObjectIdentifier) -> HResult<()> {
        self.assert_writable("remove_certs")?;
        let _mutation = self.lock_mutation()?;
        {
            let mut cache = self.write_cache()?;
            let owner = cache
                .identities
                .iter()
                .find(|(_, identity)| identity.id().cert_id() == Some(object_id))
                .map(|(key_id, _)| key_id.clone());
            if let Some(key_id) = owner {
                cache.certificates.remove(object_id);
                if let Some(identity) = cache.identities.get_mut(&key_id) {
                    identity.clear_certificate_chain();
                    identity.id_mut().set_cert_id(None);
                }
            } else if cache.certificates.remove(object_id).is_none() {
                return Err(HError::UnknownEntity(format!(
                    "certificate {object_id} on slot {}",
                    self.slot_id
                )));
            }
            cache.update_ca_certs_of_identities();
        }
        self.device.remove_certificates(object_id)?;
        info!("removed certificate {object_id}");
        Ok(())
    }

    /// Remove the key, public key and certificate of an identity
    pub fn remove_identity(&self, identity_id: &IdentityId) -> HResult<()> {
        self.assert_writable("remove_identity")?;
        if identity_id.slot() != &self.slot_id {
            return Err(HError::InvalidArgument(format!(
                "identity {identity_id} does not belong to slot {}",
                self.slot_id
            )));
        }
        let _mutation = self.lock_mutation()?;
        // absent from the cache is fine: the device decides whether the objects exist
        self.write_cache()?.remove_identity(identity_id.key_id());
        self.device.remove_identity(identity_id)?;
        info!("removed identity {identity_id}");
        Ok(())
    }

    /// Remove the identity of the given key
    pub fn remove_identity_by_key_id(&self, key_id: &ObjectIdentifier) -> HResult<()> {
        self.assert_writable("remove_identity_by_key_id")?;
        let _mutation = self.lock_mutation()?;
        let identity_id = self.write_cache()?.remove_identity(key_id).ok_or_else(|| {
            HError::UnknownEntity(format!("identity {key_id} on slot {}", self.slot_id))
        })?;
        self.device.remove_identity(&identity_id)?;
        info!("removed identity {identity_id}");
        Ok(())
    }

    /// Store a certificate not bound to a key.
    ///
    /// Without a label in `control`, one is derived from the subject common name.
    pub fn add_cert(
        &self,
        certificate: &Certificate,
        control: &NewObjectControl,
    ) -> HResult<ObjectIdentifier> {
        self.assert_writable("add_cert")?;
        let _mutation = self.lock_mutation()?;
        let control = {
            let cache = self.read_cache()?;
            let control = match control.label() {
                Some(_) => control.clone(),
                None => {
                    let base = certificate
                        .common_name()
                        .unwrap_or_else(|| DEFAULT_CERT_LABEL.to_owned());
                    control.clone().with_label(cache.generate_label(&base))
                }
            };
            cache.assert_no_duplicate(control.id(), control.label())?;
            control
        };

        let object_id = self.device.add_certificate(certificate, &control)?;
        {
            let mut cache = self.write_cache()?;
            cache
                .certificates
                .insert(object_id.clone(), certificate.clone().into());
            cache.update_ca_certs_of_identities();
        }
        info!("added certificate {object_id}");
        Ok(object_id)
    }

    fn add_identity(&self, identity: Identity) -> HResult<IdentityId> {
        let identity_id = identity.id().clone();
        self.write_cache()?.add_identity(&self.slot_id, identity)?;
        Ok(identity_id)
    }

    pub fn generate_secret_key(
        &self,
        key_type: CK_KEY_TYPE,
        key_size: u32,
        control: &NewKeyControl,
    ) -> HResult<IdentityId> {
        self.assert_writable("generate_secret_key")?;
        let _mutation = self.lock_mutation()?;
        self.read_cache()?
            .assert_no_duplicate(control.id(), control.label())?;
        let identity = self
            .device
            .generate_secret_key(key_type, key_size, control)?;
        let identity_id = self.add_identity(identity)?;
        info!("generated secret key {identity_id}");
        Ok(identity_id)
    }

    /// Import a secret key generated outside the token
    pub fn import_secret_key(
        &self,
        key_type: CK_KEY_TYPE,
        key_value: &[u8],
        control: &NewKeyControl,
    ) -> HResult<ObjectIdentifier> {
        self.assert_writable("import_secret_key")?;
        let key_value = Zeroizing::new(key_value.to_vec());
        let _mutation = self.lock_mutation()?;
        self.read_cache()?
            .assert_no_duplicate(control.id(), control.label())?;
        let identity = self
            .device
            .import_secret_key(key_type, &key_value, control)?;
        let identity_id = self.add_identity(identity)?;
        let key_id = identity_id.key_id().clone();
        info!("created secret key {key_id}");
        Ok(key_id)
    }

    /// Shared steps of key pair generation: uniqueness, mechanism support, device call
    /// and cache insertion
    fn generate_keypair<F>(
        &self,
        algorithm: &str,
        mechanism: CK_MECHANISM_TYPE,
        control: &NewKeyControl,
        generate: F,
    ) -> HResult<IdentityId>
    where
        F: FnOnce(&D) -> HResult<Identity>,
    {
        let _mutation = self.lock_mutation()?;
        {
            let cache = self.read_cache()?;
            cache.assert_no_duplicate(control.id(), control.label())?;
            if !cache.mechanisms.contains(&mechanism) {
                return Err(HError::UnsupportedMechanism {
                    mechanism,
                    slot: self.slot_id,
                });
            }
        }
        let identity = generate(&self.device)?;
        let identity_id = self.add_identity(identity)?;
        info!("generated {algorithm} keypair {identity_id}");
        Ok(identity_id)
    }

    /// Generate an RSA key pair of `key_size` bits, a multiple of 1024.
    /// The public exponent defaults to 65537.
    pub fn generate_rsa_keypair(
        &self,
        key_size: u32,
        public_exponent: Option<&BigNumRef>,
        control: &NewKeyControl,
    ) -> HResult<IdentityId> {
        self.assert_writable("generate_rsa_keypair")?;
        assert_key_size("key size", key_size)?;
        let public_exponent = match public_exponent {
            Some(e) => e.to_owned()?,
            None => BigNum::from_u32(DEFAULT_RSA_PUBLIC_EXPONENT)?,
        };
        self.generate_keypair("RSA", CKM_RSA_PKCS_KEY_PAIR_GEN, control, |device| {
            device.generate_rsa_keypair(key_size, &public_exponent, control)
        })
    }

    /// Generate a DSA key pair with domain parameters of the given bit lengths
    pub fn generate_dsa_keypair(
        &self,
        p_length: u32,
        q_length: u32,
        control: &NewKeyControl,
    ) -> HResult<IdentityId> {
        self.assert_writable("generate_dsa_keypair")?;
        assert_key_size("bit length of P", p_length)?;
        let params = self.dsa_parameters.get(p_length, q_length)?;
        self.generate_keypair("DSA", CKM_DSA_KEY_PAIR_GEN, control, |device| {
            device.generate_dsa_keypair(&params.p, &params.q, &params.g, control)
        })
    }

    /// Generate a DSA key pair with explicit domain parameters
    pub fn generate_dsa_keypair_with_params(
        &self,
        p: &BigNumRef,
        q: &BigNumRef,
        g: &BigNumRef,
        control: &NewKeyControl,
    ) -> HResult<IdentityId> {
        self.assert_writable("generate_dsa_keypair")?;
        self.generate_keypair("DSA", CKM_DSA_KEY_PAIR_GEN, control, |device| {
            device.generate_dsa_keypair(p, q, g, control)
        })
    }

    /// Generate an EC key pair on a curve given by name or object identifier
    pub fn generate_ec_keypair(
        &self,
        curve_name_or_oid: &str,
        control: &NewKeyControl,
    ) -> HResult<IdentityId> {
        self.assert_writable("generate_ec_keypair")?;
        let curve_oid = resolve_curve(curve_name_or_oid)?;
        self.generate_keypair("EC", CKM_EC_KEY_PAIR_GEN, control, |device| {
            device.generate_ec_keypair(&curve_oid, control)
        })
    }

    pub fn generate_sm2_keypair(&self, control: &NewKeyControl) -> HResult<IdentityId> {
        self.assert_writable("generate_sm2_keypair")?;
        self.generate_keypair("SM2", CKM_VENDOR_SM2_KEY_PAIR_GEN, control, |device| {
            device.generate_sm2_keypair(control)
        })
    }

    /// Replace the certificate of a key pair. The certificate must certify the key's public key.
    pub fn update_certificate(
        &self,
        key_id: &ObjectIdentifier,
        certificate: &Certificate,
    ) -> HResult<()> {
        self.assert_writable("update_certificate")?;
        let _mutation = self.lock_mutation()?;
        {
            let cache = self.read_cache()?;
            let identity = cache.identities.get(key_id).ok_or_else(|| {
                HError::UnknownEntity(format!("could not find private key {key_id}"))
            })?;
            let new_public_key = certificate.public_key()?;
            if !identity
                .public_key()
                .is_some_and(|public_key| public_keys_equal(public_key, &new_public_key))
            {
                return Err(HError::Token(format!(
                    "the given certificate is not for key {key_id}"
                )));
            }
        }

        let cert_id = self.device.update_certificate(key_id, certificate)?;
        {
            let mut cache = self.write_cache()?;
            let old_cert_id = match cache.identities.get_mut(key_id) {
                Some(identity) => {
                    identity.set_certificate_chain(vec![certificate.clone()])?;
                    let old_cert_id = identity.id().cert_id().cloned();
                    identity.id_mut().set_cert_id(Some(cert_id.clone()));
                    old_cert_id
                }
                None => None,
            };
            if let Some(old_cert_id) = old_cert_id {
                cache.certificates.remove(&old_cert_id);
            }
            cache
                .certificates
                .insert(cert_id, certificate.clone().into());
            cache.update_ca_certs_of_identities();
        }
        info!("updated certificate for key {key_id}");
        Ok(())
    }

    /// Remove every object matching the id and/or label; returns how many were removed.
    /// The cache is reloaded when objects were removed.
    pub fn remove_objects(&self, id: Option<&[u8]>, label: Option<&str>) -> HResult<usize> {
        self.assert_writable("remove_objects")?;
        if id.is_none() && label.is_none() {
            return Err(HError::InvalidArgument(
                "at least one of id and label must be given".to_owned(),
            ));
        }
        let _mutation = self.lock_mutation()?;
        let removed = self.device.remove_objects(id, label)?;
        info!(
            "removed {removed} objects with id {} and label {}",
            id.map_or_else(|| "null".to_owned(), hex::encode),
            label.unwrap_or("null")
        );
        if removed > 0 {
            self.refresh_locked()?;
        }
        Ok(removed)
    }

    /// Write a report of all identities, then of the certificates not bound to an identity
    pub fn show_details<W: Write>(&self, writer: &mut W, verbose: bool) -> HResult<()> {
        let cache = self.read_cache()?;
        let report = render_details(&cache, verbose);
        drop(cache);
        if !report.is_empty() {
            writer.write_all(report.as_bytes())?;
        }
        Ok(())
    }

    /// Release the device. Failures are logged.
    pub fn close(&self) {
        if let Err(e) = self.device.close() {
            warn!(
                "error closing module {}, slot {}: {e}",
                self.module_name, self.slot_id
            );
        }
    }
}

fn assert_key_size(name: &str, bits: u32) -> HResult<()> {
    if bits < 1024 {
        return Err(HError::InvalidArgument(format!(
            "{name} must not be less than 1024: {bits}"
        )));
    }
    if bits % 1024 != 0 {
        return Err(HError::InvalidArgument(format!(
            "{name} is not multiple of 1024: {bits}"
        )));
    }
    Ok(())
}
