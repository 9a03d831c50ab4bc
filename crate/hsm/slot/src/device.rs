//! Device primitives: the operations a token binding performs on the hardware.
//!
//! A `Slot` validates requests and maintains its cache; the actual object
//! creation, removal and enumeration are delegated to one implementation of
//! [`SlotDevice`] per PKCS#11 binding.

use openssl::bn::BigNumRef;
use pkcs11_sys::CK_KEY_TYPE;

use crate::{
    Certificate, HResult, Identity, IdentityId, NewKeyControl, NewObjectControl,
    ObjectIdentifier, SlotRefreshResult,
};

/// Operations on the objects of one token slot.
///
/// Implementations report device failures as `HError::Token`.
/// Every method may block on the device.
pub trait SlotDevice: Send + Sync {
    /// Enumerate the mechanisms and all objects of the token
    fn scan(&self) -> HResult<SlotRefreshResult>;

    /// Generate a secret key of `key_type` and `key_size` bits
    fn generate_secret_key(
        &self,
        key_type: CK_KEY_TYPE,
        key_size: u32,
        control: &NewKeyControl,
    ) -> HResult<Identity>;

    /// Import a secret key whose value was generated outside the token
    fn import_secret_key(
        &self,
        key_type: CK_KEY_TYPE,
        key_value: &[u8],
        control: &NewKeyControl,
    ) -> HResult<Identity>;

    fn generate_rsa_keypair(
        &self,
        key_size: u32,
        public_exponent: &BigNumRef,
        control: &NewKeyControl,
    ) -> HResult<Identity>;

    fn generate_dsa_keypair(
        &self,
        p: &BigNumRef,
        q: &BigNumRef,
        g: &BigNumRef,
        control: &NewKeyControl,
    ) -> HResult<Identity>;

    /// Generate an EC key pair on the curve with the given dotted object identifier
    fn generate_ec_keypair(&self, curve_oid: &str, control: &NewKeyControl) -> HResult<Identity>;

    fn generate_sm2_keypair(&self, control: &NewKeyControl) -> HResult<Identity>;

    /// Store a certificate; the control always carries a label
    fn add_certificate(
        &self,
        certificate: &Certificate,
        control: &NewObjectControl,
    ) -> HResult<ObjectIdentifier>;

    /// Remove the certificate objects with the given identifier
    fn remove_certificates(&self, object_id: &ObjectIdentifier) -> HResult<()>;

    /// Remove every object of the identity
    fn remove_identity(&self, identity_id: &IdentityId) -> HResult<()>;

    /// Replace the certificate of the key; returns the identifier of the stored certificate
    fn update_certificate(
        &self,
        key_id: &ObjectIdentifier,
        certificate: &Certificate,
    ) -> HResult<ObjectIdentifier>;

    /// Remove all objects matching the id and/or label; returns how many were removed
    fn remove_objects(&self, id: Option<&[u8]>, label: Option<&str>) -> HResult<usize>;

    /// Release the device resources (sessions, login)
    fn close(&self) -> HResult<()>;
}
