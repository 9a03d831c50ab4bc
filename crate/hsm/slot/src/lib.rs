//! Slot abstraction over PKCS#11 tokens.
//!
//! A [`Slot`] keeps a cache of the mechanisms, certificates and identities of one token slot,
//! builds the CA chain of every identity from the certificates on the token, enforces the
//! configured mechanism policy and label uniqueness, and delegates object creation and
//! removal to a [`SlotDevice`].

mod error;

pub use certificate::{Certificate, key_algorithm, public_keys_equal};
pub use config::{MechanismFilterConfig, SlotConfig, SlotIdFilterConfig};
pub use control::{NewKeyControl, NewObjectControl};
pub use curves::{SM2P256V1_OID, curve_name, resolve_curve};
pub use device::SlotDevice;
pub use dsa_params::{DsaDomainParameters, DsaParameterCache, SUPPORTED_Q_LENGTHS};
pub use emulator::EmulatorDevice;
pub use error::{HError, HResult};
pub use identifier::{IdentityId, ObjectIdentifier, SlotIdentifier};
pub use identity::{BareCertificate, Identity};
pub use mechanism::{
    CKM_VENDOR_SM2_KEY_PAIR_GEN, CKM_VENDOR_SM2_SM3, ConfiguredMechanismFilter, MechanismFilter,
    PermitAllMechanisms, SingleMechanismFilter, SlotIdFilter, mechanism_name, parse_mechanism,
};
pub use refresh::SlotRefreshResult;
pub use slot::{DEFAULT_RSA_PUBLIC_EXPONENT, Slot};

mod cache;
mod certificate;
mod chain;
mod config;
mod control;
mod curves;
mod details;
mod device;
mod dsa_params;
mod emulator;
mod identifier;
mod identity;
mod mechanism;
mod refresh;
mod slot;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic_in_result_fn)]
mod tests;
