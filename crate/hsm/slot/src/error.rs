use pkcs11_sys::CK_MECHANISM_TYPE;
use thiserror::Error;

use crate::{SlotIdentifier, mechanism::mechanism_name};

pub type HResult<T> = Result<T, HError>;

#[derive(Error, Debug)]
pub enum HError {
    #[error("{0}")]
    Default(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error(
        "Unsupported mechanism {} on slot {slot}",
        mechanism_name(*.mechanism)
    )]
    UnsupportedMechanism {
        mechanism: CK_MECHANISM_TYPE,
        slot: SlotIdentifier,
    },

    #[error("Duplicate entity: {0}")]
    DuplicateEntity(String),

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("Token error: {0}")]
    Token(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("OpenSSL Error: {0}")]
    OpenSsl(String),
}

impl From<openssl::error::ErrorStack> for HError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        Self::OpenSsl(format!("Error: {e}. Details: {e:?}"))
    }
}

impl From<toml::de::Error> for HError {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}

/// Return early with an error if a condition is not satisfied.
///
/// This macro is equivalent to `if !$cond { return Err(From::from($err)); }`.
#[macro_export]
macro_rules! hsm_ensure {
    ($cond:expr, $msg:literal $(,)?) => {
        if !$cond {
            return ::core::result::Result::Err($crate::hsm_error!($msg));
        }
    };
    ($cond:expr, $err:expr $(,)?) => {
        if !$cond {
            return ::core::result::Result::Err($err);
        }
    };
    ($cond:expr, $fmt:expr, $($arg:tt)*) => {
        if !$cond {
            return ::core::result::Result::Err($crate::hsm_error!($fmt, $($arg)*));
        }
    };
}

/// Construct an HSM error from a string.
#[macro_export]
macro_rules! hsm_error {
    ($msg:literal) => {
        $crate::HError::Default(::core::format_args!($msg).to_string())
    };
    ($err:expr $(,)?) => ({
        $crate::HError::Default($err.to_string())
    });
    ($fmt:expr, $($arg:tt)*) => {
        $crate::HError::Default(::core::format_args!($fmt, $($arg)*).to_string())
    };
}

/// Return early with an error.
#[macro_export]
macro_rules! hsm_bail {
    ($msg:literal) => {
        return ::core::result::Result::Err($crate::hsm_error!($msg))
    };
    ($err:expr $(,)?) => {
        return ::core::result::Result::Err($err)
    };
    ($fmt:expr, $($arg:tt)*) => {
        return ::core::result::Result::Err($crate::hsm_error!($fmt, $($arg)*))
    };
}
