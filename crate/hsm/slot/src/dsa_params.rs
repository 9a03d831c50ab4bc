use std::{
    num::NonZeroUsize,
    sync::{Arc, LazyLock, Mutex},
};

use lru::LruCache;
use openssl::bn::{BigNum, BigNumContext};
use pki_logger::{debug, info};

use crate::{HError, HResult};

const DEFAULT_CAPACITY: usize = 16;

/// Attempts at drawing a P of the exact bit length before giving up
const MAX_P_ATTEMPTS: usize = 8;

/// Bit lengths of Q that may be requested
pub const SUPPORTED_Q_LENGTHS: [u32; 3] = [160, 224, 256];

static GLOBAL_CACHE: LazyLock<Arc<DsaParameterCache>> =
    LazyLock::new(|| Arc::new(DsaParameterCache::new(DEFAULT_CAPACITY)));

/// DSA domain parameters
#[derive(Debug)]
pub struct DsaDomainParameters {
    pub p: BigNum,
    pub q: BigNum,
    pub g: BigNum,
}

/// Caches generated DSA domain parameters per (P length, Q length), since generating
/// them is slow.
///
/// Entries are evicted least recently used first.
pub struct DsaParameterCache(Mutex<LruCache<(u32, u32), Arc<DsaDomainParameters>>>);

impl Default for DsaParameterCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl DsaParameterCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self(Mutex::new(LruCache::new(capacity)))
    }

    /// The process-wide cache shared by all slots
    #[must_use]
    pub fn global() -> Arc<Self> {
        GLOBAL_CACHE.clone()
    }

    /// Return the cached parameters for the bit lengths, generating them on a miss
    pub fn get(&self, p_length: u32, q_length: u32) -> HResult<Arc<DsaDomainParameters>> {
        if !SUPPORTED_Q_LENGTHS.contains(&q_length) {
            return Err(HError::InvalidArgument(format!(
                "unsupported bit length of Q: {q_length}"
            )));
        }
        if let Some(params) = self
            .0
            .lock()
            .map_err(|_| HError::Default("Failed to lock the DSA parameter cache".to_owned()))?
            .get(&(p_length, q_length))
        {
            return Ok(params.clone());
        }

        // generation is slow: do not hold the lock meanwhile
        info!("generating DSA domain parameters for P={p_length}, Q={q_length}");
        let params = Arc::new(generate_domain_parameters(p_length, q_length)?);
        debug!("caching DSA domain parameters for P={p_length}, Q={q_length}");
        self.insert(p_length, q_length, params.clone())?;
        Ok(params)
    }

    /// Seed the cache with known parameters
    pub fn insert(
        &self,
        p_length: u32,
        q_length: u32,
        params: Arc<DsaDomainParameters>,
    ) -> HResult<()> {
        self.0
            .lock()
            .map_err(|_| HError::Default("Failed to lock the DSA parameter cache".to_owned()))?
            .put((p_length, q_length), params);
        Ok(())
    }
}

fn bits_as_i32(bits: u32) -> HResult<i32> {
    i32::try_from(bits).map_err(|e| HError::InvalidArgument(format!("invalid bit length: {e}")))
}

/// Generate (P, Q, G) with a Q of exactly `q_length` bits.
///
/// Q is drawn first, then P is searched among the primes congruent to 1 modulo 2Q,
/// and G is the first `h^((P-1)/Q) mod P` different from 1 for h = 2, 3, ...
fn generate_domain_parameters(p_length: u32, q_length: u32) -> HResult<DsaDomainParameters> {
    if p_length <= q_length {
        return Err(HError::InvalidArgument(format!(
            "the bit length of P ({p_length}) must exceed the bit length of Q ({q_length})"
        )));
    }
    let p_bits = bits_as_i32(p_length)?;
    let mut ctx = BigNumContext::new()?;

    let mut q = BigNum::new()?;
    q.generate_prime(bits_as_i32(q_length)?, false, None, None)?;
    let mut two_q = BigNum::new()?;
    two_q.lshift1(&q)?;
    let one = BigNum::from_u32(1)?;

    let mut p = BigNum::new()?;
    let mut attempts = 0;
    loop {
        p.generate_prime(p_bits, false, Some(&two_q), Some(&one))?;
        if p.num_bits() == p_bits {
            break;
        }
        attempts += 1;
        if attempts >= MAX_P_ATTEMPTS {
            return Err(HError::Default(format!(
                "failed to generate a {p_length} bit P for a {q_length} bit Q"
            )));
        }
    }

    let mut p_minus_one = p.to_owned()?;
    p_minus_one.sub_word(1)?;
    let mut exponent = BigNum::new()?;
    exponent.checked_div(&p_minus_one, &q, &mut ctx)?;
    let mut h = BigNum::from_u32(2)?;
    let mut g = BigNum::new()?;
    loop {
        g.mod_exp(&h, &exponent, &p, &mut ctx)?;
        if g != one {
            break;
        }
        h.add_word(1)?;
    }

    Ok(DsaDomainParameters { p, q, g })
}
