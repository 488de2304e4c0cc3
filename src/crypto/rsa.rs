//! textbook RSA over raw modular exponentiation
//!
//! The legacy protocol signs values with a bare `m^d mod n` and recovers them
//! with `m^e mod n`, with no padding scheme and no hashing. This module reproduces
//! exactly that, including the big-endian byte-to-integer convention, so the
//! wire bytes stay bit-for-bit compatible. It is knowingly not a hardened
//! cryptosystem.
use crate::errors::{Error, Result};
use num_bigint::BigUint;

/// An RSA-style trapdoor parameterized by `(e, n)` and optionally the private
/// exponent `d`.
#[derive(Debug, Clone)]
pub struct RsaCrypto {
  e: BigUint,
  n: BigUint,
  d: Option<BigUint>,
}

impl RsaCrypto {
  /// Verify-only mode: public exponent and modulus.
  pub fn from_public_key(e: BigUint, n: BigUint) -> RsaCrypto {
    RsaCrypto { e, n, d: None }
  }
  /// Sign-capable mode: public exponent, modulus and private exponent.
  pub fn from_private_key(e: BigUint, n: BigUint, d: BigUint) -> RsaCrypto {
    RsaCrypto { e, n, d: Some(d) }
  }
  /// Whether this instance holds the private exponent.
  pub fn can_sign(&self) -> bool {
    self.d.is_some()
  }
  /// Apply the public exponent: `m^e mod n`, big-endian bytes in and out.
  pub fn verify(&self, data: &[u8]) -> Vec<u8> {
    let m = BigUint::from_bytes_be(data);
    m.modpow(&self.e, &self.n).to_bytes_be()
  }
  /// Apply the private exponent: `m^d mod n`.
  pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
    let d = self
      .d
      .as_ref()
      .ok_or_else(|| Error::InvalidState("signing requires a private exponent".into()))?;
    let m = BigUint::from_bytes_be(data);
    Ok(m.modpow(d, &self.n).to_bytes_be())
  }
}
