//! probabilistic primality testing and random prime generation
use crate::errors::{Error, Result};
use num_bigint::{BigUint, RandBigInt};
use num_traits::{One, Zero};
use rand::RngCore;

const DEFAULT_WITNESSES: usize = 10;

/// Generate a random probable prime of exactly `bits / 8` random bytes.
///
/// `bits` must be a multiple of 8. Candidates are drawn until one passes
/// Miller-Rabin with `witnesses` rounds; there is no retry bound, the
/// expected number of draws is on the order of `ln(2^bits)`.
pub fn generate_pseudo_prime(bits: usize, witnesses: usize) -> Result<BigUint> {
  if bits % 8 != 0 {
    return Err(Error::InvalidParameter(format!(
      "prime bit length {bits} is not a multiple of 8"
    )));
  }
  let mut rng = rand::thread_rng();
  let mut bytes = vec![0u8; bits / 8];
  loop {
    rng.fill_bytes(&mut bytes);
    // pin the top bit so the result always has the full bit length
    bytes[0] |= 0x80;
    let candidate = BigUint::from_bytes_be(&bytes);
    if is_probably_prime(&candidate, witnesses) {
      return Ok(candidate);
    }
  }
}

/// Miller-Rabin probabilistic primality test.
///
/// Values ≤ 1 are always composite. A `witnesses` count of zero falls back to
/// 10 rounds.
pub fn is_probably_prime(value: &BigUint, witnesses: usize) -> bool {
  let one = BigUint::one();
  let two = &one + &one;
  if value <= &one {
    return false;
  }
  if value == &two {
    return true;
  }
  if (value % &two).is_zero() {
    return false;
  }
  let witnesses = if witnesses == 0 {
    DEFAULT_WITNESSES
  } else {
    witnesses
  };

  // value - 1 = d * 2^s with d odd
  let value_minus_one = value - &one;
  let value_minus_two = &value_minus_one - &one;
  let mut d = value_minus_one.clone();
  let mut s = 0u32;
  while (&d % &two).is_zero() {
    d /= &two;
    s += 1;
  }

  let mut rng = rand::thread_rng();
  'witness: for _ in 0..witnesses {
    // random base in [2, value - 2)
    let a = if value_minus_two <= two {
      two.clone()
    } else {
      rng.gen_biguint_range(&two, &value_minus_two)
    };
    let mut x = a.modpow(&d, value);
    if x == one || x == value_minus_one {
      continue;
    }
    for _ in 1..s {
      x = x.modpow(&two, value);
      if x == one {
        return false;
      }
      if x == value_minus_one {
        continue 'witness;
      }
    }
    return false;
  }
  true
}
