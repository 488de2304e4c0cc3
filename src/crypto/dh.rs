//! signed Diffie-Hellman key exchange
//!
//! The exchange is asymmetric: the initiator (the game server) generates the
//! prime and generator, signs both with its RSA private exponent and
//! transmits them; the responder (the game client) recovers them with the
//! public exponent and answers with its own public value. The responder never
//! checks the recovered parameters against a pinned key; that gap is what
//! makes the interception engine's forged re-signing possible.
use crate::crypto::prime;
use crate::crypto::rsa::RsaCrypto;
use crate::errors::{Error, Result};
use num_bigint::{BigUint, RandBigInt};
use num_traits::One;

/// Structural role of one side of the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
  /// Generates, signs and transmits the parameters (server side).
  Initiator,
  /// Receives the signed parameters and replies (client side).
  Responder,
}

/// Bit length of generated exchange parameters; the derived shared secret is
/// always normalized to 32 bytes.
pub const PARAMETER_BITS: usize = 256;
const WITNESSES: usize = 10;

/// One side of the signed Diffie-Hellman exchange.
#[derive(Debug)]
pub struct DiffieHellman {
  crypto: RsaCrypto,
  role: Role,
  prime: Option<BigUint>,
  generator: Option<BigUint>,
  private: Option<BigUint>,
}

impl DiffieHellman {
  /// Create an engine in the given role. Parameters are established later,
  /// either by [`generate_parameters`](Self::generate_parameters),
  /// [`adopt_parameters`](Self::adopt_parameters) or
  /// [`do_handshake`](Self::do_handshake).
  pub fn new(crypto: RsaCrypto, role: Role) -> DiffieHellman {
    DiffieHellman {
      crypto,
      role,
      prime: None,
      generator: None,
      private: None,
    }
  }
  /// The role this engine was created with.
  pub fn role(&self) -> Role {
    self.role
  }
  /// The established parameters, if any.
  pub fn parameters(&self) -> Option<(&BigUint, &BigUint)> {
    self.prime.as_ref().zip(self.generator.as_ref())
  }

  /// Initiator: draw a fresh prime and generator and an ephemeral exponent.
  ///
  /// The live servers keep the generator below the prime, so the two draws
  /// are swapped when they come out the other way around.
  pub fn generate_parameters(&mut self) -> Result<()> {
    let mut p = prime::generate_pseudo_prime(PARAMETER_BITS, WITNESSES)?;
    let mut g = prime::generate_pseudo_prime(PARAMETER_BITS, WITNESSES)?;
    if g > p {
      std::mem::swap(&mut p, &mut g);
    }
    self.adopt_parameters(p, g)
  }

  /// Store externally established parameters and draw an ephemeral exponent
  /// over them.
  pub fn adopt_parameters(&mut self, prime: BigUint, generator: BigUint) -> Result<()> {
    if prime <= BigUint::from(4u32) || generator <= BigUint::one() {
      return Err(Error::ProtocolMismatch(
        "exchange parameters are too small".into(),
      ));
    }
    let two = BigUint::from(2u32);
    let upper = &prime - &two;
    self.private = Some(rand::thread_rng().gen_biguint_range(&two, &upper));
    self.prime = Some(prime);
    self.generator = Some(generator);
    Ok(())
  }

  /// Responder: recover `p` and `g` from the peer's signed values and draw an
  /// ephemeral exponent.
  ///
  /// The recovered parameters are trusted as-is; the protocol does not
  /// require the responder to hold the authentic signer key.
  pub fn do_handshake(&mut self, signed_prime: &str, signed_generator: &str) -> Result<()> {
    let p = BigUint::from_bytes_be(&self.crypto.verify(&decode_hex(signed_prime)?));
    let g = BigUint::from_bytes_be(&self.crypto.verify(&decode_hex(signed_generator)?));
    self.adopt_parameters(p, g)
  }

  fn prime_ref(&self) -> Result<&BigUint> {
    self
      .prime
      .as_ref()
      .ok_or_else(|| Error::InvalidState("exchange parameters not established".into()))
  }

  /// The prime, signed with the private exponent, hex encoded for the wire.
  pub fn signed_prime(&self) -> Result<String> {
    let p = self.prime_ref()?.clone();
    Ok(encode_hex(&self.crypto.sign(&p.to_bytes_be())?))
  }
  /// The generator, signed with the private exponent, hex encoded.
  pub fn signed_generator(&self) -> Result<String> {
    let g = self
      .generator
      .clone()
      .ok_or_else(|| Error::InvalidState("exchange parameters not established".into()))?;
    Ok(encode_hex(&self.crypto.sign(&g.to_bytes_be())?))
  }

  /// This side's public value `g^x mod p`, hex encoded.
  pub fn public_key(&self) -> Result<String> {
    let (p, g) = self
      .parameters()
      .ok_or_else(|| Error::InvalidState("exchange parameters not established".into()))?;
    let x = self
      .private
      .as_ref()
      .ok_or_else(|| Error::InvalidState("ephemeral exponent not generated".into()))?;
    Ok(encode_hex(&g.modpow(x, p).to_bytes_be()))
  }

  /// Derive the 32-byte shared secret from the peer's public value:
  /// `peer^x mod p`, big-endian, left-padded or truncated to exactly 32
  /// bytes.
  pub fn shared_key(&self, peer_public: &str) -> Result<[u8; 32]> {
    let p = self.prime_ref()?;
    let x = self
      .private
      .as_ref()
      .ok_or_else(|| Error::InvalidState("ephemeral exponent not generated".into()))?;
    let peer = BigUint::from_bytes_be(&decode_hex(peer_public)?);
    let shared = peer.modpow(x, p).to_bytes_be();
    let mut key = [0u8; 32];
    if shared.len() >= 32 {
      key.copy_from_slice(&shared[shared.len() - 32..]);
    } else {
      key[32 - shared.len()..].copy_from_slice(&shared);
    }
    Ok(key)
  }
}

pub(crate) fn encode_hex(bytes: &[u8]) -> String {
  BigUint::from_bytes_be(bytes).to_str_radix(16)
}

pub(crate) fn decode_hex(value: &str) -> Result<Vec<u8>> {
  BigUint::parse_bytes(value.as_bytes(), 16)
    .map(|v| v.to_bytes_be())
    .ok_or_else(|| Error::ProtocolMismatch(format!("invalid hex value {value:?}")))
}

#[cfg(test)]
mod tests {
  use super::*;

  // 384-bit test-only keypair, large enough to sign 256-bit parameters
  const TEST_N: &str = "aa7f89ac9a0611e3dc2b2b0ebf2c5f72e9d85373d0eed694e35dcdac2821225e6473487331991a1bf0b9f67003e451d5";
  const TEST_D: &str = "3eb1e54b4ddbfb8a2174d2417af4f3284b6b1bccd3c06fb0f626d01c401cde4a57d914573040aa73fa2fb26be14662e1";

  fn toy_keypair() -> (RsaCrypto, RsaCrypto) {
    let e = BigUint::from(65537u32);
    let n = BigUint::parse_bytes(TEST_N.as_bytes(), 16).unwrap();
    let d = BigUint::parse_bytes(TEST_D.as_bytes(), 16).unwrap();
    (
      RsaCrypto::from_private_key(e.clone(), n.clone(), d),
      RsaCrypto::from_public_key(e, n),
    )
  }

  #[test]
  fn full_exchange_agrees_on_shared_key() {
    let (private, public) = toy_keypair();
    let mut server = DiffieHellman::new(private, Role::Initiator);
    server.generate_parameters().unwrap();
    let mut client = DiffieHellman::new(public, Role::Responder);
    client
      .do_handshake(
        &server.signed_prime().unwrap(),
        &server.signed_generator().unwrap(),
      )
      .unwrap();
    // the responder recovered the exact parameters
    assert_eq!(server.parameters().unwrap(), client.parameters().unwrap());
    let server_key = server.shared_key(&client.public_key().unwrap()).unwrap();
    let client_key = client.shared_key(&server.public_key().unwrap()).unwrap();
    assert_eq!(server_key, client_key);
  }

  #[test]
  fn shared_key_before_parameters_is_invalid_state() {
    let (_, public) = toy_keypair();
    let client = DiffieHellman::new(public, Role::Responder);
    assert!(matches!(
      client.shared_key("abcd"),
      Err(crate::Error::InvalidState(_))
    ));
  }

  #[test]
  fn signing_requires_private_exponent() {
    let (_, public) = toy_keypair();
    let mut engine = DiffieHellman::new(public, Role::Initiator);
    engine
      .adopt_parameters(BigUint::from(23u32), BigUint::from(5u32))
      .unwrap();
    assert!(matches!(
      engine.signed_prime(),
      Err(crate::Error::InvalidState(_))
    ));
  }
}
