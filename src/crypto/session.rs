//! per-peer crypto session bundle
use crate::crypto::cipher::HeaderCipher;
use crate::crypto::dh::{DiffieHellman, Role};
use crate::crypto::rsa::RsaCrypto;
use crate::errors::{Error, Result};
use num_bigint::BigUint;

/// Cipher half of a session: explicitly unkeyed until the handshake
/// completes, then keyed for the rest of the connection.
#[derive(Debug)]
enum CipherState {
  Unkeyed,
  Keyed {
    incoming: HeaderCipher,
    outgoing: HeaderCipher,
  },
}

/// One peer's crypto session: a key-exchange engine plus the inbound and
/// outbound header ciphers derived from it.
///
/// Header processing is a pure function of the cipher state: a no-op while
/// `Unkeyed` (pre-handshake plaintext mode), in-place obfuscation once
/// `Keyed`. The transition happens exactly once per connection.
#[derive(Debug)]
pub struct CryptoSession {
  dh: DiffieHellman,
  state: CipherState,
}

impl CryptoSession {
  /// Verify-only session seeded with a peer's published public key
  /// (responder role).
  pub fn from_public_key(e: BigUint, n: BigUint) -> CryptoSession {
    CryptoSession {
      dh: DiffieHellman::new(RsaCrypto::from_public_key(e, n), Role::Responder),
      state: CipherState::Unkeyed,
    }
  }
  /// Sign-capable session seeded with an owned keypair (initiator role).
  pub fn from_private_key(e: BigUint, n: BigUint, d: BigUint) -> CryptoSession {
    CryptoSession {
      dh: DiffieHellman::new(RsaCrypto::from_private_key(e, n, d), Role::Initiator),
      state: CipherState::Unkeyed,
    }
  }
  /// The key-exchange engine of this session.
  pub fn dh(&self) -> &DiffieHellman {
    &self.dh
  }
  /// Mutable access to the key-exchange engine, used by the handshake
  /// intercepts.
  pub fn dh_mut(&mut self) -> &mut DiffieHellman {
    &mut self.dh
  }
  /// Whether the ciphers are derived yet.
  pub fn keyed(&self) -> bool {
    matches!(self.state, CipherState::Keyed { .. })
  }

  /// Derive both header ciphers from the shared key and session nonce.
  ///
  /// One-shot: the ciphers are immutable for the rest of the session, so a
  /// second call is an [`Error::InvalidState`].
  pub fn arm(&mut self, key: [u8; 32], nonce: [u8; 8]) -> Result<()> {
    if self.keyed() {
      return Err(Error::InvalidState(
        "session ciphers are already derived".into(),
      ));
    }
    self.state = CipherState::Keyed {
      incoming: HeaderCipher::new(&key, &nonce),
      outgoing: HeaderCipher::new(&key, &nonce),
    };
    Ok(())
  }

  /// De-obfuscate the header of a message arriving from this peer.
  pub fn process_incoming(&mut self, header: &mut [u8]) {
    if let CipherState::Keyed { incoming, .. } = &mut self.state {
      process(incoming, header);
    }
  }
  /// Obfuscate the header of a message leaving toward this peer.
  pub fn process_outgoing(&mut self, header: &mut [u8]) {
    if let CipherState::Keyed { outgoing, .. } = &mut self.state {
      process(outgoing, header);
    }
  }
}

// The wire format runs the cipher over the byte-reversed header and reverses
// the result back. Both reversals must be kept to interoperate with the real
// client and server.
fn process(cipher: &mut HeaderCipher, header: &mut [u8]) {
  debug_assert_eq!(header.len(), 2, "header must be exactly 2 bytes");
  let mut reversed = [header[1], header[0]];
  cipher.process(&mut reversed);
  header[0] = reversed[1];
  header[1] = reversed[0];
}
