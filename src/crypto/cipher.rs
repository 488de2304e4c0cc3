//! header keystream cipher
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20Legacy;

/// A stateful ChaCha20 keystream session (the original 64-bit-nonce variant,
/// block counter starting at 0).
///
/// Every [`process`](Self::process) call consumes fresh keystream bytes, so
/// calls must happen exactly once per header, in strict arrival order. A
/// replayed or skipped call desynchronizes the two endpoints' positions for
/// the rest of the session; there is no authentication tag to detect it.
pub struct HeaderCipher {
  inner: ChaCha20Legacy,
}

impl HeaderCipher {
  /// Seed a session from the 32-byte shared key and the 8-byte session
  /// nonce.
  pub fn new(key: &[u8; 32], nonce: &[u8; 8]) -> HeaderCipher {
    HeaderCipher {
      inner: ChaCha20Legacy::new(key.into(), nonce.into()),
    }
  }
  /// XOR `buffer` in place against the next `buffer.len()` keystream bytes
  /// and advance the position by that length.
  pub fn process(&mut self, buffer: &mut [u8]) {
    self.inner.apply_keystream(buffer);
  }
}

impl std::fmt::Debug for HeaderCipher {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("HeaderCipher").finish_non_exhaustive()
  }
}
