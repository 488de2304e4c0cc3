//! the protocol's crypto stack: primes, textbook RSA, signed Diffie-Hellman,
//! and the header stream cipher
pub mod cipher;
pub mod dh;
pub mod prime;
pub mod rsa;
pub mod session;

pub use cipher::HeaderCipher;
pub use dh::{DiffieHellman, Role};
pub use rsa::RsaCrypto;
pub use session::CryptoSession;
