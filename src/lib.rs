#![deny(missing_docs)]
//! # middler
//!
//! The `middler` crate is an interception core for the Habbo game protocol:
//! a man-in-the-middle relay that terminates both legs of a connection,
//! forges the protocol's signed Diffie-Hellman handshake, and relays frames
//! with full plaintext visibility while both endpoints believe they are
//! talking to each other directly.
//!
//! - Binary frame reassembly and typed packet access ([`FrameParser`],
//!   [`Packet`], [`PacketWriter`])
//! - A signed key-exchange engine over textbook RSA
//!   ([`crypto::DiffieHellman`], [`crypto::RsaCrypto`])
//! - The header-only stream-cipher obfuscation scheme
//!   ([`crypto::CryptoSession`])
//! - A bidirectional relay with a fixed per-message-id intercept table
//!   ([`Middle`])
//!
//! The outer TLS tunnel of each leg is handled by the `tls` feature (on by
//! default); the relay itself works over any async byte stream, which is
//! also how the integration tests drive it.
//!
//! ## Relaying a connection
//!
//! ```no_run
//! use middler::{Middle, MiddleConfig, HandshakeIds};
//!
//! # async fn run(client: tokio::net::TcpStream, server: tokio::net::TcpStream,
//! #              forged_modulus_hex: String, forged_private_hex: String,
//! #              server_modulus_hex: String) -> middler::Result<()> {
//! let config = MiddleConfig {
//!   // the keypair the proxy signs with, impersonating the server
//!   forged_exponent: "10001".into(),
//!   forged_modulus: forged_modulus_hex,
//!   forged_private_exponent: forged_private_hex,
//!   // the real server's published public key
//!   server_exponent: "10001".into(),
//!   server_modulus: server_modulus_hex,
//!   ids: HandshakeIds::default(),
//! };
//! let middle = Middle::new(&config)?;
//! middle.exchange(client, server).await?;
//! # Ok(())
//! # }
//! ```
pub mod crypto;
mod errors;
mod frame;
mod middle;
mod packet;
pub mod socket;
#[cfg(feature = "tls")]
pub mod tls;

pub use errors::{Error, Result};
pub use frame::{Frame, FrameParser};
pub use middle::{Direction, HandshakeIds, Middle, MiddleConfig};
pub use packet::{Packet, PacketWriter};
