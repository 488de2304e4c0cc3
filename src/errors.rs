//! engine error
use thiserror::Error as ThisError;
/// A `Result` alias where the `Err` case is `middler::Error`.
pub type Result<T> = std::result::Result<T, Error>;
/// The Errors that may occur while proxying a connection.
#[derive(ThisError, Debug)]
pub enum Error {
  /// tls Error
  #[error(transparent)]
  #[cfg(feature = "tls")]
  Tls(#[from] tokio_rustls::rustls::Error),
  /// Error
  #[error(transparent)]
  IO(#[from] std::io::Error),
  /// a crypto operation was given an argument it cannot work with
  #[error("invalid parameter: {0}")]
  InvalidParameter(String),
  /// a crypto operation was invoked before its prerequisite handshake step
  #[error("invalid state: {0}")]
  InvalidState(String),
  /// a frame or packet field is inconsistent with the buffer that carries it
  #[error("malformed frame: {0}")]
  MalformedFrame(String),
  /// unexpected content at a handshake step
  #[error("protocol mismatch: {0}")]
  ProtocolMismatch(String),
  /// the peer presented no certificate or one that does not match the pin
  #[error("peer authentication failure: {0}")]
  PeerAuthenticationFailure(String),
  /// Unknown Error
  #[error("{0}")]
  Other(String),
}

#[cfg(feature = "tls")]
pub(crate) fn builder<E: Into<Box<dyn std::error::Error + Send + Sync>>>(e: E) -> Error {
  Error::Other(e.into().to_string())
}
