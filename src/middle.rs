//! interception engine: handshake forging and bidirectional relay
//!
//! The engine sits between the real client and the real server with one
//! [`CryptoSession`] per peer. Toward the client it signs exchange parameters
//! with a forged keypair; toward the server it completes an ordinary
//! exchange. After the four handshake steps the proxy holds both legs' keys
//! and relays every message with plaintext visibility, re-obfuscating headers
//! per leg.
use crate::crypto::CryptoSession;
use crate::errors::{Error, Result};
use crate::frame::{Frame, FrameParser};
use crate::packet::{Packet, PacketWriter};
use num_bigint::BigUint;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Message ids of the four handshake steps, one id domain per direction.
///
/// The live protocol shuffles ids between releases, so they are supplied at
/// startup rather than baked in.
#[derive(Debug, Clone, Copy)]
pub struct HandshakeIds {
  /// client → server: nonce + client version
  pub client_hello: u16,
  /// client → server: client public exchange value
  pub client_complete_handshake: u16,
  /// server → client: signed prime and generator
  pub server_init_handshake: u16,
  /// server → client: server public exchange value + encryption flag
  pub server_complete_handshake: u16,
}

impl Default for HandshakeIds {
  fn default() -> Self {
    HandshakeIds {
      client_hello: 4000,
      client_complete_handshake: 773,
      server_init_handshake: 1347,
      server_complete_handshake: 3885,
    }
  }
}

/// Key material and id tables for one interception engine.
///
/// All key fields are hex strings of big-endian values, the form the keys
/// circulate in.
#[derive(Debug, Clone)]
pub struct MiddleConfig {
  /// public exponent of the proxy's forged keypair
  pub forged_exponent: String,
  /// modulus of the forged keypair
  pub forged_modulus: String,
  /// private exponent of the forged keypair
  pub forged_private_exponent: String,
  /// public exponent of the real server's published key
  pub server_exponent: String,
  /// modulus of the real server's published key
  pub server_modulus: String,
  /// handshake message ids for both direction domains
  pub ids: HandshakeIds,
}

/// Relay direction; also names the two pipelines in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
  /// messages originated by the client
  ClientToServer,
  /// messages originated by the server
  ServerToClient,
}

impl std::fmt::Display for Direction {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Direction::ClientToServer => write!(f, "client -> server"),
      Direction::ServerToClient => write!(f, "server -> client"),
    }
  }
}

#[derive(Debug, Clone, Copy)]
enum ClientIntercept {
  Hello,
  CompleteHandshake,
}

#[derive(Debug, Clone, Copy)]
enum ServerIntercept {
  InitHandshake,
  CompleteHandshake,
}

/// Shared state of one intercepted connection: both crypto sessions, the
/// captured session nonce and the per-direction dispatch tables.
#[derive(Debug)]
struct MiddleState {
  /// proxy identity toward the real client (signs with the forged key)
  client: CryptoSession,
  /// proxy identity toward the real server (verify-only)
  server: CryptoSession,
  nonce: Option<[u8; 8]>,
  client_intercepts: HashMap<u16, ClientIntercept>,
  server_intercepts: HashMap<u16, ServerIntercept>,
}

fn parse_key(name: &str, value: &str) -> Result<BigUint> {
  BigUint::parse_bytes(value.as_bytes(), 16)
    .ok_or_else(|| Error::InvalidParameter(format!("{name} is not a valid hex value")))
}

/// Extract the 8 session-nonce bytes from the wire encoding: 24 ASCII hex
/// characters in 8 triplets, only the first 2 of each triplet significant.
fn parse_nonce(value: &str) -> Result<[u8; 8]> {
  let mut nonce = [0u8; 8];
  let mut groups = value.as_bytes().chunks(3);
  for slot in nonce.iter_mut() {
    let group = groups
      .next()
      .filter(|g| g.len() >= 2)
      .ok_or_else(|| Error::ProtocolMismatch(format!("nonce {value:?} is too short")))?;
    let digits = std::str::from_utf8(&group[..2])
      .map_err(|_| Error::ProtocolMismatch(format!("nonce {value:?} is not ASCII")))?;
    *slot = u8::from_str_radix(digits, 16)
      .map_err(|_| Error::ProtocolMismatch(format!("nonce {value:?} is not hex")))?;
  }
  if groups.next().is_some() {
    return Err(Error::ProtocolMismatch(format!(
      "nonce {value:?} has more than 8 groups"
    )));
  }
  Ok(nonce)
}

impl MiddleState {
  fn new(config: &MiddleConfig) -> Result<MiddleState> {
    let client = CryptoSession::from_private_key(
      parse_key("forged exponent", &config.forged_exponent)?,
      parse_key("forged modulus", &config.forged_modulus)?,
      parse_key("forged private exponent", &config.forged_private_exponent)?,
    );
    let server = CryptoSession::from_public_key(
      parse_key("server exponent", &config.server_exponent)?,
      parse_key("server modulus", &config.server_modulus)?,
    );
    let ids = &config.ids;
    let client_intercepts = HashMap::from([
      (ids.client_hello, ClientIntercept::Hello),
      (
        ids.client_complete_handshake,
        ClientIntercept::CompleteHandshake,
      ),
    ]);
    let server_intercepts = HashMap::from([
      (ids.server_init_handshake, ServerIntercept::InitHandshake),
      (
        ids.server_complete_handshake,
        ServerIntercept::CompleteHandshake,
      ),
    ]);
    Ok(MiddleState {
      client,
      server,
      nonce: None,
      client_intercepts,
      server_intercepts,
    })
  }

  fn nonce(&self) -> Result<[u8; 8]> {
    self
      .nonce
      .ok_or_else(|| Error::InvalidState("client hello nonce not captured yet".into()))
  }

  /// One full read-dispatch cycle for a single frame: undo the origin leg's
  /// header obfuscation, run the intercept for the message id if there is
  /// one, reapply the destination leg's obfuscation and hand back the bytes
  /// to forward (`None` when the message is suppressed).
  fn handle_frame(&mut self, direction: Direction, mut frame: Frame) -> Result<Option<Vec<u8>>> {
    // a declared length below 2 cannot even hold the message id
    if frame.data().len() < 6 {
      return Err(Error::MalformedFrame(format!(
        "frame of {} bytes has no room for a header",
        frame.data().len()
      )));
    }
    match direction {
      Direction::ClientToServer => self.client.process_incoming(frame.header_mut()),
      Direction::ServerToClient => self.server.process_incoming(frame.header_mut()),
    }
    let packet = Packet::new(frame);
    let id = packet.id();
    // unrecognized ids pass through unmodified
    let outcome = match direction {
      Direction::ClientToServer => match self.client_intercepts.get(&id).copied() {
        Some(ClientIntercept::Hello) => self.on_client_hello(packet)?,
        Some(ClientIntercept::CompleteHandshake) => self.on_client_complete_handshake(packet)?,
        None => Some(packet),
      },
      Direction::ServerToClient => match self.server_intercepts.get(&id).copied() {
        Some(ServerIntercept::InitHandshake) => self.on_server_init_handshake(packet)?,
        Some(ServerIntercept::CompleteHandshake) => self.on_server_complete_handshake(packet)?,
        None => Some(packet),
      },
    };
    let Some(packet) = outcome else {
      tracing::debug!(%direction, id, "message suppressed");
      return Ok(None);
    };
    let skip = packet.skip_header_obfuscation();
    let mut frame = packet.into_frame();
    if !skip {
      match direction {
        Direction::ClientToServer => self.server.process_outgoing(frame.header_mut()),
        Direction::ServerToClient => self.client.process_outgoing(frame.header_mut()),
      }
    }
    Ok(Some(frame.into_data()))
  }

  /// Step 1: the client's hello carries the session nonce and its version.
  /// Captured and suppressed; the server side of this hop needs neither.
  fn on_client_hello(&mut self, mut packet: Packet) -> Result<Option<Packet>> {
    let nonce = packet.read_string()?;
    let version = packet.read_string()?;
    self.nonce = Some(parse_nonce(&nonce)?);
    tracing::info!(version, "captured session nonce from client hello");
    Ok(None)
  }

  /// Step 2: the server's signed parameters. Verified with the real key,
  /// adopted on both legs, then re-signed with the forged key so the client
  /// accepts them.
  fn on_server_init_handshake(&mut self, mut packet: Packet) -> Result<Option<Packet>> {
    let signed_prime = packet.read_string()?;
    let signed_generator = packet.read_string()?;
    self
      .server
      .dh_mut()
      .do_handshake(&signed_prime, &signed_generator)?;
    let (p, g) = self
      .server
      .dh()
      .parameters()
      .map(|(p, g)| (p.clone(), g.clone()))
      .ok_or_else(|| Error::InvalidState("handshake did not establish parameters".into()))?;
    self.client.dh_mut().adopt_parameters(p, g)?;
    let mut writer = PacketWriter::new(packet.id());
    writer.write_string(&self.client.dh().signed_prime()?);
    writer.write_string(&self.client.dh().signed_generator()?);
    tracing::info!("re-signed exchange parameters with the forged key");
    let mut replacement = Packet::new(writer.into_frame());
    // no cipher is active on the client leg yet
    replacement.set_skip_header_obfuscation(true);
    Ok(Some(replacement))
  }

  /// Step 3: the client's public value. Completes the client leg and sends
  /// the proxy's own public value toward the server instead.
  fn on_client_complete_handshake(&mut self, mut packet: Packet) -> Result<Option<Packet>> {
    let client_public = packet.read_string()?;
    let key = self.client.dh().shared_key(&client_public)?;
    let nonce = self.nonce()?;
    self.client.arm(key, nonce)?;
    tracing::info!("client leg keyed");
    let mut writer = PacketWriter::new(packet.id());
    writer.write_string(&self.server.dh().public_key()?);
    let mut replacement = Packet::new(writer.into_frame());
    replacement.set_skip_header_obfuscation(true);
    Ok(Some(replacement))
  }

  /// Step 4: the server's public value and encryption flag. Completes the
  /// server leg and substitutes the client-facing engine's public value,
  /// flag preserved.
  fn on_server_complete_handshake(&mut self, mut packet: Packet) -> Result<Option<Packet>> {
    let server_public = packet.read_string()?;
    let encrypted = packet.read_boolean()?;
    let key = self.server.dh().shared_key(&server_public)?;
    let nonce = self.nonce()?;
    self.server.arm(key, nonce)?;
    // Older servers tore the client-leg ciphers back down when `encrypted`
    // is false. The live behavior is always-encrypt, so that downgrade path
    // stays disabled here and the flag is only relayed.
    tracing::info!(encrypted, "server leg keyed");
    let mut writer = PacketWriter::new(packet.id());
    writer.write_string(&self.client.dh().public_key()?);
    writer.write_boolean(encrypted);
    let mut replacement = Packet::new(writer.into_frame());
    replacement.set_skip_header_obfuscation(true);
    Ok(Some(replacement))
  }
}

/// The interception engine for one connection.
pub struct Middle {
  state: Arc<Mutex<MiddleState>>,
}

impl Middle {
  /// Build the engine and its dispatch tables from the supplied key material.
  pub fn new(config: &MiddleConfig) -> Result<Middle> {
    Ok(Middle {
      state: Arc::new(Mutex::new(MiddleState::new(config)?)),
    })
  }

  /// Relay between the two peers until either direction ends.
  ///
  /// Each direction runs as its own task; the first pipeline to stop
  /// (clean end-of-stream or fatal error, both logged at the loop boundary)
  /// ends the exchange. The surviving pipeline is aborted rather than left
  /// relaying into a half-dead session.
  pub async fn exchange<C, S>(&self, client: C, server: S) -> Result<()>
  where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
  {
    let (client_read, client_write) = tokio::io::split(client);
    let (server_read, server_write) = tokio::io::split(server);
    let mut upstream = tokio::spawn(relay(
      Direction::ClientToServer,
      client_read,
      server_write,
      self.state.clone(),
    ));
    let mut downstream = tokio::spawn(relay(
      Direction::ServerToClient,
      server_read,
      client_write,
      self.state.clone(),
    ));
    tokio::select! {
      _ = &mut upstream => downstream.abort(),
      _ = &mut downstream => upstream.abort(),
    }
    tracing::info!("exchange finished");
    Ok(())
  }
}

async fn relay<R, W>(
  direction: Direction,
  mut reader: R,
  mut writer: W,
  state: Arc<Mutex<MiddleState>>,
) where
  R: AsyncRead + Unpin + Send,
  W: AsyncWrite + Unpin + Send,
{
  let mut parser = FrameParser::new();
  let mut buffer = vec![0u8; 4096];
  loop {
    let read = match reader.read(&mut buffer).await {
      Ok(0) => {
        tracing::info!(%direction, "peer closed the stream");
        return;
      }
      Ok(read) => read,
      Err(e) => {
        tracing::error!(%direction, error = %e, "read failed");
        return;
      }
    };
    tracing::debug!(%direction, bytes = read, "received");
    for frame in parser.parse(&buffer[..read]) {
      // the guard must not outlive this statement: holding the state lock
      // across the write would let a stalled peer block the other pipeline
      let handled = state.lock().await.handle_frame(direction, frame);
      match handled {
        Ok(Some(bytes)) => {
          if let Err(e) = writer.write_all(&bytes).await {
            tracing::error!(%direction, error = %e, "write failed");
            return;
          }
        }
        Ok(None) => {}
        Err(e) => {
          // a processing error ends this pipeline only
          tracing::error!(%direction, error = %e, "processing failed");
          return;
        }
      }
    }
  }
}
