//! End-to-end forged handshake: a scripted client and server complete the
//! full exchange through the relay, then trade obfuscated messages, without
//! either side noticing the interception.
use middler::crypto::{CryptoSession, DiffieHellman, Role, RsaCrypto};
use middler::{Frame, FrameParser, HandshakeIds, Middle, MiddleConfig, Packet, PacketWriter};
use num_bigint::BigUint;
use std::collections::VecDeque;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

// 384-bit test-only keypairs: A is the proxy's forged identity, B is the
// "real" server's.
const FORGED_N: &str = "aa7f89ac9a0611e3dc2b2b0ebf2c5f72e9d85373d0eed694e35dcdac2821225e6473487331991a1bf0b9f67003e451d5";
const FORGED_D: &str = "3eb1e54b4ddbfb8a2174d2417af4f3284b6b1bccd3c06fb0f626d01c401cde4a57d914573040aa73fa2fb26be14662e1";
const SERVER_N: &str = "8b7da5827e516baec8b14d45ee8a6a5dfae8d3f21736500f9bcde6afb50eafb64d62540cadc9481bfa253a067e668ae3";
const SERVER_D: &str = "49af1e8dd722356ac7b2f8e9b6ff40fed1fac972b9964425a0581759dc1f8f9280a234f14373a6ae487bb36348a1d6d1";

const NONCE_WIRE: &str = "AA-BB-CC-DD-EE-FF-00-11";
const NONCE: [u8; 8] = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x00, 0x11];
const CHAT_CLIENT: u16 = 0x0C01;
const CHAT_SERVER: u16 = 0x0C02;

fn hex(value: &str) -> BigUint {
  BigUint::parse_bytes(value.as_bytes(), 16).unwrap()
}

fn config() -> MiddleConfig {
  MiddleConfig {
    forged_exponent: "10001".into(),
    forged_modulus: FORGED_N.into(),
    forged_private_exponent: FORGED_D.into(),
    server_exponent: "10001".into(),
    server_modulus: SERVER_N.into(),
    ids: HandshakeIds::default(),
  }
}

struct Endpoint {
  io: DuplexStream,
  parser: FrameParser,
  queue: VecDeque<Frame>,
}

impl Endpoint {
  fn new(io: DuplexStream) -> Endpoint {
    Endpoint {
      io,
      parser: FrameParser::new(),
      queue: VecDeque::new(),
    }
  }

  async fn send(&mut self, writer: PacketWriter) {
    self.io.write_all(writer.buffer()).await.unwrap();
  }

  async fn send_frame(&mut self, frame: Frame) {
    self.io.write_all(frame.data()).await.unwrap();
  }

  async fn next_frame(&mut self) -> Frame {
    loop {
      if let Some(frame) = self.queue.pop_front() {
        return frame;
      }
      let mut buf = [0u8; 4096];
      let read = self.io.read(&mut buf).await.unwrap();
      assert_ne!(read, 0, "stream ended while waiting for a frame");
      self.queue.extend(self.parser.parse(&buf[..read]));
    }
  }
}

/// The game client: verifies the handshake against the FORGED public key,
/// believing it to be the authentic server.
async fn run_client(io: DuplexStream) -> ((BigUint, BigUint), [u8; 32]) {
  let ids = HandshakeIds::default();
  let mut endpoint = Endpoint::new(io);
  let mut dh = DiffieHellman::new(
    RsaCrypto::from_public_key(hex("10001"), hex(FORGED_N)),
    Role::Responder,
  );
  // a session only used for its header ciphers after arming
  let mut session = CryptoSession::from_public_key(hex("10001"), hex(FORGED_N));

  let mut hello = PacketWriter::new(ids.client_hello);
  hello.write_string(NONCE_WIRE);
  hello.write_string("WIN63-202406");
  endpoint.send(hello).await;

  let mut init = Packet::new(endpoint.next_frame().await);
  assert_eq!(init.id(), ids.server_init_handshake);
  let signed_p = init.read_string().unwrap();
  let signed_g = init.read_string().unwrap();
  dh.do_handshake(&signed_p, &signed_g).unwrap();

  let mut complete = PacketWriter::new(ids.client_complete_handshake);
  complete.write_string(&dh.public_key().unwrap());
  endpoint.send(complete).await;

  let mut server_complete = Packet::new(endpoint.next_frame().await);
  assert_eq!(server_complete.id(), ids.server_complete_handshake);
  let server_public = server_complete.read_string().unwrap();
  assert!(server_complete.read_boolean().unwrap());
  let key = dh.shared_key(&server_public).unwrap();
  session.arm(key, NONCE).unwrap();

  // steady state: send one obfuscated chat line, expect one back
  let mut chat = PacketWriter::new(CHAT_CLIENT);
  chat.write_string("hello from the client");
  let mut frame = chat.into_frame();
  session.process_outgoing(frame.header_mut());
  endpoint.send_frame(frame).await;

  let mut reply = endpoint.next_frame().await;
  session.process_incoming(reply.header_mut());
  let mut reply = Packet::new(reply);
  assert_eq!(reply.id(), CHAT_SERVER);
  assert_eq!(reply.read_string().unwrap(), "hello from the server");

  let (p, g) = dh.parameters().unwrap();
  ((p.clone(), g.clone()), key)
}

/// The real game server: generates and signs the exchange parameters with
/// its own key.
async fn run_server(io: DuplexStream) -> ((BigUint, BigUint), [u8; 32]) {
  let ids = HandshakeIds::default();
  let mut endpoint = Endpoint::new(io);
  let mut dh = DiffieHellman::new(
    RsaCrypto::from_private_key(hex("10001"), hex(SERVER_N), hex(SERVER_D)),
    Role::Initiator,
  );
  dh.generate_parameters().unwrap();
  let mut session = CryptoSession::from_public_key(hex("10001"), hex(FORGED_N));

  let mut init = PacketWriter::new(ids.server_init_handshake);
  init.write_string(&dh.signed_prime().unwrap());
  init.write_string(&dh.signed_generator().unwrap());
  endpoint.send(init).await;

  let mut complete = Packet::new(endpoint.next_frame().await);
  assert_eq!(complete.id(), ids.client_complete_handshake);
  let peer_public = complete.read_string().unwrap();
  let key = dh.shared_key(&peer_public).unwrap();

  let mut server_complete = PacketWriter::new(ids.server_complete_handshake);
  server_complete.write_string(&dh.public_key().unwrap());
  server_complete.write_boolean(true);
  endpoint.send(server_complete).await;
  session.arm(key, NONCE).unwrap();

  let mut chat = endpoint.next_frame().await;
  session.process_incoming(chat.header_mut());
  let mut chat = Packet::new(chat);
  assert_eq!(chat.id(), CHAT_CLIENT);
  assert_eq!(chat.read_string().unwrap(), "hello from the client");

  let mut reply = PacketWriter::new(CHAT_SERVER);
  reply.write_string("hello from the server");
  let mut frame = reply.into_frame();
  session.process_outgoing(frame.header_mut());
  endpoint.send_frame(frame).await;

  let (p, g) = dh.parameters().unwrap();
  ((p.clone(), g.clone()), key)
}

#[tokio::test]
async fn forged_handshake_end_to_end() {
  let (client_io, proxy_client_io) = tokio::io::duplex(4096);
  let (proxy_server_io, server_io) = tokio::io::duplex(4096);

  let middle = Middle::new(&config()).unwrap();
  let proxy = tokio::spawn(async move { middle.exchange(proxy_client_io, proxy_server_io).await });
  let client = tokio::spawn(run_client(client_io));
  let server = tokio::spawn(run_server(server_io));

  let (client_params, client_key) = client.await.unwrap();
  let (server_params, server_key) = server.await.unwrap();

  // the client verified against the forged key yet recovered the exact
  // parameters the real server generated
  assert_eq!(client_params, server_params);
  // each leg derived its own key; the proxy holds both, the peers neither's
  assert_ne!(client_key, server_key);

  drop(proxy);
}
