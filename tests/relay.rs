//! Relay pipeline independence and teardown: the two directions must not
//! block each other, and ending the exchange must stop both of them.
use middler::{FrameParser, HandshakeIds, Middle, MiddleConfig, PacketWriter};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

// no handshake runs in these tests, so small placeholder keys suffice
fn config() -> MiddleConfig {
  MiddleConfig {
    forged_exponent: "11".into(),
    forged_modulus: "0ca1".into(),
    forged_private_exponent: "ac1".into(),
    server_exponent: "11".into(),
    server_modulus: "0ca1".into(),
    ids: HandshakeIds::default(),
  }
}

#[tokio::test]
async fn stalled_direction_does_not_block_the_other() {
  let (mut client_io, proxy_client_io) = tokio::io::duplex(4096);
  // a 64-byte server leg that nobody drains: the client -> server write
  // inside the proxy stalls almost immediately
  let (proxy_server_io, mut server_io) = tokio::io::duplex(64);

  let middle = Middle::new(&config()).unwrap();
  tokio::spawn(async move { middle.exchange(proxy_client_io, proxy_server_io).await });

  for _ in 0..5 {
    let mut filler = PacketWriter::new(0x0AAA);
    filler.write_string(&"x".repeat(40));
    client_io.write_all(filler.buffer()).await.unwrap();
  }
  // give the proxy time to run into the stalled write
  tokio::time::sleep(Duration::from_millis(100)).await;

  // the opposite direction must still relay
  let mut pong = PacketWriter::new(0x0BBB);
  pong.write_string("pong");
  server_io.write_all(pong.buffer()).await.unwrap();

  let mut parser = FrameParser::new();
  let frame = timeout(Duration::from_secs(5), async {
    loop {
      let mut buf = [0u8; 4096];
      let read = client_io.read(&mut buf).await.unwrap();
      assert_ne!(read, 0, "proxy closed the client leg");
      if let Some(frame) = parser.parse(&buf[..read]).into_iter().next() {
        return frame;
      }
    }
  })
  .await
  .expect("server -> client frame was not relayed while client -> server was stalled");
  assert_eq!(frame.header(), &0x0BBBu16.to_be_bytes());
}

#[tokio::test]
async fn exchange_ends_and_tears_down_both_pipelines() {
  let (client_io, proxy_client_io) = tokio::io::duplex(4096);
  let (proxy_server_io, mut server_io) = tokio::io::duplex(4096);

  let middle = Middle::new(&config()).unwrap();
  let exchange =
    tokio::spawn(async move { middle.exchange(proxy_client_io, proxy_server_io).await });

  // closing the client leg ends its pipeline, which ends the exchange
  drop(client_io);
  timeout(Duration::from_secs(5), exchange)
    .await
    .expect("exchange did not end after the client closed")
    .unwrap()
    .unwrap();

  // the surviving pipeline went down with it: the server leg reads EOF
  // instead of staying open indefinitely
  let mut buf = [0u8; 16];
  let read = timeout(Duration::from_secs(5), server_io.read(&mut buf))
    .await
    .expect("server leg stayed open after the exchange ended")
    .unwrap();
  assert_eq!(read, 0);
}
