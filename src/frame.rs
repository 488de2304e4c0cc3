//! wire frame and frame parser
use bytes::{Buf, BytesMut};

/// One complete protocol message as it appears on the wire:
/// `[u32 BE length][u16 BE id][payload]`, where the length field equals the
/// total buffer length minus 4.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
  data: Vec<u8>,
}

impl Frame {
  /// Wrap an owned buffer as a frame.
  pub fn new(data: Vec<u8>) -> Frame {
    Frame { data }
  }
  /// The raw frame bytes.
  pub fn data(&self) -> &[u8] {
    &self.data
  }
  /// The 2 message-id bytes at offset 4. This is the unit of header
  /// obfuscation, independent of their interpretation as an id.
  pub fn header(&self) -> &[u8] {
    &self.data[4..6]
  }
  /// Mutable view of the 2 header bytes.
  pub fn header_mut(&mut self) -> &mut [u8] {
    &mut self.data[4..6]
  }
  /// Consume the frame, returning the raw bytes.
  pub fn into_data(self) -> Vec<u8> {
    self.data
  }
}

/// Reassembles discrete frames from arbitrarily sized stream chunks, keeping
/// unconsumed partial data across calls.
#[derive(Debug, Default)]
pub struct FrameParser {
  buffer: BytesMut,
}

impl FrameParser {
  /// Create a parser with an empty carry-over buffer.
  pub fn new() -> FrameParser {
    FrameParser {
      buffer: BytesMut::new(),
    }
  }
  /// Append `chunk` and drain every complete frame it makes available.
  ///
  /// Incomplete trailing data is retained for the next call; the parser never
  /// errors on short input, it simply waits for more bytes.
  pub fn parse(&mut self, chunk: &[u8]) -> Vec<Frame> {
    self.buffer.extend_from_slice(chunk);
    let mut frames = Vec::new();
    while self.buffer.len() >= 6 {
      let length = u32::from_be_bytes([
        self.buffer[0],
        self.buffer[1],
        self.buffer[2],
        self.buffer[3],
      ]) as usize;
      if length + 4 > self.buffer.len() {
        break;
      }
      let data = self.buffer.copy_to_bytes(length + 4);
      frames.push(Frame::new(data.to_vec()));
    }
    frames
  }
}
