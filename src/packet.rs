//! typed packet reading and writing
use crate::errors::{Error, Result};
use crate::frame::Frame;

/// A read cursor over one [`Frame`], with the `length` and `id` fields parsed
/// once at construction from the raw buffer.
#[derive(Debug)]
pub struct Packet {
  frame: Frame,
  offset: usize,
  length: u32,
  id: u16,
  skip_header_obfuscation: bool,
}

impl Packet {
  /// Parse the frame header fields and position the cursor past them.
  pub fn new(frame: Frame) -> Packet {
    let data = frame.data();
    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    let id = u16::from_be_bytes([data[4], data[5]]);
    Packet {
      frame,
      offset: 6,
      length,
      id,
      skip_header_obfuscation: false,
    }
  }
  /// The value of the length field as read at construction.
  pub fn length(&self) -> u32 {
    self.length
  }
  /// The message id as read at construction. Later header obfuscation of the
  /// underlying frame does not change this value.
  pub fn id(&self) -> u16 {
    self.id
  }
  /// The underlying frame.
  pub fn frame(&self) -> &Frame {
    &self.frame
  }
  /// Consume the packet, returning the underlying frame.
  pub fn into_frame(self) -> Frame {
    self.frame
  }
  /// Whether the relay must leave this packet's header bytes untouched when
  /// forwarding. Set on synthesized handshake replacements that are written
  /// in cleartext.
  pub fn skip_header_obfuscation(&self) -> bool {
    self.skip_header_obfuscation
  }
  pub(crate) fn set_skip_header_obfuscation(&mut self, skip: bool) {
    self.skip_header_obfuscation = skip;
  }

  fn take(&mut self, count: usize) -> Result<&[u8]> {
    let data = self.frame.data();
    if self.offset + count > data.len() {
      return Err(Error::MalformedFrame(format!(
        "read of {count} bytes past end of packet {}",
        self.id
      )));
    }
    let bytes = &data[self.offset..self.offset + count];
    self.offset += count;
    Ok(bytes)
  }
  /// Read a single byte as a boolean; exactly `1` means true.
  pub fn read_boolean(&mut self) -> Result<bool> {
    Ok(self.take(1)?[0] == 1)
  }
  /// Read a big-endian unsigned 16-bit integer.
  pub fn read_u16(&mut self) -> Result<u16> {
    let bytes = self.take(2)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
  }
  /// Read a big-endian signed 32-bit integer.
  pub fn read_i32(&mut self) -> Result<i32> {
    let bytes = self.take(4)?;
    Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
  }
  /// Read a 2-byte big-endian length prefix followed by that many UTF-8
  /// bytes.
  pub fn read_string(&mut self) -> Result<String> {
    let length = self.read_u16()? as usize;
    let bytes = self.take(length)?;
    String::from_utf8(bytes.to_vec())
      .map_err(|_| Error::MalformedFrame("string field is not valid UTF-8".into()))
  }
}

/// An append-only packet builder whose length prefix stays self-consistent
/// after every write, so the buffer is usable even if writing is abandoned
/// midway.
#[derive(Debug)]
pub struct PacketWriter {
  id: u16,
  buffer: Vec<u8>,
}

impl PacketWriter {
  /// Start a packet with a zeroed length placeholder and the message id.
  pub fn new(id: u16) -> PacketWriter {
    let mut writer = PacketWriter {
      id,
      buffer: Vec::new(),
    };
    writer.buffer.extend_from_slice(&[0, 0, 0, 0]);
    writer.append(&id.to_be_bytes());
    writer
  }
  /// The message id this writer was created with.
  pub fn id(&self) -> u16 {
    self.id
  }
  /// The buffer in its current (always frame-compatible) state.
  pub fn buffer(&self) -> &[u8] {
    &self.buffer
  }

  fn append(&mut self, bytes: &[u8]) {
    self.buffer.extend_from_slice(bytes);
    let length = (self.buffer.len() - 4) as u32;
    self.buffer[..4].copy_from_slice(&length.to_be_bytes());
  }
  /// Append a boolean as one byte.
  pub fn write_boolean(&mut self, value: bool) {
    self.append(&[u8::from(value)]);
  }
  /// Append a big-endian unsigned 16-bit integer.
  pub fn write_u16(&mut self, value: u16) {
    self.append(&value.to_be_bytes());
  }
  /// Append a big-endian signed 32-bit integer.
  pub fn write_i32(&mut self, value: i32) {
    self.append(&value.to_be_bytes());
  }
  /// Append a 2-byte big-endian length prefix and the UTF-8 bytes of `value`.
  pub fn write_string(&mut self, value: &str) {
    self.write_u16(value.len() as u16);
    self.append(value.as_bytes());
  }
  /// Finish the packet as a [`Frame`].
  pub fn into_frame(self) -> Frame {
    Frame::new(self.buffer)
  }
}
