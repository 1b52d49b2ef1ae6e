//! The wire frame format and its codec.
//!
//! Field layout, all integers big-endian:
//!
//! ```text
//! dest MAC (6) | src MAC (6) | ethertype (2) | kind (1) | flags (1)
//! | sequence (4) | transfer_id (4) | fragment_index (4)
//! | total_fragments (4) | payload_len (2) | payload (N, obfuscated) | crc32 (4)
//! ```
//!
//! Per-kind constructors, a bitset newtype for flags, and a decode routine
//! that bounds-checks the declared length against the buffer before
//! trusting it and verifies the CRC only after that bound is established.

use pnet::util::MacAddr;

use crate::core::checksum::Crc32;
use crate::core::obfuscate::xor_transform;
use crate::error::{Error, Result};

/// The private EtherType this protocol claims.
pub const ETHER_TYPE: u16 = 0x88B5;

/// Size of the fixed header, excluding payload and trailing CRC.
pub const FRAME_HEADER_SIZE: usize = 6 + 6 + 2 + 1 + 1 + 4 + 4 + 4 + 4 + 2;

/// Size of the trailing CRC-32 field.
pub const FRAME_TRAILER_SIZE: usize = 4;

/// One of the nine frame kinds the protocol exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Msg = 0x01,
    Ack = 0x02,
    Nack = 0x03,
    File = 0x04,
    FileAck = 0x05,
    Hello = 0x06,
    BroadcastOnline = 0x07,
    BroadcastOffline = 0x08,
    Ctrl = 0x09,
}

impl FrameKind {
    fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0x01 => FrameKind::Msg,
            0x02 => FrameKind::Ack,
            0x03 => FrameKind::Nack,
            0x04 => FrameKind::File,
            0x05 => FrameKind::FileAck,
            0x06 => FrameKind::Hello,
            0x07 => FrameKind::BroadcastOnline,
            0x08 => FrameKind::BroadcastOffline,
            0x09 => FrameKind::Ctrl,
            _ => return None,
        })
    }
}

/// Per-frame flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags(u8);

impl FrameFlags {
    pub const NONE: FrameFlags = FrameFlags(0);
    pub const RELIABLE: FrameFlags = FrameFlags(0b0000_0001);
    pub const LAST_FRAGMENT: FrameFlags = FrameFlags(0b0000_0010);

    pub const fn from_bits(bits: u8) -> Self {
        FrameFlags(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: FrameFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: FrameFlags) -> Self {
        FrameFlags(self.0 | other.0)
    }

    pub fn insert(&mut self, other: FrameFlags) {
        self.0 |= other.0;
    }
}

/// A decoded or about-to-be-encoded protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub dest: MacAddr,
    pub src: MacAddr,
    pub kind: FrameKind,
    pub flags: FrameFlags,
    pub sequence: u32,
    pub transfer_id: u32,
    pub fragment_index: u32,
    pub total_fragments: u32,
    /// Cleartext payload. Obfuscated only on the wire, never in memory
    /// once decoded.
    pub payload: Vec<u8>,
}

impl Frame {
    fn base(dest: MacAddr, src: MacAddr, kind: FrameKind, reliable: bool, payload: Vec<u8>) -> Self {
        let mut flags = FrameFlags::NONE;
        if reliable {
            flags.insert(FrameFlags::RELIABLE);
        }
        Frame {
            dest,
            src,
            kind,
            flags,
            sequence: 0,
            transfer_id: 0,
            fragment_index: 0,
            total_fragments: 0,
            payload,
        }
    }

    pub fn new_msg(dest: MacAddr, src: MacAddr, sequence: u32, reliable: bool, text: Vec<u8>) -> Self {
        let mut f = Self::base(dest, src, FrameKind::Msg, reliable, text);
        f.sequence = sequence;
        f
    }

    pub fn new_ack(dest: MacAddr, src: MacAddr, acked_sequence: u32) -> Self {
        let mut f = Self::base(dest, src, FrameKind::Ack, false, Vec::new());
        f.sequence = acked_sequence;
        f
    }

    pub fn new_nack(dest: MacAddr, src: MacAddr, missing_sequence: u32) -> Self {
        let mut f = Self::base(dest, src, FrameKind::Nack, false, Vec::new());
        f.sequence = missing_sequence;
        f
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new_file(
        dest: MacAddr,
        src: MacAddr,
        sequence: u32,
        reliable: bool,
        transfer_id: u32,
        fragment_index: u32,
        total_fragments: u32,
        chunk: Vec<u8>,
    ) -> Self {
        let mut f = Self::base(dest, src, FrameKind::File, reliable, chunk);
        f.sequence = sequence;
        f.transfer_id = transfer_id;
        f.fragment_index = fragment_index;
        f.total_fragments = total_fragments;
        if fragment_index + 1 == total_fragments {
            f.flags.insert(FrameFlags::LAST_FRAGMENT);
        }
        f
    }

    pub fn new_file_ack(dest: MacAddr, src: MacAddr, transfer_id: u32, fragment_index: u32) -> Self {
        let mut f = Self::base(dest, src, FrameKind::FileAck, false, Vec::new());
        f.transfer_id = transfer_id;
        f.fragment_index = fragment_index;
        f
    }

    pub fn new_hello(dest: MacAddr, src: MacAddr, name: Vec<u8>) -> Self {
        Self::base(dest, src, FrameKind::Hello, false, name)
    }

    pub fn new_broadcast_online(src: MacAddr, name: Vec<u8>) -> Self {
        Self::base(MacAddr::broadcast(), src, FrameKind::BroadcastOnline, false, name)
    }

    pub fn new_broadcast_offline(src: MacAddr) -> Self {
        Self::base(MacAddr::broadcast(), src, FrameKind::BroadcastOffline, false, Vec::new())
    }

    pub fn is_last_fragment(&self) -> bool {
        self.flags.contains(FrameFlags::LAST_FRAGMENT)
    }

    pub fn is_reliable(&self) -> bool {
        self.flags.contains(FrameFlags::RELIABLE)
    }

    /// Total wire size once encoded, including header and CRC trailer.
    pub fn wire_size(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len() + FRAME_TRAILER_SIZE
    }

    /// Serializes into a freshly allocated buffer, obfuscating the payload
    /// with `key` and appending the CRC.
    pub fn encode(&self, key: &[u8]) -> Result<Vec<u8>> {
        if self.payload.len() > u16::MAX as usize {
            return Err(Error::MalformedFrame);
        }
        let mut buf = Vec::with_capacity(self.wire_size());
        buf.extend_from_slice(&self.dest.octets());
        buf.extend_from_slice(&self.src.octets());
        buf.extend_from_slice(&ETHER_TYPE.to_be_bytes());
        buf.push(self.kind as u8);
        buf.push(self.flags.bits());
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.extend_from_slice(&self.transfer_id.to_be_bytes());
        buf.extend_from_slice(&self.fragment_index.to_be_bytes());
        buf.extend_from_slice(&self.total_fragments.to_be_bytes());
        buf.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());

        let mut obfuscated = self.payload.clone();
        xor_transform(&mut obfuscated, key);
        buf.extend_from_slice(&obfuscated);

        let crc = Crc32::compute(&buf);
        buf.extend_from_slice(&crc.to_be_bytes());
        Ok(buf)
    }

    /// Decodes a frame from `buf`, deobfuscating the payload with `key`.
    ///
    /// Bounds are checked before any length-dependent read, and the CRC is
    /// checked before the frame is otherwise trusted.
    pub fn decode(buf: &[u8], key: &[u8]) -> Result<Self> {
        if buf.len() < FRAME_HEADER_SIZE + FRAME_TRAILER_SIZE {
            return Err(Error::MalformedFrame);
        }

        let dest = MacAddr::new(buf[0], buf[1], buf[2], buf[3], buf[4], buf[5]);
        let src = MacAddr::new(buf[6], buf[7], buf[8], buf[9], buf[10], buf[11]);
        let ethertype = u16::from_be_bytes([buf[12], buf[13]]);
        if ethertype != ETHER_TYPE {
            return Err(Error::MalformedFrame);
        }
        let kind = FrameKind::from_u8(buf[14]).ok_or(Error::UnknownKind(buf[14]))?;
        let flags = FrameFlags::from_bits(buf[15]);
        let sequence = u32::from_be_bytes(buf[16..20].try_into().unwrap());
        let transfer_id = u32::from_be_bytes(buf[20..24].try_into().unwrap());
        let fragment_index = u32::from_be_bytes(buf[24..28].try_into().unwrap());
        let total_fragments = u32::from_be_bytes(buf[28..32].try_into().unwrap());
        let payload_len = u16::from_be_bytes([buf[32], buf[33]]) as usize;

        let total_size = FRAME_HEADER_SIZE + payload_len + FRAME_TRAILER_SIZE;
        if buf.len() < total_size {
            return Err(Error::MalformedFrame);
        }

        let payload_start = FRAME_HEADER_SIZE;
        let payload_end = payload_start + payload_len;
        let crc_start = payload_end;

        let expected_crc = u32::from_be_bytes(
            buf[crc_start..crc_start + FRAME_TRAILER_SIZE]
                .try_into()
                .unwrap(),
        );
        let actual_crc = Crc32::compute(&buf[..crc_start]);
        if actual_crc != expected_crc {
            return Err(Error::CrcMismatch);
        }

        if fragment_index >= total_fragments && total_fragments != 0 {
            return Err(Error::MalformedFrame);
        }

        let mut payload = buf[payload_start..payload_end].to_vec();
        xor_transform(&mut payload, key);

        Ok(Frame {
            dest,
            src,
            kind,
            flags,
            sequence,
            transfer_id,
            fragment_index,
            total_fragments,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(n: u8) -> MacAddr {
        MacAddr::new(0x02, 0, 0, 0, 0, n)
    }

    #[test]
    fn msg_roundtrip() {
        let key = b"secret";
        let frame = Frame::new_msg(mac(2), mac(1), 7, true, b"hello".to_vec());
        let wire = frame.encode(key).unwrap();
        let decoded = Frame::decode(&wire, key).unwrap();
        assert_eq!(decoded, frame);
        assert!(decoded.is_reliable());
    }

    #[test]
    fn ack_roundtrip_has_no_payload() {
        let key = b"k";
        let frame = Frame::new_ack(mac(1), mac(2), 42);
        let wire = frame.encode(key).unwrap();
        let decoded = Frame::decode(&wire, key).unwrap();
        assert_eq!(decoded.sequence, 42);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn file_fragment_last_flag_set_correctly() {
        let key = b"k";
        let last = Frame::new_file(mac(2), mac(1), 1, true, 99, 2, 3, vec![1, 2, 3]);
        assert!(last.is_last_fragment());
        let mid = Frame::new_file(mac(2), mac(1), 1, true, 99, 1, 3, vec![1, 2, 3]);
        assert!(!mid.is_last_fragment());

        let wire = last.encode(key).unwrap();
        let decoded = Frame::decode(&wire, key).unwrap();
        assert!(decoded.is_last_fragment());
    }

    #[test]
    fn single_bit_flip_causes_crc_mismatch() {
        let key = b"k";
        let frame = Frame::new_msg(mac(2), mac(1), 1, true, b"abcdef".to_vec());
        let mut wire = frame.encode(key).unwrap();
        let payload_byte = FRAME_HEADER_SIZE;
        wire[payload_byte] ^= 0x01;
        let result = Frame::decode(&wire, key);
        assert_eq!(result, Err(Error::CrcMismatch));
    }

    #[test]
    fn truncated_buffer_is_malformed_not_panicking() {
        let key = b"k";
        let frame = Frame::new_msg(mac(2), mac(1), 1, true, b"abcdef".to_vec());
        let wire = frame.encode(key).unwrap();
        let truncated = &wire[..wire.len() - 2];
        assert_eq!(Frame::decode(truncated, key), Err(Error::MalformedFrame));
    }

    #[test]
    fn wrong_ethertype_is_rejected() {
        let key = b"k";
        let frame = Frame::new_msg(mac(2), mac(1), 1, true, b"abcdef".to_vec());
        let mut wire = frame.encode(key).unwrap();
        wire[12] = 0x08;
        wire[13] = 0x00;
        assert_eq!(Frame::decode(&wire, key), Err(Error::MalformedFrame));
    }
}
