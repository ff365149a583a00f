//! Encoded packet value types.
//!
//! Packets carry compressed data from the acquire stage to the decode stage.

use crate::timestamp::{Duration, Timestamp};
use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Flags for packet properties.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PacketFlags: u32 {
        /// This packet contains a keyframe.
        const KEYFRAME = 0x0001;
        /// Packet data is corrupted.
        const CORRUPT = 0x0002;
        /// Packet may be dropped without breaking decode.
        const DISPOSABLE = 0x0004;
    }
}

/// An encoded media packet with owned data.
#[derive(Clone)]
pub struct Packet {
    data: Vec<u8>,
    /// Presentation timestamp.
    pub pts: Timestamp,
    /// Decode timestamp.
    pub dts: Timestamp,
    /// Duration of the packet.
    pub duration: Duration,
    /// Stream index this packet belongs to.
    pub stream_index: u32,
    /// Packet flags.
    pub flags: PacketFlags,
}

impl Packet {
    /// Create a new packet with the given payload.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            pts: Timestamp::none(),
            dts: Timestamp::none(),
            duration: Duration::zero(),
            stream_index: 0,
            flags: PacketFlags::empty(),
        }
    }

    /// Create an empty packet.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Set the presentation timestamp (builder style).
    pub fn with_pts(mut self, pts: Timestamp) -> Self {
        self.pts = pts;
        self
    }

    /// Set the stream index (builder style).
    pub fn with_stream_index(mut self, index: u32) -> Self {
        self.stream_index = index;
        self
    }

    /// Set the flags (builder style).
    pub fn with_flags(mut self, flags: PacketFlags) -> Self {
        self.flags = flags;
        self
    }

    /// The packet payload.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Payload size in bytes, used as queue weight.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Check if this packet has no payload.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check if this is a keyframe packet.
    pub fn is_keyframe(&self) -> bool {
        self.flags.contains(PacketFlags::KEYFRAME)
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("size", &self.size())
            .field("pts", &self.pts)
            .field("dts", &self.dts)
            .field("stream_index", &self.stream_index)
            .field("flags", &self.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_builder() {
        let packet = Packet::new(vec![0u8; 64])
            .with_pts(Timestamp::from_millis(40))
            .with_stream_index(1)
            .with_flags(PacketFlags::KEYFRAME);
        assert_eq!(packet.size(), 64);
        assert_eq!(packet.stream_index, 1);
        assert!(packet.is_keyframe());
        assert_eq!(packet.pts.to_millis(), Some(40));
    }

    #[test]
    fn test_empty_packet() {
        let packet = Packet::empty();
        assert!(packet.is_empty());
        assert!(!packet.pts.is_valid());
    }
}
