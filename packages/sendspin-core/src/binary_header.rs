//! The 9-byte header prepended to every binary WebSocket frame.
//!
//! Layout: 1 byte frame tag, followed by an 8-byte big-endian `i64`
//! timestamp in microseconds. Tags are not a closed set — receivers must
//! tolerate and round-trip tags they do not recognize, since new frame
//! kinds can be added to the protocol without a version bump.

use thiserror::Error;

pub const HEADER_LEN: usize = 9;

/// A binary frame tag. Deliberately not a closed enum: unknown tags must
/// still decode and re-encode losslessly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameTag(pub u8);

impl FrameTag {
    pub const AUDIO_CHUNK: FrameTag = FrameTag(crate::protocol_constants::TAG_AUDIO_CHUNK);
    pub const ARTWORK_CHANNEL_0: FrameTag =
        FrameTag(crate::protocol_constants::TAG_ARTWORK_CHANNEL_0);
    pub const ARTWORK_CHANNEL_1: FrameTag =
        FrameTag(crate::protocol_constants::TAG_ARTWORK_CHANNEL_1);
    pub const ARTWORK_CHANNEL_2: FrameTag =
        FrameTag(crate::protocol_constants::TAG_ARTWORK_CHANNEL_2);
    pub const ARTWORK_CHANNEL_3: FrameTag =
        FrameTag(crate::protocol_constants::TAG_ARTWORK_CHANNEL_3);
    pub const SOURCE_AUDIO_CHUNK: FrameTag =
        FrameTag(crate::protocol_constants::TAG_SOURCE_AUDIO_CHUNK);
    pub const VISUALIZATION_DATA: FrameTag =
        FrameTag(crate::protocol_constants::TAG_VISUALIZATION_DATA);

    /// Artwork tag for `channel` (0..3), if in range.
    pub fn artwork_channel(channel: u32) -> Option<FrameTag> {
        if channel < crate::protocol_constants::ARTWORK_CHANNEL_COUNT {
            Some(FrameTag(
                crate::protocol_constants::TAG_ARTWORK_CHANNEL_0 + channel as u8,
            ))
        } else {
            None
        }
    }

    pub fn as_u8(self) -> u8 {
        self.0
    }
}

impl From<u8> for FrameTag {
    fn from(value: u8) -> Self {
        FrameTag(value)
    }
}

impl From<FrameTag> for u8 {
    fn from(tag: FrameTag) -> Self {
        tag.0
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("binary frame shorter than the {HEADER_LEN}-byte header (got {0} bytes)")]
    ShortHeader(usize),
}

/// The fixed-size header prepended to binary media frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryHeader {
    pub tag: FrameTag,
    pub timestamp_us: i64,
}

impl BinaryHeader {
    pub fn new(tag: FrameTag, timestamp_us: i64) -> Self {
        Self { tag, timestamp_us }
    }

    /// Encodes the header into its 9-byte wire form.
    pub fn pack(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = self.tag.as_u8();
        buf[1..9].copy_from_slice(&self.timestamp_us.to_be_bytes());
        buf
    }

    /// Encodes the header followed by `payload` into one contiguous frame.
    pub fn pack_frame(&self, payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
        frame.extend_from_slice(&self.pack());
        frame.extend_from_slice(payload);
        frame
    }

    /// Decodes a header from the front of `bytes`, returning the header and
    /// the remaining payload slice.
    pub fn unpack(bytes: &[u8]) -> Result<(BinaryHeader, &[u8]), HeaderError> {
        if bytes.len() < HEADER_LEN {
            return Err(HeaderError::ShortHeader(bytes.len()));
        }
        let tag = FrameTag(bytes[0]);
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&bytes[1..9]);
        let timestamp_us = i64::from_be_bytes(ts);
        Ok((BinaryHeader { tag, timestamp_us }, &bytes[HEADER_LEN..]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_round_trips() {
        let header = BinaryHeader::new(FrameTag::AUDIO_CHUNK, 1_234_567_890);
        let packed = header.pack();
        let (decoded, rest) = BinaryHeader::unpack(&packed).unwrap();
        assert_eq!(decoded, header);
        assert!(rest.is_empty());
    }

    #[test]
    fn pack_frame_round_trips_with_payload() {
        let header = BinaryHeader::new(FrameTag::SOURCE_AUDIO_CHUNK, -42);
        let payload = [1u8, 2, 3, 4, 5];
        let frame = header.pack_frame(&payload);
        let (decoded, rest) = BinaryHeader::unpack(&frame).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(rest, &payload[..]);
    }

    #[test]
    fn unknown_tag_round_trips() {
        let header = BinaryHeader::new(FrameTag::from(200), 0);
        let (decoded, _) = BinaryHeader::unpack(&header.pack()).unwrap();
        assert_eq!(decoded.tag, FrameTag(200));
    }

    #[test]
    fn short_header_is_rejected() {
        let err = BinaryHeader::unpack(&[1, 2, 3]).unwrap_err();
        assert_eq!(err, HeaderError::ShortHeader(3));
    }

    #[test]
    fn artwork_channel_maps_to_contiguous_tags() {
        assert_eq!(FrameTag::artwork_channel(0), Some(FrameTag::ARTWORK_CHANNEL_0));
        assert_eq!(FrameTag::artwork_channel(3), Some(FrameTag::ARTWORK_CHANNEL_3));
        assert_eq!(FrameTag::artwork_channel(4), None);
    }
}
