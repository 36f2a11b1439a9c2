//! Errors surfaced by [`super::Client`], and the `stream/start.player` →
//! [`AudioFormat`] conversion (base64 `codec_header` decode + range checks).

use base64::Engine;
use thiserror::Error;

use crate::message::{AudioFormat, AudioFormatError, Codec, StreamPlayerConfig};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client role requires player_support")]
    MissingPlayerSupport,
    #[error("artwork role requires artwork_support")]
    MissingArtworkSupport,
    #[error("source role requires source_support")]
    MissingSourceSupport,
    #[error("connection did not reach OPEN within the timeout")]
    ConnectTimeout,
    #[error("server/hello was not received within the timeout")]
    HelloTimeout,
    #[error("not connected")]
    NotConnected,
    #[error("clock is not yet synchronized")]
    NotSynchronized,
    #[error("capture_ts_us or server_ts_us is required")]
    MissingTimestamp,
    #[error("unsupported stream format: {0}")]
    InvalidFormat(#[from] AudioFormatError),
    #[error("unrecognized codec: {0}")]
    UnknownCodec(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Converts an inbound `stream/start.player` block into the negotiated
/// [`AudioFormat`], decoding `codec_header` and validating the PCM-range
/// fields (spec §4.5: out-of-range values fail construction).
pub fn format_from_stream_player_config(cfg: &StreamPlayerConfig) -> Result<AudioFormat, ClientError> {
    let codec = Codec::parse(&cfg.codec).ok_or_else(|| ClientError::UnknownCodec(cfg.codec.clone()))?;
    let codec_header = cfg
        .codec_header
        .as_ref()
        .map(|b64| base64::engine::general_purpose::STANDARD.decode(b64))
        .transpose()
        .map_err(|_| ClientError::UnknownCodec("invalid codec_header base64".into()))?;
    AudioFormat::new(codec, cfg.sample_rate, cfg.channels, cfg.bit_depth, codec_header)
        .map_err(ClientError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_channels() {
        let cfg = StreamPlayerConfig {
            codec: "pcm".into(),
            sample_rate: 48000,
            channels: 5,
            bit_depth: 16,
            codec_header: None,
        };
        assert!(format_from_stream_player_config(&cfg).is_err());
    }

    #[test]
    fn decodes_codec_header() {
        let cfg = StreamPlayerConfig {
            codec: "flac".into(),
            sample_rate: 44100,
            channels: 2,
            bit_depth: 24,
            codec_header: Some(base64::engine::general_purpose::STANDARD.encode([1, 2, 3])),
        };
        let format = format_from_stream_player_config(&cfg).unwrap();
        assert_eq!(format.codec_header, Some(vec![1, 2, 3]));
    }
}
