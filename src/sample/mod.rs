//! Data model (spec §3): stream info, media samples, encryption config and
//! the compressed run-length tables MP4 needs (`stsc`/`stts`/`ctts`).

pub mod iterators;

use crate::config::ProtectionScheme;
use std::sync::Arc;

/// What kind of elementary stream a `StreamInfo` describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Audio,
    Video,
    Text,
    Unknown,
}

/// Duration sentinel meaning "unknown / unbounded".
pub const DURATION_UNKNOWN: i64 = i64::MAX;

/// Per-output-stream immutable metadata, shared read-only across stages via
/// `Arc` once emitted. Clonable so per-variant overrides (e.g. a narrowed
/// codec string for one codec in a multi-codec track) can cheaply branch
/// off a base `StreamInfo`.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub stream_kind: StreamKind,
    pub track_id: u32,
    /// Ticks per second.
    pub time_scale: u32,
    /// Duration in ticks; `DURATION_UNKNOWN` for unbounded/live.
    pub duration: i64,
    pub codec: Codec,
    /// RFC 6381-style codec string, e.g. `avc1.640028`.
    pub codec_string: String,
    /// Opaque decoder-config bytes (e.g. AVCDecoderConfigurationRecord).
    pub codec_config: Vec<u8>,
    /// BCP-47 language tag.
    pub language: String,
    pub is_encrypted: bool,
    pub encryption_config: Option<Arc<EncryptionConfig>>,
    /// Pixel width, video streams only.
    pub width: u16,
    /// Pixel height, video streams only.
    pub height: u16,
    /// Channel count, audio streams only.
    pub channel_count: u16,
    /// Bits per sample, audio streams only (usually 16).
    pub sample_size: u16,
    /// Sampling rate in Hz, audio streams only.
    pub sample_rate: u32,
}

impl StreamInfo {
    /// Returns a clone with a narrowed codec string, used by the
    /// multi-codec muxer listener to fan a combined track (e.g. Dolby
    /// Vision dual-layer) out to one listener per codec variant.
    pub fn with_codec_string(&self, codec_string: impl Into<String>) -> Self {
        let mut clone = self.clone();
        clone.codec_string = codec_string.into();
        clone
    }
}

/// Codec identifiers the core needs to distinguish for box/sample-entry
/// selection; bitstream parsing itself is out of scope (spec §1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    H264,
    H265,
    Aac,
    Ac3,
    Eac3,
    Opus,
    Vp9,
    WebVtt,
    Ttml,
    Unknown,
}

/// A single elementary media sample.
#[derive(Debug, Clone)]
pub struct MediaSample {
    pub stream_index: usize,
    /// Decode timestamp, time-scale ticks.
    pub dts: i64,
    /// Presentation timestamp, time-scale ticks; may be negative (edit list).
    pub pts: i64,
    pub duration: i64,
    pub is_key_frame: bool,
    /// e.g. AAC ADTS header fragments the muxer needs but does not parse.
    pub side_data: Vec<u8>,
    pub payload: Vec<u8>,
    /// Present when re-muxing an already-encrypted input.
    pub decrypt_config: Option<DecryptConfig>,
}

impl MediaSample {
    pub fn composition_offset(&self) -> i64 {
        self.pts - self.dts
    }
}

/// A subsample clear/cipher partition inside a sample payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubsampleEntry {
    pub clear_bytes: u32,
    pub cipher_bytes: u32,
}

/// Per-sample decrypt metadata attached by the encryptor, or carried
/// through from an already-encrypted input being re-muxed.
#[derive(Debug, Clone)]
pub struct DecryptConfig {
    pub key_id: [u8; 16],
    pub iv: Vec<u8>,
    pub subsamples: Vec<SubsampleEntry>,
    pub scheme: ProtectionScheme,
    pub crypt_byte_block: u8,
    pub skip_byte_block: u8,
}

impl DecryptConfig {
    /// Invariant (spec §3): Σ(clear+cipher) across subsamples equals the
    /// sample payload size.
    pub fn validate_against(&self, payload_len: usize) -> crate::error::Result<()> {
        let total: u64 = self
            .subsamples
            .iter()
            .map(|s| (s.clear_bytes + s.cipher_bytes) as u64)
            .sum();
        if total != payload_len as u64 {
            return Err(crate::error::PackagerError::EncryptionFailure(format!(
                "subsample size mismatch: subsamples sum to {total}, payload is {payload_len}"
            )));
        }
        Ok(())
    }
}

/// Protection-system-specific box payload, one per configured DRM system.
#[derive(Debug, Clone)]
pub struct ProtectionSystemInfo {
    pub system_id: [u8; 16],
    pub pssh_data: Vec<u8>,
    pub key_ids: Vec<[u8; 16]>,
}

/// Per-stream common-encryption configuration.
#[derive(Debug, Clone)]
pub struct EncryptionConfig {
    pub scheme: ProtectionScheme,
    pub crypt_byte_block: u8,
    pub skip_byte_block: u8,
    /// 0, 8 or 16. Mutually exclusive with a non-empty `constant_iv`.
    pub per_sample_iv_size: u8,
    pub constant_iv: Option<Vec<u8>>,
    pub key_id: [u8; 16],
    pub protection_systems: Vec<ProtectionSystemInfo>,
}

impl EncryptionConfig {
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.per_sample_iv_size != 0
            && self.constant_iv.as_ref().map(|v| !v.is_empty()).unwrap_or(false)
        {
            return Err(crate::error::PackagerError::InvalidArgument(
                "per_sample_iv_size and constant_iv are mutually exclusive".into(),
            ));
        }
        if !matches!(self.per_sample_iv_size, 0 | 8 | 16) {
            return Err(crate::error::PackagerError::InvalidArgument(
                "per_sample_iv_size must be 0, 8 or 16".into(),
            ));
        }
        Ok(())
    }
}

/// Key-frame descriptor used for HLS I-frame playlists and DASH trick-play
/// (spec §3).
#[derive(Debug, Clone, Copy)]
pub struct KeyFrameInfo {
    pub timestamp: u64,
    pub start_byte_offset: u64,
    pub size: u64,
}

/// A cross-stream splice point, e.g. an ad marker.
#[derive(Debug, Clone)]
pub struct CueEvent {
    pub time_in_seconds: f64,
    pub cue_id: String,
    pub splice_info: Option<Vec<u8>>,
}

/// Segment/subsegment/chunk boundary emitted by the chunker.
#[derive(Debug, Clone)]
pub struct SegmentInfo {
    pub start_timestamp: i64,
    pub duration: i64,
    pub is_subsegment: bool,
    pub is_chunk: bool,
    pub key_frames: Vec<KeyFrameInfo>,
}

/// A text cue, the text-track analogue of `MediaSample`.
#[derive(Debug, Clone)]
pub struct TextSample {
    pub stream_index: usize,
    pub start_time: i64,
    pub end_time: i64,
    pub payload: String,
}

/// A single run in the sample-to-chunk (`stsc`) table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    pub sample_description_index: u32,
}

/// A single run in the decoding-time-to-sample (`stts`) table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodingTime {
    pub sample_count: u32,
    pub sample_delta: u32,
}

/// A single run in the composition-offset (`ctts`) table. `sample_offset`
/// may be negative when the table is version 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositionOffset {
    pub sample_count: u32,
    pub sample_offset: i64,
}

/// Appends a (delta, count=1) observation into an RLE table, merging into
/// the last run when the delta matches — the same "extend-or-push" loop
/// used throughout the original implementation's table builders.
pub fn push_decoding_time(table: &mut Vec<DecodingTime>, delta: u32) {
    match table.last_mut() {
        Some(last) if last.sample_delta == delta => last.sample_count += 1,
        _ => table.push(DecodingTime { sample_count: 1, sample_delta: delta }),
    }
}

pub fn push_composition_offset(table: &mut Vec<CompositionOffset>, offset: i64) {
    match table.last_mut() {
        Some(last) if last.sample_offset == offset => last.sample_count += 1,
        _ => table.push(CompositionOffset { sample_count: 1, sample_offset: offset }),
    }
}

pub fn push_chunk_info(table: &mut Vec<ChunkInfo>, chunk_number: u32, samples_per_chunk: u32, sample_description_index: u32) {
    match table.last_mut() {
        Some(last)
            if last.samples_per_chunk == samples_per_chunk
                && last.sample_description_index == sample_description_index =>
        {
            // Same run continues; first_chunk already covers this chunk.
        }
        _ => table.push(ChunkInfo { first_chunk: chunk_number, samples_per_chunk, sample_description_index }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decrypt_config_validates_subsample_sum() {
        let cfg = DecryptConfig {
            key_id: [0u8; 16],
            iv: vec![0u8; 8],
            subsamples: vec![
                SubsampleEntry { clear_bytes: 4, cipher_bytes: 100 },
                SubsampleEntry { clear_bytes: 0, cipher_bytes: 896 },
            ],
            scheme: ProtectionScheme::Cbcs,
            crypt_byte_block: 1,
            skip_byte_block: 9,
        };
        assert!(cfg.validate_against(1000).is_ok());
        assert!(cfg.validate_against(999).is_err());
    }

    #[test]
    fn encryption_config_rejects_dual_iv_mode() {
        let cfg = EncryptionConfig {
            scheme: ProtectionScheme::Cbcs,
            crypt_byte_block: 1,
            skip_byte_block: 9,
            per_sample_iv_size: 8,
            constant_iv: Some(vec![0u8; 16]),
            key_id: [0u8; 16],
            protection_systems: vec![],
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rle_push_merges_equal_runs() {
        let mut table = Vec::new();
        push_decoding_time(&mut table, 3000);
        push_decoding_time(&mut table, 3000);
        push_decoding_time(&mut table, 1500);
        assert_eq!(
            table,
            vec![
                DecodingTime { sample_count: 2, sample_delta: 3000 },
                DecodingTime { sample_count: 1, sample_delta: 1500 },
            ]
        );
    }
}
