//! Public parameter structs for chunking, MP4 output and encryption.
//!
//! These mirror the original implementation's public headers field-for-field
//! (`include/packager/chunking_params.h`, `mp4_output_params.h`,
//! `packager/app/crypto_flags.h`) and are deserializable from TOML via serde
//! the same way the rest of the stack loads configuration.

use serde::{Deserialize, Serialize};

/// Chunking (segmentation) related parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingParams {
    /// Segment duration in seconds.
    pub segment_duration_in_seconds: f64,
    /// Subsegment duration in seconds. Must not exceed the segment duration.
    pub subsegment_duration_in_seconds: f64,
    /// Force segments to begin with a stream access point.
    pub segment_sap_aligned: bool,
    /// Force subsegments to begin with a stream access point. Setting this
    /// without `segment_sap_aligned` is rejected at init.
    pub subsegment_sap_aligned: bool,
    /// Enable LL-DASH chunked output.
    pub low_latency_dash_mode: bool,
    /// Chunk duration in seconds, used only when `low_latency_dash_mode`.
    pub chunk_duration_in_seconds: f64,
    /// Absolute decode time override for timed-text-only packaging. `-1`
    /// means unset; pts is used instead.
    pub timed_text_decode_time: i64,
    /// Adjust VTT cue boundaries when a sample's end time falls outside the
    /// segment end time.
    pub adjust_sample_boundaries: bool,
    /// Segment number used for the first segment; later segments increment
    /// by one.
    pub start_segment_number: i64,
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            segment_duration_in_seconds: 0.0,
            subsegment_duration_in_seconds: 0.0,
            segment_sap_aligned: true,
            subsegment_sap_aligned: true,
            low_latency_dash_mode: false,
            chunk_duration_in_seconds: 0.0,
            timed_text_decode_time: -1,
            adjust_sample_boundaries: false,
            start_segment_number: 1,
        }
    }
}

impl ChunkingParams {
    /// Validates the rule from spec §4.2 rule 1: subsegment alignment
    /// cannot be stricter than segment alignment.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.subsegment_sap_aligned && !self.segment_sap_aligned {
            return Err(crate::error::PackagerError::InvalidArgument(
                "subsegment_sap_aligned requires segment_sap_aligned".into(),
            ));
        }
        Ok(())
    }
}

/// MP4 (ISO-BMFF) output related parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Mp4OutputParams {
    /// Include pssh boxes in the encrypted stream itself, not just the
    /// manifest.
    pub include_pssh_in_stream: bool,
    /// Generate a `sidx` box in media segments.
    pub generate_sidx_in_media_segments: bool,
    /// Enable LL-DASH streaming (mirrors `ChunkingParams::low_latency_dash_mode`).
    pub low_latency_dash_mode: bool,
}

impl Default for Mp4OutputParams {
    fn default() -> Self {
        Self {
            include_pssh_in_stream: true,
            generate_sidx_in_media_segments: true,
            low_latency_dash_mode: false,
        }
    }
}

/// Common-encryption parameters shared across raw, Widevine and PlayReady
/// key sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoParams {
    /// Protection scheme FourCC: `cenc`, `cbc1`, `cens` or `cbcs`.
    pub protection_scheme: ProtectionScheme,
    /// Number of encrypted 16-byte blocks per pattern run (cbcs/cens only).
    pub crypt_byte_block: u8,
    /// Number of clear 16-byte blocks per pattern run (cbcs/cens only).
    pub skip_byte_block: u8,
    /// Encrypt VP9 superframes on a subsample basis.
    pub vp9_subsample_encryption: bool,
    /// Crypto period duration in seconds; `0` disables key rotation.
    pub crypto_period_duration_in_seconds: f64,
    /// Emit the legacy FairPlay system id in addition to the current one.
    /// Decided as an explicit Open Question: off by default (see DESIGN.md).
    pub include_legacy_fairplay_system_id: bool,
    /// Size in bytes (8 or 16) of the per-sample IV the encryptor
    /// generates for `cenc`/`cbc1`/`cens`. Ignored when `constant_iv` is
    /// set. Mirrors `EncryptionConfig::per_sample_iv_size`.
    pub per_sample_iv_size: u8,
    /// A fixed IV reused for every sample, as `cbcs` conventionally uses.
    /// Mutually exclusive with a nonzero `per_sample_iv_size` effect: when
    /// set, it always wins over per-sample generation.
    pub constant_iv: Option<Vec<u8>>,
}

impl Default for CryptoParams {
    fn default() -> Self {
        Self {
            protection_scheme: ProtectionScheme::Cenc,
            crypt_byte_block: 1,
            skip_byte_block: 9,
            vp9_subsample_encryption: false,
            crypto_period_duration_in_seconds: 0.0,
            include_legacy_fairplay_system_id: false,
            per_sample_iv_size: 8,
            constant_iv: None,
        }
    }
}

/// Common encryption scheme, matching spec §4.4's scheme matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtectionScheme {
    Cenc,
    Cbc1,
    Cens,
    Cbcs,
}

impl ProtectionScheme {
    /// Four-character-code as it appears in the `schm` box.
    pub fn fourcc(self) -> &'static [u8; 4] {
        match self {
            ProtectionScheme::Cenc => b"cenc",
            ProtectionScheme::Cbc1 => b"cbc1",
            ProtectionScheme::Cens => b"cens",
            ProtectionScheme::Cbcs => b"cbcs",
        }
    }

    /// Whether this scheme uses a crypt:skip block pattern.
    pub fn is_pattern_based(self) -> bool {
        matches!(self, ProtectionScheme::Cens | ProtectionScheme::Cbcs)
    }

    /// Whether this scheme uses AES-CBC (as opposed to AES-CTR).
    pub fn is_cbc(self) -> bool {
        matches!(self, ProtectionScheme::Cbc1 | ProtectionScheme::Cbcs)
    }
}

impl CryptoParams {
    /// Validates the IV policy (spec §3 `EncryptionConfig` shape): a
    /// constant IV always wins, but the per-sample size must still be one
    /// of the sizes CENC/CBC1/CENS allow when no constant IV is set.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.constant_iv.is_none() && !matches!(self.per_sample_iv_size, 8 | 16) {
            return Err(crate::error::PackagerError::InvalidArgument(
                "per_sample_iv_size must be 8 or 16 when no constant_iv is set".into(),
            ));
        }
        Ok(())
    }
}

/// Ad-cue generation / cue-sync-queue parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdCueGeneratorParams {
    /// Cue points in seconds, as specified on the command line or config
    /// file; an empty list means cues arrive only via `CueEvent` records in
    /// the stream itself.
    pub cue_points_in_seconds: Vec<f64>,
}

/// Loads a TOML-encoded configuration document into any `Deserialize`
/// parameter struct.
pub fn load_toml<T: serde::de::DeserializeOwned>(contents: &str) -> crate::error::Result<T> {
    toml::from_str(contents)
        .map_err(|e| crate::error::PackagerError::InvalidArgument(format!("invalid config: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_chunking_params_validate() {
        assert!(ChunkingParams::default().validate().is_ok());
    }

    #[test]
    fn subsegment_without_segment_alignment_rejected() {
        let params = ChunkingParams {
            segment_sap_aligned: false,
            subsegment_sap_aligned: true,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn protection_scheme_fourcc() {
        assert_eq!(ProtectionScheme::Cbcs.fourcc(), b"cbcs");
        assert!(ProtectionScheme::Cbcs.is_pattern_based());
        assert!(ProtectionScheme::Cenc.is_cbc() == false);
    }

    #[test]
    fn load_toml_roundtrip() {
        let toml_str = "segment_duration_in_seconds = 6.0\nsegment_sap_aligned = true\n";
        let params: ChunkingParams = load_toml(toml_str).unwrap();
        assert_eq!(params.segment_duration_in_seconds, 6.0);
    }
}
