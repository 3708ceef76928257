//! EBML element builders: every Matroska/WebM element is an ID, a
//! variable-length size ("vint") and a payload, the same shape the
//! original's `IMkvWriter`-backed builders produce a layer higher up.
//! IDs are hardcoded per the Matroska spec, the same way `mp4::boxes`
//! hardcodes ISO-BMFF fourccs.

use crate::bitio::ByteWriter;

pub const EBML_HEADER: &[u8] = &[0x1A, 0x45, 0xDF, 0xA3];
pub const DOC_TYPE: &[u8] = &[0x42, 0x82];
pub const EBML_VERSION: &[u8] = &[0x42, 0x86];
pub const EBML_READ_VERSION: &[u8] = &[0x42, 0xF7];
pub const DOC_TYPE_VERSION: &[u8] = &[0x42, 0x87];
pub const DOC_TYPE_READ_VERSION: &[u8] = &[0x42, 0x85];

pub const SEGMENT: &[u8] = &[0x18, 0x53, 0x80, 0x67];
pub const INFO: &[u8] = &[0x15, 0x49, 0xA9, 0x66];
pub const TIMECODE_SCALE: &[u8] = &[0x2A, 0xD7, 0xB1];
pub const DURATION: &[u8] = &[0x44, 0x89];
pub const MUXING_APP: &[u8] = &[0x4D, 0x80];
pub const WRITING_APP: &[u8] = &[0x57, 0x41];

pub const TRACKS: &[u8] = &[0x16, 0x54, 0xAE, 0x6B];
pub const TRACK_ENTRY: &[u8] = &[0xAE];
pub const TRACK_NUMBER: &[u8] = &[0xD7];
pub const TRACK_UID: &[u8] = &[0x73, 0xC5];
pub const TRACK_TYPE: &[u8] = &[0x83];
pub const CODEC_ID: &[u8] = &[0x86];
pub const CODEC_PRIVATE: &[u8] = &[0x63, 0xA2];
pub const VIDEO: &[u8] = &[0xE0];
pub const PIXEL_WIDTH: &[u8] = &[0xB0];
pub const PIXEL_HEIGHT: &[u8] = &[0xBA];
pub const AUDIO: &[u8] = &[0xE1];
pub const SAMPLING_FREQUENCY: &[u8] = &[0xB5];
pub const CHANNELS: &[u8] = &[0x9F];
pub const BIT_DEPTH: &[u8] = &[0x62, 0x64];

pub const CONTENT_ENCODINGS: &[u8] = &[0x6D, 0x80];
pub const CONTENT_ENCODING: &[u8] = &[0x62, 0x40];
pub const CONTENT_ENCODING_ORDER: &[u8] = &[0x50, 0x31];
pub const CONTENT_ENCODING_SCOPE: &[u8] = &[0x50, 0x32];
pub const CONTENT_ENCODING_TYPE: &[u8] = &[0x50, 0x33];
pub const CONTENT_ENCRYPTION: &[u8] = &[0x50, 0x35];
pub const CONTENT_ENC_ALGO: &[u8] = &[0x47, 0xE1];
pub const CONTENT_ENC_KEY_ID: &[u8] = &[0x47, 0xE2];
pub const CONTENT_ENC_AES_SETTINGS: &[u8] = &[0x47, 0xE7];
pub const AES_SETTINGS_CIPHER_MODE: &[u8] = &[0x47, 0xE8];

pub const CLUSTER: &[u8] = &[0x1F, 0x43, 0xB6, 0x75];
pub const TIMECODE: &[u8] = &[0xE7];
pub const SIMPLE_BLOCK: &[u8] = &[0xA3];

pub const CUES: &[u8] = &[0x1C, 0x53, 0xBB, 0x6B];
pub const CUE_POINT: &[u8] = &[0xBB];
pub const CUE_TIME: &[u8] = &[0xB3];
pub const CUE_TRACK_POSITIONS: &[u8] = &[0xB7];
pub const CUE_TRACK: &[u8] = &[0xF7];
pub const CUE_CLUSTER_POSITION: &[u8] = &[0xF1];

pub const SEEK_HEAD: &[u8] = &[0x11, 0x4D, 0x9B, 0x74];
pub const SEEK: &[u8] = &[0x4D, 0xBB];
pub const SEEK_ID: &[u8] = &[0x53, 0xAB];
pub const SEEK_POSITION: &[u8] = &[0x53, 0xAC];

/// Encodes `value` as an EBML variable-length size descriptor: the
/// smallest length whose leading marker bit plus payload bits can hold
/// it, reserving the all-ones pattern of that length for "unknown size".
pub fn encode_vint(value: u64) -> Vec<u8> {
    let mut length: u32 = 1;
    while length < 8 {
        let max_value = (1u64 << (7 * length)) - 2;
        if value <= max_value {
            break;
        }
        length += 1;
    }
    let marker = 1u64 << (7 * length);
    let encoded = value | marker;
    encoded.to_be_bytes()[(8 - length as usize)..].to_vec()
}

/// The reserved "unknown size" vint, used by a Segment that streams
/// without a known total length: every value bit set to 1.
pub fn unknown_size(length: usize) -> Vec<u8> {
    let value_bits = (1u64 << (7 * length as u32)) - 1;
    let marker = 1u64 << (7 * length as u32);
    let encoded = value_bits | marker;
    encoded.to_be_bytes()[(8 - length)..].to_vec()
}

/// Wraps `payload` under `id` with its length as a vint.
pub fn element(id: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut w = ByteWriter::with_capacity(id.len() + 9 + payload.len());
    w.write_bytes(id);
    w.write_bytes(&encode_vint(payload.len() as u64));
    w.write_bytes(payload);
    w.into_vec()
}

pub fn uint_element(id: &[u8], value: u64) -> Vec<u8> {
    let width = if value == 0 { 1 } else { ((64 - value.leading_zeros() + 7) / 8) as usize };
    let bytes = value.to_be_bytes();
    element(id, &bytes[8 - width..])
}

pub fn float_element(id: &[u8], value: f64) -> Vec<u8> {
    element(id, &value.to_be_bytes())
}

pub fn string_element(id: &[u8], value: &str) -> Vec<u8> {
    element(id, value.as_bytes())
}
