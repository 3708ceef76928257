//! Stationary (non-fragment) box builders: `ftyp`, `moov` and everything
//! under it. Every function returns a fully length-prefixed box (size +
//! fourcc + payload) ready to concatenate into a parent container, the
//! same shape the original implementation's `Box::WriteHeaderInternal` /
//! `WriteBox` pair produces, collapsed here into one call per box since
//! Rust has no virtual-dispatch box tree to walk.

use crate::bitio::ByteWriter;
use crate::sample::{Codec, StreamInfo, StreamKind};

/// Wraps `payload` in a box: 4-byte big-endian size (including the
/// header) followed by the 4-character type and the payload itself.
pub fn boxed(fourcc: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut w = ByteWriter::with_capacity(8 + payload.len());
    w.write_u32((8 + payload.len()) as u32);
    w.write_fourcc(fourcc);
    w.write_bytes(payload);
    w.into_vec()
}

/// A "full box" payload prefix: version + 24-bit flags.
fn full_box_header(version: u8, flags: u32) -> ByteWriter {
    let mut w = ByteWriter::new();
    w.write_u8(version);
    w.write_u24(flags);
    w
}

pub fn ftyp(major_brand: &[u8; 4], minor_version: u32, compatible_brands: &[[u8; 4]]) -> Vec<u8> {
    let mut w = ByteWriter::new();
    w.write_fourcc(major_brand);
    w.write_u32(minor_version);
    for b in compatible_brands {
        w.write_fourcc(b);
    }
    boxed(b"ftyp", w.as_slice())
}

pub fn styp(major_brand: &[u8; 4], minor_version: u32, compatible_brands: &[[u8; 4]]) -> Vec<u8> {
    let mut w = ByteWriter::new();
    w.write_fourcc(major_brand);
    w.write_u32(minor_version);
    for b in compatible_brands {
        w.write_fourcc(b);
    }
    boxed(b"styp", w.as_slice())
}

pub fn free(payload: &[u8]) -> Vec<u8> {
    boxed(b"free", payload)
}

/// `mvhd`, version 0. Fragmented content carries duration in `sidx`/`mehd`
/// rather than here, so `duration` is `0` for live/unbounded streams and
/// the known total otherwise.
pub fn mvhd(timescale: u32, duration: u32, next_track_id: u32) -> Vec<u8> {
    let mut w = full_box_header(0, 0);
    w.write_u32(0); // creation_time
    w.write_u32(0); // modification_time
    w.write_u32(timescale);
    w.write_u32(duration);
    w.write_i32(0x00010000); // rate 1.0
    w.write_u16(0x0100); // volume 1.0
    w.write_u16(0); // reserved
    w.write_u64(0); // reserved[2]
    // unity matrix
    for v in [0x00010000i32, 0, 0, 0, 0x00010000, 0, 0, 0, 0x40000000] {
        w.write_i32(v);
    }
    w.write_bytes(&[0u8; 24]); // pre_defined
    w.write_u32(next_track_id);
    boxed(b"mvhd", w.as_slice())
}

pub fn tkhd(track_id: u32, duration: u32, width: u16, height: u16, is_audio: bool) -> Vec<u8> {
    let mut w = full_box_header(0, 0x000007); // enabled | in_movie | in_preview
    w.write_u32(0); // creation_time
    w.write_u32(0); // modification_time
    w.write_u32(track_id);
    w.write_u32(0); // reserved
    w.write_u32(duration);
    w.write_u64(0); // reserved[2]
    w.write_i16(0); // layer
    w.write_i16(0); // alternate_group
    w.write_u16(if is_audio { 0x0100 } else { 0 }); // volume
    w.write_u16(0); // reserved
    for v in [0x00010000i32, 0, 0, 0, 0x00010000, 0, 0, 0, 0x40000000] {
        w.write_i32(v);
    }
    w.write_u32((width as u32) << 16);
    w.write_u32((height as u32) << 16);
    boxed(b"tkhd", w.as_slice())
}

pub fn mdhd(timescale: u32, duration: u32, language: &str) -> Vec<u8> {
    let mut w = full_box_header(0, 0);
    w.write_u32(0); // creation_time
    w.write_u32(0); // modification_time
    w.write_u32(timescale);
    w.write_u32(duration);
    w.write_u16(pack_language(language));
    w.write_u16(0); // pre_defined
    boxed(b"mdhd", w.as_slice())
}

/// ISO 639-2/T language code packed into 3x5-bit fields per §8.7.2.3 ("und"
/// when absent or malformed, matching the original's fallback).
fn pack_language(language: &str) -> u16 {
    let bytes: Vec<u8> = language.bytes().take(3).collect();
    if bytes.len() != 3 || !bytes.iter().all(|b| b.is_ascii_lowercase()) {
        return pack_language("und");
    }
    let mut v: u16 = 0;
    for b in bytes {
        v = (v << 5) | ((b - b'a' + 1) as u16);
    }
    v
}

pub fn hdlr(handler_type: &[u8; 4], name: &str) -> Vec<u8> {
    let mut w = full_box_header(0, 0);
    w.write_u32(0); // pre_defined
    w.write_fourcc(handler_type);
    w.write_bytes(&[0u8; 12]); // reserved
    w.write_bytes(name.as_bytes());
    w.write_u8(0); // nul terminator
    boxed(b"hdlr", w.as_slice())
}

pub fn vmhd() -> Vec<u8> {
    let mut w = full_box_header(0, 1);
    w.write_u16(0); // graphicsmode
    w.write_u64(0); // opcolor
    boxed(b"vmhd", w.as_slice())
}

pub fn smhd() -> Vec<u8> {
    let mut w = full_box_header(0, 0);
    w.write_u16(0); // balance
    w.write_u16(0); // reserved
    boxed(b"smhd", w.as_slice())
}

pub fn sthd() -> Vec<u8> {
    boxed(b"sthd", &[])
}

pub fn nmhd() -> Vec<u8> {
    boxed(b"nmhd", &full_box_header(0, 0).into_vec())
}

/// `dinf` containing a single self-contained `url` entry, the universal
/// "media is in this same file" case.
pub fn dinf() -> Vec<u8> {
    let url = boxed(b"url ", &full_box_header(0, 1).into_vec());
    let mut dref = full_box_header(0, 0);
    dref.write_u32(1); // entry_count
    dref.write_bytes(&url);
    boxed(b"dinf", &boxed(b"dref", dref.as_slice()))
}

/// Every fragment carries its own `moof`/`trun`, so `stts`/`stsc`/`stsz`/
/// `stco` in `moov` are always zero-entry placeholders (spec §4.5's "empty
/// `moov` sample tables").
fn empty_table(fourcc: &[u8; 4]) -> Vec<u8> {
    let mut w = full_box_header(0, 0);
    w.write_u32(0); // entry_count
    boxed(fourcc, w.as_slice())
}

fn empty_stsz() -> Vec<u8> {
    let mut w = full_box_header(0, 0);
    w.write_u32(0); // sample_size
    w.write_u32(0); // sample_count
    boxed(b"stsz", w.as_slice())
}

/// A video sample entry (`avc1`/`hev1`/`vp09`), wrapping the opaque
/// decoder-config box the caller already parsed (spec §1: bitstream
/// parsing is out of scope, so this core never synthesizes `avcC` itself).
pub fn video_sample_entry(fourcc: &[u8; 4], width: u16, height: u16, config_box: &[u8]) -> Vec<u8> {
    let mut w = ByteWriter::new();
    w.write_bytes(&[0u8; 6]); // reserved
    w.write_u16(1); // data_reference_index
    w.write_u16(0); // pre_defined
    w.write_u16(0); // reserved
    w.write_bytes(&[0u8; 12]); // pre_defined[3]
    w.write_u16(width);
    w.write_u16(height);
    w.write_u32(0x00480000); // horizresolution 72dpi
    w.write_u32(0x00480000); // vertresolution 72dpi
    w.write_u32(0); // reserved
    w.write_u16(1); // frame_count
    w.write_bytes(&[0u8; 32]); // compressorname
    w.write_u16(0x0018); // depth
    w.write_i16(-1); // pre_defined
    w.write_bytes(config_box);
    boxed(fourcc, w.as_slice())
}

/// An audio sample entry (`mp4a`/`ac-3`/`ec-3`/`Opus`), version 0.
pub fn audio_sample_entry(
    fourcc: &[u8; 4],
    channel_count: u16,
    sample_size: u16,
    sample_rate: u32,
    config_box: &[u8],
) -> Vec<u8> {
    let mut w = ByteWriter::new();
    w.write_bytes(&[0u8; 6]); // reserved
    w.write_u16(1); // data_reference_index
    w.write_u32(0); // reserved[2]
    w.write_u16(channel_count);
    w.write_u16(sample_size);
    w.write_u16(0); // pre_defined
    w.write_u16(0); // reserved
    w.write_u32(sample_rate << 16); // 16.16 fixed point
    w.write_bytes(config_box);
    boxed(fourcc, w.as_slice())
}

/// A text sample entry (`wvtt`/`stpp`), which is just a `config_box`
/// payload with no fixed geometry fields.
pub fn text_sample_entry(fourcc: &[u8; 4], config_box: &[u8]) -> Vec<u8> {
    let mut w = ByteWriter::new();
    w.write_bytes(&[0u8; 6]); // reserved
    w.write_u16(1); // data_reference_index
    w.write_bytes(config_box);
    boxed(fourcc, w.as_slice())
}

/// `sinf` wrapping an encrypted sample entry's original format, scheme type
/// and `tenc` (spec §4.4's "Protection scheme information box").
pub fn sinf(original_format: &[u8; 4], scheme: &[u8; 4], tenc_box: &[u8]) -> Vec<u8> {
    let frma = boxed(b"frma", original_format);
    let mut schm_w = full_box_header(0, 0);
    schm_w.write_fourcc(scheme);
    schm_w.write_u32(0x00010000); // scheme_version 1.0
    let schm = boxed(b"schm", schm_w.as_slice());
    let schi = boxed(b"schi", tenc_box);
    let mut payload = Vec::new();
    payload.extend(frma);
    payload.extend(schm);
    payload.extend(schi);
    boxed(b"sinf", &payload)
}

/// `tenc`, version 1 when a pattern scheme is in use (so `crypt_byte_block`/
/// `skip_byte_block` are present), version 0 otherwise.
pub fn tenc(
    is_pattern_based: bool,
    crypt_byte_block: u8,
    skip_byte_block: u8,
    per_sample_iv_size: u8,
    key_id: &[u8; 16],
    constant_iv: Option<&[u8]>,
) -> Vec<u8> {
    let version = if is_pattern_based { 1 } else { 0 };
    let mut w = full_box_header(version, 0);
    w.write_u8(0); // reserved
    if version == 1 {
        w.write_u8((crypt_byte_block << 4) | (skip_byte_block & 0x0F));
    } else {
        w.write_u8(0); // reserved
    }
    w.write_u8(1); // default_isProtected
    w.write_u8(per_sample_iv_size);
    w.write_bytes(key_id);
    if per_sample_iv_size == 0 {
        if let Some(iv) = constant_iv {
            w.write_u8(iv.len() as u8);
            w.write_bytes(iv);
        }
    }
    boxed(b"tenc", w.as_slice())
}

/// `pssh`, version 1 (carries explicit key ids, the form every modern DRM
/// system expects in a CMAF init segment).
pub fn pssh(system_id: &[u8; 16], key_ids: &[[u8; 16]], data: &[u8]) -> Vec<u8> {
    let mut w = full_box_header(1, 0);
    w.write_bytes(system_id);
    w.write_u32(key_ids.len() as u32);
    for kid in key_ids {
        w.write_bytes(kid);
    }
    w.write_u32(data.len() as u32);
    w.write_bytes(data);
    boxed(b"pssh", w.as_slice())
}

/// `stsd` wrapping a single sample entry, `entry_count` is always 1: this
/// core never multiplexes alternate sample descriptions into one track.
pub fn stsd(entry: &[u8]) -> Vec<u8> {
    let mut w = full_box_header(0, 0);
    w.write_u32(1); // entry_count
    w.write_bytes(entry);
    boxed(b"stsd", w.as_slice())
}

pub fn stbl(sample_entry: &[u8]) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend(stsd(sample_entry));
    payload.extend(empty_table(b"stts"));
    payload.extend(empty_table(b"stsc"));
    payload.extend(empty_stsz());
    payload.extend(empty_table(b"stco"));
    boxed(b"stbl", &payload)
}

pub fn minf(stream_kind: StreamKind, sample_entry: &[u8]) -> Vec<u8> {
    let media_header = match stream_kind {
        StreamKind::Video => vmhd(),
        StreamKind::Audio => smhd(),
        StreamKind::Text => sthd(),
        StreamKind::Unknown => nmhd(),
    };
    let mut payload = Vec::new();
    payload.extend(media_header);
    payload.extend(dinf());
    payload.extend(stbl(sample_entry));
    boxed(b"minf", &payload)
}

pub fn mdia(info: &StreamInfo, sample_entry: &[u8]) -> Vec<u8> {
    let handler_type: &[u8; 4] = match info.stream_kind {
        StreamKind::Video => b"vide",
        StreamKind::Audio => b"soun",
        StreamKind::Text => b"text",
        StreamKind::Unknown => b"meta",
    };
    let mut payload = Vec::new();
    payload.extend(mdhd(info.time_scale, 0, &info.language));
    payload.extend(hdlr(handler_type, codec_handler_name(info.codec)));
    payload.extend(minf(info.stream_kind, sample_entry));
    boxed(b"mdia", &payload)
}

fn codec_handler_name(codec: Codec) -> &'static str {
    match codec {
        Codec::H264 | Codec::H265 | Codec::Vp9 => "VideoHandler",
        Codec::Aac | Codec::Ac3 | Codec::Eac3 | Codec::Opus => "SoundHandler",
        Codec::WebVtt | Codec::Ttml => "TextHandler",
        Codec::Unknown => "Handler",
    }
}

pub fn trak(info: &StreamInfo, sample_entry: &[u8]) -> Vec<u8> {
    let is_audio = info.stream_kind == StreamKind::Audio;
    let mut payload = Vec::new();
    payload.extend(tkhd(info.track_id, 0, info.width, info.height, is_audio));
    payload.extend(mdia(info, sample_entry));
    boxed(b"trak", &payload)
}

/// `trex`, one per track, inside `mvex`.
pub fn trex(track_id: u32, default_sample_description_index: u32) -> Vec<u8> {
    let mut w = full_box_header(0, 0);
    w.write_u32(track_id);
    w.write_u32(default_sample_description_index);
    w.write_u32(0); // default_sample_duration (set per-fragment in tfhd)
    w.write_u32(0); // default_sample_size
    w.write_u32(0); // default_sample_flags
    boxed(b"trex", w.as_slice())
}

pub fn mvex(track_ids: &[u32]) -> Vec<u8> {
    let mut payload = Vec::new();
    for &id in track_ids {
        payload.extend(trex(id, 1));
    }
    boxed(b"mvex", &payload)
}

pub fn moov(timescale: u32, next_track_id: u32, traks: &[Vec<u8>], pssh_boxes: &[Vec<u8>]) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend(mvhd(timescale, 0, next_track_id));
    for trak in traks {
        payload.extend(trak.clone());
    }
    let track_ids: Vec<u32> = (1..next_track_id).collect();
    payload.extend(mvex(&track_ids));
    for p in pssh_boxes {
        payload.extend(p.clone());
    }
    boxed(b"moov", &payload)
}
