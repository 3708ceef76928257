//! Per-fragment box builders: `moof`/`traf`/`trun` and the sibling boxes
//! that describe one fragment's samples (`tfhd`, `tfdt`, `saiz`/`saio`/
//! `senc` for encrypted fragments), plus `mdat`, `sidx` and `emsg`.
//!
//! `trun.data_offset` and `saio`'s offset field can't be known until the
//! whole fragment (and, for `data_offset`, the `mdat` that follows it) is
//! serialized, so these builders return both the box bytes and the byte
//! position of the field that needs patching — the "patch after
//! serialize" pass the muxer runs once the fragment is fully assembled.

use super::boxes::boxed;
use crate::bitio::ByteWriter;
use crate::sample::SubsampleEntry;

pub const TFHD_DEFAULT_BASE_IS_MOOF: u32 = 0x02_0000;
pub const TFHD_DEFAULT_SAMPLE_DURATION_PRESENT: u32 = 0x00_0008;
pub const TRUN_DATA_OFFSET_PRESENT: u32 = 0x00_0001;
pub const TRUN_SAMPLE_DURATION_PRESENT: u32 = 0x00_0100;
pub const TRUN_SAMPLE_SIZE_PRESENT: u32 = 0x00_0200;
pub const TRUN_SAMPLE_FLAGS_PRESENT: u32 = 0x00_0400;
pub const TRUN_SAMPLE_COMPOSITION_TIME_OFFSET_PRESENT: u32 = 0x00_0800;

fn full_box_header(version: u8, flags: u32) -> ByteWriter {
    let mut w = ByteWriter::new();
    w.write_u8(version);
    w.write_u24(flags);
    w
}

pub fn mfhd(sequence_number: u32) -> Vec<u8> {
    let mut w = full_box_header(0, 0);
    w.write_u32(sequence_number);
    boxed(b"mfhd", w.as_slice())
}

/// `tfhd` with `default-base-is-moof` always set: every sample's data
/// offset is resolved through `trun.data_offset` relative to the start of
/// the enclosing `moof`, never through an implicit running file offset.
pub fn tfhd(track_id: u32, default_sample_duration: u32) -> Vec<u8> {
    let flags = TFHD_DEFAULT_BASE_IS_MOOF | TFHD_DEFAULT_SAMPLE_DURATION_PRESENT;
    let mut w = full_box_header(0, flags);
    w.write_u32(track_id);
    w.write_u32(default_sample_duration);
    boxed(b"tfhd", w.as_slice())
}

/// `tfdt`, version 1 (64-bit) whenever `base_media_decode_time` exceeds
/// 32 bits, version 0 otherwise — the same threshold the original
/// implementation uses to decide the box's size.
pub fn tfdt(base_media_decode_time: u64) -> Vec<u8> {
    if base_media_decode_time > u32::MAX as u64 {
        let mut w = full_box_header(1, 0);
        w.write_u64(base_media_decode_time);
        boxed(b"tfdt", w.as_slice())
    } else {
        let mut w = full_box_header(0, 0);
        w.write_u32(base_media_decode_time as u32);
        boxed(b"tfdt", w.as_slice())
    }
}

pub struct TrunEntry {
    pub duration: u32,
    pub size: u32,
    pub is_key_frame: bool,
    pub composition_time_offset: i32,
}

/// `sample_flags` layout per §8.8.3.1: only `sample_depends_on` and
/// `sample_is_non_sync_sample` are meaningful here (no redundant/padding
/// concepts this core tracks).
fn sample_flags(is_key_frame: bool) -> u32 {
    if is_key_frame {
        0x0200_0000 // sample_depends_on = 2 (does not depend on others)
    } else {
        0x0101_0000 // sample_depends_on = 1, sample_is_non_sync_sample = 1
    }
}

/// Builds `trun` with every optional per-sample field present (duration,
/// size, flags, composition time offset version 1 for negative CTS) and a
/// zeroed `data_offset` placeholder. Returns the box bytes and the byte
/// offset of `data_offset` within them for the muxer's patch pass.
pub fn trun(entries: &[TrunEntry]) -> (Vec<u8>, usize) {
    let flags = TRUN_DATA_OFFSET_PRESENT
        | TRUN_SAMPLE_DURATION_PRESENT
        | TRUN_SAMPLE_SIZE_PRESENT
        | TRUN_SAMPLE_FLAGS_PRESENT
        | TRUN_SAMPLE_COMPOSITION_TIME_OFFSET_PRESENT;
    let mut w = full_box_header(1, flags); // version 1: signed composition offsets
    w.write_u32(entries.len() as u32);
    let data_offset_field_pos = w.len();
    w.write_i32(0); // data_offset placeholder
    for e in entries {
        w.write_u32(e.duration);
        w.write_u32(e.size);
        w.write_u32(sample_flags(e.is_key_frame));
        w.write_i32(e.composition_time_offset);
    }
    let bytes = boxed(b"trun", w.as_slice());
    // data_offset sits 8 bytes (size+fourcc) further into the final boxed output.
    (bytes, data_offset_field_pos + 8)
}

/// `saiz` (auxiliary info sizes), one entry per sample giving the
/// encrypted sample's `senc` entry byte size — only emitted for encrypted
/// tracks with subsample structure (spec §4.4).
pub fn saiz(sample_aux_info_sizes: &[u8]) -> Vec<u8> {
    let mut w = full_box_header(0, 0);
    w.write_u8(0); // default_sample_info_size: 0 means "use the per-sample table"
    w.write_u32(sample_aux_info_sizes.len() as u32);
    w.write_bytes(sample_aux_info_sizes);
    boxed(b"saiz", w.as_slice())
}

/// `saio` (auxiliary info offsets), single entry pointing at the `senc`
/// payload. Offset is relative to the first byte of the enclosing `moof`
/// (no `aux_info_offset` override, the default anchor per §8.7.9).
/// Returns the box bytes and the byte offset of the offset field.
pub fn saio() -> (Vec<u8>, usize) {
    let mut w = full_box_header(0, 0);
    w.write_u32(1); // entry_count
    let offset_field_pos = w.len();
    w.write_u32(0); // offset placeholder
    let bytes = boxed(b"saio", w.as_slice());
    (bytes, offset_field_pos + 8)
}

/// `senc`, the non-standard-but-universal box carrying each sample's IV
/// and subsample clear/cipher partition (spec §4.4). `per_sample_iv_size`
/// of `0` (constant-IV schemes, i.e. `cbcs`) omits the per-sample IV
/// entirely, matching the scheme matrix.
pub fn senc(per_sample_iv_size: u8, entries: &[(Vec<u8>, Vec<SubsampleEntry>)]) -> Vec<u8> {
    let use_subsamples = entries.iter().any(|(_, subs)| subs.len() > 1);
    let flags = if use_subsamples { 0x0000_0002 } else { 0 };
    let mut w = full_box_header(0, flags);
    w.write_u32(entries.len() as u32);
    for (iv, subs) in entries {
        if per_sample_iv_size > 0 {
            w.write_bytes(&iv[..per_sample_iv_size as usize]);
        }
        if use_subsamples {
            w.write_u16(subs.len() as u16);
            for s in subs {
                w.write_u16(s.clear_bytes as u16);
                w.write_u32(s.cipher_bytes);
            }
        }
    }
    boxed(b"senc", w.as_slice())
}

pub fn mdat(payload: &[u8]) -> Vec<u8> {
    boxed(b"mdat", payload)
}

pub struct SidxReference {
    pub referenced_size: u32,
    pub subsegment_duration: u32,
    pub starts_with_sap: bool,
    pub sap_type: u8,
    pub sap_delta_time: u32,
}

/// `sidx`, one reference per subsegment (spec §4.5 / §4.2's LL-DASH
/// chunk-vs-segment distinction: `sidx` always describes segments, never
/// individual chunks).
pub fn sidx(
    reference_id: u32,
    timescale: u32,
    earliest_presentation_time: u64,
    first_offset: u64,
    references: &[SidxReference],
) -> Vec<u8> {
    let version = if earliest_presentation_time > u32::MAX as u64 || first_offset > u32::MAX as u64 {
        1
    } else {
        0
    };
    let mut w = full_box_header(version, 0);
    w.write_u32(reference_id);
    w.write_u32(timescale);
    if version == 1 {
        w.write_u64(earliest_presentation_time);
        w.write_u64(first_offset);
    } else {
        w.write_u32(earliest_presentation_time as u32);
        w.write_u32(first_offset as u32);
    }
    w.write_u16(0); // reserved
    w.write_u16(references.len() as u16);
    for r in references {
        w.write_u32(r.referenced_size & 0x7FFF_FFFF); // reference_type 0: media
        w.write_u32(r.subsegment_duration);
        let sap_delta = r.sap_delta_time & 0x0FFF_FFFF;
        w.write_u32(((r.starts_with_sap as u32) << 31) | ((r.sap_type as u32) << 28) | sap_delta);
    }
    boxed(b"sidx", w.as_slice())
}

/// `emsg`, version 1, used to carry SCTE-35/DASH-event signaling inline in
/// media segments (spec §4.1's `Scte35Event` -> in-band event box path).
pub fn emsg(
    scheme_id_uri: &str,
    value: &str,
    timescale: u32,
    presentation_time: u64,
    event_duration: u32,
    id: u32,
    message_data: &[u8],
) -> Vec<u8> {
    let mut w = full_box_header(1, 0);
    w.write_u32(timescale);
    w.write_u64(presentation_time);
    w.write_u32(event_duration);
    w.write_u32(id);
    w.write_bytes(scheme_id_uri.as_bytes());
    w.write_u8(0);
    w.write_bytes(value.as_bytes());
    w.write_u8(0);
    w.write_bytes(message_data);
    boxed(b"emsg", w.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trun_data_offset_position_is_patchable() {
        let entries = vec![TrunEntry { duration: 3000, size: 512, is_key_frame: true, composition_time_offset: 0 }];
        let (bytes, pos) = trun(&entries);
        let mut w = crate::bitio::ByteWriter::new();
        w.write_bytes(&bytes);
        w.patch_u32(pos, 0xAABBCCDD);
        let patched = w.into_vec();
        assert_eq!(u32::from_be_bytes(patched[pos..pos + 4].try_into().unwrap()), 0xAABBCCDD);
    }

    #[test]
    fn tfdt_uses_version_1_above_32_bits() {
        let small = tfdt(1000);
        assert_eq!(small[8], 0); // version byte
        let large = tfdt(1u64 << 40);
        assert_eq!(large[8], 1);
    }

    #[test]
    fn sidx_reference_count_matches_input() {
        let refs = vec![
            SidxReference { referenced_size: 1000, subsegment_duration: 90000, starts_with_sap: true, sap_type: 1, sap_delta_time: 0 },
            SidxReference { referenced_size: 2000, subsegment_duration: 90000, starts_with_sap: true, sap_type: 1, sap_delta_time: 0 },
        ];
        let b = sidx(1, 90000, 0, 0, &refs);
        assert_eq!(&b[4..8], b"sidx");
        // reference_count is a u16 at a fixed offset for version 0.
        let ref_count_offset = 8 + 4 + 4 + 4 + 4 + 2;
        let count = u16::from_be_bytes(b[ref_count_offset..ref_count_offset + 2].try_into().unwrap());
        assert_eq!(count, 2);
    }
}
