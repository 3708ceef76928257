//! MPEG-2 Transport Stream muxer (spec §4.6): each sample becomes one or
//! more PES packets, wrapped in 188-byte TS packets with a 4-bit
//! continuity counter per PID. PAT/PMT are (re)written at the head of
//! every segment.
//!
//! Grounded on `media/formats/mp2t/continuity_counter.cc` for the counter,
//! `ts_packet_writer_util.h` for the general packet-writer shape and
//! `ts_muxer.cc` for the segment/media-start/sample-duration bookkeeping.

use crate::config::Mp4OutputParams;
use crate::error::{PackagerError, Result};
use crate::pipeline::{Dispatcher, Handler, PortIndex, Record};
use crate::sample::{Codec, MediaSample, StreamInfo, StreamKind};
use std::sync::Arc;

const TS_PACKET_SIZE: usize = 188;
const SYNC_BYTE: u8 = 0x47;
const PAT_PID: u16 = 0x0000;
const PMT_PID: u16 = 0x1000;
const VIDEO_PID: u16 = 0x0100;
const AUDIO_PID: u16 = 0x0101;
const TS_TIMESCALE: u32 = 90000;

/// Per-PID continuity counter, 4 bits wrapping mod 16. Matches the
/// original's `(initial_value & 0xF)` construction exactly.
#[derive(Debug, Clone, Copy)]
pub struct ContinuityCounter {
    counter: u8,
}

impl ContinuityCounter {
    pub fn new(initial_value: u8) -> Self {
        Self { counter: initial_value & 0x0F }
    }

    /// Returns the current value, then advances it mod 16.
    pub fn get_next(&mut self) -> u8 {
        let current = self.counter;
        self.counter = (self.counter + 1) & 0x0F;
        current
    }

    pub fn get_current(&self) -> u8 {
        self.counter
    }
}

impl Default for ContinuityCounter {
    fn default() -> Self {
        Self::new(0)
    }
}

/// MPEG-2 CRC32 (poly 0x04C11DB7, init 0xFFFFFFFF, no reflection), used by
/// every PSI section's trailing CRC field.
fn crc32_mpeg2(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= (byte as u32) << 24;
        for _ in 0..8 {
            crc = if crc & 0x8000_0000 != 0 { (crc << 1) ^ 0x04C1_1DB7 } else { crc << 1 };
        }
    }
    crc
}

/// Builds a PSI section (PAT or PMT) with its pointer field, header,
/// payload and trailing CRC32, ready to be split into TS packets.
fn psi_section(table_id: u8, table_id_extension: u16, body: &[u8]) -> Vec<u8> {
    let mut section = Vec::with_capacity(body.len() + 12);
    section.push(0x00); // pointer field
    let section_start = section.len();
    section.push(table_id);
    let section_length = (body.len() + 5 + 4) as u16; // body + header tail + crc
    section.push(0xB0 | ((section_length >> 8) as u8 & 0x0F));
    section.push(section_length as u8);
    section.push((table_id_extension >> 8) as u8);
    section.push(table_id_extension as u8);
    section.push(0xC1); // reserved(2) | version(5)=0 | current_next_indicator(1)=1
    section.push(0x00); // section_number
    section.push(0x00); // last_section_number
    section.extend_from_slice(body);
    let crc = crc32_mpeg2(&section[section_start..]);
    section.extend_from_slice(&crc.to_be_bytes());
    section
}

fn pat_section(program_number: u16, pmt_pid: u16) -> Vec<u8> {
    let mut body = Vec::with_capacity(4);
    body.push((program_number >> 8) as u8);
    body.push(program_number as u8);
    body.push(0xE0 | ((pmt_pid >> 8) as u8 & 0x1F));
    body.push(pmt_pid as u8);
    psi_section(0x00, 1, &body)
}

fn stream_type_for_codec(codec: Codec) -> u8 {
    match codec {
        Codec::H264 => 0x1B,
        Codec::H265 => 0x24,
        Codec::Aac => 0x0F,
        Codec::Ac3 => 0x81,
        Codec::Eac3 => 0x87,
        _ => 0x06, // private data / unsupported
    }
}

fn pmt_section(pcr_pid: u16, stream_pid: u16, stream_type: u8) -> Vec<u8> {
    let mut body = Vec::with_capacity(9);
    body.push(0xE0 | ((pcr_pid >> 8) as u8 & 0x1F));
    body.push(pcr_pid as u8);
    body.push(0xF0); // reserved(4) | program_info_length(12)=0
    body.push(0x00);
    body.push(stream_type);
    body.push(0xE0 | ((stream_pid >> 8) as u8 & 0x1F));
    body.push(stream_pid as u8);
    body.push(0xF0); // reserved(4) | ES_info_length(12)=0
    body.push(0x00);
    psi_section(0x02, 1, &body)
}

/// Four-character audio-type tag for the 13-byte encrypted-audio setup
/// header (spec §4.6).
fn encrypted_audio_setup_fourcc(codec: Codec) -> Option<[u8; 4]> {
    match codec {
        Codec::Aac => Some(*b"zaac"),
        Codec::Ac3 => Some(*b"zac3"),
        Codec::Eac3 => Some(*b"zec3"),
        _ => None,
    }
}

/// Builds the 13-byte audio-setup header encrypted AAC/AC-3/EAC-3 samples
/// are prefixed with: `{fourcc, 16-bit priming=0, 8-bit version=1, 8-bit
/// config length, config bytes}`.
pub fn encrypted_audio_setup_header(codec: Codec, audio_specific_config: &[u8]) -> Option<Vec<u8>> {
    let fourcc = encrypted_audio_setup_fourcc(codec)?;
    let mut header = Vec::with_capacity(8 + audio_specific_config.len());
    header.extend_from_slice(&fourcc);
    header.extend_from_slice(&0u16.to_be_bytes());
    header.push(0x01);
    header.push(audio_specific_config.len() as u8);
    header.extend_from_slice(audio_specific_config);
    Some(header)
}

/// Builds a PES packet header plus payload for one sample. `pts`/`dts` are
/// in 90kHz ticks; `dts` is omitted (PTS-only) when equal to `pts`.
fn pes_packet(stream_id: u8, pts: i64, dts: Option<i64>, payload: &[u8]) -> Vec<u8> {
    let mut pes = Vec::with_capacity(payload.len() + 19);
    pes.extend_from_slice(&[0x00, 0x00, 0x01]); // start code prefix
    pes.push(stream_id);
    let has_dts = dts.is_some();
    let pts_dts_bytes = if has_dts { 10 } else { 5 };
    let header_data_length = pts_dts_bytes;
    let pes_packet_length = (payload.len() + 3 + header_data_length) as u16;
    pes.extend_from_slice(&pes_packet_length.to_be_bytes());
    pes.push(0x80); // '10' marker, no scrambling, no priority
    let pts_dts_flags = if has_dts { 0xC0 } else { 0x80 };
    pes.push(pts_dts_flags);
    pes.push(header_data_length as u8);
    pes.extend_from_slice(&write_timestamp(if has_dts { 0x3 } else { 0x2 }, pts));
    if let Some(dts) = dts {
        pes.extend_from_slice(&write_timestamp(0x1, dts));
    }
    pes.extend_from_slice(payload);
    pes
}

/// Writes a 33-bit PTS/DTS value in the 5-byte marker-bit-interleaved
/// format §2.4.3.7 of the MPEG-2 systems spec describes.
fn write_timestamp(marker: u8, value: i64) -> [u8; 5] {
    let v = (value as u64) & 0x1_FFFF_FFFF;
    let mut out = [0u8; 5];
    out[0] = (marker << 4) | (((v >> 30) as u8 & 0x07) << 1) | 0x01;
    out[1] = (v >> 22) as u8;
    out[2] = (((v >> 15) as u8) & 0xFE) | 0x01;
    out[3] = (v >> 7) as u8;
    out[4] = (((v << 1) as u8) & 0xFE) | 0x01;
    out
}

/// Splits `data` into 188-byte TS packets under `pid`, advancing
/// `continuity_counter` once per packet. `payload_unit_start` marks the
/// first packet only; `pcr` (90kHz-scaled, already `* 300` to the 27MHz
/// program clock) is carried in an adaptation field on that same first
/// packet when present.
fn write_ts_packets(pid: u16, mut data: &[u8], mut payload_unit_start: bool, pcr: Option<u64>, cc: &mut ContinuityCounter, out: &mut Vec<u8>) {
    const PAYLOAD_ONLY_CAPACITY: usize = TS_PACKET_SIZE - 4;
    let mut first = true;
    while !data.is_empty() || first {
        let mut packet = [0xFFu8; TS_PACKET_SIZE];
        packet[0] = SYNC_BYTE;
        packet[1] = ((payload_unit_start as u8) << 6) | ((pid >> 8) as u8 & 0x1F);
        packet[2] = pid as u8;

        let include_pcr = first && pcr.is_some();
        let take = if include_pcr {
            const PCR_RESERVED: usize = 1 + 1 + 6; // adaptation_field_length + flags + PCR
            let capacity = PAYLOAD_ONLY_CAPACITY - PCR_RESERVED;
            let take = data.len().min(capacity);
            let stuffing = capacity - take;
            packet[3] = 0x30 | cc.get_next();
            packet[4] = (1 + 6 + stuffing) as u8; // flags + PCR + stuffing
            packet[5] = 0x10; // PCR_flag
            let base = pcr.unwrap() & 0x1_FFFF_FFFF;
            packet[6] = (base >> 25) as u8;
            packet[7] = (base >> 17) as u8;
            packet[8] = (base >> 9) as u8;
            packet[9] = (base >> 1) as u8;
            packet[10] = (((base << 7) as u8) & 0x80) | 0x7E;
            packet[11] = 0x00;
            let payload_start = 12 + stuffing;
            packet[payload_start..payload_start + take].copy_from_slice(&data[..take]);
            take
        } else {
            let take = data.len().min(PAYLOAD_ONLY_CAPACITY);
            let stuffing = PAYLOAD_ONLY_CAPACITY - take;
            if stuffing == 0 {
                packet[3] = 0x10 | cc.get_next();
                packet[4..4 + take].copy_from_slice(&data[..take]);
            } else {
                packet[3] = 0x30 | cc.get_next();
                if stuffing == 1 {
                    packet[4] = 0x00; // length 0: the byte itself is the only stuffing
                    packet[5..5 + take].copy_from_slice(&data[..take]);
                } else {
                    let af_length = stuffing - 1;
                    packet[4] = af_length as u8;
                    packet[5] = 0x00; // flags byte, no optional fields
                    let payload_start = 4 + 1 + af_length;
                    packet[payload_start..payload_start + take].copy_from_slice(&data[..take]);
                }
            }
            take
        };

        out.extend_from_slice(&packet);
        data = &data[take..];
        payload_unit_start = false;
        first = false;
    }
}

/// TS muxer state: one elementary stream per instance, matching the
/// original's single-stream restriction (`streams().size() > 1` is
/// rejected at init).
pub struct TsMuxer {
    _output_params: Mp4OutputParams,
    stream: Option<Arc<StreamInfo>>,
    video_cc: ContinuityCounter,
    audio_cc: ContinuityCounter,
    pat_cc: ContinuityCounter,
    pmt_cc: ContinuityCounter,
    num_samples_seen: u32,
    segment_buffer: Vec<u8>,
    segment_duration: i64,
    completed: Vec<Vec<u8>>,
}

impl TsMuxer {
    pub fn new(output_params: Mp4OutputParams) -> Self {
        Self {
            _output_params: output_params,
            stream: None,
            video_cc: ContinuityCounter::new(0),
            audio_cc: ContinuityCounter::new(0),
            pat_cc: ContinuityCounter::new(0),
            pmt_cc: ContinuityCounter::new(0),
            num_samples_seen: 0,
            segment_buffer: Vec::new(),
            segment_duration: 0,
            completed: Vec::new(),
        }
    }

    pub fn take_completed_segments(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.completed)
    }

    fn stream_pid(&self, stream_kind: StreamKind) -> u16 {
        if stream_kind == StreamKind::Video {
            VIDEO_PID
        } else {
            AUDIO_PID
        }
    }

    /// Writes PAT+PMT at the head of a new segment, per §4.6.
    fn write_psi(&mut self, stream: &StreamInfo) {
        let pat = pat_section(1, PMT_PID);
        write_ts_packets(PAT_PID, &pat, true, None, &mut self.pat_cc, &mut self.segment_buffer);

        let pid = self.stream_pid(stream.stream_kind);
        let stream_type = stream_type_for_codec(stream.codec);
        let pmt = pmt_section(pid, pid, stream_type);
        write_ts_packets(PMT_PID, &pmt, true, None, &mut self.pmt_cc, &mut self.segment_buffer);
    }

    fn append_sample(&mut self, stream: &StreamInfo, sample: &MediaSample) -> Result<()> {
        let scaled_pts = (sample.pts as i128 * TS_TIMESCALE as i128 / stream.time_scale as i128) as i64;
        let scaled_dts = (sample.dts as i128 * TS_TIMESCALE as i128 / stream.time_scale as i128) as i64;

        let stream_id = if stream.stream_kind == StreamKind::Video { 0xE0 } else { 0xC0 };
        if let Some(cfg) = &sample.decrypt_config {
            cfg.validate_against(sample.payload.len())?;
        }
        let payload = if stream.is_encrypted && stream.stream_kind == StreamKind::Audio {
            match encrypted_audio_setup_header(stream.codec, &stream.codec_config) {
                Some(mut setup) => {
                    setup.extend_from_slice(&sample.payload);
                    setup
                }
                None => sample.payload.clone(),
            }
        } else {
            sample.payload.clone()
        };
        let pes = pes_packet(stream_id, scaled_pts, Some(scaled_dts), &payload);

        let pid = self.stream_pid(stream.stream_kind);
        let pcr = if self.num_samples_seen == 0 { Some((scaled_pts as u64) * 300) } else { None };
        let cc = if stream.stream_kind == StreamKind::Video { &mut self.video_cc } else { &mut self.audio_cc };
        write_ts_packets(pid, &pes, true, pcr, cc, &mut self.segment_buffer);
        Ok(())
    }
}

impl Handler for TsMuxer {
    fn process(&mut self, _input_port: PortIndex, record: Record, _dispatch: &mut dyn Dispatcher) -> Result<()> {
        match record {
            Record::StreamInfo(info) => {
                if self.stream.is_some() {
                    return Err(PackagerError::MuxerFailure("cannot handle more than one stream".into()));
                }
                self.stream = Some(info);
                Ok(())
            }
            Record::MediaSample(sample) => {
                let stream = self
                    .stream
                    .clone()
                    .ok_or_else(|| PackagerError::MuxerFailure("sample before stream info".into()))?;
                if self.segment_buffer.is_empty() {
                    self.write_psi(&stream);
                }
                self.append_sample(&stream, &sample)?;
                self.segment_duration += sample.duration;
                self.num_samples_seen += 1;
                Ok(())
            }
            Record::SegmentInfo(seg) => {
                if seg.is_subsegment {
                    return Ok(());
                }
                if !self.segment_buffer.is_empty() {
                    self.completed.push(std::mem::take(&mut self.segment_buffer));
                    self.segment_duration = 0;
                }
                Ok(())
            }
            Record::CueEvent(_) | Record::Scte35Event(_) | Record::TextSample(_) => Ok(()),
        }
    }

    fn flush(&mut self, _input_port: PortIndex, _dispatch: &mut dyn Dispatcher) -> Result<()> {
        if !self.segment_buffer.is_empty() {
            self.completed.push(std::mem::take(&mut self.segment_buffer));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::DURATION_UNKNOWN;

    #[test]
    fn continuity_counter_wraps_mod_16() {
        let mut cc = ContinuityCounter::new(14);
        assert_eq!(cc.get_next(), 14);
        assert_eq!(cc.get_next(), 15);
        assert_eq!(cc.get_next(), 0);
    }

    #[test]
    fn continuity_counter_masks_initial_value() {
        let cc = ContinuityCounter::new(0xFF);
        assert_eq!(cc.get_current(), 0x0F);
    }

    #[test]
    fn encrypted_audio_setup_header_has_expected_layout() {
        let config = vec![0x12, 0x10];
        let header = encrypted_audio_setup_header(Codec::Aac, &config).unwrap();
        assert_eq!(&header[0..4], b"zaac");
        assert_eq!(&header[4..6], &[0, 0]);
        assert_eq!(header[6], 0x01);
        assert_eq!(header[7], config.len() as u8);
        assert_eq!(&header[8..], &config[..]);
    }

    #[test]
    fn non_audio_codec_has_no_setup_header() {
        assert!(encrypted_audio_setup_header(Codec::H264, &[]).is_none());
    }

    #[test]
    fn pat_section_ends_with_valid_crc() {
        let section = pat_section(1, PMT_PID);
        let len = section.len();
        let crc = u32::from_be_bytes(section[len - 4..].try_into().unwrap());
        assert_eq!(crc32_mpeg2(&section[1..len - 4]), crc);
    }

    fn stream_info(kind: StreamKind, codec: Codec) -> Arc<StreamInfo> {
        Arc::new(StreamInfo {
            stream_kind: kind,
            track_id: 1,
            time_scale: 90000,
            duration: DURATION_UNKNOWN,
            codec,
            codec_string: "avc1.640028".into(),
            codec_config: vec![],
            language: "und".into(),
            is_encrypted: false,
            encryption_config: None,
            width: 1280,
            height: 720,
            channel_count: 0,
            sample_size: 0,
            sample_rate: 0,
        })
    }

    fn sample(pts: i64, duration: i64, key_frame: bool) -> MediaSample {
        MediaSample {
            stream_index: 0,
            dts: pts,
            pts,
            duration,
            is_key_frame: key_frame,
            side_data: vec![],
            payload: vec![0xAB; 300],
            decrypt_config: None,
        }
    }

    struct Null;
    impl Dispatcher for Null {
        fn dispatch(&mut self, _output_port: PortIndex, _record: Record) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn rejects_second_stream() {
        let mut muxer = TsMuxer::new(Mp4OutputParams::default());
        let mut null = Null;
        muxer.process(0, Record::StreamInfo(stream_info(StreamKind::Video, Codec::H264)), &mut null).unwrap();
        let err = muxer.process(0, Record::StreamInfo(stream_info(StreamKind::Video, Codec::H264)), &mut null);
        assert!(err.is_err());
    }

    #[test]
    fn samples_produce_188_byte_aligned_segment() {
        let mut muxer = TsMuxer::new(Mp4OutputParams::default());
        let mut null = Null;
        muxer.process(0, Record::StreamInfo(stream_info(StreamKind::Video, Codec::H264)), &mut null).unwrap();
        for i in 0..3 {
            muxer
                .process(0, Record::MediaSample(sample(i * 3000, 3000, i == 0)), &mut null)
                .unwrap();
        }
        muxer.flush(0, &mut null).unwrap();
        let segments = muxer.take_completed_segments();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].len() % TS_PACKET_SIZE, 0);
        assert_eq!(segments[0][0], SYNC_BYTE);
    }
}
