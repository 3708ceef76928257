//! The WebM muxer (spec §4.6): clusters of blocks with explicit
//! timecodes; seek-head and cues are written at finalize when the output
//! is seekable, otherwise clusters stream without them.
//!
//! Grounded on `media/formats/webm/cluster_builder.h` for the
//! one-cluster-per-segment accumulation shape, `seek_head.h` for the
//! seek-head's position bookkeeping, and `webm_content_encodings.cc` for
//! the `ContentEncoding`/`ContentEncryption` element fields.

pub mod ebml;

use crate::error::{PackagerError, Result};
use crate::pipeline::{Dispatcher, Handler, PortIndex, Record};
use crate::sample::{Codec, MediaSample, StreamInfo, StreamKind};
use ebml::*;
use std::sync::Arc;

/// Nanoseconds per timecode tick: millisecond precision, the common WebM
/// default.
const TIMECODE_SCALE_NS: u64 = 1_000_000;
const TRACK_NUM_VALUE: u64 = 1;

fn codec_id(codec: Codec) -> &'static str {
    match codec {
        Codec::Vp9 => "V_VP9",
        Codec::Opus => "A_OPUS",
        Codec::H264 => "V_MPEG4/ISO/AVC",
        Codec::Aac => "A_AAC",
        _ => "V_UNKNOWN",
    }
}

fn track_entry(stream: &StreamInfo) -> Vec<u8> {
    let track_type: u64 = if stream.stream_kind == StreamKind::Audio { 2 } else { 1 };
    let mut payload = Vec::new();
    payload.extend(uint_element(ebml::TRACK_NUMBER, TRACK_NUM_VALUE));
    payload.extend(uint_element(TRACK_UID, TRACK_NUM_VALUE));
    payload.extend(uint_element(TRACK_TYPE, track_type));
    payload.extend(string_element(CODEC_ID, codec_id(stream.codec)));
    if !stream.codec_config.is_empty() {
        payload.extend(element(CODEC_PRIVATE, &stream.codec_config));
    }

    if stream.stream_kind == StreamKind::Audio {
        let mut audio = Vec::new();
        audio.extend(float_element(SAMPLING_FREQUENCY, stream.sample_rate as f64));
        audio.extend(uint_element(CHANNELS, stream.channel_count as u64));
        audio.extend(uint_element(BIT_DEPTH, stream.sample_size as u64));
        payload.extend(element(AUDIO, &audio));
    } else {
        let mut video = Vec::new();
        video.extend(uint_element(PIXEL_WIDTH, stream.width as u64));
        video.extend(uint_element(PIXEL_HEIGHT, stream.height as u64));
        payload.extend(element(VIDEO, &video));
    }

    if stream.is_encrypted {
        payload.extend(content_encodings(stream));
    }

    element(TRACK_ENTRY, &payload)
}

fn content_encodings(stream: &StreamInfo) -> Vec<u8> {
    let key_id = stream.encryption_config.as_ref().map(|c| c.key_id).unwrap_or([0u8; 16]);
    let mut aes_settings = Vec::new();
    aes_settings.extend(uint_element(AES_SETTINGS_CIPHER_MODE, 1)); // 1 = CTR

    let mut encryption = Vec::new();
    encryption.extend(uint_element(CONTENT_ENC_ALGO, 5)); // 5 = AES
    encryption.extend(element(CONTENT_ENC_KEY_ID, &key_id));
    encryption.extend(element(CONTENT_ENC_AES_SETTINGS, &aes_settings));

    let mut encoding = Vec::new();
    encoding.extend(uint_element(CONTENT_ENCODING_ORDER, 0));
    encoding.extend(uint_element(CONTENT_ENCODING_SCOPE, 1)); // 1 = block data
    encoding.extend(uint_element(CONTENT_ENCODING_TYPE, 1)); // 1 = encryption
    encoding.extend(element(CONTENT_ENCRYPTION, &encryption));

    element(CONTENT_ENCODINGS, &element(CONTENT_ENCODING, &encoding))
}

struct CueEntry {
    timecode: i64,
    cluster_position: u64,
}

/// One elementary stream per instance, matching every other muxer in this
/// core.
pub struct WebmMuxer {
    seekable: bool,
    stream: Option<Arc<StreamInfo>>,
    init_segment: Option<Vec<u8>>,
    pending_samples: Vec<MediaSample>,
    bytes_after_segment_header: u64,
    cue_entries: Vec<CueEntry>,
    completed: Vec<Vec<u8>>,
    trailer: Option<Vec<u8>>,
}

impl WebmMuxer {
    pub fn new(seekable: bool) -> Self {
        Self {
            seekable,
            stream: None,
            init_segment: None,
            pending_samples: Vec::new(),
            bytes_after_segment_header: 0,
            cue_entries: Vec::new(),
            completed: Vec::new(),
            trailer: None,
        }
    }

    pub fn init_segment(&self) -> Option<&[u8]> {
        self.init_segment.as_deref()
    }

    pub fn take_completed_segments(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.completed)
    }

    /// The trailing `Cues`+`SeekHead`, present only once `flush` has run
    /// and the output is seekable.
    pub fn take_trailer(&mut self) -> Option<Vec<u8>> {
        self.trailer.take()
    }

    fn build_init_segment(&mut self, stream: &StreamInfo) -> Vec<u8> {
        let mut ebml_header_payload = Vec::new();
        ebml_header_payload.extend(uint_element(EBML_VERSION, 1));
        ebml_header_payload.extend(uint_element(EBML_READ_VERSION, 1));
        ebml_header_payload.extend(uint_element(&[0x42, 0xF2], 4)); // EBMLMaxIDLength
        ebml_header_payload.extend(uint_element(&[0x42, 0xF3], 8)); // EBMLMaxSizeLength
        ebml_header_payload.extend(string_element(DOC_TYPE, "webm"));
        ebml_header_payload.extend(uint_element(DOC_TYPE_VERSION, 4));
        ebml_header_payload.extend(uint_element(DOC_TYPE_READ_VERSION, 2));
        let ebml_header = element(EBML_HEADER, &ebml_header_payload);

        let mut info_payload = Vec::new();
        info_payload.extend(uint_element(ebml::TIMECODE_SCALE, TIMECODE_SCALE_NS));
        info_payload.extend(string_element(MUXING_APP, "segmenting-muxer-core"));
        info_payload.extend(string_element(WRITING_APP, "segmenting-muxer-core"));
        let info = element(INFO, &info_payload);

        let tracks = element(TRACKS, &track_entry(stream));

        self.bytes_after_segment_header = (info.len() + tracks.len()) as u64;

        let mut out = ebml_header;
        out.extend_from_slice(SEGMENT);
        out.extend(unknown_size(8));
        out.extend(info);
        out.extend(tracks);
        out
    }

    fn build_cluster(&mut self, cluster_timecode_ms: i64, samples: &[MediaSample], stream: &StreamInfo) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend(uint_element(TIMECODE, cluster_timecode_ms.max(0) as u64));
        for sample in samples {
            let relative_timecode_ticks = scale_to_ms(sample.pts, stream.time_scale) - cluster_timecode_ms;
            payload.extend(simple_block(TRACK_NUM_VALUE, relative_timecode_ticks as i16, sample.is_key_frame, &sample.payload));
        }
        element(CLUSTER, &payload)
    }

    fn flush_pending(&mut self) -> Result<()> {
        if self.pending_samples.is_empty() {
            return Ok(());
        }
        let stream = self.stream.clone().ok_or_else(|| PackagerError::MuxerFailure("samples before stream info".into()))?;
        let samples = std::mem::take(&mut self.pending_samples);
        let cluster_timecode_ms = scale_to_ms(samples[0].pts, stream.time_scale);

        self.cue_entries.push(CueEntry { timecode: cluster_timecode_ms, cluster_position: self.bytes_after_segment_header });

        let cluster = self.build_cluster(cluster_timecode_ms, &samples, &stream);
        self.bytes_after_segment_header += cluster.len() as u64;
        self.completed.push(cluster);
        Ok(())
    }

    fn build_trailer(&self) -> Vec<u8> {
        let cues_position = self.bytes_after_segment_header;
        let mut cues_payload = Vec::new();
        for entry in &self.cue_entries {
            let mut positions = Vec::new();
            positions.extend(uint_element(CUE_TRACK, TRACK_NUM_VALUE));
            positions.extend(uint_element(CUE_CLUSTER_POSITION, entry.cluster_position));
            let mut point = Vec::new();
            point.extend(uint_element(CUE_TIME, entry.timecode.max(0) as u64));
            point.extend(element(CUE_TRACK_POSITIONS, &positions));
            cues_payload.extend(element(CUE_POINT, &point));
        }
        let cues = element(CUES, &cues_payload);

        let mut seek_head_payload = Vec::new();
        seek_head_payload.extend(seek_entry(CUES, cues_position));
        let seek_head = element(SEEK_HEAD, &seek_head_payload);

        let mut out = cues;
        out.extend(seek_head);
        out
    }
}

fn seek_entry(target_id: &[u8], position: u64) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend(element(SEEK_ID, target_id));
    payload.extend(uint_element(SEEK_POSITION, position));
    element(SEEK, &payload)
}

fn scale_to_ms(ticks: i64, time_scale: u32) -> i64 {
    (ticks as i128 * 1000 / time_scale as i128) as i64
}

/// `SimpleBlock`: track number vint, a 16-bit signed relative timecode,
/// one flags byte (keyframe bit only; no lacing) and the frame payload.
fn simple_block(track_number: u64, relative_timecode: i16, is_key_frame: bool, data: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(3 + data.len());
    payload.extend(encode_vint(track_number));
    payload.extend(relative_timecode.to_be_bytes());
    payload.push(if is_key_frame { 0x80 } else { 0x00 });
    payload.extend(data);
    element(SIMPLE_BLOCK, &payload)
}

impl Handler for WebmMuxer {
    fn process(&mut self, _input_port: PortIndex, record: Record, _dispatch: &mut dyn Dispatcher) -> Result<()> {
        match record {
            Record::StreamInfo(info) => {
                if self.stream.is_some() {
                    return Err(PackagerError::MuxerFailure("cannot handle more than one stream".into()));
                }
                let built = self.build_init_segment(&info);
                self.init_segment = Some(built);
                self.stream = Some(info);
                Ok(())
            }
            Record::MediaSample(sample) => {
                if let Some(cfg) = &sample.decrypt_config {
                    cfg.validate_against(sample.payload.len())?;
                }
                self.pending_samples.push(sample);
                Ok(())
            }
            Record::SegmentInfo(seg) => {
                if seg.is_subsegment {
                    return Ok(());
                }
                self.flush_pending()
            }
            Record::CueEvent(_) | Record::Scte35Event(_) | Record::TextSample(_) => Ok(()),
        }
    }

    fn flush(&mut self, _input_port: PortIndex, _dispatch: &mut dyn Dispatcher) -> Result<()> {
        self.flush_pending()?;
        if self.seekable {
            self.trailer = Some(self.build_trailer());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::DURATION_UNKNOWN;

    fn stream_info(kind: StreamKind, codec: Codec, encrypted: bool) -> Arc<StreamInfo> {
        Arc::new(StreamInfo {
            stream_kind: kind,
            track_id: 1,
            time_scale: 1000,
            duration: DURATION_UNKNOWN,
            codec,
            codec_string: "vp09.00.10.08".into(),
            codec_config: vec![],
            language: "und".into(),
            is_encrypted: encrypted,
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
            payload: vec![0xCD; 40],
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
    fn init_segment_starts_with_ebml_header() {
        let mut muxer = WebmMuxer::new(false);
        let mut null = Null;
        muxer.process(0, Record::StreamInfo(stream_info(StreamKind::Video, Codec::Vp9, false)), &mut null).unwrap();
        let init = muxer.init_segment().unwrap();
        assert_eq!(&init[0..4], EBML_HEADER);
        assert!(init.windows(SEGMENT.len()).any(|w| w == SEGMENT));
    }

    #[test]
    fn one_segment_boundary_yields_one_cluster() {
        let mut muxer = WebmMuxer::new(true);
        let mut null = Null;
        muxer.process(0, Record::StreamInfo(stream_info(StreamKind::Video, Codec::Vp9, false)), &mut null).unwrap();
        for i in 0..3 {
            muxer.process(0, Record::MediaSample(sample(i * 33, 33, i == 0)), &mut null).unwrap();
        }
        muxer
            .process(
                0,
                Record::SegmentInfo(crate::sample::SegmentInfo { start_timestamp: 0, duration: 100, is_subsegment: false, is_chunk: false, key_frames: vec![] }),
                &mut null,
            )
            .unwrap();
        muxer.flush(0, &mut null).unwrap();

        let segments = muxer.take_completed_segments();
        assert_eq!(segments.len(), 1);
        assert_eq!(&segments[0][0..4], CLUSTER);

        let trailer = muxer.take_trailer().unwrap();
        assert!(trailer.windows(CUES.len()).any(|w| w == CUES));
        assert!(trailer.windows(SEEK_HEAD.len()).any(|w| w == SEEK_HEAD));
    }

    #[test]
    fn non_seekable_output_has_no_trailer() {
        let mut muxer = WebmMuxer::new(false);
        let mut null = Null;
        muxer.process(0, Record::StreamInfo(stream_info(StreamKind::Audio, Codec::Opus, false)), &mut null).unwrap();
        muxer.process(0, Record::MediaSample(sample(0, 20, true)), &mut null).unwrap();
        muxer.flush(0, &mut null).unwrap();
        assert!(muxer.take_trailer().is_none());
    }

    #[test]
    fn encrypted_track_carries_content_encodings() {
        let info = stream_info(StreamKind::Video, Codec::Vp9, true);
        let entry = track_entry(&info);
        assert!(entry.windows(CONTENT_ENCODINGS.len()).any(|w| w == CONTENT_ENCODINGS));
    }
}
