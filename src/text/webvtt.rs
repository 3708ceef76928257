//! WebVTT muxer (spec §4.6): one text file per segment boundary, starting
//! with `WEBVTT\n`, an optional `X-TIMESTAMP-MAP` header when a transport
//! stream timestamp offset applies, then one cue per text sample.
//!
//! Grounded on `media/formats/webvtt/webvtt_file_buffer.cc` for the
//! header/cue layout and `webvtt_muxer.cc` for the per-file reset.

use crate::error::Result;
use crate::pipeline::{Dispatcher, Handler, PortIndex, Record};
use crate::sample::StreamInfo;
use std::sync::Arc;

const HEADER: &str = "WEBVTT\n";
const TS_TIMESCALE: i64 = 90000;

fn ms_to_webvtt_timestamp(ms: i64) -> String {
    let ms = ms.max(0);
    let hours = ms / 3_600_000;
    let minutes = (ms / 60_000) % 60;
    let seconds = (ms / 1000) % 60;
    let millis = ms % 1000;
    format!("{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
}

/// One per-stream muxer. `transport_stream_timestamp_offset_ms` mirrors
/// the original's constructor argument, converted to 90kHz ticks for the
/// `MPEGTS:` field exactly as `WebVttFileBuffer` does.
pub struct WebVttMuxer {
    transport_stream_timestamp_offset_ms: i32,
    stream: Option<Arc<StreamInfo>>,
    buffer: String,
    completed: Vec<String>,
}

impl WebVttMuxer {
    pub fn new(transport_stream_timestamp_offset_ms: i32) -> Self {
        Self { transport_stream_timestamp_offset_ms, stream: None, buffer: String::new(), completed: Vec::new() }
    }

    pub fn take_completed_segments(&mut self) -> Vec<String> {
        std::mem::take(&mut self.completed)
    }

    fn header(&self) -> String {
        let mut header = String::from(HEADER);
        let offset_ticks = self.transport_stream_timestamp_offset_ms as i64 * TS_TIMESCALE / 1000;
        if offset_ticks > 0 {
            header.push_str(&format!("X-TIMESTAMP-MAP=LOCAL:00:00:00.000,MPEGTS:{offset_ticks}\n"));
        }
        header.push('\n');
        header
    }

    fn reset_buffer(&mut self) {
        self.buffer = self.header();
    }

    fn close_segment(&mut self) {
        if !self.buffer.is_empty() {
            self.completed.push(std::mem::take(&mut self.buffer));
        }
        self.reset_buffer();
    }
}

impl Handler for WebVttMuxer {
    fn process(&mut self, _input_port: PortIndex, record: Record, _dispatch: &mut dyn Dispatcher) -> Result<()> {
        match record {
            Record::StreamInfo(info) => {
                self.stream = Some(info);
                self.reset_buffer();
                Ok(())
            }
            Record::TextSample(sample) => {
                self.buffer.push_str(&ms_to_webvtt_timestamp(sample.start_time));
                self.buffer.push_str(" --> ");
                self.buffer.push_str(&ms_to_webvtt_timestamp(sample.end_time));
                self.buffer.push('\n');
                self.buffer.push_str(&sample.payload);
                self.buffer.push_str("\n\n");
                Ok(())
            }
            Record::SegmentInfo(seg) => {
                if !seg.is_subsegment {
                    self.close_segment();
                }
                Ok(())
            }
            Record::MediaSample(_) | Record::CueEvent(_) | Record::Scte35Event(_) => Ok(()),
        }
    }

    fn flush(&mut self, _input_port: PortIndex, _dispatch: &mut dyn Dispatcher) -> Result<()> {
        self.close_segment();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{Codec, DURATION_UNKNOWN, SegmentInfo, StreamKind, TextSample};

    struct Null;
    impl Dispatcher for Null {
        fn dispatch(&mut self, _output_port: PortIndex, _record: Record) -> Result<()> {
            Ok(())
        }
    }

    fn stream_info() -> Arc<StreamInfo> {
        Arc::new(StreamInfo {
            stream_kind: StreamKind::Text,
            track_id: 1,
            time_scale: 1000,
            duration: DURATION_UNKNOWN,
            codec: Codec::WebVtt,
            codec_string: "wvtt".into(),
            codec_config: vec![],
            language: "en".into(),
            is_encrypted: false,
            encryption_config: None,
            width: 0,
            height: 0,
            channel_count: 0,
            sample_size: 0,
            sample_rate: 0,
        })
    }

    fn segment_info() -> SegmentInfo {
        SegmentInfo { start_timestamp: 0, duration: 6000, is_subsegment: false, is_chunk: false, key_frames: vec![] }
    }

    #[test]
    fn timestamp_formats_hh_mm_ss_mmm() {
        assert_eq!(ms_to_webvtt_timestamp(3_725_250), "01:02:05.250");
    }

    #[test]
    fn header_omits_timestamp_map_without_offset() {
        let muxer = WebVttMuxer::new(0);
        assert_eq!(muxer.header(), "WEBVTT\n\n");
    }

    #[test]
    fn header_includes_timestamp_map_with_offset() {
        let muxer = WebVttMuxer::new(1000);
        assert!(muxer.header().contains("X-TIMESTAMP-MAP=LOCAL:00:00:00.000,MPEGTS:90000\n"));
    }

    #[test]
    fn segment_boundary_produces_one_file_with_header_and_cue() {
        let mut muxer = WebVttMuxer::new(0);
        let mut null = Null;
        muxer.process(0, Record::StreamInfo(stream_info()), &mut null).unwrap();
        muxer
            .process(0, Record::TextSample(TextSample { stream_index: 0, start_time: 1000, end_time: 4000, payload: "hello".into() }), &mut null)
            .unwrap();
        muxer.process(0, Record::SegmentInfo(segment_info()), &mut null).unwrap();
        let segments = muxer.take_completed_segments();
        assert_eq!(segments.len(), 1);
        assert!(segments[0].starts_with("WEBVTT\n"));
        assert!(segments[0].contains("00:00:01.000 --> 00:00:04.000\nhello\n\n"));
    }
}
