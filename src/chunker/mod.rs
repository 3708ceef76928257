//! The chunker (spec §4.2): decides segment, subsegment and LL-DASH chunk
//! boundaries for a single stream and emits `SegmentInfo` records at each
//! one.

use crate::config::ChunkingParams;
use crate::error::{PackagerError, Result};
use crate::pipeline::{Dispatcher, Handler, PortIndex, Record};
use crate::sample::{KeyFrameInfo, SegmentInfo, StreamKind};

/// Boundary currently being accumulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoundaryKind {
    Segment,
    Subsegment,
    Chunk,
}

/// Per-stream boundary engine. One instance per input stream; streams
/// sharing cue points coordinate through `crate::cue_queue` upstream of
/// this stage, which only sees already-promoted `CueEvent` records.
pub struct Chunker {
    params: ChunkingParams,
    stream_kind: StreamKind,
    time_scale: u32,
    sequence_number: i64,
    segment_start: i64,
    subsegment_start: i64,
    chunk_start: i64,
    accumulated: i64,
    subsegment_accumulated: i64,
    chunk_accumulated: i64,
    pending_cue_time: Option<f64>,
    key_frames: Vec<KeyFrameInfo>,
    started: bool,
}

impl Chunker {
    pub fn new(params: ChunkingParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            sequence_number: params.start_segment_number,
            params,
            stream_kind: StreamKind::Unknown,
            time_scale: 1,
            segment_start: 0,
            subsegment_start: 0,
            chunk_start: 0,
            accumulated: 0,
            subsegment_accumulated: 0,
            chunk_accumulated: 0,
            pending_cue_time: None,
            key_frames: Vec::new(),
            started: false,
        })
    }

    fn requires_sap(&self, boundary: BoundaryKind) -> bool {
        match self.stream_kind {
            StreamKind::Video => match boundary {
                BoundaryKind::Segment => self.params.segment_sap_aligned,
                BoundaryKind::Subsegment => self.params.subsegment_sap_aligned,
                BoundaryKind::Chunk => false,
            },
            // Audio and text have no SAPs; every sample is a valid boundary.
            _ => false,
        }
    }

    fn target_ticks(&self, boundary: BoundaryKind) -> i64 {
        let secs = match boundary {
            BoundaryKind::Segment => self.params.segment_duration_in_seconds,
            BoundaryKind::Subsegment => self.params.subsegment_duration_in_seconds,
            BoundaryKind::Chunk => self.params.chunk_duration_in_seconds,
        };
        (secs * self.time_scale as f64).round() as i64
    }

    fn cue_due(&self, next_pts: i64) -> bool {
        match self.pending_cue_time {
            Some(t) => {
                let cue_ticks = (t * self.time_scale as f64).round() as i64;
                cue_ticks <= next_pts
            }
            None => false,
        }
    }

    fn emit_segment(&mut self, dispatch: &mut dyn Dispatcher, is_subsegment: bool, is_chunk: bool) -> Result<()> {
        let (start_timestamp, duration) = if is_subsegment {
            (self.subsegment_start, self.subsegment_accumulated)
        } else if is_chunk {
            (self.chunk_start, self.chunk_accumulated)
        } else {
            (self.segment_start, self.accumulated)
        };
        let info = SegmentInfo {
            start_timestamp,
            duration,
            is_subsegment,
            is_chunk,
            key_frames: std::mem::take(&mut self.key_frames),
        };
        dispatch.dispatch(0, Record::SegmentInfo(info))?;
        if !is_subsegment && !is_chunk {
            self.sequence_number += 1;
            self.pending_cue_time = None;
        }
        Ok(())
    }
}

impl Handler for Chunker {
    fn process(&mut self, _input_port: PortIndex, record: Record, dispatch: &mut dyn Dispatcher) -> Result<()> {
        match record {
            Record::StreamInfo(info) => {
                self.stream_kind = info.stream_kind;
                self.time_scale = info.time_scale;
                dispatch.dispatch(0, Record::StreamInfo(info))
            }
            Record::CueEvent(cue) => {
                self.pending_cue_time = Some(cue.time_in_seconds);
                dispatch.dispatch(0, Record::CueEvent(cue))
            }
            Record::MediaSample(sample) => {
                let decode_time = if self.params.timed_text_decode_time >= 0 {
                    self.params.timed_text_decode_time
                } else {
                    sample.pts
                };

                if !self.started {
                    self.started = true;
                    self.segment_start = decode_time;
                    self.subsegment_start = decode_time;
                    self.chunk_start = decode_time;
                } else if decode_time < self.segment_start {
                    return Err(PackagerError::ChunkingError(format!(
                        "sample pts {decode_time} precedes current segment start {}",
                        self.segment_start
                    )));
                }

                if self.params.low_latency_dash_mode {
                    let chunk_target = self.target_ticks(BoundaryKind::Chunk);
                    if self.chunk_accumulated >= chunk_target {
                        self.emit_segment(dispatch, false, true)?;
                        self.chunk_start = decode_time;
                        self.chunk_accumulated = 0;

                        let segment_target = self.target_ticks(BoundaryKind::Segment);
                        if self.accumulated >= segment_target {
                            self.emit_segment(dispatch, false, false)?;
                            self.segment_start = decode_time;
                            self.accumulated = 0;
                        }
                    }
                } else {
                    let segment_target = self.target_ticks(BoundaryKind::Segment);
                    let sub_target = self.target_ticks(BoundaryKind::Subsegment);
                    let sap_ok_segment = !self.requires_sap(BoundaryKind::Segment) || sample.is_key_frame;
                    let sap_ok_sub = !self.requires_sap(BoundaryKind::Subsegment) || sample.is_key_frame;

                    let segment_due = (self.accumulated >= segment_target && sap_ok_segment)
                        || (self.cue_due(decode_time) && sap_ok_segment);

                    if segment_due && self.accumulated > 0 {
                        self.emit_segment(dispatch, false, false)?;
                        self.segment_start = decode_time;
                        self.subsegment_start = decode_time;
                        self.accumulated = 0;
                        self.subsegment_accumulated = 0;
                    } else if sub_target > 0 && self.subsegment_accumulated >= sub_target && sap_ok_sub {
                        self.emit_segment(dispatch, true, false)?;
                        self.subsegment_start = decode_time;
                        self.subsegment_accumulated = 0;
                    }
                }

                if sample.is_key_frame {
                    self.key_frames.push(KeyFrameInfo {
                        timestamp: decode_time.max(0) as u64,
                        start_byte_offset: 0,
                        size: sample.payload.len() as u64,
                    });
                }

                self.accumulated += sample.duration;
                self.subsegment_accumulated += sample.duration;
                self.chunk_accumulated += sample.duration;
                dispatch.dispatch(0, Record::MediaSample(sample))
            }
            other => dispatch.dispatch(0, other),
        }
    }

    fn flush(&mut self, _input_port: PortIndex, dispatch: &mut dyn Dispatcher) -> Result<()> {
        if self.started && self.accumulated > 0 {
            self.emit_segment(dispatch, false, false)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::MediaSample;

    fn sample(pts: i64, duration: i64, key: bool) -> MediaSample {
        MediaSample {
            stream_index: 0,
            dts: pts,
            pts,
            duration,
            is_key_frame: key,
            side_data: Vec::new(),
            payload: vec![0u8; 10],
            decrypt_config: None,
        }
    }

    struct Collector {
        segments: Vec<SegmentInfo>,
    }
    impl Dispatcher for Collector {
        fn dispatch(&mut self, _p: PortIndex, record: Record) -> Result<()> {
            if let Record::SegmentInfo(s) = record {
                self.segments.push(s);
            }
            Ok(())
        }
    }

    #[test]
    fn s1_single_keyframe_sample_closes_on_flush() {
        // spec S1: one 3s key-frame-only sample, target segment 2s, SAP aligned.
        let params = ChunkingParams {
            segment_duration_in_seconds: 2.0,
            ..Default::default()
        };
        let mut chunker = Chunker::new(params).unwrap();
        let mut out = Collector { segments: Vec::new() };
        chunker.stream_kind = StreamKind::Video;
        chunker.time_scale = 1;
        chunker.process(0, Record::MediaSample(sample(0, 3, true)), &mut out).unwrap();
        chunker.flush(0, &mut out).unwrap();
        assert_eq!(out.segments.len(), 1);
        assert_eq!(out.segments[0].start_timestamp, 0);
        assert_eq!(out.segments[0].duration, 3);
    }

    #[test]
    fn rejects_sample_before_segment_start() {
        let mut chunker = Chunker::new(ChunkingParams::default()).unwrap();
        chunker.stream_kind = StreamKind::Audio;
        chunker.time_scale = 1;
        let mut out = Collector { segments: Vec::new() };
        chunker.process(0, Record::MediaSample(sample(10, 1, false)), &mut out).unwrap();
        let err = chunker.process(0, Record::MediaSample(sample(5, 1, false)), &mut out);
        assert!(err.is_err());
    }

    #[test]
    fn segment_only_closes_on_sap_when_required() {
        let params = ChunkingParams { segment_duration_in_seconds: 2.0, ..Default::default() };
        let mut chunker = Chunker::new(params).unwrap();
        chunker.stream_kind = StreamKind::Video;
        chunker.time_scale = 1;
        let mut out = Collector { segments: Vec::new() };
        chunker.process(0, Record::MediaSample(sample(0, 3, true)), &mut out).unwrap();
        // Duration now exceeds target (2) but next sample is not a SAP: must not close yet.
        chunker.process(0, Record::MediaSample(sample(3, 1, false)), &mut out).unwrap();
        assert_eq!(out.segments.len(), 0);
        chunker.process(0, Record::MediaSample(sample(4, 1, true)), &mut out).unwrap();
        assert_eq!(out.segments.len(), 1);
    }
}
