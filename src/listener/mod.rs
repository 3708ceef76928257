//! Muxer listener / notifier protocol (spec §4.7, §6.3): every muxer
//! reports a fixed event sequence to a registered listener, which an MPD
//! or HLS notifier turns into manifest updates. Modeled as a Rust enum
//! (`Event`) standing in for the original's tagged-union `EventInfo`
//! (`media/event/event_info.h`), with a `MuxerListener` trait taking its
//! place of the virtual base class.

use crate::sample::StreamInfo;
use std::sync::Arc;

/// Container type a muxer reports in `OnMediaStart`, matching the closed
/// muxer-factory sum (spec §9 "Polymorphism").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerType {
    Mp4,
    Ts,
    WebM,
    WebVtt,
    Ttml,
}

/// One encryption key-id/iv/pssh announcement (`OnEncryptionStart` and
/// any later `OnEncryptionUpdate` on key rotation).
#[derive(Debug, Clone)]
pub struct EncryptionEvent {
    pub key_id: [u8; 16],
    pub iv: Vec<u8>,
    pub pssh_payloads: Vec<Vec<u8>>,
}

/// A single byte range, used by `OnMediaEnd`'s `ranges` (init range plus
/// one range per segment, for single-file packaging).
#[derive(Debug, Clone, Copy)]
pub struct ByteRange {
    pub offset: u64,
    pub size: u64,
}

/// The full event sequence a muxer emits over its lifetime, matching
/// spec §4.7's list field-for-field.
#[derive(Debug, Clone)]
pub enum Event {
    MediaStart {
        stream_info: Arc<StreamInfo>,
        time_scale: u32,
        container_type: ContainerType,
    },
    SampleDurationReady {
        duration: i64,
    },
    NewSegment {
        file_name: String,
        start_time: i64,
        duration: i64,
        size: u64,
        segment_number: i64,
    },
    CompletedSegment {
        duration: i64,
        size: u64,
    },
    CueEvent {
        timestamp: i64,
        cue_data: String,
    },
    KeyFrame {
        timestamp: u64,
        start_byte_offset: u64,
        size: u64,
    },
    EncryptionStart(EncryptionEvent),
    EncryptionUpdate(EncryptionEvent),
    MediaEnd {
        ranges: Vec<ByteRange>,
        duration: i64,
    },
}

/// A listener a muxer drives through one media lifetime. Implementors are
/// the MPD and HLS notifiers; tests use `RecordingListener` below.
pub trait MuxerListener: Send {
    fn on_event(&mut self, event: Event);
}

/// Convenience adapter recording every event for assertions, grounded on
/// the `PortRecorder` pattern already used by the replicator's tests.
#[derive(Default)]
pub struct RecordingListener {
    pub events: Vec<Event>,
}

impl MuxerListener for RecordingListener {
    fn on_event(&mut self, event: Event) {
        self.events.push(event);
    }
}

/// Splits a combined codec string on `;` and fans every event out to one
/// child listener per codec variant, narrowing `stream_info`'s
/// `codec_string` per child (spec §4.7's Dolby Vision dual-track case).
pub struct MultiCodecListener {
    children: Vec<Box<dyn MuxerListener>>,
    codec_strings: Vec<String>,
}

impl MultiCodecListener {
    /// `combined_codec_string` is e.g. `"dvh1.05.06;hev1.2.4.L120.B0"`.
    /// `children` must have one entry per `;`-separated component, in
    /// order.
    pub fn new(combined_codec_string: &str, children: Vec<Box<dyn MuxerListener>>) -> Self {
        let codec_strings: Vec<String> = combined_codec_string.split(';').map(|s| s.trim().to_string()).collect();
        Self { children, codec_strings }
    }
}

impl MuxerListener for MultiCodecListener {
    fn on_event(&mut self, event: Event) {
        for (child, codec_string) in self.children.iter_mut().zip(self.codec_strings.iter()) {
            let event = match &event {
                Event::MediaStart { stream_info, time_scale, container_type } => Event::MediaStart {
                    stream_info: Arc::new(stream_info.with_codec_string(codec_string.clone())),
                    time_scale: *time_scale,
                    container_type: *container_type,
                },
                other => other.clone(),
            };
            child.on_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{Codec, StreamKind};

    fn stream_info(codec_string: &str) -> Arc<StreamInfo> {
        Arc::new(StreamInfo {
            stream_kind: StreamKind::Video,
            track_id: 1,
            time_scale: 90000,
            duration: crate::sample::DURATION_UNKNOWN,
            codec: Codec::H265,
            codec_string: codec_string.into(),
            codec_config: vec![],
            language: "und".into(),
            is_encrypted: false,
            encryption_config: None,
            width: 1920,
            height: 1080,
            channel_count: 0,
            sample_size: 0,
            sample_rate: 0,
        })
    }

    #[test]
    fn recording_listener_captures_events_in_order() {
        let mut listener = RecordingListener::default();
        listener.on_event(Event::MediaStart {
            stream_info: stream_info("hev1.2.4.L120.B0"),
            time_scale: 90000,
            container_type: ContainerType::Mp4,
        });
        listener.on_event(Event::NewSegment { file_name: "seg1.m4s".into(), start_time: 0, duration: 180000, size: 1024, segment_number: 1 });
        assert_eq!(listener.events.len(), 2);
    }

    /// Forwards to a shared `RecordingListener` so the test can inspect
    /// recorded events after handing ownership of the child into the
    /// `MultiCodecListener`.
    struct SharedRecorder(Arc<parking_lot::Mutex<RecordingListener>>);
    impl MuxerListener for SharedRecorder {
        fn on_event(&mut self, event: Event) {
            self.0.lock().on_event(event);
        }
    }

    #[test]
    fn multi_codec_listener_narrows_codec_string_per_child() {
        let a = Arc::new(parking_lot::Mutex::new(RecordingListener::default()));
        let b = Arc::new(parking_lot::Mutex::new(RecordingListener::default()));
        let mut multi = MultiCodecListener::new(
            "dvh1.05.06;hev1.2.4.L120.B0",
            vec![Box::new(SharedRecorder(a.clone())), Box::new(SharedRecorder(b.clone()))],
        );

        multi.on_event(Event::MediaStart {
            stream_info: stream_info("dvh1.05.06;hev1.2.4.L120.B0"),
            time_scale: 90000,
            container_type: ContainerType::Mp4,
        });

        assert_eq!(a.lock().events.len(), 1);
        assert_eq!(b.lock().events.len(), 1);
        match &a.lock().events[0] {
            Event::MediaStart { stream_info, .. } => assert_eq!(stream_info.codec_string, "dvh1.05.06"),
            _ => panic!("expected MediaStart"),
        }
        match &b.lock().events[0] {
            Event::MediaStart { stream_info, .. } => assert_eq!(stream_info.codec_string, "hev1.2.4.L120.B0"),
            _ => panic!("expected MediaStart"),
        }
    }
}
