//! Container muxer selection (spec §4.6, §9 "Polymorphism").
//!
//! Grounded on `app/muxer_factory.cc`'s `CreateMuxer`: one switch from a
//! container name to a concrete muxer, with the shared output options
//! (here, `Mp4OutputParams` and the TS timestamp offset) applied before
//! the muxer is handed back. The original returns a `shared_ptr<Muxer>`
//! picked by an explicit `MediaContainerName`; this crate returns
//! `Box<dyn Handler>` picked by `ContainerType`, reusing the closed sum
//! the muxer-listener protocol already defines (spec §9).

use crate::config::Mp4OutputParams;
use crate::error::{PackagerError, Result};
use crate::listener::ContainerType;
use crate::mp2t::TsMuxer;
use crate::mp4::Mp4Muxer;
use crate::pipeline::Handler;
use crate::sample::Codec;
use crate::text::{TtmlMuxer, WebVttMuxer};
use crate::webm::WebmMuxer;

/// The subset of `MuxerOptions` this core needs to pick and configure a
/// container muxer; everything else (output paths, segment templates,
/// bandwidth) belongs to the notifier/naming layer, not the muxer itself.
#[derive(Debug, Clone, Default)]
pub struct MuxerOptions {
    pub mp4_params: Mp4OutputParams,
    pub transport_stream_timestamp_offset_ms: i32,
    pub seekable_output: bool,
}

/// Picks the codec's natural container the way the original's
/// `GetOutputFormat` flag parsing does, for callers that only know the
/// codec and not an explicit container choice.
pub fn container_for_codec(codec: Codec) -> ContainerType {
    match codec {
        Codec::WebVtt => ContainerType::WebVtt,
        Codec::Ttml => ContainerType::Ttml,
        _ => ContainerType::Mp4,
    }
}

/// Builds the muxer for `container`, configured from `options`. Returns
/// `Unimplemented` for a container/codec pairing this core doesn't
/// support, mirroring the original's `LOG(ERROR)` + null-muxer path.
pub fn create_muxer(container: ContainerType, options: &MuxerOptions) -> Result<Box<dyn Handler>> {
    match container {
        ContainerType::Mp4 => Ok(Box::new(Mp4Muxer::new(options.mp4_params.clone()))),
        ContainerType::Ts => Ok(Box::new(TsMuxer::new(options.mp4_params.clone()))),
        ContainerType::WebM => Ok(Box::new(WebmMuxer::new(options.seekable_output))),
        ContainerType::WebVtt => Ok(Box::new(WebVttMuxer::new(options.transport_stream_timestamp_offset_ms))),
        ContainerType::Ttml => Ok(Box::new(TtmlMuxer::new())),
    }
}

/// Convenience wrapper matching the original's codec-driven container
/// inference, for stream descriptors that don't name a container
/// explicitly.
pub fn create_muxer_for_codec(codec: Codec, options: &MuxerOptions) -> Result<Box<dyn Handler>> {
    if matches!(codec, Codec::Unknown) {
        return Err(PackagerError::Unimplemented("no muxer for unknown codec".into()));
    }
    create_muxer(container_for_codec(codec), options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_webvtt_container_for_webvtt_codec() {
        assert_eq!(container_for_codec(Codec::WebVtt), ContainerType::WebVtt);
    }

    #[test]
    fn picks_ttml_container_for_ttml_codec() {
        assert_eq!(container_for_codec(Codec::Ttml), ContainerType::Ttml);
    }

    #[test]
    fn picks_mp4_container_for_video_codec() {
        assert_eq!(container_for_codec(Codec::H264), ContainerType::Mp4);
    }

    #[test]
    fn create_muxer_builds_every_container_kind() {
        let options = MuxerOptions::default();
        for container in
            [ContainerType::Mp4, ContainerType::Ts, ContainerType::WebM, ContainerType::WebVtt, ContainerType::Ttml]
        {
            assert!(create_muxer(container, &options).is_ok());
        }
    }

    #[test]
    fn create_muxer_for_codec_rejects_unknown() {
        let options = MuxerOptions::default();
        assert!(create_muxer_for_codec(Codec::Unknown, &options).is_err());
    }
}
