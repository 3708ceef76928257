//! Timed-text muxers (spec §4.6): WebVTT and TTML, each producing one
//! text document per segment boundary.

pub mod ttml;
pub mod webvtt;

pub use ttml::TtmlMuxer;
pub use webvtt::WebVttMuxer;
