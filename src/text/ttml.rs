//! TTML muxer (spec §4.6): builds `tt > head{styling, layout<region>} >
//! body > div > p` per sample, one document per segment boundary.
//!
//! Grounded on `media/formats/ttml/ttml_muxer.cc`'s per-file
//! accumulate-then-`Dump`-then-`Reset` shape.

use crate::error::Result;
use crate::pipeline::{Dispatcher, Handler, PortIndex, Record};
use crate::sample::{StreamInfo, TextSample};
use std::fmt::Write as _;
use std::sync::Arc;

fn ms_to_ttml_time(ms: i64) -> String {
    let ms = ms.max(0);
    let hours = ms / 3_600_000;
    let minutes = (ms / 60_000) % 60;
    let seconds = (ms / 1000) % 60;
    let millis = ms % 1000;
    format!("{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
}

/// Escapes the five XML predefined entities; TTML cue text carries no
/// markup this core understands, so everything is emitted as plain text.
fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;").replace('\'', "&apos;")
}

/// One per-stream muxer.
pub struct TtmlMuxer {
    language: String,
    stream: Option<Arc<StreamInfo>>,
    pending_samples: Vec<TextSample>,
    completed: Vec<String>,
}

impl TtmlMuxer {
    pub fn new() -> Self {
        Self { language: "und".into(), stream: None, pending_samples: Vec::new(), completed: Vec::new() }
    }

    pub fn take_completed_segments(&mut self) -> Vec<String> {
        std::mem::take(&mut self.completed)
    }

    fn build_document(&self) -> String {
        let mut doc = String::new();
        doc.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        let _ = writeln!(doc, "<tt xmlns=\"http://www.w3.org/ns/ttml\" xml:lang=\"{}\">", escape_xml(&self.language));
        doc.push_str("  <head>\n");
        doc.push_str("    <styling>\n      <style xml:id=\"default\" tts:fontFamily=\"sansSerif\" tts:textAlign=\"center\"/>\n    </styling>\n");
        doc.push_str("    <layout>\n      <region xml:id=\"region0\" tts:origin=\"10% 80%\" tts:extent=\"80% 20%\"/>\n    </layout>\n");
        doc.push_str("  </head>\n");
        doc.push_str("  <body>\n    <div>\n");
        for sample in &self.pending_samples {
            let _ = writeln!(
                doc,
                "      <p begin=\"{}\" end=\"{}\" region=\"region0\">{}</p>",
                ms_to_ttml_time(sample.start_time),
                ms_to_ttml_time(sample.end_time),
                escape_xml(&sample.payload)
            );
        }
        doc.push_str("    </div>\n  </body>\n</tt>\n");
        doc
    }

    fn close_segment(&mut self) {
        self.completed.push(self.build_document());
        self.pending_samples.clear();
    }
}

impl Default for TtmlMuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for TtmlMuxer {
    fn process(&mut self, _input_port: PortIndex, record: Record, _dispatch: &mut dyn Dispatcher) -> Result<()> {
        match record {
            Record::StreamInfo(info) => {
                self.language = info.language.clone();
                self.stream = Some(info);
                Ok(())
            }
            Record::TextSample(sample) => {
                self.pending_samples.push(sample);
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
        if !self.pending_samples.is_empty() {
            self.close_segment();
        }
        Ok(())
    }
}
