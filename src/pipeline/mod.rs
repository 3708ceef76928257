//! Handler pipeline (spec §4.1): every stage exposes `initialize`,
//! `process(record)` and `flush(port)`. Downstream ports are wired before
//! `initialize` so the pipeline is a static DAG; a stage may fan out to
//! several downstream handlers (see `crate::replicator`).

use crate::error::Result;
use crate::sample::{CueEvent, MediaSample, SegmentInfo, StreamInfo, TextSample};
use std::sync::Arc;

/// Placeholder for SCTE-35 splice payloads threaded through the pipeline
/// unmodified by stages that don't understand them.
#[derive(Debug, Clone)]
pub struct Scte35Event {
    pub splice_info_section: Vec<u8>,
}

/// A tagged sum over every record kind that can flow through a pipeline.
/// Stages pass through kinds they don't explicitly consume.
#[derive(Debug, Clone)]
pub enum Record {
    StreamInfo(Arc<StreamInfo>),
    MediaSample(MediaSample),
    TextSample(TextSample),
    SegmentInfo(SegmentInfo),
    CueEvent(CueEvent),
    Scte35Event(Scte35Event),
}

impl Record {
    /// The originating stream index, threaded through every record so
    /// fan-in stages can distinguish producers.
    pub fn stream_index(&self) -> Option<usize> {
        match self {
            Record::MediaSample(s) => Some(s.stream_index),
            Record::TextSample(s) => Some(s.stream_index),
            _ => None,
        }
    }
}

/// An input or output port index on a handler. Ports are declared before
/// `initialize`, matching the original's static-DAG wiring.
pub type PortIndex = usize;

/// A pipeline stage. `process` and `flush` never suspend — any rendezvous
/// happens inside `crate::cue_queue` or a file-sink flush, never here
/// (spec §5).
pub trait Handler: Send {
    /// Called once all downstream ports have been wired.
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    /// Handle one record arriving on `input_port`, forwarding zero or more
    /// records to `dispatch`.
    fn process(&mut self, input_port: PortIndex, record: Record, dispatch: &mut dyn Dispatcher) -> Result<()>;

    /// No more records will arrive on `input_port`. Terminal stages close
    /// their sinks here.
    fn flush(&mut self, input_port: PortIndex, dispatch: &mut dyn Dispatcher) -> Result<()>;
}

/// Passed to `Handler::process`/`flush` so a stage can emit records to its
/// declared downstream ports without owning them directly.
pub trait Dispatcher {
    fn dispatch(&mut self, output_port: PortIndex, record: Record) -> Result<()>;
}

/// A simple in-process dispatcher: one handler's outputs feed directly
/// into a fixed list of downstream handlers, one per output port. Used to
/// wire a single-stream chain (chunker -> encryptor -> muxer) without
/// pulling in a general graph executor.
pub struct LinearChain {
    stages: Vec<Box<dyn Handler>>,
}

impl LinearChain {
    pub fn new(stages: Vec<Box<dyn Handler>>) -> Self {
        Self { stages }
    }

    pub fn initialize(&mut self) -> Result<()> {
        for stage in &mut self.stages {
            stage.initialize()?;
        }
        Ok(())
    }

    /// Feeds `record` into stage 0; each stage's single output port feeds
    /// the next stage's single input port (port 0 throughout), the common
    /// case for this crate's per-stream chains.
    pub fn process(&mut self, record: Record) -> Result<()> {
        let mut forward = ForwardQueue::default();
        forward.push(record);
        for stage in &mut self.stages {
            let pending = std::mem::take(&mut forward.records);
            for rec in pending {
                stage.process(0, rec, &mut forward)?;
            }
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        for stage in &mut self.stages {
            let mut forward = ForwardQueue::default();
            stage.flush(0, &mut forward)?;
            // Any records emitted by flush are dropped here; terminal
            // stages (muxers) produce none on flush besides closing sinks.
        }
        Ok(())
    }
}

#[derive(Default)]
struct ForwardQueue {
    records: Vec<Record>,
}

impl Dispatcher for ForwardQueue {
    fn dispatch(&mut self, _output_port: PortIndex, record: Record) -> Result<()> {
        self.records.push(record);
        Ok(())
    }
}
