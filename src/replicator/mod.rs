//! Fan-out handler (spec §4.1): forwards every record it receives to each
//! of N downstream output ports unchanged. Used wherever one encoded
//! stream feeds several muxers, e.g. an encrypted CENC stream feeding both
//! an MP4 muxer (for DASH) and a TS muxer (for HLS).

use crate::error::Result;
use crate::pipeline::{Dispatcher, Handler, PortIndex, Record};

/// Replicates every input record to every declared output port. Unlike
/// most handlers this ignores `input_port` entirely — a replicator has
/// exactly one logical input and any number of outputs.
pub struct Replicator {
    output_ports: usize,
}

impl Replicator {
    pub fn new(output_ports: usize) -> Self {
        Self { output_ports }
    }
}

impl Handler for Replicator {
    fn process(&mut self, _input_port: PortIndex, record: Record, dispatch: &mut dyn Dispatcher) -> Result<()> {
        if self.output_ports == 0 {
            return Ok(());
        }
        for port in 0..self.output_ports - 1 {
            dispatch.dispatch(port, record.clone())?;
        }
        dispatch.dispatch(self.output_ports - 1, record)
    }

    fn flush(&mut self, _input_port: PortIndex, dispatch: &mut dyn Dispatcher) -> Result<()> {
        for port in 0..self.output_ports {
            dispatch.dispatch(port, Record::Scte35Event(crate::pipeline::Scte35Event {
                splice_info_section: Vec::new(),
            }))?;
        }
        Ok(())
    }
}
