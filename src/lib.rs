//! # packager-core
//!
//! A segmenting muxer core: chunks elementary streams into segments and
//! subsegments, applies common encryption, muxes the result into
//! fragmented MP4, MPEG-2 TS, WebM, WebVTT or TTML, and reports every
//! step to a muxer-listener for manifest generation.
//!
//! ## Pipeline
//!
//! Per input stream: demuxed samples flow through a chunker, an optional
//! cue-stream filter and replicator, an encryptor, and a container
//! muxer, each implementing [`pipeline::Handler`]. Streams that share
//! timed cue points (ad insertion) rendezvous through one
//! [`cue_queue::SyncPointQueue`]; a [`job::JobManager`] drives one
//! pipeline per input stream, either serially or across a
//! [`job::ThreadPool`], and cancels the cue queue on the first failure.
//!
//! ## Usage
//!
//! ```ignore
//! let muxer = muxer_factory::create_muxer(ContainerType::Mp4, &options)?;
//! let mut chain = pipeline::LinearChain::new(vec![
//!     Box::new(chunker::Chunker::new(chunking_params)),
//!     Box::new(crypto::Encryptor::new(crypto_params, key_source)),
//!     muxer,
//! ]);
//! chain.initialize()?;
//! for record in samples {
//!     chain.process(record)?;
//! }
//! chain.flush()?;
//! ```

pub mod bandwidth;
pub mod bitio;
pub mod chunker;
pub mod config;
pub mod crypto;
pub mod cue_queue;
pub mod error;
pub mod job;
pub mod listener;
pub mod mp2t;
pub mod mp4;
pub mod muxer_factory;
pub mod naming;
pub mod pipeline;
pub mod replicator;
pub mod sample;
pub mod sink;
pub mod text;
pub mod webm;

pub use config::{ChunkingParams, CryptoParams, Mp4OutputParams, ProtectionScheme};
pub use error::{PackagerError, Result};
pub use job::{JobManager, ThreadPool};
pub use muxer_factory::{create_muxer, MuxerOptions};
pub use pipeline::{Handler, LinearChain, Record};
