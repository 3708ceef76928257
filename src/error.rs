use thiserror::Error;

/// Crate-wide error type. Every `process`/`flush` call in the pipeline
/// returns `Result<T>`; a non-OK result short-circuits the rest of that
/// pipeline and is surfaced to the job manager as the run's first failure.
#[derive(Error, Debug)]
pub enum PackagerError {
    /// The caller passed an argument that violates a documented invariant
    /// (e.g. `subsegment_sap_aligned` without `segment_sap_aligned`).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A feature was requested that this build does not implement.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// A file-sink operation (open/read/write/seek) failed.
    #[error("file failure: {0}")]
    FileFailure(String),

    /// A read reached the end of the underlying stream where more data
    /// was expected.
    #[error("unexpected end of stream")]
    EndOfStream,

    /// An HTTP file-sink backend returned a non-success status or the
    /// transport failed.
    #[error("http failure: {0}")]
    HttpFailure(String),

    /// A box or text payload could not be parsed.
    #[error("parser failure: {0}")]
    ParserFailure(String),

    /// Key-source failure, or a subsample partition whose clear+cipher
    /// byte counts don't sum to the payload size.
    #[error("encryption failure: {0}")]
    EncryptionFailure(String),

    /// The chunker rejected a sample or boundary request, e.g. a sample
    /// pts before the current segment start.
    #[error("chunking error: {0}")]
    ChunkingError(String),

    /// A muxer-level invariant was violated (bad state transition, box
    /// size overflow, etc).
    #[error("muxer failure: {0}")]
    MuxerFailure(String),

    /// An operation was attempted on a fragment that has already been
    /// finalized and written.
    #[error("fragment already finalized")]
    FragmentFinalized,

    /// Wraps a lower-level I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything not covered by a more specific variant.
    #[error("internal error: {0}")]
    InternalError(String),

    /// The job or queue was cancelled, typically because a sibling
    /// pipeline failed.
    #[error("cancelled")]
    Cancelled,

    /// A blocking operation exceeded its configured deadline.
    #[error("timed out")]
    TimeOut,

    /// A lookup (stream, key, segment) found nothing.
    #[error("not found: {0}")]
    NotFound(String),

    /// An insert collided with an existing entry (e.g. duplicate segment
    /// number).
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A trick-play (I-frame/byte-range) computation failed.
    #[error("trick play error: {0}")]
    TrickPlayError(String),

    /// A worker or pipeline was asked to stop and did so cleanly.
    #[error("stopped")]
    Stopped,

    /// An outward-facing serving error (HTTP PUT backend, callback sink).
    #[error("server error: {0}")]
    ServerError(String),

    /// A failure that doesn't fit any other kind.
    #[error("unknown error: {0}")]
    Unknown(String),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PackagerError>;
