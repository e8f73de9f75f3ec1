use std::io;

use thiserror::Error;

use crate::seq::SequenceNumber;

/// Errors surfaced to a producer submitting a message to a stream.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The payload plus per-packet overhead does not fit a single packet. The message was
    ///  not enqueued.
    #[error("message of {len} bytes does not fit a single packet (limit {max} bytes)")]
    MessageTooLarge { len: usize, max: usize },

    /// Writing the batch to the recovery log failed. This is fatal for the stream: the
    ///  publisher stops accepting submissions until it is restarted from the log.
    #[error("recovery log write failed: {0}")]
    LogIo(#[source] io::Error),

    /// The stream previously hit a fatal log error and has not been restarted yet.
    #[error("stream is stopped after a fatal recovery log error")]
    StreamFailed,
}

/// Errors of the stream registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("stream '{0}' already exists")]
    StreamAlreadyExists(String),

    #[error("stream '{0}' is not registered")]
    StreamNotFound(String),

    #[error(transparent)]
    Submit(#[from] SubmitError),
}

/// Errors of the recovery log.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("recovery log I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("sequence number {seq} is not in the recovery log")]
    NotFound { seq: SequenceNumber },
}

impl From<LogError> for SubmitError {
    fn from(e: LogError) -> SubmitError {
        match e {
            LogError::Io(io) => SubmitError::LogIo(io),
            // reads by sequence number never happen on the submission path
            LogError::NotFound { .. } => SubmitError::StreamFailed,
        }
    }
}
