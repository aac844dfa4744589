use std::io;
use std::process::ExitStatus;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by the reader pipeline and the relation collector.
///
/// Errors raised on background threads are parked and re-raised by the next
/// call to [`Reader::next_batch`](crate::Reader::next_batch); after any
/// failure the reader is single-shot and only `close()` remains valid.
#[derive(Debug, Error)]
pub enum Error {
    /// A system call (open, pipe, spawn, read, wait) failed.
    #[error("{context}: {source}")]
    SystemCall {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    /// The spawned fetcher process exited with a non-zero status.
    #[error("subprocess {command:?} failed with {status}")]
    Subprocess { command: String, status: ExitStatus },

    /// The gzip/bzip2 stream or an inner zlib payload is malformed.
    #[error("decompression failed: {message}")]
    Decompression { message: String },

    /// The input requires something this reader does not implement
    /// (an LZMA blob, an unknown required header feature).
    #[error("unsupported feature: {feature}")]
    UnsupportedFeature { feature: String },

    /// Framing violated: size out of bounds, wrong block type ordering,
    /// truncated input, or a primitive group of unknown type.
    #[error("protocol violation{}: {message}", fmt_block(.block))]
    Protocol {
        message: String,
        /// Index of the offending data block, when known.
        block: Option<usize>,
    },

    /// A protobuf record did not parse.
    #[error("failed to parse {what}{}", fmt_block(.block))]
    Parse {
        what: &'static str,
        block: Option<usize>,
        #[source]
        source: prost::DecodeError,
    },
}

impl Error {
    pub(crate) fn system(context: &'static str, source: io::Error) -> Self {
        Error::SystemCall { context, source }
    }

    pub(crate) fn decompression(err: impl std::fmt::Display) -> Self {
        Error::Decompression {
            message: err.to_string(),
        }
    }

    pub(crate) fn protocol(message: impl Into<String>, block: Option<usize>) -> Self {
        Error::Protocol {
            message: message.into(),
            block,
        }
    }
}

fn fmt_block(block: &Option<usize>) -> String {
    match block {
        Some(n) => format!(" in block {n}"),
        None => String::new(),
    }
}
