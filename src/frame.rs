//! Framing layer: turns the decompressed byte stream (arriving as queued
//! chunks) into size-prefixed blocks.
//!
//! Each block is a 4-byte big-endian length, a `BlobHeader` of that length,
//! and the blob payload whose size the header declares. The first block
//! must be `OSMHeader`, every following one `OSMData`.

use byteorder::{ByteOrder, NetworkEndian};
use prost::Message;

use crate::error::{Error, Result};
use crate::proto;
use crate::queue::SharedQueue;

/// Upper bound on the encoded BlobHeader.
pub const MAX_BLOB_HEADER_SIZE: usize = 64 * 1024;

/// Upper bound on a blob payload, compressed or not.
pub const MAX_UNCOMPRESSED_BLOB_SIZE: usize = 32 * 1024 * 1024;

enum Pull {
    Full,
    /// Stream ended exactly on a block boundary.
    Eof,
    /// Stream ended mid-record.
    Truncated,
}

/// Pull adapter over the chunk queue fed by the read thread. Buffers
/// chunks until a request can be satisfied in full.
pub struct ChunkSource {
    queue: SharedQueue<Vec<u8>>,
    buffer: Vec<u8>,
    pos: usize,
}

impl ChunkSource {
    pub fn new(queue: SharedQueue<Vec<u8>>) -> Self {
        ChunkSource {
            queue,
            buffer: Vec::new(),
            pos: 0,
        }
    }

    fn available(&self) -> usize {
        self.buffer.len() - self.pos
    }

    fn read_exact(&mut self, out: &mut [u8]) -> Pull {
        while self.available() < out.len() {
            match self.queue.wait_and_pop() {
                Some(chunk) => {
                    if self.pos > 0 {
                        self.buffer.drain(..self.pos);
                        self.pos = 0;
                    }
                    self.buffer.extend_from_slice(&chunk);
                }
                None => {
                    return if self.available() == 0 {
                        Pull::Eof
                    } else {
                        Pull::Truncated
                    };
                }
            }
        }
        out.copy_from_slice(&self.buffer[self.pos..self.pos + out.len()]);
        self.pos += out.len();
        Pull::Full
    }
}

pub struct FrameReader {
    source: ChunkSource,
    /// Index of the next frame, used to locate errors.
    frame_index: usize,
}

impl FrameReader {
    pub fn new(queue: SharedQueue<Vec<u8>>) -> Self {
        FrameReader {
            source: ChunkSource::new(queue),
            frame_index: 0,
        }
    }

    /// Index of the frame most recently returned by [`read_frame`].
    ///
    /// [`read_frame`]: Self::read_frame
    pub fn current_frame(&self) -> usize {
        self.frame_index.saturating_sub(1)
    }

    /// Reads the next frame header and returns the payload size, or 0 at
    /// clean end of input. Fails when the header is oversized, does not
    /// parse, or does not carry `expected_type`.
    pub fn read_frame(&mut self, expected_type: &str) -> Result<usize> {
        let block = Some(self.frame_index);

        let mut size_buf = [0u8; 4];
        match self.source.read_exact(&mut size_buf) {
            Pull::Eof => return Ok(0),
            Pull::Truncated => {
                return Err(Error::protocol("truncated data (EOF encountered)", block))
            }
            Pull::Full => {}
        }

        let header_size = NetworkEndian::read_u32(&size_buf) as usize;
        if header_size > MAX_BLOB_HEADER_SIZE {
            return Err(Error::protocol(
                format!("invalid BlobHeader size {header_size} (> {MAX_BLOB_HEADER_SIZE})"),
                block,
            ));
        }

        let mut header_buf = vec![0u8; header_size];
        if !matches!(self.source.read_exact(&mut header_buf), Pull::Full) {
            return Err(Error::protocol("truncated data (EOF encountered)", block));
        }
        let header = proto::BlobHeader::decode(header_buf.as_slice()).map_err(|e| Error::Parse {
            what: "BlobHeader",
            block,
            source: e,
        })?;

        if header.r#type != expected_type {
            return Err(Error::protocol(
                format!(
                    "blob has type {:?}, expected {:?} \
                     (OSMHeader in first blob, OSMData in following blobs)",
                    header.r#type, expected_type
                ),
                block,
            ));
        }

        let payload_size = header.datasize;
        if payload_size < 0 || payload_size as usize > MAX_UNCOMPRESSED_BLOB_SIZE {
            return Err(Error::protocol(
                format!("invalid blob size: {payload_size}"),
                block,
            ));
        }

        self.frame_index += 1;
        Ok(payload_size as usize)
    }

    /// Reads the payload announced by the preceding [`read_frame`] call.
    ///
    /// [`read_frame`]: Self::read_frame
    pub fn read_payload(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut payload = vec![0u8; len];
        if !matches!(self.source.read_exact(&mut payload), Pull::Full) {
            return Err(Error::protocol(
                "truncated data (EOF encountered)",
                Some(self.current_frame()),
            ));
        }
        Ok(payload)
    }
}
