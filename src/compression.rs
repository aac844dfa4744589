//! Decompression seam between the raw input descriptor and the framing
//! layer. Three variants: identity, gzip, bzip2. The compression kind is
//! normally detected from the file name suffix.
//!
//! Every decompressor owns its descriptor and releases it exactly once, no
//! matter whether `close` runs zero, one, or several times, and no matter
//! whether the drop happens on the error path.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

use bzip2::read::BzDecoder;
use flate2::read::MultiGzDecoder;

use crate::error::{Error, Result};

/// Bytes requested from the codec per `read` call.
const READ_BLOCK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
}

impl Compression {
    /// Picks the compression from the file name suffix, the same way the
    /// files are produced: `.gz` is gzip, `.bz2` is bzip2, anything else is
    /// uncompressed.
    pub fn detect(path: &str) -> Compression {
        if path.ends_with(".gz") {
            Compression::Gzip
        } else if path.ends_with(".bz2") {
            Compression::Bzip2
        } else {
            Compression::None
        }
    }

    /// Builds the matching decompressor over an already-open descriptor.
    pub fn decompressor(self, fd: OwnedFd) -> Box<dyn Decompressor + Send> {
        match self {
            Compression::None => Box::new(IdentityDecompressor::new(fd)),
            Compression::Gzip => Box::new(GzipDecompressor::new(fd)),
            Compression::Bzip2 => Box::new(Bzip2Decompressor::new(fd)),
        }
    }
}

/// Streaming decompressor contract: `read` yields a chunk of at least one
/// byte, or an empty chunk at end of input; `close` releases the
/// descriptor.
pub trait Decompressor: Send {
    /// Returns the next decompressed chunk, or an empty vector at EOF.
    fn read(&mut self) -> Result<Vec<u8>>;

    /// Releases the underlying descriptor. Safe to call repeatedly; the
    /// descriptor is also released if the decompressor is simply dropped.
    fn close(&mut self);
}

/// Validates a raw descriptor without taking ownership of anything new:
/// `fcntl(F_GETFL)` fails on closed or negative descriptors.
fn validate_raw_fd(fd: RawFd) -> Result<OwnedFd> {
    if fd < 0 || unsafe { libc::fcntl(fd, libc::F_GETFL) } == -1 {
        return Err(Error::system(
            "invalid file descriptor",
            std::io::Error::last_os_error(),
        ));
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

pub struct IdentityDecompressor {
    file: Option<File>,
}

impl IdentityDecompressor {
    pub fn new(fd: OwnedFd) -> Self {
        IdentityDecompressor {
            file: Some(fd.into()),
        }
    }

    /// Takes ownership of a raw descriptor, failing without acquiring
    /// anything if the descriptor is not open.
    pub fn from_raw_fd(fd: RawFd) -> Result<Self> {
        Ok(Self::new(validate_raw_fd(fd)?))
    }
}

impl Decompressor for IdentityDecompressor {
    fn read(&mut self) -> Result<Vec<u8>> {
        let Some(file) = self.file.as_mut() else {
            return Ok(Vec::new());
        };
        let mut buf = vec![0u8; READ_BLOCK_SIZE];
        let n = file
            .read(&mut buf)
            .map_err(|e| Error::system("reading input failed", e))?;
        buf.truncate(n);
        Ok(buf)
    }

    fn close(&mut self) {
        self.file.take();
    }
}

pub struct GzipDecompressor {
    decoder: Option<MultiGzDecoder<BufReader<File>>>,
    started: bool,
}

impl std::fmt::Debug for GzipDecompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GzipDecompressor")
            .field("started", &self.started)
            .finish()
    }
}

impl GzipDecompressor {
    pub fn new(fd: OwnedFd) -> Self {
        GzipDecompressor {
            decoder: Some(MultiGzDecoder::new(BufReader::new(fd.into()))),
            started: false,
        }
    }

    pub fn from_raw_fd(fd: RawFd) -> Result<Self> {
        Ok(Self::new(validate_raw_fd(fd)?))
    }
}

impl Decompressor for GzipDecompressor {
    fn read(&mut self) -> Result<Vec<u8>> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(Vec::new());
        };
        if !self.started {
            self.started = true;
            if input_exhausted(decoder.get_mut())? {
                return Ok(Vec::new());
            }
        }
        let mut buf = vec![0u8; READ_BLOCK_SIZE];
        match decoder.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) => Err(Error::decompression(e)),
        }
    }

    fn close(&mut self) {
        self.decoder.take();
    }
}

pub struct Bzip2Decompressor {
    decoder: Option<BzDecoder<BufReader<File>>>,
    started: bool,
}

impl std::fmt::Debug for Bzip2Decompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bzip2Decompressor")
            .field("started", &self.started)
            .finish()
    }
}

impl Bzip2Decompressor {
    pub fn new(fd: OwnedFd) -> Self {
        Bzip2Decompressor {
            decoder: Some(BzDecoder::new(BufReader::new(fd.into()))),
            started: false,
        }
    }

    pub fn from_raw_fd(fd: RawFd) -> Result<Self> {
        Ok(Self::new(validate_raw_fd(fd)?))
    }
}

impl Decompressor for Bzip2Decompressor {
    fn read(&mut self) -> Result<Vec<u8>> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(Vec::new());
        };
        if !self.started {
            self.started = true;
            if input_exhausted(decoder.get_mut())? {
                return Ok(Vec::new());
            }
        }
        let mut buf = vec![0u8; READ_BLOCK_SIZE];
        match decoder.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) => Err(Error::decompression(e)),
        }
    }

    fn close(&mut self) {
        self.decoder.take();
    }
}

/// A zero-byte file is a clean end of input, not a codec error, so peek the
/// raw stream before the codec ever sees it.
fn input_exhausted(input: &mut BufReader<File>) -> Result<bool> {
    let buf = input
        .fill_buf()
        .map_err(|e| Error::system("reading compressed input failed", e))?;
    Ok(buf.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use bzip2::write::BzEncoder;
    use flate2::write::GzEncoder;
    use tempfile::NamedTempFile;

    fn open_fd(path: &std::path::Path) -> OwnedFd {
        File::open(path).unwrap().into()
    }

    fn read_all(decomp: &mut dyn Decompressor) -> Result<Vec<u8>> {
        let mut all = Vec::new();
        loop {
            let chunk = decomp.read()?;
            if chunk.is_empty() {
                return Ok(all);
            }
            all.extend_from_slice(&chunk);
        }
    }

    #[test]
    fn detect_from_suffix() {
        assert_eq!(Compression::detect("planet.osm.pbf"), Compression::None);
        assert_eq!(Compression::detect("planet.osm.pbf.gz"), Compression::Gzip);
        assert_eq!(Compression::detect("extract.osm.bz2"), Compression::Bzip2);
    }

    #[test]
    fn bzip2_corrupt_file_fails_decompression() {
        let mut file = NamedTempFile::new().unwrap();
        // truncated bzip2 header: magic plus the first block-magic bytes
        file.write_all(b"BZh9\x31\x41\x59").unwrap();
        file.flush().unwrap();

        let mut decomp = Bzip2Decompressor::new(open_fd(file.path()));
        let err = read_all(&mut decomp).unwrap_err();
        assert!(matches!(err, Error::Decompression { .. }));
        decomp.close();
    }

    #[test]
    fn bzip2_empty_file_is_clean_eof() {
        let file = NamedTempFile::new().unwrap();
        let mut decomp = Bzip2Decompressor::new(open_fd(file.path()));
        assert!(decomp.read().unwrap().is_empty());
        assert!(decomp.read().unwrap().is_empty());
    }

    #[test]
    fn bzip2_round_trip() {
        let mut file = NamedTempFile::new().unwrap();
        let mut encoder = BzEncoder::new(Vec::new(), bzip2::Compression::fast());
        encoder.write_all(b"TESTDATA\n").unwrap();
        file.write_all(&encoder.finish().unwrap()).unwrap();
        file.flush().unwrap();

        let mut decomp = Bzip2Decompressor::new(open_fd(file.path()));
        let all = read_all(&mut decomp).unwrap();
        assert!(all.len() >= 9);
        assert_eq!(&all[..8], b"TESTDATA");
    }

    #[test]
    fn invalid_descriptor_fails_without_acquiring_one() {
        let err = Bzip2Decompressor::from_raw_fd(-1).unwrap_err();
        assert!(matches!(err, Error::SystemCall { .. }));
        // 12345: a valid number that is not an open descriptor
        let err = Bzip2Decompressor::from_raw_fd(12345).unwrap_err();
        assert!(matches!(err, Error::SystemCall { .. }));
        let err = GzipDecompressor::from_raw_fd(-1).unwrap_err();
        assert!(matches!(err, Error::SystemCall { .. }));
    }

    #[test]
    fn close_is_idempotent() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"plain bytes").unwrap();
        file.flush().unwrap();

        let mut decomp = IdentityDecompressor::new(open_fd(file.path()));
        assert_eq!(decomp.read().unwrap(), b"plain bytes");
        decomp.close();
        decomp.close();
        assert!(decomp.read().unwrap().is_empty());
    }

    #[test]
    fn gzip_round_trip() {
        let mut file = NamedTempFile::new().unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"TESTDATA\n").unwrap();
        file.write_all(&encoder.finish().unwrap()).unwrap();
        file.flush().unwrap();

        let mut decomp = GzipDecompressor::new(open_fd(file.path()));
        let all = read_all(&mut decomp).unwrap();
        assert_eq!(&all[..], b"TESTDATA\n");
    }

    #[test]
    fn gzip_empty_file_is_clean_eof() {
        let file = NamedTempFile::new().unwrap();
        let mut decomp = GzipDecompressor::new(open_fd(file.path()));
        assert!(decomp.read().unwrap().is_empty());
    }

    #[test]
    fn factory_builds_matching_variant() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"raw").unwrap();
        file.flush().unwrap();
        let mut decomp = Compression::None.decompressor(open_fd(file.path()));
        assert_eq!(read_all(decomp.as_mut()).unwrap(), b"raw");
    }
}
