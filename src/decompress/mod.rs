//! Per-entry content streams.
//!
//! An entry's bytes go through up to three layers before reaching the
//! caller: a length-limited view of the archive, ZipCrypto decryption, and
//! the decompressor for the entry's method. `EntryReader` sits on top and
//! checks CRC-32 and size once the decompressor reports end of stream.

use std::io::{self, Read};

use bzip2::read::BzDecoder;
use flate2::read::DeflateDecoder;

use crate::error::ZipError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,  // 0
    Deflate, // 8
    Bzip2,   // 12
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => Self::Stored,
            8 => Self::Deflate,
            12 => Self::Bzip2,
            n => Self::Unknown(n),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            Self::Stored => 0,
            Self::Deflate => 8,
            Self::Bzip2 => 12,
            Self::Unknown(n) => *n,
        }
    }
}

impl std::fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stored => write!(f, "Stored"),
            Self::Deflate => write!(f, "Deflate"),
            Self::Bzip2 => write!(f, "BZip2"),
            Self::Unknown(n) => write!(f, "Unknown({n})"),
        }
    }
}

pub enum Decompressor<R: Read> {
    Stored(R),
    Deflate(DeflateDecoder<R>),
    Bzip2(BzDecoder<R>),
}

impl<R: Read> Decompressor<R> {
    pub fn new(method: CompressionMethod, reader: R) -> Result<Self, ZipError> {
        match method {
            CompressionMethod::Stored => Ok(Self::Stored(reader)),
            CompressionMethod::Deflate => Ok(Self::Deflate(DeflateDecoder::new(reader))),
            CompressionMethod::Bzip2 => Ok(Self::Bzip2(BzDecoder::new(reader))),
            CompressionMethod::Unknown(n) => Err(ZipError::UnsupportedCompressionMethod(n)),
        }
    }
}

impl<R: Read> Read for Decompressor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Stored(r) => r.read(buf),
            Self::Deflate(r) => r.read(buf),
            Self::Bzip2(r) => r.read(buf),
        }
    }
}

/// Decompressed content of one entry. Reading past the end verifies the
/// CRC-32 and the uncompressed size; a mismatch is returned as an
/// `io::ErrorKind::InvalidData` error wrapping the `ZipError`, which
/// `ZipError::from_stream` unwraps again.
pub struct EntryReader<'a> {
    inner: Decompressor<Box<dyn Read + 'a>>,
    hasher: crc32fast::Hasher,
    expected_crc: u32,
    expected_size: u64,
    read_size: u64,
    verified: bool,
}

impl<'a> EntryReader<'a> {
    pub(crate) fn new(
        inner: Decompressor<Box<dyn Read + 'a>>,
        expected_crc: u32,
        expected_size: u64,
    ) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
            expected_crc,
            expected_size,
            read_size: 0,
            verified: false,
        }
    }

    fn verify(&mut self) -> Result<(), ZipError> {
        if self.read_size != self.expected_size {
            return Err(ZipError::InvalidFileSize {
                expected: self.expected_size,
                got: self.read_size,
            });
        }
        let got = self.hasher.clone().finalize();
        if got != self.expected_crc {
            return Err(ZipError::InvalidFileCrc {
                expected: self.expected_crc,
                got,
            });
        }
        Ok(())
    }
}

impl Read for EntryReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let n = self.inner.read(buf)?;
        if n == 0 {
            if !self.verified {
                self.verify().map_err(ZipError::into_io)?;
                self.verified = true;
            }
            return Ok(0);
        }

        self.hasher.update(&buf[..n]);
        self.read_size += n as u64;
        if self.read_size > self.expected_size {
            return Err(ZipError::InvalidFileSize {
                expected: self.expected_size,
                got: self.read_size,
            }
            .into_io());
        }
        Ok(n)
    }
}
