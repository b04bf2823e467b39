//! Builds small ZIP archives in memory for the integration tests.

#![allow(dead_code)]

use std::io::Write;

use unzip_cp932::crypto::{ENCR_HEADER_LEN, ZipCrypto};

pub const METHOD_STORED: u16 = 0;
pub const METHOD_DEFLATE: u16 = 8;
pub const METHOD_BZIP2: u16 = 12;

// 2024-05-17 12:30:00
pub const DOS_TIME: u16 = (12 << 11) | (30 << 5);
pub const DOS_DATE: u16 = ((2024 - 1980) << 9) | (5 << 5) | 17;

/// Encode a name the way Japanese Windows ZIP tools do.
pub fn cp932(name: &str) -> Vec<u8> {
    let (bytes, _, had_errors) = encoding_rs::SHIFT_JIS.encode(name);
    assert!(!had_errors, "{name} is not representable in CP932");
    bytes.into_owned()
}

pub struct Entry {
    name: Vec<u8>,
    data: Vec<u8>,
    method: u16,
    password: Option<Vec<u8>>,
    unix_mode: Option<u32>,
    utf8: bool,
    data_descriptor: bool,
    dir: bool,
}

impl Entry {
    pub fn file(name: impl Into<Vec<u8>>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
            method: METHOD_STORED,
            password: None,
            unix_mode: None,
            utf8: false,
            data_descriptor: false,
            dir: false,
        }
    }

    pub fn dir(name: impl Into<Vec<u8>>) -> Self {
        Self {
            dir: true,
            ..Self::file(name, Vec::new())
        }
    }

    pub fn method(mut self, method: u16) -> Self {
        self.method = method;
        self
    }

    pub fn password(mut self, password: &str) -> Self {
        self.password = Some(password.as_bytes().to_vec());
        self
    }

    pub fn unix_mode(mut self, mode: u32) -> Self {
        self.unix_mode = Some(mode);
        self
    }

    pub fn utf8(mut self) -> Self {
        self.utf8 = true;
        self
    }

    /// Stream-style entry: CRC and sizes follow the data, the local header
    /// carries zeros, and the encryption check byte comes from the DOS time.
    pub fn data_descriptor(mut self) -> Self {
        self.data_descriptor = true;
        self
    }

    fn compressed(&self) -> Vec<u8> {
        match self.method {
            METHOD_DEFLATE => {
                let mut enc =
                    flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
                enc.write_all(&self.data).unwrap();
                enc.finish().unwrap()
            }
            METHOD_BZIP2 => {
                let mut enc =
                    bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
                enc.write_all(&self.data).unwrap();
                enc.finish().unwrap()
            }
            _ => self.data.clone(),
        }
    }

    fn flags(&self) -> u16 {
        let mut flags = 0;
        if self.password.is_some() {
            flags |= 0x0001;
        }
        if self.data_descriptor {
            flags |= 0x0008;
        }
        if self.utf8 {
            flags |= 0x0800;
        }
        flags
    }
}

#[derive(Default)]
pub struct ZipBuilder {
    out: Vec<u8>,
    central: Vec<u8>,
    count: u16,
    comment: Vec<u8>,
    zip64: bool,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn comment(mut self, comment: impl Into<Vec<u8>>) -> Self {
        self.comment = comment.into();
        self
    }

    /// Write sizes and offsets only in ZIP64 extra fields and records. Call
    /// before adding entries.
    pub fn zip64(mut self) -> Self {
        self.zip64 = true;
        self
    }

    pub fn add(mut self, entry: Entry) -> Self {
        let crc = crc32fast::hash(&entry.data);
        let mut payload = entry.compressed();
        if let Some(password) = &entry.password {
            let mut header = [0x42u8; ENCR_HEADER_LEN];
            header[ENCR_HEADER_LEN - 1] = if entry.data_descriptor {
                (DOS_TIME >> 8) as u8
            } else {
                (crc >> 24) as u8
            };
            let mut crypto = ZipCrypto::new(password);
            crypto.encrypt(&mut header);
            crypto.encrypt(&mut payload);
            let mut framed = header.to_vec();
            framed.extend_from_slice(&payload);
            payload = framed;
        }

        let offset = self.out.len() as u64;
        let flags = entry.flags();
        let version: u16 = if self.zip64 { 45 } else { 20 };
        let compressed_len = payload.len() as u64;
        let data_len = entry.data.len() as u64;

        // Sizes as written in the fixed header fields, plus ZIP64 extras.
        let (local_sizes, local_extra) = if self.zip64 {
            ((u32::MAX, u32::MAX), zip64_extra(&[data_len, compressed_len]))
        } else if entry.data_descriptor {
            ((0, 0), Vec::new())
        } else {
            ((compressed_len as u32, data_len as u32), Vec::new())
        };
        let local_crc = if entry.data_descriptor { 0 } else { crc };

        let out = &mut self.out;
        out.extend_from_slice(b"PK\x03\x04");
        out.extend_from_slice(&version.to_le_bytes());
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(&entry.method.to_le_bytes());
        out.extend_from_slice(&DOS_TIME.to_le_bytes());
        out.extend_from_slice(&DOS_DATE.to_le_bytes());
        out.extend_from_slice(&local_crc.to_le_bytes());
        out.extend_from_slice(&local_sizes.0.to_le_bytes());
        out.extend_from_slice(&local_sizes.1.to_le_bytes());
        out.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
        out.extend_from_slice(&(local_extra.len() as u16).to_le_bytes());
        out.extend_from_slice(&entry.name);
        out.extend_from_slice(&local_extra);
        out.extend_from_slice(&payload);

        if entry.data_descriptor {
            out.extend_from_slice(b"PK\x07\x08");
            out.extend_from_slice(&crc.to_le_bytes());
            if self.zip64 {
                out.extend_from_slice(&compressed_len.to_le_bytes());
                out.extend_from_slice(&data_len.to_le_bytes());
            } else {
                out.extend_from_slice(&(compressed_len as u32).to_le_bytes());
                out.extend_from_slice(&(data_len as u32).to_le_bytes());
            }
        }

        let (made_by, external) = match entry.unix_mode {
            Some(mode) => ((3u16 << 8) | 30, mode << 16),
            None => (20, if entry.dir { 0x10 } else { 0x20 }),
        };

        let (central_fields, central_extra) = if self.zip64 {
            (
                (u32::MAX, u32::MAX, u32::MAX),
                zip64_extra(&[data_len, compressed_len, offset]),
            )
        } else {
            (
                (compressed_len as u32, data_len as u32, offset as u32),
                Vec::new(),
            )
        };

        let cd = &mut self.central;
        cd.extend_from_slice(b"PK\x01\x02");
        cd.extend_from_slice(&made_by.to_le_bytes());
        cd.extend_from_slice(&version.to_le_bytes());
        cd.extend_from_slice(&flags.to_le_bytes());
        cd.extend_from_slice(&entry.method.to_le_bytes());
        cd.extend_from_slice(&DOS_TIME.to_le_bytes());
        cd.extend_from_slice(&DOS_DATE.to_le_bytes());
        cd.extend_from_slice(&crc.to_le_bytes());
        cd.extend_from_slice(&central_fields.0.to_le_bytes());
        cd.extend_from_slice(&central_fields.1.to_le_bytes());
        cd.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
        cd.extend_from_slice(&(central_extra.len() as u16).to_le_bytes());
        cd.extend_from_slice(&0u16.to_le_bytes()); // comment
        cd.extend_from_slice(&0u16.to_le_bytes()); // disk number
        cd.extend_from_slice(&0u16.to_le_bytes()); // internal attributes
        cd.extend_from_slice(&external.to_le_bytes());
        cd.extend_from_slice(&central_fields.2.to_le_bytes());
        cd.extend_from_slice(&entry.name);
        cd.extend_from_slice(&central_extra);

        self.count += 1;
        self
    }

    pub fn finish(self) -> Vec<u8> {
        let mut out = self.out;
        let cd_offset = out.len() as u64;
        let cd_size = self.central.len() as u64;
        out.extend_from_slice(&self.central);

        let (count, size, offset) = if self.zip64 {
            let eocd64_offset = out.len() as u64;
            out.extend_from_slice(b"PK\x06\x06");
            out.extend_from_slice(&44u64.to_le_bytes()); // remaining record size
            out.extend_from_slice(&45u16.to_le_bytes()); // made by
            out.extend_from_slice(&45u16.to_le_bytes()); // needed
            out.extend_from_slice(&0u32.to_le_bytes()); // this disk
            out.extend_from_slice(&0u32.to_le_bytes()); // disk with central directory
            out.extend_from_slice(&(self.count as u64).to_le_bytes());
            out.extend_from_slice(&(self.count as u64).to_le_bytes());
            out.extend_from_slice(&cd_size.to_le_bytes());
            out.extend_from_slice(&cd_offset.to_le_bytes());

            out.extend_from_slice(b"PK\x06\x07");
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(&eocd64_offset.to_le_bytes());
            out.extend_from_slice(&1u32.to_le_bytes()); // total disks

            (u16::MAX, u32::MAX, u32::MAX)
        } else {
            (self.count, cd_size as u32, cd_offset as u32)
        };

        out.extend_from_slice(b"PK\x05\x06");
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&(self.comment.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.comment);
        out
    }
}

/// ZIP64 extended information field (0x0001) holding `values` in order.
fn zip64_extra(values: &[u64]) -> Vec<u8> {
    let mut extra = Vec::with_capacity(4 + values.len() * 8);
    extra.extend_from_slice(&0x0001u16.to_le_bytes());
    extra.extend_from_slice(&((values.len() * 8) as u16).to_le_bytes());
    for value in values {
        extra.extend_from_slice(&value.to_le_bytes());
    }
    extra
}
