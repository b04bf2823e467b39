//! PKware ZIP traditional encryption ("ZipCrypto").
//! Keys initialized to [305419896, 591751049, 878082192].
//! Uses CRC32 table for key updates.

use std::io::{self, Read};

pub const ENCR_HEADER_LEN: usize = 12;

/// Standard CRC32 lookup table (polynomial 0xEDB88320).
const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0u32;
    while i < 256 {
        let mut crc = i;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB88320;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i as usize] = crc;
        i += 1;
    }
    table
};

#[derive(Clone)]
pub struct ZipCrypto {
    key: [u32; 3],
}

impl ZipCrypto {
    pub fn new(password: &[u8]) -> Self {
        let mut c = ZipCrypto {
            key: [305419896, 591751049, 878082192],
        };
        for &b in password {
            c.update_keys(b);
        }
        c
    }

    fn crc32_byte(crc: u32, b: u8) -> u32 {
        CRC32_TABLE[((crc ^ b as u32) & 0xff) as usize] ^ (crc >> 8)
    }

    fn update_keys(&mut self, c: u8) {
        self.key[0] = Self::crc32_byte(self.key[0], c);
        self.key[1] = self.key[1].wrapping_add(self.key[0] & 0xff);
        self.key[1] = self.key[1].wrapping_mul(134775813).wrapping_add(1);
        self.key[2] = Self::crc32_byte(self.key[2], (self.key[1] >> 24) as u8);
    }

    fn decrypt_byte(&self) -> u8 {
        let temp = (self.key[2] | 2) as u16;
        ((temp.wrapping_mul(temp ^ 1)) >> 8) as u8
    }

    /// Decrypt the 12-byte encryption header and compare its last byte with
    /// `check_byte` (high byte of the CRC, or of the DOS time when the entry
    /// uses a data descriptor). Leaves the keys positioned at the file data.
    pub fn check_header(&mut self, enc_header: &[u8; ENCR_HEADER_LEN], check_byte: u8) -> bool {
        let mut header = *enc_header;
        self.decrypt(&mut header);
        header[ENCR_HEADER_LEN - 1] == check_byte
    }

    /// Decrypt data in place.
    pub fn decrypt(&mut self, data: &mut [u8]) {
        for b in data.iter_mut() {
            let temp = *b ^ self.decrypt_byte();
            self.update_keys(temp);
            *b = temp;
        }
    }

    /// Encrypt data in place. The extractor never writes archives; this is
    /// the inverse of `decrypt` for building encrypted fixtures.
    pub fn encrypt(&mut self, data: &mut [u8]) {
        for b in data.iter_mut() {
            let plain = *b;
            *b = plain ^ self.decrypt_byte();
            self.update_keys(plain);
        }
    }
}

/// Decrypts everything read from the inner reader.
pub struct ZipCryptoReader<R> {
    inner: R,
    crypto: ZipCrypto,
}

impl<R: Read> ZipCryptoReader<R> {
    pub fn new(inner: R, crypto: ZipCrypto) -> Self {
        Self { inner, crypto }
    }
}

impl<R: Read> Read for ZipCryptoReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.crypto.decrypt(&mut buf[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_keys() {
        let c = ZipCrypto::new(b"");
        assert_eq!(c.key, [305419896, 591751049, 878082192]);
    }

    #[test]
    fn test_key_update_deterministic() {
        let c1 = ZipCrypto::new(b"password");
        let c2 = ZipCrypto::new(b"password");
        assert_eq!(c1.key, c2.key);
    }

    #[test]
    fn test_different_passwords_different_keys() {
        let c1 = ZipCrypto::new(b"abc");
        let c2 = ZipCrypto::new(b"xyz");
        assert_ne!(c1.key, c2.key);
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let data = b"hello world";
        let mut encrypted = *data;
        ZipCrypto::new(b"secret").encrypt(&mut encrypted);
        assert_ne!(&encrypted, data);

        ZipCrypto::new(b"secret").decrypt(&mut encrypted);
        assert_eq!(&encrypted, data);
    }

    #[test]
    fn test_check_header() {
        let mut header = [0x5au8; ENCR_HEADER_LEN];
        header[ENCR_HEADER_LEN - 1] = 0xc3;
        let mut enc = ZipCrypto::new(b"secret");
        enc.encrypt(&mut header);
        let mut payload = *b"payload";
        enc.encrypt(&mut payload);

        let mut c = ZipCrypto::new(b"secret");
        assert!(c.check_header(&header, 0xc3));
        // Keys now sit at the start of the data.
        c.decrypt(&mut payload);
        assert_eq!(&payload, b"payload");
    }

    #[test]
    fn test_reader_decrypts() {
        let mut data = *b"streamed through a reader";
        ZipCrypto::new(b"pw").encrypt(&mut data);

        let mut reader = ZipCryptoReader::new(&data[..], ZipCrypto::new(b"pw"));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"streamed through a reader");
    }

    #[test]
    fn test_crc32_table_spot_check() {
        // CRC32 of 0x00 with polynomial 0xEDB88320
        assert_eq!(CRC32_TABLE[0], 0x00000000);
        assert_eq!(CRC32_TABLE[1], 0x77073096);
        assert_eq!(CRC32_TABLE[255], 0x2D02EF8D);
    }
}
