use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::crypto::{ENCR_HEADER_LEN, ZipCrypto, ZipCryptoReader};
use crate::decompress::{CompressionMethod, Decompressor, EntryReader};
use crate::dostime::DosDateTime;
use crate::encoding::{cp932_to_utf8, utf8_name};
use crate::error::{ZipError, ZipResult};

// ZIP signatures (little-endian u32)
const SIG_LOCAL_FILE_HEADER: u32 = 0x04034b50; // "PK\x03\x04"
const SIG_CENTRAL_DIRECTORY: u32 = 0x02014b50; // "PK\x01\x02"
const SIG_END_OF_CENTRAL_DIR: u32 = 0x06054b50; // "PK\x05\x06"
const SIG_ZIP64_END_OF_CENTRAL_DIR: u32 = 0x06064b50; // "PK\x06\x06"
const SIG_ZIP64_EOCD_LOCATOR: u32 = 0x07064b50; // "PK\x06\x07"

const EOCD_SIZE: usize = 22;
const ZIP64_EOCD_LOCATOR_SIZE: usize = 20;
const ZIP64_EOCD_MIN_SIZE: usize = 56;
const CDFH_MIN_SIZE: usize = 46;
const LFH_SIZE: usize = 30;
const MAX_COMMENT_SIZE: usize = 65535;

const EXTRA_ZIP64: u16 = 0x0001;

// General purpose flags
const FLAG_ENCRYPTED: u16 = 0x0001;
const FLAG_DATA_DESCR: u16 = 0x0008;
const FLAG_STRONG_ENCRYPTION: u16 = 0x0040;
const FLAG_UTF8: u16 = 0x0800;

// WinZip AES marks entries with this pseudo compression method.
const METHOD_AES: u16 = 99;

// Host system, upper byte of "version made by"
const HOST_UNIX: u8 = 3;
const HOST_OSX: u8 = 19;

// MS-DOS attributes, low byte of the external attributes
pub const ATTR_READONLY: u32 = 0x01;
pub const ATTR_DIRECTORY: u32 = 0x10;

const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;

#[derive(Debug, Clone)]
pub struct ZipEntry {
    /// File name exactly as stored; its encoding depends on `is_utf8`.
    pub raw_name: Vec<u8>,
    pub version_made_by: u16,
    pub flags: u16,
    pub compression_method: CompressionMethod,
    pub modified: DosDateTime,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub external_attributes: u32,
    pub header_offset: u64,
    pub data_pos: u64,
}

impl ZipEntry {
    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    pub fn uses_strong_encryption(&self) -> bool {
        self.flags & FLAG_STRONG_ENCRYPTION != 0
            || self.compression_method.as_u16() == METHOD_AES
    }

    pub fn has_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCR != 0
    }

    /// Language encoding flag: the name is UTF-8, not CP932.
    pub fn is_utf8(&self) -> bool {
        self.flags & FLAG_UTF8 != 0
    }

    pub fn host_system(&self) -> u8 {
        (self.version_made_by >> 8) as u8
    }

    fn stored_unix_mode(&self) -> Option<u32> {
        matches!(self.host_system(), HOST_UNIX | HOST_OSX)
            .then_some(self.external_attributes >> 16)
            .filter(|&mode| mode != 0)
    }

    pub fn is_dir(&self) -> bool {
        self.raw_name.last() == Some(&b'/')
            || self.external_attributes & ATTR_DIRECTORY != 0
            || self
                .stored_unix_mode()
                .is_some_and(|mode| mode & S_IFMT == S_IFDIR)
    }

    /// Permission bits to create the entry with. Unix hosts store them in the
    /// upper half of the external attributes; other hosts only have the DOS
    /// read-only bit.
    pub fn unix_mode(&self) -> u32 {
        match self.stored_unix_mode().map(|mode| mode & 0o777) {
            Some(perm) if perm != 0 => perm,
            _ if self.is_dir() => 0o755,
            _ if self.external_attributes & ATTR_READONLY != 0 => 0o444,
            _ => 0o644,
        }
    }

    /// Last byte of the decrypted encryption header must match this.
    pub fn password_check_byte(&self) -> u8 {
        if self.has_data_descriptor() {
            (self.modified.time >> 8) as u8
        } else {
            (self.crc32 >> 24) as u8
        }
    }

    pub fn decoded_name(&self) -> ZipResult<String> {
        if self.is_utf8() {
            utf8_name(&self.raw_name)
        } else {
            cp932_to_utf8(&self.raw_name)
        }
    }

    /// Raw name with non-ASCII bytes escaped, for messages about names that
    /// may not decode.
    pub fn escaped_name(&self) -> String {
        self.raw_name.escape_ascii().to_string()
    }
}

struct EndOfCentralDirectory {
    disk_entries: u16,
    total_entries: u16,
    cd_size: u32,
    cd_offset: u32,
}

impl EndOfCentralDirectory {
    fn from_bytes(data: &[u8]) -> io::Result<Self> {
        let mut cursor = Cursor::new(&data[4..]);
        let _disk_number = cursor.read_u16::<LittleEndian>()?;
        let _disk_with_cd = cursor.read_u16::<LittleEndian>()?;
        Ok(Self {
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
        })
    }

    fn is_zip64(&self) -> bool {
        self.disk_entries == 0xFFFF
            || self.total_entries == 0xFFFF
            || self.cd_size == 0xFFFFFFFF
            || self.cd_offset == 0xFFFFFFFF
    }
}

/// Central directory location: (offset, size, entry count).
type CentralDirectory = (u64, u64, u64);

pub struct ZipArchive<R> {
    reader: R,
    entries: Vec<ZipEntry>,
}

impl ZipArchive<File> {
    pub fn open<P: AsRef<Path>>(path: P) -> ZipResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ZipError::CantOpenFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::new(file)
    }
}

impl ZipArchive<Cursor<Vec<u8>>> {
    /// Archive held in memory (e.g. read from stdin).
    pub fn from_bytes(data: Vec<u8>) -> ZipResult<Self> {
        Self::new(Cursor::new(data))
    }
}

impl<R: Read + Seek> ZipArchive<R> {
    pub fn new(mut reader: R) -> ZipResult<Self> {
        let file_size = reader.seek(SeekFrom::End(0))?;
        let (eocd, eocd_offset) = find_eocd(&mut reader, file_size)?;

        let (cd_offset, cd_size, total_entries) = if eocd.is_zip64() {
            read_zip64_eocd(&mut reader, eocd_offset)?
        } else {
            (
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.total_entries as u64,
            )
        };

        if cd_offset
            .checked_add(cd_size)
            .is_none_or(|cd_end| cd_end > eocd_offset)
        {
            return Err(ZipError::CorruptedFile("central directory out of bounds"));
        }
        if total_entries.saturating_mul(CDFH_MIN_SIZE as u64) > cd_size {
            return Err(ZipError::CorruptedFile("entry count exceeds central directory"));
        }

        let mut cd_data = vec![0u8; cd_size as usize];
        reader.seek(SeekFrom::Start(cd_offset))?;
        reader
            .read_exact(&mut cd_data)
            .map_err(|_| ZipError::CorruptedFile("truncated central directory"))?;

        let mut cursor = Cursor::new(cd_data.as_slice());
        let mut entries = Vec::with_capacity(total_entries as usize);
        for _ in 0..total_entries {
            // The central directory is in memory, so any read error is EOF.
            let mut entry = parse_cdfh(&mut cursor).map_err(|e| match e {
                ZipError::Io(_) => ZipError::CorruptedFile("truncated central directory entry"),
                e => e,
            })?;
            entry.data_pos = read_data_pos(&mut reader, &entry)?;
            let data_end = entry.data_pos.checked_add(entry.compressed_size);
            if data_end.is_none_or(|end| end > cd_offset) {
                return Err(ZipError::CorruptedFile("entry data out of bounds"));
            }
            entries.push(entry);
        }

        Ok(ZipArchive { reader, entries })
    }

    /// Entries in central directory order.
    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_encrypted(&self) -> bool {
        self.entries.iter().any(ZipEntry::is_encrypted)
    }

    /// (uncompressed, compressed) byte totals, saturating at `u64::MAX`.
    pub fn total_sizes(&self) -> (u64, u64) {
        total_sizes(&self.entries)
    }

    /// Open an entry's decompressed content. Encrypted entries fail with
    /// `PasswordRequired`; use `open_entry_with_password` for those.
    pub fn open_entry(&mut self, entry: &ZipEntry) -> ZipResult<EntryReader<'_>> {
        if entry.is_encrypted() {
            return Err(if entry.uses_strong_encryption() {
                ZipError::UnsupportedEncryption
            } else {
                ZipError::PasswordRequired
            });
        }
        self.open_stream(entry, entry.data_pos, entry.compressed_size, None)
    }

    /// Like `open_entry`, decrypting with `password` if the entry is
    /// encrypted. Fails with `WrongPassword` when the header check fails.
    pub fn open_entry_with_password(
        &mut self,
        entry: &ZipEntry,
        password: &[u8],
    ) -> ZipResult<EntryReader<'_>> {
        if !entry.is_encrypted() {
            return self.open_entry(entry);
        }
        if entry.uses_strong_encryption() {
            return Err(ZipError::UnsupportedEncryption);
        }
        let data_len = entry
            .compressed_size
            .checked_sub(ENCR_HEADER_LEN as u64)
            .ok_or(ZipError::CorruptedFile("encrypted entry shorter than its header"))?;

        let mut header = [0u8; ENCR_HEADER_LEN];
        self.reader.seek(SeekFrom::Start(entry.data_pos))?;
        self.reader.read_exact(&mut header)?;

        let mut crypto = ZipCrypto::new(password);
        if !crypto.check_header(&header, entry.password_check_byte()) {
            return Err(ZipError::WrongPassword);
        }
        self.open_stream(
            entry,
            entry.data_pos + ENCR_HEADER_LEN as u64,
            data_len,
            Some(crypto),
        )
    }

    fn open_stream(
        &mut self,
        entry: &ZipEntry,
        offset: u64,
        len: u64,
        crypto: Option<ZipCrypto>,
    ) -> ZipResult<EntryReader<'_>> {
        self.reader.seek(SeekFrom::Start(offset))?;
        let limited = (&mut self.reader).take(len);
        let raw: Box<dyn Read + '_> = match crypto {
            Some(c) => Box::new(ZipCryptoReader::new(limited, c)),
            None => Box::new(limited),
        };
        let decompressor = Decompressor::new(entry.compression_method, raw)?;
        Ok(EntryReader::new(
            decompressor,
            entry.crc32,
            entry.uncompressed_size,
        ))
    }
}

// ZIP64 sizes come straight from the archive and may sum past u64.
fn total_sizes(entries: &[ZipEntry]) -> (u64, u64) {
    entries.iter().fold((0, 0), |(uncompressed, compressed), e| {
        (
            uncompressed.saturating_add(e.uncompressed_size),
            compressed.saturating_add(e.compressed_size),
        )
    })
}

/// The EOCD normally sits in the last 22 bytes; with an archive comment it is
/// up to 64 KiB earlier, so scan backwards for a signature whose comment
/// length matches the remaining bytes.
fn find_eocd<R: Read + Seek>(
    reader: &mut R,
    file_size: u64,
) -> ZipResult<(EndOfCentralDirectory, u64)> {
    if file_size < EOCD_SIZE as u64 {
        return Err(ZipError::NotZipFile);
    }

    let search_size = ((MAX_COMMENT_SIZE + EOCD_SIZE) as u64).min(file_size);
    let search_start = file_size - search_size;
    let mut buf = vec![0u8; search_size as usize];
    reader.seek(SeekFrom::Start(search_start))?;
    reader.read_exact(&mut buf)?;

    for i in (0..=buf.len() - EOCD_SIZE).rev() {
        if u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]])
            != SIG_END_OF_CENTRAL_DIR
        {
            continue;
        }
        let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;
        if comment_len == buf.len() - i - EOCD_SIZE {
            let eocd = EndOfCentralDirectory::from_bytes(&buf[i..i + EOCD_SIZE])?;
            return Ok((eocd, search_start + i as u64));
        }
    }

    Err(ZipError::NotZipFile)
}

/// The ZIP64 locator sits immediately before the regular EOCD and points at
/// the ZIP64 EOCD record holding the 64-bit values.
fn read_zip64_eocd<R: Read + Seek>(reader: &mut R, eocd_offset: u64) -> ZipResult<CentralDirectory> {
    let locator_offset = eocd_offset
        .checked_sub(ZIP64_EOCD_LOCATOR_SIZE as u64)
        .ok_or(ZipError::CorruptedFile("missing ZIP64 locator"))?;
    let mut locator = [0u8; ZIP64_EOCD_LOCATOR_SIZE];
    reader.seek(SeekFrom::Start(locator_offset))?;
    reader.read_exact(&mut locator)?;

    let mut cursor = Cursor::new(&locator[..]);
    if cursor.read_u32::<LittleEndian>()? != SIG_ZIP64_EOCD_LOCATOR {
        return Err(ZipError::CorruptedFile("invalid ZIP64 locator"));
    }
    let _disk_with_eocd64 = cursor.read_u32::<LittleEndian>()?;
    let eocd64_offset = cursor.read_u64::<LittleEndian>()?;

    let mut record = [0u8; ZIP64_EOCD_MIN_SIZE];
    reader.seek(SeekFrom::Start(eocd64_offset))?;
    reader
        .read_exact(&mut record)
        .map_err(|_| ZipError::CorruptedFile("truncated ZIP64 end of central directory"))?;

    let mut cursor = Cursor::new(&record[..]);
    if cursor.read_u32::<LittleEndian>()? != SIG_ZIP64_END_OF_CENTRAL_DIR {
        return Err(ZipError::CorruptedFile("invalid ZIP64 end of central directory"));
    }
    // record size, version made by, version needed, disk numbers
    cursor.set_position(24);
    let _disk_entries = cursor.read_u64::<LittleEndian>()?;
    let total_entries = cursor.read_u64::<LittleEndian>()?;
    let cd_size = cursor.read_u64::<LittleEndian>()?;
    let cd_offset = cursor.read_u64::<LittleEndian>()?;

    Ok((cd_offset, cd_size, total_entries))
}

fn parse_cdfh(cursor: &mut Cursor<&[u8]>) -> ZipResult<ZipEntry> {
    if cursor.read_u32::<LittleEndian>()? != SIG_CENTRAL_DIRECTORY {
        return Err(ZipError::CorruptedFile("invalid central directory signature"));
    }

    let version_made_by = cursor.read_u16::<LittleEndian>()?;
    let _version_needed = cursor.read_u16::<LittleEndian>()?;
    let flags = cursor.read_u16::<LittleEndian>()?;
    let method = cursor.read_u16::<LittleEndian>()?;
    let time = cursor.read_u16::<LittleEndian>()?;
    let date = cursor.read_u16::<LittleEndian>()?;
    let crc32 = cursor.read_u32::<LittleEndian>()?;
    let mut compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
    let mut uncompressed_size = cursor.read_u32::<LittleEndian>()? as u64;
    let name_len = cursor.read_u16::<LittleEndian>()? as usize;
    let extra_len = cursor.read_u16::<LittleEndian>()? as u64;
    let comment_len = cursor.read_u16::<LittleEndian>()? as u64;
    let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
    let _internal_attributes = cursor.read_u16::<LittleEndian>()?;
    let external_attributes = cursor.read_u32::<LittleEndian>()?;
    let mut header_offset = cursor.read_u32::<LittleEndian>()? as u64;

    let mut raw_name = vec![0u8; name_len];
    cursor.read_exact(&mut raw_name)?;

    let extra_end = cursor.position() + extra_len;
    while cursor.position() + 4 <= extra_end {
        let header_id = cursor.read_u16::<LittleEndian>()?;
        let field_size = cursor.read_u16::<LittleEndian>()? as u64;
        let field_end = cursor.position() + field_size;

        if header_id == EXTRA_ZIP64 {
            // Present only for the header fields that are saturated, in this order.
            if uncompressed_size == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                uncompressed_size = cursor.read_u64::<LittleEndian>()?;
            }
            if compressed_size == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                compressed_size = cursor.read_u64::<LittleEndian>()?;
            }
            if header_offset == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                header_offset = cursor.read_u64::<LittleEndian>()?;
            }
        }
        cursor.set_position(field_end);
    }
    cursor.set_position(extra_end + comment_len);
    if cursor.position() > cursor.get_ref().len() as u64 {
        return Err(ZipError::CorruptedFile("truncated central directory entry"));
    }

    Ok(ZipEntry {
        raw_name,
        version_made_by,
        flags,
        compression_method: CompressionMethod::from_u16(method),
        modified: DosDateTime::new(time, date),
        crc32,
        compressed_size,
        uncompressed_size,
        external_attributes,
        header_offset,
        data_pos: 0,
    })
}

/// The local header repeats the name and has its own extra field, so the
/// data offset is only known after reading it.
fn read_data_pos<R: Read + Seek>(reader: &mut R, entry: &ZipEntry) -> ZipResult<u64> {
    let mut lfh = [0u8; LFH_SIZE];
    reader.seek(SeekFrom::Start(entry.header_offset))?;
    reader
        .read_exact(&mut lfh)
        .map_err(|_| ZipError::CorruptedFile("truncated local file header"))?;

    if u32::from_le_bytes([lfh[0], lfh[1], lfh[2], lfh[3]]) != SIG_LOCAL_FILE_HEADER {
        return Err(ZipError::CorruptedFile("invalid local file header signature"));
    }
    let name_len = u16::from_le_bytes([lfh[26], lfh[27]]) as u64;
    let extra_len = u16::from_le_bytes([lfh[28], lfh[29]]) as u64;

    Ok(entry.header_offset + LFH_SIZE as u64 + name_len + extra_len)
}
