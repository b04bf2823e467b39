use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ZipError {
    #[error("can't open archive file: {source}")]
    CantOpenFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("not a ZIP file")]
    NotZipFile,

    #[error("corrupted file: {0}")]
    CorruptedFile(&'static str),

    #[error("invalid CP932 file name at byte {offset}: \"{}\"", raw.escape_ascii())]
    InvalidEncoding { raw: Vec<u8>, offset: usize },

    #[error("password required for encrypted entry")]
    PasswordRequired,

    #[error("wrong password")]
    WrongPassword,

    #[error("invalid file CRC: expected {expected:08x}, got {got:08x}")]
    InvalidFileCrc { expected: u32, got: u32 },

    #[error("invalid file size: expected {expected}, got {got}")]
    InvalidFileSize { expected: u64, got: u64 },

    #[error("unsupported compression method: {0}")]
    UnsupportedCompressionMethod(u16),

    #[error("unsupported encryption (strong or AES)")]
    UnsupportedEncryption,

    #[error("path traversal blocked: {0}")]
    PathTraversal(String),

    #[error("can't create directory {}: {source}", path.display())]
    CantCreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("can't open dest file {}: {source}", path.display())]
    CantOpenDestFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("can't write dest file {}: {source}", path.display())]
    CantWriteDestFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A failure while handling one entry, with the archive and the entry's
    /// raw name (escaped) attached.
    #[error("{}: entry \"{name}\": {source}", archive.display())]
    Entry {
        archive: PathBuf,
        name: String,
        #[source]
        source: Box<ZipError>,
    },

    #[error("{0}")]
    Io(#[from] io::Error),
}

impl ZipError {
    /// Recover a `ZipError` that an `EntryReader` smuggled through
    /// `io::Read`. Plain I/O errors become `ZipError::Io`.
    pub fn from_stream(err: io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<ZipError>()) {
            return Self::Io(err);
        }
        match err.into_inner().map(|inner| inner.downcast::<ZipError>()) {
            Some(Ok(zip_err)) => *zip_err,
            _ => Self::CorruptedFile("unreadable entry stream"),
        }
    }

    pub(crate) fn into_io(self) -> io::Error {
        match self {
            Self::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }

    /// True for the errors that mean "this entry needs a (different) password".
    pub fn is_password_error(&self) -> bool {
        match self {
            Self::PasswordRequired | Self::WrongPassword => true,
            Self::Entry { source, .. } => source.is_password_error(),
            _ => false,
        }
    }
}

pub type ZipResult<T> = Result<T, ZipError>;
