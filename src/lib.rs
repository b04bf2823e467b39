pub mod archive;
pub mod crypto;
pub mod decompress;
pub mod dostime;
pub mod encoding;
pub mod error;
pub mod extract;

pub use archive::{ZipArchive, ZipEntry};
pub use error::{ZipError, ZipResult};
pub use extract::{ExtractOptions, ExtractStats, extract};
