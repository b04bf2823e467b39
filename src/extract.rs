use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, Write};
use std::path::{Component, Path, PathBuf};

use filetime::FileTime;
use tracing::{debug, info, warn};

use crate::archive::{ZipArchive, ZipEntry};
use crate::decompress::EntryReader;
use crate::error::{ZipError, ZipResult};

const BUF_SIZE: usize = 32768;

/// Everything one extraction run needs, built once by the caller.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub archive_path: PathBuf,
    pub dest_dir: PathBuf,
    /// Applied only to entries that are encrypted.
    pub password: Option<String>,
}

impl ExtractOptions {
    pub fn new(archive_path: impl Into<PathBuf>, dest_dir: impl Into<PathBuf>) -> Self {
        Self {
            archive_path: archive_path.into(),
            dest_dir: dest_dir.into(),
            password: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExtractStats {
    pub files: usize,
    pub dirs: usize,
    pub bytes: u64,
}

enum Extracted {
    Dir,
    File(u64),
}

/// Open the archive named in `options` and extract every entry into
/// `options.dest_dir`. The archive is closed when this returns.
pub fn extract(options: &ExtractOptions) -> ZipResult<ExtractStats> {
    let mut archive = ZipArchive::open(&options.archive_path)?;
    extract_archive(
        &mut archive,
        &options.archive_path,
        &options.dest_dir,
        options.password.as_deref(),
    )
}

/// Extract all entries in archive order. The first failure aborts the run;
/// entries extracted before it are left on disk.
///
/// `archive_path` only labels errors.
pub fn extract_archive<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    archive_path: &Path,
    dest_dir: &Path,
    password: Option<&str>,
) -> ZipResult<ExtractStats> {
    fs::create_dir_all(dest_dir).map_err(|source| ZipError::CantCreateDir {
        path: dest_dir.to_path_buf(),
        source,
    })?;

    let entries: Vec<ZipEntry> = archive.entries().to_vec();
    let mut stats = ExtractStats::default();
    for entry in &entries {
        let extracted =
            extract_entry(archive, entry, dest_dir, password).map_err(|source| {
                ZipError::Entry {
                    archive: archive_path.to_path_buf(),
                    name: entry.escaped_name(),
                    source: Box::new(source),
                }
            })?;
        match extracted {
            Extracted::Dir => stats.dirs += 1,
            Extracted::File(n) => {
                stats.files += 1;
                stats.bytes += n;
            }
        }
    }
    Ok(stats)
}

fn extract_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    entry: &ZipEntry,
    dest_dir: &Path,
    password: Option<&str>,
) -> ZipResult<Extracted> {
    let name = entry.decoded_name()?;
    let dest_path = dest_dir.join(entry_path(&name)?);

    if entry.is_dir() || name.ends_with('\\') {
        create_dir(&dest_path, entry.unix_mode())?;
        debug!(name = %name, path = %dest_path.display(), "created directory");
        return Ok(Extracted::Dir);
    }

    // Encrypted entries get exactly one attempt, with the supplied password.
    let mut stream = match (entry.is_encrypted(), password) {
        (false, _) => archive.open_entry(entry)?,
        (true, Some(pwd)) => {
            debug!(name = %name, "entry is encrypted, using supplied password");
            archive.open_entry_with_password(entry, pwd.as_bytes())?
        }
        // PasswordRequired, or UnsupportedEncryption for AES entries.
        (true, None) => {
            return Err(archive
                .open_entry(entry)
                .err()
                .unwrap_or(ZipError::PasswordRequired));
        }
    };

    // Directory entries need not precede their children.
    if let Some(parent) = dest_path.parent() {
        fs::create_dir_all(parent).map_err(|source| ZipError::CantCreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let mut file = create_file(&dest_path, entry.unix_mode())?;
    let written = match copy_entry(&mut stream, &mut file, &dest_path) {
        Ok(n) => n,
        Err(e) => {
            drop(file);
            let _ = fs::remove_file(&dest_path);
            return Err(e);
        }
    };
    drop(stream);
    drop(file);

    if let Some(systime) = entry.modified.to_system_time() {
        let ft = FileTime::from_system_time(systime);
        if let Err(e) = filetime::set_file_mtime(&dest_path, ft) {
            warn!(path = %dest_path.display(), error = %e, "failed to set modification time");
        }
    }

    info!(name = %name, bytes = written, "extracted");
    Ok(Extracted::File(written))
}

/// Turn a decoded entry name into a path relative to the destination.
/// Backslashes count as separators (some Windows tools write them); this
/// runs after decoding, so CP932 trail bytes equal to 0x5C are already part
/// of their characters. Absolute names and `..` segments are rejected.
pub fn entry_path(name: &str) -> ZipResult<PathBuf> {
    let normalized = name.replace('\\', "/");
    if normalized.starts_with('/') {
        return Err(ZipError::PathTraversal(name.to_string()));
    }

    let mut path = PathBuf::new();
    for part in normalized.split('/') {
        match part {
            "" | "." => {}
            ".." => return Err(ZipError::PathTraversal(name.to_string())),
            part => path.push(part),
        }
    }

    // Drive letters and UNC prefixes on Windows.
    if path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(ZipError::PathTraversal(name.to_string()));
    }
    Ok(path)
}

fn create_dir(path: &Path, mode: u32) -> ZipResult<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    builder.create(path).map_err(|source| ZipError::CantCreateDir {
        path: path.to_path_buf(),
        source,
    })
}

fn create_file(path: &Path, mode: u32) -> ZipResult<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    options.open(path).map_err(|source| ZipError::CantOpenDestFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Copy the whole stream, keeping archive-side failures (CRC, corrupt data)
/// apart from failures writing the destination.
fn copy_entry(stream: &mut EntryReader<'_>, file: &mut File, path: &Path) -> ZipResult<u64> {
    let mut buf = vec![0u8; BUF_SIZE];
    let mut total = 0u64;
    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ZipError::from_stream(e)),
        };
        file.write_all(&buf[..n])
            .map_err(|source| ZipError::CantWriteDestFile {
                path: path.to_path_buf(),
                source,
            })?;
        total += n as u64;
    }
    file.flush().map_err(|source| ZipError::CantWriteDestFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(total)
}
