use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use tracing::Level;

use unzip_cp932::archive::ZipArchive;
use unzip_cp932::extract::{self, ExtractOptions, ExtractStats};
use unzip_cp932::{ZipError, ZipResult};

#[derive(Parser)]
#[command(
    name = "unzip-cp932",
    about = "Extract ZIP archives with Shift-JIS/CP932 file names",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    /// List contents of archive
    #[arg(short = 'l', long = "list")]
    list: bool,

    /// Only report warnings and errors
    #[arg(short = 'q', long = "quiet", conflicts_with = "verbose")]
    quiet: bool,

    /// Report every entry decision
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Set output directory
    #[arg(short = 'd', long = "output", value_name = "DIR", default_value = ".")]
    dest_dir: PathBuf,

    /// Password for encrypted entries
    #[arg(long = "pwd", value_name = "PASSWORD")]
    password: Option<String>,

    /// Archive file (.zip), or "-" for stdin
    archive: PathBuf,
}

impl Cli {
    fn options(&self) -> ExtractOptions {
        ExtractOptions {
            archive_path: self.archive.clone(),
            dest_dir: self.dest_dir.clone(),
            password: self.password.clone(),
        }
    }

    fn log_level(&self) -> Level {
        if self.quiet {
            Level::WARN
        } else if self.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        }
    }
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level())
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let options = cli.options();
    let from_stdin = options.archive_path == Path::new("-");

    let result = if cli.list {
        if from_stdin {
            read_stdin().map(|archive| list_archive(&archive, &options.archive_path))
        } else {
            ZipArchive::open(&options.archive_path)
                .map(|archive| list_archive(&archive, &options.archive_path))
        }
    } else if from_stdin {
        read_stdin().and_then(|mut archive| {
            extract::extract_archive(
                &mut archive,
                &options.archive_path,
                &options.dest_dir,
                options.password.as_deref(),
            )
        })
        .map(report)
    } else {
        extract::extract(&options).map(report)
    };

    if let Err(e) = result {
        match &e {
            // Already names the archive.
            ZipError::Entry { .. } => eprintln!("Error extracting ZIP file {e}"),
            _ => eprintln!(
                "Error extracting ZIP file {}: {e}",
                options.archive_path.display()
            ),
        }
        if e.is_password_error() {
            eprintln!("Use --pwd to supply the password for encrypted entries.");
        }
        process::exit(1);
    }
}

fn report(stats: ExtractStats) {
    tracing::info!(
        files = stats.files,
        dirs = stats.dirs,
        bytes = stats.bytes,
        "done"
    );
    println!("Extraction completed successfully.");
}

fn read_stdin() -> ZipResult<ZipArchive<std::io::Cursor<Vec<u8>>>> {
    let mut data = Vec::new();
    std::io::stdin().read_to_end(&mut data)?;
    ZipArchive::from_bytes(data)
}

fn list_archive<R: Read + Seek>(archive: &ZipArchive<R>, source: &Path) {
    println!("\nListing archive: {}", source.display());
    println!();
    println!("  Uncomp Size    Comp Size Method  Date & Time          File Name");
    println!(
        "------------ ------------ ------- ------------------- ------------------------------"
    );

    for entry in archive.entries() {
        // Listing shows undecodable names escaped instead of failing.
        let name = entry
            .decoded_name()
            .unwrap_or_else(|_| entry.escaped_name());
        let encrypted = if entry.is_encrypted() { "*" } else { "" };

        println!(
            "{:>12} {:>12} {:<7} {} {name}{encrypted}",
            entry.uncompressed_size,
            entry.compressed_size,
            entry.compression_method.to_string(),
            entry.modified,
        );
    }

    println!(
        "------------ ------------ ------- ------------------- ------------------------------"
    );
    let (total_uncompressed, total_compressed) = archive.total_sizes();
    let file_count = archive.len();
    let plural = if file_count <= 1 { "" } else { "s" };
    println!(
        "{total_uncompressed:>12} {total_compressed:>12}                             Total {file_count} file{plural}"
    );
}
