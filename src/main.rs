//! Main entry point for the rezip CLI application.
//!
//! `create` packs local paths into an archive; `extract` and `list` read an
//! archive from the local filesystem or from an HTTP URL.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;

use rezip::cli::{Command, is_http_url};
use rezip::{Cli, HttpRangeReader, LocalFileReader, ReadAt, ZipBuilder, ZipExtractor};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Command::Create { archive, paths, .. } => create(&cli, archive, paths).await,
        Command::Extract {
            archive,
            pipe: true,
            ..
        } => with_source(&cli, archive, pipe_files).await,
        Command::Extract {
            archive,
            extract_dir,
            pipe: false,
        } => with_source(&cli, archive, |r| extract(r, &cli, extract_dir)).await,
        Command::List { archive, verbose } => {
            with_source(&cli, archive, |r| list_files(r, *verbose)).await
        }
    }
}

/// Open `archive` as a local or remote source and run `action` on it.
///
/// For remote sources the bytes fetched over the network are reported
/// afterwards unless running quietly.
async fn with_source<F, Fut>(cli: &Cli, archive: &str, action: F) -> Result<()>
where
    F: FnOnce(ZipExtractor<DynSource>) -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    if is_http_url(archive) {
        let reader = Arc::new(HttpRangeReader::new(archive.to_string()).await?);
        let extractor = ZipExtractor::new(Arc::new(DynSource(reader.clone())));
        action(extractor).await?;

        if !cli.is_quiet() {
            eprintln!(
                "\nTotal bytes transferred: {}",
                format_size(reader.transferred_bytes())
            );
        }
    } else {
        let reader = LocalFileReader::new(Path::new(archive))
            .with_context(|| format!("cannot open {archive}"))?;
        let extractor = ZipExtractor::new(Arc::new(DynSource(Arc::new(reader))));
        action(extractor).await?;
    }

    Ok(())
}

/// Type-erased archive source so both kinds share one code path.
struct DynSource(Arc<dyn ReadAt>);

#[async_trait::async_trait]
impl ReadAt for DynSource {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> rezip::Result<usize> {
        self.0.read_at(offset, buf).await
    }

    fn size(&self) -> u64 {
        self.0.size()
    }
}

async fn create(cli: &Cli, archive: &str, paths: &[String]) -> Result<()> {
    let mut builder = ZipBuilder::create_with(archive, cli.command.zip_options())
        .await
        .with_context(|| format!("cannot create {archive}"))?;

    for path in paths {
        if !cli.is_quiet() {
            println!("  adding: {path}");
        }
        if let Err(e) = builder.add(path).await {
            // Keep whatever was added readable before reporting
            builder.close().await?;
            return Err(e).with_context(|| format!("cannot add {path}"));
        }
    }

    builder.close().await?;

    if !cli.is_very_quiet() {
        eprintln!("{archive}: {} entries", count_entries(archive).await?);
    }
    Ok(())
}

async fn count_entries(archive: &str) -> Result<usize> {
    let reader = Arc::new(LocalFileReader::new(Path::new(archive))?);
    Ok(ZipExtractor::new(reader).list_files().await?.len())
}

async fn extract(extractor: ZipExtractor<DynSource>, cli: &Cli, dest: &str) -> Result<()> {
    let extractor = extractor.with_dir_mode(cli.command.zip_options().dir_mode);
    // List first so an unreadable archive leaves nothing behind
    let entries = extractor.list_files().await?;
    let dest = Path::new(dest);
    extractor
        .create_root(dest)
        .await
        .with_context(|| format!("cannot create {}", dest.display()))?;

    for entry in &entries {
        let path = extractor
            .extract_entry(entry, dest)
            .await
            .with_context(|| format!("cannot extract {}", entry.file_name))?;

        if !cli.is_quiet() {
            if entry.is_directory {
                println!("   creating: {}", path.display());
            } else {
                println!("  inflating: {}", path.display());
            }
        }
    }

    Ok(())
}

/// Write every file entry to stdout, in archive order.
///
/// With more than one file each is preceded by a `--- name ---` marker line.
async fn pipe_files(extractor: ZipExtractor<DynSource>) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    let entries = extractor.list_files().await?;
    let files: Vec<_> = entries.iter().filter(|e| !e.is_directory).collect();
    let mut stdout = tokio::io::stdout();

    for entry in &files {
        if files.len() > 1 {
            stdout
                .write_all(format!("--- {} ---\n", entry.file_name).as_bytes())
                .await?;
        }
        extractor.copy_entry(entry, &mut stdout).await?;
    }
    stdout.flush().await?;

    Ok(())
}

/// List files in the ZIP archive.
///
/// `-v` prints a table with sizes, compression ratio and timestamps.
async fn list_files(extractor: ZipExtractor<DynSource>, verbose: bool) -> Result<()> {
    let entries = extractor.list_files().await?;

    if !verbose {
        for entry in &entries {
            println!("{}", entry.file_name);
        }
        return Ok(());
    }

    println!(
        "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  Name",
        "Length", "Size", "Cmpr", "Date", "Time"
    );
    println!("{}", "-".repeat(70));

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in &entries {
        let (year, month, day) = entry.mod_date();
        let (hour, minute, _second) = entry.mod_time();
        println!(
            "{:>10}  {:>10}  {}  {:04}-{:02}-{:02}  {:02}:{:02}  {}",
            entry.uncompressed_size,
            entry.compressed_size,
            ratio(entry.compressed_size, entry.uncompressed_size),
            year,
            month,
            day,
            hour,
            minute,
            entry.file_name
        );

        if !entry.is_directory {
            total_uncompressed += entry.uncompressed_size;
            total_compressed += entry.compressed_size;
            file_count += 1;
        }
    }

    println!("{}", "-".repeat(70));
    println!(
        "{:>10}  {:>10}  {}  {:>21}  {} files",
        total_uncompressed,
        total_compressed,
        ratio(total_compressed, total_uncompressed),
        "",
        file_count
    );

    Ok(())
}

/// Space saved as a right-aligned percentage.
fn ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed == 0 || compressed >= uncompressed {
        return "  0%".to_string();
    }
    format!("{:>4}%", 100 - compressed * 100 / uncompressed)
}

/// Format a byte size into a human-readable string.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
