//! Building archives from filesystem trees and unpacking them again.

use std::fs::Metadata;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tokio::fs::{self, File};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::io::LocalFileReader;
use crate::options::{WalkErrorPolicy, ZipOptions};
use crate::path::{dir_entry_name, file_entry_name};
use crate::zip::{DosDateTime, EntryOptions, ZipExtractor, ZipWriter, create_dir_all};

/// An archive being written to disk.
///
/// Created with [`create`](Self::create), filled with [`add`](Self::add),
/// finalized with [`close`](Self::close). An archive that is dropped without
/// being closed has no central directory and cannot be read back.
///
/// ```no_run
/// # async fn demo() -> rezip::Result<()> {
/// let mut archive = rezip::ZipBuilder::create("out/site.zip").await?;
/// archive.add("./public").await?;
/// archive.add("README.md").await?;
/// archive.close().await?;
///
/// rezip::unzip("out/site.zip", "restore").await?;
/// # Ok(())
/// # }
/// ```
pub struct ZipBuilder {
    path: PathBuf,
    writer: Option<ZipWriter<BufWriter<File>>>,
    options: ZipOptions,
    /// Identity of the output file, so a walk never feeds the archive into itself.
    output_id: Option<FileId>,
}

#[cfg(unix)]
type FileId = (u64, u64);
#[cfg(not(unix))]
type FileId = PathBuf;

impl ZipBuilder {
    /// Create (or truncate) the archive at `path` with default options.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::create_with(path, ZipOptions::default()).await
    }

    /// Create (or truncate) the archive at `path`, making missing parent
    /// directories with `options.dir_mode`.
    pub async fn create_with(path: impl AsRef<Path>, options: ZipOptions) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent, options.dir_mode).await?;
            }
        }

        let file = File::create(path).await.map_err(|e| Error::fs(path, e))?;
        let meta = file.metadata().await.map_err(|e| Error::fs(path, e))?;
        let output_id = file_id(path, &meta).await;
        log::debug!("creating archive {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(ZipWriter::new(BufWriter::new(file))),
            options,
            output_id,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &ZipOptions {
        &self.options
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }

    /// Entries written so far; 0 once closed.
    pub fn entry_count(&self) -> usize {
        self.writer.as_ref().map_or(0, ZipWriter::len)
    }

    /// Add a file, or a directory and everything below it.
    ///
    /// The source is stat'ed first (following symlinks); if that fails nothing
    /// is written and the archive stays usable. Directories are walked
    /// depth-first in file-name order. Every descendant directory becomes a
    /// directory entry; the top directory only gets one when nothing below it
    /// was added. The archive file itself is never added.
    ///
    /// Entry names come from the source path as given, so a source containing
    /// `..` is refused with [`Error::UnsafeEntryName`]: its entries could not
    /// be extracted again.
    pub async fn add(&mut self, source: impl AsRef<Path>) -> Result<()> {
        let source = source.as_ref();
        if self.writer.is_none() {
            return Err(Error::Closed);
        }
        if source.components().any(|c| c == Component::ParentDir) {
            return Err(Error::UnsafeEntryName(source.display().to_string()));
        }

        let meta = fs::metadata(source)
            .await
            .map_err(|e| Error::fs(source, e))?;

        if meta.is_dir() {
            self.add_tree(source).await
        } else if meta.is_file() {
            if self.is_output(source, &meta).await {
                log::warn!("skipping {}: it is the archive being written", source.display());
                return Ok(());
            }
            let file = File::open(source)
                .await
                .map_err(|e| Error::fs(source, e))?;
            self.add_file(source, file, &meta).await
        } else {
            Err(Error::Unsupported(format!(
                "{} is neither a regular file nor a directory",
                source.display()
            )))
        }
    }

    /// Finish the archive and close the file.
    ///
    /// Both steps always run; if both fail the errors come back together as
    /// [`Error::Multiple`]. Closing again is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };

        let entries = finish_and_shutdown(writer, &self.path).await?;
        log::debug!("closed {} with {entries} entries", self.path.display());
        Ok(())
    }

    async fn add_tree(&mut self, root: &Path) -> Result<()> {
        let written_before = self.entry_count();

        for item in WalkDir::new(root).min_depth(1).sort_by_file_name() {
            let entry = match item {
                Ok(entry) => entry,
                Err(e) => {
                    self.walk_error(e.into())?;
                    continue;
                }
            };

            let path = entry.path();
            let file_type = entry.file_type();

            if file_type.is_dir() {
                match entry.metadata() {
                    Ok(meta) => self.add_dir(path, &meta).await?,
                    Err(e) => self.walk_error(e.into())?,
                }
            } else if file_type.is_file() || file_type.is_symlink() {
                // Symlinks are added by content when they point at a file
                let meta = match fs::metadata(path).await {
                    Ok(meta) => meta,
                    Err(e) => {
                        self.walk_error(Error::fs(path, e))?;
                        continue;
                    }
                };
                if !meta.is_file() {
                    log::warn!("skipping {}: link to a non-file", path.display());
                    continue;
                }
                if self.is_output(path, &meta).await {
                    log::debug!("skipping {}: it is the archive being written", path.display());
                    continue;
                }
                match File::open(path).await {
                    Ok(file) => self.add_file(path, file, &meta).await?,
                    Err(e) => self.walk_error(Error::fs(path, e))?,
                }
            } else {
                log::warn!("skipping {}: not a regular file", path.display());
            }
        }

        if self.entry_count() == written_before {
            let meta = fs::metadata(root).await.map_err(|e| Error::fs(root, e))?;
            self.add_dir(root, &meta).await?;
        }
        Ok(())
    }

    async fn add_dir(&mut self, path: &Path, meta: &Metadata) -> Result<()> {
        let Some(name) = dir_entry_name(path) else {
            return Ok(());
        };
        let writer = self.writer.as_mut().ok_or(Error::Closed)?;
        writer
            .add_directory(&name, modified(meta), permissions(meta, 0o755))
            .await
    }

    async fn add_file(&mut self, path: &Path, mut file: File, meta: &Metadata) -> Result<()> {
        let name = file_entry_name(path);
        let options = EntryOptions {
            method: self.options.compression,
            level: self.options.level,
            modified: modified(meta),
            permissions: permissions(meta, 0o644),
        };
        let writer = self.writer.as_mut().ok_or(Error::Closed)?;
        writer.add_entry(&name, &mut file, options).await?;
        Ok(())
    }

    async fn is_output(&self, path: &Path, meta: &Metadata) -> bool {
        match &self.output_id {
            Some(id) => file_id(path, meta).await.as_ref() == Some(id),
            None => false,
        }
    }

    fn walk_error(&self, err: Error) -> Result<()> {
        match self.options.walk_errors {
            WalkErrorPolicy::Abort => Err(err),
            WalkErrorPolicy::Skip => {
                log::warn!("skipping: {err}");
                Ok(())
            }
        }
    }
}

impl Drop for ZipBuilder {
    fn drop(&mut self) {
        if self.writer.is_some() {
            log::warn!(
                "{} dropped without close; it has no central directory",
                self.path.display()
            );
        }
    }
}

/// Finish `writer`, then shut its sink down, and return the entry count.
///
/// Both steps always run; if both fail the errors come back together as
/// [`Error::Multiple`].
async fn finish_and_shutdown<W>(mut writer: ZipWriter<W>, path: &Path) -> Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let mut errors = Vec::new();
    if let Err(e) = writer.finish().await {
        errors.push(e);
    }
    let entries = writer.len();
    let mut sink = writer.into_inner();
    if let Err(e) = sink.shutdown().await {
        errors.push(Error::fs(path, e));
    }

    if errors.len() > 1 {
        return Err(Error::Multiple(errors));
    }
    match errors.pop() {
        Some(e) => Err(e),
        None => Ok(entries),
    }
}

/// Extract the archive at `archive` under `dest_root` with default options.
pub async fn unzip(archive: impl AsRef<Path>, dest_root: impl AsRef<Path>) -> Result<()> {
    unzip_with(archive, dest_root, &ZipOptions::default()).await
}

/// Extract the archive at `archive` under `dest_root`.
///
/// Nothing is created if the archive cannot be opened or its central
/// directory is malformed. Otherwise `dest_root` is created and entries are
/// written in archive order until the first failure.
pub async fn unzip_with(
    archive: impl AsRef<Path>,
    dest_root: impl AsRef<Path>,
    options: &ZipOptions,
) -> Result<()> {
    let reader = Arc::new(LocalFileReader::new(archive.as_ref())?);
    let written = ZipExtractor::new(reader)
        .with_dir_mode(options.dir_mode)
        .extract_all(dest_root.as_ref())
        .await?;
    log::debug!(
        "extracted {} entries from {}",
        written.len(),
        archive.as_ref().display()
    );
    Ok(())
}

fn modified(meta: &Metadata) -> DosDateTime {
    meta.modified()
        .map(DosDateTime::from_system_time)
        .unwrap_or_else(|_| DosDateTime::now())
}

#[cfg(unix)]
async fn file_id(_path: &Path, meta: &Metadata) -> Option<FileId> {
    use std::os::unix::fs::MetadataExt;
    Some((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
async fn file_id(path: &Path, _meta: &Metadata) -> Option<FileId> {
    fs::canonicalize(path).await.ok()
}

#[cfg(unix)]
fn permissions(meta: &Metadata, _default: u32) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permissions(meta: &Metadata, default: u32) -> u32 {
    if meta.permissions().readonly() {
        default & 0o555
    } else {
        default
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Sink whose shutdown always fails; writes fail too when `fail_writes`.
    struct BrokenSink {
        fail_writes: bool,
    }

    impl AsyncWrite for BrokenSink {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if self.fail_writes {
                Poll::Ready(Err(io::Error::other("disk full")))
            } else {
                Poll::Ready(Ok(buf.len()))
            }
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::other("close failed")))
        }
    }

    #[tokio::test]
    async fn close_reports_both_failures() {
        let writer = ZipWriter::new(BrokenSink { fail_writes: true });
        match finish_and_shutdown(writer, Path::new("out.zip")).await {
            Err(Error::Multiple(errors)) => {
                assert_eq!(errors.len(), 2);
                assert!(matches!(errors[0], Error::Io(_)));
                assert!(matches!(errors[1], Error::Fs { .. }));
            }
            other => panic!("expected two errors, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_reports_a_single_failure_as_is() {
        let writer = ZipWriter::new(BrokenSink { fail_writes: false });
        let err = finish_and_shutdown(writer, Path::new("out.zip"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Fs { .. }), "{err}");
    }
}
