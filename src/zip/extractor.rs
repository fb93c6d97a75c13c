use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::{Crc, Decompress, FlushDecompress, Status};
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

use crate::error::{Error, Result};
use crate::io::ReadAt;
use crate::options::DEFAULT_DIR_MODE;
use crate::path::entry_output_path;

use super::parser::ZipParser;
use super::structures::{CompressionMethod, ZipFileEntry};

const CHUNK_SIZE: usize = 64 * 1024;

/// ZIP file extractor
pub struct ZipExtractor<R: ReadAt> {
    parser: ZipParser<R>,
    dir_mode: u32,
}

impl<R: ReadAt> ZipExtractor<R> {
    pub fn new(reader: Arc<R>) -> Self {
        Self {
            parser: ZipParser::new(reader),
            dir_mode: DEFAULT_DIR_MODE,
        }
    }

    /// Mode for directories created during extraction (Unix only).
    pub fn with_dir_mode(mut self, mode: u32) -> Self {
        self.dir_mode = mode;
        self
    }

    /// List all entries in the archive
    pub async fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        self.parser.list_files().await
    }

    /// Stream an entry's uncompressed bytes into `writer`.
    ///
    /// The CRC-32 and length recorded in the archive are checked once the
    /// data has been written; a mismatch is an [`Error::InvalidArchive`].
    pub async fn copy_entry<W>(&self, entry: &ZipFileEntry, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        if entry.is_encrypted() {
            return Err(Error::Unsupported(format!(
                "{} is encrypted",
                entry.file_name
            )));
        }
        if let CompressionMethod::Unknown(code) = entry.compression_method {
            return Err(Error::Unsupported(format!(
                "{} uses compression method {code}",
                entry.file_name
            )));
        }

        let mut offset = self.parser.get_data_offset(entry).await?;
        let mut remaining = entry.compressed_size;
        let mut input = vec![0u8; CHUNK_SIZE];
        let mut crc = Crc::new();
        let mut written = 0u64;

        match entry.compression_method {
            CompressionMethod::Deflate => {
                let mut inflater = Decompress::new(false);
                let mut output = vec![0u8; CHUNK_SIZE];
                let mut done = false;

                while !done {
                    let n = remaining.min(CHUNK_SIZE as u64) as usize;
                    self.parser
                        .reader()
                        .read_exact_at(offset, &mut input[..n])
                        .await?;
                    offset += n as u64;
                    remaining -= n as u64;

                    let flush = if remaining == 0 {
                        FlushDecompress::Finish
                    } else {
                        FlushDecompress::None
                    };
                    let mut chunk = &input[..n];
                    loop {
                        let (before_in, before_out) = (inflater.total_in(), inflater.total_out());
                        let status = inflater
                            .decompress(chunk, &mut output, flush)
                            .map_err(|e| {
                                Error::invalid(format!("{}: {e}", entry.file_name))
                            })?;
                        let consumed = (inflater.total_in() - before_in) as usize;
                        let produced = (inflater.total_out() - before_out) as usize;
                        chunk = &chunk[consumed..];

                        if produced > 0 {
                            crc.update(&output[..produced]);
                            writer.write_all(&output[..produced]).await?;
                            written += produced as u64;
                        }
                        if status == Status::StreamEnd {
                            done = true;
                            break;
                        }
                        // A full buffer may mean more output is pending
                        if produced == output.len() {
                            continue;
                        }
                        if chunk.is_empty() {
                            break;
                        }
                        if consumed == 0 && produced == 0 {
                            return Err(Error::invalid(format!(
                                "{}: corrupt compressed data",
                                entry.file_name
                            )));
                        }
                    }

                    if !done && remaining == 0 {
                        return Err(Error::invalid(format!(
                            "{}: compressed data ends early",
                            entry.file_name
                        )));
                    }
                }
            }
            _ => {
                while remaining > 0 {
                    let n = remaining.min(CHUNK_SIZE as u64) as usize;
                    self.parser
                        .reader()
                        .read_exact_at(offset, &mut input[..n])
                        .await?;
                    offset += n as u64;
                    remaining -= n as u64;

                    crc.update(&input[..n]);
                    writer.write_all(&input[..n]).await?;
                    written += n as u64;
                }
            }
        }

        if written != entry.uncompressed_size {
            return Err(Error::invalid(format!(
                "{}: expected {} bytes, got {written}",
                entry.file_name, entry.uncompressed_size
            )));
        }
        if crc.sum() != entry.crc32 {
            return Err(Error::invalid(format!(
                "{}: CRC mismatch (stored {:08x}, computed {:08x})",
                entry.file_name,
                entry.crc32,
                crc.sum()
            )));
        }

        Ok(written)
    }

    /// Recreate one entry under `dest_root` and return the path written.
    ///
    /// Directory entries become directories. File entries get their parent
    /// directories created, then their content streamed into a new file.
    pub async fn extract_entry(&self, entry: &ZipFileEntry, dest_root: &Path) -> Result<PathBuf> {
        let output_path = entry_output_path(dest_root, &entry.file_name)?;

        if entry.is_directory {
            create_dir_all(&output_path, self.dir_mode).await?;
            log::debug!("created {}", output_path.display());
            return Ok(output_path);
        }

        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent, self.dir_mode).await?;
            }
        }

        let file = fs::File::create(&output_path)
            .await
            .map_err(|e| Error::fs(&output_path, e))?;
        let mut file = BufWriter::new(file);
        let written = self.copy_entry(entry, &mut file).await?;
        file.shutdown()
            .await
            .map_err(|e| Error::fs(&output_path, e))?;

        log::debug!("extracted {} ({written} bytes)", output_path.display());
        Ok(output_path)
    }

    /// Create `dest_root` (and its parents) with the extractor's directory mode.
    pub async fn create_root(&self, dest_root: &Path) -> Result<()> {
        create_dir_all(dest_root, self.dir_mode).await
    }

    /// Extract every entry, in archive order, under `dest_root`.
    ///
    /// The archive is listed before anything is created, so an unreadable
    /// archive leaves the filesystem untouched. After that the first failure
    /// stops extraction; entries already written stay on disk.
    pub async fn extract_all(&self, dest_root: &Path) -> Result<Vec<PathBuf>> {
        let entries = self.list_files().await?;

        self.create_root(dest_root).await?;

        let mut written = Vec::with_capacity(entries.len());
        for entry in &entries {
            written.push(self.extract_entry(entry, dest_root).await?);
        }
        Ok(written)
    }
}

/// `mkdir -p` with the given mode on Unix.
pub(crate) async fn create_dir_all(path: &Path, mode: u32) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(mode);
    #[cfg(not(unix))]
    let _ = mode;
    builder
        .create(path)
        .await
        .map_err(|e| Error::fs(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::{DosDateTime, EntryOptions, FLAG_ENCRYPTED, ZipWriter};
    use async_trait::async_trait;

    struct Bytes(Vec<u8>);

    #[async_trait]
    impl ReadAt for Bytes {
        async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
            let data = self.0.get(offset as usize..).unwrap_or_default();
            let n = data.len().min(buf.len());
            buf[..n].copy_from_slice(&data[..n]);
            Ok(n)
        }

        fn size(&self) -> u64 {
            self.0.len() as u64
        }
    }

    async fn sample_archive() -> ZipExtractor<Bytes> {
        let mut writer = ZipWriter::new(Vec::new());
        writer
            .add_directory("a/b", DosDateTime::EPOCH, 0o755)
            .await
            .unwrap();
        writer
            .add_entry("a/b/f.txt", &mut &b"contents"[..], EntryOptions::default())
            .await
            .unwrap();
        writer.finish().await.unwrap();
        ZipExtractor::new(Arc::new(Bytes(writer.into_inner())))
    }

    #[tokio::test]
    async fn encrypted_entries_are_unsupported() {
        let extractor = sample_archive().await;
        let mut entry = extractor.list_files().await.unwrap().remove(1);
        entry.flags |= FLAG_ENCRYPTED;

        let err = extractor.copy_entry(&entry, &mut Vec::<u8>::new()).await.unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)), "{err}");
    }

    #[tokio::test]
    async fn unknown_methods_are_unsupported() {
        let extractor = sample_archive().await;
        let mut entry = extractor.list_files().await.unwrap().remove(1);
        entry.compression_method = CompressionMethod::Unknown(14);

        let mut out: Vec<u8> = Vec::new();
        let err = extractor.copy_entry(&entry, &mut out).await.unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)), "{err}");
        assert!(out.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn extracted_directories_use_dir_mode() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::TempDir::new().unwrap();
        let dest = tmp.path().join("out");
        let extractor = sample_archive().await.with_dir_mode(0o700);
        extractor.extract_all(&dest).await.unwrap();

        for dir in [dest.clone(), dest.join("a"), dest.join("a/b")] {
            let mode = std::fs::metadata(&dir).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700, "{}", dir.display());
        }
        assert_eq!(std::fs::read(dest.join("a/b/f.txt")).unwrap(), b"contents");
    }
}
