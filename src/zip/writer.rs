//! Streaming ZIP writer.
//!
//! File data is never buffered whole: each entry gets a local header with the
//! data-descriptor flag set, the (optionally deflated) bytes are written as
//! they are read, and the CRC and sizes follow in a data descriptor. The
//! central directory is accumulated in memory and written by [`ZipWriter::finish`].
//!
//! Only the classic 32-bit layout is produced. Entries, offsets or entry
//! counts that would need ZIP64 are refused with [`Error::Unsupported`].

use flate2::{Compress, Compression, Crc, FlushCompress, Status};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

use super::structures::*;

const CHUNK_SIZE: usize = 64 * 1024;

/// Per-entry settings for [`ZipWriter::add_entry`].
#[derive(Debug, Clone, Copy)]
pub struct EntryOptions {
    pub method: CompressionMethod,
    pub level: u32,
    pub modified: DosDateTime,
    /// Unix permission bits recorded in the external attributes.
    pub permissions: u32,
}

impl Default for EntryOptions {
    fn default() -> Self {
        Self {
            method: CompressionMethod::Deflate,
            level: 6,
            modified: DosDateTime::now(),
            permissions: 0o644,
        }
    }
}

/// Writes a ZIP archive to any async byte sink.
pub struct ZipWriter<W> {
    inner: W,
    offset: u64,
    entries: Vec<EntryHeader>,
    finished: bool,
}

impl<W: AsyncWrite + Unpin> ZipWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            offset: 0,
            entries: Vec::new(),
            finished: false,
        }
    }

    /// Number of entries written so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes written to the sink so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Add a directory marker. A trailing `/` is appended if missing.
    pub async fn add_directory(
        &mut self,
        name: &str,
        modified: DosDateTime,
        permissions: u32,
    ) -> Result<()> {
        let name = if name.ends_with('/') {
            name.to_string()
        } else {
            format!("{name}/")
        };

        let header = self.begin_entry(
            name,
            CompressionMethod::Stored,
            0,
            modified,
            dir_external_attrs(permissions),
        )?;

        let mut buf = Vec::with_capacity(LFH_SIZE + header.name.len());
        header.write_local(&mut buf)?;
        self.write_raw(&buf).await?;

        log::debug!("added directory {}", header.name);
        self.entries.push(header);
        Ok(())
    }

    /// Add an entry whose content is read from `source` until end of stream.
    ///
    /// Returns the number of uncompressed bytes stored.
    pub async fn add_entry<R>(
        &mut self,
        name: &str,
        source: &mut R,
        options: EntryOptions,
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let method = match options.method {
            CompressionMethod::Unknown(code) => {
                return Err(Error::Unsupported(format!(
                    "cannot write compression method {code}"
                )));
            }
            method => method,
        };

        let mut header = self.begin_entry(
            name.to_string(),
            method,
            FLAG_DATA_DESCRIPTOR,
            options.modified,
            file_external_attrs(options.permissions),
        )?;

        let mut buf = Vec::with_capacity(LFH_SIZE + header.name.len());
        header.write_local(&mut buf)?;
        self.write_raw(&buf).await?;

        let start = self.offset;
        let mut uncompressed = 0u64;
        let mut crc = Crc::new();
        let mut deflater = Compress::new(Compression::new(options.level), false);
        let mut input = vec![0u8; CHUNK_SIZE];
        let mut output = Vec::with_capacity(CHUNK_SIZE);

        loop {
            let n = source.read(&mut input).await?;
            if n == 0 {
                break;
            }
            crc.update(&input[..n]);
            uncompressed += n as u64;
            match method {
                CompressionMethod::Deflate => {
                    output.clear();
                    deflate_chunk(&mut deflater, &input[..n], FlushCompress::None, &mut output)?;
                    self.write_raw(&output).await?;
                }
                _ => self.write_raw(&input[..n]).await?,
            }
            // Checked per chunk so a source that never ends still stops
            self.check_entry_size(name, uncompressed)?;
        }
        if method == CompressionMethod::Deflate {
            output.clear();
            deflate_chunk(&mut deflater, &[], FlushCompress::Finish, &mut output)?;
            self.write_raw(&output).await?;
        }
        self.check_entry_size(name, uncompressed)?;

        let compressed = self.offset - start;

        header.crc32 = crc.sum();
        header.compressed_size = compressed as u32;
        header.uncompressed_size = uncompressed as u32;

        let mut descriptor = Vec::with_capacity(16);
        header.write_data_descriptor(&mut descriptor)?;
        self.write_raw(&descriptor).await?;

        log::debug!("added {name}: {uncompressed} -> {compressed} bytes");
        self.entries.push(header);
        Ok(uncompressed)
    }

    /// Write the central directory and end record, then flush.
    ///
    /// Calling it again after success does nothing.
    pub async fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }

        let cd_offset = self.offset;
        let mut cd = Vec::new();
        for entry in &self.entries {
            entry.write_central(&mut cd)?;
        }

        let count = self.entries.len() as u64;
        if count >= MAX_U16 || cd_offset + cd.len() as u64 >= MAX_U32 {
            return Err(Error::Unsupported(
                "archive needs ZIP64 end records, which are not written".into(),
            ));
        }

        EndOfCentralDirectory {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: count as u16,
            total_entries: count as u16,
            cd_size: cd.len() as u32,
            cd_offset: cd_offset as u32,
            comment_len: 0,
        }
        .write_to(&mut cd)?;

        self.write_raw(&cd).await?;
        self.inner.flush().await?;
        self.finished = true;
        Ok(())
    }

    /// Give back the sink. Does not finish the archive.
    pub fn into_inner(self) -> W {
        self.inner
    }

    fn begin_entry(
        &self,
        name: String,
        method: CompressionMethod,
        mut flags: u16,
        modified: DosDateTime,
        external_attrs: u32,
    ) -> Result<EntryHeader> {
        if self.finished {
            return Err(Error::Closed);
        }
        if name.len() as u64 > MAX_U16 {
            return Err(Error::Unsupported(format!(
                "entry name is {} bytes long",
                name.len()
            )));
        }
        // 0xFFFFFFFF itself is the ZIP64 marker
        if self.offset >= MAX_U32 {
            return Err(Error::Unsupported(
                "archive offset past 4 GiB; ZIP64 output is not supported".into(),
            ));
        }
        if !name.is_ascii() {
            flags |= FLAG_UTF8;
        }

        Ok(EntryHeader {
            name,
            method,
            flags,
            modified,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            external_attrs,
            lfh_offset: self.offset as u32,
        })
    }

    /// Sizes and offsets must stay below the ZIP64 marker value.
    fn check_entry_size(&self, name: &str, uncompressed: u64) -> Result<()> {
        if uncompressed >= MAX_U32 || self.offset >= MAX_U32 {
            return Err(Error::Unsupported(format!(
                "{name} does not fit below 4 GiB; ZIP64 output is not supported"
            )));
        }
        Ok(())
    }

    async fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes).await?;
        self.offset += bytes.len() as u64;
        Ok(())
    }
}

/// Run `input` through the deflater, appending whatever it emits to `out`.
///
/// With [`FlushCompress::Finish`] this keeps going until the stream end marker
/// has been produced.
fn deflate_chunk(
    deflater: &mut Compress,
    mut input: &[u8],
    flush: FlushCompress,
    out: &mut Vec<u8>,
) -> Result<()> {
    let finishing = matches!(flush, FlushCompress::Finish);
    loop {
        if out.capacity() - out.len() < CHUNK_SIZE / 4 {
            out.reserve(CHUNK_SIZE);
        }
        let before = deflater.total_in();
        let status = deflater
            .compress_vec(input, out, flush)
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        input = &input[(deflater.total_in() - before) as usize..];

        match status {
            Status::StreamEnd => return Ok(()),
            _ if !finishing && input.is_empty() => return Ok(()),
            _ => {}
        }
    }
}
