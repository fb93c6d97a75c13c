//! Central-directory reader.
//!
//! An archive is read from its tail: the End of Central Directory record
//! (possibly behind a comment, possibly pointing at a ZIP64 record) gives the
//! location of the central directory, which lists every entry. Entry data is
//! only touched later, through the local header offset of each entry. Reading
//! in this order keeps the number of round trips small for remote sources.

use std::io::{Cursor, Read};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{Error, Result};
use crate::io::ReadAt;

use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
const MAX_COMMENT_SIZE: u64 = 65535;

/// ZIP64 extended information extra field.
const ZIP64_EXTRA_ID: u16 = 0x0001;

/// Reads entry metadata out of an archive source.
///
/// Usually driven through [`ZipExtractor`](super::ZipExtractor).
pub struct ZipParser<R: ReadAt> {
    reader: Arc<R>,
    size: u64,
}

impl<R: ReadAt> ZipParser<R> {
    pub fn new(reader: Arc<R>) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    /// Locate the End of Central Directory record.
    ///
    /// Returns the record and its offset. Fails with
    /// [`Error::InvalidArchive`] when no record can be found, which is what a
    /// file that is not a ZIP archive at all looks like.
    pub async fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64)> {
        let record = EndOfCentralDirectory::SIZE as u64;
        if self.size < record {
            return Err(Error::invalid("file too small to be a ZIP archive"));
        }

        // Common case first: no archive comment
        let offset = self.size - record;
        let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
        self.reader.read_exact_at(offset, &mut buf).await?;
        if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && buf[20..22] == [0, 0] {
            return Ok((EndOfCentralDirectory::from_bytes(&buf)?, offset));
        }

        let search_size = (MAX_COMMENT_SIZE + record).min(self.size);
        let search_start = self.size - search_size;
        let mut buf = vec![0u8; search_size as usize];
        self.reader.read_exact_at(search_start, &mut buf).await?;

        // Scan backwards; the comment length must account for the rest of the file
        for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
            if &buf[i..i + 4] != EndOfCentralDirectory::SIGNATURE {
                continue;
            }
            let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;
            if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                let eocd =
                    EndOfCentralDirectory::from_bytes(&buf[i..i + EndOfCentralDirectory::SIZE])?;
                return Ok((eocd, search_start + i as u64));
            }
        }

        Err(Error::invalid("end of central directory not found"))
    }

    /// Read the ZIP64 record referenced by the locator in front of the EOCD.
    pub async fn read_zip64_eocd(&self, eocd_offset: u64) -> Result<Zip64EOCD> {
        let locator_offset = eocd_offset
            .checked_sub(Zip64EOCDLocator::SIZE as u64)
            .ok_or_else(|| Error::invalid("missing ZIP64 locator"))?;
        let mut locator_buf = vec![0u8; Zip64EOCDLocator::SIZE];
        self.reader
            .read_exact_at(locator_offset, &mut locator_buf)
            .await?;
        let locator = Zip64EOCDLocator::from_bytes(&locator_buf)?;

        let mut eocd64_buf = vec![0u8; Zip64EOCD::MIN_SIZE];
        self.reader
            .read_exact_at(locator.eocd64_offset, &mut eocd64_buf)
            .await?;
        Zip64EOCD::from_bytes(&eocd64_buf)
    }

    /// List every entry in central-directory order.
    pub async fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        let (eocd, eocd_offset) = self.find_eocd().await?;

        let (cd_offset, cd_size, total_entries) = if eocd.is_zip64() {
            let eocd64 = self.read_zip64_eocd(eocd_offset).await?;
            (eocd64.cd_offset, eocd64.cd_size, eocd64.total_entries)
        } else {
            (
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.total_entries as u64,
            )
        };

        if cd_offset.saturating_add(cd_size) > eocd_offset {
            return Err(Error::invalid("central directory overlaps end record"));
        }
        if total_entries.saturating_mul(CDFH_MIN_SIZE as u64) > cd_size {
            return Err(Error::invalid(format!(
                "{total_entries} entries cannot fit in a {cd_size}-byte central directory"
            )));
        }

        // One read for the whole directory
        let mut cd_data = vec![0u8; cd_size as usize];
        self.reader.read_exact_at(cd_offset, &mut cd_data).await?;

        let mut entries = Vec::with_capacity(total_entries as usize);
        let mut cursor = Cursor::new(cd_data.as_slice());
        for _ in 0..total_entries {
            let entry = parse_cdfh(&mut cursor).map_err(|e| match e {
                Error::Io(_) => Error::invalid("truncated central directory"),
                other => other,
            })?;
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Offset of an entry's data, just past its local header.
    ///
    /// The local header's name and extra field may differ in length from the
    /// central copy, so it has to be read.
    pub async fn get_data_offset(&self, entry: &ZipFileEntry) -> Result<u64> {
        let mut lfh_buf = [0u8; LFH_SIZE];
        self.reader
            .read_exact_at(entry.lfh_offset, &mut lfh_buf)
            .await?;

        if &lfh_buf[0..4] != LFH_SIGNATURE {
            return Err(Error::invalid(format!(
                "bad local header for {}",
                entry.file_name
            )));
        }

        let file_name_length = u16::from_le_bytes([lfh_buf[26], lfh_buf[27]]) as u64;
        let extra_field_length = u16::from_le_bytes([lfh_buf[28], lfh_buf[29]]) as u64;

        let data_offset =
            entry.lfh_offset + LFH_SIZE as u64 + file_name_length + extra_field_length;
        if data_offset.saturating_add(entry.compressed_size) > self.size {
            return Err(Error::invalid(format!(
                "data for {} runs past the end of the archive",
                entry.file_name
            )));
        }

        Ok(data_offset)
    }

    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }
}

fn parse_cdfh(cursor: &mut Cursor<&[u8]>) -> Result<ZipFileEntry> {
    let mut sig = [0u8; 4];
    cursor.read_exact(&mut sig)?;
    if sig != CDFH_SIGNATURE {
        return Err(Error::invalid("bad central directory file header"));
    }

    let version_made_by = cursor.read_u16::<LittleEndian>()?;
    let _version_needed = cursor.read_u16::<LittleEndian>()?;
    let flags = cursor.read_u16::<LittleEndian>()?;
    let compression_method = cursor.read_u16::<LittleEndian>()?;
    let time = cursor.read_u16::<LittleEndian>()?;
    let date = cursor.read_u16::<LittleEndian>()?;
    let crc32 = cursor.read_u32::<LittleEndian>()?;
    let mut compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
    let mut uncompressed_size = cursor.read_u32::<LittleEndian>()? as u64;
    let file_name_length = cursor.read_u16::<LittleEndian>()?;
    let extra_field_length = cursor.read_u16::<LittleEndian>()?;
    let file_comment_length = cursor.read_u16::<LittleEndian>()?;
    let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
    let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
    let external_attrs = cursor.read_u32::<LittleEndian>()?;
    let mut lfh_offset = cursor.read_u32::<LittleEndian>()? as u64;

    let mut file_name_bytes = vec![0u8; file_name_length as usize];
    cursor.read_exact(&mut file_name_bytes)?;
    let file_name = String::from_utf8_lossy(&file_name_bytes).into_owned();

    let extra_field_end = cursor.position() + extra_field_length as u64;
    while cursor.position() + 4 <= extra_field_end {
        let header_id = cursor.read_u16::<LittleEndian>()?;
        let field_size = cursor.read_u16::<LittleEndian>()? as u64;
        let field_end = cursor.position() + field_size;

        if header_id == ZIP64_EXTRA_ID {
            // Present only for the fields saturated in the fixed header, in this order
            if uncompressed_size == MAX_U32 && cursor.position() + 8 <= field_end {
                uncompressed_size = cursor.read_u64::<LittleEndian>()?;
            }
            if compressed_size == MAX_U32 && cursor.position() + 8 <= field_end {
                compressed_size = cursor.read_u64::<LittleEndian>()?;
            }
            if lfh_offset == MAX_U32 && cursor.position() + 8 <= field_end {
                lfh_offset = cursor.read_u64::<LittleEndian>()?;
            }
        }
        cursor.set_position(field_end);
    }
    cursor.set_position(extra_field_end + file_comment_length as u64);
    if cursor.position() > cursor.get_ref().len() as u64 {
        return Err(Error::invalid("truncated central directory"));
    }

    let unix_mode = (version_made_by >> 8 == 3).then_some(external_attrs >> 16);
    let is_directory = file_name.ends_with('/') || unix_mode.is_some_and(is_dir_mode);

    Ok(ZipFileEntry {
        file_name,
        compression_method: CompressionMethod::from_u16(compression_method),
        flags,
        compressed_size,
        uncompressed_size,
        crc32,
        lfh_offset,
        modified: DosDateTime { date, time },
        unix_mode,
        is_directory,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct MemorySource(Vec<u8>);

    #[async_trait]
    impl ReadAt for MemorySource {
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

    fn empty_archive(comment: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        EndOfCentralDirectory {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: 0,
            total_entries: 0,
            cd_size: 0,
            cd_offset: 0,
            comment_len: comment.len() as u16,
        }
        .write_to(&mut buf)
        .unwrap();
        buf.extend_from_slice(comment);
        buf
    }

    #[tokio::test]
    async fn finds_eocd_behind_a_comment() {
        let parser = ZipParser::new(Arc::new(MemorySource(empty_archive(b"hello there"))));
        let (eocd, offset) = parser.find_eocd().await.unwrap();
        assert_eq!(offset, 0);
        assert_eq!(eocd.comment_len, 11);
        assert!(parser.list_files().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_data_that_is_not_an_archive() {
        let parser = ZipParser::new(Arc::new(MemorySource(b"just some text, no zip here".to_vec())));
        assert!(matches!(
            parser.list_files().await,
            Err(Error::InvalidArchive(_))
        ));

        let tiny = ZipParser::new(Arc::new(MemorySource(b"PK".to_vec())));
        assert!(matches!(tiny.list_files().await, Err(Error::InvalidArchive(_))));
    }

    /// One stored entry whose sizes and offset live only in ZIP64 fields.
    fn zip64_archive(name: &str, data: &[u8]) -> Vec<u8> {
        use byteorder::WriteBytesExt;
        use std::io::Write;

        let mut crc = flate2::Crc::new();
        crc.update(data);
        let le = |buf: &mut Vec<u8>, v: u16| buf.write_u16::<LittleEndian>(v).unwrap();

        let mut out = Vec::new();
        out.write_all(LFH_SIGNATURE).unwrap();
        for v in [45, 0, 0, 0, DosDateTime::EPOCH.date] {
            le(&mut out, v);
        }
        out.write_u32::<LittleEndian>(crc.sum()).unwrap();
        out.write_u32::<LittleEndian>(data.len() as u32).unwrap();
        out.write_u32::<LittleEndian>(data.len() as u32).unwrap();
        le(&mut out, name.len() as u16);
        le(&mut out, 0);
        out.write_all(name.as_bytes()).unwrap();
        out.write_all(data).unwrap();

        let cd_offset = out.len() as u64;
        out.write_all(CDFH_SIGNATURE).unwrap();
        for v in [(3 << 8) | 45, 45, 0, 0, 0, DosDateTime::EPOCH.date] {
            le(&mut out, v);
        }
        out.write_u32::<LittleEndian>(crc.sum()).unwrap();
        out.write_u32::<LittleEndian>(0xFFFF_FFFF).unwrap();
        out.write_u32::<LittleEndian>(0xFFFF_FFFF).unwrap();
        le(&mut out, name.len() as u16);
        le(&mut out, 4 + 24);
        for v in [0, 0, 0] {
            le(&mut out, v);
        }
        out.write_u32::<LittleEndian>(0o100644 << 16).unwrap();
        out.write_u32::<LittleEndian>(0xFFFF_FFFF).unwrap();
        out.write_all(name.as_bytes()).unwrap();
        le(&mut out, ZIP64_EXTRA_ID);
        le(&mut out, 24);
        out.write_u64::<LittleEndian>(data.len() as u64).unwrap();
        out.write_u64::<LittleEndian>(data.len() as u64).unwrap();
        out.write_u64::<LittleEndian>(0).unwrap();
        let cd_size = out.len() as u64 - cd_offset;

        let eocd64_offset = out.len() as u64;
        out.write_all(Zip64EOCD::SIGNATURE).unwrap();
        out.write_u64::<LittleEndian>(44).unwrap();
        le(&mut out, (3 << 8) | 45);
        le(&mut out, 45);
        out.write_u32::<LittleEndian>(0).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap();
        out.write_u64::<LittleEndian>(1).unwrap();
        out.write_u64::<LittleEndian>(1).unwrap();
        out.write_u64::<LittleEndian>(cd_size).unwrap();
        out.write_u64::<LittleEndian>(cd_offset).unwrap();

        out.write_all(Zip64EOCDLocator::SIGNATURE).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap();
        out.write_u64::<LittleEndian>(eocd64_offset).unwrap();
        out.write_u32::<LittleEndian>(1).unwrap();

        EndOfCentralDirectory {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: 0xFFFF,
            total_entries: 0xFFFF,
            cd_size: 0xFFFF_FFFF,
            cd_offset: 0xFFFF_FFFF,
            comment_len: 0,
        }
        .write_to(&mut out)
        .unwrap();
        out
    }

    #[tokio::test]
    async fn reads_zip64_records_and_extra_fields() {
        let data = zip64_archive("big.txt", b"hello zip64");
        let parser = ZipParser::new(Arc::new(MemorySource(data)));

        let (eocd, eocd_offset) = parser.find_eocd().await.unwrap();
        assert!(eocd.is_zip64());
        let eocd64 = parser.read_zip64_eocd(eocd_offset).await.unwrap();
        assert_eq!(eocd64.total_entries, 1);

        let entries = parser.list_files().await.unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.file_name, "big.txt");
        assert_eq!(entry.uncompressed_size, 11);
        assert_eq!(entry.compressed_size, 11);
        assert_eq!(entry.lfh_offset, 0);
        assert_eq!(entry.unix_mode, Some(0o100644));
        assert!(!entry.is_directory);

        let offset = parser.get_data_offset(entry).await.unwrap();
        let mut buf = vec![0u8; 11];
        parser.reader().read_exact_at(offset, &mut buf).await.unwrap();
        assert_eq!(buf, b"hello zip64");
    }

    #[tokio::test]
    async fn rejects_entry_count_larger_than_directory() {
        let mut data = empty_archive(b"");
        // total_entries = 5 with a zero-length directory
        data[8..10].copy_from_slice(&5u16.to_le_bytes());
        data[10..12].copy_from_slice(&5u16.to_le_bytes());
        let parser = ZipParser::new(Arc::new(MemorySource(data)));
        assert!(matches!(
            parser.list_files().await,
            Err(Error::InvalidArchive(_))
        ));
    }
}
