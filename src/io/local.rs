use std::fs::File;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::ReadAt;
use crate::error::{Error, Result};

/// Archive source backed by a file on the local filesystem.
pub struct LocalFileReader {
    file: File,
    path: PathBuf,
    size: u64,
}

impl LocalFileReader {
    pub fn new(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::fs(path, e))?;
        let size = file.metadata().map_err(|e| Error::fs(path, e))?.len();
        Ok(Self {
            file,
            path: path.to_path_buf(),
            size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ReadAt for LocalFileReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.size {
            return Ok(0);
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            Ok(self.file.read_at(buf, offset)?)
        }

        #[cfg(windows)]
        {
            use std::os::windows::fs::FileExt;
            Ok(self.file.seek_read(buf, offset)?)
        }

        #[cfg(not(any(unix, windows)))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let mut file = &self.file;
            file.seek(SeekFrom::Start(offset))?;
            Ok(file.read(buf)?)
        }
    }

    fn size(&self) -> u64 {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn reads_at_offsets_and_stops_at_end() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123456789").unwrap();

        let reader = LocalFileReader::new(tmp.path()).unwrap();
        assert_eq!(reader.size(), 10);

        let mut buf = [0u8; 4];
        reader.read_exact_at(3, &mut buf).await.unwrap();
        assert_eq!(&buf, b"3456");

        assert_eq!(reader.read_at(10, &mut buf).await.unwrap(), 0);
        assert!(matches!(
            reader.read_exact_at(8, &mut buf).await,
            Err(Error::InvalidArchive(_))
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = LocalFileReader::new(Path::new("/definitely/not/here.zip"))
            .err()
            .unwrap();
        assert!(err.is_not_found());
    }
}
