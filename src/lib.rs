//! # rezip
//!
//! Create ZIP archives from files and directory trees, and extract them again.
//!
//! Filesystem paths become archive entry names through a small normalization
//! step ([`normalize_entry_name`]): separators are unified to `/` and a
//! leading `./`, `//` or drive prefix is dropped. Directories are walked
//! depth-first in file-name order, and directories are recorded as entries so
//! empty ones survive the round trip. Extraction recreates the tree under a
//! destination root and refuses entry names that would escape it.
//!
//! Archives can be read from the local filesystem or, through
//! [`HttpRangeReader`], from an HTTP server that supports Range requests.
//!
//! ## Features
//!
//! - Streaming writer: STORED or DEFLATE entries, data descriptors, no
//!   whole-file buffering
//! - Reader with ZIP64 support, CRC-32 verification
//! - Local and remote (HTTP Range) archive sources
//!
//! ## Example
//!
//! ```no_run
//! use rezip::{ZipBuilder, unzip};
//!
//! #[tokio::main]
//! async fn main() -> rezip::Result<()> {
//!     let mut archive = ZipBuilder::create("backup/docs.zip").await?;
//!     archive.add("./docs").await?;
//!     archive.close().await?;
//!
//!     unzip("backup/docs.zip", "restored").await
//! }
//! ```

pub mod archive;
pub mod cli;
pub mod error;
pub mod io;
pub mod options;
pub mod path;
pub mod zip;

pub use archive::{ZipBuilder, unzip, unzip_with};
pub use cli::Cli;
pub use error::{Error, Result};
pub use io::{HttpRangeReader, LocalFileReader, ReadAt};
pub use options::{WalkErrorPolicy, ZipOptions};
pub use path::{entry_output_path, normalize_entry_name};
pub use zip::{CompressionMethod, ZipExtractor, ZipFileEntry, ZipParser, ZipWriter};
