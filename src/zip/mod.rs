//! ZIP container reading and writing.
//!
//! - [`structures`]: record layouts (EOCD, central and local headers, DOS time)
//! - [`parser`]: central-directory reader over any [`ReadAt`](crate::io::ReadAt) source
//! - [`extractor`]: streams entry data out, inflating DEFLATE and checking CRC-32
//! - [`writer`]: streams entries into any async sink
//!
//! Reading understands ZIP64 end records and extra fields. Writing produces
//! the classic 32-bit layout only. STORED and DEFLATE are the only
//! compression methods; encrypted entries are refused.

mod extractor;
mod parser;
mod structures;
mod writer;

pub(crate) use extractor::create_dir_all;
pub use extractor::ZipExtractor;
pub use parser::ZipParser;
pub use structures::*;
pub use writer::{EntryOptions, ZipWriter};
