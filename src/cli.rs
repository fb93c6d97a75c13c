use clap::{Parser, Subcommand};

use crate::options::{WalkErrorPolicy, ZipOptions};
use crate::zip::CompressionMethod;

#[derive(Parser, Debug)]
#[command(name = "rezip")]
#[command(version)]
#[command(about = "Create and extract ZIP archives, local or over HTTP", long_about = None)]
#[command(after_help = "Examples:\n  \
  rezip create site.zip ./public README.md   pack a tree and a file\n  \
  rezip extract site.zip -d restore          unpack into ./restore\n  \
  rezip list -v https://example.com/a.zip    list a remote archive")]
pub struct Cli {
    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', global = true, action = clap::ArgAction::Count)]
    pub quiet: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create an archive from files and directories
    Create {
        /// Archive to write (parent directories are created)
        #[arg(value_name = "ARCHIVE")]
        archive: String,

        /// Files or directories to add
        #[arg(value_name = "PATH", required = true)]
        paths: Vec<String>,

        /// Store only, no compression
        #[arg(short = '0')]
        store: bool,

        /// DEFLATE level (0-9)
        #[arg(long, value_name = "N", default_value_t = crate::options::DEFAULT_LEVEL)]
        level: u32,

        /// Skip entries that cannot be read instead of stopping
        #[arg(long)]
        skip_unreadable: bool,
    },

    /// Extract an archive
    Extract {
        /// ZIP file path or HTTP URL
        #[arg(value_name = "ARCHIVE")]
        archive: String,

        /// Extract files into exdir
        #[arg(short = 'd', value_name = "DIR", default_value = ".")]
        extract_dir: String,

        /// Extract files to pipe, no messages
        #[arg(short = 'p')]
        pipe: bool,
    },

    /// List archive contents
    List {
        /// ZIP file path or HTTP URL
        #[arg(value_name = "ARCHIVE")]
        archive: String,

        /// List verbosely
        #[arg(short = 'v')]
        verbose: bool,
    },
}

impl Cli {
    pub fn is_quiet(&self) -> bool {
        self.quiet > 0
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }
}

impl Command {
    /// Options implied by the `create` flags; defaults for other commands.
    pub fn zip_options(&self) -> ZipOptions {
        match self {
            Command::Create {
                store,
                level,
                skip_unreadable,
                ..
            } => {
                let method = if *store {
                    CompressionMethod::Stored
                } else {
                    CompressionMethod::Deflate
                };
                let policy = if *skip_unreadable {
                    WalkErrorPolicy::Skip
                } else {
                    WalkErrorPolicy::Abort
                };
                ZipOptions::default()
                    .compression(method)
                    .level(*level)
                    .walk_errors(policy)
            }
            _ => ZipOptions::default(),
        }
    }
}

/// Whether an archive argument names a remote file.
pub fn is_http_url(archive: &str) -> bool {
    archive.starts_with("http://") || archive.starts_with("https://")
}
