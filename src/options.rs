use crate::zip::CompressionMethod;

/// Default mode for directories created while writing or extracting.
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// Default DEFLATE level, the zlib default.
pub const DEFAULT_LEVEL: u32 = 6;

/// What to do when the directory walk cannot read an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WalkErrorPolicy {
    /// Stop and return the error.
    #[default]
    Abort,
    /// Log a warning and keep walking.
    Skip,
}

/// Settings for [`ZipBuilder`](crate::ZipBuilder) and [`unzip_with`](crate::unzip_with).
#[derive(Debug, Clone)]
pub struct ZipOptions {
    /// Permission bits for created directories (ignored off Unix).
    pub dir_mode: u32,
    /// Method used for file entries. Directory entries are always stored.
    pub compression: CompressionMethod,
    /// DEFLATE level, 0-9.
    pub level: u32,
    pub walk_errors: WalkErrorPolicy,
}

impl Default for ZipOptions {
    fn default() -> Self {
        Self {
            dir_mode: DEFAULT_DIR_MODE,
            compression: CompressionMethod::Deflate,
            level: DEFAULT_LEVEL,
            walk_errors: WalkErrorPolicy::Abort,
        }
    }
}

impl ZipOptions {
    pub fn dir_mode(mut self, mode: u32) -> Self {
        self.dir_mode = mode;
        self
    }

    pub fn compression(mut self, method: CompressionMethod) -> Self {
        self.compression = method;
        self
    }

    /// Set the DEFLATE level; values above 9 are clamped.
    pub fn level(mut self, level: u32) -> Self {
        self.level = level.min(9);
        self
    }

    pub fn walk_errors(mut self, policy: WalkErrorPolicy) -> Self {
        self.walk_errors = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = ZipOptions::default();
        assert_eq!(opts.dir_mode, 0o755);
        assert_eq!(opts.compression, CompressionMethod::Deflate);
        assert_eq!(opts.level, 6);
        assert_eq!(opts.walk_errors, WalkErrorPolicy::Abort);
    }

    #[test]
    fn level_is_clamped() {
        assert_eq!(ZipOptions::default().level(42).level, 9);
    }
}
