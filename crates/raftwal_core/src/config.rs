//! Log configuration.

use crate::meta::META_MIN_SIZE;
use crate::segment::HEADER_SIZE;

/// Configuration for opening a durable log.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the data directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Size of a freshly created segment file, header included.
    pub segment_initial_size: u64,

    /// Size of a freshly created meta file.
    pub meta_initial_size: u64,

    /// Whether `save` flushes to disk before returning.
    pub sync_on_save: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            segment_initial_size: 2 * HEADER_SIZE, // 1 MiB header + 1 MiB payload
            meta_initial_size: META_MIN_SIZE,
            sync_on_save: false,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the data directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the initial segment size. Values below the header size plus one
    /// page are raised to that minimum.
    #[must_use]
    pub fn segment_initial_size(mut self, size: u64) -> Self {
        self.segment_initial_size = size.max(HEADER_SIZE + 4096);
        self
    }

    /// Sets the initial meta file size, at least [`META_MIN_SIZE`].
    #[must_use]
    pub fn meta_initial_size(mut self, size: u64) -> Self {
        self.meta_initial_size = size.max(META_MIN_SIZE);
        self
    }

    /// Sets whether every `save` is synced before returning.
    #[must_use]
    pub const fn sync_on_save(mut self, value: bool) -> Self {
        self.sync_on_save = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.create_if_missing);
        assert!(!config.sync_on_save);
        assert_eq!(config.segment_initial_size, 2 << 20);
        assert_eq!(config.meta_initial_size, 4096);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .create_if_missing(false)
            .sync_on_save(true)
            .meta_initial_size(8192);

        assert!(!config.create_if_missing);
        assert!(config.sync_on_save);
        assert_eq!(config.meta_initial_size, 8192);
    }

    #[test]
    fn sizes_are_clamped() {
        let config = Config::new().segment_initial_size(10).meta_initial_size(10);
        assert_eq!(config.segment_initial_size, HEADER_SIZE + 4096);
        assert_eq!(config.meta_initial_size, META_MIN_SIZE);
    }
}
