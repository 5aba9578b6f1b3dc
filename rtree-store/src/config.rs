//! Index configuration: file locations and on-disk layout parameters.

use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};

use crate::rtree::constants::{
    CONFIG_HASH_LEN, DEFAULT_CACHE_BYTES, DEFAULT_COORD_SIZE, DEFAULT_DIMENSIONS,
    DEFAULT_ID_SIZE, DEFAULT_MIN_FILL, DEFAULT_PAGE_SIZE, DEFAULT_RECORD_FILE, DEFAULT_TREE_FILE,
    NODE_FLAG_SIZE,
};
use crate::rtree::types::{RTreeError, RTreeResult};

/// Parameters for opening or creating an index.
///
/// The layout parameters (`dimensions`, `page_size`, `id_size`,
/// `coord_size`) are baked into both file headers through [`config_hash`]
/// and must match exactly when an existing pair is reopened.
///
/// [`config_hash`]: RTreeConfig::config_hash
#[derive(Debug, Clone)]
pub struct RTreeConfig {
    /// Directory holding both working files; created if missing.
    pub working_dir: PathBuf,
    /// Tree file name inside `working_dir`.
    pub tree_file: String,
    /// Record file name inside `working_dir`.
    pub record_file: String,
    /// Number of coordinates per point, `>= 1`.
    pub dimensions: u32,
    /// Size of one node slot in the tree file, in bytes.
    pub page_size: u32,
    /// Width of node ids and record offsets on disk, 1..=8 bytes.
    pub id_size: u8,
    /// Width of one signed coordinate on disk, 1..=8 bytes.
    pub coord_size: u8,
    /// Minimum-fill fraction in `(0, 0.5]`, biases split distribution.
    pub min_fill: f64,
    /// Byte budget for the variable cache region.
    pub cache_bytes: usize,
    /// Delete any existing pair before opening.
    pub override_existing: bool,
}

impl RTreeConfig {
    /// A default-parameter configuration rooted at `working_dir`.
    pub fn new(working_dir: impl AsRef<Path>) -> RTreeConfig {
        RTreeConfig {
            working_dir: working_dir.as_ref().to_path_buf(),
            tree_file: DEFAULT_TREE_FILE.to_string(),
            record_file: DEFAULT_RECORD_FILE.to_string(),
            dimensions: DEFAULT_DIMENSIONS,
            page_size: DEFAULT_PAGE_SIZE,
            id_size: DEFAULT_ID_SIZE,
            coord_size: DEFAULT_COORD_SIZE,
            min_fill: DEFAULT_MIN_FILL,
            cache_bytes: DEFAULT_CACHE_BYTES,
            override_existing: false,
        }
    }

    pub fn dimensions(mut self, dimensions: u32) -> RTreeConfig {
        self.dimensions = dimensions;
        self
    }

    pub fn page_size(mut self, page_size: u32) -> RTreeConfig {
        self.page_size = page_size;
        self
    }

    pub fn id_size(mut self, id_size: u8) -> RTreeConfig {
        self.id_size = id_size;
        self
    }

    pub fn coord_size(mut self, coord_size: u8) -> RTreeConfig {
        self.coord_size = coord_size;
        self
    }

    pub fn min_fill(mut self, min_fill: f64) -> RTreeConfig {
        self.min_fill = min_fill;
        self
    }

    pub fn cache_bytes(mut self, cache_bytes: usize) -> RTreeConfig {
        self.cache_bytes = cache_bytes;
        self
    }

    pub fn override_existing(mut self, override_existing: bool) -> RTreeConfig {
        self.override_existing = override_existing;
        self
    }

    pub fn tree_path(&self) -> PathBuf {
        self.working_dir.join(&self.tree_file)
    }

    pub fn record_path(&self) -> PathBuf {
        self.working_dir.join(&self.record_file)
    }

    /// Maximum children per node for this layout.
    pub fn max_children(&self) -> usize {
        let fixed = NODE_FLAG_SIZE
            + self.id_size as usize
            + 2 * self.dimensions as usize * self.coord_size as usize;
        (self.page_size as usize).saturating_sub(fixed) / self.id_size as usize
    }

    pub fn validate(&self) -> RTreeResult<()> {
        if self.dimensions < 1 {
            return Err(RTreeError::InvalidConfig(
                "dimensions must be at least 1".into(),
            ));
        }
        if !(1..=8).contains(&self.id_size) {
            return Err(RTreeError::InvalidConfig(format!(
                "id_size must be 1..=8 bytes, got {}",
                self.id_size
            )));
        }
        if !(1..=8).contains(&self.coord_size) {
            return Err(RTreeError::InvalidConfig(format!(
                "coord_size must be 1..=8 bytes, got {}",
                self.coord_size
            )));
        }
        if !(self.min_fill > 0.0 && self.min_fill <= 0.5) {
            return Err(RTreeError::InvalidConfig(format!(
                "min_fill must be in (0, 0.5], got {}",
                self.min_fill
            )));
        }
        if self.max_children() < 2 {
            return Err(RTreeError::InvalidConfig(format!(
                "page_size {} only fits {} children per node, need at least 2",
                self.page_size,
                self.max_children()
            )));
        }
        Ok(())
    }

    /// SHA-1 over the four layout parameters as 4-byte little-endian words.
    /// Stored in both file headers so a mismatched pair is rejected cheaply.
    pub fn config_hash(&self) -> [u8; CONFIG_HASH_LEN] {
        let mut hasher = Sha1::new();
        hasher.update(self.dimensions.to_le_bytes());
        hasher.update(self.page_size.to_le_bytes());
        hasher.update((self.id_size as u32).to_le_bytes());
        hasher.update((self.coord_size as u32).to_le_bytes());
        hasher.finalize().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = RTreeConfig::new("saved_data");
        config.validate().unwrap();
        assert_eq!(config.dimensions, 2);
        assert_eq!(config.page_size, 1024);
        assert_eq!(config.tree_path(), PathBuf::from("saved_data/rtree.bin"));
        assert_eq!(
            config.record_path(),
            PathBuf::from("saved_data/records.bin")
        );
    }

    #[test]
    fn test_max_children_for_default_layout() {
        // (1024 - 1 - 8 - 2*2*4) / 8
        let config = RTreeConfig::new("d");
        assert_eq!(config.max_children(), 124);
    }

    #[test]
    fn test_max_children_for_tiny_pages() {
        let config = RTreeConfig::new("d").page_size(64);
        // (64 - 1 - 8 - 16) / 8
        assert_eq!(config.max_children(), 4);
    }

    #[test]
    fn test_rejects_zero_dimensions() {
        let config = RTreeConfig::new("d").dimensions(0);
        assert!(matches!(
            config.validate(),
            Err(RTreeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_undersized_pages() {
        let config = RTreeConfig::new("d").page_size(32);
        assert!(matches!(
            config.validate(),
            Err(RTreeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_bad_min_fill() {
        assert!(RTreeConfig::new("d").min_fill(0.0).validate().is_err());
        assert!(RTreeConfig::new("d").min_fill(0.6).validate().is_err());
        assert!(RTreeConfig::new("d").min_fill(0.5).validate().is_ok());
    }

    #[test]
    fn test_config_hash_tracks_layout_parameters() {
        let a = RTreeConfig::new("d");
        let b = RTreeConfig::new("elsewhere").cache_bytes(1024);
        // cache budget and paths are not part of the layout
        assert_eq!(a.config_hash(), b.config_hash());

        let c = RTreeConfig::new("d").page_size(2048);
        assert_ne!(a.config_hash(), c.config_hash());
    }
}
