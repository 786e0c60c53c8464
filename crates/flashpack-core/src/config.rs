//! Configuration for container generation

use crate::catalog::DigestAlgorithm;
use crate::error::{Error, Result};
use crate::format::{FlashUpdateVersion, PLATFORM_ID_FIELD_SIZE};
use std::path::Path;

/// Default block (chunk) size (128 KB)
pub const DEFAULT_BLOCK_SIZE: u32 = 128 * 1024;

/// Default device sector size
pub const DEFAULT_SECTOR_SIZE: u32 = 512;

/// Default longest all-zero run that may be left out of a container
pub const DEFAULT_MAX_BLANK_BLOCKS: u64 = 100;

/// Default number of blocks hashed together in one batch
pub const DEFAULT_HASH_BATCH_BLOCKS: usize = 16;

/// Minimum sector size
pub const MIN_SECTOR_SIZE: u32 = 512;

/// Maximum sector size
pub const MAX_SECTOR_SIZE: u32 = 64 * 1024;

/// Maximum block size (64 MB)
pub const MAX_BLOCK_SIZE: u32 = 64 * 1024 * 1024;

/// Settings for one container build
#[derive(Debug, Clone)]
pub struct GenerateConfig {
    /// Size of each data block and catalog chunk
    pub block_size: u32,

    /// Device sector size
    pub sector_size: u32,

    /// Longest all-zero run that may be omitted from the payload
    pub max_blank_blocks: u64,

    /// Store layout variant
    pub flash_update_version: FlashUpdateVersion,

    /// Digest used for the catalog
    pub digest_algorithm: DigestAlgorithm,

    /// Platform identifiers, one store per entry
    pub platform_ids: Vec<String>,

    /// Blocks buffered per hashing batch
    pub hash_batch_blocks: usize,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            sector_size: DEFAULT_SECTOR_SIZE,
            max_blank_blocks: DEFAULT_MAX_BLANK_BLOCKS,
            flash_update_version: FlashUpdateVersion::V1,
            digest_algorithm: DigestAlgorithm::Sha256,
            platform_ids: Vec::new(),
            hash_batch_blocks: DEFAULT_HASH_BATCH_BLOCKS,
        }
    }
}

impl GenerateConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set block size
    pub fn block_size(mut self, size: u32) -> Self {
        self.block_size = size;
        self
    }

    /// Set sector size
    pub fn sector_size(mut self, size: u32) -> Self {
        self.sector_size = size;
        self
    }

    /// Set the blank-run threshold
    pub fn max_blank_blocks(mut self, blocks: u64) -> Self {
        self.max_blank_blocks = blocks;
        self
    }

    /// Set the flash update version
    pub fn flash_update_version(mut self, version: FlashUpdateVersion) -> Self {
        self.flash_update_version = version;
        self
    }

    /// Set the catalog digest algorithm
    pub fn digest_algorithm(mut self, algorithm: DigestAlgorithm) -> Self {
        self.digest_algorithm = algorithm;
        self
    }

    /// Set platform identifiers
    pub fn platform_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.platform_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Set hashing batch size (at least 1)
    pub fn hash_batch_blocks(mut self, blocks: usize) -> Self {
        self.hash_batch_blocks = blocks.max(1);
        self
    }

    /// Check the configuration before a build starts
    pub fn validate(&self) -> Result<()> {
        if !self.sector_size.is_power_of_two()
            || !(MIN_SECTOR_SIZE..=MAX_SECTOR_SIZE).contains(&self.sector_size)
        {
            return Err(Error::Configuration(format!(
                "sector size {} must be a power of two between {} and {}",
                self.sector_size, MIN_SECTOR_SIZE, MAX_SECTOR_SIZE
            )));
        }

        if self.block_size == 0 || self.block_size > MAX_BLOCK_SIZE {
            return Err(Error::Configuration(format!(
                "block size {} must be between 1 and {}",
                self.block_size, MAX_BLOCK_SIZE
            )));
        }

        if self.block_size % self.sector_size != 0 {
            return Err(Error::Configuration(format!(
                "block size {} is not a multiple of sector size {}",
                self.block_size, self.sector_size
            )));
        }

        if self.platform_ids.is_empty() {
            return Err(Error::Configuration(
                "at least one platform ID is required".to_string(),
            ));
        }

        if self.platform_ids.len() > usize::from(u16::MAX) {
            return Err(Error::Configuration(format!(
                "too many platform IDs: {}",
                self.platform_ids.len()
            )));
        }

        for id in &self.platform_ids {
            validate_platform_id(id)?;
        }

        Ok(())
    }
}

/// Split a semicolon-delimited platform ID list
///
/// Empty segments are dropped; surrounding whitespace is trimmed.
pub fn parse_platform_ids(list: &str) -> Result<Vec<String>> {
    let ids: Vec<String> = list
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if ids.is_empty() {
        return Err(Error::Configuration(format!(
            "no platform IDs in '{}'",
            list
        )));
    }

    for id in &ids {
        validate_platform_id(id)?;
    }

    Ok(ids)
}

fn validate_platform_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::Configuration("empty platform ID".to_string()));
    }
    if !id.is_ascii() || id.contains(';') || id.bytes().any(|b| b == 0 || b.is_ascii_control()) {
        return Err(Error::Configuration(format!(
            "platform ID '{}' must be printable ASCII without ';'",
            id
        )));
    }
    if id.len() >= PLATFORM_ID_FIELD_SIZE {
        return Err(Error::Configuration(format!(
            "platform ID '{}' is longer than {} bytes",
            id,
            PLATFORM_ID_FIELD_SIZE - 1
        )));
    }
    Ok(())
}

/// Read a newline-delimited list of partition names to leave out
///
/// Blank lines and lines starting with `#` are ignored.
pub fn read_exclusion_list(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Err(Error::Configuration(format!(
            "excluded partitions file not found: {}",
            path.display()
        )));
    }

    let contents = std::fs::read_to_string(path).map_err(|e| {
        Error::Configuration(format!(
            "failed to read excluded partitions file {}: {}",
            path.display(),
            e
        ))
    })?;

    let names = parse_exclusion_list(&contents);
    tracing::debug!(
        "Read {} excluded partition name(s) from {:?}",
        names.len(),
        path
    );
    Ok(names)
}

/// Parse the contents of an exclusion list
pub fn parse_exclusion_list(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Parse a human size string such as `4096`, `128K` or `4M`
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim().to_uppercase();
    let s = s.strip_suffix('B').unwrap_or(&s);

    let (num_str, multiplier) = if let Some(n) = s.strip_suffix('K') {
        (n, 1024)
    } else if let Some(n) = s.strip_suffix('M') {
        (n, 1024 * 1024)
    } else if let Some(n) = s.strip_suffix('G') {
        (n, 1024 * 1024 * 1024)
    } else {
        (s, 1)
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .map_err(|_| Error::Configuration(format!("invalid size: {}", s)))?;

    num.checked_mul(multiplier)
        .ok_or_else(|| Error::Configuration(format!("size too large: {}", s)))
}
