//! Binary layout of the container headers
//!
//! A container is a sequence of sections with no padding between them:
//!
//! ```text
//! SecurityHeader | StoreHeader 0..n | Manifest | Catalog | DataBlocks
//! ```
//!
//! All integers are little-endian. The security header has a fixed size;
//! each store header is a fixed part followed by its partition and
//! descriptor tables.

use crate::catalog::DigestAlgorithm;
use crate::config::{MAX_BLOCK_SIZE, MAX_SECTOR_SIZE, MIN_SECTOR_SIZE};
use crate::error::{Error, Result};
use serde::Serialize;

// ============================================================================
// Constants
// ============================================================================

/// Signature at offset 4 of the security header
pub const SECURITY_SIGNATURE: &[u8; 12] = b"SignedImage ";

/// Size of the security header in bytes
pub const SECURITY_HEADER_SIZE: usize = 56;

/// Container format major version
pub const FORMAT_MAJOR: u16 = 1;

/// Container format minor version
pub const FORMAT_MINOR: u16 = 0;

/// Size of the fixed part of a store header
pub const STORE_HEADER_FIXED_SIZE: usize = 240;

/// Bytes reserved for the `;`-joined platform IDs of one store
pub const PLATFORM_ID_FIELD_SIZE: usize = 192;

/// Size of one encoded write descriptor
pub const DESCRIPTOR_ENTRY_SIZE: usize = 12;

/// Update type tag for a full flash
pub const UPDATE_TYPE_FULL_FLASH: u32 = 0;

// ============================================================================
// Flash update version and store layouts
// ============================================================================

/// Store layout variant recorded in every store header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FlashUpdateVersion {
    /// All stores share one copy of the payload
    V1,
    /// Each store carries its own copy of the payload
    V2,
}

impl FlashUpdateVersion {
    /// Major number written to the store header
    pub fn major(&self) -> u16 {
        match self {
            FlashUpdateVersion::V1 => 1,
            FlashUpdateVersion::V2 => 2,
        }
    }

    /// Look up a version by its major number
    pub fn from_major(major: u16) -> Option<Self> {
        match major {
            1 => Some(FlashUpdateVersion::V1),
            2 => Some(FlashUpdateVersion::V2),
            _ => None,
        }
    }

    /// Payload layout strategy for this version
    pub fn layout(&self) -> &'static dyn StoreLayout {
        match self {
            FlashUpdateVersion::V1 => &SharedPayload,
            FlashUpdateVersion::V2 => &PerStorePayload,
        }
    }
}

impl std::fmt::Display for FlashUpdateVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlashUpdateVersion::V1 => write!(f, "V1"),
            FlashUpdateVersion::V2 => write!(f, "V2"),
        }
    }
}

impl std::str::FromStr for FlashUpdateVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "v1" | "1" | "1.0" => Ok(FlashUpdateVersion::V1),
            "v2" | "2" | "2.0" => Ok(FlashUpdateVersion::V2),
            other => Err(Error::Configuration(format!(
                "Unknown flash update version: {}",
                other
            ))),
        }
    }
}

/// Range of payload blocks owned by one store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PayloadRange {
    /// Index of the first block in the payload section
    pub first_block: u64,
    /// Number of blocks
    pub block_count: u64,
}

impl PayloadRange {
    /// One past the last block
    pub fn end(&self) -> u64 {
        self.first_block + self.block_count
    }
}

/// How store payloads map onto the payload section
pub trait StoreLayout: Send + Sync {
    /// Range owned by `store_index` when one store's payload has `blocks` blocks
    fn payload_range(&self, store_index: u16, blocks: u64) -> PayloadRange;

    /// Number of times the store payload is written to the container
    fn payload_copies(&self, store_count: u16) -> u64;

    /// Total blocks in the payload section
    fn total_blocks(&self, store_count: u16, blocks: u64) -> u64 {
        self.payload_copies(store_count) * blocks
    }
}

/// `V1`: every store points at the same blocks
#[derive(Debug, Clone, Copy, Default)]
pub struct SharedPayload;

impl StoreLayout for SharedPayload {
    fn payload_range(&self, _store_index: u16, blocks: u64) -> PayloadRange {
        PayloadRange {
            first_block: 0,
            block_count: blocks,
        }
    }

    fn payload_copies(&self, _store_count: u16) -> u64 {
        1
    }
}

/// `V2`: store *k* owns blocks `[k*N, (k+1)*N)`
#[derive(Debug, Clone, Copy, Default)]
pub struct PerStorePayload;

impl StoreLayout for PerStorePayload {
    fn payload_range(&self, store_index: u16, blocks: u64) -> PayloadRange {
        PayloadRange {
            first_block: u64::from(store_index) * blocks,
            block_count: blocks,
        }
    }

    fn payload_copies(&self, store_count: u16) -> u64 {
        u64::from(store_count)
    }
}

// ============================================================================
// Partitions and descriptors
// ============================================================================

/// Target range written from consecutive data blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WriteDescriptor {
    /// Absolute first sector on the device
    pub first_sector: u64,
    /// Number of blocks written from here
    pub block_count: u32,
}

impl WriteDescriptor {
    /// First sector past this descriptor, `None` on overflow
    pub fn end_sector(&self, sectors_per_block: u64) -> Option<u64> {
        u64::from(self.block_count)
            .checked_mul(sectors_per_block)
            .and_then(|sectors| self.first_sector.checked_add(sectors))
    }
}

/// A partition as recorded in a store header
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Partition {
    /// Partition name
    pub name: String,
    /// Type or attribute tag
    pub type_tag: String,
    /// Absolute first sector
    pub first_sector: u64,
    /// Size in sectors
    pub sector_count: u64,
    /// Descriptors in on-disk order
    pub descriptors: Vec<WriteDescriptor>,
}

impl Partition {
    /// Blocks carried in the payload for this partition
    pub fn block_count(&self) -> u64 {
        self.descriptors
            .iter()
            .map(|d| u64::from(d.block_count))
            .sum()
    }

    /// Size in bytes
    pub fn byte_size(&self, sector_size: u32) -> u64 {
        self.sector_count * u64::from(sector_size)
    }

    /// Check descriptor placement against the partition bounds
    pub fn validate_layout(&self, sector_size: u32, block_size: u32) -> Result<()> {
        if sector_size == 0 || block_size == 0 || block_size % sector_size != 0 {
            return Err(Error::Layout(format!(
                "block size {} is not a multiple of sector size {}",
                block_size, sector_size
            )));
        }
        let sectors_per_block = u64::from(block_size / sector_size);
        let end = self
            .first_sector
            .checked_add(self.sector_count)
            .filter(|end| end.checked_mul(u64::from(sector_size)).is_some())
            .ok_or_else(|| {
                Error::Layout(format!(
                    "partition '{}' at sector {} with {} sectors lies beyond the addressable range",
                    self.name, self.first_sector, self.sector_count
                ))
            })?;

        let mut sorted: Vec<&WriteDescriptor> = self.descriptors.iter().collect();
        sorted.sort_by_key(|d| d.first_sector);

        let mut previous_end = self.first_sector;
        for descriptor in sorted {
            if descriptor.block_count == 0 {
                return Err(Error::Layout(format!(
                    "partition '{}' has an empty descriptor at sector {}",
                    self.name, descriptor.first_sector
                )));
            }
            if descriptor.first_sector < previous_end {
                return Err(Error::Layout(format!(
                    "partition '{}' descriptor at sector {} overlaps the previous range or starts before the partition",
                    self.name, descriptor.first_sector
                )));
            }
            if (descriptor.first_sector - self.first_sector) % sectors_per_block != 0 {
                return Err(Error::Layout(format!(
                    "partition '{}' descriptor at sector {} is not on a block boundary",
                    self.name, descriptor.first_sector
                )));
            }
            let descriptor_end = match descriptor.end_sector(sectors_per_block) {
                Some(descriptor_end) if descriptor_end <= end => descriptor_end,
                _ => {
                    return Err(Error::Layout(format!(
                        "partition '{}' descriptor at sector {} runs past the partition end {}",
                        self.name, descriptor.first_sector, end
                    )))
                }
            };
            previous_end = descriptor_end;
        }
        Ok(())
    }
}

// ============================================================================
// Security header
// ============================================================================

/// Fixed header at the start of every container
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityHeader {
    /// Catalog digest algorithm
    pub digest_algorithm: DigestAlgorithm,
    /// Data block size in bytes
    pub chunk_size: u32,
    /// Bytes of all store header sections
    pub stores_size: u32,
    /// Bytes of manifest text
    pub manifest_size: u32,
    /// Number of catalog entries
    pub catalog_entry_count: u32,
    /// Bytes of catalog
    pub catalog_size: u32,
    /// Bytes of payload
    pub payload_size: u64,
}

impl SecurityHeader {
    /// Serialize to the fixed wire form
    pub fn to_bytes(&self) -> [u8; SECURITY_HEADER_SIZE] {
        let mut buf = [0u8; SECURITY_HEADER_SIZE];
        buf[0..4].copy_from_slice(&(SECURITY_HEADER_SIZE as u32).to_le_bytes());
        buf[4..16].copy_from_slice(SECURITY_SIGNATURE);
        buf[16..18].copy_from_slice(&FORMAT_MAJOR.to_le_bytes());
        buf[18..20].copy_from_slice(&FORMAT_MINOR.to_le_bytes());
        buf[20..24].copy_from_slice(&self.digest_algorithm.id().to_le_bytes());
        buf[24..28].copy_from_slice(&self.chunk_size.to_le_bytes());
        buf[28..32].copy_from_slice(&self.stores_size.to_le_bytes());
        buf[32..36].copy_from_slice(&self.manifest_size.to_le_bytes());
        buf[36..40].copy_from_slice(&self.catalog_entry_count.to_le_bytes());
        buf[40..44].copy_from_slice(&self.catalog_size.to_le_bytes());
        // 44..48 reserved
        buf[48..56].copy_from_slice(&self.payload_size.to_le_bytes());
        buf
    }

    /// Parse and validate the fixed wire form
    pub fn from_bytes(buf: &[u8; SECURITY_HEADER_SIZE]) -> Result<Self> {
        let mut fields = FieldReader::new(buf);

        let header_size = fields.u32()?;
        if header_size as usize != SECURITY_HEADER_SIZE {
            return Err(Error::malformed(format!(
                "security header size {} (expected {})",
                header_size, SECURITY_HEADER_SIZE
            )));
        }

        if fields.bytes(SECURITY_SIGNATURE.len())? != SECURITY_SIGNATURE {
            return Err(Error::malformed("invalid signature"));
        }

        let major = fields.u16()?;
        let minor = fields.u16()?;
        if major != FORMAT_MAJOR {
            return Err(Error::malformed(format!(
                "unsupported format version {}.{}",
                major, minor
            )));
        }

        let algorithm_id = fields.u32()?;
        let digest_algorithm = DigestAlgorithm::from_id(algorithm_id).ok_or_else(|| {
            Error::malformed(format!("unknown digest algorithm id {:#010x}", algorithm_id))
        })?;

        let chunk_size = fields.u32()?;
        let stores_size = fields.u32()?;
        let manifest_size = fields.u32()?;
        let catalog_entry_count = fields.u32()?;
        let catalog_size = fields.u32()?;
        let _reserved = fields.u32()?;
        let payload_size = fields.u64()?;

        let header = Self {
            digest_algorithm,
            chunk_size,
            stores_size,
            manifest_size,
            catalog_entry_count,
            catalog_size,
            payload_size,
        };
        header.check_consistency()?;
        Ok(header)
    }

    /// Cross-field checks between the declared sizes
    pub fn check_consistency(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_BLOCK_SIZE {
            return Err(Error::malformed(format!(
                "chunk size {} must be between 1 and {}",
                self.chunk_size, MAX_BLOCK_SIZE
            )));
        }
        let expected_catalog =
            u64::from(self.catalog_entry_count) * self.digest_algorithm.byte_length() as u64;
        if u64::from(self.catalog_size) != expected_catalog {
            return Err(Error::malformed(format!(
                "catalog size {} does not match {} entries of {}",
                self.catalog_size, self.catalog_entry_count, self.digest_algorithm
            )));
        }
        let expected_payload = u64::from(self.catalog_entry_count) * u64::from(self.chunk_size);
        if self.payload_size != expected_payload {
            return Err(Error::malformed(format!(
                "payload size {} does not match {} blocks of {} bytes",
                self.payload_size, self.catalog_entry_count, self.chunk_size
            )));
        }
        if (self.stores_size as usize) < STORE_HEADER_FIXED_SIZE {
            return Err(Error::malformed(format!(
                "store section size {} is smaller than one store header",
                self.stores_size
            )));
        }
        Ok(())
    }

    /// Byte offset of the payload section
    pub fn payload_offset(&self) -> u64 {
        SECURITY_HEADER_SIZE as u64
            + u64::from(self.stores_size)
            + u64::from(self.manifest_size)
            + u64::from(self.catalog_size)
    }

    /// Total container length
    pub fn container_size(&self) -> u64 {
        self.payload_offset() + self.payload_size
    }
}

// ============================================================================
// Store header
// ============================================================================

/// Per-platform store header with its partition table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreHeader {
    /// Layout variant
    pub flash_update_version: FlashUpdateVersion,
    /// Position of this store
    pub store_index: u16,
    /// Number of stores in the container
    pub store_count: u16,
    /// Platform IDs served by this store
    pub platform_ids: Vec<String>,
    /// Device sector size
    pub sector_size: u32,
    /// Data block size
    pub block_size: u32,
    /// Blocks of the payload section owned by this store
    pub payload: PayloadRange,
    /// Partitions in order
    pub partitions: Vec<Partition>,
}

impl StoreHeader {
    /// Sectors covered by one block
    pub fn sectors_per_block(&self) -> u64 {
        if self.sector_size == 0 {
            return 0;
        }
        u64::from(self.block_size / self.sector_size)
    }

    /// Total number of descriptors across all partitions
    pub fn descriptor_count(&self) -> usize {
        self.partitions.iter().map(|p| p.descriptors.len()).sum()
    }

    /// Blocks referenced by the descriptors of this store
    pub fn referenced_blocks(&self) -> u64 {
        self.partitions.iter().map(Partition::block_count).sum()
    }

    /// Bytes following the fixed part
    pub fn tables_length(&self) -> usize {
        let partitions: usize = self
            .partitions
            .iter()
            .map(|p| 2 + p.name.len() + 2 + p.type_tag.len() + 8 + 8 + 4)
            .sum();
        partitions + self.descriptor_count() * DESCRIPTOR_ENTRY_SIZE
    }

    /// Encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        STORE_HEADER_FIXED_SIZE + self.tables_length()
    }

    /// Check that the store can be encoded and its partitions are consistent
    pub fn validate(&self) -> Result<()> {
        if self.platform_ids.is_empty() {
            return Err(Error::Layout(format!(
                "store {} has no platform ID",
                self.store_index
            )));
        }
        let joined = self.platform_ids.join(";");
        if joined.len() >= PLATFORM_ID_FIELD_SIZE {
            return Err(Error::Layout(format!(
                "platform IDs of store {} take {} bytes, field holds {}",
                self.store_index,
                joined.len(),
                PLATFORM_ID_FIELD_SIZE - 1
            )));
        }
        for partition in &self.partitions {
            if partition.name.len() > usize::from(u16::MAX)
                || partition.type_tag.len() > usize::from(u16::MAX)
            {
                return Err(Error::Layout(format!(
                    "partition name or type of '{}' is too long",
                    partition.name
                )));
            }
            partition.validate_layout(self.sector_size, self.block_size)?;
        }
        Ok(())
    }

    /// Serialize the store header and its tables
    pub fn encode(&self) -> Result<Vec<u8>> {
        self.validate()?;

        let descriptor_count = u32::try_from(self.descriptor_count())
            .map_err(|_| Error::Layout("too many write descriptors".to_string()))?;
        let partition_count = u32::try_from(self.partitions.len())
            .map_err(|_| Error::Layout("too many partitions".to_string()))?;
        let tables_length = u32::try_from(self.tables_length())
            .map_err(|_| Error::Layout("store tables too large".to_string()))?;

        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&UPDATE_TYPE_FULL_FLASH.to_le_bytes());
        buf.extend_from_slice(&self.flash_update_version.major().to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&self.store_index.to_le_bytes());
        buf.extend_from_slice(&self.store_count.to_le_bytes());

        let mut platform_field = [0u8; PLATFORM_ID_FIELD_SIZE];
        let joined = self.platform_ids.join(";");
        platform_field[..joined.len()].copy_from_slice(joined.as_bytes());
        buf.extend_from_slice(&platform_field);

        buf.extend_from_slice(&self.sector_size.to_le_bytes());
        buf.extend_from_slice(&self.block_size.to_le_bytes());
        buf.extend_from_slice(&partition_count.to_le_bytes());
        buf.extend_from_slice(&descriptor_count.to_le_bytes());
        buf.extend_from_slice(&tables_length.to_le_bytes());
        buf.extend_from_slice(&self.payload.first_block.to_le_bytes());
        buf.extend_from_slice(&self.payload.block_count.to_le_bytes());
        debug_assert_eq!(buf.len(), STORE_HEADER_FIXED_SIZE);

        for partition in &self.partitions {
            buf.extend_from_slice(&(partition.name.len() as u16).to_le_bytes());
            buf.extend_from_slice(partition.name.as_bytes());
            buf.extend_from_slice(&(partition.type_tag.len() as u16).to_le_bytes());
            buf.extend_from_slice(partition.type_tag.as_bytes());
            buf.extend_from_slice(&partition.first_sector.to_le_bytes());
            buf.extend_from_slice(&partition.sector_count.to_le_bytes());
            buf.extend_from_slice(&(partition.descriptors.len() as u32).to_le_bytes());
        }
        for partition in &self.partitions {
            for descriptor in &partition.descriptors {
                buf.extend_from_slice(&descriptor.first_sector.to_le_bytes());
                buf.extend_from_slice(&descriptor.block_count.to_le_bytes());
            }
        }

        Ok(buf)
    }

    /// Parse one store header from the start of `buf`
    ///
    /// Returns the header and the number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < STORE_HEADER_FIXED_SIZE {
            return Err(Error::malformed(format!(
                "store header needs {} bytes, {} left in store section",
                STORE_HEADER_FIXED_SIZE,
                buf.len()
            )));
        }

        let mut fields = FieldReader::new(buf);
        let update_type = fields.u32()?;
        if update_type != UPDATE_TYPE_FULL_FLASH {
            return Err(Error::malformed(format!(
                "unsupported update type {}",
                update_type
            )));
        }
        let major = fields.u16()?;
        let flash_update_version = FlashUpdateVersion::from_major(major).ok_or_else(|| {
            Error::malformed(format!("unknown flash update version {}", major))
        })?;
        let _minor = fields.u16()?;
        let store_index = fields.u16()?;
        let store_count = fields.u16()?;

        let platform_field = fields.bytes(PLATFORM_ID_FIELD_SIZE)?;
        let platform_len = platform_field
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(PLATFORM_ID_FIELD_SIZE);
        let platform_text = std::str::from_utf8(&platform_field[..platform_len])
            .map_err(|_| Error::malformed("platform ID field is not valid text"))?;
        let platform_ids: Vec<String> = platform_text
            .split(';')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let sector_size = fields.u32()?;
        let block_size = fields.u32()?;
        let partition_count = fields.u32()?;
        let descriptor_count = fields.u32()?;
        let tables_length = fields.u32()? as usize;
        let payload = PayloadRange {
            first_block: fields.u64()?,
            block_count: fields.u64()?,
        };

        if !sector_size.is_power_of_two()
            || !(MIN_SECTOR_SIZE..=MAX_SECTOR_SIZE).contains(&sector_size)
            || block_size == 0
            || block_size > MAX_BLOCK_SIZE
            || block_size % sector_size != 0
        {
            return Err(Error::malformed(format!(
                "store {} has block size {} and sector size {}",
                store_index, block_size, sector_size
            )));
        }

        let total = STORE_HEADER_FIXED_SIZE + tables_length;
        if buf.len() < total {
            return Err(Error::malformed(format!(
                "store {} declares {} table bytes, {} left",
                store_index,
                tables_length,
                buf.len() - STORE_HEADER_FIXED_SIZE
            )));
        }

        let mut tables = FieldReader::new(&buf[STORE_HEADER_FIXED_SIZE..total]);
        let mut partitions = Vec::new();
        let mut counts = Vec::new();
        for _ in 0..partition_count {
            let name_len = usize::from(tables.u16()?);
            let name = tables.string(name_len)?;
            let type_len = usize::from(tables.u16()?);
            let type_tag = tables.string(type_len)?;
            let first_sector = tables.u64()?;
            let sector_count = tables.u64()?;
            counts.push(tables.u32()? as usize);
            partitions.push(Partition {
                name,
                type_tag,
                first_sector,
                sector_count,
                descriptors: Vec::new(),
            });
        }

        let declared: u64 = counts.iter().map(|&c| c as u64).sum();
        if declared != u64::from(descriptor_count) {
            return Err(Error::malformed(format!(
                "store {} declares {} descriptors but partitions list {}",
                store_index, descriptor_count, declared
            )));
        }

        let available = (tables.remaining() / DESCRIPTOR_ENTRY_SIZE) as u64;
        if declared > available {
            return Err(Error::malformed(format!(
                "store {} declares {} descriptors, table holds at most {}",
                store_index, declared, available
            )));
        }

        for (partition, count) in partitions.iter_mut().zip(counts) {
            partition.descriptors.reserve(count);
            for _ in 0..count {
                partition.descriptors.push(WriteDescriptor {
                    first_sector: tables.u64()?,
                    block_count: tables.u32()?,
                });
            }
        }

        if tables.remaining() != 0 {
            return Err(Error::malformed(format!(
                "store {} has {} unused table bytes",
                store_index,
                tables.remaining()
            )));
        }

        let header = Self {
            flash_update_version,
            store_index,
            store_count,
            platform_ids,
            sector_size,
            block_size,
            payload,
            partitions,
        };
        for partition in &header.partitions {
            partition
                .validate_layout(sector_size, block_size)
                .map_err(|e| Error::malformed(e.to_string()))?;
        }

        Ok((header, total))
    }
}

// ============================================================================
// Field reader
// ============================================================================

/// Bounds-checked little-endian reader over a byte slice
struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(Error::malformed(format!(
                "field at offset {} needs {} bytes, {} left",
                self.pos,
                len,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn string(&mut self, len: usize) -> Result<String> {
        let bytes = self.bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::malformed("partition table text is not valid UTF-8"))
    }
}
