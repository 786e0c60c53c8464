//! Container reader
//!
//! Parses the header sections of a container and gives lazy, index-keyed
//! access to its data blocks. Opening a container checks every declared
//! size against the stream length and every cross-field relationship the
//! format defines; blocks themselves are only read on demand.

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::events::{EventSink, NullSink, Phase, ProgressReporter};
use crate::format::{
    FlashUpdateVersion, Partition, SecurityHeader, StoreHeader, SECURITY_HEADER_SIZE,
};
use crate::manifest::Manifest;
use serde::Serialize;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Parsed header sections of a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// Security header
    pub header: SecurityHeader,
    /// Store headers in order
    pub stores: Vec<StoreHeader>,
    /// Manifest
    pub manifest: Manifest,
    /// Full catalog (one entry per payload block)
    pub catalog: Catalog,
}

impl Metadata {
    /// Flash update version shared by all stores
    pub fn flash_update_version(&self) -> FlashUpdateVersion {
        self.stores[0].flash_update_version
    }

    /// Look up a store by index
    pub fn store(&self, index: u16) -> Result<&StoreHeader> {
        self.stores.get(usize::from(index)).ok_or_else(|| {
            Error::Configuration(format!(
                "store {} does not exist ({} store(s))",
                index,
                self.stores.len()
            ))
        })
    }
}

/// One data block read from a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBlock {
    /// Index in the payload section
    pub index: u64,
    /// Block bytes
    pub data: Vec<u8>,
}

/// Outcome of [`ContainerReader::verify`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    /// Blocks checked
    pub blocks_verified: u64,
    /// Bytes checked
    pub bytes_verified: u64,
}

/// Reads containers from any seekable stream
pub struct ContainerReader<R> {
    reader: R,
    metadata: Metadata,
    stream_len: u64,
}

impl<R: Read + Seek> ContainerReader<R> {
    /// Parse and validate the header sections
    pub fn open(mut reader: R) -> Result<Self> {
        let start = reader.stream_position()?;
        let end = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(start))?;
        let stream_len = end.saturating_sub(start);

        let mut remaining = stream_len;
        let bytes = take_section(
            &mut reader,
            "security header",
            SECURITY_HEADER_SIZE as u64,
            &mut remaining,
        )?;
        let mut header_bytes = [0u8; SECURITY_HEADER_SIZE];
        header_bytes.copy_from_slice(&bytes);
        let header = SecurityHeader::from_bytes(&header_bytes)?;

        let store_bytes = take_section(
            &mut reader,
            "store headers",
            u64::from(header.stores_size),
            &mut remaining,
        )?;
        let stores = parse_stores(&store_bytes, &header)?;

        let manifest_bytes = take_section(
            &mut reader,
            "manifest",
            u64::from(header.manifest_size),
            &mut remaining,
        )?;
        let manifest_text = String::from_utf8(manifest_bytes)
            .map_err(|_| Error::malformed("manifest is not valid UTF-8"))?;
        let manifest = Manifest::parse(&manifest_text).map_err(|e| match e {
            Error::MalformedContainer(_) => e,
            other => Error::malformed(format!("invalid manifest: {}", other)),
        })?;

        let catalog_bytes = take_section(
            &mut reader,
            "catalog",
            u64::from(header.catalog_size),
            &mut remaining,
        )?;
        let catalog = Catalog::from_bytes(header.digest_algorithm, &catalog_bytes)?;

        if header.payload_size > remaining {
            return Err(Error::TruncatedContainer {
                section: "payload",
                declared: header.payload_size,
                remaining,
            });
        }

        tracing::debug!(
            "Opened container: {} store(s), {} catalog entries, {} payload bytes",
            stores.len(),
            catalog.len(),
            header.payload_size
        );

        Ok(Self {
            reader,
            metadata: Metadata {
                header,
                stores,
                manifest,
                catalog,
            },
            stream_len,
        })
    }

    /// Parsed header sections
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Catalog of every payload block
    pub fn catalog(&self) -> &Catalog {
        &self.metadata.catalog
    }

    /// Number of blocks in the payload section
    pub fn block_count(&self) -> u64 {
        u64::from(self.metadata.header.catalog_entry_count)
    }

    /// Length of the container stream
    pub fn stream_len(&self) -> u64 {
        self.stream_len
    }

    /// Read payload block `index` into `buf`
    pub fn read_block_into(&mut self, index: u64, buf: &mut [u8]) -> Result<()> {
        let chunk_size = u64::from(self.metadata.header.chunk_size);
        if index >= self.block_count() {
            return Err(Error::Configuration(format!(
                "block {} is out of range ({} blocks)",
                index,
                self.block_count()
            )));
        }
        if buf.len() as u64 != chunk_size {
            return Err(Error::Configuration(format!(
                "block buffer is {} bytes, chunk size is {}",
                buf.len(),
                chunk_size
            )));
        }

        let offset = self.metadata.header.payload_offset() + index * chunk_size;
        self.reader.seek(SeekFrom::Start(offset))?;
        self.reader.read_exact(buf)?;
        Ok(())
    }

    /// Read payload block `index`
    pub fn read_block(&mut self, index: u64) -> Result<DataBlock> {
        let mut data = vec![0u8; self.metadata.header.chunk_size as usize];
        self.read_block_into(index, &mut data)?;
        Ok(DataBlock { index, data })
    }

    /// Iterate over all payload blocks in order
    pub fn blocks(&mut self) -> Blocks<'_, R> {
        Blocks {
            total: self.block_count(),
            reader: self,
            next: 0,
        }
    }

    /// Check every block against the catalog
    ///
    /// Stops at the first mismatch.
    pub fn verify(&mut self, sink: &dyn EventSink, cancel: Option<&AtomicBool>) -> Result<VerifyReport> {
        let total = self.block_count();
        let chunk_size = self.metadata.header.chunk_size as usize;
        let mut reporter = ProgressReporter::start(sink, Phase::Verifying, total);
        let mut buffer = vec![0u8; chunk_size];

        for index in 0..total {
            if cancel.is_some_and(|c| c.load(Ordering::SeqCst)) {
                return Err(Error::Cancelled);
            }
            self.read_block_into(index, &mut buffer)?;
            self.metadata.catalog.verify_block(index, &buffer)?;
            reporter.advance(chunk_size as u64);
        }

        tracing::debug!("Verified {} block(s)", total);
        Ok(VerifyReport {
            blocks_verified: total,
            bytes_verified: total * chunk_size as u64,
        })
    }

    /// Write the byte-exact image of one partition
    ///
    /// Ranges with no descriptor (blank runs that were left out) are
    /// written as zeros. Every block is checked against the catalog.
    pub fn extract_partition<W: Write>(
        &mut self,
        store_index: u16,
        name: &str,
        out: &mut W,
        cancel: Option<&AtomicBool>,
    ) -> Result<u64> {
        let store = self.metadata.store(store_index)?.clone();
        let position = store
            .partitions
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "partition '{}' not found in store {}",
                    name, store_index
                ))
            })?;
        let partition = &store.partitions[position];

        let sector_size = u64::from(store.sector_size);
        let block_size = u64::from(store.block_size);
        let sectors_per_block = store.sectors_per_block();
        let first_index = store.payload.first_block
            + store.partitions[..position]
                .iter()
                .map(Partition::block_count)
                .sum::<u64>();

        let descriptors = &partition.descriptors;
        let mut indices: Vec<u64> = Vec::with_capacity(descriptors.len());
        let mut next = first_index;
        for d in descriptors {
            indices.push(next);
            next += u64::from(d.block_count);
        }
        let mut order: Vec<usize> = (0..descriptors.len()).collect();
        order.sort_by_key(|&i| descriptors[i].first_sector);

        let zeros = vec![0u8; block_size as usize];
        let mut buffer = vec![0u8; block_size as usize];
        let mut cursor = partition.first_sector;
        let mut written = 0u64;

        for i in order {
            let descriptor = descriptors[i];
            write_zeros(out, &zeros, (descriptor.first_sector - cursor) * sector_size)?;
            written += (descriptor.first_sector - cursor) * sector_size;

            for k in 0..u64::from(descriptor.block_count) {
                if cancel.is_some_and(|c| c.load(Ordering::SeqCst)) {
                    return Err(Error::Cancelled);
                }
                let index = indices[i] + k;
                self.read_block_into(index, &mut buffer)?;
                self.metadata.catalog.verify_block(index, &buffer)?;
                out.write_all(&buffer)?;
                written += block_size;
            }
            cursor = descriptor.end_sector(sectors_per_block).ok_or_else(|| {
                Error::malformed(format!(
                    "descriptor at sector {} of '{}' overflows",
                    descriptor.first_sector, name
                ))
            })?;
        }

        let end = partition.first_sector + partition.sector_count;
        write_zeros(out, &zeros, (end - cursor) * sector_size)?;
        written += (end - cursor) * sector_size;
        out.flush()?;

        tracing::debug!("Extracted {} bytes of '{}'", written, name);
        Ok(written)
    }

    /// Serializable overview of the container
    pub fn summary(&self) -> ContainerSummary {
        ContainerSummary::from_metadata(&self.metadata, self.stream_len)
    }

    /// Verify without progress reporting
    pub fn verify_quiet(&mut self) -> Result<VerifyReport> {
        self.verify(&NullSink, None)
    }

    /// Give back the underlying reader
    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl ContainerReader<std::io::BufReader<std::fs::File>> {
    /// Open a container file
    pub fn open_path(path: &std::path::Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::Precondition(format!("container not found: {}", path.display()))
            } else {
                Error::Io(e)
            }
        })?;
        Self::open(std::io::BufReader::new(file))
    }
}

/// Lazy iterator over payload blocks
pub struct Blocks<'a, R> {
    reader: &'a mut ContainerReader<R>,
    next: u64,
    total: u64,
}

impl<R: Read + Seek> Iterator for Blocks<'_, R> {
    type Item = Result<DataBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.total {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(self.reader.read_block(index))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.total - self.next) as usize;
        (left, Some(left))
    }
}

fn write_zeros<W: Write>(out: &mut W, zeros: &[u8], mut len: u64) -> Result<()> {
    while len > 0 {
        let n = len.min(zeros.len() as u64) as usize;
        out.write_all(&zeros[..n])?;
        len -= n as u64;
    }
    Ok(())
}

/// Read a declared section, failing if it runs past the stream end
fn take_section<R: Read>(
    reader: &mut R,
    section: &'static str,
    declared: u64,
    remaining: &mut u64,
) -> Result<Vec<u8>> {
    if declared > *remaining {
        return Err(Error::TruncatedContainer {
            section,
            declared,
            remaining: *remaining,
        });
    }
    let mut buf = vec![0u8; declared as usize];
    reader.read_exact(&mut buf)?;
    *remaining -= declared;
    Ok(buf)
}

/// Decode the store section and check it against the security header
fn parse_stores(bytes: &[u8], header: &SecurityHeader) -> Result<Vec<StoreHeader>> {
    let mut stores = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let (store, consumed) = StoreHeader::decode(&bytes[offset..])?;
        offset += consumed;
        stores.push(store);
    }

    let first = stores
        .first()
        .ok_or_else(|| Error::malformed("container has no store headers"))?;
    let version = first.flash_update_version;
    let store_count = stores.len();
    let store_blocks = first.referenced_blocks();
    let layout = version.layout();

    for (i, store) in stores.iter().enumerate() {
        if usize::from(store.store_index) != i {
            return Err(Error::malformed(format!(
                "store {} has index {}",
                i, store.store_index
            )));
        }
        if usize::from(store.store_count) != store_count {
            return Err(Error::malformed(format!(
                "store {} declares {} stores, container has {}",
                i, store.store_count, store_count
            )));
        }
        if store.flash_update_version != version {
            return Err(Error::malformed(format!(
                "store {} uses flash update version {}, store 0 uses {}",
                i, store.flash_update_version, version
            )));
        }
        if store.block_size != header.chunk_size {
            return Err(Error::malformed(format!(
                "store {} block size {} does not match chunk size {}",
                i, store.block_size, header.chunk_size
            )));
        }
        if store.sector_size != first.sector_size {
            return Err(Error::malformed(format!(
                "store {} sector size {} differs from store 0 ({})",
                i, store.sector_size, first.sector_size
            )));
        }
        if store.referenced_blocks() != store.payload.block_count {
            return Err(Error::malformed(format!(
                "store {} descriptors reference {} blocks, payload range holds {}",
                i,
                store.referenced_blocks(),
                store.payload.block_count
            )));
        }
        if store.payload != layout.payload_range(store.store_index, store_blocks) {
            return Err(Error::malformed(format!(
                "store {} payload range {}..{} does not fit a {} layout",
                i,
                store.payload.first_block,
                store.payload.end(),
                version
            )));
        }
    }

    let expected_blocks = layout.total_blocks(store_count as u16, store_blocks);
    if expected_blocks != u64::from(header.catalog_entry_count) {
        return Err(Error::malformed(format!(
            "stores reference {} payload blocks, catalog has {} entries",
            expected_blocks, header.catalog_entry_count
        )));
    }

    Ok(stores)
}

// ============================================================================
// Summary
// ============================================================================

/// Serializable overview used by `inspect`
#[derive(Debug, Clone, Serialize)]
pub struct ContainerSummary {
    /// Container length in bytes
    pub container_size: u64,
    /// Digest algorithm name
    pub digest_algorithm: String,
    /// Block size
    pub chunk_size: u32,
    /// Flash update version
    pub flash_update_version: FlashUpdateVersion,
    /// Catalog entries
    pub catalog_entries: u32,
    /// Payload bytes
    pub payload_size: u64,
    /// Manifest content
    pub manifest: Manifest,
    /// Per-store details
    pub stores: Vec<StoreSummary>,
}

/// Serializable store overview
#[derive(Debug, Clone, Serialize)]
pub struct StoreSummary {
    /// Store index
    pub index: u16,
    /// Platform IDs
    pub platform_ids: Vec<String>,
    /// Sector size
    pub sector_size: u32,
    /// Block size
    pub block_size: u32,
    /// First payload block
    pub payload_first_block: u64,
    /// Payload blocks
    pub payload_block_count: u64,
    /// Partitions
    pub partitions: Vec<PartitionSummary>,
}

/// Serializable partition overview
#[derive(Debug, Clone, Serialize)]
pub struct PartitionSummary {
    /// Name
    pub name: String,
    /// Type tag
    pub type_tag: String,
    /// First sector
    pub first_sector: u64,
    /// Size in bytes
    pub size: u64,
    /// Number of descriptors
    pub descriptors: usize,
    /// Blocks stored
    pub blocks: u64,
}

impl ContainerSummary {
    /// Build a summary from parsed metadata
    pub fn from_metadata(metadata: &Metadata, container_size: u64) -> Self {
        let header = &metadata.header;
        Self {
            container_size,
            digest_algorithm: header.digest_algorithm.name().to_string(),
            chunk_size: header.chunk_size,
            flash_update_version: metadata.flash_update_version(),
            catalog_entries: header.catalog_entry_count,
            payload_size: header.payload_size,
            manifest: metadata.manifest.clone(),
            stores: metadata
                .stores
                .iter()
                .map(|store| StoreSummary {
                    index: store.store_index,
                    platform_ids: store.platform_ids.clone(),
                    sector_size: store.sector_size,
                    block_size: store.block_size,
                    payload_first_block: store.payload.first_block,
                    payload_block_count: store.payload.block_count,
                    partitions: store
                        .partitions
                        .iter()
                        .map(|p| PartitionSummary {
                            name: p.name.clone(),
                            type_tag: p.type_tag.clone(),
                            first_sector: p.first_sector,
                            size: p.byte_size(store.sector_size),
                            descriptors: p.descriptors.len(),
                            blocks: p.block_count(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    /// Pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Io(e.into()))
    }
}

/// Open and verify a container file in one call
pub fn verify_file(path: &std::path::Path, sink: &dyn EventSink, cancel: Option<Arc<AtomicBool>>) -> Result<VerifyReport> {
    let mut reader = ContainerReader::open_path(path)?;
    reader.verify(sink, cancel.as_deref())
}

/// Open a container file and summarize it
pub fn inspect_file(path: &std::path::Path) -> Result<ContainerSummary> {
    Ok(ContainerReader::open_path(path)?.summary())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::{BlockLocation, BlockProvider, ContainerAssembler, ContainerPlan};
    use crate::catalog::{CatalogBuilder, DigestAlgorithm};
    use crate::format::{PayloadRange, WriteDescriptor};
    use crate::manifest::ManifestBuilder;
    use std::io::Cursor;

    const BS: usize = 4096;

    struct SectorPattern;

    impl BlockProvider for SectorPattern {
        fn read_block(&mut self, location: &BlockLocation<'_>, buf: &mut [u8]) -> Result<()> {
            buf.fill((location.sector % 251) as u8 + 1);
            Ok(())
        }
    }

    fn block_for(sector: u64) -> Vec<u8> {
        vec![(sector % 251) as u8 + 1; BS]
    }

    /// Two partitions: "boot" fully stored, "data" with a gap of two blocks
    fn container(version: FlashUpdateVersion, platforms: &[&str]) -> Vec<u8> {
        let boot = Partition {
            name: "boot".to_string(),
            type_tag: "efi".to_string(),
            first_sector: 8,
            sector_count: 8,
            descriptors: vec![WriteDescriptor {
                first_sector: 8,
                block_count: 1,
            }],
        };
        let data = Partition {
            name: "data".to_string(),
            type_tag: "basic".to_string(),
            first_sector: 16,
            sector_count: 40,
            descriptors: vec![
                WriteDescriptor {
                    first_sector: 16,
                    block_count: 1,
                },
                WriteDescriptor {
                    first_sector: 40,
                    block_count: 2,
                },
            ],
        };

        let mut builder = CatalogBuilder::new(DigestAlgorithm::Sha256, 4);
        for sector in [8u64, 16, 40, 48] {
            builder.add(&block_for(sector)).unwrap();
        }

        let plan = ContainerPlan {
            manifest: ManifestBuilder::new("1.1", "10.0.1")
                .excluded_partitions(["DPP"])
                .build()
                .unwrap(),
            stores: platforms
                .iter()
                .map(|id| StoreHeader {
                    flash_update_version: version,
                    store_index: 0,
                    store_count: 0,
                    platform_ids: vec![id.to_string()],
                    sector_size: 512,
                    block_size: BS as u32,
                    payload: PayloadRange::default(),
                    partitions: vec![boot.clone(), data.clone()],
                })
                .collect(),
            catalog: builder.finish().unwrap(),
        };

        let mut out = Vec::new();
        ContainerAssembler::new()
            .assemble(&plan, &mut SectorPattern, &mut out)
            .unwrap();
        out
    }

    #[test]
    fn test_open_reproduces_metadata() {
        let bytes = container(FlashUpdateVersion::V1, &["A", "B"]);
        let reader = ContainerReader::open(Cursor::new(bytes.clone())).unwrap();
        let metadata = reader.metadata();

        assert_eq!(metadata.stores.len(), 2);
        assert_eq!(metadata.stores[1].platform_ids, vec!["B"]);
        assert_eq!(metadata.stores[1].payload, PayloadRange { first_block: 0, block_count: 4 });
        assert_eq!(metadata.manifest.os_version, "10.0.1");
        assert!(metadata.manifest.is_excluded("DPP"));
        assert_eq!(reader.block_count(), 4);
        assert_eq!(reader.stream_len(), bytes.len() as u64);
    }

    #[test]
    fn test_read_block_and_iterate() {
        let bytes = container(FlashUpdateVersion::V1, &["A"]);
        let mut reader = ContainerReader::open(Cursor::new(bytes)).unwrap();

        assert_eq!(reader.read_block(2).unwrap().data, block_for(40));
        assert!(reader.read_block(4).is_err());

        let blocks: Vec<DataBlock> = reader.blocks().collect::<Result<_>>().unwrap();
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[3].index, 3);
        assert_eq!(blocks[3].data, block_for(48));
    }

    #[test]
    fn test_verify_detects_flipped_byte() {
        let mut bytes = container(FlashUpdateVersion::V1, &["A"]);
        let mut reader = ContainerReader::open(Cursor::new(bytes.clone())).unwrap();
        assert_eq!(reader.verify_quiet().unwrap().blocks_verified, 4);

        let offset = reader.metadata().header.payload_offset() as usize + BS + 17;
        bytes[offset] ^= 0x01;
        let mut reader = ContainerReader::open(Cursor::new(bytes)).unwrap();
        assert!(matches!(
            reader.verify_quiet(),
            Err(Error::DigestMismatch { index: 1, .. })
        ));
    }

    #[test]
    fn test_verify_cancelled() {
        let bytes = container(FlashUpdateVersion::V1, &["A"]);
        let mut reader = ContainerReader::open(Cursor::new(bytes)).unwrap();
        let cancel = AtomicBool::new(true);
        assert!(matches!(
            reader.verify(&NullSink, Some(&cancel)),
            Err(Error::Cancelled)
        ));
    }

    #[test]
    fn test_extract_fills_gaps_with_zeros() {
        let bytes = container(FlashUpdateVersion::V1, &["A"]);
        let mut reader = ContainerReader::open(Cursor::new(bytes)).unwrap();

        let mut out = Vec::new();
        let written = reader.extract_partition(0, "data", &mut out, None).unwrap();
        assert_eq!(written, 40 * 512);
        assert_eq!(out.len(), 40 * 512);
        assert_eq!(&out[..BS], &block_for(16)[..]);
        assert!(out[BS..3 * BS].iter().all(|&b| b == 0));
        assert_eq!(&out[3 * BS..4 * BS], &block_for(40)[..]);
        assert_eq!(&out[4 * BS..], &block_for(48)[..]);

        assert!(reader.extract_partition(0, "missing", &mut Vec::new(), None).is_err());
        assert!(reader.extract_partition(3, "data", &mut Vec::new(), None).is_err());
    }

    #[test]
    fn test_v2_stores_own_separate_ranges() {
        let bytes = container(FlashUpdateVersion::V2, &["A", "B"]);
        let mut reader = ContainerReader::open(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.block_count(), 8);
        assert_eq!(
            reader.metadata().stores[1].payload,
            PayloadRange { first_block: 4, block_count: 4 }
        );
        reader.verify_quiet().unwrap();

        let mut first = Vec::new();
        let mut second = Vec::new();
        reader.extract_partition(0, "boot", &mut first, None).unwrap();
        reader.extract_partition(1, "boot", &mut second, None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_truncated_payload() {
        let bytes = container(FlashUpdateVersion::V1, &["A"]);
        let short = bytes[..bytes.len() - 1].to_vec();
        assert!(matches!(
            ContainerReader::open(Cursor::new(short)),
            Err(Error::TruncatedContainer { section: "payload", .. })
        ));
    }

    #[test]
    fn test_truncated_header_sections() {
        let bytes = container(FlashUpdateVersion::V1, &["A"]);
        assert!(matches!(
            ContainerReader::open(Cursor::new(bytes[..40].to_vec())),
            Err(Error::TruncatedContainer { section: "security header", .. })
        ));
        assert!(matches!(
            ContainerReader::open(Cursor::new(bytes[..100].to_vec())),
            Err(Error::TruncatedContainer { section: "store headers", .. })
        ));
    }

    #[test]
    fn test_bad_signature_is_malformed() {
        let mut bytes = container(FlashUpdateVersion::V1, &["A"]);
        bytes[5] = b'x';
        assert!(matches!(
            ContainerReader::open(Cursor::new(bytes)),
            Err(Error::MalformedContainer(_))
        ));
    }

    #[test]
    fn test_bad_store_index_is_malformed() {
        let mut bytes = container(FlashUpdateVersion::V1, &["A", "B"]);
        let store_len = reader_store_len(&bytes) as usize;
        // second store's index field
        let at = SECURITY_HEADER_SIZE + store_len + 8;
        bytes[at..at + 2].copy_from_slice(&7u16.to_le_bytes());
        assert!(matches!(
            ContainerReader::open(Cursor::new(bytes)),
            Err(Error::MalformedContainer(_))
        ));
    }

    fn reader_store_len(bytes: &[u8]) -> u64 {
        let reader = ContainerReader::open(Cursor::new(bytes.to_vec())).unwrap();
        reader.metadata().stores[0].encoded_len() as u64
    }

    #[test]
    fn test_summary_serializes() {
        let bytes = container(FlashUpdateVersion::V1, &["A"]);
        let reader = ContainerReader::open(Cursor::new(bytes)).unwrap();
        let summary = reader.summary();
        assert_eq!(summary.stores[0].partitions[1].blocks, 3);
        assert_eq!(summary.stores[0].partitions[1].size, 40 * 512);

        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("\"digest_algorithm\":\"SHA-256\""));
        assert!(json.contains("\"name\":\"data\""));
    }

    #[test]
    fn test_open_path_missing_file() {
        let result = ContainerReader::open_path(std::path::Path::new("/nonexistent/x.fpk"));
        assert!(matches!(result, Err(Error::Precondition(_))));
    }
}
