//! Container assembly
//!
//! The assembler takes a finished plan (manifest, stores, catalog) and
//! streams the container in section order. All header sizes are known
//! before the first byte is written, so the security header goes out first
//! and the payload follows in one ordered pass through a single reusable
//! block buffer.
//!
//! Each block is digested again as it is written and compared with the
//! catalog entry a consumer will check it against.

use crate::catalog::{Catalog, DigestAlgorithm};
use crate::error::{Error, Result};
use crate::events::{EventSink, NullSink, Phase, ProgressReporter};
use crate::format::{Partition, SecurityHeader, StoreHeader, SECURITY_HEADER_SIZE};
use crate::manifest::Manifest;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Where a payload block lands
#[derive(Debug, Clone, Copy)]
pub struct BlockLocation<'a> {
    /// Emission index within one store payload
    pub index: u64,
    /// Partition the block belongs to
    pub partition: &'a Partition,
    /// Absolute first sector of the block
    pub sector: u64,
}

impl BlockLocation<'_> {
    /// Partition-relative block number
    pub fn partition_block(&self, sectors_per_block: u64) -> u64 {
        if sectors_per_block == 0 {
            return 0;
        }
        (self.sector - self.partition.first_sector) / sectors_per_block
    }
}

/// Supplies payload bytes during the write pass
pub trait BlockProvider {
    /// Fill `buf` with the block at `location`
    fn read_block(&mut self, location: &BlockLocation<'_>, buf: &mut [u8]) -> Result<()>;

    /// Error reported when a block no longer matches its catalog entry
    fn mismatch(&self, location: &BlockLocation<'_>, sectors_per_block: u64, _expected: String, _actual: String) -> Error {
        Error::SourceChanged {
            partition: location.partition.name.clone(),
            block: location.partition_block(sectors_per_block),
        }
    }
}

/// Everything needed to write one container
#[derive(Debug, Clone)]
pub struct ContainerPlan {
    /// Manifest text source
    pub manifest: Manifest,
    /// Store headers in order; payload ranges are filled in by the assembler
    pub stores: Vec<StoreHeader>,
    /// Catalog of one store payload
    pub catalog: Catalog,
}

/// Outcome of a successful assembly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyReport {
    /// Final security header
    pub header: SecurityHeader,
    /// Total bytes written
    pub bytes_written: u64,
    /// Blocks in one store payload
    pub store_blocks: u64,
    /// Blocks in the payload section
    pub payload_blocks: u64,
}

/// Streams containers in section order
pub struct ContainerAssembler<'a> {
    sink: &'a dyn EventSink,
    cancel_flag: Arc<AtomicBool>,
}

impl Default for ContainerAssembler<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> ContainerAssembler<'a> {
    /// Create an assembler that reports nothing
    pub fn new() -> Self {
        Self {
            sink: &NullSink,
            cancel_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Report progress to `sink`
    pub fn with_sink(mut self, sink: &'a dyn EventSink) -> Self {
        self.sink = sink;
        self
    }

    /// Share a cancellation flag
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = flag;
        self
    }

    /// Get a handle to cancel the operation
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel_flag)
    }

    /// Fix up store indices and payload ranges, then check every invariant
    ///
    /// Returns the finished stores and the number of blocks in one store
    /// payload.
    pub fn prepare(&self, plan: &ContainerPlan) -> Result<(Vec<StoreHeader>, u64)> {
        let first = plan
            .stores
            .first()
            .ok_or_else(|| Error::Layout("a container needs at least one store".to_string()))?;

        let store_count = u16::try_from(plan.stores.len())
            .map_err(|_| Error::Layout(format!("too many stores: {}", plan.stores.len())))?;

        let version = first.flash_update_version;
        let store_blocks = first.referenced_blocks();
        if store_blocks != plan.catalog.len() as u64 {
            return Err(Error::Layout(format!(
                "descriptors reference {} blocks but the catalog has {} entries",
                store_blocks,
                plan.catalog.len()
            )));
        }

        let layout = version.layout();
        let mut stores = Vec::with_capacity(plan.stores.len());
        for (index, store) in plan.stores.iter().enumerate() {
            if store.flash_update_version != version {
                return Err(Error::Layout(format!(
                    "store {} uses flash update version {}, store 0 uses {}",
                    index, store.flash_update_version, version
                )));
            }
            if store.sector_size != first.sector_size || store.block_size != first.block_size {
                return Err(Error::Layout(format!(
                    "store {} has sector/block size {}/{}, store 0 has {}/{}",
                    index, store.sector_size, store.block_size, first.sector_size, first.block_size
                )));
            }
            if store.partitions != first.partitions {
                return Err(Error::Layout(format!(
                    "store {} does not describe the same partitions as store 0",
                    index
                )));
            }

            let mut store = store.clone();
            store.store_index = index as u16;
            store.store_count = store_count;
            store.payload = layout.payload_range(store.store_index, store_blocks);
            store.validate()?;
            stores.push(store);
        }

        Ok((stores, store_blocks))
    }

    /// Compute the security header for a prepared plan
    fn security_header(
        &self,
        algorithm: DigestAlgorithm,
        block_size: u32,
        stores_size: usize,
        manifest_size: usize,
        payload_blocks: u64,
    ) -> Result<SecurityHeader> {
        let to_u32 = |value: u64, what: &str| {
            u32::try_from(value).map_err(|_| {
                Error::Layout(format!("{} ({}) does not fit the security header", what, value))
            })
        };

        let catalog_entry_count = to_u32(payload_blocks, "catalog entry count")?;
        let header = SecurityHeader {
            digest_algorithm: algorithm,
            chunk_size: block_size,
            stores_size: to_u32(stores_size as u64, "store section size")?,
            manifest_size: to_u32(manifest_size as u64, "manifest size")?,
            catalog_entry_count,
            catalog_size: to_u32(
                payload_blocks * algorithm.byte_length() as u64,
                "catalog size",
            )?,
            payload_size: payload_blocks * u64::from(block_size),
        };
        header.check_consistency().map_err(|e| Error::Layout(e.to_string()))?;
        Ok(header)
    }

    /// Write a container
    pub fn assemble<W, P>(&self, plan: &ContainerPlan, provider: &mut P, out: &mut W) -> Result<AssemblyReport>
    where
        W: Write,
        P: BlockProvider + ?Sized,
    {
        let (stores, store_blocks) = self.prepare(plan)?;
        let first = &stores[0];
        let layout = first.flash_update_version.layout();
        let copies = layout.payload_copies(first.store_count);
        let payload_blocks = layout.total_blocks(first.store_count, store_blocks);
        let block_size = first.block_size;
        let sectors_per_block = first.sectors_per_block();

        // Pass one: every section size is fixed before anything is written
        let mut store_bytes = Vec::new();
        for store in &stores {
            store_bytes.extend_from_slice(&store.encode()?);
        }
        let manifest_bytes = plan.manifest.to_bytes();
        let catalog_bytes = plan.catalog.to_bytes();
        let header = self.security_header(
            plan.catalog.algorithm(),
            block_size,
            store_bytes.len(),
            manifest_bytes.len(),
            payload_blocks,
        )?;

        tracing::debug!(
            "Assembling {} store(s), {} payload block(s) of {} bytes, {} catalog entries",
            stores.len(),
            payload_blocks,
            block_size,
            header.catalog_entry_count
        );

        // Pass two: stream sections in order
        out.write_all(&header.to_bytes())?;
        out.write_all(&store_bytes)?;
        out.write_all(&manifest_bytes)?;
        for _ in 0..copies {
            out.write_all(&catalog_bytes)?;
        }

        let mut reporter = ProgressReporter::start(self.sink, Phase::Writing, payload_blocks);
        let mut buffer = vec![0u8; block_size as usize];

        for _ in 0..copies {
            let mut index = 0u64;
            for partition in &first.partitions {
                for descriptor in &partition.descriptors {
                    for k in 0..u64::from(descriptor.block_count) {
                        if self.cancel_flag.load(Ordering::SeqCst) {
                            return Err(Error::Cancelled);
                        }

                        let location = BlockLocation {
                            index,
                            partition,
                            sector: descriptor.first_sector + k * sectors_per_block,
                        };
                        provider.read_block(&location, &mut buffer)?;

                        let actual = plan.catalog.algorithm().digest(&buffer);
                        let expected = plan
                            .catalog
                            .get(index)
                            .map(|e| &e.digest)
                            .ok_or_else(|| Error::Layout(format!("block {} has no catalog entry", index)))?;
                        if &actual != expected {
                            return Err(provider.mismatch(
                                &location,
                                sectors_per_block,
                                expected.to_hex(),
                                actual.to_hex(),
                            ));
                        }

                        out.write_all(&buffer)?;
                        reporter.advance(u64::from(block_size));
                        index += 1;
                    }
                }
            }
        }

        out.flush()?;

        let bytes_written = SECURITY_HEADER_SIZE as u64
            + store_bytes.len() as u64
            + manifest_bytes.len() as u64
            + header.catalog_size as u64
            + header.payload_size;
        debug_assert_eq!(bytes_written, header.container_size());

        tracing::debug!(
            "Assembled {} bytes in {:.1}s",
            bytes_written,
            reporter.elapsed().as_secs_f64()
        );

        Ok(AssemblyReport {
            header,
            bytes_written,
            store_blocks,
            payload_blocks,
        })
    }
}
