//! Porting: rebuild a container from one or two existing containers
//!
//! The payload source supplies partitions, catalog and block data (always
//! from its first store). An optional metadata source supplies the manifest
//! and store headers. Without a metadata source the payload source is simply
//! re-serialized.
//!
//! Porting never overwrites: the destination must not exist when the
//! operation starts, and the finished file is published without clobbering
//! anything that appeared in the meantime.

use crate::assembler::{AssemblyReport, BlockLocation, BlockProvider, ContainerAssembler, ContainerPlan};
use crate::catalog::{Catalog, CatalogBuilder};
use crate::error::{Error, Result};
use crate::events::{BuildEvent, EventSink, NullSink};
use crate::format::{PayloadRange, StoreHeader};
use crate::output::{OutputFile, Publish};
use crate::reader::{ContainerReader, Metadata};
use std::io::{BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Inputs of a port operation
#[derive(Debug, Clone)]
pub struct PortRequest {
    /// Container providing partitions and payload
    pub payload_source: PathBuf,
    /// Container providing manifest and store headers
    pub metadata_source: Option<PathBuf>,
    /// Where to write the new container
    pub destination: PathBuf,
}

impl PortRequest {
    /// Re-serialize `source` into `destination`
    pub fn new(payload_source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            payload_source: payload_source.into(),
            metadata_source: None,
            destination: destination.into(),
        }
    }

    /// Take manifest and store headers from another container
    pub fn metadata_from(mut self, path: impl Into<PathBuf>) -> Self {
        self.metadata_source = Some(path.into());
        self
    }

    /// Check that sources exist and the destination does not
    ///
    /// Runs before any file is opened for writing.
    pub fn check_preconditions(&self) -> Result<()> {
        require_file(&self.payload_source, "payload source")?;
        if let Some(metadata) = &self.metadata_source {
            require_file(metadata, "metadata source")?;
        }

        if self.destination.exists() {
            return Err(Error::Precondition(format!(
                "destination already exists: {}",
                self.destination.display()
            )));
        }

        if self.destination == self.payload_source
            || self.metadata_source.as_ref() == Some(&self.destination)
        {
            return Err(Error::Precondition(
                "destination must differ from the source containers".to_string(),
            ));
        }

        Ok(())
    }

    /// Whether a distinct metadata source is involved
    fn is_merge(&self) -> bool {
        match &self.metadata_source {
            None => false,
            Some(metadata) => !same_file(metadata, &self.payload_source),
        }
    }
}

fn require_file(path: &Path, what: &str) -> Result<()> {
    if !path.is_file() {
        return Err(Error::Precondition(format!(
            "{} not found: {}",
            what,
            path.display()
        )));
    }
    Ok(())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Result of a completed port
#[derive(Debug, Clone)]
pub struct PortReport {
    /// Where the container was published
    pub path: PathBuf,
    /// Container size in bytes
    pub bytes_written: u64,
    /// Blocks in one store payload
    pub store_blocks: u64,
    /// Stores in the new container
    pub store_count: usize,
    /// Whether a separate metadata source was used
    pub merged: bool,
    /// Total time taken
    pub elapsed: Duration,
}

/// Rebuilds containers
pub struct Porter<'a> {
    sink: &'a dyn EventSink,
    cancel_flag: Arc<AtomicBool>,
}

impl Default for Porter<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Porter<'a> {
    /// Create a porter
    pub fn new() -> Self {
        Self {
            sink: &NullSink,
            cancel_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Report events to `sink`
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

    /// Run a port operation end to end
    pub fn port(&self, request: &PortRequest) -> Result<PortReport> {
        request.check_preconditions()?;

        let start_time = Instant::now();
        if self.cancel_flag.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }

        let mut payload = ContainerReader::open_path(&request.payload_source)?;
        let merged = request.is_merge();
        let plan = if merged {
            let metadata_path = request
                .metadata_source
                .as_deref()
                .ok_or_else(|| Error::Configuration("metadata source missing".to_string()))?;
            let metadata = ContainerReader::open_path(metadata_path)?;
            merge_plan(payload.metadata(), metadata.metadata())?
        } else {
            copy_plan(payload.metadata())?
        };

        tracing::info!(
            "Porting {} -> {}{}",
            request.payload_source.display(),
            request.destination.display(),
            if merged { " (metadata merged)" } else { "" }
        );

        let mut output = OutputFile::create(&request.destination)?;
        let assembly = {
            let mut writer = BufWriter::new(output.file_mut());
            let assembly = self.write(&mut payload, &plan, &mut writer)?;
            writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
            assembly
        };
        let path = output.publish(Publish::NoClobber)?;

        let elapsed = start_time.elapsed();
        self.sink.emit(&BuildEvent::Finished {
            path: path.clone(),
            bytes: assembly.bytes_written,
            catalog_entries: u64::from(assembly.header.catalog_entry_count),
            elapsed,
        });

        Ok(PortReport {
            path,
            bytes_written: assembly.bytes_written,
            store_blocks: assembly.store_blocks,
            store_count: plan.stores.len(),
            merged,
            elapsed,
        })
    }

    /// Stream a ported container, reading blocks from `payload`
    pub fn write<R, W>(
        &self,
        payload: &mut ContainerReader<R>,
        plan: &ContainerPlan,
        out: &mut W,
    ) -> Result<AssemblyReport>
    where
        R: Read + Seek,
        W: Write,
    {
        let first_block = payload.metadata().store(0)?.payload.first_block;
        let mut provider = ContainerBlocks {
            reader: payload,
            first_block,
        };
        ContainerAssembler::new()
            .with_sink(self.sink)
            .with_cancel_flag(Arc::clone(&self.cancel_flag))
            .assemble(plan, &mut provider, out)
    }
}

/// Plan that re-serializes a container as-is
pub fn copy_plan(source: &Metadata) -> Result<ContainerPlan> {
    let store = source.store(0)?;
    Ok(ContainerPlan {
        manifest: source.manifest.clone(),
        stores: source.stores.iter().map(reset_payload).collect(),
        catalog: store_catalog(&source.catalog, store)?,
    })
}

/// Plan combining metadata from one container with payload from another
pub fn merge_plan(payload: &Metadata, metadata: &Metadata) -> Result<ContainerPlan> {
    let payload_store = payload.store(0)?;

    let stores = metadata
        .stores
        .iter()
        .map(|store| {
            if store.block_size != payload_store.block_size
                || store.sector_size != payload_store.sector_size
            {
                return Err(Error::Layout(format!(
                    "metadata store {} uses block/sector size {}/{}, payload uses {}/{}",
                    store.store_index,
                    store.block_size,
                    store.sector_size,
                    payload_store.block_size,
                    payload_store.sector_size
                )));
            }
            let mut store = reset_payload(store);
            store.partitions = payload_store.partitions.clone();
            Ok(store)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ContainerPlan {
        manifest: metadata.manifest.clone(),
        stores,
        catalog: store_catalog(&payload.catalog, payload_store)?,
    })
}

fn reset_payload(store: &StoreHeader) -> StoreHeader {
    StoreHeader {
        payload: PayloadRange::default(),
        ..store.clone()
    }
}

/// Catalog entries covering one store's payload range
fn store_catalog(catalog: &Catalog, store: &StoreHeader) -> Result<Catalog> {
    let mut builder = CatalogBuilder::new(catalog.algorithm(), 1);
    for index in store.payload.first_block..store.payload.end() {
        let entry = catalog
            .get(index)
            .ok_or_else(|| Error::malformed(format!("catalog has no entry for block {}", index)))?;
        builder.add_digest(entry.digest.clone())?;
    }
    builder.finish()
}

/// Serves blocks of one store straight from a source container
struct ContainerBlocks<'r, R> {
    reader: &'r mut ContainerReader<R>,
    first_block: u64,
}

impl<R: Read + Seek> BlockProvider for ContainerBlocks<'_, R> {
    fn read_block(&mut self, location: &BlockLocation<'_>, buf: &mut [u8]) -> Result<()> {
        self.reader.read_block_into(self.first_block + location.index, buf)
    }

    fn mismatch(&self, location: &BlockLocation<'_>, _sectors_per_block: u64, expected: String, actual: String) -> Error {
        Error::DigestMismatch {
            index: self.first_block + location.index,
            expected,
            actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenerateConfig;
    use crate::disk::{RawImage, SourcePartition};
    use crate::format::FlashUpdateVersion;
    use crate::manifest::ManifestBuilder;
    use crate::pipeline::Generator;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn build(dir: &Path, name: &str, fill: u8, version: FlashUpdateVersion, ids: &[&str]) -> PathBuf {
        let mut data = vec![0u8; 8 * 4096];
        data[..4096].fill(fill);
        data[3 * 4096..4 * 4096].fill(fill.wrapping_add(1));
        let mut source = RawImage::new(
            Cursor::new(data),
            vec![
                SourcePartition::new("boot", "basic", 0, 2 * 4096),
                SourcePartition::new("data", "basic", 2 * 4096, 6 * 4096),
            ],
        )
        .unwrap();
        let config = GenerateConfig::new()
            .block_size(4096)
            .sector_size(512)
            .max_blank_blocks(8)
            .flash_update_version(version)
            .platform_ids(ids.iter().copied());
        let manifest = ManifestBuilder::new("1.0", format!("10.{}", fill)).build().unwrap();

        let path = dir.join(name);
        Generator::new(config).generate(&mut source, &manifest, &path).unwrap();
        path
    }

    #[test]
    fn test_missing_source_is_precondition() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("out.fpk");
        let request = PortRequest::new(temp_dir.path().join("missing.fpk"), &dest);

        assert!(matches!(Porter::new().port(&request), Err(Error::Precondition(_))));
        assert!(!dest.exists());
    }

    #[test]
    fn test_existing_destination_is_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let source = build(temp_dir.path(), "a.fpk", 0x11, FlashUpdateVersion::V1, &["A"]);
        let dest = temp_dir.path().join("out.fpk");
        std::fs::write(&dest, b"keep").unwrap();

        let result = Porter::new().port(&PortRequest::new(&source, &dest));
        assert!(matches!(result, Err(Error::Precondition(_))));
        assert_eq!(std::fs::read(&dest).unwrap(), b"keep");
    }

    #[test]
    fn test_missing_metadata_source() {
        let temp_dir = TempDir::new().unwrap();
        let source = build(temp_dir.path(), "a.fpk", 0x11, FlashUpdateVersion::V1, &["A"]);
        let request = PortRequest::new(&source, temp_dir.path().join("out.fpk"))
            .metadata_from(temp_dir.path().join("nope.fpk"));

        assert!(matches!(request.check_preconditions(), Err(Error::Precondition(_))));
    }

    #[test]
    fn test_simple_port_is_identical() {
        let temp_dir = TempDir::new().unwrap();
        let source = build(temp_dir.path(), "a.fpk", 0x11, FlashUpdateVersion::V2, &["A", "B"]);
        let dest = temp_dir.path().join("copy.fpk");

        let report = Porter::new().port(&PortRequest::new(&source, &dest)).unwrap();
        assert!(!report.merged);
        assert_eq!(report.store_count, 2);
        assert_eq!(std::fs::read(&source).unwrap(), std::fs::read(&dest).unwrap());
    }

    #[test]
    fn test_port_honors_cancel_requested_before_start() {
        let temp_dir = TempDir::new().unwrap();
        let source = build(temp_dir.path(), "a.fpk", 0x11, FlashUpdateVersion::V1, &["A"]);
        let dest = temp_dir.path().join("copy.fpk");

        let porter = Porter::new();
        porter.cancel_handle().store(true, Ordering::SeqCst);

        let result = porter.port(&PortRequest::new(&source, &dest));
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(!dest.exists());
    }

    #[test]
    fn test_merge_takes_metadata_and_payload() {
        let temp_dir = TempDir::new().unwrap();
        let payload = build(temp_dir.path(), "payload.fpk", 0x22, FlashUpdateVersion::V1, &["Old"]);
        let metadata = build(temp_dir.path(), "meta.fpk", 0x33, FlashUpdateVersion::V2, &["X", "Y"]);
        let dest = temp_dir.path().join("merged.fpk");

        let report = Porter::new()
            .port(&PortRequest::new(&payload, &dest).metadata_from(&metadata))
            .unwrap();
        assert!(report.merged);

        let mut merged = ContainerReader::open_path(&dest).unwrap();
        merged.verify_quiet().unwrap();
        let meta = merged.metadata().clone();
        assert_eq!(meta.manifest.os_version, "10.51");
        assert_eq!(meta.flash_update_version(), FlashUpdateVersion::V2);
        assert_eq!(meta.stores[1].platform_ids, vec!["Y"]);

        let mut boot = Vec::new();
        merged.extract_partition(1, "boot", &mut boot, None).unwrap();
        assert!(boot[..4096].iter().all(|&b| b == 0x22));
    }

    #[test]
    fn test_merge_rejects_mismatched_block_size() {
        let temp_dir = TempDir::new().unwrap();
        let payload = build(temp_dir.path(), "payload.fpk", 0x22, FlashUpdateVersion::V1, &["A"]);
        let metadata_path = build(temp_dir.path(), "meta.fpk", 0x33, FlashUpdateVersion::V1, &["B"]);

        let payload = ContainerReader::open_path(&payload).unwrap();
        let mut metadata = ContainerReader::open_path(&metadata_path).unwrap().metadata().clone();
        metadata.stores[0].block_size = 8192;

        assert!(matches!(
            merge_plan(payload.metadata(), &metadata),
            Err(Error::Layout(_))
        ));
    }

    #[test]
    fn test_corrupt_payload_block_reports_index() {
        let temp_dir = TempDir::new().unwrap();
        let source = build(temp_dir.path(), "a.fpk", 0x11, FlashUpdateVersion::V1, &["A"]);
        let mut bytes = std::fs::read(&source).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&source, &bytes).unwrap();
        let dest = temp_dir.path().join("out.fpk");

        let result = Porter::new().port(&PortRequest::new(&source, &dest));
        assert!(matches!(result, Err(Error::DigestMismatch { .. })));
        assert!(!dest.exists());
    }
}
