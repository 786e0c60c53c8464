//! Container generation from a raw disk image
//!
//! Generation runs in two passes over the source:
//!
//! 1. **Plan**: every partition not on the exclusion list is split into
//!    blocks by the [`ChunkPlanner`]; emitted blocks are hashed into the
//!    catalog as they go by. Nothing is written yet.
//! 2. **Write**: with all section sizes known, the [`ContainerAssembler`]
//!    streams the container, re-reading each block from the source and
//!    checking it against its catalog entry.
//!
//! The output goes to a temporary file that is moved into place only when
//! both passes succeed.

use crate::assembler::{AssemblyReport, BlockLocation, BlockProvider, ContainerAssembler, ContainerPlan};
use crate::catalog::CatalogBuilder;
use crate::config::GenerateConfig;
use crate::disk::{DiskImageSource, SourcePartition};
use crate::error::{Error, Result};
use crate::events::{BuildEvent, EventSink, NullSink, Phase};
use crate::format::{Partition, PayloadRange, StoreHeader};
use crate::manifest::Manifest;
use crate::output::{OutputFile, Publish};
use crate::planner::{read_exact_or_eof, ChunkPlanner};
use std::collections::HashMap;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Summary of one planned partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionReport {
    /// Partition name
    pub name: String,
    /// Descriptors produced
    pub descriptors: usize,
    /// Blocks stored
    pub emitted_blocks: u64,
    /// Blank blocks left out
    pub elided_blocks: u64,
}

/// Result of a completed generation
#[derive(Debug, Clone)]
pub struct GenerateReport {
    /// Where the container was published
    pub path: PathBuf,
    /// Container size in bytes
    pub bytes_written: u64,
    /// Catalog entries
    pub catalog_entries: u64,
    /// Per-partition results, excluded partitions omitted
    pub partitions: Vec<PartitionReport>,
    /// Partitions skipped because they were excluded
    pub excluded: Vec<String>,
    /// Total time taken
    pub elapsed: Duration,
}

/// Outcome of the planning pass
#[derive(Debug, Clone)]
pub struct PlannedContainer {
    /// Plan handed to the assembler
    pub plan: ContainerPlan,
    /// Per-partition results
    pub partitions: Vec<PartitionReport>,
    /// Partitions skipped
    pub excluded: Vec<String>,
}

/// Builds containers from disk images
pub struct Generator<'a> {
    config: GenerateConfig,
    sink: &'a dyn EventSink,
    cancel_flag: Arc<AtomicBool>,
}

impl<'a> Generator<'a> {
    /// Create a generator
    pub fn new(config: GenerateConfig) -> Self {
        Self {
            config,
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

    /// Configuration in use
    pub fn config(&self) -> &GenerateConfig {
        &self.config
    }

    /// First pass: plan every partition and build the catalog
    pub fn plan<S>(&self, source: &mut S, manifest: &Manifest) -> Result<PlannedContainer>
    where
        S: DiskImageSource + ?Sized,
    {
        self.config.validate()?;

        let config = &self.config;
        let planner = ChunkPlanner::new(config.block_size, config.sector_size, config.max_blank_blocks)
            .with_cancel_flag(Arc::clone(&self.cancel_flag));

        let source_partitions: Vec<SourcePartition> = source.partitions().to_vec();
        let (included, excluded): (Vec<_>, Vec<_>) = source_partitions
            .into_iter()
            .partition(|p| !manifest.is_excluded(&p.name));

        for partition in &excluded {
            self.sink.emit(&BuildEvent::PartitionExcluded {
                name: partition.name.clone(),
            });
        }

        // Fail on alignment before any block is read
        for partition in &included {
            planner.check_alignment(partition)?;
        }

        let blocks_total: u64 = included
            .iter()
            .map(|p| p.length / u64::from(config.block_size))
            .sum();
        self.sink.emit(&BuildEvent::PhaseStarted {
            phase: Phase::Planning,
            blocks_total,
        });

        let mut catalog = CatalogBuilder::new(config.digest_algorithm, config.hash_batch_blocks);
        let mut partitions = Vec::with_capacity(included.len());
        let mut reports = Vec::with_capacity(included.len());

        for source_partition in &included {
            let view = source.open_partition(source_partition)?;
            let plan = planner.plan(source_partition, view, |_, data| {
                catalog.add(data)?;
                Ok(())
            })?;

            for run in &plan.elided_runs {
                self.sink.emit(&BuildEvent::BlankRunElided {
                    partition: source_partition.name.clone(),
                    first_block: run.first_block,
                    blocks: run.blocks,
                });
            }

            let report = PartitionReport {
                name: source_partition.name.clone(),
                descriptors: plan.descriptors.len(),
                emitted_blocks: plan.emitted_blocks,
                elided_blocks: plan.elided_blocks(),
            };
            self.sink.emit(&BuildEvent::PartitionPlanned {
                name: report.name.clone(),
                descriptors: report.descriptors,
                emitted_blocks: report.emitted_blocks,
                elided_blocks: report.elided_blocks,
            });
            reports.push(report);

            let sector_size = u64::from(config.sector_size);
            partitions.push(Partition {
                name: source_partition.name.clone(),
                type_tag: source_partition.type_tag.clone(),
                first_sector: source_partition.offset / sector_size,
                sector_count: source_partition.length / sector_size,
                descriptors: plan.descriptors,
            });
        }

        let catalog = catalog.finish()?;
        let stores = config
            .platform_ids
            .iter()
            .map(|id| StoreHeader {
                flash_update_version: config.flash_update_version,
                store_index: 0,
                store_count: 0,
                platform_ids: vec![id.clone()],
                sector_size: config.sector_size,
                block_size: config.block_size,
                payload: PayloadRange::default(),
                partitions: partitions.clone(),
            })
            .collect();

        tracing::debug!(
            "Planned {} partition(s), {} excluded, {} catalog entries",
            reports.len(),
            excluded.len(),
            catalog.len()
        );

        Ok(PlannedContainer {
            plan: ContainerPlan {
                manifest: manifest.clone(),
                stores,
                catalog,
            },
            partitions: reports,
            excluded: excluded.into_iter().map(|p| p.name).collect(),
        })
    }

    /// Second pass: stream the planned container into `out`
    pub fn write<S, W>(&self, source: &mut S, planned: &PlannedContainer, out: &mut W) -> Result<AssemblyReport>
    where
        S: DiskImageSource + ?Sized,
        W: Write,
    {
        let mut provider = ImageBlocks::new(source, u64::from(self.config.sector_size));
        ContainerAssembler::new()
            .with_sink(self.sink)
            .with_cancel_flag(Arc::clone(&self.cancel_flag))
            .assemble(&planned.plan, &mut provider, out)
    }

    /// Plan, write and publish a container file
    pub fn generate<S>(&self, source: &mut S, manifest: &Manifest, destination: &Path) -> Result<GenerateReport>
    where
        S: DiskImageSource + ?Sized,
    {
        let start_time = Instant::now();
        if self.cancel_flag.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }

        let planned = self.plan(source, manifest)?;

        let mut output = OutputFile::create(destination)?;
        let assembly = {
            let mut writer = BufWriter::new(output.file_mut());
            let assembly = self.write(source, &planned, &mut writer)?;
            writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
            assembly
        };
        let path = output.publish(Publish::Replace)?;

        let elapsed = start_time.elapsed();
        let catalog_entries = u64::from(assembly.header.catalog_entry_count);
        self.sink.emit(&BuildEvent::Finished {
            path: path.clone(),
            bytes: assembly.bytes_written,
            catalog_entries,
            elapsed,
        });

        Ok(GenerateReport {
            path,
            bytes_written: assembly.bytes_written,
            catalog_entries,
            partitions: planned.partitions,
            excluded: planned.excluded,
            elapsed,
        })
    }
}

/// Re-reads planned blocks from the disk image
struct ImageBlocks<'s, S: ?Sized> {
    source: &'s mut S,
    partitions: Vec<SourcePartition>,
    by_name: HashMap<String, usize>,
    sector_size: u64,
}

impl<'s, S: DiskImageSource + ?Sized> ImageBlocks<'s, S> {
    fn new(source: &'s mut S, sector_size: u64) -> Self {
        let partitions = source.partitions().to_vec();
        let by_name = partitions
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.clone(), i))
            .collect();
        Self {
            source,
            partitions,
            by_name,
            sector_size,
        }
    }
}

impl<S: DiskImageSource + ?Sized> BlockProvider for ImageBlocks<'_, S> {
    fn read_block(&mut self, location: &BlockLocation<'_>, buf: &mut [u8]) -> Result<()> {
        let index = *self.by_name.get(&location.partition.name).ok_or_else(|| {
            Error::Layout(format!(
                "partition '{}' is not in the source image",
                location.partition.name
            ))
        })?;

        let offset = (location.sector - location.partition.first_sector) * self.sector_size;
        let mut view = self.source.open_partition(&self.partitions[index])?;
        view.seek(SeekFrom::Start(offset))?;
        let bytes_read = read_exact_or_eof(&mut view, buf)?;
        buf[bytes_read..].fill(0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::RawImage;
    use crate::events::MockEventSink;
    use crate::format::FlashUpdateVersion;
    use crate::manifest::ManifestBuilder;
    use crate::reader::ContainerReader;
    use std::io::Cursor;
    use tempfile::TempDir;

    const BS: u32 = 4096;

    fn image() -> (Vec<u8>, Vec<SourcePartition>) {
        let mut data = vec![0u8; 64 * 1024];
        // "a": blocks 0 and 3 have data, 1-2 blank
        data[0..4096].fill(0xA1);
        data[3 * 4096..4 * 4096].fill(0xA4);
        // "b": one block of data
        data[8 * 4096..9 * 4096].fill(0xB1);
        let partitions = vec![
            SourcePartition::new("a", "basic", 0, 4 * 4096),
            SourcePartition::new("b", "basic", 8 * 4096, 4096),
            SourcePartition::new("skip", "basic", 12 * 4096, 4096),
        ];
        (data, partitions)
    }

    fn config() -> GenerateConfig {
        GenerateConfig::new()
            .block_size(BS)
            .sector_size(512)
            .max_blank_blocks(2)
            .platform_ids(["Board.A"])
    }

    fn manifest() -> Manifest {
        ManifestBuilder::new("1.0", "10.0")
            .excluded_partitions(["skip"])
            .build()
            .unwrap()
    }

    #[test]
    fn test_plan_skips_excluded_and_elides_blank() {
        let (data, partitions) = image();
        let mut source = RawImage::new(Cursor::new(data), partitions).unwrap();
        let planned = Generator::new(config()).plan(&mut source, &manifest()).unwrap();

        assert_eq!(planned.excluded, vec!["skip"]);
        assert_eq!(planned.partitions.len(), 2);
        assert_eq!(planned.partitions[0].emitted_blocks, 2);
        assert_eq!(planned.partitions[0].elided_blocks, 2);
        assert_eq!(planned.partitions[0].descriptors, 2);
        assert_eq!(planned.plan.catalog.len(), 3);
        assert_eq!(planned.plan.stores[0].partitions[1].first_sector, 64);
    }

    #[test]
    fn test_write_round_trips() {
        let (data, partitions) = image();
        let mut source = RawImage::new(Cursor::new(data.clone()), partitions).unwrap();
        let generator = Generator::new(config());
        let planned = generator.plan(&mut source, &manifest()).unwrap();

        let mut out = Vec::new();
        generator.write(&mut source, &planned, &mut out).unwrap();

        let mut reader = ContainerReader::open(Cursor::new(out)).unwrap();
        reader.verify_quiet().unwrap();
        let mut extracted = Vec::new();
        reader.extract_partition(0, "a", &mut extracted, None).unwrap();
        assert_eq!(extracted, data[..4 * 4096].to_vec());
    }

    #[test]
    fn test_image_blocks_reads_interleaved_partitions() {
        let (data, partitions) = image();
        let mut source = RawImage::new(Cursor::new(data), partitions).unwrap();
        let planned = Generator::new(config()).plan(&mut source, &manifest()).unwrap();
        let store = &planned.plan.stores[0];
        let (a, b) = (&store.partitions[0], &store.partitions[1]);

        let mut provider = ImageBlocks::new(&mut source, 512);
        let mut buf = vec![0u8; BS as usize];
        for (partition, sector, fill) in [(b, 64, 0xB1), (a, 24, 0xA4), (b, 64, 0xB1), (a, 0, 0xA1)] {
            let location = BlockLocation {
                index: 0,
                partition,
                sector,
            };
            provider.read_block(&location, &mut buf).unwrap();
            assert!(buf.iter().all(|&x| x == fill));
        }

        let unknown = Partition {
            name: "missing".to_string(),
            ..a.clone()
        };
        let location = BlockLocation {
            index: 0,
            partition: &unknown,
            sector: 0,
        };
        assert!(matches!(provider.read_block(&location, &mut buf), Err(Error::Layout(_))));
    }

    #[test]
    fn test_generate_honors_cancel_requested_before_start() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("image.fpk");
        let (data, partitions) = image();
        let mut source = RawImage::new(Cursor::new(data), partitions).unwrap();

        let generator = Generator::new(config());
        generator.cancel_handle().store(true, Ordering::SeqCst);

        let result = generator.generate(&mut source, &manifest(), &dest);
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(!dest.exists());
    }

    #[test]
    fn test_source_changed_between_passes() {
        let (data, partitions) = image();
        let mut source = RawImage::new(Cursor::new(data), partitions.clone()).unwrap();
        let generator = Generator::new(config());
        let planned = generator.plan(&mut source, &manifest()).unwrap();

        let mut changed = source.into_inner().into_inner();
        changed[8 * 4096] = 0x00;
        let mut source = RawImage::new(Cursor::new(changed), partitions).unwrap();

        let result = generator.write(&mut source, &planned, &mut Vec::new());
        assert!(matches!(
            result,
            Err(Error::SourceChanged { ref partition, block: 0 }) if partition == "b"
        ));
    }

    #[test]
    fn test_generate_publishes_file_and_reports() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("image.fpk");
        let (data, partitions) = image();
        let mut source = RawImage::new(Cursor::new(data), partitions).unwrap();

        let mut sink = MockEventSink::new();
        sink.expect_emit()
            .withf(|e| matches!(e, BuildEvent::Finished { catalog_entries: 3, .. }))
            .times(1)
            .return_const(());
        sink.expect_emit()
            .withf(|e| matches!(e, BuildEvent::PartitionExcluded { name } if name == "skip"))
            .times(1)
            .return_const(());
        sink.expect_emit().return_const(());

        let report = Generator::new(config())
            .with_sink(&sink)
            .generate(&mut source, &manifest(), &dest)
            .unwrap();

        assert!(dest.exists());
        assert_eq!(std::fs::metadata(&dest).unwrap().len(), report.bytes_written);
        assert_eq!(report.catalog_entries, 3);
    }

    #[test]
    fn test_alignment_failure_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("image.fpk");
        let mut source = RawImage::new(
            Cursor::new(vec![1u8; 16 * 1024]),
            vec![SourcePartition::new("odd", "basic", 0, 3 * 512)],
        )
        .unwrap();

        let result = Generator::new(config()).generate(&mut source, &manifest(), &dest);
        assert!(matches!(result, Err(Error::Alignment { .. })));
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_v2_generates_one_copy_per_store() {
        let (data, partitions) = image();
        let mut source = RawImage::new(Cursor::new(data), partitions).unwrap();
        let generator = Generator::new(
            config()
                .flash_update_version(FlashUpdateVersion::V2)
                .platform_ids(["Board.A", "Board.B"]),
        );
        let planned = generator.plan(&mut source, &manifest()).unwrap();
        let mut out = Vec::new();
        let report = generator.write(&mut source, &planned, &mut out).unwrap();
        assert_eq!(report.payload_blocks, 6);

        let mut reader = ContainerReader::open(Cursor::new(out)).unwrap();
        assert_eq!(reader.metadata().stores.len(), 2);
        reader.verify_quiet().unwrap();
    }

    #[test]
    fn test_invalid_config_rejected_before_reading() {
        let (data, partitions) = image();
        let mut source = RawImage::new(Cursor::new(data), partitions).unwrap();
        let generator = Generator::new(GenerateConfig::new().block_size(BS).sector_size(512));
        assert!(matches!(
            generator.plan(&mut source, &manifest()),
            Err(Error::Configuration(_))
        ));
    }
}
