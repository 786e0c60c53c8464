//! # Flashpack Core
//!
//! Codec for signed, chunked flash containers built from raw disk images.
//!
//! ## Modules
//!
//! - `planner`: Splits partitions into blocks and leaves out short blank runs
//! - `catalog`: Per-block digests in emission order
//! - `manifest`: Versioned manifest text with device targeting rules
//! - `format`: On-disk layout of headers, stores and descriptors
//! - `assembler`: Streams a container section by section
//! - `reader`: Parses, verifies and extracts existing containers
//! - `porting`: Rebuilds a container from one or two existing ones
//! - `pipeline`: Two-pass generation from a disk image
//! - `disk`: Raw disk image sources
//! - `error`: Error types and result aliases
//! - `config`: Generation configuration
//! - `settings`: Persistent user settings from configuration file
//!
//! ## Example
//!
//! ```ignore
//! use flashpack_core::{GenerateConfig, Generator, ManifestBuilder, RawImage};
//! use std::fs::File;
//! use std::path::Path;
//!
//! let mut image = RawImage::from_partition_table(File::open("disk.img")?)?;
//! let manifest = ManifestBuilder::new("1.1", "10.0.1").build()?;
//! let config = GenerateConfig::new()
//!     .block_size(128 * 1024)
//!     .platform_ids(["Contoso.Board.A"]);
//!
//! let report = Generator::new(config).generate(&mut image, &manifest, Path::new("disk.fpk"))?;
//! println!("Wrote {} bytes in {:?}", report.bytes_written, report.elapsed);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod assembler;
pub mod catalog;
pub mod config;
pub mod disk;
pub mod error;
pub mod events;
pub mod format;
pub mod manifest;
pub mod output;
pub mod pipeline;
pub mod planner;
pub mod porting;
pub mod reader;
pub mod settings;

pub use assembler::{AssemblyReport, BlockLocation, BlockProvider, ContainerAssembler, ContainerPlan};
pub use catalog::{BlockDigest, Catalog, CatalogBuilder, CatalogEntry, DigestAlgorithm};
pub use config::{
    parse_exclusion_list, parse_platform_ids, parse_size, read_exclusion_list, GenerateConfig,
    DEFAULT_BLOCK_SIZE, DEFAULT_HASH_BATCH_BLOCKS, DEFAULT_MAX_BLANK_BLOCKS, DEFAULT_SECTOR_SIZE,
    MAX_BLOCK_SIZE,
};
pub use disk::{describe_type, format_size, DiskImageSource, RawImage, ReadSeek, SourcePartition};
pub use error::{Error, Result};
pub use events::{
    format_duration, format_speed, BuildEvent, EventSink, NullSink, Phase, Progress, TracingSink,
};
pub use format::{
    FlashUpdateVersion, Partition, PayloadRange, SecurityHeader, StoreHeader, WriteDescriptor,
};
pub use manifest::{
    parse_device_targets, ComparisonOp, DeviceTargetInfo, Manifest, ManifestBuilder,
    VersionConstraint,
};
pub use output::{OutputFile, Publish};
pub use pipeline::{GenerateReport, Generator, PartitionReport, PlannedContainer};
pub use planner::{BlankRun, ChunkPlanner, PartitionPlan};
pub use porting::{PortReport, PortRequest, Porter};
pub use reader::{
    inspect_file, verify_file, ContainerReader, ContainerSummary, DataBlock, Metadata,
    VerifyReport,
};
pub use settings::{BehaviorSettings, GenerateSettings, Settings, SettingsError};
