//! Generate command - builds a container from a raw disk image

use anyhow::{bail, Context, Result};
use console::style;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use flashpack_core::{
    format_duration, format_size, parse_platform_ids, parse_size, read_exclusion_list,
    DigestAlgorithm, FlashUpdateVersion, GenerateConfig, Generator, ManifestBuilder, RawImage,
    Settings,
};

use crate::progress::ProgressSink;

/// Arguments for the generate command
pub struct GenerateArgs {
    /// Raw disk image
    pub image: PathBuf,
    /// Container to create
    pub output: PathBuf,
    /// Semicolon-delimited platform IDs
    pub platform_ids: Option<String>,
    /// Device sector size
    pub sector_size: Option<u32>,
    /// Block size string (e.g. "128K")
    pub block_size: Option<String>,
    /// Anti-theft version
    pub anti_theft_version: String,
    /// OS version
    pub os_version: String,
    /// File listing partitions to leave out
    pub excluded_partitions: Option<PathBuf>,
    /// Longest blank run left out
    pub max_blank_blocks: Option<u64>,
    /// Flash update version tag
    pub flash_update_version: Option<String>,
    /// Device targeting rules
    pub device_targets: Option<String>,
    /// Catalog digest algorithm
    pub digest: Option<String>,
    /// Defaults from the configuration file
    pub settings: Settings,
    /// Set on Ctrl+C
    pub cancel_flag: Arc<AtomicBool>,
    /// Suppress all output
    pub silent: bool,
    /// Show per-run details
    pub verbose: bool,
}

/// Execute the generate command
pub fn execute(args: GenerateArgs) -> Result<()> {
    let silent = args.silent;
    let config = build_config(&args)?;
    tracing::debug!("Generate config: {:?}", config);

    let excluded = match &args.excluded_partitions {
        Some(path) => read_exclusion_list(path)
            .with_context(|| format!("Failed to read exclusion list: {}", path.display()))?,
        None => Vec::new(),
    };

    let mut builder = ManifestBuilder::new(&args.anti_theft_version, &args.os_version)
        .excluded_partitions(excluded);
    if let Some(targets) = &args.device_targets {
        builder = builder.device_targets(targets.as_str());
    }
    let manifest = builder.build().context("Invalid manifest")?;

    println_if!(
        silent,
        "{} {}",
        style("Image:").bold(),
        style(args.image.display()).cyan()
    );

    let file = File::open(&args.image)
        .with_context(|| format!("Failed to open image: {}", args.image.display()))?;
    let mut image = RawImage::from_partition_table(BufReader::new(file))
        .with_context(|| format!("Failed to read partition table of {}", args.image.display()))?;

    println_if!(
        silent,
        "  {} block size {}, sector size {}, {} store(s), {}",
        style("✓").green(),
        format_size(u64::from(config.block_size)),
        config.sector_size,
        config.platform_ids.len(),
        config.flash_update_version
    );
    println_if!(silent, "\n{}", style("Planning...").bold());

    let sink = ProgressSink::new(silent, args.verbose);
    let generator = Generator::new(config)
        .with_sink(&sink)
        .with_cancel_flag(Arc::clone(&args.cancel_flag));

    let result = generator.generate(&mut image, &manifest, &args.output);
    sink.finish();
    let report = result.with_context(|| format!("Failed to generate {}", args.output.display()))?;

    println_if!(
        silent,
        "\n{} {}",
        style("✓ Container written:").green().bold(),
        report.path.display()
    );
    println_if!(
        silent,
        "  {} in {} partition(s), {} catalog entries, {}",
        format_size(report.bytes_written),
        report.partitions.len(),
        report.catalog_entries,
        format_duration(report.elapsed.as_secs())
    );
    if !report.excluded.is_empty() {
        println_if!(silent, "  Excluded: {}", report.excluded.join(", "));
    }

    Ok(())
}

/// Merge flags over configuration file defaults
fn build_config(args: &GenerateArgs) -> Result<GenerateConfig> {
    let mut config = args
        .settings
        .generate
        .to_config()
        .context("Invalid [generate] defaults in configuration file")?;

    if let Some(ids) = &args.platform_ids {
        config = config.platform_ids(parse_platform_ids(ids)?);
    }
    if let Some(sector_size) = args.sector_size {
        config = config.sector_size(sector_size);
    }
    if let Some(block_size) = &args.block_size {
        let size = parse_size(block_size)?;
        let Ok(size) = u32::try_from(size) else {
            bail!("Block size too large: {}", block_size);
        };
        config = config.block_size(size);
    }
    if let Some(max_blank) = args.max_blank_blocks {
        config = config.max_blank_blocks(max_blank);
    }
    if let Some(version) = &args.flash_update_version {
        config = config.flash_update_version(version.parse::<FlashUpdateVersion>()?);
    }
    if let Some(digest) = &args.digest {
        config = config.digest_algorithm(digest.parse::<DigestAlgorithm>()?);
    }

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> GenerateArgs {
        GenerateArgs {
            image: PathBuf::from("disk.img"),
            output: PathBuf::from("disk.fpk"),
            platform_ids: Some("Board.A;Board.B".to_string()),
            sector_size: None,
            block_size: None,
            anti_theft_version: "1.1".to_string(),
            os_version: "10.0".to_string(),
            excluded_partitions: None,
            max_blank_blocks: None,
            flash_update_version: None,
            device_targets: None,
            digest: None,
            settings: Settings::default(),
            cancel_flag: Arc::new(AtomicBool::new(false)),
            silent: true,
            verbose: false,
        }
    }

    #[test]
    fn test_build_config_uses_settings_defaults() {
        let config = build_config(&args()).unwrap();
        assert_eq!(config.block_size, 128 * 1024);
        assert_eq!(config.sector_size, 512);
        assert_eq!(config.max_blank_blocks, 100);
        assert_eq!(config.platform_ids, vec!["Board.A", "Board.B"]);
    }

    #[test]
    fn test_build_config_flags_override() {
        let mut args = args();
        args.block_size = Some("4K".to_string());
        args.sector_size = Some(4096);
        args.max_blank_blocks = Some(3);
        args.flash_update_version = Some("v2".to_string());
        args.digest = Some("sha512".to_string());

        let config = build_config(&args).unwrap();
        assert_eq!(config.block_size, 4096);
        assert_eq!(config.sector_size, 4096);
        assert_eq!(config.max_blank_blocks, 3);
        assert_eq!(config.flash_update_version, FlashUpdateVersion::V2);
        assert_eq!(config.digest_algorithm, DigestAlgorithm::Sha512);
    }

    #[test]
    fn test_build_config_rejects_invalid() {
        let mut no_ids = args();
        no_ids.platform_ids = None;
        assert!(build_config(&no_ids).is_err());

        let mut bad_version = args();
        bad_version.flash_update_version = Some("v9".to_string());
        assert!(build_config(&bad_version).is_err());

        let mut misaligned = args();
        misaligned.block_size = Some("1000".to_string());
        assert!(build_config(&misaligned).is_err());
    }

    #[test]
    fn test_missing_exclusion_file_fails_before_output() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let mut args = args();
        args.output = temp_dir.path().join("out.fpk");
        args.excluded_partitions = Some(temp_dir.path().join("missing.txt"));

        assert!(execute(args).is_err());
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }
}
