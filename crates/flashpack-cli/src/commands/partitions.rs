//! Partitions command - lists the partitions of a raw disk image

use anyhow::{Context, Result};
use console::style;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use flashpack_core::{describe_type, format_size, DiskImageSource, RawImage, SourcePartition};

/// Execute the partitions command
pub fn execute(image: &Path, sector_size: u32, json: bool, silent: bool) -> Result<()> {
    let file = File::open(image)
        .with_context(|| format!("Failed to open image: {}", image.display()))?;
    let source = RawImage::from_partition_table(BufReader::new(file))
        .with_context(|| format!("Failed to read partition table of {}", image.display()))?;
    let partitions = source.partitions();

    // JSON output mode - always output even in silent mode (it's machine-readable)
    if json {
        let output = serde_json::to_string_pretty(partitions)
            .context("Failed to serialize partitions to JSON")?;
        println!("{}", output);
        return Ok(());
    }

    if silent {
        return Ok(());
    }

    println!(
        "{} {} partition(s):\n",
        style("Found").green().bold(),
        partitions.len()
    );
    for partition in partitions {
        print_partition(partition, sector_size);
    }
    Ok(())
}

/// Print a single partition, flagging sizes that do not fit the sector grid
fn print_partition(partition: &SourcePartition, sector_size: u32) {
    let sector_size = u64::from(sector_size);
    let aligned = sector_size > 0
        && partition.offset % sector_size == 0
        && partition.length % sector_size == 0;
    let status = if aligned {
        style("✓").green().bold()
    } else {
        style("✗").red().bold()
    };

    println!(
        "{} {} ({}, {})",
        status,
        style(&partition.name).white().bold(),
        format_size(partition.length),
        describe_type(&partition.type_tag)
    );
    println!(
        "    Offset: {} | Type: {}",
        partition.offset,
        style(&partition.type_tag).dim()
    );
    if !aligned {
        println!(
            "    {}",
            style(format!("Not aligned to {}-byte sectors", sector_size)).yellow()
        );
    }
    println!();
}
