//! Inspect command - prints a container's headers, stores and partitions

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use flashpack_core::{describe_type, format_size, inspect_file, ContainerSummary};

/// Execute the inspect command
pub fn execute(container: &Path, json: bool, silent: bool) -> Result<()> {
    let summary = inspect_file(container)
        .with_context(|| format!("Failed to read container: {}", container.display()))?;

    // JSON output mode - always output even in silent mode (it's machine-readable)
    if json {
        println!("{}", summary.to_json()?);
        return Ok(());
    }

    if silent {
        return Ok(());
    }

    print_summary(container, &summary);
    Ok(())
}

fn print_summary(container: &Path, summary: &ContainerSummary) {
    println!(
        "{} {}\n",
        style("Container").green().bold(),
        style(container.display()).white().bold()
    );

    println!(
        "  Size: {} | Chunk: {} | Digest: {} | Flash update: {}",
        format_size(summary.container_size),
        format_size(u64::from(summary.chunk_size)),
        summary.digest_algorithm,
        summary.flash_update_version
    );
    println!(
        "  Catalog: {} entries | Payload: {}",
        summary.catalog_entries,
        format_size(summary.payload_size)
    );

    let manifest = &summary.manifest;
    println!(
        "  Anti-theft: {} | OS: {}",
        manifest.anti_theft_version, manifest.os_version
    );
    if !manifest.device_targets.is_empty() {
        let targets: Vec<String> = manifest
            .device_targets
            .iter()
            .map(ToString::to_string)
            .collect();
        println!("  Targets: {}", style(targets.join("; ")).dim());
    }
    if !manifest.excluded_partitions.is_empty() {
        let excluded: Vec<&str> = manifest
            .excluded_partitions
            .iter()
            .map(String::as_str)
            .collect();
        println!("  Excluded: {}", style(excluded.join(", ")).dim());
    }
    println!();

    for store in &summary.stores {
        println!(
            "{} {} [{}]",
            style("Store").cyan().bold(),
            store.index,
            store.platform_ids.join(", ")
        );
        println!(
            "    Sector: {} | Blocks {}..{}",
            store.sector_size,
            store.payload_first_block,
            store.payload_first_block + store.payload_block_count
        );
        for partition in &store.partitions {
            println!(
                "      {} {} [{}] {} at sector {}, {} block(s) in {} descriptor(s)",
                style("•").dim(),
                style(&partition.name).white(),
                describe_type(&partition.type_tag),
                format_size(partition.size),
                partition.first_sector,
                partition.blocks,
                partition.descriptors
            );
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_container() {
        let temp_dir = TempDir::new().unwrap();
        let result = execute(&temp_dir.path().join("missing.fpk"), false, true);
        assert!(result.is_err());
    }

    #[test]
    fn test_garbage_container() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("garbage.fpk");
        std::fs::write(&path, vec![0x42u8; 1024]).unwrap();

        let err = execute(&path, true, true).unwrap_err();
        assert!(format!("{:#}", err).contains("Malformed container"));
    }
}
