//! Extract command - rebuilds one partition's raw image from a container

use anyhow::{Context, Result};
use console::style;
use std::io::BufWriter;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use flashpack_core::{format_size, ContainerReader, OutputFile, Publish};

/// Execute the extract command
pub fn execute(
    container: &Path,
    partition: &str,
    output: &Path,
    store: u16,
    cancel_flag: Arc<AtomicBool>,
    silent: bool,
) -> Result<()> {
    let mut reader = ContainerReader::open_path(container)
        .with_context(|| format!("Failed to read container: {}", container.display()))?;

    println_if!(
        silent,
        "{} {} (store {}) -> {}",
        style("Extracting").bold(),
        style(partition).cyan(),
        store,
        output.display()
    );

    let mut out = OutputFile::create(output)?;
    let written = {
        let mut writer = BufWriter::new(out.file_mut());
        reader
            .extract_partition(store, partition, &mut writer, Some(cancel_flag.as_ref()))
            .with_context(|| format!("Failed to extract partition '{}'", partition))?
    };
    let path = out.publish(Publish::Replace)?;

    println_if!(
        silent,
        "  {} {} written to {}",
        style("✓").green(),
        format_size(written),
        path.display()
    );
    Ok(())
}
