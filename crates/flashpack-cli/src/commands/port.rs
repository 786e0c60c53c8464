//! Port command - rebuilds a container, optionally with another's metadata

use anyhow::{Context, Result};
use console::style;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use flashpack_core::{format_duration, format_size, PortRequest, Porter};

use crate::progress::ProgressSink;

/// Execute the port command
pub fn execute(
    source: PathBuf,
    output: PathBuf,
    metadata_from: Option<PathBuf>,
    cancel_flag: Arc<AtomicBool>,
    silent: bool,
) -> Result<()> {
    let mut request = PortRequest::new(&source, &output);
    if let Some(metadata) = &metadata_from {
        request = request.metadata_from(metadata);
    }

    println_if!(
        silent,
        "{} {}",
        style("Payload:").bold(),
        style(source.display()).cyan()
    );
    if let Some(metadata) = &metadata_from {
        println_if!(
            silent,
            "{} {}",
            style("Metadata:").bold(),
            style(metadata.display()).cyan()
        );
    }

    tracing::debug!("Port request: {:?}", request);

    let sink = ProgressSink::new(silent, false);
    let porter = Porter::new().with_sink(&sink).with_cancel_flag(cancel_flag);
    let result = porter.port(&request);
    sink.finish();
    let report = result.with_context(|| format!("Failed to port into {}", output.display()))?;

    println_if!(
        silent,
        "\n{} {}",
        style("✓ Container written:").green().bold(),
        report.path.display()
    );
    println_if!(
        silent,
        "  {}, {} store(s), {} block(s) per store{}, {}",
        format_size(report.bytes_written),
        report.store_count,
        report.store_blocks,
        if report.merged { ", metadata merged" } else { "" },
        format_duration(report.elapsed.as_secs())
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_source_creates_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let output = temp_dir.path().join("out.fpk");

        let result = execute(
            temp_dir.path().join("missing.fpk"),
            output.clone(),
            None,
            Arc::new(AtomicBool::new(false)),
            true,
        );

        assert!(result.is_err());
        assert!(!output.exists());
    }

    #[test]
    fn test_error_mentions_precondition() {
        let temp_dir = TempDir::new().unwrap();
        let result = execute(
            temp_dir.path().join("missing.fpk"),
            temp_dir.path().join("out.fpk"),
            None,
            Arc::new(AtomicBool::new(false)),
            true,
        );

        let message = format!("{:#}", result.unwrap_err());
        assert!(message.contains("not found"));
    }
}
