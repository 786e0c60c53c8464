//! Verify command - checks every payload block against the catalog

use anyhow::{bail, Context, Result};
use console::style;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use flashpack_core::{format_size, format_speed, ContainerReader, Error, VerifyReport};

use crate::progress::ProgressSink;

/// Execute the verify command
pub fn execute(container: &Path, cancel_flag: Arc<AtomicBool>, silent: bool) -> Result<()> {
    println_if!(
        silent,
        "{} {}",
        style("Container:").bold(),
        style(container.display()).cyan()
    );

    let mut reader = ContainerReader::open_path(container)
        .with_context(|| format!("Failed to read container: {}", container.display()))?;

    println_if!(
        silent,
        "  {} {} block(s), {}",
        style("✓").green(),
        reader.block_count(),
        reader.metadata().header.digest_algorithm
    );
    println_if!(silent, "\n{}", style("Verifying...").bold());

    let sink = ProgressSink::new(silent, false);
    let start = Instant::now();
    let result = reader.verify(&sink, Some(cancel_flag.as_ref()));
    sink.finish();

    handle_verify_result(result, start.elapsed().as_secs_f64(), silent)
}

/// Handle verification result
fn handle_verify_result(
    result: std::result::Result<VerifyReport, Error>,
    seconds: f64,
    silent: bool,
) -> Result<()> {
    match result {
        Ok(report) => {
            println_if!(
                silent,
                "  {} Verification passed!",
                style("✓").green().bold()
            );
            let speed = if seconds > 0.0 {
                (report.bytes_verified as f64 / seconds) as u64
            } else {
                0
            };
            println_if!(
                silent,
                "    {} block(s), {} verified in {:.1}s ({})",
                report.blocks_verified,
                format_size(report.bytes_verified),
                seconds,
                format_speed(speed)
            );
            Ok(())
        }
        Err(Error::DigestMismatch {
            index,
            expected,
            actual,
        }) => {
            println_if!(silent, "  {} Verification FAILED!", style("✗").red().bold());
            println_if!(silent, "    Block:    {}", index);
            println_if!(silent, "    Catalog:  {}", expected);
            println_if!(silent, "    Payload:  {}", actual);
            bail!("Verification failed: block {} does not match the catalog", index);
        }
        Err(e) => Err(e).context("Verification error"),
    }
}
