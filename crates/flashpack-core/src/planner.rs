//! Chunk planning over partition payloads
//!
//! The planner walks a partition in block-size windows and decides which
//! windows become data blocks in the container. Runs of all-zero windows are
//! left out entirely when they are no longer than the configured threshold,
//! so the device keeps whatever it had there; longer runs are written as
//! explicit zero blocks. Contiguous emitted windows are merged into one
//! [`WriteDescriptor`].

use crate::disk::SourcePartition;
use crate::error::{Error, Result};
use crate::format::WriteDescriptor;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A run of blank blocks that was left out of the container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlankRun {
    /// Partition-relative block number of the first blank block
    pub first_block: u64,
    /// Number of blocks in the run
    pub blocks: u64,
}

/// Outcome of planning one partition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionPlan {
    /// Descriptors in on-disk order
    pub descriptors: Vec<WriteDescriptor>,
    /// Blocks handed to the emit callback
    pub emitted_blocks: u64,
    /// Blank runs that were left out
    pub elided_runs: Vec<BlankRun>,
}

impl PartitionPlan {
    /// Total number of blocks left out
    pub fn elided_blocks(&self) -> u64 {
        self.elided_runs.iter().map(|r| r.blocks).sum()
    }

    /// Longest run left out
    pub fn longest_elided_run(&self) -> u64 {
        self.elided_runs.iter().map(|r| r.blocks).max().unwrap_or(0)
    }
}

/// Splits partition payloads into data blocks and write descriptors
#[derive(Debug, Clone)]
pub struct ChunkPlanner {
    block_size: u32,
    sector_size: u32,
    max_blank_blocks: u64,
    cancel_flag: Option<Arc<AtomicBool>>,
}

impl ChunkPlanner {
    /// Create a planner
    pub fn new(block_size: u32, sector_size: u32, max_blank_blocks: u64) -> Self {
        Self {
            block_size,
            sector_size,
            max_blank_blocks,
            cancel_flag: None,
        }
    }

    /// Check this flag at every block boundary
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = Some(flag);
        self
    }

    /// Sectors covered by one block
    pub fn sectors_per_block(&self) -> u64 {
        u64::from(self.block_size / self.sector_size)
    }

    /// Reject partitions whose placement or size does not fit the block grid
    pub fn check_alignment(&self, partition: &SourcePartition) -> Result<()> {
        let block_size = u64::from(self.block_size);
        let sector_size = u64::from(self.sector_size);

        if self.block_size == 0 || self.sector_size == 0 || block_size % sector_size != 0 {
            return Err(Error::alignment(
                &partition.name,
                format!(
                    "block size {} is not a multiple of sector size {}",
                    self.block_size, self.sector_size
                ),
            ));
        }
        if partition.offset % sector_size != 0 {
            return Err(Error::alignment(
                &partition.name,
                format!(
                    "start offset {} is not a multiple of sector size {}",
                    partition.offset, self.sector_size
                ),
            ));
        }
        if partition.length % sector_size != 0 {
            return Err(Error::alignment(
                &partition.name,
                format!(
                    "size {} is not a multiple of sector size {}",
                    partition.length, self.sector_size
                ),
            ));
        }
        if partition.length % block_size != 0 {
            return Err(Error::alignment(
                &partition.name,
                format!(
                    "size {} is not a multiple of block size {}",
                    partition.length, self.block_size
                ),
            ));
        }
        Ok(())
    }

    /// Plan one partition
    ///
    /// `emit` receives every block that goes into the container, in order,
    /// together with its partition-relative block number.
    pub fn plan<R, F>(
        &self,
        partition: &SourcePartition,
        mut reader: R,
        mut emit: F,
    ) -> Result<PartitionPlan>
    where
        R: Read,
        F: FnMut(u64, &[u8]) -> Result<()>,
    {
        self.check_alignment(partition)?;

        let mut plan = PartitionPlan::default();
        let total_blocks = partition.length / u64::from(self.block_size);
        if total_blocks == 0 {
            tracing::debug!("Partition '{}' is empty, nothing to plan", partition.name);
            return Ok(plan);
        }

        let first_sector = partition.offset / u64::from(self.sector_size);
        let mut tracker = DescriptorTracker::new(first_sector, self.sectors_per_block());
        let mut buffer = vec![0u8; self.block_size as usize];
        let zero_block = vec![0u8; self.block_size as usize];
        let mut run_start = 0u64;
        let mut run_len = 0u64;

        for block in 0..total_blocks {
            if self.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let bytes_read = read_exact_or_eof(&mut reader, &mut buffer)?;
            buffer[bytes_read..].fill(0);

            if is_blank(&buffer) {
                if run_len == 0 {
                    run_start = block;
                }
                run_len += 1;
                continue;
            }

            self.close_run(run_start, run_len, &zero_block, &mut tracker, &mut plan, &mut emit)?;
            run_len = 0;

            emit(block, &buffer)?;
            tracker.extend(block);
            plan.emitted_blocks += 1;
        }

        self.close_run(run_start, run_len, &zero_block, &mut tracker, &mut plan, &mut emit)?;
        plan.descriptors = tracker.finish();

        tracing::debug!(
            "Planned '{}': {} descriptor(s), {} block(s) emitted, {} blank block(s) left out",
            partition.name,
            plan.descriptors.len(),
            plan.emitted_blocks,
            plan.elided_blocks()
        );

        Ok(plan)
    }

    /// Decide the fate of a finished blank run
    fn close_run<F>(
        &self,
        run_start: u64,
        run_len: u64,
        zero_block: &[u8],
        tracker: &mut DescriptorTracker,
        plan: &mut PartitionPlan,
        emit: &mut F,
    ) -> Result<()>
    where
        F: FnMut(u64, &[u8]) -> Result<()>,
    {
        if run_len == 0 {
            return Ok(());
        }

        if run_len <= self.max_blank_blocks {
            tracker.break_run();
            plan.elided_runs.push(BlankRun {
                first_block: run_start,
                blocks: run_len,
            });
            return Ok(());
        }

        for block in run_start..run_start + run_len {
            if self.is_cancelled() {
                return Err(Error::Cancelled);
            }
            emit(block, zero_block)?;
            tracker.extend(block);
            plan.emitted_blocks += 1;
        }
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }
}

/// Merges consecutive emitted blocks into descriptors
struct DescriptorTracker {
    first_sector: u64,
    sectors_per_block: u64,
    current: Option<(u64, u32)>,
    done: Vec<WriteDescriptor>,
}

impl DescriptorTracker {
    fn new(first_sector: u64, sectors_per_block: u64) -> Self {
        Self {
            first_sector,
            sectors_per_block,
            current: None,
            done: Vec::new(),
        }
    }

    fn extend(&mut self, block: u64) {
        match self.current {
            Some((start, count))
                if start + u64::from(count) == block && count < u32::MAX =>
            {
                self.current = Some((start, count + 1));
            }
            _ => {
                self.break_run();
                self.current = Some((block, 1));
            }
        }
    }

    fn break_run(&mut self) {
        if let Some((start, count)) = self.current.take() {
            self.done.push(WriteDescriptor {
                first_sector: self.first_sector + start * self.sectors_per_block,
                block_count: count,
            });
        }
    }

    fn finish(mut self) -> Vec<WriteDescriptor> {
        self.break_run();
        self.done
    }
}

fn is_blank(block: &[u8]) -> bool {
    block.iter().all(|&b| b == 0)
}

/// Read exactly the buffer size or until EOF
pub(crate) fn read_exact_or_eof<R: Read + ?Sized>(reader: &mut R, buffer: &mut [u8]) -> Result<usize> {
    let mut total_read = 0;

    while total_read < buffer.len() {
        match reader.read(&mut buffer[total_read..]) {
            Ok(0) => break, // EOF
            Ok(n) => total_read += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }

    Ok(total_read)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const BS: usize = 4096;

    fn partition(length: u64) -> SourcePartition {
        SourcePartition::new("data", "basic", 1024 * 1024, length)
    }

    /// Build a partition image from a pattern of blank ('0') and data ('D') blocks
    fn image(pattern: &str) -> Vec<u8> {
        let mut data = Vec::with_capacity(pattern.len() * BS);
        for (i, c) in pattern.chars().enumerate() {
            match c {
                '0' => data.extend(std::iter::repeat(0u8).take(BS)),
                _ => data.extend(std::iter::repeat((i % 250 + 1) as u8).take(BS)),
            }
        }
        data
    }

    fn run(pattern: &str, max_blank: u64) -> (PartitionPlan, Vec<u64>) {
        let data = image(pattern);
        let planner = ChunkPlanner::new(BS as u32, 512, max_blank);
        let mut emitted = Vec::new();
        let plan = planner
            .plan(&partition(data.len() as u64), Cursor::new(data), |block, bytes| {
                assert_eq!(bytes.len(), BS);
                emitted.push(block);
                Ok(())
            })
            .unwrap();
        (plan, emitted)
    }

    #[test]
    fn test_all_data_is_one_descriptor() {
        let (plan, emitted) = run("DDDD", 4);
        assert_eq!(emitted, vec![0, 1, 2, 3]);
        assert_eq!(plan.descriptors.len(), 1);
        assert_eq!(plan.descriptors[0].first_sector, 2048);
        assert_eq!(plan.descriptors[0].block_count, 4);
        assert_eq!(plan.elided_blocks(), 0);
    }

    #[test]
    fn test_short_blank_run_is_elided() {
        let (plan, emitted) = run("DD00DD", 2);
        assert_eq!(emitted, vec![0, 1, 4, 5]);
        assert_eq!(plan.descriptors.len(), 2);
        assert_eq!(plan.descriptors[1].first_sector, 2048 + 4 * 8);
        assert_eq!(plan.elided_runs, vec![BlankRun { first_block: 2, blocks: 2 }]);
    }

    #[test]
    fn test_long_blank_run_is_materialized() {
        let (plan, emitted) = run("D000D", 2);
        assert_eq!(emitted, vec![0, 1, 2, 3, 4]);
        assert_eq!(plan.descriptors.len(), 1);
        assert_eq!(plan.descriptors[0].block_count, 5);
        assert!(plan.elided_runs.is_empty());
    }

    #[test]
    fn test_trailing_blank_run_follows_same_policy() {
        let (plan, emitted) = run("DD00", 2);
        assert_eq!(emitted, vec![0, 1]);
        assert_eq!(plan.elided_runs, vec![BlankRun { first_block: 2, blocks: 2 }]);

        let (plan, emitted) = run("DD000", 2);
        assert_eq!(emitted, vec![0, 1, 2, 3, 4]);
        assert!(plan.elided_runs.is_empty());
    }

    #[test]
    fn test_zero_threshold_never_elides() {
        let (plan, emitted) = run("0D0", 0);
        assert_eq!(emitted.len(), 3);
        assert_eq!(plan.descriptors.len(), 1);
    }

    #[test]
    fn test_fully_blank_partition_within_threshold() {
        let (plan, emitted) = run("0000", 4);
        assert!(emitted.is_empty());
        assert!(plan.descriptors.is_empty());
        assert_eq!(plan.elided_blocks(), 4);
    }

    #[test]
    fn test_elided_runs_never_exceed_threshold() {
        let pattern = "D0D00D000D0000D00000D000000";
        for max_blank in 0..8 {
            let (plan, _) = run(pattern, max_blank);
            assert!(plan.longest_elided_run() <= max_blank);
        }
    }

    #[test]
    fn test_descriptors_cover_partition_except_elided() {
        let pattern = "DD0DD00DDD000D";
        let (plan, _) = run(pattern, 2);
        let covered: u64 = plan
            .descriptors
            .iter()
            .map(|d| u64::from(d.block_count))
            .sum();
        assert_eq!(covered + plan.elided_blocks(), pattern.len() as u64);
        assert_eq!(covered, plan.emitted_blocks);
    }

    #[test]
    fn test_empty_partition_yields_nothing() {
        let planner = ChunkPlanner::new(BS as u32, 512, 4);
        let plan = planner
            .plan(&partition(0), Cursor::new(Vec::new()), |_, _| {
                panic!("nothing should be emitted")
            })
            .unwrap();
        assert!(plan.descriptors.is_empty());
        assert_eq!(plan.emitted_blocks, 0);
    }

    #[test]
    fn test_short_stream_is_zero_padded() {
        let mut data = image("DD");
        data.truncate(BS + 100);
        let planner = ChunkPlanner::new(BS as u32, 512, 0);
        let mut blocks = Vec::new();
        planner
            .plan(&partition(3 * BS as u64), Cursor::new(data), |_, bytes| {
                blocks.push(bytes.to_vec());
                Ok(())
            })
            .unwrap();

        assert_eq!(blocks.len(), 3);
        assert!(blocks[1][100..].iter().all(|&b| b == 0));
        assert!(blocks[2].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_alignment_errors() {
        let planner = ChunkPlanner::new(BS as u32, 512, 4);

        let unaligned_size = SourcePartition::new("efi", "basic", 0, 1000);
        assert!(matches!(
            planner.check_alignment(&unaligned_size),
            Err(Error::Alignment { .. })
        ));

        let not_block_multiple = SourcePartition::new("efi", "basic", 0, 512 * 3);
        assert!(matches!(
            planner.check_alignment(&not_block_multiple),
            Err(Error::Alignment { .. })
        ));

        let unaligned_start = SourcePartition::new("efi", "basic", 100, BS as u64);
        assert!(matches!(
            planner.check_alignment(&unaligned_start),
            Err(Error::Alignment { .. })
        ));

        let fine = SourcePartition::new("efi", "basic", 512, BS as u64);
        assert!(planner.check_alignment(&fine).is_ok());
    }

    #[test]
    fn test_cancellation() {
        let flag = Arc::new(AtomicBool::new(true));
        let planner = ChunkPlanner::new(BS as u32, 512, 4).with_cancel_flag(flag);
        let data = image("DD");
        let result = planner.plan(&partition(data.len() as u64), Cursor::new(data), |_, _| Ok(()));
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn test_emit_error_propagates() {
        let planner = ChunkPlanner::new(BS as u32, 512, 4);
        let data = image("DD");
        let result = planner.plan(&partition(data.len() as u64), Cursor::new(data), |_, _| {
            Err(Error::Layout("stop".to_string()))
        });
        assert!(matches!(result, Err(Error::Layout(_))));
    }
}
