use std::fmt;

use error_stack::ResultExt;

use crate::error::{ExtractError, Result};

pub const DEFAULT_BATCH_SIZE: u64 = 250;

/// An inclusive span of block numbers, processed as one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockRange {
    start: u64,
    end: u64,
}

impl BlockRange {
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start > end {
            return Err(ExtractError::Configuration)
                .attach_printable_lazy(|| format!("invalid block range: {start} > {end}"));
        }

        Ok(Self { start, end })
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn block_count(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn blocks(&self) -> impl Iterator<Item = u64> {
        self.start..=self.end
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Split `[first, last]` into consecutive ranges of `batch_size` blocks.
///
/// The last range may be shorter. Returns no ranges if `first > last`.
pub fn partition(first: u64, last: u64, batch_size: u64) -> Vec<BlockRange> {
    let batch_size = batch_size.max(1);
    let mut ranges = Vec::new();

    let mut start = first;
    while start <= last {
        let end = start.saturating_add(batch_size - 1).min(last);
        ranges.push(BlockRange { start, end });

        match end.checked_add(1) {
            Some(next) => start = next,
            None => break,
        }
    }

    ranges
}
