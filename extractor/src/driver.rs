use std::{collections::BTreeSet, fmt, num::NonZeroUsize, str::FromStr, sync::Arc, time::Duration};

use error_stack::{Report, ResultExt};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::error::{ExtractError, Result};
use crate::processor::{RangeHandler, RangeSummary};
use crate::provider::NodeClient;
use crate::range::{partition, BlockRange};
use crate::store::TransactionStore;

pub const DEFAULT_THREADS: usize = 15;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(300);

/// Where a run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockStart {
    /// One past the highest block in the destination table.
    #[default]
    Auto,
    Block(u64),
}

/// Number of ranges processed concurrently. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadBudget(NonZeroUsize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Running(ThreadBudget),
    Degraded(ThreadBudget),
    /// Down to one worker. The next failure ends the run.
    Floor,
    Failed,
    Completed,
}

#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub block_start: BlockStart,
    pub batch_size: u64,
    pub threads: ThreadBudget,
    /// Pause after a round that lost a range.
    pub cooldown: Duration,
    pub table_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// First block of the run.
    pub resume_point: u64,
    /// Chain head when the run started.
    pub latest_block: u64,
    pub ranges: usize,
    pub rows: u64,
}

/// Drives a whole extraction run over a degrading worker pool.
pub struct ExtractionDriver {
    node: Arc<dyn NodeClient>,
    store: Arc<dyn TransactionStore>,
    handler: Arc<dyn RangeHandler>,
    options: DriverOptions,
    state: DriverState,
}

struct RoundOutcome {
    completed: Vec<RangeSummary>,
    failure: Option<Report<ExtractError>>,
}

impl ExtractionDriver {
    pub fn new(
        node: Arc<dyn NodeClient>,
        store: Arc<dyn TransactionStore>,
        handler: Arc<dyn RangeHandler>,
        options: DriverOptions,
    ) -> Self {
        let state = DriverState::Running(options.threads);
        Self {
            node,
            store,
            handler,
            options,
            state,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub async fn resume_point(&self) -> Result<u64> {
        match self.options.block_start {
            BlockStart::Block(block) => Ok(block),
            BlockStart::Auto => {
                let max = self
                    .store
                    .max_block_number(&self.options.table_name)
                    .await
                    .change_context(ExtractError::Store)
                    .attach_printable("failed to resolve the resume point")?;

                match max {
                    None => Ok(0),
                    Some(block) => block
                        .checked_add(1)
                        .ok_or(ExtractError::Fatal)
                        .attach_printable("highest loaded block is u64::MAX"),
                }
            }
        }
    }

    /// Extract `[resume point, chain head]`.
    ///
    /// The chain head is read once. If a range is given up the pool loses a
    /// worker and, after the cooldown, every unfinished range is dispatched
    /// again. With a single worker left, the failure ends the run.
    pub async fn run(&mut self) -> Result<RunSummary> {
        let resume_point = self.resume_point().await?;

        let latest_block = self
            .node
            .latest_block_number()
            .await
            .change_context(ExtractError::Fetch)
            .attach_printable("failed to get the chain head")?;

        let ranges = partition(resume_point, latest_block, self.options.batch_size);
        info!(
            resume_point,
            latest_block,
            ranges = ranges.len(),
            threads = self.options.threads.get(),
            "starting extraction"
        );

        let mut pending = ranges.iter().copied().collect::<BTreeSet<_>>();
        let mut rows = 0;
        let mut budget = self.options.threads;

        loop {
            let outstanding = pending.iter().copied().collect::<Vec<_>>();
            let outcome = self.run_round(&outstanding, budget).await;

            for summary in outcome.completed {
                pending.remove(&summary.range);
                rows += summary.upserted;
            }

            let Some(failure) = outcome.failure else {
                self.state = DriverState::Completed;
                info!(ranges = ranges.len(), rows, "extraction completed");
                return Ok(RunSummary {
                    resume_point,
                    latest_block,
                    ranges: ranges.len(),
                    rows,
                });
            };

            let loaded = last_contiguous_block(resume_point, &ranges, &pending);

            let Some(degraded) = budget.degrade() else {
                self.state = DriverState::Failed;
                error!(pending = pending.len(), ?loaded, "extraction failed");
                let err = failure
                    .change_context(ExtractError::RetriesExhausted)
                    .attach_printable("range failed with a single worker left");
                return match loaded {
                    Some(block) => Err(err
                        .attach_printable(format!("last contiguous loaded block: {block}"))),
                    None => Err(err.attach_printable("no block was loaded")),
                };
            };

            budget = degraded;
            self.state = if budget.is_floor() {
                DriverState::Floor
            } else {
                DriverState::Degraded(budget)
            };

            warn!(
                threads = budget.get(),
                pending = pending.len(),
                ?loaded,
                cooldown = ?self.options.cooldown,
                "range failed, reducing workers"
            );
            tokio::time::sleep(self.options.cooldown).await;
        }
    }

    /// Dispatch `ranges` in order. Stops dispatching at the first failure
    /// and waits for the ranges already running.
    async fn run_round(&self, ranges: &[BlockRange], budget: ThreadBudget) -> RoundOutcome {
        let mut queue = ranges.iter().copied();
        let mut tasks = JoinSet::new();
        let mut completed = Vec::new();
        let mut failure: Option<Report<ExtractError>> = None;

        loop {
            while failure.is_none() && tasks.len() < budget.get() {
                let Some(range) = queue.next() else {
                    break;
                };
                let handler = self.handler.clone();
                tasks.spawn(async move { (range, handler.process(range).await) });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };

            match joined {
                Ok((_, Ok(summary))) => completed.push(summary),
                Ok((range, Err(err))) => {
                    error!(%range, error = ?err, "range given up");
                    if failure.is_none() {
                        failure = Some(err);
                    }
                }
                Err(err) => {
                    let err = Report::new(err)
                        .change_context(ExtractError::Fatal)
                        .attach_printable("range task panicked");
                    error!(error = ?err, "range task failed");
                    if failure.is_none() {
                        failure = Some(err);
                    }
                }
            }
        }

        RoundOutcome { completed, failure }
    }
}

/// End of the completed prefix of `ranges`, or `None` if the first range is unfinished.
fn last_contiguous_block(
    resume_point: u64,
    ranges: &[BlockRange],
    pending: &BTreeSet<BlockRange>,
) -> Option<u64> {
    let loaded = ranges
        .iter()
        .take_while(|range| !pending.contains(range))
        .last()
        .map(|range| range.end());

    loaded.or_else(|| resume_point.checked_sub(1))
}

impl ThreadBudget {
    pub fn new(threads: usize) -> Option<Self> {
        NonZeroUsize::new(threads).map(Self)
    }

    pub fn get(&self) -> usize {
        self.0.get()
    }

    pub fn is_floor(&self) -> bool {
        self.0.get() == 1
    }

    /// One worker fewer, or `None` at the floor.
    pub fn degrade(&self) -> Option<Self> {
        Self::new(self.0.get() - 1)
    }
}

impl Default for ThreadBudget {
    fn default() -> Self {
        Self(NonZeroUsize::MIN.saturating_add(DEFAULT_THREADS - 1))
    }
}

impl FromStr for ThreadBudget {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let threads = s
            .parse::<usize>()
            .map_err(|err| format!("invalid thread count: {err}"))?;
        Self::new(threads).ok_or_else(|| "thread count must be at least 1".to_string())
    }
}

impl fmt::Display for ThreadBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BlockStart {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auto") {
            return Ok(BlockStart::Auto);
        }

        s.parse::<u64>()
            .map(BlockStart::Block)
            .map_err(|_| format!("expected `auto` or a block number, got `{s}`"))
    }
}

impl fmt::Display for BlockStart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockStart::Auto => write!(f, "auto"),
            BlockStart::Block(block) => write!(f, "{block}"),
        }
    }
}
