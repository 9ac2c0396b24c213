use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indicatif::ProgressBar;
use log::{debug, error, info, warn};

use crate::collector::cursor::{resume_from, IncrementStrategy, RangeCursor};
use crate::collector::rate_limiter::{RateLimitPolicy, RateLimiter};
use crate::data::models::CheckpointKey;
use crate::data::repo::{AddressRepository, RepoError, UpsertOutcome};
use crate::postcode::{Cep, CepRange};
use crate::providers::{LookupOutcome, ProviderChain};
use crate::text::{optional_matches, CityFilter};

pub mod cursor;
pub mod rate_limiter;

pub const DEFAULT_ERROR_THRESHOLD: u32 = 5;
pub const DEFAULT_CHECKPOINT_EVERY: u64 = 25;

/// Pacing of one run: limiter settings plus the soft circuit breaker that
/// kicks in after a streak of codes where every provider failed.
#[derive(Debug, Clone, PartialEq)]
pub struct DelayPolicy {
    pub rate: RateLimitPolicy,
    pub error_threshold: u32,
    pub cooldown: Duration,
}

impl Default for DelayPolicy {
    fn default() -> Self {
        DelayPolicy {
            rate: RateLimitPolicy::default(),
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CollectOptions {
    pub range: CepRange,
    /// Start here instead of resuming from stored progress
    pub start_override: Option<Cep>,
    /// New matching records to persist before stopping
    pub max_results: u64,
    pub city_filter: Option<CityFilter>,
    pub delay: DelayPolicy,
    pub increment: IncrementStrategy,
    /// Save the checkpoint every this many processed codes
    pub checkpoint_every: u64,
}

impl CollectOptions {
    pub fn new(range: CepRange, max_results: u64) -> CollectOptions {
        CollectOptions {
            range,
            start_override: None,
            max_results,
            city_filter: None,
            delay: DelayPolicy::default(),
            increment: IncrementStrategy::default(),
            checkpoint_every: DEFAULT_CHECKPOINT_EVERY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Completed,
    Cancelled,
}

impl Default for RunState {
    fn default() -> Self {
        RunState::Running
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionStats {
    pub processed: u64,
    /// Records persisted in this run
    pub found: u64,
    pub skipped: u64,
    pub errors: u64,
    pub not_found: u64,
    pub other_city: u64,
    /// Rows in the store matching the range and city filter after the run
    pub total_persisted_matching_filter: i64,
    pub last_code: Option<Cep>,
    pub state: RunState,
}

/// Cooperative stop signal, checked once per code.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> CancelFlag {
        CancelFlag::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What happened to a single code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CodeOutcome {
    SkippedExisting,
    NotFound,
    FoundOtherCity,
    FoundAndPersisted,
    AllProvidersFailed,
    StoreFailed,
}

pub struct CollectionRunner {
    repo: Arc<dyn AddressRepository>,
    providers: ProviderChain,
    cancel: CancelFlag,
    progress: ProgressBar,
}

impl CollectionRunner {
    pub fn new(repo: Arc<dyn AddressRepository>, providers: ProviderChain) -> CollectionRunner {
        CollectionRunner {
            repo,
            providers,
            cancel: CancelFlag::new(),
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Scans `options.range` until `max_results` new records are stored,
    /// the range runs out or the run is cancelled.
    ///
    /// Failures on individual codes are counted in the stats and never end
    /// the run. The only error returned is failing to read the resume
    /// position before the first code.
    pub async fn collect(&self, options: CollectOptions) -> Result<CollectionStats, RepoError> {
        let filter = options.city_filter.as_ref();
        let key = CheckpointKey::new(&options.range, filter);

        let start = match options.start_override {
            Some(code) => Some(code),
            None => resume_from(self.repo.as_ref(), &options.range, filter).await?,
        };

        info!(
            "Collecting up to {} addresses in {} (city: {}, providers: {}), starting at {}",
            options.max_results,
            options.range,
            filter.map_or("any", |f| f.raw()),
            self.providers.names().join(" > "),
            start.map_or("<exhausted>".to_string(), |c| c.to_string())
        );

        let mut stats = CollectionStats::default();
        let mut limiter = RateLimiter::new(options.delay.rate.clone());
        let mut cursor = RangeCursor::new(options.increment.clone());
        let mut failure_streak = 0u32;
        // Earliest code of this run that got no answer. The checkpoint never
        // passes it, so a resumed run asks again.
        let mut first_failure: Option<Cep> = None;
        let mut current = start;

        self.progress.set_length(options.max_results);

        while let Some(code) = current.filter(|c| *c <= options.range.end) {
            if stats.found >= options.max_results {
                break;
            }
            if self.cancel.is_cancelled() {
                info!("Collection cancelled before {}", code);
                stats.state = RunState::Cancelled;
                break;
            }

            stats.processed += 1;
            self.progress.set_message(code.to_string());

            let outcome = self.process(code, filter, &mut limiter).await;
            match outcome {
                CodeOutcome::SkippedExisting => stats.skipped += 1,
                CodeOutcome::NotFound => stats.not_found += 1,
                CodeOutcome::FoundOtherCity => stats.other_city += 1,
                CodeOutcome::FoundAndPersisted => {
                    stats.found += 1;
                    self.progress.inc(1);
                }
                CodeOutcome::AllProvidersFailed | CodeOutcome::StoreFailed => stats.errors += 1,
            }

            if matches!(outcome, CodeOutcome::AllProvidersFailed | CodeOutcome::StoreFailed) {
                first_failure.get_or_insert(code);
            }

            match outcome {
                CodeOutcome::AllProvidersFailed => {
                    failure_streak += 1;
                    if failure_streak >= options.delay.error_threshold {
                        warn!(
                            "{} consecutive codes failed on every provider, cooling down for {:?}",
                            failure_streak, options.delay.cooldown
                        );
                        actix_rt::time::sleep(options.delay.cooldown).await;
                        failure_streak = 0;
                    }
                }
                CodeOutcome::NotFound | CodeOutcome::FoundOtherCity | CodeOutcome::FoundAndPersisted => {
                    failure_streak = 0;
                }
                CodeOutcome::SkippedExisting | CodeOutcome::StoreFailed => {}
            }

            stats.last_code = Some(code);
            if options.checkpoint_every > 0 && stats.processed % options.checkpoint_every == 0 {
                self.save_checkpoint(&key, &options.range, code, first_failure).await;
            }

            if outcome != CodeOutcome::SkippedExisting {
                cursor.observe(outcome == CodeOutcome::NotFound);
            }
            current = cursor.next(code);
        }

        if stats.state == RunState::Running {
            stats.state = RunState::Completed;
        }
        if let Some(code) = stats.last_code {
            self.save_checkpoint(&key, &options.range, code, first_failure).await;
        }

        match self.repo.count_in_range(&options.range, filter).await {
            Ok(total) => stats.total_persisted_matching_filter = total,
            Err(err) => error!("Could not count stored addresses: {}", err),
        }

        self.progress.finish_and_clear();
        info!(
            "Collection {:?}: processed {}, found {}, skipped {}, not found {}, other city {}, errors {}, {} stored in range",
            stats.state,
            stats.processed,
            stats.found,
            stats.skipped,
            stats.not_found,
            stats.other_city,
            stats.errors,
            stats.total_persisted_matching_filter
        );

        Ok(stats)
    }

    async fn process(
        &self,
        code: Cep,
        filter: Option<&CityFilter>,
        limiter: &mut RateLimiter,
    ) -> CodeOutcome {
        match self.repo.exists(code).await {
            Ok(true) => {
                debug!("{} already stored, skipping", code);
                return CodeOutcome::SkippedExisting;
            }
            Ok(false) => {}
            Err(err) => {
                error!("Could not check {}: {}", code, err);
                return CodeOutcome::StoreFailed;
            }
        }

        let record = match self.providers.lookup(code, limiter).await {
            LookupOutcome::Found(record) => record,
            LookupOutcome::NotFound => {
                debug!("{} does not exist", code);
                return CodeOutcome::NotFound;
            }
            LookupOutcome::AllProvidersFailed => {
                warn!("Every provider failed for {}", code);
                return CodeOutcome::AllProvidersFailed;
            }
        };

        if !optional_matches(filter, &record.city) {
            info!("{} belongs to {}, not the target city", code, record.city);
            return CodeOutcome::FoundOtherCity;
        }

        let address = record.normalized();
        match self.repo.upsert(&address).await {
            Ok(outcome) => {
                let verb = match outcome {
                    UpsertOutcome::Inserted => "Saved",
                    UpsertOutcome::Updated => "Updated",
                };
                info!(
                    "{} {}: {}, {} - {}/{} (via {})",
                    verb,
                    code,
                    address.record.street,
                    address.record.neighborhood,
                    address.record.city,
                    address.record.state,
                    address.record.source
                );
                CodeOutcome::FoundAndPersisted
            }
            Err(err) => {
                error!("Could not save {}: {}", code, err);
                CodeOutcome::StoreFailed
            }
        }
    }

    async fn save_checkpoint(
        &self,
        key: &CheckpointKey,
        range: &CepRange,
        last_code: Cep,
        first_failure: Option<Cep>,
    ) {
        let code = match checkpoint_target(range, last_code, first_failure) {
            Some(code) => code,
            None => {
                debug!("Checkpoint held, nothing settled in {} before the first failure", range);
                return;
            }
        };
        if let Err(err) = self.repo.save_checkpoint(key, code).await {
            error!("Could not save checkpoint {}: {}", code, err);
        }
    }
}

/// Last code that can be recorded as scanned: `last_code`, or the code just
/// before the first failure of the run. `None` when nothing in `range` is
/// settled yet.
fn checkpoint_target(range: &CepRange, last_code: Cep, first_failure: Option<Cep>) -> Option<Cep> {
    match first_failure {
        None => Some(last_code),
        Some(failed) => failed
            .checked_prev()
            .map(|before| before.min(last_code))
            .filter(|code| *code >= range.start),
    }
}
