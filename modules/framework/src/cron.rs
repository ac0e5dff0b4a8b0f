use kanau::processor::Processor;
use std::fmt::Display;
use std::marker::PhantomData;
use std::time::Duration;
use time::PrimitiveDateTime;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::info;

/// Ask a scanner for the work of job `J` that is due at `now`.
#[derive(Debug)]
pub struct ScanAt<J> {
    pub now: PrimitiveDateTime,
    _job: PhantomData<fn() -> J>,
}

impl<J> ScanAt<J> {
    pub fn new(now: PrimitiveDateTime) -> Self {
        Self {
            now,
            _job: PhantomData,
        }
    }
}

impl<J> Clone for ScanAt<J> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<J> Copy for ScanAt<J> {}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobReport {
    pub processed: usize,
    pub failed: usize,
}

impl JobReport {
    /// Count one unit of work, logging it when it failed.
    pub fn record<T, E: Display>(&mut self, result: &Result<T, E>) {
        match result {
            Ok(_) => self.processed += 1,
            Err(e) => {
                tracing::error!("{e}");
                self.failed += 1;
            }
        }
    }
}

pub trait OneGoScheduledJob: Sized + Send {
    /// After each `CLOCK_LOOPS` intervals, the job will be executed
    const CLOCK_LOOPS: u64 = 1;
    const NAME: &'static str;

    /// Executes the whole batch found by the scanner
    type Executor: Processor<Self, Output = JobReport, Error = crate::Error> + Send + Sync;

    /// Reads the due work from the database
    type Scanner: Processor<ScanAt<Self>, Output = Self, Error = crate::Error> + Send + Sync;

    fn is_empty(&self) -> bool;
}

pub fn is_due<T: OneGoScheduledJob>(clock_loop: u64) -> bool {
    clock_loop % T::CLOCK_LOOPS.max(1) == 0
}

pub async fn cron_one_go<T: OneGoScheduledJob>(
    scanner: &T::Scanner,
    executor: &T::Executor,
    now: PrimitiveDateTime,
) -> Result<JobReport, crate::Error> {
    let jobs = scanner.process(ScanAt::new(now)).await?;
    if jobs.is_empty() {
        return Ok(JobReport::default());
    }
    let report = executor.process(jobs).await?;
    info!(
        monotonic_counter.cron_execute = 1,
        job = T::NAME,
        processed = report.processed,
        failed = report.failed
    );
    Ok(report)
}

/// Drive `tick` every `period` until `shutdown` flips to `true` or its sender is dropped.
pub async fn run_clock<F, Fut>(period: Duration, mut shutdown: watch::Receiver<bool>, mut tick: F)
where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut clock_loop = 0u64;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                tick(clock_loop).await;
                clock_loop = clock_loop.wrapping_add(1);
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Clock stopped after {clock_loop} loops");
                    break;
                }
            }
        }
    }
}
