//! Concurrency scheduling: run document pipelines in fixed-size groups.
//!
//! ## Why groups with a barrier instead of a sliding window?
//!
//! The service enforces per-account throughput limits that are easiest to
//! respect in bursts: submit `concurrency_limit` documents, wait until every
//! one of them is terminal, pause for `inter_batch_delay`, repeat. A sliding
//! window (`buffer_unordered`) would keep the account saturated and trade
//! that pause for more 429 answers. Group size 1 degenerates into a plain
//! sequential loop.
//!
//! No task is ever spawned: a group is a `join_all` over borrowed futures,
//! so at most `concurrency_limit` pipelines exist at any instant and all of
//! them are finished when the group's future resolves.

use crate::clock::SharedSleeper;
use crate::output::Outcome;
use crate::pipeline::discover::Document;
use crate::pipeline::job::DocumentPipeline;
use crate::progress::ProgressCallback;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cooperative stop request shared between the caller and a running batch.
///
/// Once raised, the group in flight finishes normally and no further group
/// is dispatched.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        if !self.0.swap(true, Ordering::SeqCst) {
            info!("Stop requested; finishing the current group");
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What the scheduler did with the documents it was given.
#[derive(Debug, Default)]
pub struct ScheduleReport {
    /// Outcomes in dispatch order.
    pub outcomes: Vec<Outcome>,
    /// Documents never started because of a stop request.
    pub not_dispatched: usize,
    pub stopped_early: bool,
    /// Groups actually launched.
    pub groups_run: usize,
}

/// Runs pipelines in groups of at most `concurrency_limit`.
pub struct Scheduler {
    concurrency_limit: usize,
    inter_batch_delay: Duration,
    sleeper: SharedSleeper,
    stop: StopSignal,
    progress: Option<ProgressCallback>,
}

impl Scheduler {
    pub fn new(
        concurrency_limit: usize,
        inter_batch_delay: Duration,
        sleeper: SharedSleeper,
        stop: StopSignal,
    ) -> Self {
        Self {
            concurrency_limit: concurrency_limit.max(1),
            inter_batch_delay,
            sleeper,
            stop,
            progress: None,
        }
    }

    pub fn with_progress(mut self, cb: Option<ProgressCallback>) -> Self {
        self.progress = cb;
        self
    }

    /// Run every document through `pipeline`, calling `on_outcome` as each
    /// one finishes. Never retries.
    pub async fn run<P>(
        &self,
        documents: &[Document],
        pipeline: &P,
        on_outcome: &(dyn Fn(&Outcome) + Sync),
    ) -> ScheduleReport
    where
        P: DocumentPipeline + ?Sized,
    {
        if self.concurrency_limit == 1 {
            self.process_sequential(documents, pipeline, on_outcome).await
        } else {
            self.process_concurrent(documents, pipeline, on_outcome).await
        }
    }

    /// One document at a time.
    async fn process_sequential<P>(
        &self,
        documents: &[Document],
        pipeline: &P,
        on_outcome: &(dyn Fn(&Outcome) + Sync),
    ) -> ScheduleReport
    where
        P: DocumentPipeline + ?Sized,
    {
        let mut report = ScheduleReport::default();
        let total = documents.len();

        for (i, doc) in documents.iter().enumerate() {
            if i > 0 {
                self.sleeper.sleep(self.inter_batch_delay).await;
            }
            if self.stop.is_stop_requested() {
                report.stopped_early = true;
                report.not_dispatched = total - i;
                warn!("Stopped before {} of {} documents", total - i, total);
                break;
            }
            if let Some(cb) = &self.progress {
                cb.on_group_start(i + 1, total, 1);
            }
            debug!("[{}/{}] {}", i + 1, total, doc.display_name());

            let outcome = pipeline.process(doc).await;
            on_outcome(&outcome);
            report.outcomes.push(outcome);
            report.groups_run += 1;
        }
        report
    }

    /// Groups of `concurrency_limit`, each awaited in full before the next.
    async fn process_concurrent<P>(
        &self,
        documents: &[Document],
        pipeline: &P,
        on_outcome: &(dyn Fn(&Outcome) + Sync),
    ) -> ScheduleReport
    where
        P: DocumentPipeline + ?Sized,
    {
        let mut report = ScheduleReport::default();
        let groups: Vec<&[Document]> = documents.chunks(self.concurrency_limit).collect();
        let group_count = groups.len();

        for (g, group) in groups.iter().enumerate() {
            if g > 0 {
                self.sleeper.sleep(self.inter_batch_delay).await;
            }
            if self.stop.is_stop_requested() {
                report.stopped_early = true;
                report.not_dispatched = groups[g..].iter().map(|grp| grp.len()).sum();
                warn!(
                    "Stopped before group {}/{}; {} documents not dispatched",
                    g + 1,
                    group_count,
                    report.not_dispatched
                );
                break;
            }

            info!("Group {}/{}: {} documents", g + 1, group_count, group.len());
            if let Some(cb) = &self.progress {
                cb.on_group_start(g + 1, group_count, group.len());
            }

            let outcomes = join_all(group.iter().map(|doc| async move {
                let outcome = pipeline.process(doc).await;
                on_outcome(&outcome);
                outcome
            }))
            .await;

            report.outcomes.extend(outcomes);
            report.groups_run += 1;
        }
        report
    }
}
