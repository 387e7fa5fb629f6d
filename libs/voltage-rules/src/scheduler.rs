//! Rule Scheduler - Periodic rule execution and sync sweeps
//!
//! Every tick runs the enabled rules whose `interval_ms` has elapsed and the
//! full pattern sweep of every enabled sync rule with an `interval_ms`. Due
//! times follow the store clock, so a manual clock drives the scheduler in
//! tests.

use crate::executor::{RuleExecutor, RuleOutcome};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use voltage_rtdb::Rtdb;
use voltage_sync::SyncEngine;

/// Default scheduler tick interval (100ms)
pub const DEFAULT_TICK_MS: u64 = 100;

/// Keys fetched per SCAN page during a sync sweep
pub const DEFAULT_SWEEP_PAGE: usize = 100;

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub rules_executed: usize,
    pub rules_failed: usize,
    pub syncs_run: usize,
    pub syncs_failed: usize,
}

/// Scheduler status information
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub tick_interval_ms: u64,
    /// Jobs that have run at least once
    pub tracked_jobs: usize,
}

/// Drives interval rules and sync sweeps
pub struct RuleScheduler<R: Rtdb> {
    executor: RuleExecutor<R>,
    sync: SyncEngine<R>,
    /// Job key (`rule:{id}` / `sync:{id}`) -> last run, store clock millis
    last_run: Mutex<FxHashMap<String, i64>>,
    shutdown: Arc<Notify>,
    running: Arc<AtomicBool>,
    tick_ms: u64,
    sweep_page: usize,
}

impl<R: Rtdb + 'static> RuleScheduler<R> {
    pub fn new(executor: RuleExecutor<R>, sync: SyncEngine<R>, tick_ms: u64) -> Self {
        Self {
            executor,
            sync,
            last_run: Mutex::new(FxHashMap::default()),
            shutdown: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(false)),
            tick_ms: tick_ms.max(1),
            sweep_page: DEFAULT_SWEEP_PAGE,
        }
    }

    pub fn with_sweep_page(mut self, page: usize) -> Self {
        self.sweep_page = page.max(1);
        self
    }

    /// Start the scheduler loop; returns after [`RuleScheduler::stop`]
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already running");
            return;
        }
        info!("Starting rule scheduler with {}ms tick", self.tick_ms);

        let mut tick_interval = interval(Duration::from_millis(self.tick_ms));
        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    let report = self.tick();
                    if report.rules_executed + report.syncs_run > 0 {
                        debug!("Scheduler tick: {:?}", report);
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("Scheduler received shutdown signal");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("Rule scheduler stopped");
    }

    /// Stop the scheduler
    pub fn stop(&self) {
        info!("Stopping rule scheduler...");
        self.shutdown.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.is_running(),
            tick_interval_ms: self.tick_ms,
            tracked_jobs: self.last_run.lock().len(),
        }
    }

    /// Run every job that is due now
    pub fn tick(&self) -> TickReport {
        let now = self.executor.rtdb().now_millis();
        let mut report = TickReport::default();
        // Scheduled jobs seen this tick; `None` when their listing failed
        let mut live_rules = None;
        let mut live_syncs = None;

        match self.executor.repository().load_enabled_rules() {
            Ok(rules) => {
                let live = live_rules.insert(FxHashSet::default());
                for rule in rules {
                    let Some(interval_ms) = rule.interval_ms else {
                        continue;
                    };
                    let job = format!("rule:{}", rule.id);
                    live.insert(job.clone());
                    if !self.claim(job, now, interval_ms) {
                        continue;
                    }
                    match self.executor.execute_rule(&rule.id) {
                        Ok(execution) => {
                            if !matches!(execution.outcome, RuleOutcome::Disabled { .. }) {
                                report.rules_executed += 1;
                            }
                        },
                        Err(e) => {
                            error!("Rule {} execution error: {}", rule.id, e);
                            report.rules_failed += 1;
                        },
                    }
                }
            },
            Err(e) => error!("Scheduler could not load rules: {}", e),
        }

        match self.sync.config_list() {
            Ok(configs) => {
                let live = live_syncs.insert(FxHashSet::default());
                for config in configs.into_iter().filter(|c| c.enabled) {
                    let Some(interval_ms) = config.interval_ms else {
                        continue;
                    };
                    let job = format!("sync:{}", config.rule_id);
                    live.insert(job.clone());
                    if !self.claim(job, now, interval_ms) {
                        continue;
                    }
                    match self.sync.sweep(&config.rule_id, self.sweep_page) {
                        Ok(totals) => {
                            debug!(
                                "Sync sweep {}: {} synced, {} failed",
                                config.rule_id, totals.synced, totals.failed
                            );
                            report.syncs_run += 1;
                        },
                        Err(e) => {
                            error!("Sync sweep {} error: {}", config.rule_id, e);
                            report.syncs_failed += 1;
                        },
                    }
                }
            },
            Err(e) => error!("Scheduler could not load sync rules: {}", e),
        }

        self.forget_unscheduled(live_rules.as_ref(), live_syncs.as_ref());
        report
    }

    /// Drop run times of deleted, disabled or unscheduled jobs
    fn forget_unscheduled(
        &self,
        live_rules: Option<&FxHashSet<String>>,
        live_syncs: Option<&FxHashSet<String>>,
    ) {
        self.last_run.lock().retain(|job, _| {
            let live = if job.starts_with("rule:") {
                live_rules
            } else {
                live_syncs
            };
            live.map_or(true, |live| live.contains(job))
        });
    }

    /// Mark a job as run when it is due; failed runs count as runs
    fn claim(&self, job: String, now: i64, interval_ms: u64) -> bool {
        let mut last_run = self.last_run.lock();
        let due = last_run
            .get(&job)
            .map_or(true, |last| {
                now.saturating_sub(*last) >= i64::try_from(interval_ms).unwrap_or(i64::MAX)
            });
        if due {
            last_run.insert(job, now);
        }
        due
    }
}
