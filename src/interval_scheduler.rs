//! Fixed-interval scheduler
//!
//! Starts a full batch over every configured source each `interval_hours`.
//! The first tick comes one interval after the schedule is enabled (or
//! changed); `run_on_startup` adds an immediate run when the scheduler starts.
//! A tick that finds another run active is skipped and logged, never queued.
//!
//! Last and next run times are published on a watch channel and persisted in
//! the runtime state table so they survive restarts.

use crate::batch::{BatchRunner, WorkUnit};
use crate::config::ScheduleConfig;
use crate::db::{Database, ScheduleTimes};
use crate::types::{RunTrigger, Source};
use crate::watcher::{WallClock, system_clock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Live scheduler inputs, swapped on configuration reload
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScheduleSettings {
    /// Interval and startup behaviour
    pub schedule: ScheduleConfig,
    /// Sources included in every scheduled run
    pub sources: Vec<Source>,
}

impl ScheduleSettings {
    fn interval(&self) -> Duration {
        // An interval below one hour is treated as one hour
        self.schedule.interval().max(Duration::from_secs(3600))
    }
}

/// Interval trigger into the batch runner
pub struct IntervalScheduler {
    runner: BatchRunner,
    settings_rx: watch::Receiver<ScheduleSettings>,
    db: Option<Database>,
    clock: WallClock,
    times_tx: watch::Sender<ScheduleTimes>,
}

impl IntervalScheduler {
    /// Create a scheduler; `db` persists last/next run times when present
    pub fn new(runner: BatchRunner, settings_rx: watch::Receiver<ScheduleSettings>, db: Option<Database>) -> Self {
        let (times_tx, _) = watch::channel(ScheduleTimes::default());
        Self {
            runner,
            settings_rx,
            db,
            clock: system_clock(),
            times_tx,
        }
    }

    /// Replace the wall clock
    pub fn with_clock(mut self, clock: WallClock) -> Self {
        self.clock = clock;
        self
    }

    /// Receiver of the current last/next run times
    pub fn times_receiver(&self) -> watch::Receiver<ScheduleTimes> {
        self.times_tx.subscribe()
    }

    /// Run until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        let mut settings_rx = self.settings_rx.clone();
        let mut settings = settings_rx.borrow_and_update().clone();
        let mut settings_open = true;

        let mut times = match &self.db {
            Some(db) => db.get_schedule_times().await.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to load schedule times");
                ScheduleTimes::default()
            }),
            None => ScheduleTimes::default(),
        };

        tracing::info!(
            enabled = settings.schedule.enabled,
            interval_hours = settings.schedule.interval_hours,
            "Interval scheduler started"
        );

        if settings.schedule.enabled && settings.schedule.run_on_startup {
            tracing::info!("Starting run on scheduler startup");
            self.tick(&settings, &mut times);
        }

        let mut next_tick = self.arm(&settings, &mut times).await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep_until_or_forever(next_tick) => {
                    self.tick(&settings, &mut times);
                    let interval = settings.interval();
                    next_tick = next_tick.map(|at| at + interval);
                    times.next_run = Some((self.clock)() + to_chrono(interval));
                    self.store(&times).await;
                }
                changed = settings_rx.changed(), if settings_open => {
                    match changed {
                        Ok(()) => {
                            let updated = settings_rx.borrow_and_update().clone();
                            let rearm = updated.schedule != settings.schedule;
                            settings = updated;
                            if rearm {
                                tracing::info!(
                                    enabled = settings.schedule.enabled,
                                    interval_hours = settings.schedule.interval_hours,
                                    "Schedule changed"
                                );
                                next_tick = self.arm(&settings, &mut times).await;
                            }
                        }
                        Err(_) => settings_open = false,
                    }
                }
            }
        }

        tracing::info!("Interval scheduler stopped");
    }

    /// Compute the first tick for `settings` and persist the next run time
    async fn arm(&self, settings: &ScheduleSettings, times: &mut ScheduleTimes) -> Option<Instant> {
        let next_tick = if settings.schedule.enabled {
            let interval = settings.interval();
            times.next_run = Some((self.clock)() + to_chrono(interval));
            Some(Instant::now() + interval)
        } else {
            times.next_run = None;
            None
        };
        self.store(times).await;
        next_tick
    }

    fn tick(&self, settings: &ScheduleSettings, times: &mut ScheduleTimes) {
        if settings.sources.is_empty() {
            tracing::info!("Scheduled run skipped; no sources configured");
            return;
        }

        let units: Vec<WorkUnit> = settings.sources.iter().cloned().map(WorkUnit::new).collect();
        match self.runner.start(RunTrigger::Scheduled, &units) {
            Ok(guard) => {
                tracing::info!(run_id = %guard.run_id(), sources = units.len(), "Scheduled run started");
                times.last_run = Some((self.clock)());
                let runner = self.runner.clone();
                tokio::spawn(async move {
                    runner.execute(guard, units).await;
                });
            }
            Err(busy) => {
                tracing::info!(active_run = %busy.run_id, "Scheduled run skipped; run already active");
            }
        }
    }

    async fn store(&self, times: &ScheduleTimes) {
        if let Some(db) = &self.db
            && let Err(e) = db.set_schedule_times(times).await
        {
            tracing::error!(error = %e, "Failed to persist schedule times");
        }
        self.times_tx.send_replace(times.clone());
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

async fn sleep_until_or_forever(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
