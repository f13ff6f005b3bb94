use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Timelike, Utc};
use tokio::time::{self, Duration as TokioDuration};
use tracing::{debug, info};

/// Wall-clock cadence of a background job, read in a fixed UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    DailyAt { hour: u32, minute: u32 },
    HourlyAt { minute: u32 },
}

impl Cadence {
    /// key: schedule-next-fire -> first fire time strictly after `now`
    pub fn next_fire(&self, now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
        let local = now.with_timezone(&offset);
        match *self {
            Cadence::DailyAt { hour, minute } => {
                let at = NaiveTime::from_hms_opt(hour.min(23), minute.min(59), 0)
                    .unwrap_or_default();
                let today = offset
                    .from_local_datetime(&local.date_naive().and_time(at))
                    .single()
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or(now);
                if today > now {
                    today
                } else {
                    today + Duration::days(1)
                }
            }
            Cadence::HourlyAt { minute } => {
                let minute = minute.min(59);
                let hour_start = local
                    .with_minute(0)
                    .and_then(|dt| dt.with_second(0))
                    .and_then(|dt| dt.with_nanosecond(0))
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or(now);
                let candidate = hour_start + Duration::minutes(i64::from(minute));
                if candidate > now {
                    candidate
                } else {
                    candidate + Duration::hours(1)
                }
            }
        }
    }
}

/// Keeps one run of a job in flight at a time.
#[derive(Debug, Clone, Default)]
pub struct TickGuard {
    running: Arc<AtomicBool>,
}

/// Held while a run is in progress; releases the guard on drop.
#[derive(Debug)]
pub struct TickPermit {
    running: Arc<AtomicBool>,
}

impl TickGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<TickPermit> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TickPermit {
                running: self.running.clone(),
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for TickPermit {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// key: schedule-spawn -> run `job` once at startup, then on every cadence tick
pub fn spawn_job<F, Fut>(
    name: &'static str,
    cadence: Cadence,
    offset: FixedOffset,
    guard: TickGuard,
    job: F,
) where
    F: Fn(DateTime<Utc>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        info!(job = name, ?cadence, "scheduler started");
        run_guarded(name, &guard, &job, Utc::now()).await;
        loop {
            let now = Utc::now();
            let next = cadence.next_fire(now, offset);
            let wait = (next - now)
                .to_std()
                .unwrap_or_else(|_| TokioDuration::from_secs(1));
            debug!(job = name, next_fire = %next, "scheduler sleeping");
            time::sleep(wait).await;
            run_guarded(name, &guard, &job, Utc::now()).await;
        }
    });
}

async fn run_guarded<F, Fut>(name: &'static str, guard: &TickGuard, job: &F, now: DateTime<Utc>)
where
    F: Fn(DateTime<Utc>) -> Fut,
    Fut: Future<Output = ()>,
{
    match guard.try_acquire() {
        Some(_permit) => job(now).await,
        None => info!(job = name, "previous run still in progress; tick skipped"),
    }
}
