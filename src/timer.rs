//! Interval timer driving break checks
//!
//! A scheduled job is a tokio task that sends its job id on the tick channel
//! once per period. The core unschedules the job on its first tick and
//! schedules a new one when the break is over, so in practice each job fires
//! once.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant};
use tracing::debug;

// Job ids are unique across timers so a tick queued by a timer that was shut
// down can never be mistaken for a tick of its replacement.
static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct ScheduledJob {
    id: u64,
    fires_at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

/// Periodic timer owned by the break core
#[derive(Debug)]
pub struct IntervalTimer {
    period: Duration,
    ticks: mpsc::UnboundedSender<u64>,
    job: Option<ScheduledJob>,
}

impl IntervalTimer {
    /// Create a timer that reports ticks on `ticks`
    pub fn new(period: Duration, ticks: mpsc::UnboundedSender<u64>) -> Self {
        Self {
            period,
            ticks,
            job: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Change the period used by the next `schedule`; a pending job keeps its own
    pub fn set_period(&mut self, period: Duration) {
        self.period = period;
    }

    /// Schedule a job firing one period from now, replacing any pending job
    pub fn schedule(&mut self) -> u64 {
        self.unschedule();

        let id = NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed);
        let period = self.period;
        let ticks = self.ticks.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if ticks.send(id).is_err() {
                    break;
                }
            }
        });

        let fires_at = Utc::now()
            + chrono::Duration::from_std(period).unwrap_or_else(|_| chrono::Duration::zero());
        self.job = Some(ScheduledJob {
            id,
            fires_at,
            handle,
        });
        debug!("Scheduled job {} in {:?}", id, period);
        id
    }

    /// Cancel the pending job; returns whether one was scheduled
    pub fn unschedule(&mut self) -> bool {
        match self.job.take() {
            Some(job) => {
                job.handle.abort();
                debug!("Unscheduled job {}", job.id);
                true
            }
            None => false,
        }
    }

    /// Id of the pending job, if any
    pub fn current_job(&self) -> Option<u64> {
        self.job.as_ref().map(|job| job.id)
    }

    pub fn is_scheduled(&self) -> bool {
        self.job.is_some()
    }

    /// Wall-clock time the pending job is due
    pub fn next_fire_at(&self) -> Option<DateTime<Utc>> {
        self.job.as_ref().map(|job| job.fires_at)
    }

    /// Unschedule any pending job and drop the timer
    pub fn shutdown(mut self) {
        self.unschedule();
    }
}

impl Drop for IntervalTimer {
    fn drop(&mut self) {
        if let Some(job) = self.job.take() {
            job.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_job_fires_after_period() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = IntervalTimer::new(Duration::from_secs(60), tx);

        let start = Instant::now();
        let id = timer.schedule();
        assert!(timer.is_scheduled());
        assert_eq!(timer.current_job(), Some(id));

        assert_eq!(rx.recv().await, Some(id));
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unscheduled_job_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = IntervalTimer::new(Duration::from_secs(60), tx);

        timer.schedule();
        assert!(timer.unschedule());
        assert!(!timer.is_scheduled());
        assert!(!timer.unschedule());

        let result = timeout(Duration::from_secs(600), rx.recv()).await;
        assert!(result.is_err(), "no tick expected after unschedule");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_pending_job() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = IntervalTimer::new(Duration::from_secs(60), tx);

        let first = timer.schedule();
        let second = timer.schedule();
        assert_ne!(first, second);
        assert_eq!(timer.current_job(), Some(second));

        assert_eq!(rx.recv().await, Some(second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_period_applies_to_next_schedule() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = IntervalTimer::new(Duration::from_secs(60), tx);
        timer.set_period(Duration::from_secs(600));
        assert_eq!(timer.period(), Duration::from_secs(600));

        let start = Instant::now();
        let id = timer.schedule();
        assert_eq!(rx.recv().await, Some(id));
        assert!(start.elapsed() >= Duration::from_secs(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_ticks() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = IntervalTimer::new(Duration::from_secs(1), tx);
        timer.schedule();
        assert!(timer.next_fire_at().is_some());
        timer.shutdown();

        let result = timeout(Duration::from_secs(10), rx.recv()).await;
        // Channel is closed once the job task is gone, or nothing arrives.
        assert!(matches!(result, Ok(None) | Err(_)));
    }
}
