//! # Polling Scheduler
//!
//! Background task that finds enabled polling trigger instances whose
//! `next_poll_at` has passed and runs them through the [`TriggerRuntime`].
//! The runtime reschedules each instance with a jittered interval so that
//! instances enabled together drift apart.

use chrono::{DateTime, TimeDelta, Utc};
use metrics::{counter, gauge, histogram};
use rand::Rng;
use tokio::time::{Duration as TokioDuration, Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::repositories::TriggerInstanceRepository;
use crate::runtime::TriggerRuntime;

/// Background scheduler service.
pub struct PollingScheduler {
    runtime: TriggerRuntime,
    instances: TriggerInstanceRepository,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickStats {
    pub instances_polled: u64,
    pub polls_failed: u64,
    pub events_emitted: u64,
}

impl PollingScheduler {
    pub fn new(runtime: TriggerRuntime, db: sea_orm::DatabaseConnection) -> Self {
        Self {
            runtime,
            instances: TriggerInstanceRepository::new(db),
        }
    }

    /// Run the scheduler loop until the provided shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Starting polling scheduler");
        let tick_interval =
            TokioDuration::from_secs(self.runtime.config().polling.tick_interval_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Polling scheduler shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    let tick_started = Instant::now();
                    if let Err(err) = self.tick(Utc::now()).await {
                        error!(error = %err, "Scheduler tick failed");
                    }
                    histogram!("trigger_scheduler_tick_duration_ms")
                        .record(tick_started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Polling scheduler stopped");
    }

    /// Poll every instance due at `now`, up to the configured batch size.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickStats, sea_orm::DbErr> {
        let batch_size = self.runtime.config().polling.batch_size;
        let due = self.instances.due_for_poll(now, batch_size).await?;
        gauge!("trigger_scheduler_due_instances").set(due.len() as f64);

        let mut stats = TickStats::default();
        for instance in due {
            let id = instance.id;
            let piece = instance.piece_name.clone();
            let trigger = instance.trigger_name.clone();
            let labels = [("piece", piece.clone()), ("trigger", trigger.clone())];

            let started = Instant::now();
            let result = self.runtime.poll_instance(instance).await;
            histogram!("trigger_poll_duration_ms", &labels)
                .record(started.elapsed().as_secs_f64() * 1_000.0);
            counter!("trigger_polls_total", &labels).increment(1);
            stats.instances_polled += 1;

            match result {
                Ok(events) => {
                    stats.events_emitted += events.len() as u64;
                    debug!(
                        instance_id = %id,
                        piece = %piece,
                        trigger = %trigger,
                        events = events.len(),
                        "Scheduled poll completed"
                    );
                }
                Err(err) => {
                    stats.polls_failed += 1;
                    counter!("trigger_poll_failures_total", &labels).increment(1);
                    warn!(
                        instance_id = %id,
                        piece = %piece,
                        trigger = %trigger,
                        error = %err,
                        "Scheduled poll failed"
                    );
                }
            }
        }

        if stats.instances_polled > 0 {
            debug!(
                polled = stats.instances_polled,
                failed = stats.polls_failed,
                events = stats.events_emitted,
                "Scheduler tick completed"
            );
        }

        Ok(stats)
    }
}

/// `now + interval`, stretched by a random fraction up to `jitter_pct_max`
pub fn next_poll_after(now: DateTime<Utc>, interval_seconds: u64, jitter_pct_max: f64) -> DateTime<Utc> {
    let mut rng = rand::thread_rng();
    let jitter = compute_jitter_seconds(interval_seconds, jitter_pct_max, &mut rng);
    let total = i64::try_from(interval_seconds.saturating_add(jitter)).unwrap_or(i64::MAX);
    TimeDelta::try_seconds(total)
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn compute_jitter_seconds<R: Rng + ?Sized>(
    interval_seconds: u64,
    jitter_pct_max: f64,
    rng: &mut R,
) -> u64 {
    let max = jitter_pct_max.clamp(0.0, 1.0);
    if max == 0.0 {
        return 0;
    }
    let pct = rng.gen_range(0.0..=max);
    (interval_seconds as f64 * pct).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn jitter_respects_bounds() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        for _ in 0..100 {
            let jitter = compute_jitter_seconds(900, 0.2, &mut rng);
            assert!(jitter <= 180);
        }
    }

    #[test]
    fn jitter_zero_when_disabled() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        assert_eq!(compute_jitter_seconds(900, 0.0, &mut rng), 0);
        assert_eq!(compute_jitter_seconds(900, -1.0, &mut rng), 0);
    }

    #[test]
    fn next_poll_is_at_least_one_interval_away() {
        let now = DateTime::parse_from_rfc3339("2025-01-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let next = next_poll_after(now, 300, 0.1);
        let delta = (next - now).num_seconds();
        assert!((300..=330).contains(&delta));
    }

    #[test]
    fn next_poll_saturates_instead_of_overflowing() {
        let now = Utc::now();
        assert_eq!(next_poll_after(now, u64::MAX, 0.5), DateTime::<Utc>::MAX_UTC);
    }
}
