//! # Sync Scheduler
//!
//! Optional background task that triggers a reconciliation pass on a
//! jittered interval. The pass gate keeps scheduled and HTTP-triggered runs
//! from overlapping: a tick that finds the gate held skips this interval.

use std::sync::Arc;

use metrics::{counter, histogram};
use rand::Rng;
use tokio::time::{Duration as TokioDuration, Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::SchedulerConfig;
use crate::sync::{SyncEngine, SyncGate};

/// Background scheduler service.
pub struct SyncScheduler {
    config: SchedulerConfig,
    engine: Arc<SyncEngine>,
    gate: Arc<SyncGate>,
}

impl SyncScheduler {
    /// Create a new scheduler instance.
    pub fn new(config: SchedulerConfig, engine: Arc<SyncEngine>, gate: Arc<SyncGate>) -> Self {
        Self {
            config,
            engine,
            gate,
        }
    }

    /// Run the scheduler loop until the provided shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_seconds = self.config.interval_seconds,
            "Starting sync scheduler"
        );

        loop {
            let wait = self.jittered_interval();
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Sync scheduler shutdown requested");
                    break;
                }
                _ = sleep(wait) => {
                    self.tick().await;
                }
            }
        }

        info!("Sync scheduler stopped");
    }

    async fn tick(&self) {
        let Some(_permit) = self.gate.try_acquire() else {
            debug!("a sync pass is already running; skipping this interval");
            counter!("sync_ticks_skipped_total").increment(1);
            return;
        };

        let started = Instant::now();
        match self.engine.run_pass().await {
            Ok(summary) => {
                debug!(
                    created = summary.created,
                    skipped = summary.skipped,
                    failed = summary.failed,
                    "scheduled sync pass finished"
                );
            }
            Err(err) => {
                // The pass aborted; the watermark is untouched and the next
                // interval retries.
                error!(error = %err, "scheduled sync pass aborted");
            }
        }
        histogram!("sync_pass_duration_ms").record(started.elapsed().as_secs_f64() * 1_000.0);
    }

    /// Base interval stretched by a random jitter percentage, avoiding
    /// thundering-herd fetches when several instances share a feed.
    fn jittered_interval(&self) -> TokioDuration {
        let base = self.config.interval_seconds as f64;
        let (min_pct, max_pct) = (self.config.jitter_pct_min, self.config.jitter_pct_max);
        let jitter_pct = if max_pct > min_pct {
            rand::thread_rng().gen_range(min_pct..max_pct)
        } else {
            min_pct
        };
        let total = base * (1.0 + jitter_pct);
        if !total.is_finite() || total <= 0.0 {
            warn!(interval = total, "invalid scheduler interval; using base");
            return TokioDuration::from_secs(self.config.interval_seconds);
        }
        TokioDuration::from_secs_f64(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::sync::{EngineOptions, Tables};
    use crate::watermark::WatermarkStore;

    fn test_scheduler(config: SchedulerConfig) -> SyncScheduler {
        let timeout = std::time::Duration::from_secs(1);
        let feed = crate::trendyol::TrendyolClient::new(
            "http://127.0.0.1:1",
            "1",
            "k",
            "s",
            crate::trendyol::FeedEndpoint::Orders,
            crate::trendyol::AuthStyle::Basic,
            timeout,
        )
        .unwrap();
        let store =
            crate::airtable::AirtableClient::new("http://127.0.0.1:1", "app", "tok", timeout)
                .unwrap();
        let engine = Arc::new(SyncEngine::new(
            feed,
            store,
            WatermarkStore::new("unused-watermark.json"),
            Tables {
                orders: "Orders".into(),
                customers: "Customers".into(),
                inventory: "Inventory".into(),
            },
            EngineOptions {
                page_size: 50,
                max_pages: 20,
                lookback_hours: 24,
                sales_channel: "Trendyol".into(),
                initial_watermark_ms: None,
            },
        ));
        SyncScheduler::new(config, engine, Arc::new(SyncGate::new()))
    }

    #[test]
    fn jitter_stays_within_configured_band() {
        let scheduler = test_scheduler(SchedulerConfig {
            enabled: true,
            interval_seconds: 100,
            jitter_pct_min: 0.0,
            jitter_pct_max: 0.2,
        });

        for _ in 0..50 {
            let wait = scheduler.jittered_interval();
            assert!(wait >= TokioDuration::from_secs(100), "wait {wait:?}");
            assert!(wait <= TokioDuration::from_secs(120), "wait {wait:?}");
        }
    }

    #[test]
    fn zero_jitter_band_uses_min() {
        let scheduler = test_scheduler(SchedulerConfig {
            enabled: true,
            interval_seconds: 60,
            jitter_pct_min: 0.0,
            jitter_pct_max: 0.0,
        });
        assert_eq!(scheduler.jittered_interval(), TokioDuration::from_secs(60));
    }

    #[tokio::test]
    async fn shutdown_token_stops_the_loop() {
        let scheduler = test_scheduler(SchedulerConfig {
            enabled: true,
            interval_seconds: 3600,
            jitter_pct_min: 0.0,
            jitter_pct_max: 0.0,
        });

        let token = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(token.clone()));
        token.cancel();
        handle.await.unwrap();
    }
}
