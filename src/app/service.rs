use super::config::{Config, ConfigError, SchedulerConfig};
use crate::pipeline::{DeliveryReport, Pipeline};
use crate::reliability::{MetricsError, PipelineMetrics};
use crate::sender::{DeliveryError, LrsClient, LrsService, SettingsHandle, StatementSender};
use crate::store::{Store, StoreError};
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
    #[error("HTTP client error: {0}")]
    Client(#[from] DeliveryError),
    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),
}

/// Everything a command needs, wired from one configuration.
pub struct Components {
    pub store: Store,
    pub pipeline: Pipeline,
    pub metrics: PipelineMetrics,
}

pub fn build_components(config: &Config) -> Result<Components, ServiceError> {
    let store = Store::open(&config.to_store_config())?;
    let metrics = PipelineMetrics::new()?;
    let client = LrsClient::new(config.to_client_config())?;
    let settings = SettingsHandle::new(config.to_lrs_settings());
    let pipeline = Pipeline::open(
        &store,
        client,
        settings,
        config.claim_lease,
        metrics.clone(),
    )?;

    info!(
        data_dir = %config.data_dir.display(),
        configured = config.to_lrs_settings().credentials().is_some(),
        "Pipeline ready"
    );
    Ok(Components {
        store,
        pipeline,
        metrics,
    })
}

/// Holds delivery closed for a cool-down after a suspend signal.
#[derive(Debug)]
pub struct SuspendGate {
    cooldown: Duration,
    suspended_until: Mutex<Option<Instant>>,
}

impl SuspendGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            suspended_until: Mutex::new(None),
        }
    }

    pub fn suspend(&self, reason: &str) {
        let until = Instant::now() + self.cooldown;
        *self.suspended_until.lock() = Some(until);
        warn!(
            %reason,
            cooldown_secs = self.cooldown.as_secs(),
            "Delivery suspended; fix the LRS configuration to resume"
        );
    }

    /// Time left before delivery may run again, `None` once open.
    pub fn remaining(&self) -> Option<Duration> {
        let mut guard = self.suspended_until.lock();
        let until = (*guard)?;
        let now = Instant::now();
        if now >= until {
            *guard = None;
            info!("Suspension cool-down elapsed; resuming delivery");
            None
        } else {
            Some(until - now)
        }
    }

    pub fn is_open(&self) -> bool {
        self.remaining().is_none()
    }

    pub fn resume(&self) {
        *self.suspended_until.lock() = None;
    }
}

/// Periodic grouping, delivery and retention triggers.
pub struct ForwarderService<S = LrsService> {
    pipeline: Arc<Pipeline<S>>,
    scheduler: SchedulerConfig,
    gate: SuspendGate,
}

impl<S: StatementSender> ForwarderService<S> {
    pub fn new(pipeline: Arc<Pipeline<S>>, scheduler: SchedulerConfig) -> Self {
        let gate = SuspendGate::new(scheduler.suspend_cooldown);
        Self {
            pipeline,
            scheduler,
            gate,
        }
    }

    pub fn gate(&self) -> &SuspendGate {
        &self.gate
    }

    /// Runs the triggers until `shutdown` is cancelled.
    ///
    /// A delivery run in progress is allowed to finish before returning.
    pub async fn run(&self, shutdown: CancellationToken) {
        let start_delay = jitter(
            self.scheduler
                .grouping_interval
                .min(self.scheduler.delivery_interval),
        );
        debug!(delay_ms = start_delay.as_millis() as u64, "Delaying first tick");
        tokio::select! {
            () = tokio::time::sleep(start_delay) => {}
            () = shutdown.cancelled() => return,
        }

        let mut grouping = interval(self.scheduler.grouping_interval);
        grouping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut delivery = interval(self.scheduler.delivery_interval);
        delivery.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut retention = interval(self.scheduler.retention_interval);
        retention.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            grouping_interval_secs = self.scheduler.grouping_interval.as_secs(),
            delivery_interval_secs = self.scheduler.delivery_interval.as_secs(),
            "Forwarder started"
        );

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = grouping.tick() => self.grouping_tick(),
                _ = delivery.tick() => {
                    self.delivery_tick().await;
                }
                _ = retention.tick() => self.retention_tick(),
            }
        }

        info!("Forwarder stopped");
    }

    pub fn grouping_tick(&self) {
        if let Err(e) = self.pipeline.run_grouping() {
            error!(error = %e, "Grouping failed");
        }
    }

    /// Returns `None` when the tick was skipped or failed.
    pub async fn delivery_tick(&self) -> Option<DeliveryReport> {
        if let Some(remaining) = self.gate.remaining() {
            debug!(remaining_secs = remaining.as_secs(), "Delivery suspended; skipping tick");
            return None;
        }

        match self
            .pipeline
            .run_delivery(self.scheduler.max_batches_per_run)
            .await
        {
            Ok(report) => {
                if let Some(reason) = &report.suspension {
                    self.gate.suspend(reason);
                }
                Some(report)
            }
            Err(e) => {
                error!(error = %e, "Delivery run aborted; operator follow-up required");
                None
            }
        }
    }

    pub fn retention_tick(&self) {
        if self.scheduler.retention_days == 0 {
            return;
        }
        if let Err(e) = self.pipeline.purge(self.scheduler.retention_days) {
            error!(error = %e, "Outcome log retention failed");
        }
    }
}

/// Random delay in `[0, max / 2]` so workers started together drift apart.
fn jitter(max: Duration) -> Duration {
    let ceiling = (max.as_millis() / 2) as u64;
    if ceiling == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=ceiling))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Statement;
    use crate::sender::{ClientConfig, LrsSettings};

    fn service(cooldown: Duration) -> ForwarderService {
        let store = Store::temporary().unwrap();
        let pipeline = Pipeline::open(
            &store,
            LrsClient::new(ClientConfig::default()).unwrap(),
            SettingsHandle::new(LrsSettings::default()),
            Duration::from_secs(60),
            PipelineMetrics::new().unwrap(),
        )
        .unwrap();
        ForwarderService::new(
            Arc::new(pipeline),
            SchedulerConfig {
                suspend_cooldown: cooldown,
                ..SchedulerConfig::default()
            },
        )
    }

    #[test]
    fn test_gate_reopens_after_cooldown() {
        let gate = SuspendGate::new(Duration::from_millis(20));
        assert!(gate.is_open());

        gate.suspend("401 Unauthorized");
        assert!(!gate.is_open());

        std::thread::sleep(Duration::from_millis(30));
        assert!(gate.is_open());
    }

    #[test]
    fn test_gate_resume_is_immediate() {
        let gate = SuspendGate::new(Duration::from_secs(3600));
        gate.suspend("missing configuration");
        gate.resume();
        assert!(gate.is_open());
    }

    #[test]
    fn test_jitter_is_bounded() {
        assert_eq!(jitter(Duration::ZERO), Duration::ZERO);
        for _ in 0..100 {
            assert!(jitter(Duration::from_secs(60)) <= Duration::from_secs(30));
        }
    }

    #[tokio::test]
    async fn test_missing_configuration_closes_gate() {
        let service = service(Duration::from_secs(3600));
        service
            .pipeline
            .submit_statement(&Statement::from_json(r#"{"id":"a"}"#).unwrap())
            .unwrap();

        service.grouping_tick();
        let report = service.delivery_tick().await.unwrap();
        assert!(report.is_suspended());
        assert!(!service.gate().is_open());

        // skipped while suspended, batch still queued
        assert!(service.delivery_tick().await.is_none());
        assert_eq!(service.pipeline.queue_depths().unwrap().batches, 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let service = service(Duration::from_secs(1));
        let token = CancellationToken::new();
        token.cancel();
        service.run(token).await;
    }
}
