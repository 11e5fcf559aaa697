#[cfg(feature = "metrics")]
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::net::SocketAddr;
#[cfg(feature = "metrics")]
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[cfg(feature = "metrics")]
use warp::{Filter, Reply};

#[derive(Error, Debug)]
pub enum MetricsError {
    #[cfg(feature = "metrics")]
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
    #[error("HTTP server error: {0}")]
    Http(String),
}

/// Delivery pipeline counters. Cloning shares the underlying registry.
#[derive(Clone)]
pub struct PipelineMetrics {
    #[cfg(feature = "metrics")]
    registry: Arc<Registry>,
    #[cfg(feature = "metrics")]
    statements_submitted: IntCounter,
    #[cfg(feature = "metrics")]
    batches_created: IntCounter,
    #[cfg(feature = "metrics")]
    batch_outcomes: IntCounterVec,
    #[cfg(feature = "metrics")]
    delivery_latency: Histogram,
    #[cfg(feature = "metrics")]
    queue_depth: IntGaugeVec,
}

impl PipelineMetrics {
    #[cfg(feature = "metrics")]
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Arc::new(Registry::new());

        let statements_submitted = IntCounter::new(
            "lrs_statements_submitted_total",
            "Statements accepted into the statement queue",
        )?;
        registry.register(Box::new(statements_submitted.clone()))?;

        let batches_created = IntCounter::new(
            "lrs_batches_created_total",
            "Batches grouped from the statement queue",
        )?;
        registry.register(Box::new(batches_created.clone()))?;

        let batch_outcomes = IntCounterVec::new(
            Opts::new("lrs_batch_outcomes_total", "Batch delivery attempts by outcome"),
            &["outcome"], // sent, dropped, deferred, suspended
        )?;
        registry.register(Box::new(batch_outcomes.clone()))?;

        let delivery_latency = Histogram::with_opts(HistogramOpts::new(
            "lrs_delivery_latency_seconds",
            "Time spent delivering one batch",
        ))?;
        registry.register(Box::new(delivery_latency.clone()))?;

        let queue_depth = IntGaugeVec::new(
            Opts::new("lrs_queue_depth", "Items waiting in each queue"),
            &["queue"],
        )?;
        registry.register(Box::new(queue_depth.clone()))?;

        Ok(Self {
            registry,
            statements_submitted,
            batches_created,
            batch_outcomes,
            delivery_latency,
            queue_depth,
        })
    }

    #[cfg(not(feature = "metrics"))]
    pub fn new() -> Result<Self, MetricsError> {
        Ok(Self {})
    }

    pub fn record_submitted(&self, count: usize) {
        #[cfg(feature = "metrics")]
        self.statements_submitted.inc_by(count as u64);
        #[cfg(not(feature = "metrics"))]
        let _ = count;
    }

    pub fn record_batches_created(&self, count: usize) {
        #[cfg(feature = "metrics")]
        self.batches_created.inc_by(count as u64);
        #[cfg(not(feature = "metrics"))]
        let _ = count;
    }

    pub fn record_outcome(&self, outcome: &str, latency: Duration) {
        #[cfg(feature = "metrics")]
        {
            self.batch_outcomes.with_label_values(&[outcome]).inc();
            self.delivery_latency.observe(latency.as_secs_f64());
        }
        #[cfg(not(feature = "metrics"))]
        let _ = (outcome, latency);
    }

    pub fn set_queue_depth(&self, queue: &str, depth: usize) {
        #[cfg(feature = "metrics")]
        self.queue_depth
            .with_label_values(&[queue])
            .set(depth as i64);
        #[cfg(not(feature = "metrics"))]
        let _ = (queue, depth);
    }

    /// Attempts recorded for `outcome` so far.
    pub fn outcome_count(&self, outcome: &str) -> u64 {
        #[cfg(feature = "metrics")]
        {
            self.batch_outcomes.with_label_values(&[outcome]).get()
        }
        #[cfg(not(feature = "metrics"))]
        {
            let _ = outcome;
            0
        }
    }

    #[cfg(feature = "metrics")]
    pub fn export(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    #[cfg(not(feature = "metrics"))]
    pub fn export(&self) -> Result<String, MetricsError> {
        Ok("# Metrics disabled\n".to_string())
    }
}

impl std::fmt::Debug for PipelineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineMetrics").finish_non_exhaustive()
    }
}

/// Serves `/metrics` and `/health` until cancelled.
pub struct MetricsExporter {
    addr: SocketAddr,
    metrics: PipelineMetrics,
}

impl MetricsExporter {
    pub fn new(port: u16, metrics: PipelineMetrics) -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], port)),
            metrics,
        }
    }

    #[cfg(feature = "metrics")]
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), MetricsError> {
        let metrics = self.metrics.clone();

        let export = warp::path!("metrics")
            .and(warp::get())
            .map(move || match metrics.export() {
                Ok(text) => {
                    warp::reply::with_header(text, "content-type", "text/plain; version=0.0.4")
                        .into_response()
                }
                Err(_) => warp::reply::with_status(
                    "Internal Server Error",
                    warp::http::StatusCode::INTERNAL_SERVER_ERROR,
                )
                .into_response(),
            });

        let health = warp::path!("health").and(warp::get()).map(|| "OK");

        let (addr, server) = warp::serve(export.or(health))
            .try_bind_with_graceful_shutdown(self.addr, async move {
                shutdown.cancelled().await;
            })
            .map_err(|e| MetricsError::Http(e.to_string()))?;

        tracing::info!(%addr, "Metrics server listening");
        server.await;
        Ok(())
    }

    #[cfg(not(feature = "metrics"))]
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), MetricsError> {
        tracing::warn!(addr = %self.addr, "Metrics feature is disabled");
        let _ = (self.metrics, shutdown);
        Ok(())
    }
}
