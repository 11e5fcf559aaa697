pub mod command;
pub mod config;
pub mod logging;
pub mod service;
pub mod shutdown;

pub use command::{Cli, Command};
pub use config::{Config, ConfigError, LogLevel};
pub use logging::{LoggingError, setup_logging};
pub use service::{Components, ForwarderService, ServiceError, SuspendGate, build_components};
pub use shutdown::ShutdownHandle;

use crate::domain::{LrsError, Statement};
use crate::pipeline::Pipeline;
use crate::reliability::{MetricsExporter, PipelineMetrics};
use anyhow::{Context, bail};
use clap::Parser;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub struct App {
    config: Config,
    command: Command,
}

impl App {
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli = Cli::parse_from(args);
        Ok(Self {
            config: cli.config.resolve()?,
            command: cli.command.unwrap_or(Command::Run),
        })
    }

    pub fn new(config: Config, command: Command) -> Self {
        Self { config, command }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let Components {
            store,
            pipeline,
            metrics,
        } = build_components(&self.config).with_context(|| {
            format!(
                "Failed to start with data directory {}",
                self.config.data_dir.display()
            )
        })?;

        let result = match &self.command {
            Command::Run => self.run_service(pipeline, metrics).await,
            Command::Submit { file } => submit(&pipeline, file),
            Command::Group => {
                let report = pipeline.run_grouping()?;
                println!(
                    "Grouped {} statements into {} batches",
                    report.statements, report.batches
                );
                Ok(())
            }
            Command::Deliver { max_batches } => deliver(&pipeline, *max_batches).await,
            Command::Stats => print_statement_stats(&pipeline),
            Command::Requests => print_request_log(&pipeline),
            Command::TestConnection => test_connection(&pipeline).await,
            Command::Purge { older_than_days } => {
                let report = pipeline.purge(*older_than_days)?;
                println!(
                    "Removed {} statement rows and {} request rows",
                    report.statement_rows, report.request_rows
                );
                Ok(())
            }
        };

        store.flush().await.context("Failed to flush data directory")?;
        result
    }

    async fn run_service(&self, pipeline: Pipeline, metrics: PipelineMetrics) -> anyhow::Result<()> {
        let shutdown = ShutdownHandle::new();
        let signals = shutdown.listen_for_signals();

        let exporter = self.config.metrics.enabled.then(|| {
            tokio::spawn(
                MetricsExporter::new(self.config.metrics.port, metrics).serve(shutdown.token()),
            )
        });

        let service = ForwarderService::new(Arc::new(pipeline), self.config.scheduler.clone());
        info!("lrs-forwarder is running. Press Ctrl+C to stop.");
        service.run(shutdown.token()).await;

        shutdown.trigger();
        if let Err(e) = signals.await {
            warn!(error = %e, "Signal listener ended abnormally");
        }
        if let Some(exporter) = exporter {
            match exporter.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Metrics server failed"),
                Err(e) => warn!(error = %e, "Metrics server task ended abnormally"),
            }
        }

        info!("lrs-forwarder stopped.");
        Ok(())
    }
}

fn read_input(file: &Path) -> anyhow::Result<String> {
    if file == Path::new("-") {
        let mut input = String::new();
        std::io::stdin()
            .read_to_string(&mut input)
            .context("Failed to read statements from stdin")?;
        Ok(input)
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read statements from {}", file.display()))
    }
}

fn submit(pipeline: &Pipeline, file: &Path) -> anyhow::Result<()> {
    let input = read_input(file)?;
    let statements = Statement::parse_many(&input).context("Input is not valid JSON")?;
    let count = pipeline.submit_statements(&statements)?;
    println!("Submitted {count} statements");
    Ok(())
}

async fn deliver(pipeline: &Pipeline, max_batches: usize) -> anyhow::Result<()> {
    let report = pipeline.run_delivery(max_batches).await?;
    println!(
        "Attempted {} batches: {} sent, {} dropped, {} deferred",
        report.attempted, report.sent, report.dropped, report.deferred
    );
    if let Some(reason) = report.suspension {
        bail!("Delivery suspended: {reason}");
    }
    Ok(())
}

fn display_code(code: Option<u16>) -> String {
    code.map_or_else(|| "-".to_string(), |c| c.to_string())
}

fn print_statement_stats(pipeline: &Pipeline) -> anyhow::Result<()> {
    let depths = pipeline.queue_depths()?;
    println!(
        "Queued: {} statements, {} batches",
        depths.statements, depths.batches
    );

    println!("{:<6} {:<32} {:>10}", "code", "reason", "statements");
    for stat in pipeline.statement_statistics()? {
        println!(
            "{:<6} {:<32} {:>10}",
            display_code(stat.code),
            stat.reason,
            stat.total
        );
    }
    Ok(())
}

fn print_request_log(pipeline: &Pipeline) -> anyhow::Result<()> {
    println!("{:<6} {:<32} {:>8}  error", "code", "reason", "requests");
    for stat in pipeline.request_statistics()? {
        println!(
            "{:<6} {:<32} {:>8}  {}",
            display_code(stat.code),
            stat.reason,
            stat.total,
            stat.error
        );
    }

    for entry in pipeline.request_entries()? {
        println!(
            "{} {} {} statements: {}",
            entry.created_at.to_rfc3339(),
            display_code(entry.code),
            entry.count,
            entry.error
        );
    }
    Ok(())
}

async fn test_connection(pipeline: &Pipeline) -> anyhow::Result<()> {
    match pipeline.test_connection().await {
        Ok(response) => {
            println!(
                "Connection to LRS service is working well. Service responded with code {} and message {}.",
                response.status, response.reason
            );
            Ok(())
        }
        Err(e) => {
            if let LrsError::Delivery(delivery) = &e
                && let Some(code) = delivery.status()
            {
                eprintln!(
                    "Service responded with code {code} and message {}.",
                    delivery.reason()
                );
            }
            Err(anyhow::Error::new(e).context("LRS connection test failed"))
        }
    }
}

/// Binary entry point.
pub async fn main() -> anyhow::Result<()> {
    let app = App::from_args(std::env::args_os())?;
    setup_logging(app.config.log_level, app.config.log_json)?;

    info!(version = crate::VERSION, command = ?app.command, "Starting lrs-forwarder");
    app.run().await
}
