//! # Background Service
//!
//! Supervised background loops around the [`Engine`]:
//!
//! - **tick loop**: one engine tick per interval. Each tick runs in its own
//!   task so a panic surfaces as a `JoinError`, is logged, and is followed by
//!   the shorter retry delay instead of ending the loop.
//! - **duty sampler**: a short-period loop that samples servo outputs while
//!   the vehicle is armed.
//! - **forwarder**: pushes the latest metrics from the tick loop onto the
//!   vehicle bus. Fed through a `watch` channel so a slow bus never delays a
//!   tick and stale metric sets are skipped.
//!
//! Every loop exits when the shutdown channel flips to `true`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::engine::Engine;
use crate::telemetry::forwarder::{forward, ForwardedMetrics};
use crate::telemetry::TelemetrySource;

/// Latest metrics published by the tick loop.
pub type MetricsReceiver = watch::Receiver<Option<ForwardedMetrics>>;

pub struct Service {
    engine: Arc<Engine>,
    source: Arc<dyn TelemetrySource>,
    config: Config,
}

impl Service {
    pub fn new(engine: Arc<Engine>, source: Arc<dyn TelemetrySource>, config: Config) -> Self {
        Self { engine, source, config }
    }

    /// Spawn every enabled loop. Join the handles after signalling shutdown.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let (metrics_tx, metrics_rx) = watch::channel(None);
        let mut handles = Vec::new();

        handles.push(tokio::spawn(run_ticks(
            self.engine.clone(),
            self.source.clone(),
            self.config.engine.tick_interval(),
            self.config.engine.retry_delay(),
            metrics_tx,
            shutdown.clone(),
        )));

        if self.config.sampler.enabled {
            handles.push(tokio::spawn(run_sampler(
                self.engine.clone(),
                self.source.clone(),
                Duration::from_secs(self.config.sampler.interval_s),
                shutdown.clone(),
            )));
        }

        if self.config.telemetry.forward_enabled {
            handles.push(tokio::spawn(run_forwarder(self.source.clone(), metrics_rx, shutdown)));
        }

        handles
    }
}

/// Sleep for `delay`, returning `true` if shutdown was signalled first.
async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = sleep(delay) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

pub async fn run_ticks(
    engine: Arc<Engine>,
    source: Arc<dyn TelemetrySource>,
    interval: Duration,
    retry_delay: Duration,
    metrics: watch::Sender<Option<ForwardedMetrics>>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Tick loop started ({}s interval)", interval.as_secs());

    loop {
        let task = {
            let engine = engine.clone();
            let source = source.clone();
            tokio::spawn(async move { engine.tick(source.as_ref()).await })
        };

        let delay = match task.await {
            Ok(report) => {
                metrics.send_replace(Some(report.metrics));
                interval
            }
            Err(e) => {
                error!("Tick failed: {}; retrying in {}s", e, retry_delay.as_secs());
                retry_delay
            }
        };

        if wait_or_shutdown(delay, &mut shutdown).await {
            break;
        }
    }

    info!("Tick loop stopped");
}

pub async fn run_sampler(
    engine: Arc<Engine>,
    source: Arc<dyn TelemetrySource>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Duty sampler started ({}s interval)", interval.as_secs());

    loop {
        let task = {
            let engine = engine.clone();
            let source = source.clone();
            tokio::spawn(async move { engine.sample(source.as_ref()).await })
        };
        if let Err(e) = task.await {
            error!("Duty sample failed: {}", e);
        }

        if wait_or_shutdown(interval, &mut shutdown).await {
            break;
        }
    }

    info!("Duty sampler stopped");
}

pub async fn run_forwarder(
    source: Arc<dyn TelemetrySource>,
    mut metrics: MetricsReceiver,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = metrics.changed() => {
                if changed.is_err() {
                    debug!("Metrics channel closed");
                    break;
                }
                let latest = metrics.borrow_and_update().clone();
                if let Some(latest) = latest {
                    forward(source.as_ref(), &latest).await;
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    info!("Forwarder stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::{config_in, reading};
    use crate::telemetry::mocks::ScriptedSource;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_wait_returns_on_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        assert!(wait_or_shutdown(Duration::from_secs(3600), &mut rx).await);
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let (_tx, mut rx) = watch::channel(false);
        assert!(!wait_or_shutdown(Duration::from_millis(5), &mut rx).await);
    }

    #[tokio::test]
    async fn test_loops_tick_forward_and_stop() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.engine.tick_interval_s = 3600;
        config.sampler.interval_s = 3600;

        let engine = Arc::new(Engine::open(&config).unwrap());
        let source = ScriptedSource::new(vec![reading(16.0, 100.0, true)]);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handles = Service::new(engine.clone(), Arc::new(source.clone()), config).spawn(shutdown_rx);
        assert_eq!(handles.len(), 3);

        // The first tick runs immediately; wait for its metrics to be forwarded.
        for _ in 0..200 {
            if source.pushed().len() >= 7 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }

        shutdown_tx.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(engine.stats().total_minutes, 1);
        let pushed = source.pushed();
        assert_eq!(pushed.len(), 7);
        assert_eq!(pushed[0], ("ODO_UPTM".to_string(), 1.0));
    }

    #[tokio::test]
    async fn test_disabled_loops_not_spawned() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.sampler.enabled = false;
        config.telemetry.forward_enabled = false;

        let engine = Arc::new(Engine::open(&config).unwrap());
        let source: Arc<dyn TelemetrySource> = Arc::new(ScriptedSource::new(vec![]));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handles = Service::new(engine, source, config).spawn(shutdown_rx);
        assert_eq!(handles.len(), 1);

        shutdown_tx.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
