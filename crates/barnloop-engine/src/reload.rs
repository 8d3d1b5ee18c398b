//! Configuration hot reload.
//!
//! [`ConfigWatcher`] polls the modification time of the config file. When
//! it changes, the file is parsed and validated as a whole and each running
//! zone receives its new snapshot through its [`ZoneHandle`]. A file that
//! fails to parse or validate is ignored and every zone keeps its current
//! configuration.
//!
//! Zones cannot be started or stopped by a reload, and engine settings
//! only take effect on restart.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use barnloop_core::config::{ConfigError, ControllerConfig};
use barnloop_core::operator::OperatorState;
use barnloop_core::runner::ZoneHandle;
use tracing::{debug, info, warn};

/// Outcome of applying a new file to the running zones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReloadReport {
    /// Zones whose snapshot was replaced.
    pub reloaded: usize,
    /// Zones whose configuration was unchanged.
    pub unchanged: usize,
    /// Zones that rejected their new configuration.
    pub rejected: usize,
    /// Zones in the file that are not running.
    pub ignored: usize,
}

/// Polls a config file for modifications.
#[derive(Debug)]
pub struct ConfigWatcher {
    path: PathBuf,
    last_modified: Option<SystemTime>,
}

impl ConfigWatcher {
    /// Watch `path`, treating its current state as already applied.
    pub async fn new(path: &Path) -> Self {
        let last_modified = modified(path).await;
        Self {
            path: path.to_path_buf(),
            last_modified,
        }
    }

    /// The watched path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the file if it changed since the last check.
    ///
    /// Returns `Ok(None)` when the file is unchanged or missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the changed file cannot be read, parsed or
    /// validated. The change is not retried until the file changes again.
    pub async fn check(&mut self) -> Result<Option<ControllerConfig>, ConfigError> {
        let Some(current) = modified(&self.path).await else {
            return Ok(None);
        };
        if self.last_modified == Some(current) {
            return Ok(None);
        }
        self.last_modified = Some(current);
        let contents = tokio::fs::read_to_string(&self.path).await?;
        ControllerConfig::parse(&contents).map(Some)
    }
}

async fn modified(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}

/// Hand every zone of `config` to its running zone.
pub fn apply(config: &ControllerConfig, zones: &[ZoneHandle]) -> ReloadReport {
    let mut report = ReloadReport::default();
    for zone in &config.zones {
        let Some(handle) = zones.iter().find(|h| h.zone_id() == &zone.id) else {
            warn!(zone = %zone.id, "zone added to config is not started until restart");
            report.ignored = report.ignored.saturating_add(1);
            continue;
        };
        match handle.reload(zone.clone()) {
            Ok(true) => report.reloaded = report.reloaded.saturating_add(1),
            Ok(false) => report.unchanged = report.unchanged.saturating_add(1),
            Err(_) => report.rejected = report.rejected.saturating_add(1),
        }
    }
    for handle in zones {
        if config.zone(handle.zone_id()).is_none() {
            warn!(zone = %handle.zone_id(), "zone removed from config keeps running until restart");
        }
    }
    report
}

/// Poll `watcher` every `interval` until a stop is requested.
pub async fn watch_config(
    mut watcher: ConfigWatcher,
    interval: Duration,
    zones: Vec<ZoneHandle>,
    operator: &OperatorState,
) {
    info!(path = %watcher.path().display(), interval_ms = interval.as_millis(), "Config watcher started");
    loop {
        tokio::select! {
            () = operator.stopped() => break,
            () = tokio::time::sleep(interval) => {}
        }
        match watcher.check().await {
            Ok(Some(config)) => {
                let report = apply(&config, &zones);
                info!(
                    reloaded = report.reloaded,
                    unchanged = report.unchanged,
                    rejected = report.rejected,
                    ignored = report.ignored,
                    "Config file change applied"
                );
            }
            Ok(None) => debug!("config file unchanged"),
            Err(e) => warn!(error = %e, "config file change rejected, keeping previous"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use barnloop_core::config::{EngineConfig, ZoneConfig};
    use barnloop_core::runner::spawn_zones;
    use barnloop_core::sinks::{MemoryKnowledge, Sinks, TracingExecutor};
    use barnloop_types::{Metric, ZoneId};

    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("barnloop-{name}-{}.yaml", std::process::id()))
    }

    fn touch(path: &Path, contents: &str, secs: u64) {
        std::fs::write(path, contents).unwrap();
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
            .unwrap();
    }

    #[tokio::test]
    async fn detects_changes_and_rejects_bad_files() {
        let path = temp_path("watch");
        touch(&path, "engine:\n  seed: 1\n", 1_000);
        let mut watcher = ConfigWatcher::new(&path).await;
        assert!(watcher.check().await.unwrap().is_none());

        touch(&path, "engine:\n  seed: 2\n", 2_000);
        let config = watcher.check().await.unwrap().unwrap();
        assert_eq!(config.engine.seed, 2);
        assert!(watcher.check().await.unwrap().is_none());

        touch(&path, "engine:\n  analysis_interval_ms: 0\n", 3_000);
        assert!(watcher.check().await.is_err());
        // Not retried until the file changes again.
        assert!(watcher.check().await.unwrap().is_none());

        std::fs::remove_file(&path).unwrap();
        assert!(watcher.check().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn applies_zone_snapshots_to_running_zones() {
        let config = ControllerConfig {
            engine: EngineConfig {
                tick_interval_ms: 100,
                analysis_interval_ms: 100,
                ..EngineConfig::default()
            },
            ..ControllerConfig::default()
        };
        let operator = Arc::new(OperatorState::new(100, 0));
        let sinks = Sinks {
            plans: Arc::new(TracingExecutor),
            knowledge: Arc::new(MemoryKnowledge::new(10)),
        };
        let runtime = spawn_zones(&config, &operator, &sinks).unwrap();
        let zones = runtime.handles().to_vec();

        let mut next = config.clone();
        if let Some(goal) = next
            .zones
            .first_mut()
            .and_then(|z| z.goals.get_mut(&Metric::Temperature))
        {
            goal.setpoint = 24.0;
        }
        next.zones.push(ZoneConfig {
            id: ZoneId::from("zone2"),
            ..ZoneConfig::default()
        });

        let report = apply(&next, &zones);
        assert_eq!(report.reloaded, 1);
        assert_eq!(report.ignored, 1);
        let snapshot = zones.first().unwrap().config().snapshot();
        assert!((snapshot.goals.get(&Metric::Temperature).unwrap().setpoint - 24.0).abs() < f64::EPSILON);

        let report = apply(&next, &zones);
        assert_eq!(report.unchanged, 1);

        operator.request_stop();
        runtime.join(&operator).await.unwrap();
    }
}
