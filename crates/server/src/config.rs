//! Bridge settings: defaults, `bridge.toml`, then environment overrides.

use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use serde::Deserialize;
use shared::domain::EventKind;
use url::Url;

use crate::{pubsub::ResubscribePolicy, watcher::WatchSpec};

const SETTINGS_FILE: &str = "bridge";

/// One row of the watch table: which key to poll, how to tag its events and
/// how often to read it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WatchedKeyConfig {
    pub key: String,
    pub kind: EventKind,
    pub poll_interval_ms: u64,
}

impl WatchedKeyConfig {
    fn new(key: &str, kind: EventKind, poll_interval_ms: u64) -> Self {
        Self {
            key: key.into(),
            kind,
            poll_interval_ms,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bind_addr: String,
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_password: Option<String>,
    pub estop_channel: String,
    pub watched_keys: Vec<WatchedKeyConfig>,
    pub send_timeout_ms: u64,
    pub outbound_queue_depth: usize,
    pub resubscribe_attempts: u32,
    pub resubscribe_backoff_ms: u64,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:4000".into(),
            redis_host: "127.0.0.1".into(),
            redis_port: 6379,
            redis_password: None,
            estop_channel: "ESTOP".into(),
            watched_keys: vec![
                WatchedKeyConfig::new("controller_status", EventKind::ControllerStatus, 1000),
                WatchedKeyConfig::new("drone_status", EventKind::DroneStatus, 1000),
                WatchedKeyConfig::new("flight_mode", EventKind::FlightMode, 100),
            ],
            send_timeout_ms: 2000,
            outbound_queue_depth: 64,
            resubscribe_attempts: 5,
            resubscribe_backoff_ms: 500,
            log_filter: "info".into(),
        }
    }
}

impl Settings {
    pub fn redis_url(&self) -> anyhow::Result<String> {
        let mut url = Url::parse(&format!("redis://{}:{}/0", self.redis_host, self.redis_port))
            .with_context(|| format!("invalid redis host '{}'", self.redis_host))?;
        if let Some(password) = self.redis_password.as_deref().filter(|p| !p.is_empty()) {
            url.set_password(Some(password))
                .map_err(|()| anyhow!("redis url for '{}' cannot carry a password", self.redis_host))?;
        }
        Ok(url.into())
    }

    pub fn watch_table(&self) -> Vec<WatchSpec> {
        self.watched_keys
            .iter()
            .map(|entry| WatchSpec {
                key: entry.key.clone(),
                kind: entry.kind,
                interval: Duration::from_millis(entry.poll_interval_ms),
            })
            .collect()
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn resubscribe_policy(&self) -> ResubscribePolicy {
        ResubscribePolicy {
            attempts: self.resubscribe_attempts,
            backoff: Duration::from_millis(self.resubscribe_backoff_ms),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.estop_channel.trim().is_empty() {
            bail!("estop_channel must not be empty");
        }
        if self.outbound_queue_depth == 0 {
            bail!("outbound_queue_depth must be at least 1");
        }
        if self.send_timeout_ms == 0 {
            bail!("send_timeout_ms must be at least 1");
        }
        for (index, entry) in self.watched_keys.iter().enumerate() {
            if entry.poll_interval_ms == 0 {
                bail!("watched key '{}' has a zero poll interval", entry.key);
            }
            if self.watched_keys[..index].iter().any(|e| e.key == entry.key) {
                bail!("watched key '{}' is listed twice", entry.key);
            }
        }
        Ok(())
    }
}

/// Loads settings once: defaults, then `bridge.toml` (optional), then
/// `APP__*` environment variables, then the dashboard's `REDIS_*` variables.
pub fn load_settings() -> anyhow::Result<Settings> {
    let settings: Settings = config::Config::builder()
        .add_source(config::File::with_name(SETTINGS_FILE).required(false))
        .add_source(config::Environment::with_prefix("APP").separator("__"))
        .build()
        .context("failed to read bridge settings")?
        .try_deserialize()
        .context("invalid bridge settings")?;

    let settings = apply_legacy_env(settings, |name| std::env::var(name).ok())?;
    settings.validate()?;
    Ok(settings)
}

fn apply_legacy_env(
    mut settings: Settings,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Settings> {
    if let Some(v) = lookup("REDIS_HOST") {
        settings.redis_host = v;
    }
    if let Some(v) = lookup("REDIS_PORT") {
        settings.redis_port = match v.parse::<u16>() {
            Ok(port) => port,
            Err(_) => bail!("REDIS_PORT '{v}' is not a valid port"),
        };
    }
    if let Some(v) = lookup("REDIS_PASSWORD") {
        settings.redis_password = Some(v).filter(|p| !p.is_empty());
    }
    if let Some(v) = lookup("BRIDGE_BIND") {
        settings.bind_addr = v;
    }
    Ok(settings)
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
