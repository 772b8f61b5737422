//! Load config from file and environment.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use seedpod_core::DEFAULT_PORT;

/// Tracker configuration. File: ~/.config/seedpod/tracker.toml or /etc/seedpod/tracker.toml.
/// Env overrides: SEEDPOD_BIND, SEEDPOD_SEEDER_PORT, SEEDPOD_MAINTENANCE_INTERVAL_MS.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Reply endpoint (default 0.0.0.0:5555).
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    /// Port seeders listen on; the tracker pings and commands them there.
    #[serde(default = "default_seeder_port")]
    pub seeder_port: u16,
    /// Idle time after which health check and rebalance run.
    #[serde(default = "default_maintenance_interval_ms")]
    pub maintenance_interval_ms: u64,
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
    /// Upper bound on one replication pull.
    #[serde(default = "default_replicate_timeout_ms")]
    pub replicate_timeout_ms: u64,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT))
}
fn default_seeder_port() -> u16 {
    DEFAULT_PORT
}
fn default_maintenance_interval_ms() -> u64 {
    5000
}
fn default_ping_timeout_ms() -> u64 {
    1000
}
fn default_replicate_timeout_ms() -> u64 {
    60_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            seeder_port: default_seeder_port(),
            maintenance_interval_ms: default_maintenance_interval_ms(),
            ping_timeout_ms: default_ping_timeout_ms(),
            replicate_timeout_ms: default_replicate_timeout_ms(),
        }
    }
}

impl Config {
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn replicate_timeout(&self) -> Duration {
        Duration::from_millis(self.replicate_timeout_ms)
    }
}

/// Load config: explicit file if given (must parse), else default locations, then env vars.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let mut c = match explicit {
        Some(p) => parse_file(p)?,
        None => load_default_file().unwrap_or_default(),
    };
    apply_env(&mut c);
    Ok(c)
}

fn parse_file(p: &Path) -> anyhow::Result<Config> {
    let s = std::fs::read_to_string(p)
        .map_err(|e| anyhow::anyhow!("reading {}: {}", p.display(), e))?;
    toml::from_str::<Config>(&s).map_err(|e| anyhow::anyhow!("parsing {}: {}", p.display(), e))
}

fn apply_env(c: &mut Config) {
    if let Ok(s) = std::env::var("SEEDPOD_BIND") {
        if let Ok(a) = s.parse::<SocketAddr>() {
            c.bind = a;
        }
    }
    if let Ok(s) = std::env::var("SEEDPOD_SEEDER_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.seeder_port = p;
        }
    }
    if let Ok(s) = std::env::var("SEEDPOD_MAINTENANCE_INTERVAL_MS") {
        if let Ok(ms) = s.parse::<u64>() {
            c.maintenance_interval_ms = ms;
        }
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/seedpod/tracker.toml"));
    }
    out.push(PathBuf::from("/etc/seedpod/tracker.toml"));
    out
}

fn load_default_file() -> Option<Config> {
    let p = config_paths().into_iter().find(|p| p.exists())?;
    match parse_file(&p) {
        Ok(c) => Some(c),
        Err(e) => {
            tracing::warn!(error = %e, "ignoring config file");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let c: Config = toml::from_str("seeder_port = 6000\nping_timeout_ms = 250").unwrap();
        assert_eq!(c.seeder_port, 6000);
        assert_eq!(c.ping_timeout(), Duration::from_millis(250));
        assert_eq!(c.bind, default_bind());
        assert_eq!(c.maintenance_interval(), Duration::from_secs(5));
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(toml::from_str::<Config>("bogus = 1").is_err());
    }
}
