//! Load config from file and environment.

use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use seedpod_core::DEFAULT_PORT;

/// Seeder configuration. File: ~/.config/seedpod/seeder.toml or /etc/seedpod/seeder.toml.
/// Env overrides: SEEDPOD_TRACKER, SEEDPOD_PORT, SEEDPOD_STORAGE_DIR, SEEDPOD_ADVERTISE.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_tracker")]
    pub tracker: SocketAddr,
    /// Listen port; must match the port the tracker and other seeders use for us.
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
    /// Address to register under. Detected from the primary interface when unset.
    #[serde(default)]
    pub advertise: Option<Ipv4Addr>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_tracker() -> SocketAddr {
    SocketAddr::from(([11, 56, 1, 21], DEFAULT_PORT))
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_storage_dir() -> PathBuf {
    PathBuf::from("./storage")
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_retries() -> u32 {
    2
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tracker: default_tracker(),
            port: default_port(),
            storage_dir: default_storage_dir(),
            advertise: None,
            request_timeout_ms: default_request_timeout_ms(),
            retries: default_retries(),
        }
    }
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
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
    if let Ok(s) = std::env::var("SEEDPOD_TRACKER") {
        if let Ok(a) = s.parse::<SocketAddr>() {
            c.tracker = a;
        }
    }
    if let Ok(s) = std::env::var("SEEDPOD_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.port = p;
        }
    }
    if let Some(dir) = std::env::var_os("SEEDPOD_STORAGE_DIR") {
        c.storage_dir = PathBuf::from(dir);
    }
    if let Ok(s) = std::env::var("SEEDPOD_ADVERTISE") {
        if let Ok(a) = s.parse::<Ipv4Addr>() {
            c.advertise = Some(a);
        }
    }
}

fn config_paths() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(h) = std::env::var_os("HOME").map(PathBuf::from) {
        out.push(h.join(".config/seedpod/seeder.toml"));
    }
    out.push(PathBuf::from("/etc/seedpod/seeder.toml"));
    out
}

fn load_default_file() -> Option<Config> {
    let p = config_paths().into_iter().find(|p| p.exists())?;
    parse_file(&p)
        .map_err(|e| tracing::warn!(error = %e, "ignoring config file"))
        .ok()
}
