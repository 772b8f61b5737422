//! Load config from file and environment.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use seedpod_core::{CallPolicy, DEFAULT_PORT};

/// Client configuration. File: ~/.config/seedpod/client.toml or /etc/seedpod/client.toml.
/// Env overrides: SEEDPOD_TRACKER, SEEDPOD_SEEDER_PORT, SEEDPOD_DOWNLOAD_DIR.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_tracker")]
    pub tracker: SocketAddr,
    #[serde(default = "default_seeder_port")]
    pub seeder_port: u16,
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_tracker() -> SocketAddr {
    SocketAddr::from(([11, 56, 1, 21], DEFAULT_PORT))
}
fn default_seeder_port() -> u16 {
    DEFAULT_PORT
}
fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
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
            seeder_port: default_seeder_port(),
            download_dir: default_download_dir(),
            request_timeout_ms: default_request_timeout_ms(),
            retries: default_retries(),
        }
    }
}

impl Config {
    pub fn policy(&self) -> CallPolicy {
        CallPolicy::default()
            .with_request_timeout(Duration::from_millis(self.request_timeout_ms))
            .with_retries(self.retries)
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
    if let Ok(s) = std::env::var("SEEDPOD_SEEDER_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.seeder_port = p;
        }
    }
    if let Some(dir) = std::env::var_os("SEEDPOD_DOWNLOAD_DIR") {
        c.download_dir = PathBuf::from(dir);
    }
}

fn config_paths() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(h) = std::env::var_os("HOME").map(PathBuf::from) {
        out.push(h.join(".config/seedpod/client.toml"));
    }
    out.push(PathBuf::from("/etc/seedpod/client.toml"));
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
