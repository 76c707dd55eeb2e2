//! Load config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;

use shmpoll_core::DEFAULT_BUFFER_SIZE;

/// Host configuration. File: ~/.config/shmpoll/config.toml or /etc/shmpoll/config.toml.
/// Env overrides: SHMPOLL_BUFFER_SIZE, SHMPOLL_ROWS.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Payload capacity of each shared buffer (default 65536).
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Rows requested by `rows` when no count is given (default 3).
    #[serde(default = "default_rows")]
    pub rows: u32,
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}
fn default_rows() -> u32 {
    3
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            rows: default_rows(),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let c = load_file().unwrap_or_default();
    apply_env(c, |k| std::env::var(k).ok())
}

/// Apply env overrides; unparsable values are ignored.
fn apply_env(mut c: Config, var: impl Fn(&str) -> Option<String>) -> Config {
    if let Some(n) = var("SHMPOLL_BUFFER_SIZE").and_then(|s| s.parse::<usize>().ok()) {
        c.buffer_size = n;
    }
    if let Some(n) = var("SHMPOLL_ROWS").and_then(|s| s.parse::<u32>().ok()) {
        c.rows = n;
    }
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/shmpoll/config.toml"));
    }
    out.push(PathBuf::from("/etc/shmpoll/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            match std::fs::read_to_string(&p) {
                Ok(s) => match toml::from_str::<Config>(&s) {
                    Ok(c) => {
                        log::debug!("config: loaded {}", p.display());
                        return Some(c);
                    }
                    Err(e) => log::warn!("config: ignoring {}: {}", p.display(), e),
                },
                Err(e) => log::warn!("config: cannot read {}: {}", p.display(), e),
            }
            break;
        }
    }
    None
}
