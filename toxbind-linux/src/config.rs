//! Load config from file and environment.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;
use toxbind_core::{BootstrapTarget, BuildOptions, IterationMode, ProxyOption, PublicKey};

/// Daemon configuration. File: ~/.config/toxbind/config.toml or /etc/toxbind/config.toml.
/// Env overrides: TOXBIND_IPV6, TOXBIND_UDP, TOXBIND_PROXY, TOXBIND_SAVE_PATH, TOXBIND_INTERVAL_MS.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub ipv6: bool,
    #[serde(default = "default_udp")]
    pub udp: bool,
    /// `type://host:port` or `{ type, address, port }`.
    #[serde(default)]
    pub proxy: Option<ProxyOption>,
    /// 0 leaves port selection to the engine.
    #[serde(default)]
    pub start_port: u16,
    #[serde(default)]
    pub end_port: u16,
    #[serde(default = "default_save_path")]
    pub save_path: PathBuf,
    #[serde(default)]
    pub iteration: IterationMode,
    /// 0 falls back to the default period.
    #[serde(default = "default_interval_ms", deserialize_with = "nonzero_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_save_interval_secs")]
    pub save_interval_secs: u64,
    #[serde(default)]
    pub bootstrap: Vec<NodeEntry>,
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeEntry {
    pub address: String,
    pub port: u16,
    pub public_key: PublicKey,
    /// Also register the node as a TCP relay.
    #[serde(default)]
    pub tcp_relay: bool,
}

impl NodeEntry {
    pub fn target(&self) -> BootstrapTarget {
        BootstrapTarget::new(self.address.clone(), self.port, self.public_key)
    }
}

fn default_udp() -> bool {
    true
}
fn default_interval_ms() -> u64 {
    toxbind_core::DEFAULT_ITERATION_INTERVAL.as_millis() as u64
}
fn nonzero_interval_ms<'de, D: serde::Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    let ms = u64::deserialize(d)?;
    Ok(if ms == 0 { default_interval_ms() } else { ms })
}
fn default_save_interval_secs() -> u64 {
    60
}
fn default_save_path() -> PathBuf {
    let base = std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")));
    match base {
        Some(b) => b.join("toxbind/save.tox"),
        None => PathBuf::from("save.tox"),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ipv6: false,
            udp: default_udp(),
            proxy: None,
            start_port: 0,
            end_port: 0,
            save_path: default_save_path(),
            iteration: IterationMode::default(),
            interval_ms: default_interval_ms(),
            save_interval_secs: default_save_interval_secs(),
            bootstrap: Vec::new(),
            debug: false,
        }
    }
}

impl Config {
    pub fn build_options(&self) -> BuildOptions {
        let mut opts = BuildOptions::new().with_ipv6(self.ipv6).with_udp(self.udp);
        if let Some(proxy) = &self.proxy {
            opts = opts.with_proxy(proxy.clone());
        }
        if self.start_port != 0 {
            let end = if self.end_port == 0 {
                self.start_port
            } else {
                self.end_port
            };
            opts = opts.with_port_range(self.start_port, end);
        }
        opts
    }
}

/// Result of [`load`]. A default-path file that failed to parse is skipped
/// and reported in `ignored` so the caller can log it once tracing is up.
pub struct Loaded {
    pub config: Config,
    pub ignored: Option<anyhow::Error>,
}

/// Load config: explicit file (must exist and parse), else the first default
/// path that exists, else defaults; then env vars.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<Loaded> {
    let (mut config, ignored) = match explicit {
        Some(p) => (parse_file(p)?, None),
        None => match load_default_file(&config_paths()) {
            Ok(c) => (c.unwrap_or_default(), None),
            Err(e) => (Config::default(), Some(e)),
        },
    };
    apply_env(&mut config, |k| std::env::var(k).ok());
    Ok(Loaded { config, ignored })
}

fn parse_file(path: &Path) -> anyhow::Result<Config> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&s).with_context(|| format!("parsing {}", path.display()))
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/toxbind/config.toml"));
    }
    out.push(PathBuf::from("/etc/toxbind/config.toml"));
    out
}

/// First existing path wins. `Ok(None)` when none exists.
fn load_default_file(paths: &[PathBuf]) -> anyhow::Result<Option<Config>> {
    match paths.iter().find(|p| p.exists()) {
        Some(path) => parse_file(path).map(Some),
        None => Ok(None),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Malformed values are ignored.
fn apply_env(c: &mut Config, get: impl Fn(&str) -> Option<String>) {
    if let Some(b) = get("TOXBIND_IPV6").as_deref().and_then(parse_bool) {
        c.ipv6 = b;
    }
    if let Some(b) = get("TOXBIND_UDP").as_deref().and_then(parse_bool) {
        c.udp = b;
    }
    if let Some(s) = get("TOXBIND_PROXY") {
        c.proxy = if s.trim().is_empty() {
            None
        } else {
            Some(ProxyOption::Url(s))
        };
    }
    if let Some(s) = get("TOXBIND_SAVE_PATH") {
        if !s.is_empty() {
            c.save_path = PathBuf::from(s);
        }
    }
    if let Some(ms) = get("TOXBIND_INTERVAL_MS").and_then(|s| s.parse::<u64>().ok()) {
        if ms > 0 {
            c.interval_ms = ms;
        }
    }
}
