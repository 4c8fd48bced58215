//! Runtime configuration: environment first, then command-line flags.

use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Result};

pub const DEFAULT_BIND: &str = "127.0.0.1:5433";
pub const DEFAULT_SERVER_VERSION: &str = "14.0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub bind: String,
    /// JSON fixture file for the in-memory backend.
    pub fixtures: Option<PathBuf>,
    /// Hex-dump inbound frames at debug level.
    pub trace: bool,
    pub server_version: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            bind: DEFAULT_BIND.to_string(),
            fixtures: None,
            trace: false,
            server_version: DEFAULT_SERVER_VERSION.to_string(),
        }
    }
}

pub fn parse_bool(v: &str) -> Option<bool> {
    match v.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Result<Option<&'a str>> {
    match args.iter().position(|a| a == flag) {
        None => Ok(None),
        Some(i) => args.get(i + 1).map(|v| Some(v.as_str())).ok_or_else(|| anyhow!("{} requires a value", flag)),
    }
}

fn has_flag(args: &[String], flag: &str) -> bool { args.iter().any(|a| a == flag) }

impl ProxyConfig {
    /// Defaults overridden by PGPROXY_* variables taken from `lookup`.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        let mut cfg = ProxyConfig::default();
        if let Some(b) = lookup("PGPROXY_BIND").filter(|s| !s.trim().is_empty()) {
            cfg.bind = b;
        }
        cfg.fixtures = lookup("PGPROXY_FIXTURES").filter(|s| !s.trim().is_empty()).map(PathBuf::from);
        cfg.trace = lookup("PGPROXY_PGWIRE_TRACE").and_then(|v| parse_bool(&v)).unwrap_or(false);
        if let Some(v) = lookup("PGPROXY_SERVER_VERSION").filter(|s| !s.trim().is_empty()) {
            cfg.server_version = v;
        }
        cfg
    }

    pub fn from_env() -> Self { Self::from_lookup(|k| env::var(k).ok()) }

    /// Apply `--bind`, `--fixtures` and `--trace` on top of the current values.
    pub fn apply_args(mut self, args: &[String]) -> Result<Self> {
        if let Some(b) = flag_value(args, "--bind")? {
            self.bind = b.to_string();
        }
        if let Some(f) = flag_value(args, "--fixtures")? {
            self.fixtures = Some(PathBuf::from(f));
        }
        if has_flag(args, "--trace") {
            self.trace = true;
        }
        Ok(self)
    }

    /// Environment then process arguments.
    pub fn load() -> Result<Self> {
        let args: Vec<String> = env::args().skip(1).collect();
        Self::from_env().apply_args(&args)
    }

    /// `server_version_num` derived from `server_version` ("14.0" -> "140000").
    pub fn server_version_num(&self) -> String {
        let mut parts = self.server_version.split('.').map(|p| p.trim().parse::<u32>().unwrap_or(0));
        let major = parts.next().unwrap_or(0);
        let minor = parts.next().unwrap_or(0);
        format!("{}", major * 10000 + minor)
    }
}
