use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SynthError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub service_name: String,
    pub otlp_endpoint: Option<String>,
    pub otlp_headers: Vec<(String, String)>,
    pub export_timeout: Duration,
    pub playwright_shape: PlaywrightShape,
    pub ndjson: NdjsonOptions,
}

/// Which Playwright report layout to expect.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaywrightShape {
    /// Decide per test node from the fields present.
    #[default]
    Auto,
    /// `specs[].tests[].results[]`, one result per attempt.
    Results,
    /// `tests[]` attempts carrying `status` and a `retry` counter.
    Flat,
}

impl PlaywrightShape {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "results" => Ok(Self::Results),
            "flat" => Ok(Self::Flat),
            other => Err(SynthError::Config(format!(
                "unknown playwright shape {other} (expected auto, results or flat)"
            ))),
        }
    }
}

/// Options for the k6 NDJSON synthesizer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NdjsonOptions {
    /// One span per normalized endpoint. When off, HTTP points yield no
    /// spans of their own; per-request spans come only from slow and
    /// failed sampling.
    pub aggregate_by_endpoint: bool,
    pub include_scenarios: bool,
    pub include_checks: bool,
    pub sample_slow_requests: usize,
    pub sample_failed_requests: bool,
}

impl Default for NdjsonOptions {
    fn default() -> Self {
        Self {
            aggregate_by_endpoint: true,
            include_scenarios: true,
            include_checks: true,
            sample_slow_requests: 0,
            sample_failed_requests: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "supercheck-worker".to_string(),
            otlp_endpoint: None,
            otlp_headers: Vec::new(),
            export_timeout: Duration::from_secs(10),
            playwright_shape: PlaywrightShape::Auto,
            ndjson: NdjsonOptions::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut cfg = Self::default();
        let config_path = config_file_path();
        if let Some(file_overrides) = load_file_overrides(&config_path)? {
            apply_overrides(&mut cfg, file_overrides, "config file")?;
        }
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        Ok(cfg)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigOverrides {
    service_name: Option<String>,
    otlp_endpoint: Option<String>,
    otlp_headers: Option<String>,
    export_timeout: Option<String>,
    playwright_shape: Option<String>,
    #[serde(default)]
    ndjson: NdjsonOverrides,
}

/// The `[ndjson]` table.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct NdjsonOverrides {
    aggregate_by_endpoint: Option<bool>,
    include_scenarios: Option<bool>,
    include_checks: Option<bool>,
    sample_slow_requests: Option<usize>,
    sample_failed_requests: Option<bool>,
}

fn config_file_path() -> PathBuf {
    if let Ok(path) = env::var("SPANSYNTH_CONFIG") {
        return PathBuf::from(path);
    }

    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let config_home = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(home).join(".config"));
    config_home.join("spansynth/config.toml")
}

fn load_file_overrides(path: &PathBuf) -> Result<Option<ConfigOverrides>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| SynthError::Config(format!("failed reading {}: {e}", path.display())))?;
    let parsed: ConfigOverrides = toml::from_str(&raw)
        .map_err(|e| SynthError::Config(format!("failed parsing {}: {e}", path.display())))?;
    Ok(Some(parsed))
}

fn load_env_overrides() -> Result<ConfigOverrides> {
    let sample_slow_requests = match env::var("SPANSYNTH_SAMPLE_SLOW_REQUESTS") {
        Ok(v) => Some(v.parse::<usize>().map_err(|e| {
            SynthError::Config(format!(
                "bad SPANSYNTH_SAMPLE_SLOW_REQUESTS in environment: {e}"
            ))
        })?),
        Err(_) => None,
    };

    Ok(ConfigOverrides {
        service_name: env::var("SPANSYNTH_SERVICE_NAME").ok(),
        otlp_endpoint: env::var("SPANSYNTH_OTLP_ENDPOINT")
            .or_else(|_| env::var("OTEL_EXPORTER_OTLP_ENDPOINT"))
            .ok(),
        otlp_headers: env::var("SPANSYNTH_OTLP_HEADERS").ok(),
        export_timeout: env::var("SPANSYNTH_EXPORT_TIMEOUT").ok(),
        playwright_shape: env::var("SPANSYNTH_PLAYWRIGHT_SHAPE").ok(),
        ndjson: NdjsonOverrides {
            aggregate_by_endpoint: env_flag("SPANSYNTH_AGGREGATE_BY_ENDPOINT")?,
            include_scenarios: env_flag("SPANSYNTH_INCLUDE_SCENARIOS")?,
            include_checks: env_flag("SPANSYNTH_INCLUDE_CHECKS")?,
            sample_slow_requests,
            sample_failed_requests: env_flag("SPANSYNTH_SAMPLE_FAILED_REQUESTS")?,
        },
    })
}

fn env_flag(name: &str) -> Result<Option<bool>> {
    let Ok(raw) = env::var(name) else {
        return Ok(None);
    };
    parse_flag(&raw)
        .map(Some)
        .ok_or_else(|| SynthError::Config(format!("bad {name} in environment: {raw}")))
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn apply_overrides(cfg: &mut Config, overrides: ConfigOverrides, source: &str) -> Result<()> {
    if let Some(v) = overrides.service_name {
        cfg.service_name = v;
    }
    if let Some(v) = overrides.otlp_endpoint {
        cfg.otlp_endpoint = Some(v);
    }
    if let Some(v) = overrides.otlp_headers {
        cfg.otlp_headers = parse_otlp_headers(&v).map_err(|e| {
            SynthError::Config(format!("bad otlp_headers in {source}: {e} (value={v})"))
        })?;
    }
    if let Some(v) = overrides.export_timeout {
        cfg.export_timeout = humantime::parse_duration(&v).map_err(|e| {
            SynthError::Config(format!("bad export_timeout in {source}: {e} (value={v})"))
        })?;
    }
    if let Some(v) = overrides.playwright_shape {
        cfg.playwright_shape = PlaywrightShape::parse(&v)
            .map_err(|e| SynthError::Config(format!("bad playwright_shape in {source}: {e}")))?;
    }
    let ndjson = overrides.ndjson;
    if let Some(v) = ndjson.aggregate_by_endpoint {
        cfg.ndjson.aggregate_by_endpoint = v;
    }
    if let Some(v) = ndjson.include_scenarios {
        cfg.ndjson.include_scenarios = v;
    }
    if let Some(v) = ndjson.include_checks {
        cfg.ndjson.include_checks = v;
    }
    if let Some(v) = ndjson.sample_slow_requests {
        cfg.ndjson.sample_slow_requests = v;
    }
    if let Some(v) = ndjson.sample_failed_requests {
        cfg.ndjson.sample_failed_requests = v;
    }
    Ok(())
}

pub fn parse_otlp_headers(raw: &str) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for entry in raw.split(',') {
        let trimmed = entry.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Some((key, value)) = trimmed.split_once('=') else {
            return Err(SynthError::Config(
                "header entries must use key=value syntax".to_string(),
            ));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(SynthError::Config("header key cannot be empty".to_string()));
        }
        out.push((key.to_string(), value.trim().to_string()));
    }
    Ok(out)
}
