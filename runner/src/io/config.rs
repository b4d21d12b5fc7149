//! Engine configuration stored as TOML (e.g. `pentest.toml`).

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::driver::DriverConfig;
use crate::follow::FollowConfig;

/// Engine configuration (TOML).
///
/// Intended to be edited by humans. Missing fields default to sensible values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Steps after which a run completes even if the executor is not done.
    pub max_steps: u32,

    /// Per-step executor timeout in seconds.
    pub step_timeout_secs: u64,

    /// Keep-alive interval for event streams in seconds.
    pub stream_keep_alive_secs: u64,

    pub follow: FollowSettings,

    pub probe: ProbeConfig,
}

/// Snapshot follower cadence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FollowSettings {
    pub poll_interval_ms: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

/// Login-form probe settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProbeConfig {
    /// Username submitted alongside the payload.
    pub username: String,
    /// Password-field payload.
    pub payload: String,
    /// Timeout for each HTTP request in seconds.
    pub request_timeout_secs: u64,
    /// Case-insensitive response markers of a successful login.
    pub success_indicators: Vec<String>,
    /// Redirects followed while loading the target page.
    pub max_redirects: usize,
    /// Markup submitted through each text input to look for unencoded reflection.
    pub xss_payloads: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: 25,
            step_timeout_secs: 60,
            stream_keep_alive_secs: 15,
            follow: FollowSettings::default(),
            probe: ProbeConfig::default(),
        }
    }
}

impl Default for FollowSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            payload: "' OR 1=1--".to_string(),
            request_timeout_secs: 10,
            success_indicators: [
                "welcome",
                "dashboard",
                "successful",
                "logged in",
                "logout",
                "profile",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            max_redirects: 5,
            xss_payloads: [
                "<script>alert('XSS')</script>",
                "<img src=x onerror=alert('XSS')>",
                "<svg onload=alert('XSS')>",
                "javascript:alert('XSS')",
                "<iframe src=javascript:alert('XSS')>",
                "'><script>alert('XSS')</script>",
                "\"><script>alert('XSS')</script>",
                "<scr<script>ipt>alert('XSS')</scr</script>ipt>",
                "<SCRIPT>alert('XSS')</SCRIPT>",
                "%3Cscript%3Ealert('XSS')%3C/script%3E",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(anyhow!("max_steps must be > 0"));
        }
        if self.step_timeout_secs == 0 {
            return Err(anyhow!("step_timeout_secs must be > 0"));
        }
        if self.stream_keep_alive_secs == 0 {
            return Err(anyhow!("stream_keep_alive_secs must be > 0"));
        }
        if self.follow.max_backoff_ms < self.follow.initial_backoff_ms {
            return Err(anyhow!(
                "follow.max_backoff_ms must be >= follow.initial_backoff_ms"
            ));
        }
        if self.probe.request_timeout_secs == 0 {
            return Err(anyhow!("probe.request_timeout_secs must be > 0"));
        }
        if self.probe.payload.is_empty() {
            return Err(anyhow!("probe.payload must not be empty"));
        }
        if self.probe.xss_payloads.iter().any(String::is_empty) {
            return Err(anyhow!("probe.xss_payloads must not contain empty payloads"));
        }
        Ok(())
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            max_steps: self.max_steps,
            step_timeout: Duration::from_secs(self.step_timeout_secs),
        }
    }

    pub fn follow_config(&self) -> FollowConfig {
        FollowConfig {
            poll_interval: Duration::from_millis(self.follow.poll_interval_ms),
            initial_backoff: Duration::from_millis(self.follow.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.follow.max_backoff_ms),
        }
    }

    pub fn stream_keep_alive(&self) -> Duration {
        Duration::from_secs(self.stream_keep_alive_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
