//! Configuration loading, merging, and validation.
//!
//! Values come from three layers, later layers winning: baseline
//! constants, an optional TOML document at `~/.rcc/config.toml` (or
//! `RCC_CONFIG`), and `RCC_*` environment variables. Malformed
//! environment values are skipped so the baseline wins. The merged
//! result is validated once and then never mutated.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rcc_core::Channel;

/// The root configuration structure, mapping to the TOML document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub gateway: GatewaySettings,

    #[serde(default)]
    pub auth: AuthSettings,

    #[serde(default)]
    pub audit: AuditSettings,

    #[serde(default)]
    pub timing: TimingConfig,

    /// Simulated radios registered at startup, for development and
    /// integration testing. Real vendor adapters are wired in code.
    #[serde(default)]
    pub radios: Vec<RadioEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    /// Listen address, overridden by `RCC_ADDR`.
    #[serde(default = "default_addr")]
    pub addr: String,
}

fn default_addr() -> String {
    "0.0.0.0:8000".into()
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            addr: default_addr(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// One of "none", "hs256", "rs256".
    #[serde(default = "default_auth_mode")]
    pub mode: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hs256_secret: Option<String>,

    /// PEM file with the RS256 public key (used when no key set URL
    /// is configured, and as the fallback for tokens without a `kid`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rs256_public_key_file: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_url: Option<String>,

    #[serde(with = "humantime_serde", default = "default_jwks_refresh")]
    pub jwks_refresh_interval: Duration,

    #[serde(with = "humantime_serde", default = "default_jwks_ttl")]
    pub jwks_cache_ttl: Duration,
}

fn default_auth_mode() -> String {
    "none".into()
}
fn default_jwks_refresh() -> Duration {
    Duration::from_secs(5 * 60)
}
fn default_jwks_ttl() -> Duration {
    Duration::from_secs(15 * 60)
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            mode: default_auth_mode(),
            hs256_secret: None,
            rs256_public_key_file: None,
            jwks_url: None,
            jwks_refresh_interval: default_jwks_refresh(),
            jwks_cache_ttl: default_jwks_ttl(),
        }
    }
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("mode", &self.mode)
            .field(
                "hs256_secret",
                &self.hs256_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("rs256_public_key_file", &self.rs256_public_key_file)
            .field("jwks_url", &self.jwks_url)
            .field("jwks_refresh_interval", &self.jwks_refresh_interval)
            .field("jwks_cache_ttl", &self.jwks_cache_ttl)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSettings {
    #[serde(default = "default_audit_path")]
    pub log_path: PathBuf,
}

fn default_audit_path() -> PathBuf {
    PathBuf::from("rcc-audit.log")
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            log_path: default_audit_path(),
        }
    }
}

/// A radio to register with the simulated adapter at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioEntry {
    pub id: String,
    pub model: String,

    #[serde(default = "default_min_power")]
    pub min_power_dbm: f64,

    #[serde(default = "default_max_power")]
    pub max_power_dbm: f64,
}

fn default_min_power() -> f64 {
    0.0
}
fn default_max_power() -> f64 {
    39.0
}

// ── Timing ────────────────────────────────────────────────────────────────

/// Every duration and count the control plane runs on. Immutable after
/// load; there is no hot reload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(with = "humantime_serde", default = "default_heartbeat_interval")]
    pub heartbeat_interval: Duration,

    #[serde(with = "humantime_serde", default = "default_heartbeat_jitter")]
    pub heartbeat_jitter: Duration,

    /// Stream-liveness window advertised to clients: see no event for
    /// this long and the stream should be considered dead.
    #[serde(with = "humantime_serde", default = "default_heartbeat_timeout")]
    pub heartbeat_timeout: Duration,

    #[serde(with = "humantime_serde", default = "default_probe_normal")]
    pub probe_normal_interval: Duration,

    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,

    #[serde(with = "humantime_serde", default = "default_event_buffer_retention")]
    pub event_buffer_retention: Duration,

    #[serde(default = "default_probe_recovering")]
    pub probe_recovering: ProbeProfile,

    #[serde(default = "default_probe_offline")]
    pub probe_offline: ProbeProfile,

    #[serde(default)]
    pub command_timeouts: CommandTimeouts,

    /// Optional channel plan: model → band → ordered channel list.
    #[serde(default)]
    pub channel_plan: ChannelPlan,
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(15)
}
fn default_heartbeat_jitter() -> Duration {
    Duration::from_secs(2)
}
fn default_heartbeat_timeout() -> Duration {
    Duration::from_secs(45)
}
fn default_probe_normal() -> Duration {
    Duration::from_secs(30)
}
fn default_probe_recovering() -> ProbeProfile {
    ProbeProfile {
        initial: Duration::from_secs(5),
        backoff: 1.5,
        max: Duration::from_secs(60),
    }
}
fn default_probe_offline() -> ProbeProfile {
    ProbeProfile {
        initial: Duration::from_secs(30),
        backoff: 2.0,
        max: Duration::from_secs(300),
    }
}
fn default_event_buffer_size() -> usize {
    256
}
fn default_event_buffer_retention() -> Duration {
    Duration::from_secs(3600)
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            heartbeat_jitter: default_heartbeat_jitter(),
            heartbeat_timeout: default_heartbeat_timeout(),
            probe_normal_interval: default_probe_normal(),
            probe_recovering: default_probe_recovering(),
            probe_offline: default_probe_offline(),
            command_timeouts: CommandTimeouts::default(),
            event_buffer_size: default_event_buffer_size(),
            event_buffer_retention: default_event_buffer_retention(),
            channel_plan: ChannelPlan::default(),
        }
    }
}

/// Backoff schedule for probing a degraded radio.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProbeProfile {
    #[serde(with = "humantime_serde")]
    pub initial: Duration,

    pub backoff: f64,

    #[serde(with = "humantime_serde")]
    pub max: Duration,
}

/// Per-command deadlines applied at the orchestrator boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandTimeouts {
    #[serde(with = "humantime_serde", default = "default_set_power_timeout")]
    pub set_power: Duration,

    #[serde(with = "humantime_serde", default = "default_set_channel_timeout")]
    pub set_channel: Duration,

    #[serde(with = "humantime_serde", default = "default_select_radio_timeout")]
    pub select_radio: Duration,

    #[serde(with = "humantime_serde", default = "default_get_state_timeout")]
    pub get_state: Duration,
}

fn default_set_power_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_set_channel_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_select_radio_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_get_state_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for CommandTimeouts {
    fn default() -> Self {
        Self {
            set_power: default_set_power_timeout(),
            set_channel: default_set_channel_timeout(),
            select_radio: default_select_radio_timeout(),
            get_state: default_get_state_timeout(),
        }
    }
}

/// Channel plan: model → band → ordered list of channels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelPlan(pub HashMap<String, HashMap<String, Vec<Channel>>>);

impl ChannelPlan {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Every channel defined for a model, across bands, ordered by index.
    pub fn channels_for_model(&self, model: &str) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self
            .0
            .get(model)
            .map(|bands| bands.values().flatten().cloned().collect())
            .unwrap_or_default();
        channels.sort_by_key(|c| c.index);
        channels
    }

    /// Frequency for a channel index of a model, if the plan has it.
    pub fn resolve(&self, model: &str, index: u32) -> Option<f64> {
        self.0.get(model)?.values().flatten().find_map(|c| {
            (c.index == index).then_some(c.frequency_mhz)
        })
    }
}

// ── Loading ───────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load from the conventional path (or `RCC_CONFIG`), overlay the
    /// process environment, and validate.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("RCC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::default_path());
        let mut config = Self::parse_file(&path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a specific file, without environment overlay.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::parse_file(path)?;
        config.validate()?;
        Ok(config)
    }

    fn parse_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no config file found, using baseline");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// The conventional config location: `~/.rcc/config.toml`.
    pub fn default_path() -> PathBuf {
        dirs_home().join(".rcc").join("config.toml")
    }

    /// Overlay `RCC_*` environment values on top of the current
    /// configuration. The lookup is injected so tests never touch the
    /// process environment. Unparseable values are skipped: the
    /// previous layer wins.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("RCC_ADDR") {
            self.gateway.addr = addr;
        }
        if let Some(mode) = lookup("RCC_AUTH_MODE") {
            self.auth.mode = mode;
        }
        if let Some(secret) = lookup("RCC_AUTH_HS256_SECRET") {
            self.auth.hs256_secret = Some(secret);
        }
        if let Some(url) = lookup("RCC_AUTH_JWKS_URL") {
            self.auth.jwks_url = Some(url);
        }

        let t = &mut self.timing;
        overlay_duration(&lookup, "RCC_TIMING_HEARTBEAT_INTERVAL", &mut t.heartbeat_interval);
        overlay_duration(&lookup, "RCC_TIMING_HEARTBEAT_JITTER", &mut t.heartbeat_jitter);
        overlay_duration(&lookup, "RCC_TIMING_HEARTBEAT_TIMEOUT", &mut t.heartbeat_timeout);
        overlay_duration(&lookup, "RCC_TIMING_PROBE_NORMAL_INTERVAL", &mut t.probe_normal_interval);
        overlay_duration(&lookup, "RCC_TIMING_PROBE_RECOVERING_INITIAL", &mut t.probe_recovering.initial);
        overlay_f64(&lookup, "RCC_TIMING_PROBE_RECOVERING_BACKOFF", &mut t.probe_recovering.backoff);
        overlay_duration(&lookup, "RCC_TIMING_PROBE_RECOVERING_MAX", &mut t.probe_recovering.max);
        overlay_duration(&lookup, "RCC_TIMING_PROBE_OFFLINE_INITIAL", &mut t.probe_offline.initial);
        overlay_f64(&lookup, "RCC_TIMING_PROBE_OFFLINE_BACKOFF", &mut t.probe_offline.backoff);
        overlay_duration(&lookup, "RCC_TIMING_PROBE_OFFLINE_MAX", &mut t.probe_offline.max);
        overlay_duration(&lookup, "RCC_TIMING_COMMAND_SET_POWER", &mut t.command_timeouts.set_power);
        overlay_duration(&lookup, "RCC_TIMING_COMMAND_SET_CHANNEL", &mut t.command_timeouts.set_channel);
        overlay_duration(&lookup, "RCC_TIMING_COMMAND_SELECT_RADIO", &mut t.command_timeouts.select_radio);
        overlay_duration(&lookup, "RCC_TIMING_COMMAND_GET_STATE", &mut t.command_timeouts.get_state);
        overlay_duration(&lookup, "RCC_TIMING_EVENT_BUFFER_RETENTION", &mut t.event_buffer_retention);

        if let Some(raw) = lookup("RCC_TIMING_EVENT_BUFFER_SIZE") {
            match raw.trim().parse::<usize>() {
                Ok(n) => t.event_buffer_size = n,
                Err(_) => {
                    tracing::warn!(value = %raw, "ignoring malformed RCC_TIMING_EVENT_BUFFER_SIZE")
                }
            }
        }

        if let Some(raw) = lookup("RCC_TIMING_CHANNEL_PLAN") {
            match serde_json::from_str::<ChannelPlan>(&raw) {
                Ok(plan) => t.channel_plan = plan,
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring malformed RCC_TIMING_CHANNEL_PLAN")
                }
            }
        }
    }

    /// Check every invariant. Returns the first violation, naming the
    /// offending field and the rule it broke.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timing.validate()?;

        match self.auth.mode.as_str() {
            "none" => {}
            "hs256" => {
                if self.auth.hs256_secret.as_deref().is_none_or(str::is_empty) {
                    return Err(ConfigError::invalid(
                        "auth.hs256_secret",
                        "required when auth.mode is \"hs256\"",
                    ));
                }
            }
            "rs256" => {
                if self.auth.rs256_public_key_file.is_none() && self.auth.jwks_url.is_none() {
                    return Err(ConfigError::invalid(
                        "auth.rs256_public_key_file",
                        "a public key file or jwks_url is required when auth.mode is \"rs256\"",
                    ));
                }
            }
            other => {
                return Err(ConfigError::invalid(
                    "auth.mode",
                    format!("must be \"none\", \"hs256\", or \"rs256\", got \"{other}\""),
                ));
            }
        }

        Ok(())
    }

    /// A copy safe to print: secrets masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.auth.hs256_secret.is_some() {
            copy.auth.hs256_secret = Some("[REDACTED]".into());
        }
        copy
    }

    /// Render the configuration as pretty TOML.
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            gateway: GatewaySettings::default(),
            auth: AuthSettings::default(),
            audit: AuditSettings::default(),
            timing: TimingConfig::default(),
            radios: Vec::new(),
        }
    }
}

impl TimingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::invalid(
                "timing.heartbeat_interval",
                "must be greater than zero",
            ));
        }
        if self.heartbeat_jitter > self.heartbeat_interval / 2 {
            return Err(ConfigError::invalid(
                "timing.heartbeat_jitter",
                "must not exceed half the heartbeat interval",
            ));
        }
        if self.heartbeat_timeout < self.heartbeat_interval {
            return Err(ConfigError::invalid(
                "timing.heartbeat_timeout",
                "must be at least the heartbeat interval",
            ));
        }
        if self.probe_normal_interval.is_zero() {
            return Err(ConfigError::invalid(
                "timing.probe_normal_interval",
                "must be greater than zero",
            ));
        }
        self.probe_recovering.validate("timing.probe_recovering")?;
        self.probe_offline.validate("timing.probe_offline")?;

        for (field, value) in [
            ("timing.command_timeouts.set_power", self.command_timeouts.set_power),
            ("timing.command_timeouts.set_channel", self.command_timeouts.set_channel),
            ("timing.command_timeouts.select_radio", self.command_timeouts.select_radio),
            ("timing.command_timeouts.get_state", self.command_timeouts.get_state),
        ] {
            if value < Duration::from_millis(100) || value > Duration::from_secs(300) {
                return Err(ConfigError::invalid(
                    field,
                    "must be between 100ms and 5m",
                ));
            }
        }

        if self.event_buffer_size == 0 {
            return Err(ConfigError::invalid(
                "timing.event_buffer_size",
                "must be greater than zero",
            ));
        }
        if self.event_buffer_retention.is_zero() {
            return Err(ConfigError::invalid(
                "timing.event_buffer_retention",
                "must be greater than zero",
            ));
        }

        for (model, bands) in &self.channel_plan.0 {
            for (band, channels) in bands {
                for channel in channels {
                    if channel.index < 1 {
                        return Err(ConfigError::invalid(
                            "timing.channel_plan",
                            format!("channel index must be ≥ 1 ({model}/{band})"),
                        ));
                    }
                }
            }
        }

        Ok(())
    }
}

impl ProbeProfile {
    fn validate(&self, field: &str) -> Result<(), ConfigError> {
        if self.initial.is_zero() {
            return Err(ConfigError::invalid(
                format!("{field}.initial"),
                "must be greater than zero",
            ));
        }
        if !(1.0..=10.0).contains(&self.backoff) {
            return Err(ConfigError::invalid(
                format!("{field}.backoff"),
                "must be between 1.0 and 10.0",
            ));
        }
        if self.max < self.initial {
            return Err(ConfigError::invalid(
                format!("{field}.max"),
                "must be at least the initial interval",
            ));
        }
        Ok(())
    }
}

fn overlay_duration<F>(lookup: &F, key: &str, target: &mut Duration)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        match humantime::parse_duration(raw.trim()) {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring malformed duration override"),
        }
    }
}

fn overlay_f64<F>(lookup: &F, key: &str, target: &mut f64)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<f64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring malformed numeric override"),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("failed to parse config file at {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("invalid configuration: {field} {rule}")]
    Invalid { field: String, rule: String },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, rule: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            rule: rule.into(),
        }
    }
}
