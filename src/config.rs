use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;

use crate::window::{DEFAULT_BUDGET_SECS, DEFAULT_CAPACITY};

pub const DEFAULT_CONFIG_FILE: &str = "config.ini";
pub const DEFAULT_SMTP_PORT: u16 = 25;

/// Section name to key/value pairs, as read from the INI file.
pub type Sections = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("line {line}: malformed section header \"{text}\"")]
    Section { line: usize, text: String },

    #[error("line {line}: expected key=value, got \"{text}\"")]
    Entry { line: usize, text: String },

    #[error("unexpected configuration layout: {0}")]
    Layout(#[from] serde_json::Error),
}

/// Parses the INI dialect used by the monitor.
///
/// `[name]` opens a section, `key=value` lines belong to the last section and
/// have all whitespace removed, lines starting with `;` are comments. Dots in
/// keys become underscores. Entries before the first header land in the
/// unnamed section `""`.
pub fn parse_ini(content: &str) -> Result<Sections, ConfigError> {
    let mut sections = Sections::new();
    let mut current = String::new();

    for (idx, raw) in content.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with(';') {
            continue;
        }

        if line.contains('[') {
            let name = line
                .strip_prefix('[')
                .and_then(|rest| rest.strip_suffix(']'))
                .ok_or_else(|| ConfigError::Section {
                    line: line_no,
                    text: line.to_string(),
                })?;
            current = name.trim().to_string();
            sections.entry(current.clone()).or_default();
            continue;
        }

        let compact: String = line.chars().filter(|c| !c.is_whitespace()).collect();
        let (key, value) = compact.split_once('=').ok_or_else(|| ConfigError::Entry {
            line: line_no,
            text: line.to_string(),
        })?;
        sections
            .entry(current.clone())
            .or_default()
            .insert(key.replace('.', "_"), value.to_string());
    }

    Ok(sections)
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SmtpConfig {
    pub host: String,
    pub port: String,
    pub username: String,
    pub password: String,
}

impl SmtpConfig {
    pub fn port_or_default(&self) -> u16 {
        self.port.parse().unwrap_or(DEFAULT_SMTP_PORT)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MailConfig {
    pub from: String,
    pub to: String,
}

impl MailConfig {
    /// `to` split on commas, blanks removed.
    pub fn recipients(&self) -> Vec<String> {
        self.to
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
struct ProbeSection {
    interval_ms: Option<String>,
    timeout_ms: Option<String>,
    window_size: Option<String>,
    window_seconds: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
struct AlertSection {
    sink: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
struct LogSection {
    level: Option<String>,
    format: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
struct MetricsSection {
    listen: Option<String>,
    latency_history: Option<String>,
}

/// Sections as they appear in the file, every value still a string.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
struct RawConfig {
    smtp: SmtpConfig,
    mail: MailConfig,
    probe: ProbeSection,
    alert: AlertSection,
    log: LogSection,
    metrics: MetricsSection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSettings {
    /// Pause after a successful reply.
    pub interval: Duration,
    /// How long to wait for a reply before counting a timeout.
    pub reply_timeout: Duration,
    pub window_size: usize,
    pub window_seconds: i64,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            reply_timeout: Duration::from_millis(5000),
            window_size: DEFAULT_CAPACITY,
            window_seconds: DEFAULT_BUDGET_SECS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Email,
    Log,
}

impl FromStr for SinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "email" | "mail" | "smtp" => Ok(SinkKind::Email),
            "log" => Ok(SinkKind::Log),
            _ => Err(format!("Invalid alert sink: {}. Valid sinks are: email, log", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub smtp: SmtpConfig,
    pub mail: MailConfig,
    pub probe: ProbeSettings,
    pub sink: SinkKind,
    pub log_level: String,
    pub log_format: LogFormat,
    pub metrics_listen: Option<SocketAddr>,
    pub enable_latency_history: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            smtp: SmtpConfig::default(),
            mail: MailConfig::default(),
            probe: ProbeSettings::default(),
            sink: SinkKind::Log,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            metrics_listen: None,
            enable_latency_history: false,
        }
    }
}

/// Configuration plus the problems met while loading it. Logging is not set
/// up yet when the file is read, so warnings are reported by the caller.
#[derive(Debug, Default)]
pub struct Loaded {
    pub config: AppConfig,
    pub warnings: Vec<String>,
}

impl AppConfig {
    /// Path from `SENTINEL_CONFIG`, or `config.ini` in the working directory.
    pub fn path_from_env() -> String {
        std::env::var("SENTINEL_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string())
    }

    /// Never fails: a missing or malformed file yields defaults and a warning,
    /// since probing is still useful without alerting configured.
    pub async fn load(path: &str) -> Loaded {
        match Self::load_file(path).await {
            Ok(loaded) => loaded,
            Err(e) => Loaded {
                config: AppConfig::default(),
                warnings: vec![format!("load {} failed, using empty configuration: {}", path, e)],
            },
        }
    }

    async fn load_file(path: &str) -> Result<Loaded, ConfigError> {
        if !Path::new(path).exists() {
            return Err(ConfigError::Io {
                path: path.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "config file not found"),
            });
        }
        let content = fs::read_to_string(path).await.map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        let sections = parse_ini(&content)?;
        Self::from_sections(&sections)
    }

    pub fn from_sections(sections: &Sections) -> Result<Loaded, ConfigError> {
        let raw: RawConfig = serde_json::from_value(serde_json::to_value(sections)?)?;
        let mut warnings = Vec::new();
        let defaults = ProbeSettings::default();

        let probe = ProbeSettings {
            interval: Duration::from_millis(parse_or(
                "probe.interval_ms",
                raw.probe.interval_ms.as_deref(),
                defaults.interval.as_millis() as u64,
                |v| *v > 0,
                &mut warnings,
            )),
            reply_timeout: Duration::from_millis(parse_or(
                "probe.timeout_ms",
                raw.probe.timeout_ms.as_deref(),
                defaults.reply_timeout.as_millis() as u64,
                |v| *v > 0,
                &mut warnings,
            )),
            window_size: parse_or(
                "probe.window_size",
                raw.probe.window_size.as_deref(),
                defaults.window_size,
                |v| *v > 0,
                &mut warnings,
            ),
            window_seconds: parse_or(
                "probe.window_seconds",
                raw.probe.window_seconds.as_deref(),
                defaults.window_seconds,
                |v| *v > 0,
                &mut warnings,
            ),
        };

        let default_sink = if raw.smtp.host.is_empty() {
            SinkKind::Log
        } else {
            SinkKind::Email
        };
        let sink = match raw.alert.sink.as_deref() {
            None | Some("") => default_sink,
            Some(s) => s.parse().unwrap_or_else(|e| {
                warnings.push(e);
                default_sink
            }),
        };

        let log_level = match raw.log.level {
            Some(level) if parse_tracing_level(&level).is_ok() => level.to_lowercase(),
            Some(level) => {
                warnings.push(format!("Invalid log level: {}. Using info", level));
                "info".to_string()
            }
            None => "info".to_string(),
        };
        let log_format = match raw.log.format.as_deref().map(str::to_lowercase).as_deref() {
            None | Some("") | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                warnings.push(format!("Invalid log format: {}. Using text", other));
                LogFormat::Text
            }
        };

        let metrics_listen = match raw.metrics.listen.as_deref() {
            None | Some("") => None,
            Some(addr) => match addr.parse::<SocketAddr>() {
                Ok(addr) => Some(addr),
                Err(e) => {
                    warnings.push(format!("Invalid metrics.listen {}: {}", addr, e));
                    None
                }
            },
        };
        let enable_latency_history = parse_or(
            "metrics.latency_history",
            raw.metrics.latency_history.as_deref(),
            false,
            |_| true,
            &mut warnings,
        );

        Ok(Loaded {
            config: AppConfig {
                smtp: raw.smtp,
                mail: raw.mail,
                probe,
                sink,
                log_level,
                log_format,
                metrics_listen,
                enable_latency_history,
            },
            warnings,
        })
    }

    /// Get the log level as a tracing::Level
    pub fn get_tracing_level(&self) -> anyhow::Result<tracing::Level> {
        parse_tracing_level(&self.log_level)
    }
}

fn parse_tracing_level(level: &str) -> anyhow::Result<tracing::Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(tracing::Level::TRACE),
        "debug" => Ok(tracing::Level::DEBUG),
        "info" => Ok(tracing::Level::INFO),
        "warn" | "warning" => Ok(tracing::Level::WARN),
        "error" => Ok(tracing::Level::ERROR),
        _ => Err(anyhow::anyhow!("Invalid log level: {}. Valid levels are: trace, debug, info, warn, error", level)),
    }
}

fn parse_or<T>(
    key: &str,
    raw: Option<&str>,
    default: T,
    valid: impl Fn(&T) -> bool,
    warnings: &mut Vec<String>,
) -> T
where
    T: FromStr + std::fmt::Display,
{
    let Some(raw) = raw.filter(|s| !s.is_empty()) else {
        return default;
    };
    match raw.parse::<T>() {
        Ok(v) if valid(&v) => v,
        _ => {
            warnings.push(format!("Invalid {}: {}. Using {}", key, raw, default));
            default
        }
    }
}
