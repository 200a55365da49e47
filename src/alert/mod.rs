use std::io;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::config::{AppConfig, SinkKind};

pub mod smtp;

pub use smtp::EmailSink;

/// Notification about one burst of timeouts. Built when the burst is detected
/// and dropped once dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertEvent {
    pub host: String,
    pub subject: String,
    pub body: String,
}

impl AlertEvent {
    pub fn network_exception(host: &str) -> Self {
        Self {
            host: host.to_string(),
            subject: format!("WARNING: Host({}) network exception", host),
            body: format!("WARNING: Host({}) network exception, Please check it!", host),
        }
    }
}

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("alert sink is not configured: {0}")]
    NotConfigured(String),

    #[error("smtp i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("smtp server rejected {command}: {code} {message}")]
    Rejected {
        command: String,
        code: u16,
        message: String,
    },

    #[error("malformed smtp reply: {0:?}")]
    Protocol(String),
}

/// Where alerts go. Dispatch failures are reported, never retried.
pub trait AlertSink: Send {
    fn name(&self) -> &'static str;

    fn dispatch(&self, event: &AlertEvent) -> Result<(), AlertError>;
}

/// Writes alerts to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl AlertSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn dispatch(&self, event: &AlertEvent) -> Result<(), AlertError> {
        let payload = serde_json::to_string(event)
            .map_err(|e| AlertError::Protocol(e.to_string()))?;
        warn!(host = %event.host, alert = %payload, "{}", event.subject);
        Ok(())
    }
}

pub fn sink_from_config(config: &AppConfig) -> Box<dyn AlertSink> {
    match config.sink {
        SinkKind::Email => Box::new(EmailSink::from_config(config)),
        SinkKind::Log => Box::new(LogSink),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SmtpConfig;

    #[test]
    fn network_exception_wording() {
        let event = AlertEvent::network_exception("10.0.0.1");
        assert_eq!(event.host, "10.0.0.1");
        assert_eq!(event.subject, "WARNING: Host(10.0.0.1) network exception");
        assert_eq!(event.body, "WARNING: Host(10.0.0.1) network exception, Please check it!");
    }

    #[test]
    fn log_sink_always_succeeds() {
        let sink = LogSink;
        assert_eq!(sink.name(), "log");
        assert!(sink.dispatch(&AlertEvent::network_exception("10.0.0.1")).is_ok());
    }

    #[test]
    fn sink_follows_config() {
        let mut config = AppConfig::default();
        assert_eq!(sink_from_config(&config).name(), "log");

        config.sink = SinkKind::Email;
        config.smtp = SmtpConfig {
            host: "mx.example.com".into(),
            ..Default::default()
        };
        assert_eq!(sink_from_config(&config).name(), "email");
    }
}
