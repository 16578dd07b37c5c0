// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-level configuration for the demo binary (spec §2 ambient stack).
//!
//! Distinct from [`crate::nan_config::ConfigRequest`], which is client-level
//! NAN configuration data flowing through the control API. This is the
//! handful of knobs the state manager would otherwise hardcode as
//! constants: timeouts, queue-capacity hints, and logging setup.

use std::time::Duration;

use clap::Parser;

/// Host-side NAN control plane.
#[derive(Debug, Parser)]
#[command(name = "nan-cored", version, about)]
pub struct Config {
    /// HAL command response timeout in milliseconds.
    #[arg(long, env = "NAN_RESPONSE_TIMEOUT_MS", default_value = "5000")]
    pub response_timeout_ms: u64,

    /// Firmware-queued send-message timeout in milliseconds.
    #[arg(long, env = "NAN_SEND_MESSAGE_TIMEOUT_MS", default_value = "10000")]
    pub send_message_timeout_ms: u64,

    /// Data-path confirmation timeout in milliseconds.
    #[arg(long, env = "NAN_DATA_PATH_CONFIRM_TIMEOUT_MS", default_value = "5000")]
    pub data_path_confirm_timeout_ms: u64,

    /// Dispatcher event channel capacity hint.
    #[arg(long, env = "NAN_EVENT_QUEUE_CAPACITY", default_value = "256")]
    pub event_queue_capacity: usize,

    /// Log format (json or text).
    #[arg(long, env = "NAN_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "NAN_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.event_queue_capacity == 0 {
            anyhow::bail!("--event-queue-capacity must be greater than zero");
        }
        self.log_format_enum()?;
        Ok(())
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn send_message_timeout(&self) -> Duration {
        Duration::from_millis(self.send_message_timeout_ms)
    }

    pub fn data_path_confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.data_path_confirm_timeout_ms)
    }

    /// Parse the log format string into an enum.
    pub fn log_format_enum(&self) -> anyhow::Result<LogFormat> {
        match self.log_format.to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" => Ok(LogFormat::Text),
            other => anyhow::bail!("invalid log format: {other}"),
        }
    }
}

/// Supported log output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
