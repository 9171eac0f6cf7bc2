// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Logging setup for the rescheduling engine.
//!
//! - Configuration loaded from:
//!   1. Environment variables (highest priority).
//!   2. Optional TOML file pointed to by the `RESCHED_LOGGING_CONFIG_PATH`
//!      environment variable.
//!
//! Output is `READABLE` by default; `JSONL` can be enabled by setting the
//! `RESCHED_LOGGING_JSONL` environment variable to `1`. Filters are
//! comma-separated `target=level` pairs under the `RESCHED_LOG` environment
//! variable or the `log_filters` TOML key; the default level is `info`.

use std::collections::HashMap;
use std::sync::Once;

use figment::{
    providers::{Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// ENV used to set the log level.
const FILTER_ENV: &str = "RESCHED_LOG";

/// Default log level.
const DEFAULT_FILTER_LEVEL: &str = "info";

/// ENV used to set the path to the logging configuration file.
const CONFIG_PATH_ENV: &str = "RESCHED_LOGGING_CONFIG_PATH";

/// ENV toggling JSONL output.
const JSONL_ENV: &str = "RESCHED_LOGGING_JSONL";

/// ENV disabling ANSI escapes in readable output.
const DISABLE_ANSI_ENV: &str = "RESCHED_DISABLE_ANSI_LOGGING";

/// Once instance to ensure the logger is only initialized once.
static INIT: Once = Once::new();

#[derive(Serialize, Deserialize, Debug)]
struct LoggingConfig {
    log_level: String,
    log_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            log_level: DEFAULT_FILTER_LEVEL.to_string(),
            log_filters: HashMap::from([
                ("kube_client".to_string(), "error".to_string()),
                ("tower".to_string(), "error".to_string()),
                ("hyper_util".to_string(), "error".to_string()),
                ("rustls".to_string(), "error".to_string()),
            ]),
        }
    }
}

impl LoggingConfig {
    fn from_settings() -> Self {
        let mut figment = Figment::from(Serialized::defaults(LoggingConfig::default()));
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            figment = figment.merge(Toml::file(path));
        }
        figment.extract().unwrap_or_default()
    }

    fn filter(&self) -> EnvFilter {
        let mut directives = vec![self.log_level.clone()];
        directives.extend(
            self.log_filters
                .iter()
                .map(|(target, level)| format!("{target}={level}")),
        );
        // RESCHED_LOG wins over everything from the file.
        if let Ok(env) = std::env::var(FILTER_ENV) {
            directives.push(env);
        }
        directives
            .iter()
            .fold(EnvFilter::new(""), |filter, directive| {
                match directive.parse() {
                    Ok(d) => filter.add_directive(d),
                    Err(e) => {
                        eprintln!("ignoring invalid log directive {directive:?}: {e}");
                        filter
                    }
                }
            })
    }
}

fn env_is_truthy(name: &str) -> bool {
    matches!(
        std::env::var(name).as_deref(),
        Ok("1") | Ok("true") | Ok("on")
    )
}

/// Initialize the global tracing subscriber. Safe to call more than once;
/// only the first call takes effect.
pub fn init() {
    INIT.call_once(|| {
        let config = LoggingConfig::from_settings();
        let filter = config.filter();

        if env_is_truthy(JSONL_ENV) {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().flatten_event(true))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_ansi(!env_is_truthy(DISABLE_ANSI_ENV)))
                .init();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_builds_filter() {
        let config = LoggingConfig::default();
        // Must not panic on the built-in directives.
        let _ = config.filter();
    }

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
    }
}
