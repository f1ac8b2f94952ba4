use std::{fs, io, path::Path, time::Duration};

use anyhow::Context;
use serde::Deserialize;

use crate::todos::Todo;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log_filter: String,
    pub latency_ms: u64,
    pub failure_text: String,
    pub initial_todos: Vec<Todo>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_filter: "info".into(),
            latency_ms: 100,
            failure_text: "error".into(),
            initial_todos: vec![
                Todo {
                    id: 1,
                    text: "Do the laundry".into(),
                    completed: true,
                },
                Todo {
                    id: 2,
                    text: "Call mom".into(),
                    completed: false,
                },
            ],
        }
    }
}

impl Settings {
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }
}

/// Defaults, then `path` if it exists, then environment overrides.
pub fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => parse_settings(&raw)
            .with_context(|| format!("invalid settings file {}", path.display()))?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => Settings::default(),
        Err(err) => {
            return Err(err).with_context(|| format!("reading settings file {}", path.display()))
        }
    };

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn parse_settings(raw: &str) -> anyhow::Result<Settings> {
    Ok(toml::from_str::<Settings>(raw)?)
}

/// `TODO_DEMO_*` variables first, `APP__*` variables win over them.
fn apply_env_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("TODO_DEMO_LOG") {
        settings.log_filter = v;
    }
    if let Some(v) = lookup("APP__LOG_FILTER") {
        settings.log_filter = v;
    }

    for key in ["TODO_DEMO_LATENCY_MS", "APP__LATENCY_MS"] {
        if let Some(parsed) = lookup(key).and_then(|v| v.parse::<u64>().ok()) {
            settings.latency_ms = parsed;
        }
    }

    if let Some(v) = lookup("TODO_DEMO_FAILURE_TEXT") {
        settings.failure_text = v;
    }
    if let Some(v) = lookup("APP__FAILURE_TEXT") {
        settings.failure_text = v;
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
