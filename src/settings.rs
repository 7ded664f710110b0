// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Engine Settings
//!
//! Loads the engine inputs with figment, lowest precedence first:
//!
//! 1. embedded defaults,
//! 2. an optional TOML file,
//! 3. environment variables with the loader prefix (`MQ_HOST`, `MQ_QUEUE_NAME`,
//!    `MQ_LOGGING__LEVEL`, ...).
//!
//! The result is validated and then projected into the immutable
//! [`MQConfiguration`] and [`RetryPolicy`] the engine runs on.

use crate::{configs::MQConfiguration, errors::SettingsError, retry::RetryPolicy};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` overrides it.
    pub level: String,
    /// Log format (json, human)
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "human".to_owned(),
        }
    }
}

/// Everything the engine reads from the environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineSettings {
    /// Connection name reported to the broker
    pub app_name: String,
    pub host: String,
    pub port: u16,
    pub vhost: String,
    pub user: String,
    pub password: String,
    /// Wait for broker confirms on every publish
    pub confirms: bool,
    /// Exchange the main queue is bound to; empty means the default exchange
    pub exchange: String,
    pub queue_name: String,
    /// Defaults to `<queue_name>.retry`
    pub retry_queue_name: Option<String>,
    /// Defaults to `<queue_name>.dlq`
    pub dead_letter_queue_name: Option<String>,
    /// Delay, in milliseconds, a message spends in the retry queue
    pub retry_ttl: u32,
    pub retry_max_attempts: u32,
    pub logging: LoggingSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            app_name: "mqengine".to_owned(),
            host: "localhost".to_owned(),
            port: 5672,
            vhost: "/".to_owned(),
            user: "guest".to_owned(),
            password: "guest".to_owned(),
            confirms: true,
            exchange: String::new(),
            queue_name: String::new(),
            retry_queue_name: None,
            dead_letter_queue_name: None,
            retry_ttl: 30_000,
            retry_max_attempts: 3,
            logging: LoggingSettings::default(),
        }
    }
}

impl EngineSettings {
    pub fn mq_configuration(&self) -> MQConfiguration {
        MQConfiguration::new()
            .credentials(&self.user, &self.password)
            .host(&self.host)
            .port(self.port)
            .vhost(&self.vhost)
            .app_name(&self.app_name)
            .confirms(self.confirms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            &self.exchange,
            &self.queue_name,
            &self.retry_queue(),
            &self.dead_letter_queue(),
            self.retry_ttl,
            self.retry_max_attempts,
        )
    }

    fn retry_queue(&self) -> String {
        self.retry_queue_name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("{}.retry", self.queue_name))
    }

    fn dead_letter_queue(&self) -> String {
        self.dead_letter_queue_name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("{}.dlq", self.queue_name))
    }

    /// The settings as JSON with the password masked, safe to print or serve.
    pub fn masked(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Some(password) = value.get_mut("password") {
            *password = Value::String(mask_sensitive(&self.password));
        }
        value
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.host.trim().is_empty() {
            return Err(SettingsError::Validation("host must not be empty".to_owned()));
        }
        if self.queue_name.trim().is_empty() {
            return Err(SettingsError::Validation(
                "queue_name must not be empty".to_owned(),
            ));
        }
        if i32::try_from(self.retry_ttl).is_err() {
            return Err(SettingsError::Validation(format!(
                "retry_ttl {} does not fit in 32 bits",
                self.retry_ttl
            )));
        }
        if self.retry_queue() == self.queue_name || self.dead_letter_queue() == self.queue_name {
            return Err(SettingsError::Validation(
                "retry and dead letter queues must differ from the main queue".to_owned(),
            ));
        }
        if self.retry_queue() == self.dead_letter_queue() {
            return Err(SettingsError::Validation(
                "retry and dead letter queues must differ".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Keeps the first and last 2 characters of values of 8 characters or more.
pub fn mask_sensitive(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() >= 8 {
        let head: String = chars[..2].iter().collect();
        let tail: String = chars[chars.len() - 2..].iter().collect();
        format!("{head}****{tail}")
    } else {
        "****".to_owned()
    }
}

/// Settings loader with layered overrides.
pub struct SettingsLoader {
    prefix: String,
    file: Option<PathBuf>,
}

impl SettingsLoader {
    /// `prefix` selects the environment variables, `MQ` reads `MQ_*`.
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches('_').to_uppercase(),
            file: None,
        }
    }

    /// Reads this TOML file, when it exists, between the defaults and the environment.
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    pub fn load(&self) -> Result<EngineSettings, SettingsError> {
        let mut figment = Figment::new().merge(Serialized::defaults(EngineSettings::default()));

        if let Some(path) = self.file.as_ref().filter(|path| path.exists()) {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed(&format!("{}_", self.prefix)).split("__"));

        let settings: EngineSettings = figment.extract()?;
        settings.validate()?;

        Ok(settings)
    }
}
