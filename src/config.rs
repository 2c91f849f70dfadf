use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{KitchenPaError, Result};

pub const DEFAULT_TIMEZONE: &str = "Europe/London";
pub const DEFAULT_USER_NAME: &str = "Sam";
pub const DEFAULT_ASSISTANT_NAME: &str = "Pip";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MemoryConfig {
    pub embedding_model: Option<String>,
    pub top_k: Option<usize>,
    pub fallback_limit: Option<usize>,
    pub short_cap: Option<usize>,
    pub long_cap: Option<usize>,
    pub harvest_enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AssistantConfig {
    pub user_name: Option<String>,
    pub assistant_name: Option<String>,
    pub history_hours: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReminderConfig {
    pub tick_seconds: Option<u64>,
    pub arm_poll_seconds: Option<u64>,
    pub snooze_minutes: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SpeechConfig {
    pub voice: Option<String>,
    pub format: Option<String>,
    pub input_format: Option<String>,
    pub language: Option<String>,
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DaemonConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    pub openai: Option<OpenAiConfig>,
    pub memory: Option<MemoryConfig>,
    pub assistant: Option<AssistantConfig>,
    pub reminders: Option<ReminderConfig>,
    pub speech: Option<SpeechConfig>,
    pub daemon: Option<DaemonConfig>,
    pub timezone: Option<String>,
    pub sqlite_path: Option<String>,
}

impl Config {
    pub fn convention_defaults(db_path: &str) -> Self {
        Self {
            openai: Some(OpenAiConfig {
                api_key: None,
                model: Some("gpt-4.1-mini".to_string()),
                base_url: None,
            }),
            memory: Some(MemoryConfig {
                embedding_model: Some("text-embedding-3-small".to_string()),
                top_k: Some(8),
                fallback_limit: Some(20),
                short_cap: Some(300),
                long_cap: Some(200),
                harvest_enabled: Some(true),
            }),
            assistant: Some(AssistantConfig {
                user_name: Some(DEFAULT_USER_NAME.to_string()),
                assistant_name: Some(DEFAULT_ASSISTANT_NAME.to_string()),
                history_hours: Some(24),
            }),
            reminders: Some(ReminderConfig {
                tick_seconds: Some(5),
                arm_poll_seconds: Some(60),
                snooze_minutes: Some(10),
            }),
            speech: Some(SpeechConfig {
                voice: Some("fable".to_string()),
                format: Some("opus".to_string()),
                input_format: Some("webm".to_string()),
                language: Some("en".to_string()),
                workers: Some(1),
            }),
            daemon: Some(DaemonConfig {
                host: Some("127.0.0.1".to_string()),
                port: Some(7979),
                token: None,
            }),
            timezone: Some(DEFAULT_TIMEZONE.to_string()),
            sqlite_path: Some(db_path.to_string()),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            KitchenPaError::Config(format!(
                "failed to read {}: {e}",
                path.as_ref().to_string_lossy()
            ))
        })?;
        serde_json::from_str(&content).map_err(|e| KitchenPaError::Config(e.to_string()))
    }

    /// Reads the config file if present, otherwise falls back to convention defaults.
    /// Environment overrides are applied in both cases.
    pub fn load(config_path: &str, db_path: &str) -> Result<Self> {
        let mut config = if Path::new(config_path).exists() {
            let mut config = Self::from_file(config_path)?;
            if config.sqlite_path.is_none() {
                config.sqlite_path = Some(db_path.to_string());
            }
            config
        } else {
            tracing::info!(config_path, "Config file not found; using convention defaults");
            Self::convention_defaults(db_path)
        };
        config.apply_env_overrides();
        config.timezone()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        let openai = self.openai.get_or_insert_with(OpenAiConfig::default);
        for (var, slot) in [
            ("OPENAI_API_KEY", &mut openai.api_key),
            ("OPENAI_MODEL", &mut openai.model),
            ("OPENAI_BASE_URL", &mut openai.base_url),
        ] {
            if let Ok(value) = std::env::var(var) {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    *slot = Some(trimmed.to_string());
                }
            }
        }
    }

    pub fn timezone(&self) -> Result<Tz> {
        let name = self
            .timezone
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_TIMEZONE);
        name.parse::<Tz>()
            .map_err(|_| KitchenPaError::Config(format!("unknown timezone `{name}`")))
    }

    pub fn sqlite_path(&self) -> String {
        self.sqlite_path
            .clone()
            .filter(|path| !path.trim().is_empty())
            .unwrap_or_else(crate::runtime_paths::default_db_path)
    }

    pub fn user_name(&self) -> String {
        self.assistant
            .as_ref()
            .and_then(|a| a.user_name.clone())
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_USER_NAME.to_string())
    }

    pub fn assistant_name(&self) -> String {
        self.assistant
            .as_ref()
            .and_then(|a| a.assistant_name.clone())
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ASSISTANT_NAME.to_string())
    }

    pub fn history_hours(&self) -> i64 {
        self.assistant
            .as_ref()
            .and_then(|a| a.history_hours)
            .unwrap_or(24)
            .max(1)
    }

    pub fn memory(&self) -> MemoryConfig {
        self.memory.clone().unwrap_or_default()
    }

    pub fn reminders(&self) -> ReminderConfig {
        self.reminders.clone().unwrap_or_default()
    }

    pub fn speech(&self) -> SpeechConfig {
        self.speech.clone().unwrap_or_default()
    }

    pub fn daemon(&self) -> DaemonConfig {
        self.daemon.clone().unwrap_or_default()
    }
}
