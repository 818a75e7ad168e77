use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::services::attempt_session::SessionSettings;
use crate::services::notifications::StompSettings;
use crate::utils::retry::RetryConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub attempt: AttemptConfig,
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub auth_token: Option<String>,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttemptConfig {
    pub autosave_debounce_ms: u64,
    pub tick_interval_ms: u64,
    pub time_warning_seconds: u32,
    pub start_retry_attempts: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    pub ws_url: String,
    pub host: Option<String>,
    pub login: Option<String>,
    pub passcode: Option<String>,
    pub heartbeat_outgoing_ms: u64,
    pub heartbeat_incoming_ms: u64,
    pub connect_timeout_secs: u64,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub topics: Vec<String>,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load environment variables from root .env file (two levels up)
        // Try root .env first, then fallback to local .env
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        // Determine environment (defaults to dev)
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // Build configuration from config/*.toml + ENV overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", app_env)).required(false))
            // Override with environment variables (APP__SECTION__KEY)
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        Self::from_settings(&settings)
    }

    /// Resolves every value from `settings`, falling back to legacy env
    /// variables and then to defaults.
    pub fn from_settings(settings: &config::Config) -> Result<Self, config::ConfigError> {
        let api = ApiConfig {
            base_url: string_or(settings, "api.base_url", "LMS_API_URL", "http://localhost:8080/api"),
            auth_token: optional_string(settings, "api.auth_token", "LMS_AUTH_TOKEN"),
            request_timeout_secs: number_or(settings, "api.request_timeout_secs", "LMS_API_TIMEOUT_SECS", 30)?,
        };

        let attempt = AttemptConfig {
            autosave_debounce_ms: number_or(settings, "attempt.autosave_debounce_ms", "AUTOSAVE_DEBOUNCE_MS", 5000)?,
            tick_interval_ms: number_or(settings, "attempt.tick_interval_ms", "TIMER_TICK_INTERVAL_MS", 1000)?,
            time_warning_seconds: number_or(settings, "attempt.time_warning_seconds", "TIME_WARNING_SECONDS", 60)?,
            start_retry_attempts: number_or(settings, "attempt.start_retry_attempts", "START_RETRY_ATTEMPTS", 3)?,
        };

        let topics = settings
            .get::<Vec<String>>("notifications.topics")
            .ok()
            .or_else(|| {
                optional_string(settings, "notifications.topics", "LMS_NOTIFICATION_TOPICS")
                    .map(|raw| split_list(&raw))
            })
            .unwrap_or_else(|| vec!["/user/queue/notifications".to_string()]);

        let notifications = NotificationConfig {
            ws_url: string_or(settings, "notifications.ws_url", "LMS_WS_URL", "ws://localhost:8080/ws"),
            host: optional_string(settings, "notifications.host", "LMS_WS_HOST"),
            login: optional_string(settings, "notifications.login", "LMS_WS_LOGIN"),
            passcode: optional_string(settings, "notifications.passcode", "LMS_WS_PASSCODE"),
            heartbeat_outgoing_ms: number_or(settings, "notifications.heartbeat_outgoing_ms", "LMS_WS_HEARTBEAT_OUT_MS", 10_000)?,
            heartbeat_incoming_ms: number_or(settings, "notifications.heartbeat_incoming_ms", "LMS_WS_HEARTBEAT_IN_MS", 10_000)?,
            connect_timeout_secs: number_or(settings, "notifications.connect_timeout_secs", "LMS_WS_CONNECT_TIMEOUT_SECS", 10)?,
            reconnect_base_ms: number_or(settings, "notifications.reconnect_base_ms", "LMS_WS_RECONNECT_BASE_MS", 1000)?,
            reconnect_max_ms: number_or(settings, "notifications.reconnect_max_ms", "LMS_WS_RECONNECT_MAX_MS", 30_000)?,
            topics,
        };

        if attempt.tick_interval_ms == 0 {
            return Err(config::ConfigError::Message(
                "attempt.tick_interval_ms must be greater than zero".to_string(),
            ));
        }

        Ok(Config {
            api,
            attempt,
            notifications,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            autosave_delay: Duration::from_millis(self.attempt.autosave_debounce_ms),
            tick_interval: Duration::from_millis(self.attempt.tick_interval_ms),
            time_warning_seconds: self.attempt.time_warning_seconds,
            start_retry: RetryConfig {
                max_attempts: self.attempt.start_retry_attempts.max(1),
                ..RetryConfig::default()
            },
            ..SessionSettings::default()
        }
    }

    pub fn stomp_settings(&self) -> StompSettings {
        let n = &self.notifications;
        StompSettings {
            url: n.ws_url.clone(),
            host: n.host.clone(),
            login: n.login.clone(),
            passcode: n.passcode.clone(),
            heartbeat_outgoing: Duration::from_millis(n.heartbeat_outgoing_ms),
            heartbeat_incoming: Duration::from_millis(n.heartbeat_incoming_ms),
            connect_timeout: Duration::from_secs(n.connect_timeout_secs),
            reconnect: RetryConfig::reconnect(
                Duration::from_millis(n.reconnect_base_ms),
                Duration::from_millis(n.reconnect_max_ms),
            ),
        }
    }
}

fn raw_value(settings: &config::Config, key: &str, env_key: &str) -> Option<String> {
    settings
        .get_string(key)
        .or_else(|_| env::var(env_key))
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn string_or(settings: &config::Config, key: &str, env_key: &str, default: &str) -> String {
    raw_value(settings, key, env_key).unwrap_or_else(|| default.to_string())
}

fn optional_string(settings: &config::Config, key: &str, env_key: &str) -> Option<String> {
    raw_value(settings, key, env_key)
}

fn number_or<T: FromStr>(
    settings: &config::Config,
    key: &str,
    env_key: &str,
    default: T,
) -> Result<T, config::ConfigError> {
    match raw_value(settings, key, env_key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| config::ConfigError::Message(format!("{key}: invalid number {raw:?}"))),
        None => Ok(default),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(overrides: &[(&str, &str)]) -> config::Config {
        let mut builder = config::Config::builder();
        for (key, value) in overrides {
            builder = builder.set_override(*key, *value).unwrap();
        }
        builder.build().unwrap()
    }

    #[test]
    fn overrides_win_over_defaults() {
        let config = Config::from_settings(&settings(&[
            ("api.base_url", "https://lms.example.org/api/v1"),
            ("attempt.autosave_debounce_ms", "2500"),
            ("notifications.topics", "/topic/a, /topic/b ,"),
        ]))
        .unwrap();

        assert_eq!(config.api.base_url, "https://lms.example.org/api/v1");
        assert_eq!(config.attempt.autosave_debounce_ms, 2500);
        assert_eq!(config.notifications.topics, vec!["/topic/a", "/topic/b"]);
        assert_eq!(
            config.session_settings().autosave_delay,
            Duration::from_millis(2500)
        );
    }

    #[test]
    fn invalid_number_is_reported() {
        let err = Config::from_settings(&settings(&[("attempt.tick_interval_ms", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("attempt.tick_interval_ms"));
    }

    #[test]
    fn stomp_settings_mirror_notification_section() {
        let config = Config::from_settings(&settings(&[
            ("notifications.ws_url", "wss://lms.example.org/ws"),
            ("notifications.heartbeat_outgoing_ms", "0"),
            ("notifications.reconnect_base_ms", "250"),
        ]))
        .unwrap();
        let stomp = config.stomp_settings();

        assert_eq!(stomp.url, "wss://lms.example.org/ws");
        assert_eq!(stomp.heartbeat_outgoing, Duration::ZERO);
        assert_eq!(stomp.reconnect.base_backoff, Duration::from_millis(250));
        assert_eq!(stomp.reconnect.max_attempts, usize::MAX);
    }
}
