use crate::models::ThresholdRules;
use std::{env, str::FromStr, time::Duration};
use tracing::warn;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;
pub const DEFAULT_WINDOW_DAYS: i64 = 3;
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_AI_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub max_upload_bytes: usize,
    pub window_days: i64,
    pub rules: ThresholdRules,
    pub openai_base_url: String,
    pub openai_model: String,
    /// Only used when a request does not bring its own key.
    pub openai_api_key: Option<String>,
    pub ai_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            window_days: DEFAULT_WINDOW_DAYS,
            rules: ThresholdRules::default(),
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            openai_model: DEFAULT_OPENAI_MODEL.to_string(),
            openai_api_key: None,
            ai_timeout: Duration::from_secs(DEFAULT_AI_TIMEOUT_SECS),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let text = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let window_days = parsed(&lookup, "APP_WINDOW_DAYS", defaults.window_days);
        let window_days = if window_days < 1 {
            warn!(window_days, "APP_WINDOW_DAYS must be at least 1, using default");
            defaults.window_days
        } else {
            window_days
        };

        Self {
            port: parsed(&lookup, "PORT", defaults.port),
            max_upload_bytes: parsed(&lookup, "APP_MAX_UPLOAD_BYTES", defaults.max_upload_bytes),
            window_days,
            rules: ThresholdRules {
                scale_up_pct: parsed(&lookup, "APP_SCALE_UP_PCT", defaults.rules.scale_up_pct),
                investigate_pct: parsed(
                    &lookup,
                    "APP_INVESTIGATE_PCT",
                    defaults.rules.investigate_pct,
                ),
                trend_pct: parsed(&lookup, "APP_TREND_PCT", defaults.rules.trend_pct),
                drop_pct: parsed(&lookup, "APP_DROP_PCT", defaults.rules.drop_pct),
            },
            openai_base_url: text("OPENAI_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.openai_base_url),
            openai_model: text("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            openai_api_key: text("OPENAI_API_KEY"),
            ai_timeout: Duration::from_secs(parsed(
                &lookup,
                "APP_AI_TIMEOUT_SECS",
                DEFAULT_AI_TIMEOUT_SECS,
            )),
        }
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, "invalid setting, using default");
                default
            }
        },
        None => default,
    }
}
