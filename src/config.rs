//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Statuses that mark a lead as an existing customer. Matched per word,
/// case-insensitively, against the uploaded `original_status` column.
pub const DEFAULT_CLOSED_STATUSES: &[&str] = &[
    "fechado", "fechou", "closed", "won", "ganho", "vendido", "cliente", "ativo", "contrato",
    "assinado",
];

/// Pacing limits for the dispatch loop.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Lower clamp for the inter-send delay.
    pub min_delay_secs: u64,
    /// Upper clamp for the inter-send delay.
    pub max_delay_secs: u64,
    /// Delay used when the caller does not pick one.
    pub default_delay_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            min_delay_secs: 30,
            max_delay_secs: 120,
            default_delay_secs: 45,
        }
    }
}

impl DispatchConfig {
    /// Build from `DISPATCH_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            min_delay_secs: env_parse("DISPATCH_MIN_DELAY_SECS", defaults.min_delay_secs)?,
            max_delay_secs: env_parse("DISPATCH_MAX_DELAY_SECS", defaults.max_delay_secs)?,
            default_delay_secs: env_parse(
                "DISPATCH_DEFAULT_DELAY_SECS",
                defaults.default_delay_secs,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that the clamp range is well formed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_delay_secs > self.max_delay_secs {
            return Err(ConfigError::InvalidValue {
                key: "DISPATCH_MIN_DELAY_SECS".into(),
                message: format!(
                    "minimum delay {}s exceeds maximum {}s",
                    self.min_delay_secs, self.max_delay_secs
                ),
            });
        }
        Ok(())
    }

    /// Clamp a requested delay into the configured range.
    pub fn clamp_delay(&self, requested: Option<u64>) -> u64 {
        // Not `clamp`: an inverted range must not panic.
        requested
            .unwrap_or(self.default_delay_secs)
            .max(self.min_delay_secs)
            .min(self.max_delay_secs)
    }
}

/// Safety filter policy.
#[derive(Debug, Clone)]
pub struct SafetyConfig {
    /// Country calling code prepended to national numbers.
    pub country_prefix: String,
    /// Leads contacted within this many days are not contacted again.
    pub dedup_window_days: u32,
    /// Closed/won vocabulary for `original_status`.
    pub closed_statuses: Vec<String>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            country_prefix: "55".to_string(),
            dedup_window_days: 30,
            closed_statuses: DEFAULT_CLOSED_STATUSES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl SafetyConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let country_prefix =
            std::env::var("LEADS_COUNTRY_PREFIX").unwrap_or(defaults.country_prefix);
        if country_prefix.is_empty() || !country_prefix.chars().all(|c| c.is_ascii_digit()) {
            return Err(ConfigError::InvalidValue {
                key: "LEADS_COUNTRY_PREFIX".into(),
                message: format!("expected digits, got {country_prefix:?}"),
            });
        }

        let closed_statuses = match std::env::var("LEADS_CLOSED_STATUSES") {
            Ok(raw) => raw
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            Err(_) => defaults.closed_statuses,
        };

        Ok(Self {
            country_prefix,
            dedup_window_days: env_parse("LEADS_DEDUP_WINDOW_DAYS", defaults.dedup_window_days)?,
            closed_statuses,
        })
    }
}

/// Qualification state machine tuning.
#[derive(Debug, Clone)]
pub struct QualificationConfig {
    /// Neutral replies after this many exchanges with little progress mark a lead curious.
    pub curious_after_exchanges: u32,
    /// Run keyword/regex extraction over reply text in addition to explicit signals.
    pub extract_from_text: bool,
    /// Characters of the latest reply kept on the lead card.
    pub last_message_chars: usize,
}

impl Default for QualificationConfig {
    fn default() -> Self {
        Self {
            curious_after_exchanges: 3,
            extract_from_text: true,
            last_message_chars: 100,
        }
    }
}

impl QualificationConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            curious_after_exchanges: env_parse(
                "QUALIFICATION_CURIOUS_AFTER",
                defaults.curious_after_exchanges,
            )?,
            extract_from_text: env_parse(
                "QUALIFICATION_EXTRACT_FROM_TEXT",
                defaults.extract_from_text,
            )?,
            last_message_chars: defaults.last_message_chars,
        })
    }
}

/// Campaign registry lifecycle.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Terminal campaigns are kept this long for status polling.
    pub terminal_ttl: Duration,
    /// How often the prune task sweeps the registry.
    pub prune_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            terminal_ttl: Duration::from_secs(3600), // 1 hour
            prune_interval: Duration::from_secs(60),
        }
    }
}

impl RegistryConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            terminal_ttl: Duration::from_secs(env_parse(
                "REGISTRY_TERMINAL_TTL_SECS",
                defaults.terminal_ttl.as_secs(),
            )?),
            prune_interval: Duration::from_secs(env_parse(
                "REGISTRY_PRUNE_INTERVAL_SECS",
                defaults.prune_interval.as_secs(),
            )?),
        })
    }
}

/// Process-level settings for the binary.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    /// WhatsApp gateway webhook. `None` leaves the transport unconfigured.
    pub webhook_url: Option<String>,
    pub webhook_token: Option<SecretString>,
    pub request_timeout: Duration,
    /// Optional directory for rolling log files.
    pub log_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            db_path: PathBuf::from("./data/lead-dispatch.db"),
            webhook_url: None,
            webhook_token: None,
            request_timeout: Duration::from_secs(10),
            log_dir: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            port: env_parse("LEAD_DISPATCH_PORT", defaults.port)?,
            db_path: std::env::var("LEAD_DISPATCH_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            webhook_url: std::env::var("WHATSAPP_WEBHOOK_URL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            webhook_token: std::env::var("WHATSAPP_WEBHOOK_TOKEN")
                .ok()
                .filter(|s| !s.is_empty())
                .map(SecretString::from),
            request_timeout: Duration::from_secs(env_parse(
                "WHATSAPP_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?),
            log_dir: std::env::var("LEAD_DISPATCH_LOG_DIR").ok().map(PathBuf::from),
        })
    }
}

/// Everything the engine needs, grouped by concern.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub dispatch: DispatchConfig,
    pub safety: SafetyConfig,
    pub qualification: QualificationConfig,
    pub registry: RegistryConfig,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            dispatch: DispatchConfig::from_env()?,
            safety: SafetyConfig::from_env()?,
            qualification: QualificationConfig::from_env()?,
            registry: RegistryConfig::from_env()?,
        })
    }
}

/// Read and parse an environment variable, falling back to `default` when unset.
fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
