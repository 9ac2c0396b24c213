use std::fmt::Formatter;
use std::str::FromStr;
use std::time::Duration;

use crate::collector::cursor::IncrementStrategy;
use crate::collector::rate_limiter::RateLimitPolicy;
use crate::collector::{CollectOptions, DelayPolicy, DEFAULT_CHECKPOINT_EVERY, DEFAULT_ERROR_THRESHOLD};
use crate::postcode::{Cep, CepRange};
use crate::providers::{ProviderKind, RetryPolicy};
use crate::text::CityFilter;

const DEFAULT_DB_POOL_SIZE: u32 = 15;
const DEFAULT_RANGE_START: u32 = 38_400_000;
const DEFAULT_RANGE_END: u32 = 38_499_999;
const DEFAULT_MAX_RESULTS: u64 = 100;
const DEFAULT_PROVIDERS: &str = "viacep,brasilapi,awesomeapi";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, PartialEq)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid { key: &'static str, value: String, reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "{} must be set", key),
            ConfigError::Invalid { key, value, reason } => {
                write!(f, "Invalid {}='{}': {}", key, value, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Pacing presets matching how aggressively the public CEP services can be
/// queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Careful,
    Standard,
    Fast,
}

impl Profile {
    pub fn rate_limit(self) -> RateLimitPolicy {
        let (min_delay_ms, max_per_window) = match self {
            Profile::Careful => (8_000, 8),
            Profile::Standard => (2_000, 25),
            Profile::Fast => (1_000, 50),
        };
        RateLimitPolicy {
            min_delay: Duration::from_millis(min_delay_ms),
            window: Duration::from_secs(60),
            max_per_window,
        }
    }

    pub fn retry(self) -> RetryPolicy {
        let (max_retries, backoff_ms) = match self {
            Profile::Careful => (3, 5_000),
            Profile::Standard => (2, 2_000),
            Profile::Fast => (2, 1_000),
        };
        RetryPolicy { max_retries, backoff_base: Duration::from_millis(backoff_ms) }
    }

    pub fn cooldown(self) -> Duration {
        match self {
            Profile::Careful => Duration::from_secs(60),
            Profile::Standard | Profile::Fast => Duration::from_secs(30),
        }
    }
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "careful" => Ok(Profile::Careful),
            "standard" => Ok(Profile::Standard),
            "fast" => Ok(Profile::Fast),
            other => Err(format!("unknown profile '{}', expected careful, standard or fast", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub range: CepRange,
    pub start_override: Option<Cep>,
    pub max_results: u64,
    pub city_filter: Option<CityFilter>,
    pub providers: Vec<ProviderKind>,
    pub retry: RetryPolicy,
    pub delay: DelayPolicy,
    pub increment: IncrementStrategy,
    pub http_timeout: Duration,
    pub checkpoint_every: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<AppConfig, ConfigError> {
        dotenv::dotenv().ok();
        AppConfig::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<AppConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let database = DatabaseConfig {
            url: env.get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?,
            pool_size: env.parse("DATABASE_POOL_SIZE")?.unwrap_or(DEFAULT_DB_POOL_SIZE),
        };

        let start: Cep = env
            .parse("CEP_RANGE_START")?
            .or_else(|| Cep::new(DEFAULT_RANGE_START))
            .ok_or(ConfigError::Missing("CEP_RANGE_START"))?;
        let end: Cep = env
            .parse("CEP_RANGE_END")?
            .or_else(|| Cep::new(DEFAULT_RANGE_END))
            .ok_or(ConfigError::Missing("CEP_RANGE_END"))?;
        let range = CepRange::new(start, end).ok_or_else(|| ConfigError::Invalid {
            key: "CEP_RANGE_END",
            value: end.to_string(),
            reason: format!("range ends before it starts ({})", start),
        })?;

        let start_override: Option<Cep> = env.parse("CEP_START")?;
        if let Some(code) = start_override {
            if !range.contains(code) {
                return Err(ConfigError::Invalid {
                    key: "CEP_START",
                    value: code.to_string(),
                    reason: format!("outside of {}", range),
                });
            }
        }

        let profile: Profile = env.parse("CEP_PROFILE")?.unwrap_or(Profile::Standard);
        let defaults = profile.rate_limit();
        let rate = RateLimitPolicy {
            min_delay: env
                .parse::<u64>("CEP_REQUEST_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.min_delay),
            window: defaults.window,
            max_per_window: env
                .parse("CEP_REQUESTS_PER_MINUTE")?
                .unwrap_or(defaults.max_per_window),
        };
        if rate.max_per_window == 0 {
            return Err(ConfigError::Invalid {
                key: "CEP_REQUESTS_PER_MINUTE",
                value: "0".to_string(),
                reason: "must allow at least one request".to_string(),
            });
        }

        let delay = DelayPolicy {
            rate,
            error_threshold: env.parse("CEP_ERROR_THRESHOLD")?.unwrap_or(DEFAULT_ERROR_THRESHOLD),
            cooldown: env
                .parse::<u64>("CEP_COOLDOWN_SECS")?
                .map(Duration::from_secs)
                .unwrap_or_else(|| profile.cooldown()),
        };

        let default_retry = profile.retry();
        let retry = RetryPolicy {
            max_retries: env.parse("CEP_MAX_RETRIES")?.unwrap_or(default_retry.max_retries),
            backoff_base: env
                .parse::<u64>("CEP_BACKOFF_BASE_MS")?
                .map(Duration::from_millis)
                .unwrap_or(default_retry.backoff_base),
        };

        let providers_raw = env.get("CEP_PROVIDERS").unwrap_or_else(|| DEFAULT_PROVIDERS.to_string());
        let providers = providers_raw
            .split(',')
            .filter(|name| !name.trim().is_empty())
            .map(|name| name.parse::<ProviderKind>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|reason| ConfigError::Invalid {
                key: "CEP_PROVIDERS",
                value: providers_raw.clone(),
                reason,
            })?;
        if providers.is_empty() {
            return Err(ConfigError::Invalid {
                key: "CEP_PROVIDERS",
                value: providers_raw,
                reason: "at least one provider is required".to_string(),
            });
        }

        let increment = match env.get("CEP_INCREMENT").as_deref().map(str::trim) {
            None | Some("") | Some("sequential") => IncrementStrategy::Sequential,
            Some("skip-ahead") => IncrementStrategy::SkipAhead {
                after_misses: env.parse("CEP_SKIP_AFTER")?.unwrap_or(20),
                min_jump: env.parse("CEP_SKIP_MIN")?.unwrap_or(10),
                max_jump: env.parse("CEP_SKIP_MAX")?.unwrap_or(100),
                seed: env.parse("CEP_SKIP_SEED")?,
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "CEP_INCREMENT",
                    value: other.to_string(),
                    reason: "expected sequential or skip-ahead".to_string(),
                })
            }
        };

        Ok(AppConfig {
            database,
            range,
            start_override,
            max_results: env.parse("CEP_MAX_RESULTS")?.unwrap_or(DEFAULT_MAX_RESULTS),
            city_filter: env.get("CEP_CITY_FILTER").and_then(|city| CityFilter::new(&city)),
            providers,
            retry,
            delay,
            increment,
            http_timeout: Duration::from_secs(
                env.parse("CEP_HTTP_TIMEOUT_SECS")?.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS)
            ),
            checkpoint_every: env.parse("CEP_CHECKPOINT_EVERY")?.unwrap_or(DEFAULT_CHECKPOINT_EVERY),
        })
    }

    pub fn collect_options(&self) -> CollectOptions {
        CollectOptions {
            range: self.range,
            start_override: self.start_override,
            max_results: self.max_results,
            city_filter: self.city_filter.clone(),
            delay: self.delay.clone(),
            increment: self.increment.clone(),
            checkpoint_every: self.checkpoint_every,
        }
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Blank values count as unset.
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|value| !value.trim().is_empty())
    }

    fn parse<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            Some(value) => value
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|err| ConfigError::Invalid { key, value, reason: err.to_string() }),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[("DATABASE_URL", "postgres://localhost/ceps")]).unwrap();
        assert_eq!(config.database.pool_size, 15);
        assert_eq!(config.range.start.to_string(), "38400-000");
        assert_eq!(config.range.end.to_string(), "38499-999");
        assert_eq!(config.max_results, 100);
        assert_eq!(config.city_filter, None);
        assert_eq!(
            config.providers,
            vec![ProviderKind::ViaCep, ProviderKind::BrasilApi, ProviderKind::AwesomeApi]
        );
        assert_eq!(config.delay.rate, Profile::Standard.rate_limit());
        assert_eq!(config.retry, Profile::Standard.retry());
        assert_eq!(config.delay.error_threshold, 5);
        assert_eq!(config.increment, IncrementStrategy::Sequential);

        // Same defaults as options built in code
        let built = CollectOptions::new(config.range, config.max_results);
        assert_eq!(config.checkpoint_every, built.checkpoint_every);
        assert_eq!(config.delay.error_threshold, built.delay.error_threshold);
    }

    #[test]
    fn test_database_url_is_required() {
        assert_eq!(config(&[]).unwrap_err(), ConfigError::Missing("DATABASE_URL"));
    }

    #[test]
    fn test_profile_and_overrides() {
        let config = config(&[
            ("DATABASE_URL", "postgres://localhost/ceps"),
            ("CEP_PROFILE", "careful"),
            ("CEP_REQUESTS_PER_MINUTE", "4"),
            ("CEP_PROVIDERS", "brasilapi, viacep"),
            ("CEP_CITY_FILTER", "Uberlândia"),
            ("CEP_START", "38400-500"),
        ])
        .unwrap();
        assert_eq!(config.delay.rate.min_delay, Duration::from_secs(8));
        assert_eq!(config.delay.rate.max_per_window, 4);
        assert_eq!(config.delay.cooldown, Duration::from_secs(60));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.providers, vec![ProviderKind::BrasilApi, ProviderKind::ViaCep]);
        assert_eq!(config.city_filter.unwrap().normalized(), "UBERLANDIA");
        assert_eq!(config.start_override.unwrap().to_string(), "38400-500");
    }

    #[test]
    fn test_skip_ahead() {
        let config = config(&[
            ("DATABASE_URL", "postgres://localhost/ceps"),
            ("CEP_INCREMENT", "skip-ahead"),
            ("CEP_SKIP_SEED", "99"),
        ])
        .unwrap();
        assert_eq!(
            config.increment,
            IncrementStrategy::SkipAhead { after_misses: 20, min_jump: 10, max_jump: 100, seed: Some(99) }
        );
    }

    #[test]
    fn test_invalid_values() {
        let db = ("DATABASE_URL", "postgres://localhost/ceps");
        assert!(matches!(
            config(&[db, ("CEP_RANGE_START", "abc")]),
            Err(ConfigError::Invalid { key: "CEP_RANGE_START", .. })
        ));
        assert!(matches!(
            config(&[db, ("CEP_RANGE_START", "38500-000"), ("CEP_RANGE_END", "38400-000")]),
            Err(ConfigError::Invalid { key: "CEP_RANGE_END", .. })
        ));
        assert!(matches!(
            config(&[db, ("CEP_START", "01001-000")]),
            Err(ConfigError::Invalid { key: "CEP_START", .. })
        ));
        assert!(matches!(
            config(&[db, ("CEP_PROVIDERS", "viacep,postmon")]),
            Err(ConfigError::Invalid { key: "CEP_PROVIDERS", .. })
        ));
        assert!(matches!(
            config(&[db, ("CEP_REQUESTS_PER_MINUTE", "0")]),
            Err(ConfigError::Invalid { key: "CEP_REQUESTS_PER_MINUTE", .. })
        ));
        assert!(matches!(
            config(&[db, ("CEP_INCREMENT", "random")]),
            Err(ConfigError::Invalid { key: "CEP_INCREMENT", .. })
        ));
        assert!(matches!(
            config(&[db, ("DATABASE_POOL_SIZE", "many")]),
            Err(ConfigError::Invalid { key: "DATABASE_POOL_SIZE", .. })
        ));
    }

    #[test]
    fn test_blank_values_are_ignored() {
        let config = config(&[
            ("DATABASE_URL", "postgres://localhost/ceps"),
            ("CEP_CITY_FILTER", "   "),
            ("CEP_MAX_RESULTS", ""),
        ])
        .unwrap();
        assert_eq!(config.city_filter, None);
        assert_eq!(config.max_results, 100);
    }
}
