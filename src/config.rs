//! Deployment settings read from the Lambda environment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{PipelineError, Result};
use crate::throttle::{RateLimiter, RetryPolicy, Throttle};

pub const MAX_REQUESTS_PER_PERIOD: usize = 20;
pub const MAX_REQUESTS_PER_PERIOD_MODEL: usize = 8;
pub const INGEST_MAX_REQUESTS_PER_PERIOD: usize = 1;
pub const PERIOD_LENGTH: Duration = Duration::from_secs(1);
pub const STANDARD_RETRY_MAX_ATTEMPT_COUNT: u32 = 10;

pub const ASSET_SCORE_PROPERTY_VAR: &str = "Asset_L4E_Score";

/// Read a required environment variable
pub fn required_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| PipelineError::Config(format!("{} environment variable not set", name)))
}

/// Read an optional environment variable, falling back to `default` when unset
pub fn env_or<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| PipelineError::Config(format!("{} has an invalid value: {}", name, raw))),
        Err(_) => Ok(default),
    }
}

/// Call ceilings and retry budget for SiteWise and S3 traffic
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottleSettings {
    pub max_requests_per_period: usize,
    pub model_max_requests_per_period: usize,
    pub period: Duration,
    pub max_attempts: u32,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            max_requests_per_period: MAX_REQUESTS_PER_PERIOD,
            model_max_requests_per_period: MAX_REQUESTS_PER_PERIOD_MODEL,
            period: PERIOD_LENGTH,
            max_attempts: STANDARD_RETRY_MAX_ATTEMPT_COUNT,
        }
    }
}

impl ThrottleSettings {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let settings = Self {
            max_requests_per_period: env_or(
                "SITEWISE_MAX_REQUESTS_PER_SECOND",
                defaults.max_requests_per_period,
            )?,
            model_max_requests_per_period: env_or(
                "SITEWISE_MODEL_MAX_REQUESTS_PER_SECOND",
                defaults.model_max_requests_per_period,
            )?,
            period: defaults.period,
            max_attempts: env_or("SITEWISE_MAX_ATTEMPTS", defaults.max_attempts)?,
        };
        if settings.max_requests_per_period == 0 || settings.model_max_requests_per_period == 0 {
            return Err(PipelineError::Config("request ceilings must be positive".to_string()));
        }
        if settings.max_attempts == 0 {
            return Err(PipelineError::Config("SITEWISE_MAX_ATTEMPTS must be positive".to_string()));
        }
        Ok(settings)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            ..RetryPolicy::default()
        }
    }

    /// Throttle for per-asset and S3 calls
    pub fn standard(&self) -> Throttle {
        Throttle::new(
            RateLimiter::new(self.max_requests_per_period, self.period),
            self.retry_policy(),
        )
    }

    /// Throttle for asset-model listing, which has a lower service quota
    pub fn model_listing(&self) -> Throttle {
        Throttle::new(
            RateLimiter::new(self.model_max_requests_per_period, self.period),
            self.retry_policy(),
        )
    }

    /// One batch put per period while replaying canned data
    pub fn ingest_puts(&self) -> Throttle {
        Throttle::new(
            RateLimiter::new(INGEST_MAX_REQUESTS_PER_PERIOD, self.period),
            self.retry_policy(),
        )
    }
}

/// How long the query runner waits on Athena
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySettings {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            timeout: Duration::from_secs(60),
        }
    }
}

impl QuerySettings {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            poll_interval: Duration::from_millis(env_or(
                "ATHENA_POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as u64,
            )?),
            timeout: Duration::from_secs(env_or(
                "ATHENA_RESULT_TIMEOUT_SECS",
                defaults.timeout.as_secs(),
            )?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_uses_default_when_unset() {
        let value: u32 = env_or("SITEWISE_L4E_TEST_UNSET_VARIABLE", 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_env_or_parses_and_rejects() {
        env::set_var("SITEWISE_L4E_TEST_PARSE", " 42 ");
        let value: usize = env_or("SITEWISE_L4E_TEST_PARSE", 1).unwrap();
        assert_eq!(value, 42);

        env::set_var("SITEWISE_L4E_TEST_BAD", "many");
        let err = env_or::<usize>("SITEWISE_L4E_TEST_BAD", 1).unwrap_err();
        assert!(err.to_string().contains("SITEWISE_L4E_TEST_BAD"));
    }

    #[test]
    fn test_required_env_missing() {
        let err = required_env("SITEWISE_L4E_TEST_REQUIRED_MISSING").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_throttle_defaults() {
        let settings = ThrottleSettings::default();
        assert_eq!(settings.max_requests_per_period, 20);
        assert_eq!(settings.model_max_requests_per_period, 8);
        assert_eq!(settings.max_attempts, 10);
        assert_eq!(settings.retry_policy().max_attempts, 10);
        assert_eq!(settings.ingest_puts().max_calls(), 1);
        assert_eq!(settings.ingest_puts().retry_policy().max_attempts, 10);
        assert_eq!(settings.standard().max_calls(), 20);
        assert_eq!(settings.model_listing().retry_policy().max_attempts, 10);
    }
}
