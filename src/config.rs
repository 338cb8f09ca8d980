use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_SLEEPER_BASE_URL: &str = "https://api.sleeper.app/v1";
pub const DEFAULT_YAHOO_BASE_URL: &str = "https://fantasysports.yahooapis.com/fantasy/v2";

/// Settings for talking to the fantasy platforms.
#[derive(Debug, Clone)]
pub struct PlatformSettings {
    pub sleeper_base_url: String,
    pub yahoo_base_url: String,
    pub http_timeout: Duration,
    pub requests_per_minute: u32,
    /// Last regular + playoff week to probe for matchups.
    pub max_weeks: u32,
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            sleeper_base_url: DEFAULT_SLEEPER_BASE_URL.to_string(),
            yahoo_base_url: DEFAULT_YAHOO_BASE_URL.to_string(),
            http_timeout: Duration::from_secs(30),
            requests_per_minute: 60,
            max_weeks: 17,
        }
    }
}

/// Settings for the background job pipeline.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub reports_dir: PathBuf,
    pub max_concurrent_jobs: usize,
    pub rate_limit_retries: u32,
    pub rate_limit_backoff: Duration,
    /// Consecutive throttled years after which the job gives up.
    pub rate_limit_abort_after: u32,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            reports_dir: PathBuf::from("./reports"),
            max_concurrent_jobs: 2,
            rate_limit_retries: 2,
            rate_limit_backoff: Duration::from_secs(5),
            rate_limit_abort_after: 3,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub platform: PlatformSettings,
    pub jobs: JobSettings,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let platform_defaults = PlatformSettings::default();
        let job_defaults = JobSettings::default();

        let platform = PlatformSettings {
            sleeper_base_url: env_string("SLEEPER_BASE_URL", &platform_defaults.sleeper_base_url),
            yahoo_base_url: env_string("YAHOO_BASE_URL", &platform_defaults.yahoo_base_url),
            http_timeout: Duration::from_secs(env_parse("HTTP_TIMEOUT_SECS", 30u64)?),
            requests_per_minute: env_parse("REQUESTS_PER_MINUTE", platform_defaults.requests_per_minute)?,
            max_weeks: env_parse("MAX_WEEKS", platform_defaults.max_weeks)?,
        };

        let jobs = JobSettings {
            reports_dir: PathBuf::from(env_string("REPORTS_DIR", "./reports")),
            max_concurrent_jobs: env_parse("MAX_CONCURRENT_JOBS", job_defaults.max_concurrent_jobs)?,
            rate_limit_retries: env_parse("RATE_LIMIT_RETRIES", job_defaults.rate_limit_retries)?,
            rate_limit_backoff: Duration::from_secs(env_parse("RATE_LIMIT_BACKOFF_SECS", 5u64)?),
            rate_limit_abort_after: env_parse("RATE_LIMIT_ABORT_AFTER", job_defaults.rate_limit_abort_after)?,
        };

        let config = Self { platform, jobs };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.jobs.max_concurrent_jobs == 0 {
            return Err(anyhow!("MAX_CONCURRENT_JOBS must be at least 1"));
        }
        if self.platform.requests_per_minute == 0 {
            return Err(anyhow!("REQUESTS_PER_MINUTE must be at least 1"));
        }
        if self.platform.max_weeks == 0 {
            return Err(anyhow!("MAX_WEEKS must be at least 1"));
        }
        if self.jobs.rate_limit_abort_after == 0 {
            return Err(anyhow!("RATE_LIMIT_ABORT_AFTER must be at least 1"));
        }
        Ok(())
    }
}

fn env_string(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => default.to_string(),
    }
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse::<T>()
            .with_context(|| format!("{} has an invalid value: '{}'", key, v)),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.jobs.max_concurrent_jobs, 2);
        assert_eq!(config.platform.max_weeks, 17);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = AppConfig::default();
        config.jobs.max_concurrent_jobs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_parse_reports_bad_numbers() {
        env::set_var("LEAGUE_HISTORY_TEST_WORKERS", "lots");
        let parsed: Result<usize> = env_parse("LEAGUE_HISTORY_TEST_WORKERS", 2);
        assert!(parsed.is_err());
        env::remove_var("LEAGUE_HISTORY_TEST_WORKERS");

        let parsed: usize = env_parse("LEAGUE_HISTORY_TEST_UNSET", 4).unwrap();
        assert_eq!(parsed, 4);
    }
}
