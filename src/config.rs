use std::{fmt::Display, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{anyhow, bail};

use crate::{jobs::QueueConfig, rooms::ChatSettings};

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    pub database_url: String,
    pub redis_url: Option<String>,
    pub upload_dir: PathBuf,

    pub mail_api_url: Option<String>,
    pub mail_api_key: Option<String>,
    pub mail_from: String,

    pub ocr_command: String,
    pub ocr_timeout: Duration,

    pub listing_ttl: Duration,
    pub queue: QueueConfig,
    pub chat: ChatSettings,

    /// Renters may rent before their license is verified unless this is set.
    pub require_verified_to_rent: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        Ok(Config {
            listen_addr: var_or("LISTEN_ADDR", "0.0.0.0:8080".to_owned())?,
            database_url: var_or("DATABASE_URL", "sqlite://bikes.db?mode=rwc".to_owned())?,
            redis_url: optional_var("REDIS_URL"),
            upload_dir: PathBuf::from(var_or("UPLOAD_DIR", "uploads".to_owned())?),

            mail_api_url: optional_var("MAIL_API_URL"),
            mail_api_key: optional_var("MAIL_API_KEY"),
            mail_from: var_or(
                "MAIL_FROM",
                "Bike Rental App <no-reply@localhost>".to_owned(),
            )?,

            ocr_command: var_or("OCR_COMMAND", "tesseract".to_owned())?,
            ocr_timeout: secs("OCR_TIMEOUT_SECS", 30)?,

            listing_ttl: secs("LISTING_CACHE_TTL_SECS", 60)?,
            queue: QueueConfig {
                max_attempts: nonzero("JOB_MAX_ATTEMPTS", var_or("JOB_MAX_ATTEMPTS", 3)?)?,
                job_timeout: secs("JOB_TIMEOUT_SECS", 20)?,
                // zero is allowed: retry at once
                backoff_base: Duration::from_millis(var_or("JOB_BACKOFF_MS", 500)?),
                poll_interval: millis("JOB_POLL_MS", 1000)?,
            },
            chat: ChatSettings {
                idle_timeout: secs("WS_IDLE_TIMEOUT_SECS", 90)?,
                ping_interval: secs("WS_PING_INTERVAL_SECS", 30)?,
            },

            require_verified_to_rent: var_or("REQUIRE_VERIFIED_TO_RENT", false)?,
        })
    }
}

fn optional_var(key: &str) -> Option<String> {
    dotenv::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn secs(key: &str, default: u64) -> anyhow::Result<Duration> {
    Ok(Duration::from_secs(nonzero(key, var_or(key, default)?)?))
}

fn millis(key: &str, default: u64) -> anyhow::Result<Duration> {
    Ok(Duration::from_millis(nonzero(key, var_or(key, default)?)?))
}

/// Intervals and timeouts of zero would stall or panic the timers they feed.
fn nonzero<T: Default + PartialEq>(key: &str, value: T) -> anyhow::Result<T> {
    if value == T::default() {
        bail!("{key} must be greater than zero");
    }
    Ok(value)
}

fn var_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match optional_var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|err| anyhow!("invalid value for {key}: {err}")),
        None => Ok(default),
    }
}
