//! Run configuration: registration URL, page selectors, timeouts, retry
//! policy, and output paths.
//!
//! Defaults target the 163.com signup page. A TOML file can overlay any
//! field; a missing file yields the defaults.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Fixed signup page URL.
    pub register_url: String,
    /// Domain appended to generated local parts.
    pub domain: String,
    /// Run the browser without a visible window. Human verification needs
    /// a visible window, so this is off by default.
    pub headless: bool,
    /// User agent applied to the shared browser context.
    pub user_agent: String,
    pub retry: RetryConfig,
    pub timeouts: Timeouts,
    pub selectors: Selectors,
    /// Append-only outcome log.
    pub data_file: PathBuf,
    /// Full-copy mirror of the outcome log.
    pub backup_file: PathBuf,
    /// Directory for point-in-time export snapshots.
    pub export_dir: PathBuf,
    pub default_password: String,
    pub default_phone: String,
    /// Interval for cooperative polling of operator intents, in milliseconds.
    pub poll_interval_ms: u64,
    /// Delay before cleanup in single-shot mode, in seconds.
    pub settle_delay_secs: u64,
}

/// Page-load retry policy: attempt `n` (1-based) waits `base × n` seconds
/// before the next try.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum navigation attempts, including the first. Must be >= 1.
    pub max_attempts: u32,
    /// Base backoff delay in seconds.
    pub base_delay_secs: u64,
}

/// Timeouts in milliseconds, matching the page's observed behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub page_load_ms: u64,
    pub navigation_ms: u64,
    pub captcha_ms: u64,
}

/// Element selectors for the signup page. Configuration data, not logic:
/// a page redesign should only ever touch this table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Selectors {
    pub normal_register_option: String,
    pub username_input: String,
    pub password_input: String,
    pub phone_input: String,
    pub agree_checkbox: String,
    pub send_code_button: String,
    pub captcha_frame: String,
    pub phone_verify_page: String,
    pub verification_code_input: String,
    pub register_success: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            register_url: "https://mail.163.com/register/#/normal".to_string(),
            domain: "@163.com".to_string(),
            headless: false,
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                         AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36"
                .to_string(),
            retry: RetryConfig::default(),
            timeouts: Timeouts::default(),
            selectors: Selectors::default(),
            data_file: PathBuf::from("data/registered_accounts.csv"),
            backup_file: PathBuf::from("data/registered_accounts_backup.csv"),
            export_dir: PathBuf::from("data/exports"),
            default_password: "Bitezhi666".to_string(),
            default_phone: "19921680956".to_string(),
            poll_interval_ms: 500,
            settle_delay_secs: 5,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 2,
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            page_load_ms: 60_000,
            navigation_ms: 60_000,
            captcha_ms: 120_000,
        }
    }
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            normal_register_option: "text=普通注册".to_string(),
            username_input: "input[placeholder='邮箱地址']".to_string(),
            password_input: "input[type=password]".to_string(),
            phone_input: "input[placeholder='手机号码']".to_string(),
            agree_checkbox: "input.j-agree[type=checkbox]".to_string(),
            send_code_button: "text=发送验证码".to_string(),
            captcha_frame: "iframe[name*='captcha']".to_string(),
            phone_verify_page: ".verify-panel".to_string(),
            verification_code_input: "input[placeholder='验证码']".to_string(),
            register_success: ".register-success".to_string(),
        }
    }
}

impl Config {
    /// Load configuration, overlaying defaults with a TOML file when one
    /// exists at the given path (or `mailreg.toml` in the working
    /// directory).
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = path.unwrap_or_else(|| PathBuf::from("mailreg.toml"));

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)
                .map_err(|e| Error::Config(format!("{}: {e}", config_path.display())))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Reject configurations the run loop cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(Error::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config(
                "poll_interval_ms must be nonzero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }
}

impl RetryConfig {
    /// Backoff before retry following the given 1-based attempt number.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        Duration::from_secs(self.base_delay_secs * u64::from(attempt))
    }
}

impl Timeouts {
    pub fn page_load(&self) -> Duration {
        Duration::from_millis(self.page_load_ms)
    }

    pub fn navigation(&self) -> Duration {
        Duration::from_millis(self.navigation_ms)
    }

    pub fn captcha(&self) -> Duration {
        Duration::from_millis(self.captcha_ms)
    }
}
