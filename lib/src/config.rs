use std::{path::PathBuf, time::Duration};

use chrono::NaiveDate;
use derive_builder::Builder;
use serde::Deserialize;

pub const DEFAULT_TARGETS_FILE: &str = "car_urls.txt";
pub const DEFAULT_OUTPUT_FILE: &str = "Price_Puller.xlsx";

const DEFAULT_USER_AGENTS: [&str; 3] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.0.3 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];
const DEFAULT_REFERER: &str = "https://www.autotrader.com/";

/// Tunables for a run. Every field has a default, so a settings file
/// only needs to list what it changes.
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// The date that maps to row 2 of every sheet.
    pub anchor: NaiveDate,
    /// Pool of User-Agent strings, one is picked per request.
    pub user_agents: Vec<String>,
    /// Sent as the `Referer` header.
    pub referer: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// How many times a 500/502/503/504 response is retried.
    pub max_retries: u32,
    /// Linear backoff factor in seconds: the n-th retry waits `n * factor`.
    pub backoff_secs: f64,
    /// Lower bound of the pause between targets, in seconds.
    pub min_delay_secs: f64,
    /// Upper bound of the pause between targets, in seconds.
    pub max_delay_secs: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            anchor: NaiveDate::from_ymd_opt(2025, 4, 22)
                .expect("anchor date is a valid calendar date"),
            user_agents: DEFAULT_USER_AGENTS.map(String::from).to_vec(),
            referer: DEFAULT_REFERER.to_string(),
            timeout_secs: 10,
            max_retries: 3,
            backoff_secs: 1.0,
            min_delay_secs: 2.0,
            max_delay_secs: 4.0,
        }
    }
}

impl Settings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs_f64(self.backoff_secs.max(0.0))
    }

    /// The `(min, max)` pause between targets, with `max` never below `min`.
    pub fn delay_bounds(&self) -> (f64, f64) {
        let min = self.min_delay_secs.max(0.0);
        (min, self.max_delay_secs.max(min))
    }
}

#[derive(Builder, Clone, Debug)]
#[builder(setter(into))]
pub struct Config {
    /// Text file listing `label,url` pairs.
    #[builder(default = "PathBuf::from(DEFAULT_TARGETS_FILE)")]
    pub targets_file: PathBuf,
    /// The workbook that receives one sheet per target.
    #[builder(default = "PathBuf::from(DEFAULT_OUTPUT_FILE)")]
    pub output_file: PathBuf,
    /// The calendar day this run records prices for.
    #[builder(default = "chrono::Local::now().date_naive()")]
    pub today: NaiveDate,
    #[builder(default)]
    pub settings: Settings,
}
