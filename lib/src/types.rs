use rust_decimal::Decimal;
use url::Url;

use crate::error;

/// One tracked item. The label doubles as the sheet name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub label: String,
    pub url: Url,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceSample {
    /// Model year, used as the column header.
    pub year: i32,
    /// Average listing price for that year.
    pub price: Decimal,
}

/// How a single target ended up in this run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display,
)]
#[strum(serialize_all = "snake_case")]
pub enum Outcome {
    Saved,
    Blocked,
    HttpStatus,
    Timeout,
    Network,
    InvalidJson,
    NoData,
    WriteFailed,
}

impl From<&error::Target> for Outcome {
    fn from(e: &error::Target) -> Self {
        match e {
            error::Target::Fetch(error::Fetch::Blocked(_)) => Self::Blocked,
            error::Target::Fetch(error::Fetch::HttpStatus { .. }) => {
                Self::HttpStatus
            }
            error::Target::Fetch(error::Fetch::Timeout) => Self::Timeout,
            error::Target::Fetch(error::Fetch::Network(_)) => Self::Network,
            error::Target::Fetch(error::Fetch::InvalidJson(_)) => {
                Self::InvalidJson
            }
            error::Target::NoData => Self::NoData,
            error::Target::Sheet(_) => Self::WriteFailed,
        }
    }
}
