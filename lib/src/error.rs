use chrono::NaiveDate;
use displaydoc::Display;
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Display, Error)]
pub enum Error {
    /// Init error: {0}
    Init(#[from] Init),
}

#[derive(Debug, Display, Error)]
pub enum Init {
    /// Failed to initialize the client: {0}
    ClientInitialization(reqwest::Error),
    /// Invalid User-Agent {0}
    InvalidUserAgent(String),
    /// Invalid referer {0}
    InvalidReferer(String),
    /// At least one User-Agent must be configured
    NoUserAgents,
}

/// Reasons a run stops before processing any target.
#[derive(Debug, Display, Error)]
pub enum Run {
    /// {0}
    TargetList(#[from] TargetList),
    /// No targets to process
    NoTargets,
    /// {0}
    Schedule(#[from] Schedule),
}

#[derive(Debug, Display, Error)]
pub enum TargetList {
    /// Failed to read target list: {0}
    Read(std::io::Error),
}

#[derive(Debug, Display, Error)]
pub enum Fetch {
    /// Blocked: got an HTML page instead of JSON (HTTP {0})
    Blocked(StatusCode),
    /// Unexpected status code {status}: {snippet}
    HttpStatus { status: StatusCode, snippet: String },
    /// Request timed out
    Timeout,
    /// Error sending request: {0}
    Network(reqwest::Error),
    /// Failed to parse response as JSON: {0}
    InvalidJson(#[from] serde_json::Error),
}

impl Fetch {
    /// Split transport failures into timeouts and everything else.
    pub(crate) fn transport(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(e)
        }
    }
}

#[derive(Debug, Display, Error)]
pub enum Schedule {
    /// Run date {today} is before the anchor date {anchor}
    BeforeAnchor { today: NaiveDate, anchor: NaiveDate },
}

#[derive(Debug, Display, Error)]
pub enum Sheet {
    /// Error reading workbook: {0}
    Read(#[from] calamine::XlsxError),
    /// Error writing workbook: {0}
    Write(#[from] rust_xlsxwriter::XlsxError),
    /// Error writing file: {0}
    FileWrite(std::io::Error),
    /// Error replacing workbook: {0}
    Persist(#[from] tempfile::PersistError),
    /// Sheet {0} has a header row without a Date column
    MissingDateColumn(String),
}

/// Everything that can make a single target get skipped for this run.
#[derive(Debug, Display, Error)]
pub enum Target {
    /// {0}
    Fetch(#[from] Fetch),
    /// Response contained no price data
    NoData,
    /// Spreadsheet update failed: {0}
    Sheet(#[from] Sheet),
}
