use std::{collections::BTreeMap, fmt, time::Duration};

use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

use crate::{
    client::{parse_body, Client, Fetch, Identities},
    config::Config,
    error::{self, Error},
    extract, schedule, sheet,
    progress::Progress,
    targets,
    types::{Outcome, Target},
};

pub struct Service<F = Client, R = StdRng> {
    fetcher: F,
    identities: Identities,
    rng: R,
    config: Config,
}

impl Service {
    pub fn new(config: Config) -> Result<Self, Error> {
        let client = Client::new(&config.settings)?;
        Self::with_fetcher(config, client, StdRng::from_os_rng())
    }
}

impl<F: Fetch, R: Rng> Service<F, R> {
    /// Build a service around any fetcher and random source.
    pub fn with_fetcher(
        config: Config,
        fetcher: F,
        rng: R,
    ) -> Result<Self, Error> {
        let identities = Identities::new(&config.settings)?;
        Ok(Self {
            fetcher,
            identities,
            rng,
            config,
        })
    }

    /// Process every target once, in list order. Individual targets that
    /// fail are logged and counted, never propagated.
    #[instrument(skip_all)]
    pub async fn run(&mut self) -> Result<Summary, error::Run> {
        info!(
            targets_file = ?self.config.targets_file,
            output_file = ?self.config.output_file,
            today = %self.config.today,
            "Starting price run..."
        );

        let targets = targets::load(&self.config.targets_file)?;
        if targets.is_empty() {
            return Err(error::Run::NoTargets);
        }
        let row =
            schedule::row_for(self.config.today, self.config.settings.anchor)?;
        let date = schedule::date_label(self.config.today);

        let progress = Progress::new(targets.len() as u64);
        let mut summary = Summary {
            total: targets.len(),
            ..Summary::default()
        };
        for (idx, target) in targets.iter().enumerate() {
            progress.println(format!("Processing: {}", target.label));
            let outcome = match self.process(target, row, &date).await {
                Ok(num_samples) => {
                    progress.println(format!(
                        "Saved {num_samples} price(s) for {}",
                        target.label
                    ));
                    Outcome::Saved
                }
                Err(e) => {
                    error!(
                        error = %e,
                        label = %target.label,
                        "Skipping target"
                    );
                    progress.println(format!("Skipped {}: {e}", target.label));
                    Outcome::from(&e)
                }
            };
            summary.add(outcome);
            if idx + 1 < targets.len() {
                sleep(self.delay()).await;
            }
            progress.inc();
        }
        progress.finish();

        info!(%summary, "Finished price run");
        Ok(summary)
    }

    #[instrument(skip(self, target), err, fields(label = %target.label))]
    async fn process(
        &mut self,
        target: &Target,
        row: u32,
        date: &str,
    ) -> Result<usize, error::Target> {
        let headers = self.identities.pick(&mut self.rng);
        let body = self.fetcher.fetch(&target.url, headers).await?;
        let json = parse_body(&body)?;
        let samples = extract::samples(&json);
        if samples.is_empty() {
            warn!("No price data");
            return Err(error::Target::NoData);
        }
        let years: Vec<i32> = samples.iter().map(|s| s.year).collect();
        info!(?years, row, "Recording prices");
        sheet::record(
            &self.config.output_file,
            &target.label,
            row,
            date,
            &samples,
        )?;
        Ok(samples.len())
    }

    /// A random pause between targets, to keep the request rate down.
    fn delay(&mut self) -> Duration {
        let (min, max) = self.config.settings.delay_bounds();
        let secs = if max > min {
            self.rng.random_range(min..=max)
        } else {
            min
        };
        Duration::from_secs_f64(secs)
    }
}

/// What happened to each target in a run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Summary {
    pub total: usize,
    pub outcomes: BTreeMap<Outcome, usize>,
}

impl Summary {
    fn add(&mut self, outcome: Outcome) {
        *self.outcomes.entry(outcome).or_default() += 1;
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.outcomes.get(&outcome).copied().unwrap_or(0)
    }

    pub fn saved(&self) -> usize {
        self.count(Outcome::Saved)
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "saved {}/{} target(s)", self.saved(), self.total)?;
        let skipped: Vec<String> = self
            .outcomes
            .iter()
            .filter(|(outcome, _)| **outcome != Outcome::Saved)
            .map(|(outcome, n)| format!("{outcome}: {n}"))
            .collect();
        if !skipped.is_empty() {
            write!(f, ", skipped ({})", skipped.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, collections::HashMap, fs, path::Path};

    use chrono::NaiveDate;
    use reqwest::{header::HeaderMap, StatusCode};
    use url::Url;

    use super::*;
    use crate::{
        client::classify,
        config::{ConfigBuilder, Settings},
        sheet::{saved::style, Cell, Workbook},
    };

    const CAR_A_BODY: &str = r#"{"links":[
        {"value":"2023","avgPrice":21999.5},
        {"value":"2024","avgPrice":23500}
    ]}"#;

    enum Reply {
        Json(&'static str),
        Status(u16, &'static str),
        Timeout,
    }

    /// Answers from a fixed table and remembers every URL asked for.
    #[derive(Default)]
    struct Stub {
        replies: HashMap<String, Reply>,
        calls: RefCell<Vec<String>>,
    }

    impl Stub {
        fn reply(mut self, url: &str, reply: Reply) -> Self {
            self.replies.insert(url.to_string(), reply);
            self
        }
    }

    impl Fetch for Stub {
        async fn fetch(
            &self,
            url: &Url,
            _headers: HeaderMap,
        ) -> Result<String, error::Fetch> {
            self.calls.borrow_mut().push(url.to_string());
            match self.replies.get(url.as_str()) {
                Some(Reply::Json(body)) => {
                    classify(StatusCode::OK, body.to_string())
                }
                Some(Reply::Status(code, body)) => classify(
                    StatusCode::from_u16(*code).unwrap(),
                    body.to_string(),
                ),
                Some(Reply::Timeout) | None => Err(error::Fetch::Timeout),
            }
        }
    }

    fn car_a() -> Stub {
        Stub::default().reply("https://example.com/a", Reply::Json(CAR_A_BODY))
    }

    fn anchor() -> NaiveDate {
        Settings::default().anchor
    }

    fn service(
        dir: &Path,
        targets: &str,
        today: NaiveDate,
        stub: Stub,
    ) -> Service<Stub> {
        let targets_file = dir.join("car_urls.txt");
        fs::write(&targets_file, targets).unwrap();
        let config = ConfigBuilder::default()
            .targets_file(targets_file)
            .output_file(dir.join("Price_Puller.xlsx"))
            .today(today)
            .settings(Settings {
                min_delay_secs: 0.0,
                max_delay_secs: 0.0,
                ..Settings::default()
            })
            .build()
            .unwrap();
        Service::with_fetcher(config, stub, StdRng::seed_from_u64(1)).unwrap()
    }

    #[tokio::test]
    async fn records_prices_on_anchor_date() {
        let dir = tempfile::tempdir().unwrap();
        let targets = "Car A,https://example.com/a\n";
        let mut service = service(dir.path(), targets, anchor(), car_a());

        let summary = service.run().await.unwrap();
        assert_eq!(summary.saved(), 1);

        let output = dir.path().join("Price_Puller.xlsx");
        let workbook = Workbook::open(&output).unwrap();
        assert_eq!(workbook.sheet_names(), vec!["Car A"]);
        let sheet = workbook.sheet("Car A").unwrap();
        assert_eq!(
            sheet.row(1),
            vec![
                &Cell::Text("Date".into()),
                &Cell::Number(2023.0),
                &Cell::Number(2024.0)
            ]
        );
        assert_eq!(
            sheet.row(2),
            vec![
                &Cell::Text("22APR2025".into()),
                &Cell::Price(21999.5),
                &Cell::Price(23500.0)
            ]
        );
        assert!(style(&output, 1, "B1").bold);
        assert_eq!(
            style(&output, 1, "C2").num_format.as_deref(),
            Some(r##""$"#,##0.00"##)
        );
    }

    #[tokio::test]
    async fn failed_target_does_not_stop_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let stub = Stub::default()
            .reply("https://example.com/a", Reply::Timeout)
            .reply("https://example.com/b", Reply::Json(CAR_A_BODY));
        let mut service = service(
            dir.path(),
            "Car A,https://example.com/a\nCar B,https://example.com/b\n",
            anchor(),
            stub,
        );

        let summary = service.run().await.unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.saved(), 1);
        assert_eq!(summary.count(Outcome::Timeout), 1);

        let output = dir.path().join("Price_Puller.xlsx");
        let workbook = Workbook::open(&output).unwrap();
        assert_eq!(workbook.sheet_names(), vec!["Car B"]);
    }

    #[tokio::test]
    async fn rerun_on_same_day_overwrites_same_row() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("Price_Puller.xlsx");
        let today = anchor() + chrono::Days::new(3);
        let targets = "Car A,https://example.com/a\n";

        service(dir.path(), targets, today, car_a()).run().await.unwrap();
        let first = Workbook::open(&output).unwrap();

        service(dir.path(), targets, today, car_a()).run().await.unwrap();
        let second = Workbook::open(&output).unwrap();

        assert_eq!(first, second);
        assert_eq!(second.sheet("Car A").unwrap().max_row(), 5);
    }

    #[tokio::test]
    async fn blocked_and_empty_responses_write_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let stub = Stub::default()
            .reply(
                "https://example.com/a",
                Reply::Status(200, "<HTML><body>are you a robot?"),
            )
            .reply(
                "https://example.com/b",
                Reply::Status(403, r#"{"error":"forbidden"}"#),
            )
            .reply("https://example.com/c", Reply::Json(r#"{"links":[]}"#))
            .reply("https://example.com/d", Reply::Json("not json"));
        let targets = [
            "A,https://example.com/a",
            "B,https://example.com/b",
            "C,https://example.com/c",
            "D,https://example.com/d",
        ]
        .join("\n");
        let mut service = service(dir.path(), &targets, anchor(), stub);

        let summary = service.run().await.unwrap();
        assert_eq!(summary.saved(), 0);
        assert_eq!(summary.count(Outcome::Blocked), 1);
        assert_eq!(summary.count(Outcome::HttpStatus), 1);
        assert_eq!(summary.count(Outcome::NoData), 1);
        assert_eq!(summary.count(Outcome::InvalidJson), 1);
        assert!(!dir.path().join("Price_Puller.xlsx").exists());
    }

    #[tokio::test]
    async fn missing_target_list_aborts_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let mut service = service(dir.path(), "", anchor(), Stub::default());
        service.config.targets_file = dir.path().join("nope.txt");
        assert!(matches!(
            service.run().await,
            Err(error::Run::TargetList(_))
        ));
    }

    #[tokio::test]
    async fn empty_target_list_is_nothing_to_do() {
        let dir = tempfile::tempdir().unwrap();
        let mut service =
            service(dir.path(), "# nothing yet\n\n", anchor(), Stub::default());
        assert!(matches!(service.run().await, Err(error::Run::NoTargets)));
    }

    #[tokio::test]
    async fn run_before_anchor_fetches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let today = anchor() - chrono::Days::new(1);
        let targets = "Car A,https://example.com/a\n";
        let mut service =
            service(dir.path(), targets, today, Stub::default());
        assert!(matches!(service.run().await, Err(error::Run::Schedule(_))));
        assert!(service.fetcher.calls.borrow().is_empty());
    }

    #[test]
    fn summary_lists_skipped_kinds() {
        let mut summary = Summary {
            total: 3,
            ..Summary::default()
        };
        summary.add(Outcome::Saved);
        summary.add(Outcome::Timeout);
        summary.add(Outcome::NoData);
        assert_eq!(
            summary.to_string(),
            "saved 1/3 target(s), skipped (timeout: 1, no_data: 1)"
        );
    }
}
