use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Error, Result};
use clap::Parser;
use price_puller::{
    config::{
        Config, ConfigBuilder, Settings, DEFAULT_OUTPUT_FILE,
        DEFAULT_TARGETS_FILE,
    },
    service::Service,
};
use std::fs;
use tracing::error;
use tracing_subscriber::{fmt, layer::SubscriberExt, prelude::*, EnvFilter};

const LOG_FILE: &str = "price_puller.log";
const SETTINGS_EXTENSIONS: [&str; 4] = ["yaml", "yml", "toml", "json"];

/// Poll vehicle price endpoints and record today's prices in a spreadsheet
#[derive(Parser, Debug)]
struct Args {
    /// Text file with one `label,url` pair per line
    #[clap(short, long, default_value = DEFAULT_TARGETS_FILE)]
    targets: PathBuf,
    /// The workbook to record prices in. Each label gets its own sheet
    #[clap(short, long, default_value = DEFAULT_OUTPUT_FILE)]
    output: PathBuf,
    /// YAML, TOML or JSON file overriding the default settings
    #[clap(short, long)]
    settings: Option<PathBuf>,
    /// The folder to append `price_puller.log` in
    #[clap(short, long, default_value = ".")]
    log_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let file_appender =
        tracing_appender::rolling::never(&args.log_dir, LOG_FILE);
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(false).with_writer(non_blocking))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("Starting price run...");
    let config = args.try_into()?;
    let mut service = Service::new(config)?;
    match service.run().await {
        Ok(summary) => println!("Done! {summary}"),
        Err(e) => {
            error!(error = %e, "Run aborted");
            println!("Nothing to do: {e}");
        }
    }
    Ok(())
}

impl TryFrom<Args> for Config {
    type Error = Error;
    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let settings = match args.settings {
            Some(path) => parse_settings(&path)?,
            None => Settings::default(),
        };
        Ok(ConfigBuilder::default()
            .targets_file(args.targets)
            .output_file(args.output)
            .settings(settings)
            .build()?)
    }
}

fn parse_settings(path: &Path) -> Result<Settings, Error> {
    let extension = path
        .extension()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or("");
    if !SETTINGS_EXTENSIONS.contains(&extension) {
        bail!(
            "Unsupported settings file {:?}: expected one of .{}",
            path,
            SETTINGS_EXTENSIONS.join(", .")
        );
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file: {:?}", path))?;

    match extension {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML in {:?}", path)),
        "toml" => toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML in {:?}", path)),
        _ => serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse JSON in {:?}", path)),
    }
}
