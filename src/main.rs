pub mod models {
    pub mod canonical;
    pub mod raw;
}

pub mod blob;
pub mod client;
pub mod config;
pub mod db {
    pub mod models;
    pub mod schema;
    pub mod warehouse;
}
pub mod env_file;
pub mod error;
pub mod utils;
pub mod services {
    pub mod extract;
    pub mod load;
    pub mod pipeline;
    pub mod refine;
    pub mod schema_manager;
}

use crate::blob::FsBlobStore;
use crate::client::{WeatherApi, WeatherClient};
use crate::config::Config;
use crate::db::warehouse::{Warehouse, redact};
use crate::services::pipeline::{PipelineRunner, RunOutcome};
use crate::utils::{parse_date, yesterday};
use chrono::NaiveDate;
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;

/// Fetch daily weather for Indian cities, refine it and load it into the warehouse.
#[derive(Debug, Parser)]
#[command(name = "india-weather-etl", version)]
struct Cli {
    /// First date to process, YYYY-MM-DD (default: yesterday)
    #[arg(long, value_parser = parse_date)]
    start_date: Option<NaiveDate>,

    /// Last date to process, inclusive, YYYY-MM-DD (default: yesterday)
    #[arg(long, value_parser = parse_date)]
    end_date: Option<NaiveDate>,

    /// Load environment variables from this file instead of ./.env
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,

    /// Refine and load raw blobs already in the store without calling the APIs
    #[arg(long)]
    skip_extract: bool,
}

impl Cli {
    fn date_range(&self) -> Result<(NaiveDate, NaiveDate), String> {
        let start = self.start_date.unwrap_or_else(yesterday);
        let end = self.end_date.unwrap_or_else(yesterday);
        if start > end {
            return Err(format!("--start-date {} is after --end-date {}", start, end));
        }
        Ok((start, end))
    }
}

fn run(cli: &Cli) -> Result<RunOutcome, String> {
    // 1) Resolve dates and load config
    let (start, end) = cli.date_range()?;
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (blob_root={}, raw_prefix={}, refined_prefix={}, max_cities={}, request_timeout={}s, extract={})",
        cfg.blob_root.display(),
        cfg.raw_prefix,
        cfg.refined_prefix,
        cfg.max_cities
            .map(|v| v.get().to_string())
            .unwrap_or_else(|| "-".to_string()),
        cfg.request_timeout.as_secs(),
        !cli.skip_extract
    );

    // 2) API client, only needed when extracting
    let client = if cli.skip_extract {
        None
    } else {
        let key = cfg.require_api_key()?;
        Some(WeatherClient::new(
            &cfg.cities_api_url,
            &cfg.weather_api_url,
            key,
            cfg.request_timeout,
        ))
    };

    // 3) Connect warehouse
    let mut wh = Warehouse::connect(&cfg.database_url)
        .map_err(|e| format!("Warehouse connection to {} failed: {}", redact(&cfg.database_url), e))?;
    info!("Connected to warehouse ({:?})", wh.dialect());

    // 4) Run every date in order
    let store = FsBlobStore::new(cfg.blob_root.clone());
    let runner = PipelineRunner::new(&cfg, &store, client.as_ref().map(|c| c as &dyn WeatherApi));
    info!("Processing {} to {}", start, end);
    Ok(runner.run_range(&mut wh, start, end))
}

fn main() {
    let cli = Cli::parse();

    let loaded_env = match env_file::load(cli.env_file.as_deref()) {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "india-weather-etl {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    match run(&cli) {
        Ok(outcome) if outcome.is_success() => {}
        Ok(outcome) => {
            error!("Failed dates: {:?}", outcome.failed);
            std::process::exit(1);
        }
        Err(e) => {
            error!("fatal: {}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dates_are_parsed_and_ordered() {
        let cli = Cli::try_parse_from(["etl", "--start-date", "2024-01-14", "--end-date", "2024-01-15"]).unwrap();
        assert_eq!(
            cli.date_range(),
            Ok((
                NaiveDate::from_ymd_opt(2024, 1, 14).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
            ))
        );
        assert!(!cli.skip_extract);

        let reversed = Cli::try_parse_from(["etl", "--start-date", "2024-01-15", "--end-date", "2024-01-14"]).unwrap();
        assert!(reversed.date_range().is_err());
    }

    #[test]
    fn dates_default_to_yesterday() {
        let cli = Cli::try_parse_from(["etl", "--skip-extract"]).unwrap();
        assert!(cli.skip_extract);
        assert_eq!(cli.date_range(), Ok((yesterday(), yesterday())));
    }

    #[test]
    fn malformed_dates_are_rejected() {
        assert!(Cli::try_parse_from(["etl", "--start-date", "15/01/2024"]).is_err());
    }
}
