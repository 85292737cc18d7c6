//! Per-date pipeline (extract, refine, ensure schema, load) and the date-range driver.

use crate::blob::BlobStore;
use crate::client::WeatherApi;
use crate::config::Config;
use crate::db::models::WeatherReportRow;
use crate::db::schema::TABLES;
use crate::db::warehouse::Warehouse;
use crate::error::{PipelineError, display_chain};
use crate::services::extract::Extractor;
use crate::services::load::Loader;
use crate::services::refine::Refiner;
use crate::services::schema_manager::SchemaManager;
use crate::utils::date_range;
use chrono::NaiveDate;
use log::{error, info};
use std::time::Instant;

/// How a date-range run ended.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub succeeded: Vec<NaiveDate>,
    pub failed: Vec<NaiveDate>,
    /// A fatal error stopped the run before the last date.
    pub aborted: bool,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !self.aborted
    }
}

pub struct PipelineRunner<'a> {
    config: &'a Config,
    store: &'a dyn BlobStore,
    /// `None` runs refine and load over raw blobs already in the store.
    api: Option<&'a dyn WeatherApi>,
    schema: SchemaManager,
}

impl<'a> PipelineRunner<'a> {
    pub fn new(config: &'a Config, store: &'a dyn BlobStore, api: Option<&'a dyn WeatherApi>) -> Self {
        PipelineRunner {
            config,
            store,
            api,
            schema: SchemaManager::new(TABLES),
        }
    }

    pub fn run(&self, wh: &mut Warehouse, date: NaiveDate) -> Result<Vec<WeatherReportRow>, PipelineError> {
        let started = Instant::now();
        match self.api {
            Some(api) => {
                Extractor::new(self.store, api, self.config).extract(date)?;
            }
            None => info!("Extract: skipped for {}", date),
        }
        let refined = Refiner::new(self.store, self.config).refine(date)?;
        self.schema.ensure_schema(wh)?;
        let report = Loader::new(self.store, self.config, wh.dialect()).load(wh, date)?;

        log_report(date, &report);
        info!(
            "Pipeline: {} finished in {:.1}s ({} cities and {} weather rows refined, {} reported)",
            date,
            started.elapsed().as_secs_f64(),
            refined.cities,
            refined.weather,
            report.len()
        );
        Ok(report)
    }

    /// Run every date in `start..=end` in order. A failed date is logged and
    /// the next one runs, unless the error is fatal for the whole run.
    pub fn run_range(&self, wh: &mut Warehouse, start: NaiveDate, end: NaiveDate) -> RunOutcome {
        let mut outcome = RunOutcome::default();
        for date in date_range(start, end) {
            info!("Pipeline: running for {}", date);
            match self.run(wh, date) {
                Ok(_) => outcome.succeeded.push(date),
                Err(e) => {
                    error!("Pipeline: {} failed at {} stage: {}", date, e.kind(), display_chain(&e));
                    outcome.failed.push(date);
                    if e.is_fatal_for_run() {
                        error!("Pipeline: stopping; remaining dates are not attempted");
                        outcome.aborted = date < end;
                        break;
                    }
                }
            }
        }
        info!(
            "Pipeline: {} date(s) succeeded, {} failed",
            outcome.succeeded.len(),
            outcome.failed.len()
        );
        outcome
    }
}

fn log_report(date: NaiveDate, report: &[WeatherReportRow]) {
    info!("Report for {} ({} cities, hottest first):", date, report.len());
    let fmt = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{:.1}", v));
    for row in report {
        info!(
            "  {:<24} max {:>6} min {:>6} precip {:>6}",
            row.city_name,
            fmt(row.max_temperature),
            fmt(row.min_temperature),
            fmt(row.total_precipitation)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{FsBlobStore, Partition};
    use crate::db::warehouse::test_support::{dim_cities, memory_warehouse, weather_facts};

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn stage_raw(store: &FsBlobStore, config: &Config, day: NaiveDate, max: f64) {
        let p = Partition::new(&config.raw_prefix, &config.refined_prefix, day);
        store
            .put(&p.raw_cities(), br#"[{"city":"Delhi","lat":28.6,"lng":77.2,"country":"IN"}]"#)
            .unwrap();
        store
            .put(
                &p.raw_weather("Delhi"),
                format!(r#"{{"temperature":{{"min":18.0,"max":{}}}}}"#, max).as_bytes(),
            )
            .unwrap();
    }

    #[test]
    fn runs_refine_schema_and_load_for_one_date() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let config = Config::default();
        stage_raw(&store, &config, date(15), 30.0);
        let mut wh = memory_warehouse();

        let report = PipelineRunner::new(&config, &store, None).run(&mut wh, date(15)).unwrap();

        assert_eq!(report.len(), 1);
        assert_eq!(report[0].city_name, "Delhi");
        assert_eq!(report[0].date, date(15));
        assert_eq!(report[0].max_temperature, Some(30.0));
        assert_eq!(dim_cities(&mut wh).len(), 1);
    }

    #[test]
    fn a_date_without_raw_data_fails_alone() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let config = Config::default();
        stage_raw(&store, &config, date(14), 29.0);
        stage_raw(&store, &config, date(16), 31.0);
        let mut wh = memory_warehouse();

        let outcome = PipelineRunner::new(&config, &store, None).run_range(&mut wh, date(14), date(16));

        assert_eq!(outcome.succeeded, vec![date(14), date(16)]);
        assert_eq!(outcome.failed, vec![date(15)]);
        assert!(!outcome.aborted);
        assert!(!outcome.is_success());

        let facts = weather_facts(&mut wh);
        assert_eq!(facts.len(), 2);
        assert_eq!(dim_cities(&mut wh).len(), 1);
    }

    #[test]
    fn schema_error_stops_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let config = Config::default();
        stage_raw(&store, &config, date(14), 29.0);
        stage_raw(&store, &config, date(15), 30.0);
        let mut wh = memory_warehouse();
        // populated legacy table: city_name cannot be added as NOT NULL
        wh.batch_execute(
            "CREATE TABLE dim_city (city_id INTEGER PRIMARY KEY, latitude DOUBLE PRECISION);
            INSERT INTO dim_city (latitude) VALUES (28.6);",
        )
        .unwrap();

        let outcome = PipelineRunner::new(&config, &store, None).run_range(&mut wh, date(14), date(15));

        assert!(outcome.succeeded.is_empty());
        assert_eq!(outcome.failed, vec![date(14)]);
        assert!(outcome.aborted);
    }

    #[test]
    fn legacy_table_missing_its_natural_key_is_repaired_before_loading() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let config = Config::default();
        stage_raw(&store, &config, date(14), 29.0);
        stage_raw(&store, &config, date(15), 30.0);
        let mut wh = memory_warehouse();
        wh.batch_execute("CREATE TABLE dim_city (city_id INTEGER PRIMARY KEY, latitude DOUBLE PRECISION)")
            .unwrap();

        let outcome = PipelineRunner::new(&config, &store, None).run_range(&mut wh, date(14), date(15));

        assert!(outcome.is_success(), "{outcome:?}");
        assert_eq!(dim_cities(&mut wh).len(), 1);
        assert_eq!(weather_facts(&mut wh).len(), 2);
    }
}
