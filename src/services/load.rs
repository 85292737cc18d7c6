//! Reconciling loader: upserts the canonical datasets of one date and
//! resolves weather rows to the warehouse-assigned city keys.

use crate::blob::{BlobStore, Partition};
use crate::config::Config;
use crate::db::models::{CityKey, ResolvedWeatherRow, WeatherReportRow};
use crate::db::schema::{ColumnDef, DIM_CITY, Dialect, FCT_WEATHER, TableDef};
use crate::db::warehouse::{ColumnValues, SqlValue, Warehouse};
use crate::error::PipelineError;
use crate::models::canonical::{self, CanonicalCityRow, CanonicalWeatherRow};
use chrono::NaiveDate;
use diesel::QueryResult;
use log::{debug, info, warn};
use std::collections::{BTreeSet, HashMap};

/// A rendered insert-or-update statement and the columns it binds, in order.
struct Upsert {
    sql: String,
    columns: Vec<&'static ColumnDef>,
}

impl Upsert {
    fn new(table: &TableDef, dialect: Dialect) -> Self {
        Upsert {
            sql: table.upsert_sql(dialect),
            columns: table.insert_columns().collect(),
        }
    }

    /// Each row is its own statement, so rows written before a failure stay committed.
    fn run<R: ColumnValues>(&self, wh: &mut Warehouse, rows: &[R]) -> QueryResult<usize> {
        let mut written = 0;
        for row in rows {
            let params: Vec<SqlValue> = self
                .columns
                .iter()
                .map(|c| row.column_value(c.name).unwrap_or_else(|| SqlValue::null(c.ty)))
                .collect();
            written += wh.execute(&self.sql, &params)?;
        }
        Ok(written)
    }
}

/// Outcome of the weather half of a load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeatherLoad {
    pub upserted: usize,
    /// City names with no `dim_city` row; their weather rows were not loaded.
    pub unresolved: Vec<String>,
}

pub struct Loader<'a> {
    store: &'a dyn BlobStore,
    config: &'a Config,
    cities: Upsert,
    weather: Upsert,
    dialect: Dialect,
}

impl<'a> Loader<'a> {
    pub fn new(store: &'a dyn BlobStore, config: &'a Config, dialect: Dialect) -> Self {
        Loader {
            store,
            config,
            cities: Upsert::new(&DIM_CITY, dialect),
            weather: Upsert::new(&FCT_WEATHER, dialect),
            dialect,
        }
    }

    fn partition(&self, date: NaiveDate) -> Partition {
        Partition::new(&self.config.raw_prefix, &self.config.refined_prefix, date)
    }

    /// Load both canonical datasets for `date` and return that date's report.
    ///
    /// Cities are committed before any weather row is resolved; a failure on the
    /// city side returns before the weather dataset is read.
    pub fn load(&self, wh: &mut Warehouse, date: NaiveDate) -> Result<Vec<WeatherReportRow>, PipelineError> {
        info!("Load: starting for {}", date);
        let cities = self.load_cities(wh, date)?;
        let weather = self.load_weather(wh, date)?;
        let report = self.report(wh, date)?;
        info!(
            "Load: {} complete (cities={}, weather={}, unresolved={})",
            date,
            cities,
            weather.upserted,
            weather.unresolved.len()
        );
        Ok(report)
    }

    pub fn load_cities(&self, wh: &mut Warehouse, date: NaiveDate) -> Result<usize, PipelineError> {
        let path = self.partition(date).refined_cities();
        let rows: Vec<CanonicalCityRow> = canonical::get_table(self.store, &path)?;
        let written = self
            .cities
            .run(wh, &rows)
            .map_err(PipelineError::warehouse("dim_city upsert"))?;
        debug!("Load: upserted {} city row(s) from {}", written, path);
        Ok(rows.len())
    }

    pub fn load_weather(&self, wh: &mut Warehouse, date: NaiveDate) -> Result<WeatherLoad, PipelineError> {
        let path = self.partition(date).refined_weather();
        let rows: Vec<CanonicalWeatherRow> = canonical::get_table(self.store, &path)?;
        let keys: Vec<CityKey> = wh
            .load("SELECT city_id, city_name FROM dim_city", &[])
            .map_err(PipelineError::warehouse("city key lookup"))?;

        let (resolved, unresolved) = resolve_city_ids(rows, &keys);
        if !unresolved.is_empty() {
            warn!(
                "Load: {} has weather for {} city name(s) missing from dim_city; rows dropped: {}",
                date,
                unresolved.len(),
                unresolved.join(", ")
            );
        }

        self.weather
            .run(wh, &resolved)
            .map_err(PipelineError::warehouse("fct_weather upsert"))?;
        Ok(WeatherLoad {
            upserted: resolved.len(),
            unresolved,
        })
    }

    /// Facts for `date` joined with their city, hottest first.
    pub fn report(&self, wh: &mut Warehouse, date: NaiveDate) -> Result<Vec<WeatherReportRow>, PipelineError> {
        let sql = format!(
            "SELECT c.city_id, c.city_name, w.date, w.min_temperature, w.max_temperature, w.total_precipitation \
             FROM fct_weather w JOIN dim_city c ON c.city_id = w.city_id \
             WHERE w.date = {} \
             ORDER BY w.max_temperature DESC, c.city_name",
            self.dialect.placeholder(1)
        );
        wh.load(&sql, &[SqlValue::Date(Some(date))])
            .map_err(PipelineError::warehouse("report"))
    }
}

/// Inner join of weather rows with the city key mapping on `city_name`.
///
/// Rows whose city has no key are left out and their names returned (deduplicated, sorted).
pub fn resolve_city_ids(
    rows: Vec<CanonicalWeatherRow>,
    keys: &[CityKey],
) -> (Vec<ResolvedWeatherRow>, Vec<String>) {
    let ids: HashMap<&str, i32> = keys.iter().map(|k| (k.city_name.as_str(), k.city_id)).collect();
    let mut resolved = Vec::with_capacity(rows.len());
    let mut unresolved = BTreeSet::new();

    for row in rows {
        match ids.get(row.city_name.as_str()) {
            Some(&city_id) => resolved.push(ResolvedWeatherRow {
                date: row.date,
                city_id,
                min_temperature: row.min_temperature,
                max_temperature: row.max_temperature,
                total_precipitation: row.total_precipitation,
            }),
            None => {
                unresolved.insert(row.city_name);
            }
        }
    }
    (resolved, unresolved.into_iter().collect())
}
