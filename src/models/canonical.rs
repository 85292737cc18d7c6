//! Canonical datasets: the contract between the refiner and the loader.
//!
//! Each dataset is written as a single Parquet file (one row group) and read
//! back by column name, so column order in the file carries no meaning.

use crate::blob::BlobStore;
use crate::error::PipelineError;
use crate::utils::lenient_opt_f64;
use bytes::Bytes;
use chrono::NaiveDate;
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::file::writer::SerializedFileWriter;
use parquet::record::RecordWriter;
use parquet_derive::ParquetRecordWriter;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Only the name is required; directory entries without coordinates or
/// country still become `dim_city` rows with NULLs.
#[derive(Debug, Clone, PartialEq, Deserialize, ParquetRecordWriter)]
pub struct CanonicalCityRow {
    pub city_name: String,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub country: Option<String>,
}

impl CanonicalCityRow {
    pub const COLUMNS: &'static [&'static str] = &["city_name", "latitude", "longitude", "country"];
}

/// One observation per (date, city).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CanonicalWeatherRow {
    pub date: NaiveDate,
    pub city_name: String,
    pub min_temperature: f64,
    pub max_temperature: f64,
    /// Sourced from the day summary's `precipitation.total`; absent in older payloads.
    #[serde(default)]
    pub total_precipitation: Option<f64>,
}

impl CanonicalWeatherRow {
    pub const COLUMNS: &'static [&'static str] = &[
        "date",
        "city_name",
        "min_temperature",
        "max_temperature",
        "total_precipitation",
    ];
}

// Parquet layout of CanonicalWeatherRow; the date is kept as ISO text.
#[derive(Debug, ParquetRecordWriter)]
struct WeatherRecord {
    date: String,
    city_name: String,
    min_temperature: f64,
    max_temperature: f64,
    total_precipitation: Option<f64>,
}

impl From<&CanonicalWeatherRow> for WeatherRecord {
    fn from(row: &CanonicalWeatherRow) -> Self {
        WeatherRecord {
            date: row.date.to_string(),
            city_name: row.city_name.clone(),
            min_temperature: row.min_temperature,
            max_temperature: row.max_temperature,
            total_precipitation: row.total_precipitation,
        }
    }
}

fn encode_rows<T>(rows: &[T]) -> Result<Vec<u8>, ParquetError>
where
    for<'a> &'a [T]: RecordWriter<T>,
{
    let props = WriterProperties::builder().build();
    let mut writer = SerializedFileWriter::new(Vec::new(), rows.schema()?, Arc::new(props))?;
    if !rows.is_empty() {
        let mut row_group = writer.next_row_group()?;
        rows.write_to_row_group(&mut row_group)?;
        row_group.close()?;
    }
    writer.into_inner()
}

fn decode_rows<T: DeserializeOwned>(path: &str, bytes: Vec<u8>) -> Result<Vec<T>, PipelineError> {
    let columnar = |source| PipelineError::Columnar {
        path: path.to_string(),
        source,
    };
    let reader = SerializedFileReader::new(Bytes::from(bytes)).map_err(columnar)?;
    let mut out = Vec::new();
    for (index, row) in reader.get_row_iter(None).map_err(columnar)?.enumerate() {
        let row = row.map_err(columnar)?;
        let parsed = serde_path_to_error::deserialize(row.to_json_value())
            .map_err(|e| PipelineError::malformed(path, format!("row {}: {}", index, e)))?;
        out.push(parsed);
    }
    Ok(out)
}

pub fn put_city_table(store: &dyn BlobStore, path: &str, rows: &[CanonicalCityRow]) -> Result<(), PipelineError> {
    let bytes = encode_rows(rows).map_err(|source| PipelineError::Columnar {
        path: path.to_string(),
        source,
    })?;
    store.put(path, &bytes)
}

pub fn put_weather_table(
    store: &dyn BlobStore,
    path: &str,
    rows: &[CanonicalWeatherRow],
) -> Result<(), PipelineError> {
    let records: Vec<WeatherRecord> = rows.iter().map(WeatherRecord::from).collect();
    let bytes = encode_rows(&records).map_err(|source| PipelineError::Columnar {
        path: path.to_string(),
        source,
    })?;
    store.put(path, &bytes)
}

/// Read a canonical table; a missing blob is reported as [`PipelineError::MissingRawData`].
pub fn get_table<T: DeserializeOwned>(store: &dyn BlobStore, path: &str) -> Result<Vec<T>, PipelineError> {
    let bytes = store.get(path)?.ok_or_else(|| PipelineError::MissingRawData {
        path: path.to_string(),
    })?;
    decode_rows(path, bytes)
}
