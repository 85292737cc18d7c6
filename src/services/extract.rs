//! Raw Data Fetcher: city directory plus one weather day summary per city.

use crate::blob::{BlobStore, Partition};
use crate::client::WeatherApi;
use crate::config::Config;
use crate::error::PipelineError;
use crate::models::canonical::CanonicalCityRow;
use crate::models::raw::{decode_projected, flatten};
use chrono::NaiveDate;
use log::{debug, info, warn};
use serde_json::Value;
use std::num::NonZeroUsize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub cities: usize,
    pub stored: usize,
    pub skipped: usize,
}

pub struct Extractor<'a> {
    store: &'a dyn BlobStore,
    api: &'a dyn WeatherApi,
    config: &'a Config,
}

impl<'a> Extractor<'a> {
    pub fn new(store: &'a dyn BlobStore, api: &'a dyn WeatherApi, config: &'a Config) -> Self {
        Extractor { store, api, config }
    }

    /// Store the city directory and every city's weather for `date` as raw blobs.
    ///
    /// A failing city list fails the date; a failing city is logged and skipped.
    pub fn extract(&self, date: NaiveDate) -> Result<ExtractSummary, PipelineError> {
        let partition = Partition::new(&self.config.raw_prefix, &self.config.refined_prefix, date);
        let cities_path = partition.raw_cities();

        let body = self.api.get_cities()?;
        let cities = self.read_directory(&cities_path, &body)?;
        self.store.put_json(&cities_path, &body)?;
        info!("Extract: {} city directory stored ({} cities)", date, cities.len());

        let limit = self.config.max_cities.map_or(cities.len(), NonZeroUsize::get);
        let mut summary = ExtractSummary {
            cities: cities.len().min(limit),
            ..ExtractSummary::default()
        };

        for city in cities.iter().take(limit) {
            let name = &city.city_name;
            if name.is_empty() || name.contains('/') {
                warn!("Extract: skipping city with unusable name {:?}", name);
                summary.skipped += 1;
                continue;
            }
            let (Some(lat), Some(lng)) = (city.latitude, city.longitude) else {
                warn!("Extract: skipping {} without coordinates", name);
                summary.skipped += 1;
                continue;
            };

            let body = match self.api.get_day_summary(lat, lng, date) {
                Ok(body) => body,
                Err(e) => {
                    warn!("Extract: weather for {} on {} skipped: {}", name, date, e);
                    summary.skipped += 1;
                    continue;
                }
            };
            match self.store.put_json(&partition.raw_weather(name), &body) {
                Ok(()) => {
                    debug!("Extract: stored weather for {}", name);
                    summary.stored += 1;
                }
                Err(e @ PipelineError::MalformedData { .. }) => {
                    warn!("Extract: weather for {} on {} skipped: {}", name, date, e);
                    summary.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            "Extract: {} stored weather for {} of {} cities ({} skipped)",
            date, summary.stored, summary.cities, summary.skipped
        );
        Ok(summary)
    }

    /// Decode the city directory through the configured city column mappings,
    /// the same projection the refiner applies to the stored blob.
    fn read_directory(&self, path: &str, body: &[u8]) -> Result<Vec<CanonicalCityRow>, PipelineError> {
        let raw: Value = serde_json::from_slice(body).map_err(|e| PipelineError::malformed(path, e))?;
        let Value::Array(records) = raw else {
            return Err(PipelineError::malformed(path, "expected a JSON array of city records"));
        };
        records
            .iter()
            .enumerate()
            .map(|(index, record)| {
                let Value::Object(record) = record else {
                    return Err(PipelineError::malformed(path, format!("record {}: not an object", index)));
                };
                decode_projected(&flatten(record), &self.config.canonical_city_columns)
                    .map_err(|e| PipelineError::malformed(path, format!("record {}: {}", index, e)))
            })
            .collect()
    }
}
