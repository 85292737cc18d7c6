//! Raw JSON to canonical tables for one date partition.

use crate::blob::{BlobStore, Partition};
use crate::config::{ColumnMapping, Config};
use crate::error::PipelineError;
use crate::models::canonical::{self, CanonicalCityRow, CanonicalWeatherRow};
use crate::models::raw::{decode_projected, flatten};
use crate::utils::file_stem;
use chrono::NaiveDate;
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefineSummary {
    pub cities: usize,
    pub weather: usize,
}

pub struct Refiner<'a> {
    store: &'a dyn BlobStore,
    config: &'a Config,
}

impl<'a> Refiner<'a> {
    pub fn new(store: &'a dyn BlobStore, config: &'a Config) -> Self {
        Refiner { store, config }
    }

    /// Build both canonical tables for `date` in memory and write them only
    /// once every raw blob has been read and validated.
    pub fn refine(&self, date: NaiveDate) -> Result<RefineSummary, PipelineError> {
        let partition = Partition::new(&self.config.raw_prefix, &self.config.refined_prefix, date);
        let cities = self.refine_cities(&partition)?;
        let weather = self.refine_weather(&partition, date)?;

        canonical::put_city_table(self.store, &partition.refined_cities(), &cities)?;
        canonical::put_weather_table(self.store, &partition.refined_weather(), &weather)?;
        info!(
            "Refine: {} wrote {} city row(s) and {} weather row(s)",
            date,
            cities.len(),
            weather.len()
        );
        Ok(RefineSummary {
            cities: cities.len(),
            weather: weather.len(),
        })
    }

    pub fn refine_cities(&self, partition: &Partition) -> Result<Vec<CanonicalCityRow>, PipelineError> {
        let path = partition.raw_cities();
        let raw = self
            .store
            .get_json(&path)?
            .ok_or_else(|| PipelineError::MissingRawData { path: path.clone() })?;
        let Value::Array(records) = raw else {
            return Err(PipelineError::malformed(&path, "expected a JSON array of city records"));
        };

        records
            .iter()
            .enumerate()
            .map(|(index, record)| {
                let Value::Object(record) = record else {
                    return Err(PipelineError::malformed(&path, format!("record {}: not an object", index)));
                };
                canonical_row(&path, Some(index), &flatten(record), &self.config.canonical_city_columns)
            })
            .collect()
    }

    pub fn refine_weather(
        &self,
        partition: &Partition,
        date: NaiveDate,
    ) -> Result<Vec<CanonicalWeatherRow>, PipelineError> {
        let dir = partition.raw_weather_dir();
        let blobs: Vec<String> = self
            .store
            .list(&dir)?
            .into_iter()
            .filter(|p| p.ends_with(".json"))
            .collect();
        if blobs.is_empty() {
            return Err(PipelineError::MissingRawData { path: dir });
        }

        let mut rows = Vec::with_capacity(blobs.len());
        for path in &blobs {
            let city_name = file_stem(path)
                .ok_or_else(|| PipelineError::malformed(path, "cannot derive a city name from the blob name"))?;
            let raw = self
                .store
                .get_json(path)?
                .ok_or_else(|| PipelineError::MissingRawData { path: path.clone() })?;
            let Value::Object(record) = raw else {
                return Err(PipelineError::malformed(path, "expected a JSON object"));
            };

            let mut flat = flatten(&record);
            flat.insert("city_name".to_string(), Value::String(city_name.to_string()));
            flat.entry("date").or_insert_with(|| Value::String(date.to_string()));
            rows.push(canonical_row(path, None, &flat, &self.config.canonical_weather_columns)?);
        }
        debug!("Refine: read {} weather blob(s) under {}", rows.len(), dir);
        Ok(rows)
    }
}

fn canonical_row<T: DeserializeOwned>(
    path: &str,
    index: Option<usize>,
    flat: &Map<String, Value>,
    mappings: &[ColumnMapping],
) -> Result<T, PipelineError> {
    decode_projected(flat, mappings).map_err(|e| match index {
        Some(i) => PipelineError::malformed(path, format!("record {}: {}", i, e)),
        None => PipelineError::malformed(path, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::FsBlobStore;
    use tempfile::TempDir;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
    }

    fn setup() -> (TempDir, FsBlobStore, Config, Partition) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let config = Config::default();
        let partition = Partition::new(&config.raw_prefix, &config.refined_prefix, day());
        (dir, store, config, partition)
    }

    const DELHI_CITY: &[u8] = br#"[{"city":"Delhi","lat":28.6,"lng":77.2,"country":"IN"}]"#;
    const DELHI_WEATHER: &[u8] = br#"{"temperature":{"min":18.0,"max":30.0}}"#;

    #[test]
    fn refines_the_delhi_city_record() {
        let (_dir, store, config, p) = setup();
        store.put(&p.raw_cities(), DELHI_CITY).unwrap();

        let rows = Refiner::new(&store, &config).refine_cities(&p).unwrap();
        assert_eq!(
            rows,
            vec![CanonicalCityRow {
                city_name: "Delhi".into(),
                latitude: Some(28.6),
                longitude: Some(77.2),
                country: Some("IN".into()),
            }]
        );
    }

    #[test]
    fn refines_the_delhi_weather_blob() {
        let (_dir, store, config, p) = setup();
        store.put(&p.raw_weather("Delhi"), DELHI_WEATHER).unwrap();

        let rows = Refiner::new(&store, &config).refine_weather(&p, day()).unwrap();
        assert_eq!(
            rows,
            vec![CanonicalWeatherRow {
                date: day(),
                city_name: "Delhi".into(),
                min_temperature: 18.0,
                max_temperature: 30.0,
                total_precipitation: None,
            }]
        );
    }

    #[test]
    fn refine_writes_both_tables() {
        let (_dir, store, config, p) = setup();
        store.put(&p.raw_cities(), DELHI_CITY).unwrap();
        store.put(&p.raw_weather("Delhi"), DELHI_WEATHER).unwrap();
        store
            .put(
                &p.raw_weather("Mumbai"),
                br#"{"date":"2024-01-15","temperature":{"min":24,"max":33},"precipitation":{"total":4.2}}"#,
            )
            .unwrap();
        store.put("raw/date=2024-01-15/weather/notes.txt", b"ignored").unwrap();

        let summary = Refiner::new(&store, &config).refine(day()).unwrap();
        assert_eq!(summary, RefineSummary { cities: 1, weather: 2 });

        let cities: Vec<CanonicalCityRow> = canonical::get_table(&store, &p.refined_cities()).unwrap();
        assert_eq!(cities.len(), 1);
        let weather: Vec<CanonicalWeatherRow> = canonical::get_table(&store, &p.refined_weather()).unwrap();
        let mumbai = weather.iter().find(|w| w.city_name == "Mumbai").unwrap();
        assert_eq!(mumbai.max_temperature, 33.0);
        assert_eq!(mumbai.total_precipitation, Some(4.2));
    }

    #[test]
    fn missing_raw_blobs_fail_without_partial_output() {
        let (_dir, store, config, p) = setup();
        let refiner = Refiner::new(&store, &config);

        let err = refiner.refine(day()).unwrap_err();
        assert!(matches!(&err, PipelineError::MissingRawData { path } if path == &p.raw_cities()), "{err}");

        store.put(&p.raw_cities(), DELHI_CITY).unwrap();
        let err = refiner.refine(day()).unwrap_err();
        assert!(matches!(&err, PipelineError::MissingRawData { path } if path == &p.raw_weather_dir()), "{err}");
        assert!(store.get(&p.refined_cities()).unwrap().is_none());
        assert!(store.get(&p.refined_weather()).unwrap().is_none());
    }

    #[test]
    fn weather_without_max_temperature_is_malformed() {
        let (_dir, store, config, p) = setup();
        store.put(&p.raw_cities(), DELHI_CITY).unwrap();
        store.put(&p.raw_weather("Delhi"), br#"{"temperature":{"min":18.0}}"#).unwrap();

        let err = Refiner::new(&store, &config).refine(day()).unwrap_err();
        match err {
            PipelineError::MalformedData { path, reason } => {
                assert!(path.ends_with("Delhi.json"), "{path}");
                assert!(reason.contains("max_temperature"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(store.get(&p.refined_cities()).unwrap().is_none());
    }

    #[test]
    fn unexpected_json_shapes_are_malformed() {
        let (_dir, store, config, p) = setup();
        let refiner = Refiner::new(&store, &config);

        store.put(&p.raw_cities(), br#"{"city":"Delhi"}"#).unwrap();
        assert!(matches!(refiner.refine_cities(&p), Err(PipelineError::MalformedData { .. })));

        store.put(&p.raw_cities(), br#"[{"city":"Delhi","lat":"north","lng":77.2,"country":"IN"}]"#)
            .unwrap();
        match refiner.refine_cities(&p) {
            Err(PipelineError::MalformedData { reason, .. }) => {
                assert!(reason.starts_with("record 0: latitude"), "{reason}")
            }
            other => panic!("unexpected result: {other:?}"),
        }

        store.put(&p.raw_weather("Delhi"), b"[1, 2]").unwrap();
        assert!(matches!(
            refiner.refine_weather(&p, day()),
            Err(PipelineError::MalformedData { .. })
        ));
    }

    #[test]
    fn column_mappings_come_from_config() {
        let (_dir, store, mut config, p) = setup();
        config.canonical_city_columns = vec![
            ColumnMapping::new("name", "city_name"),
            ColumnMapping::new("geo.lat", "latitude"),
            ColumnMapping::new("geo.lon", "longitude"),
            ColumnMapping::new("admin.country", "country"),
        ];
        store
            .put(
                &p.raw_cities(),
                br#"[{"name":"Pune","geo":{"lat":"18.52","lon":"73.85"},"admin":{"country":"India"}}]"#,
            )
            .unwrap();

        let rows = Refiner::new(&store, &config).refine_cities(&p).unwrap();
        assert_eq!(rows[0].city_name, "Pune");
        assert_eq!(rows[0].latitude, Some(18.52));
        assert_eq!(rows[0].country.as_deref(), Some("India"));
    }

    #[test]
    fn cities_without_coordinates_or_country_are_kept() {
        let (_dir, store, config, p) = setup();
        store
            .put(
                &p.raw_cities(),
                br#"[{"city":"Delhi","lat":28.6,"lng":77.2,"country":"IN"},{"city":"Pune","lat":18.5,"lng":73.8},{"city":"Leh"}]"#,
            )
            .unwrap();

        let rows = Refiner::new(&store, &config).refine_cities(&p).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].city_name, "Pune");
        assert_eq!(rows[1].latitude, Some(18.5));
        assert_eq!(rows[1].country, None);
        assert_eq!(rows[2].latitude, None);
        assert_eq!(rows[2].longitude, None);
    }

    #[test]
    fn a_city_without_a_name_is_malformed() {
        let (_dir, store, config, p) = setup();
        store.put(&p.raw_cities(), br#"[{"lat":18.5,"lng":73.8,"country":"IN"}]"#).unwrap();

        match Refiner::new(&store, &config).refine_cities(&p) {
            Err(PipelineError::MalformedData { reason, .. }) => {
                assert!(reason.starts_with("record 0: city_name"), "{reason}")
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
