//! Blob Store Gateway: date-partitioned JSON and columnar blobs.
//!
//! Paths are `/`-separated and relative to the store root:
//! `<stage>/date=<YYYY-MM-DD>/<artifact>`.

use crate::error::PipelineError;
use chrono::NaiveDate;
use log::debug;
use serde_json::Value;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;

pub const CITY_RAW_ARTIFACT: &str = "city_data.json";
pub const WEATHER_RAW_DIR: &str = "weather";
pub const CITY_REFINED_ARTIFACT: &str = "city_data.parquet";
pub const WEATHER_REFINED_ARTIFACT: &str = "weather_data.parquet";

/// Blob paths for one date under the configured raw and refined prefixes.
#[derive(Debug, Clone)]
pub struct Partition {
    raw: String,
    refined: String,
}

impl Partition {
    pub fn new(raw_prefix: &str, refined_prefix: &str, date: NaiveDate) -> Self {
        Partition {
            raw: format!("{}/date={}", raw_prefix, date),
            refined: format!("{}/date={}", refined_prefix, date),
        }
    }

    pub fn raw_cities(&self) -> String {
        format!("{}/{}", self.raw, CITY_RAW_ARTIFACT)
    }

    pub fn raw_weather_dir(&self) -> String {
        format!("{}/{}", self.raw, WEATHER_RAW_DIR)
    }

    pub fn raw_weather(&self, city_name: &str) -> String {
        format!("{}/{}/{}.json", self.raw, WEATHER_RAW_DIR, city_name)
    }

    pub fn refined_cities(&self) -> String {
        format!("{}/{}", self.refined, CITY_REFINED_ARTIFACT)
    }

    pub fn refined_weather(&self) -> String {
        format!("{}/{}", self.refined, WEATHER_REFINED_ARTIFACT)
    }
}

pub trait BlobStore {
    /// `Ok(None)` when nothing is stored at `path`.
    fn get(&self, path: &str) -> Result<Option<Vec<u8>>, PipelineError>;

    /// Replace the blob at `path`; readers never observe a partial write.
    fn put(&self, path: &str, data: &[u8]) -> Result<(), PipelineError>;

    /// Paths of the blobs directly under `prefix`, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>, PipelineError>;

    fn get_json(&self, path: &str) -> Result<Option<Value>, PipelineError> {
        match self.get(path)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| PipelineError::malformed(path, e)),
            None => Ok(None),
        }
    }

    fn put_json(&self, path: &str, data: &[u8]) -> Result<(), PipelineError> {
        serde_json::from_slice::<serde::de::IgnoredAny>(data).map_err(|e| PipelineError::malformed(path, e))?;
        self.put(path, data)
    }
}

/// Stores blobs as files below a root directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsBlobStore { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        path.split('/')
            .filter(|seg| !seg.is_empty())
            .fold(self.root.clone(), |acc, seg| acc.join(seg))
    }
}

fn io_err(path: &str) -> impl FnOnce(std::io::Error) -> PipelineError + '_ {
    move |source| PipelineError::Blob {
        path: path.to_string(),
        source,
    }
}

impl BlobStore for FsBlobStore {
    fn get(&self, path: &str) -> Result<Option<Vec<u8>>, PipelineError> {
        match fs::read(self.resolve(path)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(path)(e)),
        }
    }

    fn put(&self, path: &str, data: &[u8]) -> Result<(), PipelineError> {
        let target = self.resolve(path);
        let dir = target.parent().unwrap_or(&self.root).to_path_buf();
        fs::create_dir_all(&dir).map_err(io_err(path))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err(path))?;
        tmp.write_all(data).map_err(io_err(path))?;
        tmp.as_file().sync_all().map_err(io_err(path))?;
        tmp.persist(&target).map_err(|e| io_err(path)(e.error))?;
        debug!("Blob written: {} ({} bytes)", path, data.len());
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, PipelineError> {
        let dir = self.resolve(prefix);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(prefix)(e)),
        };

        let prefix = prefix.trim_end_matches('/');
        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io_err(prefix))?;
            let file_type = entry.file_type().map_err(io_err(prefix))?;
            if !file_type.is_file() {
                continue;
            }
            // NamedTempFile names start with '.'; an in-flight write is not a blob yet
            match entry.file_name().to_str() {
                Some(name) if !name.starts_with('.') => paths.push(format!("{}/{}", prefix, name)),
                _ => {}
            }
        }
        paths.sort();
        Ok(paths)
    }
}
