//! Raw API payloads are kept as untyped JSON: flattened to dotted keys,
//! then projected onto canonical columns by the configured mappings.

use crate::config::ColumnMapping;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Flatten nested objects into dot-separated keys:
/// `{"temperature": {"min": 1}}` becomes `{"temperature.min": 1}`.
/// Arrays and scalars are kept as leaf values.
pub fn flatten(value: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    flatten_into(&mut out, None, value);
    out
}

fn flatten_into(out: &mut Map<String, Value>, prefix: Option<&str>, value: &Map<String, Value>) {
    for (key, v) in value {
        let path = match prefix {
            Some(p) => format!("{}.{}", p, key),
            None => key.clone(),
        };
        match v {
            Value::Object(inner) if !inner.is_empty() => flatten_into(out, Some(&path), inner),
            other => {
                out.insert(path, other.clone());
            }
        }
    }
}

/// Keep only the mapped fields, renamed to their canonical column.
/// Absent sources become `null` so the canonical row decides whether that is acceptable.
pub fn project(flat: &Map<String, Value>, mappings: &[ColumnMapping]) -> Map<String, Value> {
    mappings
        .iter()
        .map(|m| (m.target.clone(), flat.get(&m.source).cloned().unwrap_or(Value::Null)))
        .collect()
}

/// Project a flattened record and decode it as the canonical row `T`.
/// Errors carry the offending canonical column.
pub fn decode_projected<T: DeserializeOwned>(
    flat: &Map<String, Value>,
    mappings: &[ColumnMapping],
) -> Result<T, serde_path_to_error::Error<serde_json::Error>> {
    serde_path_to_error::deserialize(Value::Object(project(flat, mappings)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn flatten_joins_nested_keys_with_dots() {
        let flat = flatten(&obj(json!({
            "date": "2024-01-15",
            "temperature": {"min": 18.0, "max": 30.0},
            "wind": {"max": {"speed": 4.1, "direction": 120}},
            "alerts": [1, 2],
            "empty": {}
        })));
        assert_eq!(flat["date"], "2024-01-15");
        assert_eq!(flat["temperature.min"], 18.0);
        assert_eq!(flat["wind.max.direction"], 120);
        assert_eq!(flat["alerts"], json!([1, 2]));
        assert_eq!(flat["empty"], json!({}));
        assert!(!flat.contains_key("temperature"));
    }

    #[test]
    fn project_renames_and_nulls_missing_sources() {
        let flat = flatten(&obj(json!({"temperature": {"min": 18.0}})));
        let projected = project(&flat, &[
            ColumnMapping::new("temperature.min", "min_temperature"),
            ColumnMapping::new("precipitation.total", "total_precipitation"),
        ]);
        assert_eq!(projected.len(), 2);
        assert_eq!(projected["min_temperature"], 18.0);
        assert_eq!(projected["total_precipitation"], Value::Null);
    }

    #[test]
    fn decode_projected_reads_directory_entries() {
        use crate::models::canonical::CanonicalCityRow;
        let mappings = [
            ColumnMapping::new("city", "city_name"),
            ColumnMapping::new("lat", "latitude"),
            ColumnMapping::new("lng", "longitude"),
            ColumnMapping::new("country", "country"),
        ];

        let full = flatten(&obj(json!(
            {"city": "Mumbai", "lat": "18.9667", "lng": "72.8333", "country": "India", "population": "18978000"}
        )));
        let row: CanonicalCityRow = decode_projected(&full, &mappings).unwrap();
        assert_eq!(row.latitude, Some(18.9667));
        assert_eq!(row.country.as_deref(), Some("India"));

        let bare = flatten(&obj(json!({"city": "Pune", "lat": 18.5, "lng": 73.8})));
        let row: CanonicalCityRow = decode_projected(&bare, &mappings).unwrap();
        assert_eq!(row.longitude, Some(73.8));
        assert!(row.country.is_none());

        let nameless = flatten(&obj(json!({"lat": 18.5})));
        let err = decode_projected::<CanonicalCityRow>(&nameless, &mappings).unwrap_err();
        assert_eq!(err.path().to_string(), "city_name");
    }
}
