//! Rows written to and read back from the warehouse tables.

use crate::db::warehouse::{ColumnValues, SqlValue};
use crate::models::canonical::CanonicalCityRow;
use chrono::NaiveDate;
use diesel::prelude::*;
use diesel::sql_types::{Date, Double, Integer, Nullable, Text};

/// Surrogate key assignment for one city.
#[derive(Debug, Clone, QueryableByName)]
pub struct CityKey {
    #[diesel(sql_type = Integer)]
    pub city_id: i32,
    #[diesel(sql_type = Text)]
    pub city_name: String,
}

/// A canonical weather row whose city name has been resolved to `dim_city.city_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedWeatherRow {
    pub date: NaiveDate,
    pub city_id: i32,
    pub min_temperature: f64,
    pub max_temperature: f64,
    pub total_precipitation: Option<f64>,
}

/// One line of the per-date load report, hottest city first.
#[derive(Debug, Clone, PartialEq, QueryableByName)]
pub struct WeatherReportRow {
    #[diesel(sql_type = Integer)]
    pub city_id: i32,
    #[diesel(sql_type = Text)]
    pub city_name: String,
    #[diesel(sql_type = Date)]
    pub date: NaiveDate,
    #[diesel(sql_type = Nullable<Double>)]
    pub min_temperature: Option<f64>,
    #[diesel(sql_type = Nullable<Double>)]
    pub max_temperature: Option<f64>,
    #[diesel(sql_type = Nullable<Double>)]
    pub total_precipitation: Option<f64>,
}

impl ColumnValues for CanonicalCityRow {
    fn column_value(&self, column: &str) -> Option<SqlValue> {
        match column {
            "city_name" => Some(SqlValue::Text(Some(self.city_name.clone()))),
            "latitude" => Some(SqlValue::Double(self.latitude)),
            "longitude" => Some(SqlValue::Double(self.longitude)),
            "country" => Some(SqlValue::Text(self.country.clone())),
            _ => None,
        }
    }
}

impl ColumnValues for ResolvedWeatherRow {
    fn column_value(&self, column: &str) -> Option<SqlValue> {
        match column {
            "date" => Some(SqlValue::Date(Some(self.date))),
            "city_id" => Some(SqlValue::Integer(Some(self.city_id))),
            "min_temperature" => Some(SqlValue::Double(Some(self.min_temperature))),
            "max_temperature" => Some(SqlValue::Double(Some(self.max_temperature))),
            "total_precipitation" => Some(SqlValue::Double(self.total_precipitation)),
            _ => None,
        }
    }
}
