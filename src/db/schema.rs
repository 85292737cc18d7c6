//! Explicit warehouse table descriptors.
//!
//! The schema manager renders DDL from these and the loader renders its upsert
//! statements from them, so a column declared here is created, evolved and
//! written without any other change.

use std::fmt::Write;

/// SQL flavour of the connected warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    /// Bind placeholder for the 1-based parameter `n`.
    pub fn placeholder(self, n: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", n),
            Dialect::Sqlite => "?".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Warehouse-generated integer primary key.
    Serial,
    Integer,
    Double,
    Text,
    Date,
}

impl ColumnType {
    fn sql(self, dialect: Dialect) -> &'static str {
        match (self, dialect) {
            (ColumnType::Serial, Dialect::Postgres) => "SERIAL",
            (ColumnType::Serial, Dialect::Sqlite) | (ColumnType::Integer, _) => "INTEGER",
            (ColumnType::Double, _) => "DOUBLE PRECISION",
            (ColumnType::Text, _) => "TEXT",
            (ColumnType::Date, _) => "DATE",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ColumnDef {
    pub name: &'static str,
    pub ty: ColumnType,
    pub nullable: bool,
    /// `(table, column)` this column references.
    pub references: Option<(&'static str, &'static str)>,
}

impl ColumnDef {
    pub const fn new(name: &'static str, ty: ColumnType) -> Self {
        ColumnDef {
            name,
            ty,
            nullable: true,
            references: None,
        }
    }

    pub const fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub const fn references(mut self, table: &'static str, column: &'static str) -> Self {
        self.references = Some((table, column));
        self
    }

    pub fn is_generated(&self) -> bool {
        self.ty == ColumnType::Serial
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TableDef {
    pub name: &'static str,
    pub columns: &'static [ColumnDef],
    pub primary_key: &'static str,
    /// Natural key; upserts conflict on it and it is backed by a unique index.
    pub natural_key: &'static [&'static str],
}

pub const DIM_CITY: TableDef = TableDef {
    name: "dim_city",
    columns: &[
        ColumnDef::new("city_id", ColumnType::Serial),
        ColumnDef::new("city_name", ColumnType::Text).not_null(),
        ColumnDef::new("latitude", ColumnType::Double),
        ColumnDef::new("longitude", ColumnType::Double),
        ColumnDef::new("country", ColumnType::Text),
    ],
    primary_key: "city_id",
    natural_key: &["city_name"],
};

pub const FCT_WEATHER: TableDef = TableDef {
    name: "fct_weather",
    columns: &[
        ColumnDef::new("id", ColumnType::Serial),
        ColumnDef::new("date", ColumnType::Date).not_null(),
        ColumnDef::new("city_id", ColumnType::Integer)
            .not_null()
            .references("dim_city", "city_id"),
        ColumnDef::new("min_temperature", ColumnType::Double),
        ColumnDef::new("max_temperature", ColumnType::Double),
        ColumnDef::new("total_precipitation", ColumnType::Double),
    ],
    primary_key: "id",
    natural_key: &["date", "city_id"],
};

/// Creation order; referenced tables come first.
pub const TABLES: &[TableDef] = &[DIM_CITY, FCT_WEATHER];

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_sql(col: &ColumnDef, dialect: Dialect, primary_key: bool) -> String {
    let mut sql = format!("{} {}", quote_ident(col.name), col.ty.sql(dialect));
    if primary_key {
        sql.push_str(" PRIMARY KEY");
    } else if !col.nullable {
        sql.push_str(" NOT NULL");
    }
    if let Some((table, column)) = col.references {
        let _ = write!(sql, " REFERENCES {} ({})", quote_ident(table), quote_ident(column));
    }
    sql
}

impl TableDef {
    /// Uniqueness of the natural key lives in [`TableDef::unique_index_sql`], so it
    /// can be restored on tables that predate a key column.
    pub fn create_sql(&self, dialect: Dialect) -> String {
        let parts: Vec<String> = self
            .columns
            .iter()
            .map(|c| column_sql(c, dialect, c.name == self.primary_key))
            .collect();
        format!("CREATE TABLE {} (\n    {}\n)", quote_ident(self.name), parts.join(",\n    "))
    }

    /// `<table>_<key columns>_key`, the name PostgreSQL gives an inline UNIQUE constraint.
    pub fn unique_index_name(&self) -> String {
        format!("{}_{}_key", self.name, self.natural_key.join("_"))
    }

    /// The index `ON CONFLICT (<natural key>)` resolves against.
    pub fn unique_index_sql(&self) -> String {
        let cols: Vec<String> = self.natural_key.iter().map(|c| quote_ident(c)).collect();
        format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({})",
            quote_ident(&self.unique_index_name()),
            quote_ident(self.name),
            cols.join(", ")
        )
    }

    /// Additive column DDL: type, nullability and reference only.
    pub fn add_column_sql(&self, col: &ColumnDef, dialect: Dialect) -> String {
        let mut sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            quote_ident(self.name),
            quote_ident(col.name),
            match col.ty {
                ColumnType::Serial => ColumnType::Integer.sql(dialect),
                other => other.sql(dialect),
            }
        );
        if !col.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some((table, column)) = col.references {
            let _ = write!(sql, " REFERENCES {} ({})", quote_ident(table), quote_ident(column));
        }
        sql
    }

    /// Columns the loader writes: everything except the generated key.
    pub fn insert_columns(&self) -> impl Iterator<Item = &'static ColumnDef> {
        self.columns.iter().filter(|c| !c.is_generated())
    }

    /// Columns refreshed when a row with the same natural key already exists.
    pub fn update_columns(&self) -> impl Iterator<Item = &'static ColumnDef> {
        let key = self.natural_key;
        self.insert_columns().filter(move |c| !key.contains(&c.name))
    }

    /// Insert-or-update keyed on the natural key, one row per execution.
    pub fn upsert_sql(&self, dialect: Dialect) -> String {
        let cols: Vec<&ColumnDef> = self.insert_columns().collect();
        let names: Vec<String> = cols.iter().map(|c| quote_ident(c.name)).collect();
        let params: Vec<String> = (1..=cols.len()).map(|n| dialect.placeholder(n)).collect();
        let conflict: Vec<String> = self.natural_key.iter().map(|c| quote_ident(c)).collect();
        let updates: Vec<String> = self
            .update_columns()
            .map(|c| format!("{0} = EXCLUDED.{0}", quote_ident(c.name)))
            .collect();

        let action = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", updates.join(", "))
        };
        format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {}",
            quote_ident(self.name),
            names.join(", "),
            params.join(", "),
            conflict.join(", "),
            action
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dim_city_upsert_conflicts_on_city_name() {
        assert_eq!(
            DIM_CITY.upsert_sql(Dialect::Postgres),
            "INSERT INTO \"dim_city\" (\"city_name\", \"latitude\", \"longitude\", \"country\") \
             VALUES ($1, $2, $3, $4) ON CONFLICT (\"city_name\") DO UPDATE SET \
             \"latitude\" = EXCLUDED.\"latitude\", \"longitude\" = EXCLUDED.\"longitude\", \
             \"country\" = EXCLUDED.\"country\""
        );
    }

    #[test]
    fn fct_weather_upsert_updates_measures_only() {
        let sql = FCT_WEATHER.upsert_sql(Dialect::Sqlite);
        assert!(sql.contains("VALUES (?, ?, ?, ?, ?)"), "{sql}");
        assert!(sql.contains("ON CONFLICT (\"date\", \"city_id\")"), "{sql}");
        assert!(!sql.contains("\"city_id\" = EXCLUDED"), "{sql}");
        assert!(sql.contains("\"total_precipitation\" = EXCLUDED.\"total_precipitation\""), "{sql}");
    }

    #[test]
    fn create_sql_carries_keys_and_constraints() {
        let pg = FCT_WEATHER.create_sql(Dialect::Postgres);
        assert!(pg.contains("\"id\" SERIAL PRIMARY KEY"), "{pg}");
        assert!(pg.contains("\"city_id\" INTEGER NOT NULL REFERENCES \"dim_city\" (\"city_id\")"), "{pg}");

        let lite = DIM_CITY.create_sql(Dialect::Sqlite);
        assert!(lite.contains("\"city_id\" INTEGER PRIMARY KEY"), "{lite}");
        assert!(lite.contains("\"city_name\" TEXT NOT NULL"), "{lite}");
    }

    #[test]
    fn natural_keys_get_named_unique_indexes() {
        assert_eq!(FCT_WEATHER.unique_index_name(), "fct_weather_date_city_id_key");
        assert_eq!(
            DIM_CITY.unique_index_sql(),
            "CREATE UNIQUE INDEX IF NOT EXISTS \"dim_city_city_name_key\" ON \"dim_city\" (\"city_name\")"
        );
    }

    #[test]
    fn add_column_is_plain_and_typed() {
        let col = DIM_CITY.columns.iter().find(|c| c.name == "country").unwrap();
        assert_eq!(
            DIM_CITY.add_column_sql(col, Dialect::Postgres),
            "ALTER TABLE \"dim_city\" ADD COLUMN \"country\" TEXT"
        );
    }

    #[test]
    fn quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
