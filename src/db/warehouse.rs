//! Warehouse connection over diesel: PostgreSQL in production, SQLite for
//! local runs and tests. Statements are built from the table descriptors in
//! [`crate::db::schema`], so everything goes through `sql_query` with
//! parameters bound by their declared column type.

use crate::db::schema::{ColumnType, Dialect};
use chrono::NaiveDate;
use diesel::backend::Backend;
use diesel::connection::SimpleConnection;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::query_builder::{BoxedSqlQuery, SqlQuery};
use diesel::serialize::ToSql;
use diesel::sql_types::{Date, Double, HasSqlType, Integer, Nullable, Text};
use diesel::sqlite::Sqlite;
use diesel::{ConnectionError, PgConnection, QueryResult, SqliteConnection};

/// A statement parameter, tagged with the SQL type it binds as.
/// `None` binds a typed NULL.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(Option<String>),
    Double(Option<f64>),
    Integer(Option<i32>),
    Date(Option<NaiveDate>),
}

impl SqlValue {
    pub fn null(ty: ColumnType) -> Self {
        match ty {
            ColumnType::Serial | ColumnType::Integer => SqlValue::Integer(None),
            ColumnType::Double => SqlValue::Double(None),
            ColumnType::Text => SqlValue::Text(None),
            ColumnType::Date => SqlValue::Date(None),
        }
    }
}

/// Rows the loader writes expose their values by warehouse column name.
pub trait ColumnValues {
    /// `None` for a column this row does not carry.
    fn column_value(&self, column: &str) -> Option<SqlValue>;
}

#[derive(QueryableByName)]
struct CatalogName {
    #[diesel(sql_type = Text)]
    name: String,
}

fn bind_params<'f, DB>(sql: &str, params: &[SqlValue]) -> BoxedSqlQuery<'f, DB, SqlQuery>
where
    DB: Backend + HasSqlType<Text> + HasSqlType<Double> + HasSqlType<Integer> + HasSqlType<Date>,
    String: ToSql<Text, DB>,
    f64: ToSql<Double, DB>,
    i32: ToSql<Integer, DB>,
    NaiveDate: ToSql<Date, DB>,
{
    let mut query = diesel::sql_query(sql).into_boxed::<DB>();
    for param in params {
        query = match param.clone() {
            SqlValue::Text(v) => query.bind::<Nullable<Text>, _>(v),
            SqlValue::Double(v) => query.bind::<Nullable<Double>, _>(v),
            SqlValue::Integer(v) => query.bind::<Nullable<Integer>, _>(v),
            SqlValue::Date(v) => query.bind::<Nullable<Date>, _>(v),
        };
    }
    query
}

pub enum Warehouse {
    Postgres(PgConnection),
    Sqlite(SqliteConnection),
}

impl Warehouse {
    /// `postgres://…`/`postgresql://…` or `sqlite://<path>` (`sqlite://:memory:` for a scratch database).
    pub fn connect(url: &str) -> Result<Self, ConnectionError> {
        if let Some(path) = url.strip_prefix("sqlite://") {
            let mut conn = SqliteConnection::establish(path)?;
            conn.batch_execute("PRAGMA foreign_keys = ON")
                .map_err(ConnectionError::CouldntSetupConfiguration)?;
            Ok(Warehouse::Sqlite(conn))
        } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            PgConnection::establish(url).map(Warehouse::Postgres)
        } else {
            Err(ConnectionError::InvalidConnectionUrl(format!(
                "unsupported warehouse url scheme (expected postgres:// or sqlite://): {}",
                redact(url)
            )))
        }
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            Warehouse::Postgres(_) => Dialect::Postgres,
            Warehouse::Sqlite(_) => Dialect::Sqlite,
        }
    }

    /// Column names of `table` in declaration order; empty when the table does not exist.
    pub fn column_names(&mut self, table: &str) -> QueryResult<Vec<String>> {
        let sql = match self.dialect() {
            Dialect::Postgres => {
                "SELECT column_name::text AS name FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND table_name = $1 ORDER BY ordinal_position"
            }
            Dialect::Sqlite => "SELECT name FROM pragma_table_info(?) ORDER BY cid",
        };
        self.catalog_names(sql, table)
    }

    /// Names of the indexes on `table`, sorted.
    pub fn index_names(&mut self, table: &str) -> QueryResult<Vec<String>> {
        let sql = match self.dialect() {
            Dialect::Postgres => {
                "SELECT indexname::text AS name FROM pg_indexes \
                 WHERE schemaname = current_schema() AND tablename = $1 ORDER BY indexname"
            }
            Dialect::Sqlite => "SELECT name FROM pragma_index_list(?) ORDER BY name",
        };
        self.catalog_names(sql, table)
    }

    fn catalog_names(&mut self, sql: &str, table: &str) -> QueryResult<Vec<String>> {
        let rows: Vec<CatalogName> = self.load(sql, &[SqlValue::Text(Some(table.to_string()))])?;
        Ok(rows.into_iter().map(|r| r.name).collect())
    }

    pub fn batch_execute(&mut self, sql: &str) -> QueryResult<()> {
        match self {
            Warehouse::Postgres(conn) => conn.batch_execute(sql),
            Warehouse::Sqlite(conn) => conn.batch_execute(sql),
        }
    }

    /// Run one parameterised statement; returns the affected row count.
    pub fn execute(&mut self, sql: &str, params: &[SqlValue]) -> QueryResult<usize> {
        match self {
            Warehouse::Postgres(conn) => bind_params::<Pg>(sql, params).execute(conn),
            Warehouse::Sqlite(conn) => bind_params::<Sqlite>(sql, params).execute(conn),
        }
    }

    pub fn load<T>(&mut self, sql: &str, params: &[SqlValue]) -> QueryResult<Vec<T>>
    where
        T: QueryableByName<Pg> + QueryableByName<Sqlite> + 'static,
    {
        match self {
            Warehouse::Postgres(conn) => bind_params::<Pg>(sql, params).load(conn),
            Warehouse::Sqlite(conn) => bind_params::<Sqlite>(sql, params).load(conn),
        }
    }
}

/// Drop the password from a connection URL before it reaches a log line.
pub fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            let userinfo = &url[scheme_end + 3..at];
            match userinfo.split_once(':') {
                Some((user, _)) => format!("{}{}:***{}", &url[..scheme_end + 3], user, &url[at..]),
                None => url.to_string(),
            }
        }
        _ => url.to_string(),
    }
}
