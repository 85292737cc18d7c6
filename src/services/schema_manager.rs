use crate::db::schema::TableDef;
use crate::db::warehouse::Warehouse;
use crate::error::SchemaError;
use log::{debug, info};

/// What one `ensure_schema` call changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SchemaChanges {
    pub created_tables: Vec<&'static str>,
    /// `(table, column)` pairs added to tables that already existed.
    pub added_columns: Vec<(&'static str, &'static str)>,
    /// Natural-key indexes that were missing.
    pub unique_indexes: Vec<String>,
}

impl SchemaChanges {
    pub fn is_empty(&self) -> bool {
        self.created_tables.is_empty() && self.added_columns.is_empty() && self.unique_indexes.is_empty()
    }
}

/// Creates missing tables, adds newly declared columns and makes sure every
/// natural key has its unique index. Never drops, renames or retypes anything.
pub struct SchemaManager {
    tables: &'static [TableDef],
}

impl SchemaManager {
    pub fn new(tables: &'static [TableDef]) -> Self {
        SchemaManager { tables }
    }

    pub fn ensure_schema(&self, wh: &mut Warehouse) -> Result<SchemaChanges, SchemaError> {
        let dialect = wh.dialect();
        let mut changes = SchemaChanges::default();

        for table in self.tables {
            let existing = wh
                .column_names(table.name)
                .map_err(|source| SchemaError::Introspect {
                    table: table.name,
                    source,
                })?;

            if existing.is_empty() {
                info!("Schema: creating table {}", table.name);
                wh.batch_execute(&table.create_sql(dialect))
                    .map_err(|source| SchemaError::CreateTable {
                        table: table.name,
                        source,
                    })?;
                changes.created_tables.push(table.name);
            } else {
                for col in table.columns.iter().filter(|c| !existing.iter().any(|e| e == c.name)) {
                    info!("Schema: adding column {}.{}", table.name, col.name);
                    wh.batch_execute(&table.add_column_sql(col, dialect))
                        .map_err(|source| SchemaError::AddColumn {
                            table: table.name,
                            column: col.name,
                            source,
                        })?;
                    changes.added_columns.push((table.name, col.name));
                }
            }

            // upserts conflict on the natural key, so the table is unusable without it
            let index = table.unique_index_name();
            let indexes = wh
                .index_names(table.name)
                .map_err(|source| SchemaError::Introspect {
                    table: table.name,
                    source,
                })?;
            if !indexes.contains(&index) {
                info!("Schema: creating unique index {} on {}", index, table.name);
                wh.batch_execute(&table.unique_index_sql())
                    .map_err(|source| SchemaError::UniqueIndex {
                        table: table.name,
                        index: index.clone(),
                        source,
                    })?;
                changes.unique_indexes.push(index);
            }
        }

        if changes.is_empty() {
            debug!("Schema: warehouse is up to date");
        } else {
            info!(
                "Schema: created {} table(s), added {} column(s) and {} unique index(es)",
                changes.created_tables.len(),
                changes.added_columns.len(),
                changes.unique_indexes.len()
            );
        }
        Ok(changes)
    }
}
