//! Catalog entries: qualified table names, declared schemas, TEMP
//! visibility. Persistent entries round-trip through a reserved host
//! table so file-backed stores reopen with their schemas intact.

use indexmap::IndexMap;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use skiffql_common::{Error, Result};
use skiffql_core::DataType;
use skiffql_functions::from_host_error;

pub const CATALOG_TABLE: &str = "skiff_catalog";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub not_null: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDef {
    /// Qualified path segments, e.g. ["project", "dataset", "table"].
    pub path: Vec<String>,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
    pub temp: bool,
}

impl TableDef {
    /// The flat host-store name: path segments joined with dots, quoted
    /// as one identifier.
    pub fn internal_name(&self) -> String {
        self.path.join(".")
    }

    pub fn table_name(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or_default()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// True until a declared type is known for every column (CREATE
    /// TABLE AS SELECT leaves types open).
    pub fn has_unknown_columns(&self) -> bool {
        self.columns.is_empty()
            || self
                .columns
                .iter()
                .any(|c| c.data_type == DataType::Unknown)
    }
}

/// Session view of the catalog: persistent entries shared through the
/// store, TEMP entries private to the session and shadowing persistent
/// names on read.
#[derive(Default)]
pub struct Catalog {
    tables: IndexMap<String, TableDef>,
    temp_tables: IndexMap<String, TableDef>,
}

impl Catalog {
    pub fn load(conn: &Connection) -> Result<Catalog> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (name TEXT PRIMARY KEY, def TEXT NOT NULL)",
            CATALOG_TABLE
        ))
        .map_err(from_host_error)?;
        let mut catalog = Catalog::default();
        let mut stmt = conn
            .prepare(&format!("SELECT name, def FROM \"{}\"", CATALOG_TABLE))
            .map_err(from_host_error)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(from_host_error)?;
        for row in rows {
            let (name, def) = row.map_err(from_host_error)?;
            let def: TableDef = serde_json::from_str(&def)
                .map_err(|e| Error::internal(format!("corrupt catalog entry {}: {}", name, e)))?;
            catalog.tables.insert(name, def);
        }
        Ok(catalog)
    }

    pub fn persist(&self, conn: &Connection, def: &TableDef) -> Result<()> {
        let body = serde_json::to_string(def)
            .map_err(|e| Error::internal(format!("catalog serialization: {}", e)))?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO \"{}\" (name, def) VALUES (?1, ?2)",
                CATALOG_TABLE
            ),
            rusqlite::params![def.internal_name(), body],
        )
        .map_err(from_host_error)?;
        Ok(())
    }

    pub fn forget(&self, conn: &Connection, name: &str) -> Result<()> {
        conn.execute(
            &format!("DELETE FROM \"{}\" WHERE name = ?1", CATALOG_TABLE),
            rusqlite::params![name],
        )
        .map_err(from_host_error)?;
        Ok(())
    }

    pub fn insert(&mut self, def: TableDef) {
        if def.temp {
            self.temp_tables.insert(def.internal_name(), def);
        } else {
            self.tables.insert(def.internal_name(), def);
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<TableDef> {
        // reads resolve TEMP first, so does removal
        self.temp_tables
            .shift_remove(name)
            .or_else(|| self.tables.shift_remove(name))
    }

    pub fn temp_exists(&self, name: &str) -> bool {
        self.temp_tables.contains_key(name)
    }

    pub fn persistent_exists(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Resolves a qualified reference: TEMP names shadow persistent
    /// ones; a unique suffix match covers references that omit leading
    /// path segments.
    pub fn resolve(&self, path: &[String]) -> Option<&TableDef> {
        let flat = path.join(".");
        if let Some(def) = self.temp_tables.get(&flat) {
            return Some(def);
        }
        if let Some(def) = self.tables.get(&flat) {
            return Some(def);
        }
        let suffix_matches: Vec<&TableDef> = self
            .tables
            .values()
            .filter(|def| {
                def.path.len() > path.len()
                    && def.path[def.path.len() - path.len()..]
                        .iter()
                        .zip(path)
                        .all(|(a, b)| a == b)
            })
            .collect();
        match suffix_matches.as_slice() {
            [single] => Some(single),
            _ => None,
        }
    }

    pub fn require(&self, path: &[String]) -> Result<&TableDef> {
        self.resolve(path)
            .ok_or_else(|| Error::catalog_missing(path.join(".")))
    }

    /// Wildcard expansion: every persistent entry in `dataset` whose
    /// unqualified name begins with `prefix`, in descending name order
    /// (the order the reference outputs pin).
    pub fn wildcard_matches(&self, dataset: &[String], prefix: &str) -> Vec<&TableDef> {
        let mut matches: Vec<&TableDef> = self
            .tables
            .values()
            .filter(|def| {
                if def.path.len() < dataset.len() + 1 {
                    return false;
                }
                let (head, tail) = def.path.split_at(def.path.len() - 1);
                let dataset_matches = head.len() >= dataset.len()
                    && head[head.len() - dataset.len()..]
                        .iter()
                        .zip(dataset)
                        .all(|(a, b)| a == b);
                dataset_matches && tail[0].starts_with(prefix)
            })
            .collect();
        matches.sort_by(|a, b| b.table_name().cmp(a.table_name()));
        matches
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(path: &[&str], temp: bool) -> TableDef {
        TableDef {
            path: path.iter().map(|s| s.to_string()).collect(),
            columns: vec![],
            primary_key: vec![],
            temp,
        }
    }

    #[test]
    fn temp_shadows_persistent_on_read() {
        let mut catalog = Catalog::default();
        catalog.insert(def(&["t"], false));
        catalog.insert(def(&["t"], true));
        let resolved = catalog.resolve(&["t".to_string()]).unwrap();
        assert!(resolved.temp);
    }

    #[test]
    fn suffix_resolution_is_unique_only() {
        let mut catalog = Catalog::default();
        catalog.insert(def(&["p", "d", "events"], false));
        catalog.insert(def(&["p", "d2", "events"], false));
        assert!(catalog.resolve(&["events".to_string()]).is_none());
        assert!(
            catalog
                .resolve(&["d2".to_string(), "events".to_string()])
                .is_some()
        );
    }

    #[test]
    fn wildcard_matches_descending() {
        let mut catalog = Catalog::default();
        for name in ["table_a", "table_b", "table_c", "other_d"] {
            catalog.insert(def(&["project", "dataset", name], false));
        }
        let hits = catalog.wildcard_matches(&["dataset".to_string()], "table_");
        let names: Vec<&str> = hits.iter().map(|d| d.table_name()).collect();
        assert_eq!(names, vec!["table_c", "table_b", "table_a"]);
    }
}
