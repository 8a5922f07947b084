//! SQLite star schema: `dim_barrios`, one table per fact kind and the
//! `hedonic_models` registry.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crate::domain::{BarrioId, BusinessKey, DimBarrio, FactKind, FactRecord};
use crate::error::Result;
use crate::metrics;
use crate::pipeline::processing::aggregate::verify_unique_keys;

/// Row of the `hedonic_models` registry
#[derive(Debug, Clone, PartialEq)]
pub struct StoredModel {
    pub model_id: String,
    pub trained_at: DateTime<Utc>,
    pub verdict: String,
    pub n_observations: usize,
    pub adj_r_squared: f64,
    pub passing_diagnostics: usize,
    pub artifact_path: PathBuf,
}

/// Filter for `query_fact`; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct FactQuery {
    pub barrio_id: Option<BarrioId>,
    pub anio_from: Option<i32>,
    pub anio_to: Option<i32>,
    pub source: Option<String>,
}

pub struct StarSchemaStore {
    conn: Connection,
}

impl StarSchemaStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = Self { conn };
        store.ensure_schema()?;
        debug!("Opened star schema at {}", db_path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self { conn: Connection::open_in_memory()? };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS dim_barrios (
                barrio_id      INTEGER PRIMARY KEY,
                nombre         TEXT NOT NULL,
                distrito       TEXT,
                centroide_lat  REAL,
                centroide_lon  REAL
            );
            CREATE TABLE IF NOT EXISTS hedonic_models (
                model_id             TEXT PRIMARY KEY,
                trained_at           TEXT NOT NULL,
                verdict              TEXT NOT NULL,
                n_observations       INTEGER NOT NULL,
                adj_r_squared        REAL NOT NULL,
                passing_diagnostics  INTEGER NOT NULL,
                artifact_path        TEXT NOT NULL
            );
            "#,
        )?;
        for kind in FactKind::ALL {
            self.conn.execute_batch(&fact_table_ddl(kind))?;
        }
        Ok(())
    }

    /// Upsert reference barrios. `dim_barrios` is owned by the bootstrap step;
    /// the pipeline only reads it.
    pub fn seed_barrios(&mut self, barrios: &[DimBarrio]) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO dim_barrios (barrio_id, nombre, distrito, centroide_lat, centroide_lon)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(barrio_id) DO UPDATE SET nombre=excluded.nombre, distrito=excluded.distrito,
                   centroide_lat=excluded.centroide_lat, centroide_lon=excluded.centroide_lon",
            )?;
            for b in barrios {
                stmt.execute(params![b.barrio_id, b.nombre, b.distrito, b.centroide_lat, b.centroide_lon])?;
            }
        }
        tx.commit()?;
        info!("Seeded {} barrios", barrios.len());
        Ok(())
    }

    pub fn load_barrios(&self) -> Result<Vec<DimBarrio>> {
        let mut stmt = self.conn.prepare(
            "SELECT barrio_id, nombre, distrito, centroide_lat, centroide_lon FROM dim_barrios ORDER BY barrio_id",
        )?;
        let barrios = stmt
            .query_map([], |row| {
                Ok(DimBarrio {
                    barrio_id: row.get(0)?,
                    nombre: row.get(1)?,
                    distrito: row.get(2)?,
                    centroide_lat: row.get(3)?,
                    centroide_lon: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(barrios)
    }

    /// Ids in `dim_barrios`, or `None` while the dimension is still empty
    pub fn known_barrio_ids(&self) -> Result<Option<HashSet<BarrioId>>> {
        let mut stmt = self.conn.prepare("SELECT barrio_id FROM dim_barrios")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, BarrioId>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok((!ids.is_empty()).then_some(ids))
    }

    /// Replace a fact table's contents in one transaction. Either every record
    /// is written or the previous version stays in place.
    pub fn replace_fact_table(&mut self, kind: FactKind, records: &[FactRecord]) -> Result<usize> {
        verify_unique_keys(kind, records)?;

        let table = kind.table_name();
        let columns = fact_columns(kind);
        let placeholders = (1..=columns.len()).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(", ");
        let insert = format!("INSERT INTO {} ({}) VALUES ({})", table, columns.join(", "), placeholders);

        let tx = self.conn.transaction()?;
        tx.execute(&format!("DELETE FROM {}", table), [])?;
        {
            let mut stmt = tx.prepare(&insert)?;
            for record in records {
                stmt.execute(params_from_iter(record_values(kind, record)))?;
            }
        }
        tx.commit()?;

        info!("Wrote {} records to {}", records.len(), table);
        metrics::aggregate::table_written(table);
        Ok(records.len())
    }

    pub fn read_fact_table(&self, kind: FactKind) -> Result<Vec<FactRecord>> {
        self.query_fact(kind, &FactQuery::default())
    }

    pub fn query_fact(&self, kind: FactKind, query: &FactQuery) -> Result<Vec<FactRecord>> {
        let mut clauses = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        if let Some(barrio_id) = query.barrio_id {
            values.push(Value::Integer(i64::from(barrio_id)));
            clauses.push(format!("barrio_id = ?{}", values.len()));
        }
        if let Some(from) = query.anio_from {
            values.push(Value::Integer(i64::from(from)));
            clauses.push(format!("anio >= ?{}", values.len()));
        }
        if let Some(to) = query.anio_to {
            values.push(Value::Integer(i64::from(to)));
            clauses.push(format!("anio <= ?{}", values.len()));
        }
        if let Some(source) = &query.source {
            values.push(Value::Text(source.clone()));
            clauses.push(format!("source = ?{}", values.len()));
        }

        let where_clause = if clauses.is_empty() { String::new() } else { format!(" WHERE {}", clauses.join(" AND ")) };
        let order = if kind.has_month() { "barrio_id, anio, mes, source" } else { "barrio_id, anio, source" };
        let sql = format!(
            "SELECT {} FROM {}{} ORDER BY {}",
            fact_columns(kind).join(", "),
            kind.table_name(),
            where_clause,
            order
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(values), |row| record_from_row(kind, row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    pub fn count_fact(&self, kind: FactKind) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", kind.table_name()), [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn record_model(&self, model: &StoredModel) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO hedonic_models
             (model_id, trained_at, verdict, n_observations, adj_r_squared, passing_diagnostics, artifact_path)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                model.model_id,
                model.trained_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                model.verdict,
                model.n_observations as i64,
                model.adj_r_squared,
                model.passing_diagnostics as i64,
                model.artifact_path.to_string_lossy().into_owned(),
            ],
        )?;
        Ok(())
    }

    pub fn latest_accepted_model(&self) -> Result<Option<StoredModel>> {
        let model = self
            .conn
            .query_row(
                "SELECT model_id, trained_at, verdict, n_observations, adj_r_squared, passing_diagnostics, artifact_path
                 FROM hedonic_models WHERE verdict = 'accepted' ORDER BY trained_at DESC LIMIT 1",
                [],
                |row| {
                    let trained_at: String = row.get(1)?;
                    let trained_at = DateTime::parse_from_rfc3339(&trained_at)
                        .map(|dt| dt.with_timezone(&Utc))
                        .map_err(|e| {
                            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
                        })?;
                    Ok(StoredModel {
                        model_id: row.get(0)?,
                        trained_at,
                        verdict: row.get(2)?,
                        n_observations: row.get::<_, i64>(3)? as usize,
                        adj_r_squared: row.get(4)?,
                        passing_diagnostics: row.get::<_, i64>(5)? as usize,
                        artifact_path: PathBuf::from(row.get::<_, String>(6)?),
                    })
                },
            )
            .optional()?;
        Ok(model)
    }
}

fn fact_table_ddl(kind: FactKind) -> String {
    let month = if kind.has_month() { "\n    mes INTEGER CHECK (mes BETWEEN 1 AND 12)," } else { "" };
    let metrics: String = kind.columns().iter().map(|c| format!(",\n    {} REAL", c.name)).collect();
    let key = if kind.has_month() { "barrio_id, anio, IFNULL(mes, 0), source" } else { "barrio_id, anio, source" };
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
    barrio_id INTEGER NOT NULL,
    anio INTEGER NOT NULL,{month}
    source TEXT NOT NULL,
    dataset_id TEXT NOT NULL,
    row_count INTEGER NOT NULL{metrics}
);
CREATE UNIQUE INDEX IF NOT EXISTS ux_{table}_key ON {table} ({key});",
        table = kind.table_name(),
        month = month,
        metrics = metrics,
        key = key
    )
}

fn fact_columns(kind: FactKind) -> Vec<&'static str> {
    let mut columns = vec!["barrio_id", "anio"];
    if kind.has_month() {
        columns.push("mes");
    }
    columns.extend(["source", "dataset_id", "row_count"]);
    columns.extend(kind.columns().iter().map(|c| c.name));
    columns
}

fn record_values(kind: FactKind, record: &FactRecord) -> Vec<Value> {
    let mut values = vec![
        Value::Integer(i64::from(record.key.barrio_id)),
        Value::Integer(i64::from(record.key.anio)),
    ];
    if kind.has_month() {
        values.push(record.key.mes.map_or(Value::Null, |m| Value::Integer(i64::from(m))));
    }
    values.push(Value::Text(record.key.source.clone()));
    values.push(Value::Text(record.dataset_id.clone()));
    values.push(Value::Integer(record.row_count as i64));
    values.extend(record.metrics.iter().map(|m| m.map_or(Value::Null, Value::Real)));
    values
}

fn record_from_row(kind: FactKind, row: &Row<'_>) -> rusqlite::Result<FactRecord> {
    let mut idx = 0;
    let mut next = || {
        idx += 1;
        idx - 1
    };
    let barrio_id: BarrioId = row.get(next())?;
    let anio: i32 = row.get(next())?;
    let mes: Option<u32> = if kind.has_month() { row.get(next())? } else { None };
    let source: String = row.get(next())?;
    let dataset_id: String = row.get(next())?;
    let row_count: i64 = row.get(next())?;
    let metrics = kind
        .columns()
        .iter()
        .map(|_| row.get::<_, Option<f64>>(next()))
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(FactRecord {
        kind,
        key: BusinessKey { barrio_id, anio, mes, source },
        dataset_id,
        row_count: row_count as usize,
        metrics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(kind: FactKind, barrio_id: BarrioId, anio: i32, mes: Option<u32>, source: &str) -> FactRecord {
        FactRecord {
            kind,
            key: BusinessKey { barrio_id, anio, mes, source: source.to_string() },
            dataset_id: format!("{}-ds", source),
            row_count: 1,
            metrics: kind.columns().iter().enumerate().map(|(i, _)| (i == 0).then_some(10.0)).collect(),
        }
    }

    fn barrio(id: BarrioId) -> DimBarrio {
        DimBarrio {
            barrio_id: id,
            nombre: format!("Barrio {}", id),
            distrito: None,
            centroide_lat: Some(41.38),
            centroide_lon: Some(2.17),
        }
    }

    #[test]
    fn test_replace_then_read_back() {
        let mut store = StarSchemaStore::open_in_memory().unwrap();
        let records = vec![
            record(FactKind::Precios, 1, 2023, Some(5), "idealista"),
            record(FactKind::Precios, 1, 2023, Some(6), "idealista"),
        ];
        assert_eq!(store.replace_fact_table(FactKind::Precios, &records).unwrap(), 2);

        let read = store.read_fact_table(FactKind::Precios).unwrap();
        assert_eq!(read, records);
    }

    #[test]
    fn test_replace_discards_previous_version() {
        let mut store = StarSchemaStore::open_in_memory().unwrap();
        store
            .replace_fact_table(FactKind::Demografia, &[record(FactKind::Demografia, 1, 2020, None, "ine")])
            .unwrap();
        store
            .replace_fact_table(FactKind::Demografia, &[record(FactKind::Demografia, 2, 2021, None, "ine")])
            .unwrap();

        let read = store.read_fact_table(FactKind::Demografia).unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].key.barrio_id, 2);
    }

    #[test]
    fn test_duplicate_keys_leave_table_untouched() {
        let mut store = StarSchemaStore::open_in_memory().unwrap();
        let original = vec![record(FactKind::Vivienda, 1, 2020, None, "catastro")];
        store.replace_fact_table(FactKind::Vivienda, &original).unwrap();

        let dup = vec![
            record(FactKind::Vivienda, 3, 2021, None, "catastro"),
            record(FactKind::Vivienda, 3, 2021, None, "catastro"),
        ];
        assert!(store.replace_fact_table(FactKind::Vivienda, &dup).is_err());
        assert_eq!(store.read_fact_table(FactKind::Vivienda).unwrap(), original);
    }

    #[test]
    fn test_query_fact_filters() {
        let mut store = StarSchemaStore::open_in_memory().unwrap();
        let records = vec![
            record(FactKind::Turismo, 1, 2021, Some(1), "turismo"),
            record(FactKind::Turismo, 1, 2022, Some(1), "turismo"),
            record(FactKind::Turismo, 2, 2022, Some(1), "turismo"),
        ];
        store.replace_fact_table(FactKind::Turismo, &records).unwrap();

        let query = FactQuery { barrio_id: Some(1), anio_from: Some(2022), ..Default::default() };
        let found = store.query_fact(FactKind::Turismo, &query).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key.anio, 2022);
        assert_eq!(store.count_fact(FactKind::Turismo).unwrap(), 3);
    }

    #[test]
    fn test_known_barrios_and_file_store() {
        let dir = tempdir().unwrap();
        let mut store = StarSchemaStore::open(dir.path().join("processed/barrios.db")).unwrap();
        assert!(store.known_barrio_ids().unwrap().is_none());

        store.seed_barrios(&[barrio(1), barrio(2)]).unwrap();
        let known = store.known_barrio_ids().unwrap().unwrap();
        assert!(known.contains(&1) && known.contains(&2));
        assert_eq!(store.load_barrios().unwrap()[1].nombre, "Barrio 2");
    }

    #[test]
    fn test_latest_accepted_model_ignores_rejected() {
        let store = StarSchemaStore::open_in_memory().unwrap();
        assert!(store.latest_accepted_model().unwrap().is_none());

        let base = StoredModel {
            model_id: "m1".to_string(),
            trained_at: Utc::now() - chrono::Duration::hours(1),
            verdict: "accepted".to_string(),
            n_observations: 120,
            adj_r_squared: 0.8,
            passing_diagnostics: 5,
            artifact_path: PathBuf::from("models/m1.json"),
        };
        store.record_model(&base).unwrap();
        store
            .record_model(&StoredModel {
                model_id: "m2".to_string(),
                trained_at: Utc::now(),
                verdict: "rejected".to_string(),
                ..base.clone()
            })
            .unwrap();

        let latest = store.latest_accepted_model().unwrap().unwrap();
        assert_eq!(latest.model_id, "m1");
    }
}
