use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::types::Value;
use rusqlite::{Row, Transaction, params, params_from_iter};

use crate::error::StoreError;
use crate::models::{Field, FoodRecord, Mutation, normalize_date, price_per_unit};
use crate::pool::{self, Pool, casefold};

const RECORD_COLUMNS: &str = "id, food, location, price, dt, count, unit, deleted";

/// The grocery purchase store. Cheap to clone; clones share one pool.
#[derive(Clone)]
pub struct Database {
    pool: Pool,
}

impl Database {
    pub fn open(path: &Path, pool_size: usize) -> Result<Self> {
        let pool = pool::open(path, pool_size)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { pool };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let pool = pool::open_in_memory(2)?;
        let db = Database { pool };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.pool.get()?;
        let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS foods (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    food TEXT NOT NULL,
                    location TEXT NOT NULL,
                    price REAL NOT NULL CHECK (typeof(price) IN ('real', 'integer')),
                    dt TEXT NOT NULL DEFAULT (date('now', 'localtime'))
                        CHECK (dt IS date(dt)),
                    count REAL CHECK (count IS NULL OR typeof(count) IN ('real', 'integer')),
                    unit TEXT,
                    deleted INTEGER NOT NULL DEFAULT 0 CHECK (deleted IN (0, 1))
                );

                CREATE INDEX IF NOT EXISTS idx_foods_live ON foods(deleted, dt);

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    fn record_from_row(row: &Row) -> rusqlite::Result<FoodRecord> {
        let price: f64 = row.get(3)?;
        let count: Option<f64> = row.get(5)?;
        let unit: Option<String> = row.get(6)?;
        Ok(FoodRecord {
            id: row.get(0)?,
            food: row.get(1)?,
            location: row.get(2)?,
            price,
            dt: row.get(4)?,
            count,
            price_per_unit: price_per_unit(price, count, unit.as_deref()),
            unit,
            deleted: row.get(7)?,
        })
    }

    // --- Reads ---

    /// Live records whose `food` contains every term, ignoring case.
    /// No terms means every live record.
    pub fn search<S: AsRef<str>>(&self, terms: &[S]) -> Result<Vec<FoodRecord>, StoreError> {
        let patterns: Vec<String> = terms
            .iter()
            .map(|t| t.as_ref().trim())
            .filter(|t| !t.is_empty())
            .map(|t| like_pattern(&casefold(t)))
            .collect();

        let mut sql = format!("SELECT {RECORD_COLUMNS} FROM foods WHERE deleted = 0");
        for i in 1..=patterns.len() {
            let _ = write!(sql, " AND casefold(food) LIKE ?{i} ESCAPE '\\'");
        }
        sql.push_str(" ORDER BY dt DESC, id DESC");

        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let records = {
            let mut stmt = tx.prepare(&sql)?;
            let records = stmt
                .query_map(params_from_iter(patterns.iter()), Self::record_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            records
        };
        tx.commit()?;
        Ok(records)
    }

    /// Fetch one record by id, including soft-deleted ones.
    pub fn get(&self, id: i64) -> Result<Option<FoodRecord>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!("SELECT {RECORD_COLUMNS} FROM foods WHERE id = ?1"))?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::record_from_row(row)?)),
            None => Ok(None),
        }
    }

    // --- Mutations ---

    /// Insert a record from submitted form fields.
    ///
    /// `food`, `location` and `price` are required. `date`, `count` and `unit`
    /// are only written when present and non-empty, so the column defaults
    /// apply otherwise. Fields the table doesn't know are ignored.
    pub fn create(&self, fields: &BTreeMap<String, String>) -> Result<Mutation, StoreError> {
        let mut row: BTreeMap<Field, String> = BTreeMap::new();
        for field in Field::REQUIRED {
            let value = field
                .lookup(fields)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    StoreError::Validation(format!(
                        "missing required field '{}'",
                        field.human_name()
                    ))
                })?;
            row.insert(field, value.to_string());
        }
        for field in Field::OPTIONAL {
            if let Some(value) = field.lookup(fields).map(str::trim).filter(|v| !v.is_empty()) {
                let value = match field {
                    Field::Date => normalize_date(value)?,
                    _ => value.to_string(),
                };
                row.insert(field, value);
            }
        }

        let columns: Vec<&str> = row.keys().map(|f| f.column()).collect();
        let placeholders: Vec<String> = (1..=row.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO foods ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        );

        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let id = match tx.execute(&sql, params_from_iter(row.values())) {
            Ok(_) => tx.last_insert_rowid(),
            Err(e) => return data_failure(e),
        };
        tx.commit()?;

        let echo: BTreeMap<&str, &str> = row
            .iter()
            .map(|(field, value)| (field.column(), value.as_str()))
            .collect();
        let message = serde_json::to_string(&echo).unwrap_or_default();
        Ok(Mutation::ok(message, Some(id), 1))
    }

    /// Set the submitted columns on the live record named by `id`.
    ///
    /// Every key other than `id` must name an editable field. An id that
    /// matches no live record is a successful no-op.
    pub fn update(&self, fields: &BTreeMap<String, String>) -> Result<Mutation, StoreError> {
        let id = crate::models::parse_id(fields)?;

        let mut changes: BTreeMap<Field, Value> = BTreeMap::new();
        for (name, value) in fields {
            if name == "id" {
                continue;
            }
            let field = Field::parse(name)
                .ok_or_else(|| StoreError::Validation(format!("unknown field '{name}'")))?;
            let value = value.trim();
            let value = if value.is_empty() {
                if !field.is_nullable() {
                    return Err(StoreError::Validation(format!(
                        "field '{}' must not be empty",
                        field.human_name()
                    )));
                }
                Value::Null
            } else if field == Field::Date {
                Value::Text(normalize_date(value)?)
            } else {
                Value::Text(value.to_string())
            };
            changes.insert(field, value);
        }
        if changes.is_empty() {
            return Err(StoreError::Validation("no fields to update".to_string()));
        }

        let assignments: Vec<String> = changes
            .keys()
            .enumerate()
            .map(|(i, field)| format!("{} = ?{}", field.column(), i + 1))
            .collect();
        let sql = format!(
            "UPDATE foods SET {} WHERE id = ?{} AND deleted = 0",
            assignments.join(", "),
            changes.len() + 1
        );
        let mut values: Vec<Value> = changes.into_values().collect();
        values.push(Value::Integer(id));

        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let rows = match tx.execute(&sql, params_from_iter(values.iter())) {
            Ok(rows) => rows,
            Err(e) => return data_failure(e),
        };
        tx.commit()?;

        if rows == 0 {
            Ok(Mutation::ok(format!("no record with id {id}"), Some(id), 0))
        } else {
            Ok(Mutation::ok(format!("updated record {id}"), Some(id), rows))
        }
    }

    /// Flag a record as deleted. The row stays in the table.
    pub fn soft_delete(&self, id: i64) -> Result<Mutation, StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let rows = mark_deleted(&tx, id)?;
        tx.commit()?;
        Ok(Mutation::ok(format!("deleted record {id}"), Some(id), rows))
    }

    #[cfg(test)]
    fn raw_count(&self) -> i64 {
        let conn = self.pool.get().unwrap();
        conn.query_row("SELECT COUNT(*) FROM foods", [], |row| row.get(0))
            .unwrap()
    }
}

fn mark_deleted(tx: &Transaction, id: i64) -> Result<usize, StoreError> {
    tx.execute(
        "UPDATE foods SET deleted = 1 WHERE id = ?1 AND deleted = 0",
        params![id],
    )
    .map_err(StoreError::classify)
}

/// Report a statement failure. Data errors become an unsuccessful mutation;
/// the open transaction rolls back when it drops.
fn data_failure(err: rusqlite::Error) -> Result<Mutation, StoreError> {
    match StoreError::classify(err) {
        StoreError::Data(message) => Ok(Mutation::failed(message)),
        other => Err(other),
    }
}

fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}
