//! SQL runner over a DSN-selected driver (Postgres, MySQL, SQLite).

use std::sync::Once;

use serde_json::{json, Map, Value};
use sqlx::any::AnyPoolOptions;
use sqlx::{AnyPool, Column, Row};
use tokio_util::sync::CancellationToken;

use crate::capture::Capturers;
use crate::errors::{Error, Result};

static INSTALL_DRIVERS: Once = Once::new();

const DSN_SCHEMES: [&str; 4] = ["postgres://", "postgresql://", "mysql://", "sqlite:"];

pub struct DbRunner {
    key: String,
    dsn: String,
    pool: tokio::sync::OnceCell<AnyPool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DbQuery {
    pub query: String,
}

/// Parse the expanded step payload: `{query}`.
pub fn parse_db_query(expanded: &Value) -> Result<DbQuery> {
    let m = expanded
        .as_object()
        .ok_or_else(|| Error::Build(format!("invalid db query: {expanded}")))?;
    let query = m
        .get("query")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Build(format!("db step needs a query: {expanded}")))?
        .trim()
        .to_string();
    for key in m.keys() {
        if key != "query" {
            return Err(Error::Build(format!("unknown db field: {key}")));
        }
    }
    Ok(DbQuery { query })
}

impl DbRunner {
    pub fn new(key: &str, config: &Value) -> Result<Self> {
        let dsn = config
            .as_str()
            .ok_or_else(|| Error::Build(format!("runner {key}: db config must be a DSN string")))?
            .to_string();
        if !DSN_SCHEMES.iter().any(|s| dsn.starts_with(s)) {
            return Err(Error::Build(format!("runner {key}: not a db DSN: {dsn}")));
        }
        INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);
        Ok(Self {
            key: key.to_string(),
            dsn,
            pool: tokio::sync::OnceCell::new(),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    async fn pool(&self) -> Result<&AnyPool> {
        self.pool
            .get_or_try_init(|| async {
                AnyPoolOptions::new()
                    .max_connections(1)
                    .connect(&self.dsn)
                    .await
                    .map_err(|e| Error::Runner {
                        kind: "db query",
                        message: format!("cannot connect {}: {e}", self.dsn),
                    })
            })
            .await
    }

    pub async fn run(
        &self,
        query: &DbQuery,
        caps: &mut Capturers,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        caps.db_statement(&self.key, &query.query);
        let pool = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Canceled),
            p = self.pool() => p?,
        };

        let res = if returns_rows(&query.query) {
            let rows = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Canceled),
                r = sqlx::query(&query.query).fetch_all(pool) => r.map_err(db_err)?,
            };
            let rows: Vec<Value> = rows.iter().map(row_to_value).collect();
            json!({"query": query.query, "rows": rows})
        } else {
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Canceled),
                r = sqlx::query(&query.query).execute(pool) => r.map_err(db_err)?,
            };
            json!({"query": query.query, "rows_affected": result.rows_affected()})
        };

        caps.db_response(&self.key, &res);
        Ok(res)
    }
}

fn db_err(e: sqlx::Error) -> Error {
    Error::Runner {
        kind: "db query",
        message: e.to_string(),
    }
}

/// Statements whose result set should be fetched rather than executed.
fn returns_rows(query: &str) -> bool {
    let first = query
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_uppercase();
    matches!(
        first.as_str(),
        "SELECT" | "WITH" | "SHOW" | "PRAGMA" | "EXPLAIN" | "DESCRIBE"
    )
}

/// Decode one row into a JSON object, trying the common column types in
/// order. Columns no type matches decode as null.
fn row_to_value(row: &sqlx::any::AnyRow) -> Value {
    let mut obj = Map::new();
    for col in row.columns() {
        let idx = col.ordinal();
        let v = if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            v.map(Value::from).unwrap_or(Value::Null)
        } else if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            v.map(Value::from).unwrap_or(Value::Null)
        } else if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
            v.map(Value::from).unwrap_or(Value::Null)
        } else if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            v.map(Value::from).unwrap_or(Value::Null)
        } else {
            Value::Null
        };
        obj.insert(col.name().to_string(), v);
    }
    Value::Object(obj)
}
