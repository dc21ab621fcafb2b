//! Oracle source access.
//!
//! The [`oracle`] driver is blocking, so connections live in an r2d2 pool
//! and every call runs inside `tokio::task::spawn_blocking`. Callers only
//! see async methods returning catalog row maps or typed values.
//!
//! NULL handling happens exactly once, here: a SQL NULL in any catalog query
//! comes back as the [`crate::types::NULL_SENTINEL`] string, an empty string
//! stays empty. Driver errors are propagated untouched.

pub mod catalog;
pub mod logminer;

use anyhow::{anyhow, Context, Result};
use oracle::Connection;
use r2d2::ManageConnection;
use std::collections::HashMap;

use crate::config::SourceOpts;
use crate::types::{CatalogRow, NULL_SENTINEL};

/// r2d2 connection manager for the blocking oracle driver.
#[derive(Clone)]
pub struct OracleConnectionManager {
    user: String,
    pass: String,
    connect_string: String,
}

impl OracleConnectionManager {
    pub fn new(user: &str, pass: &str, connect_string: &str) -> Self {
        Self {
            user: user.to_string(),
            pass: pass.to_string(),
            connect_string: connect_string.to_string(),
        }
    }
}

// The password must never appear in logs.
impl std::fmt::Debug for OracleConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleConnectionManager")
            .field("user", &self.user)
            .field("pass", &"*****")
            .field("connect_string", &self.connect_string)
            .finish()
    }
}

impl ManageConnection for OracleConnectionManager {
    type Connection = Connection;
    type Error = oracle::Error;

    fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        Connection::connect(&self.user, &self.pass, &self.connect_string)
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.ping()
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Shared handle to the Oracle source database.
#[derive(Clone)]
pub struct OracleClient {
    pool: r2d2::Pool<OracleConnectionManager>,
}

impl OracleClient {
    pub fn connect(opts: &SourceOpts, pool_size: u32) -> Result<Self> {
        let manager = OracleConnectionManager::new(
            &opts.oracle_username,
            &opts.oracle_password,
            &opts.connect_string(),
        );
        let pool = r2d2::Pool::builder()
            .max_size(pool_size.max(2))
            .build(manager)
            .with_context(|| {
                format!("connect oracle [{}]", opts.connect_string())
            })?;
        Ok(Self { pool })
    }

    /// Run a blocking closure against a pooled connection.
    pub async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().context("oracle connection pool exhausted")?;
            f(&conn)
        })
        .await
        .map_err(|e| anyhow!("oracle worker task failed: {e}"))?
    }

    /// General catalog query: every row becomes a `column -> String` map
    /// with NULL folded to the sentinel.
    pub async fn query_rows(&self, sql: String) -> Result<Vec<CatalogRow>> {
        self.with_conn(move |conn| query_rows_blocking(conn, &sql))
            .await
    }

    /// Single-column, single-row query; NULL comes back as `None`.
    pub async fn query_one(&self, sql: String) -> Result<Option<String>> {
        self.with_conn(move |conn| {
            let row = conn
                .query_row(&sql, &[])
                .with_context(|| format!("oracle query [{sql}]"))?;
            let value: Option<String> = row.get(0)?;
            Ok(value)
        })
        .await
    }
}

/// Shared row-map scan used by every catalog query.
pub(crate) fn query_rows_blocking(conn: &Connection, sql: &str) -> Result<Vec<CatalogRow>> {
    let mut stmt = conn
        .statement(sql)
        .build()
        .with_context(|| format!("oracle prepare [{sql}]"))?;
    let rows = stmt
        .query(&[])
        .with_context(|| format!("oracle query [{sql}]"))?;

    let names: Vec<String> = rows
        .column_info()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    let mut out = Vec::new();
    for row in rows {
        let row = row?;
        let mut map = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            let value: Option<String> = row.get(i)?;
            map.insert(
                name.clone(),
                value.unwrap_or_else(|| NULL_SENTINEL.to_string()),
            );
        }
        out.push(map);
    }
    Ok(out)
}
