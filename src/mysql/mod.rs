//! MySQL/TiDB target access: version probe, structure queries for the
//! checker, DDL execution and the batched full-load apply path.

use anyhow::{anyhow, Context, Result};
use mysql_async::prelude::*;
use mysql_async::{Opts, OptsBuilder, Params, Pool, Row};

use crate::config::TargetOpts;
use crate::scheduler::WorkerPool;
use crate::types::{DbType, SqlValue};

/// Column structure of a target table, as the checker compares it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MysqlColumn {
    pub name: String,
    /// Full column type, e.g. `varchar(64)` or `decimal(20,4)`.
    pub column_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub collation: Option<String>,
    pub comment: String,
}

/// Index structure of a target table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MysqlIndex {
    pub name: String,
    pub unique: bool,
    /// Column names in index order.
    pub columns: Vec<String>,
}

/// Shared handle to the MySQL/TiDB target.
#[derive(Clone)]
pub struct MysqlClient {
    pool: Pool,
    pub db_type: DbType,
}

impl MysqlClient {
    /// Open a pool against the target server. No default schema is selected;
    /// every statement qualifies its objects.
    pub fn connect(opts: &TargetOpts) -> Result<Self> {
        let mysql_opts: Opts = OptsBuilder::default()
            .ip_or_hostname(opts.mysql_host.clone())
            .tcp_port(opts.mysql_port)
            .user(Some(opts.mysql_username.clone()))
            .pass(Some(opts.mysql_password.clone()))
            .into();
        Ok(Self {
            pool: Pool::new(mysql_opts),
            db_type: opts.db_type,
        })
    }

    /// Server version, normalized the way the reverser consumes it: TiDB
    /// versions are taken verbatim, MySQL versions are cut at the first
    /// build suffix (`8.0.30-log` -> `8.0.30`).
    pub async fn db_version(&self) -> Result<String> {
        let mut conn = self.pool.get_conn().await?;
        let version: Option<String> = conn.query_first("SELECT VERSION()").await?;
        let version = version.ok_or_else(|| anyhow!("target returned no VERSION()"))?;
        match self.db_type {
            DbType::Tidb => Ok(version),
            DbType::Mysql => Ok(version
                .split_once('-')
                .map(|(v, _)| v.to_string())
                .unwrap_or(version)),
        }
    }

    pub async fn schema_exists(&self, schema: &str) -> Result<bool> {
        let mut conn = self.pool.get_conn().await?;
        let count: Option<i64> = conn
            .exec_first(
                "SELECT COUNT(1) FROM information_schema.SCHEMATA WHERE UPPER(SCHEMA_NAME) = UPPER(?)",
                (schema,),
            )
            .await?;
        Ok(count.unwrap_or(0) > 0)
    }

    pub async fn list_tables(&self, schema: &str) -> Result<Vec<String>> {
        let mut conn = self.pool.get_conn().await?;
        let tables: Vec<String> = conn
            .exec(
                "SELECT TABLE_NAME FROM information_schema.TABLES \
                 WHERE UPPER(TABLE_SCHEMA) = UPPER(?) AND TABLE_TYPE = 'BASE TABLE' \
                 ORDER BY TABLE_NAME",
                (schema,),
            )
            .await?;
        Ok(tables)
    }

    /// Execute one DDL/DML statement; autocommit makes it its own
    /// transaction.
    pub async fn exec_statement(&self, sql: &str) -> Result<()> {
        let mut conn = self.pool.get_conn().await?;
        conn.query_drop(sql)
            .await
            .with_context(|| format!("target statement failed [{sql}]"))?;
        Ok(())
    }

    /// Column structure for the checker, in ordinal order.
    pub async fn table_columns(&self, schema: &str, table: &str) -> Result<Vec<MysqlColumn>> {
        let mut conn = self.pool.get_conn().await?;
        let rows: Vec<Row> = conn
            .exec(
                "SELECT COLUMN_NAME, COLUMN_TYPE, IS_NULLABLE, COLUMN_DEFAULT, \
                        COLLATION_NAME, COLUMN_COMMENT \
                   FROM information_schema.COLUMNS \
                  WHERE UPPER(TABLE_SCHEMA) = UPPER(?) AND UPPER(TABLE_NAME) = UPPER(?) \
                  ORDER BY ORDINAL_POSITION",
                (schema, table),
            )
            .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.get(0).ok_or_else(|| anyhow!("missing COLUMN_NAME"))?;
            let column_type: String =
                row.get(1).ok_or_else(|| anyhow!("missing COLUMN_TYPE"))?;
            let is_nullable: String =
                row.get(2).ok_or_else(|| anyhow!("missing IS_NULLABLE"))?;
            let default: Option<String> = row.get(3).unwrap_or(None);
            let collation: Option<String> = row.get(4).unwrap_or(None);
            let comment: Option<String> = row.get(5).unwrap_or(None);
            columns.push(MysqlColumn {
                name,
                column_type,
                nullable: is_nullable.eq_ignore_ascii_case("YES"),
                default,
                collation,
                comment: comment.unwrap_or_default(),
            });
        }
        Ok(columns)
    }

    /// Index structure for the checker. The primary key shows up under its
    /// MySQL name `PRIMARY`.
    pub async fn table_indexes(&self, schema: &str, table: &str) -> Result<Vec<MysqlIndex>> {
        let mut conn = self.pool.get_conn().await?;
        let rows: Vec<Row> = conn
            .exec(
                "SELECT INDEX_NAME, NON_UNIQUE, \
                        GROUP_CONCAT(COLUMN_NAME ORDER BY SEQ_IN_INDEX) AS COLUMN_LIST \
                   FROM information_schema.STATISTICS \
                  WHERE UPPER(TABLE_SCHEMA) = UPPER(?) AND UPPER(TABLE_NAME) = UPPER(?) \
                  GROUP BY INDEX_NAME, NON_UNIQUE",
                (schema, table),
            )
            .await?;

        let mut indexes = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.get(0).ok_or_else(|| anyhow!("missing INDEX_NAME"))?;
            let non_unique: i64 = row.get(1).ok_or_else(|| anyhow!("missing NON_UNIQUE"))?;
            let column_list: String =
                row.get(2).ok_or_else(|| anyhow!("missing COLUMN_LIST"))?;
            indexes.push(MysqlIndex {
                name,
                unique: non_unique == 0,
                columns: column_list.split(',').map(|s| s.to_string()).collect(),
            });
        }
        Ok(indexes)
    }

    /// Apply extracted rows with batched multi-row prepared statements.
    ///
    /// Batches of `batch_size` rows run concurrently on `apply_threads`
    /// connections. The statement text is identical for every full batch,
    /// so the per-connection statement cache keeps it prepared.
    pub async fn batch_apply(
        &self,
        schema: &str,
        table: &str,
        columns: &[String],
        rows: Vec<Vec<SqlValue>>,
        batch_size: usize,
        overwrite: bool,
        apply_threads: usize,
    ) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let batch_size = batch_size.max(1);
        let verb = if overwrite { "REPLACE" } else { "INSERT" };
        let column_list = columns
            .iter()
            .map(|c| format!("`{}`", c.to_lowercase()))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholder_row = format!(
            "({})",
            vec!["?"; columns.len()].join(", ")
        );

        let mut pool = WorkerPool::new(apply_threads);
        let mut batch = Vec::with_capacity(batch_size);
        let mut submit = |batch: Vec<Vec<SqlValue>>| {
            let stmt = format!(
                "{verb} INTO `{}`.`{}` ({column_list}) VALUES {}",
                schema.to_lowercase(),
                table.to_lowercase(),
                vec![placeholder_row.as_str(); batch.len()].join(", ")
            );
            let this = self.clone();
            pool.spawn(async move {
                let params: Vec<mysql_async::Value> = batch
                    .into_iter()
                    .flatten()
                    .map(SqlValue::into_mysql_value)
                    .collect();
                let mut conn = this.pool.get_conn().await?;
                conn.exec_drop(stmt.as_str(), Params::Positional(params))
                    .await
                    .context("bulk insert into target failed")?;
                Ok(())
            });
        };

        for row in rows {
            batch.push(row);
            if batch.len() == batch_size {
                submit(std::mem::take(&mut batch));
            }
        }
        if !batch.is_empty() {
            submit(batch);
        }

        pool.wait().await
    }
}
