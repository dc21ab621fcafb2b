//! Persistent metadata store: mapping rules, sync checkpoints and the error
//! log.
//!
//! The store lives in its own schema on the target server and always uses a
//! dedicated pool, never the workload connections. Tables are created on
//! first start, so a fresh target needs no manual setup. All schema / table
//! / mode filter values are folded to upper case before comparison.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use mysql_async::prelude::*;
use mysql_async::{Opts, OptsBuilder, Pool, Row, TxOpts};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::TargetOpts;
use crate::types::RunMode;

/// Full-load progress of one (table, mode).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitSyncMeta {
    pub source_schema: String,
    pub source_table: String,
    pub target_schema: String,
    pub target_table: String,
    pub sync_mode: String,
    pub global_scn: u64,
    pub chunk_total: i64,
    pub chunk_complete: i64,
    pub is_partition: bool,
}

/// One planned ROWID chunk of a full load; deleted once applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullSyncMeta {
    pub source_schema: String,
    pub source_table: String,
    pub rowid_sql: String,
    pub source_sql: String,
    pub global_scn: u64,
    pub worker_id: i64,
}

/// Per-table SCN watermark driving incremental replication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncrementSyncMeta {
    pub source_schema: String,
    pub source_table: String,
    pub global_scn: u64,
    pub is_partition: bool,
}

/// Append-only diagnostic record; `Failed` rows gate job re-runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorLog {
    pub db_type_s: String,
    pub db_type_t: String,
    pub schema_name: String,
    pub table_name: String,
    pub run_mode: String,
    pub run_status: String,
    pub info_detail: String,
    pub error_detail: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Per-column override rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnRule {
    pub source_schema: String,
    pub source_table: String,
    pub source_column: String,
    pub target_column: Option<String>,
    pub target_type: Option<String>,
    pub target_default: Option<String>,
}

const TABLE_DDLS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS `{meta}`.`schema_rule_map` ( \
       id BIGINT AUTO_INCREMENT PRIMARY KEY, \
       source_schema VARCHAR(64) NOT NULL, \
       target_schema VARCHAR(64) NOT NULL, \
       UNIQUE KEY uk_source_schema (source_schema))",
    "CREATE TABLE IF NOT EXISTS `{meta}`.`table_rule_map` ( \
       id BIGINT AUTO_INCREMENT PRIMARY KEY, \
       source_schema VARCHAR(64) NOT NULL, \
       source_table VARCHAR(128) NOT NULL, \
       target_table VARCHAR(128) NOT NULL, \
       UNIQUE KEY uk_source_table (source_schema, source_table))",
    "CREATE TABLE IF NOT EXISTS `{meta}`.`column_rule_map` ( \
       id BIGINT AUTO_INCREMENT PRIMARY KEY, \
       source_schema VARCHAR(64) NOT NULL, \
       source_table VARCHAR(128) NOT NULL, \
       source_column VARCHAR(128) NOT NULL, \
       target_column VARCHAR(128), \
       target_type VARCHAR(256), \
       target_default VARCHAR(256), \
       UNIQUE KEY uk_source_column (source_schema, source_table, source_column))",
    "CREATE TABLE IF NOT EXISTS `{meta}`.`wait_sync_meta` ( \
       id BIGINT AUTO_INCREMENT PRIMARY KEY, \
       source_schema VARCHAR(64) NOT NULL, \
       source_table VARCHAR(128) NOT NULL, \
       target_schema VARCHAR(64) NOT NULL, \
       target_table VARCHAR(128) NOT NULL, \
       sync_mode VARCHAR(16) NOT NULL, \
       global_scn BIGINT UNSIGNED NOT NULL DEFAULT 0, \
       chunk_total BIGINT NOT NULL DEFAULT 0, \
       chunk_complete BIGINT NOT NULL DEFAULT 0, \
       is_partition CHAR(1) NOT NULL DEFAULT 'N', \
       UNIQUE KEY uk_table_mode (source_schema, source_table, sync_mode))",
    "CREATE TABLE IF NOT EXISTS `{meta}`.`full_sync_meta` ( \
       id BIGINT AUTO_INCREMENT PRIMARY KEY, \
       source_schema VARCHAR(64) NOT NULL, \
       source_table VARCHAR(128) NOT NULL, \
       rowid_sql TEXT NOT NULL, \
       source_sql TEXT NOT NULL, \
       global_scn BIGINT UNSIGNED NOT NULL DEFAULT 0, \
       worker_id BIGINT NOT NULL DEFAULT 0, \
       KEY idx_table (source_schema, source_table))",
    "CREATE TABLE IF NOT EXISTS `{meta}`.`increment_sync_meta` ( \
       id BIGINT AUTO_INCREMENT PRIMARY KEY, \
       source_schema VARCHAR(64) NOT NULL, \
       source_table VARCHAR(128) NOT NULL, \
       global_scn BIGINT UNSIGNED NOT NULL DEFAULT 0, \
       is_partition CHAR(1) NOT NULL DEFAULT 'N', \
       UNIQUE KEY uk_table (source_schema, source_table))",
    "CREATE TABLE IF NOT EXISTS `{meta}`.`error_log_detail` ( \
       id BIGINT AUTO_INCREMENT PRIMARY KEY, \
       db_type_s VARCHAR(16) NOT NULL, \
       db_type_t VARCHAR(16) NOT NULL, \
       schema_name VARCHAR(64) NOT NULL, \
       table_name VARCHAR(128) NOT NULL, \
       run_mode VARCHAR(16) NOT NULL, \
       run_status VARCHAR(16) NOT NULL, \
       info_detail TEXT, \
       error_detail TEXT, \
       created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP, \
       KEY idx_schema_mode (schema_name, run_mode, run_status))",
];

/// Handle to the metadata schema.
#[derive(Clone)]
pub struct MetaStore {
    pool: Pool,
    meta_schema: String,
}

impl MetaStore {
    /// Open a dedicated pool and create the metadata schema and tables if
    /// they do not exist yet.
    pub async fn connect(opts: &TargetOpts) -> Result<Self> {
        let mysql_opts: Opts = OptsBuilder::default()
            .ip_or_hostname(opts.mysql_host.clone())
            .tcp_port(opts.mysql_port)
            .user(Some(opts.mysql_username.clone()))
            .pass(Some(opts.mysql_password.clone()))
            .into();
        let store = Self {
            pool: Pool::new(mysql_opts),
            meta_schema: opts.meta_schema.clone(),
        };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.get_conn().await?;
        conn.query_drop(format!(
            "CREATE DATABASE IF NOT EXISTS `{}`",
            self.meta_schema
        ))
        .await
        .context("create metadata schema")?;
        for ddl in TABLE_DDLS {
            conn.query_drop(ddl.replace("{meta}", &self.meta_schema))
                .await
                .context("create metadata table")?;
        }
        Ok(())
    }

    fn table(&self, name: &str) -> String {
        format!("`{}`.`{}`", self.meta_schema, name)
    }

    // ----- error log -------------------------------------------------------

    /// Count of unresolved (`Failed`) error rows for (schema, mode). Every
    /// job refuses to start while this is non-zero.
    pub async fn counts_error_log_by_schema(
        &self,
        schema: &str,
        mode: RunMode,
    ) -> Result<i64> {
        let mut conn = self.pool.get_conn().await?;
        let count: Option<i64> = conn
            .exec_first(
                format!(
                    "SELECT COUNT(1) FROM {} \
                     WHERE schema_name = ? AND run_mode = ? AND run_status = 'Failed'",
                    self.table("error_log_detail")
                ),
                (schema.to_uppercase(), mode.as_str()),
            )
            .await?;
        Ok(count.unwrap_or(0))
    }

    pub async fn create_error_log(&self, log: &ErrorLog) -> Result<()> {
        let mut conn = self.pool.get_conn().await?;
        conn.exec_drop(
            format!(
                "INSERT INTO {} \
                 (db_type_s, db_type_t, schema_name, table_name, run_mode, run_status, \
                  info_detail, error_detail) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                self.table("error_log_detail")
            ),
            (
                &log.db_type_s,
                &log.db_type_t,
                log.schema_name.to_uppercase(),
                log.table_name.to_uppercase(),
                &log.run_mode,
                &log.run_status,
                &log.info_detail,
                &log.error_detail,
            ),
        )
        .await
        .context("insert error_log_detail")?;
        Ok(())
    }

    // ----- mapping rules ---------------------------------------------------

    /// Target schema rename, if a schema rule exists.
    pub async fn schema_rule(&self, source_schema: &str) -> Result<Option<String>> {
        let mut conn = self.pool.get_conn().await?;
        let target: Option<String> = conn
            .exec_first(
                format!(
                    "SELECT target_schema FROM {} WHERE source_schema = ?",
                    self.table("schema_rule_map")
                ),
                (source_schema.to_uppercase(),),
            )
            .await?;
        Ok(target)
    }

    /// Per-table rename rules for a schema: source table -> target table.
    pub async fn table_rules(&self, source_schema: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.pool.get_conn().await?;
        let rows: Vec<(String, String)> = conn
            .exec(
                format!(
                    "SELECT source_table, target_table FROM {} WHERE source_schema = ?",
                    self.table("table_rule_map")
                ),
                (source_schema.to_uppercase(),),
            )
            .await?;
        Ok(rows.into_iter().collect())
    }

    /// All column rules for a schema.
    pub async fn column_rules(&self, source_schema: &str) -> Result<Vec<ColumnRule>> {
        let mut conn = self.pool.get_conn().await?;
        let rows: Vec<Row> = conn
            .exec(
                format!(
                    "SELECT source_schema, source_table, source_column, \
                            target_column, target_type, target_default \
                     FROM {} WHERE source_schema = ?",
                    self.table("column_rule_map")
                ),
                (source_schema.to_uppercase(),),
            )
            .await?;
        let mut rules = Vec::with_capacity(rows.len());
        for row in rows {
            rules.push(ColumnRule {
                source_schema: row.get(0).ok_or_else(|| anyhow!("missing source_schema"))?,
                source_table: row.get(1).ok_or_else(|| anyhow!("missing source_table"))?,
                source_column: row.get(2).ok_or_else(|| anyhow!("missing source_column"))?,
                target_column: row.get(3).unwrap_or(None),
                target_type: row.get(4).unwrap_or(None),
                target_default: row.get(5).unwrap_or(None),
            });
        }
        Ok(rules)
    }

    // ----- full-load checkpoints -------------------------------------------

    /// Plan a table's full load: replace any previous wait/chunk rows for
    /// (table, mode) with a fresh wait row and one row per ROWID chunk, in
    /// one transaction.
    pub async fn init_wait_and_full_sync_meta(
        &self,
        wait: &WaitSyncMeta,
        chunks: &[FullSyncMeta],
    ) -> Result<()> {
        let mut conn = self.pool.get_conn().await?;
        let mut tx = conn.start_transaction(TxOpts::default()).await?;

        let schema = wait.source_schema.to_uppercase();
        let table = wait.source_table.to_uppercase();
        let mode = wait.sync_mode.to_uppercase();

        tx.exec_drop(
            format!(
                "DELETE FROM {} WHERE source_schema = ? AND source_table = ? AND sync_mode = ?",
                self.table("wait_sync_meta")
            ),
            (&schema, &table, &mode),
        )
        .await?;
        tx.exec_drop(
            format!(
                "DELETE FROM {} WHERE source_schema = ? AND source_table = ?",
                self.table("full_sync_meta")
            ),
            (&schema, &table),
        )
        .await?;

        tx.exec_drop(
            format!(
                "INSERT INTO {} (source_schema, source_table, target_schema, target_table, \
                 sync_mode, global_scn, chunk_total, chunk_complete, is_partition) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?)",
                self.table("wait_sync_meta")
            ),
            (
                &schema,
                &table,
                wait.target_schema.to_uppercase(),
                wait.target_table.to_uppercase(),
                &mode,
                wait.global_scn,
                wait.chunk_total,
                if wait.is_partition { "Y" } else { "N" },
            ),
        )
        .await?;

        for chunk in chunks {
            tx.exec_drop(
                format!(
                    "INSERT INTO {} (source_schema, source_table, rowid_sql, source_sql, \
                     global_scn, worker_id) VALUES (?, ?, ?, ?, ?, ?)",
                    self.table("full_sync_meta")
                ),
                (
                    &schema,
                    &table,
                    &chunk.rowid_sql,
                    &chunk.source_sql,
                    chunk.global_scn,
                    chunk.worker_id,
                ),
            )
            .await?;
        }

        tx.commit().await.context("commit full-load plan")?;
        Ok(())
    }

    /// Remaining chunks of a table's full load.
    pub async fn full_sync_chunks(&self, schema: &str, table: &str) -> Result<Vec<FullSyncMeta>> {
        let mut conn = self.pool.get_conn().await?;
        let rows: Vec<Row> = conn
            .exec(
                format!(
                    "SELECT source_schema, source_table, rowid_sql, source_sql, global_scn, worker_id \
                     FROM {} WHERE source_schema = ? AND source_table = ?",
                    self.table("full_sync_meta")
                ),
                (schema.to_uppercase(), table.to_uppercase()),
            )
            .await?;
        let mut chunks = Vec::with_capacity(rows.len());
        for row in rows {
            chunks.push(FullSyncMeta {
                source_schema: row.get(0).ok_or_else(|| anyhow!("missing source_schema"))?,
                source_table: row.get(1).ok_or_else(|| anyhow!("missing source_table"))?,
                rowid_sql: row.get(2).ok_or_else(|| anyhow!("missing rowid_sql"))?,
                source_sql: row.get(3).ok_or_else(|| anyhow!("missing source_sql"))?,
                global_scn: row.get(4).ok_or_else(|| anyhow!("missing global_scn"))?,
                worker_id: row.get(5).ok_or_else(|| anyhow!("missing worker_id"))?,
            });
        }
        Ok(chunks)
    }

    /// Count of unapplied chunks; zero means the table's full load is done.
    pub async fn count_full_sync_chunks(&self, schema: &str, table: &str) -> Result<i64> {
        let mut conn = self.pool.get_conn().await?;
        let count: Option<i64> = conn
            .exec_first(
                format!(
                    "SELECT COUNT(1) FROM {} WHERE source_schema = ? AND source_table = ?",
                    self.table("full_sync_meta")
                ),
                (schema.to_uppercase(), table.to_uppercase()),
            )
            .await?;
        Ok(count.unwrap_or(0))
    }

    /// Mark one chunk applied: delete its row and advance the wait-sync
    /// counter, atomically. A chunk row is only ever removed here, after its
    /// rows reached the target.
    pub async fn clear_full_sync_chunk(
        &self,
        schema: &str,
        table: &str,
        mode: RunMode,
        rowid_sql: &str,
    ) -> Result<()> {
        let mut conn = self.pool.get_conn().await?;
        let mut tx = conn.start_transaction(TxOpts::default()).await?;
        let schema = schema.to_uppercase();
        let table = table.to_uppercase();

        tx.exec_drop(
            format!(
                "DELETE FROM {} WHERE source_schema = ? AND source_table = ? AND rowid_sql = ?",
                self.table("full_sync_meta")
            ),
            (&schema, &table, rowid_sql),
        )
        .await?;
        tx.exec_drop(
            format!(
                "UPDATE {} SET chunk_complete = chunk_complete + 1 \
                 WHERE source_schema = ? AND source_table = ? AND sync_mode = ? \
                   AND chunk_complete < chunk_total",
                self.table("wait_sync_meta")
            ),
            (&schema, &table, mode.as_str()),
        )
        .await?;
        tx.commit().await.context("commit chunk completion")?;
        Ok(())
    }

    /// Wait-sync rows for (schema, mode).
    pub async fn wait_sync_rows(&self, schema: &str, mode: RunMode) -> Result<Vec<WaitSyncMeta>> {
        let mut conn = self.pool.get_conn().await?;
        let rows: Vec<Row> = conn
            .exec(
                format!(
                    "SELECT source_schema, source_table, target_schema, target_table, sync_mode, \
                            global_scn, chunk_total, chunk_complete, is_partition \
                     FROM {} WHERE source_schema = ? AND sync_mode = ?",
                    self.table("wait_sync_meta")
                ),
                (schema.to_uppercase(), mode.as_str()),
            )
            .await?;
        let mut metas = Vec::with_capacity(rows.len());
        for row in rows {
            let is_partition: String = row.get(8).unwrap_or_else(|| "N".to_string());
            metas.push(WaitSyncMeta {
                source_schema: row.get(0).ok_or_else(|| anyhow!("missing source_schema"))?,
                source_table: row.get(1).ok_or_else(|| anyhow!("missing source_table"))?,
                target_schema: row.get(2).ok_or_else(|| anyhow!("missing target_schema"))?,
                target_table: row.get(3).ok_or_else(|| anyhow!("missing target_table"))?,
                sync_mode: row.get(4).ok_or_else(|| anyhow!("missing sync_mode"))?,
                global_scn: row.get(5).ok_or_else(|| anyhow!("missing global_scn"))?,
                chunk_total: row.get(6).ok_or_else(|| anyhow!("missing chunk_total"))?,
                chunk_complete: row.get(7).ok_or_else(|| anyhow!("missing chunk_complete"))?,
                is_partition: is_partition == "Y",
            });
        }
        Ok(metas)
    }

    /// Tables whose full load finished (`chunk_complete == chunk_total`);
    /// these seed incremental replication.
    pub async fn finished_wait_sync_rows(
        &self,
        schema: &str,
        mode: RunMode,
    ) -> Result<Vec<WaitSyncMeta>> {
        Ok(self
            .wait_sync_rows(schema, mode)
            .await?
            .into_iter()
            .filter(|m| m.chunk_total > 0 && m.chunk_complete == m.chunk_total)
            .collect())
    }

    // ----- incremental checkpoints -----------------------------------------

    /// Seed (or refresh, never backwards) the per-table SCN watermark.
    pub async fn init_increment_sync_meta(
        &self,
        schema: &str,
        table: &str,
        is_partition: bool,
        global_scn: u64,
    ) -> Result<()> {
        let mut conn = self.pool.get_conn().await?;
        conn.exec_drop(
            format!(
                "INSERT INTO {} (source_schema, source_table, global_scn, is_partition) \
                 VALUES (?, ?, ?, ?) \
                 ON DUPLICATE KEY UPDATE global_scn = GREATEST(global_scn, VALUES(global_scn))",
                self.table("increment_sync_meta")
            ),
            (
                schema.to_uppercase(),
                table.to_uppercase(),
                global_scn,
                if is_partition { "Y" } else { "N" },
            ),
        )
        .await
        .context("seed increment_sync_meta")?;
        Ok(())
    }

    pub async fn increment_sync_rows(&self, schema: &str) -> Result<Vec<IncrementSyncMeta>> {
        let mut conn = self.pool.get_conn().await?;
        let rows: Vec<Row> = conn
            .exec(
                format!(
                    "SELECT source_schema, source_table, global_scn, is_partition \
                     FROM {} WHERE source_schema = ?",
                    self.table("increment_sync_meta")
                ),
                (schema.to_uppercase(),),
            )
            .await?;
        let mut metas = Vec::with_capacity(rows.len());
        for row in rows {
            let is_partition: String = row.get(3).unwrap_or_else(|| "N".to_string());
            metas.push(IncrementSyncMeta {
                source_schema: row.get(0).ok_or_else(|| anyhow!("missing source_schema"))?,
                source_table: row.get(1).ok_or_else(|| anyhow!("missing source_table"))?,
                global_scn: row.get(2).ok_or_else(|| anyhow!("missing global_scn"))?,
                is_partition: is_partition == "Y",
            });
        }
        Ok(metas)
    }

    /// Advance a table's watermark. The guard keeps the stored SCN
    /// monotonically non-decreasing even under races.
    pub async fn advance_increment_scn(
        &self,
        schema: &str,
        table: &str,
        global_scn: u64,
    ) -> Result<()> {
        let mut conn = self.pool.get_conn().await?;
        conn.exec_drop(
            format!(
                "UPDATE {} SET global_scn = ? \
                 WHERE source_schema = ? AND source_table = ? AND global_scn <= ?",
                self.table("increment_sync_meta")
            ),
            (
                global_scn,
                schema.to_uppercase(),
                table.to_uppercase(),
                global_scn,
            ),
        )
        .await
        .context("advance increment_sync_meta watermark")?;
        Ok(())
    }
}
