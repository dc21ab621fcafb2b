//! Full load: snapshot-consistent bulk copy sharded by ROWID ranges.
//!
//! Planning takes one snapshot SCN, splits every table into ROWID chunks
//! and persists them as `full_sync_meta` rows under a `wait_sync_meta`
//! header. Execution drains the persisted chunks: extract with
//! `AS OF SCN`, apply with batched prepared inserts, then clear the chunk
//! and advance the completion counter in one transaction. A rerun after a
//! crash only sees the chunks that never finished, which makes the whole
//! job idempotent. Tables whose chunks all clear are seeded into
//! `increment_sync_meta` at the snapshot SCN so incremental replication
//! can take over.

use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Instant;

use crate::config::{AppOpts, FullOpts, SourceOpts, TargetOpts};
use crate::meta::{FullSyncMeta, MetaStore, WaitSyncMeta};
use crate::mysql::MysqlClient;
use crate::oracle::OracleClient;
use crate::preflight::{ensure_no_failed_errors, failed_error_log};
use crate::rules::RuleSet;
use crate::scheduler::WorkerPool;
use crate::types::RunMode;

pub async fn run_full(
    app: &AppOpts,
    source: &SourceOpts,
    target: &TargetOpts,
    full: &FullOpts,
    oracle: &OracleClient,
    mysql: &MysqlClient,
    meta: &MetaStore,
) -> Result<()> {
    let started = Instant::now();
    let schema = source.schema_name.to_uppercase();
    tracing::info!(schema = %schema, "full load oracle to mysql start");

    ensure_no_failed_errors(meta, &schema, RunMode::Full).await?;

    if !oracle.schema_exists(&schema).await? {
        bail!("oracle schema [{schema}] does not exist");
    }
    let all_tables = oracle.list_tables(&schema).await?;
    let selected = source.resolve_tables(&all_tables)?;
    if selected.is_empty() {
        tracing::warn!(schema = %schema, "no table objects selected in the oracle schema");
        return Ok(());
    }

    let rules = Arc::new(RuleSet::load(meta, &schema, &target.target_schema_name).await?);
    let table_types = oracle.table_types(&schema).await?;

    // Split the table list into resumable work and fresh tables to plan.
    let existing = meta.wait_sync_rows(&schema, RunMode::Full).await?;
    let mut resume = Vec::new();
    let mut plan = Vec::new();
    for table in &selected {
        match existing.iter().find(|w| w.source_table == *table) {
            Some(w) if w.chunk_total > 0 && w.chunk_complete == w.chunk_total => {
                tracing::info!(schema = %schema, table = %table, "table already fully loaded, skipping");
            }
            Some(_) => resume.push(table.clone()),
            None => plan.push(table.clone()),
        }
    }

    if !plan.is_empty() {
        let global_scn = oracle.current_scn().await?;
        tracing::info!(schema = %schema, global_scn, tables = plan.len(), "planning rowid chunks");
        let mut pool = WorkerPool::new(full.task_threads);
        for (worker_id, table) in plan.iter().enumerate() {
            let oracle = oracle.clone();
            let meta = meta.clone();
            let rules = Arc::clone(&rules);
            let schema = schema.clone();
            let table = table.clone();
            let is_partition = table_types
                .get(&table)
                .map(|t| t == "PARTITIONED")
                .unwrap_or(false);
            let chunk_size = full.chunk_size;
            pool.spawn(async move {
                plan_table(
                    &oracle,
                    &meta,
                    &rules,
                    &schema,
                    &table,
                    is_partition,
                    global_scn,
                    chunk_size,
                    worker_id as i64,
                )
                .await
            });
        }
        pool.wait().await?;
    }

    // Copy phase over everything that still has chunks.
    let pending: Vec<String> = resume.into_iter().chain(plan).collect();
    let mut pool = WorkerPool::new(full.table_threads);
    for table in &pending {
        let oracle = oracle.clone();
        let mysql = mysql.clone();
        let meta = meta.clone();
        let rules = Arc::clone(&rules);
        let schema = schema.clone();
        let table = table.clone();
        let opts = CopyOpts {
            sql_threads: full.sql_threads,
            apply_threads: full.apply_threads,
            insert_batch_size: app.insert_batch_size,
            overwrite: target.overwrite,
            db_type: target.db_type.as_str().to_string(),
        };
        pool.spawn(async move {
            if let Err(e) = copy_table(&oracle, &mysql, &meta, &rules, &schema, &table, &opts).await
            {
                tracing::error!(
                    schema = %schema,
                    table = %table,
                    error = %format!("{e:#}"),
                    "full load table failed, detail recorded in [error_log_detail]"
                );
                meta.create_error_log(&failed_error_log(
                    RunMode::Full,
                    &opts.db_type,
                    &schema,
                    &table,
                    String::new(),
                    &e,
                ))
                .await?;
            }
            Ok(())
        });
    }
    pool.wait().await?;

    // Tables whose chunks all cleared bootstrap incremental replication at
    // the snapshot SCN.
    let finished = meta.finished_wait_sync_rows(&schema, RunMode::Full).await?;
    for wait in &finished {
        meta.init_increment_sync_meta(
            &wait.source_schema,
            &wait.source_table,
            wait.is_partition,
            wait.global_scn,
        )
        .await?;
    }

    let failed = meta.counts_error_log_by_schema(&schema, RunMode::Full).await?;
    tracing::info!(
        schema = %schema,
        totals = selected.len(),
        success = selected.len() as i64 - failed,
        failed,
        increment_ready = finished.len(),
        cost = ?started.elapsed(),
        "full load oracle to mysql finished"
    );
    if failed > 0 {
        bail!(
            "full load finished with {failed} failed tables; \
             see [error_log_detail], resolve and rerun"
        );
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn plan_table(
    oracle: &OracleClient,
    meta: &MetaStore,
    rules: &RuleSet,
    schema: &str,
    table: &str,
    is_partition: bool,
    global_scn: u64,
    chunk_size: u64,
    worker_id: i64,
) -> Result<()> {
    let started = Instant::now();
    let row_count = oracle.table_count(schema, table).await?;
    let (_, projection) = oracle.select_columns_with_shims(schema, table).await?;
    let ranges = oracle.rowid_ranges(schema, table, chunk_size).await?;

    let source_sql = format!(
        "SELECT {projection} FROM \"{schema}\".\"{table}\" AS OF SCN {global_scn} WHERE "
    );
    let chunks: Vec<FullSyncMeta> = ranges
        .iter()
        .map(|r| FullSyncMeta {
            source_schema: schema.to_string(),
            source_table: table.to_string(),
            rowid_sql: format!(
                "ROWID BETWEEN '{}' AND '{}'",
                r.start_rowid, r.end_rowid
            ),
            source_sql: source_sql.clone(),
            global_scn,
            worker_id,
        })
        .collect();

    let wait = WaitSyncMeta {
        source_schema: schema.to_string(),
        source_table: table.to_string(),
        target_schema: rules.target_schema().to_string(),
        target_table: rules.target_table(table),
        sync_mode: RunMode::Full.as_str().to_string(),
        global_scn,
        chunk_total: chunks.len() as i64,
        chunk_complete: 0,
        is_partition,
    };
    meta.init_wait_and_full_sync_meta(&wait, &chunks).await?;

    tracing::info!(
        schema = %schema,
        table = %table,
        rows = row_count,
        chunks = chunks.len(),
        global_scn,
        cost = ?started.elapsed(),
        "table wait_sync_meta and full_sync_meta initialized"
    );
    Ok(())
}

struct CopyOpts {
    sql_threads: usize,
    apply_threads: usize,
    insert_batch_size: usize,
    overwrite: bool,
    db_type: String,
}

/// Drain one table's persisted chunks.
async fn copy_table(
    oracle: &OracleClient,
    mysql: &MysqlClient,
    meta: &MetaStore,
    rules: &RuleSet,
    schema: &str,
    table: &str,
    opts: &CopyOpts,
) -> Result<()> {
    let started = Instant::now();
    let chunks = meta.full_sync_chunks(schema, table).await?;
    if chunks.is_empty() {
        return Ok(());
    }
    let (columns, _) = oracle.select_columns_with_shims(schema, table).await?;
    let columns = Arc::new(columns);
    let target_schema = rules.target_schema().to_string();
    let target_table = rules.target_table(table);

    let mut pool = WorkerPool::new(opts.sql_threads);
    for chunk in chunks {
        let oracle = oracle.clone();
        let mysql = mysql.clone();
        let meta = meta.clone();
        let columns = Arc::clone(&columns);
        let target_schema = target_schema.clone();
        let target_table = target_table.clone();
        let schema = schema.to_string();
        let table = table.to_string();
        let apply_threads = opts.apply_threads;
        let batch_size = opts.insert_batch_size;
        let overwrite = opts.overwrite;
        pool.spawn(async move {
            let query = format!("{}{}", chunk.source_sql, chunk.rowid_sql);
            let rows = oracle.extract_rows(query.clone()).await?;
            if rows.is_empty() {
                tracing::warn!(
                    schema = %schema,
                    table = %table,
                    rowid = %chunk.rowid_sql,
                    "rowid chunk returned no rows, clearing"
                );
            } else {
                mysql
                    .batch_apply(
                        &target_schema,
                        &target_table,
                        &columns,
                        rows,
                        batch_size,
                        overwrite,
                        apply_threads,
                    )
                    .await?;
            }
            // The chunk row disappears only after its rows reached the
            // target; a crash before this point replays the chunk.
            meta.clear_full_sync_chunk(&schema, &table, RunMode::Full, &chunk.rowid_sql)
                .await?;
            Ok(())
        });
    }
    pool.wait().await?;

    let remaining = meta.count_full_sync_chunks(schema, table).await?;
    if remaining > 0 {
        bail!("table [{schema}.{table}] still has {remaining} unapplied chunks");
    }
    tracing::info!(
        schema = %schema,
        table = %table,
        cost = ?started.elapsed(),
        "table full load finished"
    );
    Ok(())
}
