//! Incremental replication: tail LogMiner from per-table SCN watermarks and
//! apply redo in per-table order.
//!
//! Each polling tick starts at the minimum watermark across all tables,
//! mines every archived log covering that range, filters rows per table by
//! SCN, rewrites the redo SQL to the target dialect and applies it through
//! the keyed queue so one table's events stay ordered while tables proceed
//! in parallel. A table's watermark only advances after its event applied,
//! which gives at-least-once delivery; the very first tick after a fresh
//! checkpoint uses `>=` (the bootstrap SCN row itself must be replayed) and
//! every later tick uses `>` to dedupe the boundary row.

use anyhow::{bail, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{CdcOpts, SourceOpts, TargetOpts};
use crate::meta::MetaStore;
use crate::mysql::MysqlClient;
use crate::oracle::OracleClient;
use crate::preflight::{ensure_no_failed_errors, failed_error_log};
use crate::rules::RuleSet;
use crate::scheduler::KeyedQueue;
use crate::types::{LogminerContent, RunMode};

/// Idle delay between polls when no new archive logs showed up.
const POLL_IDLE: Duration = Duration::from_secs(3);

/// Number of ordered-apply consumers.
const APPLY_WORKERS: usize = 8;

pub async fn run_incremental(
    source: &SourceOpts,
    target: &TargetOpts,
    cdc: &CdcOpts,
    oracle: &OracleClient,
    mysql: &MysqlClient,
    meta: &MetaStore,
) -> Result<()> {
    let schema = source.schema_name.to_uppercase();
    tracing::info!(schema = %schema, "incremental replication oracle to mysql start");

    ensure_no_failed_errors(meta, &schema, RunMode::Incr).await?;

    let rules = Arc::new(RuleSet::load(meta, &schema, &target.target_schema_name).await?);
    let timeout = Duration::from_secs(cdc.logminer_query_timeout);

    // Fresh checkpoints replay their boundary SCN once.
    let mut first_tick = true;
    loop {
        let metas = meta.increment_sync_rows(&schema).await?;
        if metas.is_empty() {
            bail!(
                "schema [{schema}] has no rows in [increment_sync_meta]; \
                 run the full load first"
            );
        }
        let watermarks: HashMap<String, u64> = metas
            .iter()
            .map(|m| (m.source_table.to_uppercase(), m.global_scn))
            .collect();
        let tables: Vec<String> = watermarks.keys().cloned().collect();
        let Some(&batch_start) = watermarks.values().min() else {
            continue;
        };

        let logs = oracle.archived_logs_since(batch_start).await?;
        if logs.is_empty() {
            tracing::debug!(schema = %schema, batch_start, "no archived logs to mine, waiting");
            tokio::time::sleep(POLL_IDLE).await;
            continue;
        }

        let failed: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
        for log in &logs {
            let contents = oracle
                .logminer_content(&log.name, batch_start, &schema, &tables, timeout)
                .await?;
            tracing::info!(
                schema = %schema,
                logfile = %log.name,
                logfile_start_scn = log.first_change,
                rows = contents.len(),
                "archived log mined"
            );
            let filtered = filter_redo(contents, &watermarks, first_tick);
            if filtered.values().all(Vec::is_empty) {
                continue;
            }
            apply_batch(
                filtered,
                mysql,
                meta,
                &rules,
                &schema,
                target,
                Arc::clone(&failed),
            )
            .await?;
        }

        first_tick = false;
        let failed = failed.lock().expect("failed-set mutex poisoned");
        if !failed.is_empty() {
            bail!(
                "incremental apply failed for tables {:?}; \
                 see [error_log_detail], resolve and rerun",
                failed
            );
        }
        tokio::time::sleep(POLL_IDLE).await;
    }
}

/// One redo event routed through the ordered queue.
struct RedoEvent {
    table: String,
    content: LogminerContent,
}

/// Apply one mined batch per-table in SCN order. A failing table is marked
/// and its remaining events skipped; other tables keep applying.
async fn apply_batch(
    filtered: HashMap<String, Vec<LogminerContent>>,
    mysql: &MysqlClient,
    meta: &MetaStore,
    rules: &Arc<RuleSet>,
    schema: &str,
    target: &TargetOpts,
    failed: Arc<Mutex<HashSet<String>>>,
) -> Result<()> {
    let mysql = mysql.clone();
    let meta = meta.clone();
    let rules = Arc::clone(rules);
    let schema = schema.to_string();
    let db_type = target.db_type.as_str().to_string();

    let queue = KeyedQueue::new(APPLY_WORKERS, move |event: RedoEvent| {
        let mysql = mysql.clone();
        let meta = meta.clone();
        let rules = Arc::clone(&rules);
        let schema = schema.clone();
        let db_type = db_type.clone();
        let failed = Arc::clone(&failed);
        async move {
            if failed.lock().expect("failed-set mutex poisoned").contains(&event.table) {
                return Ok(());
            }
            let target_table = rules.target_table(&event.table);
            let sql = rewrite_redo_sql(
                &event.content,
                &schema,
                rules.target_schema(),
                &target_table,
            );
            let result = mysql.exec_statement(&sql).await;
            match result {
                Ok(()) => {
                    meta.advance_increment_scn(&schema, &event.table, event.content.scn)
                        .await?;
                    Ok(())
                }
                Err(e) => {
                    // The watermark stays put: the event replays on rerun.
                    tracing::error!(
                        schema = %schema,
                        table = %event.table,
                        scn = event.content.scn,
                        error = %format!("{e:#}"),
                        "incremental apply failed, aborting table"
                    );
                    failed
                        .lock()
                        .expect("failed-set mutex poisoned")
                        .insert(event.table.clone());
                    meta.create_error_log(&failed_error_log(
                        RunMode::Incr,
                        &db_type,
                        &schema,
                        &event.table,
                        serde_json::to_string(&event.content).unwrap_or_default(),
                        &e,
                    ))
                    .await?;
                    Ok(())
                }
            }
        }
    });

    let mut ordered: Vec<(&String, &Vec<LogminerContent>)> = filtered.iter().collect();
    ordered.sort_by_key(|(table, _)| (*table).clone());
    for (table, contents) in ordered {
        for content in contents {
            queue
                .add(
                    table,
                    RedoEvent {
                        table: table.clone(),
                        content: content.clone(),
                    },
                )
                .await?;
        }
    }
    queue.close().await
}

/// Partition mined rows by table and drop everything at or below the
/// table's watermark. `first_tick` keeps the boundary row (`>=`); later
/// ticks drop it (`>`). DDL passes only as `DROP TABLE` / `TRUNCATE TABLE`.
pub fn filter_redo(
    rows: Vec<LogminerContent>,
    watermarks: &HashMap<String, u64>,
    first_tick: bool,
) -> HashMap<String, Vec<LogminerContent>> {
    let mut by_table: HashMap<String, Vec<LogminerContent>> = watermarks
        .keys()
        .map(|t| (t.clone(), Vec::new()))
        .collect();

    for row in rows {
        let table = row.table_name.to_uppercase();
        let Some(&watermark) = watermarks.get(&table) else {
            continue;
        };
        let passes = if first_tick {
            row.scn >= watermark
        } else {
            row.scn > watermark
        };
        if !passes {
            continue;
        }
        if row.operation == "DDL" && ddl_kind(&row.sql_redo).is_none() {
            continue;
        }
        by_table.entry(table).or_default().push(row);
    }
    by_table
}

/// DDL operations that replicate; everything else is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdlKind {
    DropTable,
    TruncateTable,
}

/// Recognize a replicable DDL by its first two whitespace-separated tokens.
pub fn ddl_kind(sql_redo: &str) -> Option<DdlKind> {
    let mut tokens = sql_redo.split_whitespace();
    let first = tokens.next()?.to_uppercase();
    let second = tokens.next()?.to_uppercase();
    match (first.as_str(), second.as_str()) {
        ("DROP", "TABLE") => Some(DdlKind::DropTable),
        ("TRUNCATE", "TABLE") => Some(DdlKind::TruncateTable),
        _ => None,
    }
}

/// Strip the recycle-bin alias from a `DROP TABLE ... AS "BIN$..."` redo.
pub fn strip_recycle_bin_alias(sql_redo: &str) -> String {
    let upper = sql_redo.to_uppercase();
    match upper.find(" AS \"BIN$") {
        Some(pos) => sql_redo[..pos].trim_end().to_string(),
        None => sql_redo.trim_end().to_string(),
    }
}

/// Rewrite one redo row into a target-dialect statement.
///
/// DDL is regenerated from the table name (which also sheds any recycle-bin
/// alias); DML gets its schema qualifier remapped, double-quoted
/// identifiers converted to lower-case backticks and empty-string literals
/// normalized to NULL, preserving Oracle's empty-equals-NULL semantics.
pub fn rewrite_redo_sql(
    content: &LogminerContent,
    source_schema: &str,
    target_schema: &str,
    target_table: &str,
) -> String {
    let qualified = format!(
        "`{}`.`{}`",
        target_schema.to_lowercase(),
        target_table.to_lowercase()
    );
    if content.operation == "DDL" {
        return match ddl_kind(&strip_recycle_bin_alias(&content.sql_redo)) {
            Some(DdlKind::DropTable) => format!("DROP TABLE {qualified}"),
            Some(DdlKind::TruncateTable) | None => format!("TRUNCATE TABLE {qualified}"),
        };
    }

    let requalified = content.sql_redo.replace(
        &format!(
            "\"{}\".\"{}\"",
            source_schema.to_uppercase(),
            content.table_name.to_uppercase()
        ),
        &format!("\"{}\".\"{}\"", target_schema, target_table),
    );
    rewrite_empty_literals(&backtick_identifiers(&requalified))
}

/// Convert double-quoted identifiers to lower-case backticked ones, leaving
/// single-quoted string literals untouched.
fn backtick_identifiers(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                // String literal: copy through, honoring '' escapes.
                out.push('\'');
                while let Some(c) = chars.next() {
                    out.push(c);
                    if c == '\'' {
                        if chars.peek() == Some(&'\'') {
                            out.push(chars.next().expect("peeked"));
                        } else {
                            break;
                        }
                    }
                }
            }
            '"' => {
                let mut identifier = String::new();
                for c in chars.by_ref() {
                    if c == '"' {
                        break;
                    }
                    identifier.push(c);
                }
                out.push('`');
                out.push_str(&identifier.to_lowercase());
                out.push('`');
            }
            _ => out.push(c),
        }
    }
    out
}

/// Replace standalone `''` literals with NULL outside of strings.
fn rewrite_empty_literals(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\'' {
            out.push(c);
            continue;
        }
        // Collect the whole literal, un-escaping nothing.
        let mut literal = String::new();
        let mut closed = false;
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    literal.push('\'');
                    literal.push(chars.next().expect("peeked"));
                } else {
                    closed = true;
                    break;
                }
            } else {
                literal.push(c);
            }
        }
        if closed && literal.is_empty() {
            out.push_str("NULL");
        } else {
            out.push('\'');
            out.push_str(&literal);
            if closed {
                out.push('\'');
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(scn: u64, table: &str, op: &str, sql: &str) -> LogminerContent {
        LogminerContent {
            scn,
            segment_owner: "SALES".into(),
            table_name: table.into(),
            operation: op.into(),
            sql_redo: sql.into(),
        }
    }

    #[test]
    fn first_tick_keeps_boundary_scn_and_later_ticks_drop_it() {
        let watermarks = HashMap::from([("ORDERS".to_string(), 1000u64)]);

        // Tick 1: rows at 1000, 1001, 1002 all apply.
        let rows = vec![
            content(1000, "ORDERS", "INSERT", "insert ..."),
            content(1001, "ORDERS", "INSERT", "insert ..."),
            content(1002, "ORDERS", "UPDATE", "update ..."),
        ];
        let filtered = filter_redo(rows, &watermarks, true);
        let scns: Vec<u64> = filtered["ORDERS"].iter().map(|c| c.scn).collect();
        assert_eq!(scns, vec![1000, 1001, 1002]);

        // Tick 2 from watermark 1002: only 1003 applies.
        let watermarks = HashMap::from([("ORDERS".to_string(), 1002u64)]);
        let rows = vec![
            content(1002, "ORDERS", "UPDATE", "update ..."),
            content(1003, "ORDERS", "DELETE", "delete ..."),
        ];
        let filtered = filter_redo(rows, &watermarks, false);
        let scns: Vec<u64> = filtered["ORDERS"].iter().map(|c| c.scn).collect();
        assert_eq!(scns, vec![1003]);
    }

    #[test]
    fn unconfigured_tables_are_dropped() {
        let watermarks = HashMap::from([("ORDERS".to_string(), 0u64)]);
        let rows = vec![content(10, "AUDIT_LOG", "INSERT", "insert ...")];
        let filtered = filter_redo(rows, &watermarks, true);
        assert!(filtered["ORDERS"].is_empty());
        assert!(!filtered.contains_key("AUDIT_LOG"));
    }

    #[test]
    fn only_drop_and_truncate_ddl_pass_the_filter() {
        let watermarks = HashMap::from([("ORDERS".to_string(), 0u64)]);
        let rows = vec![
            content(1, "ORDERS", "DDL", "truncate table orders"),
            content(2, "ORDERS", "DDL", "alter table orders add c int"),
            content(3, "ORDERS", "DDL", "drop table orders AS \"BIN$abc==$0\""),
        ];
        let filtered = filter_redo(rows, &watermarks, true);
        let scns: Vec<u64> = filtered["ORDERS"].iter().map(|c| c.scn).collect();
        assert_eq!(scns, vec![1, 3]);
    }

    #[test]
    fn ddl_recognition_by_prefix_tokens() {
        assert_eq!(ddl_kind("DROP TABLE orders"), Some(DdlKind::DropTable));
        assert_eq!(
            ddl_kind("truncate   table orders"),
            Some(DdlKind::TruncateTable)
        );
        assert_eq!(ddl_kind("ALTER TABLE orders ADD c INT"), None);
        assert_eq!(ddl_kind("DROP INDEX idx_orders"), None);
        assert_eq!(ddl_kind(""), None);
    }

    #[test]
    fn recycle_bin_alias_is_stripped() {
        assert_eq!(
            strip_recycle_bin_alias("drop table marvin8 AS \"BIN$vVWfliIh6WfgU0EEEKzOvg==$0\""),
            "drop table marvin8"
        );
        assert_eq!(
            strip_recycle_bin_alias("drop table marvin8"),
            "drop table marvin8"
        );
    }

    #[test]
    fn ddl_statements_are_regenerated_for_the_target() {
        let drop = content(5, "ORDERS", "DDL", "drop table ORDERS AS \"BIN$x==$0\"");
        assert_eq!(
            rewrite_redo_sql(&drop, "SALES", "SALES", "ORDERS"),
            "DROP TABLE `sales`.`orders`"
        );
        let truncate = content(6, "ORDERS", "DDL", "truncate table ORDERS");
        assert_eq!(
            rewrite_redo_sql(&truncate, "SALES", "SALES", "ORDERS"),
            "TRUNCATE TABLE `sales`.`orders`"
        );
    }

    #[test]
    fn dml_rewrite_requalifies_and_backticks() {
        let insert = content(
            7,
            "ORDERS",
            "INSERT",
            "insert into \"SALES\".\"ORDERS\"(\"ID\",\"NAME\") values ('1','x')",
        );
        assert_eq!(
            rewrite_redo_sql(&insert, "SALES", "SALES_T", "ORDERS"),
            "insert into `sales_t`.`orders`(`id`,`name`) values ('1','x')"
        );
    }

    #[test]
    fn dml_rewrite_respects_rename_rules_and_empty_strings() {
        let update = content(
            8,
            "ORDERS",
            "UPDATE",
            "update \"SALES\".\"ORDERS\" set \"NAME\" = '' where \"ID\" = '1'",
        );
        assert_eq!(
            rewrite_redo_sql(&update, "SALES", "SALES", "ORDERS_NEW"),
            "update `sales`.`orders_new` set `name` = NULL where `id` = '1'"
        );
    }

    #[test]
    fn string_literals_survive_identifier_conversion() {
        let insert = content(
            9,
            "NOTES",
            "INSERT",
            "insert into \"SALES\".\"NOTES\"(\"BODY\") values ('he said \"hi\" and '' too')",
        );
        let rewritten = rewrite_redo_sql(&insert, "SALES", "SALES", "NOTES");
        assert_eq!(
            rewritten,
            "insert into `sales`.`notes`(`body`) values ('he said \"hi\" and '' too')"
        );
    }

    #[test]
    fn empty_literal_rewrite_handles_escaped_quotes() {
        assert_eq!(rewrite_empty_literals("values ('')"), "values (NULL)");
        assert_eq!(rewrite_empty_literals("values ('a')"), "values ('a')");
        // A string containing exactly one escaped quote is not empty.
        assert_eq!(rewrite_empty_literals("values ('''')"), "values ('''')");
        assert_eq!(
            rewrite_empty_literals("set a = '', b = 'x'"),
            "set a = NULL, b = 'x'"
        );
    }
}
