//! Reverse job: translate the Oracle schema into MySQL/TiDB DDL.
//!
//! Per table the flow is catalog bundle -> rule resolution -> type mapping
//! -> [`TableDef`] assembly -> writer. Tables the target cannot represent
//! faithfully (special indexes, non-LIST partitions, TiDB constraints) land
//! in the compatibility stream. A failing table is recorded in the error
//! log and skipped; the job keeps going and reports totals at the end.

pub mod ddl;
pub mod table;

use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Instant;

use crate::config::{AppOpts, ReverseOpts, SourceOpts, TargetOpts};
use crate::mapping::{mysql_collation_for, MYSQL_CHARACTER_SET};
use crate::meta::MetaStore;
use crate::mysql::MysqlClient;
use crate::oracle::OracleClient;
use crate::preflight::{
    ensure_no_failed_errors, failed_error_log, load_source_env, SourceEnv,
};
use crate::rules::RuleSet;
use crate::scheduler::WorkerPool;
use crate::types::RunMode;
use crate::writer::{render_report, ReverseWriter};

pub use ddl::TableDef;
pub use table::{TableInfo, TableTask};

/// Table-class partition of the schema, used for the compatibility report.
#[derive(Debug, Default)]
struct TableClasses {
    partitioned: Vec<String>,
    temporary: Vec<String>,
    clustered: Vec<String>,
    materialized_views: Vec<String>,
}

pub async fn run_reverse(
    app: &AppOpts,
    source: &SourceOpts,
    target: &TargetOpts,
    reverse: &ReverseOpts,
    oracle: &OracleClient,
    mysql: &MysqlClient,
    meta: &MetaStore,
) -> Result<()> {
    let started = Instant::now();
    let schema = source.schema_name.to_uppercase();
    tracing::info!(schema = %schema, "reverse oracle schema to mysql start");

    ensure_no_failed_errors(meta, &schema, RunMode::Reverse).await?;

    if !oracle.schema_exists(&schema).await? {
        bail!("oracle schema [{schema}] does not exist");
    }
    let all_tables = oracle.list_tables(&schema).await?;
    let selected = source.resolve_tables(&all_tables)?;
    if selected.is_empty() {
        tracing::warn!(schema = %schema, "no table objects selected in the oracle schema");
        return Ok(());
    }

    let env = load_source_env(oracle, &schema).await?;
    let table_types = oracle.table_types(&schema).await?;

    let mut classes = TableClasses::default();
    for table in &selected {
        match table_types.get(table).map(String::as_str) {
            Some("PARTITIONED") => classes.partitioned.push(table.clone()),
            Some("TEMPORARY") => classes.temporary.push(table.clone()),
            Some("CLUSTERED") => classes.clustered.push(table.clone()),
            Some("MATERIALIZED VIEW") => classes.materialized_views.push(table.clone()),
            _ => {}
        }
    }
    // Materialized views cannot be reversed as tables at all.
    let exporters: Vec<String> = selected
        .iter()
        .filter(|t| !classes.materialized_views.contains(t))
        .cloned()
        .collect();

    let mysql_version = mysql.db_version().await?;
    let rules = Arc::new(RuleSet::load(meta, &schema, &target.target_schema_name).await?);

    let direct = reverse.direct_write.then(|| mysql.clone());
    let writer = Arc::new(ReverseWriter::open(
        &std::env::current_dir()?,
        &schema,
        direct,
    )?);

    emit_create_schema(&writer, &schema, rules.target_schema(), &env).await?;
    emit_table_class_report(&writer, &schema, &classes)?;

    // Foreign keys are deferred so every ALTER ADD FOREIGN KEY lands after
    // the last CREATE TABLE; the referenced table must already exist.
    let deferred_fks: Arc<std::sync::Mutex<Vec<String>>> =
        Arc::new(std::sync::Mutex::new(Vec::new()));

    // Fan the tables out; a failing table is logged and skipped.
    let threads = if reverse.reverse_threads > 0 {
        reverse.reverse_threads
    } else {
        app.threads
    };
    let mut pool = WorkerPool::new(threads);
    for table in &exporters {
        let task = TableTask {
            source_schema: schema.clone(),
            source_table: table.clone(),
            target_schema: rules.target_schema().to_string(),
            target_table: rules.target_table(table),
            source_table_type: table_types
                .get(table)
                .cloned()
                .unwrap_or_else(|| "HEAP".to_string()),
            target_db_type: target.db_type,
            target_db_version: mysql_version.clone(),
            table_option: target.table_option.to_uppercase(),
            oracle_collation: env.oracle_collation,
            schema_collation: env.schema_collation.clone(),
            table_collation: env.table_collations.get(table).cloned(),
            nls_comp: env.nls_comp.clone(),
        };
        let oracle = oracle.clone();
        let meta = meta.clone();
        let rules = Arc::clone(&rules);
        let writer = Arc::clone(&writer);
        let deferred_fks = Arc::clone(&deferred_fks);
        let db_type = target.db_type;
        pool.spawn(async move {
            let result = reverse_one_table(&task, &oracle, &rules, &writer, &deferred_fks).await;
            if let Err(e) = result {
                tracing::error!(
                    schema = %task.source_schema,
                    table = %task.source_table,
                    error = %format!("{e:#}"),
                    "reverse table failed, detail recorded in [error_log_detail]"
                );
                meta.create_error_log(&failed_error_log(
                    RunMode::Reverse,
                    db_type.as_str(),
                    &task.source_schema,
                    &task.source_table,
                    serde_json::to_string(&task).unwrap_or_default(),
                    &e,
                ))
                .await?;
            }
            Ok(())
        });
    }
    pool.wait().await?;

    let deferred = std::mem::take(
        &mut *deferred_fks.lock().expect("deferred-fk mutex poisoned"),
    );
    if !deferred.is_empty() {
        writer
            .emit_reversible(" foreign keys, applied after all tables exist", &deferred)
            .await?;
    }

    let failed = meta.counts_error_log_by_schema(&schema, RunMode::Reverse).await?;
    tracing::info!(
        schema = %schema,
        totals = selected.len(),
        reversed = exporters.len(),
        success = exporters.len() as i64 - failed,
        failed,
        cost = ?started.elapsed(),
        reverse_output = %writer.reverse_path.display(),
        compatibility_output = %writer.compatibility_path.display(),
        "reverse oracle schema to mysql finished"
    );
    if failed > 0 {
        bail!(
            "reverse finished with {failed} failed tables; \
             see [error_log_detail], resolve and rerun"
        );
    }
    Ok(())
}

async fn reverse_one_table(
    task: &TableTask,
    oracle: &OracleClient,
    rules: &RuleSet,
    writer: &ReverseWriter,
    deferred_fks: &std::sync::Mutex<Vec<String>>,
) -> Result<()> {
    let info = task.load_info(oracle).await?;
    let def = task.build_def(&info, rules)?;
    let streams = def.statements();

    writer
        .emit_reversible(&def.reverse_report(), &streams.reversible)
        .await?;
    if !streams.compatibility.is_empty() {
        writer.emit_compatibility(&def.compatibility_report(), &streams.compatibility)?;
    }
    if !streams.foreign_keys.is_empty() {
        deferred_fks
            .lock()
            .expect("deferred-fk mutex poisoned")
            .extend(streams.foreign_keys.iter().cloned());
    }
    tracing::info!(
        schema = %task.source_schema,
        table = %task.source_table,
        reversible = streams.reversible.len(),
        foreign_keys = streams.foreign_keys.len(),
        compatibility = streams.compatibility.len(),
        "reverse table structure generated"
    );
    Ok(())
}

/// CREATE DATABASE for the target schema, derived from the schema collation
/// (or the database NLS_COMP on instances without collation support).
async fn emit_create_schema(
    writer: &ReverseWriter,
    source_schema: &str,
    target_schema: &str,
    env: &SourceEnv,
) -> Result<()> {
    let oracle_collation = env
        .schema_collation
        .as_deref()
        .filter(|c| !c.eq_ignore_ascii_case("USING_NLS_COMP"))
        .unwrap_or(&env.nls_comp);
    let collation = mysql_collation_for(oracle_collation)?;

    let report = format!(
        " oracle schema reverse mysql database\n{}",
        render_report(
            &["#", "ORACLE", "MYSQL", "SUGGEST"],
            &[vec![
                "SCHEMA".to_string(),
                source_schema.to_string(),
                target_schema.to_lowercase(),
                "Create Schema".to_string(),
            ]],
        )
    );
    let ddl = format!(
        "CREATE DATABASE IF NOT EXISTS `{}` DEFAULT CHARACTER SET {} COLLATE {};",
        target_schema.to_lowercase(),
        MYSQL_CHARACTER_SET,
        collation
    );
    writer.emit_reversible(&report, &[ddl]).await
}

/// Advisory report listing table classes that convert to plain tables (or
/// are skipped outright) on the target.
fn emit_table_class_report(
    writer: &ReverseWriter,
    schema: &str,
    classes: &TableClasses,
) -> Result<()> {
    let mut rows = Vec::new();
    let mut push = |tables: &[String], kind: &str, suggest: &str| {
        for table in tables {
            rows.push(vec![
                schema.to_string(),
                table.clone(),
                kind.to_string(),
                suggest.to_string(),
            ]);
        }
    };
    push(&classes.partitioned, "Partition", "Manual Process Table");
    push(&classes.temporary, "Temporary", "Manual Process Table");
    push(&classes.clustered, "Clustered", "Manual Process Table");
    push(
        &classes.materialized_views,
        "Materialized View",
        "Skipped, Manual Process",
    );
    if rows.is_empty() {
        return Ok(());
    }
    let report = format!(
        " oracle table classes with degraded or no mysql equivalent\n{}",
        render_report(&["SCHEMA", "TABLE NAME", "ORACLE TABLE TYPE", "SUGGEST"], &rows)
    );
    writer.emit_compatibility(&report, &[])
}
