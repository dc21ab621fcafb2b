//! Check job: compare the structure of every source table with its target
//! counterpart and emit remediation DDL.
//!
//! The Oracle side goes through the same rule/type mapping as the reverser,
//! so the comparison is between the *translated* structure and what the
//! target actually has. Every delta becomes an idempotent `ALTER TABLE`
//! statement in `check_<schema>.sql`.

use anyhow::{anyhow, bail, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::config::{AppOpts, SourceOpts, TargetOpts};
use crate::mapping::{map_column, CollationEnv, MappedColumn, OracleColumn};
use crate::meta::MetaStore;
use crate::mysql::{MysqlClient, MysqlColumn, MysqlIndex};
use crate::oracle::OracleClient;
use crate::preflight::{ensure_no_failed_errors, failed_error_log, load_source_env};
use crate::reverse::ddl::render_column;
use crate::rules::RuleSet;
use crate::scheduler::WorkerPool;
use crate::types::{CatalogRow, RunMode, SqlValue};
use crate::writer::{render_report, CheckWriter};

/// Expected (translated) structure of one table.
#[derive(Debug, Clone)]
pub struct ExpectedTable {
    pub columns: Vec<MappedColumn>,
    /// (index name or `PRIMARY`, unique, ordered lower-case columns)
    pub indexes: Vec<(String, bool, Vec<String>)>,
}

pub async fn run_check(
    app: &AppOpts,
    source: &SourceOpts,
    target: &TargetOpts,
    oracle: &OracleClient,
    mysql: &MysqlClient,
    meta: &MetaStore,
) -> Result<()> {
    let started = Instant::now();
    let schema = source.schema_name.to_uppercase();
    tracing::info!(
        schema = %schema,
        target_schema = %target.target_schema_name,
        "check oracle and mysql table structure start"
    );

    ensure_no_failed_errors(meta, &schema, RunMode::Check).await?;

    let all_tables = oracle.list_tables(&schema).await?;
    let selected = source.resolve_tables(&all_tables)?;
    if selected.is_empty() {
        tracing::warn!(schema = %schema, "no table objects selected in the oracle schema");
        return Ok(());
    }

    let rules = Arc::new(RuleSet::load(meta, &schema, &target.target_schema_name).await?);

    // Every source table must already exist on the target.
    let target_tables = mysql.list_tables(rules.target_schema()).await?;
    let missing: Vec<String> = selected
        .iter()
        .filter(|t| {
            let mapped = rules.target_table(t);
            !target_tables.iter().any(|m| m.eq_ignore_ascii_case(&mapped))
        })
        .cloned()
        .collect();
    if !missing.is_empty() {
        bail!(
            "oracle tables {missing:?} do not exist in the target schema [{}]; \
             run reverse and create them first",
            rules.target_schema()
        );
    }

    let env = load_source_env(oracle, &schema).await?;
    let writer = Arc::new(CheckWriter::open(&std::env::current_dir()?, &schema)?);

    let mut pool = WorkerPool::new(app.threads);
    for table in &selected {
        let oracle = oracle.clone();
        let mysql = mysql.clone();
        let meta = meta.clone();
        let rules = Arc::clone(&rules);
        let writer = Arc::clone(&writer);
        let env = env.clone();
        let schema = schema.clone();
        let table = table.clone();
        let db_type = target.db_type;
        pool.spawn(async move {
            let result =
                check_one_table(&oracle, &mysql, &rules, &env, &schema, &table, &writer).await;
            if let Err(e) = result {
                tracing::error!(
                    schema = %schema,
                    table = %table,
                    error = %format!("{e:#}"),
                    "check table failed, detail recorded in [error_log_detail]"
                );
                meta.create_error_log(&failed_error_log(
                    RunMode::Check,
                    db_type.as_str(),
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

    let failed = meta.counts_error_log_by_schema(&schema, RunMode::Check).await?;
    tracing::info!(
        schema = %schema,
        totals = selected.len(),
        success = selected.len() as i64 - failed,
        failed,
        cost = ?started.elapsed(),
        output = %writer.path.display(),
        "check oracle and mysql table structure finished"
    );
    if failed > 0 {
        bail!(
            "check finished with {failed} failed tables; \
             see [error_log_detail], resolve and rerun"
        );
    }
    Ok(())
}

async fn check_one_table(
    oracle: &OracleClient,
    mysql: &MysqlClient,
    rules: &RuleSet,
    env: &crate::preflight::SourceEnv,
    schema: &str,
    table: &str,
    writer: &CheckWriter,
) -> Result<()> {
    let expected = load_expected(oracle, rules, env, schema, table).await?;
    let target_schema = rules.target_schema();
    let target_table = rules.target_table(table);
    let actual_columns = mysql.table_columns(target_schema, &target_table).await?;
    let actual_indexes = mysql.table_indexes(target_schema, &target_table).await?;

    let diffs = diff_table(
        target_schema,
        &target_table,
        &expected,
        &actual_columns,
        &actual_indexes,
    );
    if diffs.is_empty() {
        tracing::info!(schema = %schema, table = %table, "table structure matches the target");
        return Ok(());
    }

    let report = format!(
        " oracle and mysql table structure check\n{}",
        render_report(
            &["#", "ORACLE", "MYSQL", "SUGGEST"],
            &[vec![
                "TABLE".to_string(),
                format!("{schema}.{table}"),
                format!(
                    "{}.{}",
                    target_schema.to_lowercase(),
                    target_table.to_lowercase()
                ),
                format!("{} structure deltas, apply below", diffs.len()),
            ]],
        )
    );
    writer.emit(&report, &diffs)?;
    tracing::warn!(schema = %schema, table = %table, deltas = diffs.len(), "table structure differs");
    Ok(())
}

/// Load and translate the Oracle structure of one table.
async fn load_expected(
    oracle: &OracleClient,
    rules: &RuleSet,
    env: &crate::preflight::SourceEnv,
    schema: &str,
    table: &str,
) -> Result<ExpectedTable> {
    let collation_env = CollationEnv {
        oracle_collation: env.oracle_collation,
        schema_collation: env.schema_collation.as_deref(),
        table_collation: env.table_collations.get(table).map(String::as_str),
        nls_comp: &env.nls_comp,
    };

    let mut comments = HashMap::new();
    for row in oracle.column_comment(schema, table).await? {
        if let (Some(name), Some(comment)) = (row.get("COLUMN_NAME"), row.get("COMMENTS")) {
            if let SqlValue::Text(text) = SqlValue::from_catalog(comment) {
                comments.insert(name.clone(), text);
            }
        }
    }

    let mut columns = Vec::new();
    for row in oracle.column_meta(schema, table, env.oracle_collation).await? {
        let mut col = OracleColumn::from_catalog_row(&row)?;
        col.comment = comments.get(&col.name).cloned();
        columns.push(map_column(&col, table, rules, &collation_env)?);
    }
    if columns.is_empty() {
        return Err(anyhow!("oracle table [{schema}.{table}] has no columns"));
    }

    let mut indexes = Vec::new();
    let key_cols = |row: &CatalogRow| -> Vec<String> {
        row.get("COLUMN_LIST")
            .map(|list| {
                list.split(',')
                    .map(|c| rules.target_column(table, c.trim()).to_lowercase())
                    .collect()
            })
            .unwrap_or_default()
    };
    for row in oracle.primary_key(schema, table).await? {
        indexes.push(("PRIMARY".to_string(), true, key_cols(&row)));
    }
    for row in oracle.unique_key(schema, table).await? {
        let name = row.get("CONSTRAINT_NAME").cloned().unwrap_or_default();
        indexes.push((name.to_lowercase(), true, key_cols(&row)));
    }
    for row in oracle.unique_index(schema, table).await? {
        if row.get("INDEX_TYPE").map(String::as_str) == Some("NORMAL") {
            let name = row.get("INDEX_NAME").cloned().unwrap_or_default();
            indexes.push((name.to_lowercase(), true, key_cols(&row)));
        }
    }
    for row in oracle.normal_index(schema, table).await? {
        if row.get("INDEX_TYPE").map(String::as_str) == Some("NORMAL") {
            let name = row.get("INDEX_NAME").cloned().unwrap_or_default();
            indexes.push((name.to_lowercase(), false, key_cols(&row)));
        }
    }

    Ok(ExpectedTable { columns, indexes })
}

/// Produce remediation statements for every structural delta.
pub fn diff_table(
    target_schema: &str,
    target_table: &str,
    expected: &ExpectedTable,
    actual_columns: &[MysqlColumn],
    actual_indexes: &[MysqlIndex],
) -> Vec<String> {
    let mut diffs = Vec::new();
    let qualified = format!(
        "`{}`.`{}`",
        target_schema.to_lowercase(),
        target_table.to_lowercase()
    );

    let actual_by_name: HashMap<String, &MysqlColumn> = actual_columns
        .iter()
        .map(|c| (c.name.to_lowercase(), c))
        .collect();

    for col in &expected.columns {
        let name = col.name.to_lowercase();
        match actual_by_name.get(&name) {
            None => diffs.push(format!(
                "ALTER TABLE {qualified} ADD COLUMN {};",
                render_column(col)
            )),
            Some(actual) => {
                if !column_matches(col, actual) {
                    diffs.push(format!(
                        "ALTER TABLE {qualified} MODIFY COLUMN {};",
                        render_column(col)
                    ));
                }
            }
        }
    }
    let expected_names: Vec<String> = expected
        .columns
        .iter()
        .map(|c| c.name.to_lowercase())
        .collect();
    for actual in actual_columns {
        if !expected_names.contains(&actual.name.to_lowercase()) {
            diffs.push(format!(
                "ALTER TABLE {qualified} DROP COLUMN `{}`;",
                actual.name.to_lowercase()
            ));
        }
    }

    // Index comparison: set equality on (name, ordered columns).
    let actual_keys: HashMap<String, (bool, Vec<String>)> = actual_indexes
        .iter()
        .map(|i| {
            (
                i.name.to_lowercase(),
                (
                    i.unique,
                    i.columns.iter().map(|c| c.to_lowercase()).collect(),
                ),
            )
        })
        .collect();
    for (name, unique, columns) in &expected.indexes {
        let column_list = columns
            .iter()
            .map(|c| format!("`{c}`"))
            .collect::<Vec<_>>()
            .join(",");
        let key = if name == "PRIMARY" {
            "primary".to_string()
        } else {
            name.clone()
        };
        match actual_keys.get(&key) {
            Some((actual_unique, actual_cols))
                if actual_unique == unique && actual_cols == columns => {}
            Some(_) | None => {
                if name == "PRIMARY" {
                    if actual_keys.contains_key("primary") {
                        diffs.push(format!("ALTER TABLE {qualified} DROP PRIMARY KEY;"));
                    }
                    diffs.push(format!(
                        "ALTER TABLE {qualified} ADD PRIMARY KEY ({column_list});"
                    ));
                } else {
                    if actual_keys.contains_key(&key) {
                        diffs.push(format!("ALTER TABLE {qualified} DROP INDEX `{key}`;"));
                    }
                    let kind = if *unique { "UNIQUE KEY" } else { "KEY" };
                    diffs.push(format!(
                        "ALTER TABLE {qualified} ADD {kind} `{key}` ({column_list});"
                    ));
                }
            }
        }
    }

    diffs
}

fn column_matches(expected: &MappedColumn, actual: &MysqlColumn) -> bool {
    normalize_type(&expected.target_type) == normalize_type(&actual.column_type)
        && expected.nullable == actual.nullable
        && normalize_default(expected.default.as_deref())
            == normalize_default(actual.default.as_deref())
        && match (&expected.collation, &actual.collation) {
            (Some(e), Some(a)) => e.eq_ignore_ascii_case(a),
            // Non-character columns carry no collation on either side.
            (None, _) => true,
            (Some(_), None) => false,
        }
        && expected.comment.clone().unwrap_or_default() == actual.comment
}

/// Normalize a type string for comparison: lower case, no spaces and no
/// legacy integer display widths (`int(11)` == `int`).
fn normalize_type(type_str: &str) -> String {
    let lower = type_str.to_lowercase().replace(' ', "");
    for int_type in ["tinyint", "smallint", "mediumint", "bigint", "int"] {
        if let Some(rest) = lower.strip_prefix(int_type) {
            if rest.is_empty() {
                return int_type.to_string();
            }
            if rest.starts_with('(') && rest.ends_with(')') {
                return int_type.to_string();
            }
        }
    }
    lower
}

/// Normalize a default for comparison: information_schema reports string
/// literals without their quotes.
fn normalize_default(default: Option<&str>) -> Option<String> {
    let d = default?.trim();
    if d.is_empty() {
        return None;
    }
    let unquoted = d
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .unwrap_or(d);
    Some(unquoted.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expected_col(name: &str, target_type: &str, nullable: bool) -> MappedColumn {
        MappedColumn {
            name: name.to_string(),
            target_type: target_type.to_string(),
            collation: None,
            nullable,
            default: None,
            comment: None,
            compatibility: None,
        }
    }

    fn actual_col(name: &str, column_type: &str, nullable: bool) -> MysqlColumn {
        MysqlColumn {
            name: name.to_string(),
            column_type: column_type.to_string(),
            nullable,
            default: None,
            collation: None,
            comment: String::new(),
        }
    }

    #[test]
    fn identical_structures_produce_no_diffs() {
        let expected = ExpectedTable {
            columns: vec![expected_col("ID", "INT", false)],
            indexes: vec![("PRIMARY".into(), true, vec!["id".into()])],
        };
        let actual = vec![actual_col("id", "int", false)];
        let indexes = vec![MysqlIndex {
            name: "PRIMARY".into(),
            unique: true,
            columns: vec!["id".into()],
        }];
        assert!(diff_table("S", "T", &expected, &actual, &indexes).is_empty());
    }

    #[test]
    fn missing_column_becomes_add_and_extra_becomes_drop() {
        let expected = ExpectedTable {
            columns: vec![
                expected_col("ID", "INT", false),
                expected_col("NAME", "VARCHAR(64)", true),
            ],
            indexes: vec![],
        };
        let actual = vec![actual_col("id", "int", false), actual_col("legacy", "int", true)];
        let diffs = diff_table("S", "T", &expected, &actual, &[]);
        assert_eq!(diffs.len(), 2);
        assert!(diffs[0].contains("ADD COLUMN `name` VARCHAR(64)"));
        assert!(diffs[1].contains("DROP COLUMN `legacy`"));
    }

    #[test]
    fn type_mismatch_becomes_modify() {
        let expected = ExpectedTable {
            columns: vec![expected_col("BAL", "DECIMAL(20,4)", true)],
            indexes: vec![],
        };
        let actual = vec![actual_col("bal", "decimal(10,2)", true)];
        let diffs = diff_table("S", "T", &expected, &actual, &[]);
        assert_eq!(diffs, vec![
            "ALTER TABLE `s`.`t` MODIFY COLUMN `bal` DECIMAL(20,4);".to_string()
        ]);
    }

    #[test]
    fn integer_display_width_is_not_a_delta() {
        let expected = ExpectedTable {
            columns: vec![expected_col("ID", "INT", false)],
            indexes: vec![],
        };
        let actual = vec![actual_col("id", "int(11)", false)];
        assert!(diff_table("S", "T", &expected, &actual, &[]).is_empty());
    }

    #[test]
    fn index_column_order_matters() {
        let expected = ExpectedTable {
            columns: vec![expected_col("A", "INT", true), expected_col("B", "INT", true)],
            indexes: vec![("idx_ab".into(), false, vec!["a".into(), "b".into()])],
        };
        let actual = vec![actual_col("a", "int", true), actual_col("b", "int", true)];
        let indexes = vec![MysqlIndex {
            name: "idx_ab".into(),
            unique: false,
            columns: vec!["b".into(), "a".into()],
        }];
        let diffs = diff_table("S", "T", &expected, &actual, &indexes);
        assert_eq!(diffs.len(), 2);
        assert!(diffs[0].contains("DROP INDEX `idx_ab`"));
        assert!(diffs[1].contains("ADD KEY `idx_ab` (`a`,`b`)"));
    }

    #[test]
    fn default_quoting_is_normalized() {
        let mut col = expected_col("NAME", "VARCHAR(64)", true);
        col.default = Some("'N/A'".into());
        let expected = ExpectedTable {
            columns: vec![col],
            indexes: vec![],
        };
        let mut actual = actual_col("name", "varchar(64)", true);
        actual.default = Some("N/A".into());
        assert!(diff_table("S", "T", &expected, &vec![actual], &[]).is_empty());
    }
}
