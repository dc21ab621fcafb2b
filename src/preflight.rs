//! Shared job preflight: the error-log gate, NLS environment validation and
//! the collation version gate.
//!
//! Every top-level job runs these checks before any side effect; a failure
//! here leaves both databases untouched.

use anyhow::{bail, Result};
use std::collections::HashMap;

use crate::mapping::{mysql_charset_for, mysql_collation_for};
use crate::meta::{ErrorLog, MetaStore};
use crate::oracle::OracleClient;
use crate::types::{RunMode, DB_TYPE_ORACLE};
use crate::version::{version_ge, ORACLE_COLLATION_VERSION};

/// Validated Oracle NLS/collation environment shared by reverse and check.
#[derive(Debug, Clone)]
pub struct SourceEnv {
    pub db_version: String,
    pub character_set: String,
    pub nls_sort: String,
    pub nls_comp: String,
    /// Instance supports per-schema/table/column collations.
    pub oracle_collation: bool,
    pub schema_collation: Option<String>,
    pub table_collations: HashMap<String, String>,
}

/// Load and validate the source environment.
///
/// Fails fast when the character set or collation is outside the supported
/// set, or when NLS_SORT and NLS_COMP disagree (MySQL cannot model split
/// sort/comparison semantics).
pub async fn load_source_env(oracle: &OracleClient, schema: &str) -> Result<SourceEnv> {
    let character_set = oracle.db_character_set().await?;
    mysql_charset_for(&character_set)?;

    let nls_sort = oracle.nls_sort().await?;
    let nls_comp = oracle.nls_comp().await?;
    mysql_collation_for(&nls_sort)?;
    mysql_collation_for(&nls_comp)?;
    if !nls_sort.eq_ignore_ascii_case(&nls_comp) {
        bail!(
            "oracle NLS_SORT [{nls_sort}] and NLS_COMP [{nls_comp}] differ; \
             they must be equal because mysql has a single comparison collation"
        );
    }

    let db_version = oracle.db_version().await?;
    let oracle_collation = version_ge(&db_version, ORACLE_COLLATION_VERSION);

    let (schema_collation, table_collations) = if oracle_collation {
        (
            Some(oracle.schema_collation(schema).await?),
            oracle.table_collations(schema).await?,
        )
    } else {
        (None, HashMap::new())
    };

    tracing::info!(
        schema = %schema,
        db_version = %db_version,
        character_set = %character_set,
        nls_comp = %nls_comp,
        oracle_collation,
        "oracle environment validated"
    );

    Ok(SourceEnv {
        db_version,
        character_set,
        nls_sort,
        nls_comp,
        oracle_collation,
        schema_collation,
        table_collations,
    })
}

/// The error gate: a mode refuses to start while unresolved `Failed` rows
/// exist for (schema, mode).
pub async fn ensure_no_failed_errors(
    meta: &MetaStore,
    schema: &str,
    mode: RunMode,
) -> Result<()> {
    let totals = meta.counts_error_log_by_schema(schema, mode).await?;
    if totals > 0 {
        bail!(
            "schema [{schema}] mode [{mode}] has {totals} unresolved rows in \
             [error_log_detail]; resolve and clear them, then rerun"
        );
    }
    Ok(())
}

/// Build a `Failed` error-log row for one table of a job.
pub fn failed_error_log(
    mode: RunMode,
    target_db_type: &str,
    schema: &str,
    table: &str,
    info: String,
    error: &anyhow::Error,
) -> ErrorLog {
    ErrorLog {
        db_type_s: DB_TYPE_ORACLE.to_string(),
        db_type_t: target_db_type.to_string(),
        schema_name: schema.to_string(),
        table_name: table.to_string(),
        run_mode: mode.as_str().to_string(),
        run_status: "Failed".to_string(),
        info_detail: info,
        error_detail: format!("{error:#}"),
        created_at: None,
    }
}
