//! CLI option groups shared by every subcommand.
//!
//! Each group is a `clap::Args` struct flattened into the subcommands that
//! need it, mirroring how connection and batching options are grouped on the
//! command line.

use anyhow::{bail, Result};
use clap::Args;

use crate::types::DbType;

/// Application-wide knobs.
#[derive(Args, Clone, Debug)]
pub struct AppOpts {
    /// Default worker concurrency
    #[arg(long, default_value = "8")]
    pub threads: usize,

    /// Rows per applied batch during full load
    #[arg(long, default_value = "100")]
    pub insert_batch_size: usize,
}

/// Oracle source connection and table selection.
#[derive(Args, Clone, Debug)]
pub struct SourceOpts {
    /// Oracle username
    #[arg(long, env = "ORACLE_USERNAME")]
    pub oracle_username: String,

    /// Oracle password
    #[arg(long, env = "ORACLE_PASSWORD")]
    pub oracle_password: String,

    /// Oracle host
    #[arg(long, default_value = "localhost")]
    pub oracle_host: String,

    /// Oracle listener port
    #[arg(long, default_value = "1521")]
    pub oracle_port: u16,

    /// Oracle service name
    #[arg(long)]
    pub oracle_service_name: String,

    /// Source schema to migrate
    #[arg(long)]
    pub schema_name: String,

    /// Comma-separated table allow list (case-insensitive). Mutually
    /// exclusive with --exclude-tables; empty means every table.
    #[arg(long, value_delimiter = ',')]
    pub include_tables: Vec<String>,

    /// Comma-separated table deny list (case-insensitive)
    #[arg(long, value_delimiter = ',')]
    pub exclude_tables: Vec<String>,
}

impl SourceOpts {
    /// Easy Connect string for the oracle driver.
    pub fn connect_string(&self) -> String {
        format!(
            "//{}:{}/{}",
            self.oracle_host, self.oracle_port, self.oracle_service_name
        )
    }

    /// Resolve the configured allow/deny lists against the tables that
    /// actually exist in the source schema. Include entries that do not
    /// exist are a preflight error.
    pub fn resolve_tables(&self, existing: &[String]) -> Result<Vec<String>> {
        if !self.include_tables.is_empty() && !self.exclude_tables.is_empty() {
            bail!("--include-tables and --exclude-tables are mutually exclusive");
        }

        if !self.include_tables.is_empty() {
            let mut selected = Vec::with_capacity(self.include_tables.len());
            for want in &self.include_tables {
                match existing.iter().find(|t| t.eq_ignore_ascii_case(want)) {
                    Some(t) => selected.push(t.clone()),
                    None => bail!(
                        "include table [{}] does not exist in oracle schema [{}]",
                        want,
                        self.schema_name
                    ),
                }
            }
            return Ok(selected);
        }

        Ok(existing
            .iter()
            .filter(|t| {
                !self
                    .exclude_tables
                    .iter()
                    .any(|x| x.eq_ignore_ascii_case(t))
            })
            .cloned()
            .collect())
    }
}

/// MySQL/TiDB target connection and output policy.
#[derive(Args, Clone, Debug)]
pub struct TargetOpts {
    /// Target username
    #[arg(long, env = "MYSQL_USERNAME")]
    pub mysql_username: String,

    /// Target password
    #[arg(long, env = "MYSQL_PASSWORD")]
    pub mysql_password: String,

    /// Target host
    #[arg(long, default_value = "localhost")]
    pub mysql_host: String,

    /// Target port
    #[arg(long, default_value = "3306")]
    pub mysql_port: u16,

    /// Target flavor
    #[arg(long, value_enum, default_value = "mysql")]
    pub db_type: DbType,

    /// Target schema name
    #[arg(long)]
    pub target_schema_name: String,

    /// Extra options appended to every generated CREATE TABLE
    #[arg(long, default_value = "")]
    pub table_option: String,

    /// Use REPLACE instead of INSERT during full load
    #[arg(long)]
    pub overwrite: bool,

    /// Schema holding the sync metadata tables
    #[arg(long, default_value = "o2m_meta")]
    pub meta_schema: String,
}

/// Full-load parallelism.
#[derive(Args, Clone, Debug)]
pub struct FullOpts {
    /// Tables copied concurrently
    #[arg(long, default_value = "4")]
    pub table_threads: usize,

    /// ROWID chunks extracted concurrently within one table
    #[arg(long, default_value = "4")]
    pub sql_threads: usize,

    /// Concurrent batched INSERTs per chunk
    #[arg(long, default_value = "4")]
    pub apply_threads: usize,

    /// Concurrency of the chunk-planning phase
    #[arg(long, default_value = "4")]
    pub task_threads: usize,

    /// ROWID chunk size in data blocks
    #[arg(long, default_value = "100000")]
    pub chunk_size: u64,
}

/// Incremental replication knobs.
#[derive(Args, Clone, Debug)]
pub struct CdcOpts {
    /// Per-poll LogMiner query timeout in seconds
    #[arg(long, default_value = "300")]
    pub logminer_query_timeout: u64,
}

/// Schema translation knobs.
#[derive(Args, Clone, Debug)]
pub struct ReverseOpts {
    /// Tables reversed concurrently
    #[arg(long, default_value = "8")]
    pub reverse_threads: usize,

    /// Apply reversible DDL directly to the target instead of writing a
    /// script file; the compatibility stream still goes to file
    #[arg(long)]
    pub direct_write: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(include: &[&str], exclude: &[&str]) -> SourceOpts {
        SourceOpts {
            oracle_username: "marvin".into(),
            oracle_password: "secret".into(),
            oracle_host: "localhost".into(),
            oracle_port: 1521,
            oracle_service_name: "orclpdb".into(),
            schema_name: "SALES".into(),
            include_tables: include.iter().map(|s| s.to_string()).collect(),
            exclude_tables: exclude.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn include_and_exclude_are_mutually_exclusive() {
        let opts = source(&["A"], &["B"]);
        assert!(opts.resolve_tables(&["A".into(), "B".into()]).is_err());
    }

    #[test]
    fn include_is_case_insensitive_and_checked() {
        let existing = vec!["ORDERS".to_string(), "ITEMS".to_string()];
        let opts = source(&["orders"], &[]);
        assert_eq!(opts.resolve_tables(&existing).unwrap(), vec!["ORDERS"]);

        let opts = source(&["missing"], &[]);
        assert!(opts.resolve_tables(&existing).is_err());
    }

    #[test]
    fn exclude_filters_case_insensitively() {
        let existing = vec!["ORDERS".to_string(), "ITEMS".to_string()];
        let opts = source(&[], &["items"]);
        assert_eq!(opts.resolve_tables(&existing).unwrap(), vec!["ORDERS"]);
    }

    #[test]
    fn connect_string_shape() {
        let opts = source(&[], &[]);
        assert_eq!(opts.connect_string(), "//localhost:1521/orclpdb");
    }
}
