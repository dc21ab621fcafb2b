//! o2m-sync
//!
//! A schema and data migration engine that moves an Oracle database to a
//! MySQL-compatible target (stock MySQL or TiDB).
//!
//! # Jobs
//!
//! - **reverse**: translate Oracle DDL (tables, columns, constraints,
//!   indexes, partitions, comments, collations) into MySQL/TiDB DDL,
//!   emitting `reverse_<schema>.sql` plus a `compatibility_<schema>.sql`
//!   report for constructs the target cannot represent.
//! - **check**: compare every source table's structure with the target and
//!   emit remediation DDL into `check_<schema>.sql`.
//! - **full**: snapshot-consistent bulk copy, sharded by ROWID ranges and
//!   checkpointed in a persistent metadata store so a crashed run resumes
//!   where it stopped.
//! - **incr**: tail Oracle LogMiner from per-table SCN watermarks, rewrite
//!   the redo SQL to the target dialect and apply it per table in SCN
//!   order, at-least-once.
//!
//! The metadata store (mapping rules, wait/full/increment sync checkpoints
//! and the error log) lives in its own schema on the target database and
//! mediates resumability: a job refuses to start while unresolved error
//! rows exist for its mode.

pub mod check;
pub mod config;
pub mod full_sync;
pub mod incremental_sync;
pub mod mapping;
pub mod meta;
pub mod mysql;
pub mod oracle;
pub mod preflight;
pub mod reverse;
pub mod rules;
pub mod scheduler;
pub mod types;
pub mod version;
pub mod writer;

pub use check::run_check;
pub use config::{AppOpts, CdcOpts, FullOpts, ReverseOpts, SourceOpts, TargetOpts};
pub use full_sync::run_full;
pub use incremental_sync::run_incremental;
pub use meta::MetaStore;
pub use mysql::MysqlClient;
pub use oracle::OracleClient;
pub use reverse::run_reverse;
pub use types::{DbType, RunMode};
