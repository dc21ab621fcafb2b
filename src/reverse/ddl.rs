//! The reverse artifact: one [`TableDef`] per source table, rendered into a
//! reversible statement stream and a compatibility stream.
//!
//! Routing is target-aware: TiDB reports foreign keys and check constraints
//! instead of applying them, MySQL below the check-constraint release
//! reports only the checks, and non-LIST partition schemes are always
//! reported because their translation is undefined.

use serde::Serialize;

use crate::mapping::MappedColumn;
use crate::types::DbType;
use crate::version::{version_ge, MYSQL_CHECK_CONSTRAINT_VERSION};
use crate::writer::render_report;

/// Assembled DDL for one table.
#[derive(Debug, Clone, Serialize)]
pub struct TableDef {
    pub source_schema: String,
    pub source_table: String,
    pub source_table_type: String,
    #[serde(skip)]
    pub source_ddl: String,
    pub target_schema: String,
    pub target_table: String,
    pub target_db_type: DbType,
    pub target_db_version: String,
    /// `CREATE TABLE `schema`.`table``
    pub table_prefix: String,
    /// Rendered column lines.
    pub columns: Vec<String>,
    /// PRIMARY KEY / UNIQUE KEY / KEY lines inside the body.
    pub keys: Vec<String>,
    /// Engine, charset and collation clause.
    pub suffix: String,
    /// `COMMENT='...'` or empty.
    pub comment: String,
    /// `CONSTRAINT ... CHECK (...)` bodies.
    pub check_keys: Vec<String>,
    /// `CONSTRAINT ... FOREIGN KEY ...` bodies.
    pub foreign_keys: Vec<String>,
    /// Statements that never apply cleanly (special indexes, partition
    /// schemes without a mapping, lossy columns).
    pub compatible_ddl: Vec<String>,
    /// `PARTITION p VALUES IN (...)` definitions (LIST only).
    pub partitions: Vec<String>,
    pub partition_keys: String,
    pub partition_type: String,
}

/// Target-routed statement streams of one table.
///
/// Foreign keys ride their own stream so the job can emit every
/// `ALTER ... ADD FOREIGN KEY` after the last `CREATE TABLE`; referencing a
/// table before it exists would fail the script.
#[derive(Debug, Default)]
pub struct StatementStreams {
    /// CREATE TABLE plus check constraints when the target enforces them.
    pub reversible: Vec<String>,
    /// Deferred foreign-key ALTERs (empty on TiDB, where they are reported
    /// instead).
    pub foreign_keys: Vec<String>,
    /// Advisory statements the target cannot apply.
    pub compatibility: Vec<String>,
}

impl TableDef {
    /// Split into the reversible, deferred foreign-key and compatibility
    /// statement streams.
    pub fn statements(&self) -> StatementStreams {
        let mut streams = StatementStreams {
            reversible: vec![self.table_ddl()],
            ..Default::default()
        };

        let alter = |body: &String| {
            format!(
                "ALTER TABLE `{}`.`{}` ADD {body};",
                self.target_schema.to_lowercase(),
                self.target_table.to_lowercase()
            )
        };
        let foreign: Vec<String> = self.foreign_keys.iter().map(alter).collect();
        let checks: Vec<String> = self.check_keys.iter().map(alter).collect();

        match self.target_db_type {
            DbType::Tidb => {
                streams.compatibility.extend(foreign);
                streams.compatibility.extend(checks);
            }
            DbType::Mysql => {
                streams.foreign_keys.extend(foreign);
                if version_ge(&self.target_db_version, MYSQL_CHECK_CONSTRAINT_VERSION) {
                    streams.reversible.extend(checks);
                } else {
                    streams.compatibility.extend(checks);
                }
            }
        }
        streams
            .compatibility
            .extend(self.compatible_ddl.iter().cloned());

        streams
    }

    fn table_ddl(&self) -> String {
        let mut body = self.columns.join(",\n");
        if !self.keys.is_empty() {
            body.push_str(",\n");
            body.push_str(&self.keys.join(",\n"));
        }
        let mut ddl = format!("{} (\n{}\n) {}", self.table_prefix, body, self.suffix);
        if !self.comment.is_empty() {
            ddl.push(' ');
            ddl.push_str(&self.comment);
        }
        if !self.partitions.is_empty() && self.partition_type == "LIST" {
            ddl.push_str(&format!(
                " PARTITION BY LIST COLUMNS({}) ({})",
                self.partition_keys,
                self.partitions.join(", ")
            ));
        }
        ddl.push(';');
        ddl
    }

    /// Comment block for the reversible stream: rendered report plus the
    /// original Oracle DDL.
    pub fn reverse_report(&self) -> String {
        let table = render_report(
            &["#", "ORACLE TABLE TYPE", "ORACLE", "MYSQL", "SUGGEST"],
            &[vec![
                "TABLE".to_string(),
                self.source_table_type.clone(),
                format!("{}.{}", self.source_schema, self.source_table),
                format!(
                    "{}.{}",
                    self.target_schema.to_lowercase(),
                    self.target_table.to_lowercase()
                ),
                "Create Table".to_string(),
            ]],
        );
        format!(" oracle table reverse sql\n{}\nORIGIN DDL:\n{}", table, self.source_ddl)
    }

    /// Comment block for the compatibility stream.
    pub fn compatibility_report(&self) -> String {
        let table = render_report(
            &["#", "ORACLE", "MYSQL", "SUGGEST"],
            &[vec![
                "TABLE".to_string(),
                format!("{}.{}", self.source_schema, self.source_table),
                format!(
                    "{}.{}",
                    self.target_schema.to_lowercase(),
                    self.target_table.to_lowercase()
                ),
                "Create Index Or Constraints".to_string(),
            ]],
        );
        format!(
            " oracle table index or constraint may be incompatible with the target, skipped\n{}",
            table
        )
    }
}

/// Render one column body line.
pub fn render_column(col: &MappedColumn) -> String {
    let mut line = format!("`{}` {}", col.name.to_lowercase(), col.target_type);
    if let Some(collation) = &col.collation {
        line.push_str(&format!(" COLLATE {collation}"));
    }
    if !col.nullable {
        line.push_str(" NOT NULL");
    }
    if let Some(default) = &col.default {
        line.push_str(&format!(" DEFAULT {default}"));
    }
    if let Some(comment) = &col.comment {
        if !comment.is_empty() {
            line.push_str(&format!(" COMMENT '{}'", comment.replace('\'', "''")));
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_def(db_type: DbType, version: &str) -> TableDef {
        TableDef {
            source_schema: "SALES".into(),
            source_table: "ORDERS".into(),
            source_table_type: "HEAP".into(),
            source_ddl: "CREATE TABLE \"SALES\".\"ORDERS\" (...)".into(),
            target_schema: "SALES".into(),
            target_table: "ORDERS".into(),
            target_db_type: db_type,
            target_db_version: version.into(),
            table_prefix: "CREATE TABLE `sales`.`orders`".into(),
            columns: vec!["`id` INT NOT NULL".into(), "`region` VARCHAR(2)".into()],
            keys: vec!["PRIMARY KEY (`id`)".into()],
            suffix: "ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_bin".into(),
            comment: String::new(),
            check_keys: vec!["CONSTRAINT `ck_amount` CHECK (amount > 0)".into()],
            foreign_keys: vec![
                "CONSTRAINT `fk_dept` FOREIGN KEY (`dept_id`) REFERENCES `sales`.`dept` (`id`)"
                    .into(),
            ],
            compatible_ddl: Vec::new(),
            partitions: Vec::new(),
            partition_keys: String::new(),
            partition_type: String::new(),
        }
    }

    #[test]
    fn mysql_with_check_support_keeps_everything_reversible() {
        let streams = base_def(DbType::Mysql, "8.0.30").statements();
        assert_eq!(streams.reversible.len(), 2);
        assert!(streams.reversible[0].starts_with("CREATE TABLE `sales`.`orders` ("));
        assert!(streams.reversible[0].ends_with(";"));
        assert!(streams.reversible[1].contains("CHECK"));
        assert_eq!(streams.foreign_keys.len(), 1);
        assert!(streams.foreign_keys[0].contains("FOREIGN KEY"));
        assert!(streams.compatibility.is_empty());
    }

    #[test]
    fn old_mysql_reports_check_constraints() {
        let streams = base_def(DbType::Mysql, "5.7.44").statements();
        assert!(!streams.reversible.iter().any(|s| s.contains("CHECK")));
        assert!(streams.foreign_keys.iter().any(|s| s.contains("FOREIGN KEY")));
        assert_eq!(streams.compatibility.len(), 1);
        assert!(streams.compatibility[0].contains("CHECK"));
    }

    #[test]
    fn tidb_reports_foreign_and_check_constraints() {
        let streams = base_def(DbType::Tidb, "6.5.0").statements();
        assert_eq!(streams.reversible.len(), 1);
        assert!(streams.reversible[0].starts_with("CREATE TABLE"));
        assert!(streams.foreign_keys.is_empty());
        assert!(streams.compatibility.iter().any(|s| s.contains("FOREIGN KEY")));
        assert!(streams.compatibility.iter().any(|s| s.contains("CHECK")));
        // Every ALTER is fully qualified so the report can be applied later.
        assert!(streams
            .compatibility
            .iter()
            .all(|s| s.starts_with("ALTER TABLE `sales`.`orders` ADD ")));
    }

    #[test]
    fn list_partitions_render_in_the_create_table() {
        let mut def = base_def(DbType::Mysql, "8.0.30");
        def.partition_type = "LIST".into();
        def.partition_keys = "REGION".into();
        def.partitions = vec![
            "PARTITION P_N VALUES IN ('N')".into(),
            "PARTITION P_S VALUES IN ('S')".into(),
        ];
        let streams = def.statements();
        assert!(streams.reversible[0].contains(
            "PARTITION BY LIST COLUMNS(REGION) (PARTITION P_N VALUES IN ('N'), PARTITION P_S VALUES IN ('S'));"
        ));
    }

    #[test]
    fn comment_sits_between_suffix_and_partitions() {
        let mut def = base_def(DbType::Mysql, "8.0.30");
        def.comment = "COMMENT='order headers'".into();
        let streams = def.statements();
        assert!(streams.reversible[0].contains("COLLATE=utf8mb4_bin COMMENT='order headers';"));
    }

    #[test]
    fn column_rendering_order() {
        let col = MappedColumn {
            name: "NAME".into(),
            target_type: "VARCHAR(64)".into(),
            collation: Some("utf8mb4_bin".into()),
            nullable: true,
            default: Some("'N/A'".into()),
            comment: None,
            compatibility: None,
        };
        assert_eq!(
            render_column(&col),
            "`name` VARCHAR(64) COLLATE utf8mb4_bin DEFAULT 'N/A'"
        );

        let col = MappedColumn {
            name: "ID".into(),
            target_type: "INT".into(),
            collation: None,
            nullable: false,
            default: None,
            comment: Some("surrogate key".into()),
            compatibility: None,
        };
        assert_eq!(
            render_column(&col),
            "`id` INT NOT NULL COMMENT 'surrogate key'"
        );
    }
}
