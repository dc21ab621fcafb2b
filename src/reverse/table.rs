//! Per-table reverse task: loads the catalog bundle and assembles a
//! [`TableDef`] from it.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::collections::HashMap;

use super::ddl::{render_column, TableDef};
use crate::mapping::{
    map_column, resolve_collation, CollationEnv, OracleColumn, MYSQL_CHARACTER_SET,
};
use crate::oracle::OracleClient;
use crate::rules::RuleSet;
use crate::types::{CatalogRow, DbType, SqlValue};

/// Context for reversing one table.
#[derive(Debug, Clone, Serialize)]
pub struct TableTask {
    pub source_schema: String,
    pub source_table: String,
    pub target_schema: String,
    pub target_table: String,
    pub source_table_type: String,
    pub target_db_type: DbType,
    pub target_db_version: String,
    pub table_option: String,
    pub oracle_collation: bool,
    pub schema_collation: Option<String>,
    pub table_collation: Option<String>,
    pub nls_comp: String,
}

/// Raw catalog bundle for one table.
#[derive(Debug, Clone, Default)]
pub struct TableInfo {
    pub source_ddl: String,
    pub primary_key: Vec<CatalogRow>,
    pub unique_key: Vec<CatalogRow>,
    pub foreign_key: Vec<CatalogRow>,
    pub check_key: Vec<CatalogRow>,
    pub unique_index: Vec<CatalogRow>,
    pub normal_index: Vec<CatalogRow>,
    pub table_comment: Option<String>,
    pub columns: Vec<CatalogRow>,
    pub column_comments: HashMap<String, String>,
    pub partitions: Vec<CatalogRow>,
}

impl TableTask {
    /// Fetch every catalog axis for this table.
    pub async fn load_info(&self, oracle: &OracleClient) -> Result<TableInfo> {
        let schema = &self.source_schema;
        let table = &self.source_table;

        let mut column_comments = HashMap::new();
        for row in oracle.column_comment(schema, table).await? {
            if let (Some(name), Some(comment)) = (row.get("COLUMN_NAME"), row.get("COMMENTS")) {
                if let SqlValue::Text(text) = SqlValue::from_catalog(comment) {
                    column_comments.insert(name.clone(), text);
                }
            }
        }

        Ok(TableInfo {
            source_ddl: oracle.origin_ddl(schema, table).await?,
            primary_key: oracle.primary_key(schema, table).await?,
            unique_key: oracle.unique_key(schema, table).await?,
            foreign_key: oracle.foreign_key(schema, table).await?,
            check_key: oracle.check_key(schema, table).await?,
            unique_index: oracle.unique_index(schema, table).await?,
            normal_index: oracle.normal_index(schema, table).await?,
            table_comment: oracle.table_comment(schema, table).await?,
            columns: oracle
                .column_meta(schema, table, self.oracle_collation)
                .await?,
            column_comments,
            partitions: oracle.partitions(schema, table).await?,
        })
    }

    /// Assemble the DDL artifact: columns and keys through the rule engine
    /// and type mapper, constraints rendered as ALTER bodies, special
    /// indexes and untranslatable partition schemes into the compatibility
    /// stream.
    pub fn build_def(&self, info: &TableInfo, rules: &RuleSet) -> Result<TableDef> {
        if info.columns.is_empty() {
            return Err(anyhow!(
                "oracle table [{}.{}] has no columns",
                self.source_schema,
                self.source_table
            ));
        }

        let env = CollationEnv {
            oracle_collation: self.oracle_collation,
            schema_collation: self.schema_collation.as_deref(),
            table_collation: self.table_collation.as_deref(),
            nls_comp: &self.nls_comp,
        };

        let target_schema_lc = self.target_schema.to_lowercase();
        let target_table_lc = self.target_table.to_lowercase();
        let mut compatible_ddl = Vec::new();

        // Columns
        let mut columns = Vec::with_capacity(info.columns.len());
        for row in &info.columns {
            let mut col = OracleColumn::from_catalog_row(row)?;
            col.comment = info.column_comments.get(&col.name).cloned();
            let mapped = map_column(&col, &self.source_table, rules, &env)?;
            if let Some(note) = &mapped.compatibility {
                compatible_ddl.push(format!("-- {note}"));
            }
            columns.push(render_column(&mapped));
        }

        // Body keys
        let mut keys = Vec::new();
        for row in &info.primary_key {
            let cols = self.key_columns(row, rules)?;
            keys.push(format!("PRIMARY KEY ({cols})"));
        }
        for row in &info.unique_key {
            let name = constraint_name(row, "CONSTRAINT_NAME")?;
            let cols = self.key_columns(row, rules)?;
            keys.push(format!("UNIQUE KEY `{}` ({cols})", name.to_lowercase()));
        }
        for row in &info.unique_index {
            let name = constraint_name(row, "INDEX_NAME")?;
            let index_type = row.get("INDEX_TYPE").map(String::as_str).unwrap_or("NORMAL");
            if index_type == "NORMAL" {
                let cols = self.key_columns(row, rules)?;
                keys.push(format!("UNIQUE KEY `{}` ({cols})", name.to_lowercase()));
            } else {
                compatible_ddl.push(self.special_index_ddl(row, &name, index_type, true)?);
            }
        }
        for row in &info.normal_index {
            let name = constraint_name(row, "INDEX_NAME")?;
            let index_type = row.get("INDEX_TYPE").map(String::as_str).unwrap_or("NORMAL");
            if index_type == "NORMAL" {
                let cols = self.key_columns(row, rules)?;
                keys.push(format!("KEY `{}` ({cols})", name.to_lowercase()));
            } else {
                compatible_ddl.push(self.special_index_ddl(row, &name, index_type, false)?);
            }
        }

        // Foreign keys as ALTER bodies
        let mut foreign_keys = Vec::new();
        for row in &info.foreign_key {
            let name = constraint_name(row, "CONSTRAINT_NAME")?;
            let cols = self.key_columns(row, rules)?;
            let r_table = row
                .get("RTABLE_NAME")
                .ok_or_else(|| anyhow!("foreign key [{name}] missing RTABLE_NAME"))?;
            let r_cols = join_columns(
                row.get("RCOLUMN_LIST")
                    .ok_or_else(|| anyhow!("foreign key [{name}] missing RCOLUMN_LIST"))?,
                |c| rules.target_column(r_table, c),
            );
            let mut body = format!(
                "CONSTRAINT `{}` FOREIGN KEY ({cols}) REFERENCES `{}`.`{}` ({r_cols})",
                name.to_lowercase(),
                target_schema_lc,
                rules.target_table(r_table).to_lowercase(),
            );
            match row.get("DELETE_RULE").map(String::as_str) {
                Some("CASCADE") => body.push_str(" ON DELETE CASCADE"),
                Some("SET NULL") => body.push_str(" ON DELETE SET NULL"),
                _ => {}
            }
            foreign_keys.push(body);
        }

        // Check constraints as ALTER bodies; NOT NULL conditions already
        // live on the column lines.
        let mut check_keys = Vec::new();
        for row in &info.check_key {
            let name = constraint_name(row, "CONSTRAINT_NAME")?;
            let condition = match row.get("SEARCH_CONDITION") {
                Some(c) => match SqlValue::from_catalog(c) {
                    SqlValue::Text(text) => text,
                    _ => continue,
                },
                None => continue,
            };
            if condition.to_uppercase().contains("IS NOT NULL") {
                continue;
            }
            check_keys.push(format!(
                "CONSTRAINT `{}` CHECK ({})",
                name.to_lowercase(),
                condition.replace('"', "`")
            ));
        }

        // Partitions: LIST translates, everything else is reported.
        let mut partitions = Vec::new();
        let mut partition_keys = String::new();
        let mut partition_type = String::new();
        if let Some(first) = info.partitions.first() {
            partition_type = first
                .get("PARTITIONING_TYPE")
                .cloned()
                .unwrap_or_default();
            partition_keys = first.get("COLUMN_LIST").cloned().unwrap_or_default();
            if partition_type == "LIST" {
                for row in &info.partitions {
                    let name = constraint_name(row, "PARTITION_NAME")?;
                    let high_value = row.get("HIGH_VALUE").cloned().unwrap_or_default();
                    partitions.push(format!("PARTITION {name} VALUES IN ({high_value})"));
                }
            } else {
                compatible_ddl.push(format!(
                    "-- table `{target_schema_lc}`.`{target_table_lc}` uses {partition_type} \
                     partitioning on ({partition_keys}); no mysql translation, convert manually"
                ));
            }
        }

        let table_collation = resolve_collation(
            self.oracle_collation,
            None,
            self.table_collation.as_deref(),
            self.schema_collation.as_deref(),
            &self.nls_comp,
        )?;
        let mut suffix = format!(
            "ENGINE=InnoDB DEFAULT CHARSET={MYSQL_CHARACTER_SET} COLLATE={table_collation}"
        );
        if !self.table_option.is_empty() {
            suffix.push(' ');
            suffix.push_str(&self.table_option);
        }

        let comment = match &info.table_comment {
            Some(text) if !text.is_empty() => {
                format!("COMMENT='{}'", text.replace('\'', "''"))
            }
            _ => String::new(),
        };

        Ok(TableDef {
            source_schema: self.source_schema.clone(),
            source_table: self.source_table.clone(),
            source_table_type: self.source_table_type.clone(),
            source_ddl: info.source_ddl.clone(),
            target_schema: self.target_schema.clone(),
            target_table: self.target_table.clone(),
            target_db_type: self.target_db_type,
            target_db_version: self.target_db_version.clone(),
            table_prefix: format!("CREATE TABLE `{target_schema_lc}`.`{target_table_lc}`"),
            columns,
            keys,
            suffix,
            comment,
            check_keys,
            foreign_keys,
            compatible_ddl,
            partitions,
            partition_keys,
            partition_type,
        })
    }

    /// Map and quote a COLUMN_LIST through the rule engine.
    fn key_columns(&self, row: &CatalogRow, rules: &RuleSet) -> Result<String> {
        let list = row
            .get("COLUMN_LIST")
            .ok_or_else(|| anyhow!("catalog row missing COLUMN_LIST"))?;
        Ok(join_columns(list, |c| {
            rules.target_column(&self.source_table, c)
        }))
    }

    /// CREATE INDEX statement for function-based / bitmap / domain indexes;
    /// these only ever land in the compatibility stream.
    fn special_index_ddl(
        &self,
        row: &CatalogRow,
        name: &str,
        index_type: &str,
        unique: bool,
    ) -> Result<String> {
        let cols = row
            .get("COLUMN_LIST")
            .cloned()
            .unwrap_or_default();
        let qualifier = if unique {
            "UNIQUE "
        } else if index_type == "BITMAP" {
            "BITMAP "
        } else {
            ""
        };
        Ok(format!(
            "-- oracle {} index\nCREATE {}INDEX `{}` ON `{}`.`{}` ({});",
            index_type.to_lowercase(),
            qualifier,
            name.to_lowercase(),
            self.target_schema.to_lowercase(),
            self.target_table.to_lowercase(),
            cols
        ))
    }
}

fn constraint_name(row: &CatalogRow, key: &str) -> Result<String> {
    row.get(key)
        .cloned()
        .ok_or_else(|| anyhow!("catalog row missing {key}"))
}

fn join_columns(list: &str, map: impl Fn(&str) -> String) -> String {
    list.split(',')
        .map(|c| format!("`{}`", map(c.trim()).to_lowercase()))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> TableTask {
        TableTask {
            source_schema: "SALES".into(),
            source_table: "DEPT".into(),
            target_schema: "SALES".into(),
            target_table: "DEPT".into(),
            source_table_type: "HEAP".into(),
            target_db_type: DbType::Mysql,
            target_db_version: "8.0.30".into(),
            table_option: String::new(),
            oracle_collation: true,
            schema_collation: Some("USING_NLS_COMP".into()),
            table_collation: Some("USING_NLS_COMP".into()),
            nls_comp: "BINARY_CI".into(),
        }
    }

    fn row(pairs: &[(&str, &str)]) -> CatalogRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn column_row(name: &str, data_type: &str, pairs: &[(&str, &str)]) -> CatalogRow {
        let mut base = row(&[("COLUMN_NAME", name), ("DATA_TYPE", data_type)]);
        for (k, v) in pairs {
            base.insert(k.to_string(), v.to_string());
        }
        base
    }

    #[test]
    fn varchar2_with_collation_and_default() {
        let info = TableInfo {
            columns: vec![column_row(
                "NAME",
                "VARCHAR2",
                &[
                    ("CHAR_LENGTH", "64"),
                    ("NULLABLE", "Y"),
                    ("DATA_DEFAULT", "'N/A'"),
                    ("COLLATION", "BINARY_CI"),
                ],
            )],
            ..Default::default()
        };
        let def = task().build_def(&info, &RuleSet::for_tests("SALES", &[], &[])).unwrap();
        assert_eq!(
            def.columns,
            vec!["`name` VARCHAR(64) COLLATE utf8mb4_bin DEFAULT 'N/A'"]
        );
        let streams = def.statements();
        assert!(streams.reversible[0].starts_with("CREATE TABLE `sales`.`dept` (\n`name` VARCHAR(64)"));
        assert!(streams.compatibility.is_empty());
    }

    #[test]
    fn list_partition_translates_to_columns_clause() {
        let info = TableInfo {
            columns: vec![column_row(
                "REGION",
                "VARCHAR2",
                &[("CHAR_LENGTH", "2"), ("NULLABLE", "N")],
            )],
            partitions: vec![
                row(&[
                    ("PARTITION_NAME", "P_N"),
                    ("HIGH_VALUE", "'N'"),
                    ("PARTITIONING_TYPE", "LIST"),
                    ("COLUMN_LIST", "REGION"),
                ]),
                row(&[
                    ("PARTITION_NAME", "P_S"),
                    ("HIGH_VALUE", "'S'"),
                    ("PARTITIONING_TYPE", "LIST"),
                    ("COLUMN_LIST", "REGION"),
                ]),
            ],
            ..Default::default()
        };
        let def = task().build_def(&info, &RuleSet::for_tests("SALES", &[], &[])).unwrap();
        let streams = def.statements();
        assert!(streams.reversible[0].contains(
            "PARTITION BY LIST COLUMNS(REGION) (PARTITION P_N VALUES IN ('N'), PARTITION P_S VALUES IN ('S'))"
        ));
    }

    #[test]
    fn range_partition_routes_to_compatibility() {
        let info = TableInfo {
            columns: vec![column_row(
                "ID",
                "NUMBER",
                &[("DATA_PRECISION", "10"), ("DATA_SCALE", "0"), ("NULLABLE", "N")],
            )],
            partitions: vec![row(&[
                ("PARTITION_NAME", "P1"),
                ("HIGH_VALUE", "100"),
                ("PARTITIONING_TYPE", "RANGE"),
                ("COLUMN_LIST", "ID"),
            ])],
            ..Default::default()
        };
        let def = task().build_def(&info, &RuleSet::for_tests("SALES", &[], &[])).unwrap();
        let streams = def.statements();
        assert!(!streams.reversible[0].contains("PARTITION BY"));
        assert!(streams.compatibility.iter().any(|s| s.contains("RANGE")));
    }

    #[test]
    fn not_null_checks_are_dropped_and_quotes_converted() {
        let info = TableInfo {
            columns: vec![column_row(
                "AMOUNT",
                "NUMBER",
                &[("DATA_PRECISION", "20"), ("DATA_SCALE", "4"), ("NULLABLE", "Y")],
            )],
            check_key: vec![
                row(&[
                    ("CONSTRAINT_NAME", "SYS_C001"),
                    ("SEARCH_CONDITION", "\"AMOUNT\" IS NOT NULL"),
                ]),
                row(&[
                    ("CONSTRAINT_NAME", "CK_AMOUNT"),
                    ("SEARCH_CONDITION", "\"AMOUNT\" > 0"),
                ]),
            ],
            ..Default::default()
        };
        let def = task().build_def(&info, &RuleSet::for_tests("SALES", &[], &[])).unwrap();
        assert_eq!(def.check_keys, vec!["CONSTRAINT `ck_amount` CHECK (`AMOUNT` > 0)"]);
    }

    #[test]
    fn bitmap_index_goes_to_compatibility() {
        let info = TableInfo {
            columns: vec![column_row(
                "REGION",
                "VARCHAR2",
                &[("CHAR_LENGTH", "2"), ("NULLABLE", "Y")],
            )],
            normal_index: vec![row(&[
                ("INDEX_NAME", "IDX_REGION_BM"),
                ("INDEX_TYPE", "BITMAP"),
                ("COLUMN_LIST", "REGION"),
            ])],
            ..Default::default()
        };
        let def = task().build_def(&info, &RuleSet::for_tests("SALES", &[], &[])).unwrap();
        assert!(def.keys.is_empty());
        assert!(def.compatible_ddl[0].contains("BITMAP INDEX `idx_region_bm`"));
    }

    #[test]
    fn renamed_columns_flow_into_keys_and_foreign_keys() {
        let rules = RuleSet::for_tests("SALES", &[], &[("DEPT", "DNO", "DEPT_NO")]);
        let info = TableInfo {
            columns: vec![column_row(
                "DNO",
                "NUMBER",
                &[("DATA_PRECISION", "4"), ("DATA_SCALE", "0"), ("NULLABLE", "N")],
            )],
            primary_key: vec![row(&[
                ("CONSTRAINT_NAME", "PK_DEPT"),
                ("COLUMN_LIST", "DNO"),
            ])],
            ..Default::default()
        };
        let def = task().build_def(&info, &rules).unwrap();
        assert_eq!(def.columns, vec!["`dept_no` SMALLINT NOT NULL"]);
        assert_eq!(def.keys, vec!["PRIMARY KEY (`dept_no`)"]);
    }
}
