//! End-to-end reverse scenarios: catalog rows in, SQL script files out.

use std::collections::HashMap;

use o2m_sync::reverse::{TableInfo, TableTask};
use o2m_sync::rules::RuleSet;
use o2m_sync::types::DbType;
use o2m_sync::writer::ReverseWriter;

fn row(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn task(table: &str, db_type: DbType, db_version: &str) -> TableTask {
    TableTask {
        source_schema: "SALES".into(),
        source_table: table.into(),
        target_schema: "SALES".into(),
        target_table: table.into(),
        source_table_type: "HEAP".into(),
        target_db_type: db_type,
        target_db_version: db_version.into(),
        table_option: String::new(),
        oracle_collation: true,
        schema_collation: Some("USING_NLS_COMP".into()),
        table_collation: Some("USING_NLS_COMP".into()),
        nls_comp: "BINARY_CI".into(),
    }
}

fn dept_info() -> TableInfo {
    TableInfo {
        source_ddl: "CREATE TABLE \"SALES\".\"DEPT\" (...)".into(),
        columns: vec![
            row(&[
                ("COLUMN_NAME", "ID"),
                ("DATA_TYPE", "NUMBER"),
                ("DATA_PRECISION", "10"),
                ("DATA_SCALE", "0"),
                ("NULLABLE", "N"),
            ]),
            row(&[
                ("COLUMN_NAME", "NAME"),
                ("DATA_TYPE", "VARCHAR2"),
                ("CHAR_LENGTH", "64"),
                ("NULLABLE", "Y"),
                ("DATA_DEFAULT", "'N/A'"),
                ("COLLATION", "BINARY_CI"),
            ]),
            row(&[
                ("COLUMN_NAME", "BAL"),
                ("DATA_TYPE", "NUMBER"),
                ("DATA_PRECISION", "20"),
                ("DATA_SCALE", "4"),
                ("NULLABLE", "Y"),
            ]),
            row(&[
                ("COLUMN_NAME", "QTY"),
                ("DATA_TYPE", "NUMBER"),
                ("NULLABLE", "Y"),
            ]),
        ],
        primary_key: vec![row(&[
            ("CONSTRAINT_NAME", "PK_DEPT"),
            ("COLUMN_LIST", "ID"),
        ])],
        ..Default::default()
    }
}

#[test]
fn varchar2_and_number_mapping_scenarios() {
    let def = task("DEPT", DbType::Mysql, "8.0.30")
        .build_def(&dept_info(), &RuleSet::identity("SALES"))
        .unwrap();

    assert_eq!(
        def.columns,
        vec![
            "`id` INT NOT NULL",
            "`name` VARCHAR(64) COLLATE utf8mb4_bin DEFAULT 'N/A'",
            "`bal` DECIMAL(20,4)",
            "`qty` DECIMAL(65,30)",
        ]
    );
    assert_eq!(def.keys, vec!["PRIMARY KEY (`id`)"]);
}

#[test]
fn list_partition_scenario() {
    let mut info = dept_info();
    info.partitions = vec![
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
    ];
    let def = task("DEPT", DbType::Mysql, "8.0.30")
        .build_def(&info, &RuleSet::identity("SALES"))
        .unwrap();
    let streams = def.statements();
    assert!(streams.reversible[0].contains(
        "PARTITION BY LIST COLUMNS(REGION) \
         (PARTITION P_N VALUES IN ('N'), PARTITION P_S VALUES IN ('S'))"
    ));
}

/// TiDB targets report foreign keys instead of applying them: the reverse
/// file carries only the CREATE TABLE, the compatibility file the ALTER.
#[tokio::test]
async fn tidb_foreign_keys_go_to_the_compatibility_file() {
    let mut info = dept_info();
    info.foreign_key = vec![row(&[
        ("CONSTRAINT_NAME", "FK_DEPT_REGION"),
        ("COLUMN_LIST", "ID"),
        ("R_OWNER", "SALES"),
        ("RTABLE_NAME", "REGION"),
        ("RCOLUMN_LIST", "ID"),
        ("DELETE_RULE", "NO ACTION"),
    ])];
    let def = task("DEPT", DbType::Tidb, "6.5.0")
        .build_def(&info, &RuleSet::identity("SALES"))
        .unwrap();
    let streams = def.statements();

    let dir = tempfile::tempdir().unwrap();
    let writer = ReverseWriter::open(dir.path(), "SALES", None).unwrap();
    writer
        .emit_reversible(&def.reverse_report(), &streams.reversible)
        .await
        .unwrap();
    writer
        .emit_compatibility(&def.compatibility_report(), &streams.compatibility)
        .unwrap();

    let reverse = std::fs::read_to_string(&writer.reverse_path).unwrap();
    let compat = std::fs::read_to_string(&writer.compatibility_path).unwrap();
    assert!(reverse.contains("CREATE TABLE `sales`.`dept`"));
    assert!(!reverse.contains("FOREIGN KEY"));
    assert!(compat.contains(
        "ALTER TABLE `sales`.`dept` ADD CONSTRAINT `fk_dept_region` FOREIGN KEY (`id`) \
         REFERENCES `sales`.`region` (`id`);"
    ));
}

/// Foreign keys are deferred behind every CREATE TABLE so the script can be
/// applied top to bottom.
#[tokio::test]
async fn foreign_keys_come_after_all_create_tables() {
    let dept = task("DEPT", DbType::Mysql, "8.0.30")
        .build_def(&dept_info(), &RuleSet::identity("SALES"))
        .unwrap();

    let mut orders_info = dept_info();
    orders_info.foreign_key = vec![row(&[
        ("CONSTRAINT_NAME", "FK_ORDERS_DEPT"),
        ("COLUMN_LIST", "ID"),
        ("R_OWNER", "SALES"),
        ("RTABLE_NAME", "DEPT"),
        ("RCOLUMN_LIST", "ID"),
        ("DELETE_RULE", "CASCADE"),
    ])];
    let orders = task("ORDERS", DbType::Mysql, "8.0.30")
        .build_def(&orders_info, &RuleSet::identity("SALES"))
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let writer = ReverseWriter::open(dir.path(), "SALES", None).unwrap();

    // ORDERS (the referencing table) reverses before DEPT; its foreign key
    // still has to trail DEPT's CREATE TABLE in the script.
    let mut deferred = Vec::new();
    for def in [&orders, &dept] {
        let streams = def.statements();
        writer
            .emit_reversible(&def.reverse_report(), &streams.reversible)
            .await
            .unwrap();
        deferred.extend(streams.foreign_keys);
    }
    writer.emit_reversible("", &deferred).await.unwrap();

    let script = std::fs::read_to_string(&writer.reverse_path).unwrap();
    let fk_pos = script.find("ADD CONSTRAINT `fk_orders_dept`").unwrap();
    let dept_pos = script.find("CREATE TABLE `sales`.`dept`").unwrap();
    let orders_pos = script.find("CREATE TABLE `sales`.`orders`").unwrap();
    assert!(fk_pos > dept_pos);
    assert!(fk_pos > orders_pos);
    assert!(script.contains("ON DELETE CASCADE"));
}
