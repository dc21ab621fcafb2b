use o2m_sync::{AppOpts, CdcOpts, DbType, FullOpts, ReverseOpts, SourceOpts, TargetOpts};

#[test]
fn test_source_opts_creation() {
    let opts = SourceOpts {
        oracle_username: "marvin".to_string(),
        oracle_password: "secret".to_string(),
        oracle_host: "oracle.internal".to_string(),
        oracle_port: 1521,
        oracle_service_name: "orclpdb".to_string(),
        schema_name: "SALES".to_string(),
        include_tables: vec!["ORDERS".to_string()],
        exclude_tables: vec![],
    };

    assert_eq!(opts.connect_string(), "//oracle.internal:1521/orclpdb");
    assert_eq!(opts.schema_name, "SALES");
    assert_eq!(opts.include_tables, vec!["ORDERS"]);
}

#[test]
fn test_target_opts_creation() {
    let opts = TargetOpts {
        mysql_username: "root".to_string(),
        mysql_password: "root".to_string(),
        mysql_host: "localhost".to_string(),
        mysql_port: 4000,
        db_type: DbType::Tidb,
        target_schema_name: "SALES".to_string(),
        table_option: String::new(),
        overwrite: false,
        meta_schema: "o2m_meta".to_string(),
    };

    assert_eq!(opts.db_type, DbType::Tidb);
    assert_eq!(opts.db_type.as_str(), "TIDB");
    assert_eq!(opts.meta_schema, "o2m_meta");
    assert!(!opts.overwrite);
}

#[test]
fn test_parallelism_opts_defaults_are_sane() {
    let app = AppOpts {
        threads: 8,
        insert_batch_size: 100,
    };
    let full = FullOpts {
        table_threads: 4,
        sql_threads: 4,
        apply_threads: 4,
        task_threads: 4,
        chunk_size: 100_000,
    };
    let cdc = CdcOpts {
        logminer_query_timeout: 300,
    };
    let reverse = ReverseOpts {
        reverse_threads: 8,
        direct_write: false,
    };

    assert!(app.threads > 0);
    assert!(app.insert_batch_size > 0);
    assert!(full.table_threads > 0 && full.sql_threads > 0 && full.apply_threads > 0);
    assert!(full.chunk_size > 0);
    assert!(cdc.logminer_query_timeout > 0);
    assert!(reverse.reverse_threads > 0);
    assert!(!reverse.direct_write);
}
