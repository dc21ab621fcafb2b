//! LogMiner access for incremental replication.
//!
//! Each poll mines one archived log: `DBMS_LOGMNR.ADD_LOGFILE` +
//! `START_LOGMNR` from the batch SCN, a filtered query of
//! `V$LOGMNR_CONTENTS`, then `END_LOGMNR`. The whole mining call runs under
//! a caller-supplied timeout because a large log can stall the session.

use anyhow::{anyhow, Context, Result};
use std::time::Duration;

use super::OracleClient;
use crate::types::LogminerContent;

/// One archived redo log covering part of the SCN range to mine.
#[derive(Debug, Clone)]
pub struct ArchivedLog {
    pub name: String,
    pub sequence: u64,
    pub first_change: u64,
}

impl OracleClient {
    /// Archived logs whose SCN range ends after `scn`, oldest first.
    pub async fn archived_logs_since(&self, scn: u64) -> Result<Vec<ArchivedLog>> {
        let sql = format!(
            "SELECT NAME, SEQUENCE#, FIRST_CHANGE# FROM V$ARCHIVED_LOG \
              WHERE STATUS = 'A' AND DELETED = 'NO' AND STANDBY_DEST = 'NO' \
                AND NEXT_CHANGE# > {scn} \
              ORDER BY SEQUENCE#"
        );
        let rows = self.query_rows(sql).await?;
        let mut logs = Vec::with_capacity(rows.len());
        for row in rows {
            let name = row
                .get("NAME")
                .ok_or_else(|| anyhow!("archived log row missing NAME"))?
                .clone();
            let sequence = row
                .get("SEQUENCE#")
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(0);
            let first_change = row
                .get("FIRST_CHANGE#")
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(0);
            logs.push(ArchivedLog {
                name,
                sequence,
                first_change,
            });
        }
        Ok(logs)
    }

    /// Mine one archived log and return the redo rows for the configured
    /// schema and tables at `SCN >= start_scn`, in SCN order.
    pub async fn logminer_content(
        &self,
        log_name: &str,
        start_scn: u64,
        schema: &str,
        tables: &[String],
        query_timeout: Duration,
    ) -> Result<Vec<LogminerContent>> {
        let log_name = log_name.to_string();
        let schema = schema.replace('\'', "").to_uppercase();
        let table_list = tables
            .iter()
            .map(|t| format!("'{}'", t.replace('\'', "").to_uppercase()))
            .collect::<Vec<_>>()
            .join(", ");

        let mine = self.with_conn(move |conn| {
            conn.execute(
                "BEGIN DBMS_LOGMNR.ADD_LOGFILE(LOGFILENAME => :1, OPTIONS => DBMS_LOGMNR.NEW); END;",
                &[&log_name],
            )
            .with_context(|| format!("logminer add logfile [{log_name}]"))?;

            let start = format!(
                "BEGIN DBMS_LOGMNR.START_LOGMNR(STARTSCN => {start_scn}, OPTIONS => \
                 DBMS_LOGMNR.SKIP_CORRUPTION + DBMS_LOGMNR.NO_SQL_DELIMITER + \
                 DBMS_LOGMNR.NO_ROWID_IN_STMT + DBMS_LOGMNR.DICT_FROM_ONLINE_CATALOG); END;"
            );
            conn.execute(&start, &[])
                .with_context(|| format!("logminer start at scn [{start_scn}]"))?;

            let content_sql = format!(
                "SELECT SCN, SEG_OWNER, TABLE_NAME, OPERATION, SQL_REDO \
                   FROM V$LOGMNR_CONTENTS \
                  WHERE SEG_OWNER = '{schema}' \
                    AND TABLE_NAME IN ({table_list}) \
                    AND OPERATION IN ('INSERT', 'UPDATE', 'DELETE', 'DDL') \
                    AND SCN >= {start_scn} \
                  ORDER BY SCN"
            );

            let result = (|| -> Result<Vec<LogminerContent>> {
                let mut stmt = conn.statement(&content_sql).build()?;
                let rows = stmt.query(&[]).context("query V$LOGMNR_CONTENTS")?;
                let mut contents = Vec::new();
                for row in rows {
                    let row = row?;
                    let scn: u64 = row
                        .get::<usize, String>(0)?
                        .parse()
                        .context("parse logminer SCN")?;
                    let segment_owner: String = row.get(1)?;
                    let table_name: String = row.get(2)?;
                    let operation: String = row.get(3)?;
                    let sql_redo: Option<String> = row.get(4)?;
                    contents.push(LogminerContent {
                        scn,
                        segment_owner,
                        table_name,
                        operation,
                        sql_redo: sql_redo.unwrap_or_default(),
                    });
                }
                Ok(contents)
            })();

            // Always release the LogMiner session, even on a failed query.
            let _ = conn.execute("BEGIN DBMS_LOGMNR.END_LOGMNR(); END;", &[]);

            result
        });

        match tokio::time::timeout(query_timeout, mine).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!(
                "logminer query timed out after {}s",
                query_timeout.as_secs()
            )),
        }
    }
}
