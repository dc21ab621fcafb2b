//! Catalog reader: one query per catalog axis against the `DBA_*` views.
//!
//! Every function returns either normalized row maps (see
//! [`crate::oracle::OracleClient::query_rows`]) or a typed scalar. Schema
//! and table names are folded to upper case before they are spliced into
//! catalog SQL, matching how Oracle stores unquoted identifiers.

use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;

use super::OracleClient;
use crate::types::{CatalogRow, SqlValue};

/// Upper-case an identifier for catalog predicates.
fn ident(name: &str) -> String {
    name.replace('\'', "").to_uppercase()
}

/// One planned ROWID range of a table.
#[derive(Debug, Clone)]
pub struct RowidRange {
    pub start_rowid: String,
    pub end_rowid: String,
}

impl OracleClient {
    pub async fn schema_exists(&self, schema: &str) -> Result<bool> {
        let sql = format!(
            "SELECT COUNT(1) FROM DBA_USERS WHERE USERNAME = '{}'",
            ident(schema)
        );
        let count = self.query_one(sql).await?.unwrap_or_default();
        Ok(count.parse::<i64>().unwrap_or(0) > 0)
    }

    pub async fn list_tables(&self, schema: &str) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT TABLE_NAME FROM DBA_TABLES WHERE OWNER = '{}' ORDER BY TABLE_NAME",
            ident(schema)
        );
        let rows = self.query_rows(sql).await?;
        Ok(rows
            .into_iter()
            .filter_map(|mut r| r.remove("TABLE_NAME"))
            .collect())
    }

    /// Classify every table of the schema as HEAP / PARTITIONED / TEMPORARY
    /// / CLUSTERED / MATERIALIZED VIEW.
    pub async fn table_types(&self, schema: &str) -> Result<HashMap<String, String>> {
        let sql = format!(
            "SELECT f.TABLE_NAME, \
                    CASE WHEN f.CLUSTER_NAME IS NOT NULL THEN 'CLUSTERED' \
                         WHEN f.TEMPORARY = 'Y' THEN 'TEMPORARY' \
                         WHEN mv.MVIEW_NAME IS NOT NULL THEN 'MATERIALIZED VIEW' \
                         WHEN f.PARTITIONED = 'YES' THEN 'PARTITIONED' \
                         ELSE 'HEAP' END AS TABLE_TYPE \
               FROM DBA_TABLES f \
               LEFT JOIN DBA_MVIEWS mv \
                 ON f.OWNER = mv.OWNER AND f.TABLE_NAME = mv.MVIEW_NAME \
              WHERE f.OWNER = '{}'",
            ident(schema)
        );
        let rows = self.query_rows(sql).await?;
        let mut map = HashMap::with_capacity(rows.len());
        for mut row in rows {
            let name = row
                .remove("TABLE_NAME")
                .ok_or_else(|| anyhow!("catalog row missing TABLE_NAME"))?;
            let kind = row.remove("TABLE_TYPE").unwrap_or_else(|| "HEAP".into());
            map.insert(name, kind);
        }
        Ok(map)
    }

    /// Rows: CONSTRAINT_NAME, COLUMN_LIST (comma-joined in key order).
    pub async fn primary_key(&self, schema: &str, table: &str) -> Result<Vec<CatalogRow>> {
        self.key_constraint(schema, table, 'P').await
    }

    /// Rows: CONSTRAINT_NAME, COLUMN_LIST.
    pub async fn unique_key(&self, schema: &str, table: &str) -> Result<Vec<CatalogRow>> {
        self.key_constraint(schema, table, 'U').await
    }

    async fn key_constraint(
        &self,
        schema: &str,
        table: &str,
        kind: char,
    ) -> Result<Vec<CatalogRow>> {
        let sql = format!(
            "SELECT cu.CONSTRAINT_NAME, \
                    LISTAGG(cu.COLUMN_NAME, ',') WITHIN GROUP (ORDER BY cu.POSITION) AS COLUMN_LIST \
               FROM DBA_CONS_COLUMNS cu \
               JOIN DBA_CONSTRAINTS au \
                 ON cu.OWNER = au.OWNER \
                AND cu.CONSTRAINT_NAME = au.CONSTRAINT_NAME \
                AND cu.TABLE_NAME = au.TABLE_NAME \
              WHERE au.CONSTRAINT_TYPE = '{kind}' \
                AND au.STATUS = 'ENABLED' \
                AND cu.OWNER = '{}' \
                AND cu.TABLE_NAME = '{}' \
              GROUP BY cu.CONSTRAINT_NAME",
            ident(schema),
            ident(table)
        );
        self.query_rows(sql).await
    }

    /// Rows: CONSTRAINT_NAME, COLUMN_LIST, R_OWNER, RTABLE_NAME,
    /// RCOLUMN_LIST, DELETE_RULE.
    pub async fn foreign_key(&self, schema: &str, table: &str) -> Result<Vec<CatalogRow>> {
        let sql = format!(
            "SELECT c.CONSTRAINT_NAME, \
                    LISTAGG(cc.COLUMN_NAME, ',') WITHIN GROUP (ORDER BY cc.POSITION) AS COLUMN_LIST, \
                    r.OWNER AS R_OWNER, \
                    r.TABLE_NAME AS RTABLE_NAME, \
                    (SELECT LISTAGG(rc.COLUMN_NAME, ',') WITHIN GROUP (ORDER BY rc.POSITION) \
                       FROM DBA_CONS_COLUMNS rc \
                      WHERE rc.OWNER = r.OWNER AND rc.CONSTRAINT_NAME = r.CONSTRAINT_NAME) AS RCOLUMN_LIST, \
                    c.DELETE_RULE \
               FROM DBA_CONSTRAINTS c \
               JOIN DBA_CONS_COLUMNS cc \
                 ON cc.OWNER = c.OWNER AND cc.CONSTRAINT_NAME = c.CONSTRAINT_NAME \
               JOIN DBA_CONSTRAINTS r \
                 ON r.OWNER = c.R_OWNER AND r.CONSTRAINT_NAME = c.R_CONSTRAINT_NAME \
              WHERE c.CONSTRAINT_TYPE = 'R' \
                AND c.STATUS = 'ENABLED' \
                AND c.OWNER = '{}' \
                AND c.TABLE_NAME = '{}' \
              GROUP BY c.CONSTRAINT_NAME, r.OWNER, r.TABLE_NAME, r.CONSTRAINT_NAME, c.DELETE_RULE",
            ident(schema),
            ident(table)
        );
        self.query_rows(sql).await
    }

    /// Rows: CONSTRAINT_NAME, SEARCH_CONDITION. NOT NULL conditions are
    /// still included here; the reverser filters them.
    pub async fn check_key(&self, schema: &str, table: &str) -> Result<Vec<CatalogRow>> {
        let sql = format!(
            "SELECT CONSTRAINT_NAME, SEARCH_CONDITION \
               FROM DBA_CONSTRAINTS \
              WHERE CONSTRAINT_TYPE = 'C' \
                AND STATUS = 'ENABLED' \
                AND OWNER = '{}' \
                AND TABLE_NAME = '{}'",
            ident(schema),
            ident(table)
        );
        self.query_rows(sql).await
    }

    /// Rows: INDEX_NAME, INDEX_TYPE, COLUMN_LIST. Indexes backing PK/UK
    /// constraints are excluded.
    pub async fn unique_index(&self, schema: &str, table: &str) -> Result<Vec<CatalogRow>> {
        self.index_rows(schema, table, "UNIQUE").await
    }

    /// Rows: INDEX_NAME, INDEX_TYPE, COLUMN_LIST. INDEX_TYPE distinguishes
    /// NORMAL from FUNCTION-BASED / BITMAP / DOMAIN indexes.
    pub async fn normal_index(&self, schema: &str, table: &str) -> Result<Vec<CatalogRow>> {
        self.index_rows(schema, table, "NONUNIQUE").await
    }

    async fn index_rows(
        &self,
        schema: &str,
        table: &str,
        uniqueness: &str,
    ) -> Result<Vec<CatalogRow>> {
        let sql = format!(
            "SELECT i.INDEX_NAME, i.INDEX_TYPE, \
                    LISTAGG(c.COLUMN_NAME, ',') WITHIN GROUP (ORDER BY c.COLUMN_POSITION) AS COLUMN_LIST \
               FROM DBA_INDEXES i \
               JOIN DBA_IND_COLUMNS c \
                 ON i.OWNER = c.INDEX_OWNER AND i.INDEX_NAME = c.INDEX_NAME \
              WHERE i.TABLE_OWNER = '{schema}' \
                AND i.TABLE_NAME = '{table}' \
                AND i.UNIQUENESS = '{uniqueness}' \
                AND i.INDEX_NAME NOT IN ( \
                      SELECT CONSTRAINT_NAME FROM DBA_CONSTRAINTS \
                       WHERE OWNER = '{schema}' AND TABLE_NAME = '{table}' \
                         AND CONSTRAINT_TYPE IN ('P', 'U')) \
              GROUP BY i.INDEX_NAME, i.INDEX_TYPE",
            schema = ident(schema),
            table = ident(table),
            uniqueness = uniqueness
        );
        self.query_rows(sql).await
    }

    pub async fn table_comment(&self, schema: &str, table: &str) -> Result<Option<String>> {
        let sql = format!(
            "SELECT COMMENTS FROM DBA_TAB_COMMENTS \
              WHERE OWNER = '{}' AND TABLE_NAME = '{}'",
            ident(schema),
            ident(table)
        );
        let rows = self.query_rows(sql).await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|mut r| r.remove("COMMENTS"))
            .and_then(|c| match SqlValue::from_catalog(&c) {
                SqlValue::Text(s) => Some(s),
                _ => None,
            }))
    }

    /// Rows: COLUMN_NAME, DATA_TYPE, CHAR_LENGTH, CHAR_USED,
    /// DATA_PRECISION, DATA_SCALE, NULLABLE, DATA_DEFAULT and, when the
    /// instance supports per-column collations, COLLATION.
    pub async fn column_meta(
        &self,
        schema: &str,
        table: &str,
        oracle_collation: bool,
    ) -> Result<Vec<CatalogRow>> {
        let collation_col = if oracle_collation { ", COLLATION" } else { "" };
        let sql = format!(
            "SELECT COLUMN_NAME, DATA_TYPE, CHAR_LENGTH, CHAR_USED, \
                    DATA_PRECISION, DATA_SCALE, NULLABLE, DATA_DEFAULT{collation_col} \
               FROM DBA_TAB_COLUMNS \
              WHERE OWNER = '{}' AND TABLE_NAME = '{}' \
              ORDER BY COLUMN_ID",
            ident(schema),
            ident(table)
        );
        self.query_rows(sql).await
    }

    /// Rows: COLUMN_NAME, COMMENTS.
    pub async fn column_comment(&self, schema: &str, table: &str) -> Result<Vec<CatalogRow>> {
        let sql = format!(
            "SELECT COLUMN_NAME, COMMENTS FROM DBA_COL_COMMENTS \
              WHERE OWNER = '{}' AND TABLE_NAME = '{}'",
            ident(schema),
            ident(table)
        );
        self.query_rows(sql).await
    }

    /// Rows: PARTITION_NAME, HIGH_VALUE, PARTITIONING_TYPE, COLUMN_LIST,
    /// ordered by partition position. Empty for non-partitioned tables.
    pub async fn partitions(&self, schema: &str, table: &str) -> Result<Vec<CatalogRow>> {
        let meta_sql = format!(
            "SELECT p.PARTITIONING_TYPE, \
                    LISTAGG(k.COLUMN_NAME, ',') WITHIN GROUP (ORDER BY k.COLUMN_POSITION) AS COLUMN_LIST \
               FROM DBA_PART_TABLES p \
               JOIN DBA_PART_KEY_COLUMNS k \
                 ON p.OWNER = k.OWNER AND p.TABLE_NAME = k.NAME \
              WHERE p.OWNER = '{}' AND p.TABLE_NAME = '{}' \
              GROUP BY p.PARTITIONING_TYPE",
            ident(schema),
            ident(table)
        );
        let meta = self.query_rows(meta_sql).await?;
        let Some(meta) = meta.into_iter().next() else {
            return Ok(Vec::new());
        };
        let part_type = meta
            .get("PARTITIONING_TYPE")
            .cloned()
            .unwrap_or_default();
        let key_columns = meta.get("COLUMN_LIST").cloned().unwrap_or_default();

        let defs_sql = format!(
            "SELECT PARTITION_NAME, HIGH_VALUE FROM DBA_TAB_PARTITIONS \
              WHERE TABLE_OWNER = '{}' AND TABLE_NAME = '{}' \
              ORDER BY PARTITION_POSITION",
            ident(schema),
            ident(table)
        );
        let mut rows = self.query_rows(defs_sql).await?;
        for row in &mut rows {
            row.insert("PARTITIONING_TYPE".to_string(), part_type.clone());
            row.insert("COLUMN_LIST".to_string(), key_columns.clone());
        }
        Ok(rows)
    }

    /// Original CREATE TABLE text via `DBMS_METADATA`.
    pub async fn origin_ddl(&self, schema: &str, table: &str) -> Result<String> {
        let sql = format!(
            "SELECT DBMS_METADATA.GET_DDL('TABLE', '{}', '{}') FROM DUAL",
            ident(table),
            ident(schema)
        );
        self.query_one(sql)
            .await?
            .ok_or_else(|| anyhow!("DBMS_METADATA returned no DDL for [{schema}.{table}]"))
    }

    /// Database character set, e.g. `AL32UTF8`.
    pub async fn db_character_set(&self) -> Result<String> {
        self.nls_database_parameter("NLS_CHARACTERSET").await
    }

    pub async fn nls_sort(&self) -> Result<String> {
        self.nls_database_parameter("NLS_SORT").await
    }

    pub async fn nls_comp(&self) -> Result<String> {
        self.nls_database_parameter("NLS_COMP").await
    }

    pub async fn db_version(&self) -> Result<String> {
        self.nls_database_parameter("NLS_RDBMS_VERSION").await
    }

    async fn nls_database_parameter(&self, parameter: &str) -> Result<String> {
        let sql = format!(
            "SELECT VALUE FROM NLS_DATABASE_PARAMETERS WHERE PARAMETER = '{parameter}'"
        );
        self.query_one(sql)
            .await?
            .ok_or_else(|| anyhow!("oracle NLS parameter [{parameter}] is not set"))
    }

    /// Default collation of the schema owner (12.2+).
    pub async fn schema_collation(&self, schema: &str) -> Result<String> {
        let sql = format!(
            "SELECT DEFAULT_COLLATION FROM DBA_USERS WHERE USERNAME = '{}'",
            ident(schema)
        );
        self.query_one(sql)
            .await?
            .ok_or_else(|| anyhow!("oracle schema [{schema}] has no default collation"))
    }

    /// Per-table default collations of the schema (12.2+); tables inheriting
    /// the schema default report `USING_NLS_COMP`.
    pub async fn table_collations(&self, schema: &str) -> Result<HashMap<String, String>> {
        let sql = format!(
            "SELECT TABLE_NAME, DEFAULT_COLLATION FROM DBA_TABLES WHERE OWNER = '{}'",
            ident(schema)
        );
        let rows = self.query_rows(sql).await?;
        let mut map = HashMap::with_capacity(rows.len());
        for mut row in rows {
            if let (Some(name), Some(coll)) =
                (row.remove("TABLE_NAME"), row.remove("DEFAULT_COLLATION"))
            {
                map.insert(name, coll);
            }
        }
        Ok(map)
    }

    /// Current snapshot SCN from `V$DATABASE`.
    pub async fn current_scn(&self) -> Result<u64> {
        let scn = self
            .query_one("SELECT CURRENT_SCN FROM V$DATABASE".to_string())
            .await?
            .ok_or_else(|| anyhow!("V$DATABASE returned no CURRENT_SCN"))?;
        scn.parse::<u64>()
            .with_context(|| format!("parse CURRENT_SCN [{scn}]"))
    }

    pub async fn table_count(&self, schema: &str, table: &str) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(1) FROM \"{}\".\"{}\"",
            ident(schema),
            ident(table)
        );
        let count = self.query_one(sql).await?.unwrap_or_default();
        Ok(count.parse::<u64>().unwrap_or(0))
    }

    /// Split a table into ROWID ranges of roughly `chunk_blocks` data blocks
    /// by packing extent boundaries with `DBMS_ROWID.ROWID_CREATE`.
    pub async fn rowid_ranges(
        &self,
        schema: &str,
        table: &str,
        chunk_blocks: u64,
    ) -> Result<Vec<RowidRange>> {
        let chunk = chunk_blocks.max(1);
        let sql = format!(
            "SELECT DBMS_ROWID.ROWID_CREATE(1, DATA_OBJECT_ID, LO_FNO, LO_BLOCK, 0) AS START_ROWID, \
                    DBMS_ROWID.ROWID_CREATE(1, DATA_OBJECT_ID, HI_FNO, HI_BLOCK, 32767) AS END_ROWID \
               FROM (SELECT DISTINCT DATA_OBJECT_ID, GRP, \
                            FIRST_VALUE(RELATIVE_FNO) OVER (PARTITION BY DATA_OBJECT_ID, GRP ORDER BY RELATIVE_FNO, BLOCK_ID \
                              ROWS BETWEEN UNBOUNDED PRECEDING AND UNBOUNDED FOLLOWING) AS LO_FNO, \
                            FIRST_VALUE(BLOCK_ID) OVER (PARTITION BY DATA_OBJECT_ID, GRP ORDER BY RELATIVE_FNO, BLOCK_ID \
                              ROWS BETWEEN UNBOUNDED PRECEDING AND UNBOUNDED FOLLOWING) AS LO_BLOCK, \
                            LAST_VALUE(RELATIVE_FNO) OVER (PARTITION BY DATA_OBJECT_ID, GRP ORDER BY RELATIVE_FNO, BLOCK_ID \
                              ROWS BETWEEN UNBOUNDED PRECEDING AND UNBOUNDED FOLLOWING) AS HI_FNO, \
                            LAST_VALUE(BLOCK_ID + BLOCKS - 1) OVER (PARTITION BY DATA_OBJECT_ID, GRP ORDER BY RELATIVE_FNO, BLOCK_ID \
                              ROWS BETWEEN UNBOUNDED PRECEDING AND UNBOUNDED FOLLOWING) AS HI_BLOCK \
                       FROM (SELECT o.DATA_OBJECT_ID, e.RELATIVE_FNO, e.BLOCK_ID, e.BLOCKS, \
                                    TRUNC(SUM(e.BLOCKS) OVER (ORDER BY o.DATA_OBJECT_ID, e.RELATIVE_FNO, e.BLOCK_ID) / {chunk}) AS GRP \
                               FROM DBA_EXTENTS e \
                               JOIN DBA_OBJECTS o \
                                 ON o.OWNER = e.OWNER \
                                AND o.OBJECT_NAME = e.SEGMENT_NAME \
                                AND o.DATA_OBJECT_ID IS NOT NULL \
                              WHERE e.OWNER = '{}' AND e.SEGMENT_NAME = '{}')) \
              ORDER BY GRP",
            ident(schema),
            ident(table)
        );
        let rows = self.query_rows(sql).await?;
        let mut ranges = Vec::with_capacity(rows.len());
        for mut row in rows {
            let start = row
                .remove("START_ROWID")
                .ok_or_else(|| anyhow!("rowid range missing START_ROWID"))?;
            let end = row
                .remove("END_ROWID")
                .ok_or_else(|| anyhow!("rowid range missing END_ROWID"))?;
            ranges.push(RowidRange {
                start_rowid: start,
                end_rowid: end,
            });
        }
        Ok(ranges)
    }

    /// Projection list for full-load extraction. DATE / TIMESTAMP /
    /// INTERVAL columns are wrapped in `TO_CHAR` so rows round-trip as
    /// text; everything else is selected verbatim.
    pub async fn select_columns_with_shims(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<(Vec<String>, String)> {
        let sql = format!(
            "SELECT COLUMN_NAME, DATA_TYPE FROM DBA_TAB_COLUMNS \
              WHERE OWNER = '{}' AND TABLE_NAME = '{}' ORDER BY COLUMN_ID",
            ident(schema),
            ident(table)
        );
        let rows = self.query_rows(sql).await?;
        if rows.is_empty() {
            return Err(anyhow!("oracle table [{schema}.{table}] has no columns"));
        }

        let mut names = Vec::with_capacity(rows.len());
        let mut exprs = Vec::with_capacity(rows.len());
        for row in &rows {
            let name = row
                .get("COLUMN_NAME")
                .ok_or_else(|| anyhow!("column meta missing COLUMN_NAME"))?
                .clone();
            let data_type = row.get("DATA_TYPE").cloned().unwrap_or_default();
            let expr = shim_column(&name, &data_type);
            names.push(name);
            exprs.push(expr);
        }
        Ok((names, exprs.join(", ")))
    }

    /// Extract data rows for full load; cells come back as [`SqlValue`].
    pub async fn extract_rows(&self, sql: String) -> Result<Vec<Vec<SqlValue>>> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .statement(&sql)
                .build()
                .with_context(|| format!("oracle prepare [{sql}]"))?;
            let rows = stmt
                .query(&[])
                .with_context(|| format!("oracle query [{sql}]"))?;
            let width = rows.column_info().len();

            let mut out = Vec::new();
            for row in rows {
                let row = row?;
                let mut cells = Vec::with_capacity(width);
                for i in 0..width {
                    let value: Option<String> = row.get(i)?;
                    cells.push(SqlValue::from_raw(value));
                }
                out.push(cells);
            }
            Ok(out)
        })
        .await
    }
}

/// TO_CHAR shim for a single projection column.
fn shim_column(name: &str, data_type: &str) -> String {
    let dt = data_type.to_uppercase();
    if dt == "DATE" {
        format!("TO_CHAR(\"{name}\", 'yyyy-mm-dd hh24:mi:ss') AS \"{name}\"")
    } else if dt.starts_with("TIMESTAMP") {
        format!("TO_CHAR(\"{name}\", 'yyyy-mm-dd hh24:mi:ss.ff6') AS \"{name}\"")
    } else if dt.starts_with("INTERVAL") {
        format!("TO_CHAR(\"{name}\") AS \"{name}\"")
    } else {
        format!("\"{name}\"")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_and_interval_columns_get_to_char_shims() {
        assert_eq!(
            shim_column("HIRED", "DATE"),
            "TO_CHAR(\"HIRED\", 'yyyy-mm-dd hh24:mi:ss') AS \"HIRED\""
        );
        assert_eq!(
            shim_column("TS", "TIMESTAMP(6)"),
            "TO_CHAR(\"TS\", 'yyyy-mm-dd hh24:mi:ss.ff6') AS \"TS\""
        );
        assert_eq!(
            shim_column("SPAN", "INTERVAL DAY(2) TO SECOND(6)"),
            "TO_CHAR(\"SPAN\") AS \"SPAN\""
        );
        assert_eq!(shim_column("ID", "NUMBER"), "\"ID\"");
    }

    #[test]
    fn identifiers_fold_upper() {
        assert_eq!(ident("marvin"), "MARVIN");
        assert_eq!(ident("o'brien"), "OBRIEN");
    }
}
