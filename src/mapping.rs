//! Oracle to MySQL type, collation, charset and default-value mapping.
//!
//! The mapping table follows the usual o2m conventions: exact numerics
//! bucket into integer types by precision, character types normalize their
//! length unit, LOBs widen to LONGTEXT/LONGBLOB, temporal types land on
//! DATETIME. Constructs MySQL cannot represent faithfully carry a
//! compatibility note that the reverser routes into the report stream.

use anyhow::{anyhow, bail, Result};

use crate::rules::RuleSet;
use crate::types::{CatalogRow, SqlValue};

/// MySQL character set every generated object uses.
pub const MYSQL_CHARACTER_SET: &str = "utf8mb4";

/// Oracle database character sets we accept, with their MySQL equivalent.
pub fn mysql_charset_for(oracle_charset: &str) -> Result<&'static str> {
    match oracle_charset.to_uppercase().as_str() {
        "AL32UTF8" | "UTF8" => Ok("utf8mb4"),
        "ZHS16GBK" => Ok("gbk"),
        other => bail!("oracle database character set [{other}] is not supported"),
    }
}

/// Oracle collation to MySQL collation.
///
/// MySQL has no case- or accent-insensitive *binary* collation, so both
/// BINARY and BINARY_CI land on `utf8mb4_bin`; BINARY_AI keeps at least
/// case-insensitivity via `utf8mb4_general_ci`. Unknown collations are a
/// hard error rather than a silent fallback.
pub fn mysql_collation_for(oracle_collation: &str) -> Result<&'static str> {
    match oracle_collation.to_uppercase().as_str() {
        "BINARY" | "BINARY_CI" => Ok("utf8mb4_bin"),
        "BINARY_AI" => Ok("utf8mb4_general_ci"),
        other => bail!("oracle collation [{other}] is not supported"),
    }
}

/// Marker Oracle uses for "inherit the surrounding collation".
const USING_NLS_COMP: &str = "USING_NLS_COMP";

/// Resolve the effective MySQL collation for a column.
///
/// On instances with per-column collation support the resolution walks
/// column -> table -> schema, skipping levels set to `USING_NLS_COMP`, and
/// bottoms out at the database NLS_COMP. Older instances go straight to
/// NLS_COMP.
pub fn resolve_collation(
    oracle_collation: bool,
    column: Option<&str>,
    table: Option<&str>,
    schema: Option<&str>,
    nls_comp: &str,
) -> Result<&'static str> {
    let effective = if oracle_collation {
        [column, table, schema]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|c| !c.is_empty() && !c.eq_ignore_ascii_case(USING_NLS_COMP))
            .unwrap_or(nls_comp)
    } else {
        nls_comp
    };
    mysql_collation_for(effective)
}

/// One Oracle column as read from `DBA_TAB_COLUMNS`.
#[derive(Debug, Clone, Default)]
pub struct OracleColumn {
    pub name: String,
    pub data_type: String,
    pub char_length: u32,
    pub precision: Option<i32>,
    pub scale: Option<i32>,
    pub nullable: bool,
    /// Raw DATA_DEFAULT text; `None` when the column has no default.
    pub default: Option<String>,
    /// Column-level collation on 12.2+ instances.
    pub collation: Option<String>,
    pub comment: Option<String>,
}

impl OracleColumn {
    /// Parse a catalog row (see
    /// [`crate::oracle::OracleClient::column_meta`]).
    pub fn from_catalog_row(row: &CatalogRow) -> Result<Self> {
        let get = |key: &str| -> SqlValue {
            row.get(key)
                .map(|v| SqlValue::from_catalog(v))
                .unwrap_or(SqlValue::Null)
        };
        let text = |key: &str| -> Option<String> {
            match get(key) {
                SqlValue::Text(s) => Some(s),
                _ => None,
            }
        };
        let number = |key: &str| -> Option<i32> { text(key).and_then(|s| s.trim().parse().ok()) };

        let name = text("COLUMN_NAME")
            .ok_or_else(|| anyhow!("column meta row missing COLUMN_NAME"))?;
        let data_type = text("DATA_TYPE")
            .ok_or_else(|| anyhow!("column meta row missing DATA_TYPE for [{name}]"))?;

        Ok(Self {
            name,
            data_type,
            char_length: number("CHAR_LENGTH").unwrap_or(0).max(0) as u32,
            precision: number("DATA_PRECISION"),
            scale: number("DATA_SCALE"),
            nullable: text("NULLABLE").map(|n| n == "Y").unwrap_or(true),
            default: text("DATA_DEFAULT").map(|d| d.trim().to_string()),
            collation: text("COLLATION"),
            comment: None,
        })
    }
}

/// A column after mapping, ready for DDL rendering.
#[derive(Debug, Clone)]
pub struct MappedColumn {
    pub name: String,
    pub target_type: String,
    pub collation: Option<String>,
    pub nullable: bool,
    pub default: Option<String>,
    pub comment: Option<String>,
    /// Set when the source construct loses semantics on MySQL; the reverser
    /// reports it in the compatibility stream.
    pub compatibility: Option<String>,
}

/// Collation environment of the table being mapped.
#[derive(Debug, Clone, Copy)]
pub struct CollationEnv<'a> {
    /// Instance supports per-column collations (Oracle >= 12.2).
    pub oracle_collation: bool,
    pub schema_collation: Option<&'a str>,
    pub table_collation: Option<&'a str>,
    pub nls_comp: &'a str,
}

/// Map one Oracle column, consulting the rule set for overrides.
pub fn map_column(
    col: &OracleColumn,
    table: &str,
    rules: &RuleSet,
    env: &CollationEnv<'_>,
) -> Result<MappedColumn> {
    let name = rules.target_column(table, &col.name);

    let (target_type, compatibility) = match rules.column_type_override(table, &col.name) {
        Some(forced) => (forced.to_string(), None),
        None => map_data_type(col)
            .map_err(|e| anyhow!("column [{}.{}]: {e}", table, col.name))?,
    };

    let collation = if is_character_type(&col.data_type) {
        Some(
            resolve_collation(
                env.oracle_collation,
                col.collation.as_deref(),
                env.table_collation,
                env.schema_collation,
                env.nls_comp,
            )
            .map_err(|e| anyhow!("column [{}.{}]: {e}", table, col.name))?
            .to_string(),
        )
    } else {
        None
    };

    let default = map_default(
        col.default.as_deref(),
        rules.column_default_override(table, &col.name),
    );

    Ok(MappedColumn {
        name,
        target_type,
        collation,
        nullable: col.nullable,
        default,
        comment: col.comment.clone(),
        compatibility,
    })
}

/// Map an Oracle data type to its MySQL rendering. The second element is a
/// compatibility note when the translation is lossy.
pub fn map_data_type(col: &OracleColumn) -> Result<(String, Option<String>)> {
    let dt = col.data_type.trim().to_uppercase();

    let mapped = match dt.as_str() {
        "NUMBER" => (map_number(col.precision, col.scale), None),
        "FLOAT" | "BINARY_DOUBLE" | "REAL" => ("DOUBLE".to_string(), None),
        "BINARY_FLOAT" => ("FLOAT".to_string(), None),
        "VARCHAR2" | "NVARCHAR2" | "VARCHAR" => {
            (format!("VARCHAR({})", col.char_length.max(1)), None)
        }
        "CHAR" | "NCHAR" => {
            let n = col.char_length.max(1);
            if n <= 255 {
                (format!("CHAR({n})"), None)
            } else {
                (format!("VARCHAR({n})"), None)
            }
        }
        "CLOB" | "NCLOB" | "LONG" | "XMLTYPE" => ("LONGTEXT".to_string(), None),
        "BLOB" | "RAW" | "LONG RAW" => ("LONGBLOB".to_string(), None),
        "ROWID" | "UROWID" => ("VARCHAR(18)".to_string(), None),
        "DATE" => ("DATETIME".to_string(), None),
        _ if dt.starts_with("TIMESTAMP") => {
            // Fractional-second precision arrives in DATA_SCALE.
            let precision = col.scale.unwrap_or(6).clamp(0, 6);
            let target = format!("DATETIME({precision})");
            if dt.contains("TIME ZONE") {
                let note = format!(
                    "column [{}] type [{}]: time zone semantics are not preserved on MySQL",
                    col.name, col.data_type
                );
                (target, Some(note))
            } else {
                (target, None)
            }
        }
        _ if dt.starts_with("INTERVAL") => {
            let note = format!(
                "column [{}] type [{}]: interval values are stored as literal text, \
                 e.g. '+01 02:03:04.000000'",
                col.name, col.data_type
            );
            ("VARCHAR(30)".to_string(), Some(note))
        }
        other => bail!("oracle data type [{other}] has no mysql mapping"),
    };
    Ok(mapped)
}

/// NUMBER(p,s) bucketing. Scale zero buckets into integer widths; a bare
/// NUMBER keeps maximum decimal range.
fn map_number(precision: Option<i32>, scale: Option<i32>) -> String {
    match (precision, scale) {
        (None, None) => "DECIMAL(65,30)".to_string(),
        (p, Some(s)) if s > 0 => format!("DECIMAL({},{s})", p.unwrap_or(38).clamp(1, 65)),
        (Some(p), _) => {
            let p = p.clamp(1, 65);
            match p {
                1..=2 => "TINYINT".to_string(),
                3..=4 => "SMALLINT".to_string(),
                5..=10 => "INT".to_string(),
                11..=19 => "BIGINT".to_string(),
                _ => format!("DECIMAL({p},0)"),
            }
        }
        (None, Some(_)) => "DECIMAL(38,0)".to_string(),
    }
}

fn is_character_type(data_type: &str) -> bool {
    matches!(
        data_type.trim().to_uppercase().as_str(),
        "VARCHAR2" | "NVARCHAR2" | "VARCHAR" | "CHAR" | "NCHAR" | "CLOB" | "NCLOB" | "LONG"
    )
}

/// Rewrite an Oracle default expression for MySQL. A rule override wins
/// outright; otherwise SYSDATE-family functions become CURRENT_TIMESTAMP
/// and Oracle's double-quoted function names lose their quoting.
pub fn map_default(raw: Option<&str>, rule_override: Option<&str>) -> Option<String> {
    if let Some(forced) = rule_override {
        return Some(forced.to_string());
    }
    let raw = raw?.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("NULL") {
        return None;
    }
    if raw.eq_ignore_ascii_case("SYSDATE") {
        return Some("CURRENT_TIMESTAMP".to_string());
    }
    if raw.eq_ignore_ascii_case("SYSTIMESTAMP") {
        return Some("CURRENT_TIMESTAMP(6)".to_string());
    }
    // `"SCHEMA"."SEQ"."NEXTVAL"`-style quoting has no MySQL meaning.
    if raw.contains('"') {
        return Some(raw.replace('"', ""));
    }
    Some(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn number_col(precision: Option<i32>, scale: Option<i32>) -> OracleColumn {
        OracleColumn {
            name: "N".into(),
            data_type: "NUMBER".into(),
            precision,
            scale,
            nullable: true,
            ..Default::default()
        }
    }

    #[test]
    fn number_buckets_by_precision_at_scale_zero() {
        let cases = [
            (Some(2), "TINYINT"),
            (Some(4), "SMALLINT"),
            (Some(10), "INT"),
            (Some(19), "BIGINT"),
            (Some(24), "DECIMAL(24,0)"),
        ];
        for (p, expected) in cases {
            let (mapped, note) = map_data_type(&number_col(p, Some(0))).unwrap();
            assert_eq!(mapped, expected, "NUMBER({},0)", p.unwrap());
            assert!(note.is_none());
        }
    }

    #[test]
    fn number_with_scale_and_bare_number() {
        let (mapped, _) = map_data_type(&number_col(Some(20), Some(4))).unwrap();
        assert_eq!(mapped, "DECIMAL(20,4)");
        let (mapped, _) = map_data_type(&number_col(None, None)).unwrap();
        assert_eq!(mapped, "DECIMAL(65,30)");
    }

    #[test]
    fn character_types_normalize_length_unit() {
        let col = OracleColumn {
            name: "NAME".into(),
            data_type: "VARCHAR2".into(),
            char_length: 64,
            nullable: true,
            ..Default::default()
        };
        assert_eq!(map_data_type(&col).unwrap().0, "VARCHAR(64)");

        let col = OracleColumn {
            name: "CODE".into(),
            data_type: "NVARCHAR2".into(),
            char_length: 10,
            ..Default::default()
        };
        assert_eq!(map_data_type(&col).unwrap().0, "VARCHAR(10)");

        let col = OracleColumn {
            name: "FLAG".into(),
            data_type: "CHAR".into(),
            char_length: 1,
            ..Default::default()
        };
        assert_eq!(map_data_type(&col).unwrap().0, "CHAR(1)");
    }

    #[test]
    fn lobs_and_raw() {
        for (dt, expected) in [
            ("CLOB", "LONGTEXT"),
            ("NCLOB", "LONGTEXT"),
            ("BLOB", "LONGBLOB"),
            ("RAW", "LONGBLOB"),
            ("LONG RAW", "LONGBLOB"),
        ] {
            let col = OracleColumn {
                name: "X".into(),
                data_type: dt.into(),
                ..Default::default()
            };
            assert_eq!(map_data_type(&col).unwrap().0, expected, "{dt}");
        }
    }

    #[test]
    fn temporal_types() {
        let col = OracleColumn {
            name: "D".into(),
            data_type: "DATE".into(),
            ..Default::default()
        };
        assert_eq!(map_data_type(&col).unwrap().0, "DATETIME");

        let col = OracleColumn {
            name: "TS".into(),
            data_type: "TIMESTAMP(6)".into(),
            scale: Some(6),
            ..Default::default()
        };
        let (mapped, note) = map_data_type(&col).unwrap();
        assert_eq!(mapped, "DATETIME(6)");
        assert!(note.is_none());

        // Precision above MySQL's maximum clamps to 6.
        let col = OracleColumn {
            name: "TS".into(),
            data_type: "TIMESTAMP(9)".into(),
            scale: Some(9),
            ..Default::default()
        };
        assert_eq!(map_data_type(&col).unwrap().0, "DATETIME(6)");

        let col = OracleColumn {
            name: "TS".into(),
            data_type: "TIMESTAMP(6) WITH TIME ZONE".into(),
            scale: Some(6),
            ..Default::default()
        };
        let (_, note) = map_data_type(&col).unwrap();
        assert!(note.unwrap().contains("time zone"));

        let col = OracleColumn {
            name: "SPAN".into(),
            data_type: "INTERVAL DAY(2) TO SECOND(6)".into(),
            ..Default::default()
        };
        let (mapped, note) = map_data_type(&col).unwrap();
        assert_eq!(mapped, "VARCHAR(30)");
        assert!(note.unwrap().contains("literal text"));
    }

    #[test]
    fn unknown_type_is_an_error() {
        let col = OracleColumn {
            name: "G".into(),
            data_type: "SDO_GEOMETRY".into(),
            ..Default::default()
        };
        assert!(map_data_type(&col).is_err());
    }

    #[test]
    fn collation_resolution_walks_column_table_schema() {
        // Column-level wins.
        assert_eq!(
            resolve_collation(true, Some("BINARY_CI"), Some("BINARY"), None, "BINARY").unwrap(),
            "utf8mb4_bin"
        );
        // USING_NLS_COMP at column level defers to the table.
        assert_eq!(
            resolve_collation(
                true,
                Some("USING_NLS_COMP"),
                Some("BINARY_AI"),
                Some("BINARY"),
                "BINARY"
            )
            .unwrap(),
            "utf8mb4_general_ci"
        );
        // Everything inherited: database NLS_COMP decides.
        assert_eq!(
            resolve_collation(
                true,
                Some("USING_NLS_COMP"),
                Some("USING_NLS_COMP"),
                Some("USING_NLS_COMP"),
                "BINARY_CI"
            )
            .unwrap(),
            "utf8mb4_bin"
        );
        // Pre-12.2 instance ignores the levels entirely.
        assert_eq!(
            resolve_collation(false, Some("BINARY_AI"), None, None, "BINARY").unwrap(),
            "utf8mb4_bin"
        );
        // Unknown collation is a hard error, not a fallback.
        assert!(resolve_collation(true, Some("FRENCH"), None, None, "BINARY").is_err());
    }

    #[test]
    fn default_rewrites() {
        assert_eq!(
            map_default(Some("SYSDATE"), None).as_deref(),
            Some("CURRENT_TIMESTAMP")
        );
        assert_eq!(map_default(Some("'N/A' "), None).as_deref(), Some("'N/A'"));
        assert_eq!(map_default(Some("NULL"), None), None);
        assert_eq!(map_default(None, None), None);
        assert_eq!(
            map_default(Some("\"MY_FUNC\"()"), None).as_deref(),
            Some("MY_FUNC()")
        );
        // Rule override wins over everything.
        assert_eq!(
            map_default(Some("SYSDATE"), Some("'1970-01-01'")).as_deref(),
            Some("'1970-01-01'")
        );
    }

    #[test]
    fn charset_allow_list() {
        assert_eq!(mysql_charset_for("AL32UTF8").unwrap(), "utf8mb4");
        assert_eq!(mysql_charset_for("ZHS16GBK").unwrap(), "gbk");
        assert!(mysql_charset_for("WE8ISO8859P1").is_err());
    }
}
