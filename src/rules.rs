//! Mapping-rule resolution.
//!
//! Rules live in the metadata store and are loaded once per job into a
//! [`RuleSet`]. Resolution order when mapping an entity is column rule ->
//! table rule -> schema rule -> identity; every lookup key is upper case.

use anyhow::Result;
use std::collections::HashMap;

use crate::meta::MetaStore;

#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    target_schema: String,
    table_renames: HashMap<String, String>,
    /// table -> source column -> target column
    column_renames: HashMap<String, HashMap<String, String>>,
    /// table -> source column -> forced target type
    column_types: HashMap<String, HashMap<String, String>>,
    /// table -> source column -> forced default value
    column_defaults: HashMap<String, HashMap<String, String>>,
}

impl RuleSet {
    /// Load the three rule mappings for a schema. `default_target_schema`
    /// (from configuration) applies when no schema rule exists.
    pub async fn load(
        meta: &MetaStore,
        source_schema: &str,
        default_target_schema: &str,
    ) -> Result<Self> {
        let target_schema = meta
            .schema_rule(source_schema)
            .await?
            .unwrap_or_else(|| default_target_schema.to_string())
            .to_uppercase();

        let table_renames = meta
            .table_rules(source_schema)
            .await?
            .into_iter()
            .map(|(s, t)| (s.to_uppercase(), t.to_uppercase()))
            .collect();

        let mut column_renames: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut column_types: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut column_defaults: HashMap<String, HashMap<String, String>> = HashMap::new();
        for rule in meta.column_rules(source_schema).await? {
            let table = rule.source_table.to_uppercase();
            let column = rule.source_column.to_uppercase();
            if let Some(target) = rule.target_column {
                if !target.is_empty() {
                    column_renames
                        .entry(table.clone())
                        .or_default()
                        .insert(column.clone(), target.to_uppercase());
                }
            }
            if let Some(target) = rule.target_type {
                if !target.is_empty() {
                    column_types
                        .entry(table.clone())
                        .or_default()
                        .insert(column.clone(), target);
                }
            }
            if let Some(target) = rule.target_default {
                if !target.is_empty() {
                    column_defaults
                        .entry(table)
                        .or_default()
                        .insert(column, target);
                }
            }
        }

        Ok(Self {
            target_schema,
            table_renames,
            column_renames,
            column_types,
            column_defaults,
        })
    }

    /// A rule set with no overrides: every entity maps to itself under the
    /// given target schema.
    pub fn identity(target_schema: &str) -> Self {
        Self {
            target_schema: target_schema.to_uppercase(),
            ..Default::default()
        }
    }

    pub fn target_schema(&self) -> &str {
        &self.target_schema
    }

    pub fn target_table(&self, source_table: &str) -> String {
        let key = source_table.to_uppercase();
        self.table_renames.get(&key).cloned().unwrap_or(key)
    }

    pub fn target_column(&self, source_table: &str, source_column: &str) -> String {
        let column = source_column.to_uppercase();
        self.column_renames
            .get(&source_table.to_uppercase())
            .and_then(|m| m.get(&column))
            .cloned()
            .unwrap_or(column)
    }

    pub fn column_type_override(&self, source_table: &str, source_column: &str) -> Option<&str> {
        self.column_types
            .get(&source_table.to_uppercase())
            .and_then(|m| m.get(&source_column.to_uppercase()))
            .map(String::as_str)
    }

    pub fn column_default_override(
        &self,
        source_table: &str,
        source_column: &str,
    ) -> Option<&str> {
        self.column_defaults
            .get(&source_table.to_uppercase())
            .and_then(|m| m.get(&source_column.to_uppercase()))
            .map(String::as_str)
    }

    #[cfg(test)]
    pub(crate) fn for_tests(
        target_schema: &str,
        table_renames: &[(&str, &str)],
        column_renames: &[(&str, &str, &str)],
    ) -> Self {
        let mut set = Self::identity(target_schema);
        for (s, t) in table_renames {
            set.table_renames
                .insert(s.to_uppercase(), t.to_uppercase());
        }
        for (table, col, target) in column_renames {
            set.column_renames
                .entry(table.to_uppercase())
                .or_default()
                .insert(col.to_uppercase(), target.to_uppercase());
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_without_rules() {
        let rules = RuleSet::for_tests("SALES_T", &[], &[]);
        assert_eq!(rules.target_table("orders"), "ORDERS");
        assert_eq!(rules.target_column("orders", "amount"), "AMOUNT");
        assert_eq!(rules.target_schema(), "SALES_T");
    }

    #[test]
    fn column_rule_wins_over_table_rule() {
        let rules = RuleSet::for_tests(
            "SALES_T",
            &[("ORDERS", "ORDERS_NEW")],
            &[("ORDERS", "AMT", "AMOUNT")],
        );
        assert_eq!(rules.target_table("ORDERS"), "ORDERS_NEW");
        assert_eq!(rules.target_column("ORDERS", "AMT"), "AMOUNT");
        // Unruled columns fall back to identity even on renamed tables.
        assert_eq!(rules.target_column("ORDERS", "ID"), "ID");
    }
}
