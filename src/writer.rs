//! Output sinks for generated SQL.
//!
//! File mode appends to `reverse_<schema>.sql` / `compatibility_<schema>.sql`
//! (or `check_<schema>.sql`) in the working directory; opens are idempotent
//! and a mutex keeps concurrent table tasks from interleaving fragments.
//! Direct mode applies reversible statements straight to the target, one
//! statement per transaction, while the compatibility stream still goes to
//! file.

use anyhow::{Context, Result};
use comfy_table::{presets::UTF8_FULL, Table};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::mysql::MysqlClient;

/// Render the comment-block report table that precedes each DDL fragment.
pub fn render_report(header: &[&str], rows: &[Vec<String>]) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(header.to_vec());
    for row in rows {
        table.add_row(row.clone());
    }
    table.to_string()
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open output file [{}]", path.display()))
}

struct FileSinks {
    reverse: File,
    compatibility: File,
}

/// Sink pair used by the reverse job.
pub struct ReverseWriter {
    files: Mutex<FileSinks>,
    direct: Option<MysqlClient>,
    pub reverse_path: PathBuf,
    pub compatibility_path: PathBuf,
}

impl ReverseWriter {
    /// Open (or create) both sinks under `dir`. Pass a client to apply
    /// reversible statements directly instead of writing them to file.
    pub fn open(dir: &Path, schema: &str, direct: Option<MysqlClient>) -> Result<Self> {
        let reverse_path = dir.join(format!("reverse_{}.sql", schema.to_lowercase()));
        let compatibility_path = dir.join(format!("compatibility_{}.sql", schema.to_lowercase()));
        Ok(Self {
            files: Mutex::new(FileSinks {
                reverse: open_append(&reverse_path)?,
                compatibility: open_append(&compatibility_path)?,
            }),
            direct,
            reverse_path,
            compatibility_path,
        })
    }

    /// Emit one table's reversible stream: a comment block followed by its
    /// statements. In direct mode the statements run against the target one
    /// by one and nothing is written to the reverse file.
    pub async fn emit_reversible(&self, comment: &str, statements: &[String]) -> Result<()> {
        if statements.is_empty() && comment.is_empty() {
            return Ok(());
        }
        match &self.direct {
            Some(client) => {
                for stmt in statements {
                    client.exec_statement(stmt.trim_end_matches(';')).await?;
                }
            }
            None => {
                let mut sinks = self.files.lock().expect("writer mutex poisoned");
                write_fragment(&mut sinks.reverse, comment, statements)?;
            }
        }
        Ok(())
    }

    /// Emit one table's compatibility stream; always file-backed.
    pub fn emit_compatibility(&self, comment: &str, statements: &[String]) -> Result<()> {
        if statements.is_empty() && comment.is_empty() {
            return Ok(());
        }
        let mut sinks = self.files.lock().expect("writer mutex poisoned");
        write_fragment(&mut sinks.compatibility, comment, statements)
    }
}

/// Single-file sink used by the check job.
pub struct CheckWriter {
    file: Mutex<File>,
    pub path: PathBuf,
}

impl CheckWriter {
    pub fn open(dir: &Path, schema: &str) -> Result<Self> {
        let path = dir.join(format!("check_{}.sql", schema.to_lowercase()));
        Ok(Self {
            file: Mutex::new(open_append(&path)?),
            path,
        })
    }

    pub fn emit(&self, comment: &str, statements: &[String]) -> Result<()> {
        if statements.is_empty() && comment.is_empty() {
            return Ok(());
        }
        let mut file = self.file.lock().expect("writer mutex poisoned");
        write_fragment(&mut file, comment, statements)
    }
}

fn write_fragment(file: &mut File, comment: &str, statements: &[String]) -> Result<()> {
    let mut buf = String::new();
    if !comment.is_empty() {
        buf.push_str("/*\n");
        buf.push_str(comment.trim_end());
        buf.push_str("\n*/\n");
    }
    if !statements.is_empty() {
        buf.push_str(&statements.join("\n"));
        buf.push('\n');
    }
    buf.push('\n');
    file.write_all(buf.as_bytes()).context("write sql fragment")?;
    file.flush().context("flush sql fragment")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reverse_writer_appends_without_interleaving() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReverseWriter::open(dir.path(), "SALES", None).unwrap();

        writer
            .emit_reversible(
                "table report",
                &["CREATE TABLE `sales`.`orders` (\n`id` INT\n);".to_string()],
            )
            .await
            .unwrap();
        writer
            .emit_compatibility(
                "compat report",
                &["ALTER TABLE `sales`.`orders` ADD CONSTRAINT `fk` FOREIGN KEY (`d`) REFERENCES `sales`.`dept`(`id`);".to_string()],
            )
            .unwrap();

        let reverse = std::fs::read_to_string(&writer.reverse_path).unwrap();
        assert!(reverse.starts_with("/*\ntable report\n*/\n"));
        assert!(reverse.contains("CREATE TABLE `sales`.`orders`"));
        assert!(!reverse.contains("FOREIGN KEY"));

        let compat = std::fs::read_to_string(&writer.compatibility_path).unwrap();
        assert!(compat.contains("FOREIGN KEY"));
    }

    #[tokio::test]
    async fn reopening_appends_instead_of_truncating() {
        let dir = tempfile::tempdir().unwrap();
        {
            let writer = CheckWriter::open(dir.path(), "SALES").unwrap();
            writer.emit("", &["ALTER TABLE `t` ADD COLUMN `a` INT;".to_string()]).unwrap();
        }
        {
            let writer = CheckWriter::open(dir.path(), "SALES").unwrap();
            writer.emit("", &["ALTER TABLE `t` ADD COLUMN `b` INT;".to_string()]).unwrap();
        }
        let content =
            std::fs::read_to_string(dir.path().join("check_sales.sql")).unwrap();
        assert!(content.contains("`a` INT"));
        assert!(content.contains("`b` INT"));
    }

    #[test]
    fn report_renders_a_bordered_table() {
        let rendered = render_report(
            &["#", "ORACLE", "MYSQL", "SUGGEST"],
            &[vec![
                "TABLE".to_string(),
                "SALES.ORDERS".to_string(),
                "sales.orders".to_string(),
                "Create Table".to_string(),
            ]],
        );
        assert!(rendered.contains("ORACLE"));
        assert!(rendered.contains("SALES.ORDERS"));
    }
}
