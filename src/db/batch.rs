//! A parameter-capped batched row inserter.
//!
//! SQLite limits a single statement to 999 host parameters, so the
//! inserter buffers `⌊999 / numColumns⌋ · numColumns` positional
//! parameters and issues one multi-row INSERT per flush. Placeholder
//! groups are built once up front; a flush uses the prefix matching
//! the buffered row count.

use anyhow::{Context, Result};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};

/// Maximum number of host parameters in one SQLite statement.
pub const MAX_SQLITE_PARAMETERS: usize = 999;

pub struct BatchInserter<'a> {
    conn: &'a Connection,
    num_columns: usize,
    max_batch_size: usize,
    batch: Vec<Value>,
    query_prefix: String,
    query_placeholders: Vec<String>,
}

impl<'a> BatchInserter<'a> {
    pub fn new(conn: &'a Connection, table_name: &str, column_names: &[&str]) -> Self {
        let num_columns = column_names.len();
        let max_batch_size = (MAX_SQLITE_PARAMETERS / num_columns) * num_columns;

        let group = format!("({})", vec!["?"; num_columns].join(","));
        let query_placeholders = vec![group; max_batch_size / num_columns];

        let quoted_columns: Vec<String> = column_names
            .iter()
            .map(|name| format!("\"{name}\""))
            .collect();
        let query_prefix = format!(
            "INSERT INTO \"{table_name}\" ({}) VALUES ",
            quoted_columns.join(",")
        );

        BatchInserter {
            conn,
            num_columns,
            max_batch_size,
            batch: Vec::with_capacity(max_batch_size),
            query_prefix,
            query_placeholders,
        }
    }

    /// Buffer one row, flushing if the parameter budget is reached.
    pub fn insert(&mut self, values: Vec<Value>) -> Result<()> {
        anyhow::ensure!(
            values.len() == self.num_columns,
            "expected {} values, got {}",
            self.num_columns,
            values.len()
        );

        self.batch.extend(values);

        if self.batch.len() >= self.max_batch_size {
            return self.flush();
        }

        Ok(())
    }

    /// Write out all buffered rows. A no-op when the buffer is empty.
    pub fn flush(&mut self) -> Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }

        let batch = std::mem::take(&mut self.batch);
        let num_rows = batch.len() / self.num_columns;
        let query = format!(
            "{}{}",
            self.query_prefix,
            self.query_placeholders[..num_rows].join(",")
        );

        self.conn
            .execute(&query, params_from_iter(batch))
            .with_context(|| format!("flush batch of {num_rows} rows"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE wide (c1, c2, c3, c4, c5, c6, c7);
             CREATE TABLE narrow (c1, c2);",
        )
        .unwrap();
        conn
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    fn wide_row(i: i64) -> Vec<Value> {
        (0..7).map(|c| Value::Integer(i * 10 + c)).collect()
    }

    #[test]
    fn test_flushes_at_parameter_cap() {
        let conn = test_conn();
        let mut inserter = BatchInserter::new(&conn, "wide", &["c1", "c2", "c3", "c4", "c5", "c6", "c7"]);

        // 999 / 7 = 142 rows per statement.
        for i in 0..141 {
            inserter.insert(wide_row(i)).unwrap();
        }
        assert_eq!(count(&conn, "wide"), 0);

        inserter.insert(wide_row(141)).unwrap();
        assert_eq!(count(&conn, "wide"), 142);

        inserter.insert(wide_row(142)).unwrap();
        assert_eq!(count(&conn, "wide"), 142);

        inserter.flush().unwrap();
        assert_eq!(count(&conn, "wide"), 143);
    }

    #[test]
    fn test_partial_flush_uses_exact_row_count() {
        let conn = test_conn();
        let mut inserter = BatchInserter::new(&conn, "narrow", &["c1", "c2"]);

        for i in 0..3 {
            inserter
                .insert(vec![Value::Integer(i), Value::Text(format!("v{i}"))])
                .unwrap();
        }
        inserter.flush().unwrap();
        assert_eq!(count(&conn, "narrow"), 3);

        let values: Vec<(i64, String)> = conn
            .prepare("SELECT c1, c2 FROM narrow ORDER BY c1")
            .unwrap()
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(
            values,
            vec![(0, "v0".into()), (1, "v1".into()), (2, "v2".into())]
        );
    }

    #[test]
    fn test_empty_flush_is_a_noop() {
        let conn = test_conn();
        let mut inserter = BatchInserter::new(&conn, "narrow", &["c1", "c2"]);
        inserter.flush().unwrap();
        assert_eq!(count(&conn, "narrow"), 0);
    }

    #[test]
    fn test_wrong_column_count_is_rejected() {
        let conn = test_conn();
        let mut inserter = BatchInserter::new(&conn, "narrow", &["c1", "c2"]);
        assert!(inserter.insert(vec![Value::Integer(1)]).is_err());
    }
}
