// Copyright 2025 Fernando Borretti
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Read-only access to the collection database embedded in a package.

use std::error::Error;
use std::fmt::Display;
use std::fmt::Formatter;
use std::io::Write;

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::types::Value;
use tempfile::NamedTempFile;

/// Every SQLite file starts with this header.
const SQLITE_MAGIC: &[u8] = b"SQLite format 3\0";

/// The only way reading the collection database can fail. Driver errors are
/// folded into this so callers never see schema or engine details.
#[derive(Debug, PartialEq)]
pub enum DbError {
    UnsupportedFormat { reason: String },
}

impl DbError {
    fn unsupported(reason: impl Into<String>) -> Self {
        DbError::UnsupportedFormat {
            reason: reason.into(),
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        DbError::unsupported(value.to_string())
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DbError::UnsupportedFormat { reason } => {
                write!(f, "unsupported collection database: {reason}")
            }
        }
    }
}

impl Error for DbError {}

/// A single result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row(Vec<Value>);

impl Row {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn get(&self, idx: usize) -> Result<&Value, DbError> {
        self.0
            .get(idx)
            .ok_or_else(|| DbError::unsupported(format!("missing column {idx}")))
    }

    pub fn int(&self, idx: usize) -> Result<i64, DbError> {
        match self.get(idx)? {
            Value::Integer(value) => Ok(*value),
            Value::Real(value) => Ok(*value as i64),
            Value::Text(value) => value
                .trim()
                .parse()
                .map_err(|_| DbError::unsupported(format!("column {idx} is not an integer"))),
            other => Err(DbError::unsupported(format!(
                "column {idx} is not an integer: {other:?}"
            ))),
        }
    }

    /// Text columns. Blobs holding UTF-8 are accepted since older clients
    /// stored some text columns as blobs.
    pub fn text(&self, idx: usize) -> Result<String, DbError> {
        match self.get(idx)? {
            Value::Text(value) => Ok(value.clone()),
            Value::Blob(bytes) => String::from_utf8(bytes.clone())
                .map_err(|_| DbError::unsupported(format!("column {idx} is not valid UTF-8"))),
            Value::Null => Ok(String::new()),
            Value::Integer(value) => Ok(value.to_string()),
            Value::Real(value) => Ok(value.to_string()),
        }
    }

    pub fn blob(&self, idx: usize) -> Result<Vec<u8>, DbError> {
        match self.get(idx)? {
            Value::Blob(bytes) => Ok(bytes.clone()),
            Value::Text(value) => Ok(value.as_bytes().to_vec()),
            Value::Null => Ok(Vec::new()),
            other => Err(DbError::unsupported(format!(
                "column {idx} is not a blob: {other:?}"
            ))),
        }
    }
}

/// Handle to a collection database.
///
/// The bytes are staged in a private temporary file so SQLite can page
/// through them; the file is removed when the handle is dropped.
pub struct Database {
    conn: Connection,
    // Declared after `conn` so the connection closes before the file goes.
    _file: NamedTempFile,
}

impl Database {
    /// Open a database from the raw bytes of a SQLite file.
    pub fn open(bytes: &[u8]) -> Result<Self, DbError> {
        if !bytes.starts_with(SQLITE_MAGIC) {
            return Err(DbError::unsupported("not a SQLite database"));
        }
        let mut file = NamedTempFile::new()
            .map_err(|e| DbError::unsupported(format!("cannot stage database: {e}")))?;
        file.write_all(bytes)
            .and_then(|_| file.flush())
            .map_err(|e| DbError::unsupported(format!("cannot stage database: {e}")))?;
        let conn = Connection::open(file.path())?;
        conn.pragma_update(None, "query_only", true)?;
        // Touch the schema so a truncated file fails here rather than halfway
        // through the import.
        conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        })?;
        Ok(Self { conn, _file: file })
    }

    /// Run a read statement and collect every row.
    pub fn query(&self, sql: &str) -> Result<Vec<Row>, DbError> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns = stmt.column_count();
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns);
            for idx in 0..columns {
                values.push(row.get::<_, Value>(idx)?);
            }
            out.push(Row(values));
        }
        Ok(out)
    }

    /// Whether the schema contains a table with the given name.
    pub fn has_table(&self, name: &str) -> Result<bool, DbError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn close(self) -> Result<(), DbError> {
        let Database { conn, _file } = self;
        conn.close().map_err(|(_, e)| DbError::from(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Fallible;
    use crate::helper::create_tmp_directory;

    fn sample_database() -> Fallible<Vec<u8>> {
        let dir = create_tmp_directory()?;
        let path = dir.join("sample.db");
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "CREATE TABLE notes (id integer primary key, flds text not null, data blob);
             INSERT INTO notes VALUES (1, 'front\x1fback', x'0102');
             INSERT INTO notes VALUES (2, 'a\x1fb', NULL);",
        )?;
        conn.close().map_err(|(_, e)| e)?;
        Ok(std::fs::read(&path)?)
    }

    #[test]
    fn test_rejects_non_database() {
        let result = Database::open(b"definitely not sqlite");
        assert!(matches!(result, Err(DbError::UnsupportedFormat { .. })));
    }

    #[test]
    fn test_rejects_truncated_database() -> Fallible<()> {
        let bytes = sample_database()?;
        let result = Database::open(&bytes[..SQLITE_MAGIC.len() + 4]);
        assert!(matches!(result, Err(DbError::UnsupportedFormat { .. })));
        Ok(())
    }

    #[test]
    fn test_query_rows() -> Fallible<()> {
        let db = Database::open(&sample_database()?)?;
        let rows = db.query("SELECT id, flds, data FROM notes ORDER BY id")?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].int(0)?, 1);
        assert_eq!(rows[0].text(1)?, "front\u{1f}back");
        assert_eq!(rows[0].blob(2)?, vec![1, 2]);
        assert_eq!(rows[1].blob(2)?, Vec::<u8>::new());
        db.close()?;
        Ok(())
    }

    #[test]
    fn test_has_table() -> Fallible<()> {
        let db = Database::open(&sample_database()?)?;
        assert!(db.has_table("notes")?);
        assert!(!db.has_table("notetypes")?);
        Ok(())
    }

    #[test]
    fn test_driver_errors_are_unsupported_format() -> Fallible<()> {
        let db = Database::open(&sample_database()?)?;
        let result = db.query("SELECT * FROM col");
        assert!(matches!(result, Err(DbError::UnsupportedFormat { .. })));
        Ok(())
    }

    #[test]
    fn test_writes_are_refused() -> Fallible<()> {
        let db = Database::open(&sample_database()?)?;
        assert!(db.query("DELETE FROM notes").is_err());
        Ok(())
    }

    #[test]
    fn test_type_mismatch() -> Fallible<()> {
        let db = Database::open(&sample_database()?)?;
        let rows = db.query("SELECT data FROM notes WHERE id = 1")?;
        assert!(rows[0].int(0).is_err());
        Ok(())
    }
}
