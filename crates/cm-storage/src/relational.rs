use std::collections::HashMap;
use std::path::Path;

use chrono::{SecondsFormat, Utc};
use cm_core::{MemoryMeta, MemoryRecord, NoteStatus, Scope, SymbolRef};
use rusqlite::{params, Connection, Row};

use crate::error::StorageError;

/// Current memory-store schema version. Increment when schema changes.
const SCHEMA_VERSION: u32 = 1;

/// SQLite-backed index of memories and their symbol references.
///
/// Owns the `memories` and `memory_symbols` tables. The `projects`, `files`,
/// and `symbols` tables belong to the surrounding code index and are only
/// queried, never created, here. All operations are scoped to one project.
pub struct RelationalStore {
    conn: Connection,
    project_id: i64,
}

impl RelationalStore {
    /// Open or create the memory tables in the database at `db_path`.
    pub fn open(db_path: &Path, project_id: i64) -> Result<Self, StorageError> {
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn, project_id)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory(project_id: i64) -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, project_id)
    }

    /// Wrap an existing connection, creating the memory tables if needed.
    ///
    /// Fails with `SchemaMismatch` when the stored version is from a newer
    /// build; migration is the caller's concern.
    pub fn from_connection(conn: Connection, project_id: i64) -> Result<Self, StorageError> {
        configure_pragmas(&conn)?;

        let stored_version = get_user_version(&conn)?;
        if stored_version != 0 && stored_version != SCHEMA_VERSION {
            return Err(StorageError::SchemaMismatch {
                expected: SCHEMA_VERSION,
                actual: stored_version,
            });
        }

        create_schema(&conn)?;
        set_user_version(&conn, SCHEMA_VERSION)?;

        Ok(Self { conn, project_id })
    }

    pub fn project_id(&self) -> i64 {
        self.project_id
    }

    /// Insert or update the row keyed by `(project_id, md_rel_path)` and
    /// replace its symbol children, all in one transaction.
    ///
    /// Returns the memory row id.
    pub fn upsert_memory(
        &mut self,
        meta: &MemoryMeta,
        md_rel_path: &str,
        body_hash: &str,
    ) -> Result<i64, StorageError> {
        let now = now_rfc3339();
        let tx = self.conn.transaction()?;

        let existing: Option<i64> = {
            let mut stmt = tx.prepare_cached(
                "SELECT id FROM memories WHERE project_id = ?1 AND md_rel_path = ?2",
            )?;
            let mut rows = stmt.query(params![self.project_id, md_rel_path])?;
            match rows.next()? {
                Some(row) => Some(row.get(0)?),
                None => None,
            }
        };

        let row_id = match existing {
            Some(id) => {
                tx.prepare_cached(
                    "UPDATE memories SET \
                     memory_uid = ?2, scope = ?3, file_path = ?4, title = ?5, \
                     status = ?6, file_status = ?7, body_hash = ?8, updated_at = ?9 \
                     WHERE id = ?1",
                )?
                .execute(params![
                    id,
                    meta.id,
                    meta.scope.as_str(),
                    meta.file.as_deref(),
                    meta.title.as_deref(),
                    meta.status.as_str(),
                    meta.file_status.as_str(),
                    body_hash,
                    &now,
                ])?;
                id
            }
            None => {
                tx.prepare_cached(
                    "INSERT INTO memories \
                     (project_id, memory_uid, scope, file_path, md_rel_path, title, \
                      status, file_status, body_hash, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                )?
                .execute(params![
                    self.project_id,
                    meta.id,
                    meta.scope.as_str(),
                    meta.file.as_deref(),
                    md_rel_path,
                    meta.title.as_deref(),
                    meta.status.as_str(),
                    meta.file_status.as_str(),
                    body_hash,
                    &now,
                    &now,
                ])?;
                tx.last_insert_rowid()
            }
        };

        tx.prepare_cached("DELETE FROM memory_symbols WHERE memory_id = ?1")?
            .execute(params![row_id])?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO memory_symbols (memory_id, language, name, status, last_resolved_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for symbol in &meta.symbols {
                stmt.execute(params![
                    row_id,
                    symbol.language,
                    symbol.name,
                    symbol.status.as_str(),
                    symbol.last_resolved_at.as_deref(),
                ])?;
            }
        }

        tx.commit()?;
        Ok(row_id)
    }

    /// Mark a memory deleted. Fails with `NotFound` when no row matches.
    pub fn soft_delete_memory(&mut self, uid: &str) -> Result<(), StorageError> {
        let affected = self.conn.execute(
            "UPDATE memories SET status = 'deleted', updated_at = ?3 \
             WHERE project_id = ?1 AND memory_uid = ?2",
            params![self.project_id, uid, now_rfc3339()],
        )?;
        if affected == 0 {
            return Err(StorageError::NotFound {
                what: format!("memory {uid}"),
            });
        }
        Ok(())
    }

    pub fn get_by_uid(&self, uid: &str) -> Result<Option<MemoryRecord>, StorageError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, memory_uid, scope, file_path, md_rel_path, title, \
             status, file_status, body_hash, created_at, updated_at \
             FROM memories WHERE project_id = ?1 AND memory_uid = ?2",
        )?;
        let mut rows = stmt.query(params![self.project_id, uid])?;
        match rows.next()? {
            Some(row) => {
                let mut record = row_to_record(row)?;
                record.symbols = self.load_symbols(record.row_id)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    pub fn get_by_md_rel_path(
        &self,
        md_rel_path: &str,
    ) -> Result<Option<MemoryRecord>, StorageError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, memory_uid, scope, file_path, md_rel_path, title, \
             status, file_status, body_hash, created_at, updated_at \
             FROM memories WHERE project_id = ?1 AND md_rel_path = ?2",
        )?;
        let mut rows = stmt.query(params![self.project_id, md_rel_path])?;
        match rows.next()? {
            Some(row) => {
                let mut record = row_to_record(row)?;
                record.symbols = self.load_symbols(record.row_id)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List memories, optionally narrowed by scope and referenced file path.
    /// Ordered by `md_rel_path` for deterministic iteration.
    pub fn list_memories(
        &self,
        scope: Option<Scope>,
        file_path: Option<&str>,
    ) -> Result<Vec<MemoryRecord>, StorageError> {
        const COLUMNS: &str = "id, memory_uid, scope, file_path, md_rel_path, title, \
             status, file_status, body_hash, created_at, updated_at";

        let mut records = Vec::new();
        {
            let mut push_rows = |rows: &mut rusqlite::Rows<'_>| -> Result<(), StorageError> {
                while let Some(row) = rows.next()? {
                    records.push(row_to_record(row)?);
                }
                Ok(())
            };

            match (scope, file_path) {
                (None, None) => {
                    let mut stmt = self.conn.prepare_cached(&format!(
                        "SELECT {COLUMNS} FROM memories WHERE project_id = ?1 ORDER BY md_rel_path"
                    ))?;
                    push_rows(&mut stmt.query(params![self.project_id])?)?;
                }
                (Some(scope), None) => {
                    let mut stmt = self.conn.prepare_cached(&format!(
                        "SELECT {COLUMNS} FROM memories \
                         WHERE project_id = ?1 AND scope = ?2 ORDER BY md_rel_path"
                    ))?;
                    push_rows(&mut stmt.query(params![self.project_id, scope.as_str()])?)?;
                }
                (None, Some(file_path)) => {
                    let mut stmt = self.conn.prepare_cached(&format!(
                        "SELECT {COLUMNS} FROM memories \
                         WHERE project_id = ?1 AND file_path = ?2 ORDER BY md_rel_path"
                    ))?;
                    push_rows(&mut stmt.query(params![self.project_id, file_path])?)?;
                }
                (Some(scope), Some(file_path)) => {
                    let mut stmt = self.conn.prepare_cached(&format!(
                        "SELECT {COLUMNS} FROM memories \
                         WHERE project_id = ?1 AND scope = ?2 AND file_path = ?3 \
                         ORDER BY md_rel_path"
                    ))?;
                    push_rows(
                        &mut stmt.query(params![self.project_id, scope.as_str(), file_path])?,
                    )?;
                }
            }
        }

        for record in &mut records {
            record.symbols = self.load_symbols(record.row_id)?;
        }
        Ok(records)
    }

    /// Every known memory file path with its stored body hash.
    pub fn all_memory_paths(&self) -> Result<HashMap<String, String>, StorageError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT md_rel_path, body_hash FROM memories WHERE project_id = ?1")?;
        let mut rows = stmt.query(params![self.project_id])?;
        let mut paths = HashMap::new();
        while let Some(row) = rows.next()? {
            paths.insert(row.get::<_, String>(0)?, row.get::<_, String>(1)?);
        }
        Ok(paths)
    }

    /// Hard-delete the row (symbol children first). No-op when absent.
    pub fn delete_by_md_rel_path(&mut self, md_rel_path: &str) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM memory_symbols WHERE memory_id IN \
             (SELECT id FROM memories WHERE project_id = ?1 AND md_rel_path = ?2)",
            params![self.project_id, md_rel_path],
        )?;
        tx.execute(
            "DELETE FROM memories WHERE project_id = ?1 AND md_rel_path = ?2",
            params![self.project_id, md_rel_path],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn update_file_status(
        &mut self,
        uid: &str,
        file_status: NoteStatus,
    ) -> Result<(), StorageError> {
        let affected = self.conn.execute(
            "UPDATE memories SET file_status = ?3, updated_at = ?4 \
             WHERE project_id = ?1 AND memory_uid = ?2",
            params![self.project_id, uid, file_status.as_str(), now_rfc3339()],
        )?;
        if affected == 0 {
            return Err(StorageError::NotFound {
                what: format!("memory {uid}"),
            });
        }
        Ok(())
    }

    pub fn update_symbol_status(
        &mut self,
        uid: &str,
        language: &str,
        name: &str,
        status: NoteStatus,
        last_resolved_at: &str,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "UPDATE memory_symbols SET status = ?4, last_resolved_at = ?5 \
             WHERE memory_id = (SELECT id FROM memories WHERE project_id = ?1 AND memory_uid = ?2) \
             AND language = ?3 AND name = ?6",
            params![
                self.project_id,
                uid,
                language,
                status.as_str(),
                last_resolved_at,
                name
            ],
        )?;
        Ok(())
    }

    /// Whether the surrounding code index currently knows a symbol with this
    /// name under a file of the given language tag.
    pub fn symbol_exists_in_index(
        &self,
        language: &str,
        name: &str,
    ) -> Result<bool, StorageError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT EXISTS(\
             SELECT 1 FROM symbols s JOIN files f ON s.file_id = f.id \
             WHERE f.project_id = ?1 AND f.lang = ?2 AND s.name = ?3)",
        )?;
        let exists: bool = stmt.query_row(params![self.project_id, language, name], |row| {
            row.get(0)
        })?;
        Ok(exists)
    }

    /// Expose the raw connection for advanced usage (e.g., testing).
    #[doc(hidden)]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

impl RelationalStore {
    fn load_symbols(&self, memory_id: i64) -> Result<Vec<SymbolRef>, StorageError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT language, name, status, last_resolved_at \
             FROM memory_symbols WHERE memory_id = ?1 ORDER BY id",
        )?;
        let mut rows = stmt.query(params![memory_id])?;
        let mut symbols = Vec::new();
        while let Some(row) = rows.next()? {
            symbols.push(SymbolRef {
                language: row.get(0)?,
                name: row.get(1)?,
                status: NoteStatus::from_str(&row.get::<_, String>(2)?)?,
                last_resolved_at: row.get(3)?,
            });
        }
        Ok(symbols)
    }
}

fn row_to_record(row: &Row<'_>) -> Result<MemoryRecord, StorageError> {
    Ok(MemoryRecord {
        row_id: row.get(0)?,
        memory_uid: row.get(1)?,
        scope: Scope::from_str(&row.get::<_, String>(2)?)?,
        file_path: row.get(3)?,
        md_rel_path: row.get(4)?,
        title: row.get(5)?,
        status: NoteStatus::from_str(&row.get::<_, String>(6)?)?,
        file_status: NoteStatus::from_str(&row.get::<_, String>(7)?)?,
        body_hash: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
        symbols: Vec::new(),
    })
}

fn configure_pragmas(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;\
         PRAGMA busy_timeout = 5000;\
         PRAGMA synchronous = NORMAL;\
         PRAGMA foreign_keys = ON;",
    )?;
    Ok(())
}

fn get_user_version(conn: &Connection) -> Result<u32, StorageError> {
    let v: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(v)
}

fn set_user_version(conn: &Connection, version: u32) -> Result<(), StorageError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

fn create_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memories (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id   INTEGER NOT NULL,
            memory_uid   TEXT NOT NULL,
            scope        TEXT NOT NULL,
            file_path    TEXT,
            md_rel_path  TEXT NOT NULL,
            title        TEXT,
            status       TEXT NOT NULL DEFAULT 'active',
            file_status  TEXT NOT NULL DEFAULT 'active',
            body_hash    TEXT NOT NULL,
            created_at   TEXT NOT NULL,
            updated_at   TEXT NOT NULL,
            UNIQUE(project_id, md_rel_path),
            UNIQUE(project_id, memory_uid)
        );

        CREATE INDEX IF NOT EXISTS idx_memories_scope ON memories(project_id, scope);
        CREATE INDEX IF NOT EXISTS idx_memories_file ON memories(project_id, file_path);

        CREATE TABLE IF NOT EXISTS memory_symbols (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            memory_id        INTEGER NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
            language         TEXT NOT NULL,
            name             TEXT NOT NULL,
            status           TEXT NOT NULL DEFAULT 'active',
            last_resolved_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_memory_symbols_memory ON memory_symbols(memory_id);",
    )?;
    Ok(())
}

/// Current UTC time as an RFC 3339 string with seconds precision.
fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
