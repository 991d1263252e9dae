use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::profile::StudentProfile;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("cannot create database directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// One recogniser label and the student it stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelEntry {
    pub label_id: i64,
    pub name: String,
    pub class: String,
    pub gender: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrollment {
    pub name: String,
    pub images: u32,
}

/// Student label map and enrollment history.
///
/// Schema: `labels` holds the map the current model was trained with and is
/// replaced wholesale after each training run; `enrollments` is append-only.
pub struct StudentDb {
    conn: Mutex<Connection>,
}

impl StudentDb {
    /// Open (or create) the database, creating its parent directory.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| DbError::CreateDir(parent.into(), e))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init(conn, path)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::init(Connection::open_in_memory()?, Path::new(":memory:"))
    }

    fn init(conn: Connection, path: &Path) -> Result<Self, DbError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS labels (
                label_id    INTEGER PRIMARY KEY,
                name        TEXT    NOT NULL UNIQUE,
                class       TEXT    NOT NULL DEFAULT 'Unknown',
                gender      TEXT    NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS enrollments (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                name          TEXT    NOT NULL,
                class         TEXT    NOT NULL,
                gender        TEXT    NOT NULL,
                images        INTEGER NOT NULL,
                enrolled_at   INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_enrollments_name
                ON enrollments(name);",
        )?;

        info!(path = path.display().to_string(), "student database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    #[cfg(test)]
    pub fn execute_batch(&self, sql: &str) -> Result<(), DbError> {
        Ok(self.conn().execute_batch(sql)?)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The stored label map, ordered by label id.
    pub fn label_map(&self) -> Result<Vec<LabelEntry>, DbError> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT label_id, name, class, gender FROM labels ORDER BY label_id")?;
        let rows = stmt.query_map([], |row| {
            Ok(LabelEntry {
                label_id: row.get(0)?,
                name: row.get(1)?,
                class: row.get(2)?,
                gender: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn find_label(&self, name: &str) -> Result<Option<LabelEntry>, DbError> {
        let conn = self.conn();
        let entry = conn
            .query_row(
                "SELECT label_id, name, class, gender FROM labels WHERE name = ?1",
                params![name],
                |row| {
                    Ok(LabelEntry {
                        label_id: row.get(0)?,
                        name: row.get(1)?,
                        class: row.get(2)?,
                        gender: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    /// Replace the whole label map in one transaction.
    pub fn replace_label_map(&self, entries: &[LabelEntry]) -> Result<(), DbError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM labels", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO labels (label_id, name, class, gender) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for e in entries {
                stmt.execute(params![e.label_id, e.name, e.class, e.gender])?;
            }
        }
        tx.commit()?;
        debug!(labels = entries.len(), "replaced label map");
        Ok(())
    }

    /// Log a finished enrollment. Returns the new row id.
    pub fn record_enrollment(&self, profile: &StudentProfile, images: u32) -> Result<i64, DbError> {
        let now = chrono::Utc::now().timestamp_millis();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO enrollments (name, class, gender, images, enrolled_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![profile.name, profile.class, profile.gender, images as i64, now],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, name = profile.name, images, "recorded enrollment");
        Ok(id)
    }

    /// Enrollment history, newest first.
    pub fn enrollments(&self) -> Result<Vec<Enrollment>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT name, images FROM enrollments ORDER BY id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Enrollment {
                name: row.get(0)?,
                images: row.get::<_, i64>(1)? as u32,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tests::scratch_dir;

    fn entry(label_id: i64, name: &str, class: &str, gender: &str) -> LabelEntry {
        LabelEntry {
            label_id,
            name: name.into(),
            class: class.into(),
            gender: gender.into(),
        }
    }

    #[test]
    fn empty_database_has_no_labels() {
        let db = StudentDb::open_in_memory().unwrap();
        assert!(db.label_map().unwrap().is_empty());
        assert!(db.find_label("Ani").unwrap().is_none());
    }

    #[test]
    fn replace_label_map_drops_old_entries() {
        let db = StudentDb::open_in_memory().unwrap();
        db.replace_label_map(&[entry(0, "Ani", "7A", "P"), entry(1, "Budi", "7B", "L")])
            .unwrap();
        db.replace_label_map(&[entry(0, "Budi", "8B", "L")]).unwrap();

        assert_eq!(db.label_map().unwrap(), vec![entry(0, "Budi", "8B", "L")]);
        assert!(db.find_label("Ani").unwrap().is_none());
        assert_eq!(db.find_label("Budi").unwrap().unwrap().class, "8B");
    }

    #[test]
    fn enrollments_are_listed_newest_first() {
        let db = StudentDb::open_in_memory().unwrap();
        let ani = StudentProfile::new("Ani", "7a", "p").unwrap();
        let budi = StudentProfile::new("Budi", "7b", "l").unwrap();
        let first = db.record_enrollment(&ani, 50).unwrap();
        let second = db.record_enrollment(&budi, 12).unwrap();
        assert!(second > first);

        let log = db.enrollments().unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].name, "Budi");
        assert_eq!(log[0].images, 12);
        assert_eq!(log[1].name, "Ani");
        assert_eq!(log[1].images, 50);
    }

    #[test]
    fn file_database_persists_across_opens() {
        let dir = scratch_dir();
        let path = dir.join("nested").join("students.db");
        {
            let db = StudentDb::open(&path).unwrap();
            db.replace_label_map(&[entry(0, "Ani", "7A", "P")]).unwrap();
        }
        let db = StudentDb::open(&path).unwrap();
        assert_eq!(db.label_map().unwrap().len(), 1);
        drop(db);
        std::fs::remove_dir_all(dir).ok();
    }
}
