//! SQLite-backed gallery store.
//!
//! Uses `rusqlite` with the `bundled` feature so no system SQLite
//! library is required.  The connection lives behind a `Mutex`; a
//! [`SqliteGalleryTx`] keeps the guard for its whole lifetime and runs
//! inside `BEGIN IMMEDIATE`, so writers are serialized both within this
//! process and against other processes sharing the database file.

use std::sync::{Mutex, MutexGuard};

use anyhow::Context;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::storage::backend::validate_segment;

use super::store::{
    now_rfc3339, GalleryStore, GalleryTx, ImageRecord, NewImage, ParentRecord, ParentRegistry,
};

/// Current schema version. Bumped when migrations are added.
const SCHEMA_VERSION: i64 = 1;

const IMAGE_COLUMNS: &str =
    "id, parent_id, url, storage_key, is_cover, sort_order, created_at";

/// Gallery and parent metadata backed by a single SQLite database file.
pub struct SqliteGalleryStore {
    /// The database connection, guarded by a mutex for Send + Sync.
    conn: Mutex<Connection>,
}

impl SqliteGalleryStore {
    /// Open (or create) the database at `path` and initialize the schema.
    ///
    /// Passing `":memory:"` creates an in-memory database (useful for tests).
    pub fn new(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {path}"))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.apply_pragmas()?;
        store.init_db()?;
        Ok(store)
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("sqlite connection mutex poisoned"))
    }

    /// Apply recommended SQLite pragmas for performance and safety.
    fn apply_pragmas(&self) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        Ok(())
    }

    /// Create the required tables and indexes if they do not already exist.
    /// This is idempotent -- safe to call on every startup.
    fn init_db(&self) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            -- Schema version tracking
            CREATE TABLE IF NOT EXISTS schema_version (
                version    INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );

            -- Gallery owners
            CREATE TABLE IF NOT EXISTS parents (
                id          TEXT PRIMARY KEY,
                scope_id    TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            -- Gallery images
            CREATE TABLE IF NOT EXISTS images (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                parent_id    TEXT NOT NULL,
                url          TEXT NOT NULL,
                storage_key  TEXT NOT NULL,
                is_cover     INTEGER NOT NULL DEFAULT 0,
                sort_order   INTEGER NOT NULL CHECK (sort_order >= 0),
                created_at   TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_images_parent_order
                ON images(parent_id, sort_order, id);

            -- At most one cover per parent.
            CREATE UNIQUE INDEX IF NOT EXISTS idx_images_single_cover
                ON images(parent_id) WHERE is_cover = 1;
            ",
        )?;

        let existing: Option<i64> = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .optional()?
            .flatten();

        if existing.map_or(true, |v| v < SCHEMA_VERSION) {
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                params![SCHEMA_VERSION, now_rfc3339()],
            )?;
        }

        Ok(())
    }

    /// Register a parent (idempotent). An existing parent keeps its scope.
    ///
    /// Both ids become blob directory names, so each must be a valid
    /// storage path segment.
    pub fn register_parent(&self, parent_id: &str, scope_id: &str) -> anyhow::Result<ParentRecord> {
        validate_segment("parent", parent_id)?;
        validate_segment("scope", scope_id)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO parents (id, scope_id, created_at) VALUES (?1, ?2, ?3)",
            params![parent_id, scope_id, now_rfc3339()],
        )?;
        let record = conn.query_row(
            "SELECT id, scope_id, created_at FROM parents WHERE id = ?1",
            params![parent_id],
            parent_from_row,
        )?;
        Ok(record)
    }

    /// List all registered parents ordered by id.
    pub fn list_parents(&self) -> anyhow::Result<Vec<ParentRecord>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT id, scope_id, created_at FROM parents ORDER BY id")?;
        let rows = stmt.query_map([], parent_from_row)?;
        let mut parents = Vec::new();
        for row in rows {
            parents.push(row?);
        }
        Ok(parents)
    }
}

fn parent_from_row(row: &Row<'_>) -> rusqlite::Result<ParentRecord> {
    Ok(ParentRecord {
        id: row.get(0)?,
        scope_id: row.get(1)?,
        created_at: row.get(2)?,
    })
}

fn image_from_row(row: &Row<'_>) -> rusqlite::Result<ImageRecord> {
    Ok(ImageRecord {
        id: row.get(0)?,
        parent_id: row.get(1)?,
        url: row.get(2)?,
        storage_key: row.get(3)?,
        is_cover: row.get(4)?,
        sort_order: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn query_images(conn: &Connection, parent_id: &str) -> anyhow::Result<Vec<ImageRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {IMAGE_COLUMNS} FROM images WHERE parent_id = ?1 ORDER BY sort_order, id"
    ))?;
    let rows = stmt.query_map(params![parent_id], image_from_row)?;
    let mut images = Vec::new();
    for row in rows {
        images.push(row?);
    }
    Ok(images)
}

// ── Transaction ────────────────────────────────────────────────────

/// Write transaction over one parent's images.
pub struct SqliteGalleryTx<'a> {
    conn: MutexGuard<'a, Connection>,
    parent_id: String,
    finished: bool,
}

impl SqliteGalleryTx<'_> {
    fn touch(&self, sql: &str, image_id: i64, value: impl rusqlite::ToSql) -> anyhow::Result<()> {
        let changed = self
            .conn
            .execute(sql, params![value, self.parent_id, image_id])?;
        if changed == 0 {
            anyhow::bail!(
                "image {image_id} does not belong to parent {}",
                self.parent_id
            );
        }
        Ok(())
    }
}

impl GalleryTx for SqliteGalleryTx<'_> {
    fn count(&mut self) -> anyhow::Result<u32> {
        let count: u32 = self.conn.query_row(
            "SELECT COUNT(*) FROM images WHERE parent_id = ?1",
            params![self.parent_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn next_order(&mut self) -> anyhow::Result<u32> {
        let next: u32 = self.conn.query_row(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM images WHERE parent_id = ?1",
            params![self.parent_id],
            |row| row.get(0),
        )?;
        Ok(next)
    }

    fn has_cover(&mut self) -> anyhow::Result<bool> {
        let covers: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM images WHERE parent_id = ?1 AND is_cover = 1",
            params![self.parent_id],
            |row| row.get(0),
        )?;
        Ok(covers > 0)
    }

    fn list(&mut self) -> anyhow::Result<Vec<ImageRecord>> {
        query_images(&self.conn, &self.parent_id)
    }

    fn get(&mut self, image_id: i64) -> anyhow::Result<Option<ImageRecord>> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {IMAGE_COLUMNS} FROM images WHERE parent_id = ?1 AND id = ?2"),
                params![self.parent_id, image_id],
                image_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn insert(&mut self, image: NewImage) -> anyhow::Result<ImageRecord> {
        self.conn.execute(
            "INSERT INTO images (parent_id, url, storage_key, is_cover, sort_order, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                self.parent_id,
                image.url,
                image.storage_key,
                image.is_cover,
                image.sort_order,
                image.created_at,
            ],
        )?;
        Ok(ImageRecord {
            id: self.conn.last_insert_rowid(),
            parent_id: self.parent_id.clone(),
            url: image.url,
            storage_key: image.storage_key,
            is_cover: image.is_cover,
            sort_order: image.sort_order,
            created_at: image.created_at,
        })
    }

    fn set_sort_order(&mut self, image_id: i64, sort_order: u32) -> anyhow::Result<()> {
        self.touch(
            "UPDATE images SET sort_order = ?1 WHERE parent_id = ?2 AND id = ?3",
            image_id,
            sort_order,
        )
    }

    fn assign_exclusive_cover(&mut self, image_id: i64) -> anyhow::Result<()> {
        // Clear first: the single-cover index is checked row by row.
        self.conn.execute(
            "UPDATE images SET is_cover = 0 WHERE parent_id = ?1",
            params![self.parent_id],
        )?;
        self.touch(
            "UPDATE images SET is_cover = ?1 WHERE parent_id = ?2 AND id = ?3",
            image_id,
            true,
        )
    }

    fn delete(&mut self, image_id: i64) -> anyhow::Result<()> {
        self.conn.execute(
            "DELETE FROM images WHERE parent_id = ?1 AND id = ?2",
            params![self.parent_id, image_id],
        )?;
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> anyhow::Result<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for SqliteGalleryTx<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                tracing::warn!(parent_id = %self.parent_id, "rollback failed: {e}");
            }
        }
    }
}

// ── Trait implementations ──────────────────────────────────────────

impl GalleryStore for SqliteGalleryStore {
    fn begin<'a>(&'a self, parent_id: &str) -> anyhow::Result<Box<dyn GalleryTx + 'a>> {
        let conn = self.lock()?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Box::new(SqliteGalleryTx {
            conn,
            parent_id: parent_id.to_string(),
            finished: false,
        }))
    }

    fn list_images(&self, parent_id: &str) -> anyhow::Result<Vec<ImageRecord>> {
        let conn = self.lock()?;
        query_images(&conn, parent_id)
    }

    fn gallery_parent_ids(&self) -> anyhow::Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT DISTINCT parent_id FROM images ORDER BY parent_id")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }
}

impl ParentRegistry for SqliteGalleryStore {
    fn fetch(&self, parent_id: &str) -> anyhow::Result<Option<ParentRecord>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                "SELECT id, scope_id, created_at FROM parents WHERE id = ?1",
                params![parent_id],
                parent_from_row,
            )
            .optional()?;
        Ok(record)
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> SqliteGalleryStore {
        SqliteGalleryStore::new(":memory:").expect("failed to create in-memory store")
    }

    fn new_image(key: &str, order: u32, cover: bool) -> NewImage {
        NewImage {
            url: format!("http://img.test/{key}"),
            storage_key: format!("scope/p1/{key}"),
            is_cover: cover,
            sort_order: order,
            created_at: "2026-02-23T00:00:00.000Z".to_string(),
        }
    }

    // ── Schema tests ────────────────────────────────────────────────

    #[test]
    fn test_schema_idempotent() {
        let store = test_store();
        store.init_db().expect("second init_db failed");
        store.init_db().expect("third init_db failed");
    }

    // ── Parent tests ────────────────────────────────────────────────

    #[test]
    fn test_register_and_fetch_parent() {
        let store = test_store();
        assert!(!store.exists("p1").unwrap());

        let parent = store.register_parent("p1", "org-a").unwrap();
        assert_eq!(parent.scope_id, "org-a");
        assert!(store.exists("p1").unwrap());

        // Re-registering keeps the original scope.
        let again = store.register_parent("p1", "org-b").unwrap();
        assert_eq!(again.scope_id, "org-a");
        assert_eq!(store.list_parents().unwrap().len(), 1);
    }

    #[test]
    fn test_register_rejects_unusable_ids() {
        let store = test_store();
        let err = store.register_parent("listing 42", "org-a").unwrap_err();
        assert!(err.to_string().contains("listing 42"));
        assert!(store.register_parent("p1", "org/acme").is_err());
        assert!(store.register_parent(".tmp", "org-a").is_err());
        assert!(store.list_parents().unwrap().is_empty());
    }

    // ── Transaction tests ───────────────────────────────────────────

    #[test]
    fn test_insert_count_and_next_order() {
        let store = test_store();
        {
            let mut tx = store.begin("p1").unwrap();
            assert_eq!(tx.count().unwrap(), 0);
            assert_eq!(tx.next_order().unwrap(), 0);
            assert!(!tx.has_cover().unwrap());

            tx.insert(new_image("a.jpg", 0, true)).unwrap();
            tx.insert(new_image("b.jpg", 1, false)).unwrap();
            assert_eq!(tx.count().unwrap(), 2);
            assert_eq!(tx.next_order().unwrap(), 2);
            assert!(tx.has_cover().unwrap());
            tx.commit().unwrap();
        }
        assert_eq!(store.list_images("p1").unwrap().len(), 2);
        assert_eq!(store.gallery_parent_ids().unwrap(), vec!["p1".to_string()]);
    }

    #[test]
    fn test_drop_without_commit_rolls_back() {
        let store = test_store();
        {
            let mut tx = store.begin("p1").unwrap();
            tx.insert(new_image("a.jpg", 0, true)).unwrap();
        }
        assert!(store.list_images("p1").unwrap().is_empty());

        // The connection is usable again after the rollback.
        let mut tx = store.begin("p1").unwrap();
        assert_eq!(tx.count().unwrap(), 0);
    }

    #[test]
    fn test_list_orders_by_sort_order_then_id() {
        let store = test_store();
        let mut tx = store.begin("p1").unwrap();
        let a = tx.insert(new_image("a.jpg", 1, false)).unwrap();
        let b = tx.insert(new_image("b.jpg", 0, false)).unwrap();
        let c = tx.insert(new_image("c.jpg", 1, false)).unwrap();
        let ids: Vec<i64> = tx.list().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![b.id, a.id, c.id]);
        tx.commit().unwrap();
    }

    #[test]
    fn test_get_is_scoped_to_parent() {
        let store = test_store();
        let id = {
            let mut tx = store.begin("p1").unwrap();
            let rec = tx.insert(new_image("a.jpg", 0, false)).unwrap();
            tx.commit().unwrap();
            rec.id
        };
        let mut tx = store.begin("p2").unwrap();
        assert!(tx.get(id).unwrap().is_none());
        assert!(tx.set_sort_order(id, 3).is_err());
    }

    #[test]
    fn test_assign_exclusive_cover() {
        let store = test_store();
        let mut tx = store.begin("p1").unwrap();
        let a = tx.insert(new_image("a.jpg", 0, false)).unwrap();
        let b = tx.insert(new_image("b.jpg", 1, true)).unwrap();
        let c = tx.insert(new_image("c.jpg", 2, false)).unwrap();

        tx.assign_exclusive_cover(a.id).unwrap();
        let covers: Vec<i64> = tx
            .list()
            .unwrap()
            .into_iter()
            .filter(|r| r.is_cover)
            .map(|r| r.id)
            .collect();
        assert_eq!(covers, vec![a.id]);

        tx.assign_exclusive_cover(c.id).unwrap();
        assert!(!tx.get(b.id).unwrap().unwrap().is_cover);
        assert!(tx.get(c.id).unwrap().unwrap().is_cover);
    }

    #[test]
    fn test_second_cover_rejected_by_index() {
        let store = test_store();
        let mut tx = store.begin("p1").unwrap();
        tx.insert(new_image("a.jpg", 0, true)).unwrap();
        let b = tx.insert(new_image("b.jpg", 1, false)).unwrap();
        tx.commit().unwrap();

        let conn = store.lock().unwrap();
        let second = conn.execute("UPDATE images SET is_cover = 1 WHERE id = ?1", params![b.id]);
        assert!(second.is_err());
    }

    #[test]
    fn test_delete_removes_row() {
        let store = test_store();
        let mut tx = store.begin("p1").unwrap();
        let a = tx.insert(new_image("a.jpg", 0, true)).unwrap();
        tx.delete(a.id).unwrap();
        assert!(tx.get(a.id).unwrap().is_none());
        assert_eq!(tx.count().unwrap(), 0);
        tx.commit().unwrap();
        assert!(store.gallery_parent_ids().unwrap().is_empty());
    }
}
