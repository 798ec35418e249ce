//! Repository for SQLite-backed photo metadata.
//!
//! ImageRepository operates on the Database struct using raw SQL. Row ids
//! assigned here are the external identifiers the vector index maps its
//! positions onto, so `create` returns the id of the committed row.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use rusqlite::OptionalExtension;

use lumen_core::error::LumenError;
use lumen_core::types::ImageRecord;

use crate::db::Database;

/// Repository for photo metadata records.
pub struct ImageRepository {
    db: Arc<Database>,
}

impl ImageRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Commit a new image record and return its assigned id.
    pub fn create(
        &self,
        filename: &str,
        storage_url: &str,
        caption: Option<&str>,
    ) -> Result<i64, LumenError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO images (filename, storage_url, caption, uploaded_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![filename, storage_url, caption, Utc::now().timestamp()],
            )
            .map_err(|e| LumenError::Storage(format!("Failed to insert image: {}", e)))?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Find an image record by id. Returns None for deleted or
    /// never-committed ids.
    pub fn find_by_id(&self, id: i64) -> Result<Option<ImageRecord>, LumenError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, filename, storage_url, caption, uploaded_at
                     FROM images WHERE id = ?1",
                )
                .map_err(|e| LumenError::Storage(e.to_string()))?;

            let result = stmt
                .query_row(rusqlite::params![id], |row| Ok(row_to_record(row)))
                .optional()
                .map_err(|e| LumenError::Storage(e.to_string()))?;

            match result {
                Some(record) => Ok(Some(record?)),
                None => Ok(None),
            }
        })
    }

    /// List the most recently uploaded images.
    pub fn list_recent(&self, limit: u64) -> Result<Vec<ImageRecord>, LumenError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, filename, storage_url, caption, uploaded_at
                     FROM images
                     ORDER BY uploaded_at DESC, id DESC
                     LIMIT ?1",
                )
                .map_err(|e| LumenError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![limit], |row| Ok(row_to_record(row)))
                .map_err(|e| LumenError::Storage(e.to_string()))?;

            let mut records = Vec::new();
            for row in rows {
                let record = row.map_err(|e| LumenError::Storage(e.to_string()))??;
                records.push(record);
            }
            Ok(records)
        })
    }

    /// Delete an image record by id.
    ///
    /// The corresponding vector stays in the index; hydration drops hits
    /// whose id no longer resolves here.
    pub fn delete(&self, id: i64) -> Result<(), LumenError> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM images WHERE id = ?1", rusqlite::params![id])
                .map_err(|e| LumenError::Storage(format!("Failed to delete image: {}", e)))?;
            Ok(())
        })
    }

    /// Count stored image records.
    pub fn count(&self) -> Result<u64, LumenError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))
                .map_err(|e| LumenError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> Result<ImageRecord, LumenError> {
    let uploaded_ts: i64 = row
        .get(4)
        .map_err(|e| LumenError::Storage(e.to_string()))?;
    let uploaded_at = Utc
        .timestamp_opt(uploaded_ts, 0)
        .single()
        .ok_or_else(|| LumenError::Storage(format!("Invalid timestamp: {}", uploaded_ts)))?;

    Ok(ImageRecord {
        id: row.get(0).map_err(|e| LumenError::Storage(e.to_string()))?,
        filename: row.get(1).map_err(|e| LumenError::Storage(e.to_string()))?,
        storage_url: row.get(2).map_err(|e| LumenError::Storage(e.to_string()))?,
        caption: row.get(3).map_err(|e| LumenError::Storage(e.to_string()))?,
        uploaded_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_repo() -> ImageRepository {
        ImageRepository::new(Arc::new(Database::in_memory().unwrap()))
    }

    #[test]
    fn test_create_assigns_sequential_ids() {
        let repo = make_repo();
        let id1 = repo
            .create("a.jpg", "/uploads/a.jpg", Some("first"))
            .unwrap();
        let id2 = repo
            .create("b.jpg", "/uploads/b.jpg", Some("second"))
            .unwrap();
        assert!(id2 > id1);
    }

    #[test]
    fn test_find_by_id() {
        let repo = make_repo();
        let id = repo
            .create("dog.jpg", "/uploads/dog.jpg", Some("a dog in a park"))
            .unwrap();

        let record = repo.find_by_id(id).unwrap().unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.filename, "dog.jpg");
        assert_eq!(record.storage_url, "/uploads/dog.jpg");
        assert_eq!(record.caption.as_deref(), Some("a dog in a park"));
    }

    #[test]
    fn test_find_missing_returns_none() {
        let repo = make_repo();
        assert!(repo.find_by_id(9999).unwrap().is_none());
    }

    #[test]
    fn test_create_without_caption() {
        let repo = make_repo();
        let id = repo.create("x.png", "/uploads/x.png", None).unwrap();
        let record = repo.find_by_id(id).unwrap().unwrap();
        assert!(record.caption.is_none());
    }

    #[test]
    fn test_list_recent_orders_newest_first() {
        let repo = make_repo();
        for i in 0..5 {
            repo.create(&format!("{}.jpg", i), &format!("/u/{}.jpg", i), None)
                .unwrap();
        }

        let records = repo.list_recent(3).unwrap();
        assert_eq!(records.len(), 3);
        // Same-second uploads fall back to id ordering.
        assert!(records[0].id > records[1].id);
        assert!(records[1].id > records[2].id);
    }

    #[test]
    fn test_delete_removes_record() {
        let repo = make_repo();
        let id = repo.create("gone.jpg", "/uploads/gone.jpg", None).unwrap();
        assert!(repo.find_by_id(id).unwrap().is_some());

        repo.delete(id).unwrap();
        assert!(repo.find_by_id(id).unwrap().is_none());
    }

    #[test]
    fn test_count() {
        let repo = make_repo();
        assert_eq!(repo.count().unwrap(), 0);
        repo.create("a.jpg", "/a.jpg", None).unwrap();
        repo.create("b.jpg", "/b.jpg", None).unwrap();
        assert_eq!(repo.count().unwrap(), 2);
    }
}
