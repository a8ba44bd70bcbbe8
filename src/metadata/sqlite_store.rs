//! SQLite implementation of the metadata traits

use crate::error::{StoreError, StoreResult};
use crate::metadata::{
    AccessMethod, AuthPolicy, Bucket, CapabilityToken, HealthUpdate, InsertOutcome, NodeObject,
    NodeObjectIndex, NodeRegistry, ObjectCatalog, ObjectLocation, StorageNode, StoredObject,
    TokenStore,
};
use chrono::{DateTime, Utc};
use log::{debug, info};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS buckets (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        owner_id TEXT NOT NULL,
        public_read INTEGER NOT NULL DEFAULT 0,
        auth_policy TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS objects (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL,
        bucket_id TEXT NOT NULL,
        name TEXT NOT NULL,
        size INTEGER NOT NULL,
        content_type TEXT NOT NULL,
        checksum TEXT NOT NULL,
        location TEXT NOT NULL,
        node_id TEXT,
        auth_policy TEXT,
        uploaded_by TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        UNIQUE(bucket_id, id)
    );
    CREATE INDEX IF NOT EXISTS idx_objects_node ON objects(node_id);
    CREATE TABLE IF NOT EXISTS storage_nodes (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        url TEXT NOT NULL UNIQUE,
        secret TEXT NOT NULL,
        capacity INTEGER NOT NULL,
        used_storage INTEGER NOT NULL DEFAULT 0,
        priority INTEGER NOT NULL DEFAULT 0,
        active INTEGER NOT NULL DEFAULT 1,
        healthy INTEGER NOT NULL DEFAULT 0,
        last_contact INTEGER,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS capability_tokens (
        signature TEXT PRIMARY KEY,
        bucket_name TEXT NOT NULL,
        object_name TEXT NOT NULL,
        method TEXT NOT NULL,
        expires_at INTEGER NOT NULL,
        single_use INTEGER NOT NULL DEFAULT 0,
        used INTEGER NOT NULL DEFAULT 0,
        used_at INTEGER,
        created_at INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS node_objects (
        object_id TEXT NOT NULL,
        bucket_id TEXT NOT NULL,
        bucket_name TEXT NOT NULL,
        filename TEXT NOT NULL,
        path TEXT NOT NULL,
        size INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        PRIMARY KEY(bucket_id, object_id)
    );
";

const NODE_COLUMNS: &str = "id, name, url, secret, capacity, used_storage, priority, active, healthy, \
     last_contact, created_at, updated_at";

const OBJECT_COLUMNS: &str = "id, bucket_id, name, size, content_type, checksum, location, auth_policy, \
     uploaded_by, created_at";

const TOKEN_COLUMNS: &str = "signature, bucket_name, object_name, method, expires_at, single_use, used, \
     used_at, created_at";

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

/// Object row before its JSON and descriptor columns are validated
struct RawObject {
    id: String,
    bucket_id: String,
    name: String,
    size: i64,
    content_type: String,
    checksum: String,
    location: String,
    auth_policy: Option<String>,
    uploaded_by: String,
    created_at: i64,
}

impl RawObject {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            bucket_id: row.get(1)?,
            name: row.get(2)?,
            size: row.get(3)?,
            content_type: row.get(4)?,
            checksum: row.get(5)?,
            location: row.get(6)?,
            auth_policy: row.get(7)?,
            uploaded_by: row.get(8)?,
            created_at: row.get(9)?,
        })
    }

    fn into_object(self) -> StoreResult<StoredObject> {
        let auth_policy = match self.auth_policy {
            Some(raw) => Some(AuthPolicy::from_json(&raw)?),
            None => None,
        };
        Ok(StoredObject {
            id: self.id,
            bucket_id: self.bucket_id,
            name: self.name,
            size: self.size.max(0) as u64,
            content_type: self.content_type,
            checksum: self.checksum,
            location: ObjectLocation::parse(&self.location)?,
            auth_policy,
            uploaded_by: self.uploaded_by,
            created_at: from_millis(self.created_at),
        })
    }
}

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<StorageNode> {
    let capacity: i64 = row.get(4)?;
    let used: i64 = row.get(5)?;
    let last_contact: Option<i64> = row.get(9)?;
    Ok(StorageNode {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        secret: row.get(3)?,
        capacity: capacity.max(0) as u64,
        used_storage: used.max(0) as u64,
        priority: row.get(6)?,
        active: row.get(7)?,
        healthy: row.get(8)?,
        last_contact: last_contact.map(from_millis),
        created_at: from_millis(row.get(10)?),
        updated_at: from_millis(row.get(11)?),
    })
}

fn token_from_row(row: &Row<'_>) -> rusqlite::Result<(CapabilityToken, String)> {
    let used_at: Option<i64> = row.get(7)?;
    let method: String = row.get(3)?;
    let token = CapabilityToken {
        signature: row.get(0)?,
        bucket_name: row.get(1)?,
        object_name: row.get(2)?,
        method: AccessMethod::Get,
        expires_at: from_millis(row.get(4)?),
        single_use: row.get(5)?,
        used: row.get(6)?,
        used_at: used_at.map(from_millis),
        created_at: from_millis(row.get(8)?),
    };
    Ok((token, method))
}

/// SQLite implementation of the metadata traits
pub struct SQLiteMetadataStore {
    conn: Mutex<Connection>,
}

impl SQLiteMetadataStore {
    /// Open (or create) the database file and make sure the schema exists
    pub fn open(path: &Path, wal_mode: bool) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        if wal_mode {
            conn.pragma_update(None, "journal_mode", "WAL")?;
        }
        conn.execute_batch(SCHEMA)?;
        info!("Metadata database ready at {}", path.display());
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Private in-memory database, used by tests
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Internal("metadata connection lock poisoned".to_string()))
    }
}

impl ObjectCatalog for SQLiteMetadataStore {
    fn create_bucket(&self, bucket: &Bucket) -> StoreResult<()> {
        let policy = bucket.auth_policy.to_json()?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO buckets (id, name, owner_id, public_read, auth_policy, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                bucket.id,
                bucket.name,
                bucket.owner_id,
                bucket.public_read,
                policy,
                to_millis(bucket.created_at)
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!("bucket {} already exists", bucket.name))
            } else {
                StoreError::Database(e)
            }
        })?;
        Ok(())
    }

    fn find_bucket(&self, bucket_id: &str) -> StoreResult<Option<Bucket>> {
        self.query_bucket("id", bucket_id)
    }

    fn find_bucket_by_name(&self, name: &str) -> StoreResult<Option<Bucket>> {
        self.query_bucket("name", name)
    }

    fn insert_object(&self, object: &StoredObject) -> StoreResult<()> {
        let policy = match &object.auth_policy {
            Some(p) => Some(p.to_json()?),
            None => None,
        };
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO objects (id, bucket_id, name, size, content_type, checksum, location,
                                  node_id, auth_policy, uploaded_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                object.id,
                object.bucket_id,
                object.name,
                object.size as i64,
                object.content_type,
                object.checksum,
                object.location.to_string(),
                object.location.node_id(),
                policy,
                object.uploaded_by,
                to_millis(object.created_at)
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!("object {} already exists", object.id))
            } else {
                StoreError::Database(e)
            }
        })?;
        Ok(())
    }

    fn find_object(&self, bucket_id: &str, object_id: &str) -> StoreResult<Option<StoredObject>> {
        let raw = {
            let conn = self.conn()?;
            conn.query_row(
                &format!("SELECT {} FROM objects WHERE bucket_id = ?1 AND id = ?2", OBJECT_COLUMNS),
                params![bucket_id, object_id],
                RawObject::from_row,
            )
            .optional()?
        };
        raw.map(RawObject::into_object).transpose()
    }

    fn find_object_by_name(&self, bucket_id: &str, name: &str) -> StoreResult<Option<StoredObject>> {
        let raw = {
            let conn = self.conn()?;
            conn.query_row(
                &format!(
                    "SELECT {} FROM objects WHERE bucket_id = ?1 AND name = ?2
                     ORDER BY created_at, seq LIMIT 1",
                    OBJECT_COLUMNS
                ),
                params![bucket_id, name],
                RawObject::from_row,
            )
            .optional()?
        };
        raw.map(RawObject::into_object).transpose()
    }

    fn delete_object(&self, bucket_id: &str, object_id: &str) -> StoreResult<bool> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM objects WHERE bucket_id = ?1 AND id = ?2",
            params![bucket_id, object_id],
        )?;
        Ok(removed > 0)
    }

    fn rename_object(&self, bucket_id: &str, object_id: &str, new_name: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE objects SET name = ?3 WHERE bucket_id = ?1 AND id = ?2",
            params![bucket_id, object_id, new_name],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("object {}", object_id)));
        }
        Ok(())
    }

    fn list_objects(&self, bucket_id: &str) -> StoreResult<Vec<StoredObject>> {
        let raws = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM objects WHERE bucket_id = ?1 ORDER BY created_at, seq",
                OBJECT_COLUMNS
            ))?;
            let rows = stmt.query_map(params![bucket_id], RawObject::from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        raws.into_iter().map(RawObject::into_object).collect()
    }

    fn local_usage(&self) -> StoreResult<u64> {
        let conn = self.conn()?;
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(size), 0) FROM objects WHERE node_id IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(total.max(0) as u64)
    }

    fn node_usage(&self, node_id: &str) -> StoreResult<u64> {
        let conn = self.conn()?;
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(size), 0) FROM objects WHERE node_id = ?1",
            params![node_id],
            |row| row.get(0),
        )?;
        Ok(total.max(0) as u64)
    }
}

impl SQLiteMetadataStore {
    fn query_bucket(&self, column: &str, value: &str) -> StoreResult<Option<Bucket>> {
        let row = {
            let conn = self.conn()?;
            conn.query_row(
                &format!(
                    "SELECT id, name, owner_id, public_read, auth_policy, created_at
                     FROM buckets WHERE {} = ?1",
                    column
                ),
                params![value],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, bool>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()?
        };
        match row {
            Some((id, name, owner_id, public_read, policy, created_at)) => Ok(Some(Bucket {
                id,
                name,
                owner_id,
                public_read,
                auth_policy: AuthPolicy::from_json(&policy)?,
                created_at: from_millis(created_at),
            })),
            None => Ok(None),
        }
    }
}

impl NodeRegistry for SQLiteMetadataStore {
    fn insert_node(&self, node: &StorageNode) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO storage_nodes (id, name, url, secret, capacity, used_storage, priority,
                                        active, healthy, last_contact, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                node.id,
                node.name,
                node.url,
                node.secret,
                node.capacity as i64,
                node.used_storage as i64,
                node.priority,
                node.active,
                node.healthy,
                node.last_contact.map(to_millis),
                to_millis(node.created_at),
                to_millis(node.updated_at)
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!("node with url {} already registered", node.url))
            } else {
                StoreError::Database(e)
            }
        })?;
        Ok(())
    }

    fn find_node(&self, node_id: &str) -> StoreResult<Option<StorageNode>> {
        let conn = self.conn()?;
        let node = conn
            .query_row(
                &format!("SELECT {} FROM storage_nodes WHERE id = ?1", NODE_COLUMNS),
                params![node_id],
                node_from_row,
            )
            .optional()?;
        Ok(node)
    }

    fn find_node_by_url(&self, url: &str) -> StoreResult<Option<StorageNode>> {
        let conn = self.conn()?;
        let node = conn
            .query_row(
                &format!("SELECT {} FROM storage_nodes WHERE url = ?1", NODE_COLUMNS),
                params![url.trim_end_matches('/')],
                node_from_row,
            )
            .optional()?;
        Ok(node)
    }

    fn list_nodes(&self) -> StoreResult<Vec<StorageNode>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare(&format!("SELECT {} FROM storage_nodes ORDER BY seq", NODE_COLUMNS))?;
        let rows = stmt.query_map([], node_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn first_eligible_node(&self) -> StoreResult<Option<StorageNode>> {
        let conn = self.conn()?;
        let node = conn
            .query_row(
                &format!(
                    "SELECT {} FROM storage_nodes WHERE active = 1 AND healthy = 1
                     ORDER BY seq LIMIT 1",
                    NODE_COLUMNS
                ),
                [],
                node_from_row,
            )
            .optional()?;
        Ok(node)
    }

    fn adjust_used_storage(&self, node_id: &str, delta: i64) -> StoreResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE storage_nodes SET used_storage = MAX(0, used_storage + ?2), updated_at = ?3
             WHERE id = ?1",
            params![node_id, delta, to_millis(Utc::now())],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("node {}", node_id)));
        }
        debug!("Adjusted used storage of node {} by {}", node_id, delta);
        Ok(())
    }

    fn set_used_storage(&self, node_id: &str, used: u64) -> StoreResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE storage_nodes SET used_storage = ?2, updated_at = ?3 WHERE id = ?1",
            params![node_id, used as i64, to_millis(Utc::now())],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("node {}", node_id)));
        }
        Ok(())
    }

    fn record_health(&self, update: &HealthUpdate) -> StoreResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE storage_nodes SET healthy = ?2, last_contact = ?3, updated_at = ?3 WHERE id = ?1",
            params![update.node_id, update.healthy, to_millis(update.at)],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("node {}", update.node_id)));
        }
        Ok(())
    }

    fn record_health_batch(&self, updates: &[HealthUpdate]) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE storage_nodes SET healthy = ?2, last_contact = ?3, updated_at = ?3
                 WHERE id = ?1",
            )?;
            for update in updates {
                // A node removed mid-sweep is skipped
                stmt.execute(params![update.node_id, update.healthy, to_millis(update.at)])?;
            }
        }
        tx.commit()?;
        debug!("Persisted health of {} nodes", updates.len());
        Ok(())
    }

    fn set_active(&self, node_id: &str, active: bool) -> StoreResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE storage_nodes SET active = ?2, updated_at = ?3 WHERE id = ?1",
            params![node_id, active, to_millis(Utc::now())],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("node {}", node_id)));
        }
        Ok(())
    }
}

impl TokenStore for SQLiteMetadataStore {
    fn find_token(&self, signature: &str) -> StoreResult<Option<CapabilityToken>> {
        let row = {
            let conn = self.conn()?;
            conn.query_row(
                &format!("SELECT {} FROM capability_tokens WHERE signature = ?1", TOKEN_COLUMNS),
                params![signature],
                token_from_row,
            )
            .optional()?
        };
        match row {
            Some((mut token, method)) => {
                token.method = AccessMethod::parse(&method)?;
                Ok(Some(token))
            }
            None => Ok(None),
        }
    }

    fn insert_token(&self, token: &CapabilityToken) -> StoreResult<InsertOutcome> {
        let conn = self.conn()?;
        let result = conn.execute(
            "INSERT INTO capability_tokens (signature, bucket_name, object_name, method, expires_at,
                                            single_use, used, used_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                token.signature,
                token.bucket_name,
                token.object_name,
                token.method.as_str(),
                to_millis(token.expires_at),
                token.single_use,
                token.used,
                token.used_at.map(to_millis),
                to_millis(token.created_at)
            ],
        );
        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(e) if is_unique_violation(&e) => Ok(InsertOutcome::AlreadyExists),
            Err(e) => Err(e.into()),
        }
    }

    fn delete_token(&self, signature: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM capability_tokens WHERE signature = ?1", params![signature])?;
        Ok(())
    }

    fn mark_token_used(&self, signature: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE capability_tokens SET used = 1, used_at = ?2 WHERE signature = ?1",
            params![signature, to_millis(at)],
        )?;
        if changed == 0 {
            return Err(StoreError::TokenNotFound);
        }
        Ok(())
    }
}

impl NodeObjectIndex for SQLiteMetadataStore {
    fn put_node_object(&self, object: &NodeObject) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO node_objects
                 (object_id, bucket_id, bucket_name, filename, path, size, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                object.object_id,
                object.bucket_id,
                object.bucket_name,
                object.filename,
                object.path.to_string_lossy(),
                object.size as i64,
                to_millis(object.created_at)
            ],
        )?;
        Ok(())
    }

    fn find_node_object(&self, bucket_id: &str, object_id: &str) -> StoreResult<Option<NodeObject>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT object_id, bucket_id, bucket_name, filename, path, size, created_at
                 FROM node_objects WHERE bucket_id = ?1 AND object_id = ?2",
                params![bucket_id, object_id],
                node_object_from_row,
            )
            .optional()?;
        Ok(row)
    }

    fn remove_node_object(&self, bucket_name: &str, object_id: &str) -> StoreResult<Option<NodeObject>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let row = tx
            .query_row(
                "SELECT object_id, bucket_id, bucket_name, filename, path, size, created_at
                 FROM node_objects WHERE bucket_name = ?1 AND object_id = ?2",
                params![bucket_name, object_id],
                node_object_from_row,
            )
            .optional()?;
        if let Some(found) = &row {
            tx.execute(
                "DELETE FROM node_objects WHERE bucket_id = ?1 AND object_id = ?2",
                params![found.bucket_id, found.object_id],
            )?;
        }
        tx.commit()?;
        Ok(row)
    }
}

fn node_object_from_row(row: &Row<'_>) -> rusqlite::Result<NodeObject> {
    let path: String = row.get(4)?;
    let size: i64 = row.get(5)?;
    Ok(NodeObject {
        object_id: row.get(0)?,
        bucket_id: row.get(1)?,
        bucket_name: row.get(2)?,
        filename: row.get(3)?,
        path: PathBuf::from(path),
        size: size.max(0) as u64,
        created_at: from_millis(row.get(6)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_schema_on_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("metadata.sqlite");
        let store = SQLiteMetadataStore::open(&path, true).unwrap();
        assert!(path.exists());
        assert!(store.list_nodes().unwrap().is_empty());

        // Reopening keeps existing rows
        let node = StorageNode::new("n", "http://n:1", "s", 10, 0, true);
        store.insert_node(&node).unwrap();
        drop(store);
        let store = SQLiteMetadataStore::open(&path, true).unwrap();
        assert_eq!(store.list_nodes().unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_node_url_conflicts() {
        let store = SQLiteMetadataStore::in_memory().unwrap();
        store.insert_node(&StorageNode::new("a", "http://n:1", "s1", 10, 0, true)).unwrap();
        let err = store
            .insert_node(&StorageNode::new("b", "http://n:1/", "s2", 10, 0, true))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn test_corrupt_policy_surfaces_as_error() {
        let store = SQLiteMetadataStore::in_memory().unwrap();
        let bucket = Bucket::new("b", "u", false, AuthPolicy::default());
        store.create_bucket(&bucket).unwrap();
        store
            .conn()
            .unwrap()
            .execute("UPDATE buckets SET auth_policy = '{\"type\":\"oauth\"}'", [])
            .unwrap();
        assert!(store.find_bucket(&bucket.id).is_err());
    }
}
