//! SQLite-backed local persistent store.
//!
//! Three partitions, all in one file so a device snapshot is a single copy:
//! `snapshots` (last successfully loaded collection per resource type),
//! `outbox` (mutations not yet confirmed by the server), and
//! `correlations` (tempId→realId mappings recorded once the server assigns
//! an id, so push events can be matched back to their outbox entry).

use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use dentra_types::{Operation, OutboxEntry, OutboxId, Resource, ResourceId, ResourceType, TempId};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Durable, resource-type-partitioned storage surviving process restarts.
pub struct LocalStore {
    conn: Arc<Mutex<Connection>>,
}

impl LocalStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS snapshots (
                resource_type TEXT NOT NULL,
                identity_key TEXT NOT NULL,
                body TEXT NOT NULL,
                position INTEGER NOT NULL,
                UNIQUE(resource_type, identity_key)
            );

            CREATE TABLE IF NOT EXISTS outbox (
                outbox_id TEXT PRIMARY KEY,
                temp_id TEXT NOT NULL,
                resource_type TEXT NOT NULL,
                operation TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS correlations (
                real_id TEXT NOT NULL,
                resource_type TEXT NOT NULL,
                temp_id TEXT NOT NULL,
                UNIQUE(real_id, resource_type)
            );
            ",
        )?;
        Ok(())
    }

    // ── Snapshot cache ───────────────────────────────────────────

    /// Returns the last successfully cached collection, in stored order.
    /// A resource type that was never cached yields an empty vector.
    pub fn get_all(&self, resource_type: ResourceType) -> StoreResult<Vec<Resource>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT body FROM snapshots WHERE resource_type = ?1 ORDER BY position",
        )?;
        let rows = stmt.query_map(params![resource_type.as_str()], |row| {
            row.get::<_, String>(0)
        })?;

        let mut resources = Vec::new();
        for row in rows {
            let body = row?;
            match serde_json::from_str::<Resource>(&body) {
                Ok(resource) => resources.push(resource),
                Err(e) => {
                    warn!("skipping corrupt cached row for {}: {}", resource_type, e);
                }
            }
        }
        Ok(resources)
    }

    /// Idempotent upsert of a single resource. A new resource is appended
    /// after the existing snapshot; an existing one keeps its position.
    pub fn put(&self, resource_type: ResourceType, resource: &Resource) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let key = resource.identity.storage_key();
        let body = serde_json::to_string(resource)?;

        let existing: Option<i64> = conn
            .query_row(
                "SELECT position FROM snapshots WHERE resource_type = ?1 AND identity_key = ?2",
                params![resource_type.as_str(), key],
                |row| row.get(0),
            )
            .optional()?;

        let position = match existing {
            Some(p) => p,
            None => conn.query_row(
                "SELECT COALESCE(MAX(position) + 1, 0) FROM snapshots WHERE resource_type = ?1",
                params![resource_type.as_str()],
                |row| row.get(0),
            )?,
        };

        conn.execute(
            "INSERT OR REPLACE INTO snapshots (resource_type, identity_key, body, position)
             VALUES (?1, ?2, ?3, ?4)",
            params![resource_type.as_str(), key, body, position],
        )?;
        Ok(())
    }

    /// Replaces the whole snapshot for a resource type in one transaction.
    pub fn put_all(&self, resource_type: ResourceType, resources: &[Resource]) -> StoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM snapshots WHERE resource_type = ?1",
            params![resource_type.as_str()],
        )?;
        for (position, resource) in resources.iter().enumerate() {
            let body = serde_json::to_string(resource)?;
            tx.execute(
                "INSERT INTO snapshots (resource_type, identity_key, body, position)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    resource_type.as_str(),
                    resource.identity.storage_key(),
                    body,
                    position as i64,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Removes one cached resource by its server-assigned id. Idempotent.
    pub fn remove(&self, resource_type: ResourceType, id: &ResourceId) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM snapshots WHERE resource_type = ?1 AND identity_key = ?2",
            params![resource_type.as_str(), format!("real:{id}")],
        )?;
        Ok(())
    }

    /// Wipes the cached snapshot for one resource type. Idempotent.
    pub fn clear(&self, resource_type: ResourceType) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM snapshots WHERE resource_type = ?1",
            params![resource_type.as_str()],
        )?;
        Ok(())
    }

    /// Wipes every partition: snapshots, outbox, and correlations.
    pub fn clear_all(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "DELETE FROM snapshots;
             DELETE FROM outbox;
             DELETE FROM correlations;",
        )?;
        Ok(())
    }

    // ── Outbox ───────────────────────────────────────────────────

    /// Appends an outbox entry, returning its id.
    pub fn outbox_append(&self, entry: &OutboxEntry) -> StoreResult<OutboxId> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO outbox (outbox_id, temp_id, resource_type, operation, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.id.to_string(),
                entry.temp_id.to_string(),
                entry.resource_type.as_str(),
                entry.operation.as_str(),
                serde_json::to_string(&entry.payload)?,
                entry.created_at.to_rfc3339(),
            ],
        )?;
        Ok(entry.id)
    }

    /// Looks up an outbox entry by its id.
    pub fn outbox_get(&self, outbox_id: &OutboxId) -> StoreResult<Option<OutboxEntry>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT outbox_id, temp_id, resource_type, operation, payload, created_at
                 FROM outbox WHERE outbox_id = ?1",
                params![outbox_id.to_string()],
                row_to_outbox_parts,
            )
            .optional()?;
        row.map(parts_to_entry).transpose()
    }

    /// Looks up the pending entry for a provisional identity.
    pub fn outbox_find_by_temp_id(&self, temp_id: &TempId) -> StoreResult<Option<OutboxEntry>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT outbox_id, temp_id, resource_type, operation, payload, created_at
                 FROM outbox WHERE temp_id = ?1",
                params![temp_id.to_string()],
                row_to_outbox_parts,
            )
            .optional()?;
        row.map(parts_to_entry).transpose()
    }

    /// Looks up the pending entry for a server-assigned id, going through
    /// the correlation recorded when the server first handed the id out.
    pub fn outbox_find_by_real_id(
        &self,
        real_id: &ResourceId,
        resource_type: ResourceType,
    ) -> StoreResult<Option<OutboxEntry>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT o.outbox_id, o.temp_id, o.resource_type, o.operation, o.payload, o.created_at
                 FROM outbox o
                 JOIN correlations c ON c.temp_id = o.temp_id
                 WHERE c.real_id = ?1 AND c.resource_type = ?2",
                params![real_id.as_str(), resource_type.as_str()],
                row_to_outbox_parts,
            )
            .optional()?;
        row.map(parts_to_entry).transpose()
    }

    /// Deletes an outbox entry. Idempotent.
    pub fn outbox_delete(&self, outbox_id: &OutboxId) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM outbox WHERE outbox_id = ?1",
            params![outbox_id.to_string()],
        )?;
        Ok(())
    }

    /// Returns the pending entries for one resource type, oldest first.
    pub fn outbox_pending(&self, resource_type: ResourceType) -> StoreResult<Vec<OutboxEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT outbox_id, temp_id, resource_type, operation, payload, created_at
             FROM outbox WHERE resource_type = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![resource_type.as_str()], row_to_outbox_parts)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(parts_to_entry(row?)?);
        }
        Ok(entries)
    }

    // ── Correlations ─────────────────────────────────────────────

    /// Records the tempId→realId mapping for a resource. Written the moment
    /// the server assigns an id; replaces any earlier mapping for that id.
    pub fn record_correlation(
        &self,
        temp_id: &TempId,
        real_id: &ResourceId,
        resource_type: ResourceType,
    ) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO correlations (real_id, resource_type, temp_id)
             VALUES (?1, ?2, ?3)",
            params![
                real_id.as_str(),
                resource_type.as_str(),
                temp_id.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Looks up the provisional identity recorded for a server id.
    pub fn find_correlation(
        &self,
        real_id: &ResourceId,
        resource_type: ResourceType,
    ) -> StoreResult<Option<TempId>> {
        let conn = self.conn.lock().unwrap();
        let temp: Option<String> = conn
            .query_row(
                "SELECT temp_id FROM correlations WHERE real_id = ?1 AND resource_type = ?2",
                params![real_id.as_str(), resource_type.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        match temp {
            Some(s) => {
                let parsed = TempId::parse(&s)
                    .map_err(|e| StoreError::InvalidData(format!("bad temp_id in correlation: {e}")))?;
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }

    /// Removes the correlation for a server id. Idempotent.
    pub fn delete_correlation(
        &self,
        real_id: &ResourceId,
        resource_type: ResourceType,
    ) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM correlations WHERE real_id = ?1 AND resource_type = ?2",
            params![real_id.as_str(), resource_type.as_str()],
        )?;
        Ok(())
    }
}

type OutboxParts = (String, String, String, String, String, String);

fn row_to_outbox_parts(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutboxParts> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn parts_to_entry(parts: OutboxParts) -> StoreResult<OutboxEntry> {
    let (outbox_id, temp_id, resource_type, operation, payload, created_at) = parts;

    let id = OutboxId::parse(&outbox_id)
        .map_err(|e| StoreError::InvalidData(format!("bad outbox_id: {e}")))?;
    let temp_id = TempId::parse(&temp_id)
        .map_err(|e| StoreError::InvalidData(format!("bad temp_id: {e}")))?;
    let resource_type = ResourceType::from_wire(&resource_type)
        .ok_or_else(|| StoreError::InvalidData(format!("bad resource_type: {resource_type}")))?;
    let operation: Operation = operation
        .parse()
        .map_err(|e: String| StoreError::InvalidData(e))?;
    let payload = serde_json::from_str(&payload)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| StoreError::InvalidData(format!("bad created_at: {e}")))?
        .with_timezone(&Utc);

    Ok(OutboxEntry {
        id,
        temp_id,
        resource_type,
        operation,
        payload,
        created_at,
    })
}
