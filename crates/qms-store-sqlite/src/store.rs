//! [`SqliteStore`] — the SQLite implementation of the catalog, record store,
//! and live-connection traits.

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use qms_core::{
  artifact::{BackupArtifact, NewArtifact},
  audit::{AuditEntry, NewAuditEntry},
  catalog::{ArtifactCatalog, ArtifactQuery},
  live::LiveConnections,
  records::RecordStore,
};

use crate::{
  encode::{
    encode_date, encode_dt, encode_kind, encode_uuid, RawArtifact,
    RawAuditEntry,
  },
  schema::SCHEMA,
  Error, Result,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A QMS store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted. After
/// [`LiveConnections::quiesce`] every clone is dead; callers reopen with
/// [`SqliteStore::open`].
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Force a WAL checkpoint in TRUNCATE mode, merging the journal into the
  /// main file.
  pub async fn checkpoint(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Delete matching rows and return how many went away. Shared by the
  /// `delete_*_before` trait methods; each call is a single DELETE statement
  /// and therefore atomic on its own.
  async fn delete_before(&self, sql: &'static str, cutoff: String) -> Result<u64> {
    let deleted = self
      .conn
      .call(move |conn| Ok(conn.execute(sql, rusqlite::params![cutoff])?))
      .await?;
    Ok(deleted as u64)
  }

  async fn count_before(&self, sql: &'static str, cutoff: String) -> Result<u64> {
    let count: i64 = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(sql, rusqlite::params![cutoff], |r| r.get(0))?)
      })
      .await?;
    Ok(count.max(0) as u64)
  }

  // ── Seed helpers for the business collections ─────────────────────────
  //
  // The CRUD layer that normally populates these tables is out of scope;
  // these exist so callers (and tests) can stage records for archival.

  pub async fn add_performance_record(
    &self,
    summary: &str,
    created_at: DateTime<Utc>,
  ) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let id_str = encode_uuid(id);
    let at_str = encode_dt(created_at);
    let summary = summary.to_owned();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO performance_records (record_id, summary, created_at)
           VALUES (?1, ?2, ?3)",
          rusqlite::params![id_str, summary, at_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(id)
  }

  pub async fn add_nonconformance(
    &self,
    title: &str,
    occurred_on: NaiveDate,
  ) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let id_str = encode_uuid(id);
    let on_str = encode_date(occurred_on);
    let title = title.to_owned();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO nonconformances (nc_id, title, occurred_on)
           VALUES (?1, ?2, ?3)",
          rusqlite::params![id_str, title, on_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(id)
  }

  pub async fn add_complaint(
    &self,
    title: &str,
    occurred_on: NaiveDate,
  ) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let id_str = encode_uuid(id);
    let on_str = encode_date(occurred_on);
    let title = title.to_owned();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO customer_complaints (complaint_id, title, occurred_on)
           VALUES (?1, ?2, ?3)",
          rusqlite::params![id_str, title, on_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(id)
  }

  /// The most recent audit entries, newest first.
  pub async fn recent_audit_entries(&self, limit: u32) -> Result<Vec<AuditEntry>> {
    let raws: Vec<RawAuditEntry> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT entry_id, actor, action, target, detail, origin, created_at
           FROM audit_log
           ORDER BY created_at DESC
           LIMIT ?1",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![limit as i64], |row| {
            Ok(RawAuditEntry {
              entry_id:   row.get(0)?,
              actor:      row.get(1)?,
              action:     row.get(2)?,
              target:     row.get(3)?,
              detail:     row.get(4)?,
              origin:     row.get(5)?,
              created_at: row.get(6)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAuditEntry::into_entry).collect()
  }
}

// ─── ArtifactCatalog impl ────────────────────────────────────────────────────

impl ArtifactCatalog for SqliteStore {
  type Error = Error;

  async fn add_artifact(&self, input: NewArtifact) -> Result<BackupArtifact> {
    let artifact = BackupArtifact {
      artifact_id:  Uuid::new_v4(),
      captured_at:  Utc::now(),
      size_bytes:   input.size_bytes,
      kind:         input.kind,
      storage_path: input.storage_path,
      initiated_by: input.initiated_by,
      note:         input.note,
    };

    let id_str   = encode_uuid(artifact.artifact_id);
    let at_str   = encode_dt(artifact.captured_at);
    let size     = artifact.size_bytes as i64;
    let kind_str = encode_kind(artifact.kind).to_owned();
    let path     = artifact.storage_path.clone();
    let by_str   = artifact.initiated_by.map(encode_uuid);
    let note     = artifact.note.clone();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO artifacts (
             artifact_id, captured_at, size_bytes, kind,
             storage_path, initiated_by, note
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          rusqlite::params![id_str, at_str, size, kind_str, path, by_str, note],
        )?;
        Ok(())
      })
      .await?;

    Ok(artifact)
  }

  async fn get_artifact(&self, id: Uuid) -> Result<Option<BackupArtifact>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawArtifact> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT artifact_id, captured_at, size_bytes, kind,
                    storage_path, initiated_by, note
             FROM artifacts WHERE artifact_id = ?1",
            rusqlite::params![id_str],
            |row| {
              Ok(RawArtifact {
                artifact_id:  row.get(0)?,
                captured_at:  row.get(1)?,
                size_bytes:   row.get(2)?,
                kind:         row.get(3)?,
                storage_path: row.get(4)?,
                initiated_by: row.get(5)?,
                note:         row.get(6)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawArtifact::into_artifact).transpose()
  }

  async fn list_artifacts(&self, query: ArtifactQuery) -> Result<Vec<BackupArtifact>> {
    let kind_str = query.kind.map(encode_kind).map(str::to_owned);
    let by_str   = query.initiated_by.map(encode_uuid);

    let raws: Vec<RawArtifact> = self
      .conn
      .call(move |conn| {
        // NULL filter parameters match everything.
        let mut stmt = conn.prepare(
          "SELECT artifact_id, captured_at, size_bytes, kind,
                  storage_path, initiated_by, note
           FROM artifacts
           WHERE (?1 IS NULL OR kind = ?1)
             AND (?2 IS NULL OR initiated_by = ?2)
           ORDER BY captured_at DESC",
        )?;
        let rows = stmt
          .query_map(
            rusqlite::params![kind_str.as_deref(), by_str.as_deref()],
            |row| {
              Ok(RawArtifact {
                artifact_id:  row.get(0)?,
                captured_at:  row.get(1)?,
                size_bytes:   row.get(2)?,
                kind:         row.get(3)?,
                storage_path: row.get(4)?,
                initiated_by: row.get(5)?,
                note:         row.get(6)?,
              })
            },
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawArtifact::into_artifact).collect()
  }

  async fn delete_artifact(&self, id: Uuid) -> Result<bool> {
    let id_str = encode_uuid(id);

    let deleted = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM artifacts WHERE artifact_id = ?1",
          rusqlite::params![id_str],
        )?)
      })
      .await?;

    Ok(deleted > 0)
  }
}

// ─── RecordStore impl ────────────────────────────────────────────────────────

impl RecordStore for SqliteStore {
  type Error = Error;

  async fn count_performance_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
    self
      .count_before(
        "SELECT COUNT(*) FROM performance_records WHERE created_at < ?1",
        encode_dt(cutoff),
      )
      .await
  }

  async fn delete_performance_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
    self
      .delete_before(
        "DELETE FROM performance_records WHERE created_at < ?1",
        encode_dt(cutoff),
      )
      .await
  }

  async fn count_nonconformances_before(&self, cutoff: NaiveDate) -> Result<u64> {
    self
      .count_before(
        "SELECT COUNT(*) FROM nonconformances WHERE occurred_on < ?1",
        encode_date(cutoff),
      )
      .await
  }

  async fn delete_nonconformances_before(&self, cutoff: NaiveDate) -> Result<u64> {
    self
      .delete_before(
        "DELETE FROM nonconformances WHERE occurred_on < ?1",
        encode_date(cutoff),
      )
      .await
  }

  async fn count_complaints_before(&self, cutoff: NaiveDate) -> Result<u64> {
    self
      .count_before(
        "SELECT COUNT(*) FROM customer_complaints WHERE occurred_on < ?1",
        encode_date(cutoff),
      )
      .await
  }

  async fn delete_complaints_before(&self, cutoff: NaiveDate) -> Result<u64> {
    self
      .delete_before(
        "DELETE FROM customer_complaints WHERE occurred_on < ?1",
        encode_date(cutoff),
      )
      .await
  }

  async fn count_audit_entries_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
    self
      .count_before(
        "SELECT COUNT(*) FROM audit_log WHERE created_at < ?1",
        encode_dt(cutoff),
      )
      .await
  }

  async fn delete_audit_entries_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
    self
      .delete_before(
        "DELETE FROM audit_log WHERE created_at < ?1",
        encode_dt(cutoff),
      )
      .await
  }

  async fn append_audit(&self, entry: NewAuditEntry) -> Result<AuditEntry> {
    let persisted = AuditEntry {
      entry_id:   Uuid::new_v4(),
      actor:      entry.actor,
      action:     entry.action,
      target:     entry.target,
      detail:     entry.detail,
      origin:     entry.origin,
      created_at: Utc::now(),
    };

    let id_str     = encode_uuid(persisted.entry_id);
    let actor_str  = persisted.actor.map(encode_uuid);
    let action_str = persisted.action.as_str().to_owned();
    let target     = persisted.target.clone();
    let detail     = persisted.detail.clone();
    let origin     = persisted.origin.clone();
    let at_str     = encode_dt(persisted.created_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO audit_log (
             entry_id, actor, action, target, detail, origin, created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          rusqlite::params![
            id_str, actor_str, action_str, target, detail, origin, at_str
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(persisted)
  }
}

// ─── LiveConnections impl ────────────────────────────────────────────────────

impl LiveConnections for SqliteStore {
  type Error = Error;

  /// Close the shared background connection. Every clone of this store is
  /// unusable afterwards; the caller reopens once the file swap is done.
  async fn quiesce(&self) -> Result<()> {
    self.conn.clone().close().await?;
    Ok(())
  }
}
