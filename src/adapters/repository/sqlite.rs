//! SQLite-backed repository.
//!
//! A single connection behind a mutex; every call runs on the blocking
//! pool so the async runtime never waits on disk.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::AssetRepository;
use crate::domain::{AssetId, AssetStatus, ContentHash, Derivative, ImageFormat, MediaAsset};
use crate::error::{MediaError, MediaResult};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS media_assets (
    id            TEXT PRIMARY KEY,
    owner_user_id TEXT NOT NULL,
    content_hash  TEXT NOT NULL,
    status        TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    last_error    TEXT,
    UNIQUE (owner_user_id, content_hash)
);

CREATE TABLE IF NOT EXISTS derivatives (
    asset_id     TEXT NOT NULL REFERENCES media_assets(id) ON DELETE CASCADE,
    variant      TEXT NOT NULL,
    format       TEXT NOT NULL,
    width        INTEGER NOT NULL,
    height       INTEGER NOT NULL,
    storage_key  TEXT NOT NULL,
    checksum     TEXT NOT NULL,
    size_bytes   INTEGER NOT NULL,
    revision     INTEGER NOT NULL,
    generated_at TEXT NOT NULL,
    PRIMARY KEY (asset_id, variant)
);
"#;

const ASSET_COLUMNS: &str =
    "id, owner_user_id, content_hash, status, created_at, updated_at, last_error";

const DERIVATIVE_COLUMNS: &str =
    "asset_id, variant, format, width, height, storage_key, checksum, size_bytes, revision, generated_at";

/// Raw asset row before domain conversion
struct AssetRow {
    id: String,
    owner_user_id: String,
    content_hash: String,
    status: String,
    created_at: String,
    updated_at: String,
    last_error: Option<String>,
}

impl AssetRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_user_id: row.get(1)?,
            content_hash: row.get(2)?,
            status: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
            last_error: row.get(6)?,
        })
    }

    fn into_asset(self) -> MediaResult<MediaAsset> {
        Ok(MediaAsset {
            id: AssetId::parse(self.id),
            owner_user_id: self.owner_user_id,
            content_hash: ContentHash::from_hex(self.content_hash),
            status: self.status.parse().map_err(MediaError::Repository)?,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
            last_error: self.last_error,
        })
    }
}

/// Raw derivative row before domain conversion
struct DerivativeRow {
    asset_id: String,
    variant: String,
    format: String,
    width: u32,
    height: u32,
    storage_key: String,
    checksum: String,
    size_bytes: i64,
    revision: u32,
    generated_at: String,
}

impl DerivativeRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            asset_id: row.get(0)?,
            variant: row.get(1)?,
            format: row.get(2)?,
            width: row.get(3)?,
            height: row.get(4)?,
            storage_key: row.get(5)?,
            checksum: row.get(6)?,
            size_bytes: row.get(7)?,
            revision: row.get(8)?,
            generated_at: row.get(9)?,
        })
    }

    fn into_derivative(self) -> MediaResult<Derivative> {
        Ok(Derivative {
            asset_id: AssetId::parse(self.asset_id),
            variant: self.variant,
            format: self
                .format
                .parse::<ImageFormat>()
                .map_err(MediaError::Repository)?,
            width: self.width,
            height: self.height,
            storage_key: self.storage_key,
            checksum: self.checksum,
            size_bytes: self.size_bytes.max(0) as u64,
            revision: self.revision,
            generated_at: parse_time(&self.generated_at)?,
        })
    }
}

fn parse_time(raw: &str) -> MediaResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| MediaError::Repository(format!("Bad timestamp '{}': {}", raw, e)))
}

fn db_err(e: rusqlite::Error) -> MediaError {
    MediaError::Repository(e.to_string())
}

/// Repository persisted in a SQLite database file
#[derive(Clone)]
pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Open (or create) the database at `path`
    pub fn open(path: &Path) -> MediaResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        Self::init(conn)
    }

    /// Private in-memory database
    pub fn in_memory() -> MediaResult<Self> {
        Self::init(Connection::open_in_memory().map_err(db_err)?)
    }

    fn init(conn: Connection) -> MediaResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> MediaResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> MediaResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&guard)
        })
        .await
        .map_err(|e| MediaError::Repository(format!("Database task failed: {}", e)))?
    }
}

fn select_asset(conn: &Connection, id: &str) -> MediaResult<Option<MediaAsset>> {
    let sql = format!("SELECT {} FROM media_assets WHERE id = ?1", ASSET_COLUMNS);
    conn.query_row(&sql, params![id], AssetRow::from_row)
        .optional()
        .map_err(db_err)?
        .map(AssetRow::into_asset)
        .transpose()
}

#[async_trait]
impl AssetRepository for SqliteRepository {
    async fn get_asset(&self, id: &AssetId) -> MediaResult<Option<MediaAsset>> {
        let id = id.to_string();
        self.with_conn(move |conn| select_asset(conn, &id)).await
    }

    async fn create_if_absent(&self, asset: MediaAsset) -> MediaResult<MediaAsset> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO media_assets (id, owner_user_id, content_hash, status, created_at, updated_at, last_error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    asset.id.as_str(),
                    asset.owner_user_id,
                    asset.content_hash.as_str(),
                    asset.status.as_str(),
                    asset.created_at.to_rfc3339(),
                    asset.updated_at.to_rfc3339(),
                    asset.last_error,
                ],
            )
            .map_err(db_err)?;

            select_asset(conn, asset.id.as_str())?
                .ok_or_else(|| MediaError::Repository(format!("asset {} vanished after insert", asset.id)))
        })
        .await
    }

    async fn set_status(
        &self,
        id: &AssetId,
        status: AssetStatus,
        last_error: Option<String>,
    ) -> MediaResult<MediaAsset> {
        let asset_id = id.clone();
        let id = id.to_string();
        self.with_conn(move |conn| {
            let current = select_asset(conn, &id)?
                .ok_or_else(|| MediaError::NotFound(format!("asset {}", id)))?
                .status;
            let busy = |status| MediaError::Busy {
                asset_id: asset_id.clone(),
                status,
            };
            if !current.can_transition_to(status) {
                return Err(busy(current));
            }

            // only applies if nobody moved the row since the read above
            let updated = conn
                .execute(
                    "UPDATE media_assets SET status = ?2, last_error = ?3, updated_at = ?4 WHERE id = ?1 AND status = ?5",
                    params![id, status.as_str(), last_error, Utc::now().to_rfc3339(), current.as_str()],
                )
                .map_err(db_err)?;

            let asset = select_asset(conn, &id)?
                .ok_or_else(|| MediaError::NotFound(format!("asset {}", id)))?;
            if updated == 0 {
                return Err(busy(asset.status));
            }
            Ok(asset)
        })
        .await
    }

    async fn save_derivatives(&self, derivatives: &[Derivative]) -> MediaResult<()> {
        let derivatives = derivatives.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction().map_err(db_err)?;
            for d in &derivatives {
                tx.execute(
                    "INSERT INTO derivatives (asset_id, variant, format, width, height, storage_key, checksum, size_bytes, revision, generated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                     ON CONFLICT (asset_id, variant) DO UPDATE SET
                        format = excluded.format,
                        width = excluded.width,
                        height = excluded.height,
                        storage_key = excluded.storage_key,
                        checksum = excluded.checksum,
                        size_bytes = excluded.size_bytes,
                        revision = excluded.revision,
                        generated_at = excluded.generated_at",
                    params![
                        d.asset_id.as_str(),
                        d.variant,
                        d.format.extension(),
                        d.width,
                        d.height,
                        d.storage_key,
                        d.checksum,
                        d.size_bytes as i64,
                        d.revision,
                        d.generated_at.to_rfc3339(),
                    ],
                )
                .map_err(db_err)?;
            }
            tx.commit().map_err(db_err)
        })
        .await
    }

    async fn get_derivative(&self, id: &AssetId, variant: &str) -> MediaResult<Option<Derivative>> {
        let id = id.to_string();
        let variant = variant.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM derivatives WHERE asset_id = ?1 AND variant = ?2",
                DERIVATIVE_COLUMNS
            );
            conn.query_row(&sql, params![id, variant], DerivativeRow::from_row)
                .optional()
                .map_err(db_err)?
                .map(DerivativeRow::into_derivative)
                .transpose()
        })
        .await
    }

    async fn list_derivatives(&self, id: &AssetId) -> MediaResult<Vec<Derivative>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM derivatives WHERE asset_id = ?1 ORDER BY variant",
                DERIVATIVE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql).map_err(db_err)?;
            let rows = stmt
                .query_map(params![id], DerivativeRow::from_row)
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            rows.into_iter().map(DerivativeRow::into_derivative).collect()
        })
        .await
    }

    async fn delete_asset(&self, id: &AssetId) -> MediaResult<bool> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction().map_err(db_err)?;
            tx.execute("DELETE FROM derivatives WHERE asset_id = ?1", params![id])
                .map_err(db_err)?;
            let removed = tx
                .execute("DELETE FROM media_assets WHERE id = ?1", params![id])
                .map_err(db_err)?;
            tx.commit().map_err(db_err)?;
            Ok(removed > 0)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn derivative(asset: &MediaAsset, variant: &str, revision: u32) -> Derivative {
        Derivative {
            asset_id: asset.id.clone(),
            variant: variant.to_string(),
            format: ImageFormat::Webp,
            width: 64,
            height: 48,
            storage_key: crate::domain::storage_key(
                &asset.owner_user_id,
                &asset.content_hash,
                variant,
                ImageFormat::Webp,
                revision,
            ),
            checksum: format!("sum-{}", revision),
            size_bytes: 1234,
            revision,
            generated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_asset_lifecycle_persists() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("media.db");
        let asset = MediaAsset::new("user-42", ContentHash::of(b"img"));

        {
            let repo = SqliteRepository::open(&path).unwrap();
            repo.create_if_absent(asset.clone()).await.unwrap();
            repo.set_status(&asset.id, AssetStatus::Processing, None)
                .await
                .unwrap();
            repo.set_status(&asset.id, AssetStatus::Failed, Some("decode".into()))
                .await
                .unwrap();
        }

        let reopened = SqliteRepository::open(&path).unwrap();
        let stored = reopened.get_asset(&asset.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AssetStatus::Failed);
        assert_eq!(stored.last_error.as_deref(), Some("decode"));
        assert_eq!(stored.owner_user_id, "user-42");
    }

    #[tokio::test]
    async fn test_ready_asset_cannot_be_reopened() {
        let repo = SqliteRepository::in_memory().unwrap();
        let asset = MediaAsset::new("user-1", ContentHash::of(b"a"));
        repo.create_if_absent(asset.clone()).await.unwrap();
        repo.set_status(&asset.id, AssetStatus::Processing, None).await.unwrap();
        repo.set_status(&asset.id, AssetStatus::Ready, None).await.unwrap();

        let result = repo.set_status(&asset.id, AssetStatus::Processing, None).await;
        assert!(matches!(
            result,
            Err(MediaError::Busy {
                status: AssetStatus::Ready,
                ..
            })
        ));
        let stored = repo.get_asset(&asset.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AssetStatus::Ready);
    }

    #[tokio::test]
    async fn test_create_if_absent_is_idempotent() {
        let repo = SqliteRepository::in_memory().unwrap();
        let asset = MediaAsset::new("user-1", ContentHash::of(b"a"));

        repo.create_if_absent(asset.clone()).await.unwrap();
        repo.set_status(&asset.id, AssetStatus::Processing, None)
            .await
            .unwrap();
        let again = repo.create_if_absent(asset.clone()).await.unwrap();

        assert_eq!(again.status, AssetStatus::Processing);
    }

    #[tokio::test]
    async fn test_derivative_upsert_swaps_key() {
        let repo = SqliteRepository::in_memory().unwrap();
        let asset = MediaAsset::new("user-1", ContentHash::of(b"a"));
        repo.create_if_absent(asset.clone()).await.unwrap();

        repo.save_derivatives(&[derivative(&asset, "thumb-64", 0), derivative(&asset, "thumb-256", 0)])
            .await
            .unwrap();
        repo.save_derivatives(&[derivative(&asset, "thumb-64", 1)])
            .await
            .unwrap();

        let thumb = repo.get_derivative(&asset.id, "thumb-64").await.unwrap().unwrap();
        assert_eq!(thumb.revision, 1);
        assert!(thumb.storage_key.ends_with("thumb-64.r1.webp"));

        let all = repo.list_derivatives(&asset.id).await.unwrap();
        assert_eq!(
            all.iter().map(|d| d.variant.as_str()).collect::<Vec<_>>(),
            vec!["thumb-256", "thumb-64"]
        );
    }

    #[tokio::test]
    async fn test_delete_asset_removes_derivatives() {
        let repo = SqliteRepository::in_memory().unwrap();
        let asset = MediaAsset::new("user-1", ContentHash::of(b"a"));
        repo.create_if_absent(asset.clone()).await.unwrap();
        repo.save_derivatives(&[derivative(&asset, "thumb-64", 0)])
            .await
            .unwrap();

        assert!(repo.delete_asset(&asset.id).await.unwrap());
        assert!(!repo.delete_asset(&asset.id).await.unwrap());
        assert!(repo.list_derivatives(&asset.id).await.unwrap().is_empty());
    }
}
