//! The gallery store: an in-memory identity index backed by SQLite.
//!
//! Reads serve from the index under a read lock and always observe either
//! the pre- or post-mutation state of a record, never a partial one. All
//! mutations are serialized through a single async write gate and flow
//! through the SQLite connection's call queue, which completes each write
//! even if the caller's future is dropped.

use crate::transfer::{ExportedIdentity, GalleryExport, EXPORT_SCHEMA_VERSION};
use chrono::Utc;
use rollcall_core::{Embedding, Identity};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio_rusqlite::Connection;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("storage: {0}")]
    Storage(#[from] tokio_rusqlite::Error),
    #[error("embedding encoder version {found} does not match gallery version {expected}")]
    EncoderVersionMismatch { expected: String, found: String },
    #[error("identity must carry at least one non-empty reference embedding")]
    EmptyEmbedding,
    #[error("unsupported gallery schema version {0}")]
    UnsupportedSchemaVersion(u32),
    #[error("corrupt gallery record for {key}: {reason}")]
    CorruptRecord { key: String, reason: String },
    #[error("serialization: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Clone-safe handle to the gallery store.
#[derive(Clone)]
pub struct Gallery {
    inner: Arc<Inner>,
}

struct Inner {
    db: Connection,
    index: RwLock<HashMap<String, Identity>>,
    /// Serializes all mutations (strictly stronger than per-key).
    write_gate: Mutex<()>,
    encoder_version: String,
}

impl Gallery {
    /// Open (or create) a gallery database at the given path.
    ///
    /// `encoder_version` pins which embeddings this gallery accepts; rows
    /// persisted under another version are loaded but will never match
    /// until re-enrolled.
    pub async fn open(db_path: &Path, encoder_version: &str) -> Result<Self, GalleryError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Connection::open(db_path.to_path_buf()).await?;
        Self::init(db, encoder_version).await
    }

    /// Open an in-memory gallery (tests, diagnostics).
    pub async fn open_in_memory(encoder_version: &str) -> Result<Self, GalleryError> {
        let db = Connection::open_in_memory().await?;
        Self::init(db, encoder_version).await
    }

    async fn init(db: Connection, encoder_version: &str) -> Result<Self, GalleryError> {
        let rows = db
            .call(|conn| {
                conn.execute_batch(
                    "CREATE TABLE IF NOT EXISTS identities (
                        key             TEXT PRIMARY KEY,
                        name            TEXT NOT NULL,
                        embeddings      TEXT NOT NULL,
                        encoder_version TEXT NOT NULL,
                        enrolled_at     TEXT NOT NULL
                    )",
                )?;

                let mut stmt = conn.prepare(
                    "SELECT key, name, embeddings, encoder_version, enrolled_at FROM identities",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                Ok(rows)
            })
            .await?;

        let mut index = HashMap::with_capacity(rows.len());
        for (key, name, embeddings_json, row_version, enrolled_at) in rows {
            let embeddings: Vec<Embedding> =
                serde_json::from_str(&embeddings_json).map_err(|e| GalleryError::CorruptRecord {
                    key: key.clone(),
                    reason: e.to_string(),
                })?;
            if row_version != encoder_version {
                tracing::warn!(
                    key,
                    row_version,
                    gallery_version = encoder_version,
                    "identity was enrolled under a different encoder version and will not match until re-enrolled"
                );
            }
            index.insert(
                key.clone(),
                Identity {
                    key,
                    name,
                    embeddings,
                    enrolled_at,
                },
            );
        }

        tracing::info!(identities = index.len(), encoder_version, "gallery opened");

        Ok(Self {
            inner: Arc::new(Inner {
                db,
                index: RwLock::new(index),
                write_gate: Mutex::new(()),
                encoder_version: encoder_version.to_string(),
            }),
        })
    }

    /// Encoder version this gallery accepts.
    pub fn encoder_version(&self) -> &str {
        &self.inner.encoder_version
    }

    /// Insert or replace an identity's reference embedding.
    ///
    /// Replacing an existing key overwrites the previous record, never
    /// duplicates. Returns the stored identity.
    pub async fn enroll(
        &self,
        key: &str,
        name: &str,
        embedding: Embedding,
    ) -> Result<Identity, GalleryError> {
        if embedding.values.is_empty() {
            return Err(GalleryError::EmptyEmbedding);
        }
        if embedding.encoder_version != self.inner.encoder_version {
            return Err(GalleryError::EncoderVersionMismatch {
                expected: self.inner.encoder_version.clone(),
                found: embedding.encoder_version,
            });
        }

        let identity = Identity {
            key: key.to_string(),
            name: name.to_string(),
            embeddings: vec![embedding],
            enrolled_at: Utc::now().to_rfc3339(),
        };

        let _gate = self.inner.write_gate.lock().await;
        self.persist_with_retry(&identity).await?;
        self.inner
            .index
            .write()
            .await
            .insert(identity.key.clone(), identity.clone());

        tracing::info!(key = %identity.key, name = %identity.name, "identity enrolled");
        Ok(identity)
    }

    /// Delete an identity. Idempotent: removing an absent key is not an
    /// error and reports `false`.
    pub async fn remove(&self, key: &str) -> Result<bool, GalleryError> {
        let _gate = self.inner.write_gate.lock().await;

        let affected = match self.delete_row(key).await {
            Ok(n) => n,
            Err(err) => {
                tracing::warn!(key, error = %err, "gallery delete failed, retrying once");
                self.delete_row(key).await?
            }
        };
        let was_indexed = self.inner.index.write().await.remove(key).is_some();

        let found = affected > 0 || was_indexed;
        if found {
            tracing::info!(key, "identity removed");
        }
        Ok(found)
    }

    /// Snapshot of all enrolled identities, insertion order irrelevant.
    pub async fn all(&self) -> Vec<Identity> {
        self.inner.index.read().await.values().cloned().collect()
    }

    pub async fn get(&self, key: &str) -> Option<Identity> {
        self.inner.index.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.index.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.index.read().await.is_empty()
    }

    /// Export the gallery in the versioned interchange form.
    pub async fn export(&self) -> GalleryExport {
        let identities = self
            .all()
            .await
            .into_iter()
            .map(|identity| {
                (
                    identity.key,
                    ExportedIdentity {
                        name: identity.name,
                        embeddings: identity
                            .embeddings
                            .into_iter()
                            .map(|e| e.values)
                            .collect(),
                        enrolled_at: identity.enrolled_at,
                    },
                )
            })
            .collect::<BTreeMap<_, _>>();

        GalleryExport {
            schema_version: EXPORT_SCHEMA_VERSION,
            encoder_version: self.inner.encoder_version.clone(),
            exported_at: Utc::now(),
            identities,
        }
    }

    /// Import identities from an interchange snapshot, upserting by key.
    ///
    /// Refuses unknown schema versions and mismatched encoder versions
    /// outright; a partial import never starts. Returns how many identities
    /// were stored.
    pub async fn import(&self, export: GalleryExport) -> Result<usize, GalleryError> {
        if export.schema_version != EXPORT_SCHEMA_VERSION {
            return Err(GalleryError::UnsupportedSchemaVersion(export.schema_version));
        }
        if export.encoder_version != self.inner.encoder_version {
            return Err(GalleryError::EncoderVersionMismatch {
                expected: self.inner.encoder_version.clone(),
                found: export.encoder_version,
            });
        }

        let mut identities = Vec::with_capacity(export.identities.len());
        for (key, exported) in export.identities {
            if exported.embeddings.is_empty() || exported.embeddings.iter().any(|v| v.is_empty()) {
                return Err(GalleryError::EmptyEmbedding);
            }
            identities.push(Identity {
                key,
                name: exported.name,
                embeddings: exported
                    .embeddings
                    .into_iter()
                    .map(|values| Embedding {
                        values,
                        encoder_version: self.inner.encoder_version.clone(),
                    })
                    .collect(),
                enrolled_at: exported.enrolled_at,
            });
        }

        let _gate = self.inner.write_gate.lock().await;
        let count = identities.len();
        for identity in identities {
            self.persist_with_retry(&identity).await?;
            self.inner
                .index
                .write()
                .await
                .insert(identity.key.clone(), identity);
        }

        tracing::info!(imported = count, "gallery import complete");
        Ok(count)
    }

    /// Upsert one identity row; one retry on failure, then the error
    /// surfaces.
    async fn persist_with_retry(&self, identity: &Identity) -> Result<(), GalleryError> {
        match self.persist(identity).await {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::warn!(key = %identity.key, error = %err, "gallery write failed, retrying once");
                self.persist(identity).await
            }
        }
    }

    async fn persist(&self, identity: &Identity) -> Result<(), GalleryError> {
        let key = identity.key.clone();
        let name = identity.name.clone();
        let embeddings_json = serde_json::to_string(&identity.embeddings)?;
        let encoder_version = self.inner.encoder_version.clone();
        let enrolled_at = identity.enrolled_at.clone();

        self.inner
            .db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO identities (key, name, embeddings, encoder_version, enrolled_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(key) DO UPDATE SET
                        name = excluded.name,
                        embeddings = excluded.embeddings,
                        encoder_version = excluded.encoder_version,
                        enrolled_at = excluded.enrolled_at",
                    rusqlite::params![key, name, embeddings_json, encoder_version, enrolled_at],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn delete_row(&self, key: &str) -> Result<usize, tokio_rusqlite::Error> {
        let key = key.to_string();
        self.inner
            .db
            .call(move |conn| {
                let n = conn.execute("DELETE FROM identities WHERE key = ?1", rusqlite::params![key])?;
                Ok(n)
            })
            .await
    }
}
