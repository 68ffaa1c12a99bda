//! Pending draft persistence.
//!
//! The durable store is authoritative; the in-memory map is a read-through
//! cache so the common path avoids a query. A draft written by another process
//! is picked up by [`DraftStore::resync`] (last write wins).

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{self, DraftRow, Pool};
use crate::model::{DraftKind, PendingDraft};

/// Where a loaded draft came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftSource {
    Memory,
    Storage,
}

pub struct DraftStore {
    pool: Pool,
    cache: RwLock<HashMap<DraftKind, PendingDraft>>,
}

impl std::fmt::Debug for DraftStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DraftStore").finish_non_exhaustive()
    }
}

fn to_row(draft: &PendingDraft) -> Result<DraftRow> {
    Ok(DraftRow {
        storage_key: draft.kind.storage_key().to_string(),
        id: draft.id.to_string(),
        kind: draft.kind.as_str().to_string(),
        payload: serde_json::to_string(&draft.payload).context("failed to encode draft payload")?,
        checkout_session_id: draft.checkout_session_id.clone(),
        created_at: draft.created_at.to_rfc3339(),
    })
}

fn from_row(row: DraftRow) -> Result<PendingDraft> {
    let kind = DraftKind::parse(&row.kind)
        .ok_or_else(|| anyhow!("draft {} has unknown kind {}", row.id, row.kind))?;
    let id = Uuid::parse_str(&row.id).with_context(|| format!("draft id {} is not a UUID", row.id))?;
    let payload = serde_json::from_str(&row.payload)
        .with_context(|| format!("draft {} payload is not valid JSON", row.id))?;
    let created_at = DateTime::parse_from_rfc3339(&row.created_at)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("draft {} has bad timestamp {}", row.id, row.created_at))?;
    Ok(PendingDraft {
        id,
        kind,
        payload,
        created_at,
        checkout_session_id: row.checkout_session_id,
    })
}

impl DraftStore {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    fn cached(&self, kind: DraftKind) -> Option<PendingDraft> {
        self.cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&kind)
            .cloned()
    }

    fn cache_put(&self, draft: PendingDraft) {
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(draft.kind, draft);
    }

    fn cache_evict(&self, kind: DraftKind) {
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&kind);
    }

    /// Persist a draft to both tiers, replacing any draft of the same kind.
    pub async fn save(&self, draft: &PendingDraft) -> Result<()> {
        db::upsert_draft(&self.pool, &to_row(draft)?).await?;
        self.cache_put(draft.clone());
        info!(id = %draft.id, kind = draft.kind.as_str(), "stored pending draft");
        Ok(())
    }

    /// Load the pending draft of `kind`, preferring the in-memory copy.
    pub async fn load(&self, kind: DraftKind) -> Result<Option<(PendingDraft, DraftSource)>> {
        if let Some(draft) = self.cached(kind) {
            return Ok(Some((draft, DraftSource::Memory)));
        }
        let Some(row) = db::fetch_draft(&self.pool, kind.storage_key()).await? else {
            debug!(kind = kind.as_str(), "no pending draft in storage");
            return Ok(None);
        };
        match from_row(row) {
            Ok(draft) => {
                debug!(id = %draft.id, "draft restored from storage");
                self.cache_put(draft.clone());
                Ok(Some((draft, DraftSource::Storage)))
            }
            Err(err) => {
                // Unreadable entries are dropped so they cannot wedge later runs.
                warn!(?err, kind = kind.as_str(), "discarding unreadable pending draft");
                db::delete_draft(&self.pool, kind.storage_key()).await?;
                Ok(None)
            }
        }
    }

    /// Record the checkout session a draft is waiting on.
    pub async fn attach_checkout_session(&self, kind: DraftKind, session_id: &str) -> Result<()> {
        let Some((mut draft, _)) = self.load(kind).await? else {
            return Err(anyhow!("no pending {} draft", kind.as_str()));
        };
        draft.checkout_session_id = Some(session_id.to_string());
        self.save(&draft).await
    }

    /// Remove the draft of `kind` from both tiers.
    pub async fn clear(&self, kind: DraftKind) -> Result<bool> {
        self.cache_evict(kind);
        let removed = db::delete_draft(&self.pool, kind.storage_key()).await?;
        info!(kind = kind.as_str(), removed, "cleared pending draft");
        Ok(removed)
    }

    /// Drop the cached copy and re-read from storage.
    pub async fn resync(&self, kind: DraftKind) -> Result<Option<PendingDraft>> {
        self.cache_evict(kind);
        Ok(self.load(kind).await?.map(|(d, _)| d))
    }

    /// Forget the in-memory tier only, as happens on a fresh page load.
    pub fn drop_cache(&self) {
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub async fn list(&self) -> Result<Vec<PendingDraft>> {
        let mut out = Vec::new();
        for row in db::list_drafts(&self.pool).await? {
            match from_row(row) {
                Ok(d) => out.push(d),
                Err(err) => warn!(?err, "skipping unreadable pending draft"),
            }
        }
        Ok(out)
    }
}
