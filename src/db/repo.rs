use super::model::DraftRow;
use anyhow::{Context, Result};
use sqlx::Row;
use sqlx::SqlitePool;
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized)
        .await
        .with_context(|| format!("failed to open client storage at {}", normalized))?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/`, ensure the parent
/// directory exists, and ask SQLite to create the file. In-memory URLs pass
/// through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let query = match query_part {
        Some(q) if q.contains("mode=") => q.to_string(),
        Some(q) => format!("{}&mode=rwc", q),
        None => "mode=rwc".to_string(),
    };
    format!("sqlite://{}?{}", expanded_path, query)
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip_all, fields(key = %key))]
pub async fn storage_get(pool: &Pool, key: &str) -> Result<Option<String>> {
    let value = sqlx::query_scalar::<_, String>("SELECT value FROM client_storage WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

#[instrument(skip_all, fields(key = %key))]
pub async fn storage_set(pool: &Pool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO client_storage (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await
    .context("failed to write client storage")?;
    Ok(())
}

#[instrument(skip_all, fields(key = %key))]
pub async fn storage_remove(pool: &Pool, key: &str) -> Result<bool> {
    let res = sqlx::query("DELETE FROM client_storage WHERE key = ?")
        .bind(key)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

fn interest_prompt_key(user_id: &str) -> String {
    format!("{}{}", super::KEY_INTEREST_PROMPT_PREFIX, user_id)
}

pub async fn dismiss_interest_prompt(pool: &Pool, user_id: &str) -> Result<()> {
    storage_set(pool, &interest_prompt_key(user_id), "true").await
}

pub async fn interest_prompt_dismissed(pool: &Pool, user_id: &str) -> Result<bool> {
    Ok(storage_get(pool, &interest_prompt_key(user_id))
        .await?
        .is_some_and(|v| v == "true"))
}

fn used_session_key(session_id: &str) -> String {
    format!("{}{}", super::KEY_USED_SESSION_PREFIX, session_id)
}

/// Remember that `session_id` paid for `resource_id` so it is never reused.
#[instrument(skip_all, fields(session_id = %session_id))]
pub async fn mark_checkout_session_used(
    pool: &Pool,
    session_id: &str,
    resource_id: &str,
) -> Result<()> {
    storage_set(pool, &used_session_key(session_id), resource_id).await
}

/// Resource created with `session_id`, if it was already used.
pub async fn checkout_session_used(pool: &Pool, session_id: &str) -> Result<Option<String>> {
    storage_get(pool, &used_session_key(session_id)).await
}

#[instrument(skip_all, fields(storage_key = %row.storage_key, id = %row.id))]
pub async fn upsert_draft(pool: &Pool, row: &DraftRow) -> Result<()> {
    sqlx::query(
        "INSERT INTO pending_drafts (storage_key, id, kind, payload, checkout_session_id, created_at) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT(storage_key) DO UPDATE SET id = excluded.id, kind = excluded.kind, \
         payload = excluded.payload, checkout_session_id = excluded.checkout_session_id, \
         created_at = excluded.created_at",
    )
    .bind(&row.storage_key)
    .bind(&row.id)
    .bind(&row.kind)
    .bind(&row.payload)
    .bind(&row.checkout_session_id)
    .bind(&row.created_at)
    .execute(pool)
    .await
    .context("failed to persist pending draft")?;
    Ok(())
}

#[instrument(skip_all, fields(storage_key = %storage_key))]
pub async fn fetch_draft(pool: &Pool, storage_key: &str) -> Result<Option<DraftRow>> {
    let row = sqlx::query(
        "SELECT storage_key, id, kind, payload, checkout_session_id, created_at \
         FROM pending_drafts WHERE storage_key = ?",
    )
    .bind(storage_key)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|row| DraftRow {
        storage_key: row.get("storage_key"),
        id: row.get("id"),
        kind: row.get("kind"),
        payload: row.get("payload"),
        checkout_session_id: row
            .try_get::<Option<String>, _>("checkout_session_id")
            .ok()
            .flatten(),
        created_at: row.get("created_at"),
    }))
}

pub async fn list_drafts(pool: &Pool) -> Result<Vec<DraftRow>> {
    let rows = sqlx::query(
        "SELECT storage_key, id, kind, payload, checkout_session_id, created_at \
         FROM pending_drafts ORDER BY created_at ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|row| DraftRow {
            storage_key: row.get("storage_key"),
            id: row.get("id"),
            kind: row.get("kind"),
            payload: row.get("payload"),
            checkout_session_id: row
                .try_get::<Option<String>, _>("checkout_session_id")
                .ok()
                .flatten(),
            created_at: row.get("created_at"),
        })
        .collect())
}

#[instrument(skip_all, fields(storage_key = %storage_key))]
pub async fn delete_draft(pool: &Pool, storage_key: &str) -> Result<bool> {
    let res = sqlx::query("DELETE FROM pending_drafts WHERE storage_key = ?")
        .bind(storage_key)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}
