//! Row shapes used by repositories.
//!
//! Keep these structs focused on the data returned by queries. Conversion into
//! domain types lives in `crate::drafts`.

/// Raw pending draft row.
#[derive(Debug, Clone)]
pub struct DraftRow {
    pub storage_key: String,
    pub id: String,
    pub kind: String,
    pub payload: String,
    pub checkout_session_id: Option<String>,
    pub created_at: String,
}
