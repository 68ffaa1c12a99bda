use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use mulan_client::config;
use mulan_client::db;
use mulan_client::drafts::DraftStore;
use mulan_client::model::DraftKind;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "List pending paid-creation drafts in client storage, optionally discarding one"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Print each draft's payload
    #[arg(long)]
    payload: bool,

    /// Discard the pending draft of this kind (event | booking)
    #[arg(long)]
    discard: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;
    let store = DraftStore::new(pool.clone());

    if let Some(kind) = args.discard.as_deref() {
        let kind = DraftKind::parse(kind).ok_or_else(|| anyhow!("unknown draft kind {}", kind))?;
        let removed = store.clear(kind).await?;
        if kind == DraftKind::Booking {
            db::storage_remove(&pool, db::KEY_PENDING_BOOKING_ID).await?;
            db::storage_remove(&pool, db::KEY_PENDING_SESSION_ID).await?;
        }
        info!(kind = kind.as_str(), removed, "discard requested");
    }

    let drafts = store.list().await?;
    if drafts.is_empty() {
        println!("No pending drafts.");
        return Ok(());
    }
    for d in drafts {
        println!(
            "{:<8} {} created {} checkout {}",
            d.kind.as_str(),
            d.id,
            d.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            d.checkout_session_id.as_deref().unwrap_or("-")
        );
        if args.payload {
            println!("{}", serde_json::to_string_pretty(&d.payload)?);
        }
    }
    if let Some(id) = db::storage_get(&pool, db::KEY_PENDING_SESSION_ID).await? {
        println!("Pending booking checkout session: {}", id);
    }
    Ok(())
}
