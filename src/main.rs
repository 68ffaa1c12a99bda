use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

use mulan_client::auth::CognitoClient;
use mulan_client::booking::{self, BookingAction};
use mulan_client::config::{self, Config};
use mulan_client::db::{self, Pool};
use mulan_client::drafts::DraftStore;
use mulan_client::model::{BookingStatus, DraftKind};
use mulan_client::saga::{PaymentSaga, SagaOutcome, SagaReport};
use mulan_client::services::{
    BackendClient, BillingService, RefundReason, RefundRequest, ResourceService, UploadService,
};
use mulan_client::session::Session;
use mulan_client::validation;

#[derive(Debug, Parser)]
#[command(author, version, about = "Ticketing client: sign-in, paid creation, bookings")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Event,
    Booking,
}

impl From<KindArg> for DraftKind {
    fn from(k: KindArg) -> Self {
        match k {
            KindArg::Event => DraftKind::Event,
            KindArg::Booking => DraftKind::Booking,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ReasonArg {
    Duplicate,
    Fraudulent,
    RequestedByCustomer,
}

impl From<ReasonArg> for RefundReason {
    fn from(r: ReasonArg) -> Self {
        match r {
            ReasonArg::Duplicate => RefundReason::Duplicate,
            ReasonArg::Fraudulent => RefundReason::Fraudulent,
            ReasonArg::RequestedByCustomer => RefundReason::RequestedByCustomer,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print an example configuration file
    ExampleConfig,
    /// Complete hosted sign-in with an authorization code
    Login {
        #[arg(long)]
        code: String,
    },
    Logout,
    /// Show the current session, refreshing the access token if expired
    Status,
    /// Stop showing the event-interest prompt for the signed-in user
    DismissInterest,
    /// Check a sign-up password read from stdin against the complexity rules
    CheckPassword,
    /// Store an event draft and print the checkout URL
    CreateEvent {
        /// JSON file with the event payload
        #[arg(long)]
        draft: PathBuf,
        /// Creation fee in cents
        #[arg(long)]
        amount: i64,
        #[arg(long)]
        description: Option<String>,
    },
    /// Store a booking draft and print the checkout URL
    Book {
        #[arg(long)]
        draft: PathBuf,
        #[arg(long)]
        amount: i64,
        #[arg(long)]
        description: Option<String>,
    },
    /// Finish a paid creation after returning from checkout
    Resume {
        #[arg(long, value_enum)]
        kind: KindArg,
        #[arg(long)]
        session_id: String,
    },
    /// Discard the pending draft of a kind
    Abandon {
        #[arg(long, value_enum)]
        kind: KindArg,
    },
    /// Show a booking and the actions it allows
    Booking {
        #[arg(long)]
        id: String,
    },
    /// Confirm, cancel, or refund a booking
    BookingAction {
        #[arg(long)]
        id: String,
        /// confirm | cancel | refund
        #[arg(long)]
        action: String,
    },
    /// Check a status transition offline
    CanTransition {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
    },
    VerifyPayment {
        #[arg(long)]
        payment_intent: String,
    },
    Refund {
        #[arg(long)]
        payment_intent: String,
        #[arg(long, value_enum, default_value = "requested-by-customer")]
        reason: ReasonArg,
        /// Partial amount in cents
        #[arg(long)]
        amount: Option<i64>,
        /// Extra metadata as key=value
        #[arg(long = "meta")]
        metadata: Vec<String>,
    },
    RefundStatus {
        #[arg(long)]
        id: String,
    },
    /// Upload an image and print its public URL
    Upload {
        #[arg(long)]
        file: PathBuf,
    },
}

struct Ctx {
    cfg: Config,
    pool: Pool,
    cognito: Arc<CognitoClient>,
    backend: Arc<BackendClient>,
    session: Arc<Session>,
}

impl Ctx {
    async fn open(cfg: Config) -> Result<Self> {
        cfg.ensure_dirs()?;
        let pool = db::init_pool(&cfg.database_url()).await?;
        db::run_migrations(&pool).await?;

        let cognito = Arc::new(CognitoClient::from_config(&cfg.identity)?);
        let backend = Arc::new(BackendClient::from_config(&cfg.services)?);
        let session = Arc::new(Session::with_storage(cognito.clone(), pool.clone()));
        session.restore().await?;
        Ok(Self {
            cfg,
            pool,
            cognito,
            backend,
            session,
        })
    }

    fn saga(&self) -> PaymentSaga {
        PaymentSaga::new(
            Arc::new(DraftStore::new(self.pool.clone())),
            self.backend.clone(),
            self.backend.clone(),
            self.session.clone(),
            self.cfg.app.origin.clone(),
            self.cfg.processing_cooldown(),
        )
    }
}

async fn read_payload(path: &Path) -> Result<Value> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read draft {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not valid JSON", path.display()))
}

fn parse_metadata(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut out = Map::new();
    for pair in pairs {
        let (k, v) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("metadata must be key=value, got {}", pair))?;
        out.insert(k.trim().to_string(), Value::String(v.trim().to_string()));
    }
    Ok(out)
}

fn print_report(report: &SagaReport) {
    for (from, to) in &report.transitions {
        println!("  {} -> {}", from, to);
    }
    match &report.outcome {
        SagaOutcome::AlreadyProcessing => println!("Already processing; nothing done."),
        SagaOutcome::Created { resource_id, .. } => {
            println!("Created {} {}", report.kind.as_str(), resource_id)
        }
        SagaOutcome::Failed(reason) => {
            println!("Failed: {}", reason.message());
            if let Some(guidance) = reason.support_guidance() {
                println!("{}", guidance);
            }
        }
    }
}

async fn begin(
    ctx: &Ctx,
    kind: DraftKind,
    draft: &Path,
    amount: i64,
    description: Option<String>,
) -> Result<()> {
    let payload = read_payload(draft).await?;
    let started = ctx.saga().begin(kind, payload, amount, description).await?;
    info!(draft_id = %started.draft_id, "checkout session created");
    println!("Draft {} saved. Complete payment at:", started.draft_id);
    println!("{}", started.redirect_url);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();

    // Commands that need no configuration.
    match &args.command {
        Command::ExampleConfig => {
            print!("{}", config::example());
            return Ok(());
        }
        Command::CheckPassword => {
            let mut password = String::new();
            std::io::stdin()
                .read_line(&mut password)
                .context("failed to read password from stdin")?;
            let password = password.trim_end_matches(['\r', '\n']);
            match validation::validate_password(password) {
                Ok(()) => println!("Password meets the requirements."),
                Err(err) => bail!("{}", err),
            }
            return Ok(());
        }
        Command::CanTransition { from, to } => {
            let from = BookingStatus::parse_state(from)
                .ok_or_else(|| anyhow!("unknown status {}", from))?;
            let to =
                BookingStatus::parse_state(to).ok_or_else(|| anyhow!("unknown status {}", to))?;
            println!("{}", booking::can_transition_to(from, to));
            return Ok(());
        }
        _ => {}
    }

    let cfg = config::load(Some(&args.config))?;
    let ctx = Ctx::open(cfg).await?;

    match args.command {
        Command::ExampleConfig | Command::CheckPassword | Command::CanTransition { .. } => {}
        Command::Login { code } => {
            let grant = ctx.cognito.exchange_code(&code).await?;
            let token = ctx.session.login(grant).await?;
            let role = if token.role.is_empty() { "(none)" } else { &token.role };
            println!("Signed in. Role: {}", role);
        }
        Command::Logout => {
            ctx.session.logout().await?;
            println!("Signed out.");
        }
        Command::Status => match ctx.session.credentials().await {
            Ok(creds) => {
                let token = ctx.session.current().await;
                println!("Signed in as {}", creds.user_id.as_deref().unwrap_or("(unknown user)"));
                if let Some(t) = token {
                    println!("Role: {}", t.role);
                    if let Some(exp) = t.access_token_expires_at_ms {
                        println!("Access token expires at {} ms", exp);
                    }
                }
                if let Some(user_id) = creds.user_id.as_deref() {
                    let dismissed = db::interest_prompt_dismissed(&ctx.pool, user_id).await?;
                    println!(
                        "Interest prompt: {}",
                        if dismissed { "dismissed" } else { "shown" }
                    );
                }
            }
            Err(err) => println!("{}", err),
        },
        Command::DismissInterest => {
            let creds = ctx.session.credentials().await?;
            let user_id = creds
                .user_id
                .ok_or_else(|| anyhow!("signed-in session carries no user id"))?;
            db::dismiss_interest_prompt(&ctx.pool, &user_id).await?;
            info!(%user_id, "interest prompt dismissed");
            println!("Interest prompt dismissed.");
        }
        Command::CreateEvent {
            draft,
            amount,
            description,
        } => begin(&ctx, DraftKind::Event, &draft, amount, description).await?,
        Command::Book {
            draft,
            amount,
            description,
        } => begin(&ctx, DraftKind::Booking, &draft, amount, description).await?,
        Command::Resume { kind, session_id } => {
            let report = ctx.saga().complete(kind.into(), &session_id).await?;
            print_report(&report);
            if let SagaOutcome::Failed(reason) = &report.outcome {
                error!(reason = %reason.message(), "saga failed");
                bail!("{}", reason.message());
            }
        }
        Command::Abandon { kind } => {
            let kind: DraftKind = kind.into();
            if ctx.saga().abandon(kind).await? {
                println!("Discarded pending {} draft.", kind.as_str());
            } else {
                println!("No pending {} draft.", kind.as_str());
            }
        }
        Command::Booking { id } => {
            let creds = ctx.session.credentials().await?;
            let b = ctx.backend.get_booking(&id, &creds).await?;
            println!("Booking {} for event {}: {}", b.booking_id, b.event_id, b.status.as_str());
            if booking::is_terminal(b.status) {
                println!("No further actions.");
            } else {
                let actions: Vec<&str> = booking::offered_actions(b.status)
                    .iter()
                    .map(|a| a.endpoint())
                    .collect();
                println!("Available actions: {}", actions.join(", "));
            }
        }
        Command::BookingAction { id, action } => {
            let action = BookingAction::parse(&action)
                .ok_or_else(|| anyhow!("unknown booking action {}", action))?;
            let creds = ctx.session.credentials().await?;
            ctx.backend.transition_booking(&id, action, &creds).await?;
            println!("Booking {} is now {}", id, action.target_status().as_str());
        }
        Command::VerifyPayment { payment_intent } => {
            let v = ctx.backend.verify_payment(&payment_intent).await?;
            println!("verified={} status={}", v.verified, v.status);
        }
        Command::Refund {
            payment_intent,
            reason,
            amount,
            metadata,
        } => {
            let req = RefundRequest {
                payment_intent_id: payment_intent,
                amount,
                reason: reason.into(),
                metadata: parse_metadata(&metadata)?,
            };
            let refund = ctx.backend.process_refund(&req).await?;
            println!(
                "Refund {}: {} {} ({})",
                refund.refund_id, refund.amount, refund.currency, refund.status
            );
        }
        Command::RefundStatus { id } => {
            let refund = ctx.backend.get_refund(&id).await?;
            println!("Refund {}: {}", refund.refund_id, refund.status);
        }
        Command::Upload { file } => {
            let url = ctx.backend.upload_file(&file).await?;
            println!("{}", url);
        }
    }

    Ok(())
}
