use std::path::PathBuf;

use anyhow::{bail, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};

use ledger_sync::records::{EntityKind, Identified, Record, Transaction};
use ledger_sync::state::{SyncNotice, UiSurface, WorkingSet};
use ledger_sync::store::BackendKind;
use ledger_sync::{SyncConfig, SyncSession};

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BackendArg {
    Local,
    Hosted,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Local => BackendKind::Local,
            BackendArg::Hosted => BackendKind::Hosted,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum TxType {
    Income,
    Expense,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the persisted settings and cursor
    Status,

    /// Select the backend used by every following operation
    Backend {
        #[arg(value_enum)]
        kind: BackendArg,
    },

    /// Run one full reconciliation and print the working set
    Refresh,

    /// Keep syncing until Ctrl-C, printing every surface refresh
    Watch,

    /// Add a transaction
    Add {
        #[arg(long)]
        amount: f64,

        #[arg(long, value_enum, default_value_t = TxType::Expense)]
        r#type: TxType,

        #[arg(long, default_value = "other")]
        category: String,

        #[arg(long, default_value = "")]
        description: String,

        /// YYYY-MM-DD
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Directory holding the local database and settings
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Hosted backend base URL (overrides LEDGER_SYNC_URL)
    #[arg(long)]
    url: Option<String>,

    /// Hosted backend API key (overrides LEDGER_SYNC_ANON_KEY)
    #[arg(long)]
    anon_key: Option<String>,

    /// Sign in to the hosted backend before syncing
    #[arg(long, requires = "password")]
    email: Option<String>,

    #[arg(long)]
    password: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = SyncConfig::from_env();
    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.clone();
    }
    if args.url.is_some() {
        config.hosted_url = args.url.clone();
    }
    if args.anon_key.is_some() {
        config.anon_key = args.anon_key.clone();
    }

    let session = SyncSession::from_config(&config)?;

    match &args.command {
        Command::Status => print_status(&session, &config),
        Command::Backend { kind } => {
            let kind = BackendKind::from(*kind);
            if kind == BackendKind::Hosted && !config.hosted_configured() {
                bail!("hosted backend needs --url and --anon-key (or the environment)");
            }
            session.switch_backend(kind).await?;
            println!("[MAIN] Backend set to {}", kind);
        }
        Command::Refresh => {
            // login already reconciled once
            login(&session, &args).await?;
            let report = session.last_refresh();
            session.shutdown().await;

            match report {
                Some(report) => {
                    println!("[MAIN] Refresh finished");
                    if !report.skipped.is_empty() {
                        println!("[MAIN] Skipped: {:?}", report.skipped);
                    }
                }
                None => println!("[MAIN] Refresh incomplete, showing cached data"),
            }
            session.state().read(print_working_set);
        }
        Command::Watch => run_watch(&session, &args).await?,
        Command::Add {
            amount,
            r#type,
            category,
            description,
            date,
        } => {
            login(&session, &args).await?;
            let record = Record::Transaction(Transaction {
                id: String::new(),
                user_id: String::new(),
                tx_type: match r#type {
                    TxType::Income => "income".into(),
                    TxType::Expense => "expense".into(),
                },
                amount: *amount,
                category: category.clone(),
                date: Some(date.unwrap_or_else(|| chrono::Local::now().date_naive())),
                description: description.clone(),
                cost_type: "variable".into(),
                created_at: None,
            });
            let saved = session.add_record(record).await?;
            session.shutdown().await;
            println!("[MAIN] Added transaction {}", saved.id());
        }
    }

    Ok(())
}

async fn login(session: &SyncSession, args: &Args) -> Result<String> {
    let owner = match (&args.email, &args.password) {
        (Some(email), Some(password)) => session.sign_in(email, password).await?,
        _ => session.login().await?,
    };
    println!("[MAIN] Signed in as {} ({} backend)", owner, session.settings().backend());
    Ok(owner)
}

async fn run_watch(session: &SyncSession, args: &Args) -> Result<()> {
    session
        .observers()
        .register(UiSurface::Dashboard, |ws| {
            println!(
                "[WATCH] dashboard: {} transactions, net {:.2}",
                ws.transactions.len(),
                ws.net_flow()
            );
        });
    session.observers().register(UiSurface::SavingsDisplay, |ws| {
        println!("[WATCH] savings: {:.2}", ws.savings_display());
    });
    session.observers().on_notice(|notice| match notice {
        SyncNotice::TransientFailure { message, retryable } => {
            println!("[WATCH] failure: {} (retry: {})", message, retryable)
        }
        SyncNotice::Degraded { kind } => {
            println!("[WATCH] {} channel degraded, polling only", kind)
        }
        SyncNotice::PendingUpdates { count } => println!("[WATCH] {} pending updates", count),
    });

    login(session, args).await?;
    session.set_visible(true).await;

    println!("[WATCH] Syncing, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    session.shutdown().await;
    let stats = session.scheduler().stats();
    println!("-----------------------------------");
    println!("Slow ticks:       {}", stats.slow_ticks);
    println!("Fast ticks:       {}", stats.fast_ticks);
    println!("Reloads:          {}", stats.reloads);
    println!("-----------------------------------");
    Ok(())
}

fn print_status(session: &SyncSession, config: &SyncConfig) {
    let settings = session.settings().load();
    println!("-----------------------------------");
    println!("Backend:          {}", settings.backend());
    println!(
        "Hosted:           {}",
        config.hosted_url.as_deref().unwrap_or("not configured")
    );
    println!(
        "Cursor:           {}",
        settings
            .last_seen_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".into())
    );
    println!("Settings file:    {}", session.settings().path().display());
    println!("-----------------------------------");
}

fn print_working_set(ws: &WorkingSet) {
    println!("-----------------------------------");
    println!("Transactions:     {}", ws.len(EntityKind::Transaction));
    println!("History entries:  {}", ws.len(EntityKind::SavingsHistoryEntry));
    println!("Savings:          {:.2}", ws.savings_display());
    println!("Net flow:         {:.2}", ws.net_flow());
    println!("-----------------------------------");
}
