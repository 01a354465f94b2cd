//! SipSync client - hydration task tracker.
//!
//! This binary runs a local SipSync session against an in-process store.
//!
//! # Commands
//!
//! - `sipsync-client simulate`: Sign in, let scripted teammates complete their
//!   tasks, and log the notifications this user would see
//! - `sipsync-client slots`: Print the daily slot schedule
//!
//! # Environment Variables
//!
//! See the [`config`](sipsync_client::config) module for available configuration options.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sipsync_client::config::Config;
use sipsync_client::dispatcher::LogNotifier;
use sipsync_client::identity::SessionIdentity;
use sipsync_client::mutator::CompletionMutator;
use sipsync_client::session::{ClientDeps, ClientSession};
use sipsync_client::tokens::LocalPushRegistration;
use sipsync_core::day::{Clock, SystemClock};
use sipsync_core::memory::MemoryStore;
use sipsync_core::types::{Identity, UserProfile, SLOTS};

/// SipSync client - hydration task tracker.
///
/// Tracks four daily drinking slots and notifies you when teammates
/// complete theirs.
#[derive(Parser, Debug)]
#[command(name = "sipsync-client")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    SIPSYNC_UTC_OFFSET                 Day boundary offset, ±HH:MM (default: +00:00)
    SIPSYNC_NOTIFICATION_DISMISS_SECS  Notification auto-dismiss (default: 5)
    SIPSYNC_EMAIL_CACHE_SIZE           Email cache capacity (default: 256)
    SIPSYNC_STORE_TIMEOUT_MS           Store call timeout (default: 5000)
    SIPSYNC_INTENT_CHANNEL_CAPACITY    Intent channel capacity (default: 64)

EXAMPLES:
    # Watch two teammates complete their day
    sipsync-client simulate

    # Larger team, faster pace
    sipsync-client simulate --peers 5 --interval-ms 100

    # Show the slot schedule
    sipsync-client slots
")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Run a scripted session against an in-process store.
    Simulate {
        /// Email of the local user.
        #[arg(short, long, default_value = "me@example.com")]
        email: String,

        /// Number of scripted teammates.
        #[arg(short, long, default_value_t = 2)]
        peers: usize,

        /// Pause between scripted completions, in milliseconds.
        #[arg(short, long, default_value_t = 300)]
        interval_ms: u64,
    },

    /// Print the daily slot schedule.
    Slots,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Slots => {
            run_slots();
            Ok(())
        }
        Command::Simulate {
            email,
            peers,
            interval_ms,
        } => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to create tokio runtime")?;

            runtime.block_on(async {
                tokio::select! {
                    result = run_simulation(email, peers, Duration::from_millis(interval_ms)) => result,
                    () = wait_for_shutdown() => {
                        info!("Shutdown signal received");
                        Ok(())
                    }
                }
            })
        }
    }
}

fn run_slots() {
    println!("Daily slots:");
    for slot in &SLOTS {
        println!("  {}  {} - {}", slot.id, slot.start, slot.end);
    }
}

async fn run_simulation(email: String, peers: usize, interval: Duration) -> Result<()> {
    init_logging();

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(offset = %config.day_policy.offset(), peers, "Starting SipSync simulation");

    let store = MemoryStore::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let identity = SessionIdentity::new();
    let notifier = Arc::new(LogNotifier::granted());

    let peer_identities: Vec<Identity> = (1..=peers)
        .map(|n| Identity::new(format!("peer-{n}"), Some(format!("peer{n}@example.com"))))
        .collect();
    for peer in &peer_identities {
        let mut profile = UserProfile::new(peer.uid.clone());
        profile.email = peer.email.clone();
        store.put_profile(profile).await;
    }

    let deps = ClientDeps::in_memory(
        &store,
        Arc::new(identity.clone()),
        notifier.clone(),
        Arc::new(LocalPushRegistration::new()),
        Arc::clone(&clock),
    );
    let mut session = ClientSession::new(deps, config.clone());

    identity.sign_in(Identity::new("local-user", Some(email)));
    session.sync().await.context("Failed to start session")?;

    if let Some(mut intents) = session.intents() {
        tokio::spawn(async move {
            while let Ok(intent) = intents.recv().await {
                println!("🔔 {}", intent.body());
            }
        });
    }

    let peer_mutators: Vec<CompletionMutator> = peer_identities
        .into_iter()
        .map(|peer| {
            CompletionMutator::new(
                Arc::new(store.clone()),
                Arc::new(SessionIdentity::signed_in(peer)),
                Arc::clone(&clock),
                config.day_policy,
                config.store_timeout,
            )
        })
        .collect();

    for slot in &SLOTS {
        if let Err(err) = session.mutator().complete_slot(slot.id).await {
            warn!(slot_id = slot.id, error = %err, "Local completion failed");
        }
        for mutator in &peer_mutators {
            tokio::time::sleep(interval).await;
            if let Err(err) = mutator.complete_slot(slot.id).await {
                warn!(slot_id = slot.id, error = %err, "Peer completion failed");
            }
        }
    }

    // Let pending notifications drain.
    tokio::time::sleep(interval.max(Duration::from_millis(100))).await;

    if let Some(active) = session.active() {
        println!();
        println!("Today ({}):", active.day());
        for task in active.today().tasks() {
            let mark = if task.completed { "x" } else { " " };
            println!("  [{mark}] {}", task.slot.label);
        }
    }

    let team = session.team_summary().await.context("Failed to load team progress")?;
    println!();
    println!(
        "Team: {} active, {} completed, {}% average",
        team.active_users, team.total_completed, team.average_completion
    );
    for member in &team.members {
        println!(
            "  {:<24} {}/{} ({:.0}%)",
            member.email, member.completed_count, member.total_count, member.progress
        );
    }

    let stats = session.statistics().await.context("Failed to load statistics")?;
    println!();
    println!(
        "You: {:.2} L today, {:.2} L this week, {:.2} L total",
        stats.daily.litres(),
        stats.weekly.litres(),
        stats.total.litres()
    );

    session.sign_out().await;
    info!(
        notifications = notifier.shown().len(),
        "Simulation finished"
    );
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .init();
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
