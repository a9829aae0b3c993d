use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use terminwatch::browser::WebDriverFactory;
use terminwatch::config::Config;
use terminwatch::diagnostics::ScreenshotDir;
use terminwatch::models::OutcomeKind;
use terminwatch::notify::transport::{LogTransport, Transport, WebhookTransport};
use terminwatch::notify::Notifier;
use terminwatch::probe::ProbeRunner;
use terminwatch::scheduler::{MonitorContext, Scheduler};
use terminwatch::site::ProfileStore;
use terminwatch::storage::{SqliteWatchStore, WatchStore};

#[derive(Parser)]
#[command(
    name = "terminwatch",
    version,
    about = "Appointment slot monitor for multi-step municipal booking portals",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the config file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitoring loop until interrupted
    Run,

    /// Run a single one-off probe without touching the store
    Check {
        /// Category to expand on the portal
        #[arg(long)]
        category: String,

        /// Service name to select within the category
        #[arg(long)]
        service: String,

        /// Number of appointments needed
        #[arg(short, long, default_value = "1")]
        quantity: u32,
    },

    /// Subscribe to a service: create (or reactivate) a watch
    Add {
        /// Subscriber identifier
        #[arg(short, long)]
        subscriber: String,

        /// Category to expand on the portal
        #[arg(long)]
        category: String,

        /// Service name to select within the category
        #[arg(long)]
        service: String,

        /// Minimum minutes between probes
        #[arg(short, long, default_value = "60")]
        interval_minutes: u32,

        /// Number of appointments needed
        #[arg(short, long, default_value = "1")]
        quantity: u32,
    },

    /// List watches
    List {
        /// Restrict to one subscriber
        #[arg(short, long)]
        subscriber: Option<String>,
    },

    /// Deactivate a watch
    Remove {
        /// Watch id
        watch_id: i64,
    },

    /// Probe one watch immediately, bypassing the due gate
    Now {
        /// Watch id
        watch_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_or_env(cli.config.as_deref())?;
    setup_tracing(&config, &cli.log_format, cli.verbose)?;

    match cli.command {
        Commands::Run => run_monitor(config).await,
        Commands::Check {
            category,
            service,
            quantity,
        } => run_check(config, category, service, quantity).await,
        Commands::Add {
            subscriber,
            category,
            service,
            interval_minutes,
            quantity,
        } => {
            let store = SqliteWatchStore::new(&config.storage.sqlite_path)?;
            let base_url = match &config.site_profile {
                Some(path) => ProfileStore::from_file(path)?.current().base_url,
                None => terminwatch::site::SiteProfile::default().base_url,
            };
            let target = store.upsert_target(&category, &service, &base_url, quantity)?;
            let watch = store.create_watch(&subscriber, target.id, i64::from(interval_minutes) * 60)?;
            println!(
                "watch {} created: {subscriber} -> {service} (every {interval_minutes} min)",
                watch.id
            );
            Ok(())
        }
        Commands::List { subscriber } => {
            let store = SqliteWatchStore::new(&config.storage.sqlite_path)?;
            let views = store.list_watches(subscriber.as_deref())?;
            if views.is_empty() {
                println!("no watches");
                return Ok(());
            }
            for view in views {
                println!(
                    "#{:<4} {:<12} {:<50} every {:>4} min  active={}  last={}",
                    view.watch.id,
                    view.watch.subscriber,
                    view.target.service,
                    view.watch.interval_secs / 60,
                    view.watch.active,
                    view.watch
                        .last_outcome_kind
                        .map(|k| k.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                );
            }
            Ok(())
        }
        Commands::Remove { watch_id } => {
            let store = SqliteWatchStore::new(&config.storage.sqlite_path)?;
            if store.deactivate_watch(watch_id)? {
                println!("watch {watch_id} deactivated");
            } else {
                println!("watch {watch_id} not found");
            }
            Ok(())
        }
        Commands::Now { watch_id } => {
            let (_, scheduler) = build_monitor(&config)?;
            let outcome = scheduler.check_watch_now(watch_id).await?;
            print_outcome(&outcome);
            Ok(())
        }
    }
}

/// Wire the store, prober, notifier and scheduler together
fn build_monitor(config: &Config) -> Result<(Arc<dyn WatchStore>, Scheduler)> {
    let store: Arc<dyn WatchStore> = Arc::new(SqliteWatchStore::new(&config.storage.sqlite_path)?);
    let profiles = Arc::new(match &config.site_profile {
        Some(path) => ProfileStore::from_file(path)?,
        None => ProfileStore::default(),
    });

    let prober = Arc::new(ProbeRunner::new(
        Arc::new(WebDriverFactory::new(&config.browser)),
        profiles.clone(),
        Arc::new(ScreenshotDir::new(&config.probe.screenshot_dir)),
        config,
    ));

    let transport: Arc<dyn Transport> = match &config.notify.webhook_url {
        Some(url) => Arc::new(WebhookTransport::from_url(url.clone())?),
        None => {
            tracing::warn!("no webhook configured, notifications go to the log only");
            Arc::new(LogTransport)
        }
    };
    let notifier = Arc::new(Notifier::new(
        store.clone(),
        transport,
        config.notify.max_listed_slots,
    ));

    let scheduler = Scheduler::new(
        MonitorContext {
            store: store.clone(),
            prober,
            notifier,
            profiles,
        },
        &config.scheduler,
    );

    Ok((store, scheduler))
}

async fn run_monitor(config: Config) -> Result<()> {
    let (_, scheduler) = build_monitor(&config)?;
    let scheduler = Arc::new(scheduler);

    tracing::info!("terminwatch monitor starting");

    let runner = scheduler.clone();
    let handle = tokio::spawn(async move { runner.run().await });

    tokio::signal::ctrl_c().await?;
    tracing::info!("interrupt received, shutting down");
    scheduler.stop().await;
    handle.await??;

    Ok(())
}

/// One-off probe against the portal, outside the store
async fn run_check(config: Config, category: String, service: String, quantity: u32) -> Result<()> {
    let profiles = Arc::new(match &config.site_profile {
        Some(path) => ProfileStore::from_file(path)?,
        None => ProfileStore::default(),
    });

    let prober = ProbeRunner::new(
        Arc::new(WebDriverFactory::new(&config.browser)),
        profiles.clone(),
        Arc::new(ScreenshotDir::new(&config.probe.screenshot_dir)),
        &config,
    );

    let target = terminwatch::models::Target {
        id: 0,
        category,
        service,
        base_url: profiles.current().base_url,
        quantity,
        active: true,
        created_at: chrono::Utc::now(),
    };

    let outcome = prober.probe(&target).await;
    print_outcome(&outcome);
    Ok(())
}

fn print_outcome(outcome: &terminwatch::models::Outcome) {
    println!("status:   {}", outcome.kind);
    println!("duration: {} ms", outcome.duration_ms);

    match outcome.kind {
        OutcomeKind::SlotsFound => {
            println!("found {} appointment(s):", outcome.slots.len());
            for (idx, slot) in outcome.slots.iter().enumerate() {
                println!("  {}. {} at {}", idx + 1, slot.date_label(), slot.time_label());
            }
        }
        OutcomeKind::NoSlots => println!("no appointments available"),
        OutcomeKind::Indeterminate => {
            println!("page structure unrecognized; no slot data is reliable")
        }
        OutcomeKind::Failed => {
            if let Some(reason) = &outcome.failure_reason {
                println!("failure:  {reason}");
            }
        }
    }

    if let Some(screenshot) = &outcome.screenshot_ref {
        println!("screenshot: {screenshot}");
    }
}

fn setup_tracing(config: &Config, cli_format: &str, verbose: bool) -> Result<()> {
    let level = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("terminwatch={level}")));

    let format = if cli_format != "text" {
        cli_format
    } else {
        config.logging.format.as_str()
    };

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    Ok(())
}
