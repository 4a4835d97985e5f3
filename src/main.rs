use std::process::ExitCode;
use std::sync::atomic::Ordering;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use orderdesk::config::{self, Settings};
use orderdesk::matching::EmbeddingIndex;
use orderdesk::notify::{AlertMailer, LogOnlyAlerts, SendmailAlerts};
use orderdesk::supervisor::{
    build_sync, read_health_file, ProductionGraphFactory, Supervisor,
};

#[derive(Parser)]
#[command(name = "orderdesk", version, about = "Automated B2B order-email processor")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the supervisor and process the mailbox until shutdown.
    Run,
    /// Run one incremental catalog sync pass and exit.
    SyncOnce,
    /// Print the current health snapshot.
    Health,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env();

    match cli.command {
        Command::Run => run(settings),
        Command::SyncOnce => sync_once(settings),
        Command::Health => health(settings),
    }
}

fn run(settings: Settings) -> ExitCode {
    tracing::info!(version = config::APP_VERSION, "orderdesk starting");

    let mailer: Box<dyn AlertMailer> = if settings.admin_alert_address.is_some() {
        Box::new(SendmailAlerts::new())
    } else {
        Box::new(LogOnlyAlerts)
    };

    let factory = ProductionGraphFactory::new(settings.clone());
    let supervisor = Supervisor::new(settings, Box::new(factory), mailer);

    let shutdown = supervisor.shutdown_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received — finishing current message");
        shutdown.store(true, Ordering::SeqCst);
    }) {
        tracing::warn!(error = %e, "Signal handler installation failed");
    }

    match supervisor.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Fatal initialization failure");
            ExitCode::FAILURE
        }
    }
}

fn sync_once(settings: Settings) -> ExitCode {
    let (catalog, sync) = match build_sync(&settings) {
        Ok(wiring) => wiring,
        Err(e) => {
            tracing::error!(error = %e, "Sync wiring failed");
            return ExitCode::FAILURE;
        }
    };

    match sync.sync() {
        Ok(report) => {
            println!(
                "synced {} products, {} customers",
                report.products_synced, report.customers_synced
            );

            // Refresh the embedding cache so the next run starts warm.
            if report.products_synced > 0 {
                match orderdesk::llm::HttpLlm::new(
                    &settings.llm_base_url,
                    settings.llm_api_key.as_deref(),
                    &settings.llm_model,
                    &settings.embedding_model,
                    config::DEFAULT_CALL_TIMEOUT_SECS,
                ) {
                    Ok(llm) => {
                        if let Err(e) =
                            EmbeddingIndex::load_or_build(&catalog, &llm, &settings.embeddings_dir())
                        {
                            tracing::warn!(error = %e, "Embedding index rebuild skipped");
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "LLM client unavailable for index rebuild"),
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Sync failed");
            ExitCode::FAILURE
        }
    }
}

fn health(settings: Settings) -> ExitCode {
    match read_health_file(&settings.health_dir()) {
        Some(content) => {
            print!("{content}");
            ExitCode::SUCCESS
        }
        None => {
            eprintln!("no health file at {}", settings.health_dir().display());
            ExitCode::FAILURE
        }
    }
}
