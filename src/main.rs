use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use recruiter_triage::channels::{CliApproval, EmailChannel, EmailConfig};
use recruiter_triage::config::TriageConfig;
use recruiter_triage::llm::{LlmConfig, create_provider};
use recruiter_triage::pipeline::{TriagePass, TriageProcessor, run_triage_pass};
use recruiter_triage::store::{JsonStore, SkippedEmails};

#[derive(Debug, Parser)]
#[command(name = "recruiter-triage")]
#[command(about = "Triage recruiter email and draft negotiation replies for approval")]
struct Cli {
    /// Directory holding the skipped/sent JSON sets.
    #[arg(long, env = "TRIAGE_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one triage pass over the recent inbox.
    Run,
    /// Forget every permanently skipped message.
    ResetSkipped {
        /// Do not ask for confirmation.
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider before any TLS usage. Fails only if one is already set.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let _log_guard = init_tracing();

    let cli = Cli::parse();
    let store = JsonStore::new(&cli.data_dir);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&store).await,
        Commands::ResetSkipped { yes } => reset_skipped(&store, yes).await,
    }
}

/// Logs go to stderr, or to a daily file under `TRIAGE_LOG_DIR` so the
/// approval prompt has the terminal to itself.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match std::env::var("TRIAGE_LOG_DIR") {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, "recruiter-triage.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}

async fn run(store: &JsonStore) -> Result<()> {
    let config = TriageConfig::from_env().context("invalid triage configuration")?;

    let email_config = EmailConfig::from_env().context(
        "email is not configured: set EMAIL_IMAP_HOST, EMAIL_USERNAME and EMAIL_PASSWORD",
    )?;

    eprintln!("📬 Recruiter triage v{}", env!("CARGO_PKG_VERSION"));

    let llm = match LlmConfig::from_env().context("invalid reasoning service configuration")? {
        Some(llm_config) => {
            let provider = create_provider(&llm_config)?;
            eprintln!("   Reasoning service: {}", provider.model_name());
            Some(provider)
        }
        None => {
            eprintln!("   Reasoning service: disabled (templates only)");
            None
        }
    };

    eprintln!(
        "   Thresholds: accept ≥ {} / counter ≥ {} / decline < {}",
        config.thresholds.accept, config.thresholds.min_acceptable, config.thresholds.reject_below
    );
    eprintln!("   Data: {}", store.dir().display());
    if let Some(resume) = &email_config.resume_path {
        eprintln!("   Resume: {}", resume.display());
    }

    let processor = TriageProcessor::new(&config, llm)?;
    let channel = EmailChannel::new(email_config);
    let mut approval = CliApproval::stdio();

    let summary = run_triage_pass(TriagePass {
        processor: &processor,
        source: &channel,
        sink: &channel,
        approval: &mut approval,
        store,
    })
    .await?;

    eprintln!(
        "\nDone: {} fetched, {} sent, {} failed, {} skipped for good, {} left for later, \
         {} irrelevant, {} not related, {} awaiting reply, {} previously skipped",
        summary.fetched,
        summary.sent,
        summary.send_failures,
        summary.skipped_permanently,
        summary.skipped_temporarily,
        summary.irrelevant,
        summary.not_related,
        summary.awaiting_reply,
        summary.already_skipped,
    );
    Ok(())
}

async fn reset_skipped(store: &JsonStore, yes: bool) -> Result<()> {
    let mut skipped = SkippedEmails::load(store).await?;
    if skipped.is_empty() {
        eprintln!("No skipped emails to reset.");
        return Ok(());
    }

    if !yes && !confirm(&format!("Forget {} skipped emails?", skipped.len()))? {
        eprintln!("Aborted.");
        return Ok(());
    }

    let count = skipped.len();
    skipped.clear();
    skipped.save(store).await?;
    tracing::info!(count, "Skipped emails reset");
    eprintln!("Reset {} skipped emails.", count);
    Ok(())
}

fn confirm(question: &str) -> Result<bool> {
    eprint!("{} [y/N] ", question);
    std::io::stderr().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}
