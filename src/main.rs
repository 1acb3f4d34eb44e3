use anyhow::Context;
use bot_service::ReplyBot;
use clap::Parser;
use database::SqliteSeenStore;
use reddit_client::{RedditApiClient, RedditItemSource, RedditReplySender};
use replybot_core::{
    BotParams, CoreError, Credentials, ErrorExt, ErrorReporter, MemorySeenStore, SeenStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "replybot=info,bot_service=info,reddit_client=info,database=info";
const VERBOSE_LOG_FILTER: &str =
    "replybot=debug,bot_service=debug,reddit_client=debug,database=debug";

/// Replies to Reddit comments or posts that match a pattern.
///
/// Credentials come from CLIENT_ID, CLIENT_SECRET, USERNAME, PASSWORD and the
/// optional VERSION environment variables (a `.env` file is honoured).
#[derive(Debug, Parser)]
#[command(name = "replybot", version, about)]
struct Cli {
    /// YAML parameters file (pattern, reply, subreddit, timeout, dry_run, ...)
    #[arg(long, value_name = "PATH")]
    params: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        VERBOSE_LOG_FILTER
    } else {
        DEFAULT_LOG_FILTER
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn open_store(params: &BotParams) -> anyhow::Result<Arc<dyn SeenStore>> {
    match &params.seen_db {
        Some(path) => {
            let store = SqliteSeenStore::open(path)
                .await
                .with_context(|| format!("opening Seen-set database {}", path.display()))?;
            Ok(Arc::new(store))
        }
        None => {
            tracing::info!("No seen_db configured, Seen-set is kept in memory");
            Ok(Arc::new(MemorySeenStore::new()))
        }
    }
}

/// Resolves on Ctrl-C, or on SIGTERM where there is one.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Could not listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Could not listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn fatal(error: CoreError) -> anyhow::Error {
    ErrorReporter::new().report_error(&error);
    anyhow::anyhow!(error.user_friendly_message()).context(error.error_code())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    tracing::info!("Starting replybot {}", env!("CARGO_PKG_VERSION"));

    let params = BotParams::from_yaml_file(&cli.params)
        .with_context(|| format!("loading parameters from {}", cli.params.display()))?;
    // Fail on a bad pattern before anything goes over the network.
    let pattern = params.compile_pattern()?;

    let credentials = Credentials::from_env()?;
    let client = Arc::new(RedditApiClient::new(&credentials)?);
    client.authenticate().await.map_err(fatal)?;

    let store = open_store(&params).await?;
    let source = RedditItemSource::new(
        client.clone(),
        params.subreddit.clone(),
        params.stream,
        params.fetch_limit,
    );
    let sender = RedditReplySender::new(client, credentials.username.clone());
    let bot = ReplyBot::with_pattern(params, pattern, source, sender, store);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown requested, finishing current cycle");
        shutdown.cancel();
    });

    let summary = bot.run(cancel).await.map_err(fatal)?;

    tracing::info!(
        "Exiting: {} cycles, {} fetched, {} matched, {} replied, {} failed",
        summary.cycles,
        summary.fetched,
        summary.matched,
        summary.replied,
        summary.failed
    );
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::signal::unix::{signal, SignalKind};

    #[tokio::test]
    async fn test_sigterm_requests_shutdown() {
        // Keeps SIGTERM from ending the test process while the handler is set up.
        let _guard = signal(SignalKind::terminate()).unwrap();

        let waiter = tokio::spawn(shutdown_signal());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
