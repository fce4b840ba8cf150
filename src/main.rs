//! Downloader Bot: relays remote files into Telegram chats.
//!
//! Links sent to the bot are probed, downloaded to a per-transfer working
//! directory and uploaded back, zipped into size-bounded segments when the
//! file is too large for a single upload.
//!
//! Layout:
//! - `base_system`: config, logging, working directories
//! - `transfer`: the transfer pipeline (classify, copy, archive, orchestrate, cancel)
//! - `network`: Telegram Bot API and remote origin clients
//! - `bot`: update loop and request handling

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod base_system;
mod bot;
mod network;
mod transfer;

use base_system::config::load_or_create;
use base_system::context::Config;
use base_system::logging::{LogOptions, LogSystem};
use bot::UpdateLoop;
use bot::handlers::Handlers;
use network::messenger::Messenger;
use network::origin::HttpOrigin;
use network::telegram::TelegramBot;
use transfer::{CancelRegistry, TransferContext};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "downloader-bot")]
#[command(about = "Telegram bot that relays remote files, splitting large ones into zip parts")]
struct Cli {
    /// Enable debug output on the console
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// Exact path of the config file
    #[arg(long)]
    config: Option<String>,

    /// Data directory holding config.yml and logs/
    #[arg(long)]
    data_dir: Option<String>,

    /// Print the version and exit
    #[arg(long, default_value_t = false)]
    version: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("Downloader Bot v{VERSION}");
        return Ok(());
    }

    let data_dir = cli.data_dir.as_deref().map(Path::new);
    let log = init_logging(cli.debug, data_dir)?;

    let config = load_or_create::<Config>(cli.config.as_deref().map(Path::new), data_dir)
        .context("loading config")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    let result = runtime.block_on(serve(config));

    log.safe_exit();
    result
}

async fn serve(config: Config) -> Result<()> {
    if config.bot_token.is_empty() {
        bail!("bot_token is empty; set it in config.yml");
    }

    let api = Arc::new(
        TelegramBot::new(&config.bot_token, &config.api_base_url)
            .context("creating Telegram client")?,
    );
    let me = api.get_me().await.context("checking bot token")?;
    info!(
        target: "startup",
        "Authorized on bot {}",
        me.username.as_deref().unwrap_or(&me.first_name)
    );

    let work_root = config.work_root();
    tokio::fs::create_dir_all(&work_root)
        .await
        .with_context(|| format!("creating download directory {}", work_root.display()))?;

    let shutdown = CancellationToken::new();
    let registry = Arc::new(CancelRegistry::default());
    let messenger: Arc<dyn Messenger> = api.clone();
    let transfers = Arc::new(TransferContext {
        messenger: messenger.clone(),
        origin: Arc::new(HttpOrigin::new().context("creating HTTP client")?),
        registry: registry.clone(),
        work_root,
        shutdown: shutdown.clone(),
    });
    let poll_timeout = config.poll_timeout;
    let handlers = Arc::new(Handlers::new(messenger, transfers, Arc::new(config)));
    let updates = UpdateLoop::new(api, handlers, poll_timeout);

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!(target: "startup", "Ctrl+C received, shutting down");
                signal.cancel();
            }
            Err(err) => warn!(target: "startup", error = %err, "cannot listen for Ctrl+C"),
        }
    });

    info!(target: "startup", version = VERSION, "polling for updates");
    updates.run(shutdown).await;
    if !registry.is_empty() {
        warn!(target: "startup", pending = registry.len(), "transfers still registered at exit");
    }
    info!(target: "startup", "stopped");
    Ok(())
}

fn init_logging(debug: bool, base_dir: Option<&Path>) -> Result<LogSystem> {
    let opts = LogOptions {
        debug,
        use_color: true,
        archive_on_exit: true,
        console: true,
    };
    LogSystem::init_with_base(opts, base_dir).map_err(|e| anyhow!(e))
}
