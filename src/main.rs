use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use stock_assist::bot::Bot;
use stock_assist::channels::{Outbox, TelegramPoller, TelegramTransport};
use stock_assist::config::BotConfig;
use stock_assist::dialog::{Router, RouterDeps};
use stock_assist::ratelimit::RateLimiter;
use stock_assist::services::{HttpBackend, MemoryPositionStore};
use stock_assist::session::SessionStore;
use stock_assist::worker::{Dispatcher, panic_message};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // Panics inside spawned tasks are caught, but log any that reach the hook
    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::force_capture();
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        tracing::error!(
            panic = %panic_message(info.payload()),
            %location,
            %backtrace,
            "Panic"
        );
    }));

    let config = BotConfig::from_env().context("loading configuration")?;

    eprintln!("📈 Stock Assist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Backend: {}", config.backend_url);
    eprintln!("   Allowed users: {}", config.allowed_users.join(", "));
    eprintln!("   Universe: {} symbols\n", config.dialog.universe.len());

    // ── Shared plumbing ──────────────────────────────────────────────────
    let root = CancellationToken::new();
    let client = reqwest::Client::new();
    let limiter = RateLimiter::new(config.rate_limits.clone()).context("rate limits")?;
    let transport = Arc::new(TelegramTransport::new(
        config.bot_token.clone(),
        client.clone(),
    ));
    let outbox = Outbox::new(transport, Arc::clone(&limiter), root.clone());
    let dispatcher = Arc::new(Dispatcher::new(
        root.clone(),
        config.dialog.animation_interval,
        config.timeouts.reply,
    ));

    // ── Collaborators ────────────────────────────────────────────────────
    let backend = Arc::new(
        HttpBackend::new(
            &config.backend_url,
            client.clone(),
            config.timeouts.store_call,
        )
        .context("building backend client")?,
    );
    let router = Arc::new(
        Router::new(RouterDeps {
            sessions: Arc::new(SessionStore::new()),
            outbox,
            dispatcher: Arc::clone(&dispatcher),
            positions: Arc::new(MemoryPositionStore::new()),
            analyzer: backend.clone(),
            jobs: backend.clone(),
            news: backend,
            timeouts: config.timeouts.clone(),
            dialog: config.dialog.clone(),
        })
        .context("building router")?,
    );

    // ── Polling ──────────────────────────────────────────────────────────
    let poller = TelegramPoller::new(config.bot_token.clone(), config.allowed_users.clone(), client);
    let events = poller.start(root.child_token());

    // Ctrl-C cancels the root token itself; everything outbound stops at once.
    let signal_token = root.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            return;
        }
        tracing::info!("Ctrl-C received, stopping");
        signal_token.cancel();
    });

    tracing::info!(
        users = config.allowed_users.len(),
        grace_secs = config.timeouts.shutdown_grace.as_secs(),
        "Bot started"
    );

    let bot = Bot::new(
        router,
        dispatcher,
        limiter,
        config.dialog,
        config.timeouts.shutdown_grace,
    );
    bot.run(events).await;

    Ok(())
}
