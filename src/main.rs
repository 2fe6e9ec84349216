//! Room Bot - Entry Point
//!
//! Connects a bot to its chat room, logs its activity and answers a couple
//! of built-in commands (`!ping`, `!uptime`).

use std::env;
use std::sync::Arc;

use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use roombot::{Bot, BotConfig, BotError, ClientError, CommandThrottle, SubscriberId, Verb};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=roombot=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("roombot=info")),
        )
        .init();

    // Chat host from command line overrides the environment
    let mut config = BotConfig::from_env()?;
    if let Some(host) = env::args().nth(1) {
        config.host = host;
    }

    info!("Connecting to {} for room owner {}", config.host, config.public_id);
    let bot = Arc::new(Bot::from_config(config).await?);
    bot.join_room().await?;
    info!("Joined room {}", bot.room_id());

    // Event log
    let mut events = bot.subscribe(SubscriberId::random()).await;
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => debug!("event: {}", json),
                Err(e) => warn!("Failed to serialize event: {}", e),
            }
        }
    });

    let reader = tokio::spawn(read_loop(Arc::clone(&bot)));

    tokio::signal::ctrl_c().await?;
    info!("Leaving chat room");
    reader.abort();
    bot.leave().await;

    Ok(())
}

/// Read commands and answer built-in ones
async fn read_loop(bot: Arc<Bot>) {
    let mut throttle = CommandThrottle::default();

    loop {
        let cmd = match bot.read().await {
            Ok(cmd) => cmd,
            Err(BotError::Client(ClientError::Closed)) => break,
            Err(e) => {
                warn!("read error: {}", e);
                continue;
            }
        };

        if cmd.name != Verb::Say || cmd.is_from_bot() {
            continue;
        }

        let message = cmd.get("message").trim();
        let reply = match message {
            "!ping" => "pong".to_string(),
            "!uptime" => uptime_reply(&bot),
            _ => {
                throttle.observe_line();
                continue;
            }
        };

        if !throttle.permit(message) {
            debug!("{} throttled", message);
            continue;
        }
        if let Err(e) = bot.say(&reply).await {
            warn!("write error: {}", e);
        }
    }
}

fn uptime_reply(bot: &Bot) -> String {
    let started = bot.info().started;
    let elapsed = chrono::Utc::now() - started;
    let stats = bot.stats();
    format!(
        "up {}h {}m, {} reconnect failures",
        elapsed.num_hours(),
        elapsed.num_minutes() % 60,
        stats.retry_count
    )
}
