use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use tracing::{error, info};

use raco_notify::bot::Telegram;
use raco_notify::fibapi::FibApi;
use raco_notify::job::{self, PushJob};
use raco_notify::{bot, config, db};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;

    let pool = db::init_pool(&cfg.app.database_url).await?;
    db::run_migrations(&pool).await?;

    let source = FibApi::new(cfg.fib_api.public_client_id.clone());
    let telegram = Telegram::new(Bot::new(cfg.telegram.bot_token.clone()));

    // Spawn the push job scheduler (serial fan-out, never overlapping runs)
    let job = Arc::new(PushJob::new(
        pool.clone(),
        source.clone(),
        telegram.clone(),
        cfg.app.mailto_redirect_url.clone(),
    ));
    let interval = Duration::from_secs(cfg.app.push_interval_secs);
    let skew_wait = cfg.app.clock_skew_wait_secs;
    tokio::spawn(async move {
        job::run_scheduler(job, interval, skew_wait).await;
    });

    let bot_handle = telegram.bot().clone();
    let mailto_redirect_url = cfg.app.mailto_redirect_url.clone();

    info!("starting telegram bot");
    teloxide::repl(bot_handle, move |_bot: Bot, msg: Message| {
        let pool = pool.clone();
        let source = source.clone();
        let telegram = telegram.clone();
        let mailto_redirect_url = mailto_redirect_url.clone();
        async move {
            if let Err(err) =
                bot::handle_update(&pool, &source, &telegram, &mailto_redirect_url, &msg).await
            {
                error!(?err, "failed to handle update");
            }
            respond(())
        }
    })
    .await;

    Ok(())
}
