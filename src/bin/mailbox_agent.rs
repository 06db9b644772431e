use activesync_router::admin::{BusMessage, CommandDispatcher, ZPushAdmin, CHANNEL_PREFIX};
use activesync_router::utils::logger;
use clap::Parser;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Debug, Parser)]
#[command(name = "mailbox_agent")]
#[command(about = "Runs mailbox-maintenance commands for users homed on this node")]
struct AgentConfig {
    #[arg(long, default_value = "z-push-admin")]
    admin_binary: String,

    #[arg(long, help = "Enable verbose output")]
    verbose: bool,
}

/// Feeds `"<channel> <payload>"` lines from stdin into the command bus.
async fn read_stdin(sender: mpsc::Sender<BusMessage>) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let Some((channel, payload)) = line.trim().split_once(' ') else {
            tracing::warn!(line = %line, "ignoring line without payload");
            continue;
        };
        if !channel.starts_with(CHANNEL_PREFIX) {
            tracing::warn!(channel, "ignoring message on foreign channel");
            continue;
        }
        let message = BusMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        };
        if sender.send(message).await.is_err() {
            break;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AgentConfig::parse();
    logger::init_logger(config.verbose, false);

    let (sender, receiver) = mpsc::channel(64);
    let reader = tokio::spawn(async move {
        if let Err(e) = read_stdin(sender).await {
            tracing::error!(error = %e, "stdin reader failed");
        }
    });

    tracing::info!("watching for commands");

    let dispatcher = CommandDispatcher::new(Arc::new(ZPushAdmin::new(config.admin_binary)));
    dispatcher
        .run(receiver, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "unable to install Ctrl+C signal handler");
                std::future::pending::<()>().await;
            }
        })
        .await;

    reader.abort();
    Ok(())
}
