use crate::admin::command::AdminCommand;
use crate::utils::error::{Result, RouterError};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::mpsc;

/// Local mailbox-maintenance backend.
#[async_trait]
pub trait MailboxAdmin: Send + Sync {
    async fn is_local_user(&self, username: &str) -> Result<bool>;
    async fn run(&self, command: &AdminCommand) -> Result<String>;
}

/// Runs commands through the `z-push-admin` tool.
#[derive(Debug, Clone)]
pub struct ZPushAdmin {
    binary: String,
}

impl ZPushAdmin {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn invoke(&self, action: &str, args: &[String]) -> Result<String> {
        let output = Command::new(&self.binary)
            .arg("-a")
            .arg(action)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(RouterError::CommandError {
                message: format!(
                    "{} -a {} exited with {}: {}",
                    self.binary,
                    action,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for ZPushAdmin {
    fn default() -> Self {
        Self::new("z-push-admin")
    }
}

#[async_trait]
impl MailboxAdmin for ZPushAdmin {
    async fn is_local_user(&self, username: &str) -> Result<bool> {
        let output = self
            .invoke("list", &["-u".to_string(), username.to_string()])
            .await?;
        Ok(!output.contains("no devices found"))
    }

    async fn run(&self, command: &AdminCommand) -> Result<String> {
        self.invoke(command.kind.as_str(), &command.tool_args()).await
    }
}

/// A raw bus message: channel name and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub channel: String,
    pub payload: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchResult {
    Executed,
    NotLocal,
    Rejected,
    Failed,
}

pub struct CommandDispatcher {
    admin: Arc<dyn MailboxAdmin>,
}

impl CommandDispatcher {
    pub fn new(admin: Arc<dyn MailboxAdmin>) -> Self {
        Self { admin }
    }

    pub async fn handle(&self, message: &BusMessage) -> DispatchResult {
        let command = match AdminCommand::parse(&message.channel, &message.payload) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(channel = %message.channel, error = %e, "rejected command");
                return DispatchResult::Rejected;
            }
        };

        match self.admin.is_local_user(&command.username).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(
                    username = %command.username,
                    command = %command.kind,
                    "user is not local, skipping command"
                );
                return DispatchResult::NotLocal;
            }
            Err(e) => {
                tracing::error!(username = %command.username, error = %e, "local user check failed");
                return DispatchResult::Failed;
            }
        }

        match self.admin.run(&command).await {
            Ok(output) => {
                tracing::info!(
                    username = %command.username,
                    command = %command.kind,
                    output = %output.trim(),
                    "command processed"
                );
                DispatchResult::Executed
            }
            Err(e) => {
                tracing::error!(
                    username = %command.username,
                    command = %command.kind,
                    error = %e,
                    "command failed"
                );
                DispatchResult::Failed
            }
        }
    }

    /// Consumes messages until the channel closes or `shutdown` resolves.
    pub async fn run<F>(&self, mut receiver: mpsc::Receiver<BusMessage>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("shutting down command handler");
                    return;
                }
                message = receiver.recv() => match message {
                    Some(message) => {
                        self.handle(&message).await;
                    }
                    None => {
                        tracing::info!("command bus closed");
                        return;
                    }
                },
            }
        }
    }
}
