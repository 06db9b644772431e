use crate::utils::error::{Result, RouterError};
use std::fmt;

pub const CHANNEL_PREFIX: &str = "activesync.command.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    FixStates,
    ClearLoop,
    Resync,
    Remove,
}

impl CommandKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "fixstates" => Some(CommandKind::FixStates),
            "clearloop" => Some(CommandKind::ClearLoop),
            "resync" => Some(CommandKind::Resync),
            "remove" => Some(CommandKind::Remove),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::FixStates => "fixstates",
            CommandKind::ClearLoop => "clearloop",
            CommandKind::Resync => "resync",
            CommandKind::Remove => "remove",
        }
    }

    pub fn needs_device(&self) -> bool {
        !matches!(self, CommandKind::FixStates)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mailbox-maintenance command addressed to one user and optionally one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminCommand {
    pub kind: CommandKind,
    pub username: String,
    pub device_id: Option<String>,
}

impl AdminCommand {
    /// Parses a bus message: the command name is the last dotted segment of the
    /// channel, the payload is `"<username> [<device_id>]"`.
    pub fn parse(channel: &str, payload: &str) -> Result<Self> {
        let name = channel.rsplit('.').next().unwrap_or(channel);
        let kind = CommandKind::parse(name).ok_or_else(|| RouterError::CommandError {
            message: format!("unknown command: {}", name),
        })?;

        let mut parts = payload.trim().splitn(2, ' ');
        let username = parts
            .next()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| RouterError::CommandError {
                message: format!("command '{}' is missing a username", kind),
            })?
            .to_string();
        let device_id = parts
            .next()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);

        if kind.needs_device() && device_id.is_none() {
            return Err(RouterError::CommandError {
                message: format!("command '{}' for '{}' needs a device id", kind, username),
            });
        }

        Ok(Self {
            kind,
            username,
            device_id,
        })
    }

    /// Arguments after `-a <command>` for the admin tool.
    pub fn tool_args(&self) -> Vec<String> {
        let mut args = vec!["-u".to_string(), self.username.clone()];
        if self.kind.needs_device() {
            if let Some(device_id) = &self.device_id {
                args.push("-d".to_string());
                args.push(device_id.clone());
            }
        }
        args
    }
}
