// Out-of-band mailbox maintenance: commands arrive tagged with a user and an
// optional device id and only run for users homed on this node.

pub mod command;
pub mod dispatcher;

pub use command::{AdminCommand, CommandKind, CHANNEL_PREFIX};
pub use dispatcher::{BusMessage, CommandDispatcher, DispatchResult, MailboxAdmin, ZPushAdmin};
