#![warn(missing_docs)]

//! HACore session subsystem: one persistent remote shell per cluster host,
//! authentication ladder, per-command timeouts with remote process-group
//! termination, and the logical command table.

pub mod cancel;
pub mod commands;
pub mod error;
pub mod host;
pub mod manager;
pub mod session;
pub mod ssh;
pub mod testing;
pub mod transport;

pub use cancel::{CancelReason, CancelRegistry, CancelStats, CommandHandle};
pub use commands::{shell_quote, CommandTable, CommandTemplate, RemoteCommand};
pub use error::{CommandError, CommandTableError, ConnectError};
pub use host::{AuthKind, AuthMethod, Credentials, Escalation, HostConfig};
pub use manager::{PendingCommand, SessionManager, SessionOptions};
pub use session::Session;
pub use ssh::{SshOptions, SshTransport};
pub use transport::{CommandOutput, ExecRequest, RemoteTransport, TransportError};
