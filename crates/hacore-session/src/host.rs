//! Host connection parameters and credentials.

use hacore_types::HostId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Authentication method kinds, in ladder order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthKind {
    /// Public key (identity file or agent).
    Key,
    /// Password.
    Password,
    /// Passphrase-protected key answered through an askpass helper.
    Interactive,
}

/// One rung of the authentication ladder.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// Key-based, non-interactive.
    Key {
        /// Identity file; `None` uses the agent and default keys.
        identity_file: Option<PathBuf>,
    },
    /// Password authentication.
    Password {
        /// The password.
        password: String,
    },
    /// Passphrase-protected key.
    Interactive {
        /// Identity file; `None` uses the default keys.
        identity_file: Option<PathBuf>,
        /// Key passphrase.
        passphrase: String,
    },
}

impl AuthMethod {
    /// Kind of this method.
    pub fn kind(&self) -> AuthKind {
        match self {
            AuthMethod::Key { .. } => AuthKind::Key,
            AuthMethod::Password { .. } => AuthKind::Password,
            AuthMethod::Interactive { .. } => AuthKind::Interactive,
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Key { identity_file } => f
                .debug_struct("Key")
                .field("identity_file", identity_file)
                .finish(),
            AuthMethod::Password { .. } => f.debug_struct("Password").finish_non_exhaustive(),
            AuthMethod::Interactive { identity_file, .. } => f
                .debug_struct("Interactive")
                .field("identity_file", identity_file)
                .finish_non_exhaustive(),
        }
    }
}

/// Credentials configured for a host.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    /// Identity file for key and interactive authentication.
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
    /// Try agent/default keys when no identity file is set.
    #[serde(default = "default_true")]
    pub use_agent: bool,
    /// Login password.
    #[serde(default)]
    pub password: Option<String>,
    /// Passphrase for the identity file.
    #[serde(default)]
    pub key_passphrase: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Credentials {
    /// The authentication ladder: key, then password, then interactive.
    /// Rungs without configured material are left out.
    pub fn ladder(&self) -> Vec<AuthMethod> {
        let mut methods = Vec::with_capacity(3);
        if self.identity_file.is_some() || self.use_agent {
            methods.push(AuthMethod::Key {
                identity_file: self.identity_file.clone(),
            });
        }
        if let Some(password) = &self.password {
            methods.push(AuthMethod::Password {
                password: password.clone(),
            });
        }
        if let Some(passphrase) = &self.key_passphrase {
            methods.push(AuthMethod::Interactive {
                identity_file: self.identity_file.clone(),
                passphrase: passphrase.clone(),
            });
        }
        methods
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identity_file", &self.identity_file)
            .field("use_agent", &self.use_agent)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("key_passphrase", &self.key_passphrase.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Privilege escalation for commands marked privileged.
#[derive(Clone, Serialize, Deserialize)]
pub struct Escalation {
    /// Escalation command put before privileged commands. With a password
    /// set, a `sudo` prefix loses `-n` and reads the password with `-S`;
    /// any other prefix runs as written with the password on its stdin.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Escalation password fed on stdin.
    #[serde(default)]
    pub password: Option<String>,
}

fn default_prefix() -> String {
    "sudo -n".to_string()
}

impl Default for Escalation {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            password: None,
        }
    }
}

impl Escalation {
    /// No escalation (the login user is already privileged).
    pub fn none() -> Self {
        Self {
            prefix: String::new(),
            password: None,
        }
    }

    /// Prefix a command line and return the stdin it needs.
    pub fn wrap(&self, line: &str) -> (String, Option<String>) {
        match &self.password {
            Some(password) => (
                format!("{} {}", self.password_prefix(), line),
                Some(format!("{}\n", password)),
            ),
            None if self.prefix.trim().is_empty() => (line.to_string(), None),
            None => (format!("{} {}", self.prefix.trim(), line), None),
        }
    }

    /// A password without a prefix still means sudo.
    fn password_prefix(&self) -> String {
        let mut words = self.prefix.split_whitespace();
        match words.next() {
            None | Some("sudo") => {
                let mut prefix = "sudo -S -p ''".to_string();
                for word in words.filter(|w| *w != "-n" && *w != "--non-interactive") {
                    prefix.push(' ');
                    prefix.push_str(word);
                }
                prefix
            }
            Some(_) => self.prefix.trim().to_string(),
        }
    }
}

impl fmt::Debug for Escalation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Escalation")
            .field("prefix", &self.prefix)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Everything needed to reach one host.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Cluster node name.
    pub id: HostId,
    /// Network address or DNS name.
    pub address: String,
    /// SSH port.
    pub port: u16,
    /// Login user.
    pub user: String,
    /// Credentials for the ladder.
    pub credentials: Credentials,
    /// Privilege escalation.
    pub escalation: Escalation,
    /// Budget for one authentication attempt.
    pub connect_timeout: Duration,
}

impl HostConfig {
    /// Host with key authentication as root on port 22.
    pub fn new(id: impl Into<HostId>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            port: 22,
            user: "root".to_string(),
            credentials: Credentials {
                use_agent: true,
                ..Credentials::default()
            },
            escalation: Escalation::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// `user@address` destination string.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.address)
    }
}
