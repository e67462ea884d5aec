//! Engine configuration file.

use crate::error::ConfigError;
use hacore_parse::names;
use hacore_session::{
    CommandTable, CommandTemplate, Credentials, Escalation, HostConfig, SessionOptions, SshOptions,
};
use hacore_types::HostId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One cluster host as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostEntry {
    /// Cluster node name.
    pub name: String,
    /// Address or DNS name to connect to.
    pub address: String,
    /// SSH port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Login user.
    #[serde(default = "default_user")]
    pub user: String,
    /// Private key tried first.
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
    /// Try keys held by the SSH agent.
    #[serde(default = "default_true")]
    pub use_agent: bool,
    /// Login password.
    #[serde(default)]
    pub password: Option<String>,
    /// Passphrase for the identity file.
    #[serde(default)]
    pub key_passphrase: Option<String>,
    /// Command put before privileged commands.
    #[serde(default = "default_escalation_prefix")]
    pub escalation_prefix: String,
    /// Password fed to the escalation command.
    #[serde(default)]
    pub escalation_password: Option<String>,
}

fn default_port() -> u16 {
    22
}

fn default_user() -> String {
    "root".to_string()
}

fn default_true() -> bool {
    true
}

fn default_escalation_prefix() -> String {
    Escalation::default().prefix
}

impl HostEntry {
    /// Host with the default port, user and escalation.
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port: default_port(),
            user: default_user(),
            identity_file: None,
            use_agent: true,
            password: None,
            key_passphrase: None,
            escalation_prefix: default_escalation_prefix(),
            escalation_password: None,
        }
    }
}

/// Engine settings, loaded from TOML or JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Cluster hosts.
    pub hosts: Vec<HostEntry>,
    /// Pause between background polls.
    pub poll_interval_secs: u64,
    /// Budget for one host's whole command set.
    pub poll_timeout_secs: u64,
    /// Default budget for one commit command.
    pub command_timeout_secs: u64,
    /// Budget for one authentication attempt.
    pub connect_timeout_secs: u64,
    /// Budget for killing a timed-out remote process group.
    pub kill_timeout_secs: u64,
    /// Options passed to the ssh client.
    pub ssh: SshOptions,
    /// Entries overlaid on the built-in command table.
    pub commands: BTreeMap<String, CommandTemplate>,
    /// Command names run on every host each poll.
    pub poll_commands: Vec<String>,
    /// Shadow configuration used for simulation.
    pub shadow_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            poll_interval_secs: 15,
            poll_timeout_secs: 30,
            command_timeout_secs: 60,
            connect_timeout_secs: 10,
            kill_timeout_secs: 5,
            ssh: SshOptions::default(),
            commands: BTreeMap::new(),
            poll_commands: names::DEFAULT_SET.iter().map(|s| s.to_string()).collect(),
            shadow_name: "hacore-preview".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load and validate a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: EngineConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => return Err(ConfigError::UnsupportedExtension(ext.to_string())),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject duplicate hosts, zero timeouts and unknown poll commands.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for host in &self.hosts {
            let id = HostId::new(&host.name);
            if !seen.insert(id.clone()) {
                return Err(ConfigError::DuplicateHost(id));
            }
        }
        for (name, value) in [
            ("poll_interval_secs", self.poll_interval_secs),
            ("poll_timeout_secs", self.poll_timeout_secs),
            ("command_timeout_secs", self.command_timeout_secs),
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("kill_timeout_secs", self.kill_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroTimeout(name));
            }
        }
        if self.poll_commands.is_empty() {
            return Err(ConfigError::EmptyCommandSet);
        }
        let table = self.command_table()?;
        for name in &self.poll_commands {
            if !table.contains(name) {
                return Err(hacore_session::CommandTableError::UnknownCommand(name.clone()).into());
            }
        }
        Ok(())
    }

    /// Built-in table with the configured overrides applied.
    pub fn command_table(&self) -> Result<CommandTable, ConfigError> {
        let mut table = CommandTable::builtin()?;
        table.merge(self.commands.clone());
        Ok(table)
    }

    /// Connection settings for every host.
    pub fn host_configs(&self) -> Vec<HostConfig> {
        self.hosts
            .iter()
            .map(|h| HostConfig {
                id: HostId::new(&h.name),
                address: h.address.clone(),
                port: h.port,
                user: h.user.clone(),
                credentials: Credentials {
                    identity_file: h.identity_file.clone(),
                    use_agent: h.use_agent,
                    password: h.password.clone(),
                    key_passphrase: h.key_passphrase.clone(),
                },
                escalation: Escalation {
                    prefix: h.escalation_prefix.clone(),
                    password: h.escalation_password.clone(),
                },
                connect_timeout: self.connect_timeout(),
            })
            .collect()
    }

    /// Options for the session manager.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            kill_timeout: Duration::from_secs(self.kill_timeout_secs),
        }
    }

    /// Pause between background polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Budget for one host's whole command set.
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    /// Default budget for one commit command.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Budget for one authentication attempt.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
