//! Shared fixtures for session integration tests.

use hacore_session::testing::ScriptedTransport;
use hacore_session::{HostConfig, SessionManager, SessionOptions};
use std::sync::Arc;
use std::time::Duration;

/// A manager over a scripted transport with `count` hosts named `node1..`.
pub struct TestHosts {
    pub transport: Arc<ScriptedTransport>,
    pub manager: Arc<SessionManager>,
}

impl TestHosts {
    pub fn new(count: usize) -> Self {
        let transport = Arc::new(ScriptedTransport::new());
        let manager = Arc::new(SessionManager::new(
            transport.clone(),
            SessionOptions {
                kill_timeout: Duration::from_secs(1),
            },
        ));
        for i in 1..=count {
            let mut host = HostConfig::new(format!("node{}", i).as_str(), format!("10.0.0.{}", i));
            host.connect_timeout = Duration::from_secs(2);
            manager.add_host(host);
        }
        Self { transport, manager }
    }
}
