//! End-to-end session behavior over the scripted transport.

mod common;

use common::TestHosts;
use hacore_session::testing::ScriptedReply;
use hacore_session::{CommandError, CommandTable, ConnectError};
use hacore_types::{ConnectionState, HostId};
use std::time::Duration;

#[tokio::test]
async fn test_rendered_command_runs_escalated() {
    let hosts = TestHosts::new(1);
    hosts
        .transport
        .on("node1", "crm_mon --one-shot --as-xml", ScriptedReply::ok("<crm_mon/>"));
    let table = CommandTable::builtin().unwrap();
    let cmd = table.render("cluster.status", &[]).unwrap();

    let out = hosts
        .manager
        .run(&HostId::new("node1"), &cmd, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(out.stdout, "<crm_mon/>");
    let scripts = hosts.transport.executed("node1");
    assert!(scripts[0].starts_with("sudo -n "));
}

#[tokio::test(start_paused = true)]
async fn test_hung_host_does_not_block_others() {
    let hosts = TestHosts::new(3);
    hosts.transport.on_any("drbdsetup", ScriptedReply::ok("r0 role:Primary"));
    hosts.transport.on("node2", "drbdsetup", ScriptedReply::hang());
    let table = CommandTable::builtin().unwrap();
    let cmd = table.render("storage.status", &[]).unwrap();

    let manager = &hosts.manager;
    let (node1, node2, node3) = (HostId::new("node1"), HostId::new("node2"), HostId::new("node3"));
    let (a, b, c) = tokio::join!(
        manager.run(&node1, &cmd, Duration::from_secs(2)),
        manager.run(&node2, &cmd, Duration::from_secs(2)),
        manager.run(&node3, &cmd, Duration::from_secs(2)),
    );
    assert!(a.is_ok());
    assert!(matches!(b, Err(CommandError::Timeout { .. })));
    assert!(c.is_ok());
    assert_eq!(hosts.transport.kills("node2"), 1);
    assert_eq!(hosts.transport.kills("node1"), 0);
}

#[tokio::test]
async fn test_auth_failed_host_refuses_commands() {
    let hosts = TestHosts::new(1);
    hosts.transport.accept_only("node1", &[]);
    let id = HostId::new("node1");
    assert!(matches!(
        hosts.manager.connect(&id).await,
        Err(ConnectError::AuthFailed { .. })
    ));
    assert_eq!(hosts.manager.state(&id), Some(ConnectionState::AuthFailed));

    let err = hosts
        .manager
        .run(&id, &hacore_session::RemoteCommand::raw("true"), Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::NotConnected { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_is_reported() {
    let hosts = TestHosts::new(1);
    hosts.transport.delay_open("node1", Duration::from_secs(30));
    let result = hosts.manager.connect(&HostId::new("node1")).await;
    assert!(matches!(result, Err(ConnectError::Timeout { timeout_ms: 2000, .. })));
}

#[tokio::test]
async fn test_reconnect_after_host_returns() {
    let hosts = TestHosts::new(1);
    let id = HostId::new("node1");
    hosts.transport.on("node1", "uptime", ScriptedReply::ok("up"));
    hosts.transport.refuse_connections("node1");
    assert!(hosts.manager.connect(&id).await.is_err());

    hosts.transport.allow_connections("node1");
    let mut cmd = hacore_session::RemoteCommand::raw("uptime");
    cmd.read_only = true;
    let out = hosts.manager.run(&id, &cmd, Duration::from_secs(5)).await.unwrap();
    assert_eq!(out.stdout, "up");
    assert_eq!(hosts.manager.state(&id), Some(ConnectionState::Connected));
}
