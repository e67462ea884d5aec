//! `hactl` command line.

use crate::config::EngineConfig;
use crate::edit::{EditEngine, EditOp};
use crate::simulate::PreviewMode;
use crate::sync::{ClusterSync, SyncReport};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hacore_graph::ClusterGraph;
use hacore_session::SshTransport;
use hacore_types::HostId;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Command line of `hactl`.
#[derive(Parser)]
#[command(name = "hactl")]
#[command(about = "HA cluster state sync and transactional configuration", long_about = None)]
pub struct Cli {
    /// Engine configuration (`.toml` or `.json`).
    #[arg(short, long, env = "HACTL_CONFIG", default_value = "/etc/hacore/hactl.toml", global = true)]
    pub config: PathBuf,

    /// Log as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// What to do.
    #[command(subcommand)]
    pub command: Command,
}

/// `hactl` subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Poll every host once and print the cluster.
    Status {
        /// Print the graph as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Keep the graph in sync until interrupted.
    Watch,
    /// Exit non-zero when a host is unavailable or a volume is split.
    Check,
    /// Stage the ops in an edit file and print the simulated result.
    Preview {
        /// JSON array of edit ops.
        file: PathBuf,
    },
    /// Stage, simulate and commit the ops in an edit file.
    Apply {
        /// JSON array of edit ops.
        file: PathBuf,
        /// Hosts the edit may touch.
        #[arg(short, long = "target", required = true)]
        targets: Vec<String>,
    },
}

impl Cli {
    /// Run the selected subcommand.
    pub async fn run(self) -> Result<ExitCode> {
        match &self.command {
            Command::Status { json } => self.status(*json).await,
            Command::Watch => self.watch().await,
            Command::Check => self.check().await,
            Command::Preview { file } => self.preview(file).await,
            Command::Apply { file, targets } => self.apply(file, targets).await,
        }
    }

    fn load(&self) -> Result<(EngineConfig, Arc<ClusterSync>)> {
        let config = EngineConfig::from_file(&self.config)
            .with_context(|| format!("loading {}", self.config.display()))?;
        let transport = Arc::new(SshTransport::new(config.ssh.clone()));
        let sync = Arc::new(ClusterSync::from_config(&config, transport)?);
        tracing::info!(hosts = config.hosts.len(), "engine configured");
        Ok((config, sync))
    }

    async fn status(&self, json: bool) -> Result<ExitCode> {
        let (_, sync) = self.load()?;
        let report = sync.resync().await;
        let graph = sync.store().load();
        if json {
            println!("{}", serde_json::to_string_pretty(&*graph)?);
        } else {
            print_graph(&graph);
            print_report(&report);
        }
        sync.manager().disconnect_all().await;
        Ok(ExitCode::SUCCESS)
    }

    async fn watch(&self) -> Result<ExitCode> {
        let (_, sync) = self.load()?;
        let shutdown = CancellationToken::new();
        let runner = {
            let sync = sync.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { sync.run(shutdown).await })
        };

        let mut updates = sync.store().subscribe();
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let generation = *updates.borrow_and_update();
                    let graph = sync.store().load();
                    println!(
                        "generation {}: {} hosts ({} unavailable), {} resources, {} volumes ({} split-brain)",
                        generation,
                        graph.hosts().count(),
                        graph.unavailable_hosts().len(),
                        graph.resources().count(),
                        graph.volumes().count(),
                        graph.split_brain_volumes().len(),
                    );
                }
            }
        }

        shutdown.cancel();
        runner.await?;
        sync.manager().disconnect_all().await;
        Ok(ExitCode::SUCCESS)
    }

    async fn check(&self) -> Result<ExitCode> {
        let (_, sync) = self.load()?;
        let report = sync.resync().await;
        print_report(&report);
        sync.manager().disconnect_all().await;
        if report.is_healthy() {
            println!("OK");
            Ok(ExitCode::SUCCESS)
        } else {
            Ok(ExitCode::from(2))
        }
    }

    async fn preview(&self, file: &Path) -> Result<ExitCode> {
        let (config, sync) = self.load()?;
        let ops = read_ops(file)?;
        sync.resync().await;
        let engine = EditEngine::from_config(sync.clone(), &config)?;
        let mut session = engine.open_session();
        for op in ops {
            session.stage(op)?;
        }
        for op in session.diff() {
            println!("  {}", op);
        }
        let preview = session.preview().await?;
        if preview.mode == PreviewMode::Structural {
            println!("(not functionally simulated)");
        }
        print_graph(&preview);
        sync.manager().disconnect_all().await;
        Ok(ExitCode::SUCCESS)
    }

    async fn apply(&self, file: &Path, targets: &[String]) -> Result<ExitCode> {
        let (config, sync) = self.load()?;
        let ops = read_ops(file)?;
        sync.resync().await;
        let engine = EditEngine::from_config(sync.clone(), &config)?;
        let mut session = engine.open_session();
        for op in ops {
            session.stage(op)?;
        }
        let targets: Vec<HostId> = targets.iter().map(HostId::new).collect();
        let result = session.commit(&targets).await?;
        println!("{}", serde_json::to_string_pretty(&result)?);
        sync.manager().disconnect_all().await;
        if result.is_success() {
            Ok(ExitCode::SUCCESS)
        } else {
            Ok(ExitCode::FAILURE)
        }
    }
}

fn read_ops(path: &Path) -> Result<Vec<EditOp>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing edit ops in {}", path.display()))
}

fn print_graph(graph: &ClusterGraph) {
    println!("{:<20} {:<14} {:<8} {}", "HOST", "SESSION", "ONLINE", "NOTE");
    println!("{}", "-".repeat(60));
    for host in graph.hosts() {
        let online = match host.online {
            Some(true) => "yes",
            Some(false) => "no",
            None => "-",
        };
        let note = host.unavailable.as_deref().unwrap_or(if host.is_dc { "dc" } else { "" });
        println!(
            "{:<20} {:<14} {:<8} {}",
            host.id.to_string(),
            host.connection.to_string(),
            online,
            note
        );
    }

    println!();
    println!("{:<24} {:<12} {}", "RESOURCE", "STATUS", "RUNNING ON");
    println!("{}", "-".repeat(60));
    for resource in graph.resources() {
        let running: Vec<String> = graph
            .hosts_running(resource.id())
            .iter()
            .map(ToString::to_string)
            .collect();
        println!(
            "{:<24} {:<12} {}",
            resource.id().to_string(),
            graph.effective_status(resource.id()).to_string(),
            running.join(",")
        );
    }

    println!();
    println!("{:<16} {:<14} {}", "VOLUME", "CONNECTION", "LEGS");
    println!("{}", "-".repeat(60));
    for volume in graph.volumes() {
        let legs: Vec<String> = volume
            .legs
            .iter()
            .map(|l| format!("{}:{}/{:?}", l.host, l.role.as_str(), l.disk_state))
            .collect();
        let split = if volume.is_split_brain() { " SPLIT-BRAIN" } else { "" };
        println!(
            "{:<16} {:<14} {}{}",
            volume.id.to_string(),
            format!("{:?}", volume.connection),
            legs.join(" "),
            split
        );
    }
}

fn print_report(report: &SyncReport) {
    for host in &report.unavailable {
        println!("unavailable: {}", host);
    }
    for volume in &report.split_brain {
        println!("split-brain: {}", volume);
    }
    if report.warnings > 0 {
        println!("{} rebuild warnings", report.warnings);
    }
}
