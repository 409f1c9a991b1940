//! zkcluster - Leader Election and Cluster Membership
//!
//! Command line front end: configuration helpers and an in-process
//! simulation of a cluster running against the in-memory ensemble.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use zkcluster::config::{CoordinatorConfig, LoggingConfig};
use zkcluster::coordinator::Coordinator;
use zkcluster::error::{Error, Result};
use zkcluster::membership::Node;
use zkcluster::session::MemoryEnsemble;

/// zkcluster - Leader Election and Cluster Membership
#[derive(Parser)]
#[command(name = "zkcluster")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "zkcluster.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Log format (pretty, json); overrides the config file
    #[arg(long)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "zkcluster.toml")]
        output: PathBuf,

        /// Election path
        #[arg(long, default_value = "/zkcluster/leader")]
        election_path: String,

        /// Data advertised by this member
        #[arg(long, default_value = "member-1")]
        member_data: String,
    },

    /// Validate configuration file
    Validate,

    /// Run a cluster against an in-memory ensemble and replace its leader repeatedly
    Simulate {
        /// Number of members
        #[arg(short, long, default_value_t = 3)]
        members: usize,

        /// Number of leader replacements
        #[arg(short, long, default_value_t = 5)]
        rounds: usize,

        /// Print each round's snapshot as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging: config file first, flags on top
    let logging = CoordinatorConfig::from_file(&cli.config)
        .map(|config| config.logging)
        .unwrap_or_default()
        .with_overrides(cli.log_level.clone(), cli.log_format.clone());
    init_logging(&logging);

    match cli.command {
        Commands::Init {
            output,
            election_path,
            member_data,
        } => run_init(output, election_path, member_data).context("init failed"),
        Commands::Validate => run_validate(cli.config).context("validation failed"),
        Commands::Simulate {
            members,
            rounds,
            json,
        } => run_simulate(cli.config, members, rounds, json).await,
    }
}

/// Initialize logging
fn init_logging(logging: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| logging.level.as_str().into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Write an example configuration file
fn run_init(output: PathBuf, election_path: String, member_data: String) -> Result<()> {
    if output.exists() {
        return Err(Error::Config(format!("{:?} already exists", output)));
    }

    let config = CoordinatorConfig::new(
        vec!["127.0.0.1:2181".to_string()],
        Duration::from_secs(1),
        election_path,
        member_data,
    );
    config.validate()?;

    std::fs::write(&output, config.to_toml()?)?;
    println!("Wrote configuration to {:?}", output);
    Ok(())
}

/// Validate configuration file
fn run_validate(config_path: PathBuf) -> Result<()> {
    match CoordinatorConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration {:?} is valid", config_path);
            println!("  servers:        {}", config.connect_string());
            println!("  election path:  {}", config.election_path);
            println!("  member data:    {}", config.member_data);
            println!("  timeout:        {:?}", config.connect_timeout());
            Ok(())
        }
        Err(e) => {
            tracing::error!("Invalid configuration {:?}: {}", config_path, e);
            Err(e)
        }
    }
}

/// Run a simulated cluster
async fn run_simulate(config_path: PathBuf, members: usize, rounds: usize, json: bool) -> anyhow::Result<()> {
    if members == 0 {
        bail!("members must be at least 1");
    }

    let base = if config_path.exists() {
        CoordinatorConfig::from_file(&config_path)
            .with_context(|| format!("loading {:?}", config_path))?
    } else {
        CoordinatorConfig::new(
            vec!["memory:2181".to_string()],
            Duration::from_secs(1),
            "/zkcluster/simulate",
            "",
        )
    };

    let ensemble = MemoryEnsemble::new();
    let mut cluster = Vec::with_capacity(members);
    for i in 0..members {
        cluster.push(start_member(&ensemble, &base, i).await?);
    }
    tracing::info!("Started {} members under {}", members, base.election_path);

    let settle = base.connect_timeout() * 2;
    for round in 0..=rounds {
        let Some(leader) = wait_for_agreement(&cluster, settle).await else {
            bail!("members did not agree on a leader in round {}", round);
        };

        let leader_idx = find_leader(&cluster).await;
        if json {
            if let Some(idx) = leader_idx {
                let snapshot = cluster[idx].snapshot().await;
                let line = serde_json::to_string(&snapshot).context("serializing snapshot")?;
                println!("{}", line);
            }
        } else {
            println!("round {}: leader {} ({} members)", round, leader, cluster.len());
        }

        if round == rounds {
            break;
        }

        // Replace the leader
        if let Some(idx) = leader_idx {
            cluster[idx].stop().await?;
            cluster[idx] = start_member(&ensemble, &base, members + round).await?;
        }
    }

    for member in &cluster {
        member.stop().await?;
    }
    Ok(())
}

async fn start_member(ensemble: &MemoryEnsemble, base: &CoordinatorConfig, i: usize) -> Result<Arc<Coordinator>> {
    let mut config = base.clone();
    config.member_data = format!("member-{}", i);

    let coordinator = Arc::new(Coordinator::new(ensemble.client(), config, vec![]).await?);
    coordinator.start().await?;
    Ok(coordinator)
}

async fn find_leader(cluster: &[Arc<Coordinator>]) -> Option<usize> {
    for (idx, member) in cluster.iter().enumerate() {
        if member.is_leader().await {
            return Some(idx);
        }
    }
    None
}

/// Poll until every member reports the same leader and exactly one leads
async fn wait_for_agreement(cluster: &[Arc<Coordinator>], timeout: Duration) -> Option<Node> {
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        let mut leaders = Vec::with_capacity(cluster.len());
        let mut leading = 0;
        for member in cluster {
            leaders.push(member.leader().await);
            if member.is_leader().await {
                leading += 1;
            }
        }

        if let Some(Some(first)) = leaders.first() {
            if leading == 1 && leaders.iter().all(|l| l.as_ref() == Some(first)) {
                return Some(first.clone());
            }
        }

        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
