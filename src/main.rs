mod config;
mod handlers;
mod logging;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use kubeship_logs::Source;
use kubeship_sink::GkeEnvironment;
use tracing::info;

use crate::config::AgentConfig;
use crate::handlers::{HandlerRegistry, target_summary};

/// Kubeship - tails container logs on a node and ships them to cloud logging
#[derive(Parser, Debug)]
#[command(name = "kubeship")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file (built-in container defaults when omitted)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Append diagnostics to this file instead of stderr
    #[arg(long, env = "LOG_TO_FILE", value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Verbose diagnostics
    #[arg(long, env = "DEBUG", value_parser = clap::builder::FalseyValueParser::new())]
    debug: bool,

    /// Project the entries are written to
    #[arg(long, env = "GOOGLE_CLOUD_PROJECT")]
    project_id: Option<String>,

    /// Cluster name stamped on container entries
    #[arg(long, env = "STACKDRIVER_CLUSTER")]
    cluster: Option<String>,

    /// Zone stamped on container entries
    #[arg(long, env = "STACKDRIVER_ZONE")]
    zone: Option<String>,

    /// Node instance id stamped on every entry
    #[arg(long, env = "STACKDRIVER_VM_ID")]
    vm_id: Option<String>,
}

impl Args {
    fn environment(&self) -> GkeEnvironment {
        GkeEnvironment {
            project_id: self.project_id.clone(),
            cluster_name: self.cluster.clone(),
            zone: self.zone.clone(),
            vm_id: self.vm_id.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    logging::init_logging(args.debug, args.log_file.as_deref())?;

    let result = run(args).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

async fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => AgentConfig::load(path)?,
        None => AgentConfig::default(),
    };

    let mut registry = HandlerRegistry::new(args.environment());
    let mut sources: Vec<Source> = registry
        .build(&config)
        .await?
        .into_iter()
        .map(Source::new)
        .collect();

    for source in &mut sources {
        source.start().await;
    }
    info!(sources = ?target_summary(&config), "kubeship started");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    for source in &mut sources {
        source.stop().await;
    }
    registry.flush_all().await;

    info!("kubeship stopped");
    Ok(())
}
