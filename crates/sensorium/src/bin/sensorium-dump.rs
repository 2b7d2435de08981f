//! sensorium-dump - create mock nodes and print the resulting node trees
//!
//! ```text
//! sensorium-dump Depth Image
//! sensorium-dump --json --config ~/sensorium.toml User
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context as _, Result};
use clap::Parser;
use sensoconf::{expand_path, SensoConfig};
use sensorium::{Context, NodeInfoSnapshot};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "sensorium-dump")]
#[command(about = "Create mock production nodes and dump the node trees")]
#[command(version)]
struct Cli {
    /// Node type names to create mock nodes for (e.g. Depth, Image, User)
    types: Vec<String>,

    /// Config file to load after the standard locations
    #[arg(short, long)]
    config: Option<String>,

    /// Print JSON snapshots instead of the text tree
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path: Option<PathBuf> = cli.config.as_deref().map(expand_path);
    let config = SensoConfig::load_from(config_path.as_deref())
        .context("Failed to load configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.telemetry.log_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("sensorium-dump {} starting", env!("CARGO_PKG_VERSION"));

    let ctx = Context::with_config(&config);
    let mut nodes = Vec::with_capacity(cli.types.len());
    for name in &cli.types {
        let Some(node_type) = ctx.type_by_name(name) else {
            bail!("Unknown node type: {name}");
        };
        let node = ctx
            .create_mock_node(node_type, None)
            .with_context(|| format!("Failed to create mock {name} node"))?;
        debug!(node = %node.handle(), "Created mock node");
        nodes.push(node);
    }

    let infos = ctx.enumerate_existing_nodes();
    if cli.json {
        let snapshots: Vec<NodeInfoSnapshot> = infos.iter().map(|i| i.snapshot()).collect();
        println!("{}", serde_json::to_string_pretty(&snapshots)?);
    } else {
        for info in &infos {
            print!("{}", info.tree_string());
        }
    }

    drop(infos);
    drop(nodes);
    ctx.force_shutdown();
    Ok(())
}
