// SPDX-License-Identifier: MIT

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use nodeflow_rs::adk::config::EngineConfig;
use nodeflow_rs::adk::trace::{NodeSpan, Span};
use nodeflow_rs::flow::builder::NodeBuilder;
use nodeflow_rs::flow::loader::{seed_pool, NodeLoader};
use nodeflow_rs::flow::node::NodeContext;
use nodeflow_rs::flow::pool::VariablePool;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a single node definition once
    Run {
        /// Path to the node YAML file
        #[arg(short, long)]
        file: String,

        /// JSON document seeding the variable pool
        #[arg(short, long)]
        pool: Option<String>,

        /// Flow id forwarded to providers
        #[arg(long, default_value = "local")]
        flow_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenv().ok();
    env_logger::init();
    tracing::subscriber::set_global_default(
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .finish(),
    )
    .context("installing tracing subscriber")?;

    let args = Args::parse();

    match args.command {
        Commands::Run {
            file,
            pool: seed,
            flow_id,
        } => {
            let config = EngineConfig::from_env()?;
            let builder = NodeBuilder::from_config(config)?;
            let (def, node) = builder
                .build_file(&file)
                .with_context(|| format!("building node from {}", file))?;

            let pool = VariablePool::new();
            if let Some(path) = seed {
                let seed = NodeLoader::new()
                    .load_seed(&path)
                    .with_context(|| format!("reading pool seed {}", path))?;
                seed_pool(&pool, &seed)?;
            }
            pool.bind_inputs(&def.id, &def.inputs);

            let cancel = CancellationToken::new();
            let on_ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::warn!("Interrupted, cancelling node");
                    on_ctrl_c.cancel();
                }
            });

            let span = NodeSpan::new(&def.id, &flow_id);
            let ctx = NodeContext::new(&pool, &span, &cancel, &flow_id);

            log::info!("Running node '{}' (trace {})", def.id, span.trace_id());
            let result = node.execute(&ctx).await;

            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(if result.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}
