//! Relica demo binary
//!
//! Boots an in-process cluster of registry nodes over one shared in-memory
//! log, writes through the first node, and polls the last node until the
//! writes converge. The HTTP/RPC surface and the real log transport live
//! outside this crate; this binary exercises the engine end to end.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clap::Parser;
use relica::log::{EntryLog, MemLog};
use relica::node::{NodeConfig, RegistryNode};
use relica::search::{SearchScope, SortBy, SortOrder};
use relica::store::types::{ArtifactType, EditableMetadata, RuleType, VersionSelector};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "relica", about = "In-process registry cluster demo")]
struct Args {
    /// Number of nodes sharing the log
    #[arg(long, default_value_t = 2)]
    nodes: u64,

    /// Number of artifacts to create
    #[arg(long, default_value_t = 3)]
    artifacts: u64,

    /// Seconds to wait for cross-node convergence
    #[arg(long, default_value_t = 10)]
    convergence_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let node_count = args.nodes.max(1);
    let wait = Duration::from_secs(args.convergence_timeout);

    let log: Arc<dyn EntryLog> = Arc::new(MemLog::new());

    let mut nodes = Vec::new();
    for node_id in 1..=node_count {
        let config = NodeConfig {
            node_id,
            ..Default::default()
        };
        nodes.push(RegistryNode::start(config, log.clone())?);
    }
    for node in &nodes {
        node.wait_ready().await?;
    }
    tracing::info!(nodes = node_count, "Cluster ready");

    let writer = &nodes[0];
    let reader = nodes.last().ok_or("no nodes started")?;

    writer
        .set_global_rule(RuleType::Validity, "SYNTAX_ONLY")
        .await?
        .wait(wait)
        .await?;

    for i in 1..=args.artifacts {
        let artifact_id = format!("demo-{}", i);
        let content = format!("{{\"schema\":\"demo\",\"revision\":{}}}", i);

        let meta = writer
            .create_artifact(
                Some(artifact_id.clone()),
                ArtifactType::Json,
                Bytes::from(content),
            )
            .await?
            .wait_metadata(wait)
            .await?;
        tracing::info!(
            artifact_id = %artifact_id,
            global_id = %meta.global_id,
            "Created through writer node"
        );

        writer
            .update_metadata(
                &artifact_id,
                VersionSelector::Latest,
                EditableMetadata {
                    name: Some(format!("Demo schema {}", i)),
                    description: Some("created by the relica demo".to_string()),
                    labels: vec!["demo".to_string()],
                },
            )
            .await?
            .wait(wait)
            .await?;

        // Reads go against the last node, which converges asynchronously
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            match reader.get_artifact_metadata(&artifact_id) {
                Ok(meta) if meta.name.is_some() => {
                    tracing::info!(
                        artifact_id = %artifact_id,
                        node_id = reader.node_id(),
                        version = meta.version,
                        "Observed on reader node"
                    );
                    break;
                }
                _ if tokio::time::Instant::now() >= deadline => {
                    return Err(format!("{} did not converge", artifact_id).into());
                }
                _ => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
    }

    let results = reader.search_artifacts(
        "demo",
        0,
        args.artifacts as usize,
        SearchScope::Everything,
        SortBy::Name,
        SortOrder::Asc,
    );
    tracing::info!(count = results.count, "Search on reader node");

    for node in nodes {
        node.shutdown().await;
    }
    Ok(())
}
