// SPDX-License-Identifier: Apache-2.0

use anyhow::{Context, Result};
use cassandra_native_driver::{
    cfg::{cli::resolve_config_path, config::ClusterConfig, logger::init_logger},
    client::client::Client,
    protocol::messages::result::ResultBody,
};
use tracing::info;

/// A minimal probe: connect using a cluster config file, run one query
/// against the discovered topology, print what came back, shut down.
#[tokio::main]
async fn main() -> Result<()> {
    let _guard = init_logger("tests/config_logger.yaml")?;

    let config_path = resolve_config_path("config/cluster.yaml").context("failed to resolve cluster config path")?;
    let config = ClusterConfig::load_from_file(&config_path).context("failed to load cluster config")?;

    let client = Client::connect(config).await.context("failed to connect to cluster")?;
    info!("connected, running probe query");

    let request = client.statement("SELECT cluster_name, release_version FROM system.local");
    match client.execute(&request).await? {
        ResultBody::Rows(rows) => info!(row_count = rows.rows.len(), "probe query succeeded"),
        other => info!(?other, "probe query returned non-Rows result"),
    }

    client.shutdown().await;
    Ok(())
}
