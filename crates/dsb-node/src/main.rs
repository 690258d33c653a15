use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dsb_runtime::modules::{HeartbeatModule, HelloWorldModule};
use dsb_runtime::{api, Dispatcher, FaultProfile, HttpProbe, MessageKind, Resolver, RuntimeConfig};
use dsb_transport::{ClusterDirectory, NodeId, TransportConfig};

#[derive(Parser, Debug)]
#[command(name = "dsb-node", about = "Run one node of a dsb cluster")]
struct Cli {
    /// This node's id.
    #[arg(long, env = "ID", default_value_t = 0)]
    id: u32,

    /// Number of nodes (n).
    #[arg(long, env = "NUMBER_OF_NODES", default_value_t = 0)]
    nodes: usize,

    /// Number of faulty nodes tolerated (f).
    #[arg(long, env = "NUMBER_OF_BYZANTINE", default_value_t = 0)]
    byzantine: usize,

    /// Number of clients (k).
    #[arg(long, env = "NUMBER_OF_CLIENTS", default_value_t = 0)]
    clients: usize,

    /// Hosts file: `id hostname reliable_port [stabilizing_port]` per line.
    /// Without it the cluster is NUMBER_OF_NODES nodes on localhost.
    #[arg(long, env = "HOSTS_PATH")]
    hosts: Option<PathBuf>,

    /// Initial fault profile (NONE or UNRESPONSIVE).
    #[arg(long, env = "BYZANTINE_BEHAVIOR", default_value = "NONE")]
    byzantine_behavior: String,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, env = "DEBUG", value_parser = clap::builder::FalseyValueParser::new())]
    debug: bool,

    /// Name of the integration test being run; shortens module loops.
    #[arg(long, env = "INTEGRATION_TEST")]
    integration_test: Option<String>,

    /// Monitoring API port. Default: 4000 + id.
    #[arg(long, env = "API_PORT")]
    api_port: Option<u16>,

    /// Reliable queue capacity per peer.
    #[arg(long, env = "MAX_QUEUE_SIZE")]
    max_queue_size: Option<usize>,
}

impl Cli {
    fn fault_profile(&self) -> FaultProfile {
        match self.byzantine_behavior.parse() {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!("{e}; running with NONE");
                FaultProfile::None
            }
        }
    }

    fn cluster(&self) -> anyhow::Result<ClusterDirectory> {
        match &self.hosts {
            Some(path) => ClusterDirectory::from_hosts_file(path)
                .with_context(|| format!("loading hosts file {}", path.display())),
            None => {
                let n = u32::try_from(self.nodes.max(1)).context("NUMBER_OF_NODES too large")?;
                Ok(ClusterDirectory::localhost(n))
            }
        }
    }

    fn runtime_config(&self) -> RuntimeConfig {
        let mut transport = TransportConfig::new();
        if let Some(capacity) = self.max_queue_size {
            transport = transport.queue_capacity(capacity);
        }

        RuntimeConfig::new()
            .transport(transport)
            .integration_test(self.integration_test.is_some())
            .fault_profile(self.fault_profile())
            .cluster_size(self.nodes, self.byzantine, self.clients)
    }
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let id = NodeId::new(cli.id);
    let cluster = cli.cluster()?;
    let config = cli.runtime_config();
    if let Some(test) = &cli.integration_test {
        tracing::info!(%test, "integration test mode");
    }

    let hello = Arc::new(HelloWorldModule::new(id, config.get_run_interval()));
    let heartbeat = Arc::new(HeartbeatModule::new(
        id,
        cluster.iter().map(|n| n.id),
        config.get_fd_interval(),
        config.get_fd_timeout(),
    ));
    let dispatcher = Dispatcher::builder()
        .register(MessageKind::HelloWorld, hello)
        .register(MessageKind::Heartbeat, heartbeat)
        .build();

    let base_port = config.get_monitoring_base_port();
    let probe = HttpProbe::new(config.get_probe_timeout(), base_port)?;
    let resolver = Resolver::new(id, cluster, dispatcher, config)?;
    tracing::info!(node = %id, nodes = resolver.cluster().len(), "dsb-node v{}", env!("CARGO_PKG_VERSION"));

    let api_port = cli
        .api_port
        .unwrap_or_else(|| resolver.local().monitoring_port(base_port));
    let mut api = tokio::spawn(api::bind_and_serve(resolver.clone(), api_port));

    resolver.start(Arc::new(probe));
    resolver.spawn_modules();
    resolver
        .start_communication()
        .await
        .context("starting communication layer")?;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("waiting for ctrl-c")?;
            tracing::info!("shutting down");
        }
        served = &mut api => {
            served.context("monitoring API task")??;
            anyhow::bail!("monitoring API stopped");
        }
    }

    Ok(())
}
