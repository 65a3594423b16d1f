use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use relay_core::{init_tracing, Config};
use relay_runtime::{
    ChannelFactory, GatewayState, GitHubClient, HandlerCtx, HandlerRegistry, JobRuntimeConfig,
    OdooClient, SshPool, Supervisor,
};

/// CI/CD orchestration worker bridging the BPMN engine, GitHub and Odoo.
#[derive(Parser)]
#[command(name = "relay")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Load configuration and exit without starting the worker.
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::from_env().context("loading configuration from environment")?;
    init_tracing(&config);

    if cli.check_config {
        tracing::info!("configuration loaded successfully");
        return Ok(());
    }

    let config = Arc::new(config);
    let ssh = SshPool::new(config.ssh_key_path.clone());
    let github = GitHubClient::new(config.github.token.clone(), config.github.deploy_pat.clone());
    let odoo = OdooClient::new(config.odoo.webhook_url.clone(), config.odoo.project_id);
    let channel_factory = Arc::new(ChannelFactory::new(
        config.engine.address.clone(),
        config.engine.use_tls,
        config.engine.auth.clone(),
    ));

    let ctx = HandlerCtx { config: config.clone(), ssh, github, odoo };
    let registry = HandlerRegistry::with_all_handlers();
    tracing::info!(handler_count = registry.len(), "handler registry built");

    let job_runtime = JobRuntimeConfig { channel_factory: channel_factory.clone(), registry, ctx };
    let gateway_state = GatewayState {
        config: config.clone(),
        channel_factory,
        http: reqwest::Client::new(),
    };
    let webhook_addr: SocketAddr = format!("{}:{}", config.webhook.host, config.webhook.port)
        .parse()
        .context("parsing WEBHOOK_HOST/WEBHOOK_PORT into a socket address")?;

    Supervisor::new(job_runtime, gateway_state, webhook_addr).run().await;
    Ok(())
}
