use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time;
use tracing::{error, info, warn};

use lp_rebalancer::advisor::{OpenAiCompletionClient, RecommendationAdvisor};
use lp_rebalancer::config::RebalancerConfig;
use lp_rebalancer::execution::HttpExecutionClient;
use lp_rebalancer::notify::{LogNotifier, Notifier, WebhookNotifier};
use lp_rebalancer::orchestrator::RebalanceOrchestrator;
use lp_rebalancer::subgraph::SubgraphClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lp_rebalancer=debug,info".into()),
        )
        .init();

    // Load configuration: a TOML file when CONFIG_FILE is set, environment
    // variables otherwise
    let config = match std::env::var("CONFIG_FILE") {
        Ok(path) => RebalancerConfig::from_file(&path)?,
        Err(_) => RebalancerConfig::from_env()?,
    };
    config.validate()?;

    info!("Starting LP range rebalancer");
    info!("Chain ID: {}", config.chain_id);
    info!("Risk profile: {}", config.risk_profile);
    info!("Monitoring {} positions", config.position_ids.len());
    if config.dry_run {
        info!("Dry run mode: no on-chain actions will be submitted");
    }

    // Metrics exporter
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    builder
        .with_http_listener(([0, 0, 0, 0], config.metrics_port))
        .install()
        .context("Failed to install Prometheus exporter")?;
    info!("Prometheus metrics enabled on port {}", config.metrics_port);

    // Collaborators
    let analytics = Arc::new(SubgraphClient::new(config.analytics_endpoint.clone()));
    let execution = Arc::new(HttpExecutionClient::new(config.execution_endpoint.clone()));
    let notifier: Arc<dyn Notifier> = match &config.notifier.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(LogNotifier),
    };

    let mut advisor =
        RecommendationAdvisor::heuristic(config.min_utilization_pct, config.high_volatility_pct);
    if config.advisor.enabled {
        let api_key = config
            .advisor
            .api_key
            .clone()
            .context("advisor enabled without an API key")?;
        advisor = advisor.with_model(Arc::new(OpenAiCompletionClient::new(
            config.advisor.endpoint.clone(),
            api_key,
            config.advisor.model.clone(),
        )));
        info!("Model-backed advisor enabled ({})", config.advisor.model);
    } else {
        info!("Using heuristic advisor");
    }

    let mut orchestrator =
        RebalanceOrchestrator::new(&config, analytics, execution, notifier, advisor);

    if config.position_ids.is_empty() {
        warn!("No positions configured; cycles will be no-ops");
    }

    // One cycle at a time: the wallet account is shared state and the
    // sequential loop is what serializes it
    let mut interval = time::interval(Duration::from_secs(config.cycle_interval_secs));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let results = orchestrator.run_cycle(&config.position_ids).await;
                for result in &results {
                    if let Some(err) = &result.error {
                        error!(position = result.position_id.as_str(), "cycle error: {}", err);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    Ok(())
}
