//! Daemon wiring: clients, signals, aggregator, engine, dispatcher, loop.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use sparkscale_client::{
    CapacitySignal, HistorySignal, KafkaManagerClient, LagSignal, OrchestratorClient, SparkMasterClient,
};
use sparkscale_control::ControlLoop;
use sparkscale_dispatch::{DispatchQueue, ScaleRequestDispatcher};
use sparkscale_metrics::MetricsAggregator;
use sparkscale_policy::ScalingPolicyEngine;
use sparkscale_types::Clock;

use crate::config::Settings;

/// Build the control loop from resolved settings.
///
/// Must be called inside a tokio runtime; the dispatch worker is spawned
/// immediately.
pub fn build(settings: &Settings, clock: Arc<dyn Clock>) -> anyhow::Result<ControlLoop> {
    let kafka = KafkaManagerClient::new(settings.kafka_http.clone(), settings.cluster_name.clone());
    let master = SparkMasterClient::new(settings.spark_http.clone());
    let history = OrchestratorClient::new(settings.history_http.clone(), settings.orchestrator_headers.clone());
    let scale = OrchestratorClient::new(settings.scale_http.clone(), settings.orchestrator_headers.clone());

    let aggregator = MetricsAggregator::new(
        Arc::new(LagSignal::new(kafka, settings.topics.clone())),
        Arc::new(CapacitySignal::new(master)),
        Arc::new(HistorySignal::new(
            history,
            settings.history_limit,
            settings.history_max_age,
            Arc::clone(&clock),
        )),
        settings.aggregator.clone(),
        Arc::clone(&clock),
    );

    let engine = ScalingPolicyEngine::new(settings.policy.clone())?;

    let dispatcher = ScaleRequestDispatcher::new(Arc::new(scale), settings.retry.clone(), Arc::clone(&clock));
    let queue = DispatchQueue::spawn(Arc::new(dispatcher));

    info!(
        kafka_manager = %settings.kafka_http.base_url(),
        spark_master = %settings.spark_http.base_url(),
        orchestrator = %settings.scale_http.base_url(),
        topics = settings.topics.len(),
        "subsystems initialized"
    );

    Ok(ControlLoop::new(aggregator, engine, queue, clock))
}

/// Run until `shutdown` flips.
pub async fn run(settings: Settings, clock: Arc<dyn Clock>, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let control = build(&settings, clock)?;
    control.run(settings.interval, shutdown, settings.shutdown_grace).await;
    Ok(())
}
