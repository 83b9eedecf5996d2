//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Flow outcomes
//! - Step latency
//! - Relay wallet funding
//! - Chain connection status

use crate::coordination::{FlowMode, StepId};
use crate::error::{OrchestratorError, OrchestratorResult};

use axum::{routing::get, Router};
use ethers::types::U256;
use ethers::utils::format_ether;
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::{error, info};

lazy_static! {
    // Flow metrics
    pub static ref FLOWS_STARTED: CounterVec = register_counter_vec!(
        "vault_orchestrator_flows_started_total",
        "Total flows started by mode",
        &["mode"]
    ).unwrap();

    pub static ref FLOWS_COMPLETED: CounterVec = register_counter_vec!(
        "vault_orchestrator_flows_completed_total",
        "Total flows completed by mode",
        &["mode"]
    ).unwrap();

    pub static ref FLOWS_FAILED: CounterVec = register_counter_vec!(
        "vault_orchestrator_flows_failed_total",
        "Total flows failed by failing step (funding when none ran)",
        &["step"]
    ).unwrap();

    // Step metrics
    pub static ref STEP_LATENCY: HistogramVec = register_histogram_vec!(
        "vault_orchestrator_step_latency_seconds",
        "Step execution latency including precheck",
        &["step", "outcome"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    ).unwrap();

    // Funding metrics
    pub static ref FUNDING_ATTEMPTS: CounterVec = register_counter_vec!(
        "vault_orchestrator_funding_verification_attempts_total",
        "Relay balance observations made while verifying funding",
        &["chain_id"]
    ).unwrap();

    pub static ref FUNDING_LENIENCY: CounterVec = register_counter_vec!(
        "vault_orchestrator_funding_leniency_total",
        "Cross-chain fundings accepted without observing the balance",
        &["chain_id"]
    ).unwrap();

    pub static ref RELAY_BALANCE: GaugeVec = register_gauge_vec!(
        "vault_orchestrator_relay_balance_eth",
        "Relay wallet balance in ETH",
        &["chain_id"]
    ).unwrap();

    // Chain metrics
    pub static ref CHAIN_CONNECTED: GaugeVec = register_gauge_vec!(
        "vault_orchestrator_chain_connected",
        "Chain connection status (1=connected, 0=disconnected)",
        &["chain_id"]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> OrchestratorResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| OrchestratorError::Internal(format!("bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| OrchestratorError::Internal(e.to_string()))?;

        Ok(())
    }
}

async fn metrics_handler() -> String {
    render()
}

/// Text exposition of every registered metric
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }

    String::from_utf8(buffer).unwrap_or_default()
}

fn mode_label(mode: FlowMode) -> &'static str {
    match mode {
        FlowMode::Deposit => "deposit",
        FlowMode::Withdraw => "withdraw",
    }
}

// Helper functions to record metrics

pub fn record_flow_started(mode: FlowMode) {
    FLOWS_STARTED.with_label_values(&[mode_label(mode)]).inc();
}

pub fn record_flow_completed(mode: FlowMode) {
    FLOWS_COMPLETED.with_label_values(&[mode_label(mode)]).inc();
}

pub fn record_flow_failed(step: Option<StepId>) {
    let label = step.map_or("funding", |s| s.as_str());
    FLOWS_FAILED.with_label_values(&[label]).inc();
}

pub fn observe_step(step: StepId, latency_secs: f64, succeeded: bool) {
    let outcome = if succeeded { "completed" } else { "error" };
    STEP_LATENCY
        .with_label_values(&[step.as_str(), outcome])
        .observe(latency_secs);
}

pub fn record_funding_attempts(chain_id: u64, attempts: u32) {
    FUNDING_ATTEMPTS
        .with_label_values(&[&chain_id.to_string()])
        .inc_by(attempts as f64);
}

pub fn record_funding_leniency(chain_id: u64) {
    FUNDING_LENIENCY
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn set_relay_balance(chain_id: u64, balance: &U256) {
    let eth = format_ether(*balance).parse::<f64>().unwrap_or(0.0);
    RELAY_BALANCE
        .with_label_values(&[&chain_id.to_string()])
        .set(eth);
}

pub fn record_chain_health(chain_id: u64, healthy: bool) {
    CHAIN_CONNECTED
        .with_label_values(&[&chain_id.to_string()])
        .set(if healthy { 1.0 } else { 0.0 });
}
