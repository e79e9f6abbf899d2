use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use chrono::{DateTime, Utc};
use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::throughput::{ThroughputTracker, counter_delta};
use crate::wireguard::DeviceStats;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metrics registry error: {0}")]
    Registry(#[from] prometheus::Error),

    #[error("metrics output is not UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),

    #[error("failed to bind metrics listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("metrics server error: {0}")]
    Serve(std::io::Error),
}

/// Receives the device stats read on each health cycle.
pub trait MetricsSink: Send + Sync {
    fn update(&self, stats: &DeviceStats);
}

#[derive(Default)]
struct ByteCounters {
    last_rx: Option<u64>,
    last_tx: Option<u64>,
    throughput: ThroughputTracker,
}

/// Prometheus view of the WireGuard interface.
pub struct Exporter {
    registry: Registry,
    peers: IntGauge,
    active_peers: IntGauge,
    handshake_ratio: Gauge,
    last_handshake: Gauge,
    rx_bytes: IntCounter,
    tx_bytes: IntCounter,
    rx_bps: Gauge,
    tx_bps: Gauge,
    counters: Mutex<ByteCounters>,
}

impl Exporter {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let peers = IntGauge::new("tridot_agent_wireguard_peers", "Current WireGuard peer count")?;
        registry.register(Box::new(peers.clone()))?;

        let active_peers = IntGauge::new(
            "tridot_agent_wireguard_active_peers",
            "Peers with a recent handshake",
        )?;
        registry.register(Box::new(active_peers.clone()))?;

        let handshake_ratio = Gauge::new(
            "tridot_agent_wireguard_handshake_ratio",
            "Active peers divided by total peers",
        )?;
        registry.register(Box::new(handshake_ratio.clone()))?;

        let last_handshake = Gauge::new(
            "tridot_agent_wireguard_last_handshake_timestamp_seconds",
            "Unix time of the most recent peer handshake",
        )?;
        registry.register(Box::new(last_handshake.clone()))?;

        let rx_bytes = IntCounter::new(
            "tridot_agent_wireguard_rx_bytes_total",
            "Cumulative received bytes",
        )?;
        registry.register(Box::new(rx_bytes.clone()))?;

        let tx_bytes = IntCounter::new(
            "tridot_agent_wireguard_tx_bytes_total",
            "Cumulative transmitted bytes",
        )?;
        registry.register(Box::new(tx_bytes.clone()))?;

        let rx_bps = Gauge::new(
            "tridot_agent_wireguard_rx_throughput_bps",
            "Receive throughput in bits per second",
        )?;
        registry.register(Box::new(rx_bps.clone()))?;

        let tx_bps = Gauge::new(
            "tridot_agent_wireguard_tx_throughput_bps",
            "Transmit throughput in bits per second",
        )?;
        registry.register(Box::new(tx_bps.clone()))?;

        Ok(Self {
            registry,
            peers,
            active_peers,
            handshake_ratio,
            last_handshake,
            rx_bytes,
            tx_bytes,
            rx_bps,
            tx_bps,
            counters: Mutex::new(ByteCounters::default()),
        })
    }

    pub fn update_at(&self, stats: &DeviceStats, now: DateTime<Utc>) {
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        self.peers.set(i64::from(stats.peer_count));
        self.active_peers.set(i64::from(stats.active_peers));
        self.handshake_ratio.set(stats.handshake_ratio());
        self.last_handshake
            .set(stats.last_handshake.map_or(0.0, |at| at.timestamp() as f64));

        let rx_delta = counters
            .last_rx
            .map_or(stats.rx_bytes, |last| counter_delta(stats.rx_bytes, last));
        let tx_delta = counters
            .last_tx
            .map_or(stats.tx_bytes, |last| counter_delta(stats.tx_bytes, last));
        self.rx_bytes.inc_by(rx_delta);
        self.tx_bytes.inc_by(tx_delta);
        counters.last_rx = Some(stats.rx_bytes);
        counters.last_tx = Some(stats.tx_bytes);

        let rate = counters
            .throughput
            .observe(now, stats.rx_bytes, stats.tx_bytes);
        self.rx_bps.set(rate.rx_bps);
        self.tx_bps.set(rate.tx_bps);
    }

    /// Text exposition format.
    pub fn render(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl MetricsSink for Exporter {
    fn update(&self, stats: &DeviceStats) {
        self.update_at(stats, Utc::now());
    }
}

pub fn router(exporter: Arc<Exporter>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(exporter)
}

async fn metrics_handler(State(exporter): State<Arc<Exporter>>) -> Response {
    match exporter.render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Serves `GET /metrics` until `cancel` fires.
pub async fn serve(
    addr: SocketAddr,
    exporter: Arc<Exporter>,
    cancel: CancellationToken,
) -> Result<(), MetricsError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| MetricsError::Bind { addr, source })?;
    info!(%addr, "Metrics endpoint listening");

    axum::serve(listener, router(exporter))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(MetricsError::Serve)
}
