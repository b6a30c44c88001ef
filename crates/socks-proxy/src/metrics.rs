//! Prometheus metrics for the proxy server

use crate::error::Result;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tracing::info;

/// Proxy server metrics.
///
/// Each instance owns its registry, so several servers (or tests) can live in
/// one process without colliding on metric names.
#[derive(Clone)]
pub struct ProxyMetrics {
    /// Accepted connections by outcome
    pub connections_total: IntCounterVec,

    /// Connections currently open
    pub connections_active: IntGauge,

    /// Handshake violations by kind
    pub protocol_violations_total: IntCounterVec,

    /// Failed upstream connect attempts
    pub upstream_failures_total: IntCounter,

    /// Relayed bytes by direction
    pub bytes_transferred_total: IntCounterVec,

    registry: Registry,
}

impl ProxyMetrics {
    /// Create new metrics instance
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let connections_total = IntCounterVec::new(
            Opts::new("socks_connections_total", "Total number of SOCKS5 connections"),
            &["status"],
        )?;

        let connections_active = IntGauge::new(
            "socks_connections_active",
            "Number of open SOCKS5 connections",
        )?;

        let protocol_violations_total = IntCounterVec::new(
            Opts::new(
                "socks_protocol_violations_total",
                "Handshakes closed because of a protocol violation",
            ),
            &["kind"],
        )?;

        let upstream_failures_total = IntCounter::new(
            "socks_upstream_failures_total",
            "Failed upstream connection attempts",
        )?;

        let bytes_transferred_total = IntCounterVec::new(
            Opts::new("socks_bytes_transferred_total", "Total bytes relayed"),
            &["direction"],
        )?;

        registry.register(Box::new(connections_total.clone()))?;
        registry.register(Box::new(connections_active.clone()))?;
        registry.register(Box::new(protocol_violations_total.clone()))?;
        registry.register(Box::new(upstream_failures_total.clone()))?;
        registry.register(Box::new(bytes_transferred_total.clone()))?;

        info!("Proxy metrics initialized");

        Ok(Self {
            connections_total,
            connections_active,
            protocol_violations_total,
            upstream_failures_total,
            bytes_transferred_total,
            registry,
        })
    }

    /// Record an accepted connection
    pub fn record_connection_opened(&self) {
        self.connections_active.inc();
    }

    /// Record a finished connection
    pub fn record_connection_closed(&self, relayed: bool) {
        let status = if relayed { "relayed" } else { "rejected" };
        self.connections_total.with_label_values(&[status]).inc();
        self.connections_active.dec();
    }

    pub fn record_protocol_violation(&self, kind: &str) {
        self.protocol_violations_total
            .with_label_values(&[kind])
            .inc();
    }

    pub fn record_upstream_failure(&self) {
        self.upstream_failures_total.inc();
    }

    /// Record bytes transferred; `direction` is "upload" or "download"
    pub fn record_bytes_transferred(&self, bytes: u64, direction: &str) {
        self.bytes_transferred_total
            .with_label_values(&[direction])
            .inc_by(bytes);
    }

    /// Render all metrics in Prometheus text format
    pub fn export(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| crate::ProxyError::Metrics(format!("Invalid UTF-8 in metrics: {}", e)))
    }
}
