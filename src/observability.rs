use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: bookings admitted into the committed interval set.
pub const BOOKINGS_ADMITTED_TOTAL: &str = "custos_bookings_admitted_total";

/// Counter: approvals rejected by the overlap check.
pub const BOOKING_CONFLICTS_TOTAL: &str = "custos_booking_conflicts_total";

/// Counter: successful lifecycle transitions across all entity types.
pub const TRANSITIONS_TOTAL: &str = "custos_transitions_total";

/// Counter: ledger entries appended.
pub const LEDGER_ENTRIES_TOTAL: &str = "custos_ledger_entries_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL append latency in seconds (flush + fsync included).
pub const WAL_APPEND_DURATION_SECONDS: &str = "custos_wal_append_duration_seconds";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
