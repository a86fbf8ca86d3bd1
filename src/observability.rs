use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: committed status transitions. Labels: to.
pub const TRANSITIONS_TOTAL: &str = "vacancy_transitions_total";

/// Counter: transitions rejected on a stale version.
pub const VERSION_CONFLICTS_TOTAL: &str = "vacancy_version_conflicts_total";

/// Counter: reservation attempts. Labels: outcome.
pub const RESERVATIONS_TOTAL: &str = "vacancy_reservations_total";

/// Counter: conflict checks. Labels: outcome.
pub const CONFLICT_CHECKS_TOTAL: &str = "vacancy_conflict_checks_total";

/// Counter: waitlist notifications sent.
pub const WAITLIST_NOTIFIED_TOTAL: &str = "vacancy_waitlist_notified_total";

/// Counter: waitlist entries expired by the sweep or a late confirm.
pub const WAITLIST_EXPIRED_TOTAL: &str = "vacancy_waitlist_expired_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: registered rooms.
pub const ROOMS_ACTIVE: &str = "vacancy_rooms_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "vacancy_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "vacancy_wal_flush_batch_size";

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

/// Install the default tracing subscriber. Call once from the embedding
/// process; tests and library consumers with their own subscriber skip it.
pub fn init_tracing() {
    tracing_subscriber::fmt::init();
}
