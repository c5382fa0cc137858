use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: availability computations. Labels: status.
pub const AVAILABILITY_QUERIES_TOTAL: &str = "appointd_availability_queries_total";

/// Histogram: availability computation latency in seconds.
pub const AVAILABILITY_DURATION_SECONDS: &str = "appointd_availability_duration_seconds";

/// Counter: booking attempts. Labels: outcome (created, conflict, rejected).
pub const BOOKINGS_TOTAL: &str = "appointd_bookings_total";

/// Counter: appointment status changes. Labels: status.
pub const STATUS_CHANGES_TOTAL: &str = "appointd_status_changes_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: businesses loaded in the engine.
pub const BUSINESSES_ACTIVE: &str = "appointd_businesses_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "appointd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "appointd_wal_flush_batch_size";

/// Counter: WAL compactions performed.
pub const WAL_COMPACTIONS_TOTAL: &str = "appointd_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), String> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install Prometheus metrics exporter: {e}"))?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for a booking failure.
pub fn booking_outcome(err: &crate::engine::EngineError) -> &'static str {
    use crate::engine::EngineError;
    match err {
        EngineError::TimeSlotUnavailable(_) => "conflict",
        EngineError::NotFound(_) => "not_found",
        EngineError::WalError(_) => "storage_error",
        _ => "rejected",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineError;
    use ulid::Ulid;

    #[test]
    fn init_without_port_is_noop() {
        assert!(init(None).is_ok());
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(booking_outcome(&EngineError::TimeSlotUnavailable(Ulid::new())), "conflict");
        assert_eq!(booking_outcome(&EngineError::NotFound(Ulid::new())), "not_found");
        assert_eq!(booking_outcome(&EngineError::InvalidInput("x")), "rejected");
    }
}
