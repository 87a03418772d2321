use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "helpert_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "helpert_query_duration_seconds";

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: bookings committed.
pub const BOOKINGS_CREATED_TOTAL: &str = "helpert_bookings_created_total";

/// Counter: booking requests refused. Labels: reason.
pub const BOOKINGS_REJECTED_TOTAL: &str = "helpert_bookings_rejected_total";

/// Counter: applied status transitions. Labels: to.
pub const STATUS_TRANSITIONS_TOTAL: &str = "helpert_status_transitions_total";

/// Counter: refused status transitions. Labels: reason.
pub const STATUS_TRANSITIONS_REJECTED_TOTAL: &str = "helpert_status_transitions_rejected_total";

/// Counter: reviews accepted.
pub const REVIEWS_POSTED_TOTAL: &str = "helpert_reviews_posted_total";

/// Histogram: open-slot computation latency in seconds.
pub const SLOT_QUERY_DURATION_SECONDS: &str = "helpert_slot_query_duration_seconds";

/// Counter: repository calls that hit the deadline. Labels: op.
pub const STORE_TIMEOUTS_TOTAL: &str = "helpert_store_timeouts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "helpert_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "helpert_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "helpert_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "helpert_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "helpert_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "helpert_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op if port is None; a
/// failure to bind is logged and the server keeps running without metrics.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertUser { .. } => "insert_user",
        Command::InsertExpert { .. } => "insert_expert",
        Command::UpdateExpert { .. } => "update_expert",
        Command::SelectExpert { .. } => "select_expert",
        Command::InsertConsultationType { .. } => "insert_consultation_type",
        Command::InsertAvailability { .. } => "insert_availability",
        Command::DeactivateAvailability { .. } => "deactivate_availability",
        Command::InsertBooking { .. } => "insert_booking",
        Command::InsertTransition { .. } => "insert_transition",
        Command::CancelBooking { .. } => "cancel_booking",
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectBooking { .. } => "select_booking",
        Command::SelectConsultationTypes { .. } => "select_consultation_types",
        Command::InsertReview { .. } => "insert_review",
        Command::SelectReviews { .. } => "select_reviews",
    }
}
