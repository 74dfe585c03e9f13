//! Counters recorded into the process-wide Prometheus recorder installed in
//! `main`, mirrored as trace events under `normalizer.metrics`.

use tracing::trace;

pub fn inc_requests(route: &'static str) {
    ::metrics::counter!("normalizer_requests_total", "route" => route).increment(1);
    trace!(
        target = "normalizer.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn classification_attempt(outcome: &'static str) {
    ::metrics::counter!("normalizer_classification_attempts_total", "outcome" => outcome)
        .increment(1);
    trace!(
        target = "normalizer.metrics",
        outcome = outcome,
        "classification_attempts_total_inc"
    );
}

pub fn item_outcome(status: &'static str) {
    ::metrics::counter!("normalizer_listings_total", "status" => status).increment(1);
    trace!(
        target = "normalizer.metrics",
        status = status,
        "items_total_inc"
    );
}

pub fn run_elapsed(elapsed_ms: u128) {
    ::metrics::histogram!("normalizer_run_elapsed_ms").record(elapsed_ms as f64);
    trace!(
        target = "normalizer.metrics",
        elapsed_ms = elapsed_ms as u64,
        "run_elapsed"
    );
}
